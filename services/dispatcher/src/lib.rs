//! Prow job dispatcher service library.
//!
//! This crate primarily ships the `prow-job-dispatcher` binary, but we expose
//! a small library surface to enable integration testing.

pub mod api;
pub mod config;
pub mod inventory;
pub mod state;
pub mod worker;
