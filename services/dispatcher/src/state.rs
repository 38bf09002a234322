//! Application state shared across request handlers.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use cidispatch_dispatcher::{EphemeralScheduler, JobRecords};

/// Summary of the last successful reconciliation pass.
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub completed_at: DateTime<Utc>,
    pub jobs_assigned: usize,
    pub jobs_failed: usize,
}

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    records: JobRecords,
    ephemeral: EphemeralScheduler,
    last_reconcile: ArcSwapOption<ReconcileReport>,
}

impl AppState {
    pub fn new(records: JobRecords, ephemeral: EphemeralScheduler) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                records,
                ephemeral,
                last_reconcile: ArcSwapOption::empty(),
            }),
        }
    }

    pub fn records(&self) -> &JobRecords {
        &self.inner.records
    }

    pub fn ephemeral(&self) -> &EphemeralScheduler {
        &self.inner.ephemeral
    }

    pub fn last_reconcile(&self) -> Option<Arc<ReconcileReport>> {
        self.inner.last_reconcile.load_full()
    }

    pub fn set_last_reconcile(&self, report: ReconcileReport) {
        self.inner.last_reconcile.store(Some(Arc::new(report)));
    }
}
