//! Error types for loading dispatch configuration and resolving clusters.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Errors detected while loading or validating dispatch configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read the config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file could not be written.
    #[error("failed to write the config file {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid YAML for the expected shape.
    #[error("failed to unmarshal the config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A path regex failed to compile.
    #[error("failed to compile regex {field} from {pattern:?}: {source}")]
    InvalidPattern {
        field: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("the default cluster must be set in the config")]
    MissingDefault,

    /// Job names listed in more than one group.
    #[error("there are job names occurring more than once: {}", bracketed(.0))]
    DuplicateJobs(Vec<String>),

    /// Several independent problems reported together.
    #[error("{}", aggregate(.0))]
    Aggregate(Vec<ConfigError>),
}

impl ConfigError {
    /// Collapse a list of errors into one: `None` when empty, the error
    /// itself when there is exactly one, an aggregate otherwise.
    pub fn aggregate(mut errors: Vec<ConfigError>) -> Option<ConfigError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(ConfigError::Aggregate(errors)),
        }
    }
}

/// Errors returned by the cluster resolver.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    /// The path matched regexes from more than one group.
    #[error("path {path} matches more than 1 regex: {}", bracketed(.matches))]
    AmbiguousPath { path: String, matches: Vec<String> },
}

/// Errors returned by the ephemeral cluster scheduler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EphemeralError {
    #[error("no cluster available")]
    NoClusterAvailable,
}

fn bracketed(items: &[String]) -> String {
    format!("[{}]", items.join(" "))
}

fn aggregate(errors: &[ConfigError]) -> String {
    struct Joined<'a>(&'a [ConfigError]);

    impl fmt::Display for Joined<'_> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            for (i, err) in self.0.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{err}")?;
            }
            Ok(())
        }
    }

    format!("[{}]", Joined(errors))
}
