// SPDX-License-Identifier: Apache-2.0

use crate::engine::SearchReport;

#[derive(Debug)]
pub enum SearchError {
    /// The configuration was rejected before the search started.
    InvalidConfig(String),
    /// A TOML configuration document could not be parsed.
    ConfigParse(String),
    /// The SUT driver failed too many times in a row; the run was aborted.
    ///
    /// `partial` holds whatever the archive contained at the time of the
    /// abort.
    DriverUnavailable {
        consecutive_failures: usize,
        partial: Box<SearchReport>,
    },
    /// The action executor thread could not be started or went away.
    Executor(String),
}

impl SearchError {
    /// Partial results still available after a fatal abort, if any.
    pub fn partial_report(&self) -> Option<&SearchReport> {
        match self {
            SearchError::DriverUnavailable { partial, .. } => Some(&**partial),
            _ => None,
        }
    }
}

impl std::fmt::Display for SearchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchError::InvalidConfig(msg) => write!(f, "invalid search config: {}", msg),
            SearchError::ConfigParse(msg) => write!(f, "could not parse search config: {}", msg),
            SearchError::DriverUnavailable {
                consecutive_failures,
                ..
            } => write!(
                f,
                "SUT driver presumed dead after {} consecutive failed executions",
                consecutive_failures
            ),
            SearchError::Executor(msg) => write!(f, "action executor error: {}", msg),
        }
    }
}

impl std::error::Error for SearchError {}
