use crate::error::{ReactorError, render_chain};
use std::collections::BTreeMap;
use std::fmt;

/// Why one service produced no result.
#[derive(Debug)]
pub enum ServiceFailure {
    Failed(ReactorError),
    /// Aborted by cancellation or the overall deadline before finishing.
    Cancelled,
    /// The service's task panicked.
    Panicked(String),
}

impl fmt::Display for ServiceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(e) => write!(f, "{}", render_chain(e)),
            Self::Cancelled => write!(f, "cancelled before completion"),
            Self::Panicked(msg) => write!(f, "task panicked: {msg}"),
        }
    }
}

/// Per-service results of one workspace command, keyed by service name.
///
/// Every service of the workspace appears exactly once.
#[derive(Debug)]
pub struct WorkspaceReport<T> {
    pub operation: &'static str,
    results: BTreeMap<String, Result<T, ServiceFailure>>,
}

impl<T> WorkspaceReport<T> {
    #[must_use]
    pub const fn new(operation: &'static str) -> Self {
        Self {
            operation,
            results: BTreeMap::new(),
        }
    }

    /// Records a service's result. The first result for a service wins.
    pub fn record(&mut self, service: impl Into<String>, result: Result<T, ServiceFailure>) {
        self.results.entry(service.into()).or_insert(result);
    }

    #[must_use]
    pub fn get(&self, service: &str) -> Option<&Result<T, ServiceFailure>> {
        self.results.get(service)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// True when every service succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.results.values().all(Result::is_ok)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Result<T, ServiceFailure>)> {
        self.results.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &ServiceFailure)> {
        self.results
            .iter()
            .filter_map(|(k, v)| v.as_ref().err().map(|e| (k.as_str(), e)))
    }

    pub fn successes(&self) -> impl Iterator<Item = (&str, &T)> {
        self.results
            .iter()
            .filter_map(|(k, v)| v.as_ref().ok().map(|t| (k.as_str(), t)))
    }
}
