//! Process-wide sink for non-fatal controller errors.

use std::sync::atomic::{AtomicU64, Ordering};

use informer::ResourceKey;
use tracing::error;

/// What went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A notification carried an object no key could be derived from.
    KeyDerivation,
    /// The sync handler failed and the key was requeued.
    SyncFailed,
    /// The sync handler panicked; treated like a failure.
    HandlerPanicked,
    /// The sync handler reported a failure that retrying cannot fix.
    PermanentFailure,
    /// The key failed too often and was dropped.
    RetriesExhausted,
}

impl ErrorKind {
    /// Short name for logging.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::KeyDerivation => "key_derivation",
            Self::SyncFailed => "sync_failed",
            Self::HandlerPanicked => "handler_panicked",
            Self::PermanentFailure => "permanent_failure",
            Self::RetriesExhausted => "retries_exhausted",
        }
    }
}

/// One reported error.
#[derive(Debug, Clone, Copy)]
pub struct ErrorReport<'a> {
    pub controller: &'a str,
    pub kind: ErrorKind,
    /// Absent when no key could be derived.
    pub key: Option<&'a ResourceKey>,
    pub message: &'a str,
}

/// Receives errors that must not stop the controller.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, report: &ErrorReport<'_>);
}

/// Logs every report at error level and counts them.
#[derive(Debug, Default)]
pub struct TracingErrorReporter {
    reported: AtomicU64,
}

impl TracingErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of errors reported so far.
    pub fn reported(&self) -> u64 {
        self.reported.load(Ordering::Relaxed)
    }
}

impl ErrorReporter for TracingErrorReporter {
    fn report(&self, report: &ErrorReport<'_>) {
        self.reported.fetch_add(1, Ordering::Relaxed);
        match report.key {
            Some(key) => error!(
                controller = report.controller,
                kind = report.kind.as_str(),
                key = %key,
                error = report.message,
                "Controller error"
            ),
            None => error!(
                controller = report.controller,
                kind = report.kind.as_str(),
                error = report.message,
                "Controller error"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_count_reports() {
        let reporter = TracingErrorReporter::new();
        let key = ResourceKey::namespaced("ns", "a");

        reporter.report(&ErrorReport {
            controller: "crontabs",
            kind: ErrorKind::SyncFailed,
            key: Some(&key),
            message: "timeout",
        });
        reporter.report(&ErrorReport {
            controller: "crontabs",
            kind: ErrorKind::KeyDerivation,
            key: None,
            message: "object has no name",
        });

        assert_eq!(reporter.reported(), 2);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use parking_lot::Mutex;

    use super::{ErrorKind, ErrorReport, ErrorReporter};

    /// Keeps every report for assertions.
    #[derive(Debug, Default)]
    pub struct RecordingReporter {
        reports: Mutex<Vec<(ErrorKind, Option<String>)>>,
    }

    impl RecordingReporter {
        pub fn kinds(&self) -> Vec<ErrorKind> {
            self.reports.lock().iter().map(|(kind, _)| *kind).collect()
        }

        pub fn keys(&self) -> Vec<Option<String>> {
            self.reports.lock().iter().map(|(_, key)| key.clone()).collect()
        }
    }

    impl ErrorReporter for RecordingReporter {
        fn report(&self, report: &ErrorReport<'_>) {
            self.reports
                .lock()
                .push((report.kind, report.key.map(ToString::to_string)));
        }
    }
}
