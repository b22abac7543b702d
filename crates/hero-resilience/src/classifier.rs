//! Transient-error classification.
//!
//! An error is transient if it is a timeout, a database error whose code is
//! in a known transient set, or its message contains "timeout"/"connection"
//! (case-insensitive, last resort), or it wraps another transient error.
//! Cancellations are never transient.

use hero_common::{ErrorKind, ProcessingErrorInfo};

/// Known transient database error codes. Kept small and explicit rather than
/// a blanket "any 5xx-like code" rule, since the caller is expected to widen
/// this as new backends are added.
const TRANSIENT_DB_CODES: &[&str] = &[
    "connection_reset",
    "server_busy",
    "database_unavailable",
    "too_many_connections",
];

/// An error as seen by the classifier: a kind, a message, a database error
/// code if one exists, and an optional chained cause.
pub trait Classifiable {
    fn kind(&self) -> ErrorKind;
    fn message(&self) -> &str;
    fn db_code(&self) -> Option<&str> {
        None
    }
    fn cause(&self) -> Option<&dyn Classifiable> {
        None
    }
}

impl Classifiable for ProcessingErrorInfo {
    fn kind(&self) -> ErrorKind {
        self.kind
    }
    fn message(&self) -> &str {
        &self.message
    }
    fn cause(&self) -> Option<&dyn Classifiable> {
        self.inner.as_deref().map(|c| c as &dyn Classifiable)
    }
}

pub struct TransientClassifier;

impl TransientClassifier {
    pub fn is_transient(error: &dyn Classifiable) -> bool {
        if error.kind() == ErrorKind::Cancellation {
            return false;
        }
        if error.kind() == ErrorKind::Transient {
            return true;
        }
        if let Some(code) = error.db_code() {
            if TRANSIENT_DB_CODES.contains(&code) {
                return true;
            }
        }
        if Self::message_suggests_transient(error.message()) {
            return true;
        }
        error
            .cause()
            .is_some_and(|inner| Self::is_transient(inner))
    }

    /// Last-resort heuristic; prefer typed/coded classification when
    /// available.
    fn message_suggests_transient(message: &str) -> bool {
        let lower = message.to_ascii_lowercase();
        lower.contains("timeout") || lower.contains("connection")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake {
        kind: ErrorKind,
        message: &'static str,
        db_code: Option<&'static str>,
        cause: Option<Box<Fake>>,
    }

    impl Classifiable for Fake {
        fn kind(&self) -> ErrorKind {
            self.kind
        }
        fn message(&self) -> &str {
            self.message
        }
        fn db_code(&self) -> Option<&str> {
            self.db_code
        }
        fn cause(&self) -> Option<&dyn Classifiable> {
            self.cause.as_deref().map(|c| c as &dyn Classifiable)
        }
    }

    #[test]
    fn cancellation_is_never_transient() {
        let err = Fake {
            kind: ErrorKind::Cancellation,
            message: "connection timeout",
            db_code: None,
            cause: None,
        };
        assert!(!TransientClassifier::is_transient(&err));
    }

    #[test]
    fn known_db_code_is_transient() {
        let err = Fake {
            kind: ErrorKind::Permanent,
            message: "upstream rejected",
            db_code: Some("server_busy"),
            cause: None,
        };
        assert!(TransientClassifier::is_transient(&err));
    }

    #[test]
    fn message_content_is_last_resort() {
        let err = Fake {
            kind: ErrorKind::Permanent,
            message: "Connection reset by peer",
            db_code: None,
            cause: None,
        };
        assert!(TransientClassifier::is_transient(&err));
    }

    #[test]
    fn transient_cause_propagates_through_chain() {
        let inner = Fake {
            kind: ErrorKind::Transient,
            message: "timed out",
            db_code: None,
            cause: None,
        };
        let outer = Fake {
            kind: ErrorKind::Permanent,
            message: "batch failed",
            db_code: None,
            cause: Some(Box::new(inner)),
        };
        assert!(TransientClassifier::is_transient(&outer));
    }

    #[test]
    fn unrelated_permanent_error_is_not_transient() {
        let err = Fake {
            kind: ErrorKind::Permanent,
            message: "invalid payload schema",
            db_code: None,
            cause: None,
        };
        assert!(!TransientClassifier::is_transient(&err));
    }
}
