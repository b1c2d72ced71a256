use thiserror::Error;

/// Main error type for the BackTune system.
///
/// The propagation policy is deliberately uneven: `Config` errors are fatal
/// and surface before a session starts, `Evaluation` and `Numerical` errors
/// are absorbed into per-observation metadata so a search keeps running, and
/// `Cancelled` is a normal termination rather than a failure.
#[derive(Error, Debug)]
pub enum BtError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Session cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BtError {
    /// Whether this error aborts a running session (as opposed to being
    /// recorded against a single observation and skipped over).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Internal(_))
    }
}

/// Result type alias for BackTune operations.
pub type BtResult<T> = Result<T, BtError>;

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::BtError::Config(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::BtError::Internal(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = BtError::Config("no parameters defined".to_string());
        assert!(err.to_string().contains("Configuration error"));
        assert!(err.to_string().contains("no parameters defined"));
    }

    #[test]
    fn fatality_split() {
        assert!(BtError::Config("x".into()).is_fatal());
        assert!(!BtError::Evaluation("timeout".into()).is_fatal());
        assert!(!BtError::Numerical("not positive definite".into()).is_fatal());
        assert!(!BtError::Cancelled.is_fatal());
    }

    #[test]
    fn macros() {
        let err = config_error!("bad bounds for {}: {} > {}", "x", 3.0, 1.0);
        match err {
            BtError::Config(msg) => assert!(msg.contains("bad bounds for x")),
            _ => panic!("expected Config error"),
        }
        let _internal = internal_error!("unreachable state");
    }
}
