use std::path::PathBuf;
use thiserror::Error;

/// Error raised by a user-supplied objective function.
pub type ObjectiveError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for the evaluation engine
#[derive(Error, Debug)]
pub enum TdError {
    #[error("Constraint error: {0}")]
    Constraint(#[from] ConstraintError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Feasibility-evaluation errors
#[derive(Error, Debug)]
pub enum ConstraintError {
    #[error("Unexpected failure '{message}' while evaluating constraint '{constraint}'; correct this constraint before evaluating again")]
    Definition { constraint: String, message: String },
}

/// Errors raised while dispatching a batch to the objective function
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Objective evaluation failed for configuration {id}: {source}")]
    ObjectiveExecution {
        id: usize,
        #[source]
        source: ObjectiveError,
    },

    #[error("Failed to spawn worker group from {executable:?}: {source}")]
    Spawn {
        executable: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Collective communication failed at worker {rank}: {message}")]
    Collective { rank: usize, message: String },

    #[error("Objective output has the wrong shape: {message}")]
    ResultShape { message: String },
}

impl DispatchError {
    /// Whether this error came from the objective function itself.
    pub fn is_objective_failure(&self) -> bool {
        matches!(self, Self::ObjectiveExecution { .. })
    }
}

/// Result type alias for engine operations
pub type TdResult<T> = Result<T, TdError>;

/// Helper trait for converting string errors
pub trait IntoTdError {
    fn into_td_error(self) -> TdError;
}

impl IntoTdError for String {
    fn into_td_error(self) -> TdError {
        TdError::Internal(self)
    }
}

impl IntoTdError for &str {
    fn into_td_error(self) -> TdError {
        TdError::Internal(self.to_string())
    }
}

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::TdError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::TdError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::TdError::Config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ConstraintError::Definition {
            constraint: "cst1".to_string(),
            message: "unexpected token ')'".to_string(),
        };

        assert!(error.to_string().contains("cst1"));
        assert!(error.to_string().contains("unexpected token"));
    }

    #[test]
    fn test_error_conversion() {
        let dispatch_error = DispatchError::Collective {
            rank: 2,
            message: "worker exited".to_string(),
        };
        let td_error: TdError = dispatch_error.into();

        match td_error {
            TdError::Dispatch(DispatchError::Collective { rank, .. }) => assert_eq!(rank, 2),
            _ => panic!("Expected Dispatch error"),
        }
    }

    #[test]
    fn test_objective_failure_keeps_source() {
        let source: ObjectiveError = "simulator crashed".into();
        let error = DispatchError::ObjectiveExecution { id: 3, source };

        assert!(error.is_objective_failure());
        let inner = std::error::Error::source(&error).map(|e| e.to_string());
        assert_eq!(inner.as_deref(), Some("simulator crashed"));
    }

    #[test]
    fn test_macros() {
        let validation_err = validation_error!("Invalid value: {}", 42);
        assert!(matches!(validation_err, TdError::Validation(_)));
        let internal_err = internal_error!("Something went wrong");
        assert!(matches!(internal_err, TdError::Internal(_)));
        let config_err = config_error!("Missing required field: {}", "driver");
        assert!(matches!(config_err, TdError::Config(_)));
    }
}
