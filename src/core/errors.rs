// EN: src/core/errors.rs

use crate::core::flag_groups::FlagGroupError;
use crate::core::wrapper::WrapperError;
use std::time::Duration;
use thiserror::Error;

/// Outcome of an action or of any layer wrapping it.
pub type ActionResult = Result<(), ActionError>;

/// Every error that can travel up a middleware chain.
///
/// Middleware that does not handle a variant must hand it back untouched.
#[derive(Error, Debug)]
pub enum ActionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    #[error(transparent)]
    Recovery(#[from] RecoveryError),
    #[error(transparent)]
    FlagGroup(#[from] FlagGroupError),
    #[error(transparent)]
    Wrapper(#[from] WrapperError),
    /// The invocation's cancellation signal fired before the action finished.
    #[error("Operation was cancelled.")]
    Cancelled,
    /// Any error produced by user code.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ActionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Input or configuration misuse detected before the action ran.
#[derive(Error, Debug)]
#[error("Validation failed for '{field}': {message}")]
pub struct ValidationError {
    pub field: String,
    pub value: Option<String>,
    pub message: String,
    #[source]
    pub cause: Option<Box<ActionError>>,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: None,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Wraps an arbitrary error raised by the validator named `field`.
    pub fn wrap(field: impl Into<String>, cause: ActionError) -> Self {
        Self {
            field: field.into(),
            value: None,
            message: cause.to_string(),
            cause: Some(Box::new(cause)),
        }
    }
}

/// The action exceeded its time bound.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Command '{command}' timed out after {duration:?}.")]
pub struct TimeoutError {
    pub duration: Duration,
    pub command: String,
}

/// A panic raised by the action, converted into a value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Command '{command}' panicked: {panic}")]
pub struct RecoveryError {
    /// The panic payload rendered as text.
    pub panic: String,
    pub command: String,
    /// Captured stack trace, truncated to the configured size.
    pub stack: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_wrapped_validation_error_keeps_cause() {
        let cause = ActionError::Other(anyhow::anyhow!("port already in use"));
        let err = ValidationError::wrap("port_free", cause);
        assert_eq!(err.field, "port_free");
        assert_eq!(
            err.to_string(),
            "Validation failed for 'port_free': port already in use"
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn test_error_rendering() {
        let timeout = ActionError::from(TimeoutError {
            duration: Duration::from_millis(250),
            command: "sync".to_string(),
        });
        assert_eq!(timeout.to_string(), "Command 'sync' timed out after 250ms.");
        assert!(timeout.is_timeout());

        let recovery = RecoveryError {
            panic: "boom".to_string(),
            command: "sync".to_string(),
            stack: None,
        };
        assert_eq!(recovery.to_string(), "Command 'sync' panicked: boom");
        assert!(ActionError::Cancelled.is_cancelled());
    }
}
