//! Error types for the binding layer

use thiserror::Error;

/// Result alias used across the binding layer
pub type Result<T> = std::result::Result<T, BindingError>;

/// Every failure the binding layer can surface to a caller
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BindingError {
    /// Caller-supplied arguments don't match the descriptor
    #[error("Argument mismatch: {0}")]
    ArgumentMismatch(String),

    /// Malformed return data or log
    #[error("Decode error: {0}")]
    Decode(String),

    /// The contract aborted execution
    #[error("Execution reverted: {}", .0.as_deref().unwrap_or("no reason given"))]
    ExecutionReverted(Option<String>),

    /// Connectivity or backend failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// A state-changing operation was attempted without a signer
    #[error("A signer is required to submit transactions")]
    AuthRequired,

    /// Bytecode or constructor arguments could not be turned into a deployment
    #[error("Deployment error: {0}")]
    Deployment(String),

    /// The operation was cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// A live log subscription terminated
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// The interface description is unusable
    #[error("Invalid interface descriptor: {0}")]
    InvalidDescriptor(String),

    /// No function in the interface matches
    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    /// No event in the interface matches
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    /// The function is `view`/`pure` and cannot be sent as a transaction
    #[error("Function '{0}' is read-only and cannot be sent as a transaction")]
    NotTransactable(String),
}

impl BindingError {
    /// Whether a caller may reasonably retry the same request.
    ///
    /// Only backend failures qualify; the layer itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BindingError::Transport(_))
    }
}

impl From<hex::FromHexError> for BindingError {
    fn from(e: hex::FromHexError) -> Self {
        BindingError::Decode(e.to_string())
    }
}

impl From<serde_json::Error> for BindingError {
    fn from(e: serde_json::Error) -> Self {
        BindingError::InvalidDescriptor(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revert_display() {
        let with_reason = BindingError::ExecutionReverted(Some("pool closed".to_string()));
        assert_eq!(with_reason.to_string(), "Execution reverted: pool closed");

        let without = BindingError::ExecutionReverted(None);
        assert_eq!(without.to_string(), "Execution reverted: no reason given");
    }

    #[test]
    fn test_only_transport_is_retryable() {
        assert!(BindingError::Transport("timeout".into()).is_retryable());
        assert!(!BindingError::AuthRequired.is_retryable());
        assert!(!BindingError::Decode("short".into()).is_retryable());
        assert!(!BindingError::Cancelled.is_retryable());
    }
}
