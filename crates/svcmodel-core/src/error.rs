//! Error types.

use std::time::Duration;
use thiserror::Error;

use crate::fault::{FaultException, TypedFault};

/// A specialized `Result` type for svcmodel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents errors raised by bindings, channels and the client runtime.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The call is not valid for the current configuration or state.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The object faulted earlier and can no longer be used.
    #[error(
        "The communication object {0} cannot be used for communication because it is in the Faulted state"
    )]
    CommunicationObjectFaulted(String),

    /// The object was closed or aborted.
    #[error("Cannot access a disposed object: {0}")]
    ObjectDisposed(String),

    /// A blocking operation did not complete in time.
    #[error(
        "Operation timed out after {timeout:?}: {operation}. \
         If this is expected, increase the timeout with \
         `Timeouts {{ send: Duration::from_secs({}), .. }}`",
        timeout.as_secs() * 2
    )]
    Timeout {
        /// The operation that timed out
        operation: String,
        /// The timeout duration that was exceeded
        timeout: Duration,
    },

    /// The remote side replied with a fault.
    #[error("{0}")]
    Fault(Box<FaultException>),

    /// The service does not handle the request action.
    #[error("Action not supported: {0}")]
    ActionNotSupported(String),

    /// No endpoint was listening at the remote address.
    #[error("Endpoint not found: {0}")]
    EndpointNotFound(String),

    /// The transport failed while sending or receiving.
    #[error("Communication error: {0}")]
    Communication(String),

    /// A received message violated the expected protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A configured quota was exceeded.
    #[error(
        "{what} size ({size} bytes) exceeds maximum allowed ({max} bytes). \
         If this is expected, raise the corresponding quota on the binding"
    )]
    QuotaExceeded {
        /// What was being measured
        what: &'static str,
        /// The actual size in bytes
        size: usize,
        /// The configured maximum in bytes
        max: usize,
    },

    /// Failed to serialize or deserialize a message or parameter.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Security negotiation or credentials failed.
    #[error("Security error: {0}")]
    Security(String),

    /// The requested feature is not available in this implementation.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// An underlying I/O error occurred.
    #[error("IO error: {0}")]
    Io(String),
}

impl Error {
    /// Create an invalid-operation error
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }

    /// Create a timeout error for `operation`
    pub fn timeout(operation: impl Into<String>, timeout: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout,
        }
    }

    /// Create a communication error
    pub fn communication(message: impl Into<String>) -> Self {
        Self::Communication(message.into())
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Create a not-implemented error
    pub fn not_implemented(feature: impl Into<String>) -> Self {
        Self::NotImplemented(feature.into())
    }

    /// Wrap a fault exception
    pub fn fault(fault: FaultException) -> Self {
        Self::Fault(Box::new(fault))
    }

    /// Whether this error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether this error carries a remote fault
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Fault(_))
    }

    /// Borrow the remote fault, if any
    pub fn as_fault(&self) -> Option<&FaultException> {
        match self {
            Self::Fault(fault) => Some(fault),
            _ => None,
        }
    }

    /// Borrow the remote fault if its detail decoded as `D`
    pub fn typed_fault<D: std::any::Any>(&self) -> Option<TypedFault<'_, D>> {
        self.as_fault().and_then(TypedFault::from_fault)
    }

    /// Whether an application could reasonably retry the call.
    ///
    /// Nothing in svcmodel retries on its own; this only classifies.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Communication(_) | Self::EndpointNotFound(_) | Self::Io(_)
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidOperation(format!("invalid endpoint address: {}", err))
    }
}
