//! Error types for operation lifecycle management.
//!
//! # Design
//! - Keep error messages constant while carrying context fields for debugging.
//! - Guard rejections and cancellation misuse are typed separately from
//!   operation failures so callers never render them as failed operations.

use thiserror::Error;

use crate::model::{ErrorInfo, ErrorKind, OperationId};

/// Failure raised by an executor or status fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    /// Request never reached the server or the response was non-2xx.
    #[error("network request failed")]
    Network {
        /// Transport or status detail.
        message: String,
    },
    /// Response body was missing expected fields or could not be decoded.
    #[error("unexpected response payload")]
    Protocol {
        /// Decoding detail.
        message: String,
    },
    /// Server reported the job as failed.
    #[error("remote operation failed")]
    Remote {
        /// Message relayed from the server.
        message: String,
    },
}

impl OperationError {
    /// Build a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Build a protocol error.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Build a remote failure.
    #[must_use]
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }

    /// Failure category.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } => ErrorKind::Network,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::Remote { .. } => ErrorKind::Remote,
        }
    }

    /// Detail message carried by the error.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Network { message } | Self::Protocol { message } | Self::Remote { message } => {
                message
            }
        }
    }

    /// Whether retrying the same request may succeed.
    #[must_use]
    pub const fn retryable(&self) -> bool {
        self.kind().retryable()
    }

    /// Convert into the view-facing failure details.
    #[must_use]
    pub fn to_info(&self) -> ErrorInfo {
        ErrorInfo::new(self.kind(), self.message())
    }
}

/// Start request refused by the action guard.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardRejection {
    /// A conflicting operation on the same entity is still in flight.
    #[error("operation already active")]
    AlreadyActive {
        /// Operation the caller tried to start.
        requested: OperationId,
        /// Live operation that blocks it.
        active: OperationId,
    },
}

impl GuardRejection {
    /// Operation the caller tried to start.
    #[must_use]
    pub const fn requested(&self) -> &OperationId {
        match self {
            Self::AlreadyActive { requested, .. } => requested,
        }
    }

    /// Live operation blocking the request.
    #[must_use]
    pub const fn active(&self) -> &OperationId {
        match self {
            Self::AlreadyActive { active, .. } => active,
        }
    }
}

/// Cancellation request that could not be honoured.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CancelError {
    /// Nothing is requesting or polling for the identifier.
    #[error("operation is not active")]
    NotActive {
        /// Identifier the caller tried to cancel.
        id: OperationId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OperationKind;

    #[test]
    fn operation_error_exposes_kind_and_retry_policy() {
        let cases = [
            (OperationError::network("timeout"), ErrorKind::Network, true),
            (OperationError::protocol("missing jobId"), ErrorKind::Protocol, false),
            (OperationError::remote("disk full"), ErrorKind::Remote, true),
        ];
        for (err, kind, retryable) in cases {
            assert_eq!(err.kind(), kind);
            assert_eq!(err.retryable(), retryable);
            assert_eq!(err.to_info().kind, kind);
            assert_eq!(err.to_info().message, err.message());
        }
    }

    #[test]
    fn messages_stay_constant() {
        assert_eq!(
            OperationError::remote("disk full").to_string(),
            "remote operation failed"
        );
        let rejection = GuardRejection::AlreadyActive {
            requested: OperationId::new("sw-7", OperationKind::Launch),
            active: OperationId::new("sw-7", OperationKind::Install),
        };
        assert_eq!(rejection.to_string(), "operation already active");
        assert_eq!(rejection.active().kind(), OperationKind::Install);
        assert_eq!(rejection.requested().kind(), OperationKind::Launch);
        let cancel = CancelError::NotActive {
            id: OperationId::new("agent-1", OperationKind::Run),
        };
        assert_eq!(cancel.to_string(), "operation is not active");
    }
}
