//! Unified error handling for spacekeeper.
//!
//! This module provides the error hierarchy shared by every component:
//! collaborator failures reported by the transport, and the engine-level
//! taxonomy that administrative commands render into structured outcomes.

use crate::db::DbError;
use thiserror::Error;

// ============================================================================
// Transport Errors (outbound protocol calls)
// ============================================================================

/// Failures reported by the protocol transport collaborator.
///
/// Rate limiting and network hiccups are retried inside the transport; when
/// one of these reaches the engine the retries are already exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited (retry after {retry_after_ms:?} ms)")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("network error: {0}")]
    Network(String),
}

impl TransportError {
    /// Get a static error code string for log labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::PermissionDenied(_) => "permission_denied",
            Self::NotFound(_) => "not_found",
            Self::RateLimited { .. } => "rate_limited",
            Self::Network(_) => "network",
        }
    }

    pub fn is_permission(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

// ============================================================================
// Engine Errors (component operations)
// ============================================================================

/// Errors raised by the reconciliation and enforcement engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The bot lacks the power level required in a room.
    #[error("insufficient power in {room}: {reason}")]
    Permission { room: String, reason: String },

    /// A room, alias or user could not be resolved.
    #[error("not found: {0}")]
    NotFound(String),

    /// The transport gave up on a call.
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// Stored state disagrees with the requested transition.
    #[error("state conflict: {0}")]
    StateConflict(String),

    /// A setting needed by this operation is missing or malformed.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("database error: {0}")]
    Db(#[from] DbError),

    /// The outbound action queue has shut down.
    #[error("action queue closed")]
    QueueClosed,

    #[error("operation cancelled")]
    Cancelled,
}

impl EngineError {
    /// Get a static error code string for log labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Permission { .. } => "permission",
            Self::NotFound(_) => "not_found",
            Self::Transport(_) => "transport",
            Self::StateConflict(_) => "state_conflict",
            Self::Configuration(_) => "configuration",
            Self::Db(_) => "database",
            Self::QueueClosed => "queue_closed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Map a transport failure in `room` onto the engine taxonomy.
    pub fn from_transport(room: &str, err: TransportError) -> Self {
        match err {
            TransportError::PermissionDenied(reason) => Self::Permission {
                room: room.to_string(),
                reason,
            },
            TransportError::NotFound(what) => Self::NotFound(what),
            other => Self::Transport(other),
        }
    }
}

impl From<TransportError> for EngineError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotFound(what) => Self::NotFound(what),
            other => Self::Transport(other),
        }
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_codes() {
        assert_eq!(
            TransportError::PermissionDenied("x".into()).error_code(),
            "permission_denied"
        );
        assert_eq!(
            TransportError::RateLimited { retry_after_ms: None }.error_code(),
            "rate_limited"
        );
    }

    #[test]
    fn test_from_transport_keeps_room() {
        let err = EngineError::from_transport(
            "!a:example.org",
            TransportError::PermissionDenied("M_FORBIDDEN".into()),
        );
        match err {
            EngineError::Permission { room, .. } => assert_eq!(room, "!a:example.org"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_not_found_maps_through() {
        let err: EngineError = TransportError::NotFound("#gone:example.org".into()).into();
        assert_eq!(err.error_code(), "not_found");
    }
}
