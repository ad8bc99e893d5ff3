use thiserror::Error;
use ulid::Ulid;

use crate::model::{ResourceKind, SessionStatus, Span};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: Ulid },

    #[error("already exists: {0}")]
    AlreadyExists(Ulid),

    #[error("cannot move session from {from} to {to}")]
    InvalidTransition { from: SessionStatus, to: SessionStatus },

    #[error("[{}, {}) is outside the instructor's availability", requested.start, requested.end)]
    OutsideAvailability { requested: Span, available: Vec<Span> },

    #[error("instructor unavailable during [{}, {}) (block {block_id})", span.start, span.end)]
    InstructorUnavailable {
        block_id: Ulid,
        span: Span,
        reason: Option<String>,
        available: Vec<Span>,
    },

    #[error("{kind} {resource_id} is already booked by session {session_id}")]
    ResourceConflict {
        kind: ResourceKind,
        resource_id: Ulid,
        session_id: Ulid,
        span: Span,
        available: Vec<Span>,
    },

    #[error("insufficient balance: {available} minutes available, {needed} needed")]
    InsufficientBalance { available: u32, needed: u32 },

    #[error("concurrent update: {0}")]
    Concurrency(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("WAL error: {0}")]
    Wal(String),
}

/// Caller-facing error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    OutsideAvailability,
    InstructorUnavailable,
    ResourceConflict,
    InsufficientBalance,
    Concurrency,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::OutsideAvailability => "outside_availability",
            ErrorKind::InstructorUnavailable => "instructor_unavailable",
            ErrorKind::ResourceConflict => "resource_conflict",
            ErrorKind::InsufficientBalance => "insufficient_balance",
            ErrorKind::Concurrency => "concurrency",
            ErrorKind::Internal => "internal",
        }
    }
}

impl EngineError {
    pub(crate) fn not_found(kind: ResourceKind, id: Ulid) -> Self {
        EngineError::NotFound { kind: kind.as_str(), id }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_)
            | EngineError::InvalidTimestamp(_)
            | EngineError::AlreadyExists(_)
            | EngineError::InvalidTransition { .. }
            | EngineError::LimitExceeded(_) => ErrorKind::Validation,
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::OutsideAvailability { .. } => ErrorKind::OutsideAvailability,
            EngineError::InstructorUnavailable { .. } => ErrorKind::InstructorUnavailable,
            EngineError::ResourceConflict { .. } => ErrorKind::ResourceConflict,
            EngineError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            EngineError::Concurrency(_) => ErrorKind::Concurrency,
            EngineError::Wal(_) => ErrorKind::Internal,
        }
    }

    /// Only lock contention is worth one retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Concurrency(_))
    }

    /// Free spans of the requested local day, present on availability rejections.
    pub fn available_spans(&self) -> &[Span] {
        match self {
            EngineError::OutsideAvailability { available, .. }
            | EngineError::InstructorUnavailable { available, .. }
            | EngineError::ResourceConflict { available, .. } => available,
            _ => &[],
        }
    }
}
