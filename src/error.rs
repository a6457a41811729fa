//! Shared error taxonomy for the match engine and its collaborators.
//!
//! Every repository and component in this crate resolves into one of these
//! kinds before it crosses a module boundary; no raw `sqlx::Error` or
//! `reqwest::Error` is ever surfaced past the repository/HTTP-client layer.

use std::time::Duration;

/// Logical error kind shared by repositories, the match engine, and the
/// identity verifier.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("duplicate idempotency key")]
    DuplicateIdempotency,

    #[error("optimistic lock conflict")]
    OptimisticConflict,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("undo window expired")]
    UndoExpired,

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl AppError {
    /// Whether the retry harness should treat this error as worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Transient(_) | AppError::OptimisticConflict)
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        AppError::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    /// Short logical name for this variant, used as `failed_operations.error_kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::InvalidArgument(_) => "invalid_argument",
            AppError::NotFound(_) => "not_found",
            AppError::DuplicateIdempotency => "duplicate_idempotency",
            AppError::OptimisticConflict => "optimistic_conflict",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::UndoExpired => "undo_expired",
            AppError::Transient(_) => "transient",
            AppError::Permanent(_) => "permanent",
        }
    }
}

/// Classifies a raw `sqlx::Error` into the taxonomy above. Repositories are
/// the only place a `sqlx::Error` is allowed to exist; this function is the
/// sole conversion point.
pub fn classify_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::RowNotFound => AppError::NotFound("row not found".into()),
        sqlx::Error::Database(db_err) => {
            if db_err.is_unique_violation() {
                // Callers that care about *which* unique constraint fired
                // (idempotency key vs. group_player) inspect the constraint
                // name themselves via `is_idempotency_conflict`.
                AppError::DuplicateIdempotency
            } else if is_deadlock(db_err.as_ref()) {
                AppError::Transient(format!("deadlock victim: {err}"))
            } else {
                AppError::Permanent(format!("database error: {err}"))
            }
        }
        sqlx::Error::PoolTimedOut => AppError::Transient("pool exhausted".into()),
        sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            AppError::Transient(format!("connection lost: {err}"))
        }
        _ => AppError::Permanent(format!("database error: {err}")),
    }
}

/// True iff the original error was a unique-violation on `constraint_name`.
/// Used by `MatchRepo::create` to distinguish idempotency-key collisions
/// from any other constraint.
pub fn is_unique_violation_on(err: &sqlx::Error, constraint_name: &str) -> bool {
    matches!(err, sqlx::Error::Database(db_err)
        if db_err.is_unique_violation()
            && db_err.constraint() == Some(constraint_name))
}

fn is_deadlock(db_err: &dyn sqlx::error::DatabaseError) -> bool {
    // Postgres SQLSTATE 40P01 = deadlock_detected, 40001 = serialization_failure
    matches!(db_err.code().as_deref(), Some("40P01") | Some("40001"))
}

/// Error returned once the retry harness has exhausted its attempts,
/// carrying the metadata a caller needs for logging/metrics.
#[derive(Debug, thiserror::Error)]
#[error("operation failed after {attempts} attempt(s) over {elapsed:?}: {source}")]
pub struct RetryExhausted {
    pub attempts: u32,
    pub elapsed: Duration,
    #[source]
    pub source: AppError,
}
