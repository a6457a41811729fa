//! Entity repositories: thin mappings between entity values and SQL. Every
//! function here validates its inputs and returns `AppError` — no raw
//! `sqlx::Error` escapes this module.

pub mod elo_history;
pub mod failed_operation;
pub mod group;
pub mod match_repo;
pub mod player;
pub mod player_verification;

pub(crate) const MAX_NICKNAME_LEN: usize = 64;
pub(crate) const MAX_NAME_LEN: usize = 256;
pub(crate) const MAX_PLATFORM_ID_LEN: usize = 128;

pub(crate) fn require_positive(id: i64, field: &str) -> Result<(), crate::error::AppError> {
    if id <= 0 {
        return Err(crate::error::AppError::invalid_argument(format!(
            "{field} must be positive, got {id}"
        )));
    }
    Ok(())
}

pub(crate) fn require_bounded(
    s: &str,
    field: &str,
    max_len: usize,
) -> Result<(), crate::error::AppError> {
    if s.is_empty() {
        return Err(crate::error::AppError::invalid_argument(format!(
            "{field} must not be empty"
        )));
    }
    if s.len() > max_len {
        return Err(crate::error::AppError::invalid_argument(format!(
            "{field} exceeds maximum length {max_len}"
        )));
    }
    Ok(())
}
