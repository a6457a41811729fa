//! Match engine: the state machine in §4.G of the design spec. Owns
//! idempotency, optimistic-lock retry, rating computation, and undo.

mod register;
mod undo;

pub use register::{register_match, RegisterMatchInput, RegisterOutcome};
pub use undo::{undo_match, UndoInput, UndoOutcome};

use std::sync::Arc;

use crate::config::{RatingConfig, RetryConfig};
use crate::db::DbPool;

/// Shared handle the façade constructs once and passes to every command
/// handler. Cheap to clone (everything inside is an `Arc`/`Copy` type).
#[derive(Clone)]
pub struct MatchEngine {
    pool: DbPool,
    rating: RatingConfig,
    retry: RetryConfig,
    cancel: Arc<tokio_util::sync::CancellationToken>,
}

impl MatchEngine {
    pub fn new(pool: DbPool, rating: RatingConfig, retry: RetryConfig) -> Self {
        Self {
            pool,
            rating,
            retry,
            cancel: Arc::new(tokio_util::sync::CancellationToken::new()),
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn rating_params(&self) -> crate::rating::RatingParams {
        crate::rating::RatingParams {
            k_factor: self.rating.k_factor,
            min_rating: 0,
            max_rating: self.rating.max_rating,
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        self.retry
    }

    pub fn initial_rating(&self) -> i32 {
        self.rating.initial_rating
    }

    pub fn cancellation_token(&self) -> &tokio_util::sync::CancellationToken {
        &self.cancel
    }

    pub async fn register_match(
        &self,
        input: RegisterMatchInput,
    ) -> Result<RegisterOutcome, crate::error::AppError> {
        register::register_match(self, input).await
    }

    pub async fn undo(&self, input: UndoInput) -> Result<UndoOutcome, crate::error::AppError> {
        undo::undo_match(self, input).await
    }

    pub async fn get_rankings(
        &self,
        group_id: i64,
        limit: i64,
    ) -> Result<Vec<crate::models::GroupPlayer>, crate::error::AppError> {
        crate::repositories::group::get_rankings(&self.pool, group_id, limit).await
    }
}
