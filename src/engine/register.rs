//! `register_match`: the state machine in §4.G.2-G.5 of the design spec.

use crate::error::AppError;
use crate::models::{GroupPlayer, Match};
use crate::rating::{self, Outcome, RatingChange};
use crate::repositories::{elo_history, failed_operation, group, match_repo, player};

use super::MatchEngine;

#[derive(Debug, Clone)]
pub struct RegisterMatchInput {
    pub platform_chat_id: String,
    pub group_name: Option<String>,
    pub player1_platform_id: String,
    pub player2_platform_id: String,
    pub score1: i32,
    pub score2: i32,
    pub idempotency_key: String,
    pub creator_platform_id: String,
}

#[derive(Debug, Clone)]
pub enum RegisterOutcome {
    Success {
        match_row: Match,
        player1_change: RatingChange,
        player2_change: RatingChange,
    },
    DuplicateAck {
        existing: Match,
    },
}

/// Ids resolved before the transaction opens. Resolution is itself
/// idempotent (upsert-or-fetch), so it's safe to run outside the locked
/// section — only the rating read in the transaction needs to be fresh.
struct Resolved {
    group_id: i64,
    player1_id: i64,
    player2_id: i64,
    group_player1_id: i64,
    group_player2_id: i64,
}

async fn resolve(engine: &MatchEngine, input: &RegisterMatchInput) -> Result<Resolved, AppError> {
    let pool = engine.pool();
    let group_row = group::create_or_get_group(
        pool,
        &input.platform_chat_id,
        input.group_name.as_deref(),
    )
    .await?;
    let player1 = player::create_or_get(pool, &input.player1_platform_id).await?;
    let player2 = player::create_or_get(pool, &input.player2_platform_id).await?;
    let initial_rating = engine.initial_rating();
    let gp1 = group::get_or_create_group_player(pool, group_row.id, player1.id, initial_rating)
        .await?;
    let gp2 = group::get_or_create_group_player(pool, group_row.id, player2.id, initial_rating)
        .await?;

    Ok(Resolved {
        group_id: group_row.id,
        player1_id: player1.id,
        player2_id: player2.id,
        group_player1_id: gp1.id,
        group_player2_id: gp2.id,
    })
}

/// Locks both `GroupPlayer` rows in ascending internal-id order (deadlock
/// avoidance between two matches sharing a player) and hands them back
/// labelled by which slot (player1/player2) they fill in this match.
async fn lock_both(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    resolved: &Resolved,
) -> Result<(GroupPlayer, GroupPlayer), AppError> {
    let (first_id, second_id) = if resolved.group_player1_id <= resolved.group_player2_id {
        (resolved.group_player1_id, resolved.group_player2_id)
    } else {
        (resolved.group_player2_id, resolved.group_player1_id)
    };
    let first = group::lock_group_player(tx, first_id).await?;
    let second = group::lock_group_player(tx, second_id).await?;

    if first.id == resolved.group_player1_id {
        Ok((first, second))
    } else {
        Ok((second, first))
    }
}

async fn attempt(
    engine: &MatchEngine,
    input: &RegisterMatchInput,
    resolved: &Resolved,
) -> Result<Match, AppError> {
    let mut tx = crate::db::begin_read_committed(engine.pool()).await?;

    let (gp1, gp2) = lock_both(&mut tx, resolved).await?;
    let params = engine.rating_params();
    let (change1, change2) =
        rating::calc(gp1.current_rating, gp2.current_rating, input.score1, input.score2, params);

    let outcome = Outcome::from_scores(input.score1, input.score2);
    let (won1, lost1, won2, lost2) = match outcome {
        Outcome::Player1Wins => (1, 0, 0, 1),
        Outcome::Player2Wins => (0, 1, 1, 0),
        Outcome::Tie => (0, 0, 0, 0),
    };

    let ok1 = group::update_group_player(&mut tx, gp1.id, gp1.version, change1.after, 1, won1, lost1)
        .await?;
    let ok2 = group::update_group_player(&mut tx, gp2.id, gp2.version, change2.after, 1, won2, lost2)
        .await?;
    if !ok1 || !ok2 {
        tx.rollback().await.map_err(crate::error::classify_sqlx_error)?;
        crate::metrics::record_optimistic_conflict();
        return Err(AppError::OptimisticConflict);
    }

    let new_match = match_repo::create(
        &mut tx,
        match_repo::NewMatch {
            group_id: resolved.group_id,
            player1_id: resolved.player1_id,
            player2_id: resolved.player2_id,
            player1_score: input.score1,
            player2_score: input.score2,
            player1_rating_before: change1.before,
            player1_rating_after: change1.after,
            player2_rating_before: change2.before,
            player2_rating_after: change2.after,
            idempotency_key: input.idempotency_key.clone(),
            creator_platform_user_id: input.creator_platform_id.clone(),
        },
    )
    .await;

    let new_match = match new_match {
        Ok(m) => m,
        Err(err) => {
            let _ = tx.rollback().await;
            return Err(err);
        }
    };

    elo_history::append(
        &mut *tx,
        elo_history::NewEloHistoryEntry {
            match_id: Some(new_match.id),
            group_id: resolved.group_id,
            player_id: resolved.player1_id,
            rating_before: change1.before,
            rating_after: change1.after,
            is_undone: false,
        },
    )
    .await?;
    elo_history::append(
        &mut *tx,
        elo_history::NewEloHistoryEntry {
            match_id: Some(new_match.id),
            group_id: resolved.group_id,
            player_id: resolved.player2_id,
            rating_before: change2.before,
            rating_after: change2.after,
            is_undone: false,
        },
    )
    .await?;

    tx.commit().await.map_err(crate::error::classify_sqlx_error)?;
    Ok(new_match)
}

/// Runs the full registration state machine described in §4.G.2: a
/// non-locking idempotency pre-check, then (on miss) a locked,
/// optimistic-retry transaction. `DuplicateIdempotency` raised by the
/// insert itself (the pre-check/insert race) is handled here rather than
/// by the generic retry harness, since it is never worth retrying — it's
/// resolved by reading back the row the other writer committed.
pub async fn register_match(
    engine: &MatchEngine,
    input: RegisterMatchInput,
) -> Result<RegisterOutcome, AppError> {
    if input.score1 < 0 || input.score2 < 0 {
        return Err(AppError::invalid_argument("scores must be non-negative"));
    }
    if input.score1 == 0 && input.score2 == 0 {
        return Err(AppError::invalid_argument("at least one score must be positive"));
    }
    if input.player1_platform_id == input.player2_platform_id {
        return Err(AppError::invalid_argument("a player cannot play themselves"));
    }

    if let Some(existing) =
        match_repo::get_by_idempotency_key(engine.pool(), &input.idempotency_key).await?
    {
        return Ok(RegisterOutcome::DuplicateAck { existing });
    }

    let resolved = resolve(engine, &input).await?;

    let retried = crate::retry::retry(engine.retry_config(), engine.cancellation_token(), || {
        attempt(engine, &input, &resolved)
    })
    .await;

    match retried {
        Ok(match_row) => {
            let change1 = RatingChange {
                before: match_row.player1_rating_before,
                after: match_row.player1_rating_after,
            };
            let change2 = RatingChange {
                before: match_row.player2_rating_before,
                after: match_row.player2_rating_after,
            };
            Ok(RegisterOutcome::Success {
                match_row,
                player1_change: change1,
                player2_change: change2,
            })
        }
        Err(exhausted) => match exhausted.source {
            AppError::DuplicateIdempotency => {
                let existing = match_repo::get_by_idempotency_key(engine.pool(), &input.idempotency_key)
                    .await?
                    .ok_or_else(|| {
                        AppError::Permanent(
                            "idempotency collision reported but row not found on re-read".into(),
                        )
                    })?;
                Ok(RegisterOutcome::DuplicateAck { existing })
            }
            other => {
                if matches!(other, AppError::OptimisticConflict) {
                    crate::metrics::record_optimistic_conflict_exhausted();
                }
                if matches!(other, AppError::OptimisticConflict | AppError::Permanent(_)) {
                    failed_operation::record(
                        engine.pool(),
                        failed_operation::NewFailedOperation {
                            operation: "register_match",
                            group_id: Some(resolved.group_id),
                            error_kind: other.kind(),
                            error_detail: other.to_string(),
                        },
                    )
                    .await;
                }
                Err(other)
            }
        },
    }
}
