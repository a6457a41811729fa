//! `undo_match`: reverses the most recent (or a named) match, per §4.G.7.

use chrono::{Duration as ChronoDuration, Utc};

use crate::error::AppError;
use crate::models::Match;
use crate::repositories::{elo_history, failed_operation, group, match_repo, player};

use super::MatchEngine;

const NON_ADMIN_UNDO_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct UndoInput {
    pub group_id: i64,
    pub match_id: Option<i64>,
    pub invoker_platform_id: String,
    pub invoker_is_admin: bool,
}

#[derive(Debug, Clone)]
pub struct UndoOutcome {
    pub match_row: Match,
    pub player1_restored: i32,
    pub player2_restored: i32,
}

/// `/undo`'s authorization check is about match *participants*, not the
/// `/match` command's creator — the two need not coincide (the creator is
/// whoever sent the message; the participants are whoever played).
fn authorize(
    m: &Match,
    participant1: &str,
    participant2: &str,
    input: &UndoInput,
) -> Result<(), AppError> {
    if input.invoker_is_admin {
        return Ok(());
    }
    let is_participant =
        participant1 == input.invoker_platform_id || participant2 == input.invoker_platform_id;
    if !is_participant {
        return Err(AppError::Unauthorized(
            "only a match participant or a group admin may undo this match".into(),
        ));
    }
    let age = Utc::now() - m.created_at;
    if age > ChronoDuration::hours(NON_ADMIN_UNDO_WINDOW_HOURS) {
        return Err(AppError::UndoExpired);
    }
    Ok(())
}

async fn attempt(engine: &MatchEngine, input: &UndoInput) -> Result<UndoOutcome, AppError> {
    let mut tx = crate::db::begin_read_committed(engine.pool()).await?;

    let target_id = match input.match_id {
        Some(id) => id,
        None => {
            let latest = match_repo::get_latest_undoable(&mut *tx, input.group_id).await?;
            latest
                .ok_or_else(|| AppError::not_found("no undoable match in this group"))?
                .id
        }
    };

    let locked = match_repo::lock_match(&mut tx, target_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("match {target_id} not found")))?;
    if locked.is_undone {
        return Err(AppError::invalid_argument("match already undone"));
    }
    if locked.group_id != input.group_id {
        return Err(AppError::invalid_argument("match does not belong to this group"));
    }

    let participant1 = player::get_by_id(&mut *tx, locked.player1_id)
        .await?
        .ok_or_else(|| AppError::Permanent(format!("player {} not found", locked.player1_id)))?;
    let participant2 = player::get_by_id(&mut *tx, locked.player2_id)
        .await?
        .ok_or_else(|| AppError::Permanent(format!("player {} not found", locked.player2_id)))?;
    authorize(&locked, &participant1.platform_user_id, &participant2.platform_user_id, input)?;

    // The row is guaranteed to already exist (it was created when the
    // match was registered); `get_or_create` just gives us its id without
    // a separate lookup helper. The initial-rating argument is inert on
    // the update branch `ON CONFLICT` takes.
    let group_player1 =
        group::get_or_create_group_player(&mut *tx, locked.group_id, locked.player1_id, 0).await?;
    let group_player2 =
        group::get_or_create_group_player(&mut *tx, locked.group_id, locked.player2_id, 0).await?;

    let (first_id, second_id) = if group_player1.id <= group_player2.id {
        (group_player1.id, group_player2.id)
    } else {
        (group_player2.id, group_player1.id)
    };
    let locked_first = group::lock_group_player(&mut tx, first_id).await?;
    let locked_second = group::lock_group_player(&mut tx, second_id).await?;
    let (gp1, gp2) = if locked_first.id == group_player1.id {
        (locked_first, locked_second)
    } else {
        (locked_second, locked_first)
    };

    // Undo delta, not a re-read of historic state: if other matches have
    // landed on top of this one since, `current_rating` already reflects
    // them, and subtracting this match's own delta keeps those later
    // deltas correct.
    let restored1 = gp1.current_rating - (locked.player1_rating_after - locked.player1_rating_before);
    let restored2 = gp2.current_rating - (locked.player2_rating_after - locked.player2_rating_before);

    let (won1_delta, lost1_delta, won2_delta, lost2_delta) = match locked.winner_player_id() {
        Some(winner) if winner == locked.player1_id => (-1, 0, 0, -1),
        Some(_) => (0, -1, -1, 0),
        None => (0, 0, 0, 0),
    };

    let ok1 = group::update_group_player(&mut tx, gp1.id, gp1.version, restored1, -1, won1_delta, lost1_delta)
        .await?;
    let ok2 = group::update_group_player(&mut tx, gp2.id, gp2.version, restored2, -1, won2_delta, lost2_delta)
        .await?;
    if !ok1 || !ok2 {
        tx.rollback().await.map_err(crate::error::classify_sqlx_error)?;
        crate::metrics::record_optimistic_conflict();
        return Err(AppError::OptimisticConflict);
    }

    match_repo::undo_match(&mut tx, locked.id, &input.invoker_platform_id).await?;

    elo_history::append(
        &mut *tx,
        elo_history::NewEloHistoryEntry {
            match_id: Some(locked.id),
            group_id: locked.group_id,
            player_id: locked.player1_id,
            rating_before: locked.player1_rating_after,
            rating_after: restored1,
            is_undone: true,
        },
    )
    .await?;
    elo_history::append(
        &mut *tx,
        elo_history::NewEloHistoryEntry {
            match_id: Some(locked.id),
            group_id: locked.group_id,
            player_id: locked.player2_id,
            rating_before: locked.player2_rating_after,
            rating_after: restored2,
            is_undone: true,
        },
    )
    .await?;

    tx.commit().await.map_err(crate::error::classify_sqlx_error)?;

    let mut match_row = locked;
    match_row.is_undone = true;

    Ok(UndoOutcome {
        match_row,
        player1_restored: restored1,
        player2_restored: restored2,
    })
}

/// Undoes a match, restoring both participants' ratings and counters. See
/// §4.G.7: the retry harness only covers the optimistic-lock race on the
/// `GroupPlayer` rows, not the authorization/expiry checks, which are
/// terminal the moment they fail.
pub async fn undo_match(engine: &MatchEngine, input: UndoInput) -> Result<UndoOutcome, AppError> {
    let result = crate::retry::retry(engine.retry_config(), engine.cancellation_token(), || {
        attempt(engine, &input)
    })
    .await
    .map_err(|exhausted| exhausted.source);

    if let Err(err) = &result {
        if matches!(err, AppError::OptimisticConflict) {
            crate::metrics::record_optimistic_conflict_exhausted();
        }
        if matches!(err, AppError::OptimisticConflict | AppError::Permanent(_)) {
            failed_operation::record(
                engine.pool(),
                failed_operation::NewFailedOperation {
                    operation: "undo_match",
                    group_id: Some(input.group_id),
                    error_kind: err.kind(),
                    error_detail: err.to_string(),
                },
            )
            .await;
        }
    }

    result
}
