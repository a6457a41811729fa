//! Bot façade (§4.H): the stateless per-event orchestrator wiring the
//! parser/router, the match engine, the identity verifier, and the chat
//! gateway adapter together. Holds no per-request mutable state beyond the
//! shared caches below.

use std::collections::HashMap;
use std::sync::Arc;

use moka::sync::Cache;

use crate::engine::{MatchEngine, RegisterMatchInput, RegisterOutcome, UndoInput, UndoOutcome};
use crate::error::AppError;
use crate::gateway::{ChatGatewayAdapter, Reaction};
use crate::identity::{IdentityVerifier, ParticipantStatus};
use crate::models::TopicType;
use crate::parser::{self, ChatEvent, MentionResolver, RouteContext, RoutedCommand, RoutedError};
use crate::repositories::{group, match_repo, player, player_verification};

const PROCESSED_MESSAGE_CACHE_TTL_SECS: u64 = 24 * 3600;

#[derive(Debug, Clone)]
pub enum MembershipEvent {
    GroupCreated { platform_chat_id: String, name: Option<String> },
    BotRemoved { platform_chat_id: String },
    PlayerLeft { platform_chat_id: String, platform_user_id: String },
    ChatMigrated { old_platform_chat_id: String, new_platform_chat_id: String },
}

pub struct BotFacade<G: ChatGatewayAdapter> {
    engine: MatchEngine,
    identity: IdentityVerifier,
    gateway: Arc<G>,
    mention_resolver: MentionResolver,
    processed_messages: Cache<(i64, i64), ()>,
    topics_enabled: bool,
}

impl<G: ChatGatewayAdapter> BotFacade<G> {
    pub fn new(
        engine: MatchEngine,
        identity: IdentityVerifier,
        gateway: Arc<G>,
        topics_enabled: bool,
    ) -> Self {
        Self {
            engine,
            identity,
            gateway,
            mention_resolver: MentionResolver::new(),
            processed_messages: Cache::builder()
                .max_capacity(100_000)
                .time_to_live(std::time::Duration::from_secs(PROCESSED_MESSAGE_CACHE_TTL_SECS))
                .build(),
            topics_enabled,
        }
    }

    pub async fn handle_membership_event(&self, event: MembershipEvent) -> Result<(), AppError> {
        match event {
            MembershipEvent::GroupCreated { platform_chat_id, name } => {
                group::create_or_get_group(self.engine.pool(), &platform_chat_id, name.as_deref())
                    .await?;
            }
            MembershipEvent::BotRemoved { platform_chat_id } => {
                group::mark_inactive(self.engine.pool(), &platform_chat_id).await?;
            }
            MembershipEvent::PlayerLeft { platform_user_id, .. } => {
                let existing = player::create_or_get(self.engine.pool(), &platform_user_id).await?;
                player::soft_delete(self.engine.pool(), existing.id).await?;
            }
            MembershipEvent::ChatMigrated { old_platform_chat_id, new_platform_chat_id } => {
                group::migrate_platform_chat_id(
                    self.engine.pool(),
                    &old_platform_chat_id,
                    &new_platform_chat_id,
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Dedup-then-dispatch a single incoming message event. Not
    /// authoritative (`processed_messages` is a best-effort in-memory
    /// cache) — the engine's idempotency key is the durable safety net.
    pub async fn handle_message(
        &self,
        platform_chat_id: &str,
        group_id: i64,
        event: ChatEvent,
    ) {
        if self
            .processed_messages
            .get(&(event.chat_id, event.message_id))
            .is_some()
        {
            return;
        }
        self.processed_messages
            .insert((event.chat_id, event.message_id), ());

        if let Err(err) = self.route_and_dispatch(platform_chat_id, group_id, &event).await {
            tracing::error!(chat_id = event.chat_id, message_id = event.message_id, error = %err, "command dispatch failed");
            self.send(event.chat_id, event.topic_id.clone(), "Sorry, something went wrong.")
                .await;
        }
    }

    async fn route_and_dispatch(
        &self,
        platform_chat_id: &str,
        group_id: i64,
        event: &ChatEvent,
    ) -> Result<(), AppError> {
        let is_admin = self
            .gateway
            .is_group_admin(event.chat_id, &event.sender_user_id)
            .await;

        let mut configured_topics = HashMap::new();
        for topic_type in [TopicType::Matches, TopicType::Id] {
            if let Some(topic) = group::get_topic_by_type(self.engine.pool(), group_id, topic_type).await? {
                configured_topics.insert(topic_type, topic.platform_topic_id);
            }
        }

        let routed = parser::route(
            event,
            &self.mention_resolver,
            RouteContext {
                is_admin,
                topics_enabled: self.topics_enabled,
                configured_topics: &configured_topics,
            },
        );

        let topic_id_for_reply = event.topic_id.clone();
        match routed {
            Ok(command) => {
                self.dispatch(platform_chat_id, group_id, event, command).await
            }
            Err(err) => {
                let (reason, text) = match &err {
                    RoutedError::ParseError(_) => {
                        ("parse_error", "Couldn't understand that command. Try /help.".to_string())
                    }
                    RoutedError::UnresolvedMention(who) => (
                        "unresolved_mention",
                        format!("Couldn't resolve @{who} — they need to have sent a message in this chat first."),
                    ),
                    RoutedError::WrongTopic => {
                        ("wrong_topic", "That command isn't allowed in this topic.".to_string())
                    }
                    RoutedError::Unauthorized(reason) => ("unauthorized", reason.clone()),
                };
                crate::metrics::record_command_rejected(reason);
                self.send(event.chat_id, topic_id_for_reply, &text).await;
                Ok(())
            }
        }
    }

    async fn dispatch(
        &self,
        platform_chat_id: &str,
        group_id: i64,
        event: &ChatEvent,
        command: RoutedCommand,
    ) -> Result<(), AppError> {
        let topic_id = event.topic_id.clone();
        match command {
            RoutedCommand::Help | RoutedCommand::Start => {
                self.send(event.chat_id, topic_id, USAGE).await;
            }
            RoutedCommand::Match {
                player1_platform_id,
                player2_platform_id,
                score1,
                score2,
            } => {
                let idempotency_key = format!("{}:{}", event.chat_id, event.message_id);
                let outcome = self
                    .engine
                    .register_match(RegisterMatchInput {
                        platform_chat_id: platform_chat_id.to_string(),
                        group_name: None,
                        player1_platform_id,
                        player2_platform_id,
                        score1,
                        score2,
                        idempotency_key,
                        creator_platform_id: event.sender_user_id.clone(),
                    })
                    .await;
                match outcome {
                    Ok(RegisterOutcome::Success { match_row, player1_change, player2_change }) => {
                        crate::metrics::record_match_registered();
                        self.send(
                            event.chat_id,
                            topic_id,
                            &format!(
                                "Match recorded: {}-{}. Ratings: {} -> {}, {} -> {}.",
                                match_row.player1_score,
                                match_row.player2_score,
                                player1_change.before,
                                player1_change.after,
                                player2_change.before,
                                player2_change.after,
                            ),
                        )
                        .await;
                    }
                    Ok(RegisterOutcome::DuplicateAck { .. }) => {
                        crate::metrics::record_match_duplicate();
                        self.send(event.chat_id, topic_id, "That match was already recorded.").await;
                    }
                    Err(err) => return Err(err),
                }
            }
            RoutedCommand::Ranking => {
                let rankings = self.engine.get_rankings(group_id, 10).await?;
                let text = render_rankings(&rankings);
                self.send(event.chat_id, topic_id, &text).await;
            }
            RoutedCommand::Id { nickname } => {
                self.gateway
                    .set_reaction(event.chat_id, event.message_id, Reaction::Pending)
                    .await;
                match self.identity.get_participant(&nickname).await {
                    Ok(status @ (ParticipantStatus::VerifiedActive { .. } | ParticipantStatus::VerifiedNonActive { .. })) => {
                        let (resolved_nickname, status_label) = match &status {
                            ParticipantStatus::VerifiedActive { nickname } => (nickname.clone(), "verified_active"),
                            ParticipantStatus::VerifiedNonActive { nickname } => (nickname.clone(), "verified_non_active"),
                            ParticipantStatus::NotFound => unreachable!(),
                        };
                        crate::metrics::record_identity_verification("verified");
                        let player_row = player::create_or_get(self.engine.pool(), &event.sender_user_id).await?;
                        player::update(
                            self.engine.pool(),
                            player_row.id,
                            player::PlayerUpdate {
                                verified_nickname: Some(Some(resolved_nickname.clone())),
                                verified_student: Some(true),
                                allowed_non_student: Some(false),
                            },
                        )
                        .await?;
                        if let Err(err) = player_verification::record(
                            self.engine.pool(),
                            player_verification::NewPlayerVerification {
                                player_id: player_row.id,
                                nickname: resolved_nickname,
                                status: status_label,
                            },
                        )
                        .await
                        {
                            tracing::warn!(error = %err, "failed to record player verification audit row");
                        }
                        self.gateway
                            .set_reaction(event.chat_id, event.message_id, Reaction::ThumbsUp)
                            .await;
                    }
                    Ok(ParticipantStatus::NotFound) => {
                        crate::metrics::record_identity_verification("not_found");
                        let player_row = player::create_or_get(self.engine.pool(), &event.sender_user_id).await?;
                        if let Err(err) = player_verification::record(
                            self.engine.pool(),
                            player_verification::NewPlayerVerification {
                                player_id: player_row.id,
                                nickname: nickname.clone(),
                                status: "not_found",
                            },
                        )
                        .await
                        {
                            tracing::warn!(error = %err, "failed to record player verification audit row");
                        }
                        self.gateway
                            .set_reaction(event.chat_id, event.message_id, Reaction::ThumbsDown)
                            .await;
                        self.send(event.chat_id, topic_id, "Couldn't find that nickname.").await;
                    }
                    Err(err) if err.is_transient() => {
                        crate::metrics::record_identity_verification("transient");
                        self.gateway
                            .set_reaction(event.chat_id, event.message_id, Reaction::ThumbsDown)
                            .await;
                        self.send(event.chat_id, topic_id, "Verification service is unavailable, try again shortly.")
                            .await;
                    }
                    Err(err) => return Err(err),
                }
            }
            RoutedCommand::IdGuest => {
                let player_row = player::create_or_get(self.engine.pool(), &event.sender_user_id).await?;
                player::clear_verification(self.engine.pool(), player_row.id).await?;
                self.gateway
                    .set_reaction(event.chat_id, event.message_id, Reaction::ThumbsUp)
                    .await;
            }
            RoutedCommand::Undo { reply_to_message_id } => {
                let match_id = match reply_to_message_id {
                    Some(reply_id) => {
                        let key = format!("{}:{}", event.chat_id, reply_id);
                        match_repo::get_by_idempotency_key(self.engine.pool(), &key)
                            .await?
                            .map(|m| m.id)
                    }
                    None => None,
                };
                let is_admin = self
                    .gateway
                    .is_group_admin(event.chat_id, &event.sender_user_id)
                    .await;
                let outcome: UndoOutcome = self
                    .engine
                    .undo(UndoInput {
                        group_id,
                        match_id,
                        invoker_platform_id: event.sender_user_id.clone(),
                        invoker_is_admin: is_admin,
                    })
                    .await?;
                crate::metrics::record_match_undone();
                self.send(
                    event.chat_id,
                    topic_id,
                    &format!(
                        "Match undone. Ratings restored to {} and {}.",
                        outcome.player1_restored, outcome.player2_restored
                    ),
                )
                .await;
            }
            RoutedCommand::ConfigTopic { topic_type } => {
                if let Some(platform_topic_id) = event.topic_id.clone() {
                    group::configure_topic(self.engine.pool(), group_id, &platform_topic_id, topic_type)
                        .await?;
                    self.send(
                        event.chat_id,
                        topic_id,
                        &format!("This topic is now configured for {}.", topic_type.as_str()),
                    )
                    .await;
                } else {
                    self.send(
                        event.chat_id,
                        topic_id,
                        "/config_topic can only be used inside a forum topic.",
                    )
                    .await;
                }
            }
        }
        Ok(())
    }

    async fn send(&self, chat_id: i64, topic_id: Option<String>, text: &str) {
        let numeric_topic_id = topic_id.and_then(|t| t.parse::<i64>().ok());
        self.gateway.send_message(chat_id, numeric_topic_id, text).await;
    }
}

const USAGE: &str = "Commands: /match @p1 @p2 s1 s2, /ranking, /id <nickname>, /id_guest, /undo, /config_topic <type>";

fn render_rankings(rankings: &[crate::models::GroupPlayer]) -> String {
    if rankings.is_empty() {
        return "No ranked players yet.".to_string();
    }
    let mut out = String::from("Rankings:\n");
    for (i, gp) in rankings.iter().enumerate() {
        out.push_str(&format!("{}. player #{} — {}\n", i + 1, gp.player_id, gp.current_rating));
    }
    out
}
