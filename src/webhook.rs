//! Webhook/polling glue (§4.L): decodes the neutral wire payload the chat
//! platform actually sends into the shapes `facade`/`parser` understand, and
//! implements `ChatGatewayAdapter` against a generic HTTP bot API. None of
//! this is part of the core — designing the platform's wire format is an
//! explicit non-goal, so the JSON shapes here are deliberately the neutral
//! event shape itself, not any particular platform's schema. A real
//! deployment swaps this module for one that speaks its platform's actual
//! API; the façade and engine are unaffected either way.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::gateway::{ChatGatewayAdapter, Reaction};
use crate::parser::{ChatEntity, ChatEvent};

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IncomingUpdate {
    Message(MessageUpdate),
    MemberJoinedGroup { platform_chat_id: String, name: Option<String> },
    BotRemoved { platform_chat_id: String },
    MemberLeft { platform_chat_id: String, platform_user_id: String },
    ChatMigrated { old_platform_chat_id: String, new_platform_chat_id: String },
}

#[derive(Debug, Deserialize)]
pub struct MessageUpdate {
    pub chat_id: i64,
    pub sender_user_id: String,
    pub message_id: i64,
    pub text: String,
    pub reply_to_message_id: Option<i64>,
    pub topic_id: Option<String>,
    #[serde(default)]
    pub entities: Vec<EntityPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityPayload {
    Mention { username: String, offset: u32, length: u32 },
    TextMention { user_platform_id: String, username: Option<String>, offset: u32, length: u32 },
}

impl From<EntityPayload> for ChatEntity {
    fn from(value: EntityPayload) -> Self {
        match value {
            EntityPayload::Mention { username, offset, length } => {
                ChatEntity::Mention { username, offset, length }
            }
            EntityPayload::TextMention { user_platform_id, username, offset, length } => {
                ChatEntity::TextMention { user_platform_id, username, offset, length }
            }
        }
    }
}

impl MessageUpdate {
    pub fn into_chat_event(self) -> ChatEvent {
        ChatEvent {
            chat_id: self.chat_id,
            sender_user_id: self.sender_user_id,
            message_id: self.message_id,
            text: self.text,
            reply_to_message_id: self.reply_to_message_id,
            topic_id: self.topic_id,
            entities: self.entities.into_iter().map(ChatEntity::from).collect(),
        }
    }
}

/// Real `ChatGatewayAdapter` for a generic HTTP bot API: three POST/GET
/// calls against a configured base URL. Stands in for whatever concrete
/// platform client a deployment actually wires in.
pub struct HttpGateway {
    http: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(base_url: String) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http, base_url })
    }

    /// Long-polls for the next batch of updates past `offset`, used by the
    /// `bot.mode = polling` background loop in `main`.
    pub async fn poll_updates(&self, offset: i64) -> anyhow::Result<Vec<IncomingUpdate>> {
        let url = format!("{}/getUpdates?offset={}&timeout=30", self.base_url, offset);
        let updates = self.http.get(url).send().await?.json().await?;
        Ok(updates)
    }
}

#[async_trait]
impl ChatGatewayAdapter for HttpGateway {
    async fn send_message(&self, chat_id: i64, topic_id: Option<i64>, text: &str) {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "topic_id": topic_id,
            "text": text,
        });
        if let Err(err) = self
            .http
            .post(format!("{}/sendMessage", self.base_url))
            .json(&body)
            .send()
            .await
        {
            tracing::warn!(%chat_id, error = %err, "failed to send chat message");
        }
    }

    async fn set_reaction(&self, chat_id: i64, message_id: i64, reaction: Reaction) {
        let emoji = match reaction {
            Reaction::Pending => "\u{23F3}",
            Reaction::ThumbsUp => "\u{1F44D}",
            Reaction::ThumbsDown => "\u{1F44E}",
        };
        let body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "emoji": emoji,
        });
        if let Err(err) = self
            .http
            .post(format!("{}/setMessageReaction", self.base_url))
            .json(&body)
            .send()
            .await
        {
            tracing::warn!(%chat_id, %message_id, error = %err, "failed to set message reaction");
        }
    }

    async fn is_group_admin(&self, chat_id: i64, user_id: &str) -> bool {
        let url = format!("{}/getChatMember?chat_id={}&user_id={}", self.base_url, chat_id, user_id);
        match self.http.get(url).send().await {
            Ok(response) => response
                .json::<AdminCheckResponse>()
                .await
                .map(|r| r.is_admin)
                .unwrap_or(false),
            Err(err) => {
                tracing::warn!(%chat_id, user_id, error = %err, "failed to check group admin status");
                false
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct AdminCheckResponse {
    is_admin: bool,
}
