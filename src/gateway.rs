//! Chat gateway adapter (§4.I): the narrow boundary between the bot façade
//! and whatever chat platform it's actually wired to. The façade only ever
//! depends on this trait, never on a concrete chat-library type.

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    Pending,
    ThumbsUp,
    ThumbsDown,
}

#[async_trait]
pub trait ChatGatewayAdapter: Send + Sync {
    async fn send_message(&self, chat_id: i64, topic_id: Option<i64>, text: &str);
    async fn set_reaction(&self, chat_id: i64, message_id: i64, reaction: Reaction);
    async fn is_group_admin(&self, chat_id: i64, user_id: &str) -> bool;
}

/// In-memory fake recording every call, sufficient for façade tests (§4.I).
/// Not used in production — the real webhook/polling client lives outside
/// the core as thin glue (§4.L).
#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Call {
        SendMessage { chat_id: i64, topic_id: Option<i64>, text: String },
        SetReaction { chat_id: i64, message_id: i64, reaction: Reaction },
    }

    #[derive(Default)]
    pub struct FakeGateway {
        calls: Mutex<Vec<Call>>,
        admins: Mutex<HashSet<(i64, String)>>,
    }

    impl FakeGateway {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn grant_admin(&self, chat_id: i64, user_id: &str) {
            self.admins.lock().insert((chat_id, user_id.to_string()));
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }

        pub fn sent_messages(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::SendMessage { text, .. } => Some(text),
                    _ => None,
                })
                .collect()
        }
    }

    #[async_trait]
    impl ChatGatewayAdapter for FakeGateway {
        async fn send_message(&self, chat_id: i64, topic_id: Option<i64>, text: &str) {
            self.calls.lock().push(Call::SendMessage {
                chat_id,
                topic_id,
                text: text.to_string(),
            });
        }

        async fn set_reaction(&self, chat_id: i64, message_id: i64, reaction: Reaction) {
            self.calls.lock().push(Call::SetReaction {
                chat_id,
                message_id,
                reaction,
            });
        }

        async fn is_group_admin(&self, chat_id: i64, user_id: &str) -> bool {
            self.admins.lock().contains(&(chat_id, user_id.to_string()))
        }
    }
}
