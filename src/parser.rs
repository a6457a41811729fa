//! Command parser & router (§4.F). Parses a neutral chat-event shape into a
//! `RoutedCommand`, resolving mentions and enforcing topic scoping /
//! command-level authorization along the way. Never talks to the chat
//! platform or the database itself — both the admin check and the
//! configured-topic lookup are supplied by the caller (the bot façade).

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::models::TopicType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEntity {
    Mention {
        username: String,
        offset: u32,
        length: u32,
    },
    TextMention {
        user_platform_id: String,
        username: Option<String>,
        offset: u32,
        length: u32,
    },
}

#[derive(Debug, Clone)]
pub struct ChatEvent {
    pub chat_id: i64,
    pub sender_user_id: String,
    pub message_id: i64,
    pub text: String,
    pub reply_to_message_id: Option<i64>,
    pub topic_id: Option<String>,
    pub entities: Vec<ChatEntity>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutedCommand {
    Help,
    Start,
    Match {
        player1_platform_id: String,
        player2_platform_id: String,
        score1: i32,
        score2: i32,
    },
    Ranking,
    Id {
        nickname: String,
    },
    IdGuest,
    Undo {
        reply_to_message_id: Option<i64>,
    },
    ConfigTopic {
        topic_type: TopicType,
    },
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RoutedError {
    #[error("couldn't parse command: {0}")]
    ParseError(String),
    #[error("couldn't resolve mention @{0}")]
    UnresolvedMention(String),
    #[error("this command must be used in its configured topic")]
    WrongTopic,
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

const MAX_NICKNAME_LEN: usize = 64;

/// Process-local `username → platform_user_id` cache, populated
/// opportunistically from every `TextMention` seen. Cheap to clone (a
/// shared `DashMap` behind an `Arc`).
#[derive(Clone, Default)]
pub struct MentionResolver {
    by_username: Arc<DashMap<String, String>>,
}

impl MentionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    fn observe(&self, username: &str, platform_user_id: &str) {
        self.by_username
            .insert(username.to_string(), platform_user_id.to_string());
    }

    fn lookup(&self, username: &str) -> Option<String> {
        self.by_username.get(username).map(|v| v.clone())
    }
}

/// Everything the router needs but doesn't own: the invoker's admin status
/// (from `ChatGatewayAdapter::is_group_admin`) and the group's configured
/// topics, both resolved by the façade before calling `route`.
pub struct RouteContext<'a> {
    pub is_admin: bool,
    pub topics_enabled: bool,
    pub configured_topics: &'a HashMap<TopicType, String>,
}

fn required_topic_type(cmd: &RoutedCommand) -> Option<TopicType> {
    match cmd {
        RoutedCommand::Match { .. } => Some(TopicType::Matches),
        RoutedCommand::Id { .. } | RoutedCommand::IdGuest => Some(TopicType::Id),
        RoutedCommand::Ranking
        | RoutedCommand::Undo { .. }
        | RoutedCommand::Help
        | RoutedCommand::Start
        | RoutedCommand::ConfigTopic { .. } => None,
    }
}

fn tokenize(text: &str) -> Vec<(usize, &str)> {
    let mut tokens = Vec::new();
    let mut iter = text.char_indices().peekable();
    while let Some(&(start, ch)) = iter.peek() {
        if ch.is_whitespace() {
            iter.next();
            continue;
        }
        let mut end = start;
        while let Some(&(idx, c)) = iter.peek() {
            if c.is_whitespace() {
                break;
            }
            end = idx + c.len_utf8();
            iter.next();
        }
        tokens.push((start, &text[start..end]));
    }
    tokens
}

fn find_entity_at(entities: &[ChatEntity], offset: usize, length: usize) -> Option<&ChatEntity> {
    entities.iter().find(|e| {
        let (o, l) = match e {
            ChatEntity::Mention { offset, length, .. } => (*offset, *length),
            ChatEntity::TextMention { offset, length, .. } => (*offset, *length),
        };
        o as usize == offset && l as usize == length
    })
}

fn resolve_mention(
    token: &str,
    offset: usize,
    entities: &[ChatEntity],
    resolver: &MentionResolver,
) -> Result<String, RoutedError> {
    let username = token.trim_start_matches('@');
    if let Some(entity) = find_entity_at(entities, offset, token.len()) {
        match entity {
            ChatEntity::TextMention {
                user_platform_id,
                username: observed_username,
                ..
            } => {
                if let Some(u) = observed_username {
                    resolver.observe(u, user_platform_id);
                }
                return Ok(user_platform_id.clone());
            }
            ChatEntity::Mention { username: u, .. } => {
                return resolver
                    .lookup(u)
                    .ok_or_else(|| RoutedError::UnresolvedMention(u.clone()));
            }
        }
    }
    resolver
        .lookup(username)
        .ok_or_else(|| RoutedError::UnresolvedMention(username.to_string()))
}

fn parse_score(token: &str) -> Result<i32, RoutedError> {
    token
        .parse::<i32>()
        .ok()
        .filter(|n| *n >= 0)
        .ok_or_else(|| RoutedError::ParseError(format!("expected a non-negative integer, got {token:?}")))
}

fn parse_command(
    event: &ChatEvent,
    resolver: &MentionResolver,
) -> Result<RoutedCommand, RoutedError> {
    let tokens = tokenize(&event.text);
    let Some(&(_, head)) = tokens.first() else {
        return Err(RoutedError::ParseError("empty message".into()));
    };
    if !head.starts_with('/') {
        return Err(RoutedError::ParseError("not a command".into()));
    }

    if tokens.len() >= 2 && tokens.last().map(|(_, t)| *t) == Some("help") {
        return Ok(RoutedCommand::Help);
    }

    match head {
        "/start" if tokens.len() == 1 => Ok(RoutedCommand::Start),
        "/help" if tokens.len() == 1 => Ok(RoutedCommand::Help),
        "/ranking" | "/rank" if tokens.len() == 1 => Ok(RoutedCommand::Ranking),
        "/id_guest" if tokens.len() == 1 => Ok(RoutedCommand::IdGuest),
        "/undo" if tokens.len() == 1 => Ok(RoutedCommand::Undo {
            reply_to_message_id: event.reply_to_message_id,
        }),
        "/id" if tokens.len() == 2 => {
            let nickname = tokens[1].1;
            if nickname.is_empty() || nickname.len() > MAX_NICKNAME_LEN {
                return Err(RoutedError::ParseError(format!(
                    "nickname must be 1-{MAX_NICKNAME_LEN} characters"
                )));
            }
            Ok(RoutedCommand::Id {
                nickname: nickname.to_string(),
            })
        }
        "/config_topic" if tokens.len() == 2 => {
            let topic_type = TopicType::parse(tokens[1].1).ok_or_else(|| {
                RoutedError::ParseError("topic type must be one of: id, ranking, matches, logs".into())
            })?;
            Ok(RoutedCommand::ConfigTopic { topic_type })
        }
        "/match" if tokens.len() == 5 => {
            let (off1, mention1) = tokens[1];
            let (off2, mention2) = tokens[2];
            if !mention1.starts_with('@') || !mention2.starts_with('@') {
                return Err(RoutedError::ParseError("expected @mention @mention score score".into()));
            }
            let player1 = resolve_mention(mention1, off1, &event.entities, resolver)?;
            let player2 = resolve_mention(mention2, off2, &event.entities, resolver)?;
            let score1 = parse_score(tokens[3].1)?;
            let score2 = parse_score(tokens[4].1)?;
            Ok(RoutedCommand::Match {
                player1_platform_id: player1,
                player2_platform_id: player2,
                score1,
                score2,
            })
        }
        other => Err(RoutedError::ParseError(format!("unrecognized command: {other}"))),
    }
}

/// Parses and authorizes a single chat event. `resolver` is shared across
/// events for a process (it's the façade's mention cache).
pub fn route(
    event: &ChatEvent,
    resolver: &MentionResolver,
    ctx: RouteContext<'_>,
) -> Result<RoutedCommand, RoutedError> {
    let command = parse_command(event, resolver)?;

    if let RoutedCommand::ConfigTopic { .. } = &command {
        if !ctx.is_admin {
            return Err(RoutedError::Unauthorized(
                "config_topic requires a group administrator".into(),
            ));
        }
    }

    if ctx.topics_enabled {
        if let Some(required) = required_topic_type(&command) {
            if let Some(configured) = ctx.configured_topics.get(&required) {
                if event.topic_id.as_deref() != Some(configured.as_str()) {
                    return Err(RoutedError::WrongTopic);
                }
            }
        }
    }

    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(text: &str) -> ChatEvent {
        ChatEvent {
            chat_id: 1,
            sender_user_id: "u1".into(),
            message_id: 100,
            text: text.to_string(),
            reply_to_message_id: None,
            topic_id: None,
            entities: Vec::new(),
        }
    }

    fn ctx<'a>(configured: &'a HashMap<TopicType, String>) -> RouteContext<'a> {
        RouteContext {
            is_admin: false,
            topics_enabled: true,
            configured_topics: configured,
        }
    }

    #[test]
    fn parses_ranking_aliases() {
        let resolver = MentionResolver::new();
        let configured = HashMap::new();
        assert_eq!(
            route(&event("/ranking"), &resolver, ctx(&configured)).unwrap(),
            RoutedCommand::Ranking
        );
        assert_eq!(
            route(&event("/rank"), &resolver, ctx(&configured)).unwrap(),
            RoutedCommand::Ranking
        );
    }

    #[test]
    fn match_resolves_via_cache_after_text_mention_seen() {
        let resolver = MentionResolver::new();
        resolver.observe("alice", "platform-alice");
        resolver.observe("bob", "platform-bob");
        let configured = HashMap::new();

        let routed = route(&event("/match @alice @bob 3 1"), &resolver, ctx(&configured)).unwrap();
        assert_eq!(
            routed,
            RoutedCommand::Match {
                player1_platform_id: "platform-alice".into(),
                player2_platform_id: "platform-bob".into(),
                score1: 3,
                score2: 1,
            }
        );
    }

    #[test]
    fn match_with_unresolved_mention_fails() {
        let resolver = MentionResolver::new();
        let configured = HashMap::new();
        let err = route(&event("/match @ghost @bob 3 1"), &resolver, ctx(&configured)).unwrap_err();
        assert_eq!(err, RoutedError::UnresolvedMention("ghost".into()));
    }

    #[test]
    fn trailing_help_overrides_any_command() {
        let resolver = MentionResolver::new();
        let configured = HashMap::new();
        assert_eq!(
            route(&event("/id_guest help"), &resolver, ctx(&configured)).unwrap(),
            RoutedCommand::Help
        );
    }

    #[test]
    fn config_topic_requires_admin() {
        let resolver = MentionResolver::new();
        let configured = HashMap::new();
        let mut context = ctx(&configured);
        context.is_admin = false;
        let err = route(&event("/config_topic ranking"), &resolver, context).unwrap_err();
        assert_eq!(
            err,
            RoutedError::Unauthorized("config_topic requires a group administrator".into())
        );
    }

    #[test]
    fn wrong_topic_rejected_when_configured_elsewhere() {
        let resolver = MentionResolver::new();
        resolver.observe("alice", "platform-alice");
        resolver.observe("bob", "platform-bob");
        let mut configured = HashMap::new();
        configured.insert(TopicType::Matches, "topic-42".to_string());

        let mut ev = event("/match @alice @bob 3 1");
        ev.topic_id = Some("topic-99".to_string());
        let err = route(&ev, &resolver, ctx(&configured)).unwrap_err();
        assert_eq!(err, RoutedError::WrongTopic);
    }

    #[test]
    fn accepted_when_topic_matches_configured() {
        let resolver = MentionResolver::new();
        resolver.observe("alice", "platform-alice");
        resolver.observe("bob", "platform-bob");
        let mut configured = HashMap::new();
        configured.insert(TopicType::Matches, "topic-42".to_string());

        let mut ev = event("/match @alice @bob 3 1");
        ev.topic_id = Some("topic-42".to_string());
        assert!(route(&ev, &resolver, ctx(&configured)).is_ok());
    }
}
