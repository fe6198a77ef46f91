//! Threadrelay: relays chat threads to a hosted assistant and writes the
//! result back into the originating thread.

pub mod assistant;
pub mod config;
pub mod conversation;
pub mod error;
pub mod logging;
pub mod mention;
pub mod messaging;
pub mod orchestrator;
pub mod router;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};

use std::sync::Arc;

/// Stable identifier of an external conversation thread (the Slack `thread_ts`,
/// or the message `ts` for a top-level message that starts a thread).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationKey(Arc<str>);

impl ConversationKey {
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(Arc::from(value.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a remote assistant session (an OpenAI thread).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(Arc<str>);

impl SessionId {
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(Arc::from(value.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the final reply for a request is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyTarget {
    pub channel: String,
    /// Thread the reply is posted into.
    pub thread_ts: String,
}

/// One admitted inbound event, ready for the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub conversation_key: ConversationKey,
    pub prompt: String,
    pub reply_target: ReplyTarget,
    /// Chat user that sent the prompt. Only used for logging.
    pub sender_id: String,
}

/// Conversation kinds reported on generic message events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelType {
    Channel,
    Group,
    DirectMessage,
    MultiPartyDirectMessage,
    Other(String),
}

impl ChannelType {
    pub fn parse(value: &str) -> Self {
        match value {
            "channel" => Self::Channel,
            "group" => Self::Group,
            "im" => Self::DirectMessage,
            "mpim" => Self::MultiPartyDirectMessage,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Other(_))
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, Self::DirectMessage | Self::MultiPartyDirectMessage)
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelType::Channel => write!(f, "channel"),
            ChannelType::Group => write!(f, "group"),
            ChannelType::DirectMessage => write!(f, "im"),
            ChannelType::MultiPartyDirectMessage => write!(f, "mpim"),
            ChannelType::Other(other) => write!(f, "{}", other),
        }
    }
}

/// An explicit `app_mention` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionEvent {
    pub text: String,
    pub channel: String,
    pub user: String,
    pub ts: String,
    pub thread_ts: Option<String>,
}

/// A generic `message` event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageEvent {
    pub text: Option<String>,
    pub channel: String,
    pub channel_type: Option<ChannelType>,
    pub user: Option<String>,
    /// Set when the message was posted by a bot integration.
    pub bot_id: Option<String>,
    pub subtype: Option<String>,
    pub ts: String,
    pub thread_ts: Option<String>,
}

/// Events delivered by the chat adapter to the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Mention(MentionEvent),
    Message(MessageEvent),
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundEvent::Mention(_) => "app_mention",
            InboundEvent::Message(_) => "message",
        }
    }
}
