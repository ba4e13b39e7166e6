//! Host boundary types: chat channels and captured chat events.

use serde::{Deserialize, Serialize};

use crate::translate::Direction;

/// Logical chat channel. The host reports channels as small integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum ChatChannel {
    Say,
    Shout,
    TellOutgoing,
    TellIncoming,
    Party,
    Alliance,
    /// Linkshell 1-8.
    Linkshell(u8),
    FreeCompany,
    Yell,
    CrossParty,
    /// Cross-world linkshell 1-8.
    CrossLinkshell(u8),
    Other(u16),
}

impl ChatChannel {
    pub fn from_id(id: u16) -> Self {
        match id {
            10 => ChatChannel::Say,
            11 => ChatChannel::Shout,
            12 => ChatChannel::TellOutgoing,
            13 => ChatChannel::TellIncoming,
            14 => ChatChannel::Party,
            15 => ChatChannel::Alliance,
            16..=23 => ChatChannel::Linkshell((id - 15) as u8),
            24 => ChatChannel::FreeCompany,
            30 => ChatChannel::Yell,
            32 => ChatChannel::CrossParty,
            37 => ChatChannel::CrossLinkshell(1),
            101..=107 => ChatChannel::CrossLinkshell((id - 99) as u8),
            other => ChatChannel::Other(other),
        }
    }

    pub fn id(self) -> u16 {
        match self {
            ChatChannel::Say => 10,
            ChatChannel::Shout => 11,
            ChatChannel::TellOutgoing => 12,
            ChatChannel::TellIncoming => 13,
            ChatChannel::Party => 14,
            ChatChannel::Alliance => 15,
            ChatChannel::Linkshell(n) => 15 + n.clamp(1, 8) as u16,
            ChatChannel::FreeCompany => 24,
            ChatChannel::Yell => 30,
            ChatChannel::CrossParty => 32,
            ChatChannel::CrossLinkshell(n) => match n.clamp(1, 8) {
                1 => 37,
                n => 99 + n as u16,
            },
            ChatChannel::Other(id) => id,
        }
    }

    /// Every player-authored channel.
    pub fn default_translated() -> Vec<ChatChannel> {
        let mut channels = vec![
            ChatChannel::Say,
            ChatChannel::Shout,
            ChatChannel::Yell,
            ChatChannel::TellOutgoing,
            ChatChannel::TellIncoming,
            ChatChannel::Party,
            ChatChannel::CrossParty,
            ChatChannel::Alliance,
            ChatChannel::FreeCompany,
        ];
        channels.extend((1..=8).map(ChatChannel::Linkshell));
        channels.extend((1..=8).map(ChatChannel::CrossLinkshell));
        channels
    }
}

impl From<u16> for ChatChannel {
    fn from(id: u16) -> Self {
        ChatChannel::from_id(id)
    }
}

impl From<ChatChannel> for u16 {
    fn from(channel: ChatChannel) -> Self {
        channel.id()
    }
}

impl std::fmt::Display for ChatChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChatChannel::Say => write!(f, "say"),
            ChatChannel::Shout => write!(f, "shout"),
            ChatChannel::TellOutgoing => write!(f, "tell_out"),
            ChatChannel::TellIncoming => write!(f, "tell_in"),
            ChatChannel::Party => write!(f, "party"),
            ChatChannel::Alliance => write!(f, "alliance"),
            ChatChannel::Linkshell(n) => write!(f, "ls{n}"),
            ChatChannel::FreeCompany => write!(f, "fc"),
            ChatChannel::Yell => write!(f, "yell"),
            ChatChannel::CrossParty => write!(f, "cross_party"),
            ChatChannel::CrossLinkshell(n) => write!(f, "cwls{n}"),
            ChatChannel::Other(id) => write!(f, "channel_{id}"),
        }
    }
}

/// A chat line captured at the host boundary. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEvent {
    pub channel: ChatChannel,
    /// Unix milliseconds.
    pub timestamp_ms: i64,
    /// Sender as displayed by the host, in whatever name format it uses.
    pub sender: String,
    /// Realm the host attributes to this event, when it knows one.
    pub realm_hint: Option<String>,
    /// Tell recipient, if any.
    pub recipient: Option<String>,
    pub text: String,
    pub direction: Direction,
}

impl ChatEvent {
    /// Inbound event stamped with the current time.
    pub fn inbound(channel: ChatChannel, sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel,
            timestamp_ms: now_unix_ms(),
            sender: sender.into(),
            realm_hint: None,
            recipient: None,
            text: text.into(),
            direction: Direction::InboundObserved,
        }
    }

    pub fn with_realm_hint(mut self, realm: impl Into<String>) -> Self {
        self.realm_hint = Some(realm.into());
        self
    }

    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }
}

/// Current time as Unix timestamp (milliseconds).
pub fn now_unix_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
