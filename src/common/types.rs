//! Shared identifier and policy types used across the relay.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One of the two chat platforms the relay connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// Source side: chats and channels are mirrored out of Telegram.
    Telegram,
    /// Destination side: every source conversation becomes a Signal group.
    Signal,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Telegram => "telegram",
            Platform::Signal => "signal",
        }
    }

    /// The platform on the other end of the relay.
    pub fn opposite(&self) -> Platform {
        match self {
            Platform::Telegram => Platform::Signal,
            Platform::Signal => Platform::Telegram,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

opaque_id!(
    /// Platform-specific identity of a chat, channel or group.
    ConversationId
);
opaque_id!(
    /// Identity of a relay-created group on the destination platform.
    GroupId
);
impl GroupId {
    /// The group seen as a send target on its own platform.
    pub fn as_conversation(&self) -> ConversationId {
        ConversationId::new(self.0.clone())
    }
}

opaque_id!(
    /// Platform-specific identity of a single message.
    MessageId
);

/// Direction a single message travels in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    TelegramToSignal,
    SignalToTelegram,
}

impl Direction {
    /// Platform the message was read from.
    pub fn source(&self) -> Platform {
        match self {
            Direction::TelegramToSignal => Platform::Telegram,
            Direction::SignalToTelegram => Platform::Signal,
        }
    }

    /// Platform the message is sent to.
    pub fn destination(&self) -> Platform {
        self.source().opposite()
    }

    /// Direction of messages read from `platform`.
    pub fn from_source(platform: Platform) -> Self {
        match platform {
            Platform::Telegram => Direction::TelegramToSignal,
            Platform::Signal => Direction::SignalToTelegram,
        }
    }

    /// Short tag used in idempotency keys and log fields.
    pub fn tag(&self) -> &'static str {
        match self {
            Direction::TelegramToSignal => "tg>sg",
            Direction::SignalToTelegram => "sg>tg",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Which directions a conversation mapping relays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteDirection {
    /// Telegram to Signal only.
    #[default]
    TelegramToSignal,
    /// Bidirectional.
    Both,
}

impl RouteDirection {
    pub fn from_bidirectional(bidirectional: bool) -> Self {
        if bidirectional {
            RouteDirection::Both
        } else {
            RouteDirection::TelegramToSignal
        }
    }

    /// Check if this route relays messages travelling in `direction`.
    pub fn allows(&self, direction: Direction) -> bool {
        match direction {
            Direction::TelegramToSignal => true,
            Direction::SignalToTelegram => matches!(self, RouteDirection::Both),
        }
    }
}

/// What kind of conversation a message was posted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    #[default]
    Private,
    Group,
    Channel,
}

/// Disappearing-message retention applied to a destination group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExpirationPolicy {
    /// Retention in seconds; zero disables expiration.
    pub seconds: u64,
}

impl ExpirationPolicy {
    pub fn from_days(days: u32) -> Self {
        Self {
            seconds: u64::from(days) * 86_400,
        }
    }

    pub fn never() -> Self {
        Self { seconds: 0 }
    }

    pub fn retention(&self) -> Option<Duration> {
        (self.seconds > 0).then(|| Duration::from_secs(self.seconds))
    }
}

/// Text exactly as a platform's API expects or delivers it.
///
/// Telegram carries markdown in `text` and leaves `styles` empty. Signal carries
/// plain text plus `start:length:STYLE` entries counted in UTF-16 code units.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WireText {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub styles: Vec<String>,
}

impl WireText {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            styles: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}
