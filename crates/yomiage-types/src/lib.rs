//! Shared types for the yomiage speech delivery pipeline.
//!
//! This crate holds the small domain vocabulary used by every other crate in
//! the workspace: queue priorities, queue items, live session and player
//! states, the persisted channel target of a group, voice profiles and the
//! tier limits supplied by the billing layer.
//!
//! Nothing in here performs I/O. Keeping the types in a leaf crate lets the
//! server and the voice pipeline agree on wire shapes without depending on
//! each other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod voice;

mod policy;
pub use policy::{GroupLimits, Tier};

/// Queue priority of an utterance.
///
/// Lower numeric values are spoken first. Items with equal priority keep
/// their arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Priority {
    /// System announcements (reconnection notices and similar).
    High = 0,
    /// Ordinary user messages.
    #[default]
    Normal = 1,
    /// Long texts, link previews and other low-value speech.
    Low = 2,
}

impl Priority {
    /// Returns the numeric value for this priority.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Attempts to convert a numeric value to a `Priority`.
    ///
    /// Returns `None` if the value does not correspond to a known priority.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::High),
            1 => Some(Self::Normal),
            2 => Some(Self::Low),
            _ => None,
        }
    }

    /// Returns the string label for this priority.
    pub fn label(self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Normal => "NORMAL",
            Self::Low => "LOW",
        }
    }
}

/// One queued utterance.
///
/// Created by the enqueue operation and consumed by the group's drain loop.
/// Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    pub group_id: String,
    pub text: String,
    pub speaker_id: u32,
    pub priority: Priority,
    pub enqueued_at: DateTime<Utc>,
    /// Id of the user whose message produced this item, if any. Used to pick
    /// a per-user voice profile over the group's.
    pub origin_ref: Option<String>,
}

impl QueueItem {
    pub fn new(
        group_id: impl Into<String>,
        text: impl Into<String>,
        speaker_id: u32,
        priority: Priority,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            text: text.into(),
            speaker_id,
            priority,
            enqueued_at: Utc::now(),
            origin_ref: None,
        }
    }

    pub fn with_origin(mut self, origin_ref: impl Into<String>) -> Self {
        self.origin_ref = Some(origin_ref.into());
        self
    }
}

/// State of a live transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Handshake in progress; audio cannot be sent yet.
    Connecting,
    /// Session is usable for playback.
    Ready,
    /// Underlying connection was lost. May be re-established by a new connect.
    Disconnected,
    /// Session was torn down and will never become ready again.
    Destroyed,
}

impl SessionState {
    /// Returns `true` if the session can no longer carry audio without a reconnect.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Destroyed)
    }
}

/// Status of a group's audio player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerStatus {
    /// Nothing is playing.
    #[default]
    Idle,
    /// A resource was attached and the first packet is awaited.
    Buffering,
    /// Packets are flowing into the live session.
    Playing,
}

/// Where a group's live session connects, as persisted across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelTarget {
    /// Voice channel the session joins.
    pub channel_id: String,
    /// Text channel whose messages are read aloud, if one is bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_channel_id: Option<String>,
}

impl ChannelTarget {
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            text_channel_id: None,
        }
    }

    pub fn with_text_channel(mut self, text_channel_id: impl Into<String>) -> Self {
        self.text_channel_id = Some(text_channel_id.into());
        self
    }
}
