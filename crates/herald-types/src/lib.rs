//! Shared data model for the herald alerting configuration platform.
//!
//! This crate holds the entities every other herald crate exchanges:
//! notification rules, the origin registry rows they trigger on, and the
//! channel references they notify through. It contains no I/O.
//!
//! Rules refer to origins and channels by *soft references*: only the
//! origin `class` and the channel `id` are writable and persisted. Names,
//! service ids and channel types are filled in at read time from the
//! current origin and channel tables, and a reference that no longer
//! resolves simply comes back empty.

use serde::{Deserialize, Serialize};

mod rule;

pub use rule::{Action, ChannelReference, FieldErrors, OriginReference, Rule, Trigger};

/// Notification channel kinds.
///
/// The kind decides whether a rule's action must carry a recipient:
/// mail channels deliver to an address supplied by the rule, chat
/// webhooks deliver to the channel they were configured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    /// SMTP delivery to a per-rule recipient.
    Mail,
    /// Mattermost incoming webhook.
    Mattermost,
    /// Microsoft Teams incoming webhook.
    Teams,
}

impl ChannelType {
    /// Returns the canonical string stored in the `notification_channel.type` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mail => "mail",
            Self::Mattermost => "mattermost",
            Self::Teams => "teams",
        }
    }

    /// Whether rules notifying through this kind of channel must name a recipient.
    pub fn requires_recipient(self) -> bool {
        matches!(self, Self::Mail)
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChannelType {
    type Err = ParseChannelTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mail" => Ok(Self::Mail),
            "mattermost" => Ok(Self::Mattermost),
            "teams" => Ok(Self::Teams),
            _ => Err(ParseChannelTypeError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown channel type string.
#[derive(Debug, Clone)]
pub struct ParseChannelTypeError(pub String);

impl std::fmt::Display for ParseChannelTypeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown channel type: {}", self.0)
    }
}

impl std::error::Error for ParseChannelTypeError {}

/// A registered event source.
///
/// `class` is globally unique across all services and is the identifier
/// rules trigger on. `service_id` is always taken from the caller of the
/// origin upsert, never from the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Origin {
    /// Human-readable name.
    pub name: String,
    /// Stable, globally unique class identifier.
    pub class: String,
    /// The service that registered this origin.
    #[serde(rename = "serviceID", default)]
    pub service_id: String,
}

impl Origin {
    /// Creates an origin with no owning service assigned yet.
    pub fn new(name: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            class: class.into(),
            service_id: String::new(),
        }
    }
}
