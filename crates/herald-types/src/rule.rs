//! Notification rule entities.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ChannelType;

/// A user-authored notification policy.
///
/// A rule fires when an incoming event's origin class is one of
/// `trigger.origins` *and* its level is one of `trigger.levels`, and then
/// notifies through `action.channel`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rule {
    /// Store-assigned identifier (UUID v4). `None` until persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Unique rule name.
    #[serde(default)]
    pub name: String,
    /// What the rule listens for.
    #[serde(default)]
    pub trigger: Trigger,
    /// Where the rule notifies.
    #[serde(default)]
    pub action: Action,
    /// Author intent, `true` when omitted. Reads report `false` whenever a
    /// reference no longer resolves.
    #[serde(default = "enabled")]
    pub active: bool,
    /// Field-path to message map. Only populated on values returned by reads.
    #[serde(default, skip_serializing_if = "FieldErrors::is_empty")]
    pub errors: FieldErrors,
}

fn enabled() -> bool {
    true
}

impl Rule {
    /// The origin classes this rule triggers on, in author order.
    pub fn origin_classes(&self) -> Vec<String> {
        self.trigger
            .origins
            .iter()
            .map(|origin| origin.class.clone())
            .collect()
    }
}

/// Trigger condition: OR within each list, AND between them.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(default)]
    pub origins: Vec<OriginReference>,
    #[serde(default)]
    pub levels: Vec<String>,
}

/// Soft reference to an origin. Only `class` is writable.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OriginReference {
    #[serde(default)]
    pub name: String,
    pub class: String,
    #[serde(rename = "serviceID", default)]
    pub service_id: String,
}

impl OriginReference {
    /// A reference carrying only the writable class.
    pub fn class(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            ..Self::default()
        }
    }
}

/// Notification target of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Action {
    pub channel: ChannelReference,
    /// Delivery address; required for mail channels, rejected for all others.
    #[serde(default)]
    pub recipient: String,
}

/// Soft reference to a notification channel. Only `id` is writable.
///
/// An unresolved reference is the zero value: empty id and name, no type.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelReference {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub channel_type: Option<ChannelType>,
}

impl ChannelReference {
    /// A reference carrying only the writable id.
    pub fn id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// Validation messages keyed by field path (e.g. `trigger.origins`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a message for `field`, keeping the first message if one exists.
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_insert_with(|| message.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl std::fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (field, message) in self.iter() {
            if !first {
                f.write_str("; ")?;
            }
            write!(f, "{field}: {message}")?;
            first = false;
        }
        Ok(())
    }
}
