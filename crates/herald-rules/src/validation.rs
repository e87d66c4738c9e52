//! Rule shape validation, recipient policy, and read-time deactivation.
//!
//! Everything here is pure: no I/O, no shared state. The same shape check
//! guards writes and degrades reads, which is what lets a rule whose
//! channel or origins vanished still be listed, inactive, with the reason
//! attached.

use herald_types::{ChannelReference, ChannelType, FieldErrors, OriginReference, Rule};

use crate::error::RuleError;

pub const FIELD_NAME: &str = "name";
pub const FIELD_ORIGINS: &str = "trigger.origins";
pub const FIELD_LEVELS: &str = "trigger.levels";
pub const FIELD_CHANNEL: &str = "action.channel.id";

/// Reduces an incoming rule to its writable, trimmed form.
///
/// Resolved names, service ids, channel types, the id and any errors are
/// discarded; origin classes and levels are trimmed and de-duplicated in
/// order. Blank entries are kept so validation can report them.
pub fn normalize_rule(rule: Rule) -> Rule {
    let mut classes: Vec<String> = Vec::new();
    for origin in &rule.trigger.origins {
        let class = origin.class.trim().to_string();
        if !classes.contains(&class) {
            classes.push(class);
        }
    }

    let mut levels: Vec<String> = Vec::new();
    for level in &rule.trigger.levels {
        let level = level.trim().to_string();
        if !levels.contains(&level) {
            levels.push(level);
        }
    }

    Rule {
        id: None,
        name: rule.name.trim().to_string(),
        trigger: herald_types::Trigger {
            origins: classes.into_iter().map(OriginReference::class).collect(),
            levels,
        },
        action: herald_types::Action {
            channel: ChannelReference::id(rule.action.channel.id.trim()),
            recipient: rule.action.recipient.trim().to_string(),
        },
        active: rule.active,
        errors: FieldErrors::new(),
    }
}

/// Checks the rule's shape: a name, at least one origin, at least one
/// level and a channel id.
///
/// This is not an existence check. On values read from the store, an
/// origin or channel that no longer exists has already been dropped or
/// emptied by the denormalizing join, so it fails here as missing.
pub fn validate_rule(rule: &Rule) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::new();

    if rule.name.trim().is_empty() {
        errors.add(FIELD_NAME, "name is required");
    }

    if rule.trigger.origins.is_empty() {
        errors.add(FIELD_ORIGINS, "at least one existing origin is required");
    } else if rule.trigger.origins.iter().any(|o| o.class.trim().is_empty()) {
        errors.add(FIELD_ORIGINS, "origin class must not be blank");
    }

    if rule.trigger.levels.is_empty() {
        errors.add(FIELD_LEVELS, "at least one level is required");
    } else if rule.trigger.levels.iter().any(|l| l.trim().is_empty()) {
        errors.add(FIELD_LEVELS, "level must not be blank");
    }

    if rule.action.channel.id.trim().is_empty() {
        errors.add(FIELD_CHANNEL, "an existing channel is required");
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Applies the channel-type recipient policy: mail needs a recipient,
/// every other channel type must not have one.
pub fn check_recipient(channel_type: ChannelType, recipient: &str) -> Result<(), RuleError> {
    let has_recipient = !recipient.trim().is_empty();
    match (channel_type.requires_recipient(), has_recipient) {
        (true, false) => Err(RuleError::RecipientRequired),
        (false, true) => Err(RuleError::RecipientNotSupported(channel_type)),
        _ => Ok(()),
    }
}

/// Marks a read rule inactive when its references no longer hold.
///
/// Pure and idempotent. A valid rule keeps its stored `active` flag and
/// gets empty `errors`; an invalid one is returned with `active = false`
/// and the shape errors. Storage is never touched.
pub fn deactivate_rule_if_invalid(mut rule: Rule) -> Rule {
    match validate_rule(&rule) {
        Ok(()) => rule.errors = FieldErrors::new(),
        Err(errors) => {
            tracing::warn!(
                rule_id = rule.id.as_deref().unwrap_or_default(),
                errors = %errors,
                "rule references no longer resolve, reporting it inactive"
            );
            rule.active = false;
            rule.errors = errors;
        }
    }
    rule
}
