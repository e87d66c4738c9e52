//! The rule consistency engine.

use herald_channels::{ChannelLookup, LookupError};
use herald_db::{DbPool, Deadline, DeadlineGuard};
use herald_types::{Action, Rule};
use rusqlite::Connection;

use crate::error::RuleError;
use crate::store;
use crate::validation::{check_recipient, deactivate_rule_if_invalid, normalize_rule, validate_rule};

/// Default ceiling on the number of stored rules.
pub const DEFAULT_RULE_LIMIT: usize = 100;

/// Validating front door for rule reads and writes.
///
/// Writes are checked before anything is stored: rule ceiling (create
/// only), rule shape, then the referenced channel and its recipient
/// policy. Origin existence and name uniqueness are checked by the store
/// inside the write transaction. Reads never fail because of another
/// aggregate's state: rules with references that no longer resolve come
/// back inactive with `errors` filled in.
pub struct RuleEngine<L> {
    pool: DbPool,
    channels: L,
    limit: usize,
}

impl<L: ChannelLookup> RuleEngine<L> {
    pub fn new(pool: DbPool, channels: L, limit: usize) -> Self {
        Self {
            pool,
            channels,
            limit,
        }
    }

    /// Maximum number of stored rules.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Returns rule `id`, deactivated if its references no longer resolve.
    pub fn get(&self, id: &str, deadline: Deadline) -> Result<Rule, RuleError> {
        let rule = self.with_conn(deadline, |conn| store::get_rule(conn, id))?;
        Ok(deactivate_rule_if_invalid(rule))
    }

    /// Returns all rules ordered by name, each deactivated independently.
    pub fn list(&self, deadline: Deadline) -> Result<Vec<Rule>, RuleError> {
        let rules = self.with_conn(deadline, store::list_rules)?;
        Ok(rules.into_iter().map(deactivate_rule_if_invalid).collect())
    }

    /// Validates and stores a new rule.
    ///
    /// # Errors
    ///
    /// In check order: [`RuleError::RuleLimitReached`],
    /// [`RuleError::Invalid`], [`RuleError::ChannelNotFound`],
    /// [`RuleError::RecipientRequired`] / [`RuleError::RecipientNotSupported`],
    /// then from the store [`RuleError::OriginsNotFound`] and
    /// [`RuleError::DuplicateRuleName`].
    pub fn create(&self, rule: Rule, deadline: Deadline) -> Result<Rule, RuleError> {
        let count = self.with_conn(deadline, store::count_rules)?;
        if count >= self.limit {
            return Err(RuleError::RuleLimitReached { limit: self.limit });
        }

        let rule = normalize_rule(rule);
        validate_rule(&rule).map_err(RuleError::Invalid)?;
        self.validate_action(&rule.action, deadline)?;

        let stored = self.with_conn(deadline, |conn| store::create_rule(conn, &rule))?;
        tracing::info!(
            rule_id = stored.id.as_deref().unwrap_or_default(),
            name = %stored.name,
            "created rule"
        );
        Ok(deactivate_rule_if_invalid(stored))
    }

    /// Validates and replaces rule `id`. Same checks as [`create`](Self::create)
    /// without the ceiling, plus [`RuleError::ItemNotFound`].
    pub fn update(&self, id: &str, rule: Rule, deadline: Deadline) -> Result<Rule, RuleError> {
        let id = store::parse_rule_id(id)?;
        let rule = normalize_rule(rule);
        validate_rule(&rule).map_err(RuleError::Invalid)?;
        self.validate_action(&rule.action, deadline)?;

        let stored = self.with_conn(deadline, |conn| store::update_rule(conn, &id, &rule))?;
        tracing::info!(rule_id = %id, name = %stored.name, "updated rule");
        Ok(deactivate_rule_if_invalid(stored))
    }

    /// Deletes rule `id`. Deleting an unknown rule is not an error.
    pub fn delete(&self, id: &str, deadline: Deadline) -> Result<(), RuleError> {
        let removed = self.with_conn(deadline, |conn| store::delete_rule(conn, id))?;
        if removed {
            tracing::info!(rule_id = id, "deleted rule");
        } else {
            tracing::debug!(rule_id = id, "delete of unknown rule ignored");
        }
        Ok(())
    }

    fn validate_action(&self, action: &Action, deadline: Deadline) -> Result<(), RuleError> {
        let channel = self
            .channels
            .get_by_id(&action.channel.id, deadline)
            .map_err(|e| match e {
                LookupError::NotFound(id) => RuleError::ChannelNotFound(id),
                LookupError::Timeout => RuleError::Timeout,
                LookupError::Unavailable(reason) => RuleError::ChannelLookup(reason),
            })?;
        check_recipient(channel.channel_type, &action.recipient)
    }

    fn with_conn<T>(
        &self,
        deadline: Deadline,
        op: impl FnOnce(&Connection) -> Result<T, RuleError>,
    ) -> Result<T, RuleError> {
        if deadline.is_expired() {
            return Err(RuleError::Timeout);
        }
        let conn = herald_db::checkout(&self.pool, deadline)?;
        let _deadline =
            DeadlineGuard::arm(&conn, deadline).map_err(RuleError::database("arm deadline"))?;
        op(&*conn)
    }
}
