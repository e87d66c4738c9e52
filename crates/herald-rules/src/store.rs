//! Persistence operations for the `rules` table.
//!
//! Rules persist only their writable references: the origin classes and
//! the channel id. Every read goes through [`RULE_SELECT`], which joins
//! the current `notification_channel` row and aggregates the current
//! `origins` rows into a JSON array, so names and types always reflect
//! the registries as they are now. A reference that no longer resolves
//! comes back empty (channel) or absent (origin) instead of failing.
//!
//! Writes run in one `IMMEDIATE` transaction that validates origin
//! classes, writes the row and reads it back through the same join, so
//! the value returned by a write is exactly what a later read returns.

use std::collections::HashMap;

use herald_types::{Action, ChannelReference, ChannelType, OriginReference, Rule, Trigger};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use uuid::{Uuid, Version};

use crate::error::RuleError;

/// Denormalizing projection shared by every rule read.
const RULE_SELECT: &str = "
    SELECT r.id,
           r.name,
           r.trigger_origins,
           r.trigger_levels,
           r.action_recipient,
           r.active,
           COALESCE(c.id, ''),
           COALESCE(c.name, ''),
           c.type,
           (SELECT json_group_array(
                       json_object('name', o.name, 'class', o.class, 'serviceID', o.service_id))
              FROM origins o
             WHERE o.class IN (SELECT value FROM json_each(r.trigger_origins)))
      FROM rules r
      LEFT JOIN notification_channel c ON c.id = r.action_channel_id";

/// Validates that `id` is a UUID v4 and returns its canonical form.
///
/// Checked before any query so malformed ids never reach SQLite.
pub fn parse_rule_id(id: &str) -> Result<String, RuleError> {
    match Uuid::parse_str(id.trim()) {
        Ok(uuid) if uuid.get_version() == Some(Version::Random) => Ok(uuid.to_string()),
        _ => Err(RuleError::InvalidId(id.to_string())),
    }
}

/// Counts all stored rules.
pub fn count_rules(conn: &Connection) -> Result<usize, RuleError> {
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM rules", [], |row| row.get(0))
        .map_err(RuleError::database("count rules"))?;
    Ok(count.max(0) as usize)
}

/// Retrieves a rule by id, denormalized.
pub fn get_rule(conn: &Connection, id: &str) -> Result<Rule, RuleError> {
    let id = parse_rule_id(id)?;
    select_rule(conn, &id)?.ok_or(RuleError::ItemNotFound(id))
}

/// Lists all rules ordered by name, denormalized.
pub fn list_rules(conn: &Connection) -> Result<Vec<Rule>, RuleError> {
    let mut stmt = conn
        .prepare(&format!("{RULE_SELECT} ORDER BY r.name ASC"))
        .map_err(RuleError::database("prepare rule list"))?;

    let rows = stmt
        .query_map([], map_row_to_rule)
        .map_err(RuleError::database("list rules"))?;

    let mut rules = Vec::new();
    for row in rows {
        rules.push(row.map_err(RuleError::database("read rule row"))?);
    }
    Ok(rules)
}

/// Inserts a new rule under a fresh UUID v4 and returns it as a read would.
///
/// # Errors
///
/// - [`RuleError::OriginsNotFound`] if any trigger class is not registered.
/// - [`RuleError::DuplicateRuleName`] if the name is taken.
pub fn create_rule(conn: &Connection, rule: &Rule) -> Result<Rule, RuleError> {
    let id = Uuid::new_v4().to_string();
    let origins_json = serde_json::to_string(&rule.origin_classes())?;
    let levels_json = serde_json::to_string(&rule.trigger.levels)?;

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .map_err(RuleError::database("begin rule transaction"))?;

    ensure_origins_exist(&tx, &origins_json)?;

    tx.execute(
        "INSERT INTO rules (
            id, name, trigger_origins, trigger_levels,
            action_channel_id, action_recipient, active
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            rule.name,
            origins_json,
            levels_json,
            rule.action.channel.id,
            rule.action.recipient,
            rule.active,
        ],
    )
    .map_err(|e| write_error(e, "insert rule", &rule.name))?;

    let stored = select_rule(&tx, &id)?.ok_or_else(|| RuleError::ItemNotFound(id.clone()))?;
    tx.commit()
        .map_err(RuleError::database("commit rule transaction"))?;

    tracing::debug!(rule_id = %id, "inserted rule");
    Ok(stored)
}

/// Replaces the writable fields of rule `id` and returns it as a read would.
///
/// # Errors
///
/// - [`RuleError::InvalidId`] / [`RuleError::ItemNotFound`] for a bad or unknown id.
/// - [`RuleError::OriginsNotFound`] if any trigger class is not registered.
/// - [`RuleError::DuplicateRuleName`] if another rule has the new name.
pub fn update_rule(conn: &Connection, id: &str, rule: &Rule) -> Result<Rule, RuleError> {
    let id = parse_rule_id(id)?;
    let origins_json = serde_json::to_string(&rule.origin_classes())?;
    let levels_json = serde_json::to_string(&rule.trigger.levels)?;

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .map_err(RuleError::database("begin rule transaction"))?;

    let exists: bool = tx
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM rules WHERE id = ?1)",
            [&id],
            |row| row.get(0),
        )
        .map_err(RuleError::database("check rule exists"))?;
    if !exists {
        return Err(RuleError::ItemNotFound(id));
    }

    ensure_origins_exist(&tx, &origins_json)?;

    tx.execute(
        "UPDATE rules SET
            name = ?2,
            trigger_origins = ?3,
            trigger_levels = ?4,
            action_channel_id = ?5,
            action_recipient = ?6,
            active = ?7,
            updated_at = datetime('now')
         WHERE id = ?1",
        params![
            id,
            rule.name,
            origins_json,
            levels_json,
            rule.action.channel.id,
            rule.action.recipient,
            rule.active,
        ],
    )
    .map_err(|e| write_error(e, "update rule", &rule.name))?;

    let stored = select_rule(&tx, &id)?.ok_or_else(|| RuleError::ItemNotFound(id.clone()))?;
    tx.commit()
        .map_err(RuleError::database("commit rule transaction"))?;

    tracing::debug!(rule_id = %id, "updated rule");
    Ok(stored)
}

/// Deletes rule `id`. Deleting a rule that does not exist succeeds.
pub fn delete_rule(conn: &Connection, id: &str) -> Result<bool, RuleError> {
    let id = parse_rule_id(id)?;
    let count = conn
        .execute("DELETE FROM rules WHERE id = ?1", [&id])
        .map_err(RuleError::database("delete rule"))?;
    Ok(count > 0)
}

fn select_rule(conn: &Connection, id: &str) -> Result<Option<Rule>, RuleError> {
    conn.query_row(
        &format!("{RULE_SELECT} WHERE r.id = ?1"),
        [id],
        map_row_to_rule,
    )
    .optional()
    .map_err(RuleError::database("get rule"))
}

/// Fails with the classes from `classes_json` that are not registered.
fn ensure_origins_exist(conn: &Connection, classes_json: &str) -> Result<(), RuleError> {
    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT value FROM json_each(?1)
             WHERE value NOT IN (SELECT class FROM origins)",
        )
        .map_err(RuleError::database("prepare origin check"))?;

    let rows = stmt
        .query_map([classes_json], |row| row.get::<_, String>(0))
        .map_err(RuleError::database("check origins"))?;

    let mut missing = Vec::new();
    for row in rows {
        missing.push(row.map_err(RuleError::database("read missing origin"))?);
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(RuleError::OriginsNotFound(missing))
    }
}

fn write_error(e: rusqlite::Error, op: &'static str, name: &str) -> RuleError {
    if herald_db::unique_violation(&e) == Some("rules.name") {
        return RuleError::DuplicateRuleName(name.to_string());
    }
    RuleError::database(op)(e)
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn map_row_to_rule(row: &Row) -> rusqlite::Result<Rule> {
    let persisted_classes: Vec<String> = json_column(row, 2)?;
    let levels: Vec<String> = json_column(row, 3)?;
    let resolved: Vec<OriginReference> = json_column(row, 9)?;

    // Keep author order; classes with no current origin are dropped.
    let mut by_class: HashMap<String, OriginReference> = resolved
        .into_iter()
        .map(|origin| (origin.class.clone(), origin))
        .collect();
    let origins = persisted_classes
        .iter()
        .filter_map(|class| by_class.remove(class))
        .collect();

    let channel_type = row
        .get::<_, Option<String>>(8)?
        .map(|raw| raw.parse::<ChannelType>())
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Rule {
        id: Some(row.get(0)?),
        name: row.get(1)?,
        trigger: Trigger { origins, levels },
        action: Action {
            channel: ChannelReference {
                id: row.get(6)?,
                name: row.get(7)?,
                channel_type,
            },
            recipient: row.get(4)?,
        },
        active: row.get(5)?,
        errors: Default::default(),
    })
}
