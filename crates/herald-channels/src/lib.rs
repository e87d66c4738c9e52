//! Notification channel registry access.
//!
//! Channels (mail, Mattermost and Teams targets) are managed by a separate
//! registry; rules only hold a channel id. This crate provides the pieces
//! of that registry the rule engine depends on: reading and registering
//! rows of the `notification_channel` table, and the [`ChannelLookup`]
//! seam through which rule writes resolve a channel id to its type and
//! display name.
//!
//! Credential storage and message delivery live outside herald.

use herald_db::{CheckoutError, DbPool, Deadline, DeadlineGuard};
use herald_types::ChannelType;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during channel registry operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("channel not found: {0}")]
    NotFound(String),
}

/// A registered notification channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Channel {
    /// Channel id referenced by rules.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Delivery kind.
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    /// Creation timestamp (ISO 8601).
    pub created_at: String,
}

/// Registers a channel row.
pub fn create_channel(
    conn: &Connection,
    id: &str,
    name: &str,
    channel_type: ChannelType,
) -> Result<Channel, ChannelError> {
    let channel = conn.query_row(
        "INSERT INTO notification_channel (id, name, type) VALUES (?1, ?2, ?3)
         RETURNING id, name, type, created_at",
        params![id, name, channel_type.as_str()],
        map_row_to_channel,
    )?;
    tracing::debug!(channel_id = id, channel_type = %channel_type, "registered channel");
    Ok(channel)
}

/// Retrieves a channel by id.
pub fn get_channel(conn: &Connection, id: &str) -> Result<Channel, ChannelError> {
    conn.query_row(
        "SELECT id, name, type, created_at FROM notification_channel WHERE id = ?1",
        [id],
        map_row_to_channel,
    )
    .optional()?
    .ok_or_else(|| ChannelError::NotFound(id.to_string()))
}

/// Deletes a channel. Rules referencing it are left in place and read back deactivated.
pub fn delete_channel(conn: &Connection, id: &str) -> Result<(), ChannelError> {
    let count = conn.execute("DELETE FROM notification_channel WHERE id = ?1", [id])?;
    if count == 0 {
        return Err(ChannelError::NotFound(id.to_string()));
    }
    Ok(())
}

fn map_row_to_channel(row: &Row) -> rusqlite::Result<Channel> {
    let type_str: String = row.get(2)?;
    let channel_type: ChannelType = type_str.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Channel {
        id: row.get(0)?,
        name: row.get(1)?,
        channel_type,
        created_at: row.get(3)?,
    })
}

/// Type and display name of a resolved channel reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub channel_type: ChannelType,
    pub name: String,
}

/// Failure to resolve a channel reference.
#[derive(Debug, Error)]
pub enum LookupError {
    /// No channel with this id exists.
    #[error("channel not found: {0}")]
    NotFound(String),
    /// The registry could not answer.
    #[error("channel lookup failed: {0}")]
    Unavailable(String),
    /// The caller's deadline passed before the registry answered.
    #[error("channel lookup timed out")]
    Timeout,
}

/// Resolves channel ids for rule validation.
pub trait ChannelLookup: Send + Sync {
    /// Returns the channel's type and name, or [`LookupError::NotFound`].
    fn get_by_id(&self, id: &str, deadline: Deadline) -> Result<ChannelInfo, LookupError>;
}

/// [`ChannelLookup`] backed by the `notification_channel` table.
#[derive(Clone)]
pub struct SqliteChannelLookup {
    pool: DbPool,
}

impl SqliteChannelLookup {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl ChannelLookup for SqliteChannelLookup {
    fn get_by_id(&self, id: &str, deadline: Deadline) -> Result<ChannelInfo, LookupError> {
        if deadline.is_expired() {
            return Err(LookupError::Timeout);
        }
        let conn = herald_db::checkout(&self.pool, deadline).map_err(|e| match e {
            CheckoutError::Timeout => LookupError::Timeout,
            CheckoutError::Pool(e) => LookupError::Unavailable(format!("db connection failed: {e}")),
        })?;
        let _deadline = DeadlineGuard::arm(&conn, deadline).map_err(lookup_failure)?;

        match get_channel(&conn, id) {
            Ok(channel) => Ok(ChannelInfo {
                channel_type: channel.channel_type,
                name: channel.name,
            }),
            Err(ChannelError::NotFound(id)) => Err(LookupError::NotFound(id)),
            Err(ChannelError::Database(e)) => Err(lookup_failure(e)),
        }
    }
}

fn lookup_failure(e: rusqlite::Error) -> LookupError {
    if herald_db::is_timeout(&e) {
        LookupError::Timeout
    } else {
        LookupError::Unavailable(e.to_string())
    }
}
