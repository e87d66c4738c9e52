//! Persistence operations for the `origins` table.
//!
//! Writes go through [`replace_service_origins`], which swaps a service's
//! whole origin set inside the caller's transaction. Reads go through
//! [`list_origins`].

use herald_types::Origin;
use rusqlite::{params, Connection};

use crate::error::OriginError;

/// Replaces every origin owned by `service_id` with `origins`.
///
/// Must run inside a transaction the caller owns; on error the caller
/// rolls back and nothing is changed. The `service_id` of each payload
/// entry is ignored. An empty `origins` leaves the service with no origins.
///
/// Returns `(removed, inserted)` row counts.
///
/// # Errors
///
/// Returns [`OriginError::Conflict`] naming the first class that is
/// already registered, or [`OriginError::Database`] on other SQL failures.
pub fn replace_service_origins(
    conn: &Connection,
    service_id: &str,
    origins: &[Origin],
) -> Result<(usize, usize), OriginError> {
    let removed = conn
        .execute("DELETE FROM origins WHERE service_id = ?1", [service_id])
        .map_err(OriginError::database("delete service origins"))?;

    if origins.is_empty() {
        return Ok((removed, 0));
    }

    let mut stmt = conn
        .prepare_cached("INSERT INTO origins (name, class, service_id) VALUES (?1, ?2, ?3)")
        .map_err(OriginError::database("prepare origin insert"))?;

    for origin in origins {
        if let Err(e) = stmt.execute(params![origin.name, origin.class, service_id]) {
            if herald_db::unique_violation(&e) == Some("origins.class") {
                return Err(OriginError::Conflict(origin.class.clone()));
            }
            return Err(OriginError::database("insert origin")(e));
        }
    }

    Ok((removed, origins.len()))
}

/// Lists all origins, ordered by owning service then name.
pub fn list_origins(conn: &Connection) -> Result<Vec<Origin>, OriginError> {
    let mut stmt = conn
        .prepare(
            "SELECT name, class, service_id FROM origins
             ORDER BY service_id ASC, name ASC, class ASC",
        )
        .map_err(OriginError::database("prepare origin list"))?;

    let rows = stmt
        .query_map([], |row| {
            Ok(Origin {
                name: row.get(0)?,
                class: row.get(1)?,
                service_id: row.get(2)?,
            })
        })
        .map_err(OriginError::database("list origins"))?;

    let mut origins = Vec::new();
    for row in rows {
        origins.push(row.map_err(OriginError::database("read origin row"))?);
    }
    Ok(origins)
}
