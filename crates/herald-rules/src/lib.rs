//! Notification rules and their consistency engine.
//!
//! A rule says "when an event from one of these origin classes arrives at
//! one of these levels, notify this channel". Rules, origins and channels
//! are written independently and nothing in storage ties them together,
//! so this crate keeps them consistent in software:
//!
//! - [`store`] persists only the writable references (origin classes and
//!   channel id) and resolves names and types with a join on every read.
//! - [`RuleEngine`] validates references on every write and, on every
//!   read, reports rules whose references stopped resolving as inactive
//!   with per-field `errors`, without changing what is stored.
//!
//! # Usage
//!
//! ```rust,ignore
//! use herald_channels::SqliteChannelLookup;
//! use herald_db::Deadline;
//! use herald_rules::RuleEngine;
//!
//! let engine = RuleEngine::new(pool.clone(), SqliteChannelLookup::new(pool), 100);
//! let stored = engine.create(rule, Deadline::after(Duration::from_secs(5)))?;
//! let listed = engine.list(Deadline::none())?;
//! ```

mod engine;
mod error;
pub mod store;
pub mod validation;

pub use engine::{RuleEngine, DEFAULT_RULE_LIMIT};
pub use error::RuleError;
pub use validation::deactivate_rule_if_invalid;
