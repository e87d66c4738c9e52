//! Origin registry for the herald platform.
//!
//! Services register the event sources ("origins") they emit under, and
//! rules trigger on origin classes. Each service owns a set of origins and
//! only ever replaces that set wholesale through
//! [`OriginRegistry::upsert_origins`]; there is no per-origin update.
//!
//! # Invariants
//!
//! - `class` is unique across every service, not per service.
//! - The owning service of a stored origin is always the caller of the
//!   upsert, whatever the payload claims.
//! - Replaces for one service are serialized by a keyed lock held for the
//!   whole transaction, so concurrent replaces never interleave their
//!   delete and insert steps.
//!
//! # Usage
//!
//! ```rust,ignore
//! use herald_db::Deadline;
//! use herald_origins::OriginRegistry;
//! use herald_types::Origin;
//!
//! let registry = OriginRegistry::new(pool);
//! registry.upsert_origins(
//!     "monitoring",
//!     &[Origin::new("Disk usage", "infra.disk")],
//!     Deadline::after(Duration::from_secs(5)),
//! )?;
//! ```

mod error;
mod registry;
mod store;

pub use error::OriginError;
pub use registry::OriginRegistry;
pub use store::{list_origins, replace_service_origins};
