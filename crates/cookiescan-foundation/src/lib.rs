//! Concrete backends for the cookie scanning service.
//!
//! Implements the kernel's store, lock, and classifier contracts:
//!
//! - [`persistence`] — SQLite (sqlx) and in-memory store backends
//! - [`locking`] — SQL-backed and in-memory distributed locks
//! - [`classifier`] — the priority-ordered classification cascade with its
//!   rule set, IAB vendor map, per-domain overrides, and ML seam

pub mod classifier;
pub mod locking;
pub mod persistence;

pub use classifier::{ClassifierContext, ClassifierContextBuilder};
pub use locking::{InMemoryLock, SqlLock};
pub use persistence::memory::InMemoryStore;
pub use persistence::sqlite::SqliteStore;
