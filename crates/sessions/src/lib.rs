//! Session service implementations for Wayfarer.
//!
//! - [`InMemorySessionService`]: process-local, discarded at exit
//! - [`SqliteSessionService`]: durable, keyed by app + user + session id

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemorySessionService;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteSessionService;
