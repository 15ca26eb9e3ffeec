//! Persistence layer: libSQL-backed handled flags for inbound items.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{HandledStore, ItemKind};
