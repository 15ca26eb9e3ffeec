//! `HandledStore` trait: durable handled flags for inbound items.

use std::fmt;

use async_trait::async_trait;

use crate::error::DatabaseError;

/// Kind of an inbound item; each kind has its own table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    Mail,
    Event,
}

impl ItemKind {
    pub(crate) fn table(self) -> &'static str {
        match self {
            ItemKind::Mail => "mails",
            ItemKind::Event => "events",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ItemKind::Mail => "mail",
            ItemKind::Event => "event",
        })
    }
}

/// Durable record of which inbound items were fully processed.
///
/// Items are recorded unhandled on receipt and flipped to handled only
/// after their action completed, so a restart replays whatever is left.
#[async_trait]
pub trait HandledStore: Send + Sync {
    /// Record a freshly received item as unhandled with no progress.
    async fn record_received(&self, kind: ItemKind, item: &str) -> Result<(), DatabaseError>;

    async fn set_handled(
        &self,
        kind: ItemKind,
        item: &str,
        handled: bool,
    ) -> Result<(), DatabaseError>;

    /// Unhandled items in order of receipt.
    async fn list_unhandled(&self, kind: ItemKind) -> Result<Vec<String>, DatabaseError>;

    /// Store how many leading entries of a batch item are done.
    async fn set_progress(
        &self,
        kind: ItemKind,
        item: &str,
        done: usize,
    ) -> Result<(), DatabaseError>;

    /// 0 for unknown items.
    async fn progress(&self, kind: ItemKind, item: &str) -> Result<usize, DatabaseError>;
}
