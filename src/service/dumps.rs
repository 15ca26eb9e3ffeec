//! Dump directory: every inbound item is written here before it is routed.
//!
//! File names are `email_<unix-micros>.json` and `event_<unix-micros>.json`;
//! the file name doubles as the item identifier in the handled store.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::store::ItemKind;

const SUFFIX: &str = ".json";

fn prefix(kind: ItemKind) -> &'static str {
    match kind {
        ItemKind::Mail => "email_",
        ItemKind::Event => "event_",
    }
}

/// Receipt time encoded in a dump file name.
pub fn dump_timestamp(name: &str) -> Option<DateTime<Utc>> {
    let stem = name
        .strip_prefix(prefix(ItemKind::Mail))
        .or_else(|| name.strip_prefix(prefix(ItemKind::Event)))?
        .strip_suffix(SUFFIX)?;
    let micros: i64 = stem.parse().ok()?;
    DateTime::from_timestamp_micros(micros)
}

#[derive(Debug, Clone)]
pub struct DumpDir {
    root: PathBuf,
}

impl DumpDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Store `bytes` under a fresh name and return that name.
    pub async fn write(&self, kind: ItemKind, bytes: &[u8]) -> std::io::Result<String> {
        let mut micros = Utc::now().timestamp_micros();
        loop {
            let name = format!("{}{micros}{SUFFIX}", prefix(kind));
            let path = self.root.join(&name);
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(bytes).await?;
                    file.flush().await?;
                    debug!(path = %path.display(), bytes = bytes.len(), "Dumped item");
                    return Ok(name);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => micros += 1,
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn read(&self, name: &str) -> std::io::Result<Vec<u8>> {
        fs::read(self.root.join(name)).await
    }

    /// Dumps of one kind, oldest first.
    pub async fn list(&self, kind: ItemKind) -> std::io::Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with(prefix(kind)) && name.ends_with(SUFFIX) {
                names.push(name);
            }
        }
        names.sort_by_key(|name| (dump_timestamp(name), name.clone()));
        Ok(names)
    }

    /// Delete dumps received more than `days` days ago. Files without a
    /// readable timestamp are kept. `0` keeps everything.
    pub async fn purge_older_than(&self, days: u32) -> std::io::Result<usize> {
        if days == 0 {
            debug!("Dump retention disabled");
            return Ok(0);
        }
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            match dump_timestamp(&name) {
                Some(received) if received < cutoff => {
                    fs::remove_file(entry.path()).await?;
                    removed += 1;
                }
                Some(_) => {}
                None if name.starts_with(prefix(ItemKind::Mail))
                    || name.starts_with(prefix(ItemKind::Event)) =>
                {
                    warn!(name, "Dump without readable timestamp, keeping it");
                }
                None => {}
            }
        }
        info!(removed, days, "Purged old dumps");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_from_names() {
        let ts = dump_timestamp("email_1700000000000000.json").unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
        assert!(dump_timestamp("event_1700000000000000.json").is_some());
        assert!(dump_timestamp("email_abc.json").is_none());
        assert!(dump_timestamp("log.2024-01-01").is_none());
    }

    #[tokio::test]
    async fn write_read_list() {
        let dir = tempfile::tempdir().unwrap();
        let dumps = DumpDir::new(dir.path());
        let first = dumps.write(ItemKind::Mail, b"one").await.unwrap();
        let second = dumps.write(ItemKind::Mail, b"two").await.unwrap();
        let event = dumps.write(ItemKind::Event, b"[]").await.unwrap();
        assert_ne!(first, second);
        assert!(event.starts_with("event_"));

        assert_eq!(dumps.read(&second).await.unwrap(), b"two");
        assert_eq!(dumps.list(ItemKind::Mail).await.unwrap(), [first, second]);
        assert_eq!(dumps.list(ItemKind::Event).await.unwrap(), [event]);
    }

    #[tokio::test]
    async fn purge_keeps_recent_and_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let dumps = DumpDir::new(dir.path());
        let old = Utc::now() - Duration::days(10);
        let old_name = format!("email_{}.json", old.timestamp_micros());
        std::fs::write(dir.path().join(&old_name), "old").unwrap();
        std::fs::write(dir.path().join("email_garbage.json"), "?").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "keep").unwrap();
        let fresh = dumps.write(ItemKind::Event, b"[]").await.unwrap();

        assert_eq!(dumps.purge_older_than(0).await.unwrap(), 0);
        assert_eq!(dumps.purge_older_than(7).await.unwrap(), 1);
        assert!(!dir.path().join(old_name).exists());
        assert!(dir.path().join(fresh).exists());
        assert!(dir.path().join("email_garbage.json").exists());
        assert!(dir.path().join("notes.txt").exists());
    }
}
