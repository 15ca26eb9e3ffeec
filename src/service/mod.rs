//! The long-running shell around the router: intake, replay and
//! maintenance, all serialized behind one lock.

pub mod dumps;
pub mod http;
pub mod maintenance;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::mailer::CriticalReporter;
use crate::message::InboundForm;
use crate::routing::{Decision, Router};
use crate::store::{HandledStore, ItemKind};

pub use dumps::DumpDir;

/// Switches that decide what happens after an item was dumped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceOptions {
    pub parse_requests: bool,
    pub handle_events: bool,
    pub email_keep_days: u32,
}

/// What became of one received item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Dumped and recorded, routing is off.
    Stored,
    Mail(Decision),
    /// Keys of the requests created in this run.
    Events(Vec<String>),
    /// Routing failed; reported, item left unhandled.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub item: String,
    pub outcome: Outcome,
}

/// Counts from a replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub handled: usize,
    pub failed: usize,
}

struct Inner {
    router: Router,
    store: Arc<dyn HandledStore>,
    dumps: DumpDir,
    options: ServiceOptions,
}

pub struct InboundService {
    inner: Mutex<Inner>,
    reporter: Arc<CriticalReporter>,
}

impl InboundService {
    pub fn new(
        router: Router,
        store: Arc<dyn HandledStore>,
        dumps: DumpDir,
        reporter: Arc<CriticalReporter>,
        options: ServiceOptions,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                router,
                store,
                dumps,
                options,
            }),
            reporter,
        }
    }

    pub fn reporter(&self) -> &CriticalReporter {
        &self.reporter
    }

    /// Dump and record a mail, then route it when parsing is enabled.
    ///
    /// Only intake failures are returned; routing failures are reported
    /// and leave the item unhandled for replay.
    pub async fn receive_email(&self, form: &InboundForm) -> Result<Receipt> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let raw = form.to_json()?;
        let item = inner.intake(ItemKind::Mail, &raw).await?;
        if !inner.options.parse_requests {
            return Ok(Receipt {
                item,
                outcome: Outcome::Stored,
            });
        }
        let outcome = inner.process_mail(&self.reporter, &item, &raw).await;
        Ok(Receipt { item, outcome })
    }

    /// Dump and record an event batch, then route it when enabled.
    pub async fn receive_event(&self, body: &[u8]) -> Result<Receipt> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let item = inner.intake(ItemKind::Event, body).await?;
        if !(inner.options.parse_requests && inner.options.handle_events) {
            return Ok(Receipt {
                item,
                outcome: Outcome::Stored,
            });
        }
        let outcome = inner.process_event(&self.reporter, &item, body).await;
        Ok(Receipt { item, outcome })
    }

    /// Re-drive every unhandled mail, then every unhandled event batch.
    /// Event replay stops at the first failing batch.
    pub async fn replay_unhandled(&self) -> Result<ReplayStats> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let mut stats = ReplayStats::default();

        let mails = inner.store.list_unhandled(ItemKind::Mail).await?;
        info!(count = mails.len(), "Replaying unhandled mails");
        for item in mails {
            let raw = match inner.dumps.read(&item).await {
                Ok(raw) => raw,
                Err(e) => {
                    self.reporter
                        .report(&format!("reading dump {item}"), &Error::from(e))
                        .await;
                    stats.failed += 1;
                    continue;
                }
            };
            match inner.process_mail(&self.reporter, &item, &raw).await {
                Outcome::Failed => stats.failed += 1,
                _ => stats.handled += 1,
            }
        }

        if inner.options.handle_events {
            let events = inner.store.list_unhandled(ItemKind::Event).await?;
            info!(count = events.len(), "Replaying unhandled events");
            for item in events {
                let outcome = match inner.dumps.read(&item).await {
                    Ok(raw) => inner.process_event(&self.reporter, &item, &raw).await,
                    Err(e) => {
                        self.reporter
                            .report(&format!("reading dump {item}"), &Error::from(e))
                            .await;
                        Outcome::Failed
                    }
                };
                if outcome == Outcome::Failed {
                    stats.failed += 1;
                    warn!(item, "Stopping event replay at failed batch");
                    break;
                }
                stats.handled += 1;
            }
        }
        info!(handled = stats.handled, failed = stats.failed, "Replay finished");
        Ok(stats)
    }

    /// Offline mode: route every mail dump once, oldest first, without
    /// touching the handled store. The first failure aborts.
    pub async fn replay_all_dumps(&self) -> Result<usize> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        let items = inner.dumps.list(ItemKind::Mail).await?;
        info!(count = items.len(), "Replaying all mail dumps");
        for item in &items {
            let raw = inner.dumps.read(item).await?;
            let decision = inner.router.handle_email(&raw).await?;
            info!(item = %item, ?decision, "Replayed dump");
        }
        Ok(items.len())
    }

    /// Purge old dumps and forget auto-reply senders.
    pub async fn maintenance(&self) {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        info!("Running maintenance");
        if let Err(e) = inner
            .dumps
            .purge_older_than(inner.options.email_keep_days)
            .await
        {
            self.reporter.report("purging old dumps", &Error::from(e)).await;
        }
        inner.router.clear_dedup();
    }
}

impl Inner {
    async fn intake(&self, kind: ItemKind, raw: &[u8]) -> Result<String> {
        let item = self.dumps.write(kind, raw).await?;
        self.store.record_received(kind, &item).await?;
        info!(%kind, item = %item, "Received item");
        Ok(item)
    }

    async fn process_mail(&mut self, reporter: &CriticalReporter, item: &str, raw: &[u8]) -> Outcome {
        let result = match self.router.handle_email(raw).await {
            Ok(decision) => self
                .store
                .set_handled(ItemKind::Mail, item, true)
                .await
                .map(|()| decision)
                .map_err(Error::from),
            Err(e) => Err(e),
        };
        match result {
            Ok(decision) => {
                info!(item, ?decision, "Mail handled");
                Outcome::Mail(decision)
            }
            Err(e) => {
                reporter.report(&format!("handling mail {item}"), &e).await;
                Outcome::Failed
            }
        }
    }

    async fn process_event(&self, reporter: &CriticalReporter, item: &str, raw: &[u8]) -> Outcome {
        match self.route_event(item, raw).await {
            Ok(keys) => {
                info!(item, created = keys.len(), "Event batch handled");
                Outcome::Events(keys)
            }
            Err(e) => {
                reporter.report(&format!("handling event {item}"), &e).await;
                Outcome::Failed
            }
        }
    }

    /// Resume after the events a previous run already turned into requests.
    async fn route_event(&self, item: &str, raw: &[u8]) -> Result<Vec<String>> {
        let store = &self.store;
        let done = store.progress(ItemKind::Event, item).await?;
        let keys = self
            .router
            .handle_event(raw, done, move |done| async move {
                store
                    .set_progress(ItemKind::Event, item, done)
                    .await
                    .map_err(Error::from)
            })
            .await?;
        store.set_handled(ItemKind::Event, item, true).await?;
        Ok(keys)
    }
}
