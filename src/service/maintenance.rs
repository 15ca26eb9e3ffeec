//! Maintenance triggers: `SIGHUP` and an optional cron schedule.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info};

use super::InboundService;

/// Next fire time of a schedule after `now`.
pub fn next_run(schedule: &Schedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&now).next()
}

/// Run maintenance on every `SIGHUP`.
pub fn spawn_sighup(service: Arc<InboundService>) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let mut hangups = signal(SignalKind::hangup())?;
    Ok(tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            info!("Received SIGHUP");
            service.maintenance().await;
        }
    }))
}

/// Run maintenance whenever `expression` fires.
pub fn spawn_schedule(
    service: Arc<InboundService>,
    expression: &str,
) -> Result<tokio::task::JoinHandle<()>, cron::error::Error> {
    let schedule = Schedule::from_str(expression)?;
    let expression = expression.to_string();
    Ok(tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let Some(next) = next_run(&schedule, now) else {
                error!(schedule = %expression, "Schedule has no future runs, stopping");
                return;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            info!(next = %next, "Next scheduled maintenance");
            tokio::time::sleep(wait).await;
            service.maintenance().await;
        }
    }))
}
