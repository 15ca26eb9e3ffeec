use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use inbound_router::config::Config;
use inbound_router::dedup::NotifiedSenders;
use inbound_router::logging;
use inbound_router::mailer::{CriticalReporter, MailSender, Replies, SmtpMailer};
use inbound_router::routing::{Router, RoutingPolicy};
use inbound_router::scanner::{ClamdScanner, MalwareScanner, NoopScanner};
use inbound_router::service::http::{self, AppState};
use inbound_router::service::{DumpDir, InboundService, ServiceOptions, maintenance};
use inbound_router::store::{HandledStore, LibSqlBackend};
use inbound_router::topology::{self, Topology};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let mut config = Config::load().context("loading configuration")?;
    let _log_guard = logging::init(&config.dump_dir, config.email_keep_days)?;

    eprintln!("inbound-router v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Dump dir: {}", config.dump_dir.display());
    eprintln!(
        "   dump_requests={} parse_requests={} send_emails={} handle_events={}",
        config.dump_requests, config.parse_requests, config.send_emails, config.handle_events
    );

    // ── Database ─────────────────────────────────────────────────────────
    let db_path = config.db_path();
    let store: Arc<dyn HandledStore> = Arc::new(
        LibSqlBackend::new_local(&db_path)
            .await
            .with_context(|| format!("opening database at {}", db_path.display()))?,
    );
    eprintln!("   Database: {}", db_path.display());

    // ── Topology ─────────────────────────────────────────────────────────
    let topology = if config.debug_parse_only {
        Topology::new(Vec::new())?
    } else {
        topology::connect(&config)
            .await
            .context("connecting installations")?
    };
    eprintln!(
        "   Installations: {}, desks: {}",
        topology.installations().len(),
        topology.desks().count()
    );

    let scanner: Arc<dyn MalwareScanner> = if config.check_malware {
        let clamd = ClamdScanner::new(&config.clamav_address);
        clamd
            .wait_ready(Duration::from_secs(2), 90)
            .await
            .context("waiting for clamd")?;
        Arc::new(clamd)
    } else {
        Arc::new(NoopScanner)
    };

    // ── Mail ─────────────────────────────────────────────────────────────
    let mailer: Arc<dyn MailSender> = Arc::new(SmtpMailer::new(
        &config.send_email_host,
        config.send_email_port,
    ));
    let reporter = Arc::new(if config.critical_mail_enabled() {
        CriticalReporter::with_mail(
            mailer.clone(),
            &config.critical_mail_from,
            &config.critical_mail_to,
        )
    } else {
        CriticalReporter::log_only()
    });

    let router = Router::new(
        RoutingPolicy::from_config(&config),
        Arc::new(topology),
        Replies::new(mailer, config.send_emails),
        scanner,
        Box::new(NotifiedSenders::new()),
    );
    let service = Arc::new(InboundService::new(
        router,
        store,
        DumpDir::new(&config.dump_dir),
        reporter,
        ServiceOptions {
            parse_requests: config.parse_requests,
            handle_events: config.handle_events,
            email_keep_days: config.email_keep_days,
        },
    ));
    service.reporter().notice("inbound-router (re)started").await;

    if !config.dump_requests {
        let replayed = service.replay_all_dumps().await?;
        info!(replayed, "Offline replay finished");
        return Ok(());
    }

    if config.parse_requests {
        service.replay_unhandled().await?;
    }

    maintenance::spawn_sighup(service.clone())?;
    if let Some(expression) = &config.maintenance_schedule {
        maintenance::spawn_schedule(service.clone(), expression)?;
        eprintln!("   Maintenance: {expression}");
    }

    let token = config
        .inbound_token
        .take()
        .context("inbound_token is required when dump_requests is set")?;
    let app = http::router(
        AppState::new(service, token),
        config.handle_events,
        config.max_body_bytes,
    );
    let listener = tokio::net::TcpListener::bind((config.bind_address.as_str(), config.port))
        .await
        .with_context(|| format!("binding {}:{}", config.bind_address, config.port))?;
    eprintln!(
        "   Listening on http://{}:{}/inbound\n",
        config.bind_address, config.port
    );
    info!(port = config.port, "Inbound server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down");
        })
        .await?;
    Ok(())
}
