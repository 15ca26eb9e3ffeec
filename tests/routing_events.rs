//! Webhook event batches turned into requests on the event sink desk.

mod support;

use std::sync::{Arc, Mutex};

use serde_json::json;

use inbound_router::dedup::NotifiedSenders;
use inbound_router::error::{ConfigError, DatabaseError, Error};
use inbound_router::mailer::Replies;
use inbound_router::routing::{Router, RoutingPolicy};
use inbound_router::scanner::NoopScanner;
use inbound_router::topology::Topology;

use support::*;

fn batch(value: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&value).unwrap()
}

async fn handle(router: &Router, raw: &[u8]) -> Result<Vec<String>, Error> {
    router.handle_event(raw, 0, |_| async { Ok(()) }).await
}

fn router_with(topology: Topology, policy: RoutingPolicy) -> Router {
    Router::new(
        policy,
        Arc::new(topology),
        Replies::new(Arc::new(RecordingMailer::default()), false),
        Arc::new(NoopScanner),
        Box::new(NotifiedSenders::new()),
    )
}

#[tokio::test]
async fn every_event_becomes_a_request_on_the_sink() {
    let client = FakeTicketing::new();
    let router = router(topology(client.clone()), Arc::new(RecordingMailer::default()));

    let keys = handle(
        &router,
        &batch(json!([
            {"email": "bounce@customer.example", "event": "bounce"},
            {"whatever": true}
        ])),
    )
    .await
    .unwrap();
    assert_eq!(keys, ["SUP-1", "SUP-2"]);

    let creations = client.creations();
    assert_eq!(
        creations[0],
        Call::CreateRequest {
            desk_id: EVENT_DESK_ID.into(),
            summary: "Sendgrid: bounce bounce@customer.example".into(),
            reporter: Some("automation".into()),
        }
    );
    assert_eq!(
        creations[1],
        Call::CreateRequest {
            desk_id: EVENT_DESK_ID.into(),
            summary: "Unknown Event Type".into(),
            reporter: Some("automation".into()),
        }
    );
}

#[tokio::test]
async fn cve_files_are_uploaded_after_creation() {
    let client = FakeTicketing::new();
    let router = router(topology(client.clone()), Arc::new(RecordingMailer::default()));

    let keys = handle(
        &router,
        &batch(json!([{
            "type_field": "cve_scanner",
            "subject": "CVE-2024-1",
            "body": "openssl is vulnerable",
            "files": [
                {"name": "report.txt", "b64_data": "aGVsbG8="},
                {"name": "sbom.json", "b64_data": "e30="}
            ]
        }])),
    )
    .await
    .unwrap();
    assert_eq!(keys, ["SUP-1"]);
    assert!(client.calls().contains(&Call::Comment {
        key: "SUP-1".into(),
        body: String::new(),
        attachments: 2,
    }));
}

#[tokio::test]
async fn empty_event_username_creates_anonymously() {
    let client = FakeTicketing::new();
    let mut policy = policy();
    policy.event_username = String::new();
    let router = router_with(topology(client.clone()), policy);

    handle(&router, &batch(json!([{"summary": "cpu", "event_body": "load 40"}])))
        .await
        .unwrap();
    assert_eq!(
        client.creations(),
        [Call::CreateRequest {
            desk_id: EVENT_DESK_ID.into(),
            summary: "Sysdig: cpu".into(),
            reporter: None,
        }]
    );
}

#[tokio::test]
async fn failed_creation_aborts_the_batch_without_retry() {
    let client = FakeTicketing::new();
    client.fail_next_creates(1);
    let router = router(topology(client.clone()), Arc::new(RecordingMailer::default()));

    let result = handle(
        &router,
        &batch(json!([
            {"email": "a@customer.example", "event": "open"},
            {"email": "b@customer.example", "event": "open"}
        ])),
    )
    .await;
    assert!(matches!(result, Err(Error::Ticketing(_))));
    assert_eq!(client.creations().len(), 1);
}

#[tokio::test]
async fn batch_resumes_after_done_events_and_reports_progress() {
    let client = FakeTicketing::new();
    let router = router(topology(client.clone()), Arc::new(RecordingMailer::default()));
    let raw = batch(json!([
        {"email": "one@customer.example", "event": "bounce"},
        {"email": "two@customer.example", "event": "bounce"},
        {"email": "three@customer.example", "event": "bounce"}
    ]));

    let progress = Mutex::new(Vec::new());
    let keys = router
        .handle_event(&raw, 1, |done| {
            progress.lock().unwrap().push(done);
            async { Ok(()) }
        })
        .await
        .unwrap();

    assert_eq!(keys, ["SUP-1", "SUP-2"]);
    assert_eq!(*progress.lock().unwrap(), [2, 3]);
    assert!(matches!(
        &client.creations()[0],
        Call::CreateRequest { summary, .. } if summary == "Sendgrid: bounce two@customer.example"
    ));
}

#[tokio::test]
async fn progress_failure_stops_the_batch() {
    let client = FakeTicketing::new();
    let router = router(topology(client.clone()), Arc::new(RecordingMailer::default()));
    let raw = batch(json!([
        {"email": "one@customer.example", "event": "bounce"},
        {"email": "two@customer.example", "event": "bounce"}
    ]));

    let result = router
        .handle_event(&raw, 0, |_| async {
            Err(Error::Database(DatabaseError::Query("disk full".into())))
        })
        .await;
    assert!(matches!(result, Err(Error::Database(_))));
    assert_eq!(client.creations().len(), 1);
}

#[tokio::test]
async fn batch_must_be_a_json_array() {
    let client = FakeTicketing::new();
    let router = router(topology(client.clone()), Arc::new(RecordingMailer::default()));

    assert!(matches!(
        handle(&router, b"{\"email\": \"a@x\"}").await,
        Err(Error::Parse(_))
    ));
    assert!(client.calls().is_empty());
}

#[tokio::test]
async fn missing_event_sink_is_a_configuration_error() {
    let client = FakeTicketing::new();
    let mut inst = installation(client.clone(), support_desk());
    inst.desks.truncate(1);
    let router = router_with(Topology::new(vec![inst]).unwrap(), policy());

    let result = router.create_event_request("{}").await;
    assert!(matches!(
        result,
        Err(Error::Config(ConfigError::MissingRequired { .. }))
    ));
    assert!(client.calls().is_empty());
}
