use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use raftfuzz::guider::{Guider, LineCoverageGuider, TlcStateGuider, TraceCoverageGuider};
use raftfuzz::schedule::{Event, TimeoutKind};
use raftfuzz::tlc::TlcClient;

fn deliver(from: u64, to: u64, term: u64) -> Event {
    Event::DeliverMessage {
        from,
        to,
        msg_type: "MsgAppend".to_string(),
        term,
        index: 0,
        entries: 0,
    }
}

async fn mock_tlc(server: &MockServer, states: &[&str]) {
    let keys: Vec<String> = states.iter().map(|s| format!("key-{s}")).collect();
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "States": states, "Keys": keys })),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn tlc_client_parses_states_and_appends_reset() {
    let server = MockServer::start().await;
    mock_tlc(&server, &["s0", "s1"]).await;

    let client = TlcClient::new(&server.uri());
    let states = client.send_trace(&[deliver(1, 2, 1)]).await.unwrap();

    assert_eq!(states.len(), 2);
    assert_eq!(states[0].repr, "s0");
    assert_eq!(states[1].key, "key-s1");

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let events = body.as_array().unwrap();
    assert_eq!(events.len(), 2, "trace plus the Reset sentinel");
    assert_eq!(events[0]["name"], "DeliverMessage");
    assert_eq!(events.last().unwrap()["name"], "Reset");
}

#[tokio::test]
async fn tlc_client_rejects_mismatched_arity() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "States": ["s0"], "Keys": ["k0", "k1"] })),
        )
        .mount(&server)
        .await;

    let client = TlcClient::new(&server.uri());
    let err = client.send_trace(&[]).await.unwrap_err();
    assert!(err.to_string().contains("mismatched"));
}

#[tokio::test]
async fn state_guider_counts_exactly_the_new_keys() {
    let server = MockServer::start().await;
    mock_tlc(&server, &["s0", "s1"]).await;

    let mut guider = TlcStateGuider::new(&server.uri());
    let events = vec![deliver(1, 2, 1)];

    let (new_units, novelty) = guider.check(&vec![], &events).await;
    assert_eq!(new_units, 2);
    assert!((novelty - 1.0).abs() < f64::EPSILON);
    assert_eq!(guider.coverage(), 2);

    // The same states again contribute nothing.
    let (new_units, novelty) = guider.check(&vec![], &events).await;
    assert_eq!(new_units, 0);
    assert_eq!(novelty, 0.0);
    assert_eq!(guider.coverage(), 2);
}

#[tokio::test]
async fn state_guider_absorbs_server_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/execute"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mut guider = TlcStateGuider::new(&server.uri());
    let (new_units, novelty) = guider.check(&vec![], &[deliver(1, 2, 1)]).await;
    assert_eq!((new_units, novelty), (0, 0.0));
    assert_eq!(guider.failures(), 1);
    assert_eq!(guider.coverage(), 0);
}

#[tokio::test]
async fn state_guider_reset_clears_coverage() {
    let server = MockServer::start().await;
    mock_tlc(&server, &["s0"]).await;

    let mut guider = TlcStateGuider::new(&server.uri());
    guider.check(&vec![], &[deliver(1, 2, 1)]).await;
    assert_eq!(guider.coverage(), 1);

    guider.reset();
    assert_eq!(guider.coverage(), 0);
    let (new_units, _) = guider.check(&vec![], &[deliver(1, 2, 1)]).await;
    assert_eq!(new_units, 1, "a reset guider re-learns old states");
}

#[tokio::test]
async fn trace_guider_scores_distinct_canonical_traces_once() {
    let server = MockServer::start().await;
    mock_tlc(&server, &["s0"]).await;

    let mut guider = TraceCoverageGuider::new(&server.uri());
    let first = vec![deliver(1, 2, 1)];
    let second = vec![deliver(1, 2, 1), deliver(2, 3, 1)];

    assert_eq!(guider.check(&vec![], &first).await.0, 1);
    assert_eq!(guider.check(&vec![], &second).await.0, 1);
    assert_eq!(guider.check(&vec![], &first).await.0, 0);
    assert_eq!(guider.coverage(), 2);
}

#[tokio::test]
async fn trace_guider_ignores_payload_noise() {
    let server = MockServer::start().await;
    mock_tlc(&server, &["s0"]).await;

    let mut guider = TraceCoverageGuider::new(&server.uri());
    let base = vec![deliver(1, 2, 1)];
    let noisy = vec![Event::DeliverMessage {
        from: 1,
        to: 2,
        msg_type: "MsgAppend".to_string(),
        term: 1,
        index: 42,
        entries: 7,
    }];

    assert_eq!(guider.check(&vec![], &base).await.0, 1);
    assert_eq!(
        guider.check(&vec![], &noisy).await.0,
        0,
        "log offsets and batch sizes must not create new traces"
    );
}

/// Serves a growing set of covered lines, as a SUT accumulating coverage
/// across iterations would.
struct GrowingCoverage(AtomicUsize);

impl Respond for GrowingCoverage {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let calls = self.0.fetch_add(1, Ordering::SeqCst);
        let lines: Vec<String> = (0..=calls).map(|line| format!("raft.go:{line}")).collect();
        ResponseTemplate::new(200).set_body_json(lines)
    }
}

#[tokio::test]
async fn line_guider_diffs_against_its_union() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/coverage"))
        .respond_with(GrowingCoverage(AtomicUsize::new(0)))
        .mount(&server)
        .await;

    let mut guider = LineCoverageGuider::new(&server.uri());
    assert_eq!(guider.check(&vec![], &[]).await.0, 1);
    assert_eq!(guider.check(&vec![], &[]).await.0, 1);
    assert_eq!(guider.check(&vec![], &[]).await.0, 1);
    assert_eq!(guider.coverage(), 3);
}

#[tokio::test]
async fn line_guider_absorbs_endpoint_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/coverage"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut guider = LineCoverageGuider::new(&server.uri());
    assert_eq!(guider.check(&vec![], &[]).await, (0, 0.0));
    assert_eq!(guider.failures(), 1);
}

#[tokio::test]
async fn timeout_kinds_serialize_lowercase() {
    let event = Event::Timeout {
        node: 1,
        kind: TimeoutKind::Heartbeat,
    };
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["kind"], "heartbeat");
}
