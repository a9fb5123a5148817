//! Integration tests for the truthd coordinator.
//! Spins up a real daemon on a free port and drives it over WebSocket, with
//! wiremock standing in for the analysis backend and the identity provider.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use truthd::config::CoordinatorConfig;
use truthd::ipc::event::EventBroadcaster;
use truthd::liveness::{self, ProbeOptions};
use truthd::session::identity::HttpIdentityBroker;
use truthd::{ipc, AppContext};

type Ws = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct TestDaemon {
    ws_url: String,
    addr: String,
    ctx: Arc<AppContext>,
    _data_dir: tempfile::TempDir,
}

fn get_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a daemon on a random port, pointing every remote URL at `server`.
async fn start_daemon(
    server: &MockServer,
    tweak: impl FnOnce(&mut CoordinatorConfig),
) -> TestDaemon {
    let data_dir = tempfile::tempdir().unwrap();
    let port = get_free_port();

    let mut config = CoordinatorConfig::new(
        Some(port),
        Some(data_dir.path().to_path_buf()),
        Some("warn".to_string()),
        None,
    );
    let base = server.uri();
    config.backend.api_base_url = base.clone();
    config.identity.device_authorization_url = format!("{base}/device/code");
    config.identity.token_url = format!("{base}/token");
    config.identity.userinfo_url = format!("{base}/userinfo");
    config.identity.revocation_url = format!("{base}/revoke");
    config.identity.client_id = "test-client".to_string();
    // Keep the OS keychain out of tests.
    config.identity.remember_credentials = false;
    tweak(&mut config);

    let broadcaster = Arc::new(EventBroadcaster::new());
    let broker = Arc::new(HttpIdentityBroker::new(
        config.identity.clone(),
        broadcaster.clone(),
    ));
    let ctx = Arc::new(AppContext::build(config, broadcaster, broker));

    let ctx_server = ctx.clone();
    tokio::spawn(async move {
        ipc::run(ctx_server).await.ok();
    });

    let addr = format!("127.0.0.1:{port}");
    liveness::wait_until_ready(
        &addr,
        ProbeOptions {
            interval: Duration::from_millis(20),
            max_attempts: Some(250),
        },
    )
    .await
    .expect("daemon did not become ready");

    TestDaemon {
        ws_url: format!("ws://{addr}"),
        addr,
        ctx,
        _data_dir: data_dir,
    }
}

async fn connect(daemon: &TestDaemon) -> Ws {
    let (ws, _) = connect_async(&daemon.ws_url).await.expect("ws connect");
    ws
}

async fn send(ws: &mut Ws, frame: Value) {
    ws.send(Message::Text(frame.to_string())).await.unwrap();
}

/// Next reply carrying `id`, skipping any events that arrive in between.
async fn recv_reply(ws: &mut Ws, id: u64) -> Value {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let frame: Value = serde_json::from_str(&text).unwrap();
                    if frame.get("id").and_then(Value::as_u64) == Some(id) {
                        return frame;
                    }
                }
                Some(Ok(_)) => continue,
                other => panic!("connection ended while waiting for reply: {other:?}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for reply {id}"))
}

/// Next push/broadcast frame tagged with `event`, skipping everything else.
async fn recv_event(ws: &mut Ws, event: &str) -> Value {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    let frame: Value = serde_json::from_str(&text).unwrap();
                    if frame.get("event").and_then(Value::as_str) == Some(event) {
                        return frame;
                    }
                }
                Some(Ok(_)) => continue,
                other => panic!("connection ended while waiting for event: {other:?}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for event {event}"))
}

async fn rpc(ws: &mut Ws, id: u64, frame: Value) -> Value {
    let mut frame = frame;
    frame["id"] = json!(id);
    send(ws, frame).await;
    recv_reply(ws, id).await
}

async fn hello_content(ws: &mut Ws, tab_id: i64) {
    let reply = rpc(ws, 1, json!({ "action": "hello", "context": "content", "tabId": tab_id })).await;
    assert_eq!(reply["ok"], true);
}

async fn hello_popup(ws: &mut Ws) {
    let reply = rpc(ws, 1, json!({ "action": "hello", "context": "popup" })).await;
    assert_eq!(reply["ok"], true);
}

/// Mounts a complete happy-path identity provider (device flow + profile).
async fn mount_identity(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/device/code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "device_code": "dc-1",
            "user_code": "ABCD-EFGH",
            "verification_uri": "https://example.com/activate",
            "expires_in": 30,
            "interval": 1
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "tok-1"
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "email": "user@example.com",
            "name": "Test User",
            "picture": "https://example.com/p.png"
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/revoke"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

async fn sign_in(ws: &mut Ws) -> Value {
    rpc(ws, 900, json!({ "action": "signIn" })).await
}

fn long_article() -> String {
    "World leaders gathered today to sign a historic climate agreement aimed at \
     reducing carbon emissions by half over the next decade."
        .to_string()
}

// ─── Liveness ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_endpoint_answers_probes() {
    let server = MockServer::start().await;
    let daemon = start_daemon(&server, |_| {}).await;

    let report = liveness::probe(&daemon.addr).await.unwrap();
    assert_eq!(report.status, "ok");
    assert_eq!(report.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn ping_acks_before_any_registration() {
    let server = MockServer::start().await;
    let daemon = start_daemon(&server, |_| {}).await;

    let mut ws = connect(&daemon).await;
    let reply = rpc(&mut ws, 1, json!({ "action": "ping" })).await;
    assert_eq!(reply["ok"], true);
    assert_eq!(reply["result"]["pong"], true);
}

#[tokio::test]
async fn capped_probe_fails_cleanly_when_nothing_listens() {
    let port = get_free_port();
    let err = liveness::wait_until_ready(
        &format!("127.0.0.1:{port}"),
        ProbeOptions {
            interval: Duration::from_millis(10),
            max_attempts: Some(3),
        },
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("not ready"));
}

// ─── Router contract ─────────────────────────────────────────────────────────

#[tokio::test]
async fn content_hello_requires_a_tab() {
    let server = MockServer::start().await;
    let daemon = start_daemon(&server, |_| {}).await;

    let mut ws = connect(&daemon).await;
    let reply = rpc(&mut ws, 1, json!({ "action": "hello", "context": "content" })).await;
    assert_eq!(reply["ok"], false);
    assert_eq!(reply["error"]["code"], "VALIDATION");
}

#[tokio::test]
async fn every_request_gets_exactly_one_reply() {
    let server = MockServer::start().await;
    let daemon = start_daemon(&server, |_| {}).await;

    let mut ws = connect(&daemon).await;
    send(&mut ws, json!({ "id": 1, "action": "ping" })).await;
    send(&mut ws, json!({ "id": 2, "action": "getAuthState" })).await;
    send(&mut ws, json!({ "id": 3, "action": "noSuchAction" })).await;
    send(&mut ws, json!({ "id": 4, "action": "getResultForTab", "tabId": 1 })).await;

    let mut seen = std::collections::HashMap::new();
    while seen.len() < 4 {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out collecting replies")
            .unwrap()
            .unwrap();
        if let Message::Text(text) = frame {
            let value: Value = serde_json::from_str(&text).unwrap();
            if let Some(id) = value.get("id").and_then(Value::as_u64) {
                *seen.entry(id).or_insert(0u32) += 1;
            }
        }
    }
    assert_eq!(seen.len(), 4);
    assert!(seen.values().all(|&count| count == 1));

    // The unknown action still answered with its id and a parse error.
    let reply = rpc(&mut ws, 9, json!({ "action": "noSuchAction" })).await;
    assert_eq!(reply["error"]["code"], "PARSE");
}

#[tokio::test]
async fn ui_surface_requests_need_an_explicit_tab() {
    let server = MockServer::start().await;
    let daemon = start_daemon(&server, |_| {}).await;

    let mut ws = connect(&daemon).await;
    hello_popup(&mut ws).await;
    let reply = rpc(
        &mut ws,
        2,
        json!({ "action": "processText", "url": "https://x", "articleText": long_article() }),
    )
    .await;
    assert_eq!(reply["ok"], false);
    assert_eq!(reply["error"]["code"], "VALIDATION");
}

// ─── Session lifecycle ───────────────────────────────────────────────────────

#[tokio::test]
async fn sign_in_completes_the_device_flow() {
    let server = MockServer::start().await;
    mount_identity(&server).await;
    let daemon = start_daemon(&server, |_| {}).await;

    let mut popup = connect(&daemon).await;
    hello_popup(&mut popup).await;
    // A second surface that only listens — it must hear the broadcasts.
    let mut observer = connect(&daemon).await;

    let state = rpc(&mut popup, 2, json!({ "action": "getAuthState" })).await;
    assert_eq!(state["result"]["isSignedIn"], false);

    send(&mut popup, json!({ "id": 3, "action": "signIn" })).await;
    // The prompt reaches UI surfaces before the grant completes.
    let prompt = recv_event(&mut observer, "signInPrompt").await;
    assert_eq!(prompt["userCode"], "ABCD-EFGH");

    let reply = recv_reply(&mut popup, 3).await;
    assert_eq!(reply["ok"], true);
    assert_eq!(reply["result"]["profile"]["email"], "user@example.com");

    let changed = recv_event(&mut observer, "sessionChanged").await;
    assert_eq!(changed["authState"]["isSignedIn"], true);

    let state = rpc(&mut popup, 4, json!({ "action": "getAuthState" })).await;
    assert_eq!(state["result"]["isSignedIn"], true);
    assert_eq!(state["result"]["profile"]["displayName"], "Test User");
}

#[tokio::test]
async fn concurrent_sign_in_reaches_the_provider_once() {
    let server = MockServer::start().await;
    // Only the device-code call is slowed down; everything else is instant.
    Mock::given(method("POST"))
        .and(path("/device/code"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(500))
                .set_body_json(json!({
                    "device_code": "dc-1",
                    "user_code": "ABCD-EFGH",
                    "verification_uri": "https://example.com/activate",
                    "expires_in": 30,
                    "interval": 1
                })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "tok-1" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "email": "user@example.com" })))
        .mount(&server)
        .await;

    let daemon = start_daemon(&server, |_| {}).await;
    let mut ws = connect(&daemon).await;
    hello_popup(&mut ws).await;

    send(&mut ws, json!({ "id": 10, "action": "signIn" })).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    send(&mut ws, json!({ "id": 11, "action": "signIn" })).await;

    // The second call fails immediately, while the first is still in flight.
    let second = recv_reply(&mut ws, 11).await;
    assert_eq!(second["ok"], false);
    assert_eq!(second["error"]["message"], "sign-in already in progress");

    let first = recv_reply(&mut ws, 10).await;
    assert_eq!(first["ok"], true);
}

#[tokio::test]
async fn sign_out_clears_the_session() {
    let server = MockServer::start().await;
    mount_identity(&server).await;
    let daemon = start_daemon(&server, |_| {}).await;

    let mut ws = connect(&daemon).await;
    hello_popup(&mut ws).await;
    assert_eq!(sign_in(&mut ws).await["ok"], true);

    let reply = rpc(&mut ws, 5, json!({ "action": "signOut" })).await;
    assert_eq!(reply["ok"], true);

    let state = rpc(&mut ws, 6, json!({ "action": "getAuthState" })).await;
    assert_eq!(state["result"]["isSignedIn"], false);
    assert!(state["result"]["profile"].is_null());
}

// ─── Text pipeline ───────────────────────────────────────────────────────────

#[tokio::test]
async fn scenario_a_short_text_is_skipped_without_network() {
    let server = MockServer::start().await;
    let daemon = start_daemon(&server, |_| {}).await;

    let mut ws = connect(&daemon).await;
    hello_content(&mut ws, 42).await;

    let reply = rpc(
        &mut ws,
        2,
        json!({ "action": "processText", "url": "https://x", "articleText": "short" }),
    )
    .await;
    assert_eq!(reply["ok"], true);
    assert_eq!(reply["result"]["status"], "skipped");

    // No remote call was made and no record was created.
    assert!(server.received_requests().await.unwrap().is_empty());
    assert!(daemon.ctx.tabs.snapshot(42).await.is_none());
}

#[tokio::test]
async fn unauthenticated_text_is_answered_and_pushed_to_the_tab() {
    let server = MockServer::start().await;
    let daemon = start_daemon(&server, |_| {}).await;

    let mut ws = connect(&daemon).await;
    hello_content(&mut ws, 5).await;

    let reply = rpc(
        &mut ws,
        2,
        json!({ "action": "processText", "url": "https://x", "articleText": long_article() }),
    )
    .await;
    assert_eq!(reply["ok"], false);
    assert_eq!(reply["error"]["code"], "AUTH_REQUIRED");

    let push = recv_event(&mut ws, "analysisError").await;
    assert_eq!(push["message"], "authentication required");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn scenario_b_text_success_runs_the_dependent_call_on_identical_input() {
    let server = MockServer::start().await;
    mount_identity(&server).await;

    let article = long_article();
    let truncated: String = article.chars().take(60).collect();

    Mock::given(method("POST"))
        .and(path("/analyze"))
        .and(body_partial_json(json!({ "url": "https://x", "text": truncated })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "textResult": { "label": "LABEL_1", "score": 0.91, "highlights": ["X"] }
        })))
        .expect(1)
        .mount(&server)
        .await;
    // The dependent call must receive the identical truncated text.
    Mock::given(method("POST"))
        .and(path("/analyze-sentiment"))
        .and(body_partial_json(json!({ "text": truncated })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sentimentBias": {
                "sentiment": "neutral",
                "sentimentScore": 0.1,
                "bias": "center",
                "biasScore": 0.2
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let daemon = start_daemon(&server, |config| {
        config.analysis.max_text_chars = 60;
    })
    .await;

    let mut popup = connect(&daemon).await;
    hello_popup(&mut popup).await;
    assert_eq!(sign_in(&mut popup).await["ok"], true);

    let mut content = connect(&daemon).await;
    hello_content(&mut content, 7).await;

    let reply = rpc(
        &mut content,
        2,
        json!({ "action": "processText", "url": "https://x", "articleText": article }),
    )
    .await;
    assert_eq!(reply["result"]["status"], "processingStarted");

    let highlights = recv_event(&mut content, "applyHighlights").await;
    assert_eq!(highlights["highlights"], json!(["X"]));
    recv_event(&mut content, "analysisComplete").await;
    recv_event(&mut content, "sentimentBiasComplete").await;

    let result = rpc(&mut content, 3, json!({ "action": "getResultForTab", "tabId": 7 })).await;
    assert_eq!(result["result"]["status"], "found");
    let data = &result["result"]["data"];
    assert_eq!(data["text"]["outcome"], "success");
    assert_eq!(data["text"]["value"]["label"], "LABEL_1");
    assert_eq!(data["text"]["value"]["score"], 0.91);
    assert_eq!(data["sentimentBias"]["outcome"], "success");
}

#[tokio::test]
async fn dependent_failure_never_retracts_the_text_success() {
    let server = MockServer::start().await;
    mount_identity(&server).await;
    Mock::given(method("POST"))
        .and(path("/analyze"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "textResult": { "label": "LABEL_0", "score": 0.66 }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/analyze-sentiment"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({ "error": "sentiment backend down" })),
        )
        .mount(&server)
        .await;

    let daemon = start_daemon(&server, |_| {}).await;
    let mut ws = connect(&daemon).await;
    hello_content(&mut ws, 7).await;
    assert_eq!(sign_in(&mut ws).await["ok"], true);

    rpc(
        &mut ws,
        2,
        json!({ "action": "processText", "url": "https://x", "articleText": long_article() }),
    )
    .await;
    let failure = recv_event(&mut ws, "sentimentBiasError").await;
    assert_eq!(failure["message"], "sentiment backend down");

    let result = rpc(&mut ws, 3, json!({ "action": "getResultForTab", "tabId": 7 })).await;
    let data = &result["result"]["data"];
    assert_eq!(data["text"]["outcome"], "success");
    assert_eq!(data["sentimentBias"]["outcome"], "failure");
    assert_eq!(data["sentimentBias"]["error"], "sentiment backend down");
}

// ─── Media pipeline ──────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_media_kind_is_rejected_without_network() {
    let server = MockServer::start().await;
    mount_identity(&server).await;
    let daemon = start_daemon(&server, |_| {}).await;

    let mut ws = connect(&daemon).await;
    hello_content(&mut ws, 3).await;
    assert_eq!(sign_in(&mut ws).await["ok"], true);

    let reply = rpc(
        &mut ws,
        2,
        json!({
            "action": "processMediaItem",
            "mediaUrl": "https://m/x.gif",
            "mediaKind": "gif",
            "itemId": "item-1"
        }),
    )
    .await;
    assert_eq!(reply["error"]["code"], "VALIDATION");

    let analysis_calls = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path().starts_with("/check-"))
        .count();
    assert_eq!(analysis_calls, 0);
}

#[tokio::test]
async fn scenario_c_entitlement_denied_keeps_the_session() {
    let server = MockServer::start().await;
    mount_identity(&server).await;
    Mock::given(method("POST"))
        .and(path("/check-image"))
        .respond_with(
            ResponseTemplate::new(403).set_body_json(json!({ "error": "paid tier required" })),
        )
        .mount(&server)
        .await;

    let daemon = start_daemon(&server, |_| {}).await;
    let mut ws = connect(&daemon).await;
    hello_content(&mut ws, 7).await;
    assert_eq!(sign_in(&mut ws).await["ok"], true);

    let reply = rpc(
        &mut ws,
        2,
        json!({
            "action": "processMediaItem",
            "mediaUrl": "https://m/pic.png",
            "mediaKind": "image",
            "itemId": "item-1"
        }),
    )
    .await;
    assert_eq!(reply["ok"], false);
    assert_eq!(reply["error"]["code"], "ENTITLEMENT_DENIED");
    assert_eq!(reply["error"]["message"], "paid tier required");

    // Session intact, failure stored against the media URL.
    let state = rpc(&mut ws, 3, json!({ "action": "getAuthState" })).await;
    assert_eq!(state["result"]["isSignedIn"], true);

    let result = rpc(&mut ws, 4, json!({ "action": "getResultForTab", "tabId": 7 })).await;
    let item = &result["result"]["data"]["media"]["https://m/pic.png"];
    assert_eq!(item["outcome"], "failure");
    assert_eq!(item["error"], "paid tier required");
}

#[tokio::test]
async fn credential_rejection_tears_down_the_session_but_keeps_artifacts() {
    let server = MockServer::start().await;
    mount_identity(&server).await;
    Mock::given(method("POST"))
        .and(path("/analyze"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "textResult": { "label": "LABEL_1", "score": 0.8 }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/analyze-sentiment"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sentimentBias": {
                "sentiment": "neutral",
                "sentimentScore": 0.0,
                "bias": "center",
                "biasScore": 0.0
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/check-video"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let daemon = start_daemon(&server, |_| {}).await;
    let mut ws = connect(&daemon).await;
    hello_content(&mut ws, 9).await;
    assert_eq!(sign_in(&mut ws).await["ok"], true);

    // Seed a durable text artifact first.
    rpc(
        &mut ws,
        2,
        json!({ "action": "processText", "url": "https://x", "articleText": long_article() }),
    )
    .await;
    recv_event(&mut ws, "sentimentBiasComplete").await;

    let reply = rpc(
        &mut ws,
        3,
        json!({
            "action": "processMediaItem",
            "mediaUrl": "https://m/v.mp4",
            "mediaKind": "video",
            "itemId": "item-9"
        }),
    )
    .await;
    assert_eq!(reply["error"]["code"], "AUTH_EXPIRED");

    // Global teardown…
    let state = rpc(&mut ws, 4, json!({ "action": "getAuthState" })).await;
    assert_eq!(state["result"]["isSignedIn"], false);
    let result = rpc(&mut ws, 5, json!({ "action": "getResultForTab", "tabId": 9 })).await;
    assert_eq!(result["result"]["status"], "signedOut");

    // …but the stored artifacts are stale-and-present, not wiped.
    let snapshot = daemon.ctx.tabs.snapshot(9).await.unwrap();
    assert!(snapshot.text.unwrap().is_success());
    assert!(snapshot.media.contains_key("https://m/v.mp4"));
}

#[tokio::test]
async fn concurrent_media_items_resolve_independently() {
    let server = MockServer::start().await;
    mount_identity(&server).await;
    // The slow item must not block or clobber the fast one.
    Mock::given(method("POST"))
        .and(path("/check-image"))
        .and(body_partial_json(json!({ "mediaUrl": "https://m/slow.png" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(400))
                .set_body_json(json!({ "summary": "slow looks authentic", "confidence": 0.7 })),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/check-image"))
        .and(body_partial_json(json!({ "mediaUrl": "https://m/fast.png" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "summary": "fast looks authentic",
            "confidence": 0.9
        })))
        .mount(&server)
        .await;

    let daemon = start_daemon(&server, |_| {}).await;
    let mut ws = connect(&daemon).await;
    hello_content(&mut ws, 12).await;
    assert_eq!(sign_in(&mut ws).await["ok"], true);

    send(
        &mut ws,
        json!({
            "id": 20,
            "action": "processMediaItem",
            "mediaUrl": "https://m/slow.png",
            "mediaKind": "image",
            "itemId": "item-slow"
        }),
    )
    .await;
    send(
        &mut ws,
        json!({
            "id": 21,
            "action": "processMediaItem",
            "mediaUrl": "https://m/fast.png",
            "mediaKind": "image",
            "itemId": "item-fast"
        }),
    )
    .await;

    // The fast item answers first despite being sent second.
    let fast = recv_reply(&mut ws, 21).await;
    assert_eq!(fast["result"]["status"], "success");
    let slow = recv_reply(&mut ws, 20).await;
    assert_eq!(slow["result"]["status"], "success");

    let result = rpc(&mut ws, 22, json!({ "action": "getResultForTab", "tabId": 12 })).await;
    let media = &result["result"]["data"]["media"];
    assert_eq!(media["https://m/slow.png"]["outcome"], "success");
    assert_eq!(media["https://m/fast.png"]["outcome"], "success");
    assert_eq!(
        media["https://m/fast.png"]["value"]["summary"],
        "fast looks authentic"
    );
}

// ─── Store sentinels ─────────────────────────────────────────────────────────

#[tokio::test]
async fn signed_out_wins_over_not_found() {
    let server = MockServer::start().await;
    mount_identity(&server).await;
    let daemon = start_daemon(&server, |_| {}).await;

    let mut ws = connect(&daemon).await;
    hello_popup(&mut ws).await;

    let before = rpc(&mut ws, 2, json!({ "action": "getResultForTab", "tabId": 99 })).await;
    assert_eq!(before["result"]["status"], "signedOut");

    assert_eq!(sign_in(&mut ws).await["ok"], true);

    let after = rpc(&mut ws, 3, json!({ "action": "getResultForTab", "tabId": 99 })).await;
    assert_eq!(after["result"]["status"], "notFound");
}
