//! The message router: single inbound entry point for every extension
//! context.
//!
//! Peers connect over a loopback WebSocket and exchange the typed frames in
//! [`protocol`]. Dispatch is an exhaustive match over the closed request
//! union. Handlers that answer from local state reply inline; handlers that
//! involve remote I/O run in their own task and reply through the peer's
//! outbound queue — every request gets exactly one reply either way, and
//! concurrent requests on one connection never serialize behind each other's
//! remote calls.

pub mod event;
pub mod handlers;
pub mod protocol;

use crate::AppContext;
use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use protocol::{Envelope, ErrorCode, Request, WireError};

// ─── Server ──────────────────────────────────────────────────────────────────

pub async fn run(ctx: Arc<AppContext>) -> Result<()> {
    let addr = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "coordinator listening (WebSocket + HTTP health on same port)");

    spawn_idle_peer_sweep(ctx.clone());

    // Graceful shutdown: resolve on SIGTERM (Unix) or Ctrl-C (all platforms).
    // Pinned so we can use it in the select! loop without moving.
    let shutdown = make_shutdown_future();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("shutdown signal received — stopping coordinator");
                break;
            }

            conn = listener.accept() => {
                let (stream, peer) = match conn {
                    Ok(c) => c,
                    Err(e) => {
                        error!(err = %e, "accept error");
                        continue;
                    }
                };
                debug!(peer = %peer, "new connection");
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, ctx).await {
                        warn!(peer = %peer, err = %e, "connection error");
                    }
                });
            }
        }
    }

    info!("coordinator stopped");
    Ok(())
}

/// Logs content peers that have gone silent. Silence is only ever logged —
/// a tab that stops probing keeps its state and its connection.
fn spawn_idle_peer_sweep(ctx: Arc<AppContext>) {
    let idle_secs = ctx.config.liveness.idle_log_secs;
    if idle_secs == 0 {
        return;
    }
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(idle_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            for (tab_id, age_secs) in ctx.peers.idle_content_tabs(idle_secs) {
                debug!(tab_id, age_secs, "content peer has not probed recently");
            }
        }
    });
}

/// Respond to an HTTP `GET /health` request with a JSON status document.
///
/// The coordinator shares its port between WebSocket frames and a plain
/// HTTP health endpoint so probes work without a WS library.
async fn handle_health_check(mut stream: tokio::net::TcpStream, ctx: &AppContext) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    // Consume the request (we don't inspect it — any GET /health is fine).
    let mut req_buf = vec![0u8; 2048];
    let _ = stream.read(&mut req_buf).await;

    let body = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": ctx.started_at.elapsed().as_secs(),
        "peers": ctx.peers.registered_count(),
    });
    let body_str = body.to_string();
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body_str.len(),
        body_str
    );
    stream.write_all(response.as_bytes()).await?;
    Ok(())
}

/// Returns a future that resolves when a shutdown signal is received.
///
/// On Unix we listen for SIGTERM *and* Ctrl-C.
/// On other platforms we listen for Ctrl-C only.
async fn make_shutdown_future() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

// ─── Connections ─────────────────────────────────────────────────────────────

async fn handle_connection(stream: tokio::net::TcpStream, ctx: Arc<AppContext>) -> Result<()> {
    // Peek at the first bytes to distinguish HTTP health checks from
    // WebSocket upgrades (both share the port and both start with "GET ").
    let mut peek_buf = [0u8; 12];
    let n = stream.peek(&mut peek_buf).await.unwrap_or(0);
    if n >= 11 && &peek_buf[..11] == b"GET /health" {
        return handle_health_check(stream, &ctx).await;
    }

    let ws = accept_async(stream).await?;
    let (mut sink, mut stream) = ws.split();

    let peer_id = Uuid::new_v4();
    // Everything outbound — replies, pushes — funnels through one queue so
    // the sink has a single writer.
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let mut broadcast_rx = ctx.broadcaster.subscribe();

    loop {
        tokio::select! {
            // Incoming frame from this peer
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        dispatch_text(&text, peer_id, &outbound_tx, &ctx).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(err = %e, "ws error");
                        break;
                    }
                    _ => {}
                }
            }
            // Reply or tab-scoped push for this peer
            frame = outbound_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if let Err(e) = sink.send(Message::Text(frame)).await {
                            warn!(err = %e, "send error");
                            break;
                        }
                    }
                    None => break,
                }
            }
            // Unscoped broadcast event
            event = broadcast_rx.recv() => {
                match event {
                    Ok(frame) => {
                        if let Err(e) = sink.send(Message::Text(frame)).await {
                            warn!(err = %e, "broadcast send error");
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "broadcast lagged");
                    }
                }
            }
        }
    }

    ctx.peers.unregister(peer_id);
    debug!(peer = %peer_id, "peer disconnected");
    Ok(())
}

// ─── Dispatch ────────────────────────────────────────────────────────────────

/// One reply per request, delivered through the peer's outbound queue.
/// Consuming `self` is what makes "exactly one" hold.
pub(crate) struct Responder {
    id: u64,
    outbound: mpsc::UnboundedSender<String>,
}

impl Responder {
    pub(crate) fn ok(self, result: Value) {
        let _ = self.outbound.send(protocol::reply(self.id, result));
    }

    pub(crate) fn err(self, err: WireError) {
        let _ = self.outbound.send(protocol::error_reply(Some(self.id), &err));
    }
}

async fn dispatch_text(
    text: &str,
    peer_id: Uuid,
    outbound: &mpsc::UnboundedSender<String>,
    ctx: &Arc<AppContext>,
) {
    // Two-step parse so a malformed request still answers with its id.
    let raw: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            let err = WireError::new(ErrorCode::Parse, e.to_string());
            let _ = outbound.send(protocol::error_reply(None, &err));
            return;
        }
    };
    let id = raw.get("id").and_then(Value::as_u64);
    let envelope: Envelope = match serde_json::from_value(raw) {
        Ok(e) => e,
        Err(e) => {
            let err = WireError::new(ErrorCode::Parse, e.to_string());
            let _ = outbound.send(protocol::error_reply(id, &err));
            return;
        }
    };

    debug!(peer = %peer_id, id = envelope.id, "dispatch");
    let responder = Responder {
        id: envelope.id,
        outbound: outbound.clone(),
    };

    match envelope.request {
        Request::Hello { context, tab_id } => {
            if context == protocol::ContextKind::Content && tab_id.is_none() {
                return responder.err(WireError::new(
                    ErrorCode::Validation,
                    "content-script peers must register with a tabId",
                ));
            }
            ctx.peers.register(peer_id, context, tab_id, outbound.clone());
            responder.ok(json!({ "registered": true }));
        }

        // Liveness ack: zero payload in, zero payload out, never any I/O.
        Request::Ping => {
            ctx.peers.note_probe(peer_id);
            responder.ok(json!({ "pong": true }));
        }

        Request::GetAuthState => responder.ok(handlers::auth::auth_state(ctx)),

        Request::GetResultForTab { tab_id } => {
            responder.ok(handlers::analysis::result_for_tab(ctx, tab_id).await)
        }

        Request::SignIn => {
            tokio::spawn(handlers::auth::sign_in(ctx.clone(), responder));
        }

        Request::SignOut => {
            tokio::spawn(handlers::auth::sign_out(ctx.clone(), responder));
        }

        Request::ProcessText {
            url,
            article_text,
            tab_id,
        } => handlers::analysis::process_text(ctx, peer_id, url, article_text, tab_id, responder),

        Request::ProcessMediaItem {
            media_url,
            media_kind,
            item_id,
            tab_id,
        } => handlers::analysis::process_media_item(
            ctx, peer_id, media_url, media_kind, item_id, tab_id, responder,
        ),
    }
}
