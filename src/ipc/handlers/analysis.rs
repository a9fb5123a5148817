use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use super::classify_analysis;
use crate::ipc::protocol::{ErrorCode, MediaKind, Push, TabId, WireError};
use crate::ipc::Responder;
use crate::AppContext;

/// Resolves which tab a request is about: implicit from the sender for
/// content-script peers, explicit from the payload for UI surfaces.
fn scope_tab(
    ctx: &AppContext,
    peer_id: Uuid,
    explicit: Option<TabId>,
) -> Result<TabId, WireError> {
    if let Some(tab_id) = ctx.peers.tab_of(peer_id) {
        return Ok(tab_id);
    }
    explicit.ok_or_else(|| {
        WireError::new(
            ErrorCode::Validation,
            "tabId is required for requests from UI surfaces",
        )
    })
}

/// `processText` — undersized payloads are skipped without any network
/// call; a missing session is answered *and* pushed to the tab; otherwise
/// the pipeline runs in its own task and the caller learns it started.
pub(crate) fn process_text(
    ctx: &Arc<AppContext>,
    peer_id: Uuid,
    url: String,
    article_text: String,
    explicit_tab: Option<TabId>,
    responder: Responder,
) {
    let tab_id = match scope_tab(ctx, peer_id, explicit_tab) {
        Ok(tab_id) => tab_id,
        Err(e) => return responder.err(e),
    };

    if article_text.trim().chars().count() < ctx.orchestrator.min_text_len() {
        return responder.ok(json!({ "status": "skipped" }));
    }

    if !ctx.session.is_signed_in() {
        ctx.peers.push_to_tab(
            tab_id,
            &Push::AnalysisError {
                message: "authentication required".to_string(),
                item_id: None,
            },
        );
        return responder.err(WireError::new(
            ErrorCode::AuthRequired,
            "authentication required",
        ));
    }

    let ctx = ctx.clone();
    tokio::spawn(async move {
        ctx.orchestrator
            .analyze_text(tab_id, &url, &article_text)
            .await;
    });
    responder.ok(json!({ "status": "processingStarted" }));
}

/// `processMediaItem` — shape and media-kind validation happen before any
/// network traffic; the analysis itself runs in its own task so concurrent
/// items never serialize behind one another, and the reply carries the
/// item's final status.
pub(crate) fn process_media_item(
    ctx: &Arc<AppContext>,
    peer_id: Uuid,
    media_url: String,
    media_kind: String,
    item_id: String,
    explicit_tab: Option<TabId>,
    responder: Responder,
) {
    let tab_id = match scope_tab(ctx, peer_id, explicit_tab) {
        Ok(tab_id) => tab_id,
        Err(e) => return responder.err(e),
    };

    if media_url.trim().is_empty() || item_id.trim().is_empty() {
        return responder.err(WireError::new(
            ErrorCode::Validation,
            "mediaUrl and itemId are required",
        ));
    }
    let Some(kind) = MediaKind::parse(&media_kind) else {
        return responder.err(WireError::new(
            ErrorCode::Validation,
            format!("unknown media kind: {media_kind}"),
        ));
    };

    if !ctx.session.is_signed_in() {
        // Tagged with the item id so only the requesting UI element reacts.
        ctx.peers.push_to_tab(
            tab_id,
            &Push::AnalysisError {
                message: "authentication required".to_string(),
                item_id: Some(item_id.clone()),
            },
        );
        return responder.err(WireError::new(
            ErrorCode::AuthRequired,
            "authentication required",
        ));
    }

    let ctx = ctx.clone();
    tokio::spawn(async move {
        match ctx
            .orchestrator
            .analyze_media(tab_id, &item_id, &media_url, kind)
            .await
        {
            Ok(()) => responder.ok(json!({ "status": "success" })),
            Err(e) => responder.err(classify_analysis(e)),
        }
    });
}

/// `getResultForTab` — synchronous store read. The session check comes
/// before existence: signed-out callers learn that first.
pub async fn result_for_tab(ctx: &AppContext, tab_id: TabId) -> Value {
    ctx.tabs
        .read(ctx.session.is_signed_in(), tab_id)
        .await
        .to_value()
}
