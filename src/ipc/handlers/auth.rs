use std::sync::Arc;

use serde_json::{json, Value};

use super::classify_sign_in;
use crate::ipc::Responder;
use crate::AppContext;

/// `signIn` — interactive; replies when the provider flow finishes.
pub(crate) async fn sign_in(ctx: Arc<AppContext>, responder: Responder) {
    match ctx.session.sign_in().await {
        Ok(profile) => responder.ok(json!({ "profile": profile })),
        Err(e) => responder.err(classify_sign_in(e)),
    }
}

/// `signOut` — idempotent; replies after state is cleared and best-effort
/// revocation has run.
pub(crate) async fn sign_out(ctx: Arc<AppContext>, responder: Responder) {
    ctx.session.sign_out().await;
    responder.ok(json!({}));
}

/// `getAuthState` — synchronous read, no I/O.
pub fn auth_state(ctx: &AppContext) -> Value {
    serde_json::to_value(ctx.session.auth_state()).unwrap_or_default()
}
