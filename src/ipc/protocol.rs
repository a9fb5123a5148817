//! Wire protocol between the coordinator and extension contexts.
//!
//! Every inbound frame is an [`Envelope`]: a caller-chosen `id` plus one
//! variant of the closed [`Request`] union, tagged by `action`. Every request
//! receives exactly one [`reply`]/[`error_reply`] carrying the same `id`.
//! One-way traffic flows the other direction as tab-scoped [`Push`] frames
//! and unscoped [`Broadcast`] frames; neither carries an `id` and neither is
//! acknowledged.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Host-assigned identity of a browser tab.
pub type TabId = i64;

// ─── Inbound ─────────────────────────────────────────────────────────────────

/// Which execution context a peer registered as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContextKind {
    /// Content script injected into a page — carries an implicit tab identity.
    Content,
    Popup,
    SidePanel,
}

/// The closed set of request shapes.
///
/// Content-script peers are scoped to their registered tab; `tabId` in the
/// payload is how popup/side-panel peers (which have no implicit tab) name one.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    #[serde(rename_all = "camelCase")]
    Hello {
        context: ContextKind,
        #[serde(default)]
        tab_id: Option<TabId>,
    },
    Ping,
    SignIn,
    SignOut,
    GetAuthState,
    #[serde(rename_all = "camelCase")]
    ProcessText {
        url: String,
        article_text: String,
        #[serde(default)]
        tab_id: Option<TabId>,
    },
    #[serde(rename_all = "camelCase")]
    ProcessMediaItem {
        media_url: String,
        media_kind: String,
        item_id: String,
        #[serde(default)]
        tab_id: Option<TabId>,
    },
    #[serde(rename_all = "camelCase")]
    GetResultForTab { tab_id: TabId },
}

#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub id: u64,
    #[serde(flatten)]
    pub request: Request,
}

// ─── Replies ─────────────────────────────────────────────────────────────────

/// Wire error codes, one per class of the error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Frame was not a valid envelope or named an unknown action.
    Parse,
    /// Malformed or undersized payload — nothing was attempted.
    Validation,
    /// No local session; the caller must sign in first.
    AuthRequired,
    /// A remote service rejected the credential; the session has been torn down.
    AuthExpired,
    /// The remote service denied access to this feature; the session is intact.
    EntitlementDenied,
    /// Network failure or an unrecognized non-2xx response.
    Transport,
    /// The remote service answered 2xx but the body was missing required fields.
    Format,
}

/// A classified error on its way back to the caller.
#[derive(Debug, Clone)]
pub struct WireError {
    pub code: ErrorCode,
    pub message: String,
}

impl WireError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

pub fn reply(id: u64, result: Value) -> String {
    json!({ "id": id, "ok": true, "result": result }).to_string()
}

pub fn error_reply(id: Option<u64>, err: &WireError) -> String {
    json!({
        "id": id,
        "ok": false,
        "error": { "code": err.code, "message": err.message }
    })
    .to_string()
}

// ─── Outbound one-way frames ─────────────────────────────────────────────────

/// Tab-scoped push, delivered to the content-script peer(s) of one tab.
/// Non-delivery (no such peer connected) is an expected outcome.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Push {
    #[serde(rename_all = "camelCase")]
    ApplyHighlights { highlights: Vec<String> },
    #[serde(rename_all = "camelCase")]
    AnalysisComplete { verdict: TextVerdict },
    #[serde(rename_all = "camelCase")]
    AnalysisError {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        item_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    DisplayMediaAnalysis {
        item_id: String,
        verdict: MediaVerdict,
    },
}

/// Unscoped broadcast to every connected peer, with no guaranteed receiver.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Broadcast {
    #[serde(rename_all = "camelCase")]
    SessionChanged { auth_state: AuthState },
    #[serde(rename_all = "camelCase")]
    SignInPrompt {
        verification_uri: String,
        user_code: String,
    },
    #[serde(rename_all = "camelCase")]
    AnalysisComplete { tab_id: TabId },
    #[serde(rename_all = "camelCase")]
    MediaItemUpdate { tab_id: TabId, media_url: String },
    #[serde(rename_all = "camelCase")]
    SentimentBiasComplete { tab_id: TabId },
    #[serde(rename_all = "camelCase")]
    SentimentBiasError { tab_id: TabId, message: String },
}

// ─── Data types ──────────────────────────────────────────────────────────────

/// User profile attached to an active session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub email: String,
    pub display_name: String,
    pub picture_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    pub is_signed_in: bool,
    pub profile: Option<Profile>,
}

/// Credibility verdict for a page's article text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextVerdict {
    pub label: String,
    pub score: f64,
    #[serde(default)]
    pub highlights: Vec<String>,
}

/// Sentiment/bias verdict over the same truncated text as the primary verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentimentBias {
    pub sentiment: String,
    pub sentiment_score: f64,
    pub bias: String,
    pub bias_score: f64,
}

/// The kinds of media the backend can analyze, each with its own endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
}

impl MediaKind {
    /// Parses the wire string; `None` for anything outside the closed set.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

/// Uniform per-item verdict normalized from the per-kind response shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaVerdict {
    pub media_kind: MediaKind,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
