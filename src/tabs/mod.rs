//! Per-tab analysis artifacts.
//!
//! Records are created lazily on the first write for a tab and are never
//! evicted for the life of the process: a UI surface opened long after an
//! analysis ran (or failed) must still be able to retrieve the outcome.
//! Growth is bounded by the browsing session, not by this store.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::ipc::protocol::{MediaVerdict, SentimentBias, TabId, TextVerdict};

/// Success-or-failure of one analysis, stamped with when it was stored.
/// Failures are durable artifacts, not transient errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum Outcome<T> {
    Success { value: T, at: String },
    Failure { error: String, at: String },
}

impl<T> Outcome<T> {
    pub fn success(value: T) -> Self {
        Self::Success {
            value,
            at: Utc::now().to_rfc3339(),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
            at: Utc::now().to_rfc3339(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Everything accumulated for one tab. Fields are upserted independently;
/// a later failure in one field never erases an earlier success in another.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabAnalysisState {
    pub text: Option<Outcome<TextVerdict>>,
    pub media: HashMap<String, Outcome<MediaVerdict>>,
    pub sentiment_bias: Option<Outcome<SentimentBias>>,
}

/// What `getResultForTab` answers.
///
/// The session check comes first: a signed-out caller must learn it is signed
/// out, not that the tab merely has no data yet.
#[derive(Debug, Clone)]
pub enum ReadResult {
    SignedOut,
    NotFound,
    Found(TabAnalysisState),
}

impl ReadResult {
    pub fn to_value(&self) -> Value {
        match self {
            Self::SignedOut => json!({ "status": "signedOut" }),
            Self::NotFound => json!({ "status": "notFound" }),
            Self::Found(state) => json!({ "status": "found", "data": state }),
        }
    }
}

#[derive(Default)]
pub struct TabStateStore {
    tabs: RwLock<HashMap<TabId, TabAnalysisState>>,
}

impl TabStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_text(&self, tab_id: TabId, outcome: Outcome<TextVerdict>) {
        let mut tabs = self.tabs.write().await;
        tabs.entry(tab_id).or_default().text = Some(outcome);
    }

    pub async fn set_media_item(
        &self,
        tab_id: TabId,
        media_url: &str,
        outcome: Outcome<MediaVerdict>,
    ) {
        let mut tabs = self.tabs.write().await;
        tabs.entry(tab_id)
            .or_default()
            .media
            .insert(media_url.to_string(), outcome);
    }

    pub async fn set_sentiment_bias(&self, tab_id: TabId, outcome: Outcome<SentimentBias>) {
        let mut tabs = self.tabs.write().await;
        tabs.entry(tab_id).or_default().sentiment_bias = Some(outcome);
    }

    /// Snapshot of one tab's record, if it exists.
    pub async fn snapshot(&self, tab_id: TabId) -> Option<TabAnalysisState> {
        let tabs = self.tabs.read().await;
        tabs.get(&tab_id).cloned()
    }

    pub async fn read(&self, signed_in: bool, tab_id: TabId) -> ReadResult {
        if !signed_in {
            return ReadResult::SignedOut;
        }
        match self.snapshot(tab_id).await {
            Some(state) => ReadResult::Found(state),
            None => ReadResult::NotFound,
        }
    }
}
