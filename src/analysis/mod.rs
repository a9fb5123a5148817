//! Orchestration of the remote analysis pipeline.
//!
//! Two pipelines: text (with a dependent sentiment/bias call over the
//! identical truncated input) and per-item media. Every outcome — success or
//! failure — lands in the tab store as a durable artifact, is pushed to the
//! originating tab's content script, and is broadcast to listening UI
//! surfaces. A rejected credential tears the whole session down before the
//! error goes anywhere else; every other failure stays scoped to the one
//! artifact that caused it.

pub mod client;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::AnalysisConfig;
use crate::ipc::event::{EventBroadcaster, PeerRegistry};
use crate::ipc::protocol::{Broadcast, MediaKind, Push, TabId};
use crate::session::SessionManager;
use crate::tabs::{Outcome, TabStateStore};
use client::{AnalysisError, BackendClient};

pub struct AnalysisOrchestrator {
    client: BackendClient,
    session: Arc<SessionManager>,
    tabs: Arc<TabStateStore>,
    broadcaster: Arc<EventBroadcaster>,
    peers: Arc<PeerRegistry>,
    config: AnalysisConfig,
}

impl AnalysisOrchestrator {
    pub fn new(
        client: BackendClient,
        session: Arc<SessionManager>,
        tabs: Arc<TabStateStore>,
        broadcaster: Arc<EventBroadcaster>,
        peers: Arc<PeerRegistry>,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            client,
            session,
            tabs,
            broadcaster,
            peers,
            config,
        }
    }

    pub fn min_text_len(&self) -> usize {
        self.config.min_text_len
    }

    /// Text pipeline: primary verdict, then the dependent sentiment/bias
    /// call over the identical truncated text — so the dependent analysis
    /// always scores the same input the primary one did.
    pub async fn analyze_text(&self, tab_id: TabId, url: &str, article_text: &str) {
        let Some(credential) = self.session.credential() else {
            // The session died between dispatch and execution.
            self.tabs
                .set_text(tab_id, Outcome::failure("authentication required"))
                .await;
            self.push_error(tab_id, "authentication required", None);
            return;
        };

        let truncated = truncate_chars(article_text, self.config.max_text_chars);
        debug!(tab_id, url, chars = truncated.len(), "text analysis started");

        let verdict = match self.client.analyze_text(&credential, url, truncated).await {
            Ok(verdict) => verdict,
            Err(AnalysisError::AuthExpired) => {
                self.session.handle_credential_rejected().await;
                let message = AnalysisError::AuthExpired.to_string();
                self.tabs.set_text(tab_id, Outcome::failure(message.clone())).await;
                self.push_error(tab_id, &message, None);
                // Whole pipeline aborts: no dependent call.
                return;
            }
            Err(e) => {
                let message = e.to_string();
                warn!(tab_id, error = %message, "text analysis failed");
                self.tabs.set_text(tab_id, Outcome::failure(message.clone())).await;
                self.push_error(tab_id, &message, None);
                return;
            }
        };

        info!(tab_id, label = %verdict.label, "text analysis complete");
        self.tabs
            .set_text(tab_id, Outcome::success(verdict.clone()))
            .await;
        self.peers.push_to_tab(
            tab_id,
            &Push::ApplyHighlights {
                highlights: verdict.highlights.clone(),
            },
        );
        self.peers.push_to_tab(
            tab_id,
            &Push::AnalysisComplete {
                verdict: verdict.clone(),
            },
        );
        self.broadcaster
            .broadcast(&Broadcast::AnalysisComplete { tab_id });

        // Dependent call — same credential, same truncated text. Its outcome
        // is stored and broadcast on its own; it never retracts the text
        // result stored above.
        match self.client.analyze_sentiment(&credential, truncated).await {
            Ok(sentiment) => {
                self.tabs
                    .set_sentiment_bias(tab_id, Outcome::success(sentiment))
                    .await;
                self.broadcaster
                    .broadcast(&Broadcast::SentimentBiasComplete { tab_id });
            }
            Err(AnalysisError::AuthExpired) => {
                self.session.handle_credential_rejected().await;
                let message = AnalysisError::AuthExpired.to_string();
                self.tabs
                    .set_sentiment_bias(tab_id, Outcome::failure(message.clone()))
                    .await;
                self.broadcaster
                    .broadcast(&Broadcast::SentimentBiasError { tab_id, message });
            }
            Err(e) => {
                let message = e.to_string();
                warn!(tab_id, error = %message, "sentiment/bias analysis failed");
                self.tabs
                    .set_sentiment_bias(tab_id, Outcome::failure(message.clone()))
                    .await;
                self.broadcaster
                    .broadcast(&Broadcast::SentimentBiasError { tab_id, message });
            }
        }
    }

    /// Media pipeline for one item. Items are independent: concurrent
    /// analyses on the same tab neither block nor roll back one another.
    pub async fn analyze_media(
        &self,
        tab_id: TabId,
        item_id: &str,
        media_url: &str,
        kind: MediaKind,
    ) -> Result<(), AnalysisError> {
        let Some(credential) = self.session.credential() else {
            self.tabs
                .set_media_item(tab_id, media_url, Outcome::failure("authentication required"))
                .await;
            self.push_error(tab_id, "authentication required", Some(item_id));
            return Err(AnalysisError::Transport(
                "authentication required".to_string(),
            ));
        };

        debug!(tab_id, item_id, media_url, kind = kind.as_str(), "media analysis started");

        match self.client.analyze_media(&credential, kind, media_url).await {
            Ok(verdict) => {
                info!(tab_id, item_id, "media analysis complete");
                self.tabs
                    .set_media_item(tab_id, media_url, Outcome::success(verdict.clone()))
                    .await;
                self.peers.push_to_tab(
                    tab_id,
                    &Push::DisplayMediaAnalysis {
                        item_id: item_id.to_string(),
                        verdict,
                    },
                );
                self.broadcast_media_update(tab_id, media_url);
                Ok(())
            }
            Err(AnalysisError::AuthExpired) => {
                self.session.handle_credential_rejected().await;
                let message = AnalysisError::AuthExpired.to_string();
                self.tabs
                    .set_media_item(tab_id, media_url, Outcome::failure(message.clone()))
                    .await;
                // Tagged with the item id so only the requesting UI element
                // reacts; other in-flight items on this tab are untouched.
                self.push_error(tab_id, &message, Some(item_id));
                self.broadcast_media_update(tab_id, media_url);
                Err(AnalysisError::AuthExpired)
            }
            Err(AnalysisError::EntitlementDenied(detail)) => {
                // The credential may still be valid — only this feature is
                // denied. The session stays up.
                info!(tab_id, item_id, detail = %detail, "media analysis denied by tier");
                self.tabs
                    .set_media_item(tab_id, media_url, Outcome::failure(detail.clone()))
                    .await;
                self.push_error(tab_id, &detail, Some(item_id));
                self.broadcast_media_update(tab_id, media_url);
                Err(AnalysisError::EntitlementDenied(detail))
            }
            Err(e) => {
                let message = e.to_string();
                warn!(tab_id, item_id, error = %message, "media analysis failed");
                self.tabs
                    .set_media_item(tab_id, media_url, Outcome::failure(message.clone()))
                    .await;
                self.push_error(tab_id, &message, Some(item_id));
                self.broadcast_media_update(tab_id, media_url);
                Err(e)
            }
        }
    }

    fn push_error(&self, tab_id: TabId, message: &str, item_id: Option<&str>) {
        self.peers.push_to_tab(
            tab_id,
            &Push::AnalysisError {
                message: message.to_string(),
                item_id: item_id.map(str::to_string),
            },
        );
    }

    fn broadcast_media_update(&self, tab_id: TabId, media_url: &str) {
        self.broadcaster.broadcast(&Broadcast::MediaItemUpdate {
            tab_id,
            media_url: media_url.to_string(),
        });
    }
}

/// Deterministic, char-boundary-safe truncation.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
