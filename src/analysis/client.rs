//! HTTP client for the four analysis endpoints.
//!
//! Classification of a response is the whole game here: 401 means the
//! credential itself is dead (the caller must tear the session down), 403 on
//! a media endpoint means the feature tier denied us while the session stays
//! valid, any other non-2xx is a local transport failure, and a 2xx body
//! missing its required fields is a format failure. Calls carry no timeout —
//! they run to completion or transport failure.

use reqwest::StatusCode;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::BackendConfig;
use crate::ipc::protocol::{MediaKind, MediaVerdict, SentimentBias, TextVerdict};
use crate::session::identity::Credential;

const TEXT_PATH: &str = "/analyze";
const SENTIMENT_PATH: &str = "/analyze-sentiment";
const IMAGE_PATH: &str = "/check-image";
const VIDEO_PATH: &str = "/check-video";
const AUDIO_PATH: &str = "/check-audio";

#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The service rejected the credential. Global consequence: the caller
    /// must sign the session out before surfacing this.
    #[error("credential rejected by the analysis service")]
    AuthExpired,
    /// The service denied access to this feature; the credential may still
    /// be valid. Media endpoints only.
    #[error("{0}")]
    EntitlementDenied(String),
    /// Network failure or an unrecognized non-2xx response.
    #[error("{0}")]
    Transport(String),
    /// 2xx response missing required fields.
    #[error("{0}")]
    Format(String),
}

/// Pulls a human-readable detail out of an error body: a `message` or
/// `error` field when present, else the raw body.
fn error_detail(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        for key in ["message", "error"] {
            if let Some(detail) = value.get(key).and_then(Value::as_str) {
                if !detail.trim().is_empty() {
                    return detail.trim().to_string();
                }
            }
        }
    }
    let raw = body.trim();
    if raw.is_empty() {
        "analysis service returned an error with no detail".to_string()
    } else {
        raw.to_string()
    }
}

pub struct BackendClient {
    http: reqwest::Client,
    config: BackendConfig,
}

impl BackendClient {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// POST one endpoint and hand back the raw 2xx body.
    ///
    /// `entitlement_aware` is set for media endpoints, where 403 carries
    /// tier semantics; everywhere else a 403 is just another failed call.
    async fn post(
        &self,
        path: &str,
        credential: &Credential,
        body: Value,
        entitlement_aware: bool,
    ) -> Result<String, AnalysisError> {
        let url = format!("{}{}", self.config.api_base_url, path);
        let res = self
            .http
            .post(&url)
            .bearer_auth(credential.secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;

        let status = res.status();
        let text = res
            .text()
            .await
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(AnalysisError::AuthExpired);
        }
        if entitlement_aware && status == StatusCode::FORBIDDEN {
            return Err(AnalysisError::EntitlementDenied(error_detail(&text)));
        }
        if !status.is_success() {
            return Err(AnalysisError::Transport(error_detail(&text)));
        }
        Ok(text)
    }

    pub async fn analyze_text(
        &self,
        credential: &Credential,
        url: &str,
        text: &str,
    ) -> Result<TextVerdict, AnalysisError> {
        let body = self
            .post(
                TEXT_PATH,
                credential,
                json!({ "url": url, "text": text }),
                false,
            )
            .await?;
        let value: Value = serde_json::from_str(&body)
            .map_err(|e| AnalysisError::Format(format!("text analysis body: {e}")))?;
        let verdict = value
            .get("textResult")
            .cloned()
            .ok_or_else(|| AnalysisError::Format("text analysis body missing textResult".into()))?;
        serde_json::from_value(verdict)
            .map_err(|e| AnalysisError::Format(format!("textResult: {e}")))
    }

    pub async fn analyze_sentiment(
        &self,
        credential: &Credential,
        text: &str,
    ) -> Result<SentimentBias, AnalysisError> {
        let body = self
            .post(SENTIMENT_PATH, credential, json!({ "text": text }), false)
            .await?;
        let value: Value = serde_json::from_str(&body)
            .map_err(|e| AnalysisError::Format(format!("sentiment body: {e}")))?;
        let result = value.get("sentimentBias").cloned().ok_or_else(|| {
            AnalysisError::Format("sentiment body missing sentimentBias".into())
        })?;
        serde_json::from_value(result)
            .map_err(|e| AnalysisError::Format(format!("sentimentBias: {e}")))
    }

    pub async fn analyze_media(
        &self,
        credential: &Credential,
        kind: MediaKind,
        media_url: &str,
    ) -> Result<MediaVerdict, AnalysisError> {
        let path = match kind {
            MediaKind::Image => IMAGE_PATH,
            MediaKind::Video => VIDEO_PATH,
            MediaKind::Audio => AUDIO_PATH,
        };
        let body = self
            .post(path, credential, json!({ "mediaUrl": media_url }), true)
            .await?;
        normalize_media(kind, &body)
    }
}

/// Collapses the per-kind response shapes into one uniform verdict.
///
/// Image and audio services answer JSON with a `summary` (audio may only
/// have a `transcript`); the video service answers plain text. A 2xx body
/// that yields no summary at all is a format failure.
pub(crate) fn normalize_media(kind: MediaKind, body: &str) -> Result<MediaVerdict, AnalysisError> {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        let summary = value
            .get("summary")
            .and_then(Value::as_str)
            .or_else(|| value.get("transcript").and_then(Value::as_str))
            .map(str::to_string);
        let confidence = value.get("confidence").and_then(Value::as_f64);
        let detail = value
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string);

        return match summary {
            Some(summary) if !summary.trim().is_empty() => Ok(MediaVerdict {
                media_kind: kind,
                summary,
                confidence,
                detail,
            }),
            _ => Err(AnalysisError::Format(format!(
                "{} analysis body missing summary",
                kind.as_str()
            ))),
        };
    }

    // Plain-text body (the video classifier answers prose).
    let text = body.trim();
    if text.is_empty() {
        return Err(AnalysisError::Format(format!(
            "{} analysis returned an empty body",
            kind.as_str()
        )));
    }
    Ok(MediaVerdict {
        media_kind: kind,
        summary: text.to_string(),
        confidence: None,
        detail: None,
    })
}
