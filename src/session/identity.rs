//! The host identity provider seam.
//!
//! `truthd` never mints credentials itself — it asks an [`IdentityBroker`].
//! The production broker speaks the OAuth 2.0 device authorization grant:
//! interactive acquisition asks the provider for a user code, broadcasts a
//! `signInPrompt` so UI surfaces can show it, and polls the token endpoint
//! until the user finishes (or declines, or the grant expires). Acquired
//! credentials are cached in the OS keychain so a non-interactive acquisition
//! after a restart finds them again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::IdentityConfig;
use crate::ipc::event::EventBroadcaster;
use crate::ipc::protocol::{Broadcast, Profile};

const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";
const KEYRING_USER: &str = "truthscope_credential";

/// Opaque token proving identity to the analysis backend.
/// Session validity is defined solely by its presence.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

// The token never appears in logs or debug output.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(…)")
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity provider unreachable: {0}")]
    Transport(String),
    #[error("identity provider answered with an unexpected body: {0}")]
    Format(String),
    #[error("identity provider rejected the credential")]
    Rejected,
}

/// What the coordinator needs from the host identity provider.
///
/// `acquire(false)` must not involve the user; `Ok(None)` means "no
/// credential available" (not signed in, or the user declined), never an
/// error.
#[async_trait]
pub trait IdentityBroker: Send + Sync {
    async fn acquire(&self, interactive: bool) -> Result<Option<Credential>, IdentityError>;
    async fn fetch_profile(&self, credential: &Credential) -> Result<Profile, IdentityError>;
    /// Drop the credential from the host cache. Best-effort.
    async fn remove_cached(&self);
    /// Revoke the credential at the provider. Best-effort.
    async fn revoke(&self, credential: &Credential) -> Result<(), IdentityError>;
}

// ─── Host credential cache (OS keychain) ─────────────────────────────────────

pub struct CredentialCache {
    service: String,
    enabled: bool,
}

impl CredentialCache {
    pub fn new(service: impl Into<String>, enabled: bool) -> Self {
        Self {
            service: service.into(),
            enabled,
        }
    }

    fn entry(&self) -> Result<keyring::Entry, keyring::Error> {
        keyring::Entry::new(&self.service, KEYRING_USER)
    }

    pub fn load(&self) -> Option<Credential> {
        if !self.enabled {
            return None;
        }
        let entry = self.entry().ok()?;
        match entry.get_password() {
            Ok(token) => {
                let token = token.trim().to_string();
                if token.is_empty() {
                    None
                } else {
                    Some(Credential::new(token))
                }
            }
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                warn!(err = %e, "could not read host credential cache");
                None
            }
        }
    }

    pub fn store(&self, credential: &Credential) {
        if !self.enabled {
            return;
        }
        match self.entry() {
            Ok(entry) => {
                if let Err(e) = entry.set_password(credential.secret()) {
                    warn!(err = %e, "could not write host credential cache");
                }
            }
            Err(e) => warn!(err = %e, "host credential cache unavailable"),
        }
    }

    pub fn clear(&self) {
        if !self.enabled {
            return;
        }
        if let Ok(entry) = self.entry() {
            let _ = entry.delete_credential();
        }
    }
}

// ─── Device-flow response shapes ─────────────────────────────────────────────

#[derive(Deserialize)]
struct DeviceAuthorization {
    device_code: String,
    user_code: String,
    verification_uri: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
    #[serde(default = "default_interval")]
    interval: u64,
}

fn default_expires_in() -> u64 {
    300
}

fn default_interval() -> u64 {
    5
}

#[derive(Deserialize)]
struct TokenGrant {
    access_token: String,
}

#[derive(Deserialize)]
struct TokenPending {
    error: String,
}

#[derive(Deserialize)]
struct UserInfo {
    email: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

// ─── Production broker ───────────────────────────────────────────────────────

pub struct HttpIdentityBroker {
    http: reqwest::Client,
    config: IdentityConfig,
    cache: CredentialCache,
    broadcaster: Arc<EventBroadcaster>,
}

impl HttpIdentityBroker {
    pub fn new(config: IdentityConfig, broadcaster: Arc<EventBroadcaster>) -> Self {
        let cache = CredentialCache::new(config.cache_service.clone(), config.remember_credentials);
        Self {
            http: reqwest::Client::new(),
            config,
            cache,
            broadcaster,
        }
    }

    async fn device_authorization(&self) -> Result<DeviceAuthorization, IdentityError> {
        let res = self
            .http
            .post(&self.config.device_authorization_url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("scope", self.config.scope.as_str()),
            ])
            .send()
            .await
            .map_err(|e| IdentityError::Transport(e.to_string()))?;
        if !res.status().is_success() {
            return Err(IdentityError::Transport(format!(
                "device authorization failed ({})",
                res.status().as_u16()
            )));
        }
        res.json::<DeviceAuthorization>()
            .await
            .map_err(|e| IdentityError::Format(e.to_string()))
    }

    /// Polls the token endpoint until the user completes the grant.
    ///
    /// Returns `Ok(None)` when the user declines or the grant expires — the
    /// provider's `expires_in` bounds the loop.
    async fn poll_for_token(
        &self,
        auth: &DeviceAuthorization,
    ) -> Result<Option<Credential>, IdentityError> {
        let deadline = std::time::Instant::now() + Duration::from_secs(auth.expires_in);
        let mut interval = auth.interval.max(1);

        while std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_secs(interval)).await;

            let res = self
                .http
                .post(&self.config.token_url)
                .form(&[
                    ("client_id", self.config.client_id.as_str()),
                    ("device_code", auth.device_code.as_str()),
                    ("grant_type", DEVICE_GRANT_TYPE),
                ])
                .send()
                .await
                .map_err(|e| IdentityError::Transport(e.to_string()))?;

            if res.status().is_success() {
                let grant = res
                    .json::<TokenGrant>()
                    .await
                    .map_err(|e| IdentityError::Format(e.to_string()))?;
                return Ok(Some(Credential::new(grant.access_token)));
            }

            let body = res.text().await.unwrap_or_default();
            let pending = serde_json::from_str::<TokenPending>(&body)
                .map(|p| p.error)
                .unwrap_or_default();
            match pending.as_str() {
                "authorization_pending" => continue,
                "slow_down" => interval += 5,
                "access_denied" | "expired_token" => {
                    debug!(reason = %pending, "device grant not completed");
                    return Ok(None);
                }
                _ => {
                    return Err(IdentityError::Transport(format!(
                        "token endpoint error: {}",
                        if body.is_empty() { "<empty>" } else { body.as_str() }
                    )))
                }
            }
        }

        debug!("device grant expired before the user completed it");
        Ok(None)
    }
}

#[async_trait]
impl IdentityBroker for HttpIdentityBroker {
    async fn acquire(&self, interactive: bool) -> Result<Option<Credential>, IdentityError> {
        if !interactive {
            return Ok(self.cache.load());
        }

        let auth = self.device_authorization().await?;
        self.broadcaster.broadcast(&Broadcast::SignInPrompt {
            verification_uri: auth.verification_uri.clone(),
            user_code: auth.user_code.clone(),
        });

        match self.poll_for_token(&auth).await? {
            Some(credential) => {
                self.cache.store(&credential);
                Ok(Some(credential))
            }
            None => Ok(None),
        }
    }

    async fn fetch_profile(&self, credential: &Credential) -> Result<Profile, IdentityError> {
        let res = self
            .http
            .get(&self.config.userinfo_url)
            .bearer_auth(credential.secret())
            .send()
            .await
            .map_err(|e| IdentityError::Transport(e.to_string()))?;

        if res.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(IdentityError::Rejected);
        }
        if !res.status().is_success() {
            return Err(IdentityError::Transport(format!(
                "userinfo failed ({})",
                res.status().as_u16()
            )));
        }

        let info = res
            .json::<UserInfo>()
            .await
            .map_err(|e| IdentityError::Format(e.to_string()))?;
        let display_name = info.name.unwrap_or_else(|| info.email.clone());
        Ok(Profile {
            email: info.email,
            display_name,
            picture_url: info.picture,
        })
    }

    async fn remove_cached(&self) {
        self.cache.clear();
    }

    async fn revoke(&self, credential: &Credential) -> Result<(), IdentityError> {
        let res = self
            .http
            .post(&self.config.revocation_url)
            .form(&[("token", credential.secret())])
            .send()
            .await
            .map_err(|e| IdentityError::Transport(e.to_string()))?;
        if !res.status().is_success() {
            return Err(IdentityError::Transport(format!(
                "revocation failed ({})",
                res.status().as_u16()
            )));
        }
        Ok(())
    }
}
