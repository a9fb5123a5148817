//! Session and credential lifecycle.
//!
//! One rule holds everywhere: the `(credential, profile)` pair is committed
//! and cleared together, so no observer ever sees one side without the other.
//! Sign-in is the only operation that spans multiple awaits while the pair is
//! in transition, which is why it carries an explicit in-flight guard instead
//! of a lock.

pub mod identity;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{info, warn};

use crate::ipc::event::EventBroadcaster;
use crate::ipc::protocol::{AuthState, Broadcast, Profile};
use identity::{Credential, IdentityBroker, IdentityError};

#[derive(Debug, Error)]
pub enum SignInError {
    #[error("sign-in already in progress")]
    AlreadyInProgress,
    #[error("sign-in was cancelled or declined")]
    Declined,
    #[error("identity provider failure: {0}")]
    Provider(IdentityError),
    #[error("profile could not be retrieved: {0}")]
    ProfileUnavailable(IdentityError),
}

#[derive(Default)]
struct SessionState {
    credential: Option<Credential>,
    profile: Option<Profile>,
}

pub struct SessionManager {
    broker: Arc<dyn IdentityBroker>,
    broadcaster: Arc<EventBroadcaster>,
    // Held only for synchronous reads/writes, never across an await.
    state: Mutex<SessionState>,
    sign_in_in_flight: AtomicBool,
}

impl SessionManager {
    pub fn new(broker: Arc<dyn IdentityBroker>, broadcaster: Arc<EventBroadcaster>) -> Self {
        Self {
            broker,
            broadcaster,
            state: Mutex::new(SessionState::default()),
            sign_in_in_flight: AtomicBool::new(false),
        }
    }

    /// Synchronous read, no I/O.
    pub fn auth_state(&self) -> AuthState {
        let state = self.state.lock().expect("session state poisoned");
        AuthState {
            is_signed_in: state.credential.is_some(),
            profile: state.profile.clone(),
        }
    }

    pub fn is_signed_in(&self) -> bool {
        self.state
            .lock()
            .expect("session state poisoned")
            .credential
            .is_some()
    }

    /// The active credential, for authenticated remote calls.
    pub fn credential(&self) -> Option<Credential> {
        self.state
            .lock()
            .expect("session state poisoned")
            .credential
            .clone()
    }

    /// Interactive sign-in.
    ///
    /// At most one sign-in is ever in flight; concurrent calls fail
    /// immediately without contacting the identity provider. A credential
    /// whose profile cannot be retrieved is treated as invalid, not
    /// partially valid.
    pub async fn sign_in(&self) -> Result<Profile, SignInError> {
        if self.sign_in_in_flight.swap(true, Ordering::SeqCst) {
            return Err(SignInError::AlreadyInProgress);
        }
        let result = self.sign_in_inner().await;
        self.sign_in_in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn sign_in_inner(&self) -> Result<Profile, SignInError> {
        let had_prior_credential = self.is_signed_in();

        let credential = match self.broker.acquire(true).await {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                // Cancelled or declined. A half-replaced session would be
                // worse than none, so a prior credential is torn down fully.
                if had_prior_credential {
                    self.sign_out().await;
                }
                return Err(SignInError::Declined);
            }
            Err(e) => {
                if had_prior_credential {
                    self.sign_out().await;
                }
                return Err(SignInError::Provider(e));
            }
        };

        let profile = match self.broker.fetch_profile(&credential).await {
            Ok(profile) => profile,
            Err(e) => {
                self.sign_out().await;
                return Err(SignInError::ProfileUnavailable(e));
            }
        };

        {
            let mut state = self.state.lock().expect("session state poisoned");
            state.credential = Some(credential);
            state.profile = Some(profile.clone());
        }
        info!(email = %profile.email, "signed in");
        self.broadcast_session_changed();
        Ok(profile)
    }

    /// Idempotent sign-out.
    ///
    /// State is cleared before any revocation attempt so dependents observe
    /// "signed out" promptly; cache removal and remote revocation are
    /// best-effort.
    pub async fn sign_out(&self) {
        let prior = {
            let mut state = self.state.lock().expect("session state poisoned");
            state.profile = None;
            state.credential.take()
        };

        self.broker.remove_cached().await;
        if let Some(credential) = prior {
            if let Err(e) = self.broker.revoke(&credential).await {
                warn!(err = %e, "credential revocation failed");
            }
            info!("signed out");
        }
        self.broadcast_session_changed();
    }

    /// Invoked by any remote call that observed a rejected credential.
    /// Tears the session down before the caller surfaces its own error.
    pub async fn handle_credential_rejected(&self) {
        warn!("remote service rejected the credential — signing out");
        self.sign_out().await;
    }

    /// Startup restoration: a non-interactive credential, if the host still
    /// has one, becomes a session; anything less resolves to signed-out. The
    /// resulting state is always broadcast so contexts that asked before this
    /// completed receive a follow-up.
    pub async fn bootstrap(&self) {
        match self.broker.acquire(false).await {
            Ok(Some(credential)) => match self.broker.fetch_profile(&credential).await {
                Ok(profile) => {
                    {
                        let mut state = self.state.lock().expect("session state poisoned");
                        state.credential = Some(credential);
                        state.profile = Some(profile.clone());
                    }
                    info!(email = %profile.email, "session restored from host cache");
                    self.broadcast_session_changed();
                }
                Err(e) => {
                    warn!(err = %e, "cached credential had no retrievable profile");
                    self.sign_out().await;
                }
            },
            Ok(None) => self.broadcast_session_changed(),
            Err(e) => {
                warn!(err = %e, "startup credential check failed");
                self.broadcast_session_changed();
            }
        }
    }

    fn broadcast_session_changed(&self) {
        self.broadcaster.broadcast(&Broadcast::SessionChanged {
            auth_state: self.auth_state(),
        });
    }
}
