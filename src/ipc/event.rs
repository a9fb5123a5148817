//! One-way outbound channels: unscoped broadcasts and tab-scoped pushes.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Instant;

use tokio::sync::{broadcast, mpsc};
use tracing::debug;
use uuid::Uuid;

use super::protocol::{Broadcast, ContextKind, Push, TabId};

/// Broadcasts event frames to all connected WebSocket peers.
#[derive(Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<String>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    /// Send a broadcast frame to every connected peer.
    pub fn broadcast(&self, event: &Broadcast) {
        // Ignore errors — no subscribers is fine
        let _ = self
            .tx
            .send(serde_json::to_string(event).unwrap_or_default());
    }

    /// Subscribe to all broadcast events.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

// ─── Peer registry ───────────────────────────────────────────────────────────

struct Peer {
    context: ContextKind,
    tab_id: Option<TabId>,
    outbound: mpsc::UnboundedSender<String>,
    last_probe: Instant,
}

/// In-memory registry of connected extension contexts.
///
/// Content-script peers register with the tab they were injected into, which
/// is what scopes their requests and routes pushes back to them. UI-surface
/// peers register without a tab.
#[derive(Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<Uuid, Peer>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        id: Uuid,
        context: ContextKind,
        tab_id: Option<TabId>,
        outbound: mpsc::UnboundedSender<String>,
    ) {
        let mut peers = self.peers.write().expect("peer registry poisoned");
        peers.insert(
            id,
            Peer {
                context,
                tab_id,
                outbound,
                last_probe: Instant::now(),
            },
        );
    }

    pub fn unregister(&self, id: Uuid) {
        let mut peers = self.peers.write().expect("peer registry poisoned");
        peers.remove(&id);
    }

    pub fn registered_count(&self) -> usize {
        self.peers.read().expect("peer registry poisoned").len()
    }

    /// The tab a content-script peer registered with, if any.
    pub fn tab_of(&self, id: Uuid) -> Option<TabId> {
        let peers = self.peers.read().expect("peer registry poisoned");
        peers
            .get(&id)
            .filter(|p| p.context == ContextKind::Content)
            .and_then(|p| p.tab_id)
    }

    /// Record a liveness probe from a peer.
    pub fn note_probe(&self, id: Uuid) {
        let mut peers = self.peers.write().expect("peer registry poisoned");
        if let Some(peer) = peers.get_mut(&id) {
            peer.last_probe = Instant::now();
        }
    }

    /// Push a frame to every content-script peer of `tab_id`.
    ///
    /// Best-effort: an absent or already-closed peer is not an error.
    pub fn push_to_tab(&self, tab_id: TabId, push: &Push) {
        let frame = match serde_json::to_string(push) {
            Ok(f) => f,
            Err(_) => return,
        };
        let peers = self.peers.read().expect("peer registry poisoned");
        let mut delivered = 0usize;
        for peer in peers.values() {
            if peer.context == ContextKind::Content && peer.tab_id == Some(tab_id) {
                if peer.outbound.send(frame.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        if delivered == 0 {
            debug!(tab_id, "push had no listener");
        }
    }

    /// Content-script tabs whose last probe is older than `max_age_secs`.
    pub fn idle_content_tabs(&self, max_age_secs: u64) -> Vec<(TabId, u64)> {
        let peers = self.peers.read().expect("peer registry poisoned");
        peers
            .values()
            .filter(|p| p.context == ContextKind::Content)
            .filter_map(|p| {
                let age = p.last_probe.elapsed().as_secs();
                if age >= max_age_secs {
                    p.tab_id.map(|t| (t, age))
                } else {
                    None
                }
            })
            .collect()
    }
}
