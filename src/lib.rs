pub mod analysis;
pub mod config;
pub mod ipc;
pub mod liveness;
pub mod session;
pub mod tabs;

use std::sync::Arc;

use analysis::client::BackendClient;
use analysis::AnalysisOrchestrator;
use config::CoordinatorConfig;
use ipc::event::{EventBroadcaster, PeerRegistry};
use session::identity::IdentityBroker;
use session::SessionManager;
use tabs::TabStateStore;

/// Shared application state passed to every request handler and background
/// task.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<CoordinatorConfig>,
    pub broadcaster: Arc<EventBroadcaster>,
    pub peers: Arc<PeerRegistry>,
    pub session: Arc<SessionManager>,
    pub tabs: Arc<TabStateStore>,
    pub orchestrator: Arc<AnalysisOrchestrator>,
    pub started_at: std::time::Instant,
}

impl AppContext {
    /// Wire the components together around one identity broker.
    ///
    /// The broadcaster is taken from the caller because the production
    /// broker broadcasts sign-in prompts through the same channel.
    pub fn build(
        config: CoordinatorConfig,
        broadcaster: Arc<EventBroadcaster>,
        broker: Arc<dyn IdentityBroker>,
    ) -> Self {
        let config = Arc::new(config);
        let peers = Arc::new(PeerRegistry::new());
        let session = Arc::new(SessionManager::new(broker, broadcaster.clone()));
        let tabs = Arc::new(TabStateStore::new());
        let orchestrator = Arc::new(AnalysisOrchestrator::new(
            BackendClient::new(config.backend.clone()),
            session.clone(),
            tabs.clone(),
            broadcaster.clone(),
            peers.clone(),
            config.analysis.clone(),
        ));
        Self {
            config,
            broadcaster,
            peers,
            session,
            tabs,
            orchestrator,
            started_at: std::time::Instant::now(),
        }
    }
}
