//! Wiring of the temporary channel components around one registry.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::commands::CommandDispatcher;
use crate::lifecycle::LifecycleController;
use crate::models::PresenceTransition;
use crate::ownership::OwnershipManager;
use crate::platform::ExternalPlatform;
use crate::reconcile::{ReconciliationReport, ReconciliationService};
use crate::registry::TempResourceRegistry;
use crate::router::PresenceEventRouter;
use crate::store::PersistentStore;

/// The temporary channel service for one store and platform.
pub struct TempVoiceService {
    registry: Arc<TempResourceRegistry>,
    lifecycle: Arc<LifecycleController>,
    ownership: Arc<OwnershipManager>,
    reconciler: ReconciliationService,
    router: Arc<PresenceEventRouter>,
    commands: CommandDispatcher,
}

impl TempVoiceService {
    pub fn new(store: Arc<dyn PersistentStore>, platform: Arc<dyn ExternalPlatform>) -> Self {
        let registry = Arc::new(TempResourceRegistry::new());
        let lifecycle = Arc::new(LifecycleController::new(
            Arc::clone(&store),
            Arc::clone(&platform),
            Arc::clone(&registry),
        ));
        let ownership = Arc::new(OwnershipManager::new(
            Arc::clone(&store),
            Arc::clone(&platform),
            Arc::clone(&registry),
        ));
        let reconciler = ReconciliationService::new(
            Arc::clone(&store),
            Arc::clone(&platform),
            Arc::clone(&registry),
            Arc::clone(&lifecycle),
        );
        let router = Arc::new(PresenceEventRouter::new(
            store,
            platform,
            Arc::clone(&registry),
            Arc::clone(&lifecycle),
        ));
        let commands = CommandDispatcher::new(Arc::clone(&lifecycle), Arc::clone(&ownership));

        Self {
            registry,
            lifecycle,
            ownership,
            reconciler,
            router,
            commands,
        }
    }

    /// Reconcile persisted state, then start routing presence events.
    ///
    /// The router task ends when every sender for `events` is dropped.
    pub async fn start(
        &self,
        events: UnboundedReceiver<PresenceTransition>,
    ) -> (ReconciliationReport, JoinHandle<()>) {
        let report = self.reconciler.run().await;
        let router = Arc::clone(&self.router);
        let handle = tokio::spawn(router.run(events));
        (report, handle)
    }

    pub fn registry(&self) -> &Arc<TempResourceRegistry> {
        &self.registry
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleController> {
        &self.lifecycle
    }

    pub fn ownership(&self) -> &Arc<OwnershipManager> {
        &self.ownership
    }

    pub fn reconciler(&self) -> &ReconciliationService {
        &self.reconciler
    }

    pub fn router(&self) -> &Arc<PresenceEventRouter> {
        &self.router
    }

    pub fn commands(&self) -> &CommandDispatcher {
        &self.commands
    }
}
