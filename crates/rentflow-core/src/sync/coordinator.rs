//! Wires the engine, the pull service and the connectivity signal together

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::auth::AuthGate;
use super::connectivity::ConnectivityMonitor;
use super::engine::{SyncEngine, SyncReport};
use super::pull::{PullReport, PullService};
use crate::config::{ClientConfig, SyncSettings};
use crate::db::{LocalStore, OperationQueue};
use crate::error::{Error, Result};
use crate::models::{RecordId, SyncMetadata};
use crate::remote::{RemoteService, RestRemoteService};
use crate::repository::Repositories;
use crate::state::SyncState;

/// Entry point for clients: manual sync and refresh, login preload and the
/// reaction to connectivity coming back.
pub struct SyncCoordinator<R, A> {
    store: LocalStore,
    queue: OperationQueue,
    remote: Arc<R>,
    engine: SyncEngine<R>,
    pull: PullService<R>,
    connectivity: ConnectivityMonitor,
    auth: Arc<A>,
    settings: SyncSettings,
    state: watch::Sender<SyncState>,
}

impl<R, A> SyncCoordinator<R, A>
where
    R: RemoteService + 'static,
    A: AuthGate + 'static,
{
    pub fn new(
        store: LocalStore,
        remote: Arc<R>,
        auth: Arc<A>,
        connectivity: ConnectivityMonitor,
        settings: SyncSettings,
    ) -> Self {
        let initial = if connectivity.is_online() {
            SyncState::Synced
        } else {
            SyncState::Offline
        };
        let (state, _) = watch::channel(initial);
        Self {
            queue: OperationQueue::new(store.clone()),
            engine: SyncEngine::new(store.clone(), Arc::clone(&remote), settings),
            pull: PullService::new(store.clone(), Arc::clone(&remote)),
            store,
            remote,
            connectivity,
            auth,
            settings,
            state,
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn engine(&self) -> &SyncEngine<R> {
        &self.engine
    }

    /// Repositories sharing this coordinator's store, remote and connectivity
    pub fn repositories(&self) -> Repositories<R> {
        Repositories::new(
            self.store.clone(),
            Arc::clone(&self.remote),
            self.connectivity.clone(),
        )
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    fn publish(&self, state: SyncState) {
        self.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    /// Drain the operation queue. Skipped while offline.
    pub async fn perform_sync(&self) -> Result<SyncReport> {
        if !self.connectivity.is_online() {
            tracing::debug!("Offline, not draining the queue");
            self.publish(SyncState::Offline);
            return Ok(SyncReport::default());
        }

        self.publish(SyncState::Syncing);
        let result = self.engine.perform_sync().await;
        self.publish(match &result {
            Ok(report) if report.failed == 0 => SyncState::Synced,
            _ => SyncState::Error,
        });
        result
    }

    /// Manual refresh of every table
    pub async fn pull_data(&self) -> Result<PullReport> {
        if !self.auth.is_authenticated() {
            return Err(Error::NotAuthenticated);
        }
        self.refresh(None).await
    }

    /// Resolve the user's branch and preload it
    pub async fn on_login(&self, user_id: &str) -> Result<PullReport> {
        let branch = self.resolve_branch_id(user_id).await;

        let mut metadata = self.cached_metadata().await;
        if metadata.user_id.as_deref() != Some(user_id) {
            metadata.last_pull_at = None;
        }
        metadata.user_id = Some(user_id.to_string());
        metadata.branch_id.clone_from(&branch);
        if let Err(error) = self.store.save_metadata(&metadata).await {
            self.store.mark_degraded("saving login metadata", &error);
        }

        if !self.connectivity.is_online() {
            tracing::info!("Logged in offline, serving cached data");
            self.publish(SyncState::Offline);
            return Ok(PullReport::default());
        }
        self.refresh(branch.as_ref()).await
    }

    /// Branch of `user_id` from the server, bounded by the context timeout.
    /// Falls back to the cached branch when the lookup is slow or fails.
    pub async fn resolve_branch_id(&self, user_id: &str) -> Option<RecordId> {
        if !self.connectivity.is_online() {
            return self.cached_branch(user_id).await;
        }

        match tokio::time::timeout(
            self.settings.context_timeout,
            self.remote.user_branch(user_id),
        )
        .await
        {
            Ok(Ok(branch)) => branch,
            Ok(Err(error)) => {
                tracing::warn!("Branch lookup failed, using cached value: {error}");
                self.cached_branch(user_id).await
            }
            Err(_) => {
                tracing::warn!(
                    "Branch lookup exceeded {:?}, using cached value",
                    self.settings.context_timeout
                );
                self.cached_branch(user_id).await
            }
        }
    }

    /// React to connectivity coming back: drain pending work, then refresh
    pub async fn handle_reconnect(&self) {
        match self.queue.is_empty().await {
            Ok(true) => {}
            Ok(false) => {
                if let Err(error) = self.perform_sync().await {
                    tracing::warn!("Sync after reconnect failed: {error}");
                }
            }
            Err(error) => tracing::warn!("Could not inspect the sync queue: {error}"),
        }

        if self.auth.is_authenticated() {
            let branch = self.cached_metadata().await.branch_id;
            if let Err(error) = self.refresh(branch.as_ref()).await {
                tracing::warn!("Refresh after reconnect failed: {error}");
            }
        }
    }

    /// Watch the connectivity signal and run [`Self::handle_reconnect`] on
    /// every offline to online transition
    pub fn spawn_reconnect_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let mut online = self.connectivity.subscribe();
        tokio::spawn(async move {
            let mut was_online = *online.borrow_and_update();
            while online.changed().await.is_ok() {
                let is_online = *online.borrow_and_update();
                if is_online && !was_online {
                    tracing::info!("Back online, syncing");
                    coordinator.handle_reconnect().await;
                } else if !is_online {
                    coordinator.publish(SyncState::Offline);
                }
                was_online = is_online;
            }
        })
    }

    async fn refresh(&self, branch: Option<&RecordId>) -> Result<PullReport> {
        self.publish(SyncState::Syncing);
        let result = match branch {
            Some(branch) => self.pull.preload(branch).await,
            None => self.pull.pull_all().await,
        };
        self.publish(match &result {
            Ok(report) if report.degraded.is_empty() => SyncState::Synced,
            _ => SyncState::Error,
        });
        result
    }

    async fn cached_branch(&self, user_id: &str) -> Option<RecordId> {
        let metadata = self.cached_metadata().await;
        if metadata.user_id.as_deref() == Some(user_id) {
            metadata.branch_id
        } else {
            None
        }
    }

    async fn cached_metadata(&self) -> SyncMetadata {
        match self.store.load_metadata().await {
            Ok(metadata) => metadata,
            Err(error) => {
                self.store.mark_degraded("loading sync metadata", &error);
                SyncMetadata::default()
            }
        }
    }
}

impl<A: AuthGate + 'static> SyncCoordinator<RestRemoteService, A> {
    /// Open the on-disk store and the REST client described by `config`
    pub async fn open(
        config: &ClientConfig,
        auth: Arc<A>,
        connectivity: ConnectivityMonitor,
    ) -> Result<Self> {
        let store = LocalStore::open(&config.db_path).await?;
        let remote = Arc::new(RestRemoteService::from_config(config)?);
        Ok(Self::new(store, remote, auth, connectivity, config.sync))
    }
}
