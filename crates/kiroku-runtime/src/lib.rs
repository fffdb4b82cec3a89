mod db;

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use kiroku_api::trakt::TraktClient;
use kiroku_api::TrackingService;
use kiroku_core::config::AppConfig;
use kiroku_core::error::KirokuError;
use kiroku_core::jobs::{JobEvent, JobQueue, JobStore, JobTicket, SyncJob};
use kiroku_core::scheduler::{ExponentialBackoff, RetryPolicy, Scheduler};
use kiroku_core::storage::Storage;

pub use db::StoreHandle;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("config error: {0}")]
    Config(String),
    #[error(transparent)]
    Core(#[from] KirokuError),
    #[error("api error: {0}")]
    Api(String),
}

/// Build the Trakt client from the `[service]` section.
pub fn trakt_client(config: &AppConfig) -> Result<TraktClient, RuntimeError> {
    let client_id = config
        .service
        .client_id
        .clone()
        .ok_or_else(|| RuntimeError::Config("service.client_id is not set".into()))?;
    TraktClient::new(
        &config.service.base_url,
        client_id,
        config.service.access_token.clone(),
    )
    .map_err(|e| RuntimeError::Api(e.to_string()))
}

/// A running sync engine: the scheduler on a background task plus the
/// handles producers and readers need.
pub struct Engine<S> {
    queue: JobQueue,
    store: StoreHandle,
    service: Arc<S>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Engine<TraktClient> {
    /// Start against Trakt using the configured credentials and the
    /// default data paths. Must be called inside a Tokio runtime.
    pub fn start(config: &AppConfig) -> Result<Self, RuntimeError> {
        let client = trakt_client(config)?;
        AppConfig::ensure_data_dir()?;
        Self::start_with(
            &AppConfig::db_path(),
            &AppConfig::jobs_db_path(),
            Arc::new(client),
            ExponentialBackoff::from_config(&config.queue),
        )
    }

    /// Swap credentials and release jobs held on an auth failure.
    pub fn set_access_token(&self, token: Option<String>) {
        self.service.set_access_token(token);
        self.queue.resume_auth();
    }

    /// Pick up a token saved by another process (e.g. `kiroku login`).
    /// Returns true if the token changed.
    pub fn reload_credentials(&self, config: &AppConfig) -> bool {
        let latest = config.service.access_token.clone();
        if latest == self.service.access_token() {
            return false;
        }
        info!(authenticated = latest.is_some(), "Access token changed");
        self.set_access_token(latest);
        true
    }
}

impl<S: TrackingService + 'static> Engine<S> {
    pub fn start_with(
        db_path: &Path,
        jobs_path: &Path,
        service: Arc<S>,
        retry: impl RetryPolicy + 'static,
    ) -> Result<Self, RuntimeError> {
        let storage = Storage::open(db_path)?;
        let store = StoreHandle::open(db_path)?;
        let queue = JobQueue::open(JobStore::open(jobs_path)?)?;

        let scheduler = Scheduler::new(storage, queue.clone(), Arc::clone(&service), retry);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(scheduler.run(shutdown_rx));
        info!(pending = queue.len(), "Engine started");

        Ok(Self {
            queue,
            store,
            service,
            shutdown,
            task,
        })
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn store(&self) -> StoreHandle {
        self.store.clone()
    }

    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    /// Queue a full sync of the account's lists.
    pub fn sync_now(&self) -> Result<JobTicket, RuntimeError> {
        Ok(self.queue.submit(SyncJob::SyncLists)?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.queue.subscribe()
    }

    /// Stop after the job in flight (if any) finishes. Pending jobs stay
    /// persisted for the next start.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Scheduler task ended abnormally");
        }
        info!(pending = self.queue.len(), "Engine stopped");
    }
}
