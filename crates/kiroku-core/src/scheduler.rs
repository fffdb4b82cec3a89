//! The single sequential executor that drains the job queue.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kiroku_api::TrackingService;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::error::JobError;
use crate::jobs::{ActiveJob, Checkout, JobOutcome, JobPriority, JobQueue, SyncJob};
use crate::storage::Storage;
use crate::sync;

/// Decides whether and when a transiently failed job runs again.
pub trait RetryPolicy: Send + Sync {
    /// Delay before the next try after `attempts` failures, or `None` to give up.
    fn next_delay(&self, attempts: u32) -> Option<Duration>;
}

/// Doubling delay from `base`, capped at `max`, for up to `max_attempts` tries.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
}

impl ExponentialBackoff {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            base: config.backoff_base(),
            max: config.backoff_max(),
            max_attempts: config.max_attempts,
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&self, attempts: u32) -> Option<Duration> {
        if attempts == 0 || attempts >= self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempts - 1).unwrap_or(u32::MAX);
        Some(self.base.saturating_mul(factor).min(self.max))
    }
}

/// What happened to a job after one run.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    Succeeded,
    Retrying {
        attempts: u32,
        not_before: DateTime<Utc>,
    },
    /// Parked until credentials are refreshed.
    Held,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub key: String,
    pub disposition: Disposition,
}

/// Owns the store and runs one job at a time against the remote service.
pub struct Scheduler<S> {
    storage: Storage,
    queue: JobQueue,
    service: Arc<S>,
    retry: Box<dyn RetryPolicy>,
}

impl<S: TrackingService + 'static> Scheduler<S> {
    pub fn new(
        storage: Storage,
        queue: JobQueue,
        service: Arc<S>,
        retry: impl RetryPolicy + 'static,
    ) -> Self {
        Self {
            storage,
            queue,
            service,
            retry: Box::new(retry),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Run the most urgent runnable job, if there is one.
    pub async fn run_next(&mut self) -> Option<JobReport> {
        self.run_next_from(JobPriority::Extras).await
    }

    async fn run_next_from(&mut self, floor: JobPriority) -> Option<JobReport> {
        let authenticated = self.service.is_authenticated();
        match self.queue.checkout_from(Utc::now(), authenticated, floor) {
            Checkout::Ready(active) => Some(self.execute(active).await),
            Checkout::Idle { .. } => None,
        }
    }

    /// Run jobs until none can run right now. Jobs backing off or waiting
    /// for credentials stay queued.
    pub async fn run_until_idle(&mut self) -> Vec<JobReport> {
        self.run_until_idle_from(JobPriority::Extras).await
    }

    /// Like [`run_until_idle`](Self::run_until_idle), leaving jobs below
    /// `floor` queued for a later run.
    pub async fn run_until_idle_from(&mut self, floor: JobPriority) -> Vec<JobReport> {
        let mut reports = Vec::new();
        while let Some(report) = self.run_next_from(floor).await {
            reports.push(report);
        }
        reports
    }

    /// Drain the queue until `shutdown` flips to true, sleeping while idle.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(pending = self.queue.len(), "Scheduler started");
        let queue = self.queue.clone();
        loop {
            let stop = *shutdown.borrow();
            if stop {
                break;
            }
            match queue.checkout(self.service.is_authenticated()) {
                Checkout::Ready(active) => {
                    self.execute(active).await;
                }
                Checkout::Idle { next_due } => {
                    let wait = next_due
                        .map(|at| (at - Utc::now()).to_std().unwrap_or(Duration::ZERO));
                    tokio::select! {
                        _ = queue.notified() => {}
                        _ = sleep_for(wait) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }
        info!("Scheduler stopped");
    }

    async fn execute(&mut self, active: ActiveJob) -> JobReport {
        let key = active.key.clone();
        debug!(key = %key, attempts = active.attempts, "Running job");
        let result = self.dispatch(&active.job).await;
        let disposition = self.settle(active, result);
        JobReport { key, disposition }
    }

    // Takes `&mut self` so the future stays `Send`; the store is not `Sync`.
    async fn dispatch(&mut self, job: &SyncJob) -> Result<(), JobError> {
        match *job {
            SyncJob::SyncLists => {
                let lists = self.service.lists().await.map_err(JobError::from_service)?;
                sync::lists::apply(&self.storage, &self.queue, &lists)?;
            }
            SyncJob::SyncList { trakt_id } => {
                let entries = self
                    .service
                    .list_items(trakt_id)
                    .await
                    .map_err(JobError::from_service)?;
                sync::list::apply(&self.storage, &self.queue, trakt_id, &entries)?;
            }
            SyncJob::SyncShow { trakt_id } => {
                let show = self
                    .service
                    .show(trakt_id)
                    .await
                    .map_err(JobError::from_service)?;
                let seasons = self
                    .service
                    .seasons(trakt_id)
                    .await
                    .map_err(JobError::from_service)?;
                sync::details::apply_show(&self.storage, &show, &seasons)?;
            }
            SyncJob::SyncSeason {
                show_trakt_id,
                season,
            } => {
                let episodes = self
                    .service
                    .season_episodes(show_trakt_id, season)
                    .await
                    .map_err(JobError::from_service)?;
                sync::details::apply_season(&self.storage, show_trakt_id, season, &episodes)?;
            }
            SyncJob::SyncMovie { trakt_id } => {
                let movie = self
                    .service
                    .movie(trakt_id)
                    .await
                    .map_err(JobError::from_service)?;
                sync::details::apply_movie(&self.storage, &movie)?;
            }
            SyncJob::SyncPerson { trakt_id } => {
                let person = self
                    .service
                    .person(trakt_id)
                    .await
                    .map_err(JobError::from_service)?;
                sync::details::apply_person(&self.storage, &person)?;
            }
        }
        Ok(())
    }

    fn settle(&self, active: ActiveJob, result: Result<(), JobError>) -> Disposition {
        let key = active.key.clone();
        let (disposition, persisted) = match result {
            Ok(()) => (
                Disposition::Succeeded,
                self.queue.complete(active, JobOutcome::Succeeded),
            ),
            Err(JobError::NotFound(reason)) => {
                info!(key = %key, reason = %reason, "Remote resource gone, nothing to sync");
                (
                    Disposition::Succeeded,
                    self.queue.complete(active, JobOutcome::Succeeded),
                )
            }
            Err(JobError::AuthRequired(reason)) => {
                warn!(key = %key, reason = %reason, "Holding job until credentials are refreshed");
                (Disposition::Held, self.queue.hold(active))
            }
            Err(JobError::Transient(reason)) => {
                let attempts = active.attempts + 1;
                match self.retry.next_delay(attempts) {
                    Some(delay) => {
                        let not_before = Utc::now()
                            + chrono::Duration::from_std(delay)
                                .unwrap_or_else(|_| chrono::Duration::zero());
                        warn!(key = %key, attempts, reason = %reason, retry_at = %not_before, "Job failed, retrying");
                        (
                            Disposition::Retrying {
                                attempts,
                                not_before,
                            },
                            self.queue.retry(active, not_before),
                        )
                    }
                    None => {
                        let reason = format!("gave up after {attempts} attempts: {reason}");
                        error!(key = %key, reason = %reason, "Job failed");
                        (
                            Disposition::Failed(reason.clone()),
                            self.queue.complete(active, JobOutcome::Failed(reason)),
                        )
                    }
                }
            }
            Err(err) => {
                let reason = err.to_string();
                error!(key = %key, reason = %reason, "Job failed");
                (
                    Disposition::Failed(reason.clone()),
                    self.queue.complete(active, JobOutcome::Failed(reason)),
                )
            }
        };
        if let Err(e) = persisted {
            error!(key = %key, error = %e, "Failed to persist job state");
        }
        disposition
    }
}

async fn sleep_for(wait: Option<Duration>) {
    match wait {
        Some(wait) => tokio::time::sleep(wait).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use chrono::TimeZone;
    use kiroku_api::{
        EpisodeSummary, ErrorClass, ListEntry, ListedItem, MovieSummary, PersonSummary,
        RemoteList, SeasonSummary, ServiceError, ShowSummary,
    };

    use super::*;
    use crate::jobs::JobFlags;
    use crate::models::ItemKind;

    #[derive(Debug, thiserror::Error)]
    #[error("fake {0:?} failure")]
    struct FakeError(ErrorClass);

    impl ServiceError for FakeError {
        fn class(&self) -> ErrorClass {
            self.0
        }
    }

    #[derive(Default)]
    struct FakeService {
        authenticated: AtomicBool,
        lists: Vec<RemoteList>,
        items: HashMap<u64, Vec<ListEntry>>,
        failures: Mutex<VecDeque<ErrorClass>>,
    }

    impl FakeService {
        fn authenticated() -> Self {
            let service = Self::default();
            service.authenticated.store(true, Ordering::SeqCst);
            service
        }

        fn fail_next(&self, classes: &[ErrorClass]) {
            self.failures.lock().unwrap().extend(classes);
        }

        fn call(&self) -> Result<(), FakeError> {
            match self.failures.lock().unwrap().pop_front() {
                Some(class) => Err(FakeError(class)),
                None => Ok(()),
            }
        }
    }

    impl TrackingService for FakeService {
        type Error = FakeError;

        fn is_authenticated(&self) -> bool {
            self.authenticated.load(Ordering::SeqCst)
        }

        async fn lists(&self) -> Result<Vec<RemoteList>, FakeError> {
            self.call()?;
            Ok(self.lists.clone())
        }

        async fn list_items(&self, list_id: u64) -> Result<Vec<ListEntry>, FakeError> {
            self.call()?;
            self.items
                .get(&list_id)
                .cloned()
                .ok_or(FakeError(ErrorClass::NotFound))
        }

        async fn show(&self, show_id: u64) -> Result<ShowSummary, FakeError> {
            self.call()?;
            Ok(ShowSummary {
                trakt_id: show_id,
                title: format!("Show {show_id}"),
                year: Some(2008),
                overview: None,
            })
        }

        async fn seasons(&self, _show_id: u64) -> Result<Vec<SeasonSummary>, FakeError> {
            self.call()?;
            Ok(vec![SeasonSummary {
                number: 1,
                title: Some("Season 1".into()),
                episode_count: Some(2),
            }])
        }

        async fn season_episodes(
            &self,
            _show_id: u64,
            season: u32,
        ) -> Result<Vec<EpisodeSummary>, FakeError> {
            self.call()?;
            Ok((1..=2)
                .map(|number| EpisodeSummary {
                    season,
                    number,
                    trakt_id: None,
                    title: Some(format!("Episode {number}")),
                    first_aired: None,
                })
                .collect())
        }

        async fn movie(&self, movie_id: u64) -> Result<MovieSummary, FakeError> {
            self.call()?;
            Ok(MovieSummary {
                trakt_id: movie_id,
                title: format!("Movie {movie_id}"),
                year: None,
                overview: None,
            })
        }

        async fn person(&self, person_id: u64) -> Result<PersonSummary, FakeError> {
            self.call()?;
            Ok(PersonSummary {
                trakt_id: person_id,
                name: format!("Person {person_id}"),
                biography: Some("Bio".into()),
                birthday: None,
            })
        }
    }

    /// Retries immediately, up to `max_attempts` tries.
    struct Immediate(u32);

    impl RetryPolicy for Immediate {
        fn next_delay(&self, attempts: u32) -> Option<Duration> {
            (attempts < self.0).then_some(Duration::ZERO)
        }
    }

    fn scheduler(service: FakeService) -> Scheduler<FakeService> {
        Scheduler::new(
            Storage::open_memory().unwrap(),
            JobQueue::open_memory().unwrap(),
            Arc::new(service),
            Immediate(3),
        )
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_600_000_000 + secs, 0).unwrap()
    }

    fn sample_service() -> FakeService {
        let mut service = FakeService::authenticated();
        service.lists = vec![RemoteList {
            trakt_id: 55,
            name: "Watchlist".into(),
            description: None,
            item_count: 4,
            updated_at: None,
        }];
        service.items.insert(
            55,
            vec![
                ListEntry {
                    listed_at: at(0),
                    item: ListedItem::Show { show: 777 },
                },
                ListEntry {
                    listed_at: at(1),
                    item: ListedItem::Movie { movie: 888 },
                },
                ListEntry {
                    listed_at: at(2),
                    item: ListedItem::Person(PersonSummary {
                        trakt_id: 5,
                        name: "Inline".into(),
                        biography: None,
                        birthday: None,
                    }),
                },
                ListEntry {
                    listed_at: at(3),
                    item: ListedItem::Episode {
                        show: 777,
                        season: 1,
                        number: 1,
                    },
                },
            ],
        );
        service
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = ExponentialBackoff {
            base: Duration::from_secs(30),
            max: Duration::from_secs(100),
            max_attempts: 5,
        };
        assert_eq!(policy.next_delay(1), Some(Duration::from_secs(30)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_secs(60)));
        assert_eq!(policy.next_delay(3), Some(Duration::from_secs(100)));
        assert_eq!(policy.next_delay(5), None);
    }

    #[tokio::test]
    async fn test_full_sync_cascades_detail_jobs() {
        let mut scheduler = scheduler(sample_service());
        let ticket = scheduler.queue().submit(SyncJob::SyncLists).unwrap();

        let reports = scheduler.run_until_idle().await;
        let keys: Vec<&str> = reports.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "SyncLists",
                "SyncList&id=55",
                "SyncShow&id=777",
                "SyncMovie&id=888",
                "SyncPerson&id=5",
            ]
        );
        assert!(reports
            .iter()
            .all(|r| r.disposition == Disposition::Succeeded));
        assert_eq!(ticket.wait().await, JobOutcome::Succeeded);

        let storage = scheduler.storage();
        let list_id = storage.list_id(55).unwrap().unwrap();
        let rows = storage.list_items(list_id).unwrap();
        assert_eq!(rows.len(), 4);

        let show_id = storage.show_id_or_create(777).unwrap().id;
        let show = storage.get_show(show_id).unwrap().unwrap();
        assert_eq!(show.title.as_deref(), Some("Show 777"));
        assert!(show.last_synced.is_some());

        let person = rows
            .iter()
            .find(|r| r.key.kind == ItemKind::Person)
            .unwrap();
        let person = storage.get_person(person.key.id).unwrap().unwrap();
        assert_eq!(person.name, "Person 5");
        assert!(person.last_synced.is_some());
        assert!(scheduler.queue().is_empty());
    }

    #[tokio::test]
    async fn test_user_data_floor_leaves_detail_jobs_queued() {
        let mut scheduler = scheduler(sample_service());
        scheduler.queue().submit(SyncJob::SyncLists).unwrap();

        let reports = scheduler
            .run_until_idle_from(JobPriority::UserData)
            .await;
        let keys: Vec<&str> = reports.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["SyncLists", "SyncList&id=55"]);
        assert_eq!(scheduler.queue().len(), 3);
    }

    #[tokio::test]
    async fn test_new_episode_under_synced_season_runs_season_job() {
        let mut scheduler = scheduler(FakeService::authenticated());
        let show_id = scheduler.storage().show_id_or_create(1).unwrap().id;
        scheduler.storage().season_id_or_create(show_id, 1).unwrap();
        scheduler
            .queue()
            .submit(SyncJob::SyncSeason {
                show_trakt_id: 1,
                season: 1,
            })
            .unwrap();

        let reports = scheduler.run_until_idle().await;
        assert_eq!(reports.len(), 1);
        let season = scheduler.storage().get_season(show_id, 1).unwrap().unwrap();
        assert_eq!(scheduler.storage().get_episodes(season.id).unwrap().len(), 2);
        assert!(season.last_synced.is_some());
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let service = FakeService::authenticated();
        service.fail_next(&[ErrorClass::Transient]);
        let mut scheduler = scheduler(service);
        let ticket = scheduler
            .queue()
            .submit(SyncJob::SyncMovie { trakt_id: 1 })
            .unwrap();

        let first = scheduler.run_next().await.unwrap();
        assert!(matches!(
            first.disposition,
            Disposition::Retrying { attempts: 1, .. }
        ));
        let second = scheduler.run_next().await.unwrap();
        assert_eq!(second.disposition, Disposition::Succeeded);
        assert_eq!(ticket.wait().await, JobOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_transient_failure_gives_up_after_max_attempts() {
        let service = FakeService::authenticated();
        service.fail_next(&[ErrorClass::Transient; 3]);
        let mut scheduler = scheduler(service);
        let ticket = scheduler
            .queue()
            .submit(SyncJob::SyncMovie { trakt_id: 1 })
            .unwrap();

        let reports = scheduler.run_until_idle().await;
        assert_eq!(reports.len(), 3);
        assert!(matches!(reports[2].disposition, Disposition::Failed(_)));
        assert!(matches!(ticket.wait().await, JobOutcome::Failed(_)));
        assert!(scheduler.queue().is_empty());
    }

    #[tokio::test]
    async fn test_backoff_keeps_job_queued() {
        let service = FakeService::authenticated();
        service.fail_next(&[ErrorClass::Transient]);
        let mut scheduler = Scheduler::new(
            Storage::open_memory().unwrap(),
            JobQueue::open_memory().unwrap(),
            Arc::new(service),
            ExponentialBackoff::from_config(&crate::config::AppConfig::default().queue),
        );
        scheduler
            .queue()
            .submit(SyncJob::SyncMovie { trakt_id: 1 })
            .unwrap();

        let reports = scheduler.run_until_idle().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(scheduler.queue().snapshot()[0].attempts, 1);
        assert!(scheduler.queue().snapshot()[0].not_before.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_auth_failure_holds_without_failing() {
        let service = sample_service();
        service.fail_next(&[ErrorClass::Auth]);
        let mut scheduler = scheduler(service);
        let ticket = scheduler.queue().submit(SyncJob::SyncLists).unwrap();
        scheduler
            .queue()
            .submit(SyncJob::SyncPerson { trakt_id: 9 })
            .unwrap();

        let reports = scheduler.run_until_idle().await;
        assert_eq!(reports[0].disposition, Disposition::Held);
        // Jobs without auth needs keep running.
        assert_eq!(reports[1].key, "SyncPerson&id=9");
        assert_eq!(reports.len(), 2);
        assert!(scheduler.queue().contains("SyncLists"));

        scheduler.queue().resume_auth();
        let reports = scheduler.run_until_idle().await;
        assert_eq!(reports[0].key, "SyncLists");
        assert_eq!(ticket.wait().await, JobOutcome::Succeeded);
    }

    #[tokio::test]
    async fn test_auth_rejection_on_public_job_does_not_spin() {
        let service = FakeService::authenticated();
        service.fail_next(&[ErrorClass::Auth; 5]);
        let mut scheduler = scheduler(service);
        scheduler
            .queue()
            .submit(SyncJob::SyncShow { trakt_id: 1 })
            .unwrap();

        let reports = scheduler.run_until_idle().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].disposition, Disposition::Held);
        assert!(scheduler.run_next().await.is_none());
        assert_eq!(scheduler.queue().stats().held, 1);

        scheduler.queue().resume_auth();
        let report = scheduler.run_next().await.unwrap();
        assert_eq!(report.key, "SyncShow&id=1");
        assert!(scheduler.run_next().await.is_none());
    }

    #[tokio::test]
    async fn test_unauthenticated_service_leaves_auth_jobs_queued() {
        let mut scheduler = scheduler(FakeService::default());
        scheduler.queue().submit(SyncJob::SyncLists).unwrap();
        assert!(scheduler.run_until_idle().await.is_empty());
        assert_eq!(
            scheduler.queue().cancel_with_flags(JobFlags::REQUIRES_AUTH).unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_fatal_failure_does_not_halt_queue() {
        let service = FakeService::authenticated();
        service.fail_next(&[ErrorClass::Fatal]);
        let mut scheduler = scheduler(service);
        let failed = scheduler
            .queue()
            .submit(SyncJob::SyncShow { trakt_id: 1 })
            .unwrap();
        scheduler
            .queue()
            .submit(SyncJob::SyncMovie { trakt_id: 2 })
            .unwrap();

        let reports = scheduler.run_until_idle().await;
        assert_eq!(reports.len(), 2);
        assert!(matches!(reports[0].disposition, Disposition::Failed(_)));
        assert_eq!(reports[1].disposition, Disposition::Succeeded);
        assert!(matches!(failed.wait().await, JobOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn test_vanished_remote_list_is_a_no_op() {
        let mut scheduler = scheduler(FakeService::authenticated());
        scheduler
            .queue()
            .submit(SyncJob::SyncList { trakt_id: 404 })
            .unwrap();
        let reports = scheduler.run_until_idle().await;
        assert_eq!(reports[0].disposition, Disposition::Succeeded);
    }

    #[tokio::test]
    async fn test_run_loop_wakes_on_submit_and_stops() {
        let scheduler = scheduler(sample_service());
        let queue = scheduler.queue().clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.run(shutdown_rx));

        let ticket = queue.submit(SyncJob::SyncLists).unwrap();
        assert_eq!(ticket.wait().await, JobOutcome::Succeeded);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
