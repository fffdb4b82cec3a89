use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::futures::Notified;
use tokio::sync::{broadcast, oneshot, Notify};
use tracing::{debug, info};

use super::job::{JobEvent, JobFlags, JobOutcome, JobPriority, JobTicket, SyncJob};
use super::store::JobStore;
use crate::error::KirokuError;

const EVENT_CAPACITY: usize = 256;

/// Position in the queue: most urgent tier first, then submission order.
type Slot = (Reverse<JobPriority>, i64);

struct Entry {
    seq: i64,
    job: SyncJob,
    key: String,
    priority: JobPriority,
    flags: JobFlags,
    attempts: u32,
    not_before: Option<DateTime<Utc>>,
    /// Rejected for auth; skipped until credentials change.
    held: bool,
    listeners: Vec<oneshot::Sender<JobOutcome>>,
}

impl Entry {
    fn slot(&self) -> Slot {
        (Reverse(self.priority), self.seq)
    }
}

struct QueueState {
    store: JobStore,
    pending: BTreeMap<Slot, Entry>,
    by_key: HashMap<String, Slot>,
    running: Option<String>,
    auth_held: bool,
}

impl QueueState {
    fn push(&mut self, entry: Entry) {
        let slot = entry.slot();
        self.by_key.insert(entry.key.clone(), slot);
        self.pending.insert(slot, entry);
    }

    fn take(&mut self, slot: &Slot) -> Option<Entry> {
        let entry = self.pending.remove(slot)?;
        self.by_key.remove(&entry.key);
        Some(entry)
    }

    /// Fold listeners (and priority) into the pending job at `slot`.
    /// Listeners whose ticket was dropped are pruned on the way.
    fn merge(
        &mut self,
        slot: Slot,
        priority: JobPriority,
        listeners: Vec<oneshot::Sender<JobOutcome>>,
    ) -> Result<(), KirokuError> {
        let Some(mut entry) = self.take(&slot) else {
            return Ok(());
        };
        entry.listeners.retain(|l| !l.is_closed());
        entry
            .listeners
            .extend(listeners.into_iter().filter(|l| !l.is_closed()));
        let elevated = entry.priority.elevate(priority);
        let changed = elevated != entry.priority;
        entry.priority = elevated;
        let seq = entry.seq;
        self.push(entry);
        if changed {
            self.store.set_priority(seq, elevated)?;
        }
        Ok(())
    }
}

/// A job checked out for execution. Hand it back through
/// [`JobQueue::complete`], [`JobQueue::retry`] or [`JobQueue::hold`].
#[derive(Debug)]
pub struct ActiveJob {
    pub seq: i64,
    pub job: SyncJob,
    pub key: String,
    pub priority: JobPriority,
    pub flags: JobFlags,
    /// Failed attempts so far.
    pub attempts: u32,
    listeners: Vec<oneshot::Sender<JobOutcome>>,
}

/// Result of asking the queue for work.
#[derive(Debug)]
pub enum Checkout {
    Ready(ActiveJob),
    /// Nothing can run right now. `next_due` is the earliest backoff
    /// deadline among otherwise runnable jobs.
    Idle { next_due: Option<DateTime<Utc>> },
}

/// Read-only view of a pending job.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    pub key: String,
    pub priority: JobPriority,
    pub attempts: u32,
    pub not_before: Option<DateTime<Utc>>,
}

/// Counts over the pending jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    /// Pending jobs waiting out a retry delay.
    pub backing_off: usize,
    /// Pending jobs parked after an auth rejection.
    pub held: usize,
    pub by_priority: BTreeMap<JobPriority, usize>,
    pub running: Option<String>,
    pub auth_held: bool,
}

struct Inner {
    state: Mutex<QueueState>,
    notify: Notify,
    events: broadcast::Sender<JobEvent>,
}

/// Shared handle to the job queue. Cheap to clone; every producer gets one.
///
/// Holds at most one pending job per dedup key. A job that is currently
/// running is not pending, so resubmitting its key queues a fresh run.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

impl JobQueue {
    /// Build the queue from its store, resuming every persisted job.
    pub fn open(store: JobStore) -> Result<Self, KirokuError> {
        let stored = store.load()?;
        let mut state = QueueState {
            store,
            pending: BTreeMap::new(),
            by_key: HashMap::new(),
            running: None,
            auth_held: false,
        };

        let mut duplicates = 0usize;
        for row in stored {
            let key = row.job.key();
            if let Some(slot) = state.by_key.get(&key).copied() {
                state.store.remove(row.seq)?;
                state.merge(slot, row.priority, Vec::new())?;
                duplicates += 1;
                continue;
            }
            state.push(Entry {
                seq: row.seq,
                key,
                job: row.job,
                priority: row.priority,
                flags: row.flags,
                attempts: row.attempts,
                not_before: row.not_before,
                held: false,
                listeners: Vec::new(),
            });
        }
        if !state.pending.is_empty() {
            info!(
                resumed = state.pending.len(),
                duplicates, "Resumed persisted jobs"
            );
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                notify: Notify::new(),
                events,
            }),
        })
    }

    pub fn open_memory() -> Result<Self, KirokuError> {
        Self::open(JobStore::open_memory()?)
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Submit a job. If the same work is already pending, the submission is
    /// merged into it (raising its priority if needed) instead of queued twice.
    pub fn submit(&self, job: SyncJob) -> Result<JobTicket, KirokuError> {
        let key = job.key();
        let priority = job.priority();
        let (tx, rx) = oneshot::channel();
        let ticket = JobTicket::new(key.clone(), rx);

        let mut guard = self.state();
        let state = &mut *guard;
        if let Some(slot) = state.by_key.get(&key).copied() {
            debug!(key = %key, "Merged into pending job");
            state.merge(slot, priority, vec![tx])?;
            return Ok(ticket);
        }

        let seq = state.store.insert(&job, priority)?;
        debug!(key = %key, seq, %priority, "Queued job");
        state.push(Entry {
            seq,
            flags: job.flags(),
            job,
            key,
            priority,
            attempts: 0,
            not_before: None,
            held: false,
            listeners: vec![tx],
        });
        drop(guard);

        self.inner.notify.notify_one();
        Ok(ticket)
    }

    /// Take the most urgent job that may run now.
    pub fn checkout(&self, authenticated: bool) -> Checkout {
        self.checkout_at(Utc::now(), authenticated)
    }

    /// Like [`checkout`](Self::checkout) with an explicit clock.
    ///
    /// Jobs that need auth are skipped while unauthenticated or while the
    /// queue is holding for fresh credentials. Jobs backing off are skipped
    /// until `not_before`.
    pub fn checkout_at(&self, now: DateTime<Utc>, authenticated: bool) -> Checkout {
        self.checkout_from(now, authenticated, JobPriority::Extras)
    }

    /// Like [`checkout_at`](Self::checkout_at), ignoring jobs below `floor`.
    pub fn checkout_from(
        &self,
        now: DateTime<Utc>,
        authenticated: bool,
        floor: JobPriority,
    ) -> Checkout {
        let mut guard = self.state();
        let state = &mut *guard;
        let may_auth = authenticated && !state.auth_held;

        let mut next_due: Option<DateTime<Utc>> = None;
        let slot = state.pending.iter().find_map(|(slot, entry)| {
            if entry.priority < floor || entry.held {
                return None;
            }
            if entry.flags.contains(JobFlags::REQUIRES_AUTH) && !may_auth {
                return None;
            }
            match entry.not_before {
                Some(at) if at > now => {
                    next_due = Some(next_due.map_or(at, |due| due.min(at)));
                    None
                }
                _ => Some(*slot),
            }
        });

        let Some(entry) = slot.and_then(|slot| state.take(&slot)) else {
            return Checkout::Idle { next_due };
        };
        state.running = Some(entry.key.clone());
        Checkout::Ready(ActiveJob {
            seq: entry.seq,
            job: entry.job,
            key: entry.key,
            priority: entry.priority,
            flags: entry.flags,
            attempts: entry.attempts,
            listeners: entry.listeners,
        })
    }

    /// Finish a job: drop its row and notify every listener.
    pub fn complete(&self, active: ActiveJob, outcome: JobOutcome) -> Result<(), KirokuError> {
        let removed = {
            let mut state = self.state();
            state.running = None;
            state.store.remove(active.seq)
        };
        self.settle(&active.key, active.listeners, outcome);
        removed
    }

    /// Put a job back to run again at or after `not_before`, counting the
    /// failed attempt.
    pub fn retry(&self, active: ActiveJob, not_before: DateTime<Utc>) -> Result<(), KirokuError> {
        let attempts = active.attempts + 1;
        self.requeue(active, attempts, Some(not_before), false)
    }

    /// Put a job back because its credentials were rejected. The job itself
    /// and every job needing auth stay parked until
    /// [`resume_auth`](Self::resume_auth).
    pub fn hold(&self, active: ActiveJob) -> Result<(), KirokuError> {
        self.state().auth_held = true;
        let attempts = active.attempts;
        self.requeue(active, attempts, None, true)
    }

    /// Credentials changed: let held and auth-requiring jobs run again.
    pub fn resume_auth(&self) {
        {
            let mut state = self.state();
            state.auth_held = false;
            for entry in state.pending.values_mut() {
                entry.held = false;
            }
        }
        self.inner.notify.notify_one();
    }

    pub fn auth_held(&self) -> bool {
        self.state().auth_held
    }

    fn requeue(
        &self,
        active: ActiveJob,
        attempts: u32,
        not_before: Option<DateTime<Utc>>,
        held: bool,
    ) -> Result<(), KirokuError> {
        let mut guard = self.state();
        let state = &mut *guard;
        state.running = None;

        // The same work was resubmitted while this run was in flight.
        if let Some(slot) = state.by_key.get(&active.key).copied() {
            state.merge(slot, active.priority, active.listeners)?;
            state.store.remove(active.seq)?;
            if held {
                if let Some(slot) = state.by_key.get(&active.key).copied() {
                    if let Some(entry) = state.pending.get_mut(&slot) {
                        entry.held = true;
                    }
                }
            }
            return Ok(());
        }

        state.push(Entry {
            seq: active.seq,
            job: active.job,
            key: active.key,
            priority: active.priority,
            flags: active.flags,
            attempts,
            not_before,
            held,
            listeners: active.listeners,
        });
        state.store.record_attempt(active.seq, attempts, not_before)?;
        drop(guard);

        self.inner.notify.notify_one();
        Ok(())
    }

    /// Withdraw a pending job. Its listeners resolve with `Cancelled`.
    /// Returns false if no job with that key is pending.
    pub fn cancel(&self, key: &str) -> Result<bool, KirokuError> {
        let (entry, removed) = {
            let mut guard = self.state();
            let state = &mut *guard;
            let Some(slot) = state.by_key.get(key).copied() else {
                return Ok(false);
            };
            let Some(entry) = state.take(&slot) else {
                return Ok(false);
            };
            let removed = state.store.remove(entry.seq);
            (entry, removed)
        };
        info!(key = %entry.key, "Cancelled job");
        self.settle(&entry.key, entry.listeners, JobOutcome::Cancelled);
        removed.map(|()| true)
    }

    /// Cancel every pending job carrying all of `flags`.
    pub fn cancel_with_flags(&self, flags: JobFlags) -> Result<usize, KirokuError> {
        let keys: Vec<String> = self
            .state()
            .pending
            .values()
            .filter(|e| e.flags.contains(flags))
            .map(|e| e.key.clone())
            .collect();
        let mut cancelled = 0;
        for key in keys {
            if self.cancel(&key)? {
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    /// Cancel every pending job.
    pub fn clear(&self) -> Result<usize, KirokuError> {
        self.cancel_with_flags(JobFlags::empty())
    }

    /// Pending jobs in execution order.
    pub fn snapshot(&self) -> Vec<QueuedJob> {
        self.state()
            .pending
            .values()
            .map(|e| QueuedJob {
                key: e.key.clone(),
                priority: e.priority,
                attempts: e.attempts,
                not_before: e.not_before,
            })
            .collect()
    }

    pub fn stats(&self) -> QueueStats {
        self.stats_at(Utc::now())
    }

    pub fn stats_at(&self, now: DateTime<Utc>) -> QueueStats {
        let state = self.state();
        let mut stats = QueueStats {
            pending: state.pending.len(),
            running: state.running.clone(),
            auth_held: state.auth_held,
            ..QueueStats::default()
        };
        for entry in state.pending.values() {
            *stats.by_priority.entry(entry.priority).or_default() += 1;
            if entry.not_before.is_some_and(|at| at > now) {
                stats.backing_off += 1;
            }
            if entry.held {
                stats.held += 1;
            }
        }
        stats
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state().by_key.contains_key(key)
    }

    /// Number of pending jobs (not counting one that is running).
    pub fn len(&self) -> usize {
        self.state().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Key of the job currently executing, if any.
    pub fn running(&self) -> Option<String> {
        self.state().running.clone()
    }

    /// Receive a [`JobEvent`] for every job that reaches a terminal state.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// Resolves after the next submit, requeue or auth change.
    pub fn notified(&self) -> Notified<'_> {
        self.inner.notify.notified()
    }

    fn settle(&self, key: &str, listeners: Vec<oneshot::Sender<JobOutcome>>, outcome: JobOutcome) {
        for listener in listeners {
            // The waiter may have given up; that is fine.
            let _ = listener.send(outcome.clone());
        }
        let _ = self.inner.events.send(JobEvent {
            key: key.to_string(),
            outcome,
        });
    }
}
