//! Persisted, prioritized, deduplicating job queue.

pub mod job;
pub mod queue;
pub mod store;

pub use job::{JobEvent, JobFlags, JobOutcome, JobPriority, JobTicket, SyncJob};
pub use queue::{ActiveJob, Checkout, JobQueue, QueueStats, QueuedJob};
pub use store::{JobStore, StoredJob};
