use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::job::{JobFlags, JobPriority, SyncJob};
use crate::error::KirokuError;
use crate::storage::parse_datetime;

const JOBS_V1: &str = include_str!("../../../../migrations/jobs/001_job_queue.sql");

/// A job row as persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredJob {
    pub seq: i64,
    pub job: SyncJob,
    pub priority: JobPriority,
    pub flags: JobFlags,
    pub attempts: u32,
    pub not_before: Option<DateTime<Utc>>,
}

/// Durable backing store of the job queue.
pub struct JobStore {
    conn: Connection,
}

impl JobStore {
    pub fn open(path: &Path) -> Result<Self, KirokuError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        run_migrations(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_memory() -> Result<Self, KirokuError> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Persist a new job and return its sequence number.
    pub fn insert(&self, job: &SyncJob, priority: JobPriority) -> Result<i64, KirokuError> {
        let payload = serde_json::to_string(job)?;
        self.conn.execute(
            "INSERT INTO job (dedup_key, priority, flags, payload) VALUES (?1, ?2, ?3, ?4)",
            params![job.key(), priority.as_i64(), job.flags().bits(), payload],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn set_priority(&self, seq: i64, priority: JobPriority) -> Result<(), KirokuError> {
        self.conn.execute(
            "UPDATE job SET priority = ?1 WHERE seq = ?2",
            params![priority.as_i64(), seq],
        )?;
        Ok(())
    }

    pub fn record_attempt(
        &self,
        seq: i64,
        attempts: u32,
        not_before: Option<DateTime<Utc>>,
    ) -> Result<(), KirokuError> {
        self.conn.execute(
            "UPDATE job SET attempts = ?1, not_before = ?2 WHERE seq = ?3",
            params![attempts, not_before.map(|d| d.to_rfc3339()), seq],
        )?;
        Ok(())
    }

    pub fn remove(&self, seq: i64) -> Result<(), KirokuError> {
        self.conn
            .execute("DELETE FROM job WHERE seq = ?1", params![seq])?;
        Ok(())
    }

    /// Load every persisted job in submission order.
    ///
    /// Rows that no longer decode (a job kind that was renamed or dropped)
    /// are deleted so they cannot block the queue.
    pub fn load(&self) -> Result<Vec<StoredJob>, KirokuError> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, priority, flags, payload, attempts, not_before FROM job ORDER BY seq",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, u32>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut jobs = Vec::with_capacity(rows.len());
        for (seq, priority, flags, payload, attempts, not_before) in rows {
            let job = match serde_json::from_str::<SyncJob>(&payload) {
                Ok(job) => job,
                Err(e) => {
                    tracing::warn!(seq, error = %e, "Dropping undecodable job");
                    self.remove(seq)?;
                    continue;
                }
            };
            jobs.push(StoredJob {
                seq,
                priority: JobPriority::from_i64(priority).unwrap_or_else(|| job.priority()),
                flags: JobFlags::from_bits_truncate(flags),
                attempts,
                not_before: not_before.as_deref().map(parse_datetime),
                job,
            });
        }
        Ok(jobs)
    }
}

fn run_migrations(conn: &Connection) -> Result<(), KirokuError> {
    let version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        conn.execute_batch(JOBS_V1)?;
        conn.pragma_update(None, "user_version", 1)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_load_in_order() {
        let store = JobStore::open_memory().unwrap();
        let a = store
            .insert(&SyncJob::SyncList { trakt_id: 1 }, JobPriority::UserData)
            .unwrap();
        let b = store
            .insert(&SyncJob::SyncPerson { trakt_id: 2 }, JobPriority::Extras)
            .unwrap();
        assert!(b > a);

        let jobs = store.load().unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].job, SyncJob::SyncList { trakt_id: 1 });
        assert!(jobs[0].flags.contains(JobFlags::REQUIRES_AUTH));
        assert_eq!(jobs[1].priority, JobPriority::Extras);
        assert_eq!(jobs[1].attempts, 0);
    }

    #[test]
    fn test_attempts_and_priority_persist() {
        let store = JobStore::open_memory().unwrap();
        let seq = store
            .insert(&SyncJob::SyncMovie { trakt_id: 9 }, JobPriority::Media)
            .unwrap();
        let when = Utc::now();
        store.record_attempt(seq, 2, Some(when)).unwrap();
        store.set_priority(seq, JobPriority::UserData).unwrap();

        let job = &store.load().unwrap()[0];
        assert_eq!(job.attempts, 2);
        assert_eq!(job.priority, JobPriority::UserData);
        assert_eq!(
            job.not_before.map(|d| d.timestamp()),
            Some(when.timestamp())
        );

        store.remove(seq).unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_undecodable_rows_are_dropped() {
        let store = JobStore::open_memory().unwrap();
        store
            .conn
            .execute(
                "INSERT INTO job (dedup_key, priority, flags, payload) VALUES ('Old', 0, 0, '{\"job\":\"sync_watched\"}')",
                [],
            )
            .unwrap();
        store
            .insert(&SyncJob::SyncLists, JobPriority::UserData)
            .unwrap();

        let jobs = store.load().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job, SyncJob::SyncLists);
        // The bad row is gone for good.
        assert_eq!(store.load().unwrap().len(), 1);
    }
}
