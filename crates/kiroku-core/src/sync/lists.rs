use kiroku_api::RemoteList;
use tracing::{info, warn};

use crate::error::JobError;
use crate::jobs::{JobQueue, SyncJob};
use crate::storage::Storage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSetOutcome {
    pub synced: usize,
    /// Remote ids of local lists that no longer exist remotely.
    pub removed: Vec<u64>,
}

/// Mirror the account's set of lists and schedule a sync for each one.
///
/// List contents are left to the per-list jobs.
pub fn apply(
    storage: &Storage,
    queue: &JobQueue,
    lists: &[RemoteList],
) -> Result<ListSetOutcome, JobError> {
    for list in lists {
        storage.upsert_list(list)?;
        queue.submit(SyncJob::SyncList {
            trakt_id: list.trakt_id,
        })?;
    }

    let keep: Vec<u64> = lists.iter().map(|l| l.trakt_id).collect();
    let removed = storage.delete_lists_except(&keep)?;
    for trakt_id in &removed {
        let key = SyncJob::SyncList {
            trakt_id: *trakt_id,
        }
        .key();
        if let Err(e) = queue.cancel(&key) {
            warn!(key = %key, error = %e, "Failed to cancel sync of removed list");
        }
    }

    info!(
        synced = lists.len(),
        removed = removed.len(),
        "Synced list set"
    );
    Ok(ListSetOutcome {
        synced: lists.len(),
        removed,
    })
}
