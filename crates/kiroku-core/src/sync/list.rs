use kiroku_api::ListEntry;
use tracing::{debug, info, warn};

use crate::error::JobError;
use crate::jobs::JobQueue;
use crate::reconcile;
use crate::resolver;
use crate::storage::Storage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListSyncOutcome {
    /// The list is not known locally (deleted in the meantime). Nothing done.
    ListMissing,
    Applied {
        inserted: usize,
        deleted: usize,
        /// Detail jobs scheduled for newly seen entities.
        scheduled: usize,
    },
}

/// Reconcile one list against its remote contents.
///
/// Entities are resolved (and created) as items are visited; the
/// association changes are then committed in one transaction. Follow-up
/// jobs are independent: failing to schedule one does not fail the list.
pub fn apply(
    storage: &Storage,
    queue: &JobQueue,
    list_trakt_id: u64,
    entries: &[ListEntry],
) -> Result<ListSyncOutcome, JobError> {
    let Some(list_id) = storage.list_id(list_trakt_id)? else {
        debug!(list_trakt_id, "List no longer exists locally, skipping");
        return Ok(ListSyncOutcome::ListMissing);
    };
    let existing = storage.list_items(list_id)?;

    let mut resolved = Vec::with_capacity(entries.len());
    let mut scheduled = 0;
    for entry in entries {
        let resolution = resolver::resolve(storage, &entry.item)?;
        if let Some(job) = resolution.follow_up {
            let key = job.key();
            match queue.submit(job) {
                Ok(_) => scheduled += 1,
                Err(e) => warn!(key = %key, error = %e, "Failed to schedule follow-up"),
            }
        }
        resolved.push((resolution.key, entry.listed_at));
    }

    let diff = reconcile::diff(list_id, resolved, &existing);
    if !diff.is_empty() {
        storage.apply_list_diff(&diff)?;
    }

    info!(
        list_trakt_id,
        inserted = diff.inserts.len(),
        deleted = diff.deletes.len(),
        scheduled,
        "Synced list"
    );
    Ok(ListSyncOutcome::Applied {
        inserted: diff.inserts.len(),
        deleted: diff.deletes.len(),
        scheduled,
    })
}
