//! Diff a list's remote contents against its local association rows.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::models::{ItemKey, ListDiff, ListItemRow, StagedInsert};

/// Compute the changes that make `existing` match `remote`.
///
/// `remote` is the resolved remote list in order. Rows are matched on
/// (kind, id) only: an item that is still listed keeps its stored
/// `listed_at` even if the remote timestamp moved. An item listed twice
/// stages at most one insert.
pub fn diff<I>(list_id: i64, remote: I, existing: &[ListItemRow]) -> ListDiff
where
    I: IntoIterator<Item = (ItemKey, DateTime<Utc>)>,
{
    let mut unmatched: HashSet<ItemKey> = existing.iter().map(|row| row.key).collect();
    let mut seen: HashSet<ItemKey> = HashSet::new();
    let mut inserts = Vec::new();

    for (key, listed_at) in remote {
        if !seen.insert(key) {
            continue;
        }
        if !unmatched.remove(&key) {
            inserts.push(StagedInsert { key, listed_at });
        }
    }

    let deletes = existing
        .iter()
        .map(|row| row.key)
        .filter(|key| unmatched.contains(key))
        .collect();

    ListDiff {
        list_id,
        inserts,
        deletes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemKind;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_600_000_000 + secs, 0).unwrap()
    }

    fn row(kind: ItemKind, id: i64, at: i64) -> ListItemRow {
        ListItemRow {
            key: ItemKey::new(kind, id),
            listed_at: t(at),
        }
    }

    fn show(id: i64) -> ItemKey {
        ItemKey::new(ItemKind::Show, id)
    }

    fn movie(id: i64) -> ItemKey {
        ItemKey::new(ItemKind::Movie, id)
    }

    #[test]
    fn test_keep_delete_insert() {
        let existing = vec![row(ItemKind::Show, 10, 1), row(ItemKind::Movie, 20, 2)];
        let remote = vec![(show(10), t(5)), (movie(30), t(6))];

        let diff = diff(1, remote, &existing);
        assert_eq!(diff.list_id, 1);
        assert_eq!(
            diff.inserts,
            vec![StagedInsert {
                key: movie(30),
                listed_at: t(6)
            }]
        );
        assert_eq!(diff.deletes, vec![movie(20)]);
    }

    #[test]
    fn test_kind_is_part_of_the_key() {
        let existing = vec![row(ItemKind::Show, 10, 1)];
        let diff = diff(1, vec![(movie(10), t(2))], &existing);
        assert_eq!(diff.inserts.len(), 1);
        assert_eq!(diff.deletes, vec![show(10)]);
    }

    #[test]
    fn test_unchanged_list_is_empty_diff() {
        let existing = vec![row(ItemKind::Show, 10, 1), row(ItemKind::Movie, 20, 2)];
        // Different timestamps, different order: still no change.
        let remote = vec![(movie(20), t(9)), (show(10), t(9))];
        assert!(diff(1, remote, &existing).is_empty());
    }

    #[test]
    fn test_empty_remote_deletes_everything() {
        let existing = vec![row(ItemKind::Show, 10, 1), row(ItemKind::Person, 3, 2)];
        let diff = diff(1, Vec::new(), &existing);
        assert!(diff.inserts.is_empty());
        assert_eq!(diff.deletes, vec![show(10), ItemKey::new(ItemKind::Person, 3)]);
    }

    #[test]
    fn test_repeated_remote_item_stages_one_insert() {
        let existing = vec![row(ItemKind::Show, 10, 1)];
        let remote = vec![
            (show(10), t(1)),
            (show(10), t(2)),
            (movie(30), t(3)),
            (movie(30), t(4)),
        ];
        let diff = diff(1, remote, &existing);
        assert_eq!(
            diff.inserts,
            vec![StagedInsert {
                key: movie(30),
                listed_at: t(3)
            }]
        );
        assert!(diff.deletes.is_empty());
    }

    #[test]
    fn test_result_set_equals_remote_set() {
        let existing: Vec<ListItemRow> = (0..20)
            .filter(|i| i % 3 != 0)
            .map(|i| row(ItemKind::Episode, i, i))
            .collect();
        let remote: Vec<(ItemKey, DateTime<Utc>)> = (0..20)
            .filter(|i| i % 2 == 0)
            .map(|i| (ItemKey::new(ItemKind::Episode, i), t(i)))
            .collect();

        let diff = diff(1, remote.clone(), &existing);

        let mut after: HashSet<ItemKey> = existing.iter().map(|r| r.key).collect();
        for key in &diff.deletes {
            assert!(after.remove(key));
        }
        for insert in &diff.inserts {
            assert!(after.insert(insert.key));
        }
        let expected: HashSet<ItemKey> = remote.iter().map(|(k, _)| *k).collect();
        assert_eq!(after, expected);
    }
}
