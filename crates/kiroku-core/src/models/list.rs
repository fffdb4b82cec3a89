use chrono::{DateTime, Utc};

use super::media::ItemKey;

/// A user list mirrored from the remote account.
#[derive(Debug, Clone, PartialEq)]
pub struct UserList {
    pub id: i64,
    pub trakt_id: u64,
    pub name: String,
    pub description: Option<String>,
    pub item_count: u32,
    pub updated_at: Option<DateTime<Utc>>,
}

/// An association row: `key` is in the list since `listed_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct ListItemRow {
    pub key: ItemKey,
    pub listed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StagedInsert {
    pub key: ItemKey,
    pub listed_at: DateTime<Utc>,
}

/// The staged changes for one list, applied as a single transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListDiff {
    pub list_id: i64,
    pub inserts: Vec<StagedInsert>,
    pub deletes: Vec<ItemKey>,
}

impl ListDiff {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.deletes.is_empty()
    }
}
