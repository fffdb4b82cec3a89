use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kinds of entity a list can reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    Show,
    Season,
    Episode,
    Movie,
    Person,
}

impl ItemKind {
    /// Database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Show => "show",
            Self::Season => "season",
            Self::Episode => "episode",
            Self::Movie => "movie",
            Self::Person => "person",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "show" => Some(Self::Show),
            "season" => Some(Self::Season),
            "episode" => Some(Self::Episode),
            "movie" => Some(Self::Movie),
            "person" => Some(Self::Person),
            _ => None,
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// A local entity reference: what a list association points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub kind: ItemKind,
    pub id: i64,
}

impl ItemKey {
    pub fn new(kind: ItemKind, id: i64) -> Self {
        Self { kind, id }
    }
}

/// Result of a get-or-create lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdResult {
    pub id: i64,
    /// True only on the call that inserted the row.
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Show {
    pub id: i64,
    pub trakt_id: u64,
    pub title: Option<String>,
    pub year: Option<u32>,
    pub overview: Option<String>,
    pub last_synced: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Season {
    pub id: i64,
    pub show_id: i64,
    pub number: u32,
    pub title: Option<String>,
    pub episode_count: Option<u32>,
    pub last_synced: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Episode {
    pub id: i64,
    pub show_id: i64,
    pub season_id: i64,
    pub season: u32,
    pub number: u32,
    pub trakt_id: Option<u64>,
    pub title: Option<String>,
    pub first_aired: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Movie {
    pub id: i64,
    pub trakt_id: u64,
    pub title: Option<String>,
    pub year: Option<u32>,
    pub overview: Option<String>,
    pub last_synced: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub id: i64,
    pub trakt_id: u64,
    pub name: String,
    pub biography: Option<String>,
    pub birthday: Option<String>,
    pub last_synced: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_kind_db_roundtrip() {
        for kind in [
            ItemKind::Show,
            ItemKind::Season,
            ItemKind::Episode,
            ItemKind::Movie,
            ItemKind::Person,
        ] {
            assert_eq!(ItemKind::from_db_str(kind.as_db_str()), Some(kind));
        }
        assert_eq!(ItemKind::from_db_str("user"), None);
    }
}
