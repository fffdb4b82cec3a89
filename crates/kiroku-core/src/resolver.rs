//! Map remote list items onto local entity rows, creating them on first
//! sight, and decide which detail sync the new rows need.

use kiroku_api::{ListedItem, PersonSummary};

use crate::cascade::{chain_follow_up, Cascade};
use crate::error::KirokuError;
use crate::jobs::SyncJob;
use crate::models::{ItemKey, ItemKind};
use crate::storage::Storage;

/// A list item resolved to a local row.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub key: ItemKey,
    /// Detail sync to schedule because the item (or an ancestor) is new.
    pub follow_up: Option<SyncJob>,
}

/// Resolve any listed item through the resolver for its kind.
pub fn resolve(storage: &Storage, item: &ListedItem) -> Result<Resolution, KirokuError> {
    match item {
        ListedItem::Show { show } => resolve_show(storage, *show),
        ListedItem::Season { show, season } => resolve_season(storage, *show, *season),
        ListedItem::Episode {
            show,
            season,
            number,
        } => resolve_episode(storage, *show, *season, *number),
        ListedItem::Movie { movie } => resolve_movie(storage, *movie),
        ListedItem::Person(person) => resolve_person(storage, person),
    }
}

fn resolve_show(storage: &Storage, show: u64) -> Result<Resolution, KirokuError> {
    let show_row = storage.show_id_or_create(show)?;
    let cascade = chain_follow_up(show_row.created, false, false);
    Ok(Resolution {
        key: ItemKey::new(ItemKind::Show, show_row.id),
        follow_up: chain_job(cascade, show, None),
    })
}

fn resolve_season(storage: &Storage, show: u64, season: u32) -> Result<Resolution, KirokuError> {
    let show_row = storage.show_id_or_create(show)?;
    let season_row = storage.season_id_or_create(show_row.id, season)?;
    let cascade = chain_follow_up(show_row.created, season_row.created, false);
    Ok(Resolution {
        key: ItemKey::new(ItemKind::Season, season_row.id),
        follow_up: chain_job(cascade, show, Some(season)),
    })
}

fn resolve_episode(
    storage: &Storage,
    show: u64,
    season: u32,
    number: u32,
) -> Result<Resolution, KirokuError> {
    let show_row = storage.show_id_or_create(show)?;
    let season_row = storage.season_id_or_create(show_row.id, season)?;
    let episode_row =
        storage.episode_id_or_create(show_row.id, season_row.id, season, number)?;
    let cascade = chain_follow_up(show_row.created, season_row.created, episode_row.created);
    Ok(Resolution {
        key: ItemKey::new(ItemKind::Episode, episode_row.id),
        follow_up: chain_job(cascade, show, Some(season)),
    })
}

fn resolve_movie(storage: &Storage, movie: u64) -> Result<Resolution, KirokuError> {
    let movie_row = storage.movie_id_or_create(movie)?;
    Ok(Resolution {
        key: ItemKey::new(ItemKind::Movie, movie_row.id),
        follow_up: movie_row
            .created
            .then_some(SyncJob::SyncMovie { trakt_id: movie }),
    })
}

/// People come with inline detail, so an unknown person is stored from it
/// right away and only then scheduled for a full sync.
fn resolve_person(storage: &Storage, person: &PersonSummary) -> Result<Resolution, KirokuError> {
    let (id, follow_up) = match storage.person_id(person.trakt_id)? {
        Some(id) => (id, None),
        None => (
            storage.person_update_or_insert(person)?,
            Some(SyncJob::SyncPerson {
                trakt_id: person.trakt_id,
            }),
        ),
    };
    Ok(Resolution {
        key: ItemKey::new(ItemKind::Person, id),
        follow_up,
    })
}

fn chain_job(cascade: Cascade, show: u64, season: Option<u32>) -> Option<SyncJob> {
    match (cascade, season) {
        (Cascade::Nothing, _) => None,
        (Cascade::Show, _) => Some(SyncJob::SyncShow { trakt_id: show }),
        (Cascade::Season, Some(season)) => Some(SyncJob::SyncSeason {
            show_trakt_id: show,
            season,
        }),
        // A season job needs a season; only episode chains produce one.
        (Cascade::Season, None) => Some(SyncJob::SyncShow { trakt_id: show }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(trakt_id: u64) -> PersonSummary {
        PersonSummary {
            trakt_id,
            name: "Garrett Hedlund".into(),
            biography: None,
            birthday: None,
        }
    }

    fn episode(show: u64, season: u32, number: u32) -> ListedItem {
        ListedItem::Episode {
            show,
            season,
            number,
        }
    }

    #[test]
    fn test_resolve_is_idempotent_for_every_kind() {
        let db = Storage::open_memory().unwrap();
        let items = [
            ListedItem::Show { show: 1 },
            ListedItem::Season { show: 1, season: 2 },
            episode(1, 2, 3),
            ListedItem::Movie { movie: 4 },
            ListedItem::Person(person(5)),
        ];
        for item in &items {
            let first = resolve(&db, item).unwrap();
            let second = resolve(&db, item).unwrap();
            assert_eq!(first.key, second.key, "{item:?}");
            assert_eq!(second.follow_up, None, "{item:?}");
        }
    }

    #[test]
    fn test_new_episode_chain_schedules_one_show_sync() {
        let db = Storage::open_memory().unwrap();
        let resolution = resolve(&db, &episode(1388, 1, 1)).unwrap();
        assert_eq!(resolution.key.kind, ItemKind::Episode);
        assert_eq!(
            resolution.follow_up,
            Some(SyncJob::SyncShow { trakt_id: 1388 })
        );
    }

    #[test]
    fn test_new_season_under_known_show_schedules_show_sync() {
        let db = Storage::open_memory().unwrap();
        resolve(&db, &ListedItem::Show { show: 1388 }).unwrap();
        let resolution = resolve(&db, &episode(1388, 2, 1)).unwrap();
        assert_eq!(
            resolution.follow_up,
            Some(SyncJob::SyncShow { trakt_id: 1388 })
        );
    }

    #[test]
    fn test_new_episode_under_known_season_schedules_season_sync() {
        let db = Storage::open_memory().unwrap();
        resolve(&db, &episode(1388, 2, 1)).unwrap();
        let resolution = resolve(&db, &episode(1388, 2, 2)).unwrap();
        assert_eq!(
            resolution.follow_up,
            Some(SyncJob::SyncSeason {
                show_trakt_id: 1388,
                season: 2
            })
        );
    }

    #[test]
    fn test_season_item_under_known_show_schedules_show_sync() {
        let db = Storage::open_memory().unwrap();
        db.show_id_or_create(1388).unwrap();
        let resolution = resolve(&db, &ListedItem::Season { show: 1388, season: 3 }).unwrap();
        assert_eq!(resolution.key.kind, ItemKind::Season);
        assert_eq!(
            resolution.follow_up,
            Some(SyncJob::SyncShow { trakt_id: 1388 })
        );
    }

    #[test]
    fn test_season_item_under_known_show_and_season_needs_nothing() {
        let db = Storage::open_memory().unwrap();
        let show = db.show_id_or_create(1388).unwrap();
        let season = db.season_id_or_create(show.id, 3).unwrap();
        let resolution = resolve(&db, &ListedItem::Season { show: 1388, season: 3 }).unwrap();
        assert_eq!(resolution.key, ItemKey::new(ItemKind::Season, season.id));
        assert_eq!(resolution.follow_up, None);
    }

    #[test]
    fn test_season_item_of_new_show_schedules_show_sync() {
        let db = Storage::open_memory().unwrap();
        let resolution = resolve(&db, &ListedItem::Season { show: 1390, season: 1 }).unwrap();
        assert_eq!(
            resolution.follow_up,
            Some(SyncJob::SyncShow { trakt_id: 1390 })
        );
    }

    #[test]
    fn test_new_movie_schedules_movie_sync() {
        let db = Storage::open_memory().unwrap();
        let resolution = resolve(&db, &ListedItem::Movie { movie: 888 }).unwrap();
        assert_eq!(resolution.key.kind, ItemKind::Movie);
        assert_eq!(
            resolution.follow_up,
            Some(SyncJob::SyncMovie { trakt_id: 888 })
        );
    }

    #[test]
    fn test_unknown_person_is_stored_from_inline_data() {
        let db = Storage::open_memory().unwrap();
        let resolution = resolve(&db, &ListedItem::Person(person(12))).unwrap();
        assert_eq!(resolution.follow_up, Some(SyncJob::SyncPerson { trakt_id: 12 }));

        let stored = db.get_person(resolution.key.id).unwrap().unwrap();
        assert_eq!(stored.name, "Garrett Hedlund");
        assert!(stored.last_synced.is_none());
    }
}
