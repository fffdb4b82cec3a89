use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use kiroku_api::{EpisodeSummary, MovieSummary, PersonSummary, RemoteList, SeasonSummary, ShowSummary};
use rusqlite::{params, Connection, OptionalExtension, ToSql};

use crate::error::KirokuError;
use crate::models::{
    Episode, IdResult, ItemKey, ItemKind, ListDiff, ListItemRow, Movie, Person, Season, Show,
    UserList,
};

const SCHEMA_V1: &str = include_str!("../../../migrations/001_initial.sql");

/// SQLite-backed storage for the mirrored library.
///
/// All writes are conditional (`ON CONFLICT`), so rows touched by another
/// writer between a lookup and an insert never produce duplicates.
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Open (or create) the database at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self, KirokuError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self, KirokuError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        run_migrations(&conn)?;
        Ok(Self { conn })
    }

    // ── Get-or-create ───────────────────────────────────────────

    pub fn show_id_or_create(&self, trakt_id: u64) -> Result<IdResult, KirokuError> {
        let trakt_id = trakt_id as i64;
        self.id_or_create(
            "INSERT INTO show (trakt_id) VALUES (?1) ON CONFLICT(trakt_id) DO NOTHING",
            params![trakt_id],
            "SELECT id FROM show WHERE trakt_id = ?1",
            params![trakt_id],
        )
    }

    pub fn season_id_or_create(&self, show_id: i64, number: u32) -> Result<IdResult, KirokuError> {
        self.id_or_create(
            "INSERT INTO season (show_id, number) VALUES (?1, ?2)
             ON CONFLICT(show_id, number) DO NOTHING",
            params![show_id, number],
            "SELECT id FROM season WHERE show_id = ?1 AND number = ?2",
            params![show_id, number],
        )
    }

    pub fn episode_id_or_create(
        &self,
        show_id: i64,
        season_id: i64,
        season: u32,
        number: u32,
    ) -> Result<IdResult, KirokuError> {
        self.id_or_create(
            "INSERT INTO episode (show_id, season_id, season, number) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(season_id, number) DO NOTHING",
            params![show_id, season_id, season, number],
            "SELECT id FROM episode WHERE season_id = ?1 AND number = ?2",
            params![season_id, number],
        )
    }

    pub fn movie_id_or_create(&self, trakt_id: u64) -> Result<IdResult, KirokuError> {
        let trakt_id = trakt_id as i64;
        self.id_or_create(
            "INSERT INTO movie (trakt_id) VALUES (?1) ON CONFLICT(trakt_id) DO NOTHING",
            params![trakt_id],
            "SELECT id FROM movie WHERE trakt_id = ?1",
            params![trakt_id],
        )
    }

    /// Local id of a person, if one was stored already.
    pub fn person_id(&self, trakt_id: u64) -> Result<Option<i64>, KirokuError> {
        self.conn
            .query_row(
                "SELECT id FROM person WHERE trakt_id = ?1",
                params![trakt_id as i64],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Insert a person, or refresh the fields the summary carries.
    ///
    /// Optional fields missing from `person` keep their stored value, so inline
    /// list data never wipes a full detail sync.
    pub fn person_update_or_insert(&self, person: &PersonSummary) -> Result<i64, KirokuError> {
        self.conn.execute(
            "INSERT INTO person (trakt_id, name, biography, birthday) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(trakt_id) DO UPDATE SET
                name = excluded.name,
                biography = COALESCE(excluded.biography, person.biography),
                birthday = COALESCE(excluded.birthday, person.birthday)",
            params![
                person.trakt_id as i64,
                person.name,
                person.biography,
                person.birthday
            ],
        )?;
        self.conn
            .query_row(
                "SELECT id FROM person WHERE trakt_id = ?1",
                params![person.trakt_id as i64],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    fn id_or_create(
        &self,
        insert: &str,
        insert_args: &[&dyn ToSql],
        select: &str,
        select_args: &[&dyn ToSql],
    ) -> Result<IdResult, KirokuError> {
        let created = self.conn.execute(insert, insert_args)? > 0;
        let id = self.conn.query_row(select, select_args, |row| row.get(0))?;
        Ok(IdResult { id, created })
    }

    // ── Entity detail ───────────────────────────────────────────

    /// Store a full show summary and its season list.
    pub fn apply_show_detail(
        &self,
        show: &ShowSummary,
        seasons: &[SeasonSummary],
    ) -> Result<i64, KirokuError> {
        let tx = self.conn.unchecked_transaction()?;
        let show_id = self.show_id_or_create(show.trakt_id)?.id;
        self.conn.execute(
            "UPDATE show SET title = ?1, year = ?2, overview = ?3, last_synced = ?4
             WHERE id = ?5",
            params![show.title, show.year, show.overview, now(), show_id],
        )?;
        for season in seasons {
            self.conn.execute(
                "INSERT INTO season (show_id, number, title, episode_count) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(show_id, number) DO UPDATE SET
                    title = excluded.title,
                    episode_count = excluded.episode_count",
                params![show_id, season.number, season.title, season.episode_count],
            )?;
        }
        tx.commit()?;
        Ok(show_id)
    }

    /// Store the episodes of one season and stamp the season as synced.
    pub fn apply_season_detail(
        &self,
        show_trakt_id: u64,
        number: u32,
        episodes: &[EpisodeSummary],
    ) -> Result<i64, KirokuError> {
        let tx = self.conn.unchecked_transaction()?;
        let show_id = self.show_id_or_create(show_trakt_id)?.id;
        let season_id = self.season_id_or_create(show_id, number)?.id;
        let episodes: Vec<&EpisodeSummary> =
            episodes.iter().filter(|e| e.season == number).collect();
        for episode in &episodes {
            self.conn.execute(
                "INSERT INTO episode (show_id, season_id, season, number, trakt_id, title, first_aired)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(season_id, number) DO UPDATE SET
                    trakt_id = excluded.trakt_id,
                    title = excluded.title,
                    first_aired = excluded.first_aired",
                params![
                    show_id,
                    season_id,
                    number,
                    episode.number,
                    episode.trakt_id.map(|v| v as i64),
                    episode.title,
                    episode.first_aired.map(|d| d.to_rfc3339()),
                ],
            )?;
        }
        self.conn.execute(
            "UPDATE season SET episode_count = ?1, last_synced = ?2 WHERE id = ?3",
            params![episodes.len() as u32, now(), season_id],
        )?;
        tx.commit()?;
        Ok(season_id)
    }

    pub fn apply_movie_detail(&self, movie: &MovieSummary) -> Result<i64, KirokuError> {
        let movie_id = self.movie_id_or_create(movie.trakt_id)?.id;
        self.conn.execute(
            "UPDATE movie SET title = ?1, year = ?2, overview = ?3, last_synced = ?4
             WHERE id = ?5",
            params![movie.title, movie.year, movie.overview, now(), movie_id],
        )?;
        Ok(movie_id)
    }

    pub fn apply_person_detail(&self, person: &PersonSummary) -> Result<i64, KirokuError> {
        let person_id = self.person_update_or_insert(person)?;
        self.conn.execute(
            "UPDATE person SET last_synced = ?1 WHERE id = ?2",
            params![now(), person_id],
        )?;
        Ok(person_id)
    }

    // ── Entity reads ────────────────────────────────────────────

    pub fn get_show(&self, id: i64) -> Result<Option<Show>, KirokuError> {
        self.conn
            .query_row(
                "SELECT id, trakt_id, title, year, overview, last_synced FROM show WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Show {
                        id: row.get(0)?,
                        trakt_id: row.get::<_, i64>(1)? as u64,
                        title: row.get(2)?,
                        year: row.get(3)?,
                        overview: row.get(4)?,
                        last_synced: opt_datetime(row.get(5)?),
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn get_season(&self, show_id: i64, number: u32) -> Result<Option<Season>, KirokuError> {
        self.conn
            .query_row(
                "SELECT id, show_id, number, title, episode_count, last_synced
                 FROM season WHERE show_id = ?1 AND number = ?2",
                params![show_id, number],
                |row| {
                    Ok(Season {
                        id: row.get(0)?,
                        show_id: row.get(1)?,
                        number: row.get(2)?,
                        title: row.get(3)?,
                        episode_count: row.get(4)?,
                        last_synced: opt_datetime(row.get(5)?),
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn get_episodes(&self, season_id: i64) -> Result<Vec<Episode>, KirokuError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, show_id, season_id, season, number, trakt_id, title, first_aired
             FROM episode WHERE season_id = ?1 ORDER BY number",
        )?;
        let rows = stmt
            .query_map(params![season_id], |row| {
                Ok(Episode {
                    id: row.get(0)?,
                    show_id: row.get(1)?,
                    season_id: row.get(2)?,
                    season: row.get(3)?,
                    number: row.get(4)?,
                    trakt_id: row.get::<_, Option<i64>>(5)?.map(|v| v as u64),
                    title: row.get(6)?,
                    first_aired: opt_datetime(row.get(7)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_movie(&self, id: i64) -> Result<Option<Movie>, KirokuError> {
        self.conn
            .query_row(
                "SELECT id, trakt_id, title, year, overview, last_synced FROM movie WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Movie {
                        id: row.get(0)?,
                        trakt_id: row.get::<_, i64>(1)? as u64,
                        title: row.get(2)?,
                        year: row.get(3)?,
                        overview: row.get(4)?,
                        last_synced: opt_datetime(row.get(5)?),
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn get_person(&self, id: i64) -> Result<Option<Person>, KirokuError> {
        self.conn
            .query_row(
                "SELECT id, trakt_id, name, biography, birthday, last_synced
                 FROM person WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Person {
                        id: row.get(0)?,
                        trakt_id: row.get::<_, i64>(1)? as u64,
                        name: row.get(2)?,
                        biography: row.get(3)?,
                        birthday: row.get(4)?,
                        last_synced: opt_datetime(row.get(5)?),
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    // ── Lists ───────────────────────────────────────────────────

    pub fn list_id(&self, trakt_id: u64) -> Result<Option<i64>, KirokuError> {
        self.conn
            .query_row(
                "SELECT id FROM list WHERE trakt_id = ?1",
                params![trakt_id as i64],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    /// Insert or update a list keyed by its remote id. Returns the local id.
    pub fn upsert_list(&self, list: &RemoteList) -> Result<i64, KirokuError> {
        self.conn.execute(
            "INSERT INTO list (trakt_id, name, description, item_count, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(trakt_id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                item_count = excluded.item_count,
                updated_at = excluded.updated_at",
            params![
                list.trakt_id as i64,
                list.name,
                list.description,
                list.item_count,
                list.updated_at.map(|d| d.to_rfc3339()),
            ],
        )?;
        self.conn
            .query_row(
                "SELECT id FROM list WHERE trakt_id = ?1",
                params![list.trakt_id as i64],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    pub fn lists(&self) -> Result<Vec<UserList>, KirokuError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, trakt_id, name, description, item_count, updated_at
             FROM list ORDER BY name",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(UserList {
                    id: row.get(0)?,
                    trakt_id: row.get::<_, i64>(1)? as u64,
                    name: row.get(2)?,
                    description: row.get(3)?,
                    item_count: row.get(4)?,
                    updated_at: opt_datetime(row.get(5)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete every list whose remote id is not in `keep`.
    ///
    /// Association rows go with them (`ON DELETE CASCADE`). Returns the
    /// remote ids that were removed.
    pub fn delete_lists_except(&self, keep: &[u64]) -> Result<Vec<u64>, KirokuError> {
        let keep: HashSet<u64> = keep.iter().copied().collect();
        let mut stmt = self.conn.prepare("SELECT trakt_id FROM list")?;
        let stale: Vec<u64> = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|id| id as u64)
            .filter(|id| !keep.contains(id))
            .collect();

        let tx = self.conn.unchecked_transaction()?;
        for trakt_id in &stale {
            tx.execute(
                "DELETE FROM list WHERE trakt_id = ?1",
                params![*trakt_id as i64],
            )?;
        }
        tx.commit()?;
        Ok(stale)
    }

    /// Current association rows of a list, in insertion order.
    ///
    /// A row of unknown kind is an error: it could never be reconciled away.
    pub fn list_items(&self, list_id: i64) -> Result<Vec<ListItemRow>, KirokuError> {
        let mut stmt = self.conn.prepare(
            "SELECT item_type, item_id, listed_at FROM list_item WHERE list_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![list_id], |row| {
                let kind: String = row.get(0)?;
                let kind = ItemKind::from_db_str(&kind).ok_or_else(|| {
                    rusqlite::Error::FromSqlConversionFailure(
                        0,
                        rusqlite::types::Type::Text,
                        format!("unknown list item kind {kind:?}").into(),
                    )
                })?;
                Ok(ListItemRow {
                    key: ItemKey::new(kind, row.get(1)?),
                    listed_at: parse_datetime(&row.get::<_, String>(2)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Apply a reconciliation diff as one transaction.
    ///
    /// Inserts skip rows that already exist and deletes are scoped to the
    /// diff's list, so a concurrent writer cannot make the batch fail halfway.
    /// On any error nothing is applied.
    pub fn apply_list_diff(&self, diff: &ListDiff) -> Result<(), KirokuError> {
        let tx = self.conn.unchecked_transaction()?;
        for insert in &diff.inserts {
            tx.execute(
                "INSERT INTO list_item (list_id, item_type, item_id, listed_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(list_id, item_type, item_id) DO NOTHING",
                params![
                    diff.list_id,
                    insert.key.kind.as_db_str(),
                    insert.key.id,
                    insert.listed_at.to_rfc3339(),
                ],
            )?;
        }
        for key in &diff.deletes {
            tx.execute(
                "DELETE FROM list_item WHERE list_id = ?1 AND item_type = ?2 AND item_id = ?3",
                params![diff.list_id, key.kind.as_db_str(), key.id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

fn run_migrations(conn: &Connection) -> Result<(), KirokuError> {
    let version: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        conn.execute_batch(SCHEMA_V1)?;
        conn.pragma_update(None, "user_version", 1)?;
    }
    Ok(())
}

// ── Helpers ─────────────────────────────────────────────────────

fn now() -> String {
    Utc::now().to_rfc3339()
}

/// Parse a datetime string from SQLite (either RFC 3339 or SQLite's `datetime('now')` format).
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return naive.and_utc();
    }
    DateTime::default()
}

fn opt_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().map(parse_datetime)
}
