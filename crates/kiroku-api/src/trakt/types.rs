use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::traits::{
    EpisodeSummary, ListEntry, ListedItem, MovieSummary, PersonSummary, RemoteList, SeasonSummary,
    ShowSummary,
};

// ── Shared ──────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct TraktIds {
    pub trakt: Option<u64>,
}

// ── Lists ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TraktList {
    pub name: String,
    pub description: Option<String>,
    pub item_count: Option<u32>,
    pub updated_at: Option<DateTime<Utc>>,
    pub ids: TraktIds,
}

impl TraktList {
    /// Lists without a trakt id cannot be addressed later and are dropped.
    pub fn into_remote_list(self) -> Option<RemoteList> {
        Some(RemoteList {
            trakt_id: self.ids.trakt?,
            name: self.name,
            description: self.description,
            item_count: self.item_count.unwrap_or(0),
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct TraktListItem {
    #[serde(rename = "type")]
    pub item_type: String,
    pub listed_at: DateTime<Utc>,
    pub show: Option<TraktShow>,
    pub season: Option<TraktSeason>,
    pub episode: Option<TraktEpisode>,
    pub movie: Option<TraktMovie>,
    pub person: Option<TraktPerson>,
}

impl TraktListItem {
    /// Convert to a service-agnostic entry.
    ///
    /// Returns `None` for unknown item types or items missing the ids needed
    /// to place them locally.
    pub fn into_list_entry(self) -> Option<ListEntry> {
        let item = match self.item_type.as_str() {
            "show" => ListedItem::Show {
                show: self.show?.ids.trakt?,
            },
            "season" => ListedItem::Season {
                show: self.show?.ids.trakt?,
                season: self.season?.number,
            },
            "episode" => {
                let episode = self.episode?;
                ListedItem::Episode {
                    show: self.show?.ids.trakt?,
                    season: episode.season?,
                    number: episode.number?,
                }
            }
            "movie" => ListedItem::Movie {
                movie: self.movie?.ids.trakt?,
            },
            "person" => ListedItem::Person(self.person?.into_summary()?),
            _ => return None,
        };
        Some(ListEntry {
            listed_at: self.listed_at,
            item,
        })
    }
}

// ── Media ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TraktShow {
    pub title: Option<String>,
    pub year: Option<u32>,
    pub overview: Option<String>,
    #[serde(default)]
    pub ids: TraktIds,
}

impl TraktShow {
    pub fn into_summary(self) -> Option<ShowSummary> {
        Some(ShowSummary {
            trakt_id: self.ids.trakt?,
            title: self.title.unwrap_or_default(),
            year: self.year,
            overview: self.overview,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct TraktSeason {
    pub number: u32,
    pub title: Option<String>,
    pub episode_count: Option<u32>,
    #[serde(default)]
    pub ids: TraktIds,
}

impl TraktSeason {
    pub fn into_summary(self) -> SeasonSummary {
        SeasonSummary {
            number: self.number,
            title: self.title,
            episode_count: self.episode_count,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TraktEpisode {
    pub season: Option<u32>,
    pub number: Option<u32>,
    pub title: Option<String>,
    pub first_aired: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ids: TraktIds,
}

impl TraktEpisode {
    pub fn into_summary(self) -> Option<EpisodeSummary> {
        Some(EpisodeSummary {
            season: self.season?,
            number: self.number?,
            trakt_id: self.ids.trakt,
            title: self.title,
            first_aired: self.first_aired,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct TraktMovie {
    pub title: Option<String>,
    pub year: Option<u32>,
    pub overview: Option<String>,
    #[serde(default)]
    pub ids: TraktIds,
}

impl TraktMovie {
    pub fn into_summary(self) -> Option<MovieSummary> {
        Some(MovieSummary {
            trakt_id: self.ids.trakt?,
            title: self.title.unwrap_or_default(),
            year: self.year,
            overview: self.overview,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct TraktPerson {
    pub name: String,
    pub biography: Option<String>,
    pub birthday: Option<String>,
    #[serde(default)]
    pub ids: TraktIds,
}

impl TraktPerson {
    pub fn into_summary(self) -> Option<PersonSummary> {
        Some(PersonSummary {
            trakt_id: self.ids.trakt?,
            name: self.name,
            biography: self.biography,
            birthday: self.birthday,
        })
    }
}
