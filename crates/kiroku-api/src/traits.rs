//! Trait definitions for media tracking services.
//!
//! The sync engine only talks to the remote side through [`TrackingService`],
//! so the scheduler and reconciler stay independent of the HTTP client.

use std::future::Future;

use chrono::{DateTime, Utc};

/// A read-only media tracking service.
pub trait TrackingService: Send + Sync {
    type Error: ServiceError;

    /// Whether credentials are currently available for authenticated endpoints.
    fn is_authenticated(&self) -> bool;

    /// Get the authenticated user's lists.
    fn lists(&self) -> impl Future<Output = Result<Vec<RemoteList>, Self::Error>> + Send;

    /// Get the ordered contents of one of the user's lists.
    fn list_items(
        &self,
        list_id: u64,
    ) -> impl Future<Output = Result<Vec<ListEntry>, Self::Error>> + Send;

    /// Get a show summary.
    fn show(&self, show_id: u64) -> impl Future<Output = Result<ShowSummary, Self::Error>> + Send;

    /// Get all seasons of a show.
    fn seasons(
        &self,
        show_id: u64,
    ) -> impl Future<Output = Result<Vec<SeasonSummary>, Self::Error>> + Send;

    /// Get the episodes of one season.
    fn season_episodes(
        &self,
        show_id: u64,
        season: u32,
    ) -> impl Future<Output = Result<Vec<EpisodeSummary>, Self::Error>> + Send;

    /// Get a movie summary.
    fn movie(&self, movie_id: u64)
        -> impl Future<Output = Result<MovieSummary, Self::Error>> + Send;

    /// Get a person summary.
    fn person(
        &self,
        person_id: u64,
    ) -> impl Future<Output = Result<PersonSummary, Self::Error>> + Send;
}

/// How a failed remote call should be treated by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Credentials are missing, expired or rejected.
    Auth,
    /// Network trouble, rate limiting or a server-side hiccup. Worth retrying.
    Transient,
    /// The requested resource does not exist (anymore).
    NotFound,
    /// Anything else: malformed responses, client errors.
    Fatal,
}

/// Errors returned by a [`TrackingService`] must say how they should be handled.
pub trait ServiceError: std::error::Error + Send + Sync + 'static {
    fn class(&self) -> ErrorClass;
}

/// One of the user's lists.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RemoteList {
    pub trakt_id: u64,
    pub name: String,
    pub description: Option<String>,
    pub item_count: u32,
    pub updated_at: Option<DateTime<Utc>>,
}

/// One item of a list, as returned by the service, in list order.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ListEntry {
    pub listed_at: DateTime<Utc>,
    pub item: ListedItem,
}

/// The kinds of things a list can contain, with the remote ids needed to
/// resolve them locally. Seasons and episodes carry their ancestors.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ListedItem {
    Show { show: u64 },
    Season { show: u64, season: u32 },
    Episode { show: u64, season: u32, number: u32 },
    Movie { movie: u64 },
    /// People arrive with inline detail instead of being fetched by id.
    Person(PersonSummary),
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ShowSummary {
    pub trakt_id: u64,
    pub title: String,
    pub year: Option<u32>,
    pub overview: Option<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SeasonSummary {
    pub number: u32,
    pub title: Option<String>,
    pub episode_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EpisodeSummary {
    pub season: u32,
    pub number: u32,
    pub trakt_id: Option<u64>,
    pub title: Option<String>,
    pub first_aired: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MovieSummary {
    pub trakt_id: u64,
    pub title: String,
    pub year: Option<u32>,
    pub overview: Option<String>,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PersonSummary {
    pub trakt_id: u64,
    pub name: String,
    pub biography: Option<String>,
    pub birthday: Option<String>,
}
