use std::sync::RwLock;

use reqwest::Client;
use serde::de::DeserializeOwned;
use url::Url;

use super::error::TraktError;
use super::types::{TraktEpisode, TraktList, TraktListItem, TraktMovie, TraktPerson, TraktSeason, TraktShow};
use crate::traits::{
    EpisodeSummary, ListEntry, MovieSummary, PersonSummary, RemoteList, SeasonSummary,
    ShowSummary, TrackingService,
};

pub const DEFAULT_BASE_URL: &str = "https://api.trakt.tv";

const API_VERSION: &str = "2";

/// Trakt API v2 client.
///
/// The access token can be swapped at runtime, e.g. after the user logs in
/// again, without rebuilding the client.
pub struct TraktClient {
    base: Url,
    client_id: String,
    access_token: RwLock<Option<String>>,
    http: Client,
}

impl TraktClient {
    pub fn new(
        base_url: &str,
        client_id: String,
        access_token: Option<String>,
    ) -> Result<Self, TraktError> {
        let base = Url::parse(base_url).map_err(|e| TraktError::Parse(e.to_string()))?;
        Ok(Self {
            base,
            client_id,
            access_token: RwLock::new(access_token),
            http: Client::new(),
        })
    }

    /// Replace (or clear) the access token used for authenticated calls.
    pub fn set_access_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.access_token.write() {
            *guard = token;
        }
    }

    /// The access token currently in use, if any.
    pub fn access_token(&self) -> Option<String> {
        self.access_token.read().ok().and_then(|t| t.clone())
    }

    fn endpoint(&self, path: &str) -> Result<Url, TraktError> {
        self.base
            .join(path)
            .map_err(|e| TraktError::Parse(e.to_string()))
    }

    /// Check the HTTP response for errors and return the body text on failure.
    async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, TraktError> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(status, "Trakt API error");
            Err(TraktError::Api {
                status,
                message: body,
            })
        }
    }

    /// GET a JSON resource. Authenticated requests fail fast without a token.
    async fn get<T: DeserializeOwned>(&self, path: &str, auth: bool) -> Result<T, TraktError> {
        let url = self.endpoint(path)?;
        let mut req = self
            .http
            .get(url)
            .query(&[("extended", "full")])
            .header("Content-Type", "application/json")
            .header("trakt-api-version", API_VERSION)
            .header("trakt-api-key", &self.client_id);

        if auth {
            let token = self
                .access_token()
                .ok_or_else(|| TraktError::Auth("no access token".into()))?;
            req = req.header("Authorization", format!("Bearer {token}"));
        }

        tracing::debug!(path, "Trakt request");
        let resp = Self::check_response(req.send().await?).await?;
        resp.json()
            .await
            .map_err(|e| TraktError::Parse(e.to_string()))
    }
}

impl TrackingService for TraktClient {
    type Error = TraktError;

    fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }

    async fn lists(&self) -> Result<Vec<RemoteList>, TraktError> {
        let lists: Vec<TraktList> = self.get("users/me/lists", true).await?;
        Ok(lists
            .into_iter()
            .filter_map(TraktList::into_remote_list)
            .collect())
    }

    async fn list_items(&self, list_id: u64) -> Result<Vec<ListEntry>, TraktError> {
        let items: Vec<TraktListItem> = self
            .get(&format!("users/me/lists/{list_id}/items"), true)
            .await?;
        let total = items.len();
        let entries: Vec<ListEntry> = items
            .into_iter()
            .filter_map(TraktListItem::into_list_entry)
            .collect();
        if entries.len() != total {
            tracing::warn!(
                list_id,
                skipped = total - entries.len(),
                "Skipped unrecognized list items"
            );
        }
        Ok(entries)
    }

    async fn show(&self, show_id: u64) -> Result<ShowSummary, TraktError> {
        let show: TraktShow = self.get(&format!("shows/{show_id}"), false).await?;
        show.into_summary()
            .ok_or_else(|| TraktError::Parse(format!("show {show_id} has no trakt id")))
    }

    async fn seasons(&self, show_id: u64) -> Result<Vec<SeasonSummary>, TraktError> {
        let seasons: Vec<TraktSeason> = self
            .get(&format!("shows/{show_id}/seasons"), false)
            .await?;
        Ok(seasons.into_iter().map(TraktSeason::into_summary).collect())
    }

    async fn season_episodes(
        &self,
        show_id: u64,
        season: u32,
    ) -> Result<Vec<EpisodeSummary>, TraktError> {
        let episodes: Vec<TraktEpisode> = self
            .get(&format!("shows/{show_id}/seasons/{season}"), false)
            .await?;
        Ok(episodes
            .into_iter()
            .filter_map(TraktEpisode::into_summary)
            .collect())
    }

    async fn movie(&self, movie_id: u64) -> Result<MovieSummary, TraktError> {
        let movie: TraktMovie = self.get(&format!("movies/{movie_id}"), false).await?;
        movie
            .into_summary()
            .ok_or_else(|| TraktError::Parse(format!("movie {movie_id} has no trakt id")))
    }

    async fn person(&self, person_id: u64) -> Result<PersonSummary, TraktError> {
        let person: TraktPerson = self.get(&format!("people/{person_id}"), false).await?;
        person
            .into_summary()
            .ok_or_else(|| TraktError::Parse(format!("person {person_id} has no trakt id")))
    }
}
