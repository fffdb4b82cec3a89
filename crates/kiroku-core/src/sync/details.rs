use kiroku_api::{EpisodeSummary, MovieSummary, PersonSummary, SeasonSummary, ShowSummary};
use tracing::info;

use crate::error::JobError;
use crate::storage::Storage;

pub fn apply_show(
    storage: &Storage,
    show: &ShowSummary,
    seasons: &[SeasonSummary],
) -> Result<(), JobError> {
    storage.apply_show_detail(show, seasons)?;
    info!(
        trakt_id = show.trakt_id,
        title = %show.title,
        seasons = seasons.len(),
        "Synced show"
    );
    Ok(())
}

pub fn apply_season(
    storage: &Storage,
    show_trakt_id: u64,
    season: u32,
    episodes: &[EpisodeSummary],
) -> Result<(), JobError> {
    storage.apply_season_detail(show_trakt_id, season, episodes)?;
    info!(
        show_trakt_id,
        season,
        episodes = episodes.len(),
        "Synced season"
    );
    Ok(())
}

pub fn apply_movie(storage: &Storage, movie: &MovieSummary) -> Result<(), JobError> {
    storage.apply_movie_detail(movie)?;
    info!(trakt_id = movie.trakt_id, title = %movie.title, "Synced movie");
    Ok(())
}

pub fn apply_person(storage: &Storage, person: &PersonSummary) -> Result<(), JobError> {
    storage.apply_person_detail(person)?;
    info!(trakt_id = person.trakt_id, name = %person.name, "Synced person");
    Ok(())
}
