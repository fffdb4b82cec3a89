pub mod traits;
pub mod trakt;

pub use traits::{
    EpisodeSummary, ErrorClass, ListEntry, ListedItem, MovieSummary, PersonSummary, RemoteList,
    SeasonSummary, ServiceError, ShowSummary, TrackingService,
};
