use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

/// Priority tiers, lowest first. User-facing data outranks detail backfill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum JobPriority {
    Extras = 0,
    Seasons = 1,
    Media = 2,
    UserData = 3,
}

impl JobPriority {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(Self::Extras),
            1 => Some(Self::Seasons),
            2 => Some(Self::Media),
            3 => Some(Self::UserData),
            _ => None,
        }
    }

    /// The more urgent of the two.
    pub fn elevate(self, other: JobPriority) -> JobPriority {
        self.max(other)
    }
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Extras => write!(f, "extras"),
            Self::Seasons => write!(f, "seasons"),
            Self::Media => write!(f, "media"),
            Self::UserData => write!(f, "user-data"),
        }
    }
}

bitflags! {
    /// Capabilities a job needs before it may run.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct JobFlags: u32 {
        /// Calls endpoints that need the user's access token.
        const REQUIRES_AUTH = 0b0000_0001;
    }
}

/// A unit of sync work. Serialized as the persisted job payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum SyncJob {
    /// Fetch the account's lists and schedule one `SyncList` per list.
    SyncLists,
    SyncList { trakt_id: u64 },
    SyncShow { trakt_id: u64 },
    SyncSeason { show_trakt_id: u64, season: u32 },
    SyncMovie { trakt_id: u64 },
    SyncPerson { trakt_id: u64 },
}

impl SyncJob {
    /// Deduplication key. Two jobs with the same key do the same work.
    pub fn key(&self) -> String {
        match self {
            Self::SyncLists => "SyncLists".to_string(),
            Self::SyncList { trakt_id } => format!("SyncList&id={trakt_id}"),
            Self::SyncShow { trakt_id } => format!("SyncShow&id={trakt_id}"),
            Self::SyncSeason {
                show_trakt_id,
                season,
            } => format!("SyncSeason&show={show_trakt_id}&season={season}"),
            Self::SyncMovie { trakt_id } => format!("SyncMovie&id={trakt_id}"),
            Self::SyncPerson { trakt_id } => format!("SyncPerson&id={trakt_id}"),
        }
    }

    pub fn priority(&self) -> JobPriority {
        match self {
            Self::SyncLists | Self::SyncList { .. } => JobPriority::UserData,
            Self::SyncShow { .. } | Self::SyncMovie { .. } => JobPriority::Media,
            Self::SyncSeason { .. } => JobPriority::Seasons,
            Self::SyncPerson { .. } => JobPriority::Extras,
        }
    }

    pub fn flags(&self) -> JobFlags {
        match self {
            Self::SyncLists | Self::SyncList { .. } => JobFlags::REQUIRES_AUTH,
            _ => JobFlags::empty(),
        }
    }
}

impl std::fmt::Display for SyncJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key())
    }
}

/// Terminal state of a job, as seen by whoever waits on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed(String),
    /// Withdrawn before it started.
    Cancelled,
    /// The queue went away (e.g. process exit) before the job finished.
    /// A persisted job still runs after restart; use [`JobEvent`]s to observe it.
    Abandoned,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Broadcast to every subscriber when any job reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEvent {
    pub key: String,
    pub outcome: JobOutcome,
}

/// Handle to the outcome of a submitted job.
#[derive(Debug)]
pub struct JobTicket {
    key: String,
    rx: oneshot::Receiver<JobOutcome>,
}

impl JobTicket {
    pub(crate) fn new(key: String, rx: oneshot::Receiver<JobOutcome>) -> Self {
        Self { key, rx }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the job to finish. Resolves exactly once.
    pub async fn wait(self) -> JobOutcome {
        self.rx.await.unwrap_or(JobOutcome::Abandoned)
    }
}
