use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

use super::MediaKind;

const POSTER_BASE_URL: &str = "https://image.tmdb.org/t/p/w185";

/// State transitions that produce a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Release,
    Upcoming,
    NewEpisode,
    EpisodeAired,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Release => "release",
            NotificationKind::Upcoming => "upcoming",
            NotificationKind::NewEpisode => "new_episode",
            NotificationKind::EpisodeAired => "episode_aired",
        }
    }
}

impl Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the chat layer needs to render a notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub external_id: u64,
    pub kind: MediaKind,
    pub title: String,
    pub date: NaiveDate,
    /// Episode label (`S01E02`) for episode notifications
    pub episode: Option<String>,
    pub episode_name: Option<String>,
    pub poster_url: Option<String>,
}

impl NotificationPayload {
    pub fn poster_url_for(path: Option<&str>) -> Option<String> {
        path.filter(|p| !p.is_empty())
            .map(|p| format!("{}{}", POSTER_BASE_URL, p))
    }
}

/// A notification the scheduler decided to send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationIntent {
    pub tenant_id: i64,
    pub subscription_id: i64,
    pub kind: NotificationKind,
    /// Identifies the triggering window (release date or episode label)
    pub reference: String,
    pub payload: NotificationPayload,
}
