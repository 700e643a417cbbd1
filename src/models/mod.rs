use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

pub mod notification;
pub mod subscription;
pub mod watchlist;

pub use notification::{NotificationIntent, NotificationKind, NotificationPayload};
pub use subscription::{NotificationMarkers, Subscription};
pub use watchlist::{RatedItem, Rating, WatchlistItem};

/// Kind of media tracked by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Series,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Series => "series",
        }
    }

    /// Path segment used by the provider API
    pub fn api_path(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Series => "tv",
        }
    }
}

impl Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "movie" => Ok(MediaKind::Movie),
            "series" | "tv" => Ok(MediaKind::Series),
            other => Err(format!("unknown media kind '{}'", other)),
        }
    }
}

impl TryFrom<String> for MediaKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Provider identity of one title
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaRef {
    pub id: u64,
    pub kind: MediaKind,
}

impl Display for MediaRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Time window for trending lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendingWindow {
    Day,
    Week,
}

impl TrendingWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendingWindow::Day => "day",
            TrendingWindow::Week => "week",
        }
    }
}

/// Curated per-kind lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chart {
    Popular,
    TopRated,
}

impl Chart {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chart::Popular => "popular",
            Chart::TopRated => "top_rated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genre {
    pub id: u32,
    pub name: String,
}

/// A list entry returned by search, trending, similar and recommended lookups
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaSummary {
    pub id: u64,
    pub kind: MediaKind,
    pub title: String,
    pub genre_ids: Vec<u32>,
    pub vote_average: f64,
    pub popularity: f64,
    pub poster_path: Option<String>,
    pub release_date: Option<NaiveDate>,
}

impl MediaSummary {
    pub fn media_ref(&self) -> MediaRef {
        MediaRef {
            id: self.id,
            kind: self.kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub season_number: u32,
    pub episode_number: u32,
    pub name: Option<String>,
    pub air_date: Option<NaiveDate>,
}

impl Episode {
    /// Short label such as `S02E05`
    pub fn label(&self) -> String {
        format!("S{:02}E{:02}", self.season_number, self.episode_number)
    }
}

/// Full record for one title
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaDetails {
    pub id: u64,
    pub kind: MediaKind,
    pub title: String,
    pub status: Option<String>,
    pub release_date: Option<NaiveDate>,
    pub genres: Vec<Genre>,
    pub vote_average: f64,
    pub popularity: f64,
    pub poster_path: Option<String>,
    pub next_episode: Option<Episode>,
    pub last_episode: Option<Episode>,
    pub last_air_date: Option<NaiveDate>,
}

impl MediaDetails {
    pub fn genre_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.genres.iter().map(|g| g.id)
    }
}

// ============================================================================
// TMDB API Types
// ============================================================================

/// Dates come back as `""` when unknown, so parse leniently
mod lenient_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()))
    }
}

/// Paged list response (`results` array)
#[derive(Debug, Clone, Deserialize)]
pub struct TmdbListResponse {
    #[serde(default)]
    pub results: Vec<TmdbListItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TmdbListItem {
    pub id: u64,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, with = "lenient_date")]
    pub release_date: Option<NaiveDate>,
    #[serde(default, with = "lenient_date")]
    pub first_air_date: Option<NaiveDate>,
    #[serde(default)]
    pub genre_ids: Vec<u32>,
    #[serde(default)]
    pub vote_average: f64,
    #[serde(default)]
    pub popularity: f64,
    #[serde(default)]
    pub poster_path: Option<String>,
}

impl TmdbListItem {
    /// Converts to a summary, resolving the kind from `hint`, then `media_type`.
    ///
    /// Returns `None` for entries that are not movies or series (people, collections).
    pub fn into_summary(self, hint: Option<MediaKind>) -> Option<MediaSummary> {
        let kind = match (hint, self.media_type.as_deref()) {
            (Some(kind), _) => kind,
            (None, Some("movie")) => MediaKind::Movie,
            (None, Some("tv")) => MediaKind::Series,
            (None, Some(_)) => return None,
            (None, None) if self.title.is_some() => MediaKind::Movie,
            (None, None) => MediaKind::Series,
        };

        let title = self.title.or(self.name).unwrap_or_else(|| "Unknown".to_string());

        Some(MediaSummary {
            id: self.id,
            kind,
            title,
            genre_ids: self.genre_ids,
            vote_average: self.vote_average,
            popularity: self.popularity,
            poster_path: self.poster_path,
            release_date: self.release_date.or(self.first_air_date),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TmdbEpisode {
    #[serde(default)]
    pub season_number: u32,
    #[serde(default)]
    pub episode_number: u32,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, with = "lenient_date")]
    pub air_date: Option<NaiveDate>,
}

impl From<TmdbEpisode> for Episode {
    fn from(ep: TmdbEpisode) -> Self {
        Episode {
            season_number: ep.season_number,
            episode_number: ep.episode_number,
            name: ep.name,
            air_date: ep.air_date,
        }
    }
}

/// Response from `movie/{id}` and `tv/{id}`
#[derive(Debug, Clone, Deserialize)]
pub struct TmdbDetails {
    pub id: u64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, with = "lenient_date")]
    pub release_date: Option<NaiveDate>,
    #[serde(default, with = "lenient_date")]
    pub first_air_date: Option<NaiveDate>,
    #[serde(default, with = "lenient_date")]
    pub last_air_date: Option<NaiveDate>,
    #[serde(default)]
    pub genres: Vec<Genre>,
    #[serde(default)]
    pub vote_average: f64,
    #[serde(default)]
    pub popularity: f64,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub next_episode_to_air: Option<TmdbEpisode>,
    #[serde(default)]
    pub last_episode_to_air: Option<TmdbEpisode>,
}

impl TmdbDetails {
    pub fn into_details(self, kind: MediaKind) -> MediaDetails {
        MediaDetails {
            id: self.id,
            kind,
            title: self
                .title
                .or(self.name)
                .unwrap_or_else(|| "Unknown".to_string()),
            status: self.status,
            release_date: self.release_date.or(self.first_air_date),
            genres: self.genres,
            vote_average: self.vote_average,
            popularity: self.popularity,
            poster_path: self.poster_path,
            next_episode: self.next_episode_to_air.map(Episode::from),
            last_episode: self.last_episode_to_air.map(Episode::from),
            last_air_date: self.last_air_date,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_kind_parses_provider_and_storage_names() {
        assert_eq!("movie".parse::<MediaKind>().unwrap(), MediaKind::Movie);
        assert_eq!("tv".parse::<MediaKind>().unwrap(), MediaKind::Series);
        assert_eq!("Series".parse::<MediaKind>().unwrap(), MediaKind::Series);
        assert!("person".parse::<MediaKind>().is_err());
    }

    #[test]
    fn test_media_kind_api_path() {
        assert_eq!(MediaKind::Movie.api_path(), "movie");
        assert_eq!(MediaKind::Series.api_path(), "tv");
    }

    #[test]
    fn test_list_item_skips_people_in_multi_search() {
        let json = r#"{"results": [
            {"id": 1, "media_type": "movie", "title": "Arrival", "release_date": "2016-11-11", "genre_ids": [878, 18], "vote_average": 7.6},
            {"id": 2, "media_type": "person", "name": "Denis Villeneuve"},
            {"id": 3, "media_type": "tv", "name": "Severance", "first_air_date": "2022-02-18"}
        ]}"#;

        let response: TmdbListResponse = serde_json::from_str(json).unwrap();
        let summaries: Vec<MediaSummary> = response
            .results
            .into_iter()
            .filter_map(|item| item.into_summary(None))
            .collect();

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].kind, MediaKind::Movie);
        assert_eq!(summaries[0].genre_ids, vec![878, 18]);
        assert_eq!(summaries[1].kind, MediaKind::Series);
        assert_eq!(summaries[1].title, "Severance");
        assert_eq!(
            summaries[1].release_date,
            NaiveDate::from_ymd_opt(2022, 2, 18)
        );
    }

    #[test]
    fn test_hint_overrides_missing_media_type() {
        let item: TmdbListItem =
            serde_json::from_str(r#"{"id": 9, "name": "Dark", "vote_average": 8.4}"#).unwrap();
        let summary = item.into_summary(Some(MediaKind::Series)).unwrap();
        assert_eq!(summary.kind, MediaKind::Series);
        assert_eq!(summary.vote_average, 8.4);
    }

    #[test]
    fn test_empty_release_date_is_none() {
        let details: TmdbDetails = serde_json::from_str(
            r#"{"id": 5, "title": "Untitled", "status": "Rumored", "release_date": ""}"#,
        )
        .unwrap();
        let details = details.into_details(MediaKind::Movie);
        assert_eq!(details.release_date, None);
        assert_eq!(details.status.as_deref(), Some("Rumored"));
    }

    #[test]
    fn test_series_details_carry_episodes() {
        let json = r#"{
            "id": 1399,
            "name": "Some Show",
            "status": "Returning Series",
            "first_air_date": "2011-04-17",
            "last_air_date": "2024-05-01",
            "genres": [{"id": 10765, "name": "Sci-Fi & Fantasy"}],
            "next_episode_to_air": {"season_number": 2, "episode_number": 5, "name": "Next", "air_date": "2024-05-08"},
            "last_episode_to_air": {"season_number": 2, "episode_number": 4, "air_date": "2024-05-01"}
        }"#;

        let details = serde_json::from_str::<TmdbDetails>(json)
            .unwrap()
            .into_details(MediaKind::Series);

        assert_eq!(details.title, "Some Show");
        assert_eq!(details.next_episode.as_ref().unwrap().label(), "S02E05");
        assert_eq!(
            details.last_episode.as_ref().unwrap().air_date,
            NaiveDate::from_ymd_opt(2024, 5, 1)
        );
        assert_eq!(details.genre_ids().collect::<Vec<_>>(), vec![10765]);
    }
}
