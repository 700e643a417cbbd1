//! Release and episode transition rules.
//!
//! `evaluate` is pure: it looks at one subscription, the freshly fetched
//! details and today's date, and says which notification (if any) the current
//! state warrants. Suppression of repeats happens afterwards against the
//! subscription's markers, keyed by the trigger's `reference`.

use chrono::NaiveDate;

use crate::models::{
    Episode, MediaDetails, MediaKind, NotificationIntent, NotificationKind, NotificationPayload,
    Subscription,
};

/// Movie statuses that count as "not yet released"
const PRE_RELEASE_STATUSES: [&str; 2] = ["Post Production", "In Production"];

const RELEASED_STATUS: &str = "Released";

/// A new episode is announced this many days before it airs
const NEW_EPISODE_LEAD_DAYS: i64 = 1;

/// Day counts for each transition, all inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionWindows {
    /// Max days since release for a `release` notification
    pub release_days: i64,
    /// Max days until release for an `upcoming` notification
    pub upcoming_days: i64,
    /// Max days since the last episode aired for `episode_aired`
    pub episode_days: i64,
}

impl Default for TransitionWindows {
    fn default() -> Self {
        Self {
            release_days: 2,
            upcoming_days: 7,
            episode_days: 1,
        }
    }
}

/// A notification condition that currently holds
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub kind: NotificationKind,
    /// Identifies the triggering window: a release/air date or an episode label
    pub reference: String,
    pub date: NaiveDate,
    pub episode: Option<Episode>,
}

impl Trigger {
    pub fn into_intent(self, sub: &Subscription, details: &MediaDetails) -> NotificationIntent {
        let poster = details
            .poster_path
            .as_deref()
            .or(sub.poster_path.as_deref());

        NotificationIntent {
            tenant_id: sub.tenant_id,
            subscription_id: sub.id,
            kind: self.kind,
            reference: self.reference,
            payload: NotificationPayload {
                external_id: sub.external_id,
                kind: sub.kind,
                title: details.title.clone(),
                date: self.date,
                episode: self.episode.as_ref().map(Episode::label),
                episode_name: self.episode.and_then(|e| e.name),
                poster_url: NotificationPayload::poster_url_for(poster),
            },
        }
    }
}

/// Calendar days from `from` to `to`
fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days()
}

pub fn evaluate(
    sub: &Subscription,
    details: &MediaDetails,
    today: NaiveDate,
    windows: &TransitionWindows,
) -> Option<Trigger> {
    match sub.kind {
        MediaKind::Movie if sub.notify_on_release => evaluate_movie(details, today, windows),
        MediaKind::Series if sub.notify_on_update => evaluate_series(details, today, windows),
        _ => None,
    }
}

fn evaluate_movie(
    details: &MediaDetails,
    today: NaiveDate,
    windows: &TransitionWindows,
) -> Option<Trigger> {
    let release = details.release_date?;
    let status = details.status.as_deref()?;

    let kind = if status == RELEASED_STATUS {
        let since = days_between(release, today);
        (0..=windows.release_days)
            .contains(&since)
            .then_some(NotificationKind::Release)?
    } else if PRE_RELEASE_STATUSES.contains(&status) {
        let until = days_between(today, release);
        (0..=windows.upcoming_days)
            .contains(&until)
            .then_some(NotificationKind::Upcoming)?
    } else {
        return None;
    };

    Some(Trigger {
        kind,
        reference: release.to_string(),
        date: release,
        episode: None,
    })
}

fn evaluate_series(
    details: &MediaDetails,
    today: NaiveDate,
    windows: &TransitionWindows,
) -> Option<Trigger> {
    if let Some(next) = &details.next_episode {
        if let Some(air_date) = next.air_date {
            if days_between(today, air_date) == NEW_EPISODE_LEAD_DAYS {
                return Some(Trigger {
                    kind: NotificationKind::NewEpisode,
                    reference: next.label(),
                    date: air_date,
                    episode: Some(next.clone()),
                });
            }
        }
    }

    let last = details.last_episode.as_ref();
    let aired = last
        .and_then(|e| e.air_date)
        .or(details.last_air_date)?;

    let since = days_between(aired, today);
    if !(0..=windows.episode_days).contains(&since) {
        return None;
    }

    Some(Trigger {
        kind: NotificationKind::EpisodeAired,
        reference: last
            .map(Episode::label)
            .unwrap_or_else(|| aired.to_string()),
        date: aired,
        episode: last.cloned(),
    })
}
