use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use super::{MediaKind, MediaRef, NotificationKind};

/// Per-kind record of the last triggering window that produced a notification.
///
/// The reference identifies the real-world event (a release date, an episode
/// label); a kind is suppressed while its reference is unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationMarkers(BTreeMap<NotificationKind, String>);

impl NotificationMarkers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: NotificationKind) -> Option<&str> {
        self.0.get(&kind).map(String::as_str)
    }

    /// Whether `kind` was already emitted for this triggering window
    pub fn already_notified(&self, kind: NotificationKind, reference: &str) -> bool {
        self.get(kind) == Some(reference)
    }

    pub fn mark(&mut self, kind: NotificationKind, reference: impl Into<String>) {
        self.0.insert(kind, reference.into());
    }

    /// Reads stored markers, dropping entries with an unknown kind or a non-string reference
    pub fn from_value_lenient(value: &Value) -> Self {
        let mut markers = Self::new();
        let Some(entries) = value.as_object() else {
            if !value.is_null() {
                tracing::warn!(markers = %value, "Ignoring notification markers that are not an object");
            }
            return markers;
        };

        for (key, reference) in entries {
            let kind = serde_json::from_value::<NotificationKind>(Value::String(key.clone()));
            match (kind, reference.as_str()) {
                (Ok(kind), Some(reference)) => markers.mark(kind, reference),
                _ => tracing::warn!(key = %key, "Dropping unreadable notification marker"),
            }
        }
        markers
    }
}

/// A tenant's subscription to release/episode updates for one title
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub tenant_id: i64,
    pub external_id: u64,
    pub kind: MediaKind,
    pub title: String,
    pub poster_path: Option<String>,
    pub subscribed_at: DateTime<Utc>,
    pub last_checked: Option<DateTime<Utc>>,
    pub notify_on_release: bool,
    pub notify_on_update: bool,
    pub markers: NotificationMarkers,
}

impl Subscription {
    pub fn media_ref(&self) -> MediaRef {
        MediaRef {
            id: self.external_id,
            kind: self.kind,
        }
    }

    /// A subscription never checked is always due
    pub fn is_due(&self, now: DateTime<Utc>, interval: Duration) -> bool {
        match self.last_checked {
            None => true,
            Some(last) => match (now - last).to_std() {
                Ok(elapsed) => elapsed >= interval,
                // last_checked in the future (clock skew): wait it out
                Err(_) => false,
            },
        }
    }
}
