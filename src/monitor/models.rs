//! Domain types shared by the scheduler, the executor and the store.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Allowed check intervals, in minutes.
pub const INTERVAL_STEPS_MINUTES: [i32; 10] = [1, 2, 5, 10, 15, 30, 60, 120, 180, 360];

pub const DEFAULT_INTERVAL_MINUTES: i32 = 5;

/// Snaps a requested interval up to the nearest allowed step.
///
/// Returns `None` when the value is outside `1..=360`.
pub fn snap_interval(minutes: i32) -> Option<i32> {
    INTERVAL_STEPS_MINUTES
        .iter()
        .copied()
        .find(|step| minutes >= 1 && *step >= minutes)
}

/// Prefixes `https://` when the locator carries no http(s) scheme.
pub fn normalize_locator(raw: &str) -> String {
    let trimmed = raw.trim();
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Renders a last-checked timestamp the way listings show it.
pub fn format_last_checked<Tz: TimeZone>(millis: i64, tz: &Tz) -> String
where
    Tz::Offset: fmt::Display,
{
    if millis <= 0 {
        return "Never checked".to_string();
    }
    match DateTime::<Utc>::from_timestamp_millis(millis) {
        Some(at) => at
            .with_timezone(tz)
            .format("%d/%m/%Y, %I:%M%p")
            .to_string(),
        None => "Never checked".to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Concert,
    Sports,
    Theater,
    #[default]
    Other,
}

const CATEGORY_KEYWORDS: [(EventCategory, &[&str]); 3] = [
    (
        EventCategory::Concert,
        &["concert", "music", "festival", "band", "singer", "tour", "dj"],
    ),
    (
        EventCategory::Sports,
        &["game", "match", "stadium", "arena", "sport", "ball", "team", "championship"],
    ),
    (
        EventCategory::Theater,
        &["theater", "theatre", "show", "play", "musical", "stage", "comedy", "performance"],
    ),
];

impl EventCategory {
    /// Keyword classifier over the event name and locator. First match wins.
    pub fn classify(name: Option<&str>, locator: &str) -> Self {
        let haystack = format!("{} {}", name.unwrap_or_default(), locator).to_lowercase();
        CATEGORY_KEYWORDS
            .iter()
            .find(|(_, words)| words.iter().any(|w| haystack.contains(w)))
            .map(|(category, _)| *category)
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Concert => "concert",
            EventCategory::Sports => "sports",
            EventCategory::Theater => "theater",
            EventCategory::Other => "other",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventCategory {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "concert" => EventCategory::Concert,
            "sports" => EventCategory::Sports,
            "theater" => EventCategory::Theater,
            _ => EventCategory::Other,
        })
    }
}

/// Best-effort event details scraped from a page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    pub name: Option<String>,
    pub date: Option<String>,
    pub category: EventCategory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub id: i32,
    pub locator: String,
    pub interval_minutes: i32,
    pub active: bool,
    pub metadata: EventMetadata,
    /// Millis since epoch, 0 when never checked.
    pub last_checked_at: i64,
    pub consecutive_failures: i32,
    pub signal_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Target {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(u64::try_from(self.interval_minutes.max(1)).unwrap_or(1) * 60)
    }

    /// Metadata counts as discovered once a name is known.
    pub fn has_metadata(&self) -> bool {
        self.metadata.name.is_some()
    }

    /// Time left until the next check is due, zero when overdue or never checked.
    pub fn delay_until_due(&self, now_millis: i64) -> Duration {
        if self.last_checked_at <= 0 {
            return Duration::ZERO;
        }
        let interval_ms = i64::try_from(self.interval().as_millis()).unwrap_or(i64::MAX);
        let due = self.last_checked_at.saturating_add(interval_ms);
        Duration::from_millis(u64::try_from(due - now_millis).unwrap_or(0))
    }

    pub fn display_name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or(&self.locator)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTarget {
    pub locator: String,
    pub interval_minutes: i32,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Partial update. Fields left as `None` keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetPatch {
    pub locator: Option<String>,
    pub interval_minutes: Option<i32>,
    pub active: Option<bool>,
    /// User-confirmed event name. An empty string clears it.
    pub event_name: Option<String>,
    /// User-confirmed event date. An empty string clears it.
    pub event_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: i32,
    pub target_id: i32,
    pub timestamp: i64,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    Timeout,
    Transport(String),
}

impl FailureCause {
    pub fn history_note(&self) -> &'static str {
        match self {
            FailureCause::Timeout => "Connection timed out. Will retry later.",
            FailureCause::Transport(_) => "Connection error. Will retry later.",
        }
    }
}

/// Result of one check, never persisted as such.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    SignalFound(EventMetadata),
    SignalAbsent,
    TransientFailure(FailureCause),
}

/// "Tickets found[ for NAME[ on DATE]]"
pub fn found_note(metadata: &EventMetadata) -> String {
    let mut note = String::from("Tickets found");
    if let Some(name) = metadata.name.as_deref().filter(|n| !n.is_empty()) {
        note.push_str(" for ");
        note.push_str(name);
        if let Some(date) = metadata.date.as_deref().filter(|d| !d.is_empty()) {
            note.push_str(" on ");
            note.push_str(date);
        }
    }
    note
}

pub fn recovery_note(failures: i32) -> String {
    format!("Connection restored after {failures} failed attempts.")
}
