//! Process-wide alert state.
//!
//! # State Machine
//!
//! ```text
//!          found(t)                      found(t')
//!  Idle ─────────────► Alerting(t) ─────────────────► Alerting(t')
//!   ▲                      │                              │
//!   │    acknowledge()     │        acknowledge()         │
//!   └──────────────────────┴──────────────────────────────┘
//! ```
//!
//! - **Idle:** Nothing is sounding.
//! - **Alerting(t):** The loud alert for target `t` repeats until the user
//!   acknowledges it. A newer found edge replaces it, never stacks.
//!
//! The controller only sees edges: the executor calls
//! [`AlertController::on_signal_found`] when a target's signal goes from
//! absent to present. Repeated present observations never reach it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::db::TargetStore;
use crate::monitor::models::{found_note, Target};
use crate::notifications::{Notice, Notifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum AlertState {
    #[default]
    Idle,
    #[serde(rename_all = "camelCase")]
    Alerting { target_id: i32 },
}

/// What a found edge did to the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertTransition {
    Started { target_id: i32 },
    Replaced { previous: i32, target_id: i32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Acknowledgement {
    /// The user opened the alerting target's page.
    OpenTarget,
    Dismiss,
    /// The user brought the app to the foreground.
    Foreground,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckOutcome {
    pub previous: AlertState,
    /// Page to open, set for [`Acknowledgement::OpenTarget`].
    pub link: Option<String>,
}

pub fn alert_title(target: &Target) -> String {
    match target.metadata.name.as_deref().filter(|n| !n.is_empty()) {
        Some(name) => format!("Tickets for {name}!"),
        None => "Tickets Available!".to_string(),
    }
}

pub fn alert_body(target: &Target) -> String {
    let name = target.metadata.name.as_deref().filter(|n| !n.is_empty());
    let date = target.metadata.date.as_deref().filter(|d| !d.is_empty());
    let found = match (name, date) {
        (Some(name), Some(date)) => format!("Tickets have been found for {name} on {date}."),
        (Some(name), None) => format!("Tickets have been found for {name}."),
        (None, Some(date)) => format!("Tickets have been found for your monitored event on {date}."),
        (None, None) => "Tickets have been found for your monitored event.".to_string(),
    };
    format!("{found} Open the listing now!")
}

pub struct AlertController {
    state: Mutex<AlertState>,
    notifier: Arc<dyn Notifier>,
    store: Arc<dyn TargetStore>,
}

impl AlertController {
    pub fn new(notifier: Arc<dyn Notifier>, store: Arc<dyn TargetStore>) -> Self {
        Self {
            state: Mutex::new(AlertState::Idle),
            notifier,
            store,
        }
    }

    pub async fn state(&self) -> AlertState {
        *self.state.lock().await
    }

    /// Handles an absent→present edge for `target`.
    pub async fn on_signal_found(&self, target: &Target) -> AlertTransition {
        if let Err(e) = self
            .store
            .append_history(target.id, found_note(&target.metadata))
            .await
        {
            warn!(target_id = target.id, error = %e, "Failed to record found history entry.");
        }

        let notice = Notice {
            target_id: Some(target.id),
            title: alert_title(target),
            body: alert_body(target),
            link: Some(target.locator.clone()),
        };

        let mut state = self.state.lock().await;
        let transition = match *state {
            AlertState::Alerting { target_id: previous } => AlertTransition::Replaced {
                previous,
                target_id: target.id,
            },
            AlertState::Idle => AlertTransition::Started {
                target_id: target.id,
            },
        };
        *state = AlertState::Alerting {
            target_id: target.id,
        };

        info!(target_id = target.id, ?transition, "Tickets found, raising alert.");
        if let Err(e) = self.notifier.start_alert(notice).await {
            warn!(target_id = target.id, error = %e, "Alert delivery failed.");
        }
        transition
    }

    /// Stops the loud alert unconditionally and returns to `Idle`.
    pub async fn acknowledge(&self, kind: Acknowledgement) -> AckOutcome {
        let mut state = self.state.lock().await;
        let previous = std::mem::take(&mut *state);
        self.notifier.stop_alert().await;

        let link = match (kind, previous) {
            (Acknowledgement::OpenTarget, AlertState::Alerting { target_id }) => {
                match self.store.get_by_id(target_id).await {
                    Ok(target) => Some(target.locator),
                    Err(e) => {
                        warn!(target_id, error = %e, "Alerting target could not be loaded.");
                        None
                    }
                }
            }
            _ => None,
        };
        info!(?kind, ?previous, "Alert acknowledged.");
        AckOutcome { previous, link }
    }

    /// Posts a sample notification through the configured channels.
    pub async fn test_alert(&self) -> Result<(), crate::notifications::NotificationError> {
        self.notifier
            .post_info(Notice {
                target_id: None,
                title: "TEST: Tickets for Sample Event!".to_string(),
                body: "This is a test alert. Tickets have been found for Sample Event on 1 January 2030. Open the listing now!".to_string(),
                link: None,
            })
            .await
    }
}
