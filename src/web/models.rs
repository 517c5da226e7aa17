use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::alerting::Acknowledgement;
use crate::monitor::models::{
    format_last_checked, NewTarget, Target, DEFAULT_INTERVAL_MINUTES,
};
use crate::monitor::scheduler::Scheduler;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTargetRequest {
    pub locator: String,
    pub interval_minutes: Option<i32>,
    pub active: Option<bool>,
}

impl From<CreateTargetRequest> for NewTarget {
    fn from(request: CreateTargetRequest) -> Self {
        NewTarget {
            locator: request.locator,
            interval_minutes: request.interval_minutes.unwrap_or(DEFAULT_INTERVAL_MINUTES),
            active: request.active.unwrap_or(true),
        }
    }
}

/// A target plus its live schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetView {
    #[serde(flatten)]
    pub target: Target,
    pub last_checked_display: String,
    pub next_check_in_seconds: Option<u64>,
    pub checking: bool,
}

impl TargetView {
    pub fn new(target: Target, scheduler: &Scheduler) -> Self {
        Self {
            last_checked_display: format_last_checked(target.last_checked_at, &Local),
            next_check_in_seconds: scheduler.pending_delay(target.id).map(|d| d.as_secs()),
            checking: scheduler.is_in_flight(target.id),
            target,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckRequest {
    pub kind: Acknowledgement,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub pending_checks: usize,
}
