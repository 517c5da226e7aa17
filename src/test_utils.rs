//! Fakes shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::db::{self, SeaOrmTargetStore};
use crate::fetch::detector::{Detection, SignalDetector};
use crate::fetch::{FetchError, PageFetcher};
use crate::monitor::models::{EventMetadata, Target};
use crate::notifications::{Notice, NotificationError, Notifier};

pub async fn memory_store() -> SeaOrmTargetStore {
    let conn = db::connect(db::MEMORY_DATABASE_URL)
        .await
        .expect("in-memory database");
    SeaOrmTargetStore::new(conn)
}

pub fn target(id: i32, interval_minutes: i32) -> Target {
    Target {
        id,
        locator: format!("https://example.com/{id}"),
        interval_minutes,
        active: true,
        metadata: EventMetadata::default(),
        last_checked_at: 0,
        consecutive_failures: 0,
        signal_active: false,
        created_at: 0,
        updated_at: 0,
    }
}

/// Returns queued page bodies (or errors) in order, then empty pages.
#[derive(Default)]
pub struct ScriptedFetcher {
    responses: Mutex<VecDeque<Result<String, FetchError>>>,
    calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
}

impl ScriptedFetcher {
    pub fn new(responses: Vec<Result<String, FetchError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Default::default()
        }
    }

    /// Each fetch waits for a `notify_one` on `gate` before answering.
    pub fn gated(responses: Vec<Result<String, FetchError>>, gate: Arc<Notify>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
            gate: Some(gate),
        }
    }

    pub fn push(&self, response: Result<String, FetchError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(&self, _locator: &str, _timeout: Duration) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(String::new()))
    }
}

pub fn page(signal: bool) -> Result<String, FetchError> {
    Ok(if signal {
        "<p>2 tickets available</p>".to_string()
    } else {
        "<p>Sold out</p>".to_string()
    })
}

pub fn timeout() -> Result<String, FetchError> {
    Err(FetchError::Timeout(Duration::from_secs(15)))
}

pub fn transport_error() -> Result<String, FetchError> {
    Err(FetchError::Transport("connection refused".into()))
}

/// Detector that answers from a queue of canned detections.
#[derive(Default)]
pub struct ScriptedDetector {
    detections: Mutex<VecDeque<Detection>>,
}

impl ScriptedDetector {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections: Mutex::new(detections.into()),
        }
    }
}

impl SignalDetector for ScriptedDetector {
    fn detect(&self, _content: &str) -> Detection {
        self.detections
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifierCall {
    Start(Notice),
    Stop,
    Info(Notice),
}

#[derive(Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<NotifierCall>>,
}

impl RecordingNotifier {
    pub fn calls(&self) -> Vec<NotifierCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn start_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, NotifierCall::Start(_)))
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn start_alert(&self, notice: Notice) -> Result<(), NotificationError> {
        self.calls.lock().unwrap().push(NotifierCall::Start(notice));
        Ok(())
    }

    async fn stop_alert(&self) -> bool {
        self.calls.lock().unwrap().push(NotifierCall::Stop);
        true
    }

    async fn post_info(&self, notice: Notice) -> Result<(), NotificationError> {
        self.calls.lock().unwrap().push(NotifierCall::Info(notice));
        Ok(())
    }
}
