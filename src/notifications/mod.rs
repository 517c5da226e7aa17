//! Alert delivery.
//!
//! [`Notifier`] is what the alert controller drives. The production
//! implementation, [`service::NotificationService`], fans each notice out to
//! the configured channels and keeps a loud alert repeating until stopped.

pub mod models;
pub mod senders;
pub mod service;

use async_trait::async_trait;
use thiserror::Error;

pub use models::{ChannelConfig, Notice, NoticeKind};
pub use service::NotificationService;

use senders::SenderError;

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("All {0} notification channels failed")]
    AllChannelsFailed(usize),
    #[error("Sender error: {0}")]
    Sender(#[from] SenderError),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Starts the loud, repeating alert. Replaces any alert already running.
    async fn start_alert(&self, notice: Notice) -> Result<(), NotificationError>;
    /// Silences the running alert. Returns whether one was running.
    async fn stop_alert(&self) -> bool;
    /// Posts a one-shot visible notification.
    async fn post_info(&self, notice: Notice) -> Result<(), NotificationError>;
}
