use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::models::{ChannelConfig, Notice, NoticeKind};
use super::senders::{
    console::ConsoleSender, telegram::TelegramSender, webhook::WebhookSender, NotificationSender,
};
use super::{NotificationError, Notifier};

/// Fans a notice out to every configured channel.
struct Dispatcher {
    channels: Vec<ChannelConfig>,
    console: ConsoleSender,
    telegram: TelegramSender,
    webhook: WebhookSender,
}

impl Dispatcher {
    fn sender_for(&self, config: &ChannelConfig) -> &dyn NotificationSender {
        match config {
            ChannelConfig::Console { .. } => &self.console,
            ChannelConfig::Telegram { .. } => &self.telegram,
            ChannelConfig::Webhook { .. } => &self.webhook,
        }
    }

    /// Succeeds when at least one channel accepted the notice.
    async fn deliver(
        &self,
        notice: &Notice,
        kind: NoticeKind,
        repeat: u32,
    ) -> Result<(), NotificationError> {
        if self.channels.is_empty() {
            debug!(title = %notice.title, "No notification channels configured.");
            return Ok(());
        }
        let message = notice.render_text();
        let context: HashMap<String, String> = notice.context(kind, repeat);

        let mut failures = 0;
        for channel in &self.channels {
            if let Err(e) = self
                .sender_for(channel)
                .send(channel, &message, &context)
                .await
            {
                failures += 1;
                warn!(channel = channel.kind(), error = %e, "Failed to deliver notification.");
            }
        }
        if failures == self.channels.len() {
            return Err(NotificationError::AllChannelsFailed(failures));
        }
        Ok(())
    }
}

struct ActiveAlert {
    target_id: Option<i32>,
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl ActiveAlert {
    fn stop(self) {
        // The loop may already have finished its repeats.
        let _ = self.stop_tx.send(());
        self.handle.abort();
    }
}

pub struct NotificationService {
    dispatcher: Arc<Dispatcher>,
    repeat_interval: Duration,
    max_repeats: u32,
    active: Mutex<Option<ActiveAlert>>,
}

impl NotificationService {
    pub fn new(channels: Vec<ChannelConfig>, repeat_interval: Duration, max_repeats: u32) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher {
                channels,
                console: ConsoleSender,
                telegram: TelegramSender::new(),
                webhook: WebhookSender::new(),
            }),
            repeat_interval,
            max_repeats,
            active: Mutex::new(None),
        }
    }

    /// Target of the running alert, if any.
    pub async fn alerting_target(&self) -> Option<Option<i32>> {
        self.active.lock().await.as_ref().map(|a| a.target_id)
    }
}

async fn repeat_alert(
    dispatcher: Arc<Dispatcher>,
    notice: Notice,
    interval: Duration,
    max_repeats: u32,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut repeat: u32 = 0;
    while max_repeats == 0 || repeat < max_repeats {
        repeat = repeat.saturating_add(1);
        tokio::select! {
            biased;
            _ = &mut stop_rx => {
                debug!(target_id = ?notice.target_id, "Alert loop stopped.");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }
        if let Err(e) = dispatcher.deliver(&notice, NoticeKind::Alert, repeat).await {
            warn!(target_id = ?notice.target_id, repeat, error = %e, "Repeated alert was not delivered.");
        }
    }
    debug!(target_id = ?notice.target_id, "Alert repeats exhausted.");
}

#[async_trait]
impl Notifier for NotificationService {
    async fn start_alert(&self, notice: Notice) -> Result<(), NotificationError> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            info!(previous_target_id = ?previous.target_id, new_target_id = ?notice.target_id, "Replacing running alert.");
            previous.stop();
        }

        let result = self.dispatcher.deliver(&notice, NoticeKind::Alert, 0).await;

        let (stop_tx, stop_rx) = oneshot::channel();
        let target_id = notice.target_id;
        let handle = tokio::spawn(repeat_alert(
            self.dispatcher.clone(),
            notice,
            self.repeat_interval,
            self.max_repeats,
            stop_rx,
        ));
        *active = Some(ActiveAlert {
            target_id,
            stop_tx,
            handle,
        });
        result
    }

    async fn stop_alert(&self) -> bool {
        match self.active.lock().await.take() {
            Some(alert) => {
                info!(target_id = ?alert.target_id, "Alert stopped.");
                alert.stop();
                true
            }
            None => false,
        }
    }

    async fn post_info(&self, notice: Notice) -> Result<(), NotificationError> {
        self.dispatcher.deliver(&notice, NoticeKind::Info, 0).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notice(target_id: i32) -> Notice {
        Notice {
            target_id: Some(target_id),
            title: "Tickets Available!".into(),
            body: "Go".into(),
            link: None,
        }
    }

    async fn hook_server(status: u16) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;
        server
    }

    fn webhook(server: &MockServer) -> ChannelConfig {
        ChannelConfig::Webhook {
            url: server.uri(),
            method: "POST".into(),
            headers: None,
            body_template: None,
        }
    }

    async fn received(server: &MockServer) -> usize {
        server.received_requests().await.map(|r| r.len()).unwrap_or(0)
    }

    #[tokio::test]
    async fn alert_repeats_until_exhausted() {
        let server = hook_server(200).await;
        let service =
            NotificationService::new(vec![webhook(&server)], Duration::from_millis(30), 2);

        service.start_alert(notice(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(received(&server).await, 3);
        assert_eq!(service.alerting_target().await, Some(Some(1)));
    }

    #[tokio::test]
    async fn zero_cap_repeats_until_stopped() {
        let server = hook_server(200).await;
        let service =
            NotificationService::new(vec![webhook(&server)], Duration::from_millis(20), 0);

        service.start_alert(notice(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(received(&server).await >= 5);

        assert!(service.stop_alert().await);
        let after_stop = received(&server).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(received(&server).await, after_stop);
    }

    #[tokio::test]
    async fn stop_alert_silences_repeats() {
        let server = hook_server(200).await;
        let service =
            NotificationService::new(vec![webhook(&server)], Duration::from_millis(50), 1000);

        service.start_alert(notice(1)).await.unwrap();
        assert!(service.stop_alert().await);
        let after_stop = received(&server).await;
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(received(&server).await, after_stop);
        assert_eq!(service.alerting_target().await, None);
        assert!(!service.stop_alert().await);
    }

    #[tokio::test]
    async fn new_alert_replaces_running_one() {
        let server = hook_server(200).await;
        let service =
            NotificationService::new(vec![webhook(&server)], Duration::from_secs(60), 5);

        service.start_alert(notice(1)).await.unwrap();
        service.start_alert(notice(2)).await.unwrap();
        assert_eq!(service.alerting_target().await, Some(Some(2)));
        assert!(service.stop_alert().await);
        assert_eq!(service.alerting_target().await, None);
    }

    #[tokio::test]
    async fn post_info_fails_only_when_every_channel_fails() {
        let bad = hook_server(500).await;
        let good = hook_server(200).await;

        let service =
            NotificationService::new(vec![webhook(&bad)], Duration::from_secs(60), 0);
        assert!(matches!(
            service.post_info(notice(1)).await,
            Err(NotificationError::AllChannelsFailed(1))
        ));

        let service = NotificationService::new(
            vec![webhook(&bad), webhook(&good)],
            Duration::from_secs(60),
            0,
        );
        service.post_info(notice(1)).await.unwrap();
        assert_eq!(service.alerting_target().await, None);
    }

    #[tokio::test]
    async fn no_channels_is_ok() {
        let service = NotificationService::new(Vec::new(), Duration::from_secs(1), 1);
        service.post_info(notice(1)).await.unwrap();
        service.start_alert(notice(1)).await.unwrap();
        assert!(service.stop_alert().await);
    }
}
