use async_trait::async_trait;
use std::collections::HashMap;
use std::io::Write;

use super::{NotificationSender, SenderError};
use crate::notifications::models::ChannelConfig;

const BELL: &str = "\x07";

/// Local audible alert: writes to stdout and rings the terminal bell.
#[derive(Debug, Default)]
pub struct ConsoleSender;

impl ConsoleSender {
    fn format(message: &str, context: &HashMap<String, String>, bell: bool) -> String {
        let is_alert = context.get("kind").is_some_and(|k| k == "alert");
        let prefix = if is_alert && bell { BELL } else { "" };
        let label = if is_alert { "ALERT" } else { "INFO" };
        let indented = message.replace('\n', "\n    ");
        format!("{prefix}[{label}] {indented}")
    }
}

#[async_trait]
impl NotificationSender for ConsoleSender {
    async fn send(
        &self,
        config: &ChannelConfig,
        message: &str,
        context: &HashMap<String, String>,
    ) -> Result<(), SenderError> {
        let ChannelConfig::Console { bell } = config else {
            return Err(SenderError::InvalidConfiguration(
                "Expected Console config, but found a different type.".to_string(),
            ));
        };
        write_line(&Self::format(message, context, *bell))
    }
}

fn write_line(line: &str) -> Result<(), SenderError> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}")
        .and_then(|_| stdout.flush())
        .map_err(|e| SenderError::SendFailed(e.to_string()))
}
