use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Where alerts are delivered. Configured in the `[[channels]]` tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChannelConfig {
    /// Prints to stdout, ringing the terminal bell for alerts.
    Console {
        #[serde(default = "default_bell")]
        bell: bool,
    },
    Telegram {
        bot_token: String,
        chat_id: String,
        /// Overrides `https://api.telegram.org`.
        #[serde(default)]
        api_base: Option<String>,
    },
    Webhook {
        url: String,
        #[serde(default = "default_method")]
        method: String, // "GET" or "POST"
        headers: Option<HashMap<String, String>>,
        body_template: Option<String>,
    },
}

fn default_bell() -> bool {
    true
}

fn default_method() -> String {
    "POST".to_string()
}

impl ChannelConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            ChannelConfig::Console { .. } => "console",
            ChannelConfig::Telegram { .. } => "telegram",
            ChannelConfig::Webhook { .. } => "webhook",
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig::Console { bell: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// Loud, repeating alert.
    Alert,
    /// One-shot visible notification.
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub target_id: Option<i32>,
    pub title: String,
    pub body: String,
    /// Page the user should open.
    pub link: Option<String>,
}

impl Notice {
    pub fn render_text(&self) -> String {
        match &self.link {
            Some(link) => format!("{}\n{}\n{}", self.title, self.body, link),
            None => format!("{}\n{}", self.title, self.body),
        }
    }

    /// Template variables for channels that render a body.
    pub fn context(&self, kind: NoticeKind, repeat: u32) -> HashMap<String, String> {
        let mut context = HashMap::new();
        context.insert(
            "target_id".to_string(),
            self.target_id.map(|id| id.to_string()).unwrap_or_default(),
        );
        context.insert("title".to_string(), self.title.clone());
        context.insert("body".to_string(), self.body.clone());
        context.insert("link".to_string(), self.link.clone().unwrap_or_default());
        context.insert(
            "kind".to_string(),
            match kind {
                NoticeKind::Alert => "alert",
                NoticeKind::Info => "info",
            }
            .to_string(),
        );
        context.insert("repeat".to_string(), repeat.to_string());
        context
    }
}
