use async_trait::async_trait;
use reqwest::{header, Client, Method};
use std::collections::HashMap;
use tera::{Context, Tera};

use super::{NotificationSender, SenderError};
use crate::notifications::models::ChannelConfig;

/// Body used when a POST webhook has no `body_template`.
pub const DEFAULT_BODY_TEMPLATE: &str = r#"{"kind": {{ kind | json_encode() }}, "targetId": {{ target_id | json_encode() }}, "title": {{ title | json_encode() }}, "body": {{ body | json_encode() }}, "link": {{ link | json_encode() }} }"#;

/// Pushes notices to an arbitrary HTTP endpoint.
pub struct WebhookSender {
    client: Client,
}

impl Default for WebhookSender {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookSender {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

fn render_body(template: &str, context: &HashMap<String, String>) -> Result<String, SenderError> {
    let mut tera_context = Context::new();
    for (key, value) in context {
        tera_context.insert(key, value);
    }
    Tera::one_off(template, &tera_context, false)
        .map_err(|e| SenderError::TemplatingError(e.to_string()))
}

#[async_trait]
impl NotificationSender for WebhookSender {
    async fn send(
        &self,
        config: &ChannelConfig,
        _message: &str,
        context: &HashMap<String, String>,
    ) -> Result<(), SenderError> {
        let ChannelConfig::Webhook {
            url,
            method,
            headers,
            body_template,
        } = config
        else {
            return Err(SenderError::InvalidConfiguration(
                "Expected Webhook config, but found a different type.".to_string(),
            ));
        };

        let http_method = match method.to_uppercase().as_str() {
            "POST" => Method::POST,
            "GET" => Method::GET,
            _ => {
                return Err(SenderError::InvalidConfiguration(format!(
                    "Unsupported HTTP method: {method}"
                )));
            }
        };

        let mut request_builder = self.client.request(http_method.clone(), url);

        if let Some(h) = headers {
            let mut header_map = header::HeaderMap::new();
            for (key, value) in h {
                let header_name = header::HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                    SenderError::InvalidConfiguration(format!("Invalid header name: {e}"))
                })?;
                let header_value = header::HeaderValue::from_str(value).map_err(|e| {
                    SenderError::InvalidConfiguration(format!("Invalid header value: {e}"))
                })?;
                header_map.insert(header_name, header_value);
            }
            request_builder = request_builder.headers(header_map);
        }

        if http_method == Method::POST {
            let template = body_template.as_deref().unwrap_or(DEFAULT_BODY_TEMPLATE);
            let rendered_body = render_body(template, context)?;
            request_builder = request_builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(rendered_body);
        }

        let response = request_builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(SenderError::SendFailed(format!(
                "Webhook returned non-success status: {status}. Body: {error_body}"
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::models::{Notice, NoticeKind};
    use wiremock::matchers::{body_json, header as header_eq, method as method_eq, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn notice() -> Notice {
        Notice {
            target_id: Some(9),
            title: "Tickets for \"Gig\"!".into(),
            body: "Found".into(),
            link: Some("https://x.io/e".into()),
        }
    }

    fn webhook(url: String, body_template: Option<String>) -> ChannelConfig {
        ChannelConfig::Webhook {
            url,
            method: "POST".into(),
            headers: Some(HashMap::from([("X-Token".to_string(), "s3cret".to_string())])),
            body_template,
        }
    }

    #[test]
    fn default_template_renders_valid_json() {
        let body = render_body(DEFAULT_BODY_TEMPLATE, &notice().context(NoticeKind::Alert, 0)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["title"], "Tickets for \"Gig\"!");
        assert_eq!(value["targetId"], "9");
        assert_eq!(value["kind"], "alert");
    }

    #[tokio::test]
    async fn posts_rendered_body_with_headers() {
        let server = MockServer::start().await;
        Mock::given(method_eq("POST"))
            .and(path("/hook"))
            .and(header_eq("x-token", "s3cret"))
            .and(body_json(serde_json::json!({"text": "Found"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let config = webhook(
            format!("{}/hook", server.uri()),
            Some(r#"{"text": "{{ body }}"}"#.into()),
        );
        WebhookSender::new()
            .send(&config, "ignored", &notice().context(NoticeKind::Info, 0))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn non_success_status_is_send_failure() {
        let server = MockServer::start().await;
        Mock::given(method_eq("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let config = webhook(server.uri(), None);
        let err = WebhookSender::new()
            .send(&config, "", &notice().context(NoticeKind::Alert, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, SenderError::SendFailed(msg) if msg.contains("boom")));
    }

    #[tokio::test]
    async fn unsupported_method_is_rejected() {
        let config = ChannelConfig::Webhook {
            url: "http://localhost".into(),
            method: "PATCH".into(),
            headers: None,
            body_template: None,
        };
        let err = WebhookSender::new()
            .send(&config, "", &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SenderError::InvalidConfiguration(_)));
    }
}
