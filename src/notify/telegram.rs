//! Telegram Bot API delivery.

use super::format::{format_alert, to_plain};
use super::{Alert, Notifier};
use crate::config::TelegramConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument, warn};

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Sends alerts to one chat through `sendMessage`.
pub struct TelegramNotifier {
    http: Client,
    endpoint: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(http: Client, api_base_url: &str, bot_token: &str, chat_id: &str) -> Self {
        Self {
            http,
            endpoint: format!(
                "{}/bot{}/sendMessage",
                api_base_url.trim_end_matches('/'),
                bot_token
            ),
            chat_id: chat_id.to_string(),
        }
    }

    /// Build from config; `None` unless both token and chat id are set.
    pub fn from_config(http: Client, config: &TelegramConfig) -> Option<Self> {
        let token = config.bot_token.as_deref()?;
        let chat_id = config.chat_id.as_deref()?;
        Some(Self::new(http, &config.api_base_url, token, chat_id))
    }

    #[instrument(skip(self, text))]
    async fn post(&self, text: &str, parse_html: bool) -> Result<(), String> {
        let mut body = json!({
            "chat_id": self.chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });
        if parse_html {
            body["parse_mode"] = json!("HTML");
        }

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.without_url().to_string())?;

        let status = response.status();
        let parsed: Option<ApiResponse> = response.json().await.ok();
        match parsed {
            Some(r) if r.ok && status.is_success() => Ok(()),
            Some(r) => Err(r
                .description
                .unwrap_or_else(|| format!("HTTP {status}"))),
            None => Err(format!("HTTP {status} with unreadable body")),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, alert: &Alert) -> bool {
        let html = format_alert(alert);

        match self.post(&html, true).await {
            Ok(()) => {
                debug!(kind = alert.kind(), "Telegram message delivered");
                true
            }
            Err(first) => {
                // Markup rejections are common; retry once as plain text
                warn!(kind = alert.kind(), error = %first, "Telegram send failed, retrying as plain text");
                match self.post(&to_plain(&html), false).await {
                    Ok(()) => true,
                    Err(second) => {
                        warn!(kind = alert.kind(), error = %second, "Telegram retry failed");
                        false
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn alert() -> Alert {
        Alert::Started {
            instruments: vec!["copper".to_string()],
            poll_interval_secs: 300,
        }
    }

    #[tokio::test]
    async fn test_delivers_html() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .and(body_partial_json(json!({ "chat_id": "42", "parse_mode": "HTML" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = TelegramNotifier::new(Client::new(), &server.uri(), "TOKEN", "42");
        assert!(notifier.send(&alert()).await);
    }

    #[tokio::test]
    async fn test_retries_without_markup() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "parse_mode": "HTML" })))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "ok": false,
                "description": "Bad Request: can't parse entities"
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
            .mount(&server)
            .await;

        let notifier = TelegramNotifier::new(Client::new(), &server.uri(), "TOKEN", "42");
        assert!(notifier.send(&alert()).await);
    }

    #[tokio::test]
    async fn test_reports_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "ok": false,
                "description": "Unauthorized"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let notifier = TelegramNotifier::new(Client::new(), &server.uri(), "BAD", "42");
        assert!(!notifier.send(&alert()).await);
    }

    #[test]
    fn test_from_config_requires_credentials() {
        let mut config = TelegramConfig {
            bot_token: None,
            chat_id: Some("42".to_string()),
            api_base_url: "https://api.telegram.org".to_string(),
        };
        assert!(TelegramNotifier::from_config(Client::new(), &config).is_none());

        config.bot_token = Some("TOKEN".to_string());
        assert!(TelegramNotifier::from_config(Client::new(), &config).is_some());
    }
}
