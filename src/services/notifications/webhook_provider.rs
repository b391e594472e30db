//! Webhook sink: posts each batch event as JSON.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Url;

use super::provider::{BatchEvent, NotificationResult, NotificationSink};
use crate::error::{AppError, AppResult};
use crate::external::HTTP_CLIENT;

/// Posts batch events to a webhook URL through the shared `HTTP_CLIENT`
pub struct WebhookNotifier {
    url: Url,
    timeout: Duration,
    headers: HashMap<String, String>,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout_seconds: u64, headers: HashMap<String, String>) -> AppResult<Self> {
        let url = Url::parse(url).map_err(|_| AppError::Validation {
            field: "notifications.webhook_url".to_string(),
            reason: "Invalid URL format".to_string(),
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::Validation {
                field: "notifications.webhook_url".to_string(),
                reason: "Only HTTP(S) URLs are allowed".to_string(),
            });
        }

        Ok(Self {
            url,
            timeout: Duration::from_secs(timeout_seconds),
            headers,
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    /// Delivers the event; transport failures come back as an unsuccessful
    /// result rather than an error so the caller only has to log them.
    async fn notify(&self, event: &BatchEvent) -> AppResult<NotificationResult> {
        let start = Instant::now();

        let mut request = HTTP_CLIENT
            .post(self.url.clone())
            .timeout(self.timeout)
            .json(event);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request.send().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match response {
            Ok(resp) => {
                let status_code = resp.status().as_u16();
                let success = resp.status().is_success();
                let response_text = resp.text().await.ok();

                Ok(NotificationResult {
                    success,
                    status_code: Some(status_code),
                    response: response_text,
                    duration_ms,
                })
            }
            Err(e) => Ok(NotificationResult {
                success: false,
                status_code: None,
                response: Some(e.to_string()),
                duration_ms,
            }),
        }
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_urls() {
        assert!(WebhookNotifier::new("not a url", 5, HashMap::new()).is_err());
        assert!(WebhookNotifier::new("ftp://hooks.local/x", 5, HashMap::new()).is_err());
        assert!(WebhookNotifier::new("https://hooks.local/x", 5, HashMap::new()).is_ok());
    }
}
