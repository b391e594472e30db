//! Batch notifications with pluggable sinks.
//!
//! `NotificationSink` is the seam; the webhook sink is used when
//! `notifications.webhook_url` is set, otherwise events only reach the log.

mod log_provider;
mod provider;
mod webhook_provider;

use std::sync::Arc;

pub use log_provider::LogNotifier;
pub use provider::{BatchEvent, NotificationResult, NotificationSink};
pub use webhook_provider::WebhookNotifier;

use crate::config::NotificationsConfig;
use crate::error::AppResult;

/// Pick the sink described by `[notifications]`
pub fn sink_from_config(config: &NotificationsConfig) -> AppResult<Arc<dyn NotificationSink>> {
    match &config.webhook_url {
        Some(url) => Ok(Arc::new(WebhookNotifier::new(
            url,
            config.timeout_seconds,
            config.headers.clone(),
        )?)),
        None => Ok(Arc::new(LogNotifier)),
    }
}
