//! Alert publishers.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::alert::Alert;

/// Boxed future returned by [`Notifier::publish`].
pub type PublishFuture<'a> = Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to publish alert: {0}")]
    Request(#[from] reqwest::Error),
    #[error("alert rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Publish-only sink for alerts.
pub trait Notifier: Send + Sync {
    fn publish<'a>(&'a self, alert: &'a Alert) -> PublishFuture<'a>;
}

/// Writes alerts to the log instead of sending them anywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn publish<'a>(&'a self, alert: &'a Alert) -> PublishFuture<'a> {
        Box::pin(async move {
            info!(
                topic = %alert.topic,
                subject = %alert.subject,
                body = %alert.body,
                "alert (log only)"
            );
            Ok(())
        })
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    topic: &'a str,
    subject: &'a str,
    message: &'a str,
}

/// POSTs alerts as JSON to a fixed URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl Notifier for WebhookNotifier {
    fn publish<'a>(&'a self, alert: &'a Alert) -> PublishFuture<'a> {
        Box::pin(async move {
            let payload = WebhookPayload {
                topic: &alert.topic,
                subject: &alert.subject,
                message: &alert.body,
            };
            let response = self.client.post(&self.url).json(&payload).send().await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(NotifyError::Rejected {
                    status: status.as_u16(),
                    body,
                });
            }

            debug!(url = %self.url, status = %status, "alert delivered");
            Ok(())
        })
    }
}
