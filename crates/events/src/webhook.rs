//! Webhook delivery with a fixed retry schedule.
//!
//! [`WebhookNotifier`] POSTs a JSON-encoded [`JobEvent`] to an external URL.
//! Delivery is at-least-once with a hard cap: three attempts, five seconds
//! apart, then the failure is logged and dropped. Delivery outcome never
//! feeds back into job state.

use std::time::Duration;

use crate::bus::JobEvent;

/// Delivery attempts per event, including the first.
const MAX_ATTEMPTS: u32 = 3;

/// Fixed delay between delivery attempts.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// HTTP request timeout for a single delivery attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for webhook delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),
}

// ---------------------------------------------------------------------------
// WebhookNotifier
// ---------------------------------------------------------------------------

/// Delivers job events to an external webhook endpoint.
pub struct WebhookNotifier {
    client: reqwest::Client,
}

impl WebhookNotifier {
    /// Create a new notifier with a pre-configured HTTP client.
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to build reqwest HTTP client");
        Self { client }
    }

    /// Deliver an event to a webhook URL with retry.
    ///
    /// Returns `Ok(())` on the first successful attempt. After the last
    /// failed attempt the error is returned; the caller logs and moves on.
    pub async fn deliver(&self, url: &str, event: &JobEvent) -> Result<(), WebhookError> {
        let payload = serde_json::json!({
            "jobId": event.job_id,
            "status": event.status,
            "stage": event.stage,
            "timestamp": event.timestamp,
            "errorSummary": event.error_summary,
        });

        let mut attempt = 1;
        loop {
            match self.try_send(url, &payload).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < MAX_ATTEMPTS => {
                    tracing::warn!(
                        attempt,
                        url,
                        job_id = %event.job_id,
                        error = %e,
                        "Webhook delivery attempt failed, retrying"
                    );
                    attempt += 1;
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => {
                    tracing::error!(
                        url,
                        job_id = %event.job_id,
                        error = %e,
                        "Webhook delivery failed after all retries"
                    );
                    return Err(e);
                }
            }
        }
    }

    /// Execute a single POST request and check the response status.
    async fn try_send(&self, url: &str, payload: &serde_json::Value) -> Result<(), WebhookError> {
        let response = self.client.post(url).json(payload).send().await?;
        if !response.status().is_success() {
            return Err(WebhookError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

impl Default for WebhookNotifier {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_does_not_panic() {
        let _notifier = WebhookNotifier::new();
    }

    #[test]
    fn webhook_error_display_http_status() {
        let err = WebhookError::HttpStatus(502);
        assert_eq!(err.to_string(), "Webhook returned HTTP 502");
    }

    #[test]
    fn webhook_error_display_request() {
        let req_err = reqwest::Client::new().get("://bad").build().unwrap_err();
        let err = WebhookError::Request(req_err);
        assert!(err.to_string().contains("HTTP request failed"));
    }

    #[test]
    fn terminal_payload_shape() {
        let event = crate::bus::JobEvent::terminal(
            uuid::Uuid::new_v4(),
            parallax_core::job::JobStatus::Completed,
        );
        let payload = serde_json::json!({
            "jobId": event.job_id,
            "status": event.status,
            "stage": event.stage,
            "timestamp": event.timestamp,
            "errorSummary": event.error_summary,
        });
        assert_eq!(payload["status"], "completed");
        assert!(payload["stage"].is_null());
        assert!(payload["errorSummary"].is_null());
    }
}
