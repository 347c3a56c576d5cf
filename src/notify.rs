//! Evaluator callback with exponential backoff.

use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::errors::NotifyError;
use crate::models::NotificationPayload;

pub struct EvaluatorNotifier {
    client: reqwest::Client,
    policy: BackoffPolicy,
}

impl EvaluatorNotifier {
    pub fn new(policy: BackoffPolicy, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent("pagesmith")
            .build()
            .unwrap_or_default();
        Self { client, policy }
    }

    /// POST `payload` to `url` until it answers 200.
    ///
    /// Returns the number of attempts used. Any other status, a timeout, or
    /// a connection error counts as a failed attempt.
    pub async fn notify(&self, payload: &NotificationPayload, url: &str) -> Result<u32, NotifyError> {
        let client = &self.client;
        let result = self
            .policy
            .retry(move |attempt| async move {
                let response = match client.post(url).json(payload).send().await {
                    Ok(response) => response,
                    Err(e) => return Err(format!("request error: {}", e)),
                };
                let status = response.status();
                if status == reqwest::StatusCode::OK {
                    tracing::info!(attempt, "evaluator acknowledged notification");
                    Ok(())
                } else {
                    Err(format!("evaluator returned {}", status))
                }
            })
            .await;

        match result {
            Ok(((), attempts)) => Ok(attempts),
            Err(exhausted) => {
                tracing::error!(
                    attempts = exhausted.attempts,
                    error = %exhausted.last_error,
                    "giving up on evaluator notification"
                );
                Err(NotifyError::Exhausted {
                    attempts: exhausted.attempts,
                    last_error: exhausted.last_error,
                })
            }
        }
    }
}
