//! Poll a published site until it serves content.

use std::time::Duration;
use tokio::time::Instant;

pub struct ReadinessPoller {
    client: reqwest::Client,
    interval: Duration,
}

impl ReadinessPoller {
    pub fn new(interval: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(interval.max(Duration::from_secs(1)))
            .user_agent("pagesmith")
            .build()
            .unwrap_or_default();
        Self { client, interval }
    }

    /// GET `url` at a fixed interval until it answers 200 or `timeout`
    /// elapses. Request errors count as "not ready yet".
    pub async fn wait_until_ready(&self, url: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut probes = 0u32;

        loop {
            probes += 1;
            match self.client.get(url).send().await {
                Ok(response) if response.status() == reqwest::StatusCode::OK => {
                    tracing::info!(url, probes, "site is serving");
                    return true;
                }
                Ok(response) => {
                    tracing::debug!(url, status = %response.status(), "site not ready yet");
                }
                Err(e) => {
                    tracing::debug!(url, error = %e, "readiness probe failed");
                }
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(url, probes, "site did not become ready before the timeout");
                return false;
            }
            tokio::time::sleep(self.interval.min(deadline - now)).await;
        }
    }
}
