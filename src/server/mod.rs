//! HTTP front door.
//!
//! `POST /api/build` validates and acknowledges a build request, then hands
//! it to a [`RoundRunner`](crate::pipeline::RoundRunner) on a spawned task.
//! The response never waits for the round; shutdown does.

pub mod api;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;

pub use api::{AppState, RoundTracker, SharedState};

/// Build the full application router.
pub fn build_router(state: SharedState) -> Router {
    api::api_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl-C.
pub async fn start_server(config: &ServerConfig, state: SharedState) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    serve_until(listener, state, shutdown_signal()).await
}

/// Serve on `listener` until `shutdown` resolves, then wait for every
/// accepted round to finish.
pub async fn serve_until<F>(listener: tokio::net::TcpListener, state: SharedState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, "pagesmith listening");

    axum::serve(listener, build_router(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    let pending = state.rounds.in_flight();
    if pending > 0 {
        tracing::info!(pending, "waiting for in-flight rounds");
    }
    state.rounds.drain().await;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

/// Convenience for building state from parts.
pub fn app_state(runner: Arc<dyn crate::pipeline::RoundRunner>, secret: &str) -> SharedState {
    Arc::new(AppState {
        runner,
        secret: secret.to_string(),
        rounds: RoundTracker::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BuildRequest, RoundOutcome, RoundReport};
    use crate::pipeline::RoundRunner;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    struct NoopRunner;

    /// Takes `delay` per round and counts finished rounds.
    struct SlowRunner {
        delay: std::time::Duration,
        finished: Arc<std::sync::atomic::AtomicU32>,
    }

    #[async_trait]
    impl RoundRunner for SlowRunner {
        async fn run_round(&self, request: BuildRequest) -> RoundReport {
            tokio::time::sleep(self.delay).await;
            self.finished.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            NoopRunner.run_round(request).await
        }
    }

    #[async_trait]
    impl RoundRunner for NoopRunner {
        async fn run_round(&self, request: BuildRequest) -> RoundReport {
            RoundReport {
                task: request.task,
                round: request.round,
                stages: vec![],
                outcome: RoundOutcome::Done,
                deployment: None,
                ready: None,
                notify_attempts: None,
                error: None,
            }
        }
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let app = build_router(app_state(Arc::new(NoopRunner), "x"));
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let app = build_router(app_state(Arc::new(NoopRunner), "x"));
        let req = Request::builder().uri("/nope").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_build_requires_post() {
        let app = build_router(app_state(Arc::new(NoopRunner), "x"));
        let req = Request::builder().uri("/api/build").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_start_server_serves_health() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port,
        };
        let handle = tokio::spawn(async move {
            start_server(&config, app_state(Arc::new(NoopRunner), "x")).await
        });

        let url = format!("http://127.0.0.1:{}/health", port);
        let mut body = String::new();
        for _ in 0..50 {
            if let Ok(resp) = reqwest::get(&url).await {
                body = resp.text().await.unwrap();
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(body, "ok");
        handle.abort();
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight_rounds() {
        let finished = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let runner = SlowRunner {
            delay: std::time::Duration::from_millis(300),
            finished: Arc::clone(&finished),
        };
        let state = app_state(Arc::new(runner), "x");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve_until(listener, state, async {
            let _ = stop_rx.await;
        }));

        let body = serde_json::json!({
            "secret": "x",
            "email": "a@example.com",
            "task": "slow",
            "round": 1,
            "nonce": "n",
            "brief": "b",
            "evaluation_url": "http://127.0.0.1:9/notify",
        });
        let resp = reqwest::Client::new()
            .post(format!("http://{}/api/build", addr))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        drop(resp);
        assert_eq!(finished.load(std::sync::atomic::Ordering::SeqCst), 0);

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
        assert_eq!(finished.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
