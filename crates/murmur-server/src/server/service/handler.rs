//! HTTP/WebSocket service for session admission and streaming generation.
//!
//! This module defines [`SessionService`], the shared state behind every
//! route. It owns the session registry, the model, the precomputed stop
//! sequence and the shutdown machinery.
//!
//! ## Responsibilities
//!
//! - Route `/register`, `/predict/{token}` and `/health`.
//! - Track in-flight prediction streams.
//! - Refuse new work and drain existing streams on shutdown.

use crate::server::{
    config::ServerConfig,
    service::{predict::predict, register::register},
    streaming::{pacing::Pacing, session::SessionContext},
    telemetry::{decrement_streams_inflight, increment_streams_inflight},
};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use core::time::Duration;
use murmur::{LanguageModel, SessionRegistry, StopSequence};
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use serde_json::json;
use std::sync::Arc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

/// How long to wait for cancelled streams to unwind after the drain budget.
const UNWIND_TIMEOUT: Duration = Duration::from_secs(1);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Default)]
struct Lifecycle {
    shutting_down: AtomicBool,
    streams_inflight: AtomicUsize,
}

/// Shared state of the streaming text-generation service.
///
/// Cheap to clone: every field is reference counted, so each connection task
/// gets its own handle.
#[derive(Clone)]
pub struct SessionService {
    pub(super) config: Arc<ServerConfig>,
    pub(super) registry: Arc<SessionRegistry>,
    pub(super) ctx: SessionContext,
    lifecycle: Arc<Lifecycle>,
}

impl SessionService {
    /// Creates the service, encoding the configured stop marker with the
    /// model's tokenizer.
    ///
    /// # Errors
    ///
    /// Fails if the marker does not encode to at least one token.
    pub fn new(config: ServerConfig, model: Arc<dyn LanguageModel>) -> murmur::Result<Self> {
        let stop = StopSequence::encode(&config.final_string, model.tokenizer())?;
        let ctx = SessionContext {
            model,
            stop,
            pacing: Pacing::new(config.pace_per_token),
            stream_buffer_size: config.stream_buffer_size,
            shutdown: CancellationToken::new(),
        };

        Ok(Self {
            registry: Arc::new(SessionRegistry::new(config.max_conns)),
            config: Arc::new(config),
            ctx,
            lifecycle: Arc::default(),
        })
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/register", get(register))
            .route("/predict/{token}", get(predict))
            .route("/health", get(health))
            .layer(
                ServiceBuilder::new().layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
            )
            .with_state(self)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lifecycle.shutting_down.load(Ordering::Acquire)
    }

    pub fn streams_inflight(&self) -> usize {
        self.lifecycle.streams_inflight.load(Ordering::Acquire)
    }

    /// Counts a prediction stream as in flight until the guard drops.
    pub(super) fn track_stream(&self) -> StreamGuard {
        self.lifecycle
            .streams_inflight
            .fetch_add(1, Ordering::AcqRel);
        increment_streams_inflight();
        StreamGuard(Arc::clone(&self.lifecycle))
    }

    /// Gracefully shuts the service down.
    ///
    /// - Refuses new registrations and predictions.
    /// - Waits up to the configured timeout for in-flight streams to finish.
    /// - Cancels everything still running, which closes every remaining
    ///   connection with "going away" and releases its session.
    pub async fn shutdown(&self) {
        // === Phase 0: Stop accepting new sessions ===
        tracing::info!("Refusing new sessions");
        self.lifecycle.shutting_down.store(true, Ordering::Release);

        // === Phase 1: Wait for in-flight streams to drain ===
        tracing::info!(
            "Draining in-flight streams ({} active)",
            self.streams_inflight()
        );
        match timeout(self.config.shutdown_timeout, self.wait_for_streams()).await {
            Ok(()) => tracing::debug!("All in-flight streams drained successfully"),
            Err(_) => tracing::warn!(
                "Graceful drain timed out ({} streams still active)",
                self.streams_inflight()
            ),
        }

        // === Phase 2: Cancel any remaining work ===
        tracing::debug!("Cancelling remaining sessions via shutdown token");
        self.ctx.shutdown.cancel();

        // === Phase 3: Give cancelled streams a moment to close ===
        if timeout(UNWIND_TIMEOUT, self.wait_for_streams())
            .await
            .is_err()
        {
            tracing::warn!(
                "{} streams did not unwind after cancellation",
                self.streams_inflight()
            );
        }

        tracing::info!("Session service shutdown complete");
    }

    async fn wait_for_streams(&self) {
        while self.streams_inflight() > 0 {
            sleep(DRAIN_POLL_INTERVAL).await;
        }
    }
}

pub(super) struct StreamGuard(Arc<Lifecycle>);

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.0.streams_inflight.fetch_sub(1, Ordering::AcqRel);
        decrement_streams_inflight();
    }
}

/// Reports `SERVING` until shutdown begins, then `NOT_SERVING` with 503.
pub async fn health(State(service): State<SessionService>) -> Response {
    if service.is_shutting_down() {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "NOT_SERVING" })),
        )
            .into_response()
    } else {
        (StatusCode::OK, Json(json!({ "status": "SERVING" }))).into_response()
    }
}
