use crate::server::{
    service::handler::SessionService,
    streaming::{
        channel::{self, ChannelError, ChannelReceiver, ChannelSender},
        close::Close,
    },
    telemetry::{increment_admission_rejections, increment_registrations},
};
use axum::{
    extract::{ConnectInfo, State, WebSocketUpgrade},
    http::HeaderMap,
    response::Response,
};
use murmur::Error;
use std::net::SocketAddr;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

/// Keep-alive message sent on an idle registration channel.
pub const HEARTBEAT: &str = ".";

/// Identifies the connecting client.
///
/// The peer IP, or the first `X-Forwarded-For` entry when the deployment
/// trusts its proxy. Ports are ignored so reconnecting from a new ephemeral
/// port is still the same origin.
pub fn origin_of(peer: SocketAddr, headers: &HeaderMap, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(origin) = forwarded {
            return origin.to_string();
        }
    }
    peer.ip().to_string()
}

/// `GET /register`: admits a session and keeps it alive for as long as the
/// WebSocket stays open.
#[tracing::instrument(skip_all, fields(%peer))]
pub async fn register(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(service): State<SessionService>,
) -> Response {
    let origin = origin_of(peer, &headers, service.config.trust_forwarded_for);
    ws.on_upgrade(move |socket| async move {
        let (sender, receiver) = channel::split(socket);
        service.serve_registration(sender, receiver, origin).await;
    })
}

impl SessionService {
    /// Runs one registration channel to completion.
    ///
    /// Sends the session token as the first message, then a heartbeat every
    /// interval. The token is released when this returns, whichever side
    /// ended the connection.
    pub async fn serve_registration<S, R>(&self, mut sender: S, mut receiver: R, origin: String)
    where
        S: ChannelSender,
        R: ChannelReceiver,
    {
        if self.is_shutting_down() {
            sender.close(Close::from(Error::ServiceShutdown)).await;
            return;
        }

        let guard = match self.registry.register_guarded(&origin) {
            Ok(guard) => guard,
            Err(e) => {
                let label = if matches!(e, Error::Full) { "full" } else { "duplicate" };
                increment_admission_rejections(label);
                tracing::info!(%origin, "Registration refused: {e}");
                sender.close(Close::from(&e)).await;
                return;
            }
        };
        let token = guard.token();
        increment_registrations();
        tracing::info!(?token, %origin, "Session registered");

        if sender.send_text(token.to_string()).await.is_err() {
            tracing::info!(?token, "Client left before receiving its token");
            return;
        }

        let period = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let shutdown = self.ctx.shutdown.clone();

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    sender.close(Close::going_away()).await;
                    break;
                }
                _ = heartbeat.tick() => {
                    if sender.send_text(HEARTBEAT.to_string()).await.is_err() {
                        break;
                    }
                }
                received = receiver.recv_text() => {
                    // The channel carries nothing inbound; only closure matters.
                    if let Err(ChannelError::Disconnected) = received {
                        break;
                    }
                }
            }
        }

        drop(guard);
        tracing::info!(?token, %origin, "Session released");
    }
}
