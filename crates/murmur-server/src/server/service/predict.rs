use crate::server::{
    service::handler::SessionService,
    streaming::{
        channel::{self, ChannelReceiver, ChannelSender},
        close::Close,
        session::{GenerationSession, Outcome},
    },
    telemetry::{increment_predictions, increment_stream_errors, record_stream_duration},
};
use axum::{
    extract::{Path, State, WebSocketUpgrade},
    response::Response,
};
use murmur::{Error, SessionToken};
use std::time::Instant;
use tracing::Instrument;

/// `GET /predict/{token}`: runs one prediction exchange for a registered
/// session.
pub async fn predict(
    ws: WebSocketUpgrade,
    Path(token): Path<String>,
    State(service): State<SessionService>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        let (sender, receiver) = channel::split(socket);
        service.serve_prediction(sender, receiver, &token).await;
    })
}

impl SessionService {
    /// Authorizes `raw_token` and, if it is free, runs a
    /// [`GenerationSession`] on the channel.
    ///
    /// Returns `None` when the channel was refused before a session started.
    pub async fn serve_prediction<S, R>(
        &self,
        mut sender: S,
        receiver: R,
        raw_token: &str,
    ) -> Option<Outcome>
    where
        S: ChannelSender,
        R: ChannelReceiver,
    {
        if self.is_shutting_down() {
            sender.close(Close::from(Error::ServiceShutdown)).await;
            return None;
        }

        let lease = match raw_token
            .parse::<SessionToken>()
            .and_then(|token| self.registry.begin_prediction(&token))
        {
            Ok(lease) => lease,
            Err(e) => {
                tracing::debug!("Prediction refused: {e}");
                sender.close(Close::from(&e)).await;
                return None;
            }
        };

        increment_predictions();
        let _inflight = self.track_stream();
        let start = Instant::now();

        let span = tracing::info_span!("prediction", token = ?lease.token());
        let outcome = GenerationSession::new(sender, receiver, self.ctx.clone())
            .run()
            .instrument(span)
            .await;

        if outcome.is_error() {
            increment_stream_errors();
        }
        record_stream_duration(start.elapsed().as_secs_f64() * 1000.0);
        drop(lease);

        Some(outcome)
    }
}
