//! One prediction exchange on an already authorized channel.
//!
//! ```text
//! AwaitingCommand --"predict"--> (request) --> Generating --> Draining --> Closed
//!        |                           |             |
//!        `-- other command           `-- invalid   `-- client gone / shutdown
//! ```
//!
//! Every state can fall straight through to `Closed` when the client goes
//! away.

use crate::server::{
    streaming::{
        channel::{ChannelError, ChannelReceiver, ChannelSender},
        close::{Close, POLICY_VIOLATION, UNSUPPORTED_DATA},
        pacing::Pacing,
        worker::generate_fragments,
    },
    telemetry::increment_fragments_sent,
};
use murmur::{CompletionRequest, Error, Fragment, LanguageModel, Result, StopSequence};
use std::sync::Arc;
use tokio::{sync::mpsc, time::sleep};
use tokio_util::sync::CancellationToken;

/// The only command a prediction channel accepts.
pub const PREDICT_COMMAND: &str = "predict";

/// Everything a session needs besides its channel.
#[derive(Clone)]
pub struct SessionContext {
    pub model: Arc<dyn LanguageModel>,
    pub stop: StopSequence,
    pub pacing: Pacing,
    pub stream_buffer_size: usize,
    /// Process-wide shutdown token; each session works on a child of it.
    pub shutdown: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingCommand,
    Generating,
    Draining,
    Closed,
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The source was exhausted or the stop marker was reached.
    Completed { fragments: usize },
    /// The request carried an empty prompt; nothing was generated.
    NoOp,
    /// The client sent something other than [`PREDICT_COMMAND`].
    InvalidCommand(String),
    /// The request payload failed validation or was not text.
    Rejected(String),
    /// The client went away; nothing further was sent.
    Disconnected { fragments: usize },
    /// The service shut down mid-session.
    Shutdown { fragments: usize },
    /// The model or tokenizer failed.
    Failed(Error),
}

impl Outcome {
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Rejected(_) | Self::Failed(_))
    }
}

pub struct GenerationSession<S, R> {
    sender: S,
    receiver: Option<R>,
    ctx: SessionContext,
    state: SessionState,
}

enum Step {
    Next(Option<Result<Fragment>>),
    Cancelled,
}

impl<S, R> GenerationSession<S, R>
where
    S: ChannelSender,
    R: ChannelReceiver,
{
    pub fn new(sender: S, receiver: R, ctx: SessionContext) -> Self {
        Self {
            sender,
            receiver: Some(receiver),
            ctx,
            state: SessionState::AwaitingCommand,
        }
    }

    /// Drives the session until it is closed.
    pub async fn run(mut self) -> Outcome {
        let outcome = match self.receiver.take() {
            Some(receiver) => self.drive(receiver).await,
            None => Outcome::Disconnected { fragments: 0 },
        };
        tracing::debug!(?outcome, last_state = ?self.state, "Prediction session closed");
        self.state = SessionState::Closed;
        outcome
    }

    async fn drive(&mut self, mut receiver: R) -> Outcome {
        let request = match self.await_request(&mut receiver).await {
            Ok(request) => request,
            Err(outcome) => return outcome,
        };

        if request.is_noop() {
            self.sender.close(Close::normal()).await;
            return Outcome::NoOp;
        }

        self.state = SessionState::Generating;
        self.generate(request, receiver).await
    }

    /// Reads the command and the JSON request that follows it.
    async fn await_request(
        &mut self,
        receiver: &mut R,
    ) -> core::result::Result<CompletionRequest, Outcome> {
        let shutdown = self.ctx.shutdown.clone();

        let command = tokio::select! {
            () = shutdown.cancelled() => Err(None),
            command = receiver.recv_text() => command.map_err(Some),
        };
        let command = match command {
            Ok(command) => command,
            Err(e) => return Err(self.receive_failed(e).await),
        };

        if command != PREDICT_COMMAND {
            tracing::debug!(%command, "Invalid command");
            if self
                .sender
                .send_text(format!("Invalid command: {command}"))
                .await
                .is_ok()
            {
                self.sender.close(Close::normal()).await;
            }
            return Err(Outcome::InvalidCommand(command));
        }

        let request = tokio::select! {
            () = shutdown.cancelled() => Err(None),
            request = receiver.recv_json::<CompletionRequest>() => request.map_err(Some),
        };
        match request {
            Ok(request) => Ok(request),
            Err(e) => Err(self.receive_failed(e).await),
        }
    }

    /// Closes the channel as appropriate for a failed receive. `None` means
    /// the service is shutting down.
    async fn receive_failed(&mut self, err: Option<ChannelError>) -> Outcome {
        match err {
            None => {
                self.sender.close(Close::going_away()).await;
                Outcome::Shutdown { fragments: 0 }
            }
            Some(ChannelError::Disconnected) => Outcome::Disconnected { fragments: 0 },
            Some(ChannelError::UnexpectedMessage) => {
                let reason = "expected a text message";
                self.sender.close(Close::new(UNSUPPORTED_DATA, reason)).await;
                Outcome::Rejected(reason.to_string())
            }
            Some(ChannelError::Malformed(reason)) => {
                tracing::debug!(%reason, "Invalid request");
                self.sender
                    .close(Close::new(POLICY_VIOLATION, reason.clone()))
                    .await;
                Outcome::Rejected(reason)
            }
        }
    }

    /// Streams fragments from a blocking worker until the source is done, the
    /// client disconnects or the service shuts down.
    async fn generate(&mut self, request: CompletionRequest, receiver: R) -> Outcome {
        let cancel = self.ctx.shutdown.child_token();
        // Stops the worker and the watcher however this function returns.
        let _cancel_on_exit = cancel.clone().drop_guard();

        tokio::spawn(watch_disconnect(receiver, cancel.clone()));

        let delay = self.ctx.pacing.delay_for(request.chunks());
        let (fragment_tx, mut fragment_rx) = mpsc::channel(self.ctx.stream_buffer_size);
        let worker = tokio::task::spawn_blocking({
            let model = Arc::clone(&self.ctx.model);
            let stop = self.ctx.stop.clone();
            let cancel = cancel.clone();
            move || generate_fragments(model, stop, request, fragment_tx, cancel)
        });

        let mut fragments = 0;
        loop {
            let step = tokio::select! {
                biased;
                () = cancel.cancelled() => Step::Cancelled,
                next = fragment_rx.recv() => Step::Next(next),
            };

            let fragment = match step {
                Step::Cancelled => return self.cancelled(fragments).await,
                Step::Next(None) => match worker.await {
                    Ok(()) => break,
                    Err(e) => {
                        tracing::error!("Generation worker died: {e}");
                        let e = Error::Model {
                            context: e.to_string(),
                        };
                        self.sender.close(Close::from(&e)).await;
                        return Outcome::Failed(e);
                    }
                },
                Step::Next(Some(Err(e))) => {
                    tracing::error!("Generation failed: {e}");
                    self.sender.close(Close::from(&e)).await;
                    return Outcome::Failed(e);
                }
                Step::Next(Some(Ok(fragment))) => fragment,
            };

            if !fragment.text.is_empty() {
                let sent = tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    sent = self.sender.send_text(fragment.text) => Some(sent),
                };
                match sent {
                    None => return self.cancelled(fragments).await,
                    Some(Err(_)) => return Outcome::Disconnected { fragments },
                    Some(Ok(())) => {
                        fragments += 1;
                        increment_fragments_sent();
                    }
                }

                if !fragment.stopped && !delay.is_zero() {
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return self.cancelled(fragments).await,
                        () = sleep(delay) => {}
                    }
                }
            }

            if fragment.stopped {
                break;
            }
        }

        self.state = SessionState::Draining;
        self.sender.close(Close::normal()).await;
        Outcome::Completed { fragments }
    }

    async fn cancelled(&mut self, fragments: usize) -> Outcome {
        if self.ctx.shutdown.is_cancelled() {
            self.sender.close(Close::going_away()).await;
            Outcome::Shutdown { fragments }
        } else {
            tracing::debug!(fragments, "Client disconnected mid-stream");
            Outcome::Disconnected { fragments }
        }
    }
}

/// Fires `cancel` once the client goes away. Exits quietly if the session is
/// cancelled first.
async fn watch_disconnect<R: ChannelReceiver>(receiver: R, cancel: CancellationToken) {
    tokio::select! {
        () = receiver.closed() => cancel.cancel(),
        () = cancel.cancelled() => {}
    }
}
