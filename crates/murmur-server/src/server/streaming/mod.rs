//! Streaming side of a prediction: the transport, the per-connection
//! session state machine, and the blocking generation worker feeding it.
//!
//! ## Structure
//!
//! - [`channel`] - split text transport over an axum `WebSocket`.
//! - [`close`] - close codes and error mapping.
//! - [`session`] - [`session::GenerationSession`], one prediction exchange.
//! - [`worker`] - token pulling, chunking and decoding on a blocking thread.
//! - [`pacing`] - delay between fragments.

pub mod channel;
pub mod close;
#[cfg(test)]
pub mod mock;
pub mod pacing;
pub mod session;
pub mod worker;
