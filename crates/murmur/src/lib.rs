//! Core building blocks for a streaming text-generation service.
//!
//! - [`SessionRegistry`]: capacity-bounded, per-origin-exclusive admission of
//!   opaque [`SessionToken`]s.
//! - [`TokenChunker`]: groups a generated token stream into flushable runs
//!   without splitting the stop marker or a multi-byte character.
//! - [`CompletionRequest`]: validated client request and the resolved
//!   [`SamplingParams`].
//! - [`LanguageModel`] / [`Tokenizer`]: the seams a real model plugs into,
//!   with [`DummyModel`] for development.

mod chunker;
mod error;
mod model;
mod rand;
mod request;
mod session;

pub use crate::chunker::*;
pub use crate::error::*;
pub use crate::model::*;
pub use crate::rand::*;
pub use crate::request::*;
pub use crate::session::*;
