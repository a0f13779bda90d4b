//! Client-facing routes and the state they share.
//!
//! ## Structure
//!
//! - [`handler`] - [`handler::SessionService`], router, health and shutdown.
//! - [`register`] - `/register`: admission and heartbeats.
//! - [`predict`] - `/predict/{token}`: authorization and generation.

pub mod handler;
pub mod predict;
pub mod register;
