//! Shopfront: a server-rendered shop front with a hardened request pipeline.
//!
//! This crate provides the server as a library so the pipeline and
//! lifecycle can be driven from integration tests.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod keys;
pub mod lifecycle;
pub mod logging;
pub mod middleware;
pub mod pipeline;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use error::{AppError, Result};
pub use keys::SigningKey;
pub use lifecycle::{Lifecycle, Phase, ShutdownOutcome, StartupError};
pub use pipeline::{Pipeline, PipelineBuilder, Stage, build_app};
pub use state::AppState;
