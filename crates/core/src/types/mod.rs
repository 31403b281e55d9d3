//! Core types for Shopfront.
//!
//! This module provides type-safe wrappers for the security core's data model.

pub mod id;
pub mod network;
pub mod problem;

pub use id::{InvalidProductId, ProductId};
pub use network::{IpNetwork, NetworkParseError, TrustAllowList};
pub use problem::{ErrorCode, ProblemDetail};
