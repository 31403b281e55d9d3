//! Shopfront Core - Shared types library.
//!
//! This crate provides types shared by the Shopfront server crates:
//! - `shopfront` - Public shop front server (pipeline, lifecycle, pages)
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access,
//! no HTTP stack. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Wire error format, trusted network allow-lists and catalog ids

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
