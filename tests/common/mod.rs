//! Shared fixtures for the root integration tests.
//!
//! Reuses the clip synthesiser from the engine crate's tests.

#![allow(dead_code)]

#[path = "../../crates/reframer-av/tests/common/mod.rs"]
mod media;

pub use media::*;
