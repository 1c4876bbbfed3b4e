//! Reframer - frame-stepping video player and re-encoder
//!
//! This library crate exposes the render loop, renderers and configuration
//! for the binary and for integration testing. The decode and encode engine
//! lives in `reframer-av`.

pub mod config;
pub mod player;
pub mod render;
