//! Hub-and-spoke signal relay: stream broadcast, control bridge, discovery
//! registry. See `main.rs` for how the pieces are wired into a process.

pub mod bridge;
pub mod config;
pub mod discovery;
pub mod error;
pub mod ring;
pub mod status;
pub mod stream;
