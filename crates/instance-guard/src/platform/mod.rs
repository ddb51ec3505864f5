//! Platform abstraction layer for cross-platform compatibility.
//!
//! All `#[cfg]` decisions about where locks and channels live are kept here
//! rather than scattered through the election and IPC modules.
//!
//! # Supported Platforms
//!
//! - **Linux**: Unix domain sockets under `$XDG_RUNTIME_DIR`
//! - **macOS**: Unix domain sockets under the per-user cache directory
//! - **Windows**: Named pipes

pub mod paths;

pub use paths::{channel_address, runtime_dir};
