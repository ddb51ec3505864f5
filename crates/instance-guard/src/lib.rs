//! Instance Guard - single-instance coordination for desktop and CLI applications.
//!
//! Guarantees that only one copy of an application runs per user session (or
//! per machine), and turns a second launch into an activation request for the
//! copy that is already running.
//!
//! # Overview
//!
//! - **Election**: an exclusive OS file lock; released by the kernel when the
//!   holder exits, even on a crash
//! - **Channel**: a Unix domain socket or Windows named pipe whose name is
//!   derived from the application identity
//! - **Listener**: a background task on the leader that invokes a callback
//!   for every `activate` line it receives
//! - **Notifier**: a bounded, fire-and-forget send from a follower
//!
//! # Example
//!
//! ```rust,ignore
//! use instance_guard::{AppIdentity, Coordinator};
//!
//! #[tokio::main]
//! async fn main() -> instance_guard::Result<()> {
//!     let coordinator = Coordinator::ensure_single_instance(
//!         AppIdentity::from_current_exe(),
//!         || println!("another launch asked us to come to the front"),
//!     )
//!     .await?;
//!
//!     if !coordinator.is_primary() {
//!         return Ok(());
//!     }
//!
//!     // ... run the application, keeping `coordinator` alive ...
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod coordinator;
pub mod election;
pub mod error;
pub mod identity;
pub mod ipc;
pub mod platform;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use config::{ChannelConfig, InstanceConfig, ListenerSettings};
pub use coordinator::{Coordinator, CoordinatorBuilder, InstanceNames, InstanceRole};
pub use election::{LeaderElection, LockHandle};
pub use error::{InstanceError, Result};
pub use identity::{AppIdentity, LockScope};
pub use ipc::{ActivationCallback, ActivationCommand, ChannelEndpoint, ListenerEvent};
