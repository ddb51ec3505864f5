//! Local IPC for activation hand-off.
//!
//! A follower process sends one newline-terminated command to the leader over
//! a named local channel, then exits.
//!
//! # Architecture
//!
//! - **Channel**: Platform transport (Unix socket or named pipe)
//! - **Protocol**: The one-line command vocabulary shared by both sides
//! - **Server**: Activation listener owned by the leader
//! - **Client**: Fire-and-forget notifier used by followers

pub mod channel;
pub mod client;
pub mod protocol;
pub mod server;

pub use channel::ChannelEndpoint;
pub use client::{notify_leader, try_notify_leader};
pub use protocol::ActivationCommand;
pub use server::{ActivationCallback, ActivationListener, ListenerEvent, ListenerHandle};
