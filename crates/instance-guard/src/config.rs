//! Centralized configuration for the instance guard.
//!
//! Compile-time defaults live as associated constants. The few values that
//! tests and embedders need to tune at runtime are collected in
//! [`ListenerSettings`].

use std::time::Duration;

/// Naming and identity configuration.
pub struct InstanceConfig;

impl InstanceConfig {
    /// Identity used when the executable name cannot be determined.
    pub const FALLBACK_APP_NAME: &'static str = "UnknownApp";
    /// Longest identity used verbatim as a channel key.
    pub const MAX_VERBATIM_KEY_LEN: usize = 48;
    /// Length of the sanitized prefix kept when a key must be hashed.
    pub const HASHED_KEY_PREFIX_LEN: usize = 24;
    /// Hex digits of the blake3 digest appended to hashed keys.
    pub const KEY_DIGEST_HEX_LEN: usize = 16;
    pub const LOCK_FILE_EXTENSION: &'static str = "lock";
    pub const SOCKET_FILE_EXTENSION: &'static str = "sock";
    pub const PIPE_PREFIX: &'static str = r"\\.\pipe\";
}

/// Activation channel and listener configuration.
pub struct ChannelConfig;

impl ChannelConfig {
    /// Follower connect-and-send budget.
    pub const NOTIFY_TIMEOUT: Duration = Duration::from_secs(1);
    /// Longest accepted command line, excluding the newline.
    pub const MAX_COMMAND_LEN: usize = 256;
    /// How long the listener waits for a connected client to send its line.
    pub const READ_TIMEOUT: Duration = Duration::from_secs(2);
    pub const BIND_RETRY_INITIAL: Duration = Duration::from_millis(100);
    pub const BIND_RETRY_MAX: Duration = Duration::from_secs(30);
    /// Buffered diagnostic events per subscriber.
    pub const EVENT_CAPACITY: usize = 64;
    /// Delay between attempts while a named pipe reports busy.
    pub const PIPE_BUSY_RETRY: Duration = Duration::from_millis(20);
}

/// Runtime-tunable listener settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerSettings {
    pub read_timeout: Duration,
    pub bind_retry_initial: Duration,
    pub bind_retry_max: Duration,
    pub max_command_len: usize,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            read_timeout: ChannelConfig::READ_TIMEOUT,
            bind_retry_initial: ChannelConfig::BIND_RETRY_INITIAL,
            bind_retry_max: ChannelConfig::BIND_RETRY_MAX,
            max_command_len: ChannelConfig::MAX_COMMAND_LEN,
        }
    }
}

impl ListenerSettings {
    /// Next bind retry delay after `current`, doubling up to the maximum.
    pub fn next_retry_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.bind_retry_max)
    }
}
