//! Follower-side notifier.
//!
//! Connects to the leader's activation channel, sends one command and closes.
//! The whole exchange is bounded by a timeout so a follower can never hang on
//! a leader that is wedged or already gone.

use super::channel::{self, ChannelEndpoint};
use super::protocol::{write_command, ActivationCommand};
use crate::error::{InstanceError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Send `command` to the leader, failing if it cannot be delivered in time.
///
/// "Delivered" means written and flushed to the channel; there is no
/// acknowledgement in the protocol.
pub async fn try_notify_leader(
    endpoint: &ChannelEndpoint,
    command: ActivationCommand,
    timeout: Duration,
) -> Result<()> {
    let exchange = async {
        let mut stream =
            channel::connect(endpoint)
                .await
                .map_err(|e| InstanceError::LeaderUnreachable {
                    endpoint: endpoint.to_string(),
                    message: e.to_string(),
                })?;
        write_command(&mut stream, command).await
    };

    within(timeout, exchange).await
}

/// Run `exchange`, giving up with `Timeout` once `timeout` has elapsed.
async fn within<T>(timeout: Duration, exchange: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| InstanceError::Timeout(timeout))?
}

/// Best-effort notification of the leader.
///
/// Never fails: an unreachable leader is indistinguishable from no leader at
/// all, and either way the follower just exits. Returns whether the command
/// was delivered, for logging by the caller.
pub async fn notify_leader(
    endpoint: &ChannelEndpoint,
    command: ActivationCommand,
    timeout: Duration,
) -> bool {
    match try_notify_leader(endpoint, command, timeout).await {
        Ok(()) => {
            debug!("Sent '{}' to leader at {}", command, endpoint);
            true
        }
        Err(e) => {
            debug!("Leader at {} not notified: {}", endpoint, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::LockScope;
    use crate::ipc::server::{ActivationCallback, ActivationListener, ListenerEvent};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;
    use tempfile::TempDir;

    fn test_endpoint(dir: &TempDir) -> ChannelEndpoint {
        let key = format!("notify-{}", uuid::Uuid::new_v4().simple());
        ChannelEndpoint::new(
            crate::platform::channel_address(dir.path(), &key, LockScope::Session),
            LockScope::Session,
        )
    }

    #[tokio::test]
    async fn test_notify_reaches_listener() {
        let temp_dir = TempDir::new().unwrap();
        let endpoint = test_endpoint(&temp_dir);
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let callback: ActivationCallback = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let handle = ActivationListener::new(endpoint.clone(), callback).start();
        let mut rx = handle.subscribe();

        let delivered =
            notify_leader(&endpoint, ActivationCommand::Activate, Duration::from_secs(1)).await;
        assert!(delivered);

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, ListenerEvent::ActivationReceived);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_try_notify_without_leader_is_unreachable() {
        let temp_dir = TempDir::new().unwrap();
        let endpoint = test_endpoint(&temp_dir);

        let result =
            try_notify_leader(&endpoint, ActivationCommand::Activate, Duration::from_secs(1)).await;

        match result {
            Err(InstanceError::LeaderUnreachable { endpoint: e, .. }) => {
                assert_eq!(e, endpoint.to_string());
            }
            other => panic!("Expected LeaderUnreachable, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_notify_without_leader_returns_within_timeout() {
        let temp_dir = TempDir::new().unwrap();
        let endpoint = test_endpoint(&temp_dir);
        let timeout = Duration::from_millis(500);

        let started = Instant::now();
        let delivered = notify_leader(&endpoint, ActivationCommand::Activate, timeout).await;

        assert!(!delivered);
        assert!(started.elapsed() < timeout + Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_stalled_exchange_times_out() {
        let timeout = Duration::from_millis(200);

        let started = Instant::now();
        let result = within(timeout, std::future::pending::<Result<()>>()).await;

        match result {
            Err(InstanceError::Timeout(elapsed)) => assert_eq!(elapsed, timeout),
            other => panic!("Expected Timeout, got: {:?}", other),
        }
        assert!(started.elapsed() >= timeout);
        assert!(started.elapsed() < timeout + Duration::from_millis(500));
    }
}
