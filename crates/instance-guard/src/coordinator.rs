//! Startup orchestration: become the leader or hand off to it.
//!
//! Call once, at the very start of the process, before any UI or service is
//! created. A follower result means the process must exit without standing
//! up the rest of the application.

use crate::config::{ChannelConfig, ListenerSettings};
use crate::election::{LeaderElection, LockHandle};
use crate::error::Result;
use crate::identity::{AppIdentity, LockScope};
use crate::ipc::{
    notify_leader, ActivationCallback, ActivationCommand, ActivationListener, ChannelEndpoint,
    ListenerEvent, ListenerHandle,
};
use crate::platform;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Role of this process, decided once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceRole {
    /// First instance; runs the full application.
    Leader,
    /// Duplicate launch; should exit immediately.
    Follower,
}

/// Lock file and channel endpoint derived from an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceNames {
    lock_path: PathBuf,
    endpoint: ChannelEndpoint,
}

impl InstanceNames {
    /// Derive both names from the identity.
    ///
    /// `runtime_dir` overrides the platform location for the scope.
    pub fn derive(identity: &AppIdentity, scope: LockScope, runtime_dir: Option<&Path>) -> Self {
        let dir = runtime_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| platform::runtime_dir(scope));
        let key = identity.channel_key();

        Self {
            lock_path: platform::paths::lock_path(&dir, &key),
            endpoint: ChannelEndpoint::new(platform::channel_address(&dir, &key, scope), scope),
        }
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn endpoint(&self) -> &ChannelEndpoint {
        &self.endpoint
    }
}

/// Builder for configuring a [`Coordinator`].
///
/// # Example
///
/// ```rust,ignore
/// use instance_guard::{AppIdentity, Coordinator, LockScope};
///
/// let coordinator = Coordinator::builder(AppIdentity::new("MyApp")?)
///     .scope(LockScope::Global)
///     .start(|| println!("bring window to front"))
///     .await?;
///
/// if !coordinator.is_primary() {
///     std::process::exit(0);
/// }
/// ```
pub struct CoordinatorBuilder {
    identity: AppIdentity,
    scope: LockScope,
    runtime_dir: Option<PathBuf>,
    notify_timeout: Duration,
    listener_settings: ListenerSettings,
}

impl CoordinatorBuilder {
    pub fn new(identity: AppIdentity) -> Self {
        Self {
            identity,
            scope: LockScope::default(),
            runtime_dir: None,
            notify_timeout: ChannelConfig::NOTIFY_TIMEOUT,
            listener_settings: ListenerSettings::default(),
        }
    }

    /// Lock scope.
    ///
    /// Default: `LockScope::Session`
    pub fn scope(mut self, scope: LockScope) -> Self {
        self.scope = scope;
        self
    }

    /// Directory for the lock file (and socket on Unix) instead of the
    /// platform default for the scope.
    pub fn runtime_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.runtime_dir = Some(dir.into());
        self
    }

    /// How long a follower may spend handing off to the leader.
    ///
    /// Default: 1 second
    pub fn notify_timeout(mut self, timeout: Duration) -> Self {
        self.notify_timeout = timeout;
        self
    }

    pub fn listener_settings(mut self, settings: ListenerSettings) -> Self {
        self.listener_settings = settings;
        self
    }

    /// Run the election and act on the outcome.
    ///
    /// On the leader, `on_activation` is wired to the activation listener and
    /// may be called from a background thread. On a follower it is dropped
    /// unused after the leader has been notified (or found unreachable).
    ///
    /// Errors only when the lock cannot be created or queried at all.
    pub async fn start<F>(self, on_activation: F) -> Result<Coordinator>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let names = InstanceNames::derive(&self.identity, self.scope, self.runtime_dir.as_deref());
        let election =
            LeaderElection::new(names.lock_path()).shared(self.scope == LockScope::Global);

        match election.try_acquire()? {
            Some(lock) => {
                info!(
                    "{} is the primary instance (lock {})",
                    self.identity,
                    names.lock_path().display()
                );
                let callback: ActivationCallback = Arc::new(on_activation);
                let listener = ActivationListener::new(names.endpoint().clone(), callback)
                    .with_settings(self.listener_settings)
                    .start();

                Ok(Coordinator {
                    identity: self.identity,
                    names,
                    role: InstanceRole::Leader,
                    listener: Some(listener),
                    lock: Some(lock),
                })
            }
            None => {
                let holder_pid = election.read_holder_pid();
                match holder_pid {
                    Some(pid) => info!("{} is already running (PID {})", self.identity, pid),
                    None => info!("{} is already running", self.identity),
                }
                let endpoint = leader_endpoint(names.endpoint(), holder_pid);
                let delivered =
                    notify_leader(&endpoint, ActivationCommand::Activate, self.notify_timeout)
                        .await;
                debug!("Activation hand-off delivered: {}", delivered);

                Ok(Coordinator {
                    identity: self.identity,
                    names,
                    role: InstanceRole::Follower,
                    listener: None,
                    lock: None,
                })
            }
        }
    }
}

/// Endpoint the current leader listens on: its leader-specific fallback if
/// it had to bind one, otherwise the shared endpoint.
fn leader_endpoint(endpoint: &ChannelEndpoint, holder_pid: Option<u32>) -> ChannelEndpoint {
    holder_pid
        .map(|pid| endpoint.leader_specific(pid))
        .filter(|fallback| fallback.address().exists())
        .unwrap_or_else(|| endpoint.clone())
}

/// Owner of this process's single-instance state.
///
/// Hold it for the lifetime of the application. On a leader, dropping it
/// stops the activation listener and releases the election lock.
pub struct Coordinator {
    identity: AppIdentity,
    names: InstanceNames,
    role: InstanceRole,
    // Field order matters: the listener is told to stop before the lock is released.
    listener: Option<ListenerHandle>,
    lock: Option<LockHandle>,
}

impl Coordinator {
    pub fn builder(identity: AppIdentity) -> CoordinatorBuilder {
        CoordinatorBuilder::new(identity)
    }

    /// Become the leader or notify the existing one, with default settings.
    ///
    /// Check [`Coordinator::is_primary`] on the result: `false` means exit now.
    pub async fn ensure_single_instance<F>(identity: AppIdentity, on_activation: F) -> Result<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::builder(identity).start(on_activation).await
    }

    pub fn identity(&self) -> &AppIdentity {
        &self.identity
    }

    pub fn names(&self) -> &InstanceNames {
        &self.names
    }

    pub fn role(&self) -> InstanceRole {
        self.role
    }

    /// Returns true if this process is the leader and should keep running.
    pub fn is_primary(&self) -> bool {
        self.role == InstanceRole::Leader
    }

    /// Path of the held lock file, on the leader.
    pub fn lock_path(&self) -> Option<&Path> {
        self.lock.as_ref().map(LockHandle::path)
    }

    /// Subscribe to listener diagnostics. `None` on followers.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<ListenerEvent>> {
        self.listener.as_ref().map(ListenerHandle::subscribe)
    }

    /// Stop the listener, wait for it to unbind, then release the lock.
    pub async fn shutdown(mut self) {
        if let Some(listener) = self.listener.take() {
            listener.shutdown().await;
        }
        if let Some(lock) = self.lock.take() {
            debug!("Releasing election lock {}", lock.path().display());
        }
    }
}
