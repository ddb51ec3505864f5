//! Activation listener run by the leader instance.
//!
//! Serves one connection at a time: accept, read a single command line, act
//! on it, drop the connection, go back to listening. Nothing a follower sends
//! can stop the loop; the only ways out are the cancellation token or the end
//! of the process.
//!
//! # States
//!
//! ```text
//! Idle -> Listening -> Serving -> Listening -> ... -> Stopped
//!            ^  |
//!            |  v  (bind/accept failure)
//!           Backoff
//! ```
//!
//! Every swallowed error is logged through `tracing` and published as a
//! [`ListenerEvent`] so the embedding application keeps visibility without
//! the loop ever surfacing an error.

use super::channel::{ChannelEndpoint, ChannelListener, IncomingConnection};
use super::protocol::{read_command, ActivationCommand};
use crate::cancel::CancellationToken;
use crate::config::{ChannelConfig, ListenerSettings};
use crate::error::{InstanceError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Action run by the leader when a follower asks for activation.
///
/// Runs on tokio's blocking thread pool, never on the application's main
/// thread; the callback is responsible for marshaling to wherever its work
/// must run (for example a UI event loop). It may block while doing so, but
/// the listener serves the next connection only after it returns.
pub type ActivationCallback = Arc<dyn Fn() + Send + Sync + 'static>;

/// Diagnostic events published by the listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerEvent {
    /// The channel is bound and accepting connections.
    Listening { endpoint: String },
    /// A valid activation command was received and the callback ran.
    ActivationReceived,
    /// A connection sent something outside the protocol.
    CommandIgnored { reason: String },
    /// A connection failed at the transport level (accept, read, timeout).
    ConnectionFailed { message: String },
    /// The channel could not be bound; another attempt follows after `retry_in`.
    BindFailed { message: String, retry_in: Duration },
    /// The activation callback panicked. The listener keeps running.
    CallbackPanicked,
    /// The loop exited after cancellation.
    Stopped,
}

/// Handle to a running listener. Dropping it stops the listener.
pub struct ListenerHandle {
    endpoint: ChannelEndpoint,
    cancel: CancellationToken,
    events: broadcast::Sender<ListenerEvent>,
    task_handle: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    pub fn endpoint(&self) -> &ChannelEndpoint {
        &self.endpoint
    }

    /// Subscribe to diagnostic events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ListenerEvent> {
        self.events.subscribe()
    }

    /// Returns true while the listener task is alive.
    pub fn is_running(&self) -> bool {
        self.task_handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Stop the listener and wait for its task to finish.
    ///
    /// The channel is unbound by the time this returns.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.task_handle.take() {
            if let Err(e) = handle.await {
                warn!("Activation listener task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Listener configuration, consumed by [`ActivationListener::start`].
pub struct ActivationListener {
    endpoint: ChannelEndpoint,
    callback: ActivationCallback,
    settings: ListenerSettings,
    events: broadcast::Sender<ListenerEvent>,
}

impl ActivationListener {
    pub fn new(endpoint: ChannelEndpoint, callback: ActivationCallback) -> Self {
        let (events, _) = broadcast::channel(ChannelConfig::EVENT_CAPACITY);
        Self {
            endpoint,
            callback,
            settings: ListenerSettings::default(),
            events,
        }
    }

    pub fn with_settings(mut self, settings: ListenerSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Subscribe before starting to also observe the initial bind.
    pub fn subscribe(&self) -> broadcast::Receiver<ListenerEvent> {
        self.events.subscribe()
    }

    /// Start listening on a background tokio task.
    ///
    /// The first bind happens before this returns, so a follower launched
    /// right afterwards finds the channel open. If that bind fails it is
    /// reported like any other bind failure and the task keeps retrying with
    /// backoff instead of giving up.
    pub fn start(self) -> ListenerHandle {
        let cancel = CancellationToken::new();
        let bound = match self.bind_channel() {
            Ok(listener) => Some(listener),
            Err(e) => {
                self.report_bind_failure(&e, self.settings.bind_retry_initial);
                None
            }
        };
        let endpoint = self.endpoint.clone();
        let events = self.events.clone();

        let task_handle = tokio::spawn(self.run(bound, cancel.clone()));

        ListenerHandle {
            endpoint,
            cancel,
            events,
            task_handle: Some(task_handle),
        }
    }

    fn bind_channel(&self) -> Result<ChannelListener> {
        let listener = ChannelListener::bind(&self.endpoint)
            .map_err(|e| InstanceError::channel_bind(e, &self.endpoint))?;
        let address = listener.address().display().to_string();
        info!("Activation listener bound to {}", address);
        self.emit(ListenerEvent::Listening { endpoint: address });
        Ok(listener)
    }

    fn report_bind_failure(&self, err: &InstanceError, retry_in: Duration) {
        // Without a bound channel no follower can hand off to us.
        error!("{}, retrying in {:?}", err, retry_in);
        self.emit(ListenerEvent::BindFailed {
            message: err.to_string(),
            retry_in,
        });
    }

    async fn run(self, mut bound: Option<ChannelListener>, cancel: CancellationToken) {
        let mut retry_delay = self.settings.bind_retry_initial;
        // Set whenever the last bind or accept failed.
        let mut back_off = bound.is_none();

        'listen: while !cancel.is_cancelled() {
            if back_off {
                if !Self::backoff(&cancel, retry_delay).await {
                    break 'listen;
                }
                retry_delay = self.settings.next_retry_delay(retry_delay);
            }

            let mut listener = match bound.take() {
                Some(listener) => listener,
                None => match self.bind_channel() {
                    Ok(listener) => listener,
                    Err(e) => {
                        self.report_bind_failure(&e, retry_delay);
                        back_off = true;
                        continue 'listen;
                    }
                },
            };
            back_off = false;
            retry_delay = self.settings.bind_retry_initial;

            loop {
                let accepted = tokio::select! {
                    _ = cancel.cancelled() => break 'listen,
                    accepted = listener.accept() => accepted,
                };

                match accepted {
                    Ok(connection) => {
                        tokio::select! {
                            _ = cancel.cancelled() => break 'listen,
                            _ = self.serve_connection(connection) => {}
                        }
                    }
                    Err(e) => {
                        warn!("Activation accept failed on {}: {}", self.endpoint, e);
                        self.emit(ListenerEvent::ConnectionFailed {
                            message: e.to_string(),
                        });
                        drop(listener);
                        back_off = true;
                        continue 'listen;
                    }
                }
            }
        }

        info!("Activation listener on {} stopped", self.endpoint);
        self.emit(ListenerEvent::Stopped);
    }

    /// Sleep for `delay` unless cancelled first. Returns false on cancellation.
    async fn backoff(cancel: &CancellationToken, delay: Duration) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Handle one follower connection. The connection is closed on return.
    async fn serve_connection(&self, connection: IncomingConnection) {
        let read = tokio::time::timeout(
            self.settings.read_timeout,
            read_command(connection, self.settings.max_command_len),
        )
        .await;

        match read {
            Ok(Ok(ActivationCommand::Activate)) => self.dispatch_activation().await,
            Ok(Err(e)) if e.is_protocol_error() => {
                debug!("Ignoring activation message: {}", e);
                self.emit(ListenerEvent::CommandIgnored {
                    reason: e.to_string(),
                });
            }
            Ok(Err(e)) => {
                warn!("Activation connection failed: {}", e);
                self.emit(ListenerEvent::ConnectionFailed {
                    message: e.to_string(),
                });
            }
            Err(_) => {
                debug!(
                    "Activation client sent nothing within {:?}",
                    self.settings.read_timeout
                );
                self.emit(ListenerEvent::ConnectionFailed {
                    message: format!("read timed out after {:?}", self.settings.read_timeout),
                });
            }
        }
    }

    async fn dispatch_activation(&self) {
        debug!("Activation requested via {}", self.endpoint);
        let callback = self.callback.clone();
        match tokio::task::spawn_blocking(move || callback()).await {
            Ok(()) => self.emit(ListenerEvent::ActivationReceived),
            Err(e) if e.is_panic() => {
                error!("Activation callback panicked");
                self.emit(ListenerEvent::CallbackPanicked);
            }
            Err(e) => warn!("Activation callback did not run: {}", e),
        }
    }

    fn emit(&self, event: ListenerEvent) {
        // No subscribers is the common case.
        let _ = self.events.send(event);
    }
}
