//! Local transport for the activation channel.
//!
//! - **Unix**: a Unix domain stream socket at a path next to the lock file
//! - **Windows**: a named pipe; a fresh pipe instance is created for every
//!   accepted connection
//!
//! Only the election winner ever binds, so a socket file found at bind time is
//! always stale and may be removed. When it cannot be removed (a socket left
//! in a shared temp directory by another user's crashed leader), the leader
//! binds [`ChannelEndpoint::leader_specific`] instead and followers look it up
//! through the PID recorded in the lock file.

use crate::identity::LockScope;
use std::fmt;
use std::path::{Path, PathBuf};

/// Where the activation channel lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEndpoint {
    address: PathBuf,
    scope: LockScope,
}

impl ChannelEndpoint {
    pub fn new(address: impl Into<PathBuf>, scope: LockScope) -> Self {
        Self {
            address: address.into(),
            scope,
        }
    }

    /// Socket path on Unix, pipe name on Windows.
    pub fn address(&self) -> &Path {
        &self.address
    }

    pub fn scope(&self) -> LockScope {
        self.scope
    }

    /// Fallback endpoint owned by the leader with process id `pid`.
    ///
    /// `{dir}/{key}.sock` becomes `{dir}/{key}.{pid}.sock`.
    pub fn leader_specific(&self, pid: u32) -> Self {
        let mut name = self
            .address
            .file_stem()
            .map(|stem| stem.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{}", pid));
        if let Some(extension) = self.address.extension() {
            name.push(".");
            name.push(extension);
        }

        Self {
            address: self.address.with_file_name(name),
            scope: self.scope,
        }
    }
}

impl fmt::Display for ChannelEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address.display())
    }
}

#[cfg(unix)]
pub use unix::{connect, ChannelListener, IncomingConnection, OutgoingConnection};

#[cfg(windows)]
pub use windows::{connect, ChannelListener, IncomingConnection, OutgoingConnection};

#[cfg(unix)]
mod unix {
    use super::ChannelEndpoint;
    use crate::identity::LockScope;
    use std::io;
    use std::os::unix::fs::{MetadataExt, PermissionsExt};
    use std::path::{Path, PathBuf};
    use tokio::net::{UnixListener, UnixStream};
    use tracing::{debug, warn};

    pub type IncomingConnection = UnixStream;
    pub type OutgoingConnection = UnixStream;

    /// Listening side of the activation channel.
    ///
    /// Removes its socket file on drop, unless the file has since been
    /// replaced by another listener.
    #[derive(Debug)]
    pub struct ChannelListener {
        listener: UnixListener,
        path: PathBuf,
        /// (device, inode) of the socket file this listener created.
        file_id: Option<(u64, u64)>,
    }

    impl ChannelListener {
        /// Bind the channel. Must be called from within a tokio runtime.
        ///
        /// Falls back to the leader-specific endpoint when a stale socket at
        /// the shared address cannot be removed.
        pub fn bind(endpoint: &ChannelEndpoint) -> io::Result<Self> {
            let path = endpoint.address();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            match remove_stale_socket(path) {
                Ok(()) => Self::bind_at(path, endpoint.scope()),
                Err(e) => {
                    let fallback = endpoint.leader_specific(std::process::id());
                    warn!(
                        "Cannot remove stale activation socket {} ({}), binding {} instead",
                        path.display(),
                        e,
                        fallback
                    );
                    remove_stale_socket(fallback.address())?;
                    Self::bind_at(fallback.address(), endpoint.scope())
                }
            }
        }

        fn bind_at(path: &Path, scope: LockScope) -> io::Result<Self> {
            let listener = UnixListener::bind(path)?;

            if scope == LockScope::Global {
                std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666))?;
            }

            let file_id = std::fs::symlink_metadata(path)
                .ok()
                .map(|meta| (meta.dev(), meta.ino()));

            Ok(Self {
                listener,
                path: path.to_path_buf(),
                file_id,
            })
        }

        /// Socket path actually bound.
        pub fn address(&self) -> &Path {
            &self.path
        }

        /// Wait for the next follower connection.
        pub async fn accept(&mut self) -> io::Result<IncomingConnection> {
            let (stream, _) = self.listener.accept().await?;
            Ok(stream)
        }
    }

    impl Drop for ChannelListener {
        fn drop(&mut self) {
            let current = std::fs::symlink_metadata(&self.path)
                .ok()
                .map(|meta| (meta.dev(), meta.ino()));
            if current.is_some() && current == self.file_id {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }

    /// Open a client connection to the channel.
    pub async fn connect(endpoint: &ChannelEndpoint) -> io::Result<OutgoingConnection> {
        UnixStream::connect(endpoint.address()).await
    }

    fn remove_stale_socket(path: &Path) -> io::Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => {
                debug!("Removed stale activation socket {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(windows)]
mod windows {
    use super::ChannelEndpoint;
    use crate::config::ChannelConfig;
    use std::io;
    use std::path::{Path, PathBuf};
    use tokio::net::windows::named_pipe::{
        ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
    };
    use windows_sys::Win32::Foundation::ERROR_PIPE_BUSY;

    pub type IncomingConnection = NamedPipeServer;
    pub type OutgoingConnection = NamedPipeClient;

    /// Listening side of the activation channel.
    ///
    /// Always holds one unconnected pipe instance so followers can connect
    /// while the previous connection is being served.
    #[derive(Debug)]
    pub struct ChannelListener {
        server: NamedPipeServer,
        address: PathBuf,
    }

    impl ChannelListener {
        /// Create the first pipe instance. Must be called from within a tokio runtime.
        pub fn bind(endpoint: &ChannelEndpoint) -> io::Result<Self> {
            let address = endpoint.address().to_path_buf();
            let server = ServerOptions::new()
                .first_pipe_instance(true)
                .create(&address)?;
            Ok(Self { server, address })
        }

        /// Pipe name actually bound.
        pub fn address(&self) -> &Path {
            &self.address
        }

        /// Wait for the next follower connection.
        pub async fn accept(&mut self) -> io::Result<IncomingConnection> {
            self.server.connect().await?;
            let next = ServerOptions::new().create(&self.address)?;
            Ok(std::mem::replace(&mut self.server, next))
        }
    }

    /// Open a client connection to the channel, retrying while the pipe is busy.
    ///
    /// Callers bound the total wait with their own timeout.
    pub async fn connect(endpoint: &ChannelEndpoint) -> io::Result<OutgoingConnection> {
        loop {
            match ClientOptions::new().open(endpoint.address()) {
                Ok(client) => return Ok(client),
                Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY as i32) => {}
                Err(e) => return Err(e),
            }
            tokio::time::sleep(ChannelConfig::PIPE_BUSY_RETRY).await;
        }
    }
}

/// Check whether an IO error means nobody is listening on the channel.
#[cfg(test)]
pub(crate) fn is_not_listening(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn test_endpoint(dir: &TempDir) -> ChannelEndpoint {
        let key = format!("chan-{}", uuid::Uuid::new_v4().simple());
        ChannelEndpoint::new(
            crate::platform::channel_address(dir.path(), &key, LockScope::Session),
            LockScope::Session,
        )
    }

    #[tokio::test]
    async fn test_connect_and_accept() {
        let temp_dir = TempDir::new().unwrap();
        let endpoint = test_endpoint(&temp_dir);
        let mut listener = ChannelListener::bind(&endpoint).unwrap();

        let client = tokio::spawn({
            let endpoint = endpoint.clone();
            async move {
                let mut stream = connect(&endpoint).await.unwrap();
                stream.write_all(b"hello\n").await.unwrap();
            }
        });

        let mut incoming = listener.accept().await.unwrap();
        let mut buf = [0u8; 6];
        incoming.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello\n");

        client.await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_without_listener_fails() {
        let temp_dir = TempDir::new().unwrap();
        let endpoint = test_endpoint(&temp_dir);

        let err = connect(&endpoint).await.unwrap_err();
        assert!(is_not_listening(&err), "unexpected error: {:?}", err);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bind_replaces_stale_socket_and_drop_removes_it() {
        let temp_dir = TempDir::new().unwrap();
        let endpoint = test_endpoint(&temp_dir);

        std::fs::write(endpoint.address(), b"stale").unwrap();
        let listener = ChannelListener::bind(&endpoint).unwrap();
        assert!(endpoint.address().exists());

        drop(listener);
        assert!(!endpoint.address().exists());
    }

    #[test]
    fn test_leader_specific_endpoint() {
        let endpoint = ChannelEndpoint::new("/tmp/MyApp.sock", LockScope::Global);
        let fallback = endpoint.leader_specific(4242);

        assert_eq!(fallback.address(), Path::new("/tmp/MyApp.4242.sock"));
        assert_eq!(fallback.scope(), LockScope::Global);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bind_falls_back_when_stale_socket_cannot_be_removed() {
        let temp_dir = TempDir::new().unwrap();
        let endpoint = test_endpoint(&temp_dir);
        // A directory cannot be unlinked with remove_file, whoever owns it.
        std::fs::create_dir(endpoint.address()).unwrap();

        let mut listener = ChannelListener::bind(&endpoint).unwrap();
        let fallback = endpoint.leader_specific(std::process::id());
        assert_eq!(listener.address(), fallback.address());

        let client = tokio::spawn(async move {
            let mut stream = connect(&fallback).await.unwrap();
            stream.write_all(b"ping\n").await.unwrap();
        });
        let mut incoming = listener.accept().await.unwrap();
        let mut buf = [0u8; 5];
        incoming.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping\n");
        client.await.unwrap();

        drop(listener);
        assert!(endpoint.address().is_dir());
        assert!(!endpoint.leader_specific(std::process::id()).address().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_drop_keeps_socket_of_newer_listener() {
        let temp_dir = TempDir::new().unwrap();
        let endpoint = test_endpoint(&temp_dir);

        let old = ChannelListener::bind(&endpoint).unwrap();
        let _new = ChannelListener::bind(&endpoint).unwrap();
        drop(old);

        assert!(endpoint.address().exists());
    }
}
