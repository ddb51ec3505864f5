//! Platform-specific locations for the election lock and activation channel.

use crate::config::InstanceConfig;
use crate::identity::LockScope;
use std::path::{Path, PathBuf};

/// Get the directory holding lock files (and sockets on Unix) for a scope.
///
/// # Platform Behavior
/// - **Session scope**: `$XDG_RUNTIME_DIR` on Linux, otherwise the per-user
///   cache directory (`~/Library/Caches` on macOS, `%LOCALAPPDATA%` on
///   Windows), otherwise the temp directory
/// - **Global scope**: the system temp directory
pub fn runtime_dir(scope: LockScope) -> PathBuf {
    match scope {
        LockScope::Session => dirs::runtime_dir()
            .or_else(dirs::cache_dir)
            .unwrap_or_else(std::env::temp_dir),
        LockScope::Global => std::env::temp_dir(),
    }
}

/// Get the activation channel address for a channel key.
///
/// # Platform Behavior
/// - **Unix**: `{dir}/{key}.sock`
/// - **Windows**: `\\.\pipe\{key}` for the machine-wide default location,
///   `\\.\pipe\{key}.{tag}` otherwise, where `tag` is a digest of `dir`.
///   Pipe names are machine-global, so the directory is folded into the
///   name to keep per-user and per-test channels apart.
pub fn channel_address(dir: &Path, key: &str, scope: LockScope) -> PathBuf {
    #[cfg(windows)]
    {
        let machine_wide = scope == LockScope::Global && dir == runtime_dir(LockScope::Global);
        if machine_wide {
            PathBuf::from(format!("{}{}", InstanceConfig::PIPE_PREFIX, key))
        } else {
            let digest = blake3::hash(dir.to_string_lossy().as_bytes());
            let tag = &hex::encode(digest.as_bytes())[..InstanceConfig::KEY_DIGEST_HEX_LEN];
            PathBuf::from(format!("{}{}.{}", InstanceConfig::PIPE_PREFIX, key, tag))
        }
    }

    #[cfg(not(windows))]
    {
        let _ = scope;
        dir.join(format!("{}.{}", key, InstanceConfig::SOCKET_FILE_EXTENSION))
    }
}

/// Get the election lock file path for a channel key.
pub fn lock_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{}.{}", key, InstanceConfig::LOCK_FILE_EXTENSION))
}
