//! Application identity and lock scope.
//!
//! Leader and followers never negotiate: both independently derive the lock
//! name and the channel name from the same identity string, so the derivation
//! here must be a pure function of that string.

use crate::config::InstanceConfig;
use crate::error::{InstanceError, Result};
use std::fmt;

/// The string that names an application for single-instance purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppIdentity {
    name: String,
}

impl AppIdentity {
    /// Create an identity from an explicit name.
    ///
    /// Surrounding whitespace is trimmed; an empty name is rejected.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(InstanceError::Config {
                message: "Application identity must not be empty".to_string(),
            });
        }
        Ok(Self { name })
    }

    /// Derive the identity from the running executable's file stem.
    ///
    /// Falls back to [`InstanceConfig::FALLBACK_APP_NAME`] when the executable
    /// path is unavailable.
    pub fn from_current_exe() -> Self {
        let name = std::env::current_exe()
            .ok()
            .and_then(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .filter(|stem| !stem.trim().is_empty())
            .unwrap_or_else(|| InstanceConfig::FALLBACK_APP_NAME.to_string());

        Self {
            name: name.trim().to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Filesystem- and pipe-safe key used to name the lock and the channel.
    ///
    /// Short names made only of `[A-Za-z0-9._-]` are used verbatim. Anything
    /// else becomes a sanitized prefix plus a blake3 digest of the full name,
    /// so two identities never share a key merely because they sanitize alike.
    pub fn channel_key(&self) -> String {
        let verbatim = self.name.len() <= InstanceConfig::MAX_VERBATIM_KEY_LEN
            && self.name.chars().all(is_key_char)
            && !self.name.starts_with('.');
        if verbatim {
            return self.name.clone();
        }

        let prefix: String = self
            .name
            .chars()
            .map(|c| if is_key_char(c) { c } else { '_' })
            .take(InstanceConfig::HASHED_KEY_PREFIX_LEN)
            .collect();
        let digest = hex::encode(blake3::hash(self.name.as_bytes()).as_bytes());

        format!(
            "{}-{}",
            prefix.trim_start_matches('.'),
            &digest[..InstanceConfig::KEY_DIGEST_HEX_LEN]
        )
    }
}

impl fmt::Display for AppIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

/// Visibility of the lock and activation channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LockScope {
    /// One instance per user session. Lock and channel live in the user's
    /// runtime directory.
    #[default]
    Session,
    /// One instance per machine, shared across user sessions.
    Global,
}

impl LockScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockScope::Session => "session",
            LockScope::Global => "global",
        }
    }
}

impl fmt::Display for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_trims_and_rejects_empty() {
        let identity = AppIdentity::new("  MyApp \n").unwrap();
        assert_eq!(identity.as_str(), "MyApp");

        assert!(matches!(
            AppIdentity::new("   "),
            Err(InstanceError::Config { .. })
        ));
    }

    #[test]
    fn test_simple_name_is_used_verbatim() {
        let identity = AppIdentity::new("MiniPrism.Demo-App_2").unwrap();
        assert_eq!(identity.channel_key(), "MiniPrism.Demo-App_2");
    }

    #[test]
    fn test_channel_key_is_deterministic() {
        let a = AppIdentity::new("My App / Editor").unwrap();
        let b = AppIdentity::new("My App / Editor").unwrap();
        assert_eq!(a.channel_key(), b.channel_key());
    }

    #[test]
    fn test_names_that_sanitize_alike_get_distinct_keys() {
        let spaced = AppIdentity::new("my app").unwrap();
        let slashed = AppIdentity::new("my/app").unwrap();

        assert_ne!(spaced.channel_key(), slashed.channel_key());
        assert!(spaced.channel_key().starts_with("my_app-"));
        assert!(spaced.channel_key().chars().all(is_key_char));
    }

    #[test]
    fn test_long_name_is_bounded() {
        let identity = AppIdentity::new("x".repeat(500)).unwrap();
        let key = identity.channel_key();
        assert!(key.len() <= InstanceConfig::MAX_VERBATIM_KEY_LEN);
    }

    #[test]
    fn test_hidden_file_names_are_not_verbatim() {
        let identity = AppIdentity::new("..").unwrap();
        let key = identity.channel_key();
        assert!(!key.starts_with('.'));
        assert_ne!(key, "..");
    }

    #[test]
    fn test_from_current_exe_is_not_empty() {
        let identity = AppIdentity::from_current_exe();
        assert!(!identity.as_str().is_empty());
    }

    #[test]
    fn test_default_scope_is_session() {
        assert_eq!(LockScope::default(), LockScope::Session);
        assert_eq!(LockScope::Global.to_string(), "global");
    }
}
