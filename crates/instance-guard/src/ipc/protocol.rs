//! Activation wire protocol.
//!
//! One UTF-8 line per connection, newline-terminated:
//!
//! ```text
//! activate\n
//! ```
//!
//! There is no handshake, no response and no versioning. The vocabulary is a
//! closed set; anything outside it is rejected by the reader and ignored by
//! the listener.

use crate::error::{InstanceError, Result};
use std::fmt;
use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Longest fragment of an unknown command kept for diagnostics.
const UNKNOWN_COMMAND_PREVIEW_LEN: usize = 32;

/// Commands a follower can send to the leader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivationCommand {
    /// Bring the leader's primary interface to the foreground.
    Activate,
}

impl ActivationCommand {
    pub const ALL: [ActivationCommand; 1] = [ActivationCommand::Activate];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivationCommand::Activate => "activate",
        }
    }

    /// Match a received line exactly against the vocabulary.
    pub fn parse(line: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|cmd| cmd.as_str() == line)
    }
}

impl fmt::Display for ActivationCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ActivationCommand {
    type Err = InstanceError;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(InstanceError::EmptyCommand);
        }
        Self::parse(s).ok_or_else(|| {
            InstanceError::UnknownCommand(s.chars().take(UNKNOWN_COMMAND_PREVIEW_LEN).collect())
        })
    }
}

/// Read one command line from a connection.
///
/// Reads at most `max_len + 1` bytes so a misbehaving local client cannot
/// make the listener buffer an unbounded line. A trailing `\r` is tolerated,
/// and a final line closed by EOF instead of `\n` is accepted.
pub async fn read_command<R: AsyncRead + Unpin>(
    reader: R,
    max_len: usize,
) -> Result<ActivationCommand> {
    let mut reader = BufReader::new(reader.take(max_len as u64 + 1));
    let mut line = Vec::with_capacity(max_len.min(64));
    reader.read_until(b'\n', &mut line).await?;

    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    } else if line.len() > max_len {
        return Err(InstanceError::CommandTooLong {
            len: line.len(),
            max: max_len,
        });
    }

    let text = std::str::from_utf8(&line).map_err(|_| InstanceError::InvalidUtf8)?;
    text.parse()
}

/// Write one command line and flush it.
pub async fn write_command<W: AsyncWrite + Unpin>(
    writer: &mut W,
    command: ActivationCommand,
) -> Result<()> {
    let line = format!("{}\n", command.as_str());
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
