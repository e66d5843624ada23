//! FTP-specific error type.

use crate::ftp::codes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Categorised FTP error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtpError {
    pub kind: FtpErrorKind,
    pub message: String,
    /// FTP reply code that triggered the error, if any.
    pub code: Option<u16>,
    /// Raw reply line from the server, if any.
    pub reply: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FtpErrorKind {
    /// TCP / DNS resolution failure, or a send/receive error on a socket.
    ConnectionFailed,
    /// Peer closed the connection (zero-length read).
    Disconnected,
    /// Connect or read timed out.
    Timeout,
    /// Server replied with a code other than the expected one.
    Rejected,
    /// Server sent a reply we cannot parse.
    Malformed,
    /// Server sent a multi-line reply; only single-line replies are handled.
    UnsupportedReply,
    /// Local file could not be opened, written or resolved.
    FileSystem,
    /// Breakpoint store could not be read or written.
    Store,
    /// A transfer is still running on this session.
    TransferActive,
    /// Config / parameter validation error.
    InvalidConfig,
}

pub type FtpResult<T> = Result<T, FtpError>;

// ── Construction helpers ─────────────────────────────────────────────

impl FtpError {
    pub fn new(kind: FtpErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            code: None,
            reply: None,
        }
    }

    pub fn with_code(mut self, code: u16) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    // ── Convenience constructors ─────────────────────────────────

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::ConnectionFailed, msg)
    }

    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Disconnected, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Timeout, msg)
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Malformed, msg)
    }

    pub fn unsupported_reply(line: &str) -> Self {
        Self::new(
            FtpErrorKind::UnsupportedReply,
            format!("Multi-line replies are not supported: '{}'", line),
        )
        .with_reply(line)
    }

    pub fn file_system(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::FileSystem, msg)
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::Store, msg)
    }

    pub fn transfer_active() -> Self {
        Self::new(
            FtpErrorKind::TransferActive,
            "A transfer is already in progress on this session",
        )
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::new(FtpErrorKind::InvalidConfig, msg)
    }

    /// Build the error for a reply whose code did not match the expected one.
    ///
    /// Known codes take their description from the static table; anything
    /// else is reported as an unknown error.
    pub fn from_reply(code: u16, line: &str) -> Self {
        let message = codes::describe(code).unwrap_or(codes::UNKNOWN_ERROR);
        Self::new(FtpErrorKind::Rejected, message)
            .with_code(code)
            .with_reply(line)
    }

    /// Signed status for callers that want the numeric convention:
    /// the negated reply code when it is a known code, `-1` otherwise.
    pub fn signed_code(&self) -> i32 {
        match (self.kind, self.code) {
            (FtpErrorKind::Rejected, Some(code)) if codes::describe(code).is_some() => {
                -(code as i32)
            }
            _ => -1,
        }
    }

    /// Socket-level failure (connect, send, receive, timeout, peer close).
    pub fn is_transport(&self) -> bool {
        matches!(
            self.kind,
            FtpErrorKind::ConnectionFailed | FtpErrorKind::Disconnected | FtpErrorKind::Timeout
        )
    }

    /// The server answered, but not the way the protocol step required.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self.kind,
            FtpErrorKind::Rejected | FtpErrorKind::Malformed | FtpErrorKind::UnsupportedReply
        )
    }
}

impl fmt::Display for FtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "[FTP {:?} {}] {}", self.kind, code, self.message)
        } else {
            write!(f, "[FTP {:?}] {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for FtpError {}

impl From<std::io::Error> for FtpError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::TimedOut => Self::timeout(format!("I/O timeout: {}", e)),
            ErrorKind::UnexpectedEof => Self::disconnected(e.to_string()),
            _ => Self::connection_failed(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for FtpError {
    fn from(e: serde_json::Error) -> Self {
        Self::store(e.to_string())
    }
}

impl From<FtpError> for String {
    fn from(e: FtpError) -> String {
        e.message
    }
}
