//! Shared types for the FTP crate.

use crate::ftp::error::{FtpError, FtpResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ─── Connection / Session ────────────────────────────────────────────

/// Transfer type (RFC 959 TYPE command).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TransferType {
    Ascii,
    Binary,
}

impl Default for TransferType {
    fn default() -> Self {
        Self::Binary
    }
}

impl TransferType {
    pub fn command(self) -> &'static str {
        match self {
            TransferType::Ascii => "TYPE A",
            TransferType::Binary => "TYPE I",
        }
    }
}

/// Configuration for a single FTP session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub transfer_type: TransferType,
    /// Remote directory to CWD into after login.
    #[serde(default)]
    pub initial_directory: Option<String>,
    /// TCP connect timeout in seconds (0 = none).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_sec: u64,
    /// Control-channel reply timeout in milliseconds (0 = none).
    #[serde(default = "default_control_timeout")]
    pub control_timeout_ms: u64,
    /// Data-channel read timeout in milliseconds (0 = none).
    #[serde(default = "default_data_timeout")]
    pub data_timeout_ms: u64,
    /// Bytes read from the data channel per worker iteration.
    #[serde(default = "default_chunk")]
    pub chunk_size: usize,
    /// Where the JSON breakpoint store lives.
    #[serde(default = "default_breakpoint_file")]
    pub breakpoint_file: String,
}

fn default_port() -> u16 {
    21
}
fn default_username() -> String {
    "anonymous".into()
}
fn default_connect_timeout() -> u64 {
    15
}
fn default_control_timeout() -> u64 {
    30_000
}
fn default_data_timeout() -> u64 {
    30_000
}
fn default_chunk() -> usize {
    4096
}
fn default_breakpoint_file() -> String {
    "rftp-breakpoints.json".into()
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            username: default_username(),
            password: String::new(),
            transfer_type: TransferType::Binary,
            initial_directory: None,
            connect_timeout_sec: default_connect_timeout(),
            control_timeout_ms: default_control_timeout(),
            data_timeout_ms: default_data_timeout(),
            chunk_size: default_chunk(),
            breakpoint_file: default_breakpoint_file(),
        }
    }
}

impl FtpConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Load a JSON config file.
    pub fn from_json_file(path: impl AsRef<Path>) -> FtpResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            FtpError::invalid_config(format!("Cannot read config {}: {}", path.display(), e))
        })?;
        let config: FtpConfig = serde_json::from_str(&raw).map_err(|e| {
            FtpError::invalid_config(format!("Cannot parse config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> FtpResult<()> {
        if self.host.is_empty() {
            return Err(FtpError::invalid_config("Host must not be empty"));
        }
        if self.port == 0 {
            return Err(FtpError::invalid_config("Port must not be 0"));
        }
        if self.chunk_size == 0 {
            return Err(FtpError::invalid_config("Chunk size must be positive"));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        non_zero(Duration::from_secs(self.connect_timeout_sec))
    }

    pub fn control_timeout(&self) -> Option<Duration> {
        non_zero(Duration::from_millis(self.control_timeout_ms))
    }

    pub fn data_timeout(&self) -> Option<Duration> {
        non_zero(Duration::from_millis(self.data_timeout_ms))
    }
}

fn non_zero(d: Duration) -> Option<Duration> {
    if d.is_zero() {
        None
    } else {
        Some(d)
    }
}

// ─── Transfers ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum TransferDirection {
    Download,
    Upload,
}

impl TransferDirection {
    /// Integer form used in persisted breakpoint records.
    pub fn as_mode(self) -> i32 {
        match self {
            TransferDirection::Download => 0,
            TransferDirection::Upload => 1,
        }
    }

    pub fn from_mode(mode: i32) -> Option<Self> {
        match mode {
            0 => Some(TransferDirection::Download),
            1 => Some(TransferDirection::Upload),
            _ => None,
        }
    }
}

/// Lifecycle of one data-channel transfer.
///
/// `NotStarted → InProgress → {Completed | Suspended | NetworkError}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TransferState {
    NotStarted,
    InProgress,
    Suspended,
    NetworkError,
    Completed,
}

impl Default for TransferState {
    fn default() -> Self {
        Self::NotStarted
    }
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferState::Suspended | TransferState::NetworkError | TransferState::Completed
        )
    }

    /// A later download with the same identity picks up where this one left off.
    pub fn is_resumable(self) -> bool {
        matches!(self, TransferState::Suspended | TransferState::NetworkError)
    }
}

/// Identity of a resumable transfer. The offset is deliberately absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferKey {
    pub direction: TransferDirection,
    pub host: String,
    pub server_path: String,
    pub local_path: String,
    pub filename: String,
}

/// One logical transfer plus its current resume offset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferDescriptor {
    pub direction: TransferDirection,
    pub host: String,
    pub server_path: String,
    pub local_path: String,
    pub filename: String,
    pub offset: u64,
}

impl TransferDescriptor {
    pub fn download(
        host: impl Into<String>,
        server_path: impl Into<String>,
        local_path: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            direction: TransferDirection::Download,
            host: host.into(),
            server_path: server_path.into(),
            local_path: local_path.into(),
            filename: filename.into(),
            offset: 0,
        }
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn key(&self) -> TransferKey {
        TransferKey {
            direction: self.direction,
            host: self.host.clone(),
            server_path: self.server_path.clone(),
            local_path: self.local_path.clone(),
            filename: self.filename.clone(),
        }
    }

    pub fn same_transfer(&self, other: &TransferDescriptor) -> bool {
        self.direction == other.direction
            && self.host == other.host
            && self.server_path == other.server_path
            && self.local_path == other.local_path
            && self.filename == other.filename
    }
}

impl PartialEq for TransferDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.same_transfer(other)
    }
}

impl Eq for TransferDescriptor {}

/// How the destination file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create or truncate, then write from the start.
    Truncate,
    /// Append to what is already there.
    Append,
}

impl OpenMode {
    pub fn for_offset(offset: u64) -> Self {
        if offset == 0 {
            OpenMode::Truncate
        } else {
            OpenMode::Append
        }
    }
}

// ─── FTP Response ────────────────────────────────────────────────────

/// A single-line FTP reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FtpResponse {
    pub code: u16,
    /// The whole line without the trailing CRLF.
    pub line: String,
}

impl FtpResponse {
    /// Reply text after `"NNN "`.
    pub fn text(&self) -> &str {
        self.line.get(4..).unwrap_or("")
    }

    pub fn is_preliminary(&self) -> bool {
        (100..200).contains(&self.code)
    }

    pub fn is_success(&self) -> bool {
        self.code < 400
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_identity_ignores_offset() {
        let a = TransferDescriptor::download("h", "/pub", "/tmp", "f.bin").with_offset(10);
        let b = TransferDescriptor::download("h", "/pub", "/tmp", "f.bin").with_offset(99);
        let c = TransferDescriptor::download("h", "/pub", "/var", "f.bin");
        assert_eq!(a, b);
        assert_eq!(a.key(), b.key());
        assert_ne!(a, c);
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let cfg: FtpConfig = serde_json::from_str(r#"{"host":"ftp.example.org"}"#).unwrap();
        assert_eq!(cfg.port, 21);
        assert_eq!(cfg.username, "anonymous");
        assert_eq!(cfg.chunk_size, 4096);
        assert_eq!(cfg.transfer_type, TransferType::Binary);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn config_zero_timeout_disables_it() {
        let cfg = FtpConfig {
            data_timeout_ms: 0,
            ..FtpConfig::new("h")
        };
        assert_eq!(cfg.data_timeout(), None);
        assert_eq!(cfg.control_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn config_rejects_empty_host() {
        assert!(FtpConfig::default().validate().is_err());
    }

    #[test]
    fn open_mode_follows_offset() {
        assert_eq!(OpenMode::for_offset(0), OpenMode::Truncate);
        assert_eq!(OpenMode::for_offset(1), OpenMode::Append);
    }

    #[test]
    fn response_text_strips_code() {
        let r = FtpResponse {
            code: 213,
            line: "213 1024".into(),
        };
        assert_eq!(r.text(), "1024");
        assert!(r.is_success());
    }
}
