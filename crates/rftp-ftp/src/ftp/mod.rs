//! # rftp-ftp: Resumable FTP download engine
//!
//! Passive-mode FTP client (RFC 959 subset) built around a single
//! cancellable download worker with persisted restart offsets.
//!
//! Architecture:
//! - `types`: config, transfer identity and state, replies
//! - `error`: FTP-specific error type
//! - `codes`: reply codes and their descriptions
//! - `connection`: transport abstraction + TCP connector
//! - `protocol`: low-level command/response codec
//! - `control`: one-command-one-reply control channel (USER, PASV, REST…)
//! - `progress`: progress sinks
//! - `breakpoint`: resume offset stores (JSON file, in-memory)
//! - `data`: passive data connection and the download worker
//! - `session`: orchestrator tying control + data together

pub mod types;
pub mod error;
pub mod codes;
pub mod connection;
pub mod protocol;
pub mod control;
pub mod progress;
pub mod breakpoint;
pub mod data;
pub mod session;

// Re-exports for lib.rs consumers
pub use types::*;
pub use error::{FtpError, FtpErrorKind, FtpResult};
pub use breakpoint::{BreakpointStore, JsonBreakpointStore, MemoryBreakpointStore};
pub use connection::{BoxedTransport, Connector, TcpConnector};
pub use control::{ControlChannel, PassiveAddr};
pub use data::DataChannel;
pub use progress::{PercentTracker, ProgressSink, SinkId};
pub use session::Session;
