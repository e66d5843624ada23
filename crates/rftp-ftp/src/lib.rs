//! # rftp: FTP engine
//!
//! Control channel, passive data channel and breakpoint-resumable downloads.

pub mod ftp;

pub use ftp::*;
