//! Transport layer: the duplex byte streams both channels run over.
//!
//! Anything that is `AsyncRead + AsyncWrite` can carry the protocol; the
//! `Connector` trait is the seam where sockets are opened, so tests and
//! embedders can hand in their own streams.

use crate::ftp::error::{FtpError, FtpResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// A connected duplex byte stream.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

pub type BoxedTransport = Box<dyn Transport>;

/// Opens transports to `host:port`.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> FtpResult<BoxedTransport>;
}

/// Plain TCP connector with an optional connect timeout.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    pub connect_timeout: Option<Duration>,
}

impl TcpConnector {
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, host: &str, port: u16) -> FtpResult<BoxedTransport> {
        let addr = format!("{}:{}", host, port);
        let tcp = match self.connect_timeout {
            Some(dur) => timeout(dur, TcpStream::connect(&addr))
                .await
                .map_err(|_| FtpError::timeout(format!("TCP connect to {} timed out", addr)))?,
            None => TcpStream::connect(&addr).await,
        }
        .map_err(|e| FtpError::connection_failed(format!("TCP connect to {}: {}", addr, e)))?;

        tcp.set_nodelay(true).ok();
        log::debug!("connected to {}", addr);
        Ok(Box::new(tcp))
    }
}

/// Resolve a service given as a decimal port or a well-known name.
pub fn resolve_service(service: &str) -> FtpResult<u16> {
    let service = service.trim();
    if let Ok(port) = service.parse::<u16>() {
        if port != 0 {
            return Ok(port);
        }
    }
    match service.to_ascii_lowercase().as_str() {
        "ftp" => Ok(21),
        "ftp-data" => Ok(20),
        _ => Err(FtpError::invalid_config(format!(
            "Unknown service '{}'",
            service
        ))),
    }
}
