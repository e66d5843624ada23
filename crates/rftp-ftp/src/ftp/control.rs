//! Control channel: the synchronous command/response half of a session.
//!
//! Every operation sends one command and waits for exactly one reply with a
//! fixed expected code. Nothing here retries.

use crate::ftp::codes;
use crate::ftp::connection::{resolve_service, BoxedTransport, Connector};
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::protocol::FtpCodec;
use crate::ftp::types::{FtpResponse, TransferType};
use lazy_static::lazy_static;
use regex::Regex;
use std::net::Ipv4Addr;
use std::time::Duration;

lazy_static! {
    static ref PASV_GROUP: Regex = Regex::new(r"\(([^()]*)\)").expect("valid PASV regex");
}

/// Address advertised in a 227 reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassiveAddr {
    pub ip: Ipv4Addr,
    pub port: u16,
}

pub struct ControlChannel {
    codec: FtpCodec,
}

impl ControlChannel {
    /// Connect to `host`/`service` and wait for the 220 greeting.
    pub async fn connect(
        connector: &dyn Connector,
        host: &str,
        service: &str,
        reply_timeout: Option<Duration>,
    ) -> FtpResult<Self> {
        let port = resolve_service(service)?;
        let transport = connector.connect(host, port).await?;
        let mut channel = Self::from_transport(transport, reply_timeout);
        let banner = channel.codec.expect_reply(codes::SERVICE_READY).await?;
        log::info!("FTP {}:{} ready: {}", host, port, banner.text());
        Ok(channel)
    }

    /// Wrap an already connected transport. The greeting is not consumed.
    pub fn from_transport(transport: BoxedTransport, reply_timeout: Option<Duration>) -> Self {
        Self {
            codec: FtpCodec::new(transport, reply_timeout),
        }
    }

    // ─── Login ───────────────────────────────────────────────────

    /// USER then PASS; 331 then 230 are the only accepted replies.
    pub async fn login(&mut self, user: &str, pass: &str) -> FtpResult<()> {
        self.codec
            .expect(&format!("USER {}", user), codes::NEED_PASSWORD)
            .await?;
        self.codec
            .expect(&format!("PASS {}", pass), codes::LOGGED_IN)
            .await?;
        log::info!("FTP logged in as {}", user);
        Ok(())
    }

    // ─── CWD / PWD ───────────────────────────────────────────────

    pub async fn change_directory(&mut self, path: &str) -> FtpResult<()> {
        self.codec
            .expect(&format!("CWD {}", path), codes::FILE_ACTION_OK)
            .await?;
        Ok(())
    }

    pub async fn print_working_directory(&mut self) -> FtpResult<String> {
        let resp = self.codec.expect("PWD", codes::PATHNAME_CREATED).await?;
        Ok(parse_pwd(&resp))
    }

    // ─── TYPE ────────────────────────────────────────────────────

    pub async fn set_transfer_type(&mut self, tt: TransferType) -> FtpResult<()> {
        self.codec.expect(tt.command(), codes::COMMAND_OK).await?;
        Ok(())
    }

    // ─── PASV ────────────────────────────────────────────────────

    /// Issue `PASV` and return the data port.
    pub async fn enter_passive_mode(&mut self) -> FtpResult<u16> {
        Ok(self.enter_passive_mode_addr().await?.port)
    }

    /// Issue `PASV` and return the full advertised address.
    pub async fn enter_passive_mode_addr(&mut self) -> FtpResult<PassiveAddr> {
        let resp = self.codec.expect("PASV", codes::ENTERING_PASSIVE).await?;
        parse_pasv_reply(&resp.line)
    }

    // ─── SIZE / REST / RETR ──────────────────────────────────────

    pub async fn query_size(&mut self, filename: &str) -> FtpResult<u64> {
        let resp = self
            .codec
            .expect(&format!("SIZE {}", filename), codes::FILE_STATUS)
            .await?;
        parse_size(&resp)
    }

    /// `REST offset`; the caller decides what a refusal means.
    pub async fn set_resume_offset(&mut self, offset: u64) -> FtpResult<()> {
        self.codec
            .expect(&format!("REST {}", offset), codes::PENDING_FURTHER_INFO)
            .await?;
        Ok(())
    }

    pub async fn initiate_retrieve(&mut self, filename: &str) -> FtpResult<()> {
        self.codec
            .expect(&format!("RETR {}", filename), codes::FILE_STATUS_OK)
            .await?;
        Ok(())
    }

    // ─── Misc ────────────────────────────────────────────────────

    pub async fn noop(&mut self) -> FtpResult<()> {
        self.codec.expect("NOOP", codes::COMMAND_OK).await?;
        Ok(())
    }

    pub async fn quit(&mut self) -> FtpResult<()> {
        self.codec.expect("QUIT", codes::CLOSING_CONTROL).await?;
        Ok(())
    }

    /// Read one unsolicited reply, e.g. the 226 that follows a transfer.
    pub async fn read_reply(&mut self) -> FtpResult<FtpResponse> {
        self.codec.read_response().await
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────

/// `257 "/some/path" is current directory` → `/some/path`.
fn parse_pwd(resp: &FtpResponse) -> String {
    let text = resp.text();
    if let Some(start) = text.find('"') {
        if let Some(end) = text[start + 1..].find('"') {
            return text[start + 1..start + 1 + end].to_string();
        }
    }
    text.trim().to_string()
}

/// `213 12345` → `12345`.
fn parse_size(resp: &FtpResponse) -> FtpResult<u64> {
    let text = resp.text().trim();
    let digits: &str = text
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .unwrap_or("");
    digits
        .parse::<u64>()
        .map_err(|_| FtpError::malformed(format!("Cannot parse SIZE: {}", resp.line)))
}

/// Parse `(h1,h2,h3,h4,p1,p2)` out of a 227 reply.
///
/// Exactly six comma-separated decimal fields in 0..=255 are accepted.
pub fn parse_pasv_reply(line: &str) -> FtpResult<PassiveAddr> {
    let caps = PASV_GROUP
        .captures(line)
        .ok_or_else(|| FtpError::malformed(format!("No address group in PASV reply: {}", line)))?;

    let fields: Vec<&str> = caps[1].split(',').map(str::trim).collect();
    if fields.len() != 6 {
        return Err(FtpError::malformed(format!(
            "PASV reply has {} fields, expected 6: {}",
            fields.len(),
            line
        ))
        .with_reply(line));
    }

    let mut nums = [0u8; 6];
    for (slot, field) in nums.iter_mut().zip(&fields) {
        if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
            return Err(FtpError::malformed(format!(
                "Non-numeric PASV field '{}' in: {}",
                field, line
            ))
            .with_reply(line));
        }
        *slot = field.parse::<u8>().map_err(|_| {
            FtpError::malformed(format!("PASV field '{}' out of range in: {}", field, line))
                .with_reply(line)
        })?;
    }

    Ok(PassiveAddr {
        ip: Ipv4Addr::new(nums[0], nums[1], nums[2], nums[3]),
        port: u16::from(nums[4]) * 256 + u16::from(nums[5]),
    })
}
