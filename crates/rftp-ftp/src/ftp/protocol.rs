//! Low-level FTP command/response codec (RFC 959 §4).
//!
//! Handles:
//! - Sending FTP commands terminated with `\r\n`
//! - Reading one single-line reply terminated with `\r\n`
//! - Parsing the 3-digit reply code and checking it against an expectation

use crate::ftp::connection::BoxedTransport;
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::types::FtpResponse;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::time::timeout;

/// The FTP command/response codec operating on split halves.
pub struct FtpCodec {
    reader: BufReader<ReadHalf<BoxedTransport>>,
    writer: WriteHalf<BoxedTransport>,
    reply_timeout: Option<Duration>,
}

impl FtpCodec {
    pub fn new(transport: BoxedTransport, reply_timeout: Option<Duration>) -> Self {
        let (rd, wr) = tokio::io::split(transport);
        Self {
            reader: BufReader::new(rd),
            writer: wr,
            reply_timeout,
        }
    }

    /// Send a raw FTP command (without trailing CRLF; we add it).
    ///
    /// A command containing CR or LF is refused before anything is written,
    /// since it would smuggle a second command onto the wire.
    pub async fn send_command(&mut self, cmd: &str) -> FtpResult<()> {
        if cmd.contains(|c| c == '\r' || c == '\n') {
            return Err(FtpError::invalid_config(format!(
                "Line break in FTP command argument: {:?}",
                redact(cmd)
            )));
        }
        let line = format!("{}\r\n", cmd);
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        log::trace!(">>> {}", redact(cmd));
        Ok(())
    }

    /// Read a single reply line (including CRLF).
    async fn read_line_raw(&mut self) -> FtpResult<String> {
        let mut buf = Vec::new();
        let read = self.reader.read_until(b'\n', &mut buf);
        let n = match self.reply_timeout {
            Some(dur) => timeout(dur, read)
                .await
                .map_err(|_| FtpError::timeout("Timed out waiting for server reply"))??,
            None => read.await?,
        };
        if n == 0 {
            return Err(FtpError::disconnected("Server closed connection"));
        }
        if !buf.ends_with(b"\n") {
            return Err(FtpError::disconnected(
                "Server closed connection in the middle of a reply",
            ));
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Read one FTP reply.
    ///
    /// Continuation lines (`NNN-text`) are refused rather than guessed at.
    pub async fn read_response(&mut self) -> FtpResult<FtpResponse> {
        let raw = self.read_line_raw().await?;
        let line = raw.trim_end_matches(['\r', '\n']);

        let code = parse_code(line)?;
        if line.as_bytes().get(3) == Some(&b'-') {
            return Err(FtpError::unsupported_reply(line));
        }

        log::trace!("<<< {}", line);
        Ok(FtpResponse {
            code,
            line: line.to_string(),
        })
    }

    /// Send a command and return the reply, whatever its code.
    pub async fn execute(&mut self, cmd: &str) -> FtpResult<FtpResponse> {
        self.send_command(cmd).await?;
        self.read_response().await
    }

    /// Send a command and require exactly `expected` back.
    pub async fn expect(&mut self, cmd: &str, expected: u16) -> FtpResult<FtpResponse> {
        let resp = self.execute(cmd).await?;
        check_code(resp, expected)
    }

    /// Read a reply without sending anything and require `expected`.
    pub async fn expect_reply(&mut self, expected: u16) -> FtpResult<FtpResponse> {
        let resp = self.read_response().await?;
        check_code(resp, expected)
    }
}

/// Compare a reply against the expected code.
pub fn check_code(resp: FtpResponse, expected: u16) -> FtpResult<FtpResponse> {
    if resp.code == expected {
        Ok(resp)
    } else {
        Err(FtpError::from_reply(resp.code, &resp.line))
    }
}

/// Parse the 3-digit reply code from the start of a line.
pub fn parse_code(line: &str) -> FtpResult<u16> {
    let digits = line
        .get(..3)
        .ok_or_else(|| FtpError::malformed(format!("Response too short: '{}'", line)))?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FtpError::malformed(format!(
            "Invalid reply code in: '{}'",
            line
        )));
    }
    digits
        .parse::<u16>()
        .map_err(|_| FtpError::malformed(format!("Invalid reply code in: '{}'", line)))
}

fn redact(cmd: &str) -> &str {
    if cmd.get(..4).map_or(false, |verb| verb.eq_ignore_ascii_case("PASS")) {
        "PASS ****"
    } else {
        cmd
    }
}
