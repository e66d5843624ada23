//! Scripted in-process FTP server for loopback tests.
//!
//! Speaks just enough RFC 959 for the engine: USER, PASS, PWD, CWD, TYPE,
//! PASV, REST, SIZE, RETR, NOOP and QUIT, one single-line reply each.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct ServerOptions {
    pub greeting: String,
    pub password: String,
    pub reject_rest: bool,
    /// Bytes per data write.
    pub chunk: usize,
    /// Sleep between data writes.
    pub pace: Option<Duration>,
    /// Stop sending after this many bytes and hold the connection open.
    pub stall_after: Option<usize>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            greeting: "220 rftp test server ready\r\n".into(),
            password: "secret".into(),
            reject_rest: false,
            chunk: 1024,
            pace: None,
            stall_after: None,
        }
    }
}

pub struct FakeFtpServer {
    pub port: u16,
    commands: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl FakeFtpServer {
    /// Serve `files` (paths relative to `/`) until dropped.
    pub async fn start(files: HashMap<String, Vec<u8>>, opts: ServerOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let commands = Arc::new(Mutex::new(Vec::new()));
        let files = Arc::new(files);

        let log = Arc::clone(&commands);
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let files = Arc::clone(&files);
                let opts = opts.clone();
                let log = Arc::clone(&log);
                tokio::spawn(async move {
                    let _ = serve(stream, files, opts, log).await;
                });
            }
        });

        Self {
            port,
            commands,
            handle,
        }
    }

    /// Every command line received so far, across all connections.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl Drop for FakeFtpServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Deterministic, non-repeating-looking payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 256) as u8).collect()
}

async fn serve(
    stream: TcpStream,
    files: Arc<HashMap<String, Vec<u8>>>,
    opts: ServerOptions,
    log: Arc<Mutex<Vec<String>>>,
) -> std::io::Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    write.write_all(opts.greeting.as_bytes()).await?;

    let mut cwd = String::from("/");
    let mut passive: Option<TcpListener> = None;
    let mut rest: u64 = 0;

    while let Some(line) = lines.next_line().await? {
        log.lock().unwrap().push(line.clone());
        let (cmd, arg) = match line.split_once(' ') {
            Some((c, a)) => (c.to_ascii_uppercase(), a.to_string()),
            None => (line.to_ascii_uppercase(), String::new()),
        };

        let reply = match cmd.as_str() {
            "USER" => "331 Password required".to_string(),
            "PASS" if arg == opts.password => "230 Logged in".to_string(),
            "PASS" => "530 Login incorrect".to_string(),
            "PWD" => format!("257 \"{}\" is the current directory", cwd),
            "CWD" => {
                cwd = resolve(&cwd, &arg);
                "250 Directory successfully changed".to_string()
            }
            "TYPE" if arg == "A" || arg == "I" => "200 Type set".to_string(),
            "PASV" => {
                let listener = TcpListener::bind("127.0.0.1:0").await?;
                let p = listener.local_addr()?.port();
                passive = Some(listener);
                format!(
                    "227 Entering Passive Mode (127,0,0,1,{},{})",
                    p / 256,
                    p % 256
                )
            }
            "REST" if opts.reject_rest => "502 REST not implemented".to_string(),
            "REST" => match arg.parse::<u64>() {
                Ok(n) => {
                    rest = n;
                    format!("350 Restarting at {}", n)
                }
                Err(_) => "501 Bad offset".to_string(),
            },
            "SIZE" => match files.get(&resolve(&cwd, &arg)) {
                Some(body) => format!("213 {}", body.len()),
                None => "550 No such file".to_string(),
            },
            "RETR" => {
                let body = match files.get(&resolve(&cwd, &arg)) {
                    Some(body) => body.clone(),
                    None => {
                        write.write_all(b"550 No such file\r\n").await?;
                        continue;
                    }
                };
                let listener = match passive.take() {
                    Some(l) => l,
                    None => {
                        write.write_all(b"425 Use PASV first\r\n").await?;
                        continue;
                    }
                };
                write
                    .write_all(b"150 Opening BINARY mode data connection\r\n")
                    .await?;
                let (data, _) = listener.accept().await?;
                let start = (rest as usize).min(body.len());
                rest = 0;
                let done = send_body(data, &body[start..], &opts).await;
                if done {
                    "226 Transfer complete".to_string()
                } else {
                    "426 Connection closed; transfer aborted".to_string()
                }
            }
            "NOOP" => "200 NOOP ok".to_string(),
            "QUIT" => {
                write.write_all(b"221 Goodbye\r\n").await?;
                return Ok(());
            }
            _ => "502 Command not implemented".to_string(),
        };
        write.write_all(format!("{}\r\n", reply).as_bytes()).await?;
    }
    Ok(())
}

/// Returns whether the whole body went out.
async fn send_body(mut data: TcpStream, body: &[u8], opts: &ServerOptions) -> bool {
    let limit = opts.stall_after.unwrap_or(body.len()).min(body.len());
    for chunk in body[..limit].chunks(opts.chunk.max(1)) {
        if data.write_all(chunk).await.is_err() {
            return false;
        }
        if let Some(pace) = opts.pace {
            tokio::time::sleep(pace).await;
        }
    }
    if limit < body.len() {
        // hold the connection until the client gives up
        let mut sink = [0u8; 64];
        while let Ok(n) = data.read(&mut sink).await {
            if n == 0 {
                break;
            }
        }
        return false;
    }
    data.shutdown().await.is_ok()
}

fn resolve(cwd: &str, arg: &str) -> String {
    if arg.starts_with('/') {
        arg.to_string()
    } else if cwd.ends_with('/') {
        format!("{}{}", cwd, arg)
    } else {
        format!("{}/{}", cwd, arg)
    }
}
