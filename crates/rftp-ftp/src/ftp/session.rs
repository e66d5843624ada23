//! Session: ties a control channel and a data channel together into
//! login, navigation and resumable downloads.
//!
//! Lifecycle: `connect()` → `login()` → optional `set_transfer_type()` /
//! `change_directory()` → `download()` → poll `state()` or `wait()`.
//!
//! Control commands are refused while a transfer is running; the server
//! answers RETR a second time once the data connection closes, and that
//! reply is consumed before the next command goes out.

use crate::ftp::breakpoint::{BreakpointStore, JsonBreakpointStore};
use crate::ftp::codes;
use crate::ftp::connection::{Connector, TcpConnector};
use crate::ftp::control::ControlChannel;
use crate::ftp::data::DataChannel;
use crate::ftp::error::{FtpError, FtpErrorKind, FtpResult};
use crate::ftp::progress::{ProgressSink, SinkId};
use crate::ftp::types::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use uuid::Uuid;

/// One logged-in FTP session with at most one live transfer.
pub struct Session {
    id: String,
    host: String,
    server_path: String,
    transfer_type: TransferType,
    connector: Arc<dyn Connector>,
    store: Arc<dyn BreakpointStore>,
    control: ControlChannel,
    data: DataChannel,
    descriptor: Option<TransferDescriptor>,
    awaiting_completion: bool,
    last_error: Option<FtpError>,
}

impl Session {
    /// Connect over TCP, keeping breakpoints in `config.breakpoint_file`.
    pub async fn connect(config: FtpConfig) -> FtpResult<Self> {
        let connector = Arc::new(TcpConnector::new(config.connect_timeout()));
        let store = Arc::new(JsonBreakpointStore::new(&config.breakpoint_file));
        Self::connect_with(config, connector, store).await
    }

    /// Connect with caller-supplied transport and breakpoint store.
    pub async fn connect_with(
        config: FtpConfig,
        connector: Arc<dyn Connector>,
        store: Arc<dyn BreakpointStore>,
    ) -> FtpResult<Self> {
        config.validate()?;
        let control = ControlChannel::connect(
            connector.as_ref(),
            &config.host,
            &config.port.to_string(),
            config.control_timeout(),
        )
        .await?;

        let data = DataChannel::new(Arc::clone(&store))
            .with_chunk_size(config.chunk_size)
            .with_read_timeout(config.data_timeout());

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            host: config.host,
            server_path: String::new(),
            transfer_type: TransferType::default(),
            connector,
            store,
            control,
            data,
            descriptor: None,
            awaiting_completion: false,
            last_error: None,
        })
    }

    // ─── Accessors ───────────────────────────────────────────────

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Remote directory as last reported by PWD.
    pub fn server_path(&self) -> &str {
        &self.server_path
    }

    pub fn transfer_type(&self) -> TransferType {
        self.transfer_type
    }

    /// The transfer started by the last successful `download`.
    pub fn descriptor(&self) -> Option<&TransferDescriptor> {
        self.descriptor.as_ref()
    }

    /// The most recent failure of any session operation.
    pub fn last_error(&self) -> Option<&FtpError> {
        self.last_error.as_ref()
    }

    pub fn state(&self) -> TransferState {
        self.data.state()
    }

    pub fn is_done(&self) -> bool {
        self.data.state() == TransferState::Completed
    }

    pub fn bytes_written(&self) -> u64 {
        self.data.bytes_written()
    }

    pub fn add_progress_sink(&self, sink: Arc<dyn ProgressSink>) -> SinkId {
        self.data.add_progress_sink(sink)
    }

    pub fn remove_progress_sink(&self, id: SinkId) -> bool {
        self.data.remove_progress_sink(id)
    }

    // ─── Control operations ──────────────────────────────────────

    pub async fn login(&mut self, user: &str, pass: &str) -> FtpResult<()> {
        let result = self.login_inner(user, pass).await;
        self.track(result)
    }

    pub async fn anonymous_login(&mut self) -> FtpResult<()> {
        self.login("anonymous", "anonymous@").await
    }

    async fn login_inner(&mut self, user: &str, pass: &str) -> FtpResult<()> {
        self.settle().await?;
        self.control.login(user, pass).await?;
        match self.control.print_working_directory().await {
            Ok(path) => self.server_path = path,
            Err(e) if e.is_protocol() => log::debug!("PWD after login refused: {}", e),
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// CWD, then refresh the tracked server path from PWD.
    pub async fn change_directory(&mut self, path: &str) -> FtpResult<()> {
        let result = self.change_directory_inner(path).await;
        self.track(result)
    }

    async fn change_directory_inner(&mut self, path: &str) -> FtpResult<()> {
        self.settle().await?;
        self.control.change_directory(path).await?;
        self.server_path = self.control.print_working_directory().await?;
        Ok(())
    }

    pub async fn print_working_directory(&mut self) -> FtpResult<String> {
        let result = match self.settle().await {
            Ok(()) => self.control.print_working_directory().await,
            Err(e) => Err(e),
        };
        if let Ok(path) = &result {
            self.server_path = path.clone();
        }
        self.track(result)
    }

    /// TYPE A / TYPE I. The session's type only changes if the server agrees.
    pub async fn set_transfer_type(&mut self, tt: TransferType) -> FtpResult<()> {
        let result = match self.settle().await {
            Ok(()) => self.control.set_transfer_type(tt).await,
            Err(e) => Err(e),
        };
        if result.is_ok() {
            self.transfer_type = tt;
        }
        self.track(result)
    }

    pub async fn noop(&mut self) -> FtpResult<()> {
        let result = match self.settle().await {
            Ok(()) => self.control.noop().await,
            Err(e) => Err(e),
        };
        self.track(result)
    }

    /// Stop any transfer and say goodbye.
    pub async fn quit(&mut self) -> FtpResult<()> {
        self.data.stop().await;
        if let Err(e) = self.settle().await {
            log::debug!("ignoring pending reply before QUIT: {}", e);
        }
        let result = self.control.quit().await;
        self.track(result)
    }

    // ─── Download ────────────────────────────────────────────────

    /// Start downloading `filename` from the current server directory into
    /// `dest_dir` (the working directory when `None`). Returns once the
    /// transfer worker is running.
    pub async fn download(&mut self, filename: &str, dest_dir: Option<&Path>) -> FtpResult<()> {
        let result = self.download_inner(filename, dest_dir).await;
        self.track(result)
    }

    async fn download_inner(&mut self, filename: &str, dest_dir: Option<&Path>) -> FtpResult<()> {
        self.settle().await?;
        self.descriptor = None;

        let port = self.control.enter_passive_mode().await?;

        let dir = resolve_dir(dest_dir).await?;
        let local_name = Path::new(filename).file_name().ok_or_else(|| {
            FtpError::invalid_config(format!("'{}' does not name a file", filename))
        })?;
        let local_file = dir.join(local_name);

        let mut descriptor = TransferDescriptor::download(
            self.host.clone(),
            self.server_path.clone(),
            dir.display().to_string(),
            filename,
        );
        let offset = self.resume_offset(&descriptor, &local_file).await?;
        descriptor.offset = offset;

        let size = self.control.query_size(filename).await?;

        self.data
            .open(self.connector.as_ref(), &self.host, port)
            .await?;

        if let Err(e) = self.control.initiate_retrieve(filename).await {
            self.data.stop().await;
            return Err(e);
        }
        self.awaiting_completion = true;

        let mode = OpenMode::for_offset(offset);
        if let Err(e) = self
            .data
            .start_transfer(&local_file, size, mode, descriptor.clone())
            .await
        {
            self.data.stop().await;
            return Err(e);
        }

        log::info!(
            "downloading {}/{} ({} bytes) to {} from offset {}",
            self.server_path,
            filename,
            size,
            local_file.display(),
            offset
        );
        self.descriptor = Some(descriptor);
        Ok(())
    }

    /// Look up the breakpoint and ask the server to restart there.
    ///
    /// A missing or short local file, an unreadable store, or a refused REST
    /// all mean starting over from byte 0.
    async fn resume_offset(
        &mut self,
        descriptor: &TransferDescriptor,
        local_file: &Path,
    ) -> FtpResult<u64> {
        let mut offset = match self.store.get(descriptor).await {
            Ok(offset) => offset,
            Err(e) => {
                log::warn!("breakpoint lookup failed, starting from 0: {}", e);
                0
            }
        };

        if offset > 0 {
            let on_disk = fs::metadata(local_file).await.map(|m| m.len()).unwrap_or(0);
            if on_disk < offset {
                log::warn!(
                    "{} has {} bytes but breakpoint says {}; starting from 0",
                    local_file.display(),
                    on_disk,
                    offset
                );
                offset = 0;
            }
        }

        match self.control.set_resume_offset(offset).await {
            Ok(()) => Ok(offset),
            Err(e) if e.is_protocol() => {
                if offset > 0 {
                    log::warn!("server refused REST {}, starting from 0: {}", offset, e);
                }
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    // ─── Transfer control ────────────────────────────────────────

    /// Suspend the running transfer and wait for the worker to exit.
    pub async fn stop(&mut self) {
        self.data.stop().await;
    }

    /// Wait for the running transfer to end on its own.
    pub async fn wait(&mut self) -> TransferState {
        self.data.wait().await
    }

    // ─── Internals ───────────────────────────────────────────────

    /// Make the control channel usable again after a transfer: refuse while
    /// the worker runs, then consume the server's end-of-transfer reply.
    ///
    /// If that reply does not arrive in time the current operation fails
    /// and the reply stays owed, so a late 226/426 is read by the next
    /// attempt instead of being taken as the answer to a new command.
    async fn settle(&mut self) -> FtpResult<()> {
        if self.data.is_running() {
            return Err(FtpError::transfer_active());
        }
        self.data.wait().await;

        if !self.awaiting_completion {
            return Ok(());
        }

        match self.control.read_reply().await {
            Ok(resp) => {
                self.awaiting_completion = false;
                if resp.code == codes::TRANSFER_COMPLETE {
                    log::debug!("transfer closed: {}", resp.line);
                } else {
                    log::warn!("transfer closed with: {}", resp.line);
                }
                Ok(())
            }
            Err(e) if e.kind == FtpErrorKind::Timeout => {
                log::warn!("no end-of-transfer reply from server yet: {}", e);
                Err(e)
            }
            Err(e) => {
                self.awaiting_completion = false;
                Err(e)
            }
        }
    }

    fn track<T>(&mut self, result: FtpResult<T>) -> FtpResult<T> {
        if let Err(e) = &result {
            log::debug!("session {} operation failed: {}", self.id, e);
            self.last_error = Some(e.clone());
        }
        result
    }
}

async fn resolve_dir(dest_dir: Option<&Path>) -> FtpResult<PathBuf> {
    let dir = dest_dir.unwrap_or_else(|| Path::new("."));
    let resolved = fs::canonicalize(dir).await.map_err(|e| {
        FtpError::file_system(format!("Cannot resolve {}: {}", dir.display(), e))
    })?;
    if !fs::metadata(&resolved)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
    {
        return Err(FtpError::file_system(format!(
            "{} is not a directory",
            resolved.display()
        )));
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ftp::breakpoint::MemoryBreakpointStore;
    use crate::ftp::connection::BoxedTransport;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio_test::io::Builder;

    /// Hands out pre-built transports in order: control first, then data.
    struct ScriptedConnector {
        transports: StdMutex<VecDeque<BoxedTransport>>,
    }

    impl ScriptedConnector {
        fn new(transports: Vec<BoxedTransport>) -> Arc<Self> {
            Arc::new(Self {
                transports: StdMutex::new(transports.into()),
            })
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, _host: &str, _port: u16) -> FtpResult<BoxedTransport> {
            self.transports
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| FtpError::connection_failed("no scripted transport left"))
        }
    }

    fn config() -> FtpConfig {
        let mut cfg = FtpConfig::new("ftp.example.org");
        cfg.control_timeout_ms = 0;
        cfg.data_timeout_ms = 0;
        cfg
    }

    #[tokio::test]
    async fn download_over_scripted_channels() {
        let control = Builder::new()
            .read(b"220 ready\r\n")
            .write(b"USER alice\r\n")
            .read(b"331 Password required\r\n")
            .write(b"PASS secret\r\n")
            .read(b"230 Logged in\r\n")
            .write(b"PWD\r\n")
            .read(b"257 \"/pub\" is the current directory\r\n")
            .write(b"PASV\r\n")
            .read(b"227 Entering Passive Mode (127,0,0,1,19,136)\r\n")
            .write(b"REST 0\r\n")
            .read(b"350 Restarting at 0\r\n")
            .write(b"SIZE notes.txt\r\n")
            .read(b"213 11\r\n")
            .write(b"RETR notes.txt\r\n")
            .read(b"150 Opening data connection\r\n")
            .read(b"226 Transfer complete\r\n")
            .write(b"QUIT\r\n")
            .read(b"221 Goodbye\r\n")
            .build();
        let data = Builder::new().read(b"hello ").read(b"world").build();
        let connector = ScriptedConnector::new(vec![Box::new(control) as BoxedTransport, Box::new(data)]);
        let store = Arc::new(MemoryBreakpointStore::new());
        let dir = tempdir().unwrap();

        let mut session = Session::connect_with(config(), connector, store.clone())
            .await
            .unwrap();
        session.login("alice", "secret").await.unwrap();
        assert_eq!(session.server_path(), "/pub");

        session.download("notes.txt", Some(dir.path())).await.unwrap();
        assert_eq!(session.wait().await, TransferState::Completed);
        assert!(session.is_done());
        assert_eq!(session.bytes_written(), 11);

        let local = dir.path().join("notes.txt");
        assert_eq!(std::fs::read(&local).unwrap(), b"hello world");
        assert!(store.is_empty());

        let desc = session.descriptor().unwrap();
        assert_eq!(desc.server_path, "/pub");
        assert_eq!(desc.filename, "notes.txt");

        session.quit().await.unwrap();
        assert!(session.last_error().is_none());
    }

    #[tokio::test]
    async fn late_completion_reply_is_not_taken_for_the_next_answer() {
        let control = Builder::new()
            .read(b"220 ready\r\n")
            .write(b"PASV\r\n")
            .read(b"227 Entering Passive Mode (127,0,0,1,19,136)\r\n")
            .write(b"REST 0\r\n")
            .read(b"350 Restarting at 0\r\n")
            .write(b"SIZE a.txt\r\n")
            .read(b"213 3\r\n")
            .write(b"RETR a.txt\r\n")
            .read(b"150 Opening data connection\r\n")
            .wait(Duration::from_millis(300))
            .read(b"226 Transfer complete\r\n")
            .write(b"NOOP\r\n")
            .read(b"200 NOOP ok\r\n")
            .build();
        let data = Builder::new().read(b"abc").build();
        let connector =
            ScriptedConnector::new(vec![Box::new(control) as BoxedTransport, Box::new(data)]);
        let store = Arc::new(MemoryBreakpointStore::new());
        let dir = tempdir().unwrap();

        let mut cfg = config();
        cfg.control_timeout_ms = 200;
        let mut session = Session::connect_with(cfg, connector, store).await.unwrap();
        session.download("a.txt", Some(dir.path())).await.unwrap();
        assert_eq!(session.wait().await, TransferState::Completed);

        let err = session.noop().await.unwrap_err();
        assert_eq!(err.kind, FtpErrorKind::Timeout);

        // the 226 shows up now and is consumed before NOOP goes out
        session.noop().await.unwrap();
    }

    #[tokio::test]
    async fn refused_type_keeps_previous_type() {
        let control = Builder::new()
            .read(b"220 ready\r\n")
            .write(b"TYPE A\r\n")
            .read(b"504 Command not implemented for that parameter\r\n")
            .build();
        let connector = ScriptedConnector::new(vec![Box::new(control) as BoxedTransport]);
        let store = Arc::new(MemoryBreakpointStore::new());

        let mut session = Session::connect_with(config(), connector, store).await.unwrap();
        let err = session
            .set_transfer_type(TransferType::Ascii)
            .await
            .unwrap_err();
        assert_eq!(err.signed_code(), -504);
        assert_eq!(session.transfer_type(), TransferType::Binary);
        assert_eq!(session.last_error().and_then(|e| e.code), Some(504));
    }

    #[tokio::test]
    async fn missing_file_fails_before_data_connection() {
        let control = Builder::new()
            .read(b"220 ready\r\n")
            .write(b"PASV\r\n")
            .read(b"227 Entering Passive Mode (127,0,0,1,19,136)\r\n")
            .write(b"REST 0\r\n")
            .read(b"350 Restarting at 0\r\n")
            .write(b"SIZE nope.bin\r\n")
            .read(b"550 No such file\r\n")
            .build();
        let connector = ScriptedConnector::new(vec![Box::new(control) as BoxedTransport]);
        let store = Arc::new(MemoryBreakpointStore::new());
        let dir = tempdir().unwrap();

        let mut session = Session::connect_with(config(), connector, store).await.unwrap();
        let err = session
            .download("nope.bin", Some(dir.path()))
            .await
            .unwrap_err();
        assert_eq!(err.signed_code(), -550);
        assert_eq!(session.state(), TransferState::NotStarted);
        assert!(session.descriptor().is_none());
        assert!(!dir.path().join("nope.bin").exists());
    }
}
