//! Data channel: streams a file from the passive-mode connection to disk on
//! a background task.
//!
//! The worker is the only writer of the transfer state once it runs, and the
//! only caller of the progress sinks and of breakpoint `put`/`delete`, except
//! when a channel is dropped where the worker cannot be joined (see `Drop`). Every
//! exit path flushes the file, records the outcome, then drops the handle:
//!
//! | event              | breakpoint            | state          |
//! |--------------------|-----------------------|----------------|
//! | end of stream      | deleted               | `Completed`    |
//! | read / write error | `put(bytes_written)`  | `NetworkError` |
//! | cancellation       | `put(bytes_written)`  | `Suspended`    |

use crate::ftp::breakpoint::BreakpointStore;
use crate::ftp::connection::{BoxedTransport, Connector};
use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::progress::{self, ProgressSink, ProgressSinks, SinkId};
use crate::ftp::types::{OpenMode, TransferDescriptor, TransferState};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::{self, JoinHandle};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Default chunk size for the worker loop.
pub const DEFAULT_CHUNK: usize = 4096;

/// Upper bound on recording a breakpoint from `Drop` when the worker
/// cannot be joined.
const ABANDON_TIMEOUT: Duration = Duration::from_secs(5);

struct Worker {
    token: CancellationToken,
    handle: JoinHandle<()>,
    descriptor: TransferDescriptor,
    /// Set once the worker has started its own exit bookkeeping.
    finishing: Arc<AtomicBool>,
}

pub struct DataChannel {
    transport: Option<BoxedTransport>,
    store: Arc<dyn BreakpointStore>,
    sinks: ProgressSinks,
    state: Arc<StdMutex<TransferState>>,
    written: Arc<AtomicU64>,
    worker: Option<Worker>,
    chunk_size: usize,
    read_timeout: Option<Duration>,
}

impl DataChannel {
    pub fn new(store: Arc<dyn BreakpointStore>) -> Self {
        Self {
            transport: None,
            store,
            sinks: ProgressSinks::new(),
            state: Arc::new(StdMutex::new(TransferState::NotStarted)),
            written: Arc::new(AtomicU64::new(0)),
            worker: None,
            chunk_size: DEFAULT_CHUNK,
            read_timeout: None,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Reads that stall longer than this end the transfer as a network error.
    pub fn with_read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Connect the data transport to the passive-mode port.
    pub async fn open(&mut self, connector: &dyn Connector, host: &str, port: u16) -> FtpResult<()> {
        let transport = connector.connect(host, port).await.map_err(|e| {
            FtpError::new(e.kind, format!("Data connection to {}:{} failed: {}", host, port, e.message))
        })?;
        self.attach(transport);
        Ok(())
    }

    /// Install an already connected data transport.
    pub fn attach(&mut self, transport: BoxedTransport) {
        self.transport = Some(transport);
    }

    pub fn state(&self) -> TransferState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(TransferState::NetworkError)
    }

    /// Absolute offset of the last byte written to the local file.
    pub fn bytes_written(&self) -> u64 {
        self.written.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map(|w| !w.handle.is_finished())
            .unwrap_or(false)
    }

    pub fn add_progress_sink(&self, sink: Arc<dyn ProgressSink>) -> SinkId {
        self.sinks.add(sink)
    }

    pub fn remove_progress_sink(&self, id: SinkId) -> bool {
        self.sinks.remove(id)
    }

    /// Open the destination file and start the worker. Returns as soon as
    /// the worker is spawned.
    pub async fn start_transfer(
        &mut self,
        local_path: &Path,
        total_size: u64,
        mode: OpenMode,
        descriptor: TransferDescriptor,
    ) -> FtpResult<()> {
        if self.is_running() {
            return Err(FtpError::transfer_active());
        }
        self.reap().await;

        if self.transport.is_none() {
            return Err(FtpError::invalid_config("Data connection is not open"));
        }

        let start_offset = match mode {
            OpenMode::Truncate => 0,
            OpenMode::Append => descriptor.offset,
        };
        let file = open_local(local_path, mode, start_offset).await?;
        let transport = self
            .transport
            .take()
            .ok_or_else(|| FtpError::invalid_config("Data connection is not open"))?;

        self.written.store(start_offset, Ordering::Release);
        self.set_state(TransferState::InProgress);

        let token = CancellationToken::new();
        let finishing = Arc::new(AtomicBool::new(false));
        let job = TransferJob {
            transport,
            file,
            path: local_path.to_path_buf(),
            total_size,
            descriptor: descriptor.clone(),
            written: start_offset,
            store: Arc::clone(&self.store),
            sinks: self.sinks.clone(),
            state: Arc::clone(&self.state),
            shared_written: Arc::clone(&self.written),
            token: token.clone(),
            finishing: Arc::clone(&finishing),
            chunk_size: self.chunk_size,
            read_timeout: self.read_timeout,
        };
        log::info!(
            "transfer of {} started at offset {} of {}",
            local_path.display(),
            start_offset,
            total_size
        );
        let handle = tokio::spawn(job.run());
        self.worker = Some(Worker {
            token,
            handle,
            descriptor,
            finishing,
        });
        Ok(())
    }

    /// Cancel the worker and wait for it to exit. After this returns the
    /// file, the breakpoint store and the state are no longer touched.
    pub async fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.token.cancel();
            join(worker.handle).await;
        }
        self.transport = None;
    }

    /// Wait for the worker to finish on its own.
    pub async fn wait(&mut self) -> TransferState {
        if let Some(worker) = self.worker.take() {
            join(worker.handle).await;
        }
        self.state()
    }

    /// Join a worker that already finished.
    async fn reap(&mut self) {
        if let Some(worker) = self.worker.take() {
            join(worker.handle).await;
        }
    }

    fn set_state(&self, next: TransferState) {
        if let Ok(mut s) = self.state.lock() {
            *s = next;
        }
    }
}

impl Drop for DataChannel {
    /// Cancel and join a live worker so its suspension is recorded before
    /// the channel goes away.
    ///
    /// On a multi-threaded runtime the worker is joined in place. Elsewhere
    /// (current-thread runtime, or no runtime) the worker cannot make
    /// progress while this thread blocks, so the breakpoint is written here
    /// from the bytes already handed to the file. If the worker runs again
    /// later it records the same or a larger offset, and an append resume
    /// cuts the file back to whatever offset was stored last.
    fn drop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.token.cancel();
        if worker.handle.is_finished() {
            return;
        }

        match Handle::try_current() {
            Ok(rt) if rt.runtime_flavor() == RuntimeFlavor::MultiThread => {
                task::block_in_place(|| {
                    if let Err(e) = rt.block_on(worker.handle) {
                        log::error!("transfer worker panicked: {}", e);
                    }
                });
            }
            _ => self.record_abandoned(worker),
        }
    }
}

impl DataChannel {
    fn record_abandoned(&self, worker: Worker) {
        if worker.finishing.load(Ordering::Acquire) {
            log::warn!(
                "transfer of {} dropped while recording its outcome",
                worker.descriptor.filename
            );
            return;
        }

        let descriptor = worker.descriptor.clone().with_offset(self.bytes_written());
        let offset = descriptor.offset;
        let store = Arc::clone(&self.store);
        let recorded = std::thread::spawn(move || -> FtpResult<()> {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            rt.block_on(async {
                timeout(ABANDON_TIMEOUT, store.put(&descriptor))
                    .await
                    .map_err(|_| FtpError::timeout("breakpoint store did not answer"))?
            })
        })
        .join();

        match recorded {
            Ok(Ok(())) => log::info!(
                "transfer of {} abandoned at {}",
                worker.descriptor.filename,
                offset
            ),
            Ok(Err(e)) => log::error!(
                "could not save breakpoint for {} at {}: {}",
                worker.descriptor.filename,
                offset,
                e
            ),
            Err(_) => log::error!("breakpoint writer for {} panicked", worker.descriptor.filename),
        }
        self.set_state(TransferState::Suspended);
    }
}

async fn join(handle: JoinHandle<()>) {
    if let Err(e) = handle.await {
        log::error!("transfer worker panicked: {}", e);
    }
}

async fn open_local(path: &Path, mode: OpenMode, offset: u64) -> FtpResult<File> {
    let opened = match mode {
        OpenMode::Truncate => {
            OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)
                .await
        }
        OpenMode::Append => {
            OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)
                .await
        }
    };
    let file = opened.map_err(|e| {
        FtpError::file_system(format!("Cannot open {}: {}", path.display(), e))
    })?;

    if mode == OpenMode::Append {
        let len = file
            .metadata()
            .await
            .map_err(|e| FtpError::file_system(format!("Cannot stat {}: {}", path.display(), e)))?
            .len();
        if len > offset {
            log::warn!(
                "{} has {} bytes past the resume offset {}; cutting back",
                path.display(),
                len - offset,
                offset
            );
            file.set_len(offset).await.map_err(|e| {
                FtpError::file_system(format!("Cannot truncate {}: {}", path.display(), e))
            })?;
        }
    }
    Ok(file)
}

// ─── Worker ──────────────────────────────────────────────────────────

enum Outcome {
    Finished,
    Failed(String),
    Cancelled,
}

struct TransferJob {
    transport: BoxedTransport,
    file: File,
    path: PathBuf,
    total_size: u64,
    descriptor: TransferDescriptor,
    written: u64,
    store: Arc<dyn BreakpointStore>,
    sinks: ProgressSinks,
    state: Arc<StdMutex<TransferState>>,
    shared_written: Arc<AtomicU64>,
    token: CancellationToken,
    finishing: Arc<AtomicBool>,
    chunk_size: usize,
    read_timeout: Option<Duration>,
}

impl TransferJob {
    async fn run(mut self) {
        let outcome = self.pump().await;
        self.finish(outcome).await;
    }

    async fn pump(&mut self) -> Outcome {
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            let read = tokio::select! {
                biased;
                _ = self.token.cancelled() => return Outcome::Cancelled,
                r = read_chunk(&mut self.transport, &mut buf, self.read_timeout) => r,
            };

            let n = match read {
                Ok(0) => return Outcome::Finished,
                Ok(n) => n,
                Err(e) => return Outcome::Failed(format!("data read failed: {}", e)),
            };

            if let Err(e) = self.file.write_all(&buf[..n]).await {
                return Outcome::Failed(format!("write to {} failed: {}", self.path.display(), e));
            }
            self.written += n as u64;
            self.shared_written.store(self.written, Ordering::Release);
            self.sinks
                .notify(progress::fraction(self.written, self.total_size));

            if self.token.is_cancelled() {
                return Outcome::Cancelled;
            }
        }
    }

    async fn finish(mut self, outcome: Outcome) {
        self.finishing.store(true, Ordering::Release);
        if let Err(e) = self.file.flush().await {
            log::warn!("flush of {} failed: {}", self.path.display(), e);
        }
        self.descriptor.offset = self.written;

        let state = match outcome {
            Outcome::Finished => {
                if let Err(e) = self.store.delete(&self.descriptor).await {
                    log::warn!("could not clear breakpoint for {}: {}", self.descriptor.filename, e);
                }
                log::info!("transfer of {} complete ({} bytes)", self.path.display(), self.written);
                TransferState::Completed
            }
            Outcome::Failed(reason) => {
                self.save_breakpoint().await;
                log::warn!("transfer of {} interrupted at {}: {}", self.path.display(), self.written, reason);
                TransferState::NetworkError
            }
            Outcome::Cancelled => {
                self.save_breakpoint().await;
                log::info!("transfer of {} suspended at {}", self.path.display(), self.written);
                TransferState::Suspended
            }
        };

        if let Ok(mut s) = self.state.lock() {
            *s = state;
        }
        // `self` (file and data socket) drops here, after the state is visible.
    }

    async fn save_breakpoint(&mut self) {
        if let Err(e) = self.store.put(&self.descriptor).await {
            log::error!(
                "could not save breakpoint for {} at {}: {}",
                self.descriptor.filename,
                self.written,
                e
            );
        }
    }
}

async fn read_chunk(
    transport: &mut BoxedTransport,
    buf: &mut [u8],
    read_timeout: Option<Duration>,
) -> io::Result<usize> {
    match read_timeout {
        Some(dur) => timeout(dur, transport.read(buf))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "data channel stalled"))?,
        None => transport.read(buf).await,
    }
}
