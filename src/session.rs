//! Capture session controller
//!
//! Owns at most one capture session: opens the device, runs the reader thread,
//! and tears both down on stop.
//!
//! Idle → Starting → Streaming → Stopping → Idle. A read failure takes a
//! streaming session straight back to Idle; it is never restarted. Once a
//! session is Streaming, only its reader thread moves it to Idle, and only
//! after the device is closed.

use crate::capture::{CaptureBackend, CaptureDevice};
use crate::channel::{Delivery, StreamingChannel};
use crate::config::CaptureConfig;
use crate::consent::ConsentGrant;
use crate::error::{Error, Result};
use crate::state::{SessionState, StateCell};
use crate::types::{AudioChunk, SessionStats};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Consecutive zero-byte reads after which the device is treated as failed
const EMPTY_READ_LIMIT: u32 = 100;
const EMPTY_READ_BACKOFF: Duration = Duration::from_millis(5);

#[derive(Debug, Default)]
struct SessionCounters {
    delivered: AtomicU64,
    dropped: AtomicU64,
    bytes: AtomicU64,
}

impl SessionCounters {
    fn snapshot(&self) -> SessionStats {
        SessionStats {
            chunks_delivered: self.delivered.load(Ordering::Relaxed),
            chunks_dropped: self.dropped.load(Ordering::Relaxed),
            bytes_captured: self.bytes.load(Ordering::Relaxed),
        }
    }
}

/// A live (or just-failed) session
struct CaptureSession {
    config: CaptureConfig,
    grant_serial: u64,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

/// Controller for one capture session at a time
pub struct CaptureController {
    backend: Arc<dyn CaptureBackend>,
    channel: Arc<StreamingChannel>,
    state: Arc<StateCell>,
    session: Mutex<Option<CaptureSession>>,
    counters: Mutex<Arc<SessionCounters>>,
}

impl CaptureController {
    pub fn new(backend: Box<dyn CaptureBackend>) -> Self {
        Self {
            backend: Arc::from(backend),
            channel: Arc::new(StreamingChannel::new()),
            state: Arc::new(StateCell::new()),
            session: Mutex::new(None),
            counters: Mutex::new(Arc::new(SessionCounters::default())),
        }
    }

    /// Channel chunks are delivered through
    pub fn channel(&self) -> &StreamingChannel {
        &self.channel
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Non-blocking status query
    pub fn is_streaming(&self) -> bool {
        self.state.is_streaming()
    }

    /// Config of the current session, if one is streaming
    pub fn active_config(&self) -> Option<CaptureConfig> {
        let slot = self.session.lock();
        slot.as_ref()
            .filter(|_| self.state.is_streaming())
            .map(|s| s.config.clone())
    }

    /// Counters for the current or most recent session
    pub fn stats(&self) -> SessionStats {
        self.counters.lock().snapshot()
    }

    /// Enter Starting while consent is negotiated
    pub fn begin_start(&self) -> Result<()> {
        let _slot = self.session.lock();
        match self.state.get() {
            SessionState::Idle => {
                self.state.set(SessionState::Starting);
                Ok(())
            }
            SessionState::Starting => Err(Error::ConsentPending),
            SessionState::Streaming | SessionState::Stopping => Err(Error::AlreadyStreaming),
        }
    }

    /// Leave Starting without a session (consent denied or start failed)
    pub fn abort_start(&self) {
        self.state.transition(SessionState::Starting, SessionState::Idle);
    }

    /// Start a session and its reader thread. Returns once the reader is running.
    pub fn start(&self, config: CaptureConfig, grant: ConsentGrant) -> Result<()> {
        let mut slot = self.session.lock();

        let busy = match self.state.get() {
            SessionState::Streaming => slot.is_some(),
            SessionState::Stopping => true,
            SessionState::Idle | SessionState::Starting => false,
        };
        if busy {
            tracing::warn!("Start rejected: session already streaming");
            return Err(Error::AlreadyStreaming);
        }

        // A session that ended on a read failure still needs its reader joined
        if let Some(dead) = slot.take() {
            reap(dead);
        }

        if !self.backend.is_supported() {
            self.state.set(SessionState::Idle);
            return Err(Error::UnsupportedPlatform(format!(
                "{} backend cannot capture playback on this host",
                self.backend.name()
            )));
        }

        if let Err(e) = config.validate() {
            self.state.set(SessionState::Idle);
            return Err(e);
        }

        self.state.set(SessionState::Starting);

        let device = match self.backend.open(&config, &grant) {
            Ok(device) => device,
            Err(e) => {
                tracing::error!("Failed to open {} capture: {}", self.backend.name(), e);
                self.state.set(SessionState::Idle);
                return Err(e);
            }
        };

        let stop = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(SessionCounters::default());
        *self.counters.lock() = counters.clone();

        let grant_serial = grant.serial();
        let reader = ReadLoop {
            device,
            grant,
            buffer_size: config.buffer_size_bytes,
            stop: stop.clone(),
            channel: self.channel.clone(),
            state: self.state.clone(),
            counters,
        };

        // Streaming before the reader runs, so a first-read failure can revert it
        self.state.set(SessionState::Streaming);
        self.channel.resume();

        let handle = match std::thread::Builder::new()
            .name("ghosttap-capture".into())
            .spawn(move || reader.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                self.state.set(SessionState::Idle);
                return Err(Error::Io(e));
            }
        };

        tracing::info!(
            "Capture started: {} backend, {} Hz, {} byte chunks (grant #{})",
            self.backend.name(),
            config.sample_rate_hz,
            config.buffer_size_bytes,
            grant_serial
        );

        *slot = Some(CaptureSession {
            config,
            grant_serial,
            stop,
            reader: Some(handle),
        });
        Ok(())
    }

    /// Stop the session and release the device. No-op when idle.
    ///
    /// Returns after the device is closed. Called from a listener, it only
    /// signals: the state stays `Stopping` until the reader closes the device
    /// on its way out, and the next `start` or `stop` joins it.
    pub fn stop(&self) {
        let mut slot = self.session.lock();
        let Some(mut session) = slot.take() else {
            return;
        };

        // A session that already failed is Idle and stays that way
        self.state
            .transition(SessionState::Streaming, SessionState::Stopping);
        session.stop.store(true, Ordering::SeqCst);
        self.channel.interrupt();

        let on_reader = session
            .reader
            .as_ref()
            .is_some_and(|handle| handle.thread().id() == std::thread::current().id());
        if on_reader {
            tracing::debug!("Stop requested from capture thread");
            *slot = Some(session);
            return;
        }

        // Join outside the lock; Stopping keeps new starts out until the device is closed
        drop(slot);
        if let Some(handle) = session.reader.take() {
            if handle.join().is_err() {
                tracing::error!("Capture reader panicked");
                self.state
                    .transition(SessionState::Stopping, SessionState::Idle);
            }
        }

        tracing::info!("Capture stopped (grant #{})", session.grant_serial);
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for CaptureController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureController")
            .field("backend", &self.backend.name())
            .field("state", &self.state.get())
            .finish()
    }
}

fn reap(mut session: CaptureSession) {
    if let Some(handle) = session.reader.take() {
        if handle.join().is_err() {
            tracing::error!("Capture reader panicked");
        }
    }
    tracing::debug!("Reaped finished session (grant #{})", session.grant_serial);
}

/// Everything the reader thread owns
struct ReadLoop {
    device: Box<dyn CaptureDevice>,
    grant: ConsentGrant,
    buffer_size: usize,
    stop: Arc<AtomicBool>,
    channel: Arc<StreamingChannel>,
    state: Arc<StateCell>,
    counters: Arc<SessionCounters>,
}

impl ReadLoop {
    fn run(mut self) {
        let mut buffer = vec![0u8; self.buffer_size];
        let mut sequence: u64 = 0;
        let mut empty_reads: u32 = 0;

        tracing::debug!("Capture reader running (grant #{})", self.grant.serial());

        // The stop flag is checked between reads; a read in flight always completes
        while !self.stop.load(Ordering::SeqCst) {
            let n = match self.device.read(&mut buffer) {
                Ok(0) => {
                    empty_reads += 1;
                    if empty_reads == 1 {
                        tracing::debug!("Capture device returned no data");
                    }
                    if empty_reads >= EMPTY_READ_LIMIT {
                        tracing::error!(
                            "Capture read failed, ending session: no data after {} reads",
                            empty_reads
                        );
                        break;
                    }
                    std::thread::sleep(EMPTY_READ_BACKOFF);
                    continue;
                }
                Ok(n) => n,
                Err(e) => {
                    tracing::error!("Capture read failed, ending session: {}", e);
                    break;
                }
            };
            empty_reads = 0;

            if n < buffer.len() {
                tracing::debug!("Short read: {} of {} bytes", n, buffer.len());
            }
            self.counters.bytes.fetch_add(n as u64, Ordering::Relaxed);

            let chunk = AudioChunk::new(buffer[..n].to_vec(), sequence);
            sequence += 1;

            match self.channel.deliver(chunk) {
                Delivery::Delivered => self.counters.delivered.fetch_add(1, Ordering::Relaxed),
                Delivery::Dropped => self.counters.dropped.fetch_add(1, Ordering::Relaxed),
            };
        }

        self.device.close();

        // Streaming if the device failed, Stopping if stop was requested
        if !self
            .state
            .transition(SessionState::Streaming, SessionState::Idle)
        {
            self.state
                .transition(SessionState::Stopping, SessionState::Idle);
        }

        tracing::debug!(
            "Capture reader exited after {} chunks (grant #{}, held {:?})",
            sequence,
            self.grant.serial(),
            self.grant.age()
        );
    }
}
