//! PipeWire playback capture
//!
//! Captures the monitor of the default sink, i.e. everything the host is playing.
//! PipeWire delivers buffers on its own loop thread; reads drain them in order.

use super::{CaptureBackend, CaptureDevice};
use crate::config::CaptureConfig;
use crate::consent::ConsentGrant;
use crate::error::{Error, Result};
use crate::types::SampleFormat;

use ::pipewire as pw;
use pw::spa::param::audio::{AudioFormat, AudioInfoRaw};
use pw::spa::pod::Pod;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Buffers queued between the PipeWire loop and the reader
const QUEUE_DEPTH: usize = 64;

/// PipeWire monitor capture.
///
/// The stream always targets the default sink's monitor. A portal grant may
/// carry a PipeWire node id, but that node is the screencast video stream the
/// user approved and carries no audio, so it is logged and not used as the
/// capture target. The grant gates whether a device is opened at all.
#[derive(Debug, Default)]
pub struct PipeWireBackend;

impl PipeWireBackend {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureBackend for PipeWireBackend {
    fn name(&self) -> &'static str {
        "pipewire"
    }

    fn is_supported(&self) -> bool {
        super::is_pipewire_running()
    }

    fn open(&self, config: &CaptureConfig, grant: &ConsentGrant) -> Result<Box<dyn CaptureDevice>> {
        if let Some(node_id) = grant.node_id() {
            tracing::debug!(
                "Grant #{} names node {}, capturing the default sink monitor",
                grant.serial(),
                node_id
            );
        }

        let running = Arc::new(AtomicBool::new(true));
        let (data_tx, data_rx) = crossbeam_channel::bounded::<Vec<u8>>(QUEUE_DEPTH);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);

        let thread_config = config.clone();
        let thread_running = running.clone();
        let handle = std::thread::Builder::new()
            .name("ghosttap-pipewire".into())
            .spawn(move || {
                let result = run_pipewire_loop(
                    thread_config,
                    thread_running.clone(),
                    data_tx,
                    ready_tx.clone(),
                );
                if let Err(e) = result {
                    tracing::error!("PipeWire capture error: {}", e);
                    // Only reaches open() if the stream never connected
                    let _ = ready_tx.try_send(Err(e));
                }
                thread_running.store(false, Ordering::SeqCst);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(Error::CaptureOpen(e.to_string()));
            }
            Err(_) => {
                let _ = handle.join();
                return Err(Error::CaptureOpen("PipeWire thread exited".into()));
            }
        }

        tracing::info!(
            "PipeWire playback capture open ({} Hz, {} x{}, grant #{})",
            config.sample_rate_hz,
            config.format,
            config.channels,
            grant.serial()
        );

        Ok(Box::new(PipeWireDevice {
            data_rx,
            pending: Vec::new(),
            running,
            thread: Some(handle),
        }))
    }
}

struct PipeWireDevice {
    data_rx: crossbeam_channel::Receiver<Vec<u8>>,
    pending: Vec<u8>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureDevice for PipeWireDevice {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        loop {
            let n = self.pending.len().min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            filled += n;

            if filled == buf.len() {
                return Ok(filled);
            }

            match self.data_rx.recv() {
                Ok(data) => self.pending = data,
                Err(_) if filled > 0 => return Ok(filled),
                Err(_) => {
                    return Err(Error::CaptureReadFailure("PipeWire stream ended".into()));
                }
            }
        }
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        tracing::info!("PipeWire playback capture closed");
    }
}

impl Drop for PipeWireDevice {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.close();
        }
    }
}

fn spa_format(format: SampleFormat) -> AudioFormat {
    match format {
        SampleFormat::S16 => AudioFormat::S16LE,
        SampleFormat::S32 => AudioFormat::S32LE,
        SampleFormat::F32 => AudioFormat::F32LE,
    }
}

/// Run the PipeWire loop until `running` clears or the stream errors
fn run_pipewire_loop(
    config: CaptureConfig,
    running: Arc<AtomicBool>,
    data_tx: crossbeam_channel::Sender<Vec<u8>>,
    ready_tx: crossbeam_channel::Sender<Result<()>>,
) -> Result<()> {
    pw::init();

    let mainloop = pw::main_loop::MainLoop::new(None)
        .map_err(|e| Error::PipeWire(format!("Failed to create main loop: {:?}", e)))?;

    let context = pw::context::Context::new(&mainloop)
        .map_err(|e| Error::PipeWire(format!("Failed to create context: {:?}", e)))?;

    let core = context
        .connect(None)
        .map_err(|e| Error::PipeWire(format!("Failed to connect to PipeWire: {:?}", e)))?;

    // Capture the sink monitor, not a microphone
    let props = pw::properties::properties! {
        *pw::keys::MEDIA_TYPE => "Audio",
        *pw::keys::MEDIA_CATEGORY => "Capture",
        *pw::keys::MEDIA_ROLE => "Music",
        *pw::keys::STREAM_CAPTURE_SINK => "true",
    };

    let stream = pw::stream::Stream::new(&core, "ghosttap-playback", props)
        .map_err(|e| Error::PipeWire(format!("Failed to create stream: {:?}", e)))?;

    let stream_running = running.clone();
    let _listener = stream
        .add_local_listener_with_user_data(())
        .state_changed(move |_, _, old, new| {
            tracing::debug!("Stream state changed: {:?} -> {:?}", old, new);
            if let pw::stream::StreamState::Error(msg) = new {
                tracing::error!("PipeWire stream error: {}", msg);
                stream_running.store(false, Ordering::SeqCst);
            }
        })
        .process(move |stream, _| {
            let Some(mut buffer) = stream.dequeue_buffer() else {
                return;
            };

            let datas = buffer.datas_mut();
            if datas.is_empty() {
                return;
            }

            let data = &mut datas[0];
            let chunk = data.chunk();
            let offset = chunk.offset() as usize;
            let size = chunk.size() as usize;
            if size == 0 {
                return;
            }

            if let Some(slice) = data.data() {
                if offset + size <= slice.len() {
                    // Reader fell behind; PipeWire cannot wait for it
                    if data_tx.try_send(slice[offset..offset + size].to_vec()).is_err() {
                        tracing::trace!("Capture queue full, dropped {} bytes", size);
                    }
                }
            }
        })
        .register()
        .map_err(|e| Error::PipeWire(format!("Failed to register listener: {:?}", e)))?;

    let mut audio_info = AudioInfoRaw::new();
    audio_info.set_format(spa_format(config.format));
    audio_info.set_rate(config.sample_rate_hz);
    audio_info.set_channels(config.channels);

    let obj = pw::spa::pod::Object {
        type_: pw::spa::utils::SpaTypes::ObjectParamFormat.as_raw(),
        id: pw::spa::param::ParamType::EnumFormat.as_raw(),
        properties: audio_info.into(),
    };

    let values: Vec<u8> = pw::spa::pod::serialize::PodSerializer::serialize(
        std::io::Cursor::new(Vec::new()),
        &pw::spa::pod::Value::Object(obj),
    )
    .map_err(|e| Error::PipeWire(format!("Failed to serialize format params: {:?}", e)))?
    .0
    .into_inner();

    let mut params = [Pod::from_bytes(&values)
        .ok_or_else(|| Error::PipeWire("Failed to create pod from bytes".into()))?];

    stream
        .connect(
            pw::spa::utils::Direction::Input,
            None,
            pw::stream::StreamFlags::AUTOCONNECT
                | pw::stream::StreamFlags::MAP_BUFFERS
                | pw::stream::StreamFlags::RT_PROCESS,
            &mut params,
        )
        .map_err(|e| Error::PipeWire(format!("Failed to connect stream: {:?}", e)))?;

    tracing::debug!("PipeWire stream connected");
    let _ = ready_tx.send(Ok(()));

    while running.load(Ordering::SeqCst) {
        mainloop.loop_().iterate(std::time::Duration::from_millis(10));
    }

    tracing::debug!("PipeWire loop ended");
    Ok(())
}
