//! Synthetic tone source
//!
//! Produces an interleaved sine wave at the configured rate and format, paced to
//! wall-clock time so reads block the way a real device does.

use super::{CaptureBackend, CaptureDevice};
use crate::config::CaptureConfig;
use crate::consent::ConsentGrant;
use crate::error::{Error, Result};
use crate::types::SampleFormat;

use std::time::{Duration, Instant};

/// Backend producing a sine tone
#[derive(Debug, Clone)]
pub struct ToneBackend {
    frequency_hz: f32,
    amplitude: f32,
    realtime: bool,
}

impl ToneBackend {
    pub fn new() -> Self {
        Self {
            frequency_hz: 440.0,
            amplitude: 0.25,
            realtime: true,
        }
    }

    pub fn with_frequency(mut self, hz: f32) -> Self {
        self.frequency_hz = hz;
        self
    }

    /// Produce samples as fast as they are read
    pub fn unpaced(mut self) -> Self {
        self.realtime = false;
        self
    }
}

impl Default for ToneBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for ToneBackend {
    fn name(&self) -> &'static str {
        "tone"
    }

    fn is_supported(&self) -> bool {
        true
    }

    fn open(&self, config: &CaptureConfig, grant: &ConsentGrant) -> Result<Box<dyn CaptureDevice>> {
        tracing::debug!(
            "Opening {} Hz tone at {} Hz {} x{} (grant #{})",
            self.frequency_hz,
            config.sample_rate_hz,
            config.format,
            config.channels,
            grant.serial()
        );
        Ok(Box::new(ToneDevice {
            config: config.clone(),
            frequency_hz: self.frequency_hz,
            amplitude: self.amplitude,
            realtime: self.realtime,
            frame_index: 0,
            pending: Vec::new(),
            started: Instant::now(),
            open: true,
        }))
    }
}

struct ToneDevice {
    config: CaptureConfig,
    frequency_hz: f32,
    amplitude: f32,
    realtime: bool,
    frame_index: u64,
    /// Bytes of the last frame that did not fit the previous read
    pending: Vec<u8>,
    started: Instant,
    open: bool,
}

impl ToneDevice {
    fn next_frame(&mut self) -> Vec<u8> {
        let t = self.frame_index as f32 / self.config.sample_rate_hz as f32;
        let value = (t * self.frequency_hz * std::f32::consts::TAU).sin() * self.amplitude;
        self.frame_index += 1;

        let sample: Vec<u8> = match self.config.format {
            SampleFormat::S16 => ((value * i16::MAX as f32) as i16).to_le_bytes().to_vec(),
            SampleFormat::S32 => ((value * i32::MAX as f32) as i32).to_le_bytes().to_vec(),
            SampleFormat::F32 => value.to_le_bytes().to_vec(),
        };

        sample.repeat(self.config.channels as usize)
    }

    /// Sleep until the produced frames are due
    fn pace(&self) {
        if !self.realtime {
            return;
        }
        let due = Duration::from_secs_f64(
            self.frame_index as f64 / self.config.sample_rate_hz as f64,
        );
        let elapsed = self.started.elapsed();
        if due > elapsed {
            std::thread::sleep(due - elapsed);
        }
    }
}

impl CaptureDevice for ToneDevice {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.open {
            return Err(Error::CaptureReadFailure("tone device closed".into()));
        }

        let mut filled = 0;
        while filled < buf.len() {
            if self.pending.is_empty() {
                self.pending = self.next_frame();
            }
            let n = self.pending.len().min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            filled += n;
        }

        self.pace();
        Ok(filled)
    }

    fn close(&mut self) {
        self.open = false;
    }
}
