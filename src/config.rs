//! Configuration types for GhostTap

use crate::error::{Error, Result};
use crate::types::SampleFormat;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Capture configuration.
///
/// Copied into the session on start, so changes after that point never reach a
/// running capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Sample rate in Hz
    pub sample_rate_hz: u32,
    /// Bytes read per iteration, and the length of every chunk
    pub buffer_size_bytes: usize,
    /// Interleaved channel count
    pub channels: u32,
    /// Sample format
    pub format: SampleFormat,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: Self::DEFAULT_SAMPLE_RATE_HZ,
            buffer_size_bytes: Self::DEFAULT_BUFFER_SIZE_BYTES,
            channels: 2,
            format: SampleFormat::S16,
        }
    }
}

impl CaptureConfig {
    pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 44_100;
    pub const DEFAULT_BUFFER_SIZE_BYTES: usize = 1024;

    /// Apply optional caller arguments; missing ones keep the current values
    pub fn with_request(
        mut self,
        sample_rate_hz: Option<u32>,
        buffer_size_bytes: Option<usize>,
    ) -> Self {
        if let Some(hz) = sample_rate_hz {
            self.sample_rate_hz = hz;
        }
        if let Some(bytes) = buffer_size_bytes {
            self.buffer_size_bytes = bytes;
        }
        self
    }

    pub fn with_sample_rate(mut self, hz: u32) -> Self {
        self.sample_rate_hz = hz;
        self
    }

    pub fn with_buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size_bytes = bytes;
        self
    }

    pub fn with_channels(mut self, channels: u32) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_format(mut self, format: SampleFormat) -> Self {
        self.format = format;
        self
    }

    /// Bytes per interleaved frame (one sample per channel)
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * self.format.bytes_per_sample()
    }

    /// Wall-clock duration covered by one full chunk
    pub fn chunk_duration(&self) -> std::time::Duration {
        let bytes_per_sec = self.sample_rate_hz as u64 * self.frame_bytes() as u64;
        if bytes_per_sec == 0 {
            return std::time::Duration::ZERO;
        }
        std::time::Duration::from_nanos(
            self.buffer_size_bytes as u64 * 1_000_000_000 / bytes_per_sec,
        )
    }

    /// Reject values the capture primitive cannot be opened with
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate_hz == 0 {
            return Err(Error::Config("sample rate must be positive".into()));
        }
        if self.buffer_size_bytes == 0 {
            return Err(Error::Config("buffer size must be positive".into()));
        }
        if self.channels == 0 {
            return Err(Error::Config("channel count must be positive".into()));
        }
        Ok(())
    }
}

/// Capture backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Auto-detect best backend
    #[default]
    Auto,
    /// PipeWire monitor of the default sink
    PipeWire,
    /// Synthetic sine tone, no audio server needed
    Tone,
}

/// Top-level configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GhostTapConfig {
    /// Capture backend
    pub backend: BackendKind,
    /// Ask xdg-desktop-portal for consent before capturing
    pub use_portal: bool,
    /// Capture parameters
    pub capture: CaptureConfig,
}

impl Default for GhostTapConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Auto,
            use_portal: cfg!(feature = "portal"),
            capture: CaptureConfig::default(),
        }
    }
}

impl GhostTapConfig {
    /// Parse from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| Error::Config(format!("Invalid config: {}", e)))?;
        config.capture.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        tracing::debug!("Loaded config from {}", path.display());
        Self::from_toml_str(&text)
    }

    /// Serialize to TOML text
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))
    }
}
