//! Common types used throughout GhostTap

use serde::{Deserialize, Serialize};

/// PCM sample format requested from the capture primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// 16-bit signed little-endian
    #[default]
    S16,
    /// 32-bit signed little-endian
    S32,
    /// 32-bit float little-endian
    F32,
}

impl SampleFormat {
    /// Bytes per sample
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::S16 => 2,
            SampleFormat::S32 | SampleFormat::F32 => 4,
        }
    }
}

impl std::fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleFormat::S16 => write!(f, "s16le"),
            SampleFormat::S32 => write!(f, "s32le"),
            SampleFormat::F32 => write!(f, "f32le"),
        }
    }
}

/// One unit of captured PCM, produced once per read iteration.
///
/// The reader copies out of its reusable buffer, so the listener owns the bytes
/// and the next read can never overwrite them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    data: Vec<u8>,
    /// Sequence number within the session, starting at 0
    pub sequence: u64,
}

impl AudioChunk {
    pub fn new(data: Vec<u8>, sequence: u64) -> Self {
        Self { data, sequence }
    }

    /// Raw PCM bytes
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Take ownership of the PCM bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Counters for one capture session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Chunks handed to a listener
    pub chunks_delivered: u64,
    /// Chunks read while no listener was registered
    pub chunks_dropped: u64,
    /// Bytes read from the capture primitive
    pub bytes_captured: u64,
}
