//! Capture primitives
//!
//! A backend opens devices; a device does blocking reads of raw PCM.
//! Provides:
//! - PipeWire monitor capture of the default sink (feature `pipewire`)
//! - Synthetic tone source
//! - An always-unsupported backend for hosts without either

#[cfg(feature = "pipewire")]
mod monitor;
mod tone;

#[cfg(feature = "pipewire")]
pub use monitor::PipeWireBackend;
pub use tone::ToneBackend;

use crate::config::{BackendKind, CaptureConfig};
use crate::consent::ConsentGrant;
use crate::error::{Error, Result};

/// An open capture stream
pub trait CaptureDevice: Send {
    /// Block until `buf` is filled or the stream fails.
    ///
    /// Returns the number of bytes written, which may be short if the stream
    /// ends mid-read.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Release the underlying stream
    fn close(&mut self);
}

/// Factory for capture devices
pub trait CaptureBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Capability check: can this host capture playback at all?
    fn is_supported(&self) -> bool;

    /// Open a capture stream authorized by `grant`
    fn open(&self, config: &CaptureConfig, grant: &ConsentGrant) -> Result<Box<dyn CaptureDevice>>;
}

/// Backend for hosts with no playback capture support
#[derive(Debug, Default)]
pub struct UnsupportedBackend;

impl CaptureBackend for UnsupportedBackend {
    fn name(&self) -> &'static str {
        "unsupported"
    }

    fn is_supported(&self) -> bool {
        false
    }

    fn open(&self, _config: &CaptureConfig, _grant: &ConsentGrant) -> Result<Box<dyn CaptureDevice>> {
        Err(Error::UnsupportedPlatform(
            "no playback capture backend on this host".into(),
        ))
    }
}

/// Create a backend of the given kind
pub fn create_backend(kind: BackendKind) -> Box<dyn CaptureBackend> {
    match kind {
        BackendKind::Auto => default_backend(),
        BackendKind::Tone => Box::new(ToneBackend::new()),
        BackendKind::PipeWire => pipewire_backend(),
    }
}

/// Pick the best backend for this host
pub fn default_backend() -> Box<dyn CaptureBackend> {
    let backend = pipewire_backend();
    if !backend.is_supported() {
        tracing::warn!("PipeWire not available, playback capture unsupported");
    }
    backend
}

#[cfg(feature = "pipewire")]
fn pipewire_backend() -> Box<dyn CaptureBackend> {
    Box::new(PipeWireBackend::new())
}

#[cfg(not(feature = "pipewire"))]
fn pipewire_backend() -> Box<dyn CaptureBackend> {
    tracing::debug!("Built without the pipewire feature");
    Box::new(UnsupportedBackend)
}

/// Whether a PipeWire daemon is reachable from this session
pub fn is_pipewire_running() -> bool {
    if let Ok(remote) = std::env::var("PIPEWIRE_REMOTE") {
        if std::path::Path::new(&remote).exists() {
            return true;
        }
    }

    let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") else {
        return false;
    };
    std::path::Path::new(&runtime_dir).join("pipewire-0").exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_backend() {
        let backend = UnsupportedBackend;
        assert!(!backend.is_supported());
        let err = backend
            .open(&CaptureConfig::default(), &ConsentGrant::new(None))
            .err()
            .unwrap();
        assert!(matches!(err, Error::UnsupportedPlatform(_)));
    }

    #[test]
    fn test_create_tone_backend() {
        let backend = create_backend(BackendKind::Tone);
        assert_eq!(backend.name(), "tone");
        assert!(backend.is_supported());
    }

    #[cfg(not(feature = "pipewire"))]
    #[test]
    fn test_pipewire_kind_without_feature() {
        let backend = create_backend(BackendKind::PipeWire);
        assert!(!backend.is_supported());
    }
}
