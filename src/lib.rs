//! GhostTap — System audio playback capture
//!
//! Captures whatever the host is playing and hands it, chunk by chunk, to a
//! single listener.
//!
//! # Features
//!
//! - **Consent**: xdg-desktop-portal picker (`portal` feature) or implicit consent
//! - **Capture**: PipeWire sink monitor (`pipewire` feature) or a synthetic tone
//! - **Delivery**: one listener, direct hand-off, no queueing
//!
//! # Example
//!
//! ```rust,no_run
//! use ghosttap::Recorder;
//!
//! #[tokio::main]
//! async fn main() -> ghosttap::Result<()> {
//!     let recorder = Recorder::builder().build();
//!     recorder.on_audio_chunk(|chunk| println!("{} bytes", chunk.len()));
//!
//!     recorder.try_start_streaming(Some(44100), Some(1024)).await?;
//!     tokio::signal::ctrl_c().await?;
//!     recorder.stop_streaming();
//!     Ok(())
//! }
//! ```

pub mod capture;
pub mod channel;
pub mod config;
pub mod consent;
pub mod error;
pub mod recorder;
pub mod session;
pub mod state;
pub mod types;

// Re-exports for convenience
pub use channel::{ChunkReceiver, Delivery, StreamingChannel};
pub use config::{BackendKind, CaptureConfig, GhostTapConfig};
pub use consent::{ConsentGate, ConsentGrant, ConsentProvider, PermissionProvider};
pub use error::{Error, Result};
pub use recorder::{Recorder, RecorderBuilder};
pub use session::CaptureController;
pub use state::SessionState;
pub use types::{AudioChunk, SampleFormat, SessionStats};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Check if playback capture is available on this system
pub fn is_capture_available() -> bool {
    capture::default_backend().is_supported()
}
