//! Recorder: the caller-facing API
//!
//! Connects permission → consent → capture session → listener.

use crate::capture::{self, CaptureBackend};
use crate::channel::ChunkReceiver;
use crate::config::{CaptureConfig, GhostTapConfig};
use crate::consent::{
    ConsentGate, ConsentProvider, PermissionProvider, StaticConsent, StaticPermission,
};
use crate::error::{Error, Result};
use crate::session::CaptureController;
use crate::state::SessionState;
use crate::types::{AudioChunk, SessionStats};

/// System audio recorder
pub struct Recorder {
    controller: CaptureController,
    gate: ConsentGate,
    consent: Box<dyn ConsentProvider>,
    permission: Box<dyn PermissionProvider>,
    defaults: CaptureConfig,
}

/// Returns the controller to Idle unless the start attempt completed
struct StartAttempt<'a> {
    controller: &'a CaptureController,
    done: bool,
}

impl Drop for StartAttempt<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.controller.abort_start();
        }
    }
}

impl Recorder {
    pub fn builder() -> RecorderBuilder {
        RecorderBuilder::new()
    }

    /// Build from a loaded configuration file
    pub fn from_config(config: &GhostTapConfig) -> Self {
        RecorderBuilder::from_config(config).build()
    }

    /// Start streaming with the reason for any failure.
    ///
    /// Missing arguments fall back to the recorder's defaults.
    pub async fn try_start_streaming(
        &self,
        sample_rate_hz: Option<u32>,
        buffer_size_bytes: Option<usize>,
    ) -> Result<()> {
        let config = self
            .defaults
            .clone()
            .with_request(sample_rate_hz, buffer_size_bytes);
        self.try_start_with(config).await
    }

    /// Start streaming with a full config
    pub async fn try_start_with(&self, config: CaptureConfig) -> Result<()> {
        tracing::debug!(
            "Start requested: {} Hz, {} byte chunks",
            config.sample_rate_hz,
            config.buffer_size_bytes
        );
        config.validate()?;

        // Rejects before any dialog if already streaming or mid-consent
        self.controller.begin_start()?;
        let mut attempt = StartAttempt {
            controller: &self.controller,
            done: false,
        };

        if !self.permission.has_record_permission().await {
            tracing::info!("Record permission missing, requesting");
            if !self.permission.request_record_permission().await {
                return Err(Error::PermissionDenied);
            }
        }

        let auth = self.gate.request(self.consent.as_ref(), config).await?;
        let result = self.controller.start(auth.config, auth.grant);
        attempt.done = result.is_ok();
        result
    }

    /// Start streaming; false if permission, consent, or the platform refused
    pub async fn start_streaming(
        &self,
        sample_rate_hz: Option<u32>,
        buffer_size_bytes: Option<usize>,
    ) -> bool {
        match self
            .try_start_streaming(sample_rate_hz, buffer_size_bytes)
            .await
        {
            Ok(()) => true,
            Err(e) if e.is_user_denial() => {
                tracing::info!("Streaming not started: {}", e);
                false
            }
            Err(e) => {
                tracing::warn!("Streaming not started: {}", e);
                false
            }
        }
    }

    /// Stop streaming. Always succeeds; stopping while idle does nothing.
    pub fn stop_streaming(&self) -> bool {
        self.controller.stop();
        true
    }

    pub fn is_streaming(&self) -> bool {
        self.controller.is_streaming()
    }

    pub fn state(&self) -> SessionState {
        self.controller.state()
    }

    /// Register the chunk listener, replacing any previous one.
    ///
    /// Runs on the capture thread; capture waits while it runs.
    pub fn on_audio_chunk<F>(&self, listener: F)
    where
        F: FnMut(AudioChunk) + Send + 'static,
    {
        self.controller.channel().set_listener(listener);
    }

    /// Register a pull-style listener, replacing any previous one
    pub fn subscribe(&self) -> ChunkReceiver {
        self.controller.channel().subscribe()
    }

    pub fn clear_listener(&self) {
        self.controller.channel().clear_listener();
    }

    /// Counters for the current or most recent session
    pub fn stats(&self) -> SessionStats {
        self.controller.stats()
    }

    pub fn backend_name(&self) -> &'static str {
        self.controller.backend_name()
    }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("controller", &self.controller)
            .field("consent_pending", &self.gate.is_pending())
            .finish()
    }
}

/// Builder for [`Recorder`]
pub struct RecorderBuilder {
    backend: Option<Box<dyn CaptureBackend>>,
    consent: Option<Box<dyn ConsentProvider>>,
    permission: Option<Box<dyn PermissionProvider>>,
    defaults: CaptureConfig,
    use_portal: bool,
}

impl RecorderBuilder {
    pub fn new() -> Self {
        Self::from_config(&GhostTapConfig::default())
    }

    pub fn from_config(config: &GhostTapConfig) -> Self {
        Self {
            backend: Some(capture::create_backend(config.backend)),
            consent: None,
            permission: None,
            defaults: config.capture.clone(),
            use_portal: config.use_portal,
        }
    }

    pub fn backend(mut self, backend: impl CaptureBackend + 'static) -> Self {
        self.backend = Some(Box::new(backend));
        self
    }

    pub fn consent(mut self, consent: impl ConsentProvider + 'static) -> Self {
        self.consent = Some(Box::new(consent));
        self
    }

    pub fn permission(mut self, permission: impl PermissionProvider + 'static) -> Self {
        self.permission = Some(Box::new(permission));
        self
    }

    /// Defaults for arguments omitted from start requests
    pub fn defaults(mut self, config: CaptureConfig) -> Self {
        self.defaults = config;
        self
    }

    pub fn build(self) -> Recorder {
        let use_portal = self.use_portal;
        let backend = self.backend.unwrap_or_else(capture::default_backend);
        let consent = self
            .consent
            .unwrap_or_else(|| default_consent(use_portal));
        let permission = self
            .permission
            .unwrap_or_else(|| default_permission(use_portal));

        Recorder {
            controller: CaptureController::new(backend),
            gate: ConsentGate::new(),
            consent,
            permission,
            defaults: self.defaults,
        }
    }
}

impl Default for RecorderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "portal")]
fn default_consent(use_portal: bool) -> Box<dyn ConsentProvider> {
    if use_portal {
        Box::new(crate::consent::PortalConsent::new())
    } else {
        Box::new(StaticConsent::granted())
    }
}

#[cfg(not(feature = "portal"))]
fn default_consent(use_portal: bool) -> Box<dyn ConsentProvider> {
    if use_portal {
        tracing::warn!("Built without the portal feature, consent is implicit");
    }
    Box::new(StaticConsent::granted())
}

#[cfg(feature = "portal")]
fn default_permission(use_portal: bool) -> Box<dyn PermissionProvider> {
    if use_portal {
        Box::new(crate::consent::PortalDevicePermission::new())
    } else {
        Box::new(StaticPermission::granted())
    }
}

#[cfg(not(feature = "portal"))]
fn default_permission(_use_portal: bool) -> Box<dyn PermissionProvider> {
    Box::new(StaticPermission::granted())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{ToneBackend, UnsupportedBackend};
    use crate::config::BackendKind;
    use std::time::Duration;

    fn recorder(consent: StaticConsent, permission: StaticPermission) -> Recorder {
        Recorder::builder()
            .backend(ToneBackend::new())
            .consent(consent)
            .permission(permission)
            .build()
    }

    #[tokio::test]
    async fn test_granted_streams_full_chunks() {
        let rec = recorder(StaticConsent::granted(), StaticPermission::granted());
        let rx = rec.subscribe();

        assert!(rec.start_streaming(Some(44100), Some(1024)).await);
        assert!(rec.is_streaming());

        let chunk = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(chunk.len(), 1024);

        drop(rx);
        assert!(rec.stop_streaming());
        assert!(!rec.is_streaming());
    }

    #[tokio::test]
    async fn test_denied_consent() {
        let rec = recorder(StaticConsent::denied(), StaticPermission::granted());
        assert!(!rec.start_streaming(None, None).await);
        assert!(!rec.is_streaming());
        assert_eq!(rec.state(), SessionState::Idle);

        let err = rec.try_start_streaming(None, None).await.unwrap_err();
        assert!(matches!(err, Error::ConsentDenied));
        assert_eq!(rec.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_permission_denied() {
        let rec = recorder(StaticConsent::granted(), StaticPermission::denied());
        let err = rec.try_start_streaming(None, None).await.unwrap_err();
        assert!(matches!(err, Error::PermissionDenied));
        assert_eq!(rec.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_permission_requested_when_missing() {
        let rec = recorder(StaticConsent::granted(), StaticPermission::on_request());
        assert!(rec.start_streaming(None, None).await);
        rec.stop_streaming();
    }

    #[tokio::test]
    async fn test_double_start() {
        let rec = recorder(StaticConsent::granted(), StaticPermission::granted());
        assert!(rec.start_streaming(Some(44100), Some(512)).await);

        assert!(!rec.start_streaming(Some(48000), Some(2048)).await);
        let err = rec.try_start_streaming(None, None).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyStreaming));

        // First session keeps its config and keeps producing
        assert!(rec.is_streaming());
        let rx = rec.subscribe();
        let chunk = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(chunk.len(), 512);

        drop(rx);
        rec.stop_streaming();
    }

    #[tokio::test]
    async fn test_stop_when_idle() {
        let rec = recorder(StaticConsent::granted(), StaticPermission::granted());
        assert!(rec.stop_streaming());
        assert!(!rec.is_streaming());
    }

    #[tokio::test]
    async fn test_unsupported_platform() {
        let rec = Recorder::builder()
            .backend(UnsupportedBackend)
            .consent(StaticConsent::granted())
            .permission(StaticPermission::granted())
            .build();

        let err = rec.try_start_streaming(None, None).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedPlatform(_)));
        assert!(!rec.is_streaming());
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let rec = recorder(StaticConsent::granted(), StaticPermission::granted());
        assert!(!rec.start_streaming(Some(0), None).await);
        assert_eq!(rec.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let rec = recorder(StaticConsent::granted(), StaticPermission::granted());
        assert!(rec.start_streaming(None, None).await);
        rec.stop_streaming();
        assert!(rec.start_streaming(None, Some(256)).await);

        let rx = rec.subscribe();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap().len(), 256);
        drop(rx);
        rec.stop_streaming();
    }

    #[tokio::test]
    async fn test_from_config_uses_defaults() {
        let config = GhostTapConfig {
            capture: CaptureConfig::default().with_buffer_size(64),
            backend: BackendKind::Tone,
            use_portal: false,
        };
        let rec = Recorder::from_config(&config);
        assert_eq!(rec.backend_name(), "tone");

        let rx = rec.subscribe();
        assert!(rec.start_streaming(None, None).await);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap().len(), 64);
        drop(rx);
        rec.stop_streaming();
    }
}
