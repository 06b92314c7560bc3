//! Capture consent
//!
//! Capturing system audio needs two things from the host:
//! - record permission (the app may open an audio input at all)
//! - a one-time consent grant (the user approved capturing playback)
//!
//! [`ConsentGate`] makes sure only one consent dialog is ever in flight.

#[cfg(feature = "portal")]
mod portal;

#[cfg(feature = "portal")]
pub use portal::{PortalConsent, PortalDevicePermission};

use crate::config::CaptureConfig;
use crate::error::{Error, Result};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

static NEXT_GRANT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Proof that the host authorized capture.
///
/// Single use: it is moved into the session on start and dropped when the
/// session ends, so a stopped session can never be resumed with it.
#[derive(Debug)]
pub struct ConsentGrant {
    serial: u64,
    node_id: Option<u32>,
    issued_at: Instant,
}

impl ConsentGrant {
    /// Issue a grant, optionally naming the PipeWire node the host approved
    pub fn new(node_id: Option<u32>) -> Self {
        Self {
            serial: NEXT_GRANT_SERIAL.fetch_add(1, Ordering::Relaxed),
            node_id,
            issued_at: Instant::now(),
        }
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn node_id(&self) -> Option<u32> {
        self.node_id
    }

    /// Time since the host issued this grant
    pub fn age(&self) -> std::time::Duration {
        self.issued_at.elapsed()
    }
}

/// Source of consent grants (the host's capture dialog)
#[async_trait::async_trait]
pub trait ConsentProvider: Send + Sync {
    /// Ask the user for consent. Denial is `Err(Error::ConsentDenied)`.
    async fn request_consent(&self) -> Result<ConsentGrant>;
}

/// Source of record permission
#[async_trait::async_trait]
pub trait PermissionProvider: Send + Sync {
    /// Check without prompting
    async fn has_record_permission(&self) -> bool;

    /// Prompt for the permission; true if granted
    async fn request_record_permission(&self) -> bool;
}

/// Provider that answers every request the same way.
///
/// Used on hosts without a portal, where running the process is consent enough.
#[derive(Debug, Clone, Copy)]
pub struct StaticConsent {
    grant: bool,
}

impl StaticConsent {
    pub fn granted() -> Self {
        Self { grant: true }
    }

    pub fn denied() -> Self {
        Self { grant: false }
    }
}

#[async_trait::async_trait]
impl ConsentProvider for StaticConsent {
    async fn request_consent(&self) -> Result<ConsentGrant> {
        if self.grant {
            Ok(ConsentGrant::new(None))
        } else {
            Err(Error::ConsentDenied)
        }
    }
}

/// Permission provider with a fixed answer
#[derive(Debug)]
pub struct StaticPermission {
    has: AtomicBool,
    grant_on_request: bool,
}

impl StaticPermission {
    pub fn granted() -> Self {
        Self::new(true, true)
    }

    pub fn denied() -> Self {
        Self::new(false, false)
    }

    /// Missing at first, granted once requested
    pub fn on_request() -> Self {
        Self::new(false, true)
    }

    fn new(has: bool, grant_on_request: bool) -> Self {
        Self {
            has: AtomicBool::new(has),
            grant_on_request,
        }
    }
}

#[async_trait::async_trait]
impl PermissionProvider for StaticPermission {
    async fn has_record_permission(&self) -> bool {
        self.has.load(Ordering::SeqCst)
    }

    async fn request_record_permission(&self) -> bool {
        if self.grant_on_request {
            self.has.store(true, Ordering::SeqCst);
        }
        self.grant_on_request
    }
}

/// A grant paired with the config it was requested for
#[derive(Debug)]
pub struct Authorization {
    pub grant: ConsentGrant,
    pub config: CaptureConfig,
}

/// Allows one outstanding consent request at a time
#[derive(Debug, Default)]
pub struct ConsentGate {
    requesting: AtomicBool,
    last_config: Mutex<Option<CaptureConfig>>,
}

/// Clears the pending flag however the request ends, including cancellation
struct PendingGuard<'a>(&'a AtomicBool);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ConsentGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a consent dialog is open
    pub fn is_pending(&self) -> bool {
        self.requesting.load(Ordering::SeqCst)
    }

    /// Request consent for `config`. Concurrent requests are rejected, not queued.
    pub async fn request(
        &self,
        provider: &dyn ConsentProvider,
        config: CaptureConfig,
    ) -> Result<Authorization> {
        if self
            .requesting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Consent request already pending");
            return Err(Error::ConsentPending);
        }
        let _pending = PendingGuard(&self.requesting);

        *self.last_config.lock() = Some(config);
        tracing::info!("Requesting capture consent");

        match provider.request_consent().await {
            Ok(grant) => {
                let config = self
                    .last_config
                    .lock()
                    .take()
                    .ok_or_else(|| Error::Internal("Consent config missing".into()))?;
                tracing::info!("Capture consent granted (grant #{})", grant.serial());
                Ok(Authorization { grant, config })
            }
            Err(e) => {
                self.last_config.lock().take();
                if e.is_user_denial() {
                    tracing::info!("Capture consent denied");
                } else {
                    tracing::warn!("Capture consent failed: {}", e);
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Notify;

    /// Holds the dialog open until released
    #[derive(Default)]
    struct HeldConsent {
        release: Notify,
    }

    #[async_trait::async_trait]
    impl ConsentProvider for HeldConsent {
        async fn request_consent(&self) -> Result<ConsentGrant> {
            self.release.notified().await;
            Ok(ConsentGrant::new(Some(42)))
        }
    }

    #[test]
    fn test_grant_serials_are_unique() {
        let a = ConsentGrant::new(None);
        let b = ConsentGrant::new(Some(7));
        assert_ne!(a.serial(), b.serial());
        assert_eq!(b.node_id(), Some(7));
    }

    #[tokio::test]
    async fn test_granted_carries_config() {
        let gate = ConsentGate::new();
        let config = CaptureConfig::default().with_buffer_size(512);
        let auth = gate
            .request(&StaticConsent::granted(), config.clone())
            .await
            .unwrap();
        assert_eq!(auth.config, config);
        assert!(!gate.is_pending());
    }

    #[tokio::test]
    async fn test_denied_resets_flag() {
        let gate = ConsentGate::new();
        let err = gate
            .request(&StaticConsent::denied(), CaptureConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConsentDenied));
        assert!(!gate.is_pending());

        // A later request goes through normally
        assert!(gate
            .request(&StaticConsent::granted(), CaptureConfig::default())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_request_rejected() {
        let gate = Arc::new(ConsentGate::new());
        let provider = Arc::new(HeldConsent::default());

        let first = {
            let gate = gate.clone();
            let provider = provider.clone();
            tokio::spawn(async move {
                gate.request(provider.as_ref(), CaptureConfig::default())
                    .await
            })
        };

        while !gate.is_pending() {
            tokio::task::yield_now().await;
        }

        let second = gate
            .request(&StaticConsent::granted(), CaptureConfig::default())
            .await;
        assert!(matches!(second, Err(Error::ConsentPending)));

        provider.release.notify_one();
        let auth = first.await.unwrap().unwrap();
        assert_eq!(auth.grant.node_id(), Some(42));
        assert!(!gate.is_pending());
    }

    #[tokio::test]
    async fn test_static_permission() {
        let perm = StaticPermission::on_request();
        assert!(!perm.has_record_permission().await);
        assert!(perm.request_record_permission().await);
        assert!(perm.has_record_permission().await);

        let perm = StaticPermission::denied();
        assert!(!perm.request_record_permission().await);
        assert!(!perm.has_record_permission().await);
    }
}
