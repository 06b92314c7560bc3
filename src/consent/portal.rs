//! xdg-desktop-portal consent
//!
//! The ScreenCast portal shows the host's capture picker; accepting it is the
//! consent grant. The Device portal covers record permission inside a sandbox.

use super::{ConsentGrant, ConsentProvider, PermissionProvider};
use crate::error::{Error, Result};

use ashpd::desktop::screencast::{CursorMode, Screencast, SourceType};
use ashpd::desktop::{PersistMode, ResponseError};
use std::sync::atomic::{AtomicBool, Ordering};

/// Consent via the ScreenCast portal picker
#[derive(Debug, Default)]
pub struct PortalConsent;

impl PortalConsent {
    pub fn new() -> Self {
        Self
    }
}

fn portal_error(context: &str, e: ashpd::Error) -> Error {
    match e {
        ashpd::Error::Response(ResponseError::Cancelled) => Error::ConsentDenied,
        e => Error::Portal(format!("{}: {}", context, e)),
    }
}

#[async_trait::async_trait]
impl ConsentProvider for PortalConsent {
    async fn request_consent(&self) -> Result<ConsentGrant> {
        tracing::info!("Requesting capture consent via portal");

        let proxy = Screencast::new()
            .await
            .map_err(|e| portal_error("Failed to connect to screencast portal", e))?;

        let session = proxy
            .create_session()
            .await
            .map_err(|e| portal_error("Failed to create session", e))?;

        proxy
            .select_sources(
                &session,
                CursorMode::Hidden,
                SourceType::Monitor.into(),
                false,
                None,
                PersistMode::DoNot,
            )
            .await
            .map_err(|e| portal_error("Failed to select sources", e))?;

        // Shows the picker; cancelling it is a denial
        let response = proxy
            .start(&session, None)
            .await
            .map_err(|e| portal_error("Failed to start screencast", e))?;

        let streams = response
            .response()
            .map_err(|e| portal_error("Screencast request failed", e))?;

        let node_id = streams.streams().first().map(|s| s.pipe_wire_node_id());
        if let Some(id) = node_id {
            tracing::debug!("Portal approved PipeWire node {}", id);
        }

        Ok(ConsentGrant::new(node_id))
    }
}

/// Record permission via the Device portal.
///
/// Outside a Flatpak sandbox the portal is not consulted and permission is
/// assumed.
#[derive(Debug)]
pub struct PortalDevicePermission {
    granted: AtomicBool,
}

impl PortalDevicePermission {
    pub fn new() -> Self {
        let sandboxed = std::path::Path::new("/.flatpak-info").exists();
        Self {
            granted: AtomicBool::new(!sandboxed),
        }
    }
}

impl Default for PortalDevicePermission {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PermissionProvider for PortalDevicePermission {
    async fn has_record_permission(&self) -> bool {
        self.granted.load(Ordering::SeqCst)
    }

    async fn request_record_permission(&self) -> bool {
        use ashpd::desktop::device::{Device, DeviceProxy};

        let proxy = match DeviceProxy::new().await {
            Ok(proxy) => proxy,
            Err(e) => {
                tracing::warn!("Device portal unavailable: {}", e);
                return false;
            }
        };

        let granted = match proxy
            .access_device(std::process::id(), &[Device::Microphone])
            .await
        {
            Ok(request) => request.response().is_ok(),
            Err(e) => {
                tracing::warn!("Record permission request failed: {}", e);
                false
            }
        };

        if granted {
            tracing::info!("Record permission granted");
            self.granted.store(true, Ordering::SeqCst);
        } else {
            tracing::info!("Record permission denied");
        }
        granted
    }
}
