use crate::backend::MediaBackend;
use crate::error::CaptureError;
use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::{debug, info};

/// A video input as reported by the capture backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoInput {
    pub device_id: String,
    pub label: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    User,
    Environment,
}

/// Video constraints derived each time a capture is (re)started.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub device_id: Option<String>,
    pub facing_mode: Option<FacingMode>,
}

impl CaptureConfig {
    /// True when neither a device nor a facing mode was requested.
    pub fn is_default(&self) -> bool {
        self.device_id.is_none() && self.facing_mode.is_none()
    }
}

/// Host description used for mobile detection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Platform {
    user_agent: String,
}

impl Platform {
    pub fn from_user_agent(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }

    /// Builds a user-agent style description of the running host.
    pub fn detect() -> Self {
        let version = System::os_version().unwrap_or_default();
        let host = match std::env::consts::OS {
            "android" => format!("Linux; Android {version}"),
            "ios" => format!("iPhone; CPU iPhone OS {version}"),
            _ => System::long_os_version()
                .or_else(System::name)
                .unwrap_or_else(|| std::env::consts::OS.to_string()),
        };
        let platform = Self::from_user_agent(format!(
            "segcam/{} ({host})",
            env!("CARGO_PKG_VERSION")
        ));
        debug!(user_agent = platform.user_agent(), "detected platform");
        platform
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn is_android(&self) -> bool {
        self.user_agent.to_lowercase().contains("android")
    }

    pub fn is_ios(&self) -> bool {
        let ua = self.user_agent.to_lowercase();
        ["iphone", "ipad", "ipod"].iter().any(|d| ua.contains(d))
    }

    pub fn is_mobile(&self) -> bool {
        self.is_android() || self.is_ios()
    }
}

/// Lists video inputs, degrading to an empty list when the backend cannot
/// enumerate devices.
pub fn video_inputs<B: MediaBackend + ?Sized>(backend: &mut B) -> Vec<VideoInput> {
    match backend.enumerate_devices() {
        Ok(devices) => devices,
        Err(CaptureError::EnumerationUnsupported) => {
            info!("device enumeration not supported");
            Vec::new()
        }
        Err(e) => {
            info!("device enumeration failed: {e}");
            Vec::new()
        }
    }
}

/// Returns the id of the first input whose label matches exactly.
pub fn device_for_label<B: MediaBackend + ?Sized>(backend: &mut B, label: &str) -> Option<String> {
    video_inputs(backend)
        .into_iter()
        .find(|input| input.label == label)
        .map(|input| input.device_id)
}

pub fn facing_mode(label: &str) -> FacingMode {
    if label.to_lowercase().contains("back") {
        FacingMode::Environment
    } else {
        FacingMode::User
    }
}

pub fn resolve_constraints<B: MediaBackend + ?Sized>(
    backend: &mut B,
    label: Option<&str>,
    platform: &Platform,
) -> CaptureConfig {
    let Some(label) = label.filter(|l| !l.is_empty()) else {
        return CaptureConfig::default();
    };
    let device_id = device_for_label(backend, label);
    let facing_mode = platform.is_mobile().then(|| facing_mode(label));
    debug!(label, ?device_id, ?facing_mode, "resolved capture constraints");
    CaptureConfig {
        device_id,
        facing_mode,
    }
}

/// Human-readable camera listing, one `id: label` line per input.
pub fn list_cameras<B: MediaBackend + ?Sized>(backend: &mut B) -> Vec<String> {
    video_inputs(backend)
        .into_iter()
        .map(|input| format!("{}: {}", input.device_id, input.label))
        .collect()
}
