//! JSON status objects written to stdout for the node agent.

use libnvmeof::FabricDevice;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum Status {
    Success,
    Failure,
    #[serde(rename = "Not supported")]
    NotSupported,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Capabilities {
    pub attach: bool,
}

/// Reply to one driver call.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DriverStatus {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub devices: Option<Vec<FabricDevice>>,
}

impl DriverStatus {
    fn new(status: Status) -> Self {
        Self {
            status,
            message: None,
            volume_name: None,
            capabilities: None,
            devices: None,
        }
    }

    pub fn success() -> Self {
        Self::new(Status::Success)
    }

    /// Attach/detach happen inside mount/unmount, so the agent must not
    /// call the attach hooks.
    pub fn init() -> Self {
        Self {
            capabilities: Some(Capabilities { attach: false }),
            ..Self::success()
        }
    }

    pub fn volume_name(name: String) -> Self {
        Self {
            volume_name: Some(name),
            ..Self::success()
        }
    }

    pub fn devices(devices: Vec<FabricDevice>) -> Self {
        Self {
            devices: Some(devices),
            ..Self::success()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::new(Status::Failure)
        }
    }

    pub fn not_supported() -> Self {
        Self::new(Status::NotSupported)
    }

    pub fn exit_code(&self) -> u8 {
        match self.status {
            Status::Failure => 1,
            Status::Success | Status::NotSupported => 0,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"status":"Failure","message":"encode status: {e}"}}"#)
        })
    }
}
