//! Application-facing rendering interface

use crate::{BackendType, CapabilitySet, Command, GfxError, Platform, ResourceDesc, ResourceHandle};
use serde::Serialize;

/// Identity of the live backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendInfo {
    pub id: BackendType,
    pub capabilities: CapabilitySet,
    pub platform: Platform,
    /// Increases every time a backend instance is created.
    pub epoch: u64,
}

/// Summary suitable for logs and tooling.
#[derive(Debug, Clone, Serialize)]
pub struct BackendSummary<'a> {
    pub id: BackendType,
    pub platform: Platform,
    pub device: &'a str,
    pub driver: &'a str,
}

impl BackendInfo {
    pub fn summary(&self) -> BackendSummary<'_> {
        BackendSummary {
            id: self.id,
            platform: self.platform,
            device: &self.capabilities.device_name,
            driver: &self.capabilities.driver_version,
        }
    }
}

/// What applications render through. Handles stay valid across backend
/// switches; frame calls stall while a switch is in progress.
pub trait RenderApi {
    /// Create (or reuse, for an identical description) a logical resource.
    fn create_resource(&self, desc: ResourceDesc) -> Result<ResourceHandle, GfxError>;

    /// Drop one reference; the resource is released with the last one.
    fn destroy_resource(&self, handle: ResourceHandle) -> Result<(), GfxError>;

    fn begin_frame(&self) -> Result<(), GfxError>;

    fn record_commands(&self, commands: &[Command]) -> Result<(), GfxError>;

    fn end_frame(&self) -> Result<(), GfxError>;

    fn present(&self) -> Result<(), GfxError>;

    /// `None` once the manager is shut down or exhausted.
    fn backend_info(&self) -> Option<BackendInfo>;
}
