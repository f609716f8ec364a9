pub mod descriptor;
pub mod enumerate;
pub mod error;
pub mod ioctl;
pub mod model;
pub mod reparse;
pub mod resolve;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

pub use enumerate::{
    enumerate, DeviceEnumerator, DeviceInterfaceSet, DeviceTreeProvider, EnumeratorConfig,
    RegistryRead,
};
pub use error::{DeviceError, OsCode, Result};
pub use ioctl::{grow_until_fits, ControlHandle, ControlRequest, GrownBuffer, Growth, Marshal};
pub use model::{
    DeviceProperty, DeviceRecord, Host, InterfaceClass, PhysicalDriveInfo, StorageBusType,
    StorageDeviceNumber,
};
pub use reparse::ReparseData;
pub use resolve::{Access, DeviceOpener, PhysicalDriveResolver, ResolverConfig};

pub const INVENTORY_SCHEMA_VERSION: &str = "1.0.0";

/// A snapshot of one enumeration pass, optionally with the physical drives
/// resolved from it.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DeviceInventory {
    pub inventory_id: Uuid,
    pub schema_version: String,
    pub host: Host,
    pub interface_class: Uuid,
    pub devices: Vec<DeviceRecord>,
    pub drives: Vec<PhysicalDriveInfo>,
    pub generated_at_utc: String,
}

impl DeviceInventory {
    pub fn new(host: Host, interface_class: Uuid, devices: Vec<DeviceRecord>) -> Self {
        Self {
            inventory_id: Uuid::new_v4(),
            schema_version: INVENTORY_SCHEMA_VERSION.to_string(),
            host,
            interface_class,
            devices,
            drives: Vec::new(),
            generated_at_utc: now_utc_rfc3339(),
        }
    }

    pub fn with_drives(mut self, drives: Vec<PhysicalDriveInfo>) -> Self {
        self.drives = drives;
        self
    }
}

pub fn now_utc_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
