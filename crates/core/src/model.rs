use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Registry-backed device properties read for every enumerated interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceProperty {
    Class,
    Description,
    Driver,
    EnumeratorName,
    FriendlyName,
    HardwareId,
    LocationInformation,
    LocationPaths,
    Manufacturer,
    PhysicalDeviceObjectName,
    Service,
    CompatibleIds,
}

impl DeviceProperty {
    pub const ALL: [DeviceProperty; 12] = [
        DeviceProperty::Class,
        DeviceProperty::Description,
        DeviceProperty::Driver,
        DeviceProperty::EnumeratorName,
        DeviceProperty::FriendlyName,
        DeviceProperty::HardwareId,
        DeviceProperty::LocationInformation,
        DeviceProperty::LocationPaths,
        DeviceProperty::Manufacturer,
        DeviceProperty::PhysicalDeviceObjectName,
        DeviceProperty::Service,
        DeviceProperty::CompatibleIds,
    ];

    /// The SPDRP_* registry property code.
    pub fn registry_code(self) -> u32 {
        match self {
            DeviceProperty::Description => 0x00,
            DeviceProperty::HardwareId => 0x01,
            DeviceProperty::CompatibleIds => 0x02,
            DeviceProperty::Service => 0x04,
            DeviceProperty::Class => 0x07,
            DeviceProperty::Driver => 0x09,
            DeviceProperty::Manufacturer => 0x0B,
            DeviceProperty::FriendlyName => 0x0C,
            DeviceProperty::LocationInformation => 0x0D,
            DeviceProperty::PhysicalDeviceObjectName => 0x0E,
            DeviceProperty::EnumeratorName => 0x16,
            DeviceProperty::LocationPaths => 0x23,
        }
    }
}

/// SPDRP_BASE_CONTAINERID.
pub const BASE_CONTAINER_ID_PROPERTY: u32 = 0x24;

/// One enumerated device interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub device_path: String,
    pub instance_id: String,
    pub class_guid: Option<Uuid>,
    pub base_container_id: Option<Uuid>,
    pub properties: BTreeMap<DeviceProperty, String>,
}

impl DeviceRecord {
    /// The property value, empty when the device did not report it.
    pub fn property(&self, property: DeviceProperty) -> &str {
        self.properties
            .get(&property)
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn friendly_name(&self) -> &str {
        self.property(DeviceProperty::FriendlyName)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDeviceNumber {
    pub device_number: u32,
    /// -1 when the device is not a partition.
    pub partition_number: i32,
}

impl StorageDeviceNumber {
    pub fn is_partition(&self) -> bool {
        self.partition_number >= 0
    }

    /// `\\.\PhysicalDrive<N>` for this device.
    pub fn physical_drive_path(&self) -> String {
        format!(r"\\.\PhysicalDrive{}", self.device_number)
    }
}

/// STORAGE_BUS_TYPE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageBusType {
    Unknown,
    Scsi,
    Atapi,
    Ata,
    Ieee1394,
    Ssa,
    Fibre,
    Usb,
    Raid,
    Iscsi,
    Sas,
    Sata,
    Sd,
    Mmc,
    Virtual,
    FileBackedVirtual,
    Spaces,
    Nvme,
    Scm,
    Ufs,
    NvmeOf,
    Other(u32),
}

impl From<u32> for StorageBusType {
    fn from(value: u32) -> Self {
        match value {
            0x00 => StorageBusType::Unknown,
            0x01 => StorageBusType::Scsi,
            0x02 => StorageBusType::Atapi,
            0x03 => StorageBusType::Ata,
            0x04 => StorageBusType::Ieee1394,
            0x05 => StorageBusType::Ssa,
            0x06 => StorageBusType::Fibre,
            0x07 => StorageBusType::Usb,
            0x08 => StorageBusType::Raid,
            0x09 => StorageBusType::Iscsi,
            0x0A => StorageBusType::Sas,
            0x0B => StorageBusType::Sata,
            0x0C => StorageBusType::Sd,
            0x0D => StorageBusType::Mmc,
            0x0E => StorageBusType::Virtual,
            0x0F => StorageBusType::FileBackedVirtual,
            0x10 => StorageBusType::Spaces,
            0x11 => StorageBusType::Nvme,
            0x12 => StorageBusType::Scm,
            0x13 => StorageBusType::Ufs,
            0x14 => StorageBusType::NvmeOf,
            other => StorageBusType::Other(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalDriveInfo {
    pub device_number: u32,
    pub partition_number: i32,
    pub bus_type: StorageBusType,
    pub is_removable: bool,
    pub supports_command_queueing: bool,
    pub vendor_id: String,
    pub product_revision: String,
    pub name: String,
    pub serial_number: Option<u64>,
    /// Only known when the drive was opened with read and write access.
    pub total_size: Option<u64>,
}

/// The machine whose device tree is walked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Host {
    #[default]
    Local,
    Remote(String),
}

impl Host {
    pub fn parse(name: &str) -> Host {
        let name = name.trim().trim_start_matches('\\');
        if name.is_empty() || name == "." || name.eq_ignore_ascii_case("localhost") {
            Host::Local
        } else {
            Host::Remote(name.to_string())
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Host::Local)
    }

    /// `\\name` form expected by the configuration manager.
    pub fn unc_name(&self) -> Option<String> {
        match self {
            Host::Local => None,
            Host::Remote(name) => Some(format!(r"\\{name}")),
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::Local => f.write_str("localhost"),
            Host::Remote(name) => f.write_str(name),
        }
    }
}

/// Device interface classes this crate knows by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceClass {
    Disk,
    Volume,
    CdRom,
    Partition,
    Custom(Uuid),
}

impl InterfaceClass {
    pub fn guid(self) -> Uuid {
        match self {
            InterfaceClass::Disk => Uuid::from_u128(0x53f56307_b6bf_11d0_94f2_00a0c91efb8b),
            InterfaceClass::Volume => Uuid::from_u128(0x53f5630d_b6bf_11d0_94f2_00a0c91efb8b),
            InterfaceClass::CdRom => Uuid::from_u128(0x53f56308_b6bf_11d0_94f2_00a0c91efb8b),
            InterfaceClass::Partition => Uuid::from_u128(0x53f5630a_b6bf_11d0_94f2_00a0c91efb8b),
            InterfaceClass::Custom(guid) => guid,
        }
    }
}

impl FromStr for InterfaceClass {
    type Err = uuid::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "disk" => Ok(InterfaceClass::Disk),
            "volume" => Ok(InterfaceClass::Volume),
            "cdrom" => Ok(InterfaceClass::CdRom),
            "partition" => Ok(InterfaceClass::Partition),
            other => Uuid::parse_str(other.trim_matches(|c| c == '{' || c == '}'))
                .map(InterfaceClass::Custom),
        }
    }
}
