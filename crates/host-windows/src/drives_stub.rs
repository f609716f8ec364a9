use devlink_core::{DeviceError, DeviceRecord, PhysicalDriveInfo, Result};

pub fn logical_drive_letters() -> Vec<char> {
    Vec::new()
}

pub fn resolve_drive_letter(_letter: char) -> Result<Option<PhysicalDriveInfo>> {
    Err(DeviceError::Unsupported("drive letter resolution"))
}

pub fn resolve_all_drive_letters() -> Result<Vec<PhysicalDriveInfo>> {
    Err(DeviceError::Unsupported("drive letter resolution"))
}

pub fn resolve_records(_records: &[DeviceRecord]) -> Result<Vec<PhysicalDriveInfo>> {
    Err(DeviceError::Unsupported("physical drive resolution"))
}

pub fn enumerate_physical_disks() -> Result<Vec<PhysicalDriveInfo>> {
    Err(DeviceError::Unsupported("physical disk enumeration"))
}
