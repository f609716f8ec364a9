use std::path::Path;

use devlink_core::{DeviceError, ReparseData, Result};

pub fn read_reparse_point(_path: &Path) -> Result<ReparseData> {
    Err(DeviceError::Unsupported("reparse points"))
}

pub fn is_junction(_path: &Path) -> Result<bool> {
    Err(DeviceError::Unsupported("reparse points"))
}

pub fn create_junction(_link: &Path, _target: &Path, _overwrite: bool) -> Result<()> {
    Err(DeviceError::Unsupported("junctions"))
}

pub fn delete_reparse_point(_path: &Path) -> Result<()> {
    Err(DeviceError::Unsupported("reparse points"))
}

pub fn delete_junction(_path: &Path) -> Result<()> {
    Err(DeviceError::Unsupported("junctions"))
}

pub fn set_compression(_path: &Path, _enabled: bool) -> Result<()> {
    Err(DeviceError::Unsupported("NTFS compression"))
}
