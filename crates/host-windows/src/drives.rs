use devlink_core::{
    DeviceRecord, Host, InterfaceClass, PhysicalDriveInfo, PhysicalDriveResolver, ResolverConfig,
    Result,
};
use tracing::{debug, warn};
use windows::Win32::Storage::FileSystem::GetLogicalDrives;

use crate::devices::enumerate_devices;
use crate::win::WindowsOpener;

pub fn resolver() -> PhysicalDriveResolver<WindowsOpener> {
    PhysicalDriveResolver::with_config(WindowsOpener, ResolverConfig::default())
}

/// Letters of the logical drives currently present, in order.
pub fn logical_drive_letters() -> Vec<char> {
    let mask = unsafe { GetLogicalDrives() };
    ('A'..='Z')
        .enumerate()
        .filter(|(idx, _)| mask & (1u32 << idx) != 0)
        .map(|(_, letter)| letter)
        .collect()
}

pub fn resolve_drive_letter(letter: char) -> Result<Option<PhysicalDriveInfo>> {
    resolver().resolve_drive_letter(letter)
}

/// Resolves every present letter, skipping the ones with no physical drive
/// behind them and the ones that cannot be opened.
pub fn resolve_all_drive_letters() -> Result<Vec<PhysicalDriveInfo>> {
    let resolver = resolver();
    let mut drives = Vec::new();
    for letter in logical_drive_letters() {
        match resolver.resolve_drive_letter(letter) {
            Ok(Some(info)) => drives.push(info),
            Ok(None) => debug!(%letter, "no physical drive behind letter"),
            Err(err) if err.os_code().is_some() => {
                warn!(%letter, error = %err, "skipping drive letter");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(drives)
}

/// Resolves local interface records, naming each drive after its record.
/// Devices that fail to resolve are skipped.
pub fn resolve_records(records: &[DeviceRecord]) -> Result<Vec<PhysicalDriveInfo>> {
    resolver().resolve_records(records)
}

/// Every local disk interface, resolved to its physical drive.
pub fn enumerate_physical_disks() -> Result<Vec<PhysicalDriveInfo>> {
    resolve_records(&enumerate_devices(&Host::Local, InterfaceClass::Disk.guid())?)
}
