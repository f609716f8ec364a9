//! Maps drive letters and device paths to the physical drive behind them.

use tracing::{debug, warn};

use crate::descriptor::{
    parse_device_number, parse_length_info, StorageDeviceDescriptor, StoragePropertyQuery,
    LENGTH_INFORMATION_SIZE, STORAGE_DEVICE_NUMBER_SIZE,
};
use crate::error::{DeviceError, OsCode, Result};
use crate::ioctl::{
    ControlHandle, ControlRequest, Growth, IOCTL_DISK_GET_LENGTH_INFO,
    IOCTL_STORAGE_GET_DEVICE_NUMBER, IOCTL_STORAGE_QUERY_PROPERTY,
};
use crate::model::{DeviceRecord, PhysicalDriveInfo, StorageDeviceNumber};

/// Rights requested when opening a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// No rights; enough for metadata queries.
    Metadata,
    /// Read and write, needed for the drive length.
    ReadWrite,
}

pub trait DeviceOpener {
    type Handle: ControlHandle;

    fn open(&self, path: &str, access: Access) -> std::result::Result<Self::Handle, OsCode>;
}

#[derive(Debug, Clone, Copy)]
pub struct ResolverConfig {
    /// Try read+write access on the physical drive before falling back.
    pub request_elevation: bool,
    pub descriptor_initial_size: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            request_elevation: true,
            descriptor_initial_size: 1024,
        }
    }
}

/// `\\.\<Letter>:` for a logical drive.
pub fn drive_letter_path(letter: char) -> Result<String> {
    if !letter.is_ascii_alphabetic() {
        return Err(DeviceError::InvalidDriveLetter(letter));
    }
    Ok(format!(r"\\.\{}:", letter.to_ascii_uppercase()))
}

/// Answers meaning the device has no storage device number, such as a
/// network-mapped or empty optical drive.
fn has_no_device_number(code: OsCode) -> bool {
    code == OsCode::INVALID_FUNCTION || code == OsCode::NOT_SUPPORTED || code == OsCode::NOT_READY
}

pub struct PhysicalDriveResolver<O> {
    opener: O,
    config: ResolverConfig,
}

impl<O: DeviceOpener> PhysicalDriveResolver<O> {
    pub fn new(opener: O) -> Self {
        Self::with_config(opener, ResolverConfig::default())
    }

    pub fn with_config(opener: O, config: ResolverConfig) -> Self {
        Self { opener, config }
    }

    pub fn opener(&self) -> &O {
        &self.opener
    }

    fn open(&self, path: &str, access: Access) -> Result<O::Handle> {
        self.opener
            .open(path, access)
            .map_err(|code| DeviceError::open_failed(path, code))
    }

    /// Opens read+write when allowed, otherwise with no rights.
    fn open_best(&self, path: &str) -> Result<(O::Handle, Access)> {
        if self.config.request_elevation {
            match self.opener.open(path, Access::ReadWrite) {
                Ok(handle) => return Ok((handle, Access::ReadWrite)),
                Err(code) if code.is_access_denied() => {
                    warn!(%path, "read/write access denied, drive size will be unknown");
                }
                Err(code) => return Err(DeviceError::open_failed(path, code)),
            }
        }
        Ok((self.open(path, Access::Metadata)?, Access::Metadata))
    }

    pub fn device_number<H: ControlHandle + ?Sized>(
        &self,
        handle: &H,
    ) -> Result<Option<StorageDeviceNumber>> {
        let request = ControlRequest::new(IOCTL_STORAGE_GET_DEVICE_NUMBER)
            .initial_size(STORAGE_DEVICE_NUMBER_SIZE)
            .growth(Growth::Add(128));
        match request.send(handle) {
            Ok(buffer) => parse_device_number(&buffer.data).map(Some),
            Err(DeviceError::Control { code, .. }) if has_no_device_number(code) => {
                debug!(device = handle.target(), %code, "no storage device number");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub fn descriptor<H: ControlHandle + ?Sized>(&self, handle: &H) -> Result<StorageDeviceDescriptor> {
        let query = StoragePropertyQuery::device_descriptor();
        let mut size = self.config.descriptor_initial_size;
        loop {
            let buffer = ControlRequest::new(IOCTL_STORAGE_QUERY_PROPERTY)
                .with_payload(&query)
                .initial_size(size)
                .growth(Growth::Double)
                .send(handle)?;
            let descriptor = StorageDeviceDescriptor::parse(&buffer.data)?;
            // the descriptor reports its own full size; re-ask when it was cut short
            if descriptor.size as usize <= buffer.capacity() {
                return Ok(descriptor);
            }
            debug!(from = buffer.capacity(), to = descriptor.size, "descriptor truncated");
            size = descriptor.size as usize;
        }
    }

    pub fn length<H: ControlHandle + ?Sized>(&self, handle: &H) -> Result<u64> {
        let buffer = ControlRequest::new(IOCTL_DISK_GET_LENGTH_INFO)
            .initial_size(LENGTH_INFORMATION_SIZE)
            .growth(Growth::Add(128))
            .send(handle)?;
        parse_length_info(&buffer.data)
    }

    /// Resolves the physical drive behind a drive letter. `Ok(None)` when the
    /// letter is not backed by a physical drive.
    pub fn resolve_drive_letter(&self, letter: char) -> Result<Option<PhysicalDriveInfo>> {
        let path = drive_letter_path(letter)?;
        let number = {
            let handle = self.open(&path, Access::Metadata)?;
            self.device_number(&handle)?
        };
        match number {
            Some(number) => self.physical_drive(number, None).map(Some),
            None => Ok(None),
        }
    }

    /// Resolves a device interface path, preferring `friendly_name` for the
    /// drive's name.
    pub fn resolve_device_path(
        &self,
        path: &str,
        friendly_name: Option<&str>,
    ) -> Result<Option<PhysicalDriveInfo>> {
        let number = {
            let (handle, _) = self.open_best(path)?;
            self.device_number(&handle)?
        };
        match number {
            Some(number) => self.physical_drive(number, friendly_name).map(Some),
            None => Ok(None),
        }
    }

    pub fn resolve_record(&self, record: &DeviceRecord) -> Result<Option<PhysicalDriveInfo>> {
        self.resolve_device_path(&record.device_path, Some(record.friendly_name()))
    }

    /// Resolves each record in order. Records without a device number and
    /// records whose device fails at the OS level are skipped; any other
    /// error ends the batch.
    pub fn resolve_records(&self, records: &[DeviceRecord]) -> Result<Vec<PhysicalDriveInfo>> {
        let mut drives = Vec::new();
        for record in records {
            match self.resolve_record(record) {
                Ok(Some(info)) => drives.push(info),
                Ok(None) => debug!(path = %record.device_path, "interface has no device number"),
                Err(err) if err.os_code().is_some() => {
                    warn!(path = %record.device_path, error = %err, "skipping device");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(drives)
    }

    /// Queries `\\.\PhysicalDrive<N>` for its descriptor and, with elevated
    /// access, its length.
    pub fn physical_drive(
        &self,
        number: StorageDeviceNumber,
        friendly_name: Option<&str>,
    ) -> Result<PhysicalDriveInfo> {
        let path = number.physical_drive_path();
        let (handle, access) = self.open_best(&path)?;
        let descriptor = self.descriptor(&handle)?;
        let total_size = match access {
            Access::ReadWrite => Some(self.length(&handle)?),
            Access::Metadata => None,
        };

        let name = match friendly_name.map(str::trim) {
            Some(friendly) if !friendly.is_empty() => friendly.to_string(),
            _ => descriptor.product_id.clone(),
        };

        Ok(PhysicalDriveInfo {
            device_number: number.device_number,
            partition_number: number.partition_number,
            bus_type: descriptor.bus_type,
            is_removable: descriptor.removable_media,
            supports_command_queueing: descriptor.command_queueing,
            serial_number: descriptor.numeric_serial(),
            vendor_id: descriptor.vendor_id,
            product_revision: descriptor.product_revision,
            name,
            total_size,
        })
    }
}
