//! Storage query payloads and the responses they come back with.

use crate::error::{DeviceError, Result};
use crate::ioctl::Marshal;
use crate::model::{StorageBusType, StorageDeviceNumber};

pub const STORAGE_DEVICE_PROPERTY: u32 = 0;
pub const PROPERTY_STANDARD_QUERY: u32 = 0;

/// STORAGE_PROPERTY_QUERY, 12 bytes including trailing padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoragePropertyQuery {
    pub property_id: u32,
    pub query_type: u32,
}

impl StoragePropertyQuery {
    pub const SIZE: usize = 12;

    pub fn device_descriptor() -> Self {
        Self {
            property_id: STORAGE_DEVICE_PROPERTY,
            query_type: PROPERTY_STANDARD_QUERY,
        }
    }
}

impl Marshal for StoragePropertyQuery {
    fn marshal(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.property_id.to_le_bytes());
        out[4..8].copy_from_slice(&self.query_type.to_le_bytes());
        out
    }
}

/// STORAGE_DEVICE_DESCRIPTOR with its trailing strings resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageDeviceDescriptor {
    pub size: u32,
    pub device_type: u8,
    pub removable_media: bool,
    pub command_queueing: bool,
    pub vendor_id: String,
    pub product_id: String,
    pub product_revision: String,
    pub serial_number: String,
    pub bus_type: StorageBusType,
}

mod offsets {
    pub const SIZE: usize = 4;
    pub const DEVICE_TYPE: usize = 8;
    pub const REMOVABLE_MEDIA: usize = 10;
    pub const COMMAND_QUEUEING: usize = 11;
    pub const VENDOR_ID_OFFSET: usize = 12;
    pub const PRODUCT_ID_OFFSET: usize = 16;
    pub const PRODUCT_REVISION_OFFSET: usize = 20;
    pub const SERIAL_NUMBER_OFFSET: usize = 24;
    pub const BUS_TYPE: usize = 28;
    pub const FIXED_END: usize = 36;
}

fn u32_at(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Reads the NUL-terminated ANSI string at `offset`. Zero means absent.
fn ansi_at(buf: &[u8], offset: u32) -> String {
    let offset = offset as usize;
    if offset == 0 || offset >= buf.len() {
        return String::new();
    }
    let tail = &buf[offset..];
    let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    String::from_utf8_lossy(&tail[..end]).trim().to_string()
}

impl StorageDeviceDescriptor {
    /// Only the fixed part is required; string offsets pointing past `raw`
    /// read as empty.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < offsets::FIXED_END {
            return Err(DeviceError::Malformed {
                what: "storage device descriptor",
                needed: offsets::FIXED_END,
                available: raw.len(),
            });
        }
        Ok(Self {
            size: u32_at(raw, offsets::SIZE),
            device_type: raw[offsets::DEVICE_TYPE],
            removable_media: raw[offsets::REMOVABLE_MEDIA] != 0,
            command_queueing: raw[offsets::COMMAND_QUEUEING] != 0,
            vendor_id: ansi_at(raw, u32_at(raw, offsets::VENDOR_ID_OFFSET)),
            product_id: ansi_at(raw, u32_at(raw, offsets::PRODUCT_ID_OFFSET)),
            product_revision: ansi_at(raw, u32_at(raw, offsets::PRODUCT_REVISION_OFFSET)),
            serial_number: ansi_at(raw, u32_at(raw, offsets::SERIAL_NUMBER_OFFSET)),
            bus_type: StorageBusType::from(u32_at(raw, offsets::BUS_TYPE)),
        })
    }

    /// The serial number as an integer, if it is one.
    pub fn numeric_serial(&self) -> Option<u64> {
        self.serial_number.trim().parse().ok()
    }
}

/// STORAGE_DEVICE_NUMBER: device type, device number, partition number.
pub const STORAGE_DEVICE_NUMBER_SIZE: usize = 12;

pub fn parse_device_number(raw: &[u8]) -> Result<StorageDeviceNumber> {
    if raw.len() < STORAGE_DEVICE_NUMBER_SIZE {
        return Err(DeviceError::Malformed {
            what: "storage device number",
            needed: STORAGE_DEVICE_NUMBER_SIZE,
            available: raw.len(),
        });
    }
    Ok(StorageDeviceNumber {
        device_number: u32_at(raw, 4),
        partition_number: u32_at(raw, 8) as i32,
    })
}

/// GET_LENGTH_INFORMATION.
pub const LENGTH_INFORMATION_SIZE: usize = 8;

pub fn parse_length_info(raw: &[u8]) -> Result<u64> {
    if raw.len() < LENGTH_INFORMATION_SIZE {
        return Err(DeviceError::Malformed {
            what: "length information",
            needed: LENGTH_INFORMATION_SIZE,
            available: raw.len(),
        });
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&raw[..8]);
    Ok(i64::from_le_bytes(bytes).max(0) as u64)
}
