#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use devlink_core::enumerate::{REG_MULTI_SZ, REG_SZ};
use devlink_core::ioctl::{
    IOCTL_DISK_GET_LENGTH_INFO, IOCTL_STORAGE_GET_DEVICE_NUMBER, IOCTL_STORAGE_QUERY_PROPERTY,
};
use devlink_core::{
    Access, ControlHandle, DeviceError, DeviceInterfaceSet, DeviceOpener, DeviceTreeProvider,
    Host, OsCode, RegistryRead, Result,
};
use uuid::Uuid;

pub fn utf16z(value: &str) -> Vec<u8> {
    value
        .encode_utf16()
        .chain(std::iter::once(0))
        .flat_map(|unit| unit.to_le_bytes())
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct SimDevice {
    pub path: String,
    pub parent_instance_id: String,
    pub class_guid: Option<Uuid>,
    pub properties: HashMap<u32, (u32, Vec<u8>)>,
}

impl SimDevice {
    pub fn new(index: usize) -> Self {
        Self {
            path: format!(r"\\?\usbstor#disk&ven_sim#{index}#{{53f56307-b6bf-11d0-94f2-00a0c91efb8b}}"),
            parent_instance_id: format!(r"USB\VID_0781&PID_5583\{index:04}"),
            class_guid: Some(Uuid::from_u128(0x4d36e967_e325_11ce_bfc1_08002be10318)),
            properties: HashMap::new(),
        }
    }

    pub fn with_string(mut self, code: u32, value: &str) -> Self {
        self.properties.insert(code, (REG_SZ, utf16z(value)));
        self
    }

    pub fn with_multi(mut self, code: u32, values: &[&str]) -> Self {
        let mut raw = Vec::new();
        for value in values {
            raw.extend(utf16z(value));
        }
        raw.extend_from_slice(&[0, 0]);
        self.properties.insert(code, (REG_MULTI_SZ, raw));
        self
    }
}

/// Tracks release of the simulated platform resources.
#[derive(Debug, Clone, Default)]
pub struct ReleaseLog {
    pub set_released: Rc<Cell<u32>>,
    pub connection_released: Rc<Cell<u32>>,
}

pub struct SimConnection {
    log: ReleaseLog,
}

impl Drop for SimConnection {
    fn drop(&mut self) {
        let released = &self.log.connection_released;
        released.set(released.get() + 1);
    }
}

pub struct SimulatedSet {
    pub devices: Vec<SimDevice>,
    /// Index at which `interface_member` fails with the given code.
    pub fail_member: Option<(u32, OsCode)>,
    /// Registry property code that fails with the given code.
    pub fail_property: Option<(u32, OsCode)>,
    pub visited: Rc<RefCell<Vec<u32>>>,
    pub property_buffer_sizes: Rc<RefCell<Vec<usize>>>,
    log: ReleaseLog,
    // dropped after the set, like a real info list and its machine handle
    _connection: Option<SimConnection>,
}

impl SimulatedSet {
    pub fn new(devices: Vec<SimDevice>, log: ReleaseLog) -> Self {
        Self {
            devices,
            fail_member: None,
            fail_property: None,
            visited: Rc::default(),
            property_buffer_sizes: Rc::default(),
            log,
            _connection: None,
        }
    }
}

impl Drop for SimulatedSet {
    fn drop(&mut self) {
        let released = &self.log.set_released;
        released.set(released.get() + 1);
    }
}

impl DeviceInterfaceSet for SimulatedSet {
    type Member = usize;

    fn interface_member(&mut self, index: u32) -> std::result::Result<usize, OsCode> {
        self.visited.borrow_mut().push(index);
        if let Some((at, code)) = self.fail_member {
            if at == index {
                return Err(code);
            }
        }
        if (index as usize) < self.devices.len() {
            Ok(index as usize)
        } else {
            Err(OsCode::NO_MORE_ITEMS)
        }
    }

    fn interface_path(&mut self, member: &usize) -> std::result::Result<String, OsCode> {
        Ok(self.devices[*member].path.clone())
    }

    fn parent_instance_id(&mut self, member: &usize) -> std::result::Result<String, OsCode> {
        Ok(self.devices[*member].parent_instance_id.clone())
    }

    fn class_guid(&self, member: &usize) -> Option<Uuid> {
        self.devices[*member].class_guid
    }

    fn registry_property(
        &mut self,
        member: &usize,
        code: u32,
        buffer: &mut [u8],
    ) -> std::result::Result<RegistryRead, OsCode> {
        self.property_buffer_sizes.borrow_mut().push(buffer.len());
        if let Some((failing, os)) = self.fail_property {
            if failing == code {
                return Err(os);
            }
        }
        let Some((value_type, data)) = self.devices[*member].properties.get(&code) else {
            return Err(OsCode::INVALID_DATA);
        };
        if buffer.len() < data.len() {
            return Err(OsCode::INSUFFICIENT_BUFFER);
        }
        buffer[..data.len()].copy_from_slice(data);
        Ok(RegistryRead {
            value_type: *value_type,
            written: data.len(),
        })
    }
}

pub struct SimProvider {
    pub devices: Vec<SimDevice>,
    pub reachable_remotes: Vec<String>,
    pub fail_member: Option<(u32, OsCode)>,
    pub log: ReleaseLog,
}

impl DeviceTreeProvider for SimProvider {
    type Set = SimulatedSet;

    fn open_interface_set(&self, host: &Host, _interface_class: Uuid) -> Result<SimulatedSet> {
        let connection = match host {
            Host::Local => None,
            Host::Remote(name) if self.reachable_remotes.contains(name) => Some(SimConnection {
                log: self.log.clone(),
            }),
            Host::Remote(name) => {
                return Err(DeviceError::HostUnreachable {
                    host: name.clone(),
                    code: 0x3B,
                })
            }
        };
        let mut set = SimulatedSet::new(self.devices.clone(), self.log.clone());
        set.fail_member = self.fail_member;
        set._connection = connection;
        Ok(set)
    }
}

#[derive(Debug, Clone)]
pub struct SimDrive {
    pub device_number: u32,
    pub partition_number: i32,
    pub letter: Option<char>,
    pub interface_path: Option<String>,
    pub descriptor: Vec<u8>,
    pub length: u64,
}

#[derive(Debug, Clone)]
enum Target {
    /// A volume or interface path; `None` when it has no device number.
    Logical(Option<(u32, i32)>),
    Physical(SimDrive),
}

pub struct SimHandle {
    path: String,
    access: Access,
    target: Target,
    /// The drive has no media, so its length cannot be read.
    no_media: bool,
    pub calls: Rc<RefCell<Vec<(u32, usize)>>>,
}

impl ControlHandle for SimHandle {
    fn target(&self) -> &str {
        &self.path
    }

    fn device_control(
        &self,
        control_code: u32,
        _input: &[u8],
        output: &mut [u8],
    ) -> std::result::Result<usize, OsCode> {
        self.calls.borrow_mut().push((control_code, output.len()));
        match (control_code, &self.target) {
            (IOCTL_STORAGE_GET_DEVICE_NUMBER, Target::Logical(Some((number, partition)))) => {
                if output.len() < 12 {
                    return Err(OsCode::INSUFFICIENT_BUFFER);
                }
                output[0..4].copy_from_slice(&7u32.to_le_bytes());
                output[4..8].copy_from_slice(&number.to_le_bytes());
                output[8..12].copy_from_slice(&(*partition as u32).to_le_bytes());
                Ok(12)
            }
            (IOCTL_STORAGE_GET_DEVICE_NUMBER, Target::Physical(drive)) => {
                output[4..8].copy_from_slice(&drive.device_number.to_le_bytes());
                output[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
                Ok(12)
            }
            (IOCTL_STORAGE_GET_DEVICE_NUMBER, Target::Logical(None)) => Err(OsCode::INVALID_FUNCTION),
            (IOCTL_STORAGE_QUERY_PROPERTY, Target::Physical(drive)) => {
                // the fixed part must fit; longer descriptors are cut short
                if output.len() < 36 {
                    return Err(OsCode::INSUFFICIENT_BUFFER);
                }
                let n = output.len().min(drive.descriptor.len());
                output[..n].copy_from_slice(&drive.descriptor[..n]);
                Ok(n)
            }
            (IOCTL_DISK_GET_LENGTH_INFO, Target::Physical(drive)) => {
                if self.access != Access::ReadWrite {
                    return Err(OsCode::ACCESS_DENIED);
                }
                if self.no_media {
                    return Err(OsCode::NOT_READY);
                }
                output[..8].copy_from_slice(&(drive.length as i64).to_le_bytes());
                Ok(8)
            }
            _ => Err(OsCode::INVALID_FUNCTION),
        }
    }
}

pub struct SimOpener {
    pub drives: Vec<SimDrive>,
    /// Letters that exist but have no physical drive behind them.
    pub network_letters: Vec<char>,
    /// Device numbers of drives with no media inserted.
    pub no_media: Vec<u32>,
    pub allow_write: bool,
    pub opened: RefCell<Vec<(String, Access)>>,
    pub calls: Rc<RefCell<Vec<(u32, usize)>>>,
}

impl SimOpener {
    pub fn new(drives: Vec<SimDrive>, allow_write: bool) -> Self {
        Self {
            drives,
            network_letters: Vec::new(),
            no_media: Vec::new(),
            allow_write,
            opened: RefCell::new(Vec::new()),
            calls: Rc::default(),
        }
    }

    fn find(&self, path: &str) -> Option<Target> {
        for drive in &self.drives {
            if path == format!(r"\\.\PhysicalDrive{}", drive.device_number) {
                return Some(Target::Physical(drive.clone()));
            }
            let by_letter = drive
                .letter
                .map(|letter| path == format!(r"\\.\{letter}:"))
                .unwrap_or(false);
            if by_letter || drive.interface_path.as_deref() == Some(path) {
                return Some(Target::Logical(Some((drive.device_number, drive.partition_number))));
            }
        }
        self.network_letters
            .iter()
            .any(|letter| path == format!(r"\\.\{letter}:"))
            .then_some(Target::Logical(None))
    }
}

impl DeviceOpener for SimOpener {
    type Handle = SimHandle;

    fn open(&self, path: &str, access: Access) -> std::result::Result<SimHandle, OsCode> {
        let target = self.find(path).ok_or(OsCode::FILE_NOT_FOUND)?;
        if access == Access::ReadWrite && !self.allow_write {
            return Err(OsCode::ACCESS_DENIED);
        }
        self.opened.borrow_mut().push((path.to_string(), access));
        let no_media = matches!(&target, Target::Physical(drive) if self.no_media.contains(&drive.device_number));
        Ok(SimHandle {
            path: path.to_string(),
            access,
            target,
            no_media,
            calls: self.calls.clone(),
        })
    }
}

/// Lays out a STORAGE_DEVICE_DESCRIPTOR with its strings after the fixed part.
pub fn descriptor_bytes(vendor: &str, product: &str, revision: &str, serial: &str, bus_type: u32) -> Vec<u8> {
    let mut raw = vec![0u8; 36];
    let mut strings: Vec<u8> = Vec::new();
    for (field, value) in [(12usize, vendor), (16, product), (20, revision), (24, serial)] {
        if value.is_empty() {
            continue;
        }
        let at = (36 + strings.len()) as u32;
        raw[field..field + 4].copy_from_slice(&at.to_le_bytes());
        strings.extend_from_slice(value.as_bytes());
        strings.push(0);
    }
    raw.extend_from_slice(&strings);
    let size = raw.len() as u32;
    raw[0..4].copy_from_slice(&1u32.to_le_bytes());
    raw[4..8].copy_from_slice(&size.to_le_bytes());
    raw[28..32].copy_from_slice(&bus_type.to_le_bytes());
    raw
}
