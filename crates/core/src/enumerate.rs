//! Pull-based walk over the device interfaces of one interface class.

use std::collections::BTreeMap;

use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::{DeviceError, OsCode, Result};
use crate::ioctl::{grow_until_fits, Growth};
use crate::model::{DeviceProperty, DeviceRecord, Host, BASE_CONTAINER_ID_PROPERTY};

pub const REG_SZ: u32 = 1;
pub const REG_EXPAND_SZ: u32 = 2;
pub const REG_MULTI_SZ: u32 = 7;

/// Separator used when a multi-string property is flattened.
pub const MULTI_SZ_SEPARATOR: &str = ";";

/// What a registry property read wrote into the caller's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryRead {
    pub value_type: u32,
    pub written: usize,
}

/// A device-information set scoped to present interfaces of one class.
///
/// The set owns whatever platform resources back it and releases them on
/// drop. Borrowing a set (`&mut S`) leaves release with the owner.
pub trait DeviceInterfaceSet {
    type Member;

    /// The interface at `index`. `OsCode::NO_MORE_ITEMS` ends the walk.
    fn interface_member(&mut self, index: u32) -> std::result::Result<Self::Member, OsCode>;

    /// The interface's symbolic device path.
    fn interface_path(&mut self, member: &Self::Member) -> std::result::Result<String, OsCode>;

    /// Instance id of the device one level up the device tree.
    fn parent_instance_id(&mut self, member: &Self::Member) -> std::result::Result<String, OsCode>;

    fn class_guid(&self, member: &Self::Member) -> Option<Uuid>;

    /// Reads registry property `code` into `buffer`.
    fn registry_property(
        &mut self,
        member: &Self::Member,
        code: u32,
        buffer: &mut [u8],
    ) -> std::result::Result<RegistryRead, OsCode>;
}

impl<S: DeviceInterfaceSet + ?Sized> DeviceInterfaceSet for &mut S {
    type Member = S::Member;

    fn interface_member(&mut self, index: u32) -> std::result::Result<Self::Member, OsCode> {
        (**self).interface_member(index)
    }

    fn interface_path(&mut self, member: &Self::Member) -> std::result::Result<String, OsCode> {
        (**self).interface_path(member)
    }

    fn parent_instance_id(&mut self, member: &Self::Member) -> std::result::Result<String, OsCode> {
        (**self).parent_instance_id(member)
    }

    fn class_guid(&self, member: &Self::Member) -> Option<Uuid> {
        (**self).class_guid(member)
    }

    fn registry_property(
        &mut self,
        member: &Self::Member,
        code: u32,
        buffer: &mut [u8],
    ) -> std::result::Result<RegistryRead, OsCode> {
        (**self).registry_property(member, code, buffer)
    }
}

/// Opens interface sets on a host.
pub trait DeviceTreeProvider {
    type Set: DeviceInterfaceSet;

    /// Fails with `DeviceError::HostUnreachable` when a remote host cannot be
    /// connected to.
    fn open_interface_set(&self, host: &Host, interface_class: Uuid) -> Result<Self::Set>;
}

#[derive(Debug, Clone, Copy)]
pub struct EnumeratorConfig {
    pub property_initial_size: usize,
}

impl Default for EnumeratorConfig {
    fn default() -> Self {
        Self {
            property_initial_size: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Next(u32),
    Exhausted,
    Failed,
}

pub struct DeviceEnumerator<S> {
    set: S,
    host: Host,
    interface_class: Uuid,
    config: EnumeratorConfig,
    state: State,
}

pub fn enumerate<P: DeviceTreeProvider>(
    provider: &P,
    host: &Host,
    interface_class: Uuid,
) -> Result<DeviceEnumerator<P::Set>> {
    let set = provider.open_interface_set(host, interface_class)?;
    Ok(DeviceEnumerator::new(set, host.clone(), interface_class))
}

/// Not-found answers for a registry property.
fn is_missing_property(code: OsCode) -> bool {
    code == OsCode::INVALID_DATA || code == OsCode::NOT_FOUND
}

/// Decodes a REG_SZ / REG_EXPAND_SZ / REG_MULTI_SZ value stored as UTF-16.
pub fn decode_registry_string(value_type: u32, raw: &[u8]) -> String {
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    if value_type == REG_MULTI_SZ {
        units
            .split(|&unit| unit == 0)
            .filter(|part| !part.is_empty())
            .map(String::from_utf16_lossy)
            .collect::<Vec<_>>()
            .join(MULTI_SZ_SEPARATOR)
    } else {
        let end = units.iter().position(|&unit| unit == 0).unwrap_or(units.len());
        String::from_utf16_lossy(&units[..end])
    }
}

impl<S: DeviceInterfaceSet> DeviceEnumerator<S> {
    pub fn new(set: S, host: Host, interface_class: Uuid) -> Self {
        Self::with_config(set, host, interface_class, EnumeratorConfig::default())
    }

    pub fn with_config(set: S, host: Host, interface_class: Uuid, config: EnumeratorConfig) -> Self {
        Self {
            set,
            host,
            interface_class,
            config,
            state: State::Next(0),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == State::Exhausted
    }

    pub fn is_failed(&self) -> bool {
        self.state == State::Failed
    }

    fn context(&self, index: u32) -> String {
        format!("{} interface {} #{}", self.host, self.interface_class, index)
    }

    fn property(&mut self, member: &S::Member, code: u32, index: u32) -> Result<String> {
        let mut value_type = REG_SZ;
        let set = &mut self.set;
        let read = grow_until_fits(self.config.property_initial_size, Growth::Double, |buffer| {
            set.registry_property(member, code, buffer).map(|read| {
                value_type = read.value_type;
                read.written
            })
        });
        match read {
            Ok(buffer) => Ok(decode_registry_string(value_type, buffer.filled())),
            Err((code, _)) if is_missing_property(code) => Ok(String::new()),
            Err((code, _)) => Err(DeviceError::os("registry property", self.context(index), code)),
        }
    }

    fn record_at(&mut self, index: u32) -> Result<Option<DeviceRecord>> {
        trace!(index, "enumerating device interface");
        let member = match self.set.interface_member(index) {
            Ok(member) => member,
            Err(OsCode::NO_MORE_ITEMS) => return Ok(None),
            Err(code) => return Err(DeviceError::os("enumerate interfaces", self.context(index), code)),
        };

        let device_path = self
            .set
            .interface_path(&member)
            .map_err(|code| DeviceError::os("interface detail", self.context(index), code))?;
        let instance_id = self
            .set
            .parent_instance_id(&member)
            .map_err(|code| DeviceError::os("parent lookup", self.context(index), code))?;
        let class_guid = self.set.class_guid(&member).filter(|guid| !guid.is_nil());

        let mut properties = BTreeMap::new();
        for property in DeviceProperty::ALL {
            let value = self.property(&member, property.registry_code(), index)?;
            properties.insert(property, value);
        }
        let container = self.property(&member, BASE_CONTAINER_ID_PROPERTY, index)?;
        let base_container_id = Uuid::parse_str(container.trim())
            .ok()
            .filter(|guid| !guid.is_nil());

        debug!(index, %device_path, %instance_id, "device interface enumerated");
        Ok(Some(DeviceRecord {
            device_path,
            instance_id,
            class_guid,
            base_container_id,
            properties,
        }))
    }
}

impl<S: DeviceInterfaceSet> Iterator for DeviceEnumerator<S> {
    type Item = Result<DeviceRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let State::Next(index) = self.state else {
            return None;
        };
        match self.record_at(index) {
            Ok(Some(record)) => {
                self.state = State::Next(index + 1);
                Some(Ok(record))
            }
            Ok(None) => {
                self.state = State::Exhausted;
                None
            }
            Err(err) => {
                self.state = State::Failed;
                Some(Err(err))
            }
        }
    }
}
