use devlink_core::{DeviceError, DeviceRecord, Host, Result};
use uuid::Uuid;

pub fn enumerate_devices(_host: &Host, _interface_class: Uuid) -> Result<Vec<DeviceRecord>> {
    Err(DeviceError::Unsupported("device interface enumeration"))
}
