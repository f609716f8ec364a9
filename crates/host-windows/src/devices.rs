//! SetupAPI and configuration-manager backed device interface sets.

use std::mem::{offset_of, size_of};

use devlink_core::enumerate::{decode_registry_string, REG_SZ};
use devlink_core::{
    enumerate, DeviceError, DeviceInterfaceSet, DeviceRecord, DeviceTreeProvider, Host, OsCode,
    RegistryRead, Result,
};
use tracing::{debug, warn};
use uuid::Uuid;
use windows::core::{GUID, PCWSTR};
use windows::Win32::Devices::DeviceAndDriverInstallation::{
    CM_Connect_MachineW, CM_Disconnect_Machine, CM_Get_Device_ID_ExW, CM_Get_Parent_Ex,
    CM_MapCrToWin32Err, SetupDiDestroyDeviceInfoList, SetupDiEnumDeviceInterfaces,
    SetupDiGetClassDevsExW, SetupDiGetDeviceInterfaceDetailW, SetupDiGetDeviceRegistryPropertyW,
    CONFIGRET, CR_SUCCESS, DIGCF_DEVICEINTERFACE, DIGCF_PRESENT, HDEVINFO,
    SETUP_DI_REGISTRY_PROPERTY, SP_DEVICE_INTERFACE_DATA, SP_DEVICE_INTERFACE_DETAIL_DATA_W,
    SP_DEVINFO_DATA,
};
use windows::Win32::Foundation::HWND;

use crate::win::{from_guid, os_code, to_guid, wide};

/// MAX_DEVICE_ID_LEN plus the terminator.
const DEVICE_ID_CAPACITY: usize = 201;
const ERROR_GEN_FAILURE: u32 = 31;

fn config_code(cr: CONFIGRET) -> OsCode {
    OsCode(unsafe { CM_MapCrToWin32Err(cr, ERROR_GEN_FAILURE) })
}

fn unreachable(host: &Host, cr: CONFIGRET) -> DeviceError {
    DeviceError::HostUnreachable {
        host: host.to_string(),
        code: config_code(cr).0,
    }
}

/// A configuration-manager connection to a remote machine.
struct MachineConnection {
    handle: isize,
    host: String,
}

impl MachineConnection {
    fn connect(host: &Host) -> Result<Option<Self>> {
        let Some(unc) = host.unc_name() else {
            return Ok(None);
        };
        let w = wide(&unc);
        let mut handle = 0isize;
        let cr = unsafe { CM_Connect_MachineW(PCWSTR(w.as_ptr()), &mut handle) };
        if cr != CR_SUCCESS {
            warn!(%host, code = cr.0, "cannot connect to remote machine");
            return Err(unreachable(host, cr));
        }
        debug!(%host, "connected to remote machine");
        Ok(Some(Self {
            handle,
            host: host.to_string(),
        }))
    }
}

impl Drop for MachineConnection {
    fn drop(&mut self) {
        let cr = unsafe { CM_Disconnect_Machine(self.handle) };
        if cr != CR_SUCCESS {
            warn!(host = %self.host, code = cr.0, "disconnect from remote machine failed");
        }
    }
}

struct DeviceInfoList(HDEVINFO);

impl Drop for DeviceInfoList {
    fn drop(&mut self) {
        unsafe {
            let _ = SetupDiDestroyDeviceInfoList(self.0);
        }
    }
}

/// One interface of a SetupAPI set, with the device that exposes it.
pub struct InterfaceMember {
    devinfo: SP_DEVINFO_DATA,
    path: String,
}

/// Present interfaces of one class, optionally on a remote machine.
pub struct SetupDiInterfaceSet {
    // declared before `machine` so the list is destroyed first
    list: DeviceInfoList,
    interface_class: GUID,
    machine: Option<MachineConnection>,
}

impl SetupDiInterfaceSet {
    fn machine_handle(&self) -> isize {
        self.machine.as_ref().map(|machine| machine.handle).unwrap_or(0)
    }

    fn interface_detail(
        &self,
        interface: &SP_DEVICE_INTERFACE_DATA,
    ) -> std::result::Result<InterfaceMember, OsCode> {
        let mut required = 0u32;
        if let Err(err) = unsafe {
            SetupDiGetDeviceInterfaceDetailW(self.list.0, interface, None, 0, Some(&mut required), None)
        } {
            let code = os_code(&err);
            if !code.is_buffer_too_small() {
                return Err(code);
            }
        }

        // u32 storage keeps the detail struct aligned
        let words = (required as usize)
            .max(size_of::<SP_DEVICE_INTERFACE_DETAIL_DATA_W>())
            .div_ceil(4);
        let mut storage = vec![0u32; words];
        let detail = storage.as_mut_ptr() as *mut SP_DEVICE_INTERFACE_DETAIL_DATA_W;
        let mut devinfo = SP_DEVINFO_DATA {
            cbSize: size_of::<SP_DEVINFO_DATA>() as u32,
            ..Default::default()
        };
        unsafe {
            (*detail).cbSize = size_of::<SP_DEVICE_INTERFACE_DETAIL_DATA_W>() as u32;
            SetupDiGetDeviceInterfaceDetailW(
                self.list.0,
                interface,
                Some(detail),
                (words * 4) as u32,
                None,
                Some(&mut devinfo),
            )
        }
        .map_err(|err| os_code(&err))?;

        let bytes: Vec<u8> = storage.iter().flat_map(|word| word.to_le_bytes()).collect();
        let path_start = offset_of!(SP_DEVICE_INTERFACE_DETAIL_DATA_W, DevicePath);
        Ok(InterfaceMember {
            devinfo,
            path: decode_registry_string(REG_SZ, &bytes[path_start..]),
        })
    }
}

impl DeviceInterfaceSet for SetupDiInterfaceSet {
    type Member = InterfaceMember;

    fn interface_member(&mut self, index: u32) -> std::result::Result<InterfaceMember, OsCode> {
        let mut interface = SP_DEVICE_INTERFACE_DATA {
            cbSize: size_of::<SP_DEVICE_INTERFACE_DATA>() as u32,
            ..Default::default()
        };
        unsafe {
            SetupDiEnumDeviceInterfaces(self.list.0, None, &self.interface_class, index, &mut interface)
        }
        .map_err(|err| os_code(&err))?;
        self.interface_detail(&interface)
    }

    fn interface_path(&mut self, member: &InterfaceMember) -> std::result::Result<String, OsCode> {
        Ok(member.path.clone())
    }

    fn parent_instance_id(&mut self, member: &InterfaceMember) -> std::result::Result<String, OsCode> {
        let machine = self.machine_handle();
        let mut parent = 0u32;
        let cr = unsafe { CM_Get_Parent_Ex(&mut parent, member.devinfo.DevInst, 0, machine) };
        if cr != CR_SUCCESS {
            return Err(config_code(cr));
        }
        let mut buffer = [0u16; DEVICE_ID_CAPACITY];
        let cr = unsafe { CM_Get_Device_ID_ExW(parent, &mut buffer, 0, machine) };
        if cr != CR_SUCCESS {
            return Err(config_code(cr));
        }
        let end = buffer.iter().position(|&unit| unit == 0).unwrap_or(buffer.len());
        Ok(String::from_utf16_lossy(&buffer[..end]))
    }

    fn class_guid(&self, member: &InterfaceMember) -> Option<Uuid> {
        Some(from_guid(&member.devinfo.ClassGuid))
    }

    fn registry_property(
        &mut self,
        member: &InterfaceMember,
        code: u32,
        buffer: &mut [u8],
    ) -> std::result::Result<RegistryRead, OsCode> {
        let mut value_type = 0u32;
        let mut required = 0u32;
        unsafe {
            SetupDiGetDeviceRegistryPropertyW(
                self.list.0,
                &member.devinfo,
                SETUP_DI_REGISTRY_PROPERTY(code),
                Some(&mut value_type),
                Some(buffer),
                Some(&mut required),
            )
        }
        .map_err(|err| os_code(&err))?;
        Ok(RegistryRead {
            value_type,
            written: required as usize,
        })
    }
}

/// Opens SetupAPI interface sets, connecting to remote machines as needed.
#[derive(Debug, Default, Clone, Copy)]
pub struct SetupApiProvider;

impl DeviceTreeProvider for SetupApiProvider {
    type Set = SetupDiInterfaceSet;

    fn open_interface_set(&self, host: &Host, interface_class: Uuid) -> Result<SetupDiInterfaceSet> {
        let machine = MachineConnection::connect(host)?;
        let interface_class = to_guid(interface_class);
        let machine_name = host.unc_name().map(|unc| wide(&unc));
        let machine_ptr = machine_name
            .as_ref()
            .map(|w| PCWSTR(w.as_ptr()))
            .unwrap_or(PCWSTR::null());

        let handle = unsafe {
            SetupDiGetClassDevsExW(
                Some(&interface_class),
                PCWSTR::null(),
                HWND::default(),
                DIGCF_PRESENT | DIGCF_DEVICEINTERFACE,
                HDEVINFO::default(),
                machine_ptr,
                None,
            )
        }
        .map_err(|err| DeviceError::os("open device information set", host.to_string(), os_code(&err)))?;

        Ok(SetupDiInterfaceSet {
            list: DeviceInfoList(handle),
            interface_class,
            machine,
        })
    }
}

/// Collects every present interface of `interface_class` on `host`.
pub fn enumerate_devices(host: &Host, interface_class: Uuid) -> Result<Vec<DeviceRecord>> {
    enumerate(&SetupApiProvider, host, interface_class)?.collect()
}
