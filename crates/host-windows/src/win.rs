use std::ffi::c_void;

use devlink_core::{Access, ControlHandle, DeviceOpener, OsCode};
use tracing::trace;
use uuid::Uuid;
use windows::core::{GUID, PCWSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::Storage::FileSystem::{
    CreateFileW, FILE_FLAGS_AND_ATTRIBUTES, FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE,
    OPEN_EXISTING,
};
use windows::Win32::System::IO::DeviceIoControl;

pub(crate) const GENERIC_READ: u32 = 0x8000_0000;
pub(crate) const GENERIC_WRITE: u32 = 0x4000_0000;

pub(crate) fn wide(s: &str) -> Vec<u16> {
    use std::os::windows::prelude::*;
    std::ffi::OsStr::new(s)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

/// The Win32 error code carried by a `windows` error.
pub(crate) fn os_code(err: &windows::core::Error) -> OsCode {
    let hresult = err.code().0 as u32;
    if hresult & 0xFFFF_0000 == 0x8007_0000 {
        OsCode(hresult & 0xFFFF)
    } else {
        OsCode(hresult)
    }
}

pub(crate) fn to_guid(id: Uuid) -> GUID {
    GUID::from_u128(id.as_u128())
}

pub(crate) fn from_guid(guid: &GUID) -> Uuid {
    Uuid::from_fields(guid.data1, guid.data2, guid.data3, &guid.data4)
}

/// An open file or device, closed on drop.
pub struct DeviceHandle {
    handle: HANDLE,
    path: String,
}

impl DeviceHandle {
    pub(crate) fn open(
        path: &str,
        desired_access: u32,
        flags: FILE_FLAGS_AND_ATTRIBUTES,
    ) -> Result<Self, OsCode> {
        let w = wide(path);
        let handle = unsafe {
            CreateFileW(
                PCWSTR(w.as_ptr()),
                desired_access,
                FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
                None,
                OPEN_EXISTING,
                flags,
                HANDLE::default(),
            )
        }
        .map_err(|err| os_code(&err))?;
        trace!(%path, desired_access, "opened handle");
        Ok(Self {
            handle,
            path: path.to_string(),
        })
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.handle);
        }
    }
}

impl ControlHandle for DeviceHandle {
    fn target(&self) -> &str {
        &self.path
    }

    fn device_control(
        &self,
        control_code: u32,
        input: &[u8],
        output: &mut [u8],
    ) -> Result<usize, OsCode> {
        let input_ptr = (!input.is_empty()).then(|| input.as_ptr() as *const c_void);
        let output_len = output.len() as u32;
        let output_ptr = (!output.is_empty()).then(|| output.as_mut_ptr() as *mut c_void);
        let mut returned = 0u32;
        unsafe {
            DeviceIoControl(
                self.handle,
                control_code,
                input_ptr,
                input.len() as u32,
                output_ptr,
                output_len,
                Some(&mut returned),
                None,
            )
        }
        .map_err(|err| os_code(&err))?;
        Ok(returned as usize)
    }
}

/// Opens devices through `CreateFileW`.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsOpener;

impl DeviceOpener for WindowsOpener {
    type Handle = DeviceHandle;

    fn open(&self, path: &str, access: Access) -> Result<DeviceHandle, OsCode> {
        let rights = match access {
            Access::Metadata => 0,
            Access::ReadWrite => GENERIC_READ | GENERIC_WRITE,
        };
        DeviceHandle::open(path, rights, FILE_FLAGS_AND_ATTRIBUTES(0))
    }
}
