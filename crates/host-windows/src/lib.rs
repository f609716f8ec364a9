//! Win32 backends for devlink-core. Other targets build stubs that report
//! `DeviceError::Unsupported`.

#[cfg(windows)]
mod win;

#[cfg(windows)]
mod devices;
#[cfg(not(windows))]
#[path = "devices_stub.rs"]
mod devices;

#[cfg(windows)]
mod drives;
#[cfg(not(windows))]
#[path = "drives_stub.rs"]
mod drives;

#[cfg(windows)]
mod reparse;
#[cfg(not(windows))]
#[path = "reparse_stub.rs"]
mod reparse;

#[cfg(windows)]
pub use devices::{InterfaceMember, SetupApiProvider, SetupDiInterfaceSet};
pub use devices::enumerate_devices;
#[cfg(windows)]
pub use drives::resolver;
pub use drives::{
    enumerate_physical_disks, logical_drive_letters, resolve_all_drive_letters,
    resolve_drive_letter, resolve_records,
};
pub use reparse::{
    create_junction, delete_junction, delete_reparse_point, is_junction, read_reparse_point,
    set_compression,
};
#[cfg(windows)]
pub use win::{DeviceHandle, WindowsOpener};
