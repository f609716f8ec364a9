//! Junctions and other reparse points on NTFS directories.

use std::path::Path;

use devlink_core::ioctl::{
    FSCTL_DELETE_REPARSE_POINT, FSCTL_GET_REPARSE_POINT, FSCTL_SET_COMPRESSION,
    FSCTL_SET_REPARSE_POINT,
};
use devlink_core::reparse::{self, MAXIMUM_REPARSE_DATA_BUFFER_SIZE};
use devlink_core::{ControlHandle, ControlRequest, DeviceError, OsCode, ReparseData, Result};
use tracing::{debug, info, warn};
use windows::Win32::Storage::FileSystem::{FILE_FLAG_BACKUP_SEMANTICS, FILE_FLAG_OPEN_REPARSE_POINT};

use crate::win::{DeviceHandle, GENERIC_READ, GENERIC_WRITE};

const COMPRESSION_FORMAT_NONE: u16 = 0;
const COMPRESSION_FORMAT_DEFAULT: u16 = 1;

fn display(path: &Path) -> String {
    path.display().to_string()
}

fn io_failure(operation: &'static str, path: &Path, err: std::io::Error) -> DeviceError {
    let code = err.raw_os_error().map(|raw| OsCode(raw as u32)).unwrap_or(OsCode::INVALID_FUNCTION);
    DeviceError::os(operation, display(path), code)
}

/// Opens the reparse point itself rather than what it points at.
fn open_reparse_point(path: &Path, desired_access: u32) -> Result<DeviceHandle> {
    let target = display(path);
    DeviceHandle::open(
        &target,
        desired_access,
        FILE_FLAG_OPEN_REPARSE_POINT | FILE_FLAG_BACKUP_SEMANTICS,
    )
    .map_err(|code| DeviceError::open_failed(target, code))
}

fn read_from<H: ControlHandle + ?Sized>(handle: &H) -> Result<ReparseData> {
    let buffer = ControlRequest::new(FSCTL_GET_REPARSE_POINT)
        .initial_size(MAXIMUM_REPARSE_DATA_BUFFER_SIZE)
        .send(handle)?;
    reparse::decode(buffer.filled())
}

pub fn read_reparse_point(path: &Path) -> Result<ReparseData> {
    let handle = open_reparse_point(path, GENERIC_READ)?;
    read_from(&handle)
}

/// Whether `path` itself exists, without following a reparse point.
fn link_exists(path: &Path) -> Result<bool> {
    match std::fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(io_failure("query attributes", path, err)),
    }
}

/// False for plain directories, files and missing paths. A junction whose
/// target is gone is still a junction.
pub fn is_junction(path: &Path) -> Result<bool> {
    if !link_exists(path)? {
        return Ok(false);
    }
    match read_reparse_point(path) {
        Ok(data) => Ok(matches!(data, ReparseData::MountPoint { .. })),
        Err(DeviceError::Control { code, .. }) if code == OsCode::NOT_A_REPARSE_POINT => Ok(false),
        Err(DeviceError::UnrecognizedTag(_)) => Ok(false),
        Err(err) => Err(err),
    }
}

/// Creates the directory `path`, runs `fill` on it and removes the directory
/// again when `fill` fails.
fn with_new_directory<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    std::fs::create_dir_all(path).map_err(|err| io_failure("create directory", path, err))?;
    fill().inspect_err(|_| {
        if let Err(err) = std::fs::remove_dir(path) {
            warn!(path = %path.display(), error = %err, "cannot remove directory after failure");
        }
    })
}

fn set_mount_point(link: &Path, target: &Path) -> Result<()> {
    let request = reparse::encode(&display(target), true)?;
    let handle = open_reparse_point(link, GENERIC_READ | GENERIC_WRITE)?;
    ControlRequest::new(FSCTL_SET_REPARSE_POINT)
        .with_input(request.payload())
        .send_input_only(&handle)
}

/// Points the directory `link` at `target`, creating `link` when missing.
/// A directory created here is removed again if the junction cannot be set.
pub fn create_junction(link: &Path, target: &Path, overwrite: bool) -> Result<()> {
    let target = std::path::absolute(target).map_err(|err| io_failure("resolve target", target, err))?;
    if !target.is_dir() {
        return Err(DeviceError::os("create junction", display(&target), OsCode::FILE_NOT_FOUND));
    }

    match std::fs::symlink_metadata(link) {
        Ok(existing) => {
            if !overwrite || existing.is_file() {
                return Err(DeviceError::os("create junction", display(link), OsCode::ALREADY_EXISTS));
            }
            set_mount_point(link, &target)?;
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            with_new_directory(link, || set_mount_point(link, &target))?;
        }
        Err(err) => return Err(io_failure("query attributes", link, err)),
    }
    info!(link = %link.display(), target = %target.display(), "junction created");
    Ok(())
}

/// Removes the reparse point from `path`, whatever its tag. The file or
/// directory itself stays.
pub fn delete_reparse_point(path: &Path) -> Result<()> {
    let handle = open_reparse_point(path, GENERIC_READ | GENERIC_WRITE)?;
    let existing = read_from(&handle)?;
    let request = reparse::build_delete_request_for(existing.tag());
    ControlRequest::new(FSCTL_DELETE_REPARSE_POINT)
        .with_input(request.payload())
        .send_input_only(&handle)?;
    debug!(path = %path.display(), tag = existing.tag(), "reparse point deleted");
    Ok(())
}

/// Removes a junction and its directory. A missing path is not an error.
pub fn delete_junction(path: &Path) -> Result<()> {
    if !link_exists(path)? {
        return Ok(());
    }
    if !is_junction(path)? {
        return Err(DeviceError::os(
            "delete junction",
            display(path),
            OsCode::NOT_A_REPARSE_POINT,
        ));
    }
    delete_reparse_point(path)?;
    std::fs::remove_dir(path).map_err(|err| io_failure("remove directory", path, err))
}

/// Turns NTFS compression on or off for a file or directory.
pub fn set_compression(path: &Path, enabled: bool) -> Result<()> {
    let format = if enabled {
        COMPRESSION_FORMAT_DEFAULT
    } else {
        COMPRESSION_FORMAT_NONE
    };
    let input = format.to_le_bytes();
    let target = display(path);
    let handle = DeviceHandle::open(
        &target,
        GENERIC_READ | GENERIC_WRITE,
        FILE_FLAG_BACKUP_SEMANTICS,
    )
    .map_err(|code| DeviceError::open_failed(target, code))?;
    ControlRequest::new(FSCTL_SET_COMPRESSION)
        .with_input(&input)
        .send_input_only(&handle)?;
    debug!(path = %path.display(), enabled, "compression state set");
    Ok(())
}
