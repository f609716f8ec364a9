use std::fmt;

use thiserror::Error;

/// A raw Win32 error code as reported by the platform layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OsCode(pub u32);

impl OsCode {
    pub const INVALID_FUNCTION: OsCode = OsCode(1);
    pub const FILE_NOT_FOUND: OsCode = OsCode(2);
    pub const ACCESS_DENIED: OsCode = OsCode(5);
    pub const INVALID_DATA: OsCode = OsCode(13);
    pub const NOT_READY: OsCode = OsCode(21);
    pub const NOT_SUPPORTED: OsCode = OsCode(50);
    pub const INSUFFICIENT_BUFFER: OsCode = OsCode(122);
    pub const ALREADY_EXISTS: OsCode = OsCode(183);
    pub const MORE_DATA: OsCode = OsCode(234);
    pub const NO_MORE_ITEMS: OsCode = OsCode(259);
    pub const NOT_FOUND: OsCode = OsCode(1168);
    pub const NOT_A_REPARSE_POINT: OsCode = OsCode(4390);

    /// Both codes mean the output buffer must grow before the call can succeed.
    pub fn is_buffer_too_small(self) -> bool {
        self == Self::INSUFFICIENT_BUFFER || self == Self::MORE_DATA
    }

    pub fn is_access_denied(self) -> bool {
        self == Self::ACCESS_DENIED
    }
}

impl fmt::Display for OsCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "os error {}", self.0)
    }
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("control request {control_code:#010x} on {target} failed with a {buffer_size} byte buffer: {code}")]
    Control {
        control_code: u32,
        target: String,
        buffer_size: usize,
        code: OsCode,
    },

    #[error("{operation} failed for {target}: {code}")]
    Os {
        operation: &'static str,
        target: String,
        code: OsCode,
    },

    #[error("host {host} is unreachable (config manager code {code})")]
    HostUnreachable { host: String, code: u32 },

    #[error("access denied opening {path}: {code}")]
    AccessDenied { path: String, code: OsCode },

    #[error("unrecognized reparse tag {0:#010x}")]
    UnrecognizedTag(u32),

    #[error("malformed {what}: needed {needed} bytes, {available} available")]
    Malformed {
        what: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("reparse target needs {bytes} bytes, limit is {limit}")]
    TargetTooLong { bytes: usize, limit: usize },

    #[error("invalid drive letter {0:?}")]
    InvalidDriveLetter(char),

    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}

impl DeviceError {
    pub fn os(operation: &'static str, target: impl Into<String>, code: OsCode) -> Self {
        DeviceError::Os {
            operation,
            target: target.into(),
            code,
        }
    }

    /// Maps an open failure, keeping access denial distinguishable.
    pub fn open_failed(path: impl Into<String>, code: OsCode) -> Self {
        let path = path.into();
        if code.is_access_denied() {
            DeviceError::AccessDenied { path, code }
        } else {
            DeviceError::os("open", path, code)
        }
    }

    /// The underlying platform code, when the failure came from the platform.
    pub fn os_code(&self) -> Option<OsCode> {
        match self {
            DeviceError::Control { code, .. }
            | DeviceError::Os { code, .. }
            | DeviceError::AccessDenied { code, .. } => Some(*code),
            DeviceError::HostUnreachable { code, .. } => Some(OsCode(*code)),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;
