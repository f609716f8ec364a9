//! Control requests whose response size is discovered by retrying with a
//! larger buffer.

use std::borrow::Cow;

use tracing::debug;

use crate::error::{DeviceError, OsCode, Result};

pub const IOCTL_STORAGE_QUERY_PROPERTY: u32 = 0x002D_1400;
pub const IOCTL_STORAGE_GET_DEVICE_NUMBER: u32 = 0x002D_1080;
pub const IOCTL_DISK_GET_LENGTH_INFO: u32 = 0x0007_405C;
pub const FSCTL_SET_REPARSE_POINT: u32 = 0x0009_00A4;
pub const FSCTL_GET_REPARSE_POINT: u32 = 0x0009_00A8;
pub const FSCTL_DELETE_REPARSE_POINT: u32 = 0x0009_00AC;
pub const FSCTL_SET_COMPRESSION: u32 = 0x0009_C040;

/// An open device or file that accepts control requests.
pub trait ControlHandle {
    /// Name used in error messages, usually the path the handle was opened from.
    fn target(&self) -> &str;

    /// Issues one control request. Returns the number of bytes written to `output`.
    fn device_control(
        &self,
        control_code: u32,
        input: &[u8],
        output: &mut [u8],
    ) -> std::result::Result<usize, OsCode>;
}

impl<H: ControlHandle + ?Sized> ControlHandle for &H {
    fn target(&self) -> &str {
        (**self).target()
    }

    fn device_control(
        &self,
        control_code: u32,
        input: &[u8],
        output: &mut [u8],
    ) -> std::result::Result<usize, OsCode> {
        (**self).device_control(control_code, input, output)
    }
}

/// How the output buffer grows after a "buffer too small" answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Growth {
    Double,
    Add(usize),
}

impl Growth {
    pub fn next(self, size: usize) -> usize {
        match self {
            Growth::Double => size.max(1).saturating_mul(2),
            Growth::Add(step) => size.saturating_add(step.max(1)),
        }
    }
}

/// Result of a successful grow-and-retry loop.
#[derive(Debug, Clone)]
pub struct GrownBuffer {
    pub data: Vec<u8>,
    pub written: usize,
    pub attempts: u32,
}

impl GrownBuffer {
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The bytes the platform reported as written.
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.written.min(self.data.len())]
    }
}

/// Runs `attempt` against a zeroed buffer, growing it on every "buffer too
/// small" failure. There is no attempt limit.
///
/// On failure the error carries the size of the buffer that was last tried.
pub fn grow_until_fits<F>(
    initial_size: usize,
    growth: Growth,
    mut attempt: F,
) -> std::result::Result<GrownBuffer, (OsCode, usize)>
where
    F: FnMut(&mut [u8]) -> std::result::Result<usize, OsCode>,
{
    let mut size = initial_size;
    let mut attempts = 0u32;
    loop {
        let mut buffer = vec![0u8; size];
        attempts += 1;
        match attempt(&mut buffer) {
            Ok(written) => {
                return Ok(GrownBuffer {
                    data: buffer,
                    written,
                    attempts,
                })
            }
            Err(code) if code.is_buffer_too_small() => {
                drop(buffer);
                let next = growth.next(size);
                debug!(code = code.0, from = size, to = next, "growing control buffer");
                size = next;
            }
            Err(code) => return Err((code, size)),
        }
    }
}

/// Typed request payloads marshaled field by field.
pub trait Marshal {
    fn marshal(&self) -> Vec<u8>;
}

/// A control request with its growth discipline.
#[derive(Debug, Clone)]
pub struct ControlRequest<'a> {
    control_code: u32,
    input: Cow<'a, [u8]>,
    initial_size: usize,
    growth: Growth,
}

impl<'a> ControlRequest<'a> {
    pub fn new(control_code: u32) -> Self {
        Self {
            control_code,
            input: Cow::Borrowed(&[]),
            initial_size: 64,
            growth: Growth::Double,
        }
    }

    pub fn with_input(mut self, input: &'a [u8]) -> Self {
        self.input = Cow::Borrowed(input);
        self
    }

    pub fn with_payload<P: Marshal + ?Sized>(mut self, payload: &P) -> Self {
        self.input = Cow::Owned(payload.marshal());
        self
    }

    pub fn initial_size(mut self, size: usize) -> Self {
        self.initial_size = size;
        self
    }

    pub fn growth(mut self, growth: Growth) -> Self {
        self.growth = growth;
        self
    }

    pub fn control_code(&self) -> u32 {
        self.control_code
    }

    pub fn send<H: ControlHandle + ?Sized>(&self, handle: &H) -> Result<GrownBuffer> {
        grow_until_fits(self.initial_size, self.growth, |output| {
            handle.device_control(self.control_code, &self.input, output)
        })
        .map_err(|(code, buffer_size)| DeviceError::Control {
            control_code: self.control_code,
            target: handle.target().to_string(),
            buffer_size,
            code,
        })
    }

    /// Sends a request that returns no data.
    pub fn send_input_only<H: ControlHandle + ?Sized>(&self, handle: &H) -> Result<()> {
        handle
            .device_control(self.control_code, &self.input, &mut [])
            .map(|_| ())
            .map_err(|code| DeviceError::Control {
                control_code: self.control_code,
                target: handle.target().to_string(),
                buffer_size: 0,
                code,
            })
    }
}
