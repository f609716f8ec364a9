//! Reparse data buffer codec for junctions and symbolic links.
//!
//! Layout (little endian):
//!
//! ```text
//! 0   u32  reparse tag
//! 4   u16  reparse data length (bytes after offset 8)
//! 6   u16  reserved
//! 8   u16  substitute name offset   } relative to the
//! 10  u16  substitute name length   } start of the
//! 12  u16  print name offset        } name region
//! 14  u16  print name length        }
//! 16  u32  flags (symbolic links only)
//! ..       name region, UTF-16
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{DeviceError, Result};

pub const IO_REPARSE_TAG_MOUNT_POINT: u32 = 0xA000_0003;
pub const IO_REPARSE_TAG_SYMLINK: u32 = 0xA000_000C;

pub const MAXIMUM_REPARSE_DATA_BUFFER_SIZE: usize = 16 * 1024;

pub const REPARSE_HEADER_SIZE: usize = 8;
pub const MOUNT_POINT_FIELDS_SIZE: usize = 8;
pub const SYMLINK_FIELDS_SIZE: usize = 12;

/// Added to the substitute name's byte length to get `reparse_data_length`
/// for a mount point. Kept as observed in data written by existing tools.
pub const MOUNT_POINT_DATA_LENGTH_EXTRA: usize = 12;

pub const SYMLINK_FLAG_RELATIVE: u32 = 0x0000_0001;

/// Tells the object manager not to re-parse the path that follows.
pub const NON_INTERPRETED_PREFIX: &str = r"\??\";

const UTF16_NUL_SIZE: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReparseData {
    MountPoint {
        substitute_name: String,
        print_name: String,
    },
    SymbolicLink {
        substitute_name: String,
        print_name: String,
        flags: u32,
    },
}

impl ReparseData {
    pub fn tag(&self) -> u32 {
        match self {
            ReparseData::MountPoint { .. } => IO_REPARSE_TAG_MOUNT_POINT,
            ReparseData::SymbolicLink { .. } => IO_REPARSE_TAG_SYMLINK,
        }
    }

    pub fn substitute_name(&self) -> &str {
        match self {
            ReparseData::MountPoint {
                substitute_name, ..
            }
            | ReparseData::SymbolicLink {
                substitute_name, ..
            } => substitute_name,
        }
    }

    pub fn print_name(&self) -> &str {
        match self {
            ReparseData::MountPoint { print_name, .. }
            | ReparseData::SymbolicLink { print_name, .. } => print_name,
        }
    }

    pub fn is_relative(&self) -> bool {
        match self {
            ReparseData::MountPoint { .. } => false,
            ReparseData::SymbolicLink { flags, .. } => flags & SYMLINK_FLAG_RELATIVE != 0,
        }
    }

    /// The substitute name in Win32 form, without the non-interpreted marker.
    pub fn target(&self) -> String {
        let name = self.substitute_name();
        match name.strip_prefix(NON_INTERPRETED_PREFIX) {
            Some(rest) => match rest.strip_prefix(r"UNC\") {
                Some(share) => format!(r"\\{share}"),
                None => rest.to_string(),
            },
            None => name.to_string(),
        }
    }
}

/// A reparse buffer allocated at the maximum size, of which only the first
/// `len` bytes form the request payload.
#[derive(Debug, Clone)]
pub struct ReparseRequest {
    buffer: Vec<u8>,
    len: usize,
}

impl ReparseRequest {
    pub fn payload(&self) -> &[u8] {
        &self.buffer[..self.len]
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn tag(&self) -> u32 {
        read_u32(&self.buffer, 0)
    }

    pub fn data_length(&self) -> u16 {
        read_u16(&self.buffer, 4)
    }
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn write_u16(buf: &mut [u8], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn write_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn malformed(what: &'static str, needed: usize, available: usize) -> DeviceError {
    DeviceError::Malformed {
        what,
        needed,
        available,
    }
}

fn utf16_name(region: &[u8], offset: u16, length: u16, what: &'static str) -> Result<String> {
    if length % 2 != 0 {
        return Err(malformed(what, length as usize + 1, length as usize));
    }
    let start = offset as usize;
    let end = start + length as usize;
    if end > region.len() {
        return Err(malformed(what, end, region.len()));
    }
    let units: Vec<u16> = region[start..end]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok(String::from_utf16_lossy(&units))
}

/// Decodes a raw reparse buffer as returned by `FSCTL_GET_REPARSE_POINT`.
///
/// `raw` may be longer than the data actually written; the header's data
/// length bounds what is read.
pub fn decode(raw: &[u8]) -> Result<ReparseData> {
    if raw.len() < REPARSE_HEADER_SIZE {
        return Err(malformed("reparse header", REPARSE_HEADER_SIZE, raw.len()));
    }
    let tag = read_u32(raw, 0);
    let data_length = read_u16(raw, 4) as usize;

    let fields_size = match tag {
        IO_REPARSE_TAG_MOUNT_POINT => MOUNT_POINT_FIELDS_SIZE,
        IO_REPARSE_TAG_SYMLINK => SYMLINK_FIELDS_SIZE,
        other => return Err(DeviceError::UnrecognizedTag(other)),
    };

    let end = REPARSE_HEADER_SIZE + data_length;
    if end > raw.len() {
        return Err(malformed("reparse data", end, raw.len()));
    }
    let names_start = REPARSE_HEADER_SIZE + fields_size;
    if names_start > end {
        return Err(malformed("reparse fields", names_start, end));
    }

    let substitute_offset = read_u16(raw, 8);
    let substitute_length = read_u16(raw, 10);
    let print_offset = read_u16(raw, 12);
    let print_length = read_u16(raw, 14);

    let region = &raw[names_start..end];
    let substitute_name = utf16_name(region, substitute_offset, substitute_length, "substitute name")?;
    let print_name = utf16_name(region, print_offset, print_length, "print name")?;

    Ok(match tag {
        IO_REPARSE_TAG_MOUNT_POINT => ReparseData::MountPoint {
            substitute_name,
            print_name,
        },
        _ => ReparseData::SymbolicLink {
            substitute_name,
            print_name,
            flags: read_u32(raw, 16),
        },
    })
}

fn with_prefix(target: &str) -> String {
    if target.starts_with(NON_INTERPRETED_PREFIX) {
        target.to_string()
    } else if let Some(rest) = target.strip_prefix(r"\\?\") {
        format!("{NON_INTERPRETED_PREFIX}{rest}")
    } else if let Some(rest) = target.strip_prefix(r"\\") {
        format!(r"{NON_INTERPRETED_PREFIX}UNC\{rest}")
    } else {
        format!("{NON_INTERPRETED_PREFIX}{target}")
    }
}

/// True for drive-qualified, UNC and NT-form paths.
pub fn is_absolute_target(target: &str) -> bool {
    let bytes = target.as_bytes();
    target.starts_with(r"\\")
        || target.starts_with(NON_INTERPRETED_PREFIX)
        || (bytes.len() >= 3
            && bytes[0].is_ascii_alphabetic()
            && bytes[1] == b':'
            && (bytes[2] == b'\\' || bytes[2] == b'/'))
}

/// Builds a set-reparse-point request.
///
/// Mount points take a fully qualified `target`. Symbolic links accept a
/// relative target too, in which case the relative flag is set. No print
/// name is written in either case.
pub fn encode(target: &str, as_mount_point: bool) -> Result<ReparseRequest> {
    let (tag, fields_size, flags, substitute) = if as_mount_point {
        (
            IO_REPARSE_TAG_MOUNT_POINT,
            MOUNT_POINT_FIELDS_SIZE,
            None,
            with_prefix(target),
        )
    } else if is_absolute_target(target) {
        (IO_REPARSE_TAG_SYMLINK, SYMLINK_FIELDS_SIZE, Some(0), with_prefix(target))
    } else {
        (
            IO_REPARSE_TAG_SYMLINK,
            SYMLINK_FIELDS_SIZE,
            Some(SYMLINK_FLAG_RELATIVE),
            target.to_string(),
        )
    };

    let name: Vec<u16> = substitute.encode_utf16().collect();
    let name_bytes = name.len() * 2;
    let data_length = name_bytes + MOUNT_POINT_DATA_LENGTH_EXTRA + (fields_size - MOUNT_POINT_FIELDS_SIZE);
    let len = REPARSE_HEADER_SIZE + data_length;
    if len > MAXIMUM_REPARSE_DATA_BUFFER_SIZE {
        return Err(DeviceError::TargetTooLong {
            bytes: len,
            limit: MAXIMUM_REPARSE_DATA_BUFFER_SIZE,
        });
    }

    let mut buffer = vec![0u8; MAXIMUM_REPARSE_DATA_BUFFER_SIZE];
    write_u32(&mut buffer, 0, tag);
    write_u16(&mut buffer, 4, data_length as u16);
    write_u16(&mut buffer, 8, 0);
    write_u16(&mut buffer, 10, name_bytes as u16);
    write_u16(&mut buffer, 12, (name_bytes + UTF16_NUL_SIZE) as u16);
    write_u16(&mut buffer, 14, 0);
    if let Some(flags) = flags {
        write_u32(&mut buffer, 16, flags);
    }

    let names_start = REPARSE_HEADER_SIZE + fields_size;
    for (i, unit) in name.iter().enumerate() {
        write_u16(&mut buffer, names_start + i * 2, *unit);
    }

    Ok(ReparseRequest { buffer, len })
}

/// Builds a delete request for a mount point.
pub fn build_delete_request() -> ReparseRequest {
    build_delete_request_for(IO_REPARSE_TAG_MOUNT_POINT)
}

/// Builds a delete request for a reparse point carrying `tag`. Only the
/// header is sent, although the full buffer is allocated.
pub fn build_delete_request_for(tag: u32) -> ReparseRequest {
    let mut buffer = vec![0u8; MAXIMUM_REPARSE_DATA_BUFFER_SIZE];
    write_u32(&mut buffer, 0, tag);
    write_u16(&mut buffer, 4, 0);
    ReparseRequest {
        buffer,
        len: REPARSE_HEADER_SIZE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16_bytes(s: &str) -> Vec<u8> {
        s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    /// Builds a buffer the way other tools lay it out: print name first,
    /// no terminators.
    fn foreign_symlink(substitute: &str, print: &str, flags: u32) -> Vec<u8> {
        let sub = utf16_bytes(substitute);
        let prn = utf16_bytes(print);
        let data_length = SYMLINK_FIELDS_SIZE + sub.len() + prn.len();
        let mut raw = Vec::new();
        raw.extend_from_slice(&IO_REPARSE_TAG_SYMLINK.to_le_bytes());
        raw.extend_from_slice(&(data_length as u16).to_le_bytes());
        raw.extend_from_slice(&0u16.to_le_bytes());
        raw.extend_from_slice(&(prn.len() as u16).to_le_bytes());
        raw.extend_from_slice(&(sub.len() as u16).to_le_bytes());
        raw.extend_from_slice(&0u16.to_le_bytes());
        raw.extend_from_slice(&(prn.len() as u16).to_le_bytes());
        raw.extend_from_slice(&flags.to_le_bytes());
        raw.extend_from_slice(&prn);
        raw.extend_from_slice(&sub);
        raw
    }

    #[test]
    fn mount_point_round_trip() {
        let request = encode(r"C:\data\target", true).unwrap();
        let data = decode(request.payload()).unwrap();
        assert_eq!(
            data,
            ReparseData::MountPoint {
                substitute_name: r"\??\C:\data\target".to_string(),
                print_name: String::new(),
            }
        );
        assert_eq!(data.target(), r"C:\data\target");
    }

    #[test]
    fn mount_point_exact_sizes() {
        // +12 is preserved as-is; this test pins it.
        let target = r"D:\x";
        let request = encode(target, true).unwrap();
        let name_bytes = (NON_INTERPRETED_PREFIX.len() + target.len()) * 2;
        assert_eq!(request.data_length() as usize, name_bytes + 12);
        assert_eq!(request.payload().len(), 8 + name_bytes + 12);
        assert_eq!(request.capacity(), MAXIMUM_REPARSE_DATA_BUFFER_SIZE);

        let raw = request.payload();
        assert_eq!(read_u32(raw, 0), IO_REPARSE_TAG_MOUNT_POINT);
        assert_eq!(read_u16(raw, 6), 0);
        assert_eq!(read_u16(raw, 8), 0);
        assert_eq!(read_u16(raw, 10) as usize, name_bytes);
        assert_eq!(read_u16(raw, 12) as usize, name_bytes + 2);
        assert_eq!(read_u16(raw, 14), 0);
        // terminator after the substitute name
        assert_eq!(read_u16(raw, 16 + name_bytes), 0);
    }

    #[test]
    fn decode_tolerates_oversized_buffers() {
        let request = encode(r"E:\", true).unwrap();
        let mut raw = request.payload().to_vec();
        raw.resize(4096, 0xEE);
        let data = decode(&raw).unwrap();
        assert_eq!(data.substitute_name(), r"\??\E:\");
    }

    #[test]
    fn decodes_symlinks_written_by_other_tools() {
        let raw = foreign_symlink(r"\??\C:\Windows", r"C:\Windows", 0);
        let data = decode(&raw).unwrap();
        assert_eq!(data.substitute_name(), r"\??\C:\Windows");
        assert_eq!(data.print_name(), r"C:\Windows");
        assert!(!data.is_relative());
        assert_eq!(data.target(), r"C:\Windows");

        let raw = foreign_symlink(r"..\lib", r"..\lib", SYMLINK_FLAG_RELATIVE);
        let data = decode(&raw).unwrap();
        assert!(data.is_relative());
        assert_eq!(data.target(), r"..\lib");
    }

    #[test]
    fn relative_symlink_encode_sets_flag() {
        let request = encode(r"..\shared", false).unwrap();
        let data = decode(request.payload()).unwrap();
        assert_eq!(
            data,
            ReparseData::SymbolicLink {
                substitute_name: r"..\shared".to_string(),
                print_name: String::new(),
                flags: SYMLINK_FLAG_RELATIVE,
            }
        );
        assert_eq!(request.data_length() as usize, r"..\shared".len() * 2 + 12 + 4);
    }

    #[test]
    fn unc_symlink_target_uses_nt_unc_form() {
        let request = encode(r"\\server\share\dir", false).unwrap();
        let data = decode(request.payload()).unwrap();
        assert_eq!(data.substitute_name(), r"\??\UNC\server\share\dir");
        assert_eq!(data.target(), r"\\server\share\dir");
        assert!(!data.is_relative());
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut raw = encode(r"C:\a", true).unwrap().payload().to_vec();
        raw[0..4].copy_from_slice(&0x8000_0017u32.to_le_bytes());
        assert!(matches!(
            decode(&raw),
            Err(DeviceError::UnrecognizedTag(0x8000_0017))
        ));
    }

    #[test]
    fn truncated_names_are_malformed() {
        let mut raw = encode(r"C:\abc", true).unwrap().payload().to_vec();
        // claim a substitute name longer than the data
        raw[10..12].copy_from_slice(&0x0400u16.to_le_bytes());
        assert!(matches!(decode(&raw), Err(DeviceError::Malformed { .. })));
        assert!(matches!(decode(&raw[..4]), Err(DeviceError::Malformed { .. })));
    }

    #[test]
    fn odd_name_length_is_malformed() {
        let mut raw = encode(r"C:\abc", true).unwrap().payload().to_vec();
        let substitute_length = u16::from_le_bytes([raw[10], raw[11]]);
        raw[10..12].copy_from_slice(&(substitute_length - 1).to_le_bytes());
        assert!(matches!(
            decode(&raw),
            Err(DeviceError::Malformed { what: "substitute name", .. })
        ));
    }

    #[test]
    fn over_long_target_is_refused() {
        let target = format!(r"C:\{}", "a".repeat(MAXIMUM_REPARSE_DATA_BUFFER_SIZE / 2));
        assert!(matches!(
            encode(&target, true),
            Err(DeviceError::TargetTooLong { .. })
        ));
    }

    #[test]
    fn delete_request_sends_header_only() {
        let request = build_delete_request();
        assert_eq!(request.payload().len(), REPARSE_HEADER_SIZE);
        assert_eq!(request.capacity(), MAXIMUM_REPARSE_DATA_BUFFER_SIZE);
        assert_eq!(request.tag(), IO_REPARSE_TAG_MOUNT_POINT);
        assert_eq!(request.data_length(), 0);

        let request = build_delete_request_for(IO_REPARSE_TAG_SYMLINK);
        assert_eq!(request.tag(), IO_REPARSE_TAG_SYMLINK);
    }

    #[test]
    fn absolute_targets() {
        assert!(is_absolute_target(r"C:\x"));
        assert!(is_absolute_target(r"\\srv\s"));
        assert!(is_absolute_target(r"\??\C:\x"));
        assert!(!is_absolute_target(r"C:x"));
        assert!(!is_absolute_target(r"x\y"));
    }
}
