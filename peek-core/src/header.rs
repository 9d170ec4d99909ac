pub mod dos;
pub mod nt;
pub mod optional;

use crate::error::{DecodeError, Result};
use std::io::{self, Read};

pub trait Header: std::fmt::Debug + Send + Sync {
    /// Returns the relative virtual address of the entry point.
    fn entry_point(&self) -> u64;

    /// Returns the machine architecture identifier.
    fn machine(&self) -> u16;

    /// Returns true if this is a 64-bit (PE32+) image.
    fn is_64(&self) -> bool;

    /// Returns a short human-readable name, e.g. "PE32" or "PE32+".
    fn format_name(&self) -> &'static str;

    /// Returns true if the image is marked executable (vs object/lib).
    fn is_executable(&self) -> bool;
}

pub const IMAGE_FILE_MACHINE_I386: u16 = 0x014c;
pub const IMAGE_FILE_MACHINE_ARM: u16 = 0x01c0;
pub const IMAGE_FILE_MACHINE_ARMNT: u16 = 0x01c4;
pub const IMAGE_FILE_MACHINE_IA64: u16 = 0x0200;
pub const IMAGE_FILE_MACHINE_AMD64: u16 = 0x8664;
pub const IMAGE_FILE_MACHINE_ARM64: u16 = 0xaa64;

/// Maps a COFF machine id to its conventional name.
pub fn machine_name(machine: u16) -> Option<&'static str> {
    match machine {
        IMAGE_FILE_MACHINE_I386 => Some("i386"),
        IMAGE_FILE_MACHINE_ARM => Some("ARM"),
        IMAGE_FILE_MACHINE_ARMNT => Some("ARMNT"),
        IMAGE_FILE_MACHINE_IA64 => Some("IA64"),
        IMAGE_FILE_MACHINE_AMD64 => Some("AMD64"),
        IMAGE_FILE_MACHINE_ARM64 => Some("ARM64"),
        _ => None,
    }
}

/// Reads exactly `N` bytes for `structure`, reporting a short read as `Truncated`.
pub(crate) fn read_block<R: Read, const N: usize>(
    reader: &mut R,
    structure: &'static str,
) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => DecodeError::Truncated {
            structure,
            expected: N,
        },
        _ => DecodeError::Io(err),
    })?;
    Ok(buf)
}
