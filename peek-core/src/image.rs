use crate::error::Result;
use crate::header::dos::{decode_legacy_header, DosHeader, DOS_HEADER_SIZE};
use crate::header::nt::{decode_variant_header, NtHeaderCommon, IMAGE_FILE_EXECUTABLE_IMAGE};
use crate::header::optional::OptionalHeader;
use crate::header::Header;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// The decoded leading headers of a PE image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedImage {
    pub dos_header: DosHeader,
    pub nt_header: NtHeaderCommon,
    pub optional_header: OptionalHeader,
}

impl DecodedImage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)?;
        log::debug!("Decoding {}", path.as_ref().display());
        Self::from_reader(&mut BufReader::new(file))
    }

    /// Decodes an image from any seekable source, starting at offset 0.
    pub fn from_reader<R: Read + Seek>(reader: &mut R) -> Result<Self> {
        reader.seek(SeekFrom::Start(0))?;
        let dos_header = decode_legacy_header(reader)?;
        log::debug!(
            "DOS header valid, NT headers at {:#x}",
            dos_header.new_header_offset
        );

        let (nt_header, optional_header) =
            decode_variant_header(reader, dos_header.new_header_offset)?;
        log::debug!(
            "Optional header magic {:#06x} ({}, {} bytes)",
            optional_header.magic(),
            if optional_header.is_64() { "PE32+" } else { "PE32" },
            optional_header.size()
        );

        Ok(Self {
            dos_header,
            nt_header,
            optional_header,
        })
    }

    /// Writes the headers back at the offsets they were decoded from.
    ///
    /// Bytes between the DOS header and the NT headers are zero-filled.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.dos_header.write_to(w)?;
        let gap = (self.dos_header.new_header_offset as usize)
            .checked_sub(DOS_HEADER_SIZE)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "NT header offset overlaps the DOS header",
                )
            })?;
        io::copy(&mut io::repeat(0).take(gap as u64), w)?;
        self.nt_header.write_to(w)?;
        self.optional_header.write_to(w)
    }
}

impl Header for DecodedImage {
    fn entry_point(&self) -> u64 {
        self.optional_header.address_of_entry_point() as u64
    }

    fn machine(&self) -> u16 {
        self.nt_header.file_header.machine
    }

    fn is_64(&self) -> bool {
        self.optional_header.is_64()
    }

    fn format_name(&self) -> &'static str {
        if self.is_64() {
            "PE32+"
        } else {
            "PE32"
        }
    }

    fn is_executable(&self) -> bool {
        self.nt_header.file_header.characteristics & IMAGE_FILE_EXECUTABLE_IMAGE != 0
    }
}

/// Opens `path` and decodes its DOS and NT headers.
///
/// The file is closed before returning, on success and on failure.
pub fn decode_image<P: AsRef<Path>>(path: P) -> Result<DecodedImage> {
    DecodedImage::open(path)
}
