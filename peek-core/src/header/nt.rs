use crate::error::{DecodeError, Result};
use crate::fields::{Field, Fields};
use crate::header::optional::{
    OptionalHeader, OptionalHeader32, OptionalHeader64, OPTIONAL_HEADER_MAGIC_PE32,
    OPTIONAL_HEADER_MAGIC_PE32_PLUS,
};
use crate::header::read_block;
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use serde::Serialize;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

/// `PE\0\0`, read little-endian.
pub const IMAGE_NT_SIGNATURE: u32 = 0x0000_4550;

pub const FILE_HEADER_SIZE: usize = 20;

/// Signature plus file header.
pub const NT_HEADER_COMMON_SIZE: usize = 4 + FILE_HEADER_SIZE;

/// Characteristics bit marking the image as executable.
pub const IMAGE_FILE_EXECUTABLE_IMAGE: u16 = 0x0002;

/// COFF file header (`IMAGE_FILE_HEADER`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FileHeader {
    /// Target architecture, e.g. `0x8664` for AMD64.
    pub machine: u16,
    pub number_of_sections: u16,

    /// Link time as seconds since the Unix epoch.
    pub time_date_stamp: u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbols: u32,

    /// Declared size of the optional header, data directories included.
    pub size_of_optional_header: u16,
    pub characteristics: u16,
}

impl FileHeader {
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<FileHeader> {
        let block = read_block::<_, FILE_HEADER_SIZE>(reader, "file header")?;
        let mut cur = Cursor::new(&block[..]);

        Ok(FileHeader {
            machine: cur.read_u16::<LE>()?,
            number_of_sections: cur.read_u16::<LE>()?,
            time_date_stamp: cur.read_u32::<LE>()?,
            pointer_to_symbol_table: cur.read_u32::<LE>()?,
            number_of_symbols: cur.read_u32::<LE>()?,
            size_of_optional_header: cur.read_u16::<LE>()?,
            characteristics: cur.read_u16::<LE>()?,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u16::<LE>(self.machine)?;
        w.write_u16::<LE>(self.number_of_sections)?;
        w.write_u32::<LE>(self.time_date_stamp)?;
        w.write_u32::<LE>(self.pointer_to_symbol_table)?;
        w.write_u32::<LE>(self.number_of_symbols)?;
        w.write_u16::<LE>(self.size_of_optional_header)?;
        w.write_u16::<LE>(self.characteristics)
    }
}

/// The fixed prefix of the NT headers shared by PE32 and PE32+.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NtHeaderCommon {
    /// Expected to be [`IMAGE_NT_SIGNATURE`]; kept as read.
    pub signature: u32,
    pub file_header: FileHeader,
}

impl NtHeaderCommon {
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<NtHeaderCommon> {
        let block = read_block::<_, 4>(reader, "NT signature")?;
        let signature = u32::from_le_bytes(block);
        let file_header = FileHeader::from_reader(reader)?;
        Ok(NtHeaderCommon {
            signature,
            file_header,
        })
    }

    pub fn has_pe_signature(&self) -> bool {
        self.signature == IMAGE_NT_SIGNATURE
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LE>(self.signature)?;
        self.file_header.write_to(w)
    }
}

impl Fields for FileHeader {
    fn fields(&self) -> Vec<Field> {
        vec![
            Field::new("Machine", self.machine),
            Field::new("NumberOfSections", self.number_of_sections),
            Field::new("TimeDateStamp", self.time_date_stamp),
            Field::new("PointerToSymbolTable", self.pointer_to_symbol_table),
            Field::new("NumberOfSymbols", self.number_of_symbols),
            Field::new("SizeOfOptionalHeader", self.size_of_optional_header),
            Field::new("Characteristics", self.characteristics),
        ]
    }
}

/// Positions `reader` at `offset`, failing unless it lands exactly there and
/// the offset lies within the stream.
fn seek_to_nt_header<R: Seek>(reader: &mut R, offset: u64) -> Result<()> {
    let seek_failed = |_| DecodeError::SeekFailed { offset };

    let end = reader.seek(SeekFrom::End(0)).map_err(seek_failed)?;
    if offset > end {
        return Err(DecodeError::SeekFailed { offset });
    }

    let pos = reader.seek(SeekFrom::Start(offset)).map_err(seek_failed)?;
    if pos != offset {
        return Err(DecodeError::SeekFailed { offset });
    }
    Ok(())
}

/// Decodes the NT headers located at `new_header_offset`.
///
/// The optional header is first read with the PE32 layout. Its magic decides
/// whether that read is kept or the body is re-read from the same offset with
/// the PE32+ layout.
pub fn decode_variant_header<R: Read + Seek>(
    reader: &mut R,
    new_header_offset: u32,
) -> Result<(NtHeaderCommon, OptionalHeader)> {
    let offset = new_header_offset as u64;
    seek_to_nt_header(reader, offset)?;

    let common = NtHeaderCommon::from_reader(reader)?;
    let body_start = reader.stream_position()?;

    let probe = OptionalHeader32::from_reader(reader)?;
    let optional = match probe.magic {
        OPTIONAL_HEADER_MAGIC_PE32 => OptionalHeader::ThirtyTwo(probe),
        OPTIONAL_HEADER_MAGIC_PE32_PLUS => {
            reader.seek(SeekFrom::Start(body_start))?;
            OptionalHeader::SixtyFour(OptionalHeader64::from_reader(reader)?)
        }
        value => return Err(DecodeError::UnrecognizedOptionalHeaderMagic { value }),
    };

    Ok((common, optional))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::optional::{OPTIONAL_HEADER32_SIZE, OPTIONAL_HEADER64_SIZE};

    fn common_bytes(machine: u16) -> Vec<u8> {
        let mut out = Vec::new();
        NtHeaderCommon {
            signature: IMAGE_NT_SIGNATURE,
            file_header: FileHeader {
                machine,
                number_of_sections: 3,
                time_date_stamp: 0x5f00_0000,
                pointer_to_symbol_table: 0,
                number_of_symbols: 0,
                size_of_optional_header: 0xe0,
                characteristics: 0x0102,
            },
        }
        .write_to(&mut out)
        .unwrap();
        out
    }

    fn image_at(offset: usize, body: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0xccu8; offset];
        bytes.extend(common_bytes(0x014c));
        bytes.extend_from_slice(body);
        bytes
    }

    #[test]
    fn commits_pe32_probe() {
        let mut body = vec![0u8; OPTIONAL_HEADER32_SIZE];
        body[0..2].copy_from_slice(&OPTIONAL_HEADER_MAGIC_PE32.to_le_bytes());
        body[28..32].copy_from_slice(&0x0040_0000u32.to_le_bytes());
        let mut cursor = Cursor::new(image_at(0x80, &body));

        let (common, optional) = decode_variant_header(&mut cursor, 0x80).unwrap();
        assert!(common.has_pe_signature());
        assert_eq!(common.file_header.number_of_sections, 3);
        match optional {
            OptionalHeader::ThirtyTwo(h) => {
                assert_eq!(h.magic, OPTIONAL_HEADER_MAGIC_PE32);
                assert_eq!(h.image_base, 0x0040_0000u32);
            }
            other => panic!("expected PE32, got {other:?}"),
        }
        assert_eq!(
            cursor.position(),
            (0x80 + NT_HEADER_COMMON_SIZE + OPTIONAL_HEADER32_SIZE) as u64
        );
    }

    #[test]
    fn rereads_pe32_plus_from_body_start() {
        let mut body = vec![0u8; OPTIONAL_HEADER64_SIZE];
        body[0..2].copy_from_slice(&OPTIONAL_HEADER_MAGIC_PE32_PLUS.to_le_bytes());
        body[24..32].copy_from_slice(&0x0001_4000_0000u64.to_le_bytes());
        let mut cursor = Cursor::new(image_at(0x40, &body));

        let (_, optional) = decode_variant_header(&mut cursor, 0x40).unwrap();
        match optional {
            OptionalHeader::SixtyFour(h) => {
                assert_eq!(h.magic, OPTIONAL_HEADER_MAGIC_PE32_PLUS);
                assert_eq!(h.image_base, 0x0001_4000_0000u64);
            }
            other => panic!("expected PE32+, got {other:?}"),
        }
        assert_eq!(
            cursor.position(),
            (0x40 + NT_HEADER_COMMON_SIZE + OPTIONAL_HEADER64_SIZE) as u64
        );
    }

    #[test]
    fn unknown_magic_is_rejected_with_value() {
        for magic in [0x0000u16, 0x0107, 0x010c, 0xffff] {
            let mut body = vec![0u8; OPTIONAL_HEADER32_SIZE];
            body[0..2].copy_from_slice(&magic.to_le_bytes());
            let err =
                decode_variant_header(&mut Cursor::new(image_at(0x40, &body)), 0x40).unwrap_err();
            assert!(
                matches!(err, DecodeError::UnrecognizedOptionalHeaderMagic { value } if value == magic),
                "{err:?}"
            );
        }
    }

    #[test]
    fn offset_past_end_fails_to_seek() {
        let bytes = image_at(0x40, &[0u8; OPTIONAL_HEADER32_SIZE]);
        let len = bytes.len() as u32;
        let err = decode_variant_header(&mut Cursor::new(bytes), len + 1).unwrap_err();
        assert!(matches!(err, DecodeError::SeekFailed { offset } if offset == len as u64 + 1));
    }

    #[test]
    fn short_file_header_is_truncated() {
        let mut bytes = vec![0u8; 0x40];
        bytes.extend(&common_bytes(0x8664)[..10]);
        let err = decode_variant_header(&mut Cursor::new(bytes), 0x40).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Truncated {
                structure: "file header",
                ..
            }
        ));
    }

    #[test]
    fn short_pe32_plus_body_is_truncated() {
        // Long enough for the PE32 probe, too short for the PE32+ layout.
        let mut body = vec![0u8; OPTIONAL_HEADER32_SIZE + 4];
        body[0..2].copy_from_slice(&OPTIONAL_HEADER_MAGIC_PE32_PLUS.to_le_bytes());
        let err =
            decode_variant_header(&mut Cursor::new(image_at(0x40, &body)), 0x40).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Truncated {
                expected: OPTIONAL_HEADER64_SIZE,
                ..
            }
        ));
    }

    #[test]
    fn foreign_signature_is_preserved() {
        let mut bytes = image_at(0x40, &{
            let mut body = vec![0u8; OPTIONAL_HEADER32_SIZE];
            body[0..2].copy_from_slice(&OPTIONAL_HEADER_MAGIC_PE32.to_le_bytes());
            body
        });
        bytes[0x40..0x44].copy_from_slice(b"NE\0\0");
        let (common, _) = decode_variant_header(&mut Cursor::new(bytes), 0x40).unwrap();
        assert!(!common.has_pe_signature());
        assert_eq!(common.signature, u32::from_le_bytes(*b"NE\0\0"));
    }
}
