use crate::error::{DecodeError, Result};
use crate::fields::{Field, Fields};
use crate::header::read_block;
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use serde::Serialize;
use std::io::{self, Cursor, Read, Write};

/// `MZ`, read little-endian.
pub const IMAGE_DOS_SIGNATURE: u16 = 0x5A4D;

/// Size of the DOS header on disk.
pub const DOS_HEADER_SIZE: usize = 64;

/// Represents the DOS (MZ) header found at offset 0 of every PE image.
///
/// This structure corresponds to `IMAGE_DOS_HEADER` from `winnt.h`. For a PE
/// image the only fields that matter are the signature and the offset of the
/// NT headers; the rest describe the DOS stub program.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DosHeader {
    /// Signature, always `0x5A4D` (`"MZ"`) for a valid image.
    pub magic: u16,

    /// Bytes on the last 512-byte page of the DOS program.
    pub bytes_on_last_page: u16,

    /// Number of 512-byte pages in the DOS program.
    pub pages_in_file: u16,

    /// Number of relocation entries.
    pub relocations: u16,

    /// Size of this header in 16-byte paragraphs.
    pub header_paragraphs: u16,

    pub min_extra_paragraphs: u16,
    pub max_extra_paragraphs: u16,

    /// Initial (relative) SS value.
    pub initial_ss: u16,

    /// Initial SP value.
    pub initial_sp: u16,

    pub checksum: u16,

    /// Initial IP value.
    pub initial_ip: u16,

    /// Initial (relative) CS value.
    pub initial_cs: u16,

    /// File offset of the relocation table.
    pub relocation_table_offset: u16,

    pub overlay_number: u16,
    pub reserved: [u8; 8],
    pub oem_identifier: u16,
    pub oem_info: u16,
    pub reserved2: [u8; 20],

    /// Absolute file offset of the NT headers (`e_lfanew`).
    ///
    /// Not bound-checked here; the NT header decoder fails if the offset
    /// cannot be reached.
    pub new_header_offset: u32,
}

impl DosHeader {
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<DosHeader> {
        let block = read_block::<_, DOS_HEADER_SIZE>(reader, "DOS header")?;
        let mut cur = Cursor::new(&block[..]);

        let magic = cur.read_u16::<LE>()?;
        if magic != IMAGE_DOS_SIGNATURE {
            return Err(DecodeError::InvalidFormat { found: magic });
        }

        let bytes_on_last_page = cur.read_u16::<LE>()?;
        let pages_in_file = cur.read_u16::<LE>()?;
        let relocations = cur.read_u16::<LE>()?;
        let header_paragraphs = cur.read_u16::<LE>()?;
        let min_extra_paragraphs = cur.read_u16::<LE>()?;
        let max_extra_paragraphs = cur.read_u16::<LE>()?;
        let initial_ss = cur.read_u16::<LE>()?;
        let initial_sp = cur.read_u16::<LE>()?;
        let checksum = cur.read_u16::<LE>()?;
        let initial_ip = cur.read_u16::<LE>()?;
        let initial_cs = cur.read_u16::<LE>()?;
        let relocation_table_offset = cur.read_u16::<LE>()?;
        let overlay_number = cur.read_u16::<LE>()?;
        let mut reserved = [0u8; 8];
        cur.read_exact(&mut reserved)?;
        let oem_identifier = cur.read_u16::<LE>()?;
        let oem_info = cur.read_u16::<LE>()?;
        let mut reserved2 = [0u8; 20];
        cur.read_exact(&mut reserved2)?;

        Ok(DosHeader {
            magic,
            bytes_on_last_page,
            pages_in_file,
            relocations,
            header_paragraphs,
            min_extra_paragraphs,
            max_extra_paragraphs,
            initial_ss,
            initial_sp,
            checksum,
            initial_ip,
            initial_cs,
            relocation_table_offset,
            overlay_number,
            reserved,
            oem_identifier,
            oem_info,
            reserved2,
            new_header_offset: cur.read_u32::<LE>()?,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u16::<LE>(self.magic)?;
        w.write_u16::<LE>(self.bytes_on_last_page)?;
        w.write_u16::<LE>(self.pages_in_file)?;
        w.write_u16::<LE>(self.relocations)?;
        w.write_u16::<LE>(self.header_paragraphs)?;
        w.write_u16::<LE>(self.min_extra_paragraphs)?;
        w.write_u16::<LE>(self.max_extra_paragraphs)?;
        w.write_u16::<LE>(self.initial_ss)?;
        w.write_u16::<LE>(self.initial_sp)?;
        w.write_u16::<LE>(self.checksum)?;
        w.write_u16::<LE>(self.initial_ip)?;
        w.write_u16::<LE>(self.initial_cs)?;
        w.write_u16::<LE>(self.relocation_table_offset)?;
        w.write_u16::<LE>(self.overlay_number)?;
        w.write_all(&self.reserved)?;
        w.write_u16::<LE>(self.oem_identifier)?;
        w.write_u16::<LE>(self.oem_info)?;
        w.write_all(&self.reserved2)?;
        w.write_u32::<LE>(self.new_header_offset)
    }
}

impl Fields for DosHeader {
    fn fields(&self) -> Vec<Field> {
        vec![
            Field::new("MagicNumber", self.magic),
            Field::new("BytesOnLastPage", self.bytes_on_last_page),
            Field::new("PagesInFile", self.pages_in_file),
            Field::new("Relocations", self.relocations),
            Field::new("SizeOfHeaderInParagraphs", self.header_paragraphs),
            Field::new("MinExtraParagraphsNeeded", self.min_extra_paragraphs),
            Field::new("MaxExtraParagraphsNeeded", self.max_extra_paragraphs),
            Field::new("SsValue", self.initial_ss),
            Field::new("SpValue", self.initial_sp),
            Field::new("Checksum", self.checksum),
            Field::new("IpValue", self.initial_ip),
            Field::new("CsValue", self.initial_cs),
            Field::new("FileAddressRelocationTable", self.relocation_table_offset),
            Field::new("OverlayNumber", self.overlay_number),
            Field::new("OemIdentifier", self.oem_identifier),
            Field::new("OemInfo", self.oem_info),
            Field::new("FileAddressNewExeHeader", self.new_header_offset),
        ]
    }
}

/// Decodes the DOS header from the current position (expected to be offset 0).
///
/// Consumes exactly [`DOS_HEADER_SIZE`] bytes on success.
pub fn decode_legacy_header<R: Read>(reader: &mut R) -> Result<DosHeader> {
    DosHeader::from_reader(reader)
}

#[cfg(test)]
mod tests {
    use super::{decode_legacy_header, DosHeader, DOS_HEADER_SIZE, IMAGE_DOS_SIGNATURE};
    use crate::fields::{FieldValue, Fields};
    use crate::DecodeError;
    use std::io::Cursor;

    fn mz_bytes(new_header_offset: u32) -> Vec<u8> {
        let mut bytes = vec![0u8; DOS_HEADER_SIZE];
        bytes[0] = 0x4d;
        bytes[1] = 0x5a;
        bytes[60..64].copy_from_slice(&new_header_offset.to_le_bytes());
        bytes
    }

    #[test]
    fn decodes_signature_and_new_header_offset() {
        let mut cursor = Cursor::new(mz_bytes(0x80));
        let header = decode_legacy_header(&mut cursor).unwrap();
        assert_eq!(header.magic, IMAGE_DOS_SIGNATURE);
        assert_eq!(header.new_header_offset, 0x80);
        assert_eq!(cursor.position(), DOS_HEADER_SIZE as u64);
    }

    #[test]
    fn fields_are_read_in_declared_order() {
        let mut bytes = mz_bytes(0x40);
        bytes[2..4].copy_from_slice(&0x0090u16.to_le_bytes());
        bytes[4..6].copy_from_slice(&0x0003u16.to_le_bytes());
        bytes[24..26].copy_from_slice(&0x0040u16.to_le_bytes());
        bytes[28] = 0xaa;
        bytes[36..38].copy_from_slice(&0x1234u16.to_le_bytes());
        bytes[59] = 0xbb;
        let header = DosHeader::from_reader(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(header.bytes_on_last_page, 0x90);
        assert_eq!(header.pages_in_file, 3);
        assert_eq!(header.relocation_table_offset, 0x40);
        assert_eq!(header.reserved[0], 0xaa);
        assert_eq!(header.oem_identifier, 0x1234);
        assert_eq!(header.reserved2[19], 0xbb);
    }

    #[test]
    fn short_stream_is_truncated() {
        for len in [0usize, 1, 2, 32, 63] {
            let bytes = mz_bytes(0x40)[..len].to_vec();
            let err = decode_legacy_header(&mut Cursor::new(bytes)).unwrap_err();
            assert!(
                matches!(err, DecodeError::Truncated { expected: 64, .. }),
                "len {len}: {err:?}"
            );
        }
    }

    #[test]
    fn wrong_signature_is_invalid_format() {
        let mut bytes = mz_bytes(0x40);
        bytes[0] = 0x7f;
        bytes[1] = 0x45;
        let err = decode_legacy_header(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidFormat { found: 0x457f }));
    }

    #[test]
    fn any_other_signature_is_invalid_format() {
        for signature in [0x0000u16, 0xffff, 0x4d5a, 0x4d5b, 0x5a4c, 0x5a4e, 0x7a6d, 0x0001] {
            let mut bytes = mz_bytes(0x40);
            bytes[0..2].copy_from_slice(&signature.to_le_bytes());
            let err = decode_legacy_header(&mut Cursor::new(bytes)).unwrap_err();
            assert!(
                matches!(err, DecodeError::InvalidFormat { found } if found == signature),
                "{signature:#06x}: {err:?}"
            );
        }
    }

    #[test]
    fn write_to_reproduces_input() {
        let mut bytes = mz_bytes(0x100);
        for (i, b) in bytes.iter_mut().enumerate().skip(2).take(58) {
            *b = i as u8;
        }
        let header = DosHeader::from_reader(&mut Cursor::new(bytes.clone())).unwrap();
        let mut out = Vec::new();
        header.write_to(&mut out).unwrap();
        assert_eq!(out, bytes);
    }

    #[test]
    fn reserved_words_are_not_listed() {
        let header = DosHeader::from_reader(&mut Cursor::new(mz_bytes(0x40))).unwrap();
        let fields = header.fields();
        assert_eq!(fields.len(), 17);
        assert_eq!(fields[0].value, FieldValue::Word(0x5a4d));
        let last = fields.last().unwrap();
        assert_eq!(last.name, "FileAddressNewExeHeader");
        assert_eq!(last.value, FieldValue::Dword(0x40));
    }
}
