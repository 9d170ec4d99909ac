use crate::error::Result;
use crate::fields::{Field, Fields};
use crate::header::read_block;
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use serde::Serialize;
use std::io::{self, Cursor, Read, Write};

/// Optional header magic of a PE32 image.
pub const OPTIONAL_HEADER_MAGIC_PE32: u16 = 0x010b;

/// Optional header magic of a PE32+ image.
pub const OPTIONAL_HEADER_MAGIC_PE32_PLUS: u16 = 0x020b;

/// Size of the PE32 optional header, excluding data directories.
pub const OPTIONAL_HEADER32_SIZE: usize = 96;

/// Size of the PE32+ optional header, excluding data directories.
pub const OPTIONAL_HEADER64_SIZE: usize = 112;

/// Optional header of a 32-bit (PE32) image, `IMAGE_OPTIONAL_HEADER32`
/// without the trailing data directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OptionalHeader32 {
    /// Always [`OPTIONAL_HEADER_MAGIC_PE32`] once committed.
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,

    /// RVA of the entry point.
    pub address_of_entry_point: u32,
    pub base_of_code: u32,

    /// RVA of the data section. Absent in PE32+.
    pub base_of_data: u32,

    /// Preferred load address.
    pub image_base: u32,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub checksum: u32,
    pub subsystem: u16,
    pub dll_characteristics: u16,
    pub size_of_stack_reserve: u32,
    pub size_of_stack_commit: u32,
    pub size_of_heap_reserve: u32,
    pub size_of_heap_commit: u32,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
}

/// Optional header of a 64-bit (PE32+) image, `IMAGE_OPTIONAL_HEADER64`
/// without the trailing data directories.
///
/// Compared to [`OptionalHeader32`] there is no `base_of_data`, and the image
/// base and stack/heap sizes are 64-bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OptionalHeader64 {
    /// Always [`OPTIONAL_HEADER_MAGIC_PE32_PLUS`] once committed.
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub checksum: u32,
    pub subsystem: u16,
    pub dll_characteristics: u16,
    pub size_of_stack_reserve: u64,
    pub size_of_stack_commit: u64,
    pub size_of_heap_reserve: u64,
    pub size_of_heap_commit: u64,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
}

/// The optional header body, whichever layout the magic selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OptionalHeader {
    ThirtyTwo(OptionalHeader32),
    SixtyFour(OptionalHeader64),
}

impl OptionalHeader32 {
    /// Reads a PE32-shaped body. The magic is not checked; callers decide
    /// whether the layout applies.
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<OptionalHeader32> {
        let block = read_block::<_, OPTIONAL_HEADER32_SIZE>(reader, "PE32 optional header")?;
        let mut cur = Cursor::new(&block[..]);

        Ok(OptionalHeader32 {
            magic: cur.read_u16::<LE>()?,
            major_linker_version: cur.read_u8()?,
            minor_linker_version: cur.read_u8()?,
            size_of_code: cur.read_u32::<LE>()?,
            size_of_initialized_data: cur.read_u32::<LE>()?,
            size_of_uninitialized_data: cur.read_u32::<LE>()?,
            address_of_entry_point: cur.read_u32::<LE>()?,
            base_of_code: cur.read_u32::<LE>()?,
            base_of_data: cur.read_u32::<LE>()?,
            image_base: cur.read_u32::<LE>()?,
            section_alignment: cur.read_u32::<LE>()?,
            file_alignment: cur.read_u32::<LE>()?,
            major_operating_system_version: cur.read_u16::<LE>()?,
            minor_operating_system_version: cur.read_u16::<LE>()?,
            major_image_version: cur.read_u16::<LE>()?,
            minor_image_version: cur.read_u16::<LE>()?,
            major_subsystem_version: cur.read_u16::<LE>()?,
            minor_subsystem_version: cur.read_u16::<LE>()?,
            win32_version_value: cur.read_u32::<LE>()?,
            size_of_image: cur.read_u32::<LE>()?,
            size_of_headers: cur.read_u32::<LE>()?,
            checksum: cur.read_u32::<LE>()?,
            subsystem: cur.read_u16::<LE>()?,
            dll_characteristics: cur.read_u16::<LE>()?,
            size_of_stack_reserve: cur.read_u32::<LE>()?,
            size_of_stack_commit: cur.read_u32::<LE>()?,
            size_of_heap_reserve: cur.read_u32::<LE>()?,
            size_of_heap_commit: cur.read_u32::<LE>()?,
            loader_flags: cur.read_u32::<LE>()?,
            number_of_rva_and_sizes: cur.read_u32::<LE>()?,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u16::<LE>(self.magic)?;
        w.write_u8(self.major_linker_version)?;
        w.write_u8(self.minor_linker_version)?;
        w.write_u32::<LE>(self.size_of_code)?;
        w.write_u32::<LE>(self.size_of_initialized_data)?;
        w.write_u32::<LE>(self.size_of_uninitialized_data)?;
        w.write_u32::<LE>(self.address_of_entry_point)?;
        w.write_u32::<LE>(self.base_of_code)?;
        w.write_u32::<LE>(self.base_of_data)?;
        w.write_u32::<LE>(self.image_base)?;
        w.write_u32::<LE>(self.section_alignment)?;
        w.write_u32::<LE>(self.file_alignment)?;
        w.write_u16::<LE>(self.major_operating_system_version)?;
        w.write_u16::<LE>(self.minor_operating_system_version)?;
        w.write_u16::<LE>(self.major_image_version)?;
        w.write_u16::<LE>(self.minor_image_version)?;
        w.write_u16::<LE>(self.major_subsystem_version)?;
        w.write_u16::<LE>(self.minor_subsystem_version)?;
        w.write_u32::<LE>(self.win32_version_value)?;
        w.write_u32::<LE>(self.size_of_image)?;
        w.write_u32::<LE>(self.size_of_headers)?;
        w.write_u32::<LE>(self.checksum)?;
        w.write_u16::<LE>(self.subsystem)?;
        w.write_u16::<LE>(self.dll_characteristics)?;
        w.write_u32::<LE>(self.size_of_stack_reserve)?;
        w.write_u32::<LE>(self.size_of_stack_commit)?;
        w.write_u32::<LE>(self.size_of_heap_reserve)?;
        w.write_u32::<LE>(self.size_of_heap_commit)?;
        w.write_u32::<LE>(self.loader_flags)?;
        w.write_u32::<LE>(self.number_of_rva_and_sizes)
    }
}

impl OptionalHeader64 {
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<OptionalHeader64> {
        let block = read_block::<_, OPTIONAL_HEADER64_SIZE>(reader, "PE32+ optional header")?;
        let mut cur = Cursor::new(&block[..]);

        Ok(OptionalHeader64 {
            magic: cur.read_u16::<LE>()?,
            major_linker_version: cur.read_u8()?,
            minor_linker_version: cur.read_u8()?,
            size_of_code: cur.read_u32::<LE>()?,
            size_of_initialized_data: cur.read_u32::<LE>()?,
            size_of_uninitialized_data: cur.read_u32::<LE>()?,
            address_of_entry_point: cur.read_u32::<LE>()?,
            base_of_code: cur.read_u32::<LE>()?,
            image_base: cur.read_u64::<LE>()?,
            section_alignment: cur.read_u32::<LE>()?,
            file_alignment: cur.read_u32::<LE>()?,
            major_operating_system_version: cur.read_u16::<LE>()?,
            minor_operating_system_version: cur.read_u16::<LE>()?,
            major_image_version: cur.read_u16::<LE>()?,
            minor_image_version: cur.read_u16::<LE>()?,
            major_subsystem_version: cur.read_u16::<LE>()?,
            minor_subsystem_version: cur.read_u16::<LE>()?,
            win32_version_value: cur.read_u32::<LE>()?,
            size_of_image: cur.read_u32::<LE>()?,
            size_of_headers: cur.read_u32::<LE>()?,
            checksum: cur.read_u32::<LE>()?,
            subsystem: cur.read_u16::<LE>()?,
            dll_characteristics: cur.read_u16::<LE>()?,
            size_of_stack_reserve: cur.read_u64::<LE>()?,
            size_of_stack_commit: cur.read_u64::<LE>()?,
            size_of_heap_reserve: cur.read_u64::<LE>()?,
            size_of_heap_commit: cur.read_u64::<LE>()?,
            loader_flags: cur.read_u32::<LE>()?,
            number_of_rva_and_sizes: cur.read_u32::<LE>()?,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u16::<LE>(self.magic)?;
        w.write_u8(self.major_linker_version)?;
        w.write_u8(self.minor_linker_version)?;
        w.write_u32::<LE>(self.size_of_code)?;
        w.write_u32::<LE>(self.size_of_initialized_data)?;
        w.write_u32::<LE>(self.size_of_uninitialized_data)?;
        w.write_u32::<LE>(self.address_of_entry_point)?;
        w.write_u32::<LE>(self.base_of_code)?;
        w.write_u64::<LE>(self.image_base)?;
        w.write_u32::<LE>(self.section_alignment)?;
        w.write_u32::<LE>(self.file_alignment)?;
        w.write_u16::<LE>(self.major_operating_system_version)?;
        w.write_u16::<LE>(self.minor_operating_system_version)?;
        w.write_u16::<LE>(self.major_image_version)?;
        w.write_u16::<LE>(self.minor_image_version)?;
        w.write_u16::<LE>(self.major_subsystem_version)?;
        w.write_u16::<LE>(self.minor_subsystem_version)?;
        w.write_u32::<LE>(self.win32_version_value)?;
        w.write_u32::<LE>(self.size_of_image)?;
        w.write_u32::<LE>(self.size_of_headers)?;
        w.write_u32::<LE>(self.checksum)?;
        w.write_u16::<LE>(self.subsystem)?;
        w.write_u16::<LE>(self.dll_characteristics)?;
        w.write_u64::<LE>(self.size_of_stack_reserve)?;
        w.write_u64::<LE>(self.size_of_stack_commit)?;
        w.write_u64::<LE>(self.size_of_heap_reserve)?;
        w.write_u64::<LE>(self.size_of_heap_commit)?;
        w.write_u32::<LE>(self.loader_flags)?;
        w.write_u32::<LE>(self.number_of_rva_and_sizes)
    }
}

impl OptionalHeader {
    pub fn magic(&self) -> u16 {
        match self {
            OptionalHeader::ThirtyTwo(h) => h.magic,
            OptionalHeader::SixtyFour(h) => h.magic,
        }
    }

    pub fn address_of_entry_point(&self) -> u32 {
        match self {
            OptionalHeader::ThirtyTwo(h) => h.address_of_entry_point,
            OptionalHeader::SixtyFour(h) => h.address_of_entry_point,
        }
    }

    /// Preferred load address, widened for PE32.
    pub fn image_base(&self) -> u64 {
        match self {
            OptionalHeader::ThirtyTwo(h) => h.image_base as u64,
            OptionalHeader::SixtyFour(h) => h.image_base,
        }
    }

    pub fn subsystem(&self) -> u16 {
        match self {
            OptionalHeader::ThirtyTwo(h) => h.subsystem,
            OptionalHeader::SixtyFour(h) => h.subsystem,
        }
    }

    pub fn is_64(&self) -> bool {
        matches!(self, OptionalHeader::SixtyFour(_))
    }

    /// Size of the committed layout on disk.
    pub fn size(&self) -> usize {
        match self {
            OptionalHeader::ThirtyTwo(_) => OPTIONAL_HEADER32_SIZE,
            OptionalHeader::SixtyFour(_) => OPTIONAL_HEADER64_SIZE,
        }
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        match self {
            OptionalHeader::ThirtyTwo(h) => h.write_to(w),
            OptionalHeader::SixtyFour(h) => h.write_to(w),
        }
    }
}

impl Fields for OptionalHeader32 {
    fn fields(&self) -> Vec<Field> {
        vec![
            Field::new("Magic", self.magic),
            Field::new("MajorLinkerVersion", self.major_linker_version),
            Field::new("MinorLinkerVersion", self.minor_linker_version),
            Field::new("SizeOfCode", self.size_of_code),
            Field::new("SizeOfInitializedData", self.size_of_initialized_data),
            Field::new("SizeOfUninitializedData", self.size_of_uninitialized_data),
            Field::new("AddressOfEntryPoint", self.address_of_entry_point),
            Field::new("BaseOfCode", self.base_of_code),
            Field::new("BaseOfData", self.base_of_data),
            Field::new("ImageBase", self.image_base),
            Field::new("SectionAlignment", self.section_alignment),
            Field::new("FileAlignment", self.file_alignment),
            Field::new("MajorOperatingSystemVersion", self.major_operating_system_version),
            Field::new("MinorOperatingSystemVersion", self.minor_operating_system_version),
            Field::new("MajorImageVersion", self.major_image_version),
            Field::new("MinorImageVersion", self.minor_image_version),
            Field::new("MajorSubsystemVersion", self.major_subsystem_version),
            Field::new("MinorSubsystemVersion", self.minor_subsystem_version),
            Field::new("Win32VersionValue", self.win32_version_value),
            Field::new("ImageSize", self.size_of_image),
            Field::new("SizeOfHeaders", self.size_of_headers),
            Field::new("CheckSum", self.checksum),
            Field::new("Subsystem", self.subsystem),
            Field::new("DllCharacteristics", self.dll_characteristics),
            Field::new("SizeOfStackReserve", self.size_of_stack_reserve),
            Field::new("SizeOfStackCommit", self.size_of_stack_commit),
            Field::new("SizeOfHeapReserve", self.size_of_heap_reserve),
            Field::new("SizeOfHeapCommit", self.size_of_heap_commit),
            Field::new("LoaderFlags", self.loader_flags),
            Field::new("NumberOfRvaAndSizes", self.number_of_rva_and_sizes),
        ]
    }
}

impl Fields for OptionalHeader64 {
    fn fields(&self) -> Vec<Field> {
        vec![
            Field::new("Magic", self.magic),
            Field::new("MajorLinkerVersion", self.major_linker_version),
            Field::new("MinorLinkerVersion", self.minor_linker_version),
            Field::new("SizeOfCode", self.size_of_code),
            Field::new("SizeOfInitializedData", self.size_of_initialized_data),
            Field::new("SizeOfUninitializedData", self.size_of_uninitialized_data),
            Field::new("AddressOfEntryPoint", self.address_of_entry_point),
            Field::new("BaseOfCode", self.base_of_code),
            Field::new("ImageBase", self.image_base),
            Field::new("SectionAlignment", self.section_alignment),
            Field::new("FileAlignment", self.file_alignment),
            Field::new("MajorOperatingSystemVersion", self.major_operating_system_version),
            Field::new("MinorOperatingSystemVersion", self.minor_operating_system_version),
            Field::new("MajorImageVersion", self.major_image_version),
            Field::new("MinorImageVersion", self.minor_image_version),
            Field::new("MajorSubsystemVersion", self.major_subsystem_version),
            Field::new("MinorSubsystemVersion", self.minor_subsystem_version),
            Field::new("Win32VersionValue", self.win32_version_value),
            Field::new("ImageSize", self.size_of_image),
            Field::new("SizeOfHeaders", self.size_of_headers),
            Field::new("CheckSum", self.checksum),
            Field::new("Subsystem", self.subsystem),
            Field::new("DllCharacteristics", self.dll_characteristics),
            Field::new("SizeOfStackReserve", self.size_of_stack_reserve),
            Field::new("SizeOfStackCommit", self.size_of_stack_commit),
            Field::new("SizeOfHeapReserve", self.size_of_heap_reserve),
            Field::new("SizeOfHeapCommit", self.size_of_heap_commit),
            Field::new("LoaderFlags", self.loader_flags),
            Field::new("NumberOfRvaAndSizes", self.number_of_rva_and_sizes),
        ]
    }
}

impl Fields for OptionalHeader {
    fn fields(&self) -> Vec<Field> {
        match self {
            OptionalHeader::ThirtyTwo(h) => h.fields(),
            OptionalHeader::SixtyFour(h) => h.fields(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::FieldValue;

    #[test]
    fn pe32_layout_offsets() {
        let mut bytes = vec![0u8; OPTIONAL_HEADER32_SIZE];
        bytes[0..2].copy_from_slice(&OPTIONAL_HEADER_MAGIC_PE32.to_le_bytes());
        bytes[16..20].copy_from_slice(&0x1000u32.to_le_bytes());
        bytes[24..28].copy_from_slice(&0x3000u32.to_le_bytes());
        bytes[28..32].copy_from_slice(&0x0040_0000u32.to_le_bytes());
        bytes[72..76].copy_from_slice(&0x0010_0000u32.to_le_bytes());
        bytes[92..96].copy_from_slice(&16u32.to_le_bytes());

        let header = OptionalHeader32::from_reader(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(header.address_of_entry_point, 0x1000);
        assert_eq!(header.base_of_data, 0x3000);
        assert_eq!(header.image_base, 0x0040_0000);
        assert_eq!(header.size_of_stack_reserve, 0x0010_0000);
        assert_eq!(header.number_of_rva_and_sizes, 16);
    }

    #[test]
    fn pe32_plus_layout_offsets() {
        let mut bytes = vec![0u8; OPTIONAL_HEADER64_SIZE];
        bytes[0..2].copy_from_slice(&OPTIONAL_HEADER_MAGIC_PE32_PLUS.to_le_bytes());
        bytes[24..32].copy_from_slice(&0x0001_4000_0000u64.to_le_bytes());
        bytes[68..70].copy_from_slice(&3u16.to_le_bytes());
        bytes[72..80].copy_from_slice(&0x0010_0000u64.to_le_bytes());
        bytes[108..112].copy_from_slice(&16u32.to_le_bytes());

        let header = OptionalHeader64::from_reader(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(header.image_base, 0x0001_4000_0000);
        assert_eq!(header.subsystem, 3);
        assert_eq!(header.size_of_stack_reserve, 0x0010_0000);
        assert_eq!(header.number_of_rva_and_sizes, 16);
    }

    #[test]
    fn encoded_sizes_match_layouts() {
        let bytes32 = vec![0u8; OPTIONAL_HEADER32_SIZE];
        let h32 = OptionalHeader32::from_reader(&mut Cursor::new(bytes32)).unwrap();
        let mut out = Vec::new();
        OptionalHeader::ThirtyTwo(h32).write_to(&mut out).unwrap();
        assert_eq!(out.len(), OPTIONAL_HEADER32_SIZE);

        let bytes64 = vec![0u8; OPTIONAL_HEADER64_SIZE];
        let h64 = OptionalHeader64::from_reader(&mut Cursor::new(bytes64)).unwrap();
        let mut out = Vec::new();
        OptionalHeader::SixtyFour(h64).write_to(&mut out).unwrap();
        assert_eq!(out.len(), OPTIONAL_HEADER64_SIZE);
    }

    #[test]
    fn pe32_plus_fields_omit_base_of_data() {
        let bytes = vec![0u8; OPTIONAL_HEADER64_SIZE];
        let header = OptionalHeader64::from_reader(&mut Cursor::new(bytes)).unwrap();
        let fields = header.fields();
        assert!(fields.iter().all(|f| f.name != "BaseOfData"));
        let image_base = fields.iter().find(|f| f.name == "ImageBase").unwrap();
        assert_eq!(image_base.value, FieldValue::Qword(0));
    }
}
