//! Section Header table (C3): the 40-byte records that follow the
//! optional header and describe every section in the image.

use bitflags::bitflags;
use bytemuck::checked::try_from_bytes;
use bytemuck::{Pod, Zeroable};
use core::fmt;

use crate::error::{Error, Result};

/// Size in bytes of one [`SectionHeader`] record on the wire.
pub const SECTION_HEADER_SIZE: usize = 40;

/// Contains information such as name, size, characteristics
/// and location of a section in the binary.
#[derive(Copy, Clone, Pod, Zeroable, Default, Debug)]
#[repr(C)]
pub struct SectionHeader {
    /// An 8-byte, null-padded ASCII name. If exactly 8 characters long,
    /// there is no terminating null.
    pub name: [u8; 8],
    /// The total size of the section when loaded into memory.
    pub virtual_size: u32,
    /// The address of the first byte of the section relative to the image base when loaded.
    pub virtual_address: u32,
    /// The size of the section (object files) or of the initialized data on disk (image files).
    pub size_of_raw_data: u32,
    /// The file pointer to the first page of the section within the file.
    pub pointer_to_raw_data: u32,
    /// The file pointer to the beginning of relocation entries for the section.
    pub pointer_to_relocations: u32,
    /// The file pointer to the beginning of line-number entries for the section.
    pub pointer_to_linenumbers: u32,
    /// The number of relocation entries for the section.
    pub number_of_relocations: u16,
    /// The number of line-number entries for the section.
    pub number_of_linenumbers: u16,
    /// The flags that describe the characteristics of the section.
    pub characteristics: u32,
}

impl fmt::Display for SectionHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name_lossy();
        let characteristics = self.get_characteristics();

        writeln!(f, "Section Header")?;
        writeln!(f, "--------------")?;
        writeln!(f, "Name:                    {name:?}")?;
        writeln!(f, "Virtual Size:            {}", self.virtual_size)?;
        writeln!(f, "Virtual Address:         {:#010x}", self.virtual_address)?;
        writeln!(f, "Size of Raw Data:        {}", self.size_of_raw_data)?;
        writeln!(f, "Pointer to Raw Data:     {}", self.pointer_to_raw_data)?;
        writeln!(f, "Pointer to Relocations:  {}", self.pointer_to_relocations)?;
        writeln!(f, "Pointer to Line-numbers: {}", self.pointer_to_linenumbers)?;
        writeln!(f, "Number of Relocations:   {}", self.number_of_relocations)?;
        writeln!(f, "Number of Line-numbers:  {}", self.number_of_linenumbers)?;
        writeln!(f, "Characteristics:         {characteristics:?}")?;

        Ok(())
    }
}

bitflags! {
    /// Bitflags that contain various information about
    /// how a section should be loaded.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionFlags: u32 {
        const IMAGE_SCN_TYPE_NO_PAD = 0x00000008;
        const IMAGE_SCN_CNT_CODE = 0x00000020;
        const IMAGE_SCN_CNT_INITALIZED_DATA = 0x00000040;
        const IMAGE_SCN_CNT_UNINITALIZED_DATA = 0x00000080;
        const IMAGE_SCN_LNK_OTHER = 0x00000100;
        const IMAGE_SCN_LNK_INFO = 0x00000200;
        const IMAGE_SCN_LNK_REMOVE = 0x00000800;
        const IMAGE_SCN_LNK_COMDAT = 0x00001000;
        const IMAGE_SCN_GPREL = 0x00008000;
        const IMAGE_SCN_MEM_PURGABLE = 0x00020000;
        const IMAGE_SCN_MEM_LOCKED = 0x00040000;
        const IMAGE_SCN_MEM_PRELOAD = 0x00080000;
        const IMAGE_SCN_ALIGN_1BYTES = 0x00100000;
        const IMAGE_SCN_ALIGN_2BYTES = 0x00200000;
        const IMAGE_SCN_ALIGN_4BYTES = 0x00300000;
        const IMAGE_SCN_ALIGN_8BYTES = 0x00400000;
        const IMAGE_SCN_ALIGN_16BYTES = 0x00500000;
        const IMAGE_SCN_ALIGN_32BYTES = 0x00600000;
        const IMAGE_SCN_ALIGN_64BYTES = 0x00700000;
        const IMAGE_SCN_ALIGN_128BYTES = 0x00800000;
        const IMAGE_SCN_ALIGN_256BYTES = 0x00900000;
        const IMAGE_SCN_ALIGN_512BYTES = 0x00A00000;
        const IMAGE_SCN_ALIGN_1024BYTES = 0x00B00000;
        const IMAGE_SCN_ALIGN_2048BYTES = 0x00C00000;
        const IMAGE_SCN_ALIGN_4096BYTES = 0x00D00000;
        const IMAGE_SCN_ALIGN_8192BYTES = 0x00E00000;
        const IMAGE_SCN_LNK_NRELOC_OVFL = 0x01000000;
        const IMAGE_SCN_MEM_DISCARDABLE = 0x02000000;
        const IMAGE_SCN_MEM_NOT_CACHED = 0x04000000;
        const IMAGE_SCN_MEM_NOT_PAGED = 0x08000000;
        const IMAGE_SCN_MEM_SHARED = 0x10000000;
        const IMAGE_SCN_MEM_EXECUTE = 0x20000000;
        const IMAGE_SCN_MEM_READ = 0x40000000;
        const IMAGE_SCN_MEM_WRITE = 0x80000000;
    }
}

impl SectionHeader {
    /// Returns the section name as a `.`-prefixed string, stopping at the
    /// first null byte. The field is not guaranteed to be null-terminated
    /// (an 8-character name fills the whole array), so this never reads
    /// past the fixed 8-byte array.
    pub fn name_lossy(&self) -> String {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(8);
        String::from_utf8_lossy(&self.name[..len]).into_owned()
    }

    /// True if the raw 8-byte name field equals `literal` exactly, treating
    /// trailing nulls in `literal` as padding (used for `.cormeta` matching
    /// per §4.3, where the field may or may not be null-terminated).
    pub fn name_matches(&self, literal: &str) -> bool {
        let lit = literal.as_bytes();
        if lit.len() > 8 {
            return false;
        }
        self.name[..lit.len()] == *lit && self.name[lit.len()..].iter().all(|&b| b == 0)
    }

    /// Returns the Section Characteristics as bitflags. Unknown bits are preserved.
    pub fn get_characteristics(&self) -> SectionFlags {
        SectionFlags::from_bits_retain(self.characteristics)
    }
}

/// Decodes `number_of_sections` section headers starting at `offset`.
///
/// Every header must fit entirely within `bytes` — a header straddling
/// the end of the region is a format error, not a header that gets
/// silently dropped (§3 invariant 1 requires `coff.section_count ==
/// |sections|`, so a partially-decoded table cannot be returned).
pub fn parse_section_table(bytes: &[u8], offset: usize, number_of_sections: u16) -> Result<Vec<SectionHeader>> {
    let mut headers = Vec::with_capacity(number_of_sections as usize);
    let mut cursor = offset;

    for _ in 0..number_of_sections {
        let slice = bytes
            .get(cursor..cursor + SECTION_HEADER_SIZE)
            .ok_or(Error::BadFormat("section table overruns the region"))?;
        let header: SectionHeader = *try_from_bytes(slice)
            .map_err(|_| Error::BadFormat("section header did not parse"))?;
        headers.push(header);
        cursor += SECTION_HEADER_SIZE;
    }

    #[cfg(feature = "logging")]
    log::debug!("decoded {} section headers starting at {offset:#x}", headers.len());

    Ok(headers)
}

/// Finds the first section whose raw-name field is `.cormeta`, used by
/// the COFF-object decode path to locate CLR metadata without a data
/// directory (§4.3 "CoffOnly branch").
pub fn find_cormeta<'a>(sections: &'a [SectionHeader]) -> Option<&'a SectionHeader> {
    sections.iter().find(|s| s.name_matches(".cormeta"))
}

/// §3 invariant 2: every section's declared span must fit within the file.
pub fn validate_on_disk_span(section: &SectionHeader, file_length: u64) -> Result<()> {
    let end = section.pointer_to_raw_data as u64 + section.size_of_raw_data as u64;
    if end > file_length {
        return Err(Error::BadFormat("section raw data span exceeds file length"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section_with_name(name: &[u8; 8]) -> SectionHeader {
        SectionHeader {
            name: *name,
            ..Default::default()
        }
    }

    #[test]
    fn matches_non_null_terminated_eight_byte_name() {
        let section = section_with_name(b".cormeta");
        assert!(section.name_matches(".cormeta"));
    }

    #[test]
    fn matches_null_padded_short_name() {
        let section = section_with_name(b".text\0\0\0");
        assert!(section.name_matches(".text"));
        assert!(!section.name_matches(".cormeta"));
    }

    #[test]
    fn find_cormeta_locates_the_right_section() {
        let sections = vec![section_with_name(b".text\0\0\0"), section_with_name(b".cormeta")];
        let found = find_cormeta(&sections).unwrap();
        assert_eq!(found.name_lossy(), ".cormeta");
    }

    #[test]
    fn on_disk_span_exceeding_file_length_is_rejected() {
        let section = SectionHeader {
            pointer_to_raw_data: 100,
            size_of_raw_data: 50,
            ..Default::default()
        };
        assert!(validate_on_disk_span(&section, 120).is_err());
        assert!(validate_on_disk_span(&section, 150).is_ok());
    }

    #[test]
    fn overrunning_section_table_is_bad_format() {
        let bytes = vec![0u8; 40];
        let result = parse_section_table(&bytes, 0, 2);
        assert!(matches!(result, Err(Error::BadFormat(_))));
    }
}
