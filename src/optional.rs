//! Optional Header (C3): the PE32 / PE32+ variant pair, folded into a
//! single normalized [`OptionalHeader`] view.
//!
//! The two on-wire layouts (§6's "bit-exact formats") differ only in the
//! width of `image_base`, the four stack/heap size fields, and whether
//! `base_of_data` is present at all. Everything after the fixed prefix is
//! a variable-length array of `(rva, size)` data directories whose count
//! is governed by `number_of_rva_and_sizes`, not by the struct's size —
//! so unlike the fixed prefix, the directory array is read with the
//! bounds-checked cursor rather than cast wholesale with `bytemuck`.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use core::fmt;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::cursor::{read_u16, read_u32};
use crate::error::{Error, Result};

/// Number of named data-directory slots a PE optional header can carry (§3).
pub const NUM_DIRECTORIES: usize = 16;

/// Named indices into [`OptionalHeader::data_directories`], per §3.
pub mod directory_index {
    pub const EXPORT: usize = 0;
    pub const IMPORT: usize = 1;
    pub const RESOURCE: usize = 2;
    pub const EXCEPTION: usize = 3;
    pub const SECURITY: usize = 4;
    pub const BASE_RELOC: usize = 5;
    pub const DEBUG: usize = 6;
    pub const ARCHITECTURE: usize = 7;
    pub const GLOBAL_PTR: usize = 8;
    pub const TLS: usize = 9;
    pub const LOAD_CONFIG: usize = 10;
    pub const BOUND_IMPORT: usize = 11;
    pub const IAT: usize = 12;
    pub const DELAY_IMPORT: usize = 13;
    pub const COM_DESCRIPTOR: usize = 14;
    pub const RESERVED: usize = 15;
}

/// Magic values that determine if an Optional Header is
/// PE32 (32-bit) or PE32+ (64-bit).
#[derive(FromPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Magic {
    /// Magic value for 32-bit PEs
    PE32 = 0x10b,
    /// Magic value for 64-bit PEs
    PE32Plus = 0x20b,
}

/// The address and size of a table Windows uses, per §3's glossary entry.
#[derive(Copy, Clone, Pod, Zeroable, Default, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct DataDirectory {
    /// RVA of the table, relative to the image base once loaded.
    pub virtual_address: u32,
    /// Size of the table in bytes.
    pub size: u32,
}

impl DataDirectory {
    /// A directory with a zero RVA is considered absent (§4.4).
    pub fn is_empty(&self) -> bool {
        self.virtual_address == 0
    }
}

/// The fixed, non-variable prefix of a PE32 optional header (96 bytes, §6).
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
struct OptionalHeaderPrefix32 {
    magic: u16,
    major_linker_version: u8,
    minor_linker_version: u8,
    size_of_code: u32,
    size_of_initialized_data: u32,
    size_of_uninitialized_data: u32,
    address_of_entry_point: u32,
    base_of_code: u32,
    base_of_data: u32,
    image_base: u32,
    section_alignment: u32,
    file_alignment: u32,
    major_operating_system_version: u16,
    minor_operating_system_version: u16,
    major_image_version: u16,
    minor_image_version: u16,
    major_subsystem_version: u16,
    minor_subsystem_version: u16,
    win32_version_value: u32,
    size_of_image: u32,
    size_of_headers: u32,
    check_sum: u32,
    subsystem: u16,
    dll_characteristics: u16,
    size_of_stack_reserve: u32,
    size_of_stack_commit: u32,
    size_of_heap_reserve: u32,
    size_of_heap_commit: u32,
    loader_flags: u32,
    number_of_rva_and_sizes: u32,
}

const _: () = assert!(core::mem::size_of::<OptionalHeaderPrefix32>() == 96);

/// The fixed, non-variable prefix of a PE32+ optional header (112 bytes, §6).
#[derive(Copy, Clone, Pod, Zeroable, Default)]
#[repr(C)]
struct OptionalHeaderPrefix64 {
    magic: u16,
    major_linker_version: u8,
    minor_linker_version: u8,
    size_of_code: u32,
    size_of_initialized_data: u32,
    size_of_uninitialized_data: u32,
    address_of_entry_point: u32,
    base_of_code: u32,
    image_base: u64,
    section_alignment: u32,
    file_alignment: u32,
    major_operating_system_version: u16,
    minor_operating_system_version: u16,
    major_image_version: u16,
    minor_image_version: u16,
    major_subsystem_version: u16,
    minor_subsystem_version: u16,
    win32_version_value: u32,
    size_of_image: u32,
    size_of_headers: u32,
    check_sum: u32,
    subsystem: u16,
    dll_characteristics: u16,
    size_of_stack_reserve: u64,
    size_of_stack_commit: u64,
    size_of_heap_reserve: u64,
    size_of_heap_commit: u64,
    loader_flags: u32,
    number_of_rva_and_sizes: u32,
}

const _: () = assert!(core::mem::size_of::<OptionalHeaderPrefix64>() == 112);

/// Normalized, variant-unifying Optional Header (§3). `base_of_data` is
/// zero under PE32+, where the field does not exist on the wire.
#[derive(Debug, Clone)]
pub struct OptionalHeader {
    /// Which on-wire layout this was decoded from.
    pub magic: Magic,
    /// The linker major version number.
    pub major_linker_version: u8,
    /// The linker minor version number.
    pub minor_linker_version: u8,
    /// The size of the code (text) section, or the sum of all code sections if there are multiple sections.
    pub size_of_code: u32,
    /// The size of the initialized data section, or the sum of all such sections if there are multiple data sections.
    pub size_of_initialized_data: u32,
    /// The size of the uninitialized data section (BSS), or the sum of all such sections if there are multiple BSS sections.
    pub size_of_uninitialized_data: u32,
    /// The address of the entry point relative to the image base when the executable file is loaded into memory.
    /// For program images, this is the starting address.
    /// For device drivers, this is the address of the initialization function.
    /// An entry point is optional for DLLs. When no entry point is present, this field must be zero.
    pub address_of_entry_point: u32,
    /// The address that is relative to the image base of the beginning-of-code section when it is loaded into memory.
    pub base_of_code: u32,
    /// (PE32 Only) The address that is relative to the image base of the beginning-of-data section when it is loaded into memory.
    /// Only meaningful when `magic == Magic::PE32`; zero under PE32+.
    pub base_of_data: u32,
    /// The preferred address of the first byte of image when loaded into memory; must be a multiple of 64 K.
    /// The default for DLLs is 0x10000000. The default for Windows CE EXEs is 0x00010000.
    /// The default for Windows NT, Windows 2000, Windows XP, Windows 95, Windows 98, and Windows Me is 0x00400000.
    pub image_base: u64,
    /// The alignment (in bytes) of sections when they are loaded into memory.
    /// It must be greater than or equal to `file_alignment`. The default is the page size for the architecture.
    pub section_alignment: u32,
    /// The alignment factor (in bytes) that is used to align the raw data of sections in the image file.
    /// The value should be a power of 2 between 512 and 64 K, inclusive. The default is 512.
    /// If the `section_alignment` is less than the architecture's page size, then `file_alignment` must match `section_alignment`.
    pub file_alignment: u32,
    /// The major version number of the required operating system.
    pub major_operating_system_version: u16,
    /// The minor version number of the required operating system.
    pub minor_operating_system_version: u16,
    /// The major version number of the image.
    pub major_image_version: u16,
    /// The minor version number of the image.
    pub minor_image_version: u16,
    /// The major version number of the subsystem.
    pub major_subsystem_version: u16,
    /// The minor version number of the subsystem.
    pub minor_subsystem_version: u16,
    /// Reserved, must be zero.
    pub win32_version_value: u32,
    /// The size (in bytes) of the image, including all headers, as the image is loaded in memory. It must be a multiple of `section_alignment`.
    pub size_of_image: u32,
    /// The combined size of an MS-DOS stub, PE header, and section headers rounded up to a multiple of `file_alignment`.
    pub size_of_headers: u32,
    /// The image file checksum. The algorithm for computing the checksum is incorporated into IMAGHELP.DLL.
    /// The following are checked for validation at load time: all drivers, any DLL loaded at boot time, and any DLL that is loaded into a critical Windows process.
    pub check_sum: u32,
    /// The subsystem that is required to run this image.
    pub subsystem: u16,
    /// Bitflag characteristics that describe how a DLL should be loaded.
    pub dll_characteristics: u16,
    /// The size of the stack to reserve. Only `size_of_stack_commit` is committed; the rest is made available one page at a time until the reserve size is reached.
    pub size_of_stack_reserve: u64,
    /// The size of the stack to commit.
    pub size_of_stack_commit: u64,
    /// The size of the local heap space to reserve. Only `size_of_heap_commit` is committed; the rest is made available one page at a time until the reserve size is reached.
    pub size_of_heap_reserve: u64,
    /// The size of the local heap space to commit.
    pub size_of_heap_commit: u64,
    /// Reserved, must be zero.
    pub loader_flags: u32,
    /// The number of data-directory entries in the remainder of the optional header. Each describes a location and size.
    pub number_of_rva_and_sizes: u32,
    /// Always 16 entries; slots at or beyond `number_of_rva_and_sizes` are
    /// zeroed, not an error (§4.3's "Edge-case policies").
    pub data_directories: [DataDirectory; NUM_DIRECTORIES],
}

impl OptionalHeader {
    /// Returns the data directory at `index`. Slots beyond
    /// `number_of_rva_and_sizes` read back as zeroed (absent).
    pub fn directory(&self, index: usize) -> DataDirectory {
        self.data_directories[index]
    }

    /// Returns the subsystem as an enum, if recognized.
    pub fn get_subsystem(&self) -> Option<Subsystem> {
        Subsystem::from_u16(self.subsystem)
    }

    /// Returns the DLL Characteristics as bitflags.
    pub fn get_dll_characteristics(&self) -> DLLCharacteristics {
        DLLCharacteristics::from_bits_retain(self.dll_characteristics)
    }
}

/// Reads the optional header starting at `*offset`, advancing `*offset`
/// past it using `opt_header_size` from the COFF header — not a fixed
/// 16-entry directory array, since `opt_header_size` is what actually
/// governs where the section table starts (§4.3).
pub fn parse_optional_header(bytes: &[u8], offset: &mut usize, opt_header_size: u16) -> Result<OptionalHeader> {
    let start = *offset;
    let magic_raw = read_u16(bytes, start)?;
    let magic = Magic::from_u16(magic_raw).ok_or(Error::BadFormat("unrecognized optional header magic"))?;

    let (fixed_size, number_of_rva_and_sizes, mut normalized) = match magic {
        Magic::PE32 => {
            let fixed_size = core::mem::size_of::<OptionalHeaderPrefix32>();
            let slice = bytes
                .get(start..start + fixed_size)
                .ok_or(Error::OutOfBounds)?;
            let prefix: OptionalHeaderPrefix32 = *bytemuck::checked::try_from_bytes(slice)
                .map_err(|_| Error::BadFormat("optional header (PE32) prefix did not parse"))?;
            let normalized = OptionalHeader {
                magic,
                major_linker_version: prefix.major_linker_version,
                minor_linker_version: prefix.minor_linker_version,
                size_of_code: prefix.size_of_code,
                size_of_initialized_data: prefix.size_of_initialized_data,
                size_of_uninitialized_data: prefix.size_of_uninitialized_data,
                address_of_entry_point: prefix.address_of_entry_point,
                base_of_code: prefix.base_of_code,
                base_of_data: prefix.base_of_data,
                image_base: prefix.image_base as u64,
                section_alignment: prefix.section_alignment,
                file_alignment: prefix.file_alignment,
                major_operating_system_version: prefix.major_operating_system_version,
                minor_operating_system_version: prefix.minor_operating_system_version,
                major_image_version: prefix.major_image_version,
                minor_image_version: prefix.minor_image_version,
                major_subsystem_version: prefix.major_subsystem_version,
                minor_subsystem_version: prefix.minor_subsystem_version,
                win32_version_value: prefix.win32_version_value,
                size_of_image: prefix.size_of_image,
                size_of_headers: prefix.size_of_headers,
                check_sum: prefix.check_sum,
                subsystem: prefix.subsystem,
                dll_characteristics: prefix.dll_characteristics,
                size_of_stack_reserve: prefix.size_of_stack_reserve as u64,
                size_of_stack_commit: prefix.size_of_stack_commit as u64,
                size_of_heap_reserve: prefix.size_of_heap_reserve as u64,
                size_of_heap_commit: prefix.size_of_heap_commit as u64,
                loader_flags: prefix.loader_flags,
                number_of_rva_and_sizes: prefix.number_of_rva_and_sizes,
                data_directories: [DataDirectory::default(); NUM_DIRECTORIES],
            };
            (fixed_size, prefix.number_of_rva_and_sizes, normalized)
        }
        Magic::PE32Plus => {
            let fixed_size = core::mem::size_of::<OptionalHeaderPrefix64>();
            let slice = bytes
                .get(start..start + fixed_size)
                .ok_or(Error::OutOfBounds)?;
            let prefix: OptionalHeaderPrefix64 = *bytemuck::checked::try_from_bytes(slice)
                .map_err(|_| Error::BadFormat("optional header (PE32+) prefix did not parse"))?;
            let normalized = OptionalHeader {
                magic,
                major_linker_version: prefix.major_linker_version,
                minor_linker_version: prefix.minor_linker_version,
                size_of_code: prefix.size_of_code,
                size_of_initialized_data: prefix.size_of_initialized_data,
                size_of_uninitialized_data: prefix.size_of_uninitialized_data,
                address_of_entry_point: prefix.address_of_entry_point,
                base_of_code: prefix.base_of_code,
                base_of_data: 0,
                image_base: prefix.image_base,
                section_alignment: prefix.section_alignment,
                file_alignment: prefix.file_alignment,
                major_operating_system_version: prefix.major_operating_system_version,
                minor_operating_system_version: prefix.minor_operating_system_version,
                major_image_version: prefix.major_image_version,
                minor_image_version: prefix.minor_image_version,
                major_subsystem_version: prefix.major_subsystem_version,
                minor_subsystem_version: prefix.minor_subsystem_version,
                win32_version_value: prefix.win32_version_value,
                size_of_image: prefix.size_of_image,
                size_of_headers: prefix.size_of_headers,
                check_sum: prefix.check_sum,
                subsystem: prefix.subsystem,
                dll_characteristics: prefix.dll_characteristics,
                size_of_stack_reserve: prefix.size_of_stack_reserve,
                size_of_stack_commit: prefix.size_of_stack_commit,
                size_of_heap_reserve: prefix.size_of_heap_reserve,
                size_of_heap_commit: prefix.size_of_heap_commit,
                loader_flags: prefix.loader_flags,
                number_of_rva_and_sizes: prefix.number_of_rva_and_sizes,
                data_directories: [DataDirectory::default(); NUM_DIRECTORIES],
            };
            (fixed_size, prefix.number_of_rva_and_sizes, normalized)
        }
    };

    // §4.3 edge case: opt_header_size must have room for every directory
    // the header claims, once the count reaches the threshold where a
    // missing slot would otherwise be silently treated as absent.
    if number_of_rva_and_sizes >= 15
        && (opt_header_size as usize) < fixed_size + NUM_DIRECTORIES * 8
    {
        return Err(Error::BadFormat(
            "optional header size inconsistent with number of data directories",
        ));
    }

    let present = (number_of_rva_and_sizes as usize).min(NUM_DIRECTORIES);
    let mut data_directories = [DataDirectory::default(); NUM_DIRECTORIES];
    let mut cursor = start + fixed_size;
    for slot in data_directories.iter_mut().take(present) {
        let rva = read_u32(bytes, cursor)?;
        let size = read_u32(bytes, cursor + 4)?;
        *slot = DataDirectory { virtual_address: rva, size };
        cursor += 8;
    }

    normalized.data_directories = data_directories;
    *offset = start + opt_header_size as usize;

    Ok(normalized)
}

/// The following values defined for the Subsystem field of the optional header
/// determine which Windows subsystem (if any) is required to run the image.
#[derive(FromPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Subsystem {
    /// An unknown subsystem
    Unknown = 0,
    /// Device drivers and native Windows processes
    Native = 1,
    /// The Windows graphical user interface (GUI) subsystem
    WindowsGUI = 2,
    /// The Windows character subsystem
    WindowsCUI = 3,
    /// The OS/2 character subsystem
    OS2CUI = 5,
    /// The Posix character subsystem
    PosixCUI = 7,
    /// Native Win9x driver
    NativeWindows = 8,
    /// Windows CE
    WindowsCEGUI = 9,
    /// An Extensible Firmware Interface (EFI) application
    EFIApplication = 10,
    /// An EFI driver with boot services
    EFIBootServiceDriver = 11,
    /// An EFI driver with run-time services
    EFIRuntimeDriver = 12,
    /// An EFI ROM image
    EFIROM = 13,
    /// XBOX
    XBOX = 14,
    /// Windows boot application
    WindowsBootApplication = 16,
}

bitflags! {
    /// Bitflags that contain various information about
    /// how a given DLL should be loaded.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DLLCharacteristics: u16 {
        const IMAGE_DLLCHARACTERISTICS_HIGH_ENTROPY_VA = 0x0020;
        const IMAGE_DLLCHARACTERISTICS_DYNAMIC_BASE = 0x0040;
        const IMAGE_DLLCHARACTERISTICS_FORCE_INTEGRITY = 0x0080;
        const IMAGE_DLLCHARACTERISTICS_NX_COMPAT = 0x0100;
        const IMAGE_DLLCHARACTERISTICS_NO_ISOLATION = 0x0200;
        const IMAGE_DLLCHARACTERISTICS_NO_SEH = 0x0400;
        const IMAGE_DLLCHARACTERISTICS_NO_BIND = 0x0800;
        const IMAGE_DLLCHARACTERISTICS_APPCONTAINER = 0x1000;
        const IMAGE_DLLCHARACTERISTICS_WDM_DRIVER = 0x2000;
        const IMAGE_DLLCHARACTERISTICS_GUARD_CF = 0x4000;
        const IMAGE_DLLCHARACTERISTICS_TERMINAL_SERVER_AWARE = 0x8000;
    }
}

impl fmt::Display for OptionalHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subsystem = self.get_subsystem();
        let dll_characteristics = self.get_dll_characteristics();

        writeln!(f, "Optional Header")?;
        writeln!(f, "---------------")?;
        writeln!(f, "Magic:                      {:?}", self.magic)?;
        writeln!(f, "Linker Version:             {}.{}", self.major_linker_version, self.minor_linker_version)?;
        writeln!(f, "Size of Code:               {}", self.size_of_code)?;
        writeln!(f, "Address of Entry Point:     {:#010x}", self.address_of_entry_point)?;
        writeln!(f, "Image Base:                 {:#010x}", self.image_base)?;
        writeln!(f, "Size of Image:              {}", self.size_of_image)?;
        writeln!(f, "Size of Headers:            {}", self.size_of_headers)?;
        writeln!(f, "Subsystem:                  {subsystem:?}")?;
        writeln!(f, "DLL Characteristics:        {dll_characteristics:?}")?;
        writeln!(f, "Number of RVA and Sizes:    {}", self.number_of_rva_and_sizes)?;
        for (i, dir) in self.data_directories.iter().enumerate() {
            writeln!(f, "  [{i:>2}] {:#010x} ({})", dir.virtual_address, dir.size)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_pe32(num_rva_and_sizes: u32, opt_header_size: u16) -> Vec<u8> {
        let mut bytes = vec![0u8; 96];
        bytes[0..2].copy_from_slice(&(Magic::PE32 as u16).to_le_bytes());
        bytes[92..96].copy_from_slice(&num_rva_and_sizes.to_le_bytes());
        bytes.resize(opt_header_size as usize, 0);
        bytes
    }

    fn build_pe32_plus(num_rva_and_sizes: u32, opt_header_size: u16) -> Vec<u8> {
        let mut bytes = vec![0u8; 112];
        bytes[0..2].copy_from_slice(&(Magic::PE32Plus as u16).to_le_bytes());
        bytes[108..112].copy_from_slice(&num_rva_and_sizes.to_le_bytes());
        bytes.resize(opt_header_size as usize, 0);
        bytes
    }

    #[test]
    fn parses_pe32_header_with_full_directories() {
        let bytes = build_pe32(16, 96 + 16 * 8);
        let mut offset = 0;
        let header = parse_optional_header(&bytes, &mut offset, 96 + 16 * 8).unwrap();
        assert_eq!(header.magic, Magic::PE32);
        assert_eq!(header.base_of_data, 0);
        assert_eq!(offset, bytes.len());
    }

    #[test]
    fn parses_pe32_plus_header_widens_image_base() {
        let mut bytes = build_pe32_plus(16, 112 + 16 * 8);
        // image_base lives at offset 24 in the PE32+ prefix.
        bytes[24..32].copy_from_slice(&0x1_8000_0000u64.to_le_bytes());
        let mut offset = 0;
        let header = parse_optional_header(&bytes, &mut offset, 112 + 16 * 8).unwrap();
        assert_eq!(header.magic, Magic::PE32Plus);
        assert_eq!(header.image_base, 0x1_8000_0000);
        assert_eq!(header.base_of_data, 0);
    }

    #[test]
    fn fourteen_directories_is_not_an_error() {
        let bytes = build_pe32(14, 96 + 14 * 8);
        let mut offset = 0;
        let header = parse_optional_header(&bytes, &mut offset, 96 + 14 * 8).unwrap();
        assert!(header.directory(directory_index::COM_DESCRIPTOR).is_empty());
    }

    #[test]
    fn truncated_header_with_sixteen_directories_claimed_is_bad_format() {
        // num_rva_and_sizes = 16 but opt_header_size only covers the fixed prefix (S4).
        let bytes = build_pe32(16, 96);
        let mut offset = 0;
        let result = parse_optional_header(&bytes, &mut offset, 96);
        assert!(matches!(result, Err(Error::BadFormat(_))));
    }

    #[test]
    fn zeroed_com_descriptor_with_sixteen_directories_is_not_clr() {
        let bytes = build_pe32(16, 96 + 16 * 8);
        let mut offset = 0;
        let header = parse_optional_header(&bytes, &mut offset, 96 + 16 * 8).unwrap();
        assert!(header.directory(directory_index::COM_DESCRIPTOR).is_empty());
    }
}
