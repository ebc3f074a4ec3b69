//! Ties C1–C5 together into the two consumer-facing entry points:
//! [`decode_full_headers`] over an on-disk file, and [`extract_basic_info`]
//! over an already-loaded module.

use bytemuck::checked::try_from_bytes;
use core::fmt;
#[cfg(feature = "std")]
use std::path::Path;

use crate::coff::{CoffFileHeader, COFF_FILE_HEADER_SIZE};
use crate::cor20::{parse_cor20_header, Cor20Header};
use crate::directory::{self, AddressMode};
use crate::error::{Error, Result};
use crate::format::{self, FormatClass};
use crate::imports::{self, Limits};
use crate::optional::{directory_index, parse_optional_header, OptionalHeader};
use crate::region::ByteRegion;
use crate::section::{self, SectionHeader};

/// The decoder's complete view of a region, polymorphic over whether it
/// carried a full PE image or was a bare COFF object file (§3, §9: kept
/// as a tagged variant rather than nullable fields, since the invariants
/// genuinely differ between the two).
#[derive(Debug, Clone)]
pub enum PeImage {
    /// A raw COFF object file: no DOS stub, no optional header.
    CoffOnly {
        /// The COFF file header.
        coff: CoffFileHeader,
        /// The section table.
        sections: Vec<SectionHeader>,
        /// File offset of the `.cormeta` section's raw data, or `0` if absent.
        meta_offset: u32,
        /// Size of the `.cormeta` section's raw data, or `0` if absent.
        meta_size: u32,
    },
    /// A full PE image.
    FullImage {
        /// File offset of the COFF file header.
        coff_offset: u32,
        /// File offset of the optional header.
        opt_offset: u32,
        /// The COFF file header.
        coff: CoffFileHeader,
        /// The normalized optional header.
        opt: OptionalHeader,
        /// The section table.
        sections: Vec<SectionHeader>,
        /// The COR20 (CLR) header and its file offset, if this image carries one.
        cor: Option<(Cor20Header, u32)>,
        /// File offset of the CLR metadata root, or `0` if this image has no CLR payload.
        meta_offset: u32,
        /// Size of the CLR metadata root, or `0` if this image has no CLR payload.
        meta_size: u32,
        /// `IMAGE_FILE_DLL` was set in the COFF characteristics.
        is_dll: bool,
        /// The complement of `is_dll`.
        is_exe: bool,
        /// The optional header's subsystem is `IMAGE_SUBSYSTEM_WINDOWS_CUI` (3).
        is_console: bool,
    },
}

impl fmt::Display for PeImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeImage::CoffOnly { coff, sections, meta_offset, meta_size } => {
                writeln!(f, "{coff}")?;
                for section in sections {
                    writeln!(f, "{section}")?;
                }
                if *meta_size != 0 {
                    writeln!(f, ".cormeta: offset={meta_offset:#010x} size={meta_size}")?;
                }
                Ok(())
            }
            PeImage::FullImage { coff, opt, sections, cor, is_dll, is_exe, is_console, .. } => {
                writeln!(f, "{coff}")?;
                writeln!(f, "{opt}")?;
                for section in sections {
                    writeln!(f, "{section}")?;
                }
                if let Some((cor20, offset)) = cor {
                    writeln!(f, "COR20 header at {offset:#010x}")?;
                    writeln!(f, "{cor20}")?;
                }
                writeln!(f, "is_dll={is_dll} is_exe={is_exe} is_console={is_console}")?;
                Ok(())
            }
        }
    }
}

/// Where a dependency name came from. The core only ever produces
/// [`DependencySource::PeTables`] entries (§1: its own Import/Delay-Import
/// walk); [`DependencySource::ReferencedAssemblies`] is named so a caller
/// composing this crate's output with an external `AssemblyReflector`
/// (§6, out of scope here) has somewhere to attach assemblies that
/// reflector discovers for a managed image, without the two provenances
/// being conflated in one untagged list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencySource {
    /// Found by walking this crate's Import or Delay-Import table.
    PeTables,
    /// Found by an external `AssemblyReflector` walking managed-assembly
    /// references. The core never produces this variant itself.
    ReferencedAssemblies,
}

/// A single dependency name, tagged with how it was discovered. Callers
/// that only care about the core's own findings can filter on
/// `source == DependencySource::PeTables`; [`BasicInfo::dependencies`]
/// itself stays a plain `Vec<String>` for callers that don't need the
/// distinction, since the core never emits anything but `PeTables`.
#[derive(Debug, Clone)]
pub struct Dependency {
    /// The ASCII module or assembly name.
    pub name: String,
    /// Which collaborator produced this entry.
    pub source: DependencySource,
}

/// Module dependency list and CLR-ness, computed over a loaded module
/// image (§3, §6.2).
#[derive(Debug, Clone)]
pub struct BasicInfo {
    /// True if a COM Descriptor data directory is present.
    pub is_clr: bool,
    /// RVA of the Import Descriptor table, or `0` if absent.
    pub import_rva: u32,
    /// RVA of the Delay-Load Descriptor table, or `0` if absent.
    pub delay_load_rva: u32,
    /// Imported module names, Import table first, then Delay-Import (§3).
    pub dependencies: Vec<String>,
}

/// `OutOfBounds` is an internal bookkeeping detail of the cursor (§4.1);
/// callers of [`decode_full_headers`] only ever see `BadFormat` for a
/// malformed on-disk image (§7). [`extract_basic_info`] is exempt: §6.2
/// lists `OutOfBounds` as one of its own valid error kinds.
fn no_oob(e: Error) -> Error {
    match e {
        Error::OutOfBounds => Error::BadFormat("read exceeded the bounds of the region"),
        other => other,
    }
}

fn parse_coff_header(bytes: &[u8], offset: usize) -> Result<CoffFileHeader> {
    let slice = bytes
        .get(offset..offset + COFF_FILE_HEADER_SIZE)
        .ok_or(Error::OutOfBounds)?;
    let header: CoffFileHeader =
        *try_from_bytes(slice).map_err(|_| Error::BadFormat("COFF file header did not parse"))?;
    Ok(header)
}

/// Opens and maps `path` read-only, then decodes it per §4.3. Returns
/// `FileNotFound` if the path does not exist, `IoError` if opening or
/// mapping otherwise fails, and `BadFormat` for any structural violation.
#[cfg(feature = "std")]
pub fn decode_full_headers<P: AsRef<Path>>(path: P) -> Result<PeImage> {
    let region = ByteRegion::map_file(path)?;
    decode_bytes(region.bytes())
}

/// Classifies and decodes an already-resident byte region in on-disk
/// mode (directories resolve to file offsets, not loaded addresses). This
/// is what [`decode_full_headers`] runs over a memory-mapped file; it is
/// exposed directly for callers that already hold the bytes in memory
/// (e.g. a buffer read some other way, or a fuzz harness).
pub fn decode_bytes(bytes: &[u8]) -> Result<PeImage> {
    let file_length = bytes.len() as u64;

    match format::classify(bytes) {
        FormatClass::Invalid => Err(Error::BadFormat("not a recognized COFF object or PE image")),
        FormatClass::CoffObject => decode_coff_only(bytes, file_length).map_err(no_oob),
        FormatClass::PeImage { pe_sig_offset } => {
            #[cfg(feature = "logging")]
            log::debug!("classified region as a PE image at signature offset {pe_sig_offset:#x}");
            decode_full_image(bytes, file_length, pe_sig_offset).map_err(no_oob)
        }
    }
}

fn decode_coff_only(bytes: &[u8], file_length: u64) -> Result<PeImage> {
    let coff = parse_coff_header(bytes, 0)?;

    let required = 20usize
        .checked_add((coff.number_of_sections as usize) * section::SECTION_HEADER_SIZE)
        .ok_or(Error::BadFormat("section count overflows region"))?;
    if bytes.len() < required {
        return Err(Error::BadFormat("region too short for its declared section table"));
    }

    let sections = section::parse_section_table(bytes, 20, coff.number_of_sections)?;
    for s in &sections {
        section::validate_on_disk_span(s, file_length)?;
    }

    let (meta_offset, meta_size) = match section::find_cormeta(&sections) {
        Some(s) => (s.pointer_to_raw_data, s.size_of_raw_data),
        None => (0, 0),
    };

    Ok(PeImage::CoffOnly { coff, sections, meta_offset, meta_size })
}

fn decode_full_image(bytes: &[u8], file_length: u64, pe_sig_offset: u32) -> Result<PeImage> {
    let coff_offset = pe_sig_offset + 4;
    let coff = parse_coff_header(bytes, coff_offset as usize)?;

    let opt_offset = coff_offset as usize + COFF_FILE_HEADER_SIZE;
    let mut cursor = opt_offset;
    let opt = parse_optional_header(bytes, &mut cursor, coff.size_of_optional_header)?;
    let sections_offset = cursor;

    let required = sections_offset
        .checked_add((coff.number_of_sections as usize) * section::SECTION_HEADER_SIZE)
        .ok_or(Error::BadFormat("section count overflows region"))?;
    if bytes.len() < required {
        return Err(Error::BadFormat("region too short for its declared section table"));
    }

    let sections = section::parse_section_table(bytes, sections_offset, coff.number_of_sections)?;
    for s in &sections {
        section::validate_on_disk_span(s, file_length)?;
    }

    let is_dll = coff.is_dll();
    let is_exe = !is_dll;
    let is_console = opt.subsystem == 3;

    let com_dir = opt.directory(directory_index::COM_DESCRIPTOR);
    let (cor, meta_offset, meta_size) = if opt.number_of_rva_and_sizes > 14 && !com_dir.is_empty() {
        #[cfg(feature = "logging")]
        log::debug!("COM descriptor directory present, resolving COR20 header");
        let cor_off = directory::resolve(com_dir, &sections, AddressMode::OnDisk)?;
        if cor_off == 0 {
            return Err(Error::BadFormat("COR header missing data directory"));
        }
        let cor20 = parse_cor20_header(bytes, cor_off as usize)?;

        let meta_off = directory::resolve(cor20.meta_data, &sections, AddressMode::OnDisk)?;
        let meta_size = cor20.meta_data.size;
        if meta_off == 0
            || meta_size == 0
            || (meta_off as u64) + (meta_size as u64) > opt.size_of_image as u64
        {
            return Err(Error::BadFormat("Invalid COR metadata section span"));
        }

        (Some((cor20, cor_off)), meta_off, meta_size)
    } else {
        (None, 0, 0)
    };

    Ok(PeImage::FullImage {
        coff_offset,
        opt_offset: opt_offset as u32,
        coff,
        opt,
        sections,
        cor,
        meta_offset,
        meta_size,
        is_dll,
        is_exe,
        is_console,
    })
}

/// Decodes CLR-ness and direct module dependencies over a module the
/// caller (or its `LibraryLoader`) has already mapped into this
/// process's address space (§4.5, §6.2).
///
/// # Safety
///
/// `module_base` must point to at least `size_of_image` readable bytes
/// for the duration of this call, as is the case for a module obtained
/// from the OS loader.
pub unsafe fn extract_basic_info(module_base: *const u8, size_of_image: u32) -> Result<BasicInfo> {
    let region = ByteRegion::from_loaded(module_base, size_of_image);
    let bytes = region.bytes();

    let pe_sig_offset = match format::classify(bytes) {
        FormatClass::PeImage { pe_sig_offset } => pe_sig_offset,
        _ => return Err(Error::BadFormat("loaded module is not a PE image")),
    };

    let coff_offset = pe_sig_offset as usize + 4;
    let coff = parse_coff_header(bytes, coff_offset)?;

    let opt_offset = coff_offset + COFF_FILE_HEADER_SIZE;
    let mut cursor = opt_offset;
    let opt = parse_optional_header(bytes, &mut cursor, coff.size_of_optional_header)?;
    let sections_offset = cursor;

    let sections = section::parse_section_table(bytes, sections_offset, coff.number_of_sections)?;

    let com_dir = opt.directory(directory_index::COM_DESCRIPTOR);
    let is_clr = opt.number_of_rva_and_sizes > 14 && !com_dir.is_empty();

    let import_rva = opt.directory(directory_index::IMPORT).virtual_address;
    let delay_load_rva = opt.directory(directory_index::DELAY_IMPORT).virtual_address;

    let dependencies = imports::extract_dependencies(
        bytes,
        &sections,
        AddressMode::Loaded,
        import_rva,
        delay_load_rva,
        Limits::default(),
    )?;

    Ok(BasicInfo { is_clr, import_rva, delay_load_rva, dependencies })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coff::Characteristics;
    use crate::optional::Magic;

    fn write_u16(bytes: &mut [u8], offset: usize, value: u16) {
        bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }
    fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
        bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Builds a minimal, well-formed PE32+ image per S1: a DLL with one
    /// `.idata` section covering an import table with a single descriptor
    /// naming `KERNEL32.dll`.
    fn build_minimal_pe32_plus_dll() -> Vec<u8> {
        const E_LFANEW: usize = 0x80;
        const SECTION_VA: u32 = 0x2000;
        const SECTION_RAW_PTR: u32 = 0x400;
        const IMPORT_TABLE_OFFSET_IN_SECTION: u32 = 0;
        const NAME_OFFSET_IN_SECTION: u32 = 32;

        let mut bytes = vec![0u8; 0x1000];
        write_u16(&mut bytes, 0, 0x5A4D); // "MZ"
        write_u32(&mut bytes, 0x3c, E_LFANEW as u32);
        bytes[E_LFANEW..E_LFANEW + 4].copy_from_slice(b"PE\0\0");

        let coff_offset = E_LFANEW + 4;
        write_u16(&mut bytes, coff_offset, 0x8664); // AMD64
        write_u16(&mut bytes, coff_offset + 2, 1); // number_of_sections
        let opt_header_size = (112 + 16 * 8) as u16;
        write_u16(&mut bytes, coff_offset + 16, opt_header_size);
        write_u16(&mut bytes, coff_offset + 18, Characteristics::IMAGE_FILE_DLL.bits());

        let opt_offset = coff_offset + 20;
        write_u16(&mut bytes, opt_offset, Magic::PE32Plus as u16);
        let num_rva_and_sizes_offset = opt_offset + 108;
        write_u32(&mut bytes, num_rva_and_sizes_offset, 16);
        let directories_offset = opt_offset + 112;
        // directory 1 (IMPORT)
        write_u32(&mut bytes, directories_offset + 8, SECTION_VA + IMPORT_TABLE_OFFSET_IN_SECTION);
        write_u32(&mut bytes, directories_offset + 12, 20);

        let sections_offset = opt_offset + opt_header_size as usize;
        bytes[sections_offset..sections_offset + 8].copy_from_slice(b".idata\0\0");
        write_u32(&mut bytes, sections_offset + 8, 0x200); // virtual_size
        write_u32(&mut bytes, sections_offset + 12, SECTION_VA);
        write_u32(&mut bytes, sections_offset + 16, 0x200); // size_of_raw_data
        write_u32(&mut bytes, sections_offset + 20, SECTION_RAW_PTR);

        // import descriptor at file offset SECTION_RAW_PTR, Name field at +12
        let descriptor_offset = SECTION_RAW_PTR as usize;
        let name_rva = SECTION_VA + NAME_OFFSET_IN_SECTION;
        write_u32(&mut bytes, descriptor_offset + 12, name_rva);
        let name_file_offset = (SECTION_RAW_PTR + NAME_OFFSET_IN_SECTION) as usize;
        bytes[name_file_offset..name_file_offset + 13].copy_from_slice(b"KERNEL32.dll\0");

        bytes
    }

    #[test]
    fn decodes_minimal_pe32_plus_dll_shape() {
        let bytes = build_minimal_pe32_plus_dll();
        let result = decode_full_image(&bytes, bytes.len() as u64, 0x80);
        let image = result.unwrap();
        match image {
            PeImage::FullImage { is_dll, is_exe, cor, opt, .. } => {
                assert!(is_dll);
                assert!(!is_exe);
                assert!(cor.is_none());
                assert_eq!(opt.magic, Magic::PE32Plus);
            }
            PeImage::CoffOnly { .. } => panic!("expected a full image"),
        }
    }

    #[test]
    fn coff_object_with_cormeta_section_is_reported() {
        // S3: a bare COFF header with no MZ stub, one `.cormeta` section.
        let mut bytes = vec![0u8; 0x400];
        write_u16(&mut bytes, 0, 0x014c); // I386, definitely not "MZ"
        write_u16(&mut bytes, 2, 1); // number_of_sections
        bytes[20..28].copy_from_slice(b".cormeta");
        write_u32(&mut bytes, 20 + 16, 0x200); // pointer_to_raw_data
        write_u32(&mut bytes, 20 + 8, 0x100); // size_of_raw_data

        let image = decode_coff_only(&bytes, bytes.len() as u64).unwrap();
        match image {
            PeImage::CoffOnly { meta_offset, meta_size, .. } => {
                assert_eq!(meta_offset, 0x200);
                assert_eq!(meta_size, 0x100);
            }
            PeImage::FullImage { .. } => panic!("expected a COFF-only image"),
        }
    }

    #[test]
    fn region_shorter_than_twenty_bytes_is_bad_format() {
        // S6
        let bytes = vec![0u8; 10];
        assert!(matches!(format::classify(&bytes), FormatClass::Invalid));
    }

    #[test]
    fn truncated_optional_header_is_bad_format() {
        // S4: num_rva_and_sizes=16 but opt_header_size=96 (PE32 fixed prefix only).
        const E_LFANEW: usize = 0x80;
        let mut bytes = vec![0u8; E_LFANEW + 4 + 20 + 96 + 40];
        let coff_offset = E_LFANEW + 4;
        write_u16(&mut bytes, coff_offset + 16, 96); // size_of_optional_header
        let opt_offset = coff_offset + 20;
        write_u16(&mut bytes, opt_offset, Magic::PE32 as u16);
        write_u32(&mut bytes, opt_offset + 92, 16); // number_of_rva_and_sizes

        let result = decode_full_image(&bytes, bytes.len() as u64, E_LFANEW as u32);
        assert!(matches!(result, Err(Error::BadFormat(_))));
    }
}
