//! Dependency Extractor (C5): walks the Import Descriptor and Delay-Load
//! Descriptor tables to list the module names a PE image depends on.

use crate::cursor::{read_cstr_ascii, read_u32};
use crate::directory::{self, AddressMode};
use crate::error::{Error, Result};
use crate::optional::DataDirectory;
use crate::section::SectionHeader;

/// Size in bytes of one `IMAGE_IMPORT_DESCRIPTOR` record.
const IMPORT_DESCRIPTOR_SIZE: usize = 20;
/// Offset of the `Name` RVA field within an import descriptor.
const IMPORT_DESCRIPTOR_NAME_OFFSET: usize = 12;

/// Size in bytes of one `IMAGE_DELAYLOAD_DESCRIPTOR` record.
const DELAY_DESCRIPTOR_SIZE: usize = 32;
/// Offset of the `DllNameRVA` field within a delay-load descriptor.
const DELAY_DESCRIPTOR_NAME_OFFSET: usize = 4;

/// Caps on iteration so a corrupt or adversarial table (missing its
/// zero terminator) cannot spin the extractor forever (§4.5).
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Maximum number of descriptors read from either table before giving up.
    pub max_descriptors: usize,
}

impl Default for Limits {
    fn default() -> Self {
        // 16 Ki descriptors is far beyond anything a legitimate image carries.
        Limits { max_descriptors: 16 * 1024 }
    }
}

/// Extracts the module names referenced by the Import Descriptor table at
/// `import_rva`, and/or the Delay-Load Descriptor table at `delay_rva`.
/// Either RVA may be `0` to skip that table (§4.5). Order is Import-table
/// entries first, then Delay-Import (§3).
///
/// `mode` controls whether RVAs found in the tables are read directly
/// (`Loaded`, the "loaded-mode shortcut" of §4.5 — cheap because RVAs and
/// in-memory offsets coincide) or translated through the section table
/// (`OnDisk`). Either way a name RVA that resolves to `0` — i.e. falls
/// outside every section — is treated as a malformed descriptor and
/// fails the whole extraction (§8 S5), not silently skipped.
pub fn extract_dependencies(
    bytes: &[u8],
    sections: &[SectionHeader],
    mode: AddressMode,
    import_rva: u32,
    delay_rva: u32,
    limits: Limits,
) -> Result<Vec<String>> {
    let mut names = Vec::new();

    if import_rva != 0 {
        walk_table(
            bytes,
            sections,
            mode,
            import_rva,
            IMPORT_DESCRIPTOR_SIZE,
            IMPORT_DESCRIPTOR_NAME_OFFSET,
            limits,
            &mut names,
        )?;
    }

    if delay_rva != 0 {
        walk_table(
            bytes,
            sections,
            mode,
            delay_rva,
            DELAY_DESCRIPTOR_SIZE,
            DELAY_DESCRIPTOR_NAME_OFFSET,
            limits,
            &mut names,
        )?;
    }

    Ok(names)
}

/// Resolves `rva` to a usable byte offset, treating an unresolved RVA
/// (`directory::resolve` returning `0` for a nonzero input) as malformed.
fn resolve_nonzero(rva: u32, sections: &[SectionHeader], mode: AddressMode) -> Result<usize> {
    let dir = DataDirectory { virtual_address: rva, size: 0 };
    let resolved = directory::resolve(dir, sections, mode)?;
    if resolved == 0 {
        return Err(Error::BadFormat("rva does not fall within any section"));
    }
    Ok(resolved as usize)
}

/// Walks a zero-terminated array of fixed-size descriptors, reading the
/// module name RVA at `name_field_offset` within each and collecting its
/// ASCII name, stopping at the first all-zero `Name`/`DllNameRVA` field.
fn walk_table(
    bytes: &[u8],
    sections: &[SectionHeader],
    mode: AddressMode,
    table_rva: u32,
    descriptor_size: usize,
    name_field_offset: usize,
    limits: Limits,
    names: &mut Vec<String>,
) -> Result<()> {
    let mut table_offset = resolve_nonzero(table_rva, sections, mode)?;

    for _ in 0..limits.max_descriptors {
        let name_rva = read_u32(bytes, table_offset + name_field_offset)?;
        if name_rva == 0 {
            return Ok(());
        }
        let name_offset = resolve_nonzero(name_rva, sections, mode)?;
        let name = read_cstr_ascii(bytes, name_offset)?;
        names.push(name);
        table_offset += descriptor_size;
    }

    Err(Error::BadFormat(
        "dependency table did not terminate within the descriptor limit",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(virtual_address: u32, virtual_size: u32, pointer_to_raw_data: u32) -> SectionHeader {
        SectionHeader {
            virtual_address,
            virtual_size,
            pointer_to_raw_data,
            ..Default::default()
        }
    }

    fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
        bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// A section spanning the whole test buffer, with identity on-disk
    /// offsets, so `Loaded` and `OnDisk` resolve the same way.
    fn whole_buffer_section(len: u32) -> Vec<SectionHeader> {
        vec![section(0, len, 0)]
    }

    #[test]
    fn both_rvas_zero_yields_no_dependencies() {
        let bytes = vec![0u8; 32];
        let sections = whole_buffer_section(32);
        let names =
            extract_dependencies(&bytes, &sections, AddressMode::Loaded, 0, 0, Limits::default()).unwrap();
        assert!(names.is_empty());
    }

    #[test]
    fn reads_import_table_until_zero_terminator() {
        // table at rva 16: two descriptors naming modules, then a zero descriptor.
        let table_rva = 16u32;
        let mut bytes = vec![0u8; 200];
        let sections = whole_buffer_section(bytes.len() as u32);
        write_u32(&mut bytes, 16 + IMPORT_DESCRIPTOR_NAME_OFFSET, 100);
        bytes[100..108].copy_from_slice(b"ONE.dll\0");
        write_u32(&mut bytes, 16 + IMPORT_DESCRIPTOR_SIZE + IMPORT_DESCRIPTOR_NAME_OFFSET, 120);
        bytes[120..128].copy_from_slice(b"TWO.dll\0");
        // third descriptor (at 16 + 2*SIZE) is all zero: terminator.

        let names = extract_dependencies(
            &bytes,
            &sections,
            AddressMode::Loaded,
            table_rva,
            0,
            Limits::default(),
        )
        .unwrap();
        assert_eq!(names, vec!["ONE.dll".to_string(), "TWO.dll".to_string()]);
    }

    #[test]
    fn a_table_that_never_terminates_is_bad_format() {
        let limits = Limits { max_descriptors: 4 };
        let table_rva = 4u32; // nonzero, so the table is actually walked
        let mut bytes = vec![0u8; table_rva as usize + 4 * IMPORT_DESCRIPTOR_SIZE + 8];
        let sections = whole_buffer_section(bytes.len() as u32);
        let name_offset = table_rva + (4 * IMPORT_DESCRIPTOR_SIZE) as u32;
        for i in 0..4u32 {
            write_u32(
                &mut bytes,
                table_rva as usize + (i as usize) * IMPORT_DESCRIPTOR_SIZE + IMPORT_DESCRIPTOR_NAME_OFFSET,
                name_offset,
            );
        }
        bytes[name_offset as usize] = b'A';
        bytes[name_offset as usize + 1] = 0;

        let result =
            extract_dependencies(&bytes, &sections, AddressMode::Loaded, table_rva, 0, limits);
        assert!(matches!(result, Err(Error::BadFormat(_))));
    }

    #[test]
    fn delay_load_table_is_read_independently_of_imports() {
        let delay_rva = 16u32;
        let mut bytes = vec![0u8; 200];
        let sections = whole_buffer_section(bytes.len() as u32);
        write_u32(&mut bytes, 16 + DELAY_DESCRIPTOR_NAME_OFFSET, 100);
        bytes[100..109].copy_from_slice(b"DELAY.dll");
        bytes[109] = 0;

        let names = extract_dependencies(
            &bytes,
            &sections,
            AddressMode::Loaded,
            0,
            delay_rva,
            Limits::default(),
        )
        .unwrap();
        assert_eq!(names, vec!["DELAY.dll".to_string()]);
    }

    #[test]
    fn both_tables_contribute_dependencies() {
        let mut bytes = vec![0u8; 300];
        let sections = whole_buffer_section(bytes.len() as u32);
        write_u32(&mut bytes, IMPORT_DESCRIPTOR_NAME_OFFSET, 200);
        bytes[200..209].copy_from_slice(b"IMPORT.dl");
        bytes[209] = 0;
        write_u32(&mut bytes, 64 + DELAY_DESCRIPTOR_NAME_OFFSET, 220);
        bytes[220..228].copy_from_slice(b"DELAY.dl");

        let names = extract_dependencies(
            &bytes,
            &sections,
            AddressMode::Loaded,
            0,
            64,
            Limits::default(),
        )
        .unwrap();
        assert_eq!(names, vec!["DELAY.dl".to_string()]);
    }

    #[test]
    fn name_rva_outside_every_section_fails_loudly_not_silently() {
        // S5: the import table itself is inside the section, but the Name
        // RVA it points at is not. The extractor must fail, not skip it.
        let table_rva = 4u32;
        let mut bytes = vec![0u8; 64];
        let sections = vec![section(0, 32, 0)]; // only the first 32 bytes are "in" a section
        write_u32(
            &mut bytes,
            table_rva as usize + IMPORT_DESCRIPTOR_NAME_OFFSET,
            1000,
        ); // well outside the section
        let result = extract_dependencies(
            &bytes,
            &sections,
            AddressMode::OnDisk,
            table_rva,
            0,
            Limits::default(),
        );
        assert!(matches!(result, Err(Error::BadFormat(_))));
    }
}
