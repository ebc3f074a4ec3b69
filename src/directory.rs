//! Directory Resolver (C4): maps a data directory's RVA to either a file
//! offset (on-disk reads) or a loaded-module address, using the section
//! table as the authority for the RVA-to-offset mapping.

use crate::error::{Error, Result};
use crate::optional::DataDirectory;
use crate::section::SectionHeader;

/// Which address space a resolved offset should land in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    /// Resolve to a file offset, for reading straight out of the on-disk
    /// image (or a `mmap` of it).
    OnDisk,
    /// The region is already a loaded module: RVAs and addresses coincide
    /// relative to the module base, so resolution is the identity.
    Loaded,
}

/// Resolves `dir`'s RVA against `sections`.
///
/// An RVA of zero means the directory is absent, and resolves to `0`
/// without error. An RVA that falls in no section *also* resolves to
/// `0` rather than failing here — the source this is ported from makes
/// that same choice (§9), and it is indistinguishable at this layer from
/// an absent directory. Callers with stricter needs (the COR metadata
/// path in [`crate::pe`]) must check the result themselves; callers with
/// a tolerant scan (the dependency extractor) may treat a `0` result the
/// same way they treat a genuinely absent directory, or reject it, as
/// their own semantics require.
///
/// Sections are searched in declaration order; the first section whose
/// virtual range contains the RVA wins, matching how the Windows loader
/// resolves addresses when sections overlap.
///
/// A directory that resolves into a section but whose `size` would run
/// past the section's end is always a hard error: `size <= virtual_size
/// - delta` must hold (§4.4, tightened per §9 from the looser check the
/// source used).
pub fn resolve(dir: DataDirectory, sections: &[SectionHeader], mode: AddressMode) -> Result<u32> {
    if dir.virtual_address == 0 {
        return Ok(0);
    }

    let section = match sections.iter().find(|s| {
        dir.virtual_address >= s.virtual_address
            && dir.virtual_address < s.virtual_address.saturating_add(s.virtual_size)
    }) {
        Some(s) => s,
        None => {
            #[cfg(feature = "logging")]
            log::warn!("directory rva {:#x} falls within no section", dir.virtual_address);
            return Ok(0);
        }
    };

    let delta = dir.virtual_address - section.virtual_address;
    let remaining = section.virtual_size - delta;
    if dir.size > remaining {
        return Err(Error::BadFormat("Section too small for directory"));
    }

    Ok(match mode {
        AddressMode::Loaded => dir.virtual_address,
        AddressMode::OnDisk => section.pointer_to_raw_data + delta,
    })
}
