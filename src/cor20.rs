//! COR20 (CLR runtime) Header (C3): the 72-byte record the COM Descriptor
//! data directory points to on a managed image.

use bitflags::bitflags;
use bytemuck::checked::try_from_bytes;
use bytemuck::{Pod, Zeroable};
use core::fmt;

use crate::error::{Error, Result};
use crate::optional::DataDirectory;

/// Size in bytes of a [`Cor20Header`] record on the wire.
pub const COR20_HEADER_SIZE: usize = 72;

/// The CLR runtime header (`IMAGE_COR20_HEADER`), per ECMA-335 II.25.3.3.
/// Located via the COM Descriptor data directory (index 14). This crate
/// only locates the metadata directory inside it; interpreting the
/// metadata streams themselves is out of scope (§1).
#[derive(Copy, Clone, Pod, Zeroable, Default, Debug)]
#[repr(C)]
pub struct Cor20Header {
    /// Size of this header, in bytes.
    pub cb: u32,
    /// Major version of the required runtime.
    pub major_runtime_version: u16,
    /// Minor version of the required runtime.
    pub minor_runtime_version: u16,
    /// RVA and size of the metadata root.
    pub meta_data: DataDirectory,
    /// Runtime flags, see [`CorFlags`].
    pub flags: u32,
    /// Token of the entry point method, or RVA of a native entry point
    /// stub when `flags` includes `NativeEntryPoint`.
    pub entry_point_token_or_rva: u32,
    /// RVA and size of implementation-specific resources.
    pub resources: DataDirectory,
    /// RVA and size of the hash data for strong-name signing.
    pub strong_name_signature: DataDirectory,
    /// Reserved; must be zero in practice (code manager table).
    pub code_manager_table: DataDirectory,
    /// RVA and size of an array of VTable fixups.
    pub vtable_fixups: DataDirectory,
    /// Reserved; export-address-table jumps for managed/unmanaged thunking.
    pub export_address_table_jumps: DataDirectory,
    /// Reserved for the managed native header.
    pub managed_native_header: DataDirectory,
}

const _: () = assert!(core::mem::size_of::<Cor20Header>() == COR20_HEADER_SIZE);

bitflags! {
    /// Runtime flags in [`Cor20Header::flags`], per ECMA-335.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CorFlags: u32 {
        /// The image contains only IL, no native code.
        const IL_ONLY = 0x0000_0001;
        /// The image requires a 32-bit process.
        const REQUIRES_32BIT = 0x0000_0002;
        /// The image is an IL library (not independently runnable).
        const IL_LIBRARY = 0x0000_0004;
        /// The image carries a strong-name signature.
        const STRONG_NAME_SIGNED = 0x0000_0008;
        /// `entry_point_token_or_rva` is a native entry-point RVA, not a metadata token.
        const NATIVE_ENTRY_POINT = 0x0000_0010;
        /// Track debug data, an obsolete flag kept for compatibility.
        const TRACK_DEBUG_DATA = 0x0001_0000;
        /// The image prefers to run as a 32-bit process when possible.
        const PREFERS_32BIT = 0x0002_0000;
    }
}

impl Cor20Header {
    /// Returns the runtime flags as bitflags. Unknown bits are preserved.
    pub fn get_flags(&self) -> CorFlags {
        CorFlags::from_bits_retain(self.flags)
    }
}

impl fmt::Display for Cor20Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "COR20 (CLR) Header")?;
        writeln!(f, "------------------")?;
        writeln!(f, "Runtime Version:  {}.{}", self.major_runtime_version, self.minor_runtime_version)?;
        writeln!(
            f,
            "MetaData:         {:#010x} ({})",
            self.meta_data.virtual_address, self.meta_data.size
        )?;
        writeln!(f, "Flags:            {:?}", self.get_flags())?;
        writeln!(f, "Entry Point:      {:#010x}", self.entry_point_token_or_rva)?;
        Ok(())
    }
}

/// Decodes a [`Cor20Header`] at `offset`.
pub fn parse_cor20_header(bytes: &[u8], offset: usize) -> Result<Cor20Header> {
    let slice = bytes
        .get(offset..offset + COR20_HEADER_SIZE)
        .ok_or(Error::OutOfBounds)?;
    let header: Cor20Header =
        *try_from_bytes(slice).map_err(|_| Error::BadFormat("COR20 header did not parse"))?;
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_cor20_header() {
        let mut bytes = vec![0u8; COR20_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&72u32.to_le_bytes());
        bytes[4..6].copy_from_slice(&2u16.to_le_bytes());
        bytes[6..8].copy_from_slice(&5u16.to_le_bytes());
        bytes[8..12].copy_from_slice(&0x2000u32.to_le_bytes()); // meta_data rva
        bytes[12..16].copy_from_slice(&0x400u32.to_le_bytes()); // meta_data size
        bytes[16..20].copy_from_slice(&1u32.to_le_bytes()); // flags: IL_ONLY

        let header = parse_cor20_header(&bytes, 0).unwrap();
        assert_eq!(header.major_runtime_version, 2);
        assert_eq!(header.minor_runtime_version, 5);
        assert_eq!(header.meta_data.virtual_address, 0x2000);
        assert_eq!(header.meta_data.size, 0x400);
        assert!(header.get_flags().contains(CorFlags::IL_ONLY));
    }

    #[test]
    fn truncated_region_is_out_of_bounds() {
        let bytes = vec![0u8; COR20_HEADER_SIZE - 1];
        assert!(matches!(parse_cor20_header(&bytes, 0), Err(Error::OutOfBounds)));
    }
}
