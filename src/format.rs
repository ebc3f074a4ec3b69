//! Format Probe (C2): classifies a byte region as a COFF object, a PE
//! image, or invalid, and locates the PE signature offset.

use crate::cursor::{read_u16, read_u32};

const IMAGE_DOS_PE_SIGNATURE_OFFSET: usize = 0x3c;
const DOS_SIGNATURE: u16 = 0x5A4D; // "MZ"
const PE_SIGNATURE: u32 = 0x0000_4550; // "PE\0\0"

/// Classification of a byte region, per §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatClass {
    /// Too short, or shaped like a non-image resource (`dos_sig == 0`, `off2 == 0xFFFF`).
    Invalid,
    /// No DOS stub or optional header: a raw COFF object file.
    CoffObject,
    /// A full PE image; carries the absolute offset of the `PE\0\0` signature.
    PeImage {
        /// Offset of the 4-byte `PE\0\0` signature (i.e. `e_lfanew`).
        pe_sig_offset: u32,
    },
}

/// Classifies `bytes` per §4.2's algorithm. This classification is
/// authoritative for every downstream component: the header decoder,
/// directory resolver, and dependency extractor all dispatch on it.
pub fn classify(bytes: &[u8]) -> FormatClass {
    if bytes.len() < 20 {
        return FormatClass::Invalid;
    }

    let dos_sig = match read_u16(bytes, 0) {
        Ok(v) => v,
        Err(_) => return FormatClass::Invalid,
    };
    let off2 = match read_u16(bytes, 2) {
        Ok(v) => v,
        Err(_) => return FormatClass::Invalid,
    };

    if dos_sig == DOS_SIGNATURE {
        let pe_sig_offset = match read_u32(bytes, IMAGE_DOS_PE_SIGNATURE_OFFSET) {
            Ok(v) => v,
            Err(_) => return FormatClass::Invalid,
        };
        let sig = read_u32(bytes, pe_sig_offset as usize);
        return match sig {
            Ok(PE_SIGNATURE) => {
                #[cfg(feature = "logging")]
                log::debug!("classified region as PeImage (e_lfanew={pe_sig_offset:#x})");
                FormatClass::PeImage { pe_sig_offset }
            }
            _ => FormatClass::Invalid,
        };
    }

    if dos_sig == 0 && off2 == 0xFFFF {
        return FormatClass::Invalid;
    }

    #[cfg(feature = "logging")]
    log::debug!("classified region as a bare CoffObject");
    FormatClass::CoffObject
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_mz(e_lfanew: u32) -> Vec<u8> {
        let mut bytes = vec![0u8; e_lfanew as usize + 4];
        bytes[0..2].copy_from_slice(&DOS_SIGNATURE.to_le_bytes());
        bytes[0x3c..0x40].copy_from_slice(&e_lfanew.to_le_bytes());
        bytes[e_lfanew as usize..e_lfanew as usize + 4].copy_from_slice(&PE_SIGNATURE.to_le_bytes());
        bytes
    }

    #[test]
    fn short_region_is_invalid() {
        assert_eq!(classify(&[0u8; 19]), FormatClass::Invalid);
    }

    #[test]
    fn valid_pe_stub_classifies_as_pe_image() {
        let bytes = minimal_mz(0x80);
        assert_eq!(
            classify(&bytes),
            FormatClass::PeImage { pe_sig_offset: 0x80 }
        );
    }

    #[test]
    fn mz_with_bad_pe_signature_is_invalid() {
        let mut bytes = minimal_mz(0x80);
        bytes[0x80] = 0; // corrupt the "PE\0\0" signature
        assert_eq!(classify(&bytes), FormatClass::Invalid);
    }

    #[test]
    fn mz_with_out_of_range_lfanew_is_invalid() {
        let mut bytes = vec![0u8; 64];
        bytes[0..2].copy_from_slice(&DOS_SIGNATURE.to_le_bytes());
        bytes[0x3c..0x40].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        assert_eq!(classify(&bytes), FormatClass::Invalid);
    }

    #[test]
    fn resource_sentinel_shape_is_invalid() {
        let mut bytes = vec![0u8; 20];
        bytes[2..4].copy_from_slice(&0xFFFFu16.to_le_bytes());
        assert_eq!(classify(&bytes), FormatClass::Invalid);
    }

    #[test]
    fn anything_else_is_coff_object() {
        let bytes = vec![0x4cu8, 0x01, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(classify(&bytes), FormatClass::CoffObject);
    }
}
