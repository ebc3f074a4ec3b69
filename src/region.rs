//! Byte Region: a uniform view over either a memory-mapped file or a
//! caller-supplied loaded-module buffer, so the header decoder and
//! dependency extractor can stay agnostic to where the bytes came from.

use crate::error::Result;

/// A contiguous run of bytes backing a PE/COFF decode, either an
/// on-disk file mapped read-only or a module already loaded into this
/// process's address space.
///
/// Mapping a file acquires the file handle and the mapping together and
/// releases both when the region is dropped (§5): there is no API to
/// retain the mapping past the `ByteRegion`'s lifetime. Building a region
/// over an on-disk file requires the `std` feature (it needs `memmap2`,
/// which in turn needs `std::fs::File`); the loaded-module variant needs
/// only `core`.
pub enum ByteRegion<'a> {
    /// A read-only memory mapping of a file on disk.
    #[cfg(feature = "std")]
    Mapped(memmap2::Mmap),
    /// A non-owning view over memory the caller already controls, such
    /// as a module the OS loader has mapped into this process. Built
    /// via [`ByteRegion::from_loaded`].
    Loaded(&'a [u8]),
}

impl<'a> ByteRegion<'a> {
    /// Opens `path` read-only and memory-maps it.
    #[cfg(feature = "std")]
    pub fn map_file<P: AsRef<std::path::Path>>(path: P) -> Result<ByteRegion<'static>> {
        use crate::error::Error;

        let file = std::fs::File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::FileNotFound
            } else {
                Error::IoError(e)
            }
        })?;
        #[cfg(feature = "logging")]
        log::debug!("mapping file for PE decode");
        // Safety: the mapping is read-only and scoped to this `ByteRegion`;
        // the caller must not mutate the backing file while it's mapped.
        let mmap = unsafe { memmap2::Mmap::map(&file) }?;
        Ok(ByteRegion::Mapped(mmap))
    }

    /// Wraps `size_of_image` bytes starting at `base` as a loaded-module
    /// region, without taking ownership.
    ///
    /// # Safety
    ///
    /// `base` must point to at least `size_of_image` readable bytes for
    /// the entire lifetime `'a`, as is the case for a module the OS
    /// loader has already mapped (e.g. obtained via `GetModuleHandle`).
    pub unsafe fn from_loaded(base: *const u8, size_of_image: u32) -> ByteRegion<'a> {
        ByteRegion::Loaded(core::slice::from_raw_parts(base, size_of_image as usize))
    }

    /// The underlying bytes, regardless of backing.
    pub fn bytes(&self) -> &[u8] {
        match self {
            #[cfg(feature = "std")]
            ByteRegion::Mapped(mmap) => &mmap[..],
            ByteRegion::Loaded(bytes) => bytes,
        }
    }

    /// The region's length in bytes.
    pub fn len(&self) -> usize {
        self.bytes().len()
    }

    /// True if the region is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
