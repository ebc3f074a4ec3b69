//! # pe-inspector: bounds-checked PE/COFF + CLR header decoding.
//!
//! `pe-inspector` walks a Windows Portable Executable image — on disk or
//! already loaded into this process — and reports its structural metadata:
//! machine type and subsystem, the section table, whether it carries a
//! managed-code (CLR/COR20) payload, and which libraries it imports
//! directly or via delay-load. Every read is bounds-checked against
//! untrusted input; nothing here disassembles, relocates, or executes the
//! image.
//!
//! ## Examples
//! ```no_run
//! use pe_inspector::pe::decode_full_headers;
//!
//! # fn main() -> Result<(), pe_inspector::error::Error> {
//! let image = decode_full_headers("tests/fixtures/sample.dll")?;
//! print!("{image}");
//! # Ok(())
//! # }
//! ```
//!
//! `decode_full_headers` is the on-disk entry point; `extract_basic_info`
//! is its loaded-module counterpart for a library an
//! `LibraryLoader`-equivalent collaborator has already mapped. Neither
//! entry point loads libraries, resolves managed-assembly references, or
//! formats OS error codes — those are the `LibraryLoader`,
//! `AssemblyReflector`, and `ErrorMessageFormatter` collaborators this
//! crate composes with but does not itself implement.

#![warn(missing_docs)]

/// Error kinds surfaced by every component in this crate.
pub mod error;
/// Bounds-checked random-access reads over a byte slice (C1).
pub mod cursor;
/// Classifies a byte region as a COFF object, a PE image, or invalid (C2).
pub mod format;
/// COFF file header definitions and helper functions (part of C3).
pub mod coff;
/// Optional header (PE32 / PE32+) definitions and helper functions (part of C3).
pub mod optional;
/// Section header table definitions and helper functions (part of C3).
pub mod section;
/// COR20 (CLR runtime) header definitions and helper functions (part of C3).
pub mod cor20;
/// Maps a data directory's RVA to a file offset or loaded address (C4).
pub mod directory;
/// Walks the Import and Delay-Import tables into a dependency list (C5).
pub mod imports;
/// A uniform view over a memory-mapped file or a caller-supplied loaded image.
pub mod region;
/// Ties C1-C5 together into `decode_full_headers` and `extract_basic_info`.
pub mod pe;
