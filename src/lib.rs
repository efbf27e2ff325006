//! Mach-O Annotate - Byte-Range Addressable Mach-O Decoding
//!
//! This library decodes a thin Mach-O image into labelled, typed fields
//! and answers one question quickly: which field covers file offset N?
//!
//! # Features
//!
//! - **Header and Load Commands**: Every load command decoded field by field, unknown ones kept as raw spans
//! - **Sections**: C strings, UTF-16 strings, literal and symbol pointers, machine code, Swift relative offsets
//! - **Link Edit Data**: Symbol, string and indirect tables, relocations, dyld opcode streams, function starts, data in code
//! - **Lazy Decoding**: Each portion decodes on its own thread; lookups wait only for the portion they hit
//! - **Pluggable Collaborators**: Disassembly and symbol demangling through [`Capabilities`]
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use macho_annotate::{parse_file, CancelToken};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let file = parse_file("path/to/binary")?;
//!     for portion in file.portions() {
//!         println!("{} {}", portion.range(), portion.title());
//!     }
//!
//!     if let Some(hit) = file.search_by_offset(0x40, &CancelToken::new()) {
//!         println!("{}: {}", hit.translation.label, hit.translation.value);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Error Model
//!
//! Only structural problems fail a parse: bad magic, a size that reads past
//! the end of the buffer, an `LC_DYSYMTAB` without a symbol table. Problems
//! confined to one field are attached to that field's
//! [`Translation::error`] and decoding carries on.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::similar_names)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]

pub mod bytes;
pub mod cache;
pub mod capabilities;
pub mod error;
pub mod formatter;
pub mod interpreters;
pub mod macho;
pub mod portion;
pub mod translation;
pub mod types;

#[cfg(test)]
mod fixture;

pub use bytes::ByteRange;
pub use cache::{CancelToken, LoadStatus};
pub use capabilities::{Arch, Capabilities, DecodedInstruction, Demangler, Disassembler};
pub use error::{MachoError, Result};
pub use macho::MachoFile;
pub use portion::{Portion, SearchHit};
pub use translation::{Translation, TranslationGroup, TranslationKind};
pub use types::DecodeOptions;

use std::path::Path;

use macho::header::{MH_MAGIC, MH_MAGIC_64};

/// Decode a Mach-O file by path.
///
/// # Example
///
/// ```rust,no_run
/// use macho_annotate::parse_file;
///
/// let file = parse_file("/bin/ls")?;
/// println!("{} portions", file.portions().len());
/// # Ok::<(), macho_annotate::MachoError>(())
/// ```
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<MachoFile> {
    let data = std::fs::read(path)?;
    parse_bytes(data)
}

/// Decode an in-memory image with default options and no collaborators.
pub fn parse_bytes(data: impl Into<std::sync::Arc<[u8]>>) -> Result<MachoFile> {
    parse_bytes_with_options(data, &DecodeOptions::new(), Capabilities::none())
}

/// Decode an in-memory image with custom options.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use macho_annotate::{parse_bytes_with_options, Capabilities, DecodeOptions};
///
/// let options = DecodeOptions::batch().with_poll_interval(Duration::from_millis(5));
/// let err = parse_bytes_with_options(vec![0u8; 4], &options, Capabilities::none());
/// assert!(err.is_err());
/// ```
pub fn parse_bytes_with_options(
    data: impl Into<std::sync::Arc<[u8]>>,
    options: &DecodeOptions,
    capabilities: Capabilities,
) -> Result<MachoFile> {
    MachoFile::parse_with(data, options, capabilities)
}

/// Get version information for this library.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Quick check for one of the two accepted little-endian Mach-O magics.
///
/// Does not decode anything past the first four bytes.
pub fn is_macho(data: &[u8]) -> bool {
    bytes::read_u32(data, 0).is_ok_and(|magic| magic == MH_MAGIC || magic == MH_MAGIC_64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::MachoBuilder;
    use std::io::Write;

    #[test]
    fn test_version() {
        let v = version();
        assert!(!v.is_empty());
    }

    #[test]
    fn test_is_macho() {
        assert!(is_macho(&[0xCF, 0xFA, 0xED, 0xFE]));
        assert!(is_macho(&[0xCE, 0xFA, 0xED, 0xFE, 0x07]));
        assert!(!is_macho(&[0xFE, 0xED, 0xFA, 0xCF]));
        assert!(!is_macho(&[0xCF, 0xFA]));
    }

    #[test]
    fn test_parse_file_round_trip() {
        let mut builder = MachoBuilder::new_64();
        builder.uuid([0x42; 16]);
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&builder.build()).unwrap();

        let file = parse_file(tmp.path()).unwrap();
        assert!(file.is_64_bit());
        assert_eq!(file.load_commands().len(), 1);
        let hit = file.search_by_offset(32, &CancelToken::new()).unwrap();
        assert_eq!(hit.portion.title(), "LC_UUID");
    }

    #[test]
    fn test_parse_missing_file() {
        let err = parse_file("/nonexistent/definitely/not/here").unwrap_err();
        assert!(matches!(err, MachoError::Io(_)));
    }

    #[test]
    fn test_options_flow_through() {
        let mut builder = MachoBuilder::new_64();
        builder.segment("__TEXT", 0x1000, &[("__const", 0, vec![1; 10])]);
        let options = DecodeOptions::batch().with_raw_row_width(4);
        let file = parse_bytes_with_options(builder.build(), &options, Capabilities::none()).unwrap();
        let section = file
            .portions()
            .iter()
            .find(|p| p.title() == "__TEXT,__const")
            .unwrap();
        let translated = section.await_translate_result(&CancelToken::new()).unwrap();
        assert_eq!(translated.groups()[0].translations().len(), 3);
    }
}
