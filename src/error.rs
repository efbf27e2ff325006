//! Error types for the Mach-O annotator.
//!
//! Structural problems (bad magic, reads past the buffer, a dynamic symbol
//! table without a symbol table, out-of-range table indices) surface as
//! [`MachoError`] values. Problems local to a single field are rendered
//! inline on the affected [`Translation`](crate::translation::Translation)
//! instead and never reach this type.

use thiserror::Error;

/// Primary error type for the annotator.
#[derive(Debug, Error)]
pub enum MachoError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The first four bytes are not one of the two accepted Mach-O magics.
    #[error("Invalid magic bytes: expected CEFAEDFE or CFFAEDFE, got {actual}")]
    InvalidMagic { actual: String },

    /// A read would run past the end of the buffer.
    #[error("Truncated data at offset {offset}: expected {expected} bytes, got {actual}")]
    TruncatedData {
        offset: usize,
        expected: usize,
        actual: usize,
    },

    /// A load command whose size prefix makes the table walk impossible.
    #[error("Malformed load command #{index} at offset 0x{offset:X}: {message}")]
    MalformedLoadCommand {
        index: usize,
        offset: usize,
        message: String,
    },

    /// `LC_DYSYMTAB` appeared before any `LC_SYMTAB`.
    #[error("LC_DYSYMTAB at offset 0x{offset:X} has no preceding LC_SYMTAB")]
    MissingSymbolTable { offset: usize },

    /// An index into a decoded table is beyond its length.
    #[error("Index {index} out of range for {table} (length {len})")]
    IndexOutOfRange {
        table: &'static str,
        index: usize,
        len: usize,
    },

    /// A LEB128 value does not fit in 64 bits.
    #[error("LEB128 value at offset 0x{offset:X} overflows 64 bits")]
    MalformedLeb { offset: usize },

    /// A portion's producer was started twice.
    #[error("Portion '{portion}' is already loading")]
    AlreadyStarted { portion: String },

    /// A consumer gave up waiting for a portion.
    #[error("Waiting for portion '{portion}' was cancelled")]
    Cancelled { portion: String },

    /// The portion a consumer depends on failed to decode.
    #[error("Portion '{portion}' failed: {message}")]
    DependencyFailed { portion: String, message: String },

    /// A portion's producer panicked while decoding.
    #[error("Portion '{portion}' panicked: {message}")]
    Panicked { portion: String, message: String },

    /// A portion produced a payload of a different shape than the caller expected.
    #[error("Portion '{portion}' does not hold {expected}")]
    UnexpectedPayload {
        portion: String,
        expected: &'static str,
    },
}

/// Result type alias for annotator operations.
pub type Result<T> = std::result::Result<T, MachoError>;

/// Extension trait for adding context to errors.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, msg: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| MachoError::DependencyFailed {
            portion: msg.into(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MachoError::TruncatedData {
            offset: 16,
            expected: 4,
            actual: 2,
        };
        assert!(err.to_string().contains("16"));
        assert!(err.to_string().contains("4"));
    }

    #[test]
    fn test_malformed_load_command_hex_offset() {
        let err = MachoError::MalformedLoadCommand {
            index: 3,
            offset: 0xBEEF,
            message: "size below 8".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("BEEF"));
        assert!(msg.contains("#3"));
    }

    #[test]
    fn test_context_wraps_message() {
        let res: Result<()> = Err(MachoError::MalformedLeb { offset: 2 });
        let err = res.context("Function Starts").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Function Starts"));
        assert!(msg.contains("LEB128"));
    }
}
