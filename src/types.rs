//! Decode configuration.

use std::time::Duration;

/// Options controlling how a file is decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeOptions {
    /// How long a waiting consumer sleeps between checks for progress or cancellation
    pub poll_interval: Duration,
    /// Ask the attached demangler about C-string section contents
    pub demangle_cstrings: bool,
    /// Bytes per row for raw-data sections
    pub raw_row_width: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodeOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            demangle_cstrings: true,
            raw_row_width: 16,
        }
    }

    /// Options for tight interactive loops: short waits, narrow rows.
    pub fn interactive() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            demangle_cstrings: true,
            raw_row_width: 8,
        }
    }

    /// Options for batch dumps: no demangling, wide rows.
    pub fn batch() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            demangle_cstrings: false,
            raw_row_width: 32,
        }
    }

    /// Set the wait backoff.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Enable or disable C-string demangling.
    pub fn with_demangling(mut self, demangle: bool) -> Self {
        self.demangle_cstrings = demangle;
        self
    }

    /// Set the raw row width. Zero is clamped to one.
    pub fn with_raw_row_width(mut self, width: usize) -> Self {
        self.raw_row_width = width.max(1);
        self
    }
}
