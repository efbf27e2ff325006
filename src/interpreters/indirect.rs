//! The indirect symbol table.

use serde::Serialize;

use crate::bytes::{hex_u64, ByteRange, ByteView};
use crate::cache::CancelToken;
use crate::error::{MachoError, Result, ResultExt};
use crate::interpreters::Dependency;
use crate::translation::{TranslationGroup, TranslationKind};

/// Entry refers to a local symbol that was stripped.
pub const INDIRECT_SYMBOL_LOCAL: u32 = 0x8000_0000;
/// Entry refers to an absolute symbol.
pub const INDIRECT_SYMBOL_ABS: u32 = 0x4000_0000;

/// One 4-byte indirect entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndirectSymbol {
    pub range: ByteRange,
    pub raw: u32,
}

impl IndirectSymbol {
    /// Carries the local sentinel.
    pub fn is_local(&self) -> bool {
        self.raw & INDIRECT_SYMBOL_LOCAL != 0
    }

    /// Carries the absolute sentinel.
    pub fn is_absolute(&self) -> bool {
        self.raw & INDIRECT_SYMBOL_ABS != 0
    }

    /// Symbol-table index, unless the entry is a sentinel.
    pub fn symbol_index(&self) -> Option<usize> {
        if self.is_local() || self.is_absolute() {
            None
        } else {
            Some(self.raw as usize)
        }
    }

    /// `LOCAL`, `ABSOLUTE` or `LOCAL | ABSOLUTE` for sentinel entries.
    pub fn sentinel_name(&self) -> Option<&'static str> {
        match (self.is_local(), self.is_absolute()) {
            (true, true) => Some("LOCAL | ABSOLUTE"),
            (true, false) => Some("LOCAL"),
            (false, true) => Some("ABSOLUTE"),
            (false, false) => None,
        }
    }
}

/// Decoded indirect entries in table order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndirectSymbolTable {
    entries: Vec<IndirectSymbol>,
}

impl IndirectSymbolTable {
    /// Decode 4-byte entries; a trailing partial entry is ignored.
    pub fn parse(view: &ByteView) -> Result<Self> {
        let mut shifter = view.shifter();
        let mut entries = Vec::with_capacity(view.len() / 4);
        while shifter.remaining() >= 4 {
            let start = shifter.file_position() as u64;
            entries.push(IndirectSymbol {
                range: ByteRange::new(start, 4),
                raw: shifter.shift_u32()?,
            });
        }
        Ok(Self { entries })
    }

    /// Entries in table order.
    pub fn entries(&self) -> &[IndirectSymbol] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at an index.
    pub fn get(&self, index: usize) -> Result<IndirectSymbol> {
        self.entries
            .get(index)
            .copied()
            .ok_or(MachoError::IndexOutOfRange {
                table: "indirect symbol table",
                index,
                len: self.entries.len(),
            })
    }
}

/// Decoder for the `LC_DYSYMTAB` indirect region.
#[derive(Debug, Clone)]
pub struct IndirectDecoder {
    view: ByteView,
    symbols: Dependency,
}

impl IndirectDecoder {
    /// `symbols` must publish the symbol table.
    pub fn new(view: ByteView, symbols: Dependency) -> Self {
        Self { view, symbols }
    }

    pub(crate) fn initialize(&self) -> Result<IndirectSymbolTable> {
        IndirectSymbolTable::parse(&self.view)
    }

    pub(crate) fn translate(
        &self,
        table: &IndirectSymbolTable,
        cancel: &CancelToken,
    ) -> Result<Vec<TranslationGroup>> {
        let symbols = self.symbols.symbols(cancel).context("Symbol Table")?;
        let mut group = TranslationGroup::new(self.view.range().start);
        for entry in table.entries() {
            let translation = group.add(
                TranslationKind::UInt32,
                "Symbol Table Index",
                hex_u64(u64::from(entry.raw)),
            );
            match entry.symbol_index() {
                None => {
                    translation.with_secondary("Symbol", entry.sentinel_name().unwrap_or_default());
                }
                Some(index) if index < symbols.len() => {
                    let name = symbols.find_by_index(index)?.name.clone();
                    translation.with_secondary("Symbol", name.unwrap_or_default());
                }
                Some(_) => {
                    translation.with_error("symbol index out of range");
                }
            }
        }
        group.skip(self.view.range().end() - group.end());
        Ok(vec![group])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn entry(raw: u32) -> IndirectSymbol {
        IndirectSymbol {
            range: ByteRange::new(0, 4),
            raw,
        }
    }

    #[test]
    fn test_local_sentinel_is_not_an_index() {
        let local = entry(0x8000_0005);
        assert!(local.is_local());
        assert!(!local.is_absolute());
        assert_eq!(local.symbol_index(), None);
        assert_eq!(local.sentinel_name(), Some("LOCAL"));
    }

    #[test]
    fn test_absolute_and_plain_entries() {
        assert_eq!(entry(0x4000_0000).sentinel_name(), Some("ABSOLUTE"));
        assert_eq!(entry(0xC000_0000).sentinel_name(), Some("LOCAL | ABSOLUTE"));
        assert_eq!(entry(7).symbol_index(), Some(7));
    }

    #[test]
    fn test_parse_ignores_partial_tail() {
        let mut data = Vec::new();
        for raw in [3u32, 0x8000_0000] {
            data.extend_from_slice(&raw.to_le_bytes());
        }
        data.extend_from_slice(&[1, 2]);
        let table = IndirectSymbolTable::parse(&ByteView::new(Arc::from(data))).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(1).unwrap().range, ByteRange::new(4, 4));
        assert!(matches!(table.get(2), Err(MachoError::IndexOutOfRange { .. })));
    }
}
