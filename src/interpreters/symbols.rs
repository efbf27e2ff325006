//! The `nlist` symbol table.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::bytes::{hex_u64, ByteRange, ByteView};
use crate::cache::CancelToken;
use crate::error::{MachoError, Result, ResultExt};
use crate::interpreters::Dependency;
use crate::translation::{TranslationGroup, TranslationKind};

/// `n_type` masks.
pub mod n_type {
    /// Debugging entry when any of these bits is set.
    pub const N_STAB: u8 = 0xE0;
    /// Private external.
    pub const N_PEXT: u8 = 0x10;
    /// Type bits.
    pub const N_TYPE: u8 = 0x0E;
    /// External.
    pub const N_EXT: u8 = 0x01;

    /// Undefined.
    pub const N_UNDF: u8 = 0x0;
    /// Absolute.
    pub const N_ABS: u8 = 0x2;
    /// Defined in section `n_sect`.
    pub const N_SECT: u8 = 0xE;
    /// Prebound undefined.
    pub const N_PBUD: u8 = 0xC;
    /// Indirect.
    pub const N_INDR: u8 = 0xA;
}

/// `n_sect` value for symbols outside any section.
pub const NO_SECT: u8 = 0;

/// One decoded symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolEntry {
    pub index: usize,
    pub range: ByteRange,
    pub strx: u32,
    pub name: Option<String>,
    pub n_type: u8,
    pub n_sect: u8,
    pub n_desc: u16,
    pub n_value: u64,
}

impl SymbolEntry {
    /// Record size: 12 or 16 bytes.
    pub const fn record_size(is_64_bit: bool) -> usize {
        if is_64_bit {
            16
        } else {
            12
        }
    }

    /// Whether this is a debugger (stab) entry.
    pub fn is_stab(&self) -> bool {
        self.n_type & n_type::N_STAB != 0
    }

    /// Whether the symbol is defined in a section.
    pub fn is_section_defined(&self) -> bool {
        !self.is_stab() && self.n_type & n_type::N_TYPE == n_type::N_SECT
    }

    /// `N_PEXT | N_SECT | N_EXT` style rendering of `n_type`.
    pub fn type_description(&self) -> String {
        if self.is_stab() {
            return format!("N_STAB ({})", hex_u64(u64::from(self.n_type)));
        }
        let mut parts = Vec::new();
        if self.n_type & n_type::N_PEXT != 0 {
            parts.push("N_PEXT".to_string());
        }
        parts.push(match self.n_type & n_type::N_TYPE {
            n_type::N_UNDF => "N_UNDF".to_string(),
            n_type::N_ABS => "N_ABS".to_string(),
            n_type::N_SECT => "N_SECT".to_string(),
            n_type::N_PBUD => "N_PBUD".to_string(),
            n_type::N_INDR => "N_INDR".to_string(),
            other => format!("unknown type ({})", hex_u64(u64::from(other))),
        });
        if self.n_type & n_type::N_EXT != 0 {
            parts.push("N_EXT".to_string());
        }
        parts.join(" | ")
    }

    /// Names of the `n_desc` flag bits that are set.
    pub fn description_flags(&self) -> String {
        const FLAGS: [(u16, &str); 5] = [
            (0x0010, "REFERENCED_DYNAMICALLY"),
            (0x0020, "N_NO_DEAD_STRIP"),
            (0x0040, "N_WEAK_REF"),
            (0x0080, "N_WEAK_DEF"),
            (0x0200, "N_ALT_ENTRY"),
        ];
        let names: Vec<_> = FLAGS
            .iter()
            .filter(|(bit, _)| self.n_desc & bit != 0)
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            "none".to_string()
        } else {
            names.join(" | ")
        }
    }
}

/// All symbols plus an address index.
///
/// Several symbols may share an address; every one of them is kept, in
/// table order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SymbolTable {
    entries: Vec<SymbolEntry>,
    by_address: HashMap<u64, Vec<usize>>,
}

impl SymbolTable {
    /// Index a list of entries.
    pub fn new(entries: Vec<SymbolEntry>) -> Self {
        let mut by_address: HashMap<u64, Vec<usize>> = HashMap::new();
        for (index, entry) in entries.iter().enumerate() {
            by_address.entry(entry.n_value).or_default().push(index);
        }
        Self { entries, by_address }
    }

    /// Symbols in table order.
    pub fn entries(&self) -> &[SymbolEntry] {
        &self.entries
    }

    /// Number of symbols.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no symbols.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The symbol at a table index.
    pub fn find_by_index(&self, index: usize) -> Result<&SymbolEntry> {
        self.entries.get(index).ok_or(MachoError::IndexOutOfRange {
            table: "symbol table",
            index,
            len: self.entries.len(),
        })
    }

    /// Every symbol whose value equals `address`, in table order.
    pub fn find_by_address(&self, address: u64) -> Vec<&SymbolEntry> {
        self.by_address
            .get(&address)
            .map(|indices| indices.iter().map(|&i| &self.entries[i]).collect())
            .unwrap_or_default()
    }
}

/// Decoder for the symbol table region.
#[derive(Debug, Clone)]
pub struct SymbolDecoder {
    view: ByteView,
    is_64_bit: bool,
    strings: Dependency,
    /// Qualified names of all sections; `n_sect` is a 1-based index into it.
    sections: Arc<[String]>,
}

impl SymbolDecoder {
    /// `strings` must publish the `LC_SYMTAB` string table.
    pub fn new(view: ByteView, is_64_bit: bool, strings: Dependency, sections: Arc<[String]>) -> Self {
        Self {
            view,
            is_64_bit,
            strings,
            sections,
        }
    }

    pub(crate) fn initialize(&self, cancel: &CancelToken) -> Result<SymbolTable> {
        let strings = self.strings.string_table(cancel).context("String Table")?;
        let size = SymbolEntry::record_size(self.is_64_bit);
        let mut shifter = self.view.shifter();
        let mut entries = Vec::with_capacity(self.view.len() / size);
        while shifter.remaining() >= size {
            let start = shifter.file_position() as u64;
            let strx = shifter.shift_u32()?;
            let n_type = shifter.shift_u8()?;
            let n_sect = shifter.shift_u8()?;
            let n_desc = shifter.shift_u16()?;
            let n_value = shifter.shift_pointer(self.is_64_bit)?;
            entries.push(SymbolEntry {
                index: entries.len(),
                range: ByteRange::new(start, size as u64),
                strx,
                name: strings.string_at(strx).map(|s| s.to_string()),
                n_type,
                n_sect,
                n_desc,
                n_value,
            });
        }
        debug!(count = entries.len(), "decoded symbol table");
        Ok(SymbolTable::new(entries))
    }

    fn section_name(&self, n_sect: u8) -> String {
        if n_sect == NO_SECT {
            return "NO_SECT".to_string();
        }
        self.sections
            .get(usize::from(n_sect) - 1)
            .cloned()
            .unwrap_or_else(|| format!("section {n_sect} (missing)"))
    }

    pub(crate) fn translate(&self, table: &SymbolTable) -> Vec<TranslationGroup> {
        let pointer = TranslationKind::unsigned(if self.is_64_bit { 8 } else { 4 });
        table
            .entries()
            .iter()
            .map(|entry| {
                let mut group = TranslationGroup::new(entry.range.start);
                let name = group
                    .add(TranslationKind::UInt32, "String Table Index", hex_u64(u64::from(entry.strx)))
                    .with_secondary_opt("Symbol Name", entry.name.clone());
                if entry.name.is_none() {
                    name.with_error("invalid string");
                }
                group.add(TranslationKind::Enum8, "Type", entry.type_description());
                group
                    .add(TranslationKind::UInt8, "Section Ordinal", entry.n_sect.to_string())
                    .with_secondary("Section", self.section_name(entry.n_sect));
                group.add(TranslationKind::UInt16, "Description", entry.description_flags());
                group.add(pointer, "Value", hex_u64(entry.n_value));
                group
            })
            .collect()
    }
}
