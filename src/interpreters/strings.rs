//! String sections and the symbol string table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::bytes::{hex_u64, ByteRange, ByteView};
use crate::capabilities::Demangler;
use crate::translation::{TranslationGroup, TranslationKind};

/// Text encoding of a string section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StringEncoding {
    Utf8,
    Utf16Le,
}

impl StringEncoding {
    fn unit(self) -> usize {
        match self {
            Self::Utf8 => 1,
            Self::Utf16Le => 2,
        }
    }
}

/// One string found in a section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StringEntry {
    /// Bytes of the string, terminator included when present.
    pub range: ByteRange,
    /// Decoded text, `None` when the bytes are not valid in the encoding.
    pub text: Option<String>,
    pub terminated: bool,
}

/// Locate the strings of a section. NUL runs between strings are skipped.
fn scan(bytes: &[u8], base: u64, encoding: StringEncoding) -> Vec<StringEntry> {
    let unit = encoding.unit();
    let usable = bytes.len() - bytes.len() % unit;
    let is_nul = |at: usize| bytes[at..at + unit].iter().all(|&b| b == 0);
    let mut entries = Vec::new();
    let mut cursor = 0;
    while cursor < usable {
        if is_nul(cursor) {
            cursor += unit;
            continue;
        }
        let start = cursor;
        while cursor < usable && !is_nul(cursor) {
            cursor += unit;
        }
        let terminated = cursor < usable;
        let text_end = cursor;
        if terminated {
            cursor += unit;
        }
        let text = decode(&bytes[start..text_end], encoding);
        entries.push(StringEntry {
            range: ByteRange::new(base + start as u64, (cursor - start) as u64),
            text,
            terminated,
        });
    }
    entries
}

fn decode(bytes: &[u8], encoding: StringEncoding) -> Option<String> {
    match encoding {
        StringEncoding::Utf8 => std::str::from_utf8(bytes).ok().map(str::to_string),
        StringEncoding::Utf16Le => {
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16(&units).ok()
        }
    }
}

/// Render scanned strings as one contiguous group spanning the section.
fn render(
    view: &ByteView,
    entries: &[StringEntry],
    encoding: StringEncoding,
    demangler: Option<&dyn Demangler>,
) -> TranslationGroup {
    let mut group = TranslationGroup::new(view.range().start);
    for entry in entries {
        group.skip(entry.range.start - group.end());
        let len = entry.range.len as usize;
        let kind = match encoding {
            StringEncoding::Utf8 => TranslationKind::Utf8String(len),
            StringEncoding::Utf16Le => TranslationKind::Utf16String(len),
        };
        let translation = group.add(kind, "String", entry.text.clone().unwrap_or_default());
        match &entry.text {
            Some(text) => {
                let demangled = demangler.and_then(|d| d.demangle(text));
                translation.with_secondary_opt("Demangled", demangled);
            }
            None => {
                translation.with_error("invalid string");
            }
        }
        if !entry.terminated {
            translation.with_error("missing terminator");
        }
    }
    group.skip(view.range().end() - group.end());
    group
}

/// Strings of a C-string or UTF-16 section, addressable by virtual address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StringContainer {
    section_start: u64,
    vmaddr: u64,
    len: u64,
    encoding: StringEncoding,
    entries: Vec<StringEntry>,
    by_offset: HashMap<u64, usize>,
}

impl StringContainer {
    /// Scan a section's bytes.
    pub fn new(view: &ByteView, vmaddr: u64, encoding: StringEncoding) -> Self {
        let section_start = view.range().start;
        let entries = scan(view.as_slice(), section_start, encoding);
        let by_offset = entries
            .iter()
            .enumerate()
            .map(|(index, entry)| (entry.range.start - section_start, index))
            .collect();
        Self {
            section_start,
            vmaddr,
            len: view.len() as u64,
            encoding,
            entries,
            by_offset,
        }
    }

    /// Strings in section order.
    pub fn entries(&self) -> &[StringEntry] {
        &self.entries
    }

    /// The string starting exactly at a section-relative offset.
    pub fn find_by_offset(&self, offset: u64) -> Option<&StringEntry> {
        self.by_offset.get(&offset).map(|&index| &self.entries[index])
    }

    /// The string starting exactly at a virtual address inside the section.
    pub fn find_by_vmaddr(&self, address: u64) -> Option<&StringEntry> {
        let offset = address.checked_sub(self.vmaddr)?;
        if offset >= self.len {
            return None;
        }
        self.find_by_offset(offset)
    }

    /// File offset of the section.
    pub fn section_start(&self) -> u64 {
        self.section_start
    }
}

/// Decoder for a C-string or UTF-16 section.
#[derive(Clone)]
pub struct StringDecoder {
    view: ByteView,
    vmaddr: u64,
    encoding: StringEncoding,
    demangler: Option<Arc<dyn Demangler>>,
}

impl std::fmt::Debug for StringDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StringDecoder")
            .field("range", &self.view.range())
            .field("vmaddr", &hex_u64(self.vmaddr))
            .field("encoding", &self.encoding)
            .field("demangle", &self.demangler.is_some())
            .finish()
    }
}

impl StringDecoder {
    /// `demangler` is only consulted for UTF-8 sections.
    pub fn new(
        view: ByteView,
        vmaddr: u64,
        encoding: StringEncoding,
        demangler: Option<Arc<dyn Demangler>>,
    ) -> Self {
        Self {
            view,
            vmaddr,
            encoding,
            demangler,
        }
    }

    pub(crate) fn initialize(&self) -> StringContainer {
        StringContainer::new(&self.view, self.vmaddr, self.encoding)
    }

    pub(crate) fn translate(&self, container: &StringContainer) -> Vec<TranslationGroup> {
        let demangler = match self.encoding {
            StringEncoding::Utf8 => self.demangler.as_deref(),
            StringEncoding::Utf16Le => None,
        };
        vec![render(&self.view, container.entries(), self.encoding, demangler)]
    }
}

/// The string region named by `LC_SYMTAB`.
///
/// Lookups scan to the next NUL once per offset and remember the answer.
#[derive(Debug)]
pub struct StringTable {
    view: ByteView,
    memo: Mutex<HashMap<u32, Option<Arc<str>>>>,
}

impl StringTable {
    /// Wrap the string region.
    pub fn new(view: ByteView) -> Self {
        Self {
            view,
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// The NUL-terminated string at a table-relative offset.
    ///
    /// `None` for offsets outside the table or bytes that are not UTF-8.
    pub fn string_at(&self, offset: u32) -> Option<Arc<str>> {
        let mut memo = self.memo.lock().unwrap_or_else(PoisonError::into_inner);
        memo.entry(offset)
            .or_insert_with(|| {
                let bytes = self.view.as_slice().get(offset as usize..)?;
                crate::bytes::utf8_until_nul(bytes).map(Arc::from)
            })
            .clone()
    }

    /// Size of the table in bytes.
    pub fn len(&self) -> usize {
        self.view.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }
}

/// Decoder for the symbol string table.
#[derive(Debug, Clone)]
pub struct StringTableDecoder {
    view: ByteView,
}

impl StringTableDecoder {
    /// Decode the given string region.
    pub fn new(view: ByteView) -> Self {
        Self { view }
    }

    pub(crate) fn initialize(&self) -> StringTable {
        StringTable::new(self.view.clone())
    }

    pub(crate) fn translate(&self, _table: &StringTable) -> Vec<TranslationGroup> {
        let entries = scan(self.view.as_slice(), self.view.range().start, StringEncoding::Utf8);
        vec![render(&self.view, &entries, StringEncoding::Utf8, None)]
    }
}
