//! Pointer sections: literal pointers and symbol pointers.

use tracing::warn;

use crate::bytes::{hex_u64, ByteView};
use crate::cache::CancelToken;
use crate::error::{Result, ResultExt};
use crate::interpreters::Dependency;
use crate::macho::section::SymbolPointerKind;
use crate::translation::{TranslationGroup, TranslationKind};

fn pointer_size(is_64_bit: bool) -> usize {
    if is_64_bit {
        8
    } else {
        4
    }
}

/// Read every whole pointer of a section, warning about a trailing partial one.
fn read_pointers(view: &ByteView, is_64_bit: bool) -> Result<Vec<u64>> {
    let size = pointer_size(is_64_bit);
    let mut shifter = view.shifter();
    let mut pointers = Vec::with_capacity(view.len() / size);
    while shifter.remaining() >= size {
        pointers.push(shifter.shift_pointer(is_64_bit)?);
    }
    if !shifter.is_exhausted() {
        warn!(range = %view.range(), "pointer section size is not a multiple of the pointer size");
    }
    Ok(pointers)
}

/// `S_LITERAL_POINTERS`: pointers into C-string sections.
#[derive(Debug, Clone)]
pub struct LiteralPointerDecoder {
    view: ByteView,
    is_64_bit: bool,
    cstrings: Vec<Dependency>,
}

impl LiteralPointerDecoder {
    /// `cstrings` are every C-string section of the file.
    pub fn new(view: ByteView, is_64_bit: bool, cstrings: Vec<Dependency>) -> Self {
        Self {
            view,
            is_64_bit,
            cstrings,
        }
    }

    fn lookup(&self, address: u64, cancel: &CancelToken) -> Option<String> {
        self.cstrings.iter().find_map(|dependency| {
            let container = dependency.strings(cancel).ok()?;
            container.find_by_vmaddr(address).and_then(|entry| entry.text.clone())
        })
    }

    pub(crate) fn translate(&self, cancel: &CancelToken) -> Vec<TranslationGroup> {
        let kind = TranslationKind::unsigned(pointer_size(self.is_64_bit));
        let mut group = TranslationGroup::new(self.view.range().start);
        let pointers = read_pointers(&self.view, self.is_64_bit).unwrap_or_default();
        for pointer in pointers {
            let target = self.lookup(pointer, cancel);
            group
                .add(kind, "Pointer Value (Virtual Address)", hex_u64(pointer))
                .with_secondary_opt("Referenced String", target);
        }
        group.skip(self.view.range().end() - group.end());
        vec![group]
    }
}

/// Lazy, non-lazy and lazy-dylib symbol pointer sections.
#[derive(Debug, Clone)]
pub struct SymbolPointerDecoder {
    view: ByteView,
    is_64_bit: bool,
    kind: SymbolPointerKind,
    /// First indirect-table index used by this section (`reserved1`).
    first_indirect: u32,
    indirect: Option<Dependency>,
    symbols: Option<Dependency>,
}

impl SymbolPointerDecoder {
    /// Without `indirect` and `symbols` the pointers are shown unresolved.
    pub fn new(
        view: ByteView,
        is_64_bit: bool,
        kind: SymbolPointerKind,
        first_indirect: u32,
        indirect: Option<Dependency>,
        symbols: Option<Dependency>,
    ) -> Self {
        Self {
            view,
            is_64_bit,
            kind,
            first_indirect,
            indirect,
            symbols,
        }
    }

    fn label(&self) -> &'static str {
        match self.kind {
            SymbolPointerKind::Lazy => "Pointer Raw Value (Stub offset)",
            SymbolPointerKind::NonLazy => "Pointer Raw Value (To be fixed by dyld)",
            SymbolPointerKind::LazyDylib => "Pointer Raw Value",
        }
    }

    pub(crate) fn translate(&self, cancel: &CancelToken) -> Result<Vec<TranslationGroup>> {
        let tables = match (&self.indirect, &self.symbols) {
            (Some(indirect), Some(symbols)) => Some((
                indirect.indirect(cancel).context("Indirect Symbol Table")?,
                symbols.symbols(cancel).context("Symbol Table")?,
            )),
            _ => None,
        };
        let kind = TranslationKind::unsigned(pointer_size(self.is_64_bit));
        let mut group = TranslationGroup::new(self.view.range().start);
        for (slot, pointer) in read_pointers(&self.view, self.is_64_bit)?.into_iter().enumerate() {
            let translation = group.add(kind, self.label(), hex_u64(pointer));
            let Some((indirect, symbols)) = &tables else {
                continue;
            };
            let index = slot.saturating_add(self.first_indirect as usize);
            if index >= indirect.len() {
                translation.with_error("indirect index out of range");
                continue;
            }
            let entry = indirect.get(index)?;
            match entry.symbol_index() {
                None => {
                    translation.with_secondary("Symbol", entry.sentinel_name().unwrap_or_default());
                }
                Some(symbol) if symbol < symbols.len() => {
                    let name = symbols.find_by_index(symbol)?.name.clone();
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
