//! Per-section relocation entries. Display only; nothing is applied.

use crate::bytes::{hex_u64, ByteView};
use crate::cache::CancelToken;
use crate::error::{Result, ResultExt};
use crate::interpreters::Dependency;
use crate::translation::{TranslationGroup, TranslationKind};

const R_SCATTERED: u32 = 0x8000_0000;

/// Size of one `relocation_info` record.
pub const RELOCATION_SIZE: usize = 8;

/// Fields of a plain `relocation_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocationInfo {
    pub address: i32,
    pub symbolnum: u32,
    pub pcrel: bool,
    pub length: u8,
    pub is_extern: bool,
    pub kind: u8,
}

impl RelocationInfo {
    fn unpack(address: u32, word: u32) -> Self {
        Self {
            address: address as i32,
            symbolnum: word & 0x00FF_FFFF,
            pcrel: (word >> 24) & 1 != 0,
            length: ((word >> 25) & 0x3) as u8,
            is_extern: (word >> 27) & 1 != 0,
            kind: (word >> 28) as u8,
        }
    }
}

/// Fields of a `scattered_relocation_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScatteredRelocationInfo {
    pub address: u32,
    pub kind: u8,
    pub length: u8,
    pub pcrel: bool,
    pub value: i32,
}

impl ScatteredRelocationInfo {
    fn unpack(word: u32, value: u32) -> Self {
        Self {
            address: word & 0x00FF_FFFF,
            kind: ((word >> 24) & 0xF) as u8,
            length: ((word >> 28) & 0x3) as u8,
            pcrel: (word >> 30) & 1 != 0,
            value: value as i32,
        }
    }
}

/// Decoder for the relocation entries of one section.
#[derive(Debug, Clone)]
pub struct RelocationDecoder {
    view: ByteView,
    section_name: String,
    symbols: Option<Dependency>,
}

impl RelocationDecoder {
    /// `symbols` is used to name external relocation targets.
    pub fn new(view: ByteView, section_name: impl Into<String>, symbols: Option<Dependency>) -> Self {
        Self {
            view,
            section_name: section_name.into(),
            symbols,
        }
    }

    pub(crate) fn translate(&self, cancel: &CancelToken) -> Result<Vec<TranslationGroup>> {
        let symbols = match &self.symbols {
            Some(dependency) => Some(dependency.symbols(cancel).context("Symbol Table")?),
            None => None,
        };
        let mut shifter = self.view.shifter();
        let mut groups = Vec::with_capacity(self.view.len() / RELOCATION_SIZE);
        while shifter.remaining() >= RELOCATION_SIZE {
            let mut group = TranslationGroup::new(shifter.file_position() as u64);
            let first = shifter.shift_u32()?;
            let second = shifter.shift_u32()?;
            if first & R_SCATTERED != 0 {
                let info = ScatteredRelocationInfo::unpack(first, second);
                group
                    .add(
                        TranslationKind::Flags(4),
                        "Scattered Relocation",
                        format!(
                            "address={} type={} length={} pcrel={}",
                            hex_u64(u64::from(info.address)),
                            info.kind,
                            info.length,
                            u8::from(info.pcrel)
                        ),
                    )
                    .with_secondary("Section", &self.section_name);
                group.add(TranslationKind::Int32, "Value", hex_u64(u64::from(second)));
            } else {
                let info = RelocationInfo::unpack(first, second);
                group
                    .add(TranslationKind::Int32, "Address", hex_u64(u64::from(first)))
                    .with_secondary("Section", &self.section_name);
                let target = group.add(
                    TranslationKind::Flags(4),
                    "Relocation Info",
                    format!(
                        "symbolnum={} pcrel={} length={} extern={} type={}",
                        info.symbolnum,
                        u8::from(info.pcrel),
                        info.length,
                        u8::from(info.is_extern),
                        info.kind
                    ),
                );
                if info.is_extern {
                    match symbols.as_ref().map(|table| table.find_by_index(info.symbolnum as usize)) {
                        Some(Ok(symbol)) => {
                            target.with_secondary("Symbol", symbol.name.clone().unwrap_or_default());
                        }
                        Some(Err(_)) => {
                            target.with_error("symbol index out of range");
                        }
                        None => {}
                    }
                } else {
                    target.with_secondary("Section Ordinal", info.symbolnum.to_string());
                }
            }
            groups.push(group);
        }
        Ok(groups)
    }
}
