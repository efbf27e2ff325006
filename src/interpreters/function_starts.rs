//! `LC_FUNCTION_STARTS`: ULEB128 deltas from the start of `__TEXT`.

use tracing::warn;

use crate::bytes::{hex_u64, ByteView};
use crate::cache::CancelToken;
use crate::error::{Result, ResultExt};
use crate::interpreters::Dependency;
use crate::translation::{TranslationGroup, TranslationKind};

/// Decoder for the function-starts blob.
#[derive(Debug, Clone)]
pub struct FunctionStartsDecoder {
    view: ByteView,
    text_vmaddr: u64,
    symbols: Option<Dependency>,
}

impl FunctionStartsDecoder {
    /// Addresses are `text_vmaddr` plus the running delta sum.
    pub fn new(view: ByteView, text_vmaddr: u64, symbols: Option<Dependency>) -> Self {
        Self {
            view,
            text_vmaddr,
            symbols,
        }
    }

    pub(crate) fn translate(&self, cancel: &CancelToken) -> Result<Vec<TranslationGroup>> {
        let symbols = match &self.symbols {
            Some(dependency) => Some(dependency.symbols(cancel).context("Symbol Table")?),
            None => None,
        };
        let mut group = TranslationGroup::new(self.view.range().start);
        let mut shifter = self.view.shifter();
        let mut accumulator: u64 = 0;
        while !shifter.is_exhausted() {
            let leb = match shifter.shift_uleb128() {
                Ok(leb) => leb,
                Err(err) => {
                    warn!(offset = shifter.file_position(), error = %err, "function starts stream truncated");
                    let remaining = shifter.remaining();
                    group
                        .add(TranslationKind::RawBytes(remaining), "Truncated Delta", "")
                        .with_error("LEB128 runs past the end of the data");
                    break;
                }
            };
            accumulator = accumulator.wrapping_add(leb.value);
            let address = self.text_vmaddr.wrapping_add(accumulator);
            let names = symbols.as_ref().map(|table| {
                table
                    .find_by_address(address)
                    .into_iter()
                    .filter(|symbol| symbol.is_section_defined())
                    .filter_map(|symbol| symbol.name.clone())
                    .collect::<Vec<_>>()
                    .join(", ")
            });
            group
                .add(TranslationKind::Uleb128(leb.len), "Function Start", hex_u64(address))
                .with_secondary_opt("Symbols", names.filter(|names| !names.is_empty()));
        }
        Ok(vec![group])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytes::ByteRange;
    use std::sync::Arc;

    fn translate(bytes: &[u8]) -> TranslationGroup {
        let view = ByteView::new(Arc::from(bytes.to_vec()));
        let mut groups = FunctionStartsDecoder::new(view, 0x1_0000_0000, None)
            .translate(&CancelToken::new())
            .unwrap();
        groups.remove(0)
    }

    #[test]
    fn test_deltas_accumulate() {
        // 0x3F00, +0x20, +0x180 (two-byte ULEB), trailing zero delta
        let group = translate(&[0x80, 0x7E, 0x20, 0x80, 0x03, 0x00]);
        let values: Vec<_> = group.translations().iter().map(|t| t.value.as_str()).collect();
        assert_eq!(
            values,
            vec!["0x100003F00", "0x100003F20", "0x1000040A0", "0x1000040A0"]
        );
        let ranges: Vec<_> = group.translations().iter().map(|t| t.range).collect();
        assert_eq!(ranges[0], ByteRange::new(0, 2));
        assert_eq!(ranges[2], ByteRange::new(3, 2));
        assert_eq!(group.range().len, 6);
    }

    #[test]
    fn test_truncated_delta_is_inline() {
        let group = translate(&[0x10, 0x80]);
        assert_eq!(group.translations().len(), 2);
        assert_eq!(group.translations()[1].range, ByteRange::new(1, 1));
        assert!(group.translations()[1].error.is_some());
    }
}
