//! Raw byte spans: fixed-width rows, or one opaque span for data nothing can decode.

use crate::bytes::ByteView;
use crate::translation::{TranslationGroup, TranslationKind};

/// Marker attached to spans that are recorded but not decoded.
pub const UNKNOWN_MARKER: &str = "unknown, cannot parse further";

/// How the bytes are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawLayout {
    /// Rows of `width` bytes, each shown as hex.
    Rows { width: usize },
    /// One span carrying [`UNKNOWN_MARKER`].
    Opaque,
}

/// Decoder for raw spans.
#[derive(Debug, Clone)]
pub struct RawDecoder {
    view: ByteView,
    layout: RawLayout,
}

impl RawDecoder {
    /// Rows of `width` bytes.
    pub fn rows(view: ByteView, width: usize) -> Self {
        Self {
            view,
            layout: RawLayout::Rows {
                width: width.max(1),
            },
        }
    }

    /// A single span marked as not understood.
    pub fn opaque(view: ByteView) -> Self {
        Self {
            view,
            layout: RawLayout::Opaque,
        }
    }

    pub(crate) fn translate(&self) -> Vec<TranslationGroup> {
        let mut group = TranslationGroup::new(self.view.range().start);
        if self.view.is_empty() {
            return Vec::new();
        }
        match self.layout {
            RawLayout::Rows { width } => {
                for row in self.view.as_slice().chunks(width) {
                    group.add(TranslationKind::RawBytes(row.len()), "Raw Data", hex::encode_upper(row));
                }
            }
            RawLayout::Opaque => {
                group
                    .add(TranslationKind::RawBytes(self.view.len()), "Raw Data", "")
                    .with_error(UNKNOWN_MARKER);
            }
        }
        vec![group]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translation::search_groups;
    use std::sync::Arc;

    fn view(len: usize) -> ByteView {
        ByteView::new(Arc::from((0..len as u8).collect::<Vec<_>>()))
    }

    #[test]
    fn test_rows_cover_every_byte() {
        let groups = RawDecoder::rows(view(10), 4).translate();
        let lens: Vec<_> = groups[0].translations().iter().map(|t| t.range.len).collect();
        assert_eq!(lens, vec![4, 4, 2]);
        assert_eq!(groups[0].translations()[1].value, "04050607");
        for offset in 0..10 {
            assert!(search_groups(&groups, offset).is_some());
        }
    }

    #[test]
    fn test_opaque_span_has_marker() {
        let groups = RawDecoder::opaque(view(6)).translate();
        let span = &groups[0].translations()[0];
        assert_eq!(span.range.len, 6);
        assert_eq!(span.error.as_deref(), Some(UNKNOWN_MARKER));
        assert!(RawDecoder::opaque(view(0)).translate().is_empty());
    }
}
