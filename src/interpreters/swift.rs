//! Swift metadata tables of 32-bit self-relative offsets
//! (`__swift5_protos`, `__swift5_proto`).

use crate::bytes::{hex_u64, ByteView};
use crate::translation::{TranslationGroup, TranslationKind};

/// Decoder for a relative-offset table.
#[derive(Debug, Clone)]
pub struct RelativeOffsetDecoder {
    view: ByteView,
    vmaddr: u64,
}

impl RelativeOffsetDecoder {
    /// `vmaddr` is the virtual address of the first entry.
    pub fn new(view: ByteView, vmaddr: u64) -> Self {
        Self { view, vmaddr }
    }

    pub(crate) fn translate(&self) -> Vec<TranslationGroup> {
        let mut group = TranslationGroup::new(self.view.range().start);
        for (index, entry) in self.view.as_slice().chunks_exact(4).enumerate() {
            let relative = i32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]);
            let slot = self.vmaddr.wrapping_add(index as u64 * 4);
            let target = slot.wrapping_add_signed(i64::from(relative));
            group
                .add(TranslationKind::Int32, "Relative Offset", relative.to_string())
                .with_secondary("Target Address", hex_u64(target));
        }
        group.skip(self.view.range().end() - group.end());
        vec![group]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_targets_are_slot_relative() {
        let mut data = 0x40i32.to_le_bytes().to_vec();
        data.extend_from_slice(&(-8i32).to_le_bytes());
        data.push(0);
        let view = ByteView::new(Arc::from(data));
        let groups = RelativeOffsetDecoder::new(view, 0x1000).translate();
        let entries = groups[0].translations();
        assert_eq!(entries[0].secondary.as_ref().unwrap().value, "0x1040");
        assert_eq!(entries[1].value, "-8");
        assert_eq!(entries[1].secondary.as_ref().unwrap().value, "0xFFC");
        assert_eq!(groups[0].range().len, 9);
    }
}
