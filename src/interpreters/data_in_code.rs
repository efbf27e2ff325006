//! `LC_DATA_IN_CODE` entries.

use crate::bytes::{hex_u64, ByteView};
use crate::translation::{TranslationGroup, TranslationKind};

const ENTRY_SIZE: usize = 8;

fn kind_name(kind: u16) -> Option<&'static str> {
    match kind {
        1 => Some("DICE_KIND_DATA"),
        2 => Some("DICE_KIND_JUMP_TABLE8"),
        3 => Some("DICE_KIND_JUMP_TABLE16"),
        4 => Some("DICE_KIND_JUMP_TABLE32"),
        5 => Some("DICE_KIND_ABS_JUMP_TABLE32"),
        _ => None,
    }
}

/// Decoder for `data_in_code_entry` records.
#[derive(Debug, Clone)]
pub struct DataInCodeDecoder {
    view: ByteView,
}

impl DataInCodeDecoder {
    /// Decode the given blob.
    pub fn new(view: ByteView) -> Self {
        Self { view }
    }

    pub(crate) fn translate(&self) -> Vec<TranslationGroup> {
        let bytes = self.view.as_slice();
        let base = self.view.range().start;
        let mut groups = Vec::with_capacity(bytes.len() / ENTRY_SIZE);
        for (index, record) in bytes.chunks(ENTRY_SIZE).enumerate() {
            let mut group = TranslationGroup::new(base + (index * ENTRY_SIZE) as u64);
            if record.len() < ENTRY_SIZE {
                group
                    .add(TranslationKind::RawBytes(record.len()), "Partial Entry", hex::encode_upper(record))
                    .with_error("entry runs past the end of the data");
                groups.push(group);
                break;
            }
            let offset = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
            let length = u16::from_le_bytes([record[4], record[5]]);
            let kind = u16::from_le_bytes([record[6], record[7]]);
            group.add(TranslationKind::UInt32, "File Offset", hex_u64(u64::from(offset)));
            group.add(TranslationKind::UInt16, "Length", length.to_string());
            let translation = group.add(
                TranslationKind::Enum16,
                "Kind",
                kind_name(kind).map_or_else(|| kind.to_string(), str::to_string),
            );
            if kind_name(kind).is_none() {
                translation.with_error("unknown data-in-code kind");
            }
            groups.push(group);
        }
        groups
    }
}
