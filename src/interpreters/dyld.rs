//! Dyld rebase and bind opcode streams.
//!
//! Each byte splits into an opcode (upper nibble) and an immediate (lower
//! nibble). The opcode decides how many LEB128 operands follow and whether
//! a NUL-terminated symbol name follows. Streams end where their byte span
//! ends; `DONE` opcodes inside the span are decoded like any other.

use serde::Serialize;
use tracing::warn;

use crate::bytes::{ByteRange, ByteView, Leb, Shifter};
use crate::error::Result;
use crate::translation::{TranslationGroup, TranslationKind};

const OPCODE_MASK: u8 = 0xF0;
const IMMEDIATE_MASK: u8 = 0x0F;

/// Which opcode set a stream uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpcodeTable {
    Rebase,
    Bind,
}

#[derive(Debug, Clone, Copy)]
struct Operand {
    label: &'static str,
    signed: bool,
}

const fn uleb(label: &'static str) -> Operand {
    Operand {
        label,
        signed: false,
    }
}

#[derive(Debug, Clone, Copy)]
struct OpcodeShape {
    name: &'static str,
    operands: &'static [Operand],
    trailing_string: bool,
}

const fn op(name: &'static str, operands: &'static [Operand]) -> OpcodeShape {
    OpcodeShape {
        name,
        operands,
        trailing_string: false,
    }
}

const OFFSET: &[Operand] = &[uleb("Offset")];
const COUNT: &[Operand] = &[uleb("Count")];
const COUNT_AND_SKIP: &[Operand] = &[uleb("Count"), uleb("Skip")];
const LIBRARY_ORDINAL: &[Operand] = &[uleb("Library Ordinal")];
const TABLE_SIZE: &[Operand] = &[uleb("Table Size")];
const ADDEND: &[Operand] = &[Operand {
    label: "Addend",
    signed: true,
}];

fn pointer_type(immediate: u8) -> String {
    match immediate {
        1 => "POINTER".to_string(),
        2 => "TEXT_ABSOLUTE32".to_string(),
        3 => "TEXT_PCREL32".to_string(),
        other => format!("unknown type ({other})"),
    }
}

impl OpcodeTable {
    fn shape(self, opcode: u8, immediate: u8) -> Option<OpcodeShape> {
        let shape = match (self, opcode) {
            (Self::Rebase, 0x00) => op("REBASE_OPCODE_DONE", &[]),
            (Self::Rebase, 0x10) => op("REBASE_OPCODE_SET_TYPE_IMM", &[]),
            (Self::Rebase, 0x20) => op("REBASE_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB", OFFSET),
            (Self::Rebase, 0x30) => op("REBASE_OPCODE_ADD_ADDR_ULEB", OFFSET),
            (Self::Rebase, 0x40) => op("REBASE_OPCODE_ADD_ADDR_IMM_SCALED", &[]),
            (Self::Rebase, 0x50) => op("REBASE_OPCODE_DO_REBASE_IMM_TIMES", &[]),
            (Self::Rebase, 0x60) => op("REBASE_OPCODE_DO_REBASE_ULEB_TIMES", COUNT),
            (Self::Rebase, 0x70) => op("REBASE_OPCODE_DO_REBASE_ADD_ADDR_ULEB", OFFSET),
            (Self::Rebase, 0x80) => {
                op("REBASE_OPCODE_DO_REBASE_ULEB_TIMES_SKIPPING_ULEB", COUNT_AND_SKIP)
            }
            (Self::Bind, 0x00) => op("BIND_OPCODE_DONE", &[]),
            (Self::Bind, 0x10) => op("BIND_OPCODE_SET_DYLIB_ORDINAL_IMM", &[]),
            (Self::Bind, 0x20) => op("BIND_OPCODE_SET_DYLIB_ORDINAL_ULEB", LIBRARY_ORDINAL),
            (Self::Bind, 0x30) => op("BIND_OPCODE_SET_DYLIB_SPECIAL_IMM", &[]),
            (Self::Bind, 0x40) => OpcodeShape {
                name: "BIND_OPCODE_SET_SYMBOL_TRAILING_FLAGS_IMM",
                operands: &[],
                trailing_string: true,
            },
            (Self::Bind, 0x50) => op("BIND_OPCODE_SET_TYPE_IMM", &[]),
            (Self::Bind, 0x60) => op("BIND_OPCODE_SET_ADDEND_SLEB", ADDEND),
            (Self::Bind, 0x70) => op("BIND_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB", OFFSET),
            (Self::Bind, 0x80) => op("BIND_OPCODE_ADD_ADDR_ULEB", OFFSET),
            (Self::Bind, 0x90) => op("BIND_OPCODE_DO_BIND", &[]),
            (Self::Bind, 0xA0) => op("BIND_OPCODE_DO_BIND_ADD_ADDR_ULEB", OFFSET),
            (Self::Bind, 0xB0) => op("BIND_OPCODE_DO_BIND_ADD_ADDR_IMM_SCALED", &[]),
            (Self::Bind, 0xC0) => {
                op("BIND_OPCODE_DO_BIND_ULEB_TIMES_SKIPPING_ULEB", COUNT_AND_SKIP)
            }
            (Self::Bind, 0xD0) => match immediate {
                0 => op("BIND_OPCODE_THREADED (SET_BIND_ORDINAL_TABLE_SIZE_ULEB)", TABLE_SIZE),
                1 => op("BIND_OPCODE_THREADED (APPLY)", &[]),
                _ => return None,
            },
            _ => return None,
        };
        Some(shape)
    }

    fn immediate_text(self, opcode: u8, immediate: u8) -> String {
        match (self, opcode) {
            (Self::Rebase, 0x10) | (Self::Bind, 0x50) => pointer_type(immediate),
            (Self::Rebase, 0x20) | (Self::Bind, 0x70) => format!("segment index {immediate}"),
            (Self::Rebase, 0x40) | (Self::Bind, 0xB0) => format!("scale {immediate}"),
            (Self::Rebase, 0x50) => format!("{immediate} times"),
            (Self::Bind, 0x10) => format!("library ordinal {immediate}"),
            (Self::Bind, 0x30) => match immediate {
                0 => "SELF".to_string(),
                0xF => "MAIN_EXECUTABLE".to_string(),
                0xE => "FLAT_LOOKUP".to_string(),
                0xD => "WEAK_LOOKUP".to_string(),
                other => format!("unknown special ordinal ({other})"),
            },
            (Self::Bind, 0x40) => {
                let mut flags = Vec::new();
                if immediate & 0x1 != 0 {
                    flags.push("WEAK_IMPORT");
                }
                if immediate & 0x8 != 0 {
                    flags.push("NON_WEAK_DEFINITION");
                }
                if flags.is_empty() {
                    "no flags".to_string()
                } else {
                    flags.join(" | ")
                }
            }
            (Self::Bind, 0xD0) => format!("sub-opcode {immediate}"),
            _ => format!("unused ({immediate})"),
        }
    }
}

/// One decoded opcode with its operands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DyldOperation {
    /// Opcode byte through the last operand byte.
    pub range: ByteRange,
    pub opcode: u8,
    pub immediate: u8,
    pub operands: Vec<Leb>,
    /// Trailing symbol name, NUL included in `range`.
    pub symbol: Option<Vec<u8>>,
}

/// Where and why decoding stopped before the end of the span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTruncation {
    pub offset: u64,
    pub reason: String,
}

/// A decoded stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpcodeStream {
    pub operations: Vec<DyldOperation>,
    pub truncation: Option<StreamTruncation>,
}

/// Decode a whole opcode stream.
pub fn decode_stream(view: &ByteView, table: OpcodeTable) -> OpcodeStream {
    let mut stream = OpcodeStream::default();
    let mut shifter = view.shifter();
    while !shifter.is_exhausted() {
        let start = shifter.file_position() as u64;
        match decode_one(&mut shifter, table, start) {
            Ok(operation) => stream.operations.push(operation),
            Err(err) => {
                warn!(offset = start, error = %err, "opcode stream ends inside an operation");
                stream.truncation = Some(StreamTruncation {
                    offset: start,
                    reason: err.to_string(),
                });
                break;
            }
        }
    }
    stream
}

fn decode_one(
    shifter: &mut Shifter<'_>,
    table: OpcodeTable,
    start: u64,
) -> Result<DyldOperation> {
    let byte = shifter.shift_u8()?;
    let opcode = byte & OPCODE_MASK;
    let immediate = byte & IMMEDIATE_MASK;
    let mut operands = Vec::new();
    let mut symbol = None;
    if let Some(shape) = table.shape(opcode, immediate) {
        for operand in shape.operands {
            operands.push(if operand.signed {
                shifter.shift_sleb128()?
            } else {
                shifter.shift_uleb128()?
            });
        }
        if shape.trailing_string {
            symbol = Some(shifter.shift_cstring()?.to_vec());
        }
    }
    let end = shifter.file_position() as u64;
    Ok(DyldOperation {
        range: ByteRange::new(start, end - start),
        opcode,
        immediate,
        operands,
        symbol,
    })
}

fn render(operation: &DyldOperation, table: OpcodeTable) -> TranslationGroup {
    let mut group = TranslationGroup::new(operation.range.start);
    let shape = table.shape(operation.opcode, operation.immediate);
    let name = shape.map_or_else(
        || format!("unknown opcode (0x{:02X})", operation.opcode | operation.immediate),
        |shape| shape.name.to_string(),
    );
    let opcode = group
        .add(TranslationKind::Flags(1), "Operation Code (Upper 4 bits)", name)
        .with_secondary(
            "Immediate Value (Lower 4 bits)",
            table.immediate_text(operation.opcode, operation.immediate),
        );
    if shape.is_none() {
        opcode.with_error("unknown opcode");
    }
    let labels = shape.map(|shape| shape.operands).unwrap_or_default();
    for (leb, operand) in operation.operands.iter().zip(labels) {
        let kind = if leb.signed {
            TranslationKind::Sleb128(leb.len)
        } else {
            TranslationKind::Uleb128(leb.len)
        };
        group.add(kind, operand.label, leb.display());
    }
    if let Some(raw) = &operation.symbol {
        let text = crate::bytes::utf8_until_nul(raw);
        let symbol = group.add(
            TranslationKind::Utf8String(raw.len()),
            "Symbol Name",
            text.unwrap_or_default(),
        );
        if text.is_none() {
            symbol.with_error("invalid string");
        }
    }
    group
}

/// Decoder for one of the four `LC_DYLD_INFO` opcode streams.
#[derive(Debug, Clone)]
pub struct OpcodeDecoder {
    view: ByteView,
    table: OpcodeTable,
}

impl OpcodeDecoder {
    /// Decode `view` with the given opcode set.
    pub fn new(view: ByteView, table: OpcodeTable) -> Self {
        Self { view, table }
    }

    pub(crate) fn translate(&self) -> Vec<TranslationGroup> {
        let stream = decode_stream(&self.view, self.table);
        let mut groups: Vec<_> = stream
            .operations
            .iter()
            .map(|operation| render(operation, self.table))
            .collect();
        if let Some(truncation) = stream.truncation {
            let remaining = self.view.range().end() - truncation.offset;
            let mut tail = TranslationGroup::new(truncation.offset);
            tail.add(TranslationKind::RawBytes(remaining as usize), "Truncated Operation", "")
                .with_error(truncation.reason);
            groups.push(tail);
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn stream(bytes: &[u8], table: OpcodeTable) -> OpcodeStream {
        decode_stream(&ByteView::new(Arc::from(bytes.to_vec())), table)
    }

    #[test]
    fn test_rebase_stream() {
        // SET_TYPE_IMM(POINTER), SET_SEGMENT_AND_OFFSET_ULEB(2, 0x10), DO_REBASE_IMM_TIMES(1), DONE
        let decoded = stream(&[0x11, 0x22, 0x10, 0x51, 0x00], OpcodeTable::Rebase);
        let ranges: Vec<_> = decoded.operations.iter().map(|op| op.range).collect();
        assert_eq!(
            ranges,
            vec![
                ByteRange::new(0, 1),
                ByteRange::new(1, 2),
                ByteRange::new(3, 1),
                ByteRange::new(4, 1),
            ]
        );
        assert_eq!(decoded.operations[1].operands[0].value, 0x10);
        assert_eq!(decoded.truncation, None);
    }

    #[test]
    fn test_bind_symbol_and_addend() {
        let mut bytes = vec![0x40];
        bytes.extend_from_slice(b"_printf\0");
        bytes.extend_from_slice(&[0x60, 0x7F, 0x90]);
        let decoded = stream(&bytes, OpcodeTable::Bind);
        assert_eq!(decoded.operations.len(), 3);
        assert_eq!(decoded.operations[0].symbol.as_deref(), Some(&b"_printf\0"[..]));
        assert_eq!(decoded.operations[0].range.len, 9);
        assert_eq!(decoded.operations[1].operands[0].display(), "-1");

        let decoder = OpcodeDecoder::new(ByteView::new(Arc::from(bytes)), OpcodeTable::Bind);
        let groups = decoder.translate();
        assert_eq!(groups[0].translations()[1].value, "_printf");
        assert_eq!(groups[1].translations()[1].kind, TranslationKind::Sleb128(1));
    }

    #[test]
    fn test_truncated_leb_stops_stream() {
        let bytes = [0x11, 0x30, 0x80, 0x80];
        let decoded = stream(&bytes, OpcodeTable::Rebase);
        assert_eq!(decoded.operations.len(), 1);
        assert_eq!(decoded.truncation.as_ref().map(|t| t.offset), Some(1));

        let decoder = OpcodeDecoder::new(ByteView::new(Arc::from(bytes.to_vec())), OpcodeTable::Rebase);
        let groups = decoder.translate();
        let tail = groups.last().unwrap();
        assert_eq!(tail.range(), ByteRange::new(1, 3));
        assert!(tail.translations()[0].error.as_deref().unwrap().contains("Truncated data"));
    }

    #[test]
    fn test_overflowing_leb_reports_overflow() {
        let mut bytes = vec![0x11, 0x30];
        bytes.extend_from_slice(&[0xFF; 9]);
        bytes.push(0x7F);
        let decoder = OpcodeDecoder::new(ByteView::new(Arc::from(bytes)), OpcodeTable::Rebase);
        let groups = decoder.translate();
        let tail = groups.last().unwrap();
        assert_eq!(tail.range(), ByteRange::new(1, 11));
        let error = tail.translations()[0].error.as_deref().unwrap();
        assert!(error.contains("overflows 64 bits"), "{error}");
    }

    #[test]
    fn test_unknown_opcode_is_inline() {
        let decoded = stream(&[0xE0, 0x00], OpcodeTable::Bind);
        assert_eq!(decoded.operations.len(), 2);
        let groups = OpcodeDecoder::new(ByteView::new(Arc::from(vec![0xE0u8])), OpcodeTable::Bind).translate();
        assert_eq!(groups[0].translations()[0].error.as_deref(), Some("unknown opcode"));
    }
}
