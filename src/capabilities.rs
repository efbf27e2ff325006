//! External collaborators the decoder can use but never requires.
//!
//! Disassembly and symbol demangling live outside this crate. Callers plug
//! them in through [`Capabilities`]; without them instruction sections stay
//! one opaque code span and C strings are shown as stored.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::bytes::ByteRange;
use crate::translation::{compare_range, Translation, TranslationKind};

/// Instruction-set families a disassembler can be asked to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Arch {
    X86,
    X86_64,
    Arm,
    Arm64,
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::X86 => "x86",
            Self::X86_64 => "x86_64",
            Self::Arm => "arm",
            Self::Arm64 => "arm64",
        };
        write!(f, "{name}")
    }
}

/// One decoded instruction.
///
/// A [`Disassembler`] reports `range` relative to the bytes it was given;
/// an [`InstructionBank`] stores it rebased to absolute file offsets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedInstruction {
    pub range: ByteRange,
    pub text: String,
}

/// Machine-code decoder.
pub trait Disassembler: Send + Sync {
    /// Decode `bytes` as code for `arch`, with `code_start` as the virtual
    /// address of `bytes[0]`. Results must be ordered and non-overlapping.
    fn decode(&self, bytes: &[u8], arch: Arch, code_start: u64) -> Vec<DecodedInstruction>;
}

/// Symbol-name demangler.
pub trait Demangler: Send + Sync {
    /// Demangled form of `raw`, or `None` if `raw` is not a mangled name.
    fn demangle(&self, raw: &str) -> Option<String>;
}

/// The optional collaborators attached to a decode.
#[derive(Clone, Default)]
pub struct Capabilities {
    pub disassembler: Option<Arc<dyn Disassembler>>,
    pub demangler: Option<Arc<dyn Demangler>>,
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("disassembler", &self.disassembler.is_some())
            .field("demangler", &self.demangler.is_some())
            .finish()
    }
}

impl Capabilities {
    /// No collaborators attached.
    pub fn none() -> Self {
        Self::default()
    }

    /// Attach a disassembler.
    pub fn with_disassembler(mut self, disassembler: Arc<dyn Disassembler>) -> Self {
        self.disassembler = Some(disassembler);
        self
    }

    /// Attach a demangler.
    pub fn with_demangler(mut self, demangler: Arc<dyn Demangler>) -> Self {
        self.demangler = Some(demangler);
        self
    }
}

/// Decoded instructions of one code section, in file order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstructionBank {
    arch: Arch,
    code_start: u64,
    section_start: u64,
    instructions: Vec<DecodedInstruction>,
}

impl InstructionBank {
    /// Rebase disassembler output to the section's file offset.
    ///
    /// Instructions that would overlap their predecessor or leave the section
    /// are dropped, so lookups can binary-search.
    pub fn new(
        arch: Arch,
        code_start: u64,
        section: ByteRange,
        decoded: Vec<DecodedInstruction>,
    ) -> Self {
        let mut instructions: Vec<DecodedInstruction> = Vec::with_capacity(decoded.len());
        let mut cursor = section.start;
        for instruction in decoded {
            let inside = instruction
                .range
                .start
                .checked_add(instruction.range.len)
                .is_some_and(|end| end <= section.len);
            let range = ByteRange::new(section.start + instruction.range.start, instruction.range.len);
            if !inside || range.is_empty() || range.start < cursor {
                tracing::warn!(%range, "dropping out-of-order instruction");
                continue;
            }
            cursor = range.end();
            instructions.push(DecodedInstruction {
                range,
                text: instruction.text,
            });
        }
        Self {
            arch,
            code_start,
            section_start: section.start,
            instructions,
        }
    }

    /// Architecture the bank was decoded for.
    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// Virtual address of the first byte of the section.
    pub fn code_start(&self) -> u64 {
        self.code_start
    }

    /// Decoded instructions.
    pub fn instructions(&self) -> &[DecodedInstruction] {
        &self.instructions
    }

    /// Index of the instruction covering a file offset.
    pub fn lookup(&self, offset: u64) -> Option<usize> {
        self.instructions
            .binary_search_by(|instruction| compare_range(&instruction.range, offset))
            .ok()
    }

    /// The instruction covering `offset`, shaped as a translation.
    pub fn search(&self, offset: u64) -> Option<Translation> {
        let instruction = &self.instructions[self.lookup(offset)?];
        let address = self.code_start.wrapping_add(instruction.range.start - self.section_start);
        let mut translation = Translation::new(
            instruction.range.start,
            TranslationKind::Code(instruction.range.len as usize),
            format!("{} instruction", self.arch),
            instruction.text.clone(),
        );
        translation.with_secondary("Address", crate::bytes::hex_u64(address));
        Some(translation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedWidth(u64);

    impl Disassembler for FixedWidth {
        fn decode(&self, bytes: &[u8], _arch: Arch, _code_start: u64) -> Vec<DecodedInstruction> {
            (0..bytes.len() as u64 / self.0)
                .map(|i| DecodedInstruction {
                    range: ByteRange::new(i * self.0, self.0),
                    text: format!("op{i}"),
                })
                .collect()
        }
    }

    #[test]
    fn test_bank_lookup() {
        let section = ByteRange::new(0x400, 12);
        let decoded = FixedWidth(4).decode(&[0u8; 12], Arch::Arm64, 0x1000);
        let bank = InstructionBank::new(Arch::Arm64, 0x1000, section, decoded);
        assert_eq!(bank.instructions().len(), 3);
        assert_eq!(bank.lookup(0x400), Some(0));
        assert_eq!(bank.lookup(0x407), Some(1));
        assert_eq!(bank.lookup(0x40C), None);
        let hit = bank.search(0x409).unwrap();
        assert_eq!(hit.value, "op2");
        assert_eq!(hit.secondary.unwrap().value, "0x1008");
    }

    #[test]
    fn test_bank_drops_overlaps() {
        let decoded = vec![
            DecodedInstruction {
                range: ByteRange::new(0, 4),
                text: "a".into(),
            },
            DecodedInstruction {
                range: ByteRange::new(2, 4),
                text: "overlap".into(),
            },
            DecodedInstruction {
                range: ByteRange::new(4, 8),
                text: "too long".into(),
            },
        ];
        let bank = InstructionBank::new(Arch::X86_64, 0, ByteRange::new(0, 8), decoded);
        assert_eq!(bank.instructions().len(), 1);
    }
}
