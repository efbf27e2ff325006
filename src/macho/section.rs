//! Section headers and the choice of decoding strategy for each section.

use std::fmt;

use bitflags::bitflags;
use serde::Serialize;

use crate::bytes::{hex_u64, Shifter};
use crate::error::Result;
use crate::translation::{TranslationGroup, TranslationKind};

/// Section type, the low byte of a section's `flags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    Regular,
    ZeroFill,
    CStringLiterals,
    FourByteLiterals,
    EightByteLiterals,
    LiteralPointers,
    NonLazySymbolPointers,
    LazySymbolPointers,
    SymbolStubs,
    ModInitFuncPointers,
    ModTermFuncPointers,
    Coalesced,
    GbZeroFill,
    Interposing,
    SixteenByteLiterals,
    DtraceDof,
    LazyDylibSymbolPointers,
    ThreadLocalRegular,
    ThreadLocalZeroFill,
    ThreadLocalVariables,
    ThreadLocalVariablePointers,
    ThreadLocalInitFunctionPointers,
    InitFuncOffsets,
    Unknown(u8),
}

impl From<u32> for SectionType {
    fn from(flags: u32) -> Self {
        match (flags & 0xFF) as u8 {
            0x00 => Self::Regular,
            0x01 => Self::ZeroFill,
            0x02 => Self::CStringLiterals,
            0x03 => Self::FourByteLiterals,
            0x04 => Self::EightByteLiterals,
            0x05 => Self::LiteralPointers,
            0x06 => Self::NonLazySymbolPointers,
            0x07 => Self::LazySymbolPointers,
            0x08 => Self::SymbolStubs,
            0x09 => Self::ModInitFuncPointers,
            0x0A => Self::ModTermFuncPointers,
            0x0B => Self::Coalesced,
            0x0C => Self::GbZeroFill,
            0x0D => Self::Interposing,
            0x0E => Self::SixteenByteLiterals,
            0x0F => Self::DtraceDof,
            0x10 => Self::LazyDylibSymbolPointers,
            0x11 => Self::ThreadLocalRegular,
            0x12 => Self::ThreadLocalZeroFill,
            0x13 => Self::ThreadLocalVariables,
            0x14 => Self::ThreadLocalVariablePointers,
            0x15 => Self::ThreadLocalInitFunctionPointers,
            0x16 => Self::InitFuncOffsets,
            other => Self::Unknown(other),
        }
    }
}

impl SectionType {
    /// Canonical `S_` constant name.
    pub fn name(&self) -> String {
        let name = match self {
            Self::Regular => "S_REGULAR",
            Self::ZeroFill => "S_ZEROFILL",
            Self::CStringLiterals => "S_CSTRING_LITERALS",
            Self::FourByteLiterals => "S_4BYTE_LITERALS",
            Self::EightByteLiterals => "S_8BYTE_LITERALS",
            Self::LiteralPointers => "S_LITERAL_POINTERS",
            Self::NonLazySymbolPointers => "S_NON_LAZY_SYMBOL_POINTERS",
            Self::LazySymbolPointers => "S_LAZY_SYMBOL_POINTERS",
            Self::SymbolStubs => "S_SYMBOL_STUBS",
            Self::ModInitFuncPointers => "S_MOD_INIT_FUNC_POINTERS",
            Self::ModTermFuncPointers => "S_MOD_TERM_FUNC_POINTERS",
            Self::Coalesced => "S_COALESCED",
            Self::GbZeroFill => "S_GB_ZEROFILL",
            Self::Interposing => "S_INTERPOSING",
            Self::SixteenByteLiterals => "S_16BYTE_LITERALS",
            Self::DtraceDof => "S_DTRACE_DOF",
            Self::LazyDylibSymbolPointers => "S_LAZY_DYLIB_SYMBOL_POINTERS",
            Self::ThreadLocalRegular => "S_THREAD_LOCAL_REGULAR",
            Self::ThreadLocalZeroFill => "S_THREAD_LOCAL_ZEROFILL",
            Self::ThreadLocalVariables => "S_THREAD_LOCAL_VARIABLES",
            Self::ThreadLocalVariablePointers => "S_THREAD_LOCAL_VARIABLE_POINTERS",
            Self::ThreadLocalInitFunctionPointers => "S_THREAD_LOCAL_INIT_FUNCTION_POINTERS",
            Self::InitFuncOffsets => "S_INIT_FUNC_OFFSETS",
            Self::Unknown(code) => return format!("Unknown section type ({})", hex_u64(u64::from(*code))),
        };
        name.to_string()
    }

    /// Whether the section occupies no file bytes.
    pub const fn is_zero_fill(&self) -> bool {
        matches!(self, Self::ZeroFill | Self::GbZeroFill | Self::ThreadLocalZeroFill)
    }
}

bitflags! {
    /// Section attribute bits, the high 24 bits of a section's `flags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct SectionAttributes: u32 {
        const PURE_INSTRUCTIONS = 0x8000_0000;
        const NO_TOC = 0x4000_0000;
        const STRIP_STATIC_SYMS = 0x2000_0000;
        const NO_DEAD_STRIP = 0x1000_0000;
        const LIVE_SUPPORT = 0x0800_0000;
        const SELF_MODIFYING_CODE = 0x0400_0000;
        const DEBUG = 0x0200_0000;
        const SOME_INSTRUCTIONS = 0x0000_0400;
        const EXT_RELOC = 0x0000_0200;
        const LOC_RELOC = 0x0000_0100;
    }
}

impl SectionAttributes {
    /// `S_ATTR_`-prefixed names of the set bits, or `"none"`.
    pub fn describe(&self) -> String {
        let names: Vec<String> = self.iter_names().map(|(name, _)| format!("S_ATTR_{name}")).collect();
        if names.is_empty() {
            "none".to_string()
        } else {
            names.join(" | ")
        }
    }
}

/// A `section` / `section_64` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionHeader {
    /// File offset of the header record itself.
    pub header_offset: u64,
    pub section_name: String,
    pub segment_name: String,
    pub addr: u64,
    pub size: u64,
    pub offset: u32,
    pub align: u32,
    pub reloff: u32,
    pub nreloc: u32,
    pub flags: u32,
    pub reserved1: u32,
    pub reserved2: u32,
    pub reserved3: Option<u32>,
    pub is_64_bit: bool,
}

impl SectionHeader {
    /// Record size: 68 or 80 bytes.
    pub const fn record_size(is_64_bit: bool) -> usize {
        if is_64_bit {
            80
        } else {
            68
        }
    }

    pub(crate) fn parse(shifter: &mut Shifter<'_>, is_64_bit: bool) -> Result<Self> {
        let header_offset = shifter.file_position() as u64;
        let section_name = shifter.shift_fixed_name(16)?;
        let segment_name = shifter.shift_fixed_name(16)?;
        let addr = shifter.shift_pointer(is_64_bit)?;
        let size = shifter.shift_pointer(is_64_bit)?;
        Ok(Self {
            header_offset,
            section_name,
            segment_name,
            addr,
            size,
            offset: shifter.shift_u32()?,
            align: shifter.shift_u32()?,
            reloff: shifter.shift_u32()?,
            nreloc: shifter.shift_u32()?,
            flags: shifter.shift_u32()?,
            reserved1: shifter.shift_u32()?,
            reserved2: shifter.shift_u32()?,
            reserved3: if is_64_bit { Some(shifter.shift_u32()?) } else { None },
            is_64_bit,
        })
    }

    /// Section type from `flags`.
    pub fn section_type(&self) -> SectionType {
        SectionType::from(self.flags)
    }

    /// Attribute bits from `flags`.
    pub fn attributes(&self) -> SectionAttributes {
        SectionAttributes::from_bits_truncate(self.flags & 0xFFFF_FF00)
    }

    /// `"__SEGMENT,__section"`.
    pub fn qualified_name(&self) -> String {
        format!("{},{}", self.segment_name, self.section_name)
    }

    /// Annotated header record.
    pub fn translation_group(&self) -> TranslationGroup {
        let pointer = TranslationKind::unsigned(if self.is_64_bit { 8 } else { 4 });
        let mut group = TranslationGroup::new(self.header_offset);
        group.add(TranslationKind::Utf8String(16), "Section Name", &self.section_name);
        group.add(TranslationKind::Utf8String(16), "Segment Name", &self.segment_name);
        group.add(pointer, "Virtual Address", hex_u64(self.addr));
        group.add(pointer, "Size", hex_u64(self.size));
        group.add(TranslationKind::UInt32, "File Offset", hex_u64(u64::from(self.offset)));
        group.add(TranslationKind::UInt32, "Alignment", format!("2^{}", self.align));
        group.add(
            TranslationKind::UInt32,
            "Relocation Entries Offset",
            hex_u64(u64::from(self.reloff)),
        );
        group.add(TranslationKind::UInt32, "Number of Relocation Entries", self.nreloc.to_string());
        group
            .add(TranslationKind::Flags(4), "Section Type", self.section_type().name())
            .with_secondary("Attributes", self.attributes().describe());
        group.add(TranslationKind::UInt32, "Reserved1", hex_u64(u64::from(self.reserved1)));
        group.add(TranslationKind::UInt32, "Reserved2", hex_u64(u64::from(self.reserved2)));
        if let Some(reserved3) = self.reserved3 {
            group.add(TranslationKind::UInt32, "Reserved3", hex_u64(u64::from(reserved3)));
        }
        group
    }
}

impl fmt::Display for SectionHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified_name())
    }
}

/// Which pointer-table flavor a symbol-pointer section is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolPointerKind {
    Lazy,
    NonLazy,
    LazyDylib,
}

/// How a section's bytes get decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStrategy {
    /// No file bytes; only a runtime size.
    ZeroFill,
    /// NUL-terminated UTF-8 strings, optionally demangled.
    CStrings { demangle: bool },
    /// NUL-terminated UTF-16LE strings.
    Utf16Strings,
    /// Pointers resolved against C-string sections.
    LiteralPointers,
    /// Pointers resolved through the indirect symbol table.
    SymbolPointers(SymbolPointerKind),
    /// Machine code.
    Instructions,
    /// Rows of raw bytes.
    RawRows,
    /// Table of 32-bit self-relative offsets.
    RelativeOffsets,
    /// Nothing known; one raw span.
    Unknown,
}

/// Pick the decoding strategy for a section.
///
/// Section type wins, then the pure-instructions attribute, then the
/// segment and section names.
pub fn select_strategy(section: &SectionHeader) -> SectionStrategy {
    let section_type = section.section_type();
    if section_type.is_zero_fill() {
        return SectionStrategy::ZeroFill;
    }
    match section_type {
        SectionType::CStringLiterals => return SectionStrategy::CStrings { demangle: true },
        SectionType::LiteralPointers => return SectionStrategy::LiteralPointers,
        SectionType::LazySymbolPointers => {
            return SectionStrategy::SymbolPointers(SymbolPointerKind::Lazy)
        }
        SectionType::NonLazySymbolPointers => {
            return SectionStrategy::SymbolPointers(SymbolPointerKind::NonLazy)
        }
        SectionType::LazyDylibSymbolPointers => {
            return SectionStrategy::SymbolPointers(SymbolPointerKind::LazyDylib)
        }
        _ => {}
    }
    if section.attributes().contains(SectionAttributes::PURE_INSTRUCTIONS) {
        return SectionStrategy::Instructions;
    }
    match (section.segment_name.as_str(), section.section_name.as_str()) {
        ("__TEXT", "__const") => SectionStrategy::RawRows,
        ("__TEXT", "__ustring") => SectionStrategy::Utf16Strings,
        ("__TEXT", "__swift5_reflstr") => SectionStrategy::CStrings { demangle: false },
        ("__TEXT", "__swift5_protos" | "__swift5_proto") => SectionStrategy::RelativeOffsets,
        _ => SectionStrategy::Unknown,
    }
}
