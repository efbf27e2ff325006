//! Mach header: magic, CPU, file type and flags.

use std::fmt;

use bitflags::bitflags;
use serde::Serialize;
use tracing::debug;

use crate::bytes::{hex_u64, ByteView};
use crate::capabilities::Arch;
use crate::error::{MachoError, Result};
use crate::translation::{TranslationGroup, TranslationKind};

/// `MH_MAGIC` as stored little-endian.
pub const MH_MAGIC: u32 = 0xFEED_FACE;
/// `MH_MAGIC_64` as stored little-endian.
pub const MH_MAGIC_64: u32 = 0xFEED_FACF;

/// Mach-O CPU type constants.
pub mod cpu_type {
    pub const VAX: u32 = 1;
    pub const MC680X0: u32 = 6;
    pub const X86: u32 = 7;
    pub const X86_64: u32 = 0x0100_0007;
    pub const MC98000: u32 = 10;
    pub const HPPA: u32 = 11;
    pub const ARM: u32 = 12;
    pub const ARM64: u32 = 0x0100_000C;
    pub const ARM64_32: u32 = 0x0200_000C;
    pub const MC88000: u32 = 13;
    pub const SPARC: u32 = 14;
    pub const I860: u32 = 15;
    pub const POWERPC: u32 = 18;
    pub const POWERPC64: u32 = 0x0100_0012;
}

/// Mach-O ARM subtypes.
pub mod arm_subtype {
    pub const ALL: u32 = 0;
    pub const V4T: u32 = 5;
    pub const V6: u32 = 6;
    pub const V5TEJ: u32 = 7;
    pub const XSCALE: u32 = 8;
    pub const V7: u32 = 9;
    pub const V7F: u32 = 10;
    pub const V7S: u32 = 11;
    pub const V7K: u32 = 12;
    pub const V8: u32 = 13;
    pub const V6M: u32 = 14;
    pub const V7M: u32 = 15;
    pub const V7EM: u32 = 16;
}

/// Mach-O ARM64 subtypes.
pub mod arm64_subtype {
    pub const ALL: u32 = 0;
    pub const V8: u32 = 1;
    /// ARMv8.3+ with pointer authentication
    pub const E: u32 = 2;
}

/// Mach-O x86 subtypes.
pub mod x86_subtype {
    pub const ALL: u32 = 3;
    pub const I486: u32 = 4;
    pub const PENT: u32 = 5;
    pub const PENTPRO: u32 = 0x16;
    pub const PENTIUM_M: u32 = 9;
    pub const PENTIUM_4: u32 = 0x0A;
}

/// Mach-O x86_64 subtypes.
pub mod x86_64_subtype {
    pub const ALL: u32 = 3;
    pub const H: u32 = 8;
}

/// Human-readable name of a CPU type.
pub fn cpu_type_name(cpu_type: u32) -> String {
    let name = match cpu_type {
        cpu_type::VAX => "VAX",
        cpu_type::MC680X0 => "MC680x0",
        cpu_type::X86 => "x86",
        cpu_type::X86_64 => "x86_64",
        cpu_type::MC98000 => "MC98000",
        cpu_type::HPPA => "HPPA",
        cpu_type::ARM => "arm",
        cpu_type::ARM64 => "arm64",
        cpu_type::ARM64_32 => "arm64_32",
        cpu_type::MC88000 => "MC88000",
        cpu_type::SPARC => "SPARC",
        cpu_type::I860 => "i860",
        cpu_type::POWERPC => "PowerPC",
        cpu_type::POWERPC64 => "PowerPC64",
        other => return format!("Unknown CPU type ({})", hex_u64(u64::from(other))),
    };
    name.to_string()
}

/// Human-readable name of a CPU subtype, in the context of its CPU type.
pub fn cpu_subtype_name(cpu_type: u32, cpu_subtype: u32) -> String {
    // High byte carries capability bits (CPU_SUBTYPE_LIB64, PAC ABI version).
    let subtype = cpu_subtype & 0x00FF_FFFF;
    let name = match (cpu_type, subtype) {
        (cpu_type::X86 | cpu_type::X86_64, x86_subtype::ALL) => "CPU_SUBTYPE_X86_ALL",
        (cpu_type::X86, x86_subtype::I486) => "CPU_SUBTYPE_486",
        (cpu_type::X86, x86_subtype::PENT) => "CPU_SUBTYPE_PENT",
        (cpu_type::X86, x86_subtype::PENTPRO) => "CPU_SUBTYPE_PENTPRO",
        (cpu_type::X86, x86_subtype::PENTIUM_M) => "CPU_SUBTYPE_PENTIUM_M",
        (cpu_type::X86, x86_subtype::PENTIUM_4) => "CPU_SUBTYPE_PENTIUM_4",
        (cpu_type::X86_64, x86_64_subtype::H) => "CPU_SUBTYPE_X86_64_H",
        (cpu_type::ARM, arm_subtype::ALL) => "CPU_SUBTYPE_ARM_ALL",
        (cpu_type::ARM, arm_subtype::V4T) => "CPU_SUBTYPE_ARM_V4T",
        (cpu_type::ARM, arm_subtype::V6) => "CPU_SUBTYPE_ARM_V6",
        (cpu_type::ARM, arm_subtype::V5TEJ) => "CPU_SUBTYPE_ARM_V5TEJ",
        (cpu_type::ARM, arm_subtype::XSCALE) => "CPU_SUBTYPE_ARM_XSCALE",
        (cpu_type::ARM, arm_subtype::V7) => "CPU_SUBTYPE_ARM_V7",
        (cpu_type::ARM, arm_subtype::V7F) => "CPU_SUBTYPE_ARM_V7F",
        (cpu_type::ARM, arm_subtype::V7S) => "CPU_SUBTYPE_ARM_V7S",
        (cpu_type::ARM, arm_subtype::V7K) => "CPU_SUBTYPE_ARM_V7K",
        (cpu_type::ARM, arm_subtype::V8) => "CPU_SUBTYPE_ARM_V8",
        (cpu_type::ARM, arm_subtype::V6M) => "CPU_SUBTYPE_ARM_V6M",
        (cpu_type::ARM, arm_subtype::V7M) => "CPU_SUBTYPE_ARM_V7M",
        (cpu_type::ARM, arm_subtype::V7EM) => "CPU_SUBTYPE_ARM_V7EM",
        (cpu_type::ARM64, arm64_subtype::ALL) => "CPU_SUBTYPE_ARM64_ALL",
        (cpu_type::ARM64, arm64_subtype::V8) => "CPU_SUBTYPE_ARM64_V8",
        (cpu_type::ARM64, arm64_subtype::E) => "CPU_SUBTYPE_ARM64E",
        (cpu_type::ARM64_32, arm64_subtype::V8) => "CPU_SUBTYPE_ARM64_32_V8",
        _ => return format!("Unknown subtype ({})", hex_u64(u64::from(cpu_subtype))),
    };
    name.to_string()
}

/// Disassembly architecture for a CPU type, if one exists.
pub fn arch_for_cpu(cpu_type: u32) -> Option<Arch> {
    match cpu_type {
        cpu_type::X86 => Some(Arch::X86),
        cpu_type::X86_64 => Some(Arch::X86_64),
        cpu_type::ARM => Some(Arch::Arm),
        cpu_type::ARM64 | cpu_type::ARM64_32 => Some(Arch::Arm64),
        _ => None,
    }
}

/// `filetype` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Object,
    Execute,
    Dylib,
    Unknown(u32),
}

impl From<u32> for FileType {
    fn from(value: u32) -> Self {
        match value {
            0x1 => Self::Object,
            0x2 => Self::Execute,
            0x6 => Self::Dylib,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Object => write!(f, "Relocatable object file (MH_OBJECT)"),
            Self::Execute => write!(f, "Demand paged executable file (MH_EXECUTE)"),
            Self::Dylib => write!(f, "Dynamically bound shared library (MH_DYLIB)"),
            Self::Unknown(value) => write!(f, "Unknown file type ({value})"),
        }
    }
}

bitflags! {
    /// Mach header `flags` bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct HeaderFlags: u32 {
        const NOUNDEFS = 0x1;
        const INCRLINK = 0x2;
        const DYLDLINK = 0x4;
        const BINDATLOAD = 0x8;
        const PREBOUND = 0x10;
        const SPLIT_SEGS = 0x20;
        const LAZY_INIT = 0x40;
        const TWOLEVEL = 0x80;
        const FORCE_FLAT = 0x100;
        const NOMULTIDEFS = 0x200;
        const NOFIXPREBINDING = 0x400;
        const PREBINDABLE = 0x800;
        const ALLMODSBOUND = 0x1000;
        const SUBSECTIONS_VIA_SYMBOLS = 0x2000;
        const CANONICAL = 0x4000;
        const WEAK_DEFINES = 0x8000;
        const BINDS_TO_WEAK = 0x1_0000;
        const ALLOW_STACK_EXECUTION = 0x2_0000;
        const ROOT_SAFE = 0x4_0000;
        const SETUID_SAFE = 0x8_0000;
        const NO_REEXPORTED_DYLIBS = 0x10_0000;
        const PIE = 0x20_0000;
        const DEAD_STRIPPABLE_DYLIB = 0x40_0000;
        const HAS_TLV_DESCRIPTORS = 0x80_0000;
        const NO_HEAP_EXECUTION = 0x100_0000;
    }
}

impl HeaderFlags {
    /// `MH_`-prefixed names of the set bits, or `"none"`.
    pub fn describe(&self) -> String {
        let mut names: Vec<String> = self.iter_names().map(|(name, _)| format!("MH_{name}")).collect();
        let unknown = self.bits() & !Self::all().bits();
        if unknown != 0 {
            names.push(hex_u64(u64::from(unknown)));
        }
        if names.is_empty() {
            "none".to_string()
        } else {
            names.join(" | ")
        }
    }
}

/// Decoded Mach header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Header {
    pub magic: u32,
    pub is_64_bit: bool,
    pub cpu_type: u32,
    pub cpu_subtype: u32,
    pub file_type: FileType,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: HeaderFlags,
    pub reserved: Option<u32>,
}

impl Header {
    /// Header size in bytes: 28 or 32.
    pub const fn size(is_64_bit: bool) -> usize {
        if is_64_bit {
            32
        } else {
            28
        }
    }

    /// Decode the header at the start of `file`.
    pub fn parse(file: &ByteView) -> Result<Self> {
        let magic = file.u32_at(0)?;
        let is_64_bit = match magic {
            MH_MAGIC => false,
            MH_MAGIC_64 => true,
            _ => {
                let shown = file.slice(0, 4.min(file.len()))?;
                return Err(MachoError::InvalidMagic {
                    actual: hex::encode_upper(shown.as_slice()),
                });
            }
        };
        let view = file.slice(0, Self::size(is_64_bit))?;
        let mut shifter = view.shifter();
        shifter.skip(4)?;
        let header = Self {
            magic,
            is_64_bit,
            cpu_type: shifter.shift_u32()?,
            cpu_subtype: shifter.shift_u32()?,
            file_type: FileType::from(shifter.shift_u32()?),
            ncmds: shifter.shift_u32()?,
            sizeofcmds: shifter.shift_u32()?,
            flags: HeaderFlags::from_bits_retain(shifter.shift_u32()?),
            reserved: if is_64_bit { Some(shifter.shift_u32()?) } else { None },
        };
        debug!(
            cpu = %cpu_type_name(header.cpu_type),
            ncmds = header.ncmds,
            is_64_bit,
            "parsed mach header"
        );
        Ok(header)
    }

    /// Architecture to disassemble with, if the CPU has one.
    pub fn arch(&self) -> Option<Arch> {
        arch_for_cpu(self.cpu_type)
    }

    /// Annotated header fields, anchored at offset 0.
    pub fn translation_group(&self) -> TranslationGroup {
        let mut group = TranslationGroup::new(0);
        group.add(
            TranslationKind::RawBytes(4),
            "Magic",
            hex::encode_upper(self.magic.to_le_bytes()),
        );
        group.add(TranslationKind::Enum32, "CPU Type", cpu_type_name(self.cpu_type));
        group.add(
            TranslationKind::Enum32,
            "CPU Subtype",
            cpu_subtype_name(self.cpu_type, self.cpu_subtype),
        );
        group.add(TranslationKind::Enum32, "File Type", self.file_type.to_string());
        group.add(TranslationKind::UInt32, "Number of Load Commands", self.ncmds.to_string());
        group.add(
            TranslationKind::UInt32,
            "Size of Load Commands",
            hex_u64(u64::from(self.sizeofcmds)),
        );
        group.add(TranslationKind::Flags(4), "Flags", self.flags.describe());
        if let Some(reserved) = self.reserved {
            group.add(TranslationKind::UInt32, "Reserved", hex_u64(u64::from(reserved)));
        }
        group
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn header_bytes(magic: u32, cpu: u32, subtype: u32, flags: u32) -> ByteView {
        let mut data = Vec::new();
        for word in [magic, cpu, subtype, 2, 0, 0, flags, 0] {
            data.extend_from_slice(&word.to_le_bytes());
        }
        ByteView::new(Arc::from(data))
    }

    #[test]
    fn test_parse_x86_64_header() {
        let view = header_bytes(MH_MAGIC_64, cpu_type::X86_64, x86_64_subtype::ALL, 0x0020_0085);
        let header = Header::parse(&view).unwrap();
        assert!(header.is_64_bit);
        assert_eq!(header.file_type, FileType::Execute);
        assert_eq!(header.arch(), Some(Arch::X86_64));
        assert_eq!(header.flags.describe(), "MH_NOUNDEFS | MH_DYLDLINK | MH_TWOLEVEL | MH_PIE");
        let group = header.translation_group();
        assert_eq!(group.range().len, 32);
        assert_eq!(group.translations()[0].value, "CFFAEDFE");
        assert_eq!(group.translations()[1].value, "x86_64");
    }

    #[test]
    fn test_parse_32_bit_header_has_no_reserved() {
        let view = header_bytes(MH_MAGIC, cpu_type::ARM, arm_subtype::V7, 0);
        let header = Header::parse(&view).unwrap();
        assert!(!header.is_64_bit);
        assert_eq!(header.reserved, None);
        assert_eq!(header.translation_group().range().len, 28);
        assert_eq!(cpu_subtype_name(header.cpu_type, header.cpu_subtype), "CPU_SUBTYPE_ARM_V7");
        assert_eq!(header.flags.describe(), "none");
    }

    #[test]
    fn test_bad_magic() {
        let view = header_bytes(0xCAFE_BABE, 0, 0, 0);
        match Header::parse(&view) {
            Err(MachoError::InvalidMagic { actual }) => assert_eq!(actual, "BEBAFECA"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_arm64e_subtype_ignores_capability_bits() {
        assert_eq!(
            cpu_subtype_name(cpu_type::ARM64, 0x8000_0002),
            "CPU_SUBTYPE_ARM64E"
        );
        assert!(cpu_type_name(0x99).starts_with("Unknown"));
        assert_eq!(arch_for_cpu(cpu_type::POWERPC), None);
    }

    #[test]
    fn test_file_types() {
        assert_eq!(FileType::from(1), FileType::Object);
        assert_eq!(FileType::from(6), FileType::Dylib);
        assert_eq!(FileType::from(8), FileType::Unknown(8));
    }
}
