//! Load-command table walk and per-command rendering.
//!
//! The walk runs exactly once per file. Every command is read from its
//! 8-byte `cmd`/`cmdsize` prefix and the cursor always advances by
//! `cmdsize`, whether or not the command is understood. Cross-referenced
//! structures (section headers, symbol and string table locations, dyld
//! info, `__LINKEDIT` blobs) are returned in [`LoadCommandContext`] rather
//! than stashed anywhere global.

use serde::Serialize;
use tracing::{debug, warn};

use crate::bytes::{hex_u64, utf8_until_nul, ByteView, Shifter};
use crate::error::{MachoError, Result};
use crate::macho::header::Header;
use crate::macho::section::SectionHeader;
use crate::translation::{version32, version64, TranslationGroup, TranslationKind};

/// Load-command type codes.
#[allow(missing_docs)]
pub mod lc {
    pub const REQ_DYLD: u32 = 0x8000_0000;

    pub const SEGMENT: u32 = 0x1;
    pub const SYMTAB: u32 = 0x2;
    pub const SYMSEG: u32 = 0x3;
    pub const THREAD: u32 = 0x4;
    pub const UNIXTHREAD: u32 = 0x5;
    pub const LOADFVMLIB: u32 = 0x6;
    pub const IDFVMLIB: u32 = 0x7;
    pub const IDENT: u32 = 0x8;
    pub const FVMFILE: u32 = 0x9;
    pub const PREPAGE: u32 = 0xA;
    pub const DYSYMTAB: u32 = 0xB;
    pub const LOAD_DYLIB: u32 = 0xC;
    pub const ID_DYLIB: u32 = 0xD;
    pub const LOAD_DYLINKER: u32 = 0xE;
    pub const ID_DYLINKER: u32 = 0xF;
    pub const PREBOUND_DYLIB: u32 = 0x10;
    pub const ROUTINES: u32 = 0x11;
    pub const SUB_FRAMEWORK: u32 = 0x12;
    pub const SUB_UMBRELLA: u32 = 0x13;
    pub const SUB_CLIENT: u32 = 0x14;
    pub const SUB_LIBRARY: u32 = 0x15;
    pub const TWOLEVEL_HINTS: u32 = 0x16;
    pub const PREBIND_CKSUM: u32 = 0x17;
    pub const LOAD_WEAK_DYLIB: u32 = 0x18 | REQ_DYLD;
    pub const SEGMENT_64: u32 = 0x19;
    pub const ROUTINES_64: u32 = 0x1A;
    pub const UUID: u32 = 0x1B;
    pub const RPATH: u32 = 0x1C | REQ_DYLD;
    pub const CODE_SIGNATURE: u32 = 0x1D;
    pub const SEGMENT_SPLIT_INFO: u32 = 0x1E;
    pub const REEXPORT_DYLIB: u32 = 0x1F | REQ_DYLD;
    pub const LAZY_LOAD_DYLIB: u32 = 0x20;
    pub const ENCRYPTION_INFO: u32 = 0x21;
    pub const DYLD_INFO: u32 = 0x22;
    pub const DYLD_INFO_ONLY: u32 = 0x22 | REQ_DYLD;
    pub const LOAD_UPWARD_DYLIB: u32 = 0x23 | REQ_DYLD;
    pub const VERSION_MIN_MACOSX: u32 = 0x24;
    pub const VERSION_MIN_IPHONEOS: u32 = 0x25;
    pub const FUNCTION_STARTS: u32 = 0x26;
    pub const DYLD_ENVIRONMENT: u32 = 0x27;
    pub const MAIN: u32 = 0x28 | REQ_DYLD;
    pub const DATA_IN_CODE: u32 = 0x29;
    pub const SOURCE_VERSION: u32 = 0x2A;
    pub const DYLIB_CODE_SIGN_DRS: u32 = 0x2B;
    pub const ENCRYPTION_INFO_64: u32 = 0x2C;
    pub const LINKER_OPTION: u32 = 0x2D;
    pub const LINKER_OPTIMIZATION_HINT: u32 = 0x2E;
    pub const VERSION_MIN_TVOS: u32 = 0x2F;
    pub const VERSION_MIN_WATCHOS: u32 = 0x30;
    pub const NOTE: u32 = 0x31;
    pub const BUILD_VERSION: u32 = 0x32;
    pub const DYLD_EXPORTS_TRIE: u32 = 0x33 | REQ_DYLD;
    pub const DYLD_CHAINED_FIXUPS: u32 = 0x34 | REQ_DYLD;
    pub const FILESET_ENTRY: u32 = 0x35 | REQ_DYLD;
}

/// Canonical `LC_` name of a command code.
pub fn command_name(cmd: u32) -> Option<&'static str> {
    let name = match cmd {
        lc::SEGMENT => "LC_SEGMENT",
        lc::SYMTAB => "LC_SYMTAB",
        lc::SYMSEG => "LC_SYMSEG",
        lc::THREAD => "LC_THREAD",
        lc::UNIXTHREAD => "LC_UNIXTHREAD",
        lc::LOADFVMLIB => "LC_LOADFVMLIB",
        lc::IDFVMLIB => "LC_IDFVMLIB",
        lc::IDENT => "LC_IDENT",
        lc::FVMFILE => "LC_FVMFILE",
        lc::PREPAGE => "LC_PREPAGE",
        lc::DYSYMTAB => "LC_DYSYMTAB",
        lc::LOAD_DYLIB => "LC_LOAD_DYLIB",
        lc::ID_DYLIB => "LC_ID_DYLIB",
        lc::LOAD_DYLINKER => "LC_LOAD_DYLINKER",
        lc::ID_DYLINKER => "LC_ID_DYLINKER",
        lc::PREBOUND_DYLIB => "LC_PREBOUND_DYLIB",
        lc::ROUTINES => "LC_ROUTINES",
        lc::SUB_FRAMEWORK => "LC_SUB_FRAMEWORK",
        lc::SUB_UMBRELLA => "LC_SUB_UMBRELLA",
        lc::SUB_CLIENT => "LC_SUB_CLIENT",
        lc::SUB_LIBRARY => "LC_SUB_LIBRARY",
        lc::TWOLEVEL_HINTS => "LC_TWOLEVEL_HINTS",
        lc::PREBIND_CKSUM => "LC_PREBIND_CKSUM",
        lc::LOAD_WEAK_DYLIB => "LC_LOAD_WEAK_DYLIB",
        lc::SEGMENT_64 => "LC_SEGMENT_64",
        lc::ROUTINES_64 => "LC_ROUTINES_64",
        lc::UUID => "LC_UUID",
        lc::RPATH => "LC_RPATH",
        lc::CODE_SIGNATURE => "LC_CODE_SIGNATURE",
        lc::SEGMENT_SPLIT_INFO => "LC_SEGMENT_SPLIT_INFO",
        lc::REEXPORT_DYLIB => "LC_REEXPORT_DYLIB",
        lc::LAZY_LOAD_DYLIB => "LC_LAZY_LOAD_DYLIB",
        lc::ENCRYPTION_INFO => "LC_ENCRYPTION_INFO",
        lc::DYLD_INFO => "LC_DYLD_INFO",
        lc::DYLD_INFO_ONLY => "LC_DYLD_INFO_ONLY",
        lc::LOAD_UPWARD_DYLIB => "LC_LOAD_UPWARD_DYLIB",
        lc::VERSION_MIN_MACOSX => "LC_VERSION_MIN_MACOSX",
        lc::VERSION_MIN_IPHONEOS => "LC_VERSION_MIN_IPHONEOS",
        lc::FUNCTION_STARTS => "LC_FUNCTION_STARTS",
        lc::DYLD_ENVIRONMENT => "LC_DYLD_ENVIRONMENT",
        lc::MAIN => "LC_MAIN",
        lc::DATA_IN_CODE => "LC_DATA_IN_CODE",
        lc::SOURCE_VERSION => "LC_SOURCE_VERSION",
        lc::DYLIB_CODE_SIGN_DRS => "LC_DYLIB_CODE_SIGN_DRS",
        lc::ENCRYPTION_INFO_64 => "LC_ENCRYPTION_INFO_64",
        lc::LINKER_OPTION => "LC_LINKER_OPTION",
        lc::LINKER_OPTIMIZATION_HINT => "LC_LINKER_OPTIMIZATION_HINT",
        lc::VERSION_MIN_TVOS => "LC_VERSION_MIN_TVOS",
        lc::VERSION_MIN_WATCHOS => "LC_VERSION_MIN_WATCHOS",
        lc::NOTE => "LC_NOTE",
        lc::BUILD_VERSION => "LC_BUILD_VERSION",
        lc::DYLD_EXPORTS_TRIE => "LC_DYLD_EXPORTS_TRIE",
        lc::DYLD_CHAINED_FIXUPS => "LC_DYLD_CHAINED_FIXUPS",
        lc::FILESET_ENTRY => "LC_FILESET_ENTRY",
        _ => return None,
    };
    Some(name)
}

/// `segment_command` / `segment_command_64` with its section headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub name: String,
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
    pub maxprot: u32,
    pub initprot: u32,
    pub nsects: u32,
    pub flags: u32,
    pub sections: Vec<SectionHeader>,
}

/// `symtab_command`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SymtabCommand {
    pub symoff: u32,
    pub nsyms: u32,
    pub stroff: u32,
    pub strsize: u32,
}

/// `dysymtab_command`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DysymtabCommand {
    pub ilocalsym: u32,
    pub nlocalsym: u32,
    pub iextdefsym: u32,
    pub nextdefsym: u32,
    pub iundefsym: u32,
    pub nundefsym: u32,
    pub tocoff: u32,
    pub ntoc: u32,
    pub modtaboff: u32,
    pub nmodtab: u32,
    pub extrefsymoff: u32,
    pub nextrefsyms: u32,
    pub indirectsymoff: u32,
    pub nindirectsyms: u32,
    pub extreloff: u32,
    pub nextrel: u32,
    pub locreloff: u32,
    pub nlocrel: u32,
}

impl DysymtabCommand {
    fn parse(shifter: &mut Shifter<'_>) -> Result<Self> {
        let mut words = [0u32; 18];
        for word in &mut words {
            *word = shifter.shift_u32()?;
        }
        let [ilocalsym, nlocalsym, iextdefsym, nextdefsym, iundefsym, nundefsym, tocoff, ntoc, modtaboff, nmodtab, extrefsymoff, nextrefsyms, indirectsymoff, nindirectsyms, extreloff, nextrel, locreloff, nlocrel] =
            words;
        Ok(Self {
            ilocalsym,
            nlocalsym,
            iextdefsym,
            nextdefsym,
            iundefsym,
            nundefsym,
            tocoff,
            ntoc,
            modtaboff,
            nmodtab,
            extrefsymoff,
            nextrefsyms,
            indirectsymoff,
            nindirectsyms,
            extreloff,
            nextrel,
            locreloff,
            nlocrel,
        })
    }

    fn labeled(&self) -> [(&'static str, u32, bool); 18] {
        [
            ("Start Index of Local Symbols", self.ilocalsym, false),
            ("Number of Local Symbols", self.nlocalsym, false),
            ("Start Index of External Defined Symbols", self.iextdefsym, false),
            ("Number of External Defined Symbols", self.nextdefsym, false),
            ("Start Index of Undefined Symbols", self.iundefsym, false),
            ("Number of Undefined Symbols", self.nundefsym, false),
            ("File Offset of TOC", self.tocoff, true),
            ("Number of TOC Entries", self.ntoc, false),
            ("File Offset of Module Table", self.modtaboff, true),
            ("Number of Module Table Entries", self.nmodtab, false),
            ("File Offset of External Reference Table", self.extrefsymoff, true),
            ("Number of External Reference Entries", self.nextrefsyms, false),
            ("File Offset of Indirect Symbol Table", self.indirectsymoff, true),
            ("Number of Indirect Symbols", self.nindirectsyms, false),
            ("File Offset of External Relocations", self.extreloff, true),
            ("Number of External Relocations", self.nextrel, false),
            ("File Offset of Local Relocations", self.locreloff, true),
            ("Number of Local Relocations", self.nlocrel, false),
        ]
    }
}

/// `dyld_info_command`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DyldInfoCommand {
    pub rebase_off: u32,
    pub rebase_size: u32,
    pub bind_off: u32,
    pub bind_size: u32,
    pub weak_bind_off: u32,
    pub weak_bind_size: u32,
    pub lazy_bind_off: u32,
    pub lazy_bind_size: u32,
    pub export_off: u32,
    pub export_size: u32,
}

/// `linkedit_data_command`: an (offset, size) into `__LINKEDIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkeditDataCommand {
    pub cmd: u32,
    pub dataoff: u32,
    pub datasize: u32,
}

/// `dylib_command`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DylibCommand {
    pub name_offset: u32,
    pub timestamp: u32,
    pub current_version: u32,
    pub compatibility_version: u32,
    pub name: String,
}

/// One build tool entry of `LC_BUILD_VERSION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BuildTool {
    pub tool: u32,
    pub version: u32,
}

/// One NUL-terminated string of `LC_LINKER_OPTION`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkerOptionString {
    pub value: String,
    /// Bytes in the file, terminator included.
    pub size: usize,
}

/// The typed payload of a load command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoadCommandBody {
    Segment(Segment),
    SymbolTable(SymtabCommand),
    DynamicSymbolTable(DysymtabCommand),
    DyldInfo(DyldInfoCommand),
    LinkeditData(LinkeditDataCommand),
    Dylib(DylibCommand),
    /// A command whose payload is one path-like string (rpath, dylinker, environment).
    MonoString { string_offset: u32, value: String },
    Main { entry_offset: u64, stack_size: u64 },
    Uuid { uuid: [u8; 16] },
    SourceVersion { version: u64 },
    MinOsVersion { version: u32, sdk: u32 },
    BuildVersion { platform: u32, minos: u32, sdk: u32, tools: Vec<BuildTool> },
    EncryptionInfo { cryptoff: u32, cryptsize: u32, cryptid: u32, pad: Option<u32> },
    LinkerOption { count: u32, strings: Vec<LinkerOptionString> },
    Unknown { cmd: u32 },
}

/// One entry of the load-command table.
#[derive(Debug, Clone)]
pub struct LoadCommand {
    pub index: usize,
    pub cmd: u32,
    pub cmdsize: u32,
    pub body: LoadCommandBody,
    view: ByteView,
    is_64_bit: bool,
}

impl LoadCommand {
    /// `LC_` name, or a generic label for unknown codes.
    pub fn name(&self) -> String {
        command_name(self.cmd).map_or_else(
            || format!("Unknown Load Command ({})", hex_u64(u64::from(self.cmd))),
            str::to_string,
        )
    }

    /// Short description for list views.
    pub fn subtitle(&self) -> Option<String> {
        match &self.body {
            LoadCommandBody::Segment(segment) => Some(segment.name.clone()),
            LoadCommandBody::Dylib(dylib) => Some(dylib.name.clone()),
            LoadCommandBody::MonoString { value, .. } => Some(value.clone()),
            LoadCommandBody::Uuid { uuid } => Some(format_uuid(uuid)),
            _ => None,
        }
    }

    /// The command's bytes.
    pub fn view(&self) -> &ByteView {
        &self.view
    }

    /// Annotated command fields. Segment commands yield one extra group per section header.
    pub fn translation_groups(&self) -> Vec<TranslationGroup> {
        let mut group = TranslationGroup::new(self.view.file_offset() as u64);
        group.add(TranslationKind::Enum32, "Load Command Type", self.name());
        group.add(TranslationKind::UInt32, "Load Command Size", hex_u64(u64::from(self.cmdsize)));
        let pointer = TranslationKind::unsigned(if self.is_64_bit { 8 } else { 4 });
        let mut groups = Vec::new();
        match &self.body {
            LoadCommandBody::Segment(segment) => {
                group.add(TranslationKind::Utf8String(16), "Segment Name", &segment.name);
                group.add(pointer, "Virtual Memory Address", hex_u64(segment.vmaddr));
                group.add(pointer, "Virtual Memory Size", hex_u64(segment.vmsize));
                group.add(pointer, "File Offset", hex_u64(segment.fileoff));
                group.add(pointer, "File Size", hex_u64(segment.filesize));
                group.add(TranslationKind::Enum32, "Maximum VM Protection", protection(segment.maxprot));
                group.add(TranslationKind::Enum32, "Initial VM Protection", protection(segment.initprot));
                group.add(TranslationKind::UInt32, "Number of Sections", segment.nsects.to_string());
                group.add(TranslationKind::Flags(4), "Flags", hex_u64(u64::from(segment.flags)));
                groups.push(group);
                groups.extend(segment.sections.iter().map(SectionHeader::translation_group));
                return groups;
            }
            LoadCommandBody::SymbolTable(symtab) => {
                group.add(TranslationKind::UInt32, "Symbol Table Offset", hex_u64(u64::from(symtab.symoff)));
                group.add(TranslationKind::UInt32, "Number of Symbol Table Entries", symtab.nsyms.to_string());
                group.add(TranslationKind::UInt32, "String Table Offset", hex_u64(u64::from(symtab.stroff)));
                group.add(TranslationKind::UInt32, "Size of String Table", hex_u64(u64::from(symtab.strsize)));
            }
            LoadCommandBody::DynamicSymbolTable(dysymtab) => {
                for (label, value, is_offset) in dysymtab.labeled() {
                    let shown = if is_offset { hex_u64(u64::from(value)) } else { value.to_string() };
                    group.add(TranslationKind::UInt32, label, shown);
                }
            }
            LoadCommandBody::DyldInfo(info) => {
                let pairs = [
                    ("Rebase", info.rebase_off, info.rebase_size),
                    ("Binding", info.bind_off, info.bind_size),
                    ("Weak Binding", info.weak_bind_off, info.weak_bind_size),
                    ("Lazy Binding", info.lazy_bind_off, info.lazy_bind_size),
                    ("Export", info.export_off, info.export_size),
                ];
                for (name, offset, size) in pairs {
                    group.add(TranslationKind::UInt32, format!("{name} Info File Offset"), hex_u64(u64::from(offset)));
                    group.add(TranslationKind::UInt32, format!("{name} Info Size"), hex_u64(u64::from(size)));
                }
            }
            LoadCommandBody::LinkeditData(data) => {
                group.add(TranslationKind::UInt32, "File Offset", hex_u64(u64::from(data.dataoff)));
                group.add(TranslationKind::UInt32, "Size", hex_u64(u64::from(data.datasize)));
            }
            LoadCommandBody::Dylib(dylib) => {
                group.add(TranslationKind::UInt32, "Path Offset", hex_u64(u64::from(dylib.name_offset)));
                group.add(TranslationKind::UInt32, "Build Timestamp", dylib.timestamp.to_string());
                group.add(TranslationKind::Version32, "Current Version", version32(dylib.current_version));
                group.add(
                    TranslationKind::Version32,
                    "Compatibility Version",
                    version32(dylib.compatibility_version),
                );
                self.add_trailing_string(&mut group, dylib.name_offset, "Path");
            }
            LoadCommandBody::MonoString { string_offset, .. } => {
                group.add(TranslationKind::UInt32, "String Offset", hex_u64(u64::from(*string_offset)));
                self.add_trailing_string(&mut group, *string_offset, "Content");
            }
            LoadCommandBody::Main { entry_offset, stack_size } => {
                group.add(TranslationKind::UInt64, "Entry Offset", hex_u64(*entry_offset));
                group.add(TranslationKind::UInt64, "Stack Size", hex_u64(*stack_size));
            }
            LoadCommandBody::Uuid { uuid } => {
                group.add(TranslationKind::RawBytes(16), "UUID", format_uuid(uuid));
            }
            LoadCommandBody::SourceVersion { version } => {
                group.add(TranslationKind::Version64, "Source Version", version64(*version));
            }
            LoadCommandBody::MinOsVersion { version, sdk } => {
                group.add(TranslationKind::Version32, "Minimum OS Version", version32(*version));
                group.add(TranslationKind::Version32, "SDK Version", version32(*sdk));
            }
            LoadCommandBody::BuildVersion { platform, minos, sdk, tools } => {
                group.add(TranslationKind::Enum32, "Platform", platform_name(*platform));
                group.add(TranslationKind::Version32, "Minimum OS Version", version32(*minos));
                group.add(TranslationKind::Version32, "SDK Version", version32(*sdk));
                group.add(TranslationKind::UInt32, "Number of Tools", tools.len().to_string());
                for tool in tools {
                    group.add(TranslationKind::Enum32, "Tool", tool_name(tool.tool));
                    group.add(TranslationKind::Version32, "Tool Version", version32(tool.version));
                }
            }
            LoadCommandBody::EncryptionInfo { cryptoff, cryptsize, cryptid, pad } => {
                group.add(TranslationKind::UInt32, "Encrypted Range Offset", hex_u64(u64::from(*cryptoff)));
                group.add(TranslationKind::UInt32, "Encrypted Range Size", hex_u64(u64::from(*cryptsize)));
                group.add(TranslationKind::UInt32, "Encryption System", cryptid.to_string());
                if let Some(pad) = pad {
                    group.add(TranslationKind::UInt32, "Padding", hex_u64(u64::from(*pad)));
                }
            }
            LoadCommandBody::LinkerOption { count, strings } => {
                group.add(TranslationKind::UInt32, "Number of Strings", count.to_string());
                for option in strings {
                    group.add(TranslationKind::Utf8String(option.size), "Linker Option", &option.value);
                }
            }
            LoadCommandBody::Unknown { .. } => {
                let payload = u64::from(self.cmdsize).saturating_sub(8);
                if payload > 0 {
                    group
                        .add(TranslationKind::RawBytes(payload as usize), "Payload", "")
                        .with_error("unknown, cannot parse further");
                }
            }
        }
        let end = self.view.range().end();
        if group.end() > end {
            warn!(command = %self.name(), overrun = group.end() - end, "rendered fields run past cmdsize");
        }
        group.skip(end.saturating_sub(group.end()));
        groups.push(group);
        groups
    }

    fn add_trailing_string(&self, group: &mut TranslationGroup, string_offset: u32, label: &str) {
        let consumed = group.range().len;
        let start = u64::from(string_offset);
        if start < consumed || start >= u64::from(self.cmdsize) {
            return;
        }
        group.skip(start - consumed);
        let bytes = &self.view.as_slice()[start as usize..];
        let translation = group.add(
            TranslationKind::Utf8String(bytes.len()),
            label,
            utf8_until_nul(bytes).unwrap_or_default(),
        );
        if utf8_until_nul(bytes).is_none() {
            translation.with_error("invalid string");
        }
    }
}

fn protection(prot: u32) -> String {
    let bit = |mask: u32, c: char| if prot & mask != 0 { c } else { '-' };
    format!("{}{}{}", bit(1, 'r'), bit(2, 'w'), bit(4, 'x'))
}

fn format_uuid(uuid: &[u8; 16]) -> String {
    let hex = hex::encode_upper(uuid);
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

fn platform_name(platform: u32) -> String {
    let name = match platform {
        1 => "macOS",
        2 => "iOS",
        3 => "tvOS",
        4 => "watchOS",
        5 => "bridgeOS",
        6 => "Mac Catalyst",
        7 => "iOS Simulator",
        8 => "tvOS Simulator",
        9 => "watchOS Simulator",
        10 => "DriverKit",
        11 => "visionOS",
        12 => "visionOS Simulator",
        other => return format!("Unknown platform ({other})"),
    };
    name.to_string()
}

fn tool_name(tool: u32) -> String {
    let name = match tool {
        1 => "clang",
        2 => "swift",
        3 => "ld",
        4 => "lld",
        other => return format!("Unknown tool ({other})"),
    };
    name.to_string()
}

/// Everything the load-command walk produced.
#[derive(Debug, Clone, Default)]
pub struct LoadCommandContext {
    pub commands: Vec<LoadCommand>,
    /// All section headers, in load-command order. Symbol `n_sect` ordinals index this (1-based).
    pub sections: Vec<SectionHeader>,
    pub symtab: Option<SymtabCommand>,
    pub dysymtab: Option<DysymtabCommand>,
    pub dyld_info: Option<DyldInfoCommand>,
    pub linkedit: Vec<LinkeditDataCommand>,
    /// `vmaddr` of `__TEXT`, the base for function-start addresses.
    pub text_vmaddr: Option<u64>,
}

/// Minimum `cmdsize` for a command code, when its layout is known.
fn minimum_size(cmd: u32) -> Option<u32> {
    let size = match cmd {
        lc::SEGMENT => 56,
        lc::SEGMENT_64 => 72,
        lc::SYMTAB => 24,
        lc::DYSYMTAB => 80,
        lc::DYLD_INFO | lc::DYLD_INFO_ONLY => 48,
        lc::CODE_SIGNATURE
        | lc::SEGMENT_SPLIT_INFO
        | lc::FUNCTION_STARTS
        | lc::DATA_IN_CODE
        | lc::DYLIB_CODE_SIGN_DRS
        | lc::LINKER_OPTIMIZATION_HINT
        | lc::DYLD_EXPORTS_TRIE
        | lc::DYLD_CHAINED_FIXUPS => 16,
        lc::ID_DYLIB
        | lc::LOAD_DYLIB
        | lc::LOAD_WEAK_DYLIB
        | lc::REEXPORT_DYLIB
        | lc::LAZY_LOAD_DYLIB
        | lc::LOAD_UPWARD_DYLIB => 24,
        lc::RPATH
        | lc::ID_DYLINKER
        | lc::LOAD_DYLINKER
        | lc::DYLD_ENVIRONMENT
        | lc::SUB_FRAMEWORK
        | lc::SUB_UMBRELLA
        | lc::SUB_CLIENT
        | lc::SUB_LIBRARY
        | lc::LINKER_OPTION => 12,
        lc::MAIN | lc::UUID | lc::BUILD_VERSION | lc::ENCRYPTION_INFO_64 => 24,
        lc::SOURCE_VERSION
        | lc::VERSION_MIN_MACOSX
        | lc::VERSION_MIN_IPHONEOS
        | lc::VERSION_MIN_TVOS
        | lc::VERSION_MIN_WATCHOS => 16,
        lc::ENCRYPTION_INFO => 20,
        _ => return None,
    };
    Some(size)
}

/// Walk the load-command table that follows `header`.
pub fn walk(file: &ByteView, header: &Header) -> Result<LoadCommandContext> {
    let mut context = LoadCommandContext::default();
    let mut cursor = Header::size(header.is_64_bit);
    for index in 0..header.ncmds as usize {
        let prefix = file.slice(cursor, 8)?;
        let cmd = prefix.u32_at(0)?;
        let cmdsize = prefix.u32_at(4)?;
        if cmdsize < 8 {
            return Err(MachoError::MalformedLoadCommand {
                index,
                offset: cursor,
                message: format!("cmdsize {cmdsize} is smaller than the 8-byte prefix"),
            });
        }
        let view = file.slice(cursor, cmdsize as usize)?;
        if cmd == lc::DYSYMTAB && context.symtab.is_none() {
            return Err(MachoError::MissingSymbolTable { offset: cursor });
        }
        let body = match minimum_size(cmd) {
            Some(min) if cmdsize < min => {
                warn!(index, cmd = %hex_u64(u64::from(cmd)), cmdsize, min, "load command too small, treating as unknown");
                LoadCommandBody::Unknown { cmd }
            }
            Some(_) => decode_body(cmd, &view, &mut context).unwrap_or_else(|err| {
                warn!(index, cmd = %hex_u64(u64::from(cmd)), error = %err, "load command payload inconsistent, treating as unknown");
                LoadCommandBody::Unknown { cmd }
            }),
            None => {
                warn!(index, cmd = %hex_u64(u64::from(cmd)), cmdsize, "unknown load command");
                LoadCommandBody::Unknown { cmd }
            }
        };
        debug!(index, offset = cursor, name = ?command_name(cmd), cmdsize, "decoded load command");
        context.commands.push(LoadCommand {
            index,
            cmd,
            cmdsize,
            body,
            view,
            is_64_bit: header.is_64_bit,
        });
        cursor += cmdsize as usize;
    }
    Ok(context)
}

fn decode_body(cmd: u32, view: &ByteView, context: &mut LoadCommandContext) -> Result<LoadCommandBody> {
    let mut shifter = view.shifter();
    shifter.skip(8)?;
    let body = match cmd {
        lc::SEGMENT | lc::SEGMENT_64 => {
            let is_64_bit = cmd == lc::SEGMENT_64;
            let name = shifter.shift_fixed_name(16)?;
            let vmaddr = shifter.shift_pointer(is_64_bit)?;
            let vmsize = shifter.shift_pointer(is_64_bit)?;
            let fileoff = shifter.shift_pointer(is_64_bit)?;
            let filesize = shifter.shift_pointer(is_64_bit)?;
            let maxprot = shifter.shift_u32()?;
            let initprot = shifter.shift_u32()?;
            let nsects = shifter.shift_u32()?;
            let flags = shifter.shift_u32()?;
            let needed = (nsects as usize).saturating_mul(SectionHeader::record_size(is_64_bit));
            if needed > shifter.remaining() {
                return Err(MachoError::TruncatedData {
                    offset: shifter.file_position(),
                    expected: needed,
                    actual: shifter.remaining(),
                });
            }
            let sections = (0..nsects)
                .map(|_| SectionHeader::parse(&mut shifter, is_64_bit))
                .collect::<Result<Vec<_>>>()?;
            if name == "__TEXT" {
                context.text_vmaddr = Some(vmaddr);
            }
            context.sections.extend(sections.iter().cloned());
            LoadCommandBody::Segment(Segment {
                name,
                vmaddr,
                vmsize,
                fileoff,
                filesize,
                maxprot,
                initprot,
                nsects,
                flags,
                sections,
            })
        }
        lc::SYMTAB => {
            let symtab = SymtabCommand {
                symoff: shifter.shift_u32()?,
                nsyms: shifter.shift_u32()?,
                stroff: shifter.shift_u32()?,
                strsize: shifter.shift_u32()?,
            };
            context.symtab = Some(symtab);
            LoadCommandBody::SymbolTable(symtab)
        }
        lc::DYSYMTAB => {
            let dysymtab = DysymtabCommand::parse(&mut shifter)?;
            context.dysymtab = Some(dysymtab);
            LoadCommandBody::DynamicSymbolTable(dysymtab)
        }
        lc::DYLD_INFO | lc::DYLD_INFO_ONLY => {
            let info = DyldInfoCommand {
                rebase_off: shifter.shift_u32()?,
                rebase_size: shifter.shift_u32()?,
                bind_off: shifter.shift_u32()?,
                bind_size: shifter.shift_u32()?,
                weak_bind_off: shifter.shift_u32()?,
                weak_bind_size: shifter.shift_u32()?,
                lazy_bind_off: shifter.shift_u32()?,
                lazy_bind_size: shifter.shift_u32()?,
                export_off: shifter.shift_u32()?,
                export_size: shifter.shift_u32()?,
            };
            context.dyld_info = Some(info);
            LoadCommandBody::DyldInfo(info)
        }
        lc::CODE_SIGNATURE
        | lc::SEGMENT_SPLIT_INFO
        | lc::FUNCTION_STARTS
        | lc::DATA_IN_CODE
        | lc::DYLIB_CODE_SIGN_DRS
        | lc::LINKER_OPTIMIZATION_HINT
        | lc::DYLD_EXPORTS_TRIE
        | lc::DYLD_CHAINED_FIXUPS => {
            let data = LinkeditDataCommand {
                cmd,
                dataoff: shifter.shift_u32()?,
                datasize: shifter.shift_u32()?,
            };
            context.linkedit.push(data);
            LoadCommandBody::LinkeditData(data)
        }
        lc::ID_DYLIB
        | lc::LOAD_DYLIB
        | lc::LOAD_WEAK_DYLIB
        | lc::REEXPORT_DYLIB
        | lc::LAZY_LOAD_DYLIB
        | lc::LOAD_UPWARD_DYLIB => {
            let name_offset = shifter.shift_u32()?;
            LoadCommandBody::Dylib(DylibCommand {
                name_offset,
                timestamp: shifter.shift_u32()?,
                current_version: shifter.shift_u32()?,
                compatibility_version: shifter.shift_u32()?,
                name: string_at(view, name_offset),
            })
        }
        lc::RPATH
        | lc::ID_DYLINKER
        | lc::LOAD_DYLINKER
        | lc::DYLD_ENVIRONMENT
        | lc::SUB_FRAMEWORK
        | lc::SUB_UMBRELLA
        | lc::SUB_CLIENT
        | lc::SUB_LIBRARY => {
            let string_offset = shifter.shift_u32()?;
            LoadCommandBody::MonoString {
                string_offset,
                value: string_at(view, string_offset),
            }
        }
        lc::MAIN => LoadCommandBody::Main {
            entry_offset: shifter.shift_u64()?,
            stack_size: shifter.shift_u64()?,
        },
        lc::UUID => {
            let mut uuid = [0u8; 16];
            uuid.copy_from_slice(shifter.shift_bytes(16)?);
            LoadCommandBody::Uuid { uuid }
        }
        lc::SOURCE_VERSION => LoadCommandBody::SourceVersion {
            version: shifter.shift_u64()?,
        },
        lc::VERSION_MIN_MACOSX
        | lc::VERSION_MIN_IPHONEOS
        | lc::VERSION_MIN_TVOS
        | lc::VERSION_MIN_WATCHOS => LoadCommandBody::MinOsVersion {
            version: shifter.shift_u32()?,
            sdk: shifter.shift_u32()?,
        },
        lc::BUILD_VERSION => {
            let platform = shifter.shift_u32()?;
            let minos = shifter.shift_u32()?;
            let sdk = shifter.shift_u32()?;
            let ntools = shifter.shift_u32()?;
            let tools = (0..ntools)
                .map(|_| {
                    Ok(BuildTool {
                        tool: shifter.shift_u32()?,
                        version: shifter.shift_u32()?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            LoadCommandBody::BuildVersion {
                platform,
                minos,
                sdk,
                tools,
            }
        }
        lc::ENCRYPTION_INFO | lc::ENCRYPTION_INFO_64 => LoadCommandBody::EncryptionInfo {
            cryptoff: shifter.shift_u32()?,
            cryptsize: shifter.shift_u32()?,
            cryptid: shifter.shift_u32()?,
            pad: if cmd == lc::ENCRYPTION_INFO_64 {
                Some(shifter.shift_u32()?)
            } else {
                None
            },
        },
        lc::LINKER_OPTION => {
            let count = shifter.shift_u32()?;
            let strings = (0..count)
                .map(|_| {
                    shifter
                        .shift_cstring()
                        .map(|raw| LinkerOptionString {
                            value: String::from_utf8_lossy(&raw[..raw.len() - 1]).into_owned(),
                            size: raw.len(),
                        })
                })
                .collect::<Result<Vec<_>>>()?;
            LoadCommandBody::LinkerOption { count, strings }
        }
        _ => LoadCommandBody::Unknown { cmd },
    };
    Ok(body)
}

fn string_at(view: &ByteView, offset: u32) -> String {
    view.as_slice()
        .get(offset as usize..)
        .map(|bytes| String::from_utf8_lossy(&bytes[..memchr::memchr(0, bytes).unwrap_or(bytes.len())]).into_owned())
        .unwrap_or_default()
}
