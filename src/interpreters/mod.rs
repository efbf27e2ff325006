//! Per-portion decoders.
//!
//! Every portion is decoded by exactly one [`Interpreter`] variant. The
//! variant runs in two steps on the portion's producer thread:
//! `initialize` builds whatever lookup structure other portions may need
//! (string containers, the symbol table, the indirect table) and
//! `translate` renders the annotated fields. Cross-portion lookups go
//! through a [`Dependency`] handle, which waits on the other portion's
//! cache.

pub mod data_in_code;
pub mod dyld;
pub mod function_starts;
pub mod indirect;
pub mod instruction;
pub mod pointer;
pub mod raw;
pub mod relocation;
pub mod strings;
pub mod swift;
pub mod symbols;

use std::sync::Arc;

use crate::cache::{CancelToken, PortionCache};
use crate::capabilities::InstructionBank;
use crate::error::{MachoError, Result};
use crate::macho::header::Header;
use crate::macho::load_command::LoadCommand;
use crate::translation::{search_groups, Translation, TranslationGroup};

pub use data_in_code::DataInCodeDecoder;
pub use dyld::{OpcodeDecoder, OpcodeTable};
pub use function_starts::FunctionStartsDecoder;
pub use indirect::{IndirectDecoder, IndirectSymbol, IndirectSymbolTable};
pub use instruction::InstructionDecoder;
pub use pointer::{LiteralPointerDecoder, SymbolPointerDecoder};
pub use raw::RawDecoder;
pub use relocation::RelocationDecoder;
pub use strings::{StringContainer, StringDecoder, StringTable, StringTableDecoder};
pub use swift::RelativeOffsetDecoder;
pub use symbols::{SymbolDecoder, SymbolEntry, SymbolTable};

/// Result of the initialize step.
#[derive(Debug)]
pub enum Initialized {
    /// The portion publishes nothing for other portions.
    Nothing,
    Strings(Arc<StringContainer>),
    StringTable(Arc<StringTable>),
    Symbols(Arc<SymbolTable>),
    Indirect(Arc<IndirectSymbolTable>),
}

/// Result of the translate step.
#[derive(Debug)]
pub enum Translated {
    Groups(Vec<TranslationGroup>),
    Instructions(InstructionBank),
}

impl Translated {
    /// Translation covering `offset`, if any.
    pub fn search(&self, offset: u64) -> Option<Translation> {
        match self {
            Self::Groups(groups) => search_groups(groups, offset).cloned(),
            Self::Instructions(bank) => bank.search(offset),
        }
    }

    /// Field groups; empty for instruction banks.
    pub fn groups(&self) -> &[TranslationGroup] {
        match self {
            Self::Groups(groups) => groups,
            Self::Instructions(_) => &[],
        }
    }
}

/// The cache type behind every portion.
pub type DecodeCache = PortionCache<Initialized, Translated>;

/// Handle on another portion's cache.
#[derive(Debug, Clone)]
pub struct Dependency {
    cache: Arc<DecodeCache>,
}

impl Dependency {
    /// Wrap a portion cache.
    pub fn new(cache: Arc<DecodeCache>) -> Self {
        Self { cache }
    }

    fn initialized(&self, cancel: &CancelToken) -> Result<Arc<Initialized>> {
        self.cache.await_initialize_result(cancel)
    }

    fn unexpected(&self, expected: &'static str) -> MachoError {
        MachoError::UnexpectedPayload {
            portion: self.cache.name().to_string(),
            expected,
        }
    }

    /// The symbol table published by the dependency.
    pub fn symbols(&self, cancel: &CancelToken) -> Result<Arc<SymbolTable>> {
        match &*self.initialized(cancel)? {
            Initialized::Symbols(table) => Ok(Arc::clone(table)),
            _ => Err(self.unexpected("a symbol table")),
        }
    }

    /// The string container published by a C-string or UTF-16 section.
    pub fn strings(&self, cancel: &CancelToken) -> Result<Arc<StringContainer>> {
        match &*self.initialized(cancel)? {
            Initialized::Strings(container) => Ok(Arc::clone(container)),
            _ => Err(self.unexpected("a string container")),
        }
    }

    /// The string table published by the `LC_SYMTAB` string region.
    pub fn string_table(&self, cancel: &CancelToken) -> Result<Arc<StringTable>> {
        match &*self.initialized(cancel)? {
            Initialized::StringTable(table) => Ok(Arc::clone(table)),
            _ => Err(self.unexpected("a string table")),
        }
    }

    /// The indirect symbol table.
    pub fn indirect(&self, cancel: &CancelToken) -> Result<Arc<IndirectSymbolTable>> {
        match &*self.initialized(cancel)? {
            Initialized::Indirect(table) => Ok(Arc::clone(table)),
            _ => Err(self.unexpected("an indirect symbol table")),
        }
    }
}

/// How one portion gets decoded.
#[derive(Debug, Clone)]
pub enum Interpreter {
    Header(Header),
    LoadCommand(LoadCommand),
    Strings(StringDecoder),
    StringTable(StringTableDecoder),
    Symbols(SymbolDecoder),
    Indirect(IndirectDecoder),
    Relocations(RelocationDecoder),
    LiteralPointers(LiteralPointerDecoder),
    SymbolPointers(SymbolPointerDecoder),
    Opcodes(OpcodeDecoder),
    FunctionStarts(FunctionStartsDecoder),
    DataInCode(DataInCodeDecoder),
    RelativeOffsets(RelativeOffsetDecoder),
    Instructions(InstructionDecoder),
    Raw(RawDecoder),
    /// Zero-fill sections have no file bytes to decode.
    ZeroFill,
}

impl Interpreter {
    /// Build the lookup structure other portions may wait on.
    pub fn initialize(&self) -> Result<Initialized> {
        let initialized = match self {
            Self::Strings(decoder) => Initialized::Strings(Arc::new(decoder.initialize())),
            Self::StringTable(decoder) => Initialized::StringTable(Arc::new(decoder.initialize())),
            Self::Symbols(decoder) => {
                Initialized::Symbols(Arc::new(decoder.initialize(&CancelToken::new())?))
            }
            Self::Indirect(decoder) => Initialized::Indirect(Arc::new(decoder.initialize()?)),
            _ => Initialized::Nothing,
        };
        Ok(initialized)
    }

    /// Render the portion's annotated fields.
    ///
    /// Runs on the producer thread, so waits on other portions use a token
    /// nobody cancels.
    pub fn translate(&self, initialized: &Initialized) -> Result<Translated> {
        let cancel = CancelToken::new();
        let groups = match (self, initialized) {
            (Self::Header(header), _) => vec![header.translation_group()],
            (Self::LoadCommand(command), _) => command.translation_groups(),
            (Self::Strings(decoder), Initialized::Strings(container)) => decoder.translate(container),
            (Self::StringTable(decoder), Initialized::StringTable(table)) => decoder.translate(table),
            (Self::Symbols(decoder), Initialized::Symbols(table)) => decoder.translate(table),
            (Self::Indirect(decoder), Initialized::Indirect(table)) => {
                decoder.translate(table, &cancel)?
            }
            (Self::Relocations(decoder), _) => decoder.translate(&cancel)?,
            (Self::LiteralPointers(decoder), _) => decoder.translate(&cancel),
            (Self::SymbolPointers(decoder), _) => decoder.translate(&cancel)?,
            (Self::Opcodes(decoder), _) => decoder.translate(),
            (Self::FunctionStarts(decoder), _) => decoder.translate(&cancel)?,
            (Self::DataInCode(decoder), _) => decoder.translate(),
            (Self::RelativeOffsets(decoder), _) => decoder.translate(),
            (Self::Instructions(decoder), _) => return Ok(decoder.translate()),
            (Self::Raw(decoder), _) => decoder.translate(),
            (Self::ZeroFill, _) => Vec::new(),
            (Self::Strings(_) | Self::StringTable(_) | Self::Symbols(_) | Self::Indirect(_), _) => {
                return Err(MachoError::UnexpectedPayload {
                    portion: "initialize step".to_string(),
                    expected: "the payload this interpreter initialized",
                })
            }
        };
        Ok(Translated::Groups(groups))
    }
}
