//! Mach-O container decoding.
//!
//! [`MachoFile::parse`] reads the header, walks the load commands once and
//! then creates every portion in dependency order: string table, symbol
//! table, indirect table, C-string sections, everything else. Portions that
//! name symbols or strings hold a [`Dependency`] on the portion that
//! publishes them, so construction never waits on decoding.

pub mod header;
pub mod load_command;
pub mod section;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::bytes::{ByteRange, ByteView};
use crate::cache::CancelToken;
use crate::capabilities::Capabilities;
use crate::error::Result;
use crate::interpreters::strings::StringEncoding;
use crate::interpreters::symbols::SymbolEntry;
use crate::interpreters::{
    DataInCodeDecoder, Dependency, FunctionStartsDecoder, IndirectDecoder, InstructionDecoder,
    Interpreter, LiteralPointerDecoder, OpcodeDecoder, OpcodeTable, RawDecoder, RelativeOffsetDecoder,
    RelocationDecoder, StringDecoder, StringTableDecoder, SymbolDecoder, SymbolPointerDecoder,
    SymbolTable,
};
use crate::portion::{Portion, SearchHit};
use crate::translation::compare_range;
use crate::types::DecodeOptions;

use header::Header;
use load_command::{lc, LoadCommand, LoadCommandContext};
use section::{select_strategy, SectionHeader, SectionStrategy};

/// A decoded Mach-O file.
#[derive(Debug)]
pub struct MachoFile {
    file: ByteView,
    header: Header,
    context: LoadCommandContext,
    portions: Vec<Arc<Portion>>,
    search_index: Vec<Arc<Portion>>,
    symbols: Option<Dependency>,
}

impl MachoFile {
    /// Decode with default options and no external collaborators.
    pub fn parse(buffer: impl Into<Arc<[u8]>>) -> Result<Self> {
        Self::parse_with(buffer, &DecodeOptions::default(), Capabilities::none())
    }

    /// Decode with explicit options and collaborators.
    pub fn parse_with(
        buffer: impl Into<Arc<[u8]>>,
        options: &DecodeOptions,
        capabilities: Capabilities,
    ) -> Result<Self> {
        let file = ByteView::new(buffer.into());
        let header = Header::parse(&file)?;
        let context = load_command::walk(&file, &header)?;
        let mut builder = PortionBuilder {
            file: &file,
            header: &header,
            context: &context,
            options,
            capabilities: &capabilities,
            portions: Vec::new(),
        };
        let symbols = builder.build()?;
        let mut portions = builder.portions;
        portions.sort_by_key(|portion| portion.range().start);
        let search_index = build_search_index(&portions);
        debug!(portions = portions.len(), indexed = search_index.len(), "mach-o file decoded");
        Ok(Self {
            file,
            header,
            context,
            portions,
            search_index,
            symbols,
        })
    }

    /// The Mach header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Whether the file uses the 64-bit layout.
    pub fn is_64_bit(&self) -> bool {
        self.header.is_64_bit
    }

    /// Load commands in table order.
    pub fn load_commands(&self) -> &[LoadCommand] {
        &self.context.commands
    }

    /// Section headers in load-command order.
    pub fn sections(&self) -> &[SectionHeader] {
        &self.context.sections
    }

    /// Every portion, ordered by start offset.
    pub fn portions(&self) -> &[Arc<Portion>] {
        &self.portions
    }

    /// Size of the file in bytes.
    pub fn len(&self) -> usize {
        self.file.len()
    }

    /// Whether the file is empty; never true for a parsed file.
    pub fn is_empty(&self) -> bool {
        self.file.is_empty()
    }

    /// The symbol table, once decoded. `None` when the file has no `LC_SYMTAB`.
    pub fn symbol_table(&self, cancel: &CancelToken) -> Result<Option<Arc<SymbolTable>>> {
        self.symbols
            .as_ref()
            .map(|dependency| dependency.symbols(cancel))
            .transpose()
    }

    /// Symbols whose value equals `address`, in table order.
    pub fn symbols_at(&self, address: u64, cancel: &CancelToken) -> Result<Vec<SymbolEntry>> {
        Ok(self
            .symbol_table(cancel)?
            .map(|table| table.find_by_address(address).into_iter().cloned().collect())
            .unwrap_or_default())
    }

    /// The portion containing `offset`, without waiting for it to decode.
    pub fn portion_at(&self, offset: u64) -> Option<&Arc<Portion>> {
        self.search_index
            .binary_search_by(|portion| compare_range(&portion.range(), offset))
            .ok()
            .map(|index| &self.search_index[index])
    }

    /// Find the portion and the field covering a file offset.
    ///
    /// Waits for the portion to finish decoding. Offsets in gaps, in skipped
    /// padding, or in portions that failed or were cancelled give `None`.
    pub fn search_by_offset(&self, offset: u64, cancel: &CancelToken) -> Option<SearchHit> {
        let portion = self.portion_at(offset)?;
        match portion.search(offset, cancel) {
            Ok(translation) => translation.map(|translation| SearchHit {
                portion: Arc::clone(portion),
                translation,
            }),
            Err(err) => {
                debug!(offset, error = %err, "search gave up");
                None
            }
        }
    }
}

/// Nonzero-length portions in offset order. Overlapping portions break
/// binary search, so the later one is left out of the index.
fn build_search_index(portions: &[Arc<Portion>]) -> Vec<Arc<Portion>> {
    let mut index: Vec<Arc<Portion>> = Vec::with_capacity(portions.len());
    for portion in portions.iter().filter(|portion| !portion.range().is_empty()) {
        if let Some(previous) = index.last() {
            if portion.range().start < previous.range().end() {
                warn!(
                    portion = portion.title(),
                    range = %portion.range(),
                    overlaps = previous.title(),
                    "overlapping portion left out of the search index"
                );
                continue;
            }
        }
        index.push(Arc::clone(portion));
    }
    index
}

struct PortionBuilder<'a> {
    file: &'a ByteView,
    header: &'a Header,
    context: &'a LoadCommandContext,
    options: &'a DecodeOptions,
    capabilities: &'a Capabilities,
    portions: Vec<Arc<Portion>>,
}

impl PortionBuilder<'_> {
    fn push(
        &mut self,
        title: impl Into<String>,
        subtitle: Option<String>,
        range: ByteRange,
        runtime_size: Option<u64>,
        interpreter: Interpreter,
    ) -> Result<Arc<Portion>> {
        let portion = Portion::start(
            title,
            subtitle,
            range,
            runtime_size,
            interpreter,
            self.options.poll_interval,
        )?;
        self.portions.push(Arc::clone(&portion));
        Ok(portion)
    }

    fn slice(&self, offset: u32, len: u64) -> Result<ByteView> {
        self.file.slice(offset as usize, len as usize)
    }

    /// Create every portion. Returns the symbol table dependency, if any.
    fn build(&mut self) -> Result<Option<Dependency>> {
        let header_range = ByteRange::new(0, Header::size(self.header.is_64_bit) as u64);
        self.push("Mach Header", None, header_range, None, Interpreter::Header(self.header.clone()))?;

        for command in &self.context.commands {
            self.push(
                command.name(),
                command.subtitle(),
                command.view().range(),
                None,
                Interpreter::LoadCommand(command.clone()),
            )?;
        }

        let (symbols, indirect) = self.build_symbol_tables()?;
        self.build_sections(symbols.as_ref(), indirect.as_ref())?;
        self.build_linkedit(symbols.as_ref())?;
        self.build_dyld_info()?;
        Ok(symbols)
    }

    fn build_symbol_tables(&mut self) -> Result<(Option<Dependency>, Option<Dependency>)> {
        let Some(symtab) = self.context.symtab else {
            return Ok((None, None));
        };
        let strings_view = self.slice(symtab.stroff, u64::from(symtab.strsize))?;
        let strings = self.push(
            "String Table",
            None,
            strings_view.range(),
            None,
            Interpreter::StringTable(StringTableDecoder::new(strings_view)),
        )?;

        let record = SymbolEntry::record_size(self.header.is_64_bit) as u64;
        let symbols_view = self.slice(symtab.symoff, u64::from(symtab.nsyms) * record)?;
        let section_names: Arc<[String]> =
            self.context.sections.iter().map(SectionHeader::qualified_name).collect();
        let symbols = self.push(
            "Symbol Table",
            None,
            symbols_view.range(),
            None,
            Interpreter::Symbols(SymbolDecoder::new(
                symbols_view,
                self.header.is_64_bit,
                strings.dependency(),
                section_names,
            )),
        )?;

        let indirect = match self.context.dysymtab {
            Some(dysymtab) if dysymtab.nindirectsyms > 0 => {
                let view = self.slice(dysymtab.indirectsymoff, u64::from(dysymtab.nindirectsyms) * 4)?;
                let portion = self.push(
                    "Indirect Symbol Table",
                    None,
                    view.range(),
                    None,
                    Interpreter::Indirect(IndirectDecoder::new(view, symbols.dependency())),
                )?;
                Some(portion.dependency())
            }
            _ => None,
        };
        Ok((Some(symbols.dependency()), indirect))
    }

    fn build_sections(
        &mut self,
        symbols: Option<&Dependency>,
        indirect: Option<&Dependency>,
    ) -> Result<()> {
        let context = self.context;
        let mut cstrings = Vec::new();
        let mut deferred = Vec::new();
        for section in &context.sections {
            let strategy = select_strategy(section);
            if matches!(strategy, SectionStrategy::CStrings { .. }) {
                let portion = self.build_section(section, strategy, symbols, indirect, &[])?;
                cstrings.push(portion.dependency());
            } else {
                deferred.push((section, strategy));
            }
        }
        for (section, strategy) in deferred {
            self.build_section(section, strategy, symbols, indirect, &cstrings)?;
        }

        for section in context.sections.iter().filter(|section| section.nreloc > 0) {
            let view = self.slice(section.reloff, u64::from(section.nreloc) * 8)?;
            self.push(
                "Relocations",
                Some(section.qualified_name()),
                view.range(),
                None,
                Interpreter::Relocations(RelocationDecoder::new(
                    view,
                    section.qualified_name(),
                    symbols.cloned(),
                )),
            )?;
        }
        Ok(())
    }

    fn build_section(
        &mut self,
        section: &SectionHeader,
        strategy: SectionStrategy,
        symbols: Option<&Dependency>,
        indirect: Option<&Dependency>,
        cstrings: &[Dependency],
    ) -> Result<Arc<Portion>> {
        let title = section.qualified_name();
        if strategy == SectionStrategy::ZeroFill {
            let range = ByteRange::new(u64::from(section.offset), 0);
            return self.push(
                title,
                Some("Zero Fill".to_string()),
                range,
                Some(section.size),
                Interpreter::ZeroFill,
            );
        }
        let view = self.slice(section.offset, section.size)?;
        let range = view.range();
        let is_64_bit = self.header.is_64_bit;
        let (subtitle, interpreter) = match strategy {
            SectionStrategy::CStrings { demangle } => {
                let demangler = if demangle && self.options.demangle_cstrings {
                    self.capabilities.demangler.clone()
                } else {
                    None
                };
                (
                    "C Strings",
                    Interpreter::Strings(StringDecoder::new(view, section.addr, StringEncoding::Utf8, demangler)),
                )
            }
            SectionStrategy::Utf16Strings => (
                "UTF-16 Strings",
                Interpreter::Strings(StringDecoder::new(view, section.addr, StringEncoding::Utf16Le, None)),
            ),
            SectionStrategy::LiteralPointers => (
                "Literal Pointers",
                Interpreter::LiteralPointers(LiteralPointerDecoder::new(view, is_64_bit, cstrings.to_vec())),
            ),
            SectionStrategy::SymbolPointers(kind) => (
                "Symbol Pointers",
                Interpreter::SymbolPointers(SymbolPointerDecoder::new(
                    view,
                    is_64_bit,
                    kind,
                    section.reserved1,
                    indirect.cloned(),
                    symbols.cloned(),
                )),
            ),
            SectionStrategy::Instructions => (
                "Code",
                Interpreter::Instructions(InstructionDecoder::new(
                    view,
                    self.header.arch(),
                    section.addr,
                    self.capabilities.disassembler.clone(),
                )),
            ),
            SectionStrategy::RawRows => (
                "Raw Data",
                Interpreter::Raw(RawDecoder::rows(view, self.options.raw_row_width)),
            ),
            SectionStrategy::RelativeOffsets => (
                "Relative Offsets",
                Interpreter::RelativeOffsets(RelativeOffsetDecoder::new(view, section.addr)),
            ),
            SectionStrategy::Unknown | SectionStrategy::ZeroFill => {
                warn!(section = %section, "no decoder for section, keeping raw bytes");
                ("Unknown", Interpreter::Raw(RawDecoder::opaque(view)))
            }
        };
        self.push(title, Some(subtitle.to_string()), range, None, interpreter)
    }

    fn build_linkedit(&mut self, symbols: Option<&Dependency>) -> Result<()> {
        let context = self.context;
        for data in context.linkedit.iter().filter(|data| data.datasize > 0) {
            let view = self.slice(data.dataoff, u64::from(data.datasize))?;
            let range = view.range();
            let (title, interpreter) = match data.cmd {
                lc::FUNCTION_STARTS => (
                    "Function Starts",
                    Interpreter::FunctionStarts(FunctionStartsDecoder::new(
                        view,
                        context.text_vmaddr.unwrap_or(0),
                        symbols.cloned(),
                    )),
                ),
                lc::DATA_IN_CODE => ("Data in Code", Interpreter::DataInCode(DataInCodeDecoder::new(view))),
                lc::CODE_SIGNATURE => ("Code Signature", Interpreter::Raw(RawDecoder::opaque(view))),
                lc::SEGMENT_SPLIT_INFO => ("Segment Split Info", Interpreter::Raw(RawDecoder::opaque(view))),
                lc::DYLIB_CODE_SIGN_DRS => ("Code Signing DRs", Interpreter::Raw(RawDecoder::opaque(view))),
                lc::LINKER_OPTIMIZATION_HINT => {
                    ("Linker Optimization Hint", Interpreter::Raw(RawDecoder::opaque(view)))
                }
                lc::DYLD_EXPORTS_TRIE => ("Exports Trie", Interpreter::Raw(RawDecoder::opaque(view))),
                lc::DYLD_CHAINED_FIXUPS => ("Chained Fixups", Interpreter::Raw(RawDecoder::opaque(view))),
                _ => ("Link Edit Data", Interpreter::Raw(RawDecoder::opaque(view))),
            };
            self.push(title, None, range, None, interpreter)?;
        }
        Ok(())
    }

    fn build_dyld_info(&mut self) -> Result<()> {
        let Some(info) = self.context.dyld_info else {
            return Ok(());
        };
        let streams = [
            ("Rebase Info", info.rebase_off, info.rebase_size, Some(OpcodeTable::Rebase)),
            ("Binding Info", info.bind_off, info.bind_size, Some(OpcodeTable::Bind)),
            ("Weak Binding Info", info.weak_bind_off, info.weak_bind_size, Some(OpcodeTable::Bind)),
            ("Lazy Binding Info", info.lazy_bind_off, info.lazy_bind_size, Some(OpcodeTable::Bind)),
            ("Export Info", info.export_off, info.export_size, None),
        ];
        for (title, offset, size, table) in streams {
            if size == 0 {
                continue;
            }
            let view = self.slice(offset, u64::from(size))?;
            let range = view.range();
            let interpreter = match table {
                Some(table) => Interpreter::Opcodes(OpcodeDecoder::new(view, table)),
                None => Interpreter::Raw(RawDecoder::opaque(view)),
            };
            self.push(title, None, range, None, interpreter)?;
        }
        Ok(())
    }
}
