//! Synthetic Mach-O images for tests.
//!
//! Commands are laid out in call order right after the header. Data that
//! commands point at (section contents, symbol and string tables, indirect
//! entries, linkedit blobs) is appended after the last command, also in
//! call order, so offsets are predictable.

use crate::macho::header::{MH_MAGIC, MH_MAGIC_64};
use crate::macho::load_command::lc;

/// One section inside a [`MachoBuilder::segment_sections`] call.
#[derive(Debug, Clone)]
pub struct SectionSpec {
    name: String,
    flags: u32,
    data: Vec<u8>,
    reserved1: u32,
    relocations: Vec<u8>,
    zero_fill_size: Option<u64>,
}

impl SectionSpec {
    pub fn new(name: &str, flags: u32, data: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            flags,
            data,
            reserved1: 0,
            relocations: Vec::new(),
            zero_fill_size: None,
        }
    }

    /// A zero-fill section: no file bytes, `size` bytes at runtime.
    pub fn zero_fill(name: &str, size: u64) -> Self {
        let mut spec = Self::new(name, 0x1, Vec::new());
        spec.zero_fill_size = Some(size);
        spec
    }

    pub fn reserved1(mut self, reserved1: u32) -> Self {
        self.reserved1 = reserved1;
        self
    }

    /// Raw 8-byte relocation records.
    pub fn relocations(mut self, records: &[[u8; 8]]) -> Self {
        self.relocations = records.concat();
        self
    }
}

/// A symbol-table entry: name, `n_type`, `n_sect`, `n_value`.
pub type SymbolSpec<'a> = (&'a str, u8, u8, u64);

#[derive(Debug, Clone)]
enum Command {
    Raw(Vec<u8>),
    Segment {
        name: String,
        vmaddr: u64,
        sections: Vec<SectionSpec>,
    },
    Symtab {
        symbols: Vec<(String, u8, u8, u64)>,
    },
    IndirectTable {
        entries: Vec<u32>,
    },
    LinkeditData {
        cmd: u32,
        data: Vec<u8>,
    },
}

/// Builds a little-endian Mach-O image.
#[derive(Debug, Clone)]
pub struct MachoBuilder {
    is_64_bit: bool,
    cpu_type: u32,
    cpu_subtype: u32,
    file_type: u32,
    commands: Vec<Command>,
}

impl MachoBuilder {
    /// x86-64 executable.
    pub fn new_64() -> Self {
        Self {
            is_64_bit: true,
            cpu_type: 0x0100_0007,
            cpu_subtype: 3,
            file_type: 2,
            commands: Vec::new(),
        }
    }

    /// i386 executable.
    pub fn new_32() -> Self {
        Self {
            is_64_bit: false,
            cpu_type: 7,
            cpu_subtype: 3,
            file_type: 2,
            commands: Vec::new(),
        }
    }

    pub fn cpu(&mut self, cpu_type: u32, cpu_subtype: u32) -> &mut Self {
        self.cpu_type = cpu_type;
        self.cpu_subtype = cpu_subtype;
        self
    }

    fn header_size(&self) -> usize {
        if self.is_64_bit {
            32
        } else {
            28
        }
    }

    /// A command with `cmdsize = 8 + payload.len()`.
    pub fn raw_command(&mut self, cmd: u32, payload: &[u8]) -> &mut Self {
        let size = 8 + payload.len() as u32;
        self.raw_command_with_size(cmd, size, payload)
    }

    /// A command with an explicit, possibly lying, `cmdsize`.
    pub fn raw_command_with_size(&mut self, cmd: u32, cmdsize: u32, payload: &[u8]) -> &mut Self {
        let mut bytes = Vec::with_capacity(8 + payload.len());
        put_u32(&mut bytes, cmd);
        put_u32(&mut bytes, cmdsize);
        bytes.extend_from_slice(payload);
        self.commands.push(Command::Raw(bytes));
        self
    }

    pub fn uuid(&mut self, uuid: [u8; 16]) -> &mut Self {
        self.raw_command(lc::UUID, &uuid)
    }

    pub fn source_version(&mut self, version: u64) -> &mut Self {
        self.raw_command(lc::SOURCE_VERSION, &version.to_le_bytes())
    }

    pub fn dylib(&mut self, cmd: u32, path: &str, current: u32, compat: u32) -> &mut Self {
        let mut payload = Vec::new();
        put_u32(&mut payload, 24);
        put_u32(&mut payload, 2);
        put_u32(&mut payload, current);
        put_u32(&mut payload, compat);
        payload.extend_from_slice(path.as_bytes());
        payload.push(0);
        while (payload.len() + 8) % 8 != 0 {
            payload.push(0);
        }
        self.raw_command(cmd, &payload)
    }

    /// `LC_DYSYMTAB` with only the indirect table fields set, pointing
    /// wherever the caller says.
    pub fn dysymtab(&mut self, indirectsymoff: u32, nindirectsyms: u32) -> &mut Self {
        let mut payload = vec![0u8; 72];
        payload[48..52].copy_from_slice(&indirectsymoff.to_le_bytes());
        payload[52..56].copy_from_slice(&nindirectsyms.to_le_bytes());
        self.raw_command(lc::DYSYMTAB, &payload)
    }

    /// A segment whose sections are `(name, flags, contents)`.
    pub fn segment(&mut self, name: &str, vmaddr: u64, sections: &[(&str, u32, Vec<u8>)]) -> &mut Self {
        let sections = sections
            .iter()
            .map(|(section, flags, data)| SectionSpec::new(section, *flags, data.clone()))
            .collect();
        self.segment_sections(name, vmaddr, sections)
    }

    /// A segment mapping file offset 0 at `vmaddr`; each section's address
    /// is `vmaddr` plus its file offset.
    pub fn segment_sections(&mut self, name: &str, vmaddr: u64, sections: Vec<SectionSpec>) -> &mut Self {
        self.commands.push(Command::Segment {
            name: name.to_string(),
            vmaddr,
            sections,
        });
        self
    }

    /// `LC_SYMTAB` plus its symbol and string tables.
    pub fn symbols(&mut self, symbols: &[SymbolSpec<'_>]) -> &mut Self {
        let symbols = symbols
            .iter()
            .map(|(name, n_type, n_sect, n_value)| ((*name).to_string(), *n_type, *n_sect, *n_value))
            .collect();
        self.commands.push(Command::Symtab { symbols });
        self
    }

    /// `LC_DYSYMTAB` plus an indirect symbol table.
    pub fn indirect_symbols(&mut self, entries: &[u32]) -> &mut Self {
        self.commands.push(Command::IndirectTable {
            entries: entries.to_vec(),
        });
        self
    }

    /// A linkedit-data command and its blob.
    pub fn linkedit(&mut self, cmd: u32, data: &[u8]) -> &mut Self {
        self.commands.push(Command::LinkeditData {
            cmd,
            data: data.to_vec(),
        });
        self
    }

    fn command_size(&self, command: &Command) -> usize {
        match command {
            Command::Raw(bytes) => bytes.len(),
            Command::Segment { sections, .. } => {
                let (segment, section) = if self.is_64_bit { (72, 80) } else { (56, 68) };
                segment + section * sections.len()
            }
            Command::Symtab { .. } => 24,
            Command::IndirectTable { .. } => 80,
            Command::LinkeditData { .. } => 16,
        }
    }

    /// Serialize the image.
    pub fn build(&self) -> Vec<u8> {
        let sizeofcmds: usize = self.commands.iter().map(|c| self.command_size(c)).sum();
        let mut commands = Vec::with_capacity(sizeofcmds);
        let mut data = Vec::new();
        let data_start = self.header_size() + sizeofcmds;
        let symbol_size = if self.is_64_bit { 16 } else { 12 };

        for command in &self.commands {
            match command {
                Command::Raw(bytes) => commands.extend_from_slice(bytes),
                Command::Segment { name, vmaddr, sections } => {
                    let mut headers = Vec::new();
                    for section in sections {
                        let offset = if section.zero_fill_size.is_some() {
                            0
                        } else {
                            data_start + data.len()
                        };
                        let size = section.zero_fill_size.unwrap_or(section.data.len() as u64);
                        data.extend_from_slice(&section.data);
                        let reloff = if section.relocations.is_empty() {
                            0
                        } else {
                            data_start + data.len()
                        };
                        data.extend_from_slice(&section.relocations);
                        put_name(&mut headers, &section.name);
                        put_name(&mut headers, name);
                        self.put_pointer(&mut headers, vmaddr.wrapping_add(offset as u64));
                        self.put_pointer(&mut headers, size);
                        put_u32(&mut headers, offset as u32);
                        put_u32(&mut headers, 0);
                        put_u32(&mut headers, reloff as u32);
                        put_u32(&mut headers, section.relocations.len() as u32 / 8);
                        put_u32(&mut headers, section.flags);
                        put_u32(&mut headers, section.reserved1);
                        put_u32(&mut headers, 0);
                        if self.is_64_bit {
                            put_u32(&mut headers, 0);
                        }
                    }
                    put_u32(&mut commands, if self.is_64_bit { lc::SEGMENT_64 } else { lc::SEGMENT });
                    put_u32(&mut commands, self.command_size(command) as u32);
                    put_name(&mut commands, name);
                    self.put_pointer(&mut commands, *vmaddr);
                    self.put_pointer(&mut commands, 0x1000);
                    self.put_pointer(&mut commands, 0);
                    self.put_pointer(&mut commands, 0);
                    put_u32(&mut commands, 5);
                    put_u32(&mut commands, 5);
                    put_u32(&mut commands, sections.len() as u32);
                    put_u32(&mut commands, 0);
                    commands.extend_from_slice(&headers);
                }
                Command::Symtab { symbols } => {
                    let mut strings = vec![0u8];
                    let symoff = data_start + data.len();
                    for (name, n_type, n_sect, n_value) in symbols {
                        put_u32(&mut data, strings.len() as u32);
                        strings.extend_from_slice(name.as_bytes());
                        strings.push(0);
                        data.push(*n_type);
                        data.push(*n_sect);
                        data.extend_from_slice(&0u16.to_le_bytes());
                        self.put_pointer(&mut data, *n_value);
                    }
                    debug_assert_eq!(data_start + data.len() - symoff, symbols.len() * symbol_size);
                    let stroff = data_start + data.len();
                    data.extend_from_slice(&strings);
                    put_u32(&mut commands, lc::SYMTAB);
                    put_u32(&mut commands, 24);
                    put_u32(&mut commands, symoff as u32);
                    put_u32(&mut commands, symbols.len() as u32);
                    put_u32(&mut commands, stroff as u32);
                    put_u32(&mut commands, strings.len() as u32);
                }
                Command::IndirectTable { entries } => {
                    let offset = data_start + data.len();
                    for entry in entries {
                        put_u32(&mut data, *entry);
                    }
                    put_u32(&mut commands, lc::DYSYMTAB);
                    put_u32(&mut commands, 80);
                    let mut fields = [0u32; 18];
                    fields[12] = offset as u32;
                    fields[13] = entries.len() as u32;
                    for field in fields {
                        put_u32(&mut commands, field);
                    }
                }
                Command::LinkeditData { cmd, data: blob } => {
                    let offset = data_start + data.len();
                    data.extend_from_slice(blob);
                    put_u32(&mut commands, *cmd);
                    put_u32(&mut commands, 16);
                    put_u32(&mut commands, offset as u32);
                    put_u32(&mut commands, blob.len() as u32);
                }
            }
        }

        let mut image = Vec::with_capacity(data_start + data.len());
        put_u32(&mut image, if self.is_64_bit { MH_MAGIC_64 } else { MH_MAGIC });
        put_u32(&mut image, self.cpu_type);
        put_u32(&mut image, self.cpu_subtype);
        put_u32(&mut image, self.file_type);
        put_u32(&mut image, self.commands.len() as u32);
        put_u32(&mut image, sizeofcmds as u32);
        put_u32(&mut image, 0);
        if self.is_64_bit {
            put_u32(&mut image, 0);
        }
        image.extend_from_slice(&commands);
        image.extend_from_slice(&data);
        image
    }

    fn put_pointer(&self, out: &mut Vec<u8>, value: u64) {
        if self.is_64_bit {
            out.extend_from_slice(&value.to_le_bytes());
        } else {
            put_u32(out, value as u32);
        }
    }
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_name(out: &mut Vec<u8>, name: &str) {
    let mut field = [0u8; 16];
    let len = name.len().min(16);
    field[..len].copy_from_slice(&name.as_bytes()[..len]);
    out.extend_from_slice(&field);
}
