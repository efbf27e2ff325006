//! Machine-code sections, decoded through an attached disassembler.

use std::fmt;
use std::sync::Arc;

use crate::bytes::{hex_u64, ByteView};
use crate::capabilities::{Arch, Disassembler, InstructionBank};
use crate::interpreters::Translated;
use crate::translation::{TranslationGroup, TranslationKind};

/// Decoder for a pure-instructions section.
#[derive(Clone)]
pub struct InstructionDecoder {
    view: ByteView,
    arch: Option<Arch>,
    vmaddr: u64,
    disassembler: Option<Arc<dyn Disassembler>>,
}

impl fmt::Debug for InstructionDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstructionDecoder")
            .field("range", &self.view.range())
            .field("arch", &self.arch)
            .field("vmaddr", &hex_u64(self.vmaddr))
            .field("disassembler", &self.disassembler.is_some())
            .finish()
    }
}

impl InstructionDecoder {
    /// `vmaddr` is the code-start address handed to the disassembler.
    pub fn new(
        view: ByteView,
        arch: Option<Arch>,
        vmaddr: u64,
        disassembler: Option<Arc<dyn Disassembler>>,
    ) -> Self {
        Self {
            view,
            arch,
            vmaddr,
            disassembler,
        }
    }

    pub(crate) fn translate(&self) -> Translated {
        match (&self.disassembler, self.arch) {
            (Some(disassembler), Some(arch)) => {
                let decoded = disassembler.decode(self.view.as_slice(), arch, self.vmaddr);
                Translated::Instructions(InstructionBank::new(arch, self.vmaddr, self.view.range(), decoded))
            }
            (disassembler, _) => {
                if self.view.is_empty() {
                    return Translated::Groups(Vec::new());
                }
                let reason = if disassembler.is_none() {
                    "no disassembler attached"
                } else {
                    "no disassembler for this CPU type"
                };
                let mut group = TranslationGroup::new(self.view.range().start);
                group
                    .add(TranslationKind::Code(self.view.len()), "Machine Code", "")
                    .with_secondary("Address", hex_u64(self.vmaddr))
                    .with_error(reason);
                Translated::Groups(vec![group])
            }
        }
    }
}
