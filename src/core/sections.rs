// This module manages the three output streams of one compilation. The data section holds
// string literals, the functions section holds the bodies of every declared function
// (built-ins included), and the program section holds the top-level instructions run from
// the process entry point. Each stream is an append-only Asm buffer; nothing is ever
// removed or patched, so forward references are always resolved by label name. String
// literals are deduplicated by content: the first occurrence mints a data label and emits
// the bytes, later occurrences reuse the same label. `assemble` concatenates the streams
// into a single NASM translation unit in data, functions, program order.

//! Data, functions and program code sections.

use crate::core::label::Label;
use crate::core::session::CompilationSession;
use crate::x86::emitter::Asm;
use hashbrown::HashMap;

/// Which stream instructions are currently appended to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Data,
    Functions,
    Program,
}

/// The three independently growing output streams.
#[derive(Debug, Default)]
pub struct CodeSections<'arena> {
    data: Asm,
    functions: Asm,
    program: Asm,
    literals: HashMap<String, Label<'arena>>,
}

impl<'arena> CodeSections<'arena> {
    pub fn new() -> Self {
        Self {
            data: Asm::new(),
            functions: Asm::new(),
            program: Asm::new(),
            literals: HashMap::new(),
        }
    }

    pub fn section(&self, section: Section) -> &Asm {
        match section {
            Section::Data => &self.data,
            Section::Functions => &self.functions,
            Section::Program => &self.program,
        }
    }

    pub fn section_mut(&mut self, section: Section) -> &mut Asm {
        match section {
            Section::Data => &mut self.data,
            Section::Functions => &mut self.functions,
            Section::Program => &mut self.program,
        }
    }

    /// Data label holding `text`, emitting it on first use.
    pub fn intern_literal(&mut self, session: &CompilationSession<'arena>, text: &str) -> Label<'arena> {
        if let Some(&label) = self.literals.get(text) {
            return label;
        }
        let label = session.mint_label("str");
        self.data.db_cstr(label, text.as_bytes());
        self.literals.insert(text.to_string(), label);
        log::debug!("literal {:?} placed at {}", text, label);
        label
    }

    /// Concatenate all streams into one NASM unit.
    pub fn assemble(&self, entry: &str) -> String {
        let mut out = Asm::new();
        out.raw("bits 32");
        out.raw("");
        out.raw("section .data");
        out.raw(&self.data);
        out.raw("section .text");
        out.raw(format_args!("global {entry}"));
        out.raw("");
        out.raw(&self.functions);
        out.raw(format_args!("{entry}:"));
        out.raw(&self.program);
        out.into_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bumpalo::Bump;

    #[test]
    fn test_literals_are_deduplicated() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut sections = CodeSections::new();

        let a = sections.intern_literal(&session, "hi");
        let b = sections.intern_literal(&session, "there");
        let c = sections.intern_literal(&session, "hi");

        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(sections.section(Section::Data).count(": db "), 2);
        assert!(sections
            .section(Section::Data)
            .as_str()
            .contains("L0_str: db 104, 105, 0"));
    }

    #[test]
    fn test_assemble_order() {
        let mut sections = CodeSections::new();
        sections.section_mut(Section::Functions).op0("nop");
        sections.section_mut(Section::Program).op0("hlt");

        let text = sections.assemble("_start");
        let data = text.find("section .data").unwrap();
        let code = text.find("section .text").unwrap();
        let nop = text.find("nop").unwrap();
        let entry = text.find("_start:").unwrap();
        let hlt = text.find("hlt").unwrap();
        assert!(text.starts_with("bits 32"));
        assert!(data < code && code < nop && nop < entry && entry < hlt);
        assert!(text.contains("global _start"));
    }
}
