// This module provides typed emission of 32-bit x86 NASM assembly text. Asm is an
// append-only instruction buffer: code sections, function bodies and expression fragments
// are all Asm values, and fragments are spliced into sections with `append` once the
// lowering that produced them has finished type checking. Reg names the general-purpose
// registers (and the byte registers used for 1-byte values), Mem renders `width [base+disp]`
// memory operands, and Cond maps comparison outcomes onto jcc/setcc suffixes. Helper
// methods exist for every mnemonic the code generator uses so call sites read like the
// assembly they produce. Nothing is ever removed from a buffer; forward references are
// expressed through labels and `equ` symbols resolved by the assembler.

//! NASM text emission for 32-bit x86.

use crate::core::label::Label;
use crate::core::scope::StackSlot;
use crate::core::types::ScalarType;
use std::fmt::{self, Display, Write};

/// General-purpose registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
    Eax,
    Ebx,
    Ecx,
    Edx,
    Esi,
    Edi,
    Ebp,
    Esp,
    Al,
    Bl,
    Cl,
    Dl,
}

impl Reg {
    pub const fn name(self) -> &'static str {
        match self {
            Reg::Eax => "eax",
            Reg::Ebx => "ebx",
            Reg::Ecx => "ecx",
            Reg::Edx => "edx",
            Reg::Esi => "esi",
            Reg::Edi => "edi",
            Reg::Ebp => "ebp",
            Reg::Esp => "esp",
            Reg::Al => "al",
            Reg::Bl => "bl",
            Reg::Cl => "cl",
            Reg::Dl => "dl",
        }
    }

    /// Low byte of a 32-bit register.
    pub const fn low_byte(self) -> Reg {
        match self {
            Reg::Eax | Reg::Al => Reg::Al,
            Reg::Ebx | Reg::Bl => Reg::Bl,
            Reg::Ecx | Reg::Cl => Reg::Cl,
            Reg::Edx | Reg::Dl => Reg::Dl,
            other => other,
        }
    }
}

impl Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Operand width of a memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Byte,
    Dword,
}

impl Width {
    /// Width of a value of type `ty`.
    pub const fn of(ty: ScalarType) -> Width {
        match ty.size() {
            1 => Width::Byte,
            _ => Width::Dword,
        }
    }

    /// Width for a value of `size` bytes, if one exists.
    pub const fn for_size(size: u32) -> Option<Width> {
        match size {
            1 => Some(Width::Byte),
            4 => Some(Width::Dword),
            _ => None,
        }
    }
}

/// A memory operand `width [base + index + disp]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mem {
    base: Reg,
    index: Option<Reg>,
    disp: i32,
    width: Option<Width>,
}

impl Mem {
    pub const fn new(base: Reg, disp: i32, width: Width) -> Self {
        Self {
            base,
            index: None,
            disp,
            width: Some(width),
        }
    }

    /// A slot of the current frame.
    pub fn frame(slot: StackSlot) -> Self {
        Self::based(Reg::Ebp, slot)
    }

    /// A slot of the frame whose pointer is held in `base`.
    pub fn based(base: Reg, slot: StackSlot) -> Self {
        Self {
            base,
            index: None,
            disp: slot.disp(),
            width: Width::for_size(slot.size),
        }
    }

    /// A full dword at `base + disp`.
    pub const fn dword(base: Reg, disp: i32) -> Self {
        Self::new(base, disp, Width::Dword)
    }

    /// A byte at `base + index`.
    pub const fn byte_indexed(base: Reg, index: Reg) -> Self {
        Self {
            base,
            index: Some(index),
            disp: 0,
            width: Some(Width::Byte),
        }
    }

    /// Same address, no size keyword (for `lea`).
    pub const fn address(self) -> Self {
        Self {
            width: None,
            ..self
        }
    }

    pub const fn width(&self) -> Option<Width> {
        self.width
    }
}

impl Display for Mem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.width {
            Some(Width::Byte) => f.write_str("byte ")?,
            Some(Width::Dword) => f.write_str("dword ")?,
            None => {}
        }
        write!(f, "[{}", self.base)?;
        if let Some(index) = self.index {
            write!(f, "+{index}")?;
        }
        match self.disp {
            0 => {}
            d if d > 0 => write!(f, "+{d}")?,
            d => write!(f, "{d}")?,
        }
        f.write_str("]")
    }
}

/// Condition codes for `jcc` and `setcc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    E,
    Ne,
    L,
    G,
    Le,
    Ge,
    A,
    B,
    Ae,
    Be,
    Z,
    Nz,
    P,
}

impl Cond {
    pub const fn suffix(self) -> &'static str {
        match self {
            Cond::E => "e",
            Cond::Ne => "ne",
            Cond::L => "l",
            Cond::G => "g",
            Cond::Le => "le",
            Cond::Ge => "ge",
            Cond::A => "a",
            Cond::B => "b",
            Cond::Ae => "ae",
            Cond::Be => "be",
            Cond::Z => "z",
            Cond::Nz => "nz",
            Cond::P => "p",
        }
    }
}

/// Append-only assembly text buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Asm {
    text: String,
}

impl Asm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Splice another buffer onto the end of this one.
    pub fn append(&mut self, other: Asm) {
        self.text.push_str(&other.text);
    }

    /// A line emitted verbatim, without indentation.
    pub fn raw(&mut self, line: impl Display) {
        let _ = writeln!(self.text, "{line}");
    }

    pub fn label(&mut self, label: Label<'_>) {
        let _ = writeln!(self.text, "{label}:");
    }

    pub fn comment(&mut self, text: impl Display) {
        let _ = writeln!(self.text, "    ; {text}");
    }

    /// `name equ value`.
    pub fn equ(&mut self, name: Label<'_>, value: impl Display) {
        let _ = writeln!(self.text, "{name} equ {value}");
    }

    pub fn op0(&mut self, mnemonic: &str) {
        let _ = writeln!(self.text, "    {mnemonic}");
    }

    pub fn op1(&mut self, mnemonic: &str, a: impl Display) {
        let _ = writeln!(self.text, "    {mnemonic} {a}");
    }

    pub fn op2(&mut self, mnemonic: &str, a: impl Display, b: impl Display) {
        let _ = writeln!(self.text, "    {mnemonic} {a}, {b}");
    }

    pub fn mov(&mut self, dst: impl Display, src: impl Display) {
        self.op2("mov", dst, src);
    }

    pub fn movzx(&mut self, dst: Reg, src: impl Display) {
        self.op2("movzx", dst, src);
    }

    /// Load a memory operand into `dst`, zero-extending byte values.
    pub fn load(&mut self, dst: Reg, src: Mem) {
        match src.width() {
            Some(Width::Byte) => self.movzx(dst, src),
            _ => self.mov(dst, src),
        }
    }

    /// Store `src` (or its low byte) into a memory operand.
    pub fn store(&mut self, dst: Mem, src: Reg) {
        match dst.width() {
            Some(Width::Byte) => self.mov(dst, src.low_byte()),
            _ => self.mov(dst, src),
        }
    }

    pub fn lea(&mut self, dst: Reg, src: Mem) {
        self.op2("lea", dst, src.address());
    }

    pub fn push(&mut self, src: impl Display) {
        self.op1("push", src);
    }

    pub fn pop(&mut self, dst: impl Display) {
        self.op1("pop", dst);
    }

    pub fn add(&mut self, dst: impl Display, src: impl Display) {
        self.op2("add", dst, src);
    }

    pub fn sub(&mut self, dst: impl Display, src: impl Display) {
        self.op2("sub", dst, src);
    }

    pub fn cmp(&mut self, a: impl Display, b: impl Display) {
        self.op2("cmp", a, b);
    }

    pub fn test(&mut self, a: impl Display, b: impl Display) {
        self.op2("test", a, b);
    }

    pub fn xor(&mut self, dst: impl Display, src: impl Display) {
        self.op2("xor", dst, src);
    }

    pub fn jmp(&mut self, target: Label<'_>) {
        self.op1("jmp", target);
    }

    pub fn jcc(&mut self, cond: Cond, target: Label<'_>) {
        let _ = writeln!(self.text, "    j{} {target}", cond.suffix());
    }

    pub fn setcc(&mut self, cond: Cond, dst: Reg) {
        let _ = writeln!(self.text, "    set{} {}", cond.suffix(), dst.low_byte());
    }

    pub fn call(&mut self, target: Label<'_>) {
        self.op1("call", target);
    }

    /// Linux i386 system call.
    pub fn syscall(&mut self) {
        self.op1("int", "0x80");
    }

    /// `db` directive with a terminating zero byte.
    pub fn db_cstr(&mut self, label: Label<'_>, bytes: &[u8]) {
        let mut line = format!("{label}: db ");
        for byte in bytes {
            let _ = write!(line, "{byte}, ");
        }
        line.push('0');
        self.raw(line);
    }

    /// Number of lines containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.text.lines().filter(|line| line.contains(needle)).count()
    }
}

impl Display for Asm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
