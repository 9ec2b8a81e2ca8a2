// This module defines the built-in library of the ku language as a static descriptor table.
// Each entry names the function, its parameters and return type, and a body generator that
// emits the native instructions between the ordinary function prologue and the shared
// return label. The code generator registers every entry in the root scope before the
// program is lowered, through the same declaration path as user functions, so call sites
// cannot tell a built-in from user code. Generators read their arguments from the
// parameter locals, leave the result in EAX (and the byte size of a heap result in EDX)
// and use the machine stack for scratch values, since the frame layout is owned by the
// scope tree. Heap strings are allocated with `mmap2` and always carry their terminator;
// the reported size is the full allocation so the matching `munmap` releases it.

//! Runtime primitives available to every program.

use crate::core::label::Label;
use crate::core::sections::CodeSections;
use crate::core::session::CompilationSession;
use crate::core::types::ScalarType;
use crate::x86::calling_convention::CallingConvention;
use crate::x86::emitter::{Asm, Cond, Mem, Reg, Width};

/// Name of the built-in backing string `+`.
pub const APPEND: &str = "append";
/// Name of the built-in copying returned strings the function does not own.
pub const DUP: &str = "dup";

/// A built-in function descriptor.
#[derive(Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub params: &'static [(&'static str, ScalarType)],
    pub ret: ScalarType,
    pub body: fn(&mut NativeCtx<'_, '_>),
}

impl std::fmt::Debug for Builtin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builtin")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("ret", &self.ret)
            .finish()
    }
}

/// The built-in library, in registration order.
pub static BUILTINS: &[Builtin] = &[
    Builtin {
        name: "len",
        params: &[("s", ScalarType::String)],
        ret: ScalarType::Integer,
        body: len,
    },
    Builtin {
        name: APPEND,
        params: &[("a", ScalarType::String), ("b", ScalarType::String)],
        ret: ScalarType::String,
        body: append,
    },
    Builtin {
        name: "slice",
        params: &[
            ("s", ScalarType::String),
            ("from", ScalarType::Integer),
            ("to", ScalarType::Integer),
        ],
        ret: ScalarType::String,
        body: slice,
    },
    Builtin {
        name: "syscall",
        params: &[
            ("a", ScalarType::Integer),
            ("b", ScalarType::Integer),
            ("c", ScalarType::Integer),
            ("d", ScalarType::Integer),
        ],
        ret: ScalarType::Integer,
        body: syscall,
    },
    Builtin {
        name: "key",
        params: &[],
        ret: ScalarType::Character,
        body: key,
    },
    Builtin {
        name: "out",
        params: &[("s", ScalarType::String)],
        ret: ScalarType::Integer,
        body: out,
    },
    Builtin {
        name: DUP,
        params: &[("s", ScalarType::String)],
        ret: ScalarType::String,
        body: dup,
    },
];

/// What a body generator may touch while emitting a built-in.
pub struct NativeCtx<'c, 'arena> {
    asm: &'c mut Asm,
    params: &'c [Mem],
    session: &'c CompilationSession<'arena>,
    sections: &'c mut CodeSections<'arena>,
}

impl<'c, 'arena> NativeCtx<'c, 'arena> {
    pub fn new(
        asm: &'c mut Asm,
        params: &'c [Mem],
        session: &'c CompilationSession<'arena>,
        sections: &'c mut CodeSections<'arena>,
    ) -> Self {
        Self {
            asm,
            params,
            session,
            sections,
        }
    }

    pub fn asm(&mut self) -> &mut Asm {
        &mut *self.asm
    }

    /// Local holding parameter `index`.
    pub fn param(&self, index: usize) -> Mem {
        self.params[index]
    }

    pub fn label(&self, hint: &str) -> Label<'arena> {
        self.session.mint_label(hint)
    }

    /// Data label of a null-terminated literal.
    pub fn literal(&mut self, text: &str) -> Label<'arena> {
        self.sections.intern_literal(self.session, text)
    }
}

/// EAX = number of bytes before the terminator of the string in `src`.
fn strlen(ctx: &mut NativeCtx<'_, '_>, src: Mem) {
    let top = ctx.label("strlen");
    let done = ctx.label("strlen_done");
    let asm = ctx.asm();
    asm.mov(Reg::Edi, src);
    asm.xor(Reg::Eax, Reg::Eax);
    asm.label(top);
    asm.cmp(Mem::byte_indexed(Reg::Edi, Reg::Eax), 0);
    asm.jcc(Cond::E, done);
    asm.op1("inc", Reg::Eax);
    asm.jmp(top);
    asm.label(done);
}

/// EAX = anonymous read/write mapping of ECX bytes.
fn mmap(asm: &mut Asm) {
    asm.push(Reg::Ebp);
    asm.mov(Reg::Eax, CallingConvention::SYS_MMAP2);
    asm.xor(Reg::Ebx, Reg::Ebx);
    asm.mov(Reg::Edx, CallingConvention::PROT_READ_WRITE);
    asm.mov(Reg::Esi, CallingConvention::MAP_PRIVATE_ANONYMOUS);
    asm.mov(Reg::Edi, -1);
    asm.xor(Reg::Ebp, Reg::Ebp);
    asm.syscall();
    asm.pop(Reg::Ebp);
}

/// Copy ECX bytes from ESI to EDI.
fn copy_bytes(asm: &mut Asm) {
    asm.op0("cld");
    asm.op0("rep movsb");
}

fn terminate(asm: &mut Asm) {
    asm.mov(Mem::new(Reg::Edi, 0, Width::Byte), 0);
}

fn len(ctx: &mut NativeCtx<'_, '_>) {
    let s = ctx.param(0);
    strlen(ctx, s);
}

fn append(ctx: &mut NativeCtx<'_, '_>) {
    let (a, b) = (ctx.param(0), ctx.param(1));
    strlen(ctx, a);
    ctx.asm().push(Reg::Eax);
    strlen(ctx, b);

    // [esp] size, [esp+4] len b, [esp+8] len a
    let asm = ctx.asm();
    asm.push(Reg::Eax);
    asm.mov(Reg::Ecx, Mem::dword(Reg::Esp, 0));
    asm.add(Reg::Ecx, Mem::dword(Reg::Esp, 4));
    asm.op1("inc", Reg::Ecx);
    asm.push(Reg::Ecx);
    mmap(asm);

    asm.mov(Reg::Edi, Reg::Eax);
    asm.mov(Reg::Esi, a);
    asm.mov(Reg::Ecx, Mem::dword(Reg::Esp, 8));
    copy_bytes(asm);
    asm.mov(Reg::Esi, b);
    asm.mov(Reg::Ecx, Mem::dword(Reg::Esp, 4));
    copy_bytes(asm);
    terminate(asm);

    asm.pop(Reg::Edx);
    asm.add(Reg::Esp, 8);
}

fn slice(ctx: &mut NativeCtx<'_, '_>) {
    let (s, from, to) = (ctx.param(0), ctx.param(1), ctx.param(2));
    let counted = ctx.label("slice_counted");

    let asm = ctx.asm();
    asm.mov(Reg::Ecx, to);
    asm.sub(Reg::Ecx, from);
    asm.test(Reg::Ecx, Reg::Ecx);
    asm.jcc(Cond::Ge, counted);
    asm.xor(Reg::Ecx, Reg::Ecx);
    asm.label(counted);

    // [esp] size, [esp+4] length
    asm.push(Reg::Ecx);
    asm.op1("inc", Reg::Ecx);
    asm.push(Reg::Ecx);
    mmap(asm);

    asm.mov(Reg::Edi, Reg::Eax);
    asm.mov(Reg::Esi, s);
    asm.add(Reg::Esi, from);
    asm.mov(Reg::Ecx, Mem::dword(Reg::Esp, 4));
    copy_bytes(asm);
    terminate(asm);

    asm.pop(Reg::Edx);
    asm.add(Reg::Esp, 4);
}

fn syscall(ctx: &mut NativeCtx<'_, '_>) {
    let args = [ctx.param(0), ctx.param(1), ctx.param(2), ctx.param(3)];
    let asm = ctx.asm();
    for (reg, arg) in [Reg::Eax, Reg::Ebx, Reg::Ecx, Reg::Edx].into_iter().zip(args) {
        asm.mov(reg, arg);
    }
    asm.syscall();
}

fn key(ctx: &mut NativeCtx<'_, '_>) {
    let asm = ctx.asm();
    asm.push(0);
    asm.mov(Reg::Eax, CallingConvention::SYS_READ);
    asm.xor(Reg::Ebx, Reg::Ebx);
    asm.mov(Reg::Ecx, Reg::Esp);
    asm.mov(Reg::Edx, 1);
    asm.syscall();
    asm.pop(Reg::Eax);
}

fn out(ctx: &mut NativeCtx<'_, '_>) {
    let s = ctx.param(0);
    let newline = ctx.literal("\n");
    strlen(ctx, s);

    let asm = ctx.asm();
    asm.push(Reg::Eax);
    asm.mov(Reg::Edx, Reg::Eax);
    asm.mov(Reg::Ecx, s);
    asm.mov(Reg::Ebx, 1);
    asm.mov(Reg::Eax, CallingConvention::SYS_WRITE);
    asm.syscall();
    asm.mov(Reg::Edx, 1);
    asm.mov(Reg::Ecx, newline);
    asm.mov(Reg::Ebx, 1);
    asm.mov(Reg::Eax, CallingConvention::SYS_WRITE);
    asm.syscall();
    asm.pop(Reg::Eax);
    asm.op1("inc", Reg::Eax);
}

fn dup(ctx: &mut NativeCtx<'_, '_>) {
    let s = ctx.param(0);
    strlen(ctx, s);

    let asm = ctx.asm();
    asm.mov(Reg::Ecx, Reg::Eax);
    asm.op1("inc", Reg::Ecx);
    asm.push(Reg::Ecx);
    mmap(asm);

    asm.mov(Reg::Edi, Reg::Eax);
    asm.mov(Reg::Esi, s);
    asm.mov(Reg::Ecx, Mem::dword(Reg::Esp, 0));
    copy_bytes(asm);

    asm.pop(Reg::Edx);
}
