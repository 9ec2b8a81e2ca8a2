// This module implements the frame and calling convention shared by user functions and
// built-ins on 32-bit x86 Linux. Every lexical scope is realised as a frame: blocks use
// the classic `push ebp / mov ebp, esp / sub esp, size` prologue and `leave` epilogue, so
// `[ebp]` always holds the enclosing scope's frame pointer. Function frames additionally
// install a static link (the frame pointer of the scope that declared the function, pushed
// by the caller) as their `[ebp]` word while keeping the caller's `ebp` one slot above it,
// so chasing `[ebp]` follows the lexical chain no matter where the call came from.
// Arguments are pushed last-to-first from caller staging slots, then the static link, then
// the call; the caller pops them afterwards. Results come back in EAX, with the byte size
// of heap results in EDX. Frame sizes are referenced through `equ` symbols that are defined
// when the scope closes. Every prologue zero-fills its frame, so a size cell that was never
// written reads as 0 and its guarded deallocation is skipped. The module also fixes the
// i386 syscall numbers the backend uses.

//! Stack-frame layout and calling convention for 32-bit x86.

use crate::core::label::Label;
use crate::core::scope::StackSlot;
use crate::x86::emitter::{Asm, Mem, Reg};

/// The backend's calling convention.
///
/// Frame layout inside a function after its prologue:
///
/// ```text
/// ebp + 16 + 4*i : argument i
/// ebp + 12       : static link pushed by the caller
/// ebp + 8        : return address
/// ebp + 4        : caller's ebp
/// ebp            : static link (copy), followed by locals
/// ```
pub struct CallingConvention;

impl CallingConvention {
    /// Scratch register used to walk the frame chain.
    pub const CHASE: Reg = Reg::Esi;
    /// Bytes each pushed argument occupies.
    pub const ARG_BYTES: u32 = 4;
    /// Displacement of the first argument from the callee's frame pointer.
    pub const PARAM_BASE: i32 = 16;

    pub const SYS_EXIT: u32 = 1;
    pub const SYS_READ: u32 = 3;
    pub const SYS_WRITE: u32 = 4;
    pub const SYS_MUNMAP: u32 = 91;
    pub const SYS_MMAP2: u32 = 192;
    pub const PROT_READ_WRITE: u32 = 0x3;
    pub const MAP_PRIVATE_ANONYMOUS: u32 = 0x22;

    /// Frame-pointer displacement of argument `index` inside the callee.
    pub const fn param_disp(index: usize) -> i32 {
        Self::PARAM_BASE + (index as i32) * Self::ARG_BYTES as i32
    }

    /// Bytes the caller pops after a call with `args` arguments.
    pub const fn cleanup_bytes(args: usize) -> u32 {
        (args as u32 + 1) * Self::ARG_BYTES
    }

    /// Open a block frame.
    pub fn block_prologue(asm: &mut Asm, frame_size: Label<'_>) {
        asm.push(Reg::Ebp);
        asm.mov(Reg::Ebp, Reg::Esp);
        asm.sub(Reg::Esp, frame_size);
        Self::zero_frame(asm, frame_size);
    }

    /// Clear the locals just reserved below `esp`. Clobbers EAX, ECX and EDI.
    fn zero_frame(asm: &mut Asm, frame_size: Label<'_>) {
        asm.mov(Reg::Edi, Reg::Esp);
        asm.mov(Reg::Ecx, format_args!("{frame_size} / 4"));
        asm.xor(Reg::Eax, Reg::Eax);
        asm.op0("rep stosd");
    }

    /// Close the innermost block frame.
    pub fn block_epilogue(asm: &mut Asm) {
        asm.op0("leave");
    }

    /// Open a function frame, installing the caller-provided static link as `[ebp]`.
    pub fn function_prologue(asm: &mut Asm, frame_size: Label<'_>) {
        asm.push(Reg::Ebp);
        asm.push(Mem::dword(Reg::Esp, 8));
        asm.mov(Reg::Ebp, Reg::Esp);
        asm.sub(Reg::Esp, frame_size);
        Self::zero_frame(asm, frame_size);
    }

    /// Tear down a function frame and return to the caller.
    pub fn function_epilogue(asm: &mut Asm) {
        asm.lea(Reg::Esp, Mem::dword(Reg::Ebp, 4));
        asm.pop(Reg::Ebp);
        asm.op0("ret");
    }

    /// Make a register point at the frame `depth` hops up the chain.
    ///
    /// Depth 0 is the current frame and needs no code.
    pub fn chase(asm: &mut Asm, depth: usize) -> Reg {
        if depth == 0 {
            return Reg::Ebp;
        }
        asm.mov(Self::CHASE, Reg::Ebp);
        for _ in 0..depth {
            asm.mov(Self::CHASE, Mem::dword(Self::CHASE, 0));
        }
        Self::CHASE
    }

    /// Push staged arguments in calling order, the static link, call, and pop.
    pub fn call(asm: &mut Asm, staged: &[StackSlot], static_depth: usize, entry: Label<'_>) {
        for slot in staged.iter().rev() {
            asm.push(Mem::frame(StackSlot::new(slot.offset, Self::ARG_BYTES)));
        }
        let link = Self::chase(asm, static_depth);
        asm.push(link);
        asm.call(entry);
        asm.add(Reg::Esp, Self::cleanup_bytes(staged.len()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::CompilationSession;
    use bumpalo::Bump;

    #[test]
    fn test_param_displacements() {
        assert_eq!(CallingConvention::param_disp(0), 16);
        assert_eq!(CallingConvention::param_disp(1), 20);
        assert_eq!(CallingConvention::param_disp(3), 28);
        assert_eq!(CallingConvention::cleanup_bytes(2), 12);
    }

    #[test]
    fn test_chase_depth() {
        let mut asm = Asm::new();
        assert_eq!(CallingConvention::chase(&mut asm, 0), Reg::Ebp);
        assert!(asm.is_empty());

        assert_eq!(CallingConvention::chase(&mut asm, 3), Reg::Esi);
        assert_eq!(asm.count("mov esi, dword [esi]"), 3);
        assert_eq!(asm.count("mov esi, ebp"), 1);
    }

    #[test]
    fn test_call_pushes_in_reverse_then_link() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let entry = session.mint_label("f");

        let mut asm = Asm::new();
        let staged = [StackSlot::new(0, 4), StackSlot::new(4, 4)];
        CallingConvention::call(&mut asm, &staged, 1, entry);

        let lines: Vec<&str> = asm.as_str().lines().map(str::trim).collect();
        assert_eq!(
            lines,
            vec![
                "push dword [ebp-8]",
                "push dword [ebp-4]",
                "mov esi, ebp",
                "mov esi, dword [esi]",
                "push esi",
                "call L0_f",
                "add esp, 12",
            ]
        );
    }

    #[test]
    fn test_function_frame_shape() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let size = session.mint_label("frame");

        let mut asm = Asm::new();
        CallingConvention::function_prologue(&mut asm, size);
        CallingConvention::function_epilogue(&mut asm);
        assert!(asm.as_str().contains("push dword [esp+8]"));
        assert!(asm.as_str().contains("sub esp, L0_frame"));
        assert!(asm.as_str().contains("mov ecx, L0_frame / 4"));
        assert!(asm.as_str().contains("lea esp, [ebp+4]"));
        assert!(asm.as_str().ends_with("    ret\n"));
    }
}
