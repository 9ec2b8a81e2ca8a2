// This module groups everything specific to the 32-bit x86 target: the typed NASM text
// emitter and the frame/calling convention. The scope tree and ownership model in `core`
// are target-neutral; only this module knows that a lookup depth becomes a chain of
// `[ebp]` dereferences and that a deallocation is an `munmap` system call.

//! 32-bit x86 target support.

pub mod calling_convention;
pub mod emitter;

pub use calling_convention::CallingConvention;
pub use emitter::{Asm, Cond, Mem, Reg, Width};
