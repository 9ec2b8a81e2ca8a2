// Ownership bookkeeping and deallocation sweeps. A call returning a string (user function,
// concatenation, built-in) produces a fresh heap value: it is given a reclamation-id and
// its address and size are stored into two staging slots of the current scope, whose free
// set records them. Binding the value to a variable moves it out of the free set; from
// then on the variable's own slot and size cell describe it. Every heap-typed local owns
// exactly one reclamation-id for its lifetime, and its size cell says at run time whether
// there is anything to free (0 for literals, borrows and never-written slots).
//
// A sweep is emitted wherever a frame is left: normal block exit, and every frame crossed
// by `break`, `continue` and `ret`. It is computed afresh at each site from the scope's
// free set plus its owning slots, so early exits never depend on staging done on another
// path. Each entry becomes one guarded `munmap`, skipped at run time when the recorded size
// is 0. Exclusions protect a value in flight (the returned value); they never modify the
// free set, so other exits of the same scope still reclaim it.

use super::Codegen;
use crate::ast::Location;
use crate::core::ownership::{FreeSet, Owned, Ownership, ReclaimId, StagedEntry};
use crate::core::scope::ScopeId;
use crate::x86::calling_convention::CallingConvention;
use crate::x86::emitter::{Asm, Cond, Mem, Reg};

impl<'s, 'arena> Codegen<'s, 'arena> {
    /// Register the heap value in EAX/EDX in the current scope's free set.
    pub(super) fn register_fresh(&mut self, code: &mut Asm) -> Owned {
        let id = self.session.mint_reclaim_id();
        let scope = self.scopes.get_mut(self.current);
        let entry = StagedEntry {
            address: scope.reserve(4),
            size: scope.reserve(4),
        };
        scope.free_set_mut().stage(id, entry);

        code.store(Mem::frame(entry.address), Reg::Eax);
        code.store(Mem::frame(entry.size), Reg::Edx);
        self.comment(code, format_args!("owns {id}"));
        Owned::new(id)
    }

    /// Settle what a binding takes over from the value in EAX/EDX.
    ///
    /// A fresh value leaves the current free set and its id is returned; anything else is
    /// stored as a borrow with a size of 0.
    pub(super) fn take_ownership(
        &mut self,
        code: &mut Asm,
        ownership: Ownership,
        name: &str,
        location: Location,
    ) -> Option<ReclaimId> {
        match ownership {
            Ownership::Fresh(owned) => {
                let id = owned.into_id();
                self.scopes
                    .get_mut(self.current)
                    .free_set_mut()
                    .remove(id);
                log::debug!("{location}: `{name}` takes ownership of {id}");
                Some(id)
            }
            Ownership::Borrowed(id) => {
                log::warn!(
                    "{location}: `{name}` aliases a heap value owned elsewhere ({id}); \
                     the binding borrows it and will not reclaim it"
                );
                code.xor(Reg::Edx, Reg::Edx);
                None
            }
            Ownership::None => {
                code.xor(Reg::Edx, Reg::Edx);
                None
            }
        }
    }

    /// Pending deallocations of `scope`: its free set plus every owning slot.
    pub(super) fn pending_frees(&self, scope: ScopeId) -> FreeSet {
        let scope = self.scopes.get(scope);
        let mut pending = scope.free_set().clone();
        for var in scope.owning_slots() {
            if let (Some(id), Some(size)) = (var.reclaim, var.size_cell) {
                pending.stage(
                    id,
                    StagedEntry {
                        address: var.slot(),
                        size,
                    },
                );
            }
        }
        pending
    }

    /// Emit one guarded deallocation per pending entry of `scope`, minus `exclude`.
    ///
    /// `ebp` must point at the frame of `scope`.
    pub(super) fn emit_sweep(&mut self, scope: ScopeId, exclude: &[ReclaimId]) {
        let pending = self.pending_frees(scope);
        let mut code = Asm::new();
        for (id, entry) in pending.iter() {
            if exclude.contains(&id) {
                self.comment(&mut code, format_args!("keep {id}"));
                continue;
            }
            self.emit_free(&mut code, Reg::Ebp, id, entry);
        }
        self.out().append(code);
    }

    /// `munmap(address, size)` unless the recorded size is 0.
    pub(super) fn emit_free(&self, code: &mut Asm, base: Reg, id: ReclaimId, entry: StagedEntry) {
        let skip = self.session.mint_label("freed");
        self.comment(code, format_args!("free {id}"));
        code.mov(Reg::Ecx, Mem::based(base, entry.size));
        code.test(Reg::Ecx, Reg::Ecx);
        code.jcc(Cond::Z, skip);
        code.mov(Reg::Ebx, Mem::based(base, entry.address));
        code.mov(Reg::Eax, CallingConvention::SYS_MUNMAP);
        code.syscall();
        code.label(skip);
        self.session.record_deallocation();
    }
}
