// Declarations, assignments, raw memory stores and includes. A declaration lowers its
// initializer in the enclosing scope first, so `:x/num = x` reads an outer `x`, and only
// then reserves the new slot; a declaration without initializer stores the type's zero value,
// which for strings is the empty literal. Heap-typed slots keep a companion size cell and one
// reclamation-id for their whole lifetime. Assigning a heap value frees the slot's old value
// (guarded by its size) before storing the new one; assigning a variable to itself is a
// no-op. Includes are lowered inline in the current scope, once per path.

use super::{zero_value, Codegen};
use crate::ast::{Location, Node};
use crate::core::error::{CompileError, CompileResult};
use crate::core::ownership::{Ownership, StagedEntry};
use crate::core::types::ScalarType;
use crate::x86::calling_convention::CallingConvention;
use crate::x86::emitter::{Asm, Mem, Reg, Width};

impl<'s, 'arena> Codegen<'s, 'arena> {
    pub(super) fn lower_declare(
        &mut self,
        name: &str,
        ty: ScalarType,
        value: Option<&Node>,
        location: Location,
    ) -> CompileResult<()> {
        let implicit = zero_value(ty);
        let lowered = self.lower_expr_as(value.unwrap_or(&implicit), ty)?;

        let name = self.session.intern_str(name);
        let var = self
            .scopes
            .get_mut(self.current)
            .declare_var(name, ty, location)?;

        let mut code = Asm::new();
        self.comment(&mut code, format_args!(":{name}/{ty}"));
        code.append(lowered.code);
        code.store(Mem::frame(var.slot()), Reg::Eax);
        if let Some(size_cell) = var.size_cell {
            let id = self
                .take_ownership(&mut code, lowered.ownership, name, location)
                .unwrap_or_else(|| self.session.mint_reclaim_id());
            code.store(Mem::frame(size_cell), Reg::Edx);
            if let Some(slot) = self.scopes.get_mut(self.current).var_mut(name) {
                slot.reclaim = Some(id);
            }
        }
        self.out().append(code);
        Ok(())
    }

    pub(super) fn lower_assign(&mut self, name: &str, value: &Node, location: Location) -> CompileResult<()> {
        let (resolved, var) = self.resolve_var(name, location)?;
        let lowered = self.lower_expr_as(value, var.ty)?;

        let Some(size_cell) = var.size_cell else {
            let mut code = lowered.code;
            let base = CallingConvention::chase(&mut code, resolved.depth);
            code.store(Mem::based(base, var.slot()), Reg::Eax);
            self.out().append(code);
            return Ok(());
        };

        if let (Ownership::Borrowed(id), Some(own)) = (&lowered.ownership, var.reclaim) {
            if *id == own {
                let mut code = Asm::new();
                self.comment(&mut code, format_args!("`{name}` assigned to itself"));
                self.out().append(code);
                return Ok(());
            }
        }

        let mut code = lowered.code;
        self.take_ownership(&mut code, lowered.ownership, name, location);
        code.push(Reg::Eax);
        code.push(Reg::Edx);
        let base = CallingConvention::chase(&mut code, resolved.depth);
        let entry = StagedEntry {
            address: var.slot(),
            size: size_cell,
        };
        if let Some(old) = var.reclaim {
            self.emit_free(&mut code, base, old, entry);
        }
        code.pop(Reg::Edx);
        code.pop(Reg::Eax);
        code.store(Mem::based(base, entry.address), Reg::Eax);
        code.store(Mem::based(base, entry.size), Reg::Edx);
        self.out().append(code);
        Ok(())
    }

    pub(super) fn lower_memory_assign(
        &mut self,
        address: &Node,
        value: &Node,
        location: Location,
    ) -> CompileResult<()> {
        let target = self.lower_expr(address)?;
        if target.ty != ScalarType::Integer {
            return Err(CompileError::InvalidMemoryTarget {
                found: target.ty,
                location,
            });
        }
        let stored = self.lower_expr(value)?;

        let mut code = target.code;
        code.push(Reg::Eax);
        code.append(stored.code);
        code.pop(Reg::Ecx);
        code.store(Mem::new(Reg::Ecx, 0, Width::of(stored.ty)), Reg::Eax);
        self.out().append(code);
        Ok(())
    }

    pub(super) fn lower_include(&mut self, path: &str, program: &[Node]) -> CompileResult<()> {
        if !self.session.mark_included(path) {
            log::debug!("`{path}` already included");
            return Ok(());
        }
        let mut code = Asm::new();
        self.comment(&mut code, format_args!("include {path}"));
        self.out().append(code);
        self.lower_statements(program)?;
        Ok(())
    }
}
