// Call sites and function declarations. Arguments are lowered one by one and each value is
// parked in a fresh staging slot of the caller's frame before the next argument is
// evaluated; only when all of them are staged are they pushed, last to first, followed by
// the static link and the call. A call that yields a string hands back an owned buffer in
// EAX with its size in EDX, which the caller registers in its own free set.
//
// A declaration is emitted as: a jump over the body, the entry label, the function frame
// prologue, one local per parameter copied from the caller's pushes, the body, an implicit
// `ret` of the zero value, and the shared return label that loads the result slots and
// tears the frame down. Heap parameters own a reclamation-id from the start with a size of
// 0, so the caller's buffer is never freed by the callee. Built-ins take exactly the same
// route with a native body generator instead of statements.

use super::{zero_value, Codegen, Lowered};
use crate::ast::{Location, Node, Param};
use crate::builtins::{Builtin, NativeCtx};
use crate::core::error::{CompileError, CompileResult, SymbolKind};
use crate::core::ownership::Ownership;
use crate::core::scope::{FuncDescriptor, FunctionMarker, ParamDesc, StackSlot};
use crate::core::sections::Section;
use crate::core::types::ScalarType;
use crate::x86::calling_convention::CallingConvention;
use crate::x86::emitter::{Asm, Mem, Reg};

/// What a function declaration lowers as its body.
pub(crate) enum Body<'b> {
    /// Parsed statements.
    Ast(&'b [Node]),
    /// A generator emitting the body directly, leaving the result in EAX/EDX.
    Native(fn(&mut NativeCtx<'_, '_>)),
}

impl<'s, 'arena> Codegen<'s, 'arena> {
    pub(super) fn lower_call(&mut self, name: &str, args: &[Node], location: Location) -> CompileResult<Lowered> {
        let (resolved, desc) = self
            .scopes
            .lookup_function(self.current, name)
            .ok_or_else(|| CompileError::UnresolvedSymbol {
                kind: SymbolKind::Function,
                name: name.to_string(),
                location,
            })?;

        if args.len() < desc.params.len() {
            return Err(CompileError::ArityMismatch {
                name: name.to_string(),
                expected: desc.params.len(),
                found: args.len(),
                location,
            });
        }

        let mut lowered = Vec::with_capacity(args.len());
        for (index, arg) in args.iter().enumerate() {
            match desc.params.get(index) {
                Some(param) => lowered.push(self.lower_expr_as(arg, param.ty)?),
                None => {
                    log::warn!("{}: extra argument to `{}` is evaluated and discarded", arg.location, name);
                    lowered.push(self.lower_expr(arg)?);
                }
            }
        }
        Ok(self.emit_call(desc, resolved.depth, lowered))
    }

    /// Stage already type-checked arguments and call `desc`, declared `depth` scopes up.
    pub(super) fn emit_call(
        &mut self,
        desc: FuncDescriptor<'arena>,
        depth: usize,
        args: Vec<Lowered>,
    ) -> Lowered {
        let mut code = Asm::new();
        let mut staged: Vec<StackSlot> = Vec::with_capacity(desc.params.len());
        for (index, arg) in args.into_iter().enumerate() {
            code.append(arg.code);
            if index < desc.params.len() {
                let slot = self
                    .scopes
                    .get_mut(self.current)
                    .reserve(CallingConvention::ARG_BYTES);
                code.mov(Mem::frame(slot), Reg::Eax);
                staged.push(slot);
            }
        }

        self.comment(&mut code, format_args!("call {}", desc.name));
        CallingConvention::call(&mut code, &staged, depth, desc.entry);
        self.session.record_call_site(desc.name);

        let ownership = if desc.ret.is_heap() {
            Ownership::Fresh(self.register_fresh(&mut code))
        } else {
            Ownership::None
        };
        Lowered {
            ty: desc.ret,
            ownership,
            code,
        }
    }

    pub(super) fn lower_user_function(
        &mut self,
        name: &str,
        params: &[Param],
        ret: ScalarType,
        body: &[Node],
        location: Location,
    ) -> CompileResult<()> {
        let params: Vec<ParamDesc<'arena>> = params
            .iter()
            .map(|param| ParamDesc {
                name: self.session.intern_str(&param.name),
                ty: param.ty,
            })
            .collect();
        self.lower_function(name, &params, ret, Body::Ast(body), location)?;
        Ok(())
    }

    pub(super) fn lower_builtin(&mut self, builtin: &Builtin) -> CompileResult<FuncDescriptor<'arena>> {
        let params: Vec<ParamDesc<'arena>> = builtin
            .params
            .iter()
            .map(|&(name, ty)| ParamDesc {
                name: self.session.intern_str(name),
                ty,
            })
            .collect();
        self.lower_function(
            builtin.name,
            &params,
            builtin.ret,
            Body::Native(builtin.body),
            Location::internal(),
        )
    }

    /// Declare a function in the current scope and emit its body into the functions section.
    fn lower_function(
        &mut self,
        name: &str,
        params: &[ParamDesc<'arena>],
        ret: ScalarType,
        body: Body<'_>,
        location: Location,
    ) -> CompileResult<FuncDescriptor<'arena>> {
        let desc = FuncDescriptor {
            name: self.session.intern_str(name),
            ret,
            ret_size: ret.size(),
            params: self.session.alloc_slice(params),
            entry: self.session.mint_label(name),
            return_label: self.session.mint_label(&format!("ret_{name}")),
        };
        // Registered before the body so the function can call itself.
        self.scopes
            .get_mut(self.current)
            .declare_function(desc, location)?;

        let skip = self.session.mint_label(&format!("skip_{name}"));
        let saved_target = std::mem::replace(&mut self.target, Section::Functions);
        let declaring = self.current;

        let frame_size = self.session.mint_label("frame");
        let scope = self.scopes.push(Some(declaring), frame_size);
        self.session.record_scope_opened();
        let marker = {
            let body_scope = self.scopes.get_mut(scope);
            FunctionMarker {
                ret,
                return_label: desc.return_label,
                result: body_scope.reserve(4),
                result_size: body_scope.reserve(4),
            }
        };
        self.scopes.get_mut(scope).set_function_marker(marker);
        self.current = scope;

        let mut head = Asm::new();
        self.comment(&mut head, format_args!("fn {name}"));
        head.jmp(skip);
        head.label(desc.entry);
        CallingConvention::function_prologue(&mut head, frame_size);
        for (index, param) in params.iter().enumerate() {
            let var = self
                .scopes
                .get_mut(scope)
                .declare_var(param.name, param.ty, location)?;
            let incoming = Mem::dword(Reg::Ebp, CallingConvention::param_disp(index));
            head.mov(Reg::Eax, incoming);
            head.store(Mem::frame(var.slot()), Reg::Eax);
            // The size cell stays 0 from the zero-filled frame: the caller's buffer is
            // borrowed, but the slot gets an id so reassignments reclaim what they replace.
            if param.ty.is_heap() {
                let id = self.session.mint_reclaim_id();
                if let Some(slot) = self.scopes.get_mut(scope).var_mut(param.name) {
                    slot.reclaim = Some(id);
                }
            }
        }
        self.out().append(head);

        match body {
            Body::Ast(statements) => {
                let terminated = self.lower_statements(statements)?;
                if !terminated {
                    let implicit = zero_value(ret);
                    self.lower_return(Some(&implicit), location)?;
                }
            }
            Body::Native(generate) => {
                let param_slots: Vec<Mem> = params
                    .iter()
                    .filter_map(|param| self.scopes.get(scope).var(param.name))
                    .map(|var| Mem::frame(var.slot()))
                    .collect();
                let mut native = Asm::new();
                let mut ctx = NativeCtx::new(&mut native, &param_slots, self.session, &mut self.sections);
                generate(&mut ctx);
                native.store(Mem::frame(marker.result), Reg::Eax);
                if ret.is_heap() {
                    native.store(Mem::frame(marker.result_size), Reg::Edx);
                }
                self.out().append(native);
            }
        }

        let out = self.out();
        out.label(desc.return_label);
        out.mov(Reg::Eax, Mem::frame(marker.result));
        if ret.is_heap() {
            out.mov(Reg::Edx, Mem::frame(marker.result_size));
        }
        CallingConvention::function_epilogue(out);
        self.define_frame_size(scope);
        self.out().label(skip);

        self.current = declaring;
        self.target = saved_target;
        self.session.record_function_compiled(name);
        Ok(desc)
    }
}
