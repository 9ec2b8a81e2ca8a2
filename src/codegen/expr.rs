// Expression lowering. Every expression becomes a Lowered descriptor: the static type,
// what the result carries in terms of heap ownership, and a code fragment that leaves the
// value in EAX (and, for strings, the byte size of an owned buffer in EDX, 0 otherwise).
// Type rules are enforced before any fragment is produced. Binary operands are evaluated
// left to right with the left value parked on the machine stack; integer arithmetic and
// comparisons run on EAX/ECX, decimals are loaded onto the x87 stack, rounded to four
// fractional digits, combined, and stored back as a bit pattern. String `+` is a call to
// the `append` built-in, so concatenation goes through the ordinary calling convention and
// produces a fresh heap value like any other call. Logical operators evaluate both sides.

use super::Codegen;
use crate::ast::{BinaryOp, CastMode, Fixity, Location, Node, NodeKind, Sign, StepOp};
use crate::core::error::{CompileError, CompileResult, SymbolKind};
use crate::core::ownership::Ownership;
use crate::core::scope::{Resolved, VarSlot};
use crate::core::types::ScalarType;
use crate::x86::calling_convention::CallingConvention;
use crate::x86::emitter::{Asm, Cond, Mem, Reg, Width};

/// `10000.0f32`, the decimal rounding scale.
const DECIMAL_SCALE_BITS: u32 = 0x461c_4000;
/// `-1.0f32`.
const MINUS_ONE_BITS: u32 = 0xbf80_0000;

/// A lowered expression.
#[derive(Debug)]
pub struct Lowered {
    pub ty: ScalarType,
    pub ownership: Ownership,
    pub code: Asm,
}

impl Lowered {
    fn plain(ty: ScalarType, code: Asm) -> Self {
        Self {
            ty,
            ownership: Ownership::None,
            code,
        }
    }
}

impl<'s, 'arena> Codegen<'s, 'arena> {
    pub(super) fn lower_expr(&mut self, node: &Node) -> CompileResult<Lowered> {
        let location = node.location;
        match &node.kind {
            NodeKind::Number { value } => {
                let mut code = Asm::new();
                code.mov(Reg::Eax, value);
                Ok(Lowered::plain(ScalarType::Integer, code))
            }
            NodeKind::Decimal { value } => {
                let mut code = Asm::new();
                code.mov(Reg::Eax, format_args!("0x{:08x}", value.to_bits()));
                self.comment(&mut code, format_args!("dec {value}"));
                Ok(Lowered::plain(ScalarType::Decimal, code))
            }
            NodeKind::Char { value } => {
                let mut code = Asm::new();
                code.mov(Reg::Eax, value);
                Ok(Lowered::plain(ScalarType::Character, code))
            }
            NodeKind::Bool { value } => {
                let mut code = Asm::new();
                code.mov(Reg::Eax, u8::from(*value));
                Ok(Lowered::plain(ScalarType::Boolean, code))
            }
            NodeKind::Str { value } => {
                let label = self.sections.intern_literal(self.session, value);
                let mut code = Asm::new();
                code.mov(Reg::Eax, label);
                code.xor(Reg::Edx, Reg::Edx);
                Ok(Lowered::plain(ScalarType::String, code))
            }
            NodeKind::Var { name } => self.lower_var(name, location),
            NodeKind::Binary { op, left, right } => self.lower_binary(*op, left, right, location),
            NodeKind::Signed { sign, value } => self.lower_signed(*sign, value, location),
            NodeKind::Step { name, op, fixity } => self.lower_step(name, *op, *fixity, location),
            NodeKind::Call { name, args } => self.lower_call(name, args, location),
            NodeKind::AddressOf { name } => {
                let (resolved, var) = self.resolve_var(name, location)?;
                let mut code = Asm::new();
                let base = CallingConvention::chase(&mut code, resolved.depth);
                code.lea(Reg::Eax, Mem::based(base, var.slot()));
                Ok(Lowered::plain(ScalarType::Integer, code))
            }
            NodeKind::Cast { value, ty, mode } => self.lower_cast(value, *ty, *mode, location),
            other => Err(CompileError::UnknownNodeKind {
                kind: other.name(),
                context: "expression",
                location,
            }),
        }
    }

    /// Lower an expression that must have type `expected`.
    pub(super) fn lower_expr_as(
        &mut self,
        node: &Node,
        expected: ScalarType,
    ) -> CompileResult<Lowered> {
        let lowered = self.lower_expr(node)?;
        if lowered.ty != expected {
            return Err(CompileError::InvalidValueType {
                expected,
                found: lowered.ty,
                location: node.location,
            });
        }
        Ok(lowered)
    }

    pub(super) fn resolve_var(
        &self,
        name: &str,
        location: Location,
    ) -> CompileResult<(Resolved, VarSlot<'arena>)> {
        self.scopes
            .lookup_var(self.current, name)
            .ok_or_else(|| CompileError::UnresolvedSymbol {
                kind: SymbolKind::Variable,
                name: name.to_string(),
                location,
            })
    }

    fn lower_var(&mut self, name: &str, location: Location) -> CompileResult<Lowered> {
        let (resolved, var) = self.resolve_var(name, location)?;
        let mut code = Asm::new();
        let base = CallingConvention::chase(&mut code, resolved.depth);
        code.load(Reg::Eax, Mem::based(base, var.slot()));
        if let Some(size_cell) = var.size_cell {
            code.load(Reg::Edx, Mem::based(base, size_cell));
        }
        let ownership = match var.reclaim {
            Some(id) => Ownership::Borrowed(id),
            None => Ownership::None,
        };
        Ok(Lowered {
            ty: var.ty,
            ownership,
            code,
        })
    }

    fn lower_binary(
        &mut self,
        op: BinaryOp,
        left: &Node,
        right: &Node,
        location: Location,
    ) -> CompileResult<Lowered> {
        let lhs = self.lower_expr(left)?;
        let rhs = self.lower_expr(right)?;
        if lhs.ty != rhs.ty {
            return Err(CompileError::BinaryTypeMismatch {
                op,
                left: lhs.ty,
                right: rhs.ty,
                location,
            });
        }
        let ty = lhs.ty;

        if ty == ScalarType::String && op == BinaryOp::Add {
            return self.lower_concat(lhs, rhs, location);
        }

        let accepted = if op.is_arithmetic() {
            ty.is_arithmetic()
        } else if op.is_logical() {
            ty == ScalarType::Boolean
        } else if op.is_equality() {
            ty.is_equatable()
        } else {
            ty.is_ordered()
        };
        if !accepted {
            return Err(CompileError::UnsupportedOperation {
                op: op.symbol(),
                ty,
                location,
            });
        }

        let mut code = lhs.code;
        code.push(Reg::Eax);
        code.append(rhs.code);

        let result = if ty == ScalarType::Decimal {
            self.emit_decimal_binary(&mut code, op)
        } else {
            code.mov(Reg::Ecx, Reg::Eax);
            code.pop(Reg::Eax);
            emit_integer_binary(&mut code, op)
        };
        Ok(Lowered::plain(result.unwrap_or(ty), code))
    }

    fn lower_concat(&mut self, lhs: Lowered, rhs: Lowered, location: Location) -> CompileResult<Lowered> {
        let append = self.append.ok_or_else(|| CompileError::UnresolvedSymbol {
            kind: SymbolKind::Function,
            name: crate::builtins::APPEND.to_string(),
            location,
        })?;
        let depth = self.scopes.depth_to_root(self.current);
        Ok(self.emit_call(append, depth, vec![lhs, rhs]))
    }

    /// Combine `[esp+4] op [esp]` on the x87 stack. Returns the result type if not `dec`.
    fn emit_decimal_binary(&self, code: &mut Asm, op: BinaryOp) -> Option<ScalarType> {
        code.push(Reg::Eax);
        let left = Mem::dword(Reg::Esp, 4);
        let right = Mem::dword(Reg::Esp, 0);

        if op == BinaryOp::Rem {
            // fprem wants the dividend in st0
            load_rounded(code, right);
            load_rounded(code, left);
            let again = self.session.mint_label("fprem");
            code.label(again);
            code.op0("fprem");
            code.op1("fnstsw", "ax");
            code.op0("sahf");
            code.jcc(Cond::P, again);
            code.op1("fstp", "st1");
        } else {
            load_rounded(code, left);
            load_rounded(code, right);
            let mnemonic = match op {
                BinaryOp::Add => "faddp",
                BinaryOp::Sub => "fsubp",
                BinaryOp::Mul => "fmulp",
                BinaryOp::Div => "fdivp",
                _ => {
                    // st0 = right, st1 = left; compare left against right
                    code.op1("fxch", "st1");
                    code.op2("fcomip", "st0", "st1");
                    code.op1("fstp", "st0");
                    code.setcc(unsigned_cond(op), Reg::Eax);
                    code.movzx(Reg::Eax, Reg::Al);
                    code.add(Reg::Esp, 8);
                    return Some(ScalarType::Boolean);
                }
            };
            code.op2(mnemonic, "st1", "st0");
        }
        code.op1("fstp", left);
        code.add(Reg::Esp, 4);
        code.pop(Reg::Eax);
        None
    }

    fn lower_signed(&mut self, sign: Sign, value: &Node, location: Location) -> CompileResult<Lowered> {
        let inner = self.lower_expr(value)?;
        if !inner.ty.is_arithmetic() {
            return Err(CompileError::UnsupportedOperation {
                op: sign.symbol(),
                ty: inner.ty,
                location,
            });
        }
        let mut code = inner.code;
        match (sign, inner.ty) {
            (Sign::Plus, _) => {}
            (Sign::Minus, ScalarType::Decimal) => {
                code.push(Reg::Eax);
                code.op1("fld", Mem::dword(Reg::Esp, 0));
                code.push(format_args!("0x{MINUS_ONE_BITS:08x}"));
                code.op1("fmul", Mem::dword(Reg::Esp, 0));
                code.add(Reg::Esp, 4);
                code.op1("fstp", Mem::dword(Reg::Esp, 0));
                code.pop(Reg::Eax);
            }
            (Sign::Minus, _) => code.op1("neg", Reg::Eax),
        }
        Ok(Lowered::plain(inner.ty, code))
    }

    fn lower_step(
        &mut self,
        name: &str,
        op: StepOp,
        fixity: Fixity,
        location: Location,
    ) -> CompileResult<Lowered> {
        let (resolved, var) = self.resolve_var(name, location)?;
        if !matches!(var.ty, ScalarType::Integer | ScalarType::Character) {
            return Err(CompileError::UnsupportedOperation {
                op: op.symbol(),
                ty: var.ty,
                location,
            });
        }
        let mnemonic = match op {
            StepOp::Increment => "inc",
            StepOp::Decrement => "dec",
        };

        let mut code = Asm::new();
        let base = CallingConvention::chase(&mut code, resolved.depth);
        let slot = Mem::based(base, var.slot());
        match fixity {
            Fixity::Prefix => {
                code.op1(mnemonic, slot);
                code.load(Reg::Eax, slot);
            }
            Fixity::Postfix => {
                code.load(Reg::Eax, slot);
                code.op1(mnemonic, slot);
            }
        }
        Ok(Lowered::plain(var.ty, code))
    }

    fn lower_cast(
        &mut self,
        value: &Node,
        ty: ScalarType,
        mode: CastMode,
        location: Location,
    ) -> CompileResult<Lowered> {
        let inner = self.lower_expr(value)?;
        let mut code = inner.code;
        match mode {
            CastMode::Deref => {
                if !matches!(inner.ty, ScalarType::Integer | ScalarType::String) {
                    return Err(CompileError::InvalidValueType {
                        expected: ScalarType::Integer,
                        found: inner.ty,
                        location,
                    });
                }
                code.load(Reg::Eax, Mem::new(Reg::Eax, 0, Width::of(ty)));
            }
            CastMode::Immediate => {
                if ty.size() == 1 && inner.ty.size() != 1 {
                    code.movzx(Reg::Eax, Reg::Al);
                }
            }
        }
        if ty.is_heap() {
            code.xor(Reg::Edx, Reg::Edx);
        }
        Ok(Lowered::plain(ty, code))
    }
}

/// Integer, character and boolean operators on EAX (left) and ECX (right).
fn emit_integer_binary(code: &mut Asm, op: BinaryOp) -> Option<ScalarType> {
    match op {
        BinaryOp::Add => code.add(Reg::Eax, Reg::Ecx),
        BinaryOp::Sub => code.sub(Reg::Eax, Reg::Ecx),
        BinaryOp::Mul => code.op2("imul", Reg::Eax, Reg::Ecx),
        BinaryOp::Div | BinaryOp::Rem => {
            code.op0("cdq");
            code.op1("idiv", Reg::Ecx);
            if op == BinaryOp::Rem {
                code.mov(Reg::Eax, Reg::Edx);
            }
        }
        BinaryOp::And => code.op2("and", Reg::Eax, Reg::Ecx),
        BinaryOp::Or => code.op2("or", Reg::Eax, Reg::Ecx),
        _ => {
            code.cmp(Reg::Eax, Reg::Ecx);
            code.setcc(signed_cond(op), Reg::Eax);
            code.movzx(Reg::Eax, Reg::Al);
            return Some(ScalarType::Boolean);
        }
    }
    None
}

/// Push st0 = value at `src` rounded to four fractional digits.
fn load_rounded(code: &mut Asm, src: Mem) {
    code.op1("fld", src);
    code.push(format_args!("0x{DECIMAL_SCALE_BITS:08x}"));
    code.op1("fmul", Mem::dword(Reg::Esp, 0));
    code.op0("frndint");
    code.op1("fdiv", Mem::dword(Reg::Esp, 0));
    code.add(Reg::Esp, 4);
}

fn signed_cond(op: BinaryOp) -> Cond {
    match op {
        BinaryOp::Lt => Cond::L,
        BinaryOp::Gt => Cond::G,
        BinaryOp::Le => Cond::Le,
        BinaryOp::Ge => Cond::Ge,
        BinaryOp::Ne => Cond::Ne,
        _ => Cond::E,
    }
}

/// x87 comparisons report through CF/ZF like unsigned integer compares.
fn unsigned_cond(op: BinaryOp) -> Cond {
    match op {
        BinaryOp::Lt => Cond::B,
        BinaryOp::Gt => Cond::A,
        BinaryOp::Le => Cond::Be,
        BinaryOp::Ge => Cond::Ae,
        BinaryOp::Ne => Cond::Ne,
        _ => Cond::E,
    }
}
