// Conditionals, loops and non-local exits. Each branch of an `if` and each iteration of a
// loop runs in its own frame; conditions of an `if` are evaluated in the enclosing scope,
// loop conditions inside the loop frame. `for` is a declaration scope around a `while`
// whose post statements are the step. `break`, `continue` and `ret` leave frames one at a
// time: sweep the scope, pop its frame, move to the parent, so the sweep of each scope runs
// while `ebp` still points at that scope's frame. `break` leaves the loop frame too,
// `continue` stops inside it, and `ret` stops at the function frame, whose teardown belongs
// to the shared return label.
//
// Returned strings must reach the caller as owned buffers. A value produced by a call is
// already owned; a local's value is kept out of the sweeps on the way out and copied only
// if it turns out to be a borrow at run time, which is always the case for a parameter that
// was never reassigned; anything else (literals, outer variables) is copied with `dup` first.

use super::{Codegen, Lowered};
use crate::ast::{ElseBranch, Location, Node, NodeKind};
use crate::core::error::{CompileError, CompileResult, SymbolKind};
use crate::core::label::Label;
use crate::core::ownership::{Ownership, ReclaimId};
use crate::core::scope::{LoopMarker, ScopeId};
use crate::core::types::ScalarType;
use crate::x86::calling_convention::CallingConvention;
use crate::x86::emitter::{Asm, Cond, Mem, Reg};

/// Whether a returned string has to be copied before it leaves the function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Duplicate {
    Never,
    IfBorrowed,
    Always,
}

impl<'s, 'arena> Codegen<'s, 'arena> {
    /// Lower a condition that must be boolean and jump to `target` when it is false.
    fn lower_branch_condition(&mut self, condition: &Node, target: Label<'arena>) -> CompileResult<()> {
        let lowered = self.lower_expr(condition)?;
        if lowered.ty != ScalarType::Boolean {
            return Err(CompileError::StatementNotBoolean {
                found: lowered.ty,
                location: condition.location,
            });
        }
        let mut code = lowered.code;
        code.test(Reg::Al, Reg::Al);
        code.jcc(Cond::Z, target);
        self.out().append(code);
        Ok(())
    }

    fn lower_block(&mut self, body: &[Node]) -> CompileResult<()> {
        self.open_block();
        let terminated = self.lower_statements(body)?;
        self.close_block(!terminated);
        Ok(())
    }

    /// Lower an `if`; an `else if` chain shares the first conditional's exit label.
    pub(super) fn lower_if(
        &mut self,
        condition: &Node,
        then: &[Node],
        otherwise: Option<&ElseBranch>,
        exit: Option<Label<'arena>>,
    ) -> CompileResult<()> {
        let exit = exit.unwrap_or_else(|| self.session.mint_label("if_exit"));
        let next = match otherwise {
            Some(_) => self.session.mint_label("if_else"),
            None => exit,
        };

        self.lower_branch_condition(condition, next)?;
        self.lower_block(then)?;

        let Some(otherwise) = otherwise else {
            self.out().label(exit);
            return Ok(());
        };
        let out = self.out();
        out.jmp(exit);
        out.label(next);
        match otherwise {
            ElseBranch::If(chained) => match &chained.kind {
                NodeKind::If {
                    condition,
                    then,
                    otherwise,
                } => self.lower_if(condition, then, otherwise.as_ref(), Some(exit)),
                other => Err(CompileError::UnknownNodeKind {
                    kind: other.name(),
                    context: "else-if",
                    location: chained.location,
                }),
            },
            ElseBranch::Block(body) => {
                self.lower_block(body)?;
                self.out().label(exit);
                Ok(())
            }
        }
    }

    /// Lower a `while` whose body is followed by `post` on every iteration.
    pub(super) fn lower_while(&mut self, condition: &Node, body: &[Node], post: &[Node]) -> CompileResult<()> {
        let marker = LoopMarker {
            top: self.session.mint_label("while_top"),
            continue_label: self.session.mint_label("while_continue"),
            exit: self.session.mint_label("while_exit"),
        };
        let done = self.session.mint_label("while_done");

        self.out().label(marker.top);
        let scope = self.open_block();
        self.scopes.get_mut(scope).set_loop_marker(marker);

        self.lower_branch_condition(condition, done)?;
        self.lower_statements(body)?;
        self.out().label(marker.continue_label);
        self.lower_statements(post)?;
        self.exit_frame(scope);
        self.out().jmp(marker.top);

        self.out().label(done);
        self.close_block(true);
        self.out().label(marker.exit);
        Ok(())
    }

    pub(super) fn lower_for(&mut self, init: &Node, condition: &Node, step: &Node, body: &[Node]) -> CompileResult<()> {
        self.open_block();
        self.lower_statement(init)?;
        self.lower_while(condition, body, std::slice::from_ref(step))?;
        self.close_block(true);
        Ok(())
    }

    fn enclosing_loop(&self, statement: &'static str, location: Location) -> CompileResult<(usize, LoopMarker<'arena>)> {
        let (resolved, marker) =
            self.scopes
                .lookup_loop(self.current)
                .ok_or_else(|| CompileError::UnresolvedSymbol {
                    kind: SymbolKind::Loop,
                    name: statement.to_string(),
                    location,
                })?;
        Ok((resolved.depth, marker))
    }

    pub(super) fn lower_break(&mut self, location: Location) -> CompileResult<()> {
        let (depth, marker) = self.enclosing_loop("break", location)?;
        self.unwind(depth + 1, &[]);
        self.out().jmp(marker.exit);
        Ok(())
    }

    pub(super) fn lower_continue(&mut self, location: Location) -> CompileResult<()> {
        let (depth, marker) = self.enclosing_loop("continue", location)?;
        self.unwind(depth, &[]);
        self.out().jmp(marker.continue_label);
        Ok(())
    }

    /// Sweep and pop `frames` frames, starting with the current scope.
    fn unwind(&mut self, frames: usize, exclude: &[ReclaimId]) {
        for scope in self.scopes.chain(self.current, frames).into_iter().take(frames) {
            self.exit_frame_excluding(scope, exclude);
        }
    }

    fn exit_frame_excluding(&mut self, scope: ScopeId, exclude: &[ReclaimId]) {
        self.emit_sweep(scope, exclude);
        CallingConvention::block_epilogue(self.out());
    }

    pub(super) fn lower_return(&mut self, value: Option<&Node>, location: Location) -> CompileResult<()> {
        let (resolved, marker) =
            self.scopes
                .lookup_function_marker(self.current)
                .ok_or_else(|| CompileError::UnresolvedSymbol {
                    kind: SymbolKind::EnclosingFunction,
                    name: "ret".to_string(),
                    location,
                })?;

        let implicit;
        let value = match value {
            Some(value) => value,
            None => {
                implicit = super::zero_value(marker.ret);
                &implicit
            }
        };
        let lowered = self.lower_expr_as(value, marker.ret)?;
        let chain = self.scopes.chain(self.current, resolved.depth);

        let mut exclude = Vec::new();
        let mut code = if marker.ret.is_heap() {
            let copy = match &lowered.ownership {
                Ownership::Fresh(owned) => {
                    exclude.push(owned.id());
                    Duplicate::Never
                }
                Ownership::Borrowed(id)
                    if chain.iter().any(|&scope| self.scopes.get(scope).owns(*id)) =>
                {
                    exclude.push(*id);
                    Duplicate::IfBorrowed
                }
                _ => Duplicate::Always,
            };
            self.owned_result(lowered, copy)
        } else {
            lowered.code
        };

        let base = CallingConvention::chase(&mut code, resolved.depth);
        code.mov(Mem::based(base, marker.result), Reg::Eax);
        if marker.ret.is_heap() {
            code.mov(Mem::based(base, marker.result_size), Reg::Edx);
        }
        self.out().append(code);

        self.unwind(resolved.depth, &exclude);
        self.emit_sweep(resolved.scope, &exclude);
        self.out().jmp(marker.return_label);
        Ok(())
    }

    /// Code leaving an owned copy of a returned string in EAX/EDX.
    fn owned_result(&mut self, lowered: Lowered, copy: Duplicate) -> Asm {
        let mut code = lowered.code;
        if copy == Duplicate::Never {
            return code;
        }
        let Some(dup) = self.dup else {
            return code;
        };
        let skip = self.session.mint_label("owned");
        if copy == Duplicate::IfBorrowed {
            code.test(Reg::Edx, Reg::Edx);
            code.jcc(Cond::Nz, skip);
        }
        let slot = self
            .scopes
            .get_mut(self.current)
            .reserve(CallingConvention::ARG_BYTES);
        code.mov(Mem::frame(slot), Reg::Eax);
        self.comment(&mut code, "copy returned string");
        CallingConvention::call(&mut code, &[slot], self.scopes.depth_to_root(self.current), dup.entry);
        self.session.record_call_site(dup.name);
        code.label(skip);
        code
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::{BinaryOp, ElseBranch, Node, Param, Program};
    use crate::codegen::compile_program;
    use crate::core::error::{CompileError, SymbolKind};
    use crate::core::types::ScalarType;

    fn compile(body: Vec<Node>) -> Result<String, CompileError> {
        let _ = env_logger::builder().is_test(true).try_init();
        compile_program(&Program::new(body))
    }

    fn program_section(asm: &str) -> &str {
        &asm[asm.find("_start:").unwrap_or(0)..]
    }

    #[test]
    fn test_condition_must_be_boolean() {
        let err = compile(vec![Node::if_else(Node::num(1).at(2, 4), vec![], None)]).unwrap_err();
        assert_eq!(
            err,
            CompileError::StatementNotBoolean {
                found: ScalarType::Integer,
                location: crate::ast::Location::new(2, 4),
            }
        );
        let err = compile(vec![Node::while_loop(Node::string("x"), vec![])]).unwrap_err();
        assert!(matches!(err, CompileError::StatementNotBoolean { .. }));
    }

    #[test]
    fn test_each_branch_gets_its_own_frame() {
        let asm = compile(vec![Node::if_else(
            Node::boolean(true),
            vec![Node::declare("a", ScalarType::Integer, None)],
            Some(ElseBranch::Block(vec![Node::declare("a", ScalarType::Integer, None)])),
        )])
        .unwrap();
        let program = program_section(&asm);
        // program scope plus two branches
        assert_eq!(program.matches("    push ebp\n    mov ebp, esp").count(), 3);
        assert_eq!(program.matches("    leave").count(), 3);
    }

    #[test]
    fn test_else_if_chain_shares_one_exit() {
        let asm = compile(vec![
            Node::declare("n", ScalarType::Integer, Some(Node::num(2))),
            Node::if_else(
                Node::binary(BinaryOp::Eq, Node::var("n"), Node::num(1)),
                vec![],
                Some(ElseBranch::If(Box::new(Node::if_else(
                    Node::binary(BinaryOp::Eq, Node::var("n"), Node::num(2)),
                    vec![],
                    Some(ElseBranch::Block(vec![])),
                )))),
            ),
        ])
        .unwrap();
        let exits: Vec<&str> = asm.lines().filter(|l| l.ends_with("_if_exit:")).collect();
        assert_eq!(exits.len(), 1);
        let exit = exits[0].trim_end_matches(':');
        assert_eq!(asm.matches(&format!("jmp {exit}\n")).count(), 2);
    }

    #[test]
    fn test_break_in_infinite_loop() {
        let asm = compile(vec![Node::while_loop(Node::boolean(true), vec![Node::brk()])]).unwrap();
        let exit = asm
            .lines()
            .find(|l| l.ends_with("_while_exit:"))
            .map(|l| l.trim_end_matches(':'))
            .unwrap();
        assert!(asm.contains(&format!("    leave\n    jmp {exit}\n")));
    }

    #[test]
    fn test_break_unwinds_inclusive_continue_exclusive() {
        let nested = |stmt: Node| {
            vec![Node::while_loop(
                Node::boolean(true),
                vec![Node::if_else(
                    Node::boolean(true),
                    vec![Node::if_else(Node::boolean(true), vec![stmt], None)],
                    None,
                )],
            )]
        };
        let leaves_before = |asm: &str, hint: &str| {
            let jump = asm.lines().position(|l| l.contains("jmp L") && l.ends_with(hint)).unwrap();
            asm.lines()
                .take(jump)
                .collect::<Vec<_>>()
                .iter()
                .rev()
                .take_while(|l| !l.contains("test al, al"))
                .filter(|l| l.trim() == "leave")
                .count()
        };

        let asm = compile(nested(Node::brk())).unwrap();
        assert_eq!(leaves_before(&asm, "_while_exit"), 3);

        let asm = compile(nested(Node::cont())).unwrap();
        assert_eq!(leaves_before(&asm, "_while_continue"), 2);
    }

    #[test]
    fn test_break_outside_loop() {
        let err = compile(vec![Node::brk()]).unwrap_err();
        assert!(matches!(err, CompileError::UnresolvedSymbol { kind: SymbolKind::Loop, .. }));
    }

    #[test]
    fn test_break_does_not_cross_function_boundary() {
        let err = compile(vec![Node::while_loop(
            Node::boolean(true),
            vec![Node::function("f", vec![], ScalarType::Integer, vec![Node::brk()])],
        )])
        .unwrap_err();
        assert!(matches!(err, CompileError::UnresolvedSymbol { kind: SymbolKind::Loop, .. }));
    }

    #[test]
    fn test_return_outside_function() {
        let err = compile(vec![Node::ret(None)]).unwrap_err();
        assert!(matches!(
            err,
            CompileError::UnresolvedSymbol { kind: SymbolKind::EnclosingFunction, .. }
        ));
    }

    #[test]
    fn test_return_type_is_checked() {
        let err = compile(vec![Node::function(
            "f",
            vec![],
            ScalarType::Boolean,
            vec![Node::ret(Some(Node::num(1)))],
        )])
        .unwrap_err();
        assert!(matches!(
            err,
            CompileError::InvalidValueType { expected: ScalarType::Boolean, .. }
        ));
    }

    #[test]
    fn test_for_runs_step_at_continue_label() {
        let asm = compile(vec![Node::for_loop(
            Node::declare("i", ScalarType::Integer, Some(Node::num(0))),
            Node::binary(BinaryOp::Lt, Node::var("i"), Node::num(10)),
            Node::step("i", crate::ast::StepOp::Increment, crate::ast::Fixity::Prefix),
            vec![Node::cont()],
        )])
        .unwrap();
        let cont = asm.find("_while_continue:").unwrap();
        let step = asm.find("inc dword [esi-4]").unwrap();
        assert!(cont < step);
    }

    #[test]
    fn test_returning_a_literal_copies_it() {
        let asm = compile(vec![Node::function(
            "name",
            vec![],
            ScalarType::String,
            vec![Node::ret(Some(Node::string("ku")))],
        )])
        .unwrap();
        assert!(asm.contains("; copy returned string"));
    }

    #[test]
    fn test_returning_a_parameter_copies_it() {
        let asm = compile(vec![Node::function(
            "id",
            vec![Param::new("s", ScalarType::String)],
            ScalarType::String,
            vec![Node::ret(Some(Node::var("s")))],
        )])
        .unwrap();
        let body = &asm[asm.find("_id:").unwrap()..asm.find("_start:").unwrap()];
        // the parameter's size cell is 0, so the run-time check always copies
        let check = body.find("    test edx, edx\n").unwrap();
        assert!(check < body.find("; copy returned string").unwrap());
        assert_eq!(body.matches("; free #").count(), 0);
    }
}
