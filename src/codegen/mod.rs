// This module implements the single depth-first code-generation pass. Codegen owns the
// three code sections and the scope tree, borrows the compilation session for labels,
// reclamation-ids and statistics, and tracks which scope and which section it is
// currently emitting into. Every block (program, function body, branch, loop body, for
// header) opens a scope that is realised as its own stack frame; closing it sweeps the
// scope's pending deallocations, tears the frame down and defines the frame-size symbol
// the prologue referenced. Expression lowering produces fragments that are only spliced
// into a section after type checking succeeded, so the first semantic error aborts the
// pass without emitting anything for the offending construct. Built-ins are registered in
// the root scope before the program is lowered, through the same declaration path as
// user functions.
//
// The submodules split the pass by concern: `expr` lowers expressions, `stmt` lowers
// declarations and stores, `control` lowers conditionals, loops and non-local exits,
// `call` holds the calling convention at call sites and function declarations, and
// `reclaim` holds the ownership bookkeeping and deallocation sweeps.

//! Lowering of a typed AST to 32-bit x86 assembly.

mod call;
mod control;
mod expr;
mod reclaim;
mod stmt;

pub use expr::Lowered;

use crate::ast::{Node, NodeKind, Program};
use crate::builtins::{self, BUILTINS};
use crate::core::error::{CompileError, CompileResult};
use crate::core::scope::{FuncDescriptor, ScopeId, ScopeTree};
use crate::core::sections::{CodeSections, Section};
use crate::core::session::{CompilationSession, SessionStats};
use crate::core::types::ScalarType;
use crate::x86::calling_convention::CallingConvention;
use crate::x86::emitter::{Asm, Reg};
use bumpalo::Bump;
use std::fmt::Display;

/// Configuration of one compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Annotate the output with `;` comments (frees, scope boundaries, literals).
    pub emit_comments: bool,
    /// Symbol of the process entry point.
    pub entry: String,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            emit_comments: true,
            entry: "_start".to_string(),
        }
    }
}

/// Output of a successful compilation.
#[derive(Debug, Clone)]
pub struct Assembly {
    /// Complete NASM translation unit.
    pub text: String,
    /// Statistics gathered during the pass.
    pub stats: SessionStats,
}

/// Compile a program with default options, returning the assembly text.
pub fn compile_program(program: &Program) -> CompileResult<String> {
    compile_with_options(program, CompileOptions::default()).map(|assembly| assembly.text)
}

/// Compile a program in a fresh session.
pub fn compile_with_options(program: &Program, options: CompileOptions) -> CompileResult<Assembly> {
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let codegen = Codegen::new(&session, options)?;
    let text = codegen.compile(program)?;
    Ok(Assembly {
        text,
        stats: session.stats(),
    })
}

/// The code generator.
pub struct Codegen<'s, 'arena> {
    session: &'s CompilationSession<'arena>,
    sections: CodeSections<'arena>,
    scopes: ScopeTree<'arena>,
    current: ScopeId,
    root: ScopeId,
    target: Section,
    options: CompileOptions,
    append: Option<FuncDescriptor<'arena>>,
    dup: Option<FuncDescriptor<'arena>>,
}

impl<'s, 'arena> Codegen<'s, 'arena> {
    /// Create a code generator with the built-in library registered in the root scope.
    pub fn new(session: &'s CompilationSession<'arena>, options: CompileOptions) -> CompileResult<Self> {
        let mut scopes = ScopeTree::new(session.arena());
        let root = scopes.push(None, session.mint_label("frame"));
        session.record_scope_opened();

        let mut codegen = Self {
            session,
            sections: CodeSections::new(),
            scopes,
            current: root,
            root,
            target: Section::Program,
            options,
            append: None,
            dup: None,
        };
        codegen.register_builtins()?;
        Ok(codegen)
    }

    fn register_builtins(&mut self) -> CompileResult<()> {
        for builtin in BUILTINS {
            let desc = self.lower_builtin(builtin)?;
            match builtin.name {
                builtins::APPEND => self.append = Some(desc),
                builtins::DUP => self.dup = Some(desc),
                _ => {}
            }
        }
        log::debug!("{} built-ins registered", BUILTINS.len());
        Ok(())
    }

    /// Lower a whole program and return the assembled text.
    pub fn compile(mut self, program: &Program) -> CompileResult<String> {
        let frame_size = self.scopes.get(self.root).frame_size_symbol();
        let mut prologue = Asm::new();
        self.comment(&mut prologue, "program scope");
        CallingConvention::block_prologue(&mut prologue, frame_size);
        self.out().append(prologue);

        let terminated = self.lower_statements(&program.body)?;
        if !terminated {
            self.exit_frame(self.root);
        }

        let out = self.out();
        out.mov(Reg::Eax, CallingConvention::SYS_EXIT);
        out.xor(Reg::Ebx, Reg::Ebx);
        out.syscall();
        self.define_frame_size(self.root);

        log::debug!("program lowered; {} scopes", self.scopes.len());
        Ok(self.sections.assemble(&self.options.entry))
    }

    /// Section currently receiving statements.
    fn out(&mut self) -> &mut Asm {
        self.sections.section_mut(self.target)
    }

    fn comment(&self, asm: &mut Asm, text: impl Display) {
        if self.options.emit_comments {
            asm.comment(text);
        }
    }

    /// Open a block scope under the current one and enter its frame.
    fn open_block(&mut self) -> ScopeId {
        let frame_size = self.session.mint_label("frame");
        let scope = self.scopes.push(Some(self.current), frame_size);
        self.session.record_scope_opened();
        CallingConvention::block_prologue(self.out(), frame_size);
        self.current = scope;
        scope
    }

    /// Leave the current block scope. `reachable` is false when the block ended in a jump.
    fn close_block(&mut self, reachable: bool) {
        let scope = self.current;
        if reachable {
            self.exit_frame(scope);
        }
        self.define_frame_size(scope);
        self.current = self.parent_of(scope);
    }

    /// Sweep a block scope and pop its frame. `ebp` must point at that frame.
    fn exit_frame(&mut self, scope: ScopeId) {
        self.emit_sweep(scope, &[]);
        CallingConvention::block_epilogue(self.out());
    }

    fn define_frame_size(&mut self, scope: ScopeId) {
        let scope = self.scopes.get(scope);
        let (symbol, bytes) = (scope.frame_size_symbol(), scope.frame_bytes());
        self.out().equ(symbol, bytes);
    }

    fn parent_of(&self, scope: ScopeId) -> ScopeId {
        self.scopes.get(scope).parent().unwrap_or(self.root)
    }

    /// Lower a statement list. Returns true when it ends in an unconditional jump.
    fn lower_statements(&mut self, body: &[Node]) -> CompileResult<bool> {
        let mut terminated = false;
        for node in body {
            terminated = self.lower_statement(node)?;
        }
        Ok(terminated)
    }

    fn lower_statement(&mut self, node: &Node) -> CompileResult<bool> {
        let location = node.location;
        match &node.kind {
            NodeKind::Function {
                name,
                params,
                ret,
                body,
            } => {
                self.lower_user_function(name, params, *ret, body, location)?;
            }
            NodeKind::Declare { name, ty, value } => {
                self.lower_declare(name, *ty, value.as_deref(), location)?;
            }
            NodeKind::Assign { name, value } => self.lower_assign(name, value, location)?,
            NodeKind::MemoryAssign { address, value } => {
                self.lower_memory_assign(address, value, location)?;
            }
            NodeKind::If {
                condition,
                then,
                otherwise,
            } => self.lower_if(condition, then, otherwise.as_ref(), None)?,
            NodeKind::While { condition, body } => self.lower_while(condition, body, &[])?,
            NodeKind::For {
                init,
                condition,
                step,
                body,
            } => self.lower_for(init, condition, step, body)?,
            NodeKind::Include { path, program } => self.lower_include(path, program)?,
            NodeKind::Break => {
                self.lower_break(location)?;
                return Ok(true);
            }
            NodeKind::Continue => {
                self.lower_continue(location)?;
                return Ok(true);
            }
            NodeKind::Return { value } => {
                self.lower_return(value.as_deref(), location)?;
                return Ok(true);
            }
            NodeKind::Call { .. } | NodeKind::Step { .. } => {
                let lowered = self.lower_expr(node)?;
                self.out().append(lowered.code);
            }
            other => {
                return Err(CompileError::UnknownNodeKind {
                    kind: other.name(),
                    context: "statement",
                    location,
                });
            }
        }
        Ok(false)
    }
}

/// Literal node holding the zero value of a type.
fn zero_value(ty: ScalarType) -> Node {
    match ty {
        ScalarType::Integer => Node::num(0),
        ScalarType::Decimal => Node::dec(0.0),
        ScalarType::Boolean => Node::boolean(false),
        ScalarType::Character => Node::chr(0),
        ScalarType::String => Node::string(""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Param};

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn compile(body: Vec<Node>) -> CompileResult<String> {
        init();
        compile_program(&Program::new(body))
    }

    #[test]
    fn test_empty_program_exits() {
        let asm = compile(vec![]).unwrap();
        assert!(asm.contains("_start:"));
        assert!(asm.contains("    mov eax, 1\n    xor ebx, ebx\n    int 0x80"));
        assert!(asm.contains("L0_frame equ 0"));
    }

    #[test]
    fn test_builtins_are_in_functions_section() {
        let asm = compile(vec![]).unwrap();
        let entry = asm.find("_start:").unwrap();
        for name in ["_len:", "_append:", "_slice:", "_syscall:", "_key:", "_out:", "_dup:"] {
            let at = asm.find(name).unwrap_or_else(|| panic!("missing {name}"));
            assert!(at < entry, "{name} emitted after the entry point");
        }
    }

    #[test]
    fn test_expression_in_statement_position_is_rejected() {
        let err = compile(vec![Node::num(1).at(3, 1)]).unwrap_err();
        assert_eq!(
            err,
            CompileError::UnknownNodeKind {
                kind: "number",
                context: "statement",
                location: crate::ast::Location::new(3, 1),
            }
        );
    }

    #[test]
    fn test_options_control_comments_and_entry() {
        init();
        let program = Program::new(vec![Node::declare(
            "s",
            ScalarType::String,
            Some(Node::string("x")),
        )]);
        let options = CompileOptions {
            emit_comments: false,
            entry: "main".to_string(),
        };
        let assembly = compile_with_options(&program, options).unwrap();
        assert!(assembly.text.contains("global main"));
        assert!(assembly.text.contains("\nmain:"));
        assert!(!assembly.text.contains("; free"));
        assert_eq!(assembly.stats.functions_compiled, BUILTINS.len());
    }

    #[test]
    fn test_recursive_function_resolves_itself() {
        let fact = Node::function(
            "fact",
            vec![Param::new("n", ScalarType::Integer)],
            ScalarType::Integer,
            vec![
                Node::if_else(
                    Node::binary(BinaryOp::Le, Node::var("n"), Node::num(1)),
                    vec![Node::ret(Some(Node::num(1)))],
                    None,
                ),
                Node::ret(Some(Node::binary(
                    BinaryOp::Mul,
                    Node::var("n"),
                    Node::call(
                        "fact",
                        vec![Node::binary(BinaryOp::Sub, Node::var("n"), Node::num(1))],
                    ),
                ))),
            ],
        );
        let asm = compile(vec![fact]).unwrap();
        assert!(asm
            .lines()
            .any(|line| line.trim_start().starts_with("call L") && line.ends_with("_fact")));
        assert!(asm.contains("imul eax, ecx"));
        assert!(asm.contains("_fact:"));
    }
}
