//! kuc - code-generation backend of the ku language.
//!
//! kuc lowers a typed AST into 32-bit x86 NASM assembly for Linux in a single
//! depth-first pass. Scope resolution, type checking and arity checks happen
//! during that pass; the first semantic error aborts it with a located
//! [`CompileError`]. Every lexical scope becomes a stack frame, and heap strings
//! are reclaimed when the scope that owns them is left.
//!
//! # Primary Usage
//!
//! ```ignore
//! use kuc::ast::{Node, Program};
//! use kuc::core::ScalarType;
//!
//! let program = Program::new(vec![
//!     Node::declare("greeting", ScalarType::String, Some(Node::string("hi"))),
//!     Node::call("out", vec![Node::var("greeting")]),
//! ]);
//! let asm = kuc::compile_program(&program)?;
//! ```
//!
//! # Architecture
//!
//! - [`ast`] - The AST handed over by the frontend
//! - [`core`] - Shared infrastructure (session, scopes, labels, ownership, errors)
//! - [`x86`] - Instruction emission and the frame/calling convention
//! - [`codegen`] - The lowering pass
//! - [`builtins`] - Runtime primitives registered in the root scope

pub mod ast;
pub mod builtins;
pub mod codegen;
pub mod core;
pub mod x86;

pub use crate::ast::{Node, NodeKind, Program};
pub use crate::codegen::{compile_program, compile_with_options, Assembly, Codegen, CompileOptions};
pub use crate::core::{CompilationSession, CompileError, CompileResult, ScalarType, SessionStats};
