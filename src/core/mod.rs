// This module serves as the central hub for the backend's core infrastructure: the pieces
// every lowering step relies on regardless of which construct is being compiled. It
// exports and organizes session management (arena allocation, label and reclamation-id
// counters, include registry and statistics), the fixed scalar type set, the error
// taxonomy, labels, the three code sections with literal deduplication, the lexical
// scope tree with its variable and function tables, and the ownership model for
// heap-backed values. None of these components emit instructions on their own; they are
// the state the code generator threads through its single depth-first pass.

//! Core backend infrastructure.
//!
//! # Key Components
//!
//! ## Session Management (`session`)
//! - Arena-based memory allocation using `bumpalo`
//! - Label and reclamation-id counters, one set per compilation
//! - Compilation statistics
//!
//! ## Scopes (`scope`)
//! - Arena scope tree with parent links
//! - Variable slots, function descriptors, loop and function markers
//! - Lookup reporting the number of frames to chase
//!
//! ## Ownership (`ownership`)
//! - Reclamation-ids and the affine `Owned` handle
//! - Per-scope free sets flushed at scope exit
//!
//! ## Sections (`sections`)
//! - Data, functions and program streams
//! - String literal deduplication

pub mod error;
pub mod label;
pub mod ownership;
pub mod scope;
pub mod sections;
pub mod session;
pub mod types;

// Re-export core components
pub use error::{CompileError, CompileResult, SymbolKind};

pub use label::Label;

pub use ownership::{FreeSet, Owned, Ownership, ReclaimId, StagedEntry};

pub use scope::{
    FuncDescriptor,
    FunctionMarker,
    LoopMarker,
    ParamDesc,
    Resolved,
    Scope,
    ScopeId,
    ScopeTree,
    StackSlot,
    VarSlot,
};

pub use sections::{CodeSections, Section};

pub use session::{CompilationSession, SessionStats};

pub use types::ScalarType;
