// This module defines the error types of the kuc backend using the thiserror crate.
// CompileError is the single error enum of the code-generation pass and mirrors the
// semantic error taxonomy: unresolved symbols (variables, functions, loop and function
// markers), duplicate declarations in one scope, call arity mismatches, value type
// violations, binary operand mismatches, unsupported operator/type combinations,
// non-boolean conditions, non-numeric memory targets, node kinds that are not valid in
// the position they appear in, and memory accesses of an unsupported width. Every variant
// carries the Location of the offending node so the driver can print a located
// diagnostic. All errors are fatal: the pass stops at the first one and returns no
// partial assembly. CompileResult<T> is the convenience alias used throughout.

//! Error types for the kuc backend.

use crate::ast::{BinaryOp, Location};
use crate::core::types::ScalarType;
use std::fmt;
use thiserror::Error;

/// What kind of symbol a failed lookup or duplicate declaration refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Variable,
    Function,
    Loop,
    EnclosingFunction,
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolKind::Variable => f.write_str("variable"),
            SymbolKind::Function => f.write_str("function"),
            SymbolKind::Loop => f.write_str("enclosing loop"),
            SymbolKind::EnclosingFunction => f.write_str("enclosing function"),
        }
    }
}

/// Main error type of the code-generation pass.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("{location}: unresolved {kind} `{name}`")]
    UnresolvedSymbol {
        kind: SymbolKind,
        name: String,
        location: Location,
    },

    #[error("{location}: {kind} `{name}` is already declared in this scope")]
    DuplicateDeclaration {
        kind: SymbolKind,
        name: String,
        location: Location,
    },

    #[error("{location}: function `{name}` expects {expected} argument(s), got {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
        location: Location,
    },

    #[error("{location}: expected a value of type `{expected}`, found `{found}`")]
    InvalidValueType {
        expected: ScalarType,
        found: ScalarType,
        location: Location,
    },

    #[error("{location}: operands of `{op}` have different types (`{left}` and `{right}`)")]
    BinaryTypeMismatch {
        op: BinaryOp,
        left: ScalarType,
        right: ScalarType,
        location: Location,
    },

    #[error("{location}: operator `{op}` is not supported for type `{ty}`")]
    UnsupportedOperation {
        op: &'static str,
        ty: ScalarType,
        location: Location,
    },

    #[error("{location}: condition must be `bol`, found `{found}`")]
    StatementNotBoolean {
        found: ScalarType,
        location: Location,
    },

    #[error("{location}: memory target must be a `num` address, found `{found}`")]
    InvalidMemoryTarget {
        found: ScalarType,
        location: Location,
    },

    #[error("{location}: `{kind}` node is not valid in {context} position")]
    UnknownNodeKind {
        kind: &'static str,
        context: &'static str,
        location: Location,
    },
}

impl CompileError {
    /// Source location of the offending node.
    pub fn location(&self) -> Location {
        match self {
            CompileError::UnresolvedSymbol { location, .. }
            | CompileError::DuplicateDeclaration { location, .. }
            | CompileError::ArityMismatch { location, .. }
            | CompileError::InvalidValueType { location, .. }
            | CompileError::BinaryTypeMismatch { location, .. }
            | CompileError::UnsupportedOperation { location, .. }
            | CompileError::StatementNotBoolean { location, .. }
            | CompileError::InvalidMemoryTarget { location, .. }
            | CompileError::UnknownNodeKind { location, .. } => *location,
        }
    }
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_location() {
        let err = CompileError::UnresolvedSymbol {
            kind: SymbolKind::Variable,
            name: "x".to_string(),
            location: Location::new(3, 14),
        };
        assert_eq!(err.to_string(), "3:14: unresolved variable `x`");
        assert_eq!(err.location(), Location::new(3, 14));
    }

    #[test]
    fn test_binary_mismatch_message() {
        let err = CompileError::BinaryTypeMismatch {
            op: BinaryOp::Add,
            left: ScalarType::String,
            right: ScalarType::Integer,
            location: Location::new(1, 5),
        };
        assert_eq!(
            err.to_string(),
            "1:5: operands of `+` have different types (`str` and `num`)"
        );
    }
}
