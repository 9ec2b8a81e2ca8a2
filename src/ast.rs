// This module defines the abstract syntax tree consumed by the code generator. The tree is
// produced by an external frontend and is read-only to the backend. Every node pairs a
// NodeKind with the source Location it was parsed from so diagnostics can point at it.
// The node kinds cover literals (number, decimal, char, string, bool), variable references,
// binary operations, signed prefixes, pre/post increment and decrement, calls, function
// declarations, variable declaration and assignment, memory-address assignment, address-of,
// dereferencing and immediate casts, conditionals, while and for loops, break/continue,
// return and include. The whole tree derives serde traits with an internally tagged `type`
// field so the driver can accept a frontend's JSON output directly. Small constructor
// helpers keep hand-written trees in tests readable.

//! Typed AST handed to the backend by the frontend.

use crate::core::types::ScalarType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Source position of a node. `0:0` marks generated code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub col: u32,
}

impl Location {
    pub const fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }

    /// Location used for nodes synthesised by the backend itself.
    pub const fn internal() -> Self {
        Self { line: 0, col: 0 }
    }

    pub fn is_internal(&self) -> bool {
        self.line == 0
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_internal() {
            f.write_str("<internal>")
        } else {
            write!(f, "{}:{}", self.line, self.col)
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
    #[serde(rename = "%")]
    Rem,
    #[serde(rename = "&&")]
    And,
    #[serde(rename = "||")]
    Or,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl BinaryOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
        }
    }

    pub const fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem
        )
    }

    pub const fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    pub const fn is_equality(self) -> bool {
        matches!(self, BinaryOp::Eq | BinaryOp::Ne)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Sign of a signed prefix expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sign {
    #[serde(rename = "+")]
    Plus,
    #[serde(rename = "-")]
    Minus,
}

impl Sign {
    pub const fn symbol(self) -> &'static str {
        match self {
            Sign::Plus => "+",
            Sign::Minus => "-",
        }
    }
}

/// Direction of an increment/decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOp {
    Increment,
    Decrement,
}

impl StepOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            StepOp::Increment => "++",
            StepOp::Decrement => "--",
        }
    }
}

/// Whether an increment/decrement yields the old or the new value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fixity {
    Prefix,
    Postfix,
}

/// How a cast treats its operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CastMode {
    /// Read a value of the target type from the address the operand evaluates to.
    Deref,
    /// Reinterpret the operand's own bits as the target type.
    Immediate,
}

/// A declared function parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: ScalarType,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: ScalarType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// The `else` arm of a conditional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElseBranch {
    /// `else if ...`, continuing the chain.
    If(Box<Node>),
    /// A plain `else { ... }` block.
    Block(Vec<Node>),
}

/// An AST node with its source location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default)]
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Number {
        value: i32,
    },
    Decimal {
        value: f32,
    },
    Char {
        value: u8,
    },
    Str {
        value: String,
    },
    Bool {
        value: bool,
    },
    Var {
        name: String,
    },
    Binary {
        op: BinaryOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    Signed {
        sign: Sign,
        value: Box<Node>,
    },
    Step {
        name: String,
        op: StepOp,
        fixity: Fixity,
    },
    Call {
        name: String,
        args: Vec<Node>,
    },
    Function {
        name: String,
        params: Vec<Param>,
        ret: ScalarType,
        body: Vec<Node>,
    },
    Declare {
        name: String,
        ty: ScalarType,
        value: Option<Box<Node>>,
    },
    Assign {
        name: String,
        value: Box<Node>,
    },
    MemoryAssign {
        address: Box<Node>,
        value: Box<Node>,
    },
    AddressOf {
        name: String,
    },
    Cast {
        value: Box<Node>,
        ty: ScalarType,
        mode: CastMode,
    },
    If {
        condition: Box<Node>,
        then: Vec<Node>,
        otherwise: Option<ElseBranch>,
    },
    While {
        condition: Box<Node>,
        body: Vec<Node>,
    },
    For {
        init: Box<Node>,
        condition: Box<Node>,
        step: Box<Node>,
        body: Vec<Node>,
    },
    Break,
    Continue,
    Return {
        value: Option<Box<Node>>,
    },
    Include {
        path: String,
        program: Vec<Node>,
    },
}

impl NodeKind {
    /// Short name used in diagnostics.
    pub const fn name(&self) -> &'static str {
        match self {
            NodeKind::Number { .. } => "number",
            NodeKind::Decimal { .. } => "decimal",
            NodeKind::Char { .. } => "char",
            NodeKind::Str { .. } => "string",
            NodeKind::Bool { .. } => "bool",
            NodeKind::Var { .. } => "var",
            NodeKind::Binary { .. } => "binary",
            NodeKind::Signed { .. } => "signed",
            NodeKind::Step { .. } => "step",
            NodeKind::Call { .. } => "call",
            NodeKind::Function { .. } => "function",
            NodeKind::Declare { .. } => "declare",
            NodeKind::Assign { .. } => "assign",
            NodeKind::MemoryAssign { .. } => "memory_assign",
            NodeKind::AddressOf { .. } => "address_of",
            NodeKind::Cast { .. } => "cast",
            NodeKind::If { .. } => "if",
            NodeKind::While { .. } => "while",
            NodeKind::For { .. } => "for",
            NodeKind::Break => "break",
            NodeKind::Continue => "continue",
            NodeKind::Return { .. } => "return",
            NodeKind::Include { .. } => "include",
        }
    }
}

/// A whole compilation unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub body: Vec<Node>,
}

impl Program {
    pub fn new(body: Vec<Node>) -> Self {
        Self { body }
    }
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            location: Location::internal(),
        }
    }

    /// Attach a source location.
    pub fn at(mut self, line: u32, col: u32) -> Self {
        self.location = Location::new(line, col);
        self
    }

    pub fn num(value: i32) -> Self {
        Self::new(NodeKind::Number { value })
    }

    pub fn dec(value: f32) -> Self {
        Self::new(NodeKind::Decimal { value })
    }

    pub fn chr(value: u8) -> Self {
        Self::new(NodeKind::Char { value })
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(NodeKind::Str {
            value: value.into(),
        })
    }

    pub fn boolean(value: bool) -> Self {
        Self::new(NodeKind::Bool { value })
    }

    pub fn var(name: impl Into<String>) -> Self {
        Self::new(NodeKind::Var { name: name.into() })
    }

    pub fn binary(op: BinaryOp, left: Node, right: Node) -> Self {
        Self::new(NodeKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn signed(sign: Sign, value: Node) -> Self {
        Self::new(NodeKind::Signed {
            sign,
            value: Box::new(value),
        })
    }

    pub fn step(name: impl Into<String>, op: StepOp, fixity: Fixity) -> Self {
        Self::new(NodeKind::Step {
            name: name.into(),
            op,
            fixity,
        })
    }

    pub fn call(name: impl Into<String>, args: Vec<Node>) -> Self {
        Self::new(NodeKind::Call {
            name: name.into(),
            args,
        })
    }

    pub fn function(
        name: impl Into<String>,
        params: Vec<Param>,
        ret: ScalarType,
        body: Vec<Node>,
    ) -> Self {
        Self::new(NodeKind::Function {
            name: name.into(),
            params,
            ret,
            body,
        })
    }

    pub fn declare(name: impl Into<String>, ty: ScalarType, value: Option<Node>) -> Self {
        Self::new(NodeKind::Declare {
            name: name.into(),
            ty,
            value: value.map(Box::new),
        })
    }

    pub fn assign(name: impl Into<String>, value: Node) -> Self {
        Self::new(NodeKind::Assign {
            name: name.into(),
            value: Box::new(value),
        })
    }

    pub fn memory_assign(address: Node, value: Node) -> Self {
        Self::new(NodeKind::MemoryAssign {
            address: Box::new(address),
            value: Box::new(value),
        })
    }

    pub fn address_of(name: impl Into<String>) -> Self {
        Self::new(NodeKind::AddressOf { name: name.into() })
    }

    pub fn cast(value: Node, ty: ScalarType, mode: CastMode) -> Self {
        Self::new(NodeKind::Cast {
            value: Box::new(value),
            ty,
            mode,
        })
    }

    pub fn if_else(condition: Node, then: Vec<Node>, otherwise: Option<ElseBranch>) -> Self {
        Self::new(NodeKind::If {
            condition: Box::new(condition),
            then,
            otherwise,
        })
    }

    pub fn while_loop(condition: Node, body: Vec<Node>) -> Self {
        Self::new(NodeKind::While {
            condition: Box::new(condition),
            body,
        })
    }

    pub fn for_loop(init: Node, condition: Node, step: Node, body: Vec<Node>) -> Self {
        Self::new(NodeKind::For {
            init: Box::new(init),
            condition: Box::new(condition),
            step: Box::new(step),
            body,
        })
    }

    pub fn brk() -> Self {
        Self::new(NodeKind::Break)
    }

    pub fn cont() -> Self {
        Self::new(NodeKind::Continue)
    }

    pub fn ret(value: Option<Node>) -> Self {
        Self::new(NodeKind::Return {
            value: value.map(Box::new),
        })
    }

    pub fn include(path: impl Into<String>, program: Vec<Node>) -> Self {
        Self::new(NodeKind::Include {
            path: path.into(),
            program,
        })
    }
}
