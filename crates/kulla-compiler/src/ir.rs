//! Resolved program form handed to the interpreter. Every name is already
//! bound to a local slot, a global, a field or a call key, and every operator
//! carries the operand kind picked by numeric promotion.

use crate::types::{ClassKind, Type};
use std::sync::Arc;

pub type Slot = usize;

#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    Int(i32),
    Long(i64),
    Double(f64),
    Bool(bool),
    Char(char),
    Str(Arc<str>),
    Null,
}

/// Operand kind of an arithmetic or bitwise operator after promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumKind {
    Int,
    Long,
    Double,
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arith {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    UShr,
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cmp {
    Lt,
    Gt,
    Le,
    Ge,
}

/// Primitive conversion target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Prim {
    Int,
    Long,
    Double,
    Char,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Place {
    Local(Slot),
    Global(String),
    StaticField { class: Arc<str>, name: String },
    Field { target: Expr, name: String },
    Index { target: Expr, index: Expr },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Callee {
    /// Top-level method, bound late by key.
    Global { name: String, sig: String },
    Static {
        class: Arc<str>,
        name: String,
        sig: String,
    },
    Virtual {
        target: Expr,
        name: String,
        sig: String,
    },
    /// `super.name(...)`, looked up from `class` upwards.
    Super {
        class: Arc<str>,
        name: String,
        sig: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub callee: Callee,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(Const),
    Local(Slot),
    Global(String),
    StaticField {
        class: Arc<str>,
        name: String,
    },
    Field {
        target: Box<Expr>,
        name: String,
    },
    This,
    Length(Box<Expr>),
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Call(Box<Call>),
    New {
        class: Arc<str>,
        sig: String,
        args: Vec<Expr>,
    },
    NewArray {
        elem: Type,
        dims: Vec<Expr>,
        extra_dims: usize,
    },
    /// Array of component type `elem` with the given items.
    ArrayLit {
        elem: Type,
        items: Vec<Expr>,
    },
    Neg(NumKind, Box<Expr>),
    BitNot(NumKind, Box<Expr>),
    Not(Box<Expr>),
    Arith {
        op: Arith,
        kind: NumKind,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Compare {
        op: Cmp,
        kind: NumKind,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `==` / `!=`; `kind` is `None` for reference comparison.
    Equals {
        kind: Option<NumKind>,
        negate: bool,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Concat(Vec<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cond {
        cond: Box<Expr>,
        then: Box<Expr>,
        els: Box<Expr>,
    },
    Assign {
        place: Box<Place>,
        value: Box<Expr>,
    },
    /// `place op= value`, with the result converted back to `store`.
    CompoundAssign {
        place: Box<Place>,
        op: Arith,
        kind: NumKind,
        value: Box<Expr>,
        store: Type,
    },
    ConcatAssign {
        place: Box<Place>,
        value: Box<Expr>,
    },
    IncDec {
        place: Box<Place>,
        store: Type,
        increment: bool,
        prefix: bool,
    },
    Convert(Prim, Box<Expr>),
    CheckCast {
        ty: Type,
        expr: Box<Expr>,
    },
    InstanceOf {
        expr: Box<Expr>,
        ty: Type,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterKind {
    Array,
    List,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Catch {
    pub class: Arc<str>,
    pub slot: Slot,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Expr(Expr),
    Local {
        slot: Slot,
        ty: Type,
        init: Option<Expr>,
    },
    Block(Vec<Stmt>),
    If {
        cond: Expr,
        then: Box<Stmt>,
        els: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        cond: Expr,
    },
    For {
        init: Vec<Stmt>,
        cond: Option<Expr>,
        update: Vec<Expr>,
        body: Box<Stmt>,
    },
    ForEach {
        slot: Slot,
        iter: Expr,
        over: IterKind,
        body: Box<Stmt>,
    },
    Return(Option<Expr>),
    Break,
    Continue,
    Throw(Expr),
    Try {
        body: Vec<Stmt>,
        catches: Vec<Catch>,
        finally: Option<Vec<Stmt>>,
    },
    SuperCtor {
        class: Arc<str>,
        sig: String,
        args: Vec<Expr>,
    },
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    /// 1-based line in the snippet source.
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Code(Vec<Stmt>),
    Abstract,
    /// The body references something undeclared; invoking it raises an
    /// unresolved-reference exception naming `snippet`.
    Corralled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodIr {
    pub name: String,
    pub sig: String,
    pub is_static: bool,
    pub params: usize,
    pub frame_size: usize,
    pub ret: Type,
    pub body: Body,
    /// Id of the snippet that declared this method.
    pub origin: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldIr {
    pub name: String,
    pub ty: Type,
    pub is_static: bool,
    pub init: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassIr {
    pub name: Arc<str>,
    pub kind: ClassKind,
    pub superclass: Option<Arc<str>>,
    pub interfaces: Vec<Arc<str>>,
    pub fields: Vec<FieldIr>,
    pub methods: Vec<MethodIr>,
    pub constructors: Vec<MethodIr>,
    pub enum_constants: Vec<String>,
    pub is_abstract: bool,
    /// Frame size for field initializers.
    pub init_frame: usize,
    pub origin: String,
}

/// Executable form of one snippet.
#[derive(Debug, Clone, PartialEq)]
pub enum Code {
    Import,
    Var {
        name: String,
        ty: Type,
        init: Option<Expr>,
        frame_size: usize,
        origin: String,
    },
    Expr {
        expr: Expr,
        ty: Type,
        frame_size: usize,
        origin: String,
    },
    Stmt {
        body: Vec<Stmt>,
        frame_size: usize,
        origin: String,
    },
    Method(MethodIr),
    Class(ClassIr),
}
