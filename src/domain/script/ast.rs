//! Surface syntax tree.
//!
//! Produced by the parser, consumed by the scope resolver and the rewriter.
//! Nodes carry the byte position of their first token for error reporting
//! and deterministic slot naming.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Const,
    Let,
    Var,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,       // == and === (NA-aware after rewriting)
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Num(f64),
    Str(String),
    Bool(bool),
    Na,
    Ident {
        name: String,
        pos: usize,
    },
    /// `object[index]`: historical look-back on series, element access on
    /// tuples.
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    /// `ns.func(args)`: namespace call (`ta`, `math`, `request`).
    NsCall {
        namespace: String,
        func: String,
        args: Vec<Expr>,
        pos: usize,
    },
    /// `func(args)`: user-defined function or core helper call.
    Call {
        callee: String,
        args: Vec<Expr>,
        pos: usize,
    },
    Unary {
        op: UnOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        other: Box<Expr>,
    },
    /// `[a, b]` tuple literal (multi-value returns).
    Tuple(Vec<Expr>),
}

#[derive(Debug, Clone)]
pub enum ReturnValue {
    Expr(Expr),
    /// `return { key: expr, .. }`: one named result series per key.
    Record(Vec<(String, Expr)>),
}

#[derive(Debug, Clone)]
pub struct ForStep {
    pub target: String,
    pub op: AssignOp,
    pub value: Expr,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Decl {
        kind: DeclKind,
        name: String,
        init: Expr,
        pos: usize,
    },
    /// `let [a, b] = expr;`
    DeclTuple {
        kind: DeclKind,
        names: Vec<String>,
        init: Expr,
        pos: usize,
    },
    Assign {
        target: String,
        op: AssignOp,
        value: Expr,
        pos: usize,
    },
    ExprStmt(Expr),
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    For {
        var: String,
        init: Expr,
        cond: Expr,
        step: ForStep,
        body: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    FnDecl {
        name: String,
        params: Vec<String>,
        body: Vec<Stmt>,
        pos: usize,
    },
    Return(ReturnValue),
}
