//! Compiled unit.
//!
//! The rewriter lowers the surface AST into these nodes once, at compile
//! time. Variable reads become slot accesses, call arguments become series
//! parameters, indicator calls carry their call-site identity. The type
//! split between [`crate::domain::script::ast::Expr`] and [`CExpr`] makes a
//! second rewrite impossible: there is no surface node left to rewrite.

use std::collections::HashMap;

use crate::domain::value::{BinaryOp, SlotKind, UnaryOp};

/// Storage identity of a persisted variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Slot {
    pub kind: SlotKind,
    pub name: String,
}

impl Slot {
    pub fn new(kind: SlotKind, name: impl Into<String>) -> Self {
        Slot {
            kind,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaFunc {
    Sma,
    Ema,
    Rma,
    Wma,
    Rsi,
    Atr,
    Tr,
    Change,
    Mom,
    Highest,
    Lowest,
    Stdev,
    Cum,
    Crossover,
    Crossunder,
    Macd,
}

impl TaFunc {
    pub fn from_name(name: &str) -> Option<TaFunc> {
        Some(match name {
            "sma" => TaFunc::Sma,
            "ema" => TaFunc::Ema,
            "rma" => TaFunc::Rma,
            "wma" => TaFunc::Wma,
            "rsi" => TaFunc::Rsi,
            "atr" => TaFunc::Atr,
            "tr" => TaFunc::Tr,
            "change" => TaFunc::Change,
            "mom" => TaFunc::Mom,
            "highest" => TaFunc::Highest,
            "lowest" => TaFunc::Lowest,
            "stdev" => TaFunc::Stdev,
            "cum" => TaFunc::Cum,
            "crossover" => TaFunc::Crossover,
            "crossunder" => TaFunc::Crossunder,
            "macd" => TaFunc::Macd,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            TaFunc::Sma => "sma",
            TaFunc::Ema => "ema",
            TaFunc::Rma => "rma",
            TaFunc::Wma => "wma",
            TaFunc::Rsi => "rsi",
            TaFunc::Atr => "atr",
            TaFunc::Tr => "tr",
            TaFunc::Change => "change",
            TaFunc::Mom => "mom",
            TaFunc::Highest => "highest",
            TaFunc::Lowest => "lowest",
            TaFunc::Stdev => "stdev",
            TaFunc::Cum => "cum",
            TaFunc::Crossover => "crossover",
            TaFunc::Crossunder => "crossunder",
            TaFunc::Macd => "macd",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathFunc {
    Abs,
    Max,
    Min,
    Pow,
    Sqrt,
    Round,
    Floor,
    Ceil,
    Sign,
    Log,
    Exp,
    Avg,
    Sum,
}

impl MathFunc {
    pub fn from_name(name: &str) -> Option<MathFunc> {
        Some(match name {
            "abs" => MathFunc::Abs,
            "max" => MathFunc::Max,
            "min" => MathFunc::Min,
            "pow" => MathFunc::Pow,
            "sqrt" => MathFunc::Sqrt,
            "round" => MathFunc::Round,
            "floor" => MathFunc::Floor,
            "ceil" => MathFunc::Ceil,
            "sign" => MathFunc::Sign,
            "log" => MathFunc::Log,
            "exp" => MathFunc::Exp,
            "avg" => MathFunc::Avg,
            "sum" => MathFunc::Sum,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            MathFunc::Abs => "abs",
            MathFunc::Max => "max",
            MathFunc::Min => "min",
            MathFunc::Pow => "pow",
            MathFunc::Sqrt => "sqrt",
            MathFunc::Round => "round",
            MathFunc::Floor => "floor",
            MathFunc::Ceil => "ceil",
            MathFunc::Sign => "sign",
            MathFunc::Log => "log",
            MathFunc::Exp => "exp",
            MathFunc::Avg => "avg",
            MathFunc::Sum => "sum",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreFn {
    Na,
    Nz,
    Plot,
    PlotChar,
}

impl CoreFn {
    pub fn from_name(name: &str) -> Option<CoreFn> {
        Some(match name {
            "na" => CoreFn::Na,
            "nz" => CoreFn::Nz,
            "plot" => CoreFn::Plot,
            "plotchar" => CoreFn::PlotChar,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            CoreFn::Na => "na",
            CoreFn::Nz => "nz",
            CoreFn::Plot => "plot",
            CoreFn::PlotChar => "plotchar",
        }
    }
}

#[derive(Debug, Clone)]
pub enum CExpr {
    Num(f64),
    Str(String),
    Bool(bool),
    Na,
    /// Whole-series reference to a slot. Resolves to a series handle at
    /// runtime so callees and result collection can read history.
    SeriesHandle(Slot),
    /// Current-bar value of a slot.
    Current(Slot),
    /// `slot[index]` historical look-back.
    History { slot: Slot, index: Box<CExpr> },
    /// Transient local: loop counter or function parameter binding.
    Local(String),
    /// Element access on a value that is not a known slot (tuple element,
    /// series handle held in a local).
    Index {
        object: Box<CExpr>,
        index: Box<CExpr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<CExpr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<CExpr>,
        right: Box<CExpr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<CExpr>,
        right: Box<CExpr>,
    },
    Ternary {
        cond: Box<CExpr>,
        then: Box<CExpr>,
        other: Box<CExpr>,
    },
    /// NA-aware equality: `na == na` is true, otherwise numeric equality.
    NaEq { left: Box<CExpr>, right: Box<CExpr> },
    /// Argument normalization at a call boundary. Records the per-bar value
    /// of `arg` into the parameter series `name` and yields a handle to it,
    /// so callees see full history regardless of the argument's shape.
    Param {
        arg: Box<CExpr>,
        index: Option<Box<CExpr>>,
        name: String,
    },
    /// `ta.*` call with its compile-time call-site identity.
    Ta {
        func: TaFunc,
        args: Vec<CExpr>,
        call_id: u32,
    },
    MathFn {
        func: MathFunc,
        args: Vec<CExpr>,
    },
    /// `request.security(symbol, timeframe, expression)`.
    Security { args: Vec<CExpr> },
    Core {
        func: CoreFn,
        args: Vec<CExpr>,
    },
    UserCall {
        name: String,
        args: Vec<CExpr>,
    },
    Tuple(Vec<CExpr>),
}

#[derive(Debug, Clone)]
pub enum CReturn {
    Value(CExpr),
    Record(Vec<(String, CExpr)>),
}

#[derive(Debug, Clone)]
pub enum CStmt {
    /// Slot creation. Seeds the current-bar value on every bar.
    Init { slot: Slot, init: CExpr },
    /// Destructuring init from a tuple-valued expression.
    InitTuple { slots: Vec<Slot>, init: CExpr },
    Assign { slot: Slot, value: CExpr },
    LocalAssign { name: String, value: CExpr },
    Expr(CExpr),
    If {
        cond: CExpr,
        then_body: Vec<CStmt>,
        else_body: Vec<CStmt>,
    },
    For {
        var: String,
        init: CExpr,
        cond: CExpr,
        /// Full replacement value for the counter each iteration.
        step: CExpr,
        body: Vec<CStmt>,
    },
    While { cond: CExpr, body: Vec<CStmt> },
    Return(CReturn),
}

#[derive(Debug, Clone)]
pub struct CFunction {
    pub params: Vec<String>,
    pub body: Vec<CStmt>,
}

/// A fully rewritten script, ready for per-bar execution.
#[derive(Debug, Clone)]
pub struct CompiledScript {
    pub body: Vec<CStmt>,
    pub functions: HashMap<String, CFunction>,
}
