//! Runtime values.
//!
//! Every expression evaluates to a [`Value`]. "Not available" is an explicit
//! variant rather than a bare float NaN so that the script-level equality
//! convention (`na == na` is true) can diverge from IEEE semantics while
//! arithmetic still propagates NA the way NaN would.

use std::fmt;

/// Declaration kind of a storage slot. `Const`, `Var` and `Let` slots are
/// persisted series; `Param` slots hold normalized call arguments; `Data`
/// slots are the built-in market series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    Const,
    Var,
    Let,
    Param,
    Data,
}

impl SlotKind {
    pub fn label(self) -> &'static str {
        match self {
            SlotKind::Const => "const",
            SlotKind::Var => "var",
            SlotKind::Let => "let",
            SlotKind::Param => "param",
            SlotKind::Data => "data",
        }
    }
}

/// A handle to a persisted series, optionally offset into its history.
/// Passing a `SeriesRef` (rather than a scalar) into a user function is what
/// lets the callee index the caller's history.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRef {
    pub kind: SlotKind,
    pub name: String,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Na,
    Num(f64),
    Bool(bool),
    Str(String),
    Tuple(Vec<Value>),
    Series(SeriesRef),
}

/// Stored numbers are rounded to 10 decimals, mirroring the indicator
/// platform's display precision.
pub fn round10(n: f64) -> f64 {
    if !n.is_finite() {
        return n;
    }
    format!("{:.10}", n).parse().unwrap_or(n)
}

impl Value {
    pub fn num(n: f64) -> Value {
        if n.is_nan() { Value::Na } else { Value::Num(n) }
    }

    pub fn is_na(&self) -> bool {
        match self {
            Value::Na => true,
            Value::Num(n) => n.is_nan(),
            _ => false,
        }
    }

    /// Numeric view: NA maps to NaN, booleans to 0/1, everything else to NaN.
    pub fn as_num(&self) -> f64 {
        match self {
            Value::Num(n) => *n,
            Value::Bool(true) => 1.0,
            Value::Bool(false) => 0.0,
            _ => f64::NAN,
        }
    }

    /// Script truthiness: NA, 0, false and "" are falsy.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Na => false,
            Value::Num(n) => !n.is_nan() && *n != 0.0,
            Value::Bool(b) => *b,
            Value::Str(s) => !s.is_empty(),
            Value::Tuple(_) | Value::Series(_) => true,
        }
    }

    /// Round a stored number to series precision; other variants unchanged.
    pub fn with_precision(self) -> Value {
        match self {
            Value::Num(n) => Value::num(round10(n)),
            other => other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Na => write!(f, "na"),
            Value::Num(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Str(s) => write!(f, "{}", s),
            Value::Tuple(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Series(r) => write!(f, "<{}.{}[{}]>", r.kind.label(), r.name, r.offset),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Le,
    Gt,
    Ge,
    Neq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// NA-aware equality: `na == na` is true, unlike IEEE NaN.
pub fn na_eq(a: &Value, b: &Value) -> Value {
    let eq = match (a, b) {
        (x, y) if x.is_na() && y.is_na() => true,
        (x, y) if x.is_na() || y.is_na() => false,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        _ => a.as_num() == b.as_num(),
    };
    Value::Bool(eq)
}

/// Apply a binary operator to two scalar-resolved operands. Arithmetic on NA
/// yields NA; comparisons with NA yield false (except `!=`, which keeps
/// native NaN semantics).
pub fn apply_binary(op: BinaryOp, a: &Value, b: &Value) -> Value {
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            let (x, y) = (a.as_num(), b.as_num());
            let r = match op {
                BinaryOp::Add => x + y,
                BinaryOp::Sub => x - y,
                BinaryOp::Mul => x * y,
                BinaryOp::Div => x / y,
                BinaryOp::Mod => x % y,
                _ => unreachable!(),
            };
            Value::num(r)
        }
        BinaryOp::Lt => Value::Bool(a.as_num() < b.as_num()),
        BinaryOp::Le => Value::Bool(a.as_num() <= b.as_num()),
        BinaryOp::Gt => Value::Bool(a.as_num() > b.as_num()),
        BinaryOp::Ge => Value::Bool(a.as_num() >= b.as_num()),
        BinaryOp::Neq => {
            // Native float convention: NA on either side compares unequal.
            if a.is_na() || b.is_na() {
                return Value::Bool(true);
            }
            match na_eq(a, b) {
                Value::Bool(eq) => Value::Bool(!eq),
                _ => Value::Bool(true),
            }
        }
    }
}

pub fn apply_unary(op: UnaryOp, v: &Value) -> Value {
    match op {
        UnaryOp::Neg => Value::num(-v.as_num()),
        UnaryOp::Not => Value::Bool(!v.truthy()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn na_equals_na() {
        assert_eq!(na_eq(&Value::Na, &Value::Na), Value::Bool(true));
    }

    #[test]
    fn na_not_equal_to_number() {
        assert_eq!(na_eq(&Value::Na, &Value::Num(0.0)), Value::Bool(false));
    }

    #[test]
    fn neq_keeps_native_nan_semantics() {
        // `na != na` follows IEEE (true), only `==` is NA-aware.
        assert_eq!(
            apply_binary(BinaryOp::Neq, &Value::Na, &Value::Na),
            Value::Bool(true)
        );
    }

    #[test]
    fn arithmetic_propagates_na() {
        let r = apply_binary(BinaryOp::Add, &Value::Na, &Value::Num(1.0));
        assert!(r.is_na());
    }

    #[test]
    fn comparison_with_na_is_false() {
        assert_eq!(
            apply_binary(BinaryOp::Lt, &Value::Na, &Value::Num(1.0)),
            Value::Bool(false)
        );
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Na.truthy());
        assert!(!Value::Num(0.0).truthy());
        assert!(Value::Num(-1.0).truthy());
        assert!(!Value::Bool(false).truthy());
        assert!(Value::Str("x".into()).truthy());
        assert!(!Value::Str(String::new()).truthy());
    }

    #[test]
    fn round10_truncates_float_noise() {
        assert_eq!(round10(0.1 + 0.2), 0.3);
        assert_eq!(round10(1.0 / 3.0), 0.3333333333);
    }

    #[test]
    fn string_equality() {
        assert_eq!(
            na_eq(&Value::Str("a".into()), &Value::Str("a".into())),
            Value::Bool(true)
        );
        assert_eq!(
            na_eq(&Value::Str("a".into()), &Value::Str("b".into())),
            Value::Bool(false)
        );
    }
}
