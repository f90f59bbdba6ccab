//! Textual rendering of a compiled unit.
//!
//! Used by `check` to show what the rewriter produced. The notation is not
//! re-parsed anywhere; it only has to be unambiguous to a human reading it.

use std::fmt::Write;

use crate::domain::script::compiled::{
    CExpr, CReturn, CStmt, CompiledScript, LogicalOp,
};
use crate::domain::value::{BinaryOp, UnaryOp};

pub fn emit(unit: &CompiledScript) -> String {
    let mut out = String::new();
    out.push_str("fn (ctx) {\n");
    for stmt in &unit.body {
        emit_stmt(&mut out, stmt, 1);
    }
    out.push_str("}\n");

    let mut names: Vec<&String> = unit.functions.keys().collect();
    names.sort();
    for name in names {
        let f = &unit.functions[name];
        let _ = write!(out, "\nfn {}({}) {{\n", name, f.params.join(", "));
        for stmt in &f.body {
            emit_stmt(&mut out, stmt, 1);
        }
        out.push_str("}\n");
    }
    out
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn emit_stmt(out: &mut String, stmt: &CStmt, depth: usize) {
    indent(out, depth);
    match stmt {
        CStmt::Init { slot, init } => {
            let _ = writeln!(
                out,
                "ctx.init({}, \"{}\", {});",
                slot.kind.label(),
                slot.name,
                render(init)
            );
        }
        CStmt::InitTuple { slots, init } => {
            let names: Vec<String> = slots
                .iter()
                .map(|s| format!("\"{}\"", s.name))
                .collect();
            let _ = writeln!(
                out,
                "ctx.init({}, [{}], {});",
                slots[0].kind.label(),
                names.join(", "),
                render(init)
            );
        }
        CStmt::Assign { slot, value } => {
            let _ = writeln!(
                out,
                "ctx.set({}, \"{}\", {});",
                slot.kind.label(),
                slot.name,
                render(value)
            );
        }
        CStmt::LocalAssign { name, value } => {
            let _ = writeln!(out, "{} = {};", name, render(value));
        }
        CStmt::Expr(expr) => {
            let _ = writeln!(out, "{};", render(expr));
        }
        CStmt::If {
            cond,
            then_body,
            else_body,
        } => {
            let _ = writeln!(out, "if ({}) {{", render(cond));
            for s in then_body {
                emit_stmt(out, s, depth + 1);
            }
            if else_body.is_empty() {
                indent(out, depth);
                out.push_str("}\n");
            } else {
                indent(out, depth);
                out.push_str("} else {\n");
                for s in else_body {
                    emit_stmt(out, s, depth + 1);
                }
                indent(out, depth);
                out.push_str("}\n");
            }
        }
        CStmt::For {
            var,
            init,
            cond,
            step,
            body,
        } => {
            let _ = writeln!(
                out,
                "for ({} = {}; {}; {} = {}) {{",
                var,
                render(init),
                render(cond),
                var,
                render(step)
            );
            for s in body {
                emit_stmt(out, s, depth + 1);
            }
            indent(out, depth);
            out.push_str("}\n");
        }
        CStmt::While { cond, body } => {
            let _ = writeln!(out, "while ({}) {{", render(cond));
            for s in body {
                emit_stmt(out, s, depth + 1);
            }
            indent(out, depth);
            out.push_str("}\n");
        }
        CStmt::Return(ret) => match ret {
            CReturn::Value(expr) => {
                let _ = writeln!(out, "return {};", render(expr));
            }
            CReturn::Record(fields) => {
                let rendered: Vec<String> = fields
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, render(v)))
                    .collect();
                let _ = writeln!(out, "return {{ {} }};", rendered.join(", "));
            }
        },
    }
}

fn render(expr: &CExpr) -> String {
    match expr {
        CExpr::Num(n) => {
            if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
                format!("{}", *n as i64)
            } else {
                format!("{}", n)
            }
        }
        CExpr::Str(s) => format!("\"{}\"", s),
        CExpr::Bool(b) => b.to_string(),
        CExpr::Na => "na".to_string(),
        CExpr::SeriesHandle(slot) => format!("ctx.{}[\"{}\"]", slot.kind.label(), slot.name),
        CExpr::Current(slot) => format!("ctx.{}[\"{}\"][0]", slot.kind.label(), slot.name),
        CExpr::History { slot, index } => format!(
            "ctx.{}[\"{}\"][{}]",
            slot.kind.label(),
            slot.name,
            render(index)
        ),
        CExpr::Local(name) => name.clone(),
        CExpr::Index { object, index } => format!("{}[{}]", render(object), render(index)),
        CExpr::Unary { op, expr } => match op {
            UnaryOp::Neg => format!("(-{})", render(expr)),
            UnaryOp::Not => format!("!{}", render(expr)),
        },
        CExpr::Binary { op, left, right } => {
            format!("({} {} {})", render(left), binary_symbol(*op), render(right))
        }
        CExpr::Logical { op, left, right } => {
            let sym = match op {
                LogicalOp::And => "&&",
                LogicalOp::Or => "||",
            };
            format!("({} {} {})", render(left), sym, render(right))
        }
        CExpr::Ternary { cond, then, other } => {
            format!("({} ? {} : {})", render(cond), render(then), render(other))
        }
        CExpr::NaEq { left, right } => {
            format!("math.__eq({}, {})", render(left), render(right))
        }
        CExpr::Param { arg, index, name } => {
            let idx = index.as_ref().map(|i| render(i)).unwrap_or_else(|| "0".to_string());
            format!("param({}, {}, \"{}\")", render(arg), idx, name)
        }
        CExpr::Ta {
            func,
            args,
            call_id,
        } => {
            let mut rendered: Vec<String> = args.iter().map(render).collect();
            rendered.push(format!("#{}", call_id));
            format!("ta.{}({})", func.name(), rendered.join(", "))
        }
        CExpr::MathFn { func, args } => {
            let rendered: Vec<String> = args.iter().map(render).collect();
            format!("math.{}({})", func.name(), rendered.join(", "))
        }
        CExpr::Security { args } => {
            let rendered: Vec<String> = args.iter().map(render).collect();
            format!("request.security({})", rendered.join(", "))
        }
        CExpr::Core { func, args } => {
            let rendered: Vec<String> = args.iter().map(render).collect();
            format!("{}({})", func.name(), rendered.join(", "))
        }
        CExpr::UserCall { name, args } => {
            let rendered: Vec<String> = args.iter().map(render).collect();
            format!("{}({})", name, rendered.join(", "))
        }
        CExpr::Tuple(items) => {
            let rendered: Vec<String> = items.iter().map(render).collect();
            format!("[{}]", rendered.join(", "))
        }
    }
}

fn binary_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::Neq => "!=",
    }
}
