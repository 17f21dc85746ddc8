//! Human-readable rendering of IR, used by diagnostics and tests.

use std::fmt;

use crate::expr::{CallKind, Expr};
use crate::stmt::{DeviceApi, ForType, Stmt};

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IntImm(v) => write!(f, "{v}"),
            Self::FloatImm(v) => write!(f, "{v:?}"),
            Self::BoolImm(v) => write!(f, "{v}"),
            Self::StrImm(v) => write!(f, "{v:?}"),
            Self::Var(name) => write!(f, "{name}"),
            Self::Add(a, b) => write!(f, "({a} + {b})"),
            Self::Sub(a, b) => write!(f, "({a} - {b})"),
            Self::Mul(a, b) => write!(f, "({a}*{b})"),
            Self::Div(a, b) => write!(f, "({a}/{b})"),
            Self::Mod(a, b) => write!(f, "({a} % {b})"),
            Self::Min(a, b) => write!(f, "min({a}, {b})"),
            Self::Max(a, b) => write!(f, "max({a}, {b})"),
            Self::Eq(a, b) => write!(f, "({a} == {b})"),
            Self::Ne(a, b) => write!(f, "({a} != {b})"),
            Self::Lt(a, b) => write!(f, "({a} < {b})"),
            Self::Le(a, b) => write!(f, "({a} <= {b})"),
            Self::Gt(a, b) => write!(f, "({a} > {b})"),
            Self::Ge(a, b) => write!(f, "({a} >= {b})"),
            Self::And(a, b) => write!(f, "({a} && {b})"),
            Self::Or(a, b) => write!(f, "({a} || {b})"),
            Self::Not(a) => write!(f, "!{a}"),
            Self::Select { condition, true_value, false_value } => {
                write!(f, "select({condition}, {true_value}, {false_value})")
            }
            Self::Likely(a) => write!(f, "likely({a})"),
            Self::Let { name, value, body } => write!(f, "(let {name} = {value} in {body})"),
            Self::Call { kind, args } => {
                match kind {
                    CallKind::Func { name, value_index: 0 } => write!(f, "{name}(")?,
                    CallKind::Func { name, value_index } => write!(f, "{name}[{value_index}](")?,
                    CallKind::Extern(name) => write!(f, "{name}(")?,
                    CallKind::Intrinsic(name) => write!(f, "{name}(")?,
                }
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for ForType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => write!(f, "for"),
            Self::Parallel => write!(f, "parallel"),
            Self::Vectorized => write!(f, "vectorized"),
            Self::Unrolled => write!(f, "unrolled"),
        }
    }
}

impl fmt::Display for DeviceApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parent => write!(f, "parent"),
            Self::Host => write!(f, "host"),
            Self::Cuda => write!(f, "cuda"),
            Self::OpenCl => write!(f, "opencl"),
            Self::Metal => write!(f, "metal"),
        }
    }
}

fn indent(f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    for _ in 0..depth {
        write!(f, "  ")?;
    }
    Ok(())
}

fn fmt_stmt(s: &Stmt, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    match s {
        Stmt::Provide { name, values, args } => {
            indent(f, depth)?;
            write!(f, "{name}(")?;
            for (i, a) in args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{a}")?;
            }
            write!(f, ") = ")?;
            for (i, v) in values.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{v}")?;
            }
            writeln!(f)
        }
        Stmt::For { name, min, extent, for_type, device_api, body } => {
            indent(f, depth)?;
            match device_api {
                DeviceApi::Parent => writeln!(f, "{for_type} ({name}, {min}, {extent}) {{")?,
                api => writeln!(f, "{for_type}<{api}> ({name}, {min}, {extent}) {{")?,
            }
            fmt_stmt(body, f, depth + 1)?;
            indent(f, depth)?;
            writeln!(f, "}}")
        }
        Stmt::LetStmt { name, value, body } => {
            indent(f, depth)?;
            writeln!(f, "let {name} = {value}")?;
            fmt_stmt(body, f, depth)
        }
        Stmt::Block { first, rest } => {
            fmt_stmt(first, f, depth)?;
            fmt_stmt(rest, f, depth)
        }
        Stmt::IfThenElse { condition, then_case, else_case } => {
            indent(f, depth)?;
            writeln!(f, "if ({condition}) {{")?;
            fmt_stmt(then_case, f, depth + 1)?;
            if let Some(else_case) = else_case {
                indent(f, depth)?;
                writeln!(f, "}} else {{")?;
                fmt_stmt(else_case, f, depth + 1)?;
            }
            indent(f, depth)?;
            writeln!(f, "}}")
        }
        Stmt::Realize { name, bounds, body, .. } => {
            indent(f, depth)?;
            write!(f, "realize {name}(")?;
            for (i, (min, extent)) in bounds.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "[{min}, {extent}]")?;
            }
            writeln!(f, ") {{")?;
            fmt_stmt(body, f, depth + 1)?;
            indent(f, depth)?;
            writeln!(f, "}}")
        }
        Stmt::ProducerConsumer { name, produce, update, consume } => {
            indent(f, depth)?;
            writeln!(f, "produce {name} {{")?;
            fmt_stmt(produce, f, depth + 1)?;
            indent(f, depth)?;
            writeln!(f, "}}")?;
            if let Some(update) = update {
                indent(f, depth)?;
                writeln!(f, "update {name} {{")?;
                fmt_stmt(update, f, depth + 1)?;
                indent(f, depth)?;
                writeln!(f, "}}")?;
            }
            fmt_stmt(consume, f, depth)
        }
        Stmt::AssertStmt { condition, message } => {
            indent(f, depth)?;
            writeln!(f, "assert({condition}, {message})")
        }
        Stmt::Evaluate(value) => {
            indent(f, depth)?;
            writeln!(f, "{value}")
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_stmt(self, f, 0)
    }
}
