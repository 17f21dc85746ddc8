//! Constant folding and algebraic cleanup.
//!
//! A bottom-up rewrite, deliberately modest: it exists so that bounds
//! expressions like `(max - min + f) / f` collapse when the inputs are
//! literals, divisibility proofs (`extent % factor == 0`) can be decided,
//! and specialization branches fold after their scrutinee is pinned.
//! Integer division and modulo follow Euclidean semantics; division by zero
//! is left unfolded for downstream diagnostics.

use std::rc::Rc;

use crate::expr::{Expr, ExprRef, boolean, int, same_as};
use crate::stmt::{Stmt, StmtRef, same_stmt};
use crate::substitute::substitute;
use crate::visit::{IrMutator, mutate_stmt_children};

/// Simplify an expression.
pub fn simplify(e: &ExprRef) -> ExprRef {
    match &**e {
        Expr::IntImm(_) | Expr::FloatImm(_) | Expr::BoolImm(_) | Expr::StrImm(_) | Expr::Var(_) => e.clone(),

        Expr::Add(a, b) => fold_binary(
            e,
            a,
            b,
            |x, y| x.checked_add(y),
            |a, b| {
                if b.is_zero() {
                    Some(a.clone())
                } else if a.is_zero() {
                    Some(b.clone())
                } else {
                    None
                }
            },
            Expr::Add,
        ),
        Expr::Sub(a, b) => fold_binary(
            e,
            a,
            b,
            |x, y| x.checked_sub(y),
            |a, b| {
                if b.is_zero() {
                    Some(a.clone())
                } else if a == b {
                    Some(int(0))
                } else {
                    None
                }
            },
            Expr::Sub,
        ),
        Expr::Mul(a, b) => fold_binary(
            e,
            a,
            b,
            |x, y| x.checked_mul(y),
            |a, b| {
                if a.is_zero() || b.is_one() {
                    Some(a.clone())
                } else if b.is_zero() || a.is_one() {
                    Some(b.clone())
                } else {
                    None
                }
            },
            Expr::Mul,
        ),
        Expr::Div(a, b) => fold_binary(
            e,
            a,
            b,
            |x, y| if y != 0 { Some(x.div_euclid(y)) } else { None },
            |a, b| if b.is_one() { Some(a.clone()) } else { None },
            Expr::Div,
        ),
        Expr::Mod(a, b) => fold_binary(
            e,
            a,
            b,
            |x, y| if y != 0 { Some(x.rem_euclid(y)) } else { None },
            |a, b| if b.is_one() && a.as_int().is_none() { Some(int(0)) } else { None },
            Expr::Mod,
        ),
        Expr::Min(a, b) => {
            fold_binary(e, a, b, |x, y| Some(x.min(y)), |a, b| if a == b { Some(a.clone()) } else { None }, Expr::Min)
        }
        Expr::Max(a, b) => {
            fold_binary(e, a, b, |x, y| Some(x.max(y)), |a, b| if a == b { Some(a.clone()) } else { None }, Expr::Max)
        }

        Expr::Eq(a, b) => fold_compare(e, a, b, |x, y| x == y, Expr::Eq),
        Expr::Ne(a, b) => fold_compare(e, a, b, |x, y| x != y, Expr::Ne),
        Expr::Lt(a, b) => fold_compare(e, a, b, |x, y| x < y, Expr::Lt),
        Expr::Le(a, b) => fold_compare(e, a, b, |x, y| x <= y, Expr::Le),
        Expr::Gt(a, b) => fold_compare(e, a, b, |x, y| x > y, Expr::Gt),
        Expr::Ge(a, b) => fold_compare(e, a, b, |x, y| x >= y, Expr::Ge),

        Expr::And(a, b) => {
            let a = simplify(a);
            let b = simplify(b);
            match (a.as_bool(), b.as_bool()) {
                (Some(false), _) | (_, Some(false)) => boolean(false),
                (Some(true), _) => b,
                (_, Some(true)) => a,
                _ => rebuild2(e, a, b, Expr::And),
            }
        }
        Expr::Or(a, b) => {
            let a = simplify(a);
            let b = simplify(b);
            match (a.as_bool(), b.as_bool()) {
                (Some(true), _) | (_, Some(true)) => boolean(true),
                (Some(false), _) => b,
                (_, Some(false)) => a,
                _ => rebuild2(e, a, b, Expr::Or),
            }
        }
        Expr::Not(a) => {
            let a = simplify(a);
            match &*a {
                Expr::BoolImm(v) => boolean(!*v),
                Expr::Not(inner) => inner.clone(),
                _ => Rc::new(Expr::Not(a)),
            }
        }

        Expr::Select { condition, true_value, false_value } => {
            let c = simplify(condition);
            let t = simplify(true_value);
            let f = simplify(false_value);
            match c.as_bool() {
                Some(true) => t,
                Some(false) => f,
                None if t == f => t,
                None => Rc::new(Expr::Select { condition: c, true_value: t, false_value: f }),
            }
        }

        Expr::Likely(a) => {
            let na = simplify(a);
            if same_as(&na, a) { e.clone() } else { Rc::new(Expr::Likely(na)) }
        }

        Expr::Let { name, value, body } => {
            let value = simplify(value);
            // Immediates are cheaper inlined than bound.
            if value.is_simple_const() {
                simplify(&substitute(name, &value, body))
            } else {
                let body = simplify(body);
                Rc::new(Expr::Let { name: name.clone(), value, body })
            }
        }

        Expr::Call { kind, args } => {
            let new_args: smallvec::SmallVec<[ExprRef; 4]> = args.iter().map(simplify).collect();
            if new_args.iter().zip(args).all(|(n, o)| same_as(n, o)) {
                e.clone()
            } else {
                Rc::new(Expr::Call { kind: kind.clone(), args: new_args })
            }
        }
    }
}

fn rebuild2(
    original: &ExprRef,
    a: ExprRef,
    b: ExprRef,
    make: fn(ExprRef, ExprRef) -> Expr,
) -> ExprRef {
    let (oa, ob) = match &**original {
        Expr::Add(x, y)
        | Expr::Sub(x, y)
        | Expr::Mul(x, y)
        | Expr::Div(x, y)
        | Expr::Mod(x, y)
        | Expr::Min(x, y)
        | Expr::Max(x, y)
        | Expr::Eq(x, y)
        | Expr::Ne(x, y)
        | Expr::Lt(x, y)
        | Expr::Le(x, y)
        | Expr::Gt(x, y)
        | Expr::Ge(x, y)
        | Expr::And(x, y)
        | Expr::Or(x, y) => (x, y),
        _ => unreachable!("rebuild2 on non-binary node"),
    };
    if same_as(&a, oa) && same_as(&b, ob) { original.clone() } else { Rc::new(make(a, b)) }
}

fn fold_binary(
    original: &ExprRef,
    a: &ExprRef,
    b: &ExprRef,
    fold: fn(i64, i64) -> Option<i64>,
    identities: fn(&ExprRef, &ExprRef) -> Option<ExprRef>,
    make: fn(ExprRef, ExprRef) -> Expr,
) -> ExprRef {
    let a = simplify(a);
    let b = simplify(b);
    if let (Some(x), Some(y)) = (a.as_int(), b.as_int())
        && let Some(v) = fold(x, y)
    {
        return int(v);
    }
    if let Some(out) = identities(&a, &b) {
        return out;
    }
    rebuild2(original, a, b, make)
}

fn fold_compare(
    original: &ExprRef,
    a: &ExprRef,
    b: &ExprRef,
    fold: fn(i64, i64) -> bool,
    make: fn(ExprRef, ExprRef) -> Expr,
) -> ExprRef {
    let a = simplify(a);
    let b = simplify(b);
    if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
        return boolean(fold(x, y));
    }
    if let (Some(x), Some(y)) = (a.as_bool(), b.as_bool()) {
        let v = match &**original {
            Expr::Eq(..) => x == y,
            Expr::Ne(..) => x != y,
            _ => return rebuild2(original, a, b, make),
        };
        return boolean(v);
    }
    rebuild2(original, a, b, make)
}

struct SimplifyExprs;

impl IrMutator for SimplifyExprs {
    fn mutate_expr(&mut self, e: &ExprRef) -> ExprRef {
        simplify(e)
    }

    fn mutate_stmt(&mut self, s: &StmtRef) -> StmtRef {
        let out = mutate_stmt_children(self, s);
        // A pinned specialization scrutinee leaves constant branches behind.
        if let Stmt::IfThenElse { condition, then_case, else_case } = &*out {
            match condition.as_bool() {
                Some(true) => return then_case.clone(),
                Some(false) => {
                    return else_case.clone().unwrap_or_else(|| crate::stmt::evaluate(int(0)));
                }
                None => {}
            }
        }
        out
    }
}

/// Simplify every expression inside a statement, folding if/else arms whose
/// condition becomes a literal.
pub fn simplify_stmt(s: &StmtRef) -> StmtRef {
    let out = SimplifyExprs.mutate_stmt(s);
    if same_stmt(&out, s) { s.clone() } else { out }
}
