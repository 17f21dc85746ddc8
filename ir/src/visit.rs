//! Read-only walks and sharing-preserving rewrites over the IR.
//!
//! Passes are visitors with explicit context held on the call stack; the
//! default methods walk every child, so an implementation overrides only the
//! nodes it cares about. The mutator's default walk rebuilds a node only
//! when some child actually changed, so untouched subtrees keep their
//! original allocation and `same_as` remains a cheap "did anything change"
//! test after a rewrite.

use std::rc::Rc;

use smallvec::SmallVec;

use crate::expr::{Expr, ExprRef, same_as};
use crate::stmt::{Stmt, StmtRef, same_stmt};

/// Read-only traversal.
pub trait IrVisitor {
    fn visit_expr(&mut self, e: &ExprRef) {
        visit_expr_children(self, e);
    }

    fn visit_stmt(&mut self, s: &StmtRef) {
        visit_stmt_children(self, s);
    }
}

/// Default walk over an expression's children.
pub fn visit_expr_children<V: IrVisitor + ?Sized>(v: &mut V, e: &ExprRef) {
    match &**e {
        Expr::IntImm(_) | Expr::FloatImm(_) | Expr::BoolImm(_) | Expr::StrImm(_) | Expr::Var(_) => {}
        Expr::Add(a, b)
        | Expr::Sub(a, b)
        | Expr::Mul(a, b)
        | Expr::Div(a, b)
        | Expr::Mod(a, b)
        | Expr::Min(a, b)
        | Expr::Max(a, b)
        | Expr::Eq(a, b)
        | Expr::Ne(a, b)
        | Expr::Lt(a, b)
        | Expr::Le(a, b)
        | Expr::Gt(a, b)
        | Expr::Ge(a, b)
        | Expr::And(a, b)
        | Expr::Or(a, b) => {
            v.visit_expr(a);
            v.visit_expr(b);
        }
        Expr::Not(a) | Expr::Likely(a) => v.visit_expr(a),
        Expr::Select { condition, true_value, false_value } => {
            v.visit_expr(condition);
            v.visit_expr(true_value);
            v.visit_expr(false_value);
        }
        Expr::Let { value, body, .. } => {
            v.visit_expr(value);
            v.visit_expr(body);
        }
        Expr::Call { args, .. } => {
            for arg in args {
                v.visit_expr(arg);
            }
        }
    }
}

/// Default walk over a statement's children.
pub fn visit_stmt_children<V: IrVisitor + ?Sized>(v: &mut V, s: &StmtRef) {
    match &**s {
        Stmt::Provide { values, args, .. } => {
            for value in values {
                v.visit_expr(value);
            }
            for arg in args {
                v.visit_expr(arg);
            }
        }
        Stmt::For { min, extent, body, .. } => {
            v.visit_expr(min);
            v.visit_expr(extent);
            v.visit_stmt(body);
        }
        Stmt::LetStmt { value, body, .. } => {
            v.visit_expr(value);
            v.visit_stmt(body);
        }
        Stmt::Block { first, rest } => {
            v.visit_stmt(first);
            v.visit_stmt(rest);
        }
        Stmt::IfThenElse { condition, then_case, else_case } => {
            v.visit_expr(condition);
            v.visit_stmt(then_case);
            if let Some(else_case) = else_case {
                v.visit_stmt(else_case);
            }
        }
        Stmt::Realize { bounds, body, .. } => {
            for (min, extent) in bounds {
                v.visit_expr(min);
                v.visit_expr(extent);
            }
            v.visit_stmt(body);
        }
        Stmt::ProducerConsumer { produce, update, consume, .. } => {
            v.visit_stmt(produce);
            if let Some(update) = update {
                v.visit_stmt(update);
            }
            v.visit_stmt(consume);
        }
        Stmt::AssertStmt { condition, message } => {
            v.visit_expr(condition);
            v.visit_expr(message);
        }
        Stmt::Evaluate(value) => v.visit_expr(value),
    }
}

/// Rebuilding rewrite.
pub trait IrMutator {
    fn mutate_expr(&mut self, e: &ExprRef) -> ExprRef {
        mutate_expr_children(self, e)
    }

    fn mutate_stmt(&mut self, s: &StmtRef) -> StmtRef {
        mutate_stmt_children(self, s)
    }
}

/// Default rewrite of an expression's children, keeping the original
/// allocation when nothing changed.
pub fn mutate_expr_children<M: IrMutator + ?Sized>(m: &mut M, e: &ExprRef) -> ExprRef {
    macro_rules! binary {
        ($variant:ident, $a:expr, $b:expr) => {{
            let a = m.mutate_expr($a);
            let b = m.mutate_expr($b);
            if same_as(&a, $a) && same_as(&b, $b) { e.clone() } else { Rc::new(Expr::$variant(a, b)) }
        }};
    }

    match &**e {
        Expr::IntImm(_) | Expr::FloatImm(_) | Expr::BoolImm(_) | Expr::StrImm(_) | Expr::Var(_) => e.clone(),
        Expr::Add(a, b) => binary!(Add, a, b),
        Expr::Sub(a, b) => binary!(Sub, a, b),
        Expr::Mul(a, b) => binary!(Mul, a, b),
        Expr::Div(a, b) => binary!(Div, a, b),
        Expr::Mod(a, b) => binary!(Mod, a, b),
        Expr::Min(a, b) => binary!(Min, a, b),
        Expr::Max(a, b) => binary!(Max, a, b),
        Expr::Eq(a, b) => binary!(Eq, a, b),
        Expr::Ne(a, b) => binary!(Ne, a, b),
        Expr::Lt(a, b) => binary!(Lt, a, b),
        Expr::Le(a, b) => binary!(Le, a, b),
        Expr::Gt(a, b) => binary!(Gt, a, b),
        Expr::Ge(a, b) => binary!(Ge, a, b),
        Expr::And(a, b) => binary!(And, a, b),
        Expr::Or(a, b) => binary!(Or, a, b),
        Expr::Not(a) => {
            let na = m.mutate_expr(a);
            if same_as(&na, a) { e.clone() } else { Rc::new(Expr::Not(na)) }
        }
        Expr::Likely(a) => {
            let na = m.mutate_expr(a);
            if same_as(&na, a) { e.clone() } else { Rc::new(Expr::Likely(na)) }
        }
        Expr::Select { condition, true_value, false_value } => {
            let c = m.mutate_expr(condition);
            let t = m.mutate_expr(true_value);
            let f = m.mutate_expr(false_value);
            if same_as(&c, condition) && same_as(&t, true_value) && same_as(&f, false_value) {
                e.clone()
            } else {
                Rc::new(Expr::Select { condition: c, true_value: t, false_value: f })
            }
        }
        Expr::Let { name, value, body } => {
            let nv = m.mutate_expr(value);
            let nb = m.mutate_expr(body);
            if same_as(&nv, value) && same_as(&nb, body) {
                e.clone()
            } else {
                Rc::new(Expr::Let { name: name.clone(), value: nv, body: nb })
            }
        }
        Expr::Call { kind, args } => {
            let new_args: SmallVec<[ExprRef; 4]> = args.iter().map(|a| m.mutate_expr(a)).collect();
            if new_args.iter().zip(args).all(|(n, o)| same_as(n, o)) {
                e.clone()
            } else {
                Rc::new(Expr::Call { kind: kind.clone(), args: new_args })
            }
        }
    }
}

/// Default rewrite of a statement's children, keeping the original
/// allocation when nothing changed.
pub fn mutate_stmt_children<M: IrMutator + ?Sized>(m: &mut M, s: &StmtRef) -> StmtRef {
    match &**s {
        Stmt::Provide { name, values, args } => {
            let new_values: Vec<_> = values.iter().map(|v| m.mutate_expr(v)).collect();
            let new_args: Vec<_> = args.iter().map(|a| m.mutate_expr(a)).collect();
            let unchanged = new_values.iter().zip(values).all(|(n, o)| same_as(n, o))
                && new_args.iter().zip(args).all(|(n, o)| same_as(n, o));
            if unchanged {
                s.clone()
            } else {
                Rc::new(Stmt::Provide { name: name.clone(), values: new_values, args: new_args })
            }
        }
        Stmt::For { name, min, extent, for_type, device_api, body } => {
            let nmin = m.mutate_expr(min);
            let nextent = m.mutate_expr(extent);
            let nbody = m.mutate_stmt(body);
            if same_as(&nmin, min) && same_as(&nextent, extent) && same_stmt(&nbody, body) {
                s.clone()
            } else {
                Rc::new(Stmt::For {
                    name: name.clone(),
                    min: nmin,
                    extent: nextent,
                    for_type: *for_type,
                    device_api: *device_api,
                    body: nbody,
                })
            }
        }
        Stmt::LetStmt { name, value, body } => {
            let nvalue = m.mutate_expr(value);
            let nbody = m.mutate_stmt(body);
            if same_as(&nvalue, value) && same_stmt(&nbody, body) {
                s.clone()
            } else {
                Rc::new(Stmt::LetStmt { name: name.clone(), value: nvalue, body: nbody })
            }
        }
        Stmt::Block { first, rest } => {
            let nfirst = m.mutate_stmt(first);
            let nrest = m.mutate_stmt(rest);
            if same_stmt(&nfirst, first) && same_stmt(&nrest, rest) {
                s.clone()
            } else {
                Rc::new(Stmt::Block { first: nfirst, rest: nrest })
            }
        }
        Stmt::IfThenElse { condition, then_case, else_case } => {
            let ncond = m.mutate_expr(condition);
            let nthen = m.mutate_stmt(then_case);
            let nelse = else_case.as_ref().map(|e| m.mutate_stmt(e));
            let unchanged = same_as(&ncond, condition)
                && same_stmt(&nthen, then_case)
                && match (&nelse, else_case) {
                    (Some(n), Some(o)) => same_stmt(n, o),
                    (None, None) => true,
                    _ => false,
                };
            if unchanged {
                s.clone()
            } else {
                Rc::new(Stmt::IfThenElse { condition: ncond, then_case: nthen, else_case: nelse })
            }
        }
        Stmt::Realize { name, types, bounds, body } => {
            let new_bounds: Vec<_> =
                bounds.iter().map(|(lo, ext)| (m.mutate_expr(lo), m.mutate_expr(ext))).collect();
            let nbody = m.mutate_stmt(body);
            let unchanged = same_stmt(&nbody, body)
                && new_bounds.iter().zip(bounds).all(|((nl, ne), (ol, oe))| same_as(nl, ol) && same_as(ne, oe));
            if unchanged {
                s.clone()
            } else {
                Rc::new(Stmt::Realize { name: name.clone(), types: types.clone(), bounds: new_bounds, body: nbody })
            }
        }
        Stmt::ProducerConsumer { name, produce, update, consume } => {
            let nproduce = m.mutate_stmt(produce);
            let nupdate = update.as_ref().map(|u| m.mutate_stmt(u));
            let nconsume = m.mutate_stmt(consume);
            let unchanged = same_stmt(&nproduce, produce)
                && same_stmt(&nconsume, consume)
                && match (&nupdate, update) {
                    (Some(n), Some(o)) => same_stmt(n, o),
                    (None, None) => true,
                    _ => false,
                };
            if unchanged {
                s.clone()
            } else {
                Rc::new(Stmt::ProducerConsumer {
                    name: name.clone(),
                    produce: nproduce,
                    update: nupdate,
                    consume: nconsume,
                })
            }
        }
        Stmt::AssertStmt { condition, message } => {
            let ncond = m.mutate_expr(condition);
            let nmsg = m.mutate_expr(message);
            if same_as(&ncond, condition) && same_as(&nmsg, message) {
                s.clone()
            } else {
                Rc::new(Stmt::AssertStmt { condition: ncond, message: nmsg })
            }
        }
        Stmt::Evaluate(value) => {
            let nvalue = m.mutate_expr(value);
            if same_as(&nvalue, value) { s.clone() } else { Rc::new(Stmt::Evaluate(nvalue)) }
        }
    }
}
