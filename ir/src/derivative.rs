//! Finite differences and injectivity checks on index expressions.

use std::collections::BTreeSet;

use crate::expr::{Expr, ExprRef, add, int, mul, sub, var};
use crate::simplify::simplify;
use crate::substitute::substitute;
use crate::visit::{IrVisitor, visit_expr_children};

/// `e[var := var + 1] - e`, simplified. A constant result means the
/// expression walks its variable with a fixed stride, which is what the
/// vectorizer needs to know about the innermost index of every load.
///
/// Computed structurally rather than by substitute-and-subtract: the
/// difference operator distributes over sums and products, so affine
/// indices collapse to their literal stride without needing a full
/// algebraic simplifier.
pub fn finite_difference(e: &ExprRef, name: &str) -> ExprRef {
    simplify(&difference(e, name))
}

fn shift(e: &ExprRef, name: &str) -> ExprRef {
    substitute(name, &add(var(name), 1), e)
}

fn difference(e: &ExprRef, name: &str) -> ExprRef {
    match &**e {
        Expr::IntImm(_) | Expr::FloatImm(_) | Expr::BoolImm(_) | Expr::StrImm(_) => int(0),
        Expr::Var(v) => {
            if v == name {
                int(1)
            } else {
                int(0)
            }
        }
        Expr::Add(a, b) => add(difference(a, name), difference(b, name)),
        Expr::Sub(a, b) => sub(difference(a, name), difference(b, name)),
        // d(a*b) = da*b + a'*db, with a' the shifted left operand.
        Expr::Mul(a, b) => add(
            mul(difference(a, name), b),
            mul(shift(a, name), difference(b, name)),
        ),
        // Everything else falls back to the definition.
        _ => sub(shift(e, name), e),
    }
}

struct FreeVars {
    names: BTreeSet<String>,
}

impl IrVisitor for FreeVars {
    fn visit_expr(&mut self, e: &ExprRef) {
        if let Expr::Var(name) = &**e {
            self.names.insert(name.clone());
        }
        visit_expr_children(self, e);
    }
}

/// The set of variables mentioned anywhere in the expression.
pub fn free_vars(e: &ExprRef) -> BTreeSet<String> {
    let mut v = FreeVars { names: BTreeSet::new() };
    v.visit_expr(e);
    v.names
}

/// Conservative syntactic injectivity: true only when the expression has
/// exactly one free variable and is strictly monotone in it. Anything this
/// returns `false` for merely loses an optimization, never correctness.
pub fn is_one_to_one(e: &ExprRef) -> bool {
    let vars = free_vars(e);
    if vars.len() != 1 {
        return false;
    }
    let name = vars.iter().next().unwrap();
    is_one_to_one_in(e, name)
}

/// Injectivity in a specific variable: the finite difference over it must be
/// a nonzero integer constant.
pub fn is_one_to_one_in(e: &ExprRef, name: &str) -> bool {
    match finite_difference(e, name).as_int() {
        Some(stride) => stride != 0,
        None => false,
    }
}
