//! Required-region queries: what sub-rectangle of each producer does an
//! expression read, given intervals for its free variables?

use std::collections::BTreeMap;

use crate::expr::{CallKind, Expr, ExprRef, add, int, max, min, mul, sub};
use crate::interval::{Interval, Region, Scope, interval_union, merge_regions};

/// Externally supplied value bounds for function outputs, keyed by
/// `(function, value_index)`. Optional; used when the bound of an
/// expression depends on the value (not just the coordinates) of a call.
pub type FuncValueBounds = BTreeMap<(String, usize), Interval>;

/// Interval containing every value the expression can take when its free
/// variables range over the scope's intervals. Unbound variables are treated
/// as symbolic points. `None` means no bound could be derived.
pub fn bounds_of_expr_in_scope(
    e: &ExprRef,
    scope: &Scope,
    value_bounds: &FuncValueBounds,
) -> Option<Interval> {
    let recurse = |x: &ExprRef| bounds_of_expr_in_scope(x, scope, value_bounds);
    match &**e {
        Expr::IntImm(_) | Expr::FloatImm(_) | Expr::BoolImm(_) => Some(Interval::single(e.clone())),
        Expr::StrImm(_) => None,
        Expr::Var(name) => Some(match scope.get(name) {
            Some(interval) => interval.clone(),
            None => Interval::single(e.clone()),
        }),

        Expr::Add(a, b) => {
            let (a, b) = (recurse(a)?, recurse(b)?);
            Some(Interval::new(add(&a.min, &b.min), add(&a.max, &b.max)))
        }
        Expr::Sub(a, b) => {
            let (a, b) = (recurse(a)?, recurse(b)?);
            Some(Interval::new(sub(&a.min, &b.max), sub(&a.max, &b.min)))
        }
        Expr::Mul(a, b) => {
            let (ia, ib) = (recurse(a)?, recurse(b)?);
            // A point operand scales the other interval; the sign decides
            // which end becomes the min.
            if let Some(k) = point_value(&ib) {
                return Some(scale(&ia, &k));
            }
            if let Some(k) = point_value(&ia) {
                return Some(scale(&ib, &k));
            }
            // General case: the four corners, folded symbolically.
            let corners = [
                mul(&ia.min, &ib.min),
                mul(&ia.min, &ib.max),
                mul(&ia.max, &ib.min),
                mul(&ia.max, &ib.max),
            ];
            let lo = corners.iter().skip(1).fold(corners[0].clone(), |acc, c| min(acc, c));
            let hi = corners.iter().skip(1).fold(corners[0].clone(), |acc, c| max(acc, c));
            Some(Interval::new(lo, hi))
        }
        Expr::Div(a, b) => {
            let (ia, ib) = (recurse(a)?, recurse(b)?);
            let k = point_value(&ib)?;
            match k.as_int() {
                Some(v) if v > 0 => {
                    Some(Interval::new(crate::expr::div(&ia.min, &k), crate::expr::div(&ia.max, &k)))
                }
                Some(v) if v < 0 => {
                    Some(Interval::new(crate::expr::div(&ia.max, &k), crate::expr::div(&ia.min, &k)))
                }
                _ => None,
            }
        }
        Expr::Mod(_, b) => {
            let ib = recurse(b)?;
            let k = point_value(&ib)?;
            match k.as_int() {
                Some(v) if v > 0 => Some(Interval::new(int(0), int(v - 1))),
                _ => None,
            }
        }
        Expr::Min(a, b) => {
            let (a, b) = (recurse(a)?, recurse(b)?);
            Some(Interval::new(min(&a.min, &b.min), min(&a.max, &b.max)))
        }
        Expr::Max(a, b) => {
            let (a, b) = (recurse(a)?, recurse(b)?);
            Some(Interval::new(max(&a.min, &b.min), max(&a.max, &b.max)))
        }

        Expr::Eq(..) | Expr::Ne(..) | Expr::Lt(..) | Expr::Le(..) | Expr::Gt(..) | Expr::Ge(..)
        | Expr::And(..) | Expr::Or(..) | Expr::Not(..) => {
            Some(Interval::new(crate::expr::boolean(false), crate::expr::boolean(true)))
        }

        Expr::Select { true_value, false_value, .. } => {
            let (t, f) = (recurse(true_value)?, recurse(false_value)?);
            Some(interval_union(&t, &f))
        }

        Expr::Likely(a) => recurse(a),

        Expr::Let { name, value, body } => {
            let bound_value = recurse(value)?;
            let mut inner = scope.clone();
            inner.push(name.clone(), bound_value);
            bounds_of_expr_in_scope(body, &inner, value_bounds)
        }

        Expr::Call { kind: CallKind::Func { name, value_index }, .. } => {
            value_bounds.get(&(name.clone(), *value_index)).cloned()
        }
        Expr::Call { .. } => None,
    }
}

fn point_value(i: &Interval) -> Option<ExprRef> {
    if i.min == i.max { Some(i.min.clone()) } else { None }
}

fn scale(i: &Interval, k: &ExprRef) -> Interval {
    match k.as_int() {
        Some(v) if v >= 0 => Interval::new(mul(&i.min, k), mul(&i.max, k)),
        Some(_) => Interval::new(mul(&i.max, k), mul(&i.min, k)),
        // Symbolic factor: order unknown, take both corners.
        None => Interval::new(min(mul(&i.min, k), mul(&i.max, k)), max(mul(&i.min, k), mul(&i.max, k))),
    }
}

/// For every pipeline function called (transitively through expression
/// structure, not through the call graph) by `e`, the region of that
/// function's domain read, with the expression's free variables ranging over
/// `scope`. Regions for a function called more than once are merged by
/// per-axis union.
pub fn boxes_required(
    e: &ExprRef,
    scope: &Scope,
    value_bounds: &FuncValueBounds,
) -> BTreeMap<String, Region> {
    let mut regions = BTreeMap::new();
    collect_call_regions(e, scope, value_bounds, &mut regions);
    for region in regions.values_mut() {
        region.simplify();
    }
    regions
}

fn collect_call_regions(
    e: &ExprRef,
    scope: &Scope,
    value_bounds: &FuncValueBounds,
    regions: &mut BTreeMap<String, Region>,
) {
    if let Expr::Call { kind: CallKind::Func { name, .. }, args } = &**e {
        let mut region = Region::default();
        let mut ok = true;
        for arg in args {
            match bounds_of_expr_in_scope(arg, scope, value_bounds) {
                Some(interval) => region.push(interval),
                None => {
                    ok = false;
                    break;
                }
            }
        }
        if ok {
            match regions.get_mut(name) {
                Some(existing) if existing.len() == region.len() => merge_regions(existing, &region),
                Some(_) => {}
                None => {
                    regions.insert(name.clone(), region);
                }
            }
        }
    }
    // Arguments may themselves contain calls.
    match &**e {
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
            collect_call_regions(a, scope, value_bounds, regions);
            collect_call_regions(b, scope, value_bounds, regions);
        }
        Expr::Not(a) | Expr::Likely(a) => collect_call_regions(a, scope, value_bounds, regions),
        Expr::Select { condition, true_value, false_value } => {
            collect_call_regions(condition, scope, value_bounds, regions);
            collect_call_regions(true_value, scope, value_bounds, regions);
            collect_call_regions(false_value, scope, value_bounds, regions);
        }
        Expr::Let { value, body, .. } => {
            collect_call_regions(value, scope, value_bounds, regions);
            collect_call_regions(body, scope, value_bounds, regions);
        }
        Expr::Call { args, .. } => {
            for arg in args {
                collect_call_regions(arg, scope, value_bounds, regions);
            }
        }
        _ => {}
    }
}
