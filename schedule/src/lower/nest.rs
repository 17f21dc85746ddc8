//! Loop-nest synthesis for a single stage.
//!
//! Given a store site, the stage's value expressions and its schedule, this
//! builds the imperative nest inside out: an opaque `Provide` at the core,
//! split/fuse/rename substitutions and their defining lets around it, one
//! `For` per schedule dim, bounds-defining lets outside those, and finally
//! the specialization branches.

use std::collections::HashMap;

use fresco_ir::expr::{ExprRef, add, boolean, div, int, likely, max, min, modulo, mul, sub, var};
use fresco_ir::func::Function;
use fresco_ir::schedule::{ForType, OUTERMOST, Schedule, SpecPredicate, Split, SplitKind};
use fresco_ir::simplify::{simplify, simplify_stmt};
use fresco_ir::stmt::{Stmt, StmtRef, for_loop, if_then_else, let_stmt, provide};
use fresco_ir::substitute::{expr_uses_var, substitute_stmt};
use fresco_ir::unique_name;
use tracing::trace;

use crate::error::{ExactSplitSnafu, Result};

/// A containing `LetStmt` or `For` awaiting re-wrapping, outermost first.
struct Container {
    /// Index into the schedule's dim list; `None` for let statements.
    dim_idx: Option<usize>,
    name: String,
    value: Option<ExprRef>,
}

/// Re-associate a split list so that every split's `old` variable is never
/// produced by a later split, absorbing renames along the way.
///
/// Given `X -> a*Xo + Xi` followed by `Xo -> b*Xoo + Xoi`, rewrites to
/// `X -> (a*b)*Xoo + s` and `s -> a*Xoi + Xi` for a fresh `s`; the `exact`
/// flag is unioned across the pair. A rename whose target is later split is
/// folded into that split. Unrelated splits keep their relative order, and
/// the rewrite is idempotent.
pub fn normalize_splits(splits: &[Split]) -> Vec<Split> {
    let mut splits = splits.to_vec();
    let mut i = 0;
    while i < splits.len() {
        let mut j = i + 1;
        while j < splits.len() {
            if splits[i].outer == splits[j].old {
                assert!(
                    !splits[j].is_rename(),
                    "rename of derived variable {:?} found in splits list",
                    splits[j].old
                );

                if splits[i].is_rename() {
                    // X -> Y then Y -> f*Z + W coalesces to X -> f*Z + W.
                    splits[j].old = splits[i].old.clone();
                    splits.remove(i);
                    j = i + 1;
                } else {
                    assert!(
                        splits[i].is_split() && splits[j].is_split(),
                        "cannot re-associate a fused variable that is split again"
                    );
                    let fresh = unique_name('s');
                    let exact = splits[i].exact || splits[j].exact;
                    splits[i].exact = exact;
                    splits[j].exact = exact;
                    splits[j].old = fresh.clone();
                    splits[i].outer = splits[j].outer.clone();
                    splits[j].outer = splits[j].inner.clone();
                    splits[j].inner = splits[i].inner.clone();
                    splits[i].inner = fresh;
                    let combined = simplify(&mul(
                        splits[i].factor.clone().expect("split without factor"),
                        splits[j].factor.clone().expect("split without factor"),
                    ));
                    splits[j].factor = splits[i].factor.clone();
                    splits[i].factor = Some(combined);
                    // Keep the derived split immediately after its producer.
                    let second = splits.remove(j);
                    splits.insert(i + 1, second);
                }
            }
            j += 1;
        }
        i += 1;
    }
    splits
}

/// Build the statement realizing one stage of `f` over the given site and
/// values under schedule `s`. `is_update` suppresses the tail-clamping that
/// only pure stages may apply.
pub fn build_loop_nest(
    f: &Function,
    prefix: &str,
    site: &[ExprRef],
    values: &[ExprRef],
    s: &Schedule,
    is_update: bool,
) -> Result<StmtRef> {
    trace!(func = f.name(), prefix, is_update, "building loop nest");

    // The (multi-dimensional, multi-valued) store node at the core.
    let mut stmt = provide(f.name(), values.to_vec(), site.to_vec());

    // Dimensions with a known static size: explicit bounds first, then the
    // reduction domain.
    let mut known_size: HashMap<String, ExprRef> = HashMap::new();
    for b in &s.bounds {
        known_size.insert(b.var.clone(), b.extent.clone());
    }
    if let Some(rdom) = &s.rdom {
        for rv in &rdom.domain {
            known_size.insert(rv.var.clone(), rv.extent.clone());
        }
    }

    let splits = normalize_splits(&s.splits);

    // The first dim that is a real loop; a clamped split base below it gets
    // a `likely` marker to trigger loop partitioning.
    let innermost_non_trivial =
        s.dims.iter().find(|d| d.for_type != ForType::Vectorized && d.for_type != ForType::Unrolled);

    // Define the function args in terms of the loop variables.
    for split in &splits {
        let outer_var = var(format!("{prefix}{}", split.outer));
        match split.kind {
            SplitKind::SplitVar => {
                let factor = split.factor.clone().expect("split without factor");
                let inner_var = var(format!("{prefix}{}", split.inner));
                let old_min = var(format!("{prefix}{}.loop_min", split.old));
                let old_max = var(format!("{prefix}{}.loop_max", split.old));

                known_size.insert(split.inner.clone(), factor.clone());

                let mut base = add(mul(&outer_var, &factor), &old_min);

                let old_extent = known_size.get(&split.old).cloned();
                let divides = old_extent
                    .as_ref()
                    .is_some_and(|extent| simplify(&modulo(extent, &factor)).is_zero());
                if divides {
                    let extent = old_extent.expect("divisibility implies a known extent");
                    known_size.insert(split.outer.clone(), simplify(&div(extent, &factor)));
                } else if split.exact {
                    return ExactSplitSnafu {
                        var: split.old.clone(),
                        outer: split.outer.clone(),
                        inner: split.inner.clone(),
                        factor: factor.to_string(),
                        extent: old_extent.map_or_else(|| "unknown".to_string(), |e| e.to_string()),
                    }
                    .fail();
                } else if !is_update && !split.partial {
                    // Shift the base down so the tail tile stays inside the
                    // realization.
                    if let Some(innermost) = innermost_non_trivial
                        && innermost.var == split.outer
                        && innermost.for_type == ForType::Serial
                    {
                        base = likely(base);
                    }
                    base = min(base, add(&old_max, sub(int(1), &factor)));
                }

                let base_name = format!("{prefix}{}.base", split.inner);
                let base_var = var(&base_name);
                let old_name = format!("{prefix}{}", split.old);
                // Substitute the split variable away, but also keep a let
                // for it: bounds inference reads it.
                stmt = substitute_stmt(&old_name, &add(&base_var, &inner_var), &stmt);
                stmt = let_stmt(old_name, add(&base_var, &inner_var), stmt);
                stmt = let_stmt(base_name, base, stmt);
            }
            SplitKind::FuseVars => {
                let fused = var(format!("{prefix}{}", split.old));
                let inner_min = var(format!("{prefix}{}.loop_min", split.inner));
                let outer_min = var(format!("{prefix}{}.loop_min", split.outer));
                let inner_extent = var(format!("{prefix}{}.loop_extent", split.inner));

                // A zero inner extent means the loop is never entered, but
                // the lets lifted out must still be division-safe.
                let factor = max(&inner_extent, 1);
                let inner_value = add(modulo(&fused, &factor), &inner_min);
                let outer_value = add(div(&fused, &factor), &outer_min);

                let inner_name = format!("{prefix}{}", split.inner);
                let outer_name = format!("{prefix}{}", split.outer);
                stmt = substitute_stmt(&inner_name, &inner_value, &stmt);
                stmt = substitute_stmt(&outer_name, &outer_value, &stmt);
                stmt = let_stmt(inner_name, inner_value, stmt);
                stmt = let_stmt(outer_name, outer_value, stmt);

                // Keep the fused size known when both halves are, for the
                // benefit of later splits of the fused var.
                let fused_size = match (known_size.get(&split.inner), known_size.get(&split.outer)) {
                    (Some(i), Some(o)) => Some(simplify(&mul(i, o))),
                    _ => None,
                };
                if let Some(size) = fused_size {
                    known_size.insert(split.old.clone(), size);
                }
            }
            SplitKind::Rename => {
                let old_name = format!("{prefix}{}", split.old);
                stmt = substitute_stmt(&old_name, &outer_var, &stmt);
                stmt = let_stmt(old_name, outer_var.clone(), stmt);
            }
        }
    }

    // Gather the containers: one For per dim (outermost first), then every
    // let wrapped around the store so far.
    let mut nest: Vec<Container> = Vec::new();
    for i in (0..s.dims.len()).rev() {
        nest.push(Container { dim_idx: Some(i), name: format!("{prefix}{}", s.dims[i].var), value: None });
    }
    loop {
        let Stmt::LetStmt { name, value, body } = &*stmt else { break };
        nest.push(Container { dim_idx: None, name: name.clone(), value: Some(value.clone()) });
        let inner = body.clone();
        stmt = inner;
    }

    // Push each let as far outward as its dependencies permit: reverse
    // insertion sort, stopping at the first container it reads.
    let dim_count = s.dims.len();
    for i in dim_count..nest.len() {
        for j in (0..i).rev() {
            let value = nest[j + 1].value.as_ref().expect("only lets are pushed outward");
            if expr_uses_var(value, &nest[j].name) {
                break;
            }
            nest.swap(j + 1, j);
        }
    }

    // Re-wrap, outermost first.
    for c in nest.iter().rev() {
        match (&c.value, c.dim_idx) {
            (Some(value), _) => stmt = let_stmt(&c.name, value, stmt),
            (None, Some(idx)) => {
                let dim = &s.dims[idx];
                stmt = for_loop(
                    &c.name,
                    var(format!("{}.loop_min", c.name)),
                    var(format!("{}.loop_extent", c.name)),
                    dim.for_type,
                    dim.device_api,
                    stmt,
                );
            }
            (None, None) => unreachable!("container is neither let nor dim"),
        }
    }

    // Define the bounds of the variables each split introduced, from the
    // pre-split variable's bounds.
    for split in splits.iter().rev() {
        let old_min = var(format!("{prefix}{}.loop_min", split.old));
        let old_max = var(format!("{prefix}{}.loop_max", split.old));
        let old_extent = var(format!("{prefix}{}.loop_extent", split.old));
        match split.kind {
            SplitKind::SplitVar => {
                let factor = split.factor.clone().expect("split without factor");
                let inner_extent = if split.partial {
                    min(likely(&factor), add(&old_max, 1))
                } else {
                    factor.clone()
                };
                let outer_extent = div(add(sub(&old_max, &old_min), &factor), &factor);

                stmt = let_stmt(format!("{prefix}{}.loop_min", split.inner), 0, stmt);
                stmt = let_stmt(format!("{prefix}{}.loop_max", split.inner), sub(&inner_extent, 1), stmt);
                stmt = let_stmt(format!("{prefix}{}.loop_extent", split.inner), &inner_extent, stmt);
                stmt = let_stmt(format!("{prefix}{}.loop_min", split.outer), 0, stmt);
                stmt = let_stmt(format!("{prefix}{}.loop_max", split.outer), sub(&outer_extent, 1), stmt);
                stmt = let_stmt(format!("{prefix}{}.loop_extent", split.outer), outer_extent, stmt);
            }
            SplitKind::FuseVars => {
                let inner_extent = var(format!("{prefix}{}.loop_extent", split.inner));
                let outer_extent = var(format!("{prefix}{}.loop_extent", split.outer));
                let fused_extent = mul(&inner_extent, &outer_extent);
                stmt = let_stmt(format!("{prefix}{}.loop_min", split.old), 0, stmt);
                stmt = let_stmt(format!("{prefix}{}.loop_max", split.old), sub(&fused_extent, 1), stmt);
                stmt = let_stmt(format!("{prefix}{}.loop_extent", split.old), fused_extent, stmt);
            }
            SplitKind::Rename => {
                stmt = let_stmt(format!("{prefix}{}.loop_min", split.outer), old_min, stmt);
                stmt = let_stmt(format!("{prefix}{}.loop_max", split.outer), old_max, stmt);
                stmt = let_stmt(format!("{prefix}{}.loop_extent", split.outer), old_extent, stmt);
            }
        }
    }

    // The synthetic outermost dummy is a single iteration.
    let o = format!("{prefix}{OUTERMOST}");
    stmt = let_stmt(format!("{o}.loop_min"), 0, stmt);
    stmt = let_stmt(format!("{o}.loop_max"), 1, stmt);
    stmt = let_stmt(format!("{o}.loop_extent"), 1, stmt);

    // Loop bounds of the original args come from the `.min`/`.max` symbols
    // injected by bounds inference.
    for arg in f.args() {
        let name = format!("{prefix}{arg}");
        let arg_min = var(format!("{name}.min"));
        let arg_max = var(format!("{name}.max"));
        stmt = let_stmt(format!("{name}.loop_extent"), sub(add(&arg_max, 1), &arg_min), stmt);
        stmt = let_stmt(format!("{name}.loop_min"), arg_min, stmt);
        stmt = let_stmt(format!("{name}.loop_max"), arg_max, stmt);
    }

    // Specialized copies, innermost-priority last in the list, so process
    // back to front.
    for spec in s.specializations.iter().rev() {
        let then_case = build_loop_nest(f, prefix, site, values, &spec.schedule, is_update)?;
        stmt = match SpecPredicate::classify(&spec.condition) {
            SpecPredicate::VarEqLiteral(name, literal) => {
                let then_case = simplify_stmt(&substitute_stmt(&name, &literal, &then_case));
                let else_case = match literal.as_bool() {
                    Some(b) => simplify_stmt(&substitute_stmt(&name, &boolean(!b), &stmt)),
                    None => stmt.clone(),
                };
                if_then_else(&spec.condition, then_case, Some(else_case))
            }
            SpecPredicate::BoolVar(name) => {
                let then_case = simplify_stmt(&substitute_stmt(&name, &boolean(true), &then_case));
                let else_case = simplify_stmt(&substitute_stmt(&name, &boolean(false), &stmt));
                if_then_else(&spec.condition, then_case, Some(else_case))
            }
            SpecPredicate::General => if_then_else(&spec.condition, then_case, Some(stmt.clone())),
        };
    }

    Ok(stmt)
}
