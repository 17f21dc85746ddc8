//! Cost primitives for the partitioner: per-value expression costs, region
//! areas and sizes, and the redundant-overlap cost.
//!
//! `-1` is the conventional "unknown" everywhere in this module; it
//! propagates outward and ultimately rejects whatever option needed the
//! number.

use std::collections::BTreeMap;

use fresco_ir::callgraph::realization_order;
use fresco_ir::expr::{CallKind, Expr, ExprRef};
use fresco_ir::func::Env;
use fresco_ir::interval::{Interval, Region};
use fresco_ir::visit::{IrVisitor, visit_expr_children};

/// Operation and load counts of one value expression.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExprCost {
    pub ops: i64,
    pub loads: i64,
}

impl IrVisitor for ExprCost {
    fn visit_expr(&mut self, e: &ExprRef) {
        match &**e {
            Expr::IntImm(_) | Expr::FloatImm(_) | Expr::BoolImm(_) | Expr::StrImm(_) | Expr::Var(_) => {}
            Expr::Add(..)
            | Expr::Sub(..)
            | Expr::Mul(..)
            | Expr::Div(..)
            | Expr::Mod(..)
            | Expr::Min(..)
            | Expr::Max(..)
            | Expr::Eq(..)
            | Expr::Ne(..)
            | Expr::Lt(..)
            | Expr::Le(..)
            | Expr::Gt(..)
            | Expr::Ge(..)
            | Expr::And(..)
            | Expr::Or(..)
            | Expr::Not(..)
            | Expr::Select { .. } => self.ops += 1,
            Expr::Likely(..) | Expr::Let { .. } => {}
            Expr::Call { kind, .. } => match kind {
                CallKind::Func { .. } => self.loads += 1,
                CallKind::Intrinsic(_) => self.ops += 1,
                CallKind::Extern(_) => {}
            },
        }
        visit_expr_children(self, e);
    }
}

/// Per-function, per-value `(ops, loads)` over the pure definition.
pub type FuncCost = BTreeMap<String, Vec<(i64, i64)>>;

pub fn compute_func_cost(env: &Env) -> FuncCost {
    let mut out = FuncCost::new();
    for (name, f) in env {
        let costs = f
            .values()
            .iter()
            .map(|value| {
                let mut cost = ExprCost::default();
                cost.visit_expr(value);
                (cost.ops, cost.loads)
            })
            .collect();
        out.insert(name.clone(), costs);
    }
    out
}

/// Arithmetic cost of producing one element: one store plus the ops of
/// every output channel.
pub fn op_cost(costs: &[(i64, i64)]) -> i64 {
    1 + costs.iter().map(|(ops, _)| ops).sum::<i64>()
}

/// Loads issued to produce one element across all output channels.
pub fn mem_cost(costs: &[(i64, i64)]) -> i64 {
    costs.iter().map(|(_, loads)| loads).sum()
}

/// Integer extent of an interval, `0` if empty, `-1` if unknown.
pub fn get_extent(interval: &Interval) -> i64 {
    match (interval.min.as_int(), interval.max.as_int()) {
        (Some(min), Some(max)) if min <= max => max - min + 1,
        (Some(_), Some(_)) => 0,
        _ => -1,
    }
}

/// Number of points in the region; `0` if any axis is empty, `-1` if any
/// axis is unknown.
pub fn box_area(region: &Region) -> i64 {
    let mut area: i64 = 1;
    for interval in region.iter() {
        match get_extent(interval) {
            0 => return 0,
            extent if extent > 0 && area > 0 => area *= extent,
            _ => area = -1,
        }
    }
    area
}

/// Bytes needed to store the region of one function's output.
pub fn region_size_bytes(func: &str, region: &Region, env: &Env) -> i64 {
    let area = box_area(region);
    if area < 0 {
        return -1;
    }
    let Some(f) = env.get(func) else { return -1 };
    let elem_bytes: i64 = f.output_types().iter().map(|t| t.bytes() as i64).sum();
    area * elem_bytes
}

/// High-watermark of intermediate storage needed to evaluate the given
/// regions in realization order, freeing each producer once its last
/// consumer has run.
pub fn working_set_size(
    regions: &BTreeMap<String, Region>,
    env: &Env,
    dep_regions: &BTreeMap<String, BTreeMap<String, Region>>,
) -> i64 {
    let mut num_consumers: BTreeMap<&str, i64> =
        regions.keys().map(|name| (name.as_str(), 0)).collect();
    for name in regions.keys() {
        if let Some(producers) = dep_regions.get(name) {
            for producer in producers.keys() {
                if let Some(count) = num_consumers.get_mut(producer.as_str()) {
                    *count += 1;
                }
            }
        }
    }

    let outs: Vec<String> =
        num_consumers.iter().filter(|(_, n)| **n == 0).map(|(name, _)| name.to_string()).collect();
    assert_eq!(outs.len(), 1, "working set must have exactly one sink, found {outs:?}");

    let Ok(order) = realization_order(&outs, env) else { return -1 };

    let mut sizes: BTreeMap<&str, i64> = BTreeMap::new();
    for (name, region) in regions {
        let size = region_size_bytes(name, region, env);
        if size < 0 {
            return -1;
        }
        sizes.insert(name, size);
    }

    let mut current: i64 = 0;
    let mut high_water: i64 = 0;
    for name in &order {
        current += sizes.get(name.as_str()).copied().unwrap_or(0);
        high_water = high_water.max(current);
        if let Some(producers) = dep_regions.get(name) {
            for producer in producers.keys() {
                if let Some(count) = num_consumers.get_mut(producer.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        current -= sizes.get(producer.as_str()).copied().unwrap_or(0);
                    }
                }
            }
        }
    }
    high_water
}

/// Arithmetic cost of computing a region of one function.
pub fn region_cost_one(func: &str, region: &Region, func_cost: &FuncCost) -> i64 {
    let area = box_area(region);
    if area < 0 {
        return -1;
    }
    let costs = func_cost.get(func).map(|c| c.as_slice()).unwrap_or(&[]);
    area * op_cost(costs)
}

/// Summed arithmetic cost across a region map; `-1` if any is unknown.
pub fn region_cost(regions: &BTreeMap<String, Region>, func_cost: &FuncCost) -> i64 {
    let mut total = 0;
    for (func, region) in regions {
        let cost = region_cost_one(func, region, func_cost);
        if cost < 0 {
            return -1;
        }
        total += cost;
    }
    total
}

/// Cost of the work two adjacent tiles both perform for one producer:
/// overlap area times per-element op cost, summed over the requested axis
/// (or all axes when `dim` is `None`).
pub fn overlap_cost_one(
    prod: &str,
    overlaps: &[BTreeMap<String, Region>],
    func_cost: &FuncCost,
    dim: Option<usize>,
) -> i64 {
    let mut total_area = 0;
    for (d, per_axis) in overlaps.iter().enumerate() {
        if let Some(region) = per_axis.get(prod)
            && dim.is_none_or(|wanted| wanted == d)
        {
            let area = box_area(region);
            if area < 0 {
                return -1;
            }
            total_area += area;
        }
    }
    let costs = func_cost.get(prod).map(|c| c.as_slice()).unwrap_or(&[]);
    total_area * op_cost(costs)
}

/// Summed overlap cost across all producers except the consumer itself.
pub fn overlap_cost(
    cons: &str,
    prods: &[String],
    overlaps: &[BTreeMap<String, Region>],
    func_cost: &FuncCost,
    dim: Option<usize>,
) -> i64 {
    let mut total = 0;
    for prod in prods {
        if prod != cons {
            let cost = overlap_cost_one(prod, overlaps, func_cost, dim);
            if cost < 0 {
                return -1;
            }
            total += cost;
        }
    }
    total
}
