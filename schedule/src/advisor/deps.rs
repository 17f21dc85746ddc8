//! Dependency-region analysis: for every function, the symbolic region of
//! each upstream producer needed to compute a region of it, and the
//! per-axis overlap computed twice by adjacent tiles.

use std::collections::{BTreeMap, VecDeque};

use fresco_ir::bounds::{FuncValueBounds, boxes_required};
use fresco_ir::expr::{add, int, sub, var};
use fresco_ir::func::{Env, Function};
use fresco_ir::interval::{Interval, Region, Scope, interval_intersect, merge_regions};
use fresco_ir::schedule::Bound;
use fresco_ir::simplify::simplify;
use fresco_ir::substitute::substitute_map;
use tracing::trace;

/// The regions of every reachable producer needed to compute `f` over
/// `sym_bounds` (one interval per argument of `f`). Breadth-first over the
/// reverse call graph; revisited producers merge by per-axis union.
pub fn regions_required(
    f: &Function,
    sym_bounds: &[Interval],
    env: &Env,
    value_bounds: &FuncValueBounds,
) -> BTreeMap<String, Region> {
    let mut regions: BTreeMap<String, Region> = BTreeMap::new();
    let mut queue: VecDeque<(String, Vec<Interval>)> = VecDeque::new();
    queue.push_back((f.name().to_string(), sym_bounds.to_vec()));

    while let Some((curr_name, curr_bounds)) = queue.pop_front() {
        let Some(curr) = env.get(&curr_name) else { continue };
        if curr_bounds.len() != curr.args().len() {
            continue;
        }
        for value in curr.values() {
            let mut scope = Scope::new();
            for (arg, interval) in curr.args().iter().zip(&curr_bounds) {
                scope.push(arg.clone(), interval.simplified());
            }
            let call_regions = boxes_required(value, &scope, value_bounds);
            for (callee, region) in call_regions {
                match regions.get_mut(&callee) {
                    Some(existing) if existing.len() == region.len() => {
                        merge_regions(existing, &region);
                    }
                    Some(_) => {}
                    None => {
                        regions.insert(callee.clone(), region.clone());
                    }
                }
                queue.push_back((callee, region.0));
            }
        }
    }

    for region in regions.values_mut() {
        region.simplify();
    }
    regions
}

/// The overlap two adjacent tiles along axis `dir` compute in common: shift
/// the consumer's interval on that axis by its own extent, recompute the
/// required regions, and intersect with the originals.
pub fn redundant_regions(
    f: &Function,
    dir: usize,
    sym_bounds: &[Interval],
    env: &Env,
    value_bounds: &FuncValueBounds,
) -> BTreeMap<String, Region> {
    let regions = regions_required(f, sym_bounds, env, value_bounds);

    let shifted_bounds: Vec<Interval> = sym_bounds
        .iter()
        .enumerate()
        .map(|(arg, interval)| {
            if arg == dir {
                let len = add(sub(&interval.max, &interval.min), 1);
                Interval::new(add(&interval.min, &len), add(&interval.max, len))
            } else {
                interval.clone()
            }
        })
        .collect();

    let regions_shifted = regions_required(f, &shifted_bounds, env, value_bounds);

    let mut overlaps = BTreeMap::new();
    for (name, region) in regions {
        let overlap = match regions_shifted.get(&name) {
            Some(shifted) if shifted.len() == region.len() => {
                let mut out = Region::default();
                for (a, b) in region.iter().zip(shifted.iter()) {
                    out.push(interval_intersect(a, b));
                }
                out.simplify();
                out
            }
            // The shifted walk lost this producer (its region did not
            // survive bounds analysis under the shifted window). Degrade
            // to an unknown overlap: area -1 rejects the option rather
            // than aborting the compiler.
            _ => {
                trace!(producer = %name, axis = dir, "shifted region map missing producer");
                Region(region.iter().map(|_| Interval::single(var("__unknown"))).collect())
            }
        };
        overlaps.insert(name, overlap);
    }
    overlaps
}

/// Precomputed symbolic dependence data for a whole pipeline.
///
/// Construction walks every function once; concretization substitutes
/// integer tile bounds for the symbolic `(<arg>_l, <arg>_u)` pairs on
/// demand and owns everything it needs, so the environment stays free for
/// schedule mutation while the partitioner runs.
pub struct DependenceAnalysis {
    /// consumer → producer → symbolic required region.
    pub dep_regions: BTreeMap<String, BTreeMap<String, Region>>,
    /// consumer → axis → producer → symbolic redundant region.
    pub overlaps: BTreeMap<String, Vec<BTreeMap<String, Region>>>,
    /// Per-function `(lower, upper)` symbol names, one pair per axis.
    sym: BTreeMap<String, Vec<(String, String)>>,
    args: BTreeMap<String, Vec<String>>,
    declared_bounds: BTreeMap<String, Vec<Bound>>,
}

impl DependenceAnalysis {
    pub fn new(env: &Env, value_bounds: &FuncValueBounds) -> Self {
        let mut dep_regions = BTreeMap::new();
        let mut overlaps = BTreeMap::new();
        let mut sym = BTreeMap::new();
        let mut args = BTreeMap::new();
        let mut declared_bounds = BTreeMap::new();

        for (name, f) in env {
            let mut sym_names = Vec::new();
            let mut sym_bounds = Vec::new();
            for arg in f.args() {
                let lower = format!("{arg}_l");
                let upper = format!("{arg}_u");
                sym_bounds.push(Interval::new(var(&lower), var(&upper)));
                sym_names.push((lower, upper));
            }

            dep_regions.insert(name.clone(), regions_required(f, &sym_bounds, env, value_bounds));

            let mut per_axis = Vec::new();
            for dir in 0..f.args().len() {
                per_axis.push(redundant_regions(f, dir, &sym_bounds, env, value_bounds));
            }
            overlaps.insert(name.clone(), per_axis);

            sym.insert(name.clone(), sym_names);
            args.insert(name.clone(), f.args().to_vec());
            declared_bounds.insert(name.clone(), f.schedule().bounds.clone());
        }

        Self { dep_regions, overlaps, sym, args, declared_bounds }
    }

    pub fn args(&self, func: &str) -> &[String] {
        self.args.get(func).map(|a| a.as_slice()).unwrap_or(&[])
    }

    /// Substitute concrete `(min, max)` bounds for the symbolic interval of
    /// each evaluated axis, falling back to the producer's declared bound
    /// when an endpoint does not fold to a constant.
    fn concretize(
        &self,
        func: &str,
        eval: &[bool],
        bounds: &[(i64, i64)],
        symbolic: &BTreeMap<String, Region>,
    ) -> BTreeMap<String, Region> {
        let mut replacements = std::collections::HashMap::new();
        if let Some(sym_names) = self.sym.get(func) {
            for (i, (lower, upper)) in sym_names.iter().enumerate() {
                if eval.get(i).copied().unwrap_or(false) {
                    replacements.insert(lower.clone(), int(bounds[i].0));
                    replacements.insert(upper.clone(), int(bounds[i].1));
                }
            }
        }

        let mut out = BTreeMap::new();
        for (producer, region) in symbolic {
            let producer_args = self.args.get(producer);
            let producer_bounds = self.declared_bounds.get(producer);
            let mut concrete = Region::default();
            for (i, interval) in region.iter().enumerate() {
                let mut lower = simplify(&substitute_map(&replacements, &interval.min));
                let mut upper = simplify(&substitute_map(&replacements, &interval.max));

                let declared = || -> Option<&Bound> {
                    let arg = producer_args?.get(i)?;
                    producer_bounds?.iter().find(|b| &b.var == arg)
                };
                if lower.as_int().is_none()
                    && let Some(b) = declared()
                    && let Some(min) = b.min.as_int()
                {
                    lower = int(min);
                }
                if upper.as_int().is_none()
                    && let Some(b) = declared()
                    && let (Some(min), Some(extent)) = (b.min.as_int(), b.extent.as_int())
                {
                    upper = int(min + extent - 1);
                }
                concrete.push(Interval { min: lower, max: upper });
            }
            out.insert(producer.clone(), concrete);
        }
        out
    }

    /// Concrete required regions of every producer for a tile of `func`.
    pub fn concrete_dep_regions(
        &self,
        func: &str,
        eval: &[bool],
        bounds: &[(i64, i64)],
    ) -> BTreeMap<String, Region> {
        let symbolic = self.dep_regions.get(func).cloned().unwrap_or_default();
        self.concretize(func, eval, bounds, &symbolic)
    }

    /// Concrete per-axis redundant regions for a tile of `func`.
    pub fn concrete_overlap_regions(
        &self,
        func: &str,
        eval: &[bool],
        bounds: &[(i64, i64)],
    ) -> Vec<BTreeMap<String, Region>> {
        let Some(per_axis) = self.overlaps.get(func) else { return Vec::new() };
        per_axis.iter().map(|axis| self.concretize(func, eval, bounds, axis)).collect()
    }
}
