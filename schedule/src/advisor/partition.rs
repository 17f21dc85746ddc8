//! Producer/consumer grouping with a redundant-compute vs. locality cost
//! model.
//!
//! A group is a set of functions fused into the loop nest of its output
//! function. Grouping runs in two phases: an inline phase that probes
//! per-element fusion, then a fast-memory phase that tiles the consumer and
//! fuses producers at tile granularity. Both repeat until no option with
//! positive benefit remains; every accepted merge shrinks the group count,
//! so the fixed point terminates.

use std::collections::{BTreeMap, BTreeSet};

use fresco_ir::callgraph::find_direct_calls;
use fresco_ir::func::Env;
use fresco_ir::interval::{Interval, Region};
use fresco_ir::schedule::LoopLevel;
use tracing::{debug, trace};

use super::config::MachineParams;
use super::cost::{
    FuncCost, get_extent, mem_cost, op_cost, overlap_cost, region_cost, working_set_size,
};
use super::deps::DependenceAnalysis;

/// Which granularity the grouping loop is currently targeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Fuse producers into consumers per element.
    Inline,
    /// Fuse at the granularity of a fast-memory-sized tile.
    FastMem,
}

/// One candidate fusion: merge `prod_group` into `cons_group`, computing
/// everything at the granularity of the consumer tile given by
/// `tile_sizes` (`-1` = axis not tiled).
#[derive(Debug, Clone)]
pub struct FusionOption {
    pub prod_group: String,
    pub cons_group: String,
    pub tile_sizes: Vec<i64>,
    /// Memory traffic saved minus redundant compute; `-1.0` = infeasible.
    pub benefit: f64,
    /// Extra work introduced relative to unfused evaluation.
    pub redundant_work: f64,
}

impl FusionOption {
    fn infeasible(prod_group: String, cons_group: String) -> Self {
        Self { prod_group, cons_group, tile_sizes: Vec::new(), benefit: -1.0, redundant_work: -1.0 }
    }
}

/// The schedule the partitioner settled on for one group.
#[derive(Debug, Clone)]
pub struct GroupSchedule {
    pub tile_sizes: Vec<i64>,
    pub benefit: f64,
}

/// Agglomerative clustering state over the function DAG.
pub struct Partitioner<'a> {
    pub pipeline_bounds: &'a BTreeMap<String, Region>,
    pub inlines: BTreeMap<String, String>,
    analysis: &'a DependenceAnalysis,
    func_cost: &'a FuncCost,

    /// group output → members (the output is always a member).
    pub groups: BTreeMap<String, Vec<String>>,
    pub group_sched: BTreeMap<String, GroupSchedule>,
    /// function/group → consumer groups.
    children: BTreeMap<String, BTreeSet<String>>,

    func_dim_estimates: BTreeMap<String, Vec<i64>>,
    func_op: BTreeMap<String, i64>,
    func_mem: BTreeMap<String, i64>,

    option_cache: BTreeMap<(String, String), FusionOption>,

    pub params: MachineParams,
    /// Sweep mode: log every option evaluated, including the ones rejected
    /// before scoring.
    sweep: bool,
}

fn pair_touches_extern(pair: &(String, String), env: &Env) -> bool {
    env.get(&pair.0).is_some_and(|f| f.has_extern_definition())
        || env.get(&pair.1).is_some_and(|f| f.has_extern_definition())
}

/// Extent estimate of one dimension of a function, from its declared bound
/// and the computed pipeline bounds; `-1` when unknown.
pub fn extent_estimate(
    func: &fresco_ir::func::Function,
    pipeline_bounds: &BTreeMap<String, Region>,
    dim: usize,
) -> i64 {
    let mut estimate = -1;
    let arg = &func.args()[dim];
    for b in &func.schedule().bounds {
        if &b.var == arg
            && let (Some(min), Some(extent)) = (b.min.as_int(), b.extent.as_int())
        {
            estimate = min + extent - 1;
        }
    }
    if let Some(region) = pipeline_bounds.get(func.name())
        && let Some(interval) = region.0.get(dim)
    {
        let extent = get_extent(interval);
        if extent > 0 {
            estimate = estimate.max(extent);
        }
    }
    estimate
}

impl<'a> Partitioner<'a> {
    pub fn new(
        pipeline_bounds: &'a BTreeMap<String, Region>,
        inlines: BTreeMap<String, String>,
        analysis: &'a DependenceAnalysis,
        func_cost: &'a FuncCost,
        env: &Env,
        params: MachineParams,
        sweep: bool,
    ) -> Self {
        // Every function starts in its own group.
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for name in env.keys() {
            groups.insert(name.clone(), vec![name.clone()]);
        }

        // Consumers of each function become the group children.
        let mut children: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (name, f) in env {
            for callee in find_direct_calls(f) {
                children.entry(callee).or_default().insert(name.clone());
            }
        }

        let mut partitioner = Self {
            pipeline_bounds,
            inlines: BTreeMap::new(),
            analysis,
            func_cost,
            groups,
            group_sched: BTreeMap::new(),
            children,
            func_dim_estimates: BTreeMap::new(),
            func_op: BTreeMap::new(),
            func_mem: BTreeMap::new(),
            option_cache: BTreeMap::new(),
            params,
            sweep,
        };

        // Fold pre-decided inlines into their consumer groups.
        for (inlined, consumer) in &inlines {
            let mut dest = consumer.clone();
            if !partitioner.groups.contains_key(&dest) {
                for (output, members) in &partitioner.groups {
                    if members.iter().any(|m| m == consumer) {
                        dest = output.clone();
                        break;
                    }
                }
            }
            partitioner.merge_groups(inlined, &dest);
        }
        partitioner.inlines = inlines;

        for (output, _) in partitioner.groups.clone() {
            let args = partitioner.analysis.args(&output);
            partitioner.group_sched.insert(
                output,
                GroupSchedule { tile_sizes: vec![-1; args.len()], benefit: -1.0 },
            );
        }

        // Whole-pipeline per-function work and traffic, for the baseline
        // side of the benefit computation.
        for (name, f) in env {
            let mut dim_estimates = Vec::new();
            let mut size: i64 = 1;
            for dim in 0..f.args().len() {
                let estimate = extent_estimate(f, pipeline_bounds, dim);
                dim_estimates.push(estimate);
                if estimate != -1 && size != -1 {
                    size *= estimate;
                } else {
                    size = -1;
                }
            }
            let costs = func_cost.get(name).map(|c| c.as_slice()).unwrap_or(&[]);
            let (work, mem) = if size != -1 {
                (op_cost(costs) * size, mem_cost(costs) * size)
            } else {
                (-1, -1)
            };
            partitioner.func_op.insert(name.clone(), work);
            partitioner.func_mem.insert(name.clone(), mem);
            partitioner.func_dim_estimates.insert(name.clone(), dim_estimates);
        }

        partitioner
    }

    /// Move every member of `prod_group` into `cons_group`, rewire the
    /// children map, and drop cache entries the merge invalidated.
    pub fn merge_groups(&mut self, prod_group: &str, cons_group: &str) {
        debug!(prod = prod_group, cons = cons_group, "merging groups");
        assert!(self.groups.contains_key(cons_group), "merge into unknown group {cons_group:?}");
        let members = self.groups.remove(prod_group).unwrap_or_default();
        self.groups.get_mut(cons_group).expect("consumer group exists").extend(members);

        self.children.remove(prod_group);
        for consumers in self.children.values_mut() {
            if consumers.remove(prod_group) {
                consumers.insert(cons_group.to_string());
            }
        }

        self.option_cache
            .retain(|(prod, cons), _| prod != cons_group && cons != cons_group);
    }

    /// One grouping phase: merge the best-benefit candidate until no
    /// candidate with positive benefit remains.
    pub fn group(&mut self, phase: Phase, env: &mut Env) {
        loop {
            // Candidates: groups whose output feeds exactly one consumer
            // group.
            let mut cand_pairs: Vec<(String, String)> = Vec::new();
            for output in self.groups.keys() {
                if let Some(consumers) = self.children.get(output)
                    && consumers.len() == 1
                {
                    let consumer = consumers.iter().next().expect("len checked").clone();
                    cand_pairs.push((output.clone(), consumer));
                }
            }
            trace!(?phase, candidates = cand_pairs.len(), "grouping iteration");

            let best = match phase {
                Phase::Inline => self.choose_candidate_inline(&cand_pairs, env),
                Phase::FastMem => self.choose_candidate(&cand_pairs, env),
            };

            let Some(best) = best else { break };
            if best.benefit <= 0.0 {
                break;
            }

            if phase == Phase::Inline {
                // Record the inline and erase the producer's levels; the
                // lowering pass will substitute it away.
                self.inlines.insert(best.prod_group.clone(), best.cons_group.clone());
                if let Some(f) = env.get_mut(&best.prod_group) {
                    f.schedule_mut().store_level = LoopLevel::inlined();
                    f.schedule_mut().compute_level = LoopLevel::inlined();
                }
            }
            self.merge_groups(&best.prod_group, &best.cons_group);
            self.group_sched.insert(
                best.cons_group.clone(),
                GroupSchedule { tile_sizes: best.tile_sizes.clone(), benefit: best.benefit },
            );
        }
    }

    /// Drop cached option evaluations; called between phases.
    pub fn clear_option_cache(&mut self) {
        self.option_cache.clear();
    }

    fn choose_candidate_inline(
        &mut self,
        cand_pairs: &[(String, String)],
        env: &Env,
    ) -> Option<FusionOption> {
        let mut best: Option<FusionOption> = None;
        for pair in cand_pairs {
            // Extern stages are opaque: they cannot be inlined, and nothing
            // can be fused into their (loop-free) bodies.
            if pair_touches_extern(pair, env) {
                if self.sweep {
                    debug!(prod = %pair.0, cons = %pair.1, "candidate skipped: extern stage");
                }
                continue;
            }
            let cand = match self.option_cache.get(pair) {
                Some(cached) => cached.clone(),
                None => {
                    // A per-element probe: tile size 1 on every axis.
                    let args = self.analysis.args(&pair.1);
                    let mut opt = FusionOption {
                        prod_group: pair.0.clone(),
                        cons_group: pair.1.clone(),
                        tile_sizes: vec![1; args.len()],
                        benefit: -1.0,
                        redundant_work: -1.0,
                    };
                    self.evaluate_option(&mut opt, Phase::Inline, env);
                    self.option_cache.insert(pair.clone(), opt.clone());
                    opt
                }
            };
            if best.as_ref().is_none_or(|b| b.benefit < cand.benefit) {
                best = Some(cand);
            }
        }
        best
    }

    fn choose_candidate(
        &mut self,
        cand_pairs: &[(String, String)],
        env: &Env,
    ) -> Option<FusionOption> {
        let size_variants: [i64; 6] = [256, 128, 64, 32, 16, 8];
        let mut best: Option<FusionOption> = None;

        for pair in cand_pairs {
            if pair_touches_extern(pair, env) {
                if self.sweep {
                    debug!(prod = %pair.0, cons = %pair.1, "candidate skipped: extern stage");
                }
                continue;
            }
            if let Some(cached) = self.option_cache.get(pair) {
                if best.as_ref().is_none_or(|b| b.benefit < cached.benefit) {
                    best = Some(cached.clone());
                }
                continue;
            }

            let args = self.analysis.args(&pair.1).to_vec();

            // A producer whose whole output already fits in fast memory
            // gains nothing from tiled fusion.
            let mut invalid = false;
            let elem_bytes: i64 = env
                .get(&pair.0)
                .map(|f| f.output_types().iter().map(|t| t.bytes() as i64).sum())
                .unwrap_or(0);
            let prod_estimates = self.func_dim_estimates.get(&pair.0).cloned().unwrap_or_default();
            let mut prod_out_size = elem_bytes;
            for estimate in &prod_estimates {
                if *estimate == -1 {
                    invalid = true;
                } else {
                    prod_out_size *= estimate;
                }
            }
            if prod_out_size < self.params.fast_mem_size {
                invalid = true;
            }
            if invalid && self.sweep {
                debug!(
                    prod = %pair.0,
                    cons = %pair.1,
                    prod_out_size,
                    "candidate skipped: producer output fits fast memory or has unknown extents"
                );
            }

            let mut cand_best = FusionOption::infeasible(pair.0.clone(), pair.1.clone());
            if !invalid {
                // Every outer-suffix of the consumer's dims, at every tile
                // size in the menu.
                for i in (0..args.len()).rev() {
                    for s in size_variants {
                        let mut opt = FusionOption {
                            prod_group: pair.0.clone(),
                            cons_group: pair.1.clone(),
                            tile_sizes: (0..args.len())
                                .map(|j| if j < i { -1 } else { s })
                                .collect(),
                            benefit: -1.0,
                            redundant_work: -1.0,
                        };
                        self.evaluate_option(&mut opt, Phase::FastMem, env);
                        if cand_best.benefit < opt.benefit {
                            cand_best = opt;
                        }
                    }
                }
            }

            self.option_cache.insert(pair.clone(), cand_best.clone());
            if best.as_ref().is_none_or(|b| b.benefit < cand_best.benefit) {
                best = Some(cand_best);
            }
        }
        best
    }

    /// Mark an option infeasible before scoring; sweep mode still reports
    /// it, so every considered option leaves a trace.
    fn reject_option(&self, opt: &mut FusionOption, reason: &'static str) {
        opt.benefit = -1.0;
        opt.redundant_work = -1.0;
        if self.sweep {
            debug!(
                prod = %opt.prod_group,
                cons = %opt.cons_group,
                tiles = ?opt.tile_sizes,
                reason,
                "option rejected"
            );
        }
    }

    /// Score one candidate under the two-level memory model.
    pub fn evaluate_option(&mut self, opt: &mut FusionOption, phase: Phase, env: &Env) {
        let args = self.analysis.args(&opt.cons_group).to_vec();
        assert_eq!(opt.tile_sizes.len(), args.len(), "one tile size per consumer axis");

        let dim_estimates_cons =
            self.func_dim_estimates.get(&opt.cons_group).cloned().unwrap_or_default();
        if dim_estimates_cons.len() != args.len() || dim_estimates_cons.iter().any(|e| *e == -1) {
            self.reject_option(opt, "consumer extents unknown");
            return;
        }

        // Clamp each tile to the axis estimate; an axis smaller than its
        // proposed tile is not tiled at all.
        let mut bounds: Vec<(i64, i64)> = Vec::new();
        let mut eval: Vec<bool> = Vec::new();
        let mut cons_box = Region::default();
        for i in 0..args.len() {
            if opt.tile_sizes[i] != -1 && dim_estimates_cons[i] >= opt.tile_sizes[i] {
                bounds.push((0, opt.tile_sizes[i] - 1));
                cons_box.push(Interval::new(0, opt.tile_sizes[i] - 1));
            } else {
                if opt.tile_sizes[i] != -1 {
                    opt.tile_sizes[i] = -1;
                }
                bounds.push((0, dim_estimates_cons[i] - 1));
                cons_box.push(Interval::new(0, dim_estimates_cons[i] - 1));
            }
            eval.push(true);
        }

        let mut estimate_tiles: i64 = 1;
        let mut partial_tiles: f64 = 1.0;
        for i in 0..args.len() {
            if opt.tile_sizes[i] != -1 {
                estimate_tiles *=
                    (dim_estimates_cons[i] as f64 / opt.tile_sizes[i] as f64).ceil() as i64;
                partial_tiles *= dim_estimates_cons[i] as f64 / opt.tile_sizes[i] as f64;
            }
        }

        let conc_reg = self.analysis.concrete_dep_regions(&opt.cons_group, &eval, &bounds);
        let conc_overlaps = self.analysis.concrete_overlap_regions(&opt.cons_group, &eval, &bounds);

        // Members of both groups, except the consumer output itself.
        let mut prod_funcs: Vec<String> =
            self.groups.get(&opt.prod_group).cloned().unwrap_or_default();
        for member in self.groups.get(&opt.cons_group).cloned().unwrap_or_default() {
            if member != opt.cons_group {
                prod_funcs.push(member);
            }
        }

        // Intermediate footprint: everything materialized inside the fused
        // tile. Functions already inlined store nothing in the fast-mem
        // phase.
        let mut mem_reg: BTreeMap<String, Region> = BTreeMap::new();
        let mut prod_comp: BTreeMap<String, Region> = BTreeMap::new();
        for f in &prod_funcs {
            let region = conc_reg.get(f).cloned().unwrap_or_default();
            if phase == Phase::Inline || !self.inlines.contains_key(f) {
                mem_reg.insert(f.clone(), region.clone());
            }
            prod_comp.insert(f.clone(), region);
        }
        mem_reg.insert(opt.cons_group.clone(), cons_box);

        let inter_s = working_set_size(&mem_reg, env, &self.analysis.dep_regions);

        // Redundant work per tile, per tiled axis.
        let mut red_work_tile: i64 = 0;
        for i in 0..args.len() {
            if opt.tile_sizes[i] != -1 {
                let dir_red_work = overlap_cost(
                    &opt.cons_group,
                    &prod_funcs,
                    &conc_overlaps,
                    self.func_cost,
                    Some(i),
                );
                if dir_red_work == -1 {
                    red_work_tile = -1;
                    break;
                }
                red_work_tile += dir_red_work;
            }
        }

        let work_per_tile = region_cost(&prod_comp, self.func_cost);
        let total_work = work_per_tile as f64 * partial_tiles;

        let mut original_work: i64 = 0;
        let mut total_mem: i64 = 0;
        for f in &prod_funcs {
            match self.func_op.get(f) {
                Some(work) if *work != -1 => {
                    original_work += work;
                    total_mem += self.func_mem.get(f).copied().unwrap_or(0);
                }
                _ => {
                    self.reject_option(opt, "producer work unknown");
                    return;
                }
            }
        }
        total_mem += self.func_mem.get(&opt.cons_group).copied().unwrap_or(0);

        if inter_s < 0 || work_per_tile < 0 || red_work_tile < 0 {
            self.reject_option(opt, "region metrics unknown");
            return;
        }

        opt.redundant_work = (total_work - original_work as f64).max(0.0);

        let (cap, balance) = match phase {
            Phase::Inline => (self.params.inline_size, self.params.balance_inline),
            Phase::FastMem => (self.params.fast_mem_size, self.params.balance_fast_mem),
        };

        opt.benefit = if inter_s <= cap {
            total_mem as f64 * balance as f64 - opt.redundant_work
        } else if inter_s <= 2 * cap {
            // LRU: the fraction that still hits shrinks linearly past cap.
            let hit = (2 * cap - inter_s).max(0) as f64 / inter_s as f64;
            hit * total_mem as f64 * balance as f64 - opt.redundant_work
        } else {
            -1.0
        };

        // The fused nest must still fill the machine.
        if self.params.parallelism > estimate_tiles {
            opt.benefit = -1.0;
        }

        if self.sweep {
            debug!(
                prod = %opt.prod_group,
                cons = %opt.cons_group,
                tiles = ?opt.tile_sizes,
                inter_s,
                estimate_tiles,
                redundant = opt.redundant_work,
                benefit = opt.benefit,
                "evaluated option"
            );
        } else {
            trace!(
                prod = %opt.prod_group,
                cons = %opt.cons_group,
                tiles = ?opt.tile_sizes,
                inter_s,
                redundant = opt.redundant_work,
                benefit = opt.benefit,
                "evaluated option"
            );
        }
    }
}
