//! The auto-scheduling advisor: dependency-region analysis, two-phase
//! producer/consumer grouping under a locality cost model, and emission of
//! the chosen grouping as concrete schedule directives.

pub mod config;
pub mod cost;
pub mod deps;
pub mod emit;
pub mod partition;

use std::collections::BTreeMap;

use fresco_ir::bounds::FuncValueBounds;
use fresco_ir::derivative::is_one_to_one;
use fresco_ir::expr::{CallKind, Expr, ExprRef};
use fresco_ir::func::Env;
use fresco_ir::interval::{Interval, Region, merge_regions};
use fresco_ir::schedule::{DeviceApi, LoopLevel, Schedule};
use fresco_ir::visit::{IrVisitor, visit_expr_children};
use tracing::{debug, info};

pub use config::{AdvisorFlags, MachineParams};
pub use deps::DependenceAnalysis;
pub use partition::{FusionOption, GroupSchedule, Partitioner, Phase};

use crate::error::Result;
use cost::compute_func_cost;
use emit::apply_group_schedules;

struct CallSites {
    /// callee → argument lists of every call to it.
    calls: BTreeMap<String, Vec<Vec<ExprRef>>>,
}

impl IrVisitor for CallSites {
    fn visit_expr(&mut self, e: &ExprRef) {
        if let Expr::Call { kind: CallKind::Func { name, .. }, args } = &**e {
            self.calls.entry(name.clone()).or_default().push(args.to_vec());
        }
        visit_expr_children(self, e);
    }
}

/// Reset every schedule to its canonical pre-advisor state: default dims,
/// no splits, outputs rooted and everything else inlined. Declared bounds,
/// reduction domains and memoization survive. Running the advisor twice
/// therefore yields identical schedules.
fn reset_schedules(outputs: &[String], env: &mut Env) {
    for (name, f) in env.iter_mut() {
        let is_output = outputs.iter().any(|o| o == name);
        let args: Vec<String> = f.args().to_vec();
        let bounds = f.schedule().bounds.clone();
        let memoized = f.schedule().memoized;

        let mut schedule = Schedule::for_args(&args);
        schedule.bounds = bounds;
        schedule.memoized = memoized;
        if is_output {
            schedule.store_level = LoopLevel::root();
            schedule.compute_level = LoopLevel::root();
        }
        *f.schedule_mut() = schedule;

        for update in f.updates_mut() {
            let domain = update.domain.clone();
            let used: Vec<String> = args
                .iter()
                .filter(|a| {
                    update.args.iter().any(|site| fresco_ir::substitute::expr_uses_var(site, a))
                })
                .cloned()
                .collect();
            update.schedule = Schedule::for_update(&used, domain.as_ref());
        }
    }
}

/// Synthesize a schedule for every function in the pipeline, in place.
///
/// The pipeline bounds are estimated from the outputs' declared bounds;
/// an obvious-inline prepass folds single-use pointwise producers away;
/// grouping then runs an inline phase and a fast-memory phase; and the
/// surviving groups are materialized as tilings, parallel and vector
/// markings, and member placements.
pub fn auto_schedule(
    outputs: &[String],
    order: &[String],
    env: &mut Env,
    value_bounds: &FuncValueBounds,
    flags: AdvisorFlags,
    params: MachineParams,
) -> Result<()> {
    info!(?flags, "auto-scheduling {} functions", order.len());
    reset_schedules(outputs, env);

    if flags.naive {
        // Baseline: everything breadth-first at the root.
        for f in env.values_mut() {
            f.schedule_mut().compute_root();
        }
        return Ok(());
    }

    let func_cost = compute_func_cost(env);

    // Where is each function called, and by whom?
    let mut all_calls: BTreeMap<String, Vec<Vec<ExprRef>>> = BTreeMap::new();
    let mut consumers: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, f) in env.iter() {
        let mut sites = CallSites { calls: BTreeMap::new() };
        for value in f.values() {
            sites.visit_expr(value);
        }
        for update in f.updates() {
            for arg in &update.args {
                sites.visit_expr(arg);
            }
            for value in &update.values {
                sites.visit_expr(value);
            }
        }
        for (callee, calls) in sites.calls {
            consumers.entry(callee.clone()).or_default().push(name.clone());
            all_calls.entry(callee).or_default().extend(calls);
        }
    }

    // Obvious inline decisions: a pointwise producer with a single
    // consumer and a single call site costs nothing to fold away.
    let mut inlines: BTreeMap<String, String> = BTreeMap::new();
    for (callee, calls) in &all_calls {
        let Some(f) = env.get(callee) else { continue };
        if !f.is_pure() || outputs.iter().any(|o| o == callee) {
            continue;
        }
        let all_one_to_one = calls
            .iter()
            .flatten()
            .all(|arg| is_one_to_one(arg) || arg.is_simple_const());
        let callee_consumers = consumers.get(callee).map(|c| c.as_slice()).unwrap_or(&[]);
        if callee_consumers.len() == 1 && all_one_to_one && calls.len() == 1 {
            debug!(func = %callee, into = %callee_consumers[0], "inline prepass");
            inlines.insert(callee.clone(), callee_consumers[0].clone());
            env.get_mut(callee).expect("callee exists").schedule_mut().compute_inline();
        }
    }

    let analysis = DependenceAnalysis::new(env, value_bounds);

    // Pipeline bounds: concretize each output's dependence regions over its
    // declared bounds and merge.
    let mut pipeline_bounds: BTreeMap<String, Region> = BTreeMap::new();
    if outputs_have_full_bounds(outputs, env) {
        for out_name in outputs {
            let Some(out) = env.get(out_name) else { continue };
            let mut bounds: Vec<(i64, i64)> = Vec::new();
            let mut eval: Vec<bool> = Vec::new();
            for arg in out.args() {
                let declared = out.schedule().bounds.iter().find(|b| &b.var == arg).and_then(|b| {
                    Some((b.min.as_int()?, b.min.as_int()? + b.extent.as_int()? - 1))
                });
                match declared {
                    Some(pair) => {
                        bounds.push(pair);
                        eval.push(true);
                    }
                    None => {
                        bounds.push((-1, -1));
                        eval.push(false);
                    }
                }
            }

            let mut regions = analysis.concrete_dep_regions(out_name, &eval, &bounds);
            let out_box =
                Region(bounds.iter().map(|(min, max)| Interval::new(*min, *max)).collect());
            regions.insert(out_name.clone(), out_box);

            for (name, region) in regions {
                match pipeline_bounds.get_mut(&name) {
                    Some(existing) if existing.len() == region.len() => {
                        merge_regions(existing, &region);
                        existing.simplify();
                    }
                    Some(_) => {}
                    None => {
                        pipeline_bounds.insert(name, region);
                    }
                }
            }
        }
    }

    // Grouping: the inline phase probes per-element fusion, the fast-mem
    // phase tiles; the option cache does not survive the phase switch.
    let mut partitioner = Partitioner::new(
        &pipeline_bounds,
        inlines,
        &analysis,
        &func_cost,
        env,
        params.clone(),
        flags.sweep,
    );
    partitioner.group(Phase::Inline, env);
    partitioner.clear_option_cache();
    partitioner.group(Phase::FastMem, env);

    // GPU targets hang their grid off the emitted parallel loops; the loops
    // inside inherit the tag during lowering.
    let device = if flags.gpu { DeviceApi::Cuda } else { DeviceApi::Parent };
    apply_group_schedules(
        &partitioner.groups,
        &partitioner.group_sched,
        &partitioner.inlines,
        &pipeline_bounds,
        env,
        &params,
        device,
    );

    Ok(())
}

fn outputs_have_full_bounds(outputs: &[String], env: &Env) -> bool {
    outputs.iter().all(|name| {
        let Some(out) = env.get(name) else { return false };
        out.args().iter().all(|arg| {
            out.schedule()
                .bounds
                .iter()
                .any(|b| &b.var == arg && b.min.as_int().is_some() && b.extent.as_int().is_some())
        })
    })
}
