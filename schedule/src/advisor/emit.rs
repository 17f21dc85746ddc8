//! Materializing a chosen grouping as concrete schedule directives: splits,
//! dim reordering, parallel and vector markings, and member placement.

use std::collections::BTreeMap;

use fresco_ir::derivative::finite_difference;
use fresco_ir::expr::{CallKind, Expr, ExprRef, int};
use fresco_ir::func::{Env, Function};
use fresco_ir::interval::Region;
use fresco_ir::rvar::can_parallelize_rvar;
use fresco_ir::schedule::{DeviceApi, ForType, LoopLevel, Schedule};
use fresco_ir::simplify::simplify;
use fresco_ir::visit::{IrVisitor, visit_expr_children};
use tracing::debug;

use super::config::MachineParams;
use super::cost::get_extent;
use super::partition::{GroupSchedule, extent_estimate};

/// Per-variable extent estimates, kept current through every surgery step.
pub type DimEstimates = BTreeMap<String, i64>;

/// Mark a dim parallel, carrying the device tag the grid loop should run
/// under (`Parent` keeps the host default; the loops it encloses inherit
/// the tag during lowering).
pub fn parallelize_dim(schedule: &mut Schedule, dim: usize, device: DeviceApi) {
    schedule.dims[dim].for_type = ForType::Parallel;
    schedule.dims[dim].device_api = device;
    schedule.touched = true;
}

/// Hoist a dim to the outermost real position (just inside `__outermost`).
pub fn move_dim_to_outermost(schedule: &mut Schedule, dim: usize) {
    let moved = schedule.dims.remove(dim);
    let pos = schedule.dims.len() - 1;
    schedule.dims.insert(pos, moved);
    schedule.touched = true;
}

/// Split a dim by a concrete tile extent, naming the halves
/// `<old>.<tag>.in` / `<old>.<tag>.out`, and keep the estimates current.
pub fn split_dim(
    schedule: &mut Schedule,
    dim: usize,
    size: i64,
    estimates: &mut DimEstimates,
    tag: &str,
    partial: bool,
) {
    let old = schedule.dims[dim].var.clone();
    let inner = format!("{old}.{tag}.in");
    let outer = format!("{old}.{tag}.out");
    schedule.split_with(&old, &outer, &inner, int(size), false, partial);

    estimates.insert(inner, size);
    let old_estimate = estimates.remove(&old).unwrap_or(-1);
    let outer_estimate = if old_estimate == -1 { -1 } else { (old_estimate + size - 1) / size };
    estimates.insert(outer, outer_estimate);
}

/// Fuse two dims into `<inner>.<outer>`, keeping the estimates current.
pub fn fuse_dim(schedule: &mut Schedule, inner: &str, outer: &str, estimates: &mut DimEstimates) -> String {
    let fused = format!("{inner}.{outer}");
    schedule.fuse(inner, outer, &fused);

    let inner_estimate = estimates.remove(inner).unwrap_or(-1);
    let outer_estimate = estimates.remove(outer).unwrap_or(-1);
    let fused_estimate = if inner_estimate > 0 && outer_estimate > 0 {
        inner_estimate * outer_estimate
    } else {
        -1
    };
    estimates.insert(fused.clone(), fused_estimate);
    fused
}

/// Mark a dim vectorized, splitting off a lane-width inner dim first when a
/// width is given.
pub fn vectorize_dim(schedule: &mut Schedule, estimates: &mut DimEstimates, dim: usize, width: i64) {
    if width > 0 {
        split_dim(schedule, dim, width, estimates, "vec", false);
    }
    schedule.dims[dim].for_type = ForType::Vectorized;
    schedule.touched = true;
}

/// Is the dim provably at least `min_size` wide? Optimistic on unknowns.
pub fn check_dim_size(
    f: &Function,
    dim: usize,
    min_size: i64,
    pipeline_bounds: &BTreeMap<String, Region>,
) -> bool {
    let Some(region) = pipeline_bounds.get(f.name()) else { return true };
    let dims = &f.schedule().dims;
    for (i, arg) in f.args().iter().enumerate() {
        if dims.get(dim).is_some_and(|d| &d.var == arg) {
            let Some(interval) = region.0.get(i) else { return true };
            let extent = get_extent(interval);
            return if extent >= 0 { extent >= min_size } else { true };
        }
    }
    true
}

struct LoadArgs {
    args: Vec<Vec<ExprRef>>,
}

impl IrVisitor for LoadArgs {
    fn visit_expr(&mut self, e: &ExprRef) {
        if let Expr::Call { kind: CallKind::Func { .. }, args } = &**e {
            self.args.push(args.to_vec());
        }
        visit_expr_children(self, e);
    }
}

/// Vectorize the function's innermost dim, but only when every load's index
/// on that axis has a compile-time-constant stride.
pub fn simple_vectorize(
    f: &mut Function,
    estimates: &mut DimEstimates,
    inner_dim: usize,
    vec_width: i64,
) -> bool {
    let mut loads = LoadArgs { args: Vec::new() };
    for value in f.values() {
        loads.visit_expr(value);
    }
    for update in f.updates() {
        for value in &update.values {
            loads.visit_expr(value);
        }
    }

    let inner_arg = match f.args().get(inner_dim) {
        Some(arg) => arg.clone(),
        None => return false,
    };
    // The memory stride along the vector axis is constant only when the
    // load's innermost index walks it at a fixed step and no outer index
    // moves with it at all (an outer index moving means a whole row pitch
    // per lane, which is not a compile-time constant).
    let mut constant_stride = true;
    for load in &loads.args {
        for (k, index) in load.iter().enumerate() {
            let diff = simplify(&finite_difference(index, &inner_arg));
            if k == inner_dim {
                constant_stride = constant_stride && diff.is_simple_const();
            } else {
                constant_stride = constant_stride && diff.is_zero();
            }
        }
    }

    if constant_stride {
        vectorize_dim(f.schedule_mut(), estimates, inner_dim, vec_width);
    }
    constant_stride
}

/// Choose a dim to run in parallel: fuse outermost tile dims until their
/// combined extent clears the parallelism target, or hoist the first serial
/// dim that already does. Returns the chosen dim index and how many fuses
/// were applied.
pub fn pick_dim_to_parallelize(
    f: &mut Function,
    estimates: &mut DimEstimates,
    parallelism: i64,
    tile_sizes: &[i64],
) -> (Option<usize>, usize) {
    let dims_len = f.schedule().dims.len();
    if dims_len < 2 {
        return (None, 0);
    }
    let mut outer_dim = dims_len - 2;
    let num_tile_dims = tile_sizes.iter().filter(|&&t| t > 1).count();
    let mut num_fused = 0;

    if num_tile_dims > 0 {
        for _ in 0..num_tile_dims {
            let outer_name = f.schedule().dims[outer_dim].var.clone();
            if estimates.get(&outer_name).copied().unwrap_or(-1) > parallelism || outer_dim == 0 {
                break;
            }
            let inner_name = f.schedule().dims[outer_dim - 1].var.clone();
            fuse_dim(f.schedule_mut(), &inner_name, &outer_name, estimates);
            outer_dim = f.schedule().dims.len() - 2;
            num_fused += 1;
        }
        (Some(outer_dim), num_fused)
    } else {
        for i in (1..=outer_dim).rev() {
            let var_name = f.schedule().dims[i].var.clone();
            if estimates.get(&var_name).copied().unwrap_or(-1) > parallelism {
                move_dim_to_outermost(f.schedule_mut(), i);
                break;
            }
        }
        (Some(f.schedule().dims.len() - 2), num_fused)
    }
}

/// Extent estimates for every arg of a function, from the pipeline bounds.
pub fn dim_estimates_for(
    name: &str,
    pipeline_bounds: &BTreeMap<String, Region>,
    env: &Env,
) -> DimEstimates {
    let mut estimates = DimEstimates::new();
    if let Some(f) = env.get(name) {
        for (i, arg) in f.args().iter().enumerate() {
            estimates.insert(arg.clone(), extent_estimate(f, pipeline_bounds, i));
        }
    }
    estimates
}

/// Realize the settled grouping as schedule directives on every group
/// output and member.
pub fn apply_group_schedules(
    groups: &BTreeMap<String, Vec<String>>,
    group_sched: &BTreeMap<String, GroupSchedule>,
    inlines: &BTreeMap<String, String>,
    pipeline_bounds: &BTreeMap<String, Region>,
    env: &mut Env,
    params: &MachineParams,
    device: DeviceApi,
) {
    for (g_name, members) in groups {
        let Some(g_out) = env.get(g_name) else { continue };
        if g_out.schedule().dims.len() < 2 {
            continue;
        }

        let sched = group_sched.get(g_name).cloned().unwrap_or(GroupSchedule {
            tile_sizes: vec![-1; g_out.args().len()],
            benefit: -1.0,
        });

        // The dims to tile, by name, with their chosen tile extents.
        let mut vars: Vec<String> = Vec::new();
        let mut tile_sizes: BTreeMap<String, i64> = BTreeMap::new();
        for i in 0..g_out.schedule().dims.len() - 1 {
            if let Some(&t) = sched.tile_sizes.get(i)
                && t != -1
            {
                let var_name = g_out.schedule().dims[i].var.clone();
                vars.push(var_name.clone());
                tile_sizes.insert(var_name, t);
            }
        }

        let mut estimates = dim_estimates_for(g_name, pipeline_bounds, env);
        let is_pure = g_out.is_pure();

        // Apply the tiling: split each chosen dim and hoist its outer half.
        let mut num_tile_dims = 0;
        {
            let g_out = env.get_mut(g_name).expect("group output exists");
            for v in &vars {
                let index = g_out.schedule().dims[..g_out.schedule().dims.len() - 1]
                    .iter()
                    .position(|d| &d.var == v);
                let Some(index) = index else { continue };
                let t = tile_sizes[v];
                if t > 1 {
                    split_dim(g_out.schedule_mut(), index, t, &mut estimates, "tile", false);
                    move_dim_to_outermost(g_out.schedule_mut(), index + 1);
                } else if t == 1 {
                    move_dim_to_outermost(g_out.schedule_mut(), index);
                }
                num_tile_dims += 1;
            }
        }

        let mut num_fused = 0;
        if is_pure {
            // Vectorize first, then pick the parallel loop.
            let can_vectorize = {
                let g_out = env.get(g_name).expect("group output exists");
                check_dim_size(g_out, 0, params.vec_len, pipeline_bounds)
            };
            let g_out = env.get_mut(g_name).expect("group output exists");
            if can_vectorize {
                simple_vectorize(g_out, &mut estimates, 0, params.vec_len);
            }
            let (outer_dim, fused) =
                pick_dim_to_parallelize(g_out, &mut estimates, params.parallelism, &sched.tile_sizes);
            num_fused = fused;
            if let Some(outer_dim) = outer_dim {
                parallelize_dim(g_out.schedule_mut(), outer_dim, device);
            }
        } else {
            let g_out = env.get_mut(g_name).expect("group output exists");
            let (outer_dim, fused) =
                pick_dim_to_parallelize(g_out, &mut estimates, params.parallelism, &sched.tile_sizes);
            num_fused = fused;
            if let Some(outer_dim) = outer_dim {
                parallelize_dim(g_out.schedule_mut(), outer_dim, device);
            }

            // Update stages: hoist and parallelize a safely parallel
            // reduction variable, scanning inner to outer.
            let g_name_owned = g_name.clone();
            let updates_len = g_out.updates().len();
            for u in 0..updates_len {
                let update = g_out.updates()[u].clone();
                let mut rvar_estimates: BTreeMap<String, i64> = BTreeMap::new();
                if let Some(rdom) = &update.domain {
                    for rv in &rdom.domain {
                        if let Some(extent) = rv.extent.as_int() {
                            rvar_estimates.insert(rv.var.clone(), extent);
                        }
                    }
                }
                let dims_len = update.schedule.dims.len();
                if dims_len < 3 {
                    continue;
                }
                for j in 1..=dims_len - 2 {
                    let dim = update.schedule.dims[j].clone();
                    if dim.pure_dim {
                        continue;
                    }
                    let extent = rvar_estimates.get(&dim.var).copied().unwrap_or(-1);
                    if extent > params.parallelism
                        && can_parallelize_rvar(&dim.var, &g_name_owned, &update)
                    {
                        let update_schedule = &mut g_out.updates_mut()[u].schedule;
                        move_dim_to_outermost(update_schedule, j);
                        let outer = update_schedule.dims.len() - 2;
                        parallelize_dim(update_schedule, outer, device);
                        break;
                    }
                }
            }
        }

        // Place every non-inlined member at the innermost surviving
        // tile-level dim of the group output.
        let (out_dims, out_dims_len) = {
            let g_out = env.get(g_name).expect("group output exists");
            (g_out.schedule().dims.clone(), g_out.schedule().dims.len())
        };
        for member in members {
            if member == g_name || inlines.contains_key(member) || num_tile_dims == 0 {
                continue;
            }
            let outer_dim = out_dims_len as i64 - 2;
            let compute_level =
                (outer_dim - num_tile_dims as i64 + num_fused as i64 + 1).clamp(0, outer_dim);
            let level_var = out_dims[compute_level as usize].var.clone();
            debug!(member = %member, group = %g_name, at = %level_var, "placing group member");

            let mut member_estimates = dim_estimates_for(member, pipeline_bounds, env);
            let can_vectorize = {
                let Some(m) = env.get(member) else { continue };
                m.is_pure() && check_dim_size(m, 0, params.vec_len, pipeline_bounds)
            };
            let Some(m) = env.get_mut(member) else { continue };
            m.schedule_mut().store_level = LoopLevel::new(g_name.clone(), level_var.clone());
            m.schedule_mut().compute_level = LoopLevel::new(g_name.clone(), level_var);
            m.schedule_mut().touched = true;
            if can_vectorize {
                simple_vectorize(m, &mut member_estimates, 0, params.vec_len);
            }
        }
    }
}
