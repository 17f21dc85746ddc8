//! Assembling a function's produce and update statements.

use fresco_ir::expr::{
    ExprRef, add, and, call_extern, call_intrinsic, call_value, eq, ge, le, str_imm, sub, var,
    zero_of,
};
use fresco_ir::func::{Env, ExternArgument, Function};
use fresco_ir::stmt::{StmtRef, assert_stmt, block_pair, let_stmt};
use fresco_ir::unique_name;

use crate::error::Result;
use super::nest::build_loop_nest;

/// Error handler invoked when an extern stage returns nonzero.
pub const EXTERN_STAGE_FAILED: &str = "halide_error_extern_stage_failed";

/// Error handler invoked when an explicit bound is too small for the region
/// bounds inference asked for.
pub const EXPLICIT_BOUNDS_TOO_SMALL: &str = "halide_error_explicit_bounds_too_small";

/// Build the statement that computes `f` over whatever region the enclosing
/// symbols (`<name>.s0.<arg>.min`/`.max`) request. Performs no allocation.
pub fn build_produce(f: &Function, env: &Env) -> Result<StmtRef> {
    match f.extern_definition() {
        Some(extern_def) => Ok(build_extern_produce(f, extern_def, env)),
        None => {
            let prefix = format!("{}.s0.", f.name());
            let values: Vec<ExprRef> = f
                .values()
                .iter()
                .map(|v| fresco_ir::substitute::qualify(&prefix, v, f.args()))
                .collect();
            let site: Vec<ExprRef> =
                f.args().iter().map(|a| var(format!("{prefix}{a}"))).collect();
            build_loop_nest(f, &prefix, &site, &values, f.schedule(), false)
        }
    }
}

fn build_extern_produce(
    f: &Function,
    extern_def: &fresco_ir::func::ExternDefinition,
    env: &Env,
) -> StmtRef {
    let mut extern_call_args: Vec<ExprRef> = Vec::new();
    let mut lets: Vec<(String, ExprRef)> = Vec::new();

    for arg in &extern_def.args {
        match arg {
            ExternArgument::Expr(e) => extern_call_args.push(e.clone()),
            ExternArgument::FuncRef(input) => {
                // One buffer handle per output channel of the input.
                let channels = env.get(input).map_or(1, |g| g.outputs());
                for k in 0..channels {
                    let mut buf_name = input.clone();
                    if channels > 1 {
                        buf_name.push_str(&format!(".{k}"));
                    }
                    buf_name.push_str(".buffer");
                    extern_call_args.push(var(buf_name));
                }
            }
            ExternArgument::BufferRef { name, .. } | ExternArgument::ImageParam { name, .. } => {
                extern_call_args.push(var(format!("{name}.buffer")));
            }
        }
    }

    // Output buffers: when storage and computation sit at the same loop,
    // allocation bounds inference has already bound `<name>.buffer`
    // symbols. Otherwise synthesize a descriptor for just this subregion,
    // rooted at the top-left element.
    if f.schedule().store_level == f.schedule().compute_level {
        for j in 0..f.outputs() {
            let mut buf_name = f.name().to_string();
            if f.outputs() > 1 {
                buf_name.push_str(&format!(".{j}"));
            }
            buf_name.push_str(".buffer");
            extern_call_args.push(var(buf_name));
        }
    } else {
        // All channels share channel 0's stride symbols.
        let mut stride_name = f.name().to_string();
        if f.outputs() > 1 {
            stride_name.push_str(".0");
        }
        let stage_name = format!("{}.s0.", f.name());
        for j in 0..f.outputs() {
            let top_left: Vec<ExprRef> = f
                .args()
                .iter()
                .map(|arg| var(format!("{stage_name}{arg}.min")))
                .collect();
            let host_ptr =
                call_intrinsic("address_of", vec![call_value(f.name(), top_left, j)]);

            let mut buffer_args = vec![host_ptr, zero_of(f.output_types()[j])];
            for (k, arg) in f.args().iter().enumerate() {
                let name = format!("{stage_name}{arg}");
                let arg_min = var(format!("{name}.min"));
                let arg_max = var(format!("{name}.max"));
                buffer_args.push(arg_min.clone());
                buffer_args.push(add(sub(arg_max, &arg_min), 1));
                buffer_args.push(var(format!("{stride_name}.stride.{k}")));
            }
            let descriptor = call_intrinsic("create_buffer", buffer_args);

            let buf_name = format!("{}.{j}.tmp_buffer", f.name());
            extern_call_args.push(var(&buf_name));
            lets.push((buf_name, descriptor));
        }
    }

    // Invoke, bind the integer result, and assert success.
    let result_name = unique_name('t');
    let result = var(&result_name);
    let error = call_extern(
        EXTERN_STAGE_FAILED,
        vec![str_imm(&extern_def.name), result.clone()],
    );
    let mut check = assert_stmt(eq(result, 0), error);
    check = let_stmt(result_name, call_extern(&extern_def.name, extern_call_args), check);

    for (name, value) in lets {
        check = let_stmt(name, value, check);
    }
    check
}

/// Build every update stage of `f`, outermost stage first.
pub fn build_update(f: &Function) -> Result<Vec<StmtRef>> {
    let mut updates = Vec::new();
    for (i, update) in f.updates().iter().enumerate() {
        let prefix = format!("{}.s{}.", f.name(), i + 1);

        // The stage's loop variables: the pure args plus its reduction
        // variables. Anything else in the definition is a parameter.
        let mut stage_vars: Vec<String> = f.args().to_vec();
        if let Some(rdom) = &update.domain {
            stage_vars.extend(rdom.domain.iter().map(|rv| rv.var.clone()));
        }

        let values: Vec<ExprRef> = update
            .values
            .iter()
            .map(|v| fresco_ir::substitute::qualify(&prefix, v, &stage_vars))
            .collect();
        let site: Vec<ExprRef> = update
            .args
            .iter()
            .map(|a| fresco_ir::substitute::qualify(&prefix, a, &stage_vars))
            .collect();

        let mut loop_nest = build_loop_nest(f, &prefix, &site, &values, &update.schedule, true)?;

        // The reduction domain's loop bounds come straight from its
        // declared `.min`/`.max` symbols.
        if let Some(rdom) = &update.domain {
            for rv in &rdom.domain {
                let p = format!("{prefix}{}", rv.var);
                let rmin = var(format!("{p}.min"));
                let rmax = var(format!("{p}.max"));
                loop_nest = let_stmt(format!("{p}.loop_min"), &rmin, loop_nest);
                loop_nest = let_stmt(format!("{p}.loop_max"), &rmax, loop_nest);
                loop_nest = let_stmt(format!("{p}.loop_extent"), add(sub(rmax, rmin), 1), loop_nest);
            }
        }

        updates.push(loop_nest);
    }
    Ok(updates)
}

/// The produce/update pair for one function. Updates are merged into a
/// single sequential block, first update outermost.
pub fn build_production(f: &Function, env: &Env) -> Result<(StmtRef, Option<StmtRef>)> {
    let produce = build_produce(f, env)?;
    let updates = build_update(f)?;

    let mut merged: Option<StmtRef> = None;
    for update in updates.into_iter().rev() {
        merged = Some(match merged {
            Some(rest) => block_pair(update, rest),
            None => update,
        });
    }
    Ok((produce, merged))
}

/// Guard every explicitly declared bound with an assertion that it covers
/// the region bounds inference inferred (`.min_unbounded`/`.max_unbounded`).
pub fn inject_explicit_bounds(mut body: StmtRef, f: &Function) -> StmtRef {
    for stage in 0..=f.updates().len() {
        for b in &f.schedule().bounds {
            let max_val = sub(add(&b.extent, &b.min), 1);
            let min_val = b.min.clone();
            let prefix = format!("{}.s{stage}.{}", f.name(), b.var);
            let min_var = var(format!("{prefix}.min_unbounded"));
            let max_var = var(format!("{prefix}.max_unbounded"));
            let check = and(le(&min_val, min_var.clone()), ge(&max_val, max_var.clone()));
            let error = call_extern(
                EXPLICIT_BOUNDS_TOO_SMALL,
                vec![str_imm(&b.var), str_imm(f.name()), min_val, max_val, min_var, max_var],
            );
            body = block_pair(assert_stmt(check, error), body);
        }
    }
    body
}
