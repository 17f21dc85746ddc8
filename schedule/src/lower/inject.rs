//! Splicing a function's realization into an enclosing loop nest, and the
//! `schedule_functions` driver that does so for a whole pipeline.

use fresco_ir::callgraph::inline_function;
use fresco_ir::expr::{CallKind, Expr, ExprRef, int, var};
use fresco_ir::func::{Env, Function};
use fresco_ir::schedule::{OUTERMOST, ROOT};
use fresco_ir::stmt::{
    DeviceApi, ForType, Stmt, StmtRef, evaluate, for_loop, let_stmt, producer_consumer, realize,
    same_stmt,
};
use fresco_ir::visit::{IrMutator, IrVisitor, mutate_expr_children, mutate_stmt_children, visit_expr_children};
use tracing::debug;

use super::production::{build_production, inject_explicit_bounds};
use super::validate::validate_schedule;
use crate::error::{Error, Result};

struct UsesFunc<'a> {
    func: &'a str,
    found: bool,
}

impl IrVisitor for UsesFunc<'_> {
    fn visit_expr(&mut self, e: &ExprRef) {
        if self.found {
            return;
        }
        match &**e {
            Expr::Call { kind: CallKind::Func { name, .. }, .. } if name == self.func => {
                self.found = true;
            }
            // A reference to the function's buffers counts as a use.
            Expr::Var(name)
                if name.starts_with(&format!("{}.", self.func)) && name.ends_with(".buffer") =>
            {
                self.found = true;
            }
            _ => visit_expr_children(self, e),
        }
    }
}

/// Is `f` called (or are its buffers referenced) anywhere inside `s`?
pub fn function_is_used_in_stmt(f: &Function, s: &StmtRef) -> bool {
    let mut v = UsesFunc { func: f.name(), found: false };
    v.visit_stmt(s);
    v.found
}

struct RealizesFunc<'a> {
    func: &'a str,
    found: bool,
}

impl IrVisitor for RealizesFunc<'_> {
    fn visit_stmt(&mut self, s: &StmtRef) {
        if self.found {
            return;
        }
        if let Stmt::ProducerConsumer { name, .. } = &**s
            && name == self.func
        {
            self.found = true;
            return;
        }
        fresco_ir::visit::visit_stmt_children(self, s);
    }
}

// Injection must be idempotent: re-running the injector over an IR that
// already carries this function's producer/consumer is a no-op.
fn stmt_realizes_func(s: &StmtRef, func: &str) -> bool {
    let mut v = RealizesFunc { func, found: false };
    v.visit_stmt(s);
    v.found
}

/// Rewrites an enclosing statement to place the allocation (`Realize`) and
/// computation (`ProducerConsumer`) of one function at its schedule's
/// store/compute levels.
pub struct InjectRealization<'a> {
    func: &'a Function,
    env: &'a Env,
    is_output: bool,
    inject_asserts: bool,
    pub found_store_level: bool,
    pub found_compute_level: bool,
    /// Name of the function whose produce/update we are currently inside;
    /// scoped to the walk and restored on exit.
    producing: Option<String>,
    error: Option<Error>,
}

impl<'a> InjectRealization<'a> {
    pub fn new(func: &'a Function, env: &'a Env, is_output: bool, inject_asserts: bool) -> Self {
        Self {
            func,
            env,
            is_output,
            inject_asserts,
            found_store_level: false,
            found_compute_level: false,
            producing: None,
            error: None,
        }
    }

    /// Run to completion, checking the post-condition: both levels found.
    pub fn inject(mut self, s: &StmtRef) -> Result<StmtRef> {
        let out = self.mutate_stmt(s);
        if let Some(e) = self.error {
            return Err(e);
        }
        assert!(
            self.found_store_level && self.found_compute_level,
            "loop levels for {:?} were not found in the enclosing nest",
            self.func.name()
        );
        Ok(out)
    }

    fn build_pipeline(&mut self, consume: StmtRef) -> StmtRef {
        match build_production(self.func, self.env) {
            Ok((produce, update)) => producer_consumer(self.func.name(), produce, update, consume),
            Err(e) => {
                self.error.get_or_insert(e);
                consume
            }
        }
    }

    fn build_realize(&self, s: StmtRef) -> StmtRef {
        let mut out = s;
        if !self.is_output {
            let name = self.func.name();
            let bounds: Vec<(ExprRef, ExprRef)> = self
                .func
                .args()
                .iter()
                .map(|arg| {
                    (
                        var(format!("{name}.{arg}.min_realized")),
                        var(format!("{name}.{arg}.extent_realized")),
                    )
                })
                .collect();
            out = realize(name, self.func.output_types().to_vec(), bounds, out);
        }
        // The realization point is also where explicit bounds are enforced.
        if self.inject_asserts { inject_explicit_bounds(out, self.func) } else { out }
    }

    fn visit_for(&mut self, s: &StmtRef) -> StmtRef {
        let Stmt::For { name, min, extent, for_type, device_api, body } = &**s else {
            unreachable!("visit_for on non-loop");
        };
        debug!(func = self.func.name(), loop_name = %name, "considering loop");

        let compute_level = self.func.schedule().compute_level.clone();
        let store_level = self.func.schedule().store_level.clone();

        // Extern stages cannot be substituted inside a vector loop; realize
        // around the loop instead.
        if self.func.has_extern_definition()
            && compute_level.is_inline()
            && *for_type == ForType::Vectorized
            && function_is_used_in_stmt(self.func, s)
        {
            debug!(func = self.func.name(), "injecting extern realization around vector loop");
            let wrapped = self.build_pipeline(s.clone());
            self.found_store_level = true;
            self.found_compute_level = true;
            return self.build_realize(wrapped);
        }

        // Peel lets off the body so the rewrite order stays stable, and
        // reinstate them afterwards.
        let mut lets: Vec<(String, ExprRef)> = Vec::new();
        let mut body = body.clone();
        loop {
            let Stmt::LetStmt { name, value, body: inner } = &*body else { break };
            lets.push((name.clone(), value.clone()));
            let inner = inner.clone();
            body = inner;
        }

        let peeled = body.clone();
        body = self.mutate_stmt(&body);

        let already_realized = stmt_realizes_func(&body, self.func.name());

        if compute_level.match_loop_name(name) {
            if (function_is_used_in_stmt(self.func, &body) || self.is_output) && !already_realized {
                debug!(func = self.func.name(), loop_name = %name, "found compute level");
                body = self.build_pipeline(body);
            }
            self.found_compute_level = true;
        }

        if store_level.match_loop_name(name) {
            assert!(
                self.found_compute_level,
                "compute loop level of {:?} was not found within its store loop level",
                self.func.name()
            );
            if (function_is_used_in_stmt(self.func, &body) || self.is_output) && !already_realized {
                debug!(func = self.func.name(), loop_name = %name, "found store level");
                body = self.build_realize(body);
            }
            self.found_store_level = true;
        }

        if lets.is_empty() && same_stmt(&body, &peeled) {
            return s.clone();
        }
        for (let_name, let_value) in lets.into_iter().rev() {
            body = let_stmt(let_name, let_value, body);
        }
        for_loop(name, min, extent, *for_type, *device_api, body)
    }
}

impl IrMutator for InjectRealization<'_> {
    fn mutate_stmt(&mut self, s: &StmtRef) -> StmtRef {
        match &**s {
            Stmt::For { .. } => self.visit_for(s),
            Stmt::ProducerConsumer { name, produce, update, consume } => {
                let saved = self.producing.replace(name.clone());
                let nproduce = self.mutate_stmt(produce);
                let nupdate = update.as_ref().map(|u| self.mutate_stmt(u));
                self.producing = saved;
                let nconsume = self.mutate_stmt(consume);

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
                    producer_consumer(name, nproduce, nupdate, nconsume)
                }
            }
            // An inlined impure (or extern) function used by another
            // function's store cannot be expression-inlined; realize it
            // around the provide.
            Stmt::Provide { name, .. }
                if name != self.func.name()
                    && !self.func.is_pure()
                    && self.func.schedule().compute_level.is_inline()
                    && function_is_used_in_stmt(self.func, s) =>
            {
                let wrapped = self.build_pipeline(s.clone());
                let out = self.build_realize(wrapped);
                self.found_store_level = true;
                self.found_compute_level = true;
                out
            }
            _ => mutate_stmt_children(self, s),
        }
    }
}

/// Drop the synthetic `.__outermost` loops and fold their bound symbols to
/// their constant values.
struct RemoveOutermostLoops;

impl IrMutator for RemoveOutermostLoops {
    fn mutate_expr(&mut self, e: &ExprRef) -> ExprRef {
        if let Expr::Var(name) = &**e {
            let suffix = format!(".{OUTERMOST}");
            if let Some(stem) = name.strip_suffix(".loop_extent")
                && stem.ends_with(&suffix)
            {
                return int(1);
            }
            if let Some(stem) = name.strip_suffix(".loop_min")
                && stem.ends_with(&suffix)
            {
                return int(0);
            }
            if let Some(stem) = name.strip_suffix(".loop_max")
                && stem.ends_with(&suffix)
            {
                return int(1);
            }
            return e.clone();
        }
        mutate_expr_children(self, e)
    }

    fn mutate_stmt(&mut self, s: &StmtRef) -> StmtRef {
        match &**s {
            Stmt::For { name, body, .. } if name.ends_with(&format!(".{OUTERMOST}")) => {
                self.mutate_stmt(body)
            }
            Stmt::LetStmt { name, body, .. }
                if [".loop_extent", ".loop_min", ".loop_max"].iter().any(|tail| {
                    name.strip_suffix(tail).is_some_and(|stem| stem.ends_with(&format!(".{OUTERMOST}")))
                }) =>
            {
                self.mutate_stmt(body)
            }
            _ => mutate_stmt_children(self, s),
        }
    }
}

/// Replace every `Parent` device tag by the nearest enclosing concrete tag.
/// The outermost loops inherit `Host`.
struct PropagateLoopDeviceApi {
    for_device: DeviceApi,
}

impl IrMutator for PropagateLoopDeviceApi {
    fn mutate_stmt(&mut self, s: &StmtRef) -> StmtRef {
        let Stmt::For { name, min, extent, for_type, device_api, body } = &**s else {
            return mutate_stmt_children(self, s);
        };
        let saved = self.for_device;
        self.for_device = match device_api {
            DeviceApi::Parent => saved,
            api => *api,
        };
        let nbody = self.mutate_stmt(body);
        let out = if same_stmt(&nbody, body) && self.for_device == *device_api {
            s.clone()
        } else {
            for_loop(name, min, extent, *for_type, self.for_device, nbody)
        };
        self.for_device = saved;
        out
    }
}

/// Lower a whole pipeline: iterate outputs → inputs in reverse realization
/// order, inlining pure inline-scheduled functions and injecting a
/// produce/consume realization for everything else. Returns the statement
/// and whether any schedule requested memoization.
pub fn schedule_functions(
    outputs: &[String],
    order: &[String],
    env: &Env,
    inject_asserts: bool,
) -> Result<(StmtRef, bool)> {
    let root_name = format!("{ROOT}.{ROOT}");
    let mut s = for_loop(&root_name, 0, 1, ForType::Serial, DeviceApi::Host, evaluate(0));
    let mut any_memoized = false;

    for name in order.iter().rev() {
        let f = env
            .get(name)
            .ok_or(fresco_ir::Error::UndefinedFunction { func: name.clone() })?;
        let is_output = outputs.iter().any(|o| o == name);

        validate_schedule(f, &s, is_output, env)?;

        if f.has_pure_definition()
            && !f.has_update_definition()
            && f.schedule().compute_level.is_inline()
        {
            debug!(func = %name, "inlining");
            s = inline_function(&s, f);
        } else {
            debug!(func = %name, "injecting realization");
            s = InjectRealization::new(f, env, is_output, inject_asserts).inject(&s)?;
        }
        any_memoized |= f.schedule().memoized;
    }

    // The root loop has served its purpose.
    let Stmt::For { body, .. } = &*s else {
        unreachable!("lowering must preserve the root loop");
    };
    let mut out = body.clone();
    out = RemoveOutermostLoops.mutate_stmt(&out);
    out = PropagateLoopDeviceApi { for_device: DeviceApi::Host }.mutate_stmt(&out);
    Ok((out, any_memoized))
}
