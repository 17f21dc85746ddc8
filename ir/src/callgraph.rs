//! Call-graph discovery, realization ordering and function inlining.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{CyclicCallGraphSnafu, Result, UndefinedFunctionSnafu};
use crate::expr::{CallKind, Expr, ExprRef};
use crate::func::{Env, ExternArgument, Function};
use crate::stmt::StmtRef;
use crate::substitute::substitute_map;
use crate::visit::{IrMutator, IrVisitor, mutate_expr_children, visit_expr_children};

struct DirectCalls {
    names: BTreeSet<String>,
}

impl IrVisitor for DirectCalls {
    fn visit_expr(&mut self, e: &ExprRef) {
        if let Expr::Call { kind: CallKind::Func { name, .. }, .. } = &**e {
            self.names.insert(name.clone());
        }
        visit_expr_children(self, e);
    }
}

/// Every pipeline function referenced by any definition of `f`: pure values,
/// update sites and values, and extern arguments.
pub fn find_direct_calls(f: &Function) -> BTreeSet<String> {
    let mut v = DirectCalls { names: BTreeSet::new() };
    for value in f.values() {
        v.visit_expr(value);
    }
    for update in f.updates() {
        for arg in &update.args {
            v.visit_expr(arg);
        }
        for value in &update.values {
            v.visit_expr(value);
        }
    }
    if let Some(extern_def) = f.extern_definition() {
        for arg in &extern_def.args {
            match arg {
                ExternArgument::Expr(e) => v.visit_expr(e),
                ExternArgument::FuncRef(name) => {
                    v.names.insert(name.clone());
                }
                ExternArgument::BufferRef { .. } | ExternArgument::ImageParam { .. } => {}
            }
        }
    }
    v.names
}

/// Order every function reachable from the outputs so that producers come
/// before consumers: leaves first, outputs last. Fails on a call cycle or a
/// call to an undefined function.
pub fn realization_order(outputs: &[String], env: &Env) -> Result<Vec<String>> {
    // memoized call sets, since the DFS can revisit shared producers often
    let mut calls: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (name, f) in env {
        calls.insert(name.clone(), find_direct_calls(f));
    }

    let mut order = Vec::new();
    let mut done: BTreeSet<String> = BTreeSet::new();
    let mut in_progress: BTreeSet<String> = BTreeSet::new();

    fn visit(
        name: &str,
        calls: &BTreeMap<String, BTreeSet<String>>,
        done: &mut BTreeSet<String>,
        in_progress: &mut BTreeSet<String>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        if done.contains(name) {
            return Ok(());
        }
        snafu::ensure!(!in_progress.contains(name), CyclicCallGraphSnafu { func: name });
        let Some(callees) = calls.get(name) else {
            return UndefinedFunctionSnafu { func: name }.fail();
        };
        in_progress.insert(name.to_string());
        for callee in callees {
            visit(callee, calls, done, in_progress, order)?;
        }
        in_progress.remove(name);
        done.insert(name.to_string());
        order.push(name.to_string());
        Ok(())
    }

    for output in outputs {
        visit(output, &calls, &mut done, &mut in_progress, &mut order)?;
    }
    tracing::debug!(?order, "realization order");
    Ok(order)
}

struct InlineCalls<'a> {
    func: &'a Function,
}

impl IrMutator for InlineCalls<'_> {
    fn mutate_expr(&mut self, e: &ExprRef) -> ExprRef {
        let out = mutate_expr_children(self, e);
        if let Expr::Call { kind: CallKind::Func { name, value_index }, args } = &*out
            && name == self.func.name()
        {
            let mut replacements = HashMap::new();
            for (arg_name, arg_value) in self.func.args().iter().zip(args.iter()) {
                replacements.insert(arg_name.clone(), arg_value.clone());
            }
            return substitute_map(&replacements, &self.func.values()[*value_index]);
        }
        out
    }
}

/// Replace every call to the pure single-stage function `f` inside `s` by
/// its value expression with the call arguments substituted in.
pub fn inline_function(s: &StmtRef, f: &Function) -> StmtRef {
    assert!(
        f.is_pure() && f.has_pure_definition(),
        "only pure functions with a definition can be inlined, not {:?}",
        f.name()
    );
    tracing::trace!(func = f.name(), "inlining calls");
    InlineCalls { func: f }.mutate_stmt(s)
}
