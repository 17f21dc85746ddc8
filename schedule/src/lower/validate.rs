//! Schedule validation: where may a function legally be stored and
//! computed, and is the requested placement race-free?

use std::fmt::Write;

use fresco_ir::expr::{CallKind, Expr, ExprRef};
use smallvec::SmallVec;
use fresco_ir::func::{Env, ExternArgument, Function};
use fresco_ir::schedule::{ForType, LoopLevel, OUTERMOST, ROOT};
use fresco_ir::stmt::{Stmt, StmtRef};
use fresco_ir::visit::{IrVisitor, visit_expr_children, visit_stmt_children};
use tracing::warn;

use crate::error::{IllegalScheduleSnafu, InlinedIntoExternSnafu, OutputNotRootSnafu, Result};

/// One loop active at a use of the function, with whatever parallelism it
/// carries. Vectorized counts as parallel: storage shared across either is
/// a race.
#[derive(Debug, Clone)]
pub struct Site {
    pub is_parallel: bool,
    pub level: LoopLevel,
}

/// Split a loop name of the form `<func>.s<k>.<var>` (or `__root.__root`)
/// into its level. Split-derived vars may themselves contain dots, so the
/// var is everything after the stage component.
fn parse_loop_name(name: &str) -> LoopLevel {
    let Some(first_dot) = name.find('.') else {
        return LoopLevel::new(name, name);
    };
    let func = &name[..first_dot];
    let rest = &name[first_dot + 1..];
    if let Some(stage_dot) = rest.find('.') {
        let stage = &rest[..stage_dot];
        if stage.strip_prefix('s').is_some_and(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
        {
            return LoopLevel::new(func, &rest[stage_dot + 1..]);
        }
    }
    LoopLevel::new(func, rest)
}

/// Collects the loop stack active at every use of a function, intersecting
/// across uses: the result is the set of levels at which the function could
/// legally be placed.
struct ComputeLegalSites<'a> {
    func: &'a Function,
    /// The loops enclosing the current node; nests are shallow, so the
    /// stack stays inline.
    stack: SmallVec<[Site; 8]>,
    allowed: Vec<Site>,
    found_use: bool,
}

impl ComputeLegalSites<'_> {
    fn register_use(&mut self) {
        if !self.found_use {
            self.found_use = true;
            self.allowed = self.stack.to_vec();
        } else {
            let common: Vec<Site> = self
                .stack
                .iter()
                .filter(|s1| self.allowed.iter().any(|s2| s1.level.match_level(&s2.level)))
                .cloned()
                .collect();
            self.allowed = common;
        }
    }
}

impl IrVisitor for ComputeLegalSites<'_> {
    fn visit_stmt(&mut self, s: &StmtRef) {
        if let Stmt::For { name, min, extent, for_type, body, .. } = &**s {
            self.visit_expr(min);
            self.visit_expr(extent);
            self.stack.push(Site {
                is_parallel: matches!(for_type, ForType::Parallel | ForType::Vectorized),
                level: parse_loop_name(name),
            });
            self.visit_stmt(body);
            self.stack.pop();
        } else {
            visit_stmt_children(self, s);
        }
    }

    fn visit_expr(&mut self, e: &ExprRef) {
        match &**e {
            Expr::Call { kind: CallKind::Func { name, .. }, .. } if name == self.func.name() => {
                self.register_use();
                visit_expr_children(self, e);
            }
            Expr::Var(name)
                if name.starts_with(&format!("{}.", self.func.name())) && name.ends_with(".buffer") =>
            {
                self.register_use();
            }
            _ => visit_expr_children(self, e),
        }
    }
}

/// Compute the legal placement sites for `f` in `s`, outermost first.
pub fn legal_sites(f: &Function, s: &StmtRef) -> Vec<Site> {
    let mut v =
        ComputeLegalSites { func: f, stack: SmallVec::new(), allowed: Vec::new(), found_use: false };
    v.visit_stmt(s);
    v.allowed
}

/// Render a placement in user-facing schedule syntax.
pub fn schedule_to_source(name: &str, store_at: &LoopLevel, compute_at: &LoopLevel) -> String {
    let mut out = String::from(name);
    if compute_at.is_inline() {
        out.push_str(".compute_inline()");
    } else {
        let pretty = |var: &str| if var == OUTERMOST { "outermost".to_string() } else { var.to_string() };
        if store_at != compute_at {
            if store_at.is_root() {
                out.push_str(".store_root()");
            } else {
                let _ = write!(out, ".store_at({}, {})", store_at.func, pretty(&store_at.var));
            }
        }
        if compute_at.is_root() {
            out.push_str(".compute_root()");
        } else {
            let _ = write!(out, ".compute_at({}, {})", compute_at.func, pretty(&compute_at.var));
        }
    }
    out.push(';');
    out
}

struct StmtUsesFunc<'a> {
    func: &'a str,
    found: bool,
}

impl IrVisitor for StmtUsesFunc<'_> {
    fn visit_expr(&mut self, e: &ExprRef) {
        if let Expr::Call { kind: CallKind::Func { name, .. }, .. } = &**e
            && name == self.func
        {
            self.found = true;
        }
        visit_expr_children(self, e);
    }
}

/// Renders the tree of uses of one function, eliding loops that do not
/// involve it as `...`.
struct PrintUsesOfFunc<'a> {
    func: &'a str,
    caller: String,
    indent: usize,
    last_print_was_ellipsis: bool,
    out: &'a mut String,
}

impl PrintUsesOfFunc<'_> {
    fn do_indent(&mut self) {
        for _ in 0..self.indent {
            self.out.push_str("  ");
        }
    }
}

impl IrVisitor for PrintUsesOfFunc<'_> {
    fn visit_stmt(&mut self, s: &StmtRef) {
        match &**s {
            Stmt::For { name, body, .. } => {
                if name.ends_with(&format!(".{OUTERMOST}")) || name.ends_with(&format!(".{ROOT}")) {
                    visit_stmt_children(self, s);
                    return;
                }
                let saved_indent = self.indent;
                let mut uses = StmtUsesFunc { func: self.func, found: false };
                uses.visit_stmt(body);
                if !uses.found {
                    if !self.last_print_was_ellipsis {
                        self.do_indent();
                        self.out.push_str("...\n");
                        self.last_print_was_ellipsis = true;
                    }
                } else {
                    self.do_indent();
                    let _ = writeln!(self.out, "for {name}:");
                    self.last_print_was_ellipsis = false;
                    self.indent += 1;
                }
                visit_stmt_children(self, s);
                self.indent = saved_indent;
            }
            Stmt::ProducerConsumer { name, produce, update, consume } => {
                let saved_caller = std::mem::replace(&mut self.caller, name.clone());
                self.visit_stmt(produce);
                if let Some(update) = update {
                    self.visit_stmt(update);
                }
                self.caller = saved_caller;
                self.visit_stmt(consume);
            }
            _ => visit_stmt_children(self, s),
        }
    }

    fn visit_expr(&mut self, e: &ExprRef) {
        if let Expr::Call { kind: CallKind::Func { name, .. }, .. } = &**e
            && name == self.func
        {
            self.do_indent();
            let _ = writeln!(self.out, "{} uses {}", self.caller, self.func);
            self.last_print_was_ellipsis = false;
        } else {
            visit_expr_children(self, e);
        }
    }
}

/// Check `f`'s placement against the evolving statement `s`.
pub fn validate_schedule(f: &Function, s: &StmtRef, is_output: bool, env: &Env) -> Result<()> {
    // Inlining across an extern boundary is ill-defined: there is no call
    // site to substitute into.
    if let Some(extern_def) = f.extern_definition() {
        for arg in &extern_def.args {
            if let ExternArgument::FuncRef(input) = arg
                && let Some(g) = env.get(input)
                && g.schedule().compute_level.is_inline()
            {
                return InlinedIntoExternSnafu { func: input.clone(), extern_func: f.name() }.fail();
            }
        }
    }

    // A half-scheduled update chain is usually a forgotten call.
    let any_scheduled =
        f.schedule().touched || f.updates().iter().any(|u| u.schedule.touched);
    if any_scheduled {
        for (i, update) in f.updates().iter().enumerate() {
            if !update.schedule.touched {
                warn!(
                    func = f.name(),
                    update = i,
                    "update step has not been scheduled, even though other steps have been; \
                     schedule it explicitly to suppress this warning"
                );
            }
        }
    }

    let store_at = f.schedule().store_level.clone();
    let compute_at = f.schedule().compute_level.clone();

    // Outputs live in caller-provided storage; anything but root makes no
    // sense.
    if is_output {
        if store_at.is_root() && compute_at.is_root() {
            return Ok(());
        }
        return OutputNotRootSnafu { func: f.name() }.fail();
    }

    // Inlining is always allowed.
    if store_at.is_inline() && compute_at.is_inline() {
        return Ok(());
    }

    let sites = legal_sites(f, s);

    let mut store_at_ok = false;
    let mut compute_at_ok = false;
    let mut store_idx = 0;
    let mut compute_idx = 0;
    for (i, site) in sites.iter().enumerate() {
        if site.level.match_level(&store_at) {
            store_at_ok = true;
            store_idx = i;
        }
        if site.level.match_level(&compute_at) {
            // Storage must enclose computation, so the store site has to
            // appear at or above the compute site.
            compute_at_ok = store_at_ok;
            compute_idx = i;
        }
    }

    let mut diagnostic = String::new();

    if store_at_ok && compute_at_ok {
        for site in sites.iter().take(compute_idx + 1).skip(store_idx + 1) {
            if site.is_parallel {
                let _ = writeln!(
                    diagnostic,
                    "func {:?} is stored outside the parallel loop over {}.{} but computed \
                     within it; this is a potential race condition",
                    f.name(),
                    site.level.func,
                    site.level.var
                );
                store_at_ok = false;
                compute_at_ok = false;
            }
        }
    }

    if !store_at_ok || !compute_at_ok {
        let _ = writeln!(
            diagnostic,
            "func {:?} is computed at the following invalid location:",
            f.name()
        );
        let _ = writeln!(diagnostic, "  {}", schedule_to_source(f.name(), &store_at, &compute_at));
        let _ = writeln!(diagnostic, "legal locations for this function are:");
        for site in &sites {
            let _ = writeln!(
                diagnostic,
                "  {}",
                schedule_to_source(f.name(), &site.level, &site.level)
            );
        }
        let _ = writeln!(diagnostic, "{:?} is used in the following places:", f.name());
        let mut printer = PrintUsesOfFunc {
            func: f.name(),
            caller: String::new(),
            indent: 1,
            last_print_was_ellipsis: false,
            out: &mut diagnostic,
        };
        printer.visit_stmt(s);

        return IllegalScheduleSnafu { func: f.name(), diagnostic }.fail();
    }

    Ok(())
}
