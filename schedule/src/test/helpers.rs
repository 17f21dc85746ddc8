//! Test utilities: pipeline builders and IR structure probes.

use fresco_ir::expr::{Expr, ExprRef};
use fresco_ir::func::{Env, Function};
use fresco_ir::stmt::{DeviceApi, ForType, Stmt, StmtRef};
use fresco_ir::types::ElemType;
use fresco_ir::visit::{IrVisitor, visit_expr_children, visit_stmt_children};

use crate::lower::schedule_functions;

/// A single-valued `Int(32)` function over the given args.
pub fn pure_func<S: AsRef<str>>(name: &str, args: &[S], value: ExprRef) -> Function {
    Function::new(name, args, vec![value], vec![ElemType::Int(32)]).expect("valid test function")
}

pub fn env_of(funcs: Vec<Function>) -> Env {
    let mut env = Env::new();
    for f in funcs {
        env.insert(f.name().to_string(), f);
    }
    env
}

/// Lower a pipeline through the public entry, computing the realization
/// order internally. Panics on scheduling errors; use
/// [`crate::lower::schedule_functions`] directly to observe them.
pub fn lower(outputs: &[&str], env: &Env) -> StmtRef {
    let outputs: Vec<String> = outputs.iter().map(|s| s.to_string()).collect();
    let order = fresco_ir::callgraph::realization_order(&outputs, env).expect("acyclic pipeline");
    let (stmt, _) = schedule_functions(&outputs, &order, env, false).expect("legal schedule");
    stmt
}

struct CollectLoops {
    loops: Vec<(String, ForType, DeviceApi)>,
}

impl IrVisitor for CollectLoops {
    fn visit_stmt(&mut self, s: &StmtRef) {
        if let Stmt::For { name, for_type, device_api, .. } = &**s {
            self.loops.push((name.clone(), *for_type, *device_api));
        }
        visit_stmt_children(self, s);
    }
}

/// Every loop in the statement, outermost first (preorder).
pub fn collect_loops(s: &StmtRef) -> Vec<(String, ForType, DeviceApi)> {
    let mut v = CollectLoops { loops: Vec::new() };
    v.visit_stmt(s);
    v.loops
}

pub fn loop_names(s: &StmtRef) -> Vec<String> {
    collect_loops(s).into_iter().map(|(name, _, _)| name).collect()
}

enum NodeQuery {
    For(String),
    Realize(String),
    ProducerConsumer(String),
}

struct FindNode {
    query: NodeQuery,
    found: Option<StmtRef>,
}

impl IrVisitor for FindNode {
    fn visit_stmt(&mut self, s: &StmtRef) {
        if self.found.is_some() {
            return;
        }
        let hit = match (&self.query, &**s) {
            (NodeQuery::For(wanted), Stmt::For { name, .. }) => name == wanted,
            (NodeQuery::Realize(wanted), Stmt::Realize { name, .. }) => name == wanted,
            (NodeQuery::ProducerConsumer(wanted), Stmt::ProducerConsumer { name, .. }) => {
                name == wanted
            }
            _ => false,
        };
        if hit {
            self.found = Some(s.clone());
            return;
        }
        visit_stmt_children(self, s);
    }
}

pub fn find_loop(s: &StmtRef, name: &str) -> Option<StmtRef> {
    let mut v = FindNode { query: NodeQuery::For(name.to_string()), found: None };
    v.visit_stmt(s);
    v.found
}

pub fn find_realize(s: &StmtRef, name: &str) -> Option<StmtRef> {
    let mut v = FindNode { query: NodeQuery::Realize(name.to_string()), found: None };
    v.visit_stmt(s);
    v.found
}

pub fn find_producer_consumer(s: &StmtRef, name: &str) -> Option<StmtRef> {
    let mut v = FindNode { query: NodeQuery::ProducerConsumer(name.to_string()), found: None };
    v.visit_stmt(s);
    v.found
}

struct CollectLets {
    lets: Vec<(String, ExprRef)>,
}

impl IrVisitor for CollectLets {
    fn visit_stmt(&mut self, s: &StmtRef) {
        if let Stmt::LetStmt { name, value, .. } = &**s {
            self.lets.push((name.clone(), value.clone()));
        }
        visit_stmt_children(self, s);
    }
}

/// Every let binding in the statement, outermost first.
pub fn collect_lets(s: &StmtRef) -> Vec<(String, ExprRef)> {
    let mut v = CollectLets { lets: Vec::new() };
    v.visit_stmt(s);
    v.lets
}

pub fn let_value(s: &StmtRef, name: &str) -> Option<ExprRef> {
    collect_lets(s).into_iter().find(|(n, _)| n == name).map(|(_, v)| v)
}

struct HasLikely {
    found: bool,
}

impl IrVisitor for HasLikely {
    fn visit_expr(&mut self, e: &ExprRef) {
        if matches!(&**e, Expr::Likely(_)) {
            self.found = true;
        }
        visit_expr_children(self, e);
    }
}

pub fn contains_likely(s: &StmtRef) -> bool {
    let mut v = HasLikely { found: false };
    v.visit_stmt(s);
    v.found
}

struct CollectProvides {
    provides: Vec<(String, Vec<ExprRef>, Vec<ExprRef>)>,
}

impl IrVisitor for CollectProvides {
    fn visit_stmt(&mut self, s: &StmtRef) {
        if let Stmt::Provide { name, values, args } = &**s {
            self.provides.push((name.clone(), values.clone(), args.clone()));
        }
        visit_stmt_children(self, s);
    }
}

pub fn collect_provides(s: &StmtRef) -> Vec<(String, Vec<ExprRef>, Vec<ExprRef>)> {
    let mut v = CollectProvides { provides: Vec::new() };
    v.visit_stmt(s);
    v.provides
}
