//! Can a reduction variable's loop run in parallel?

use crate::derivative::is_one_to_one_in;
use crate::expr::{CallKind, Expr, ExprRef};
use crate::func::UpdateDefinition;
use crate::substitute::expr_uses_var;
use crate::visit::{IrVisitor, visit_expr_children};

struct SelfCalls<'a> {
    func: &'a str,
    sites: Vec<Vec<ExprRef>>,
}

impl IrVisitor for SelfCalls<'_> {
    fn visit_expr(&mut self, e: &ExprRef) {
        if let Expr::Call { kind: CallKind::Func { name, .. }, args } = &**e
            && name == self.func
        {
            self.sites.push(args.to_vec());
        }
        visit_expr_children(self, e);
    }
}

/// Conservative proof that iterations of `update` along `var` never touch
/// the same storage site:
///
/// - some site coordinate must use `var` (otherwise every iteration writes
///   the same site), and every coordinate that does must be one-to-one in it;
/// - every recursive read of the function inside the update values must use
///   exactly the site expressions, so a read never crosses into another
///   iteration's write.
///
/// A `false` answer only costs parallelism.
pub fn can_parallelize_rvar(var: &str, func_name: &str, update: &UpdateDefinition) -> bool {
    let mut var_in_site = false;
    for arg in &update.args {
        if expr_uses_var(arg, var) {
            var_in_site = true;
            if !is_one_to_one_in(arg, var) {
                return false;
            }
        }
    }
    if !var_in_site {
        return false;
    }

    let mut self_calls = SelfCalls { func: func_name, sites: Vec::new() };
    for value in &update.values {
        self_calls.visit_expr(value);
    }
    self_calls.sites.iter().all(|site| {
        site.len() == update.args.len()
            && site.iter().zip(&update.args).all(|(a, b)| a == b)
    })
}
