//! Variable substitution, prefix qualification and free-variable queries.

use std::collections::HashMap;

use crate::expr::{CallKind, Expr, ExprRef, var};
use crate::stmt::StmtRef;
use crate::visit::{IrMutator, IrVisitor, mutate_expr_children, visit_expr_children};

struct Substitute<'a> {
    replacements: &'a HashMap<String, ExprRef>,
}

impl IrMutator for Substitute<'_> {
    fn mutate_expr(&mut self, e: &ExprRef) -> ExprRef {
        match &**e {
            Expr::Var(name) => match self.replacements.get(name) {
                Some(replacement) => replacement.clone(),
                None => e.clone(),
            },
            // The value of a let is outside the binding; the body shadows it.
            Expr::Let { name, value, body } if self.replacements.contains_key(name) => {
                let nvalue = self.mutate_expr(value);
                let mut narrowed = self.replacements.clone();
                narrowed.remove(name);
                let nbody = Substitute { replacements: &narrowed }.mutate_expr(body);
                if crate::expr::same_as(&nvalue, value) && crate::expr::same_as(&nbody, body) {
                    e.clone()
                } else {
                    std::rc::Rc::new(Expr::Let { name: name.clone(), value: nvalue, body: nbody })
                }
            }
            _ => mutate_expr_children(self, e),
        }
    }
}

/// Replace every free occurrence of `name` in an expression.
pub fn substitute(name: &str, replacement: &ExprRef, e: &ExprRef) -> ExprRef {
    let mut map = HashMap::new();
    map.insert(name.to_string(), replacement.clone());
    substitute_map(&map, e)
}

/// Replace every free occurrence of each mapped name in an expression.
pub fn substitute_map(replacements: &HashMap<String, ExprRef>, e: &ExprRef) -> ExprRef {
    Substitute { replacements }.mutate_expr(e)
}

/// Replace every free occurrence of `name` in a statement.
pub fn substitute_stmt(name: &str, replacement: &ExprRef, s: &StmtRef) -> StmtRef {
    let mut map = HashMap::new();
    map.insert(name.to_string(), replacement.clone());
    substitute_map_stmt(&map, s)
}

/// Replace every free occurrence of each mapped name in a statement.
pub fn substitute_map_stmt(replacements: &HashMap<String, ExprRef>, s: &StmtRef) -> StmtRef {
    Substitute { replacements }.mutate_stmt(s)
}

struct Qualify<'a, S: AsRef<str>> {
    prefix: &'a str,
    vars: &'a [S],
}

impl<S: AsRef<str>> Qualify<'_, S> {
    fn is_qualified(&self, name: &str) -> bool {
        self.vars.iter().any(|v| v.as_ref() == name)
    }
}

impl<S: AsRef<str>> IrMutator for Qualify<'_, S> {
    fn mutate_expr(&mut self, e: &ExprRef) -> ExprRef {
        match &**e {
            Expr::Var(name) if self.is_qualified(name) => var(format!("{}{}", self.prefix, name)),
            _ => mutate_expr_children(self, e),
        }
    }
}

/// Prefix the stage's loop variables (pure args and reduction variables)
/// with a stage prefix such as `f.s0.`. Other free variables are pipeline
/// parameters and keep their names; call names refer to other functions
/// and are likewise left alone.
pub fn qualify<S: AsRef<str>>(prefix: &str, e: &ExprRef, vars: &[S]) -> ExprRef {
    Qualify { prefix, vars }.mutate_expr(e)
}

struct UsesVar<'a> {
    name: &'a str,
    found: bool,
}

impl IrVisitor for UsesVar<'_> {
    fn visit_expr(&mut self, e: &ExprRef) {
        if self.found {
            return;
        }
        if let Expr::Var(name) = &**e
            && name == self.name
        {
            self.found = true;
            return;
        }
        visit_expr_children(self, e);
    }
}

/// Does the expression mention `name` as a variable?
pub fn expr_uses_var(e: &ExprRef, name: &str) -> bool {
    let mut v = UsesVar { name, found: false };
    v.visit_expr(e);
    v.found
}
