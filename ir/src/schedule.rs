//! The schedule data model: loop dims, splits, loop levels, bounds and
//! specializations.
//!
//! Schedules are mutated only before lowering runs (by the user building the
//! pipeline, or by the auto-scheduling advisor during emission); the
//! lowering passes observe them read-only.

use crate::expr::{Expr, ExprRef, IntoExpr};
use crate::func::ReductionDomain;
pub use crate::stmt::{DeviceApi, ForType};

/// Name of the synthetic dimension appended outside every real loop dim.
pub const OUTERMOST: &str = "__outermost";

/// Name of the root loop variable.
pub const ROOT: &str = "__root";

/// One loop variable in the schedule's ordered dim list (innermost first).
#[derive(Debug, Clone, PartialEq)]
pub struct Dim {
    pub var: String,
    pub for_type: ForType,
    /// True for dims derived from pure function arguments, false for
    /// reduction variables.
    pub pure_dim: bool,
    pub device_api: DeviceApi,
}

/// An explicit bound `var in [min, min+extent)` declared on a schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct Bound {
    pub var: String,
    pub min: ExprRef,
    pub extent: ExprRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitKind {
    /// `old = outer * factor + inner`.
    SplitVar,
    /// `old = inner + outer * inner_extent` (old is the fused var).
    FuseVars,
    /// `old = outer`.
    Rename,
}

/// One schedule-variable transformation.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub old: String,
    pub outer: String,
    pub inner: String,
    /// Tile extent for `SplitVar`; unused for fuse and rename.
    pub factor: Option<ExprRef>,
    /// Caller guarantees the factor divides the extent (reduction splits).
    pub exact: bool,
    /// Tail handled by a min-clamped tile extent instead of a shifted base.
    pub partial: bool,
    pub kind: SplitKind,
}

impl Split {
    pub fn is_split(&self) -> bool {
        self.kind == SplitKind::SplitVar
    }

    pub fn is_fuse(&self) -> bool {
        self.kind == SplitKind::FuseVars
    }

    pub fn is_rename(&self) -> bool {
        self.kind == SplitKind::Rename
    }
}

/// Where a function's storage or computation is placed: at a loop of another
/// function, at the root, or nowhere (inlined).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopLevel {
    pub func: String,
    pub var: String,
}

impl LoopLevel {
    pub fn new(func: impl Into<String>, var: impl Into<String>) -> Self {
        Self { func: func.into(), var: var.into() }
    }

    /// The outermost level, outside all loops.
    pub fn root() -> Self {
        Self { func: ROOT.to_string(), var: ROOT.to_string() }
    }

    /// No level at all: the function is substituted into its callers.
    pub fn inlined() -> Self {
        Self { func: String::new(), var: String::new() }
    }

    pub fn is_root(&self) -> bool {
        self.var == ROOT
    }

    pub fn is_inline(&self) -> bool {
        self.var.is_empty()
    }

    /// Does this level name the given loop? Loop names look like
    /// `func.s0.var`; the stage component is ignored.
    pub fn match_loop_name(&self, loop_name: &str) -> bool {
        loop_name.starts_with(&format!("{}.", self.func)) && loop_name.ends_with(&format!(".{}", self.var))
    }

    /// Structural match between two levels; `__outermost` acts as a
    /// wildcard var within the same function.
    pub fn match_level(&self, other: &LoopLevel) -> bool {
        self.func == other.func
            && (self.var == other.var || self.var == OUTERMOST || other.var == OUTERMOST)
    }
}

/// A predicate-guarded alternative schedule for the same stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Specialization {
    pub condition: ExprRef,
    pub schedule: Schedule,
}

/// The three predicate shapes specialization lowering distinguishes.
#[derive(Debug, Clone, PartialEq)]
pub enum SpecPredicate {
    /// A bare boolean variable.
    BoolVar(String),
    /// `var == literal`.
    VarEqLiteral(String, ExprRef),
    /// Anything else; lowered without scrutinee substitution.
    General,
}

impl SpecPredicate {
    pub fn classify(condition: &ExprRef) -> Self {
        match &**condition {
            Expr::Var(name) => Self::BoolVar(name.clone()),
            Expr::Eq(a, b) => match (a.as_var(), b.is_simple_const()) {
                (Some(name), true) => Self::VarEqLiteral(name.to_string(), b.clone()),
                _ => Self::General,
            },
            _ => Self::General,
        }
    }
}

/// Everything the user (or the advisor) has said about how to evaluate one
/// stage of a function.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    /// Ordered loop dims, innermost first, ending with [`OUTERMOST`].
    pub dims: Vec<Dim>,
    pub splits: Vec<Split>,
    pub bounds: Vec<Bound>,
    pub rdom: Option<ReductionDomain>,
    pub store_level: LoopLevel,
    pub compute_level: LoopLevel,
    pub specializations: Vec<Specialization>,
    pub memoized: bool,
    /// Set whenever a scheduling call touches this stage; used to warn about
    /// half-scheduled update chains.
    pub touched: bool,
}

impl Schedule {
    /// The default schedule over the given pure arguments: one serial dim
    /// per argument (innermost first) plus the synthetic outermost dim,
    /// stored and computed inline.
    pub fn for_args<S: AsRef<str>>(args: &[S]) -> Self {
        let mut dims: Vec<Dim> = args
            .iter()
            .map(|a| Dim {
                var: a.as_ref().to_string(),
                for_type: ForType::Serial,
                pure_dim: true,
                device_api: DeviceApi::Parent,
            })
            .collect();
        dims.push(Dim {
            var: OUTERMOST.to_string(),
            for_type: ForType::Serial,
            pure_dim: true,
            device_api: DeviceApi::Parent,
        });
        Self {
            dims,
            splits: Vec::new(),
            bounds: Vec::new(),
            rdom: None,
            store_level: LoopLevel::inlined(),
            compute_level: LoopLevel::inlined(),
            specializations: Vec::new(),
            memoized: false,
            touched: false,
        }
    }

    /// The default schedule for an update stage: reduction variables
    /// innermost, then the pure vars that appear in the site, then the
    /// outermost dim.
    pub fn for_update<S: AsRef<str>>(pure_vars: &[S], rdom: Option<&ReductionDomain>) -> Self {
        let mut dims: Vec<Dim> = Vec::new();
        if let Some(rdom) = rdom {
            for rv in &rdom.domain {
                dims.push(Dim {
                    var: rv.var.clone(),
                    for_type: ForType::Serial,
                    pure_dim: false,
                    device_api: DeviceApi::Parent,
                });
            }
        }
        for v in pure_vars {
            dims.push(Dim {
                var: v.as_ref().to_string(),
                for_type: ForType::Serial,
                pure_dim: true,
                device_api: DeviceApi::Parent,
            });
        }
        dims.push(Dim {
            var: OUTERMOST.to_string(),
            for_type: ForType::Serial,
            pure_dim: true,
            device_api: DeviceApi::Parent,
        });
        Self {
            dims,
            splits: Vec::new(),
            bounds: Vec::new(),
            rdom: rdom.cloned(),
            store_level: LoopLevel::inlined(),
            compute_level: LoopLevel::inlined(),
            specializations: Vec::new(),
            memoized: false,
            touched: false,
        }
    }

    fn dim_index(&self, var: &str) -> usize {
        self.dims
            .iter()
            .position(|d| d.var == var)
            .unwrap_or_else(|| panic!("no dimension named {var:?} in schedule"))
    }

    pub fn compute_root(&mut self) -> &mut Self {
        self.store_level = LoopLevel::root();
        self.compute_level = LoopLevel::root();
        self.touched = true;
        self
    }

    pub fn compute_inline(&mut self) -> &mut Self {
        self.store_level = LoopLevel::inlined();
        self.compute_level = LoopLevel::inlined();
        self.touched = true;
        self
    }

    pub fn compute_at(&mut self, func: impl Into<String>, var: impl Into<String>) -> &mut Self {
        self.compute_level = LoopLevel::new(func, var);
        if self.store_level.is_inline() {
            self.store_level = self.compute_level.clone();
        }
        self.touched = true;
        self
    }

    pub fn store_at(&mut self, func: impl Into<String>, var: impl Into<String>) -> &mut Self {
        self.store_level = LoopLevel::new(func, var);
        self.touched = true;
        self
    }

    /// Split `old` into `outer * factor + inner`, replacing its dim with the
    /// (inner, outer) pair in place.
    pub fn split(
        &mut self,
        old: &str,
        outer: impl Into<String>,
        inner: impl Into<String>,
        factor: impl IntoExpr,
    ) -> &mut Self {
        self.split_with(old, outer, inner, factor, false, false)
    }

    pub fn split_with(
        &mut self,
        old: &str,
        outer: impl Into<String>,
        inner: impl Into<String>,
        factor: impl IntoExpr,
        exact: bool,
        partial: bool,
    ) -> &mut Self {
        let outer = outer.into();
        let inner = inner.into();
        let idx = self.dim_index(old);
        let template = self.dims[idx].clone();
        self.dims[idx].var = inner.clone();
        self.dims.insert(idx + 1, Dim { var: outer.clone(), ..template });
        self.splits.push(Split {
            old: old.to_string(),
            outer,
            inner,
            factor: Some(factor.into_expr()),
            exact,
            partial,
            kind: SplitKind::SplitVar,
        });
        self.touched = true;
        self
    }

    /// Fuse `inner` and `outer` into a single var.
    pub fn fuse(&mut self, inner: &str, outer: &str, fused: impl Into<String>) -> &mut Self {
        let fused = fused.into();
        let outer_idx = self.dim_index(outer);
        let outer_pure = self.dims[outer_idx].pure_dim;
        self.dims.remove(outer_idx);
        let inner_idx = self.dim_index(inner);
        self.dims[inner_idx].var = fused.clone();
        self.dims[inner_idx].pure_dim &= outer_pure;
        self.splits.push(Split {
            old: fused,
            outer: outer.to_string(),
            inner: inner.to_string(),
            factor: None,
            exact: false,
            partial: false,
            kind: SplitKind::FuseVars,
        });
        self.touched = true;
        self
    }

    /// Rename a dim (identity split).
    pub fn rename(&mut self, old: &str, new: impl Into<String>) -> &mut Self {
        let new = new.into();
        let idx = self.dim_index(old);
        self.dims[idx].var = new.clone();
        self.splits.push(Split {
            old: old.to_string(),
            outer: new,
            inner: String::new(),
            factor: None,
            exact: false,
            partial: false,
            kind: SplitKind::Rename,
        });
        self.touched = true;
        self
    }

    /// Reorder the named dims (innermost first); their slots in the dim
    /// list are refilled in the requested order, other dims stay put.
    pub fn reorder<S: AsRef<str>>(&mut self, vars: &[S]) -> &mut Self {
        let positions: Vec<usize> = vars.iter().map(|v| self.dim_index(v.as_ref())).collect();
        let mut slots = positions.clone();
        slots.sort_unstable();
        let reordered: Vec<Dim> = positions.iter().map(|&i| self.dims[i].clone()).collect();
        for (slot, dim) in slots.into_iter().zip(reordered) {
            self.dims[slot] = dim;
        }
        self.touched = true;
        self
    }

    pub fn parallel(&mut self, var: &str) -> &mut Self {
        let idx = self.dim_index(var);
        self.dims[idx].for_type = ForType::Parallel;
        self.touched = true;
        self
    }

    pub fn vectorize(&mut self, var: &str) -> &mut Self {
        let idx = self.dim_index(var);
        self.dims[idx].for_type = ForType::Vectorized;
        self.touched = true;
        self
    }

    pub fn unroll(&mut self, var: &str) -> &mut Self {
        let idx = self.dim_index(var);
        self.dims[idx].for_type = ForType::Unrolled;
        self.touched = true;
        self
    }

    /// Declare the evaluated range of a pure dimension.
    pub fn bound(&mut self, var: impl Into<String>, min: impl IntoExpr, extent: impl IntoExpr) -> &mut Self {
        self.bounds.push(Bound { var: var.into(), min: min.into_expr(), extent: extent.into_expr() });
        self.touched = true;
        self
    }

    pub fn specialize(&mut self, condition: ExprRef, schedule: Schedule) -> &mut Self {
        self.specializations.push(Specialization { condition, schedule });
        self.touched = true;
        self
    }
}
