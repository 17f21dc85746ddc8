//! Expression and statement IR for the fresco pipeline compiler.
//!
//! A pipeline is a DAG of [`Function`]s, each a pure (or reduction-updated)
//! mapping from integer coordinates to one or more values, carrying a
//! [`Schedule`] that describes how it is to be evaluated. This crate holds
//! the value-level IR those definitions are written in, together with the
//! analyses the scheduling core consumes:
//!
//! - [`expr`] / [`stmt`] - immutable, `Rc`-shared IR node trees
//! - [`visit`] - read-only walks and sharing-preserving rewrites
//! - [`substitute`] - variable substitution, prefix qualification
//! - [`simplify`] - constant folding and algebraic cleanup
//! - [`interval`] / [`bounds`] - interval arithmetic and required-region queries
//! - [`derivative`] - finite differences and injectivity checks
//! - [`func`] / [`schedule`] - the pipeline data model
//! - [`callgraph`] - call discovery, realization order, function inlining
//!
//! # Design
//!
//! IR nodes are immutable value trees shared by structural identity. The
//! compiler is single-threaded, so sharing uses `Rc`; pointer equality
//! ([`expr::same_as`]) is the cheap identity test and structural `PartialEq`
//! the semantic one. No hash consing: nothing in the core is hot enough to
//! need it, and `same_as` stays meaningful for rewriters that want to detect
//! "nothing changed".

use std::cell::Cell;

pub mod bounds;
pub mod callgraph;
pub mod derivative;
pub mod error;
pub mod expr;
pub mod func;
pub mod interval;
pub mod printer;
pub mod rvar;
pub mod schedule;
pub mod simplify;
pub mod stmt;
pub mod substitute;
pub mod types;
pub mod visit;

pub use error::{Error, Result};
pub use expr::{CallKind, Expr, ExprRef, IntoExpr, same_as};
pub use func::{Env, ExternArgument, ExternDefinition, Function, UpdateDefinition};
pub use interval::{Interval, Region, Scope};
pub use schedule::{Bound, DeviceApi, Dim, ForType, LoopLevel, Schedule, Split, SplitKind};
pub use stmt::{Stmt, StmtRef};
pub use types::ElemType;

// Thread-local counter for compiler-generated names.
//
// Cell<usize> rather than an atomic: the compiler is single-threaded by
// construction, and Cell being !Send + !Sync keeps it that way.
thread_local! {
    static NAME_COUNTER: Cell<usize> = const { Cell::new(0) };
}

/// Generate a fresh name that cannot collide with any user variable.
///
/// Used by split normalization (the synthetic middle variable of a
/// re-associated split chain) and by extern lowering (result temporaries).
pub fn unique_name(prefix: char) -> String {
    NAME_COUNTER.with(|counter| {
        let id = counter.get();
        counter.set(id + 1);
        format!("{prefix}{id}")
    })
}
