//! Statement nodes and constructor helpers.

use std::rc::Rc;

use crate::expr::{ExprRef, IntoExpr};
use crate::types::ElemType;

/// Shared handle to an immutable statement node.
pub type StmtRef = Rc<Stmt>;

/// Loop execution strategy, attached to every [`Stmt::For`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForType {
    Serial,
    Parallel,
    Vectorized,
    Unrolled,
}

/// Device-API tag on a loop.
///
/// `Parent` means "inherit from the enclosing loop"; lowering finishes with
/// a propagation pass that replaces every `Parent` with the nearest
/// enclosing concrete tag (outermost loops inherit `Host`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceApi {
    Parent,
    Host,
    Cuda,
    OpenCl,
    Metal,
}

/// Statement node. Same sharing discipline as [`crate::expr::Expr`].
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Multi-valued store of `values` at coordinates `args` into the
    /// realization of `name`. Consumed by bounds inference and storage
    /// flattening downstream.
    Provide {
        name: String,
        values: Vec<ExprRef>,
        args: Vec<ExprRef>,
    },

    For {
        name: String,
        min: ExprRef,
        extent: ExprRef,
        for_type: ForType,
        device_api: DeviceApi,
        body: StmtRef,
    },

    LetStmt {
        name: String,
        value: ExprRef,
        body: StmtRef,
    },

    Block {
        first: StmtRef,
        rest: StmtRef,
    },

    IfThenElse {
        condition: ExprRef,
        then_case: StmtRef,
        else_case: Option<StmtRef>,
    },

    /// Allocation lifetime scope for a function's storage. `bounds` is one
    /// `(min, extent)` pair per dimension.
    Realize {
        name: String,
        types: Vec<ElemType>,
        bounds: Vec<(ExprRef, ExprRef)>,
        body: StmtRef,
    },

    /// Produce / update / consume structure for one function.
    ProducerConsumer {
        name: String,
        produce: StmtRef,
        update: Option<StmtRef>,
        consume: StmtRef,
    },

    AssertStmt {
        condition: ExprRef,
        message: ExprRef,
    },

    Evaluate(ExprRef),
}

/// Pointer identity for statements.
pub fn same_stmt(a: &StmtRef, b: &StmtRef) -> bool {
    Rc::ptr_eq(a, b)
}

pub fn provide(name: impl Into<String>, values: Vec<ExprRef>, args: Vec<ExprRef>) -> StmtRef {
    Rc::new(Stmt::Provide { name: name.into(), values, args })
}

pub fn for_loop(
    name: impl Into<String>,
    min: impl IntoExpr,
    extent: impl IntoExpr,
    for_type: ForType,
    device_api: DeviceApi,
    body: StmtRef,
) -> StmtRef {
    Rc::new(Stmt::For {
        name: name.into(),
        min: min.into_expr(),
        extent: extent.into_expr(),
        for_type,
        device_api,
        body,
    })
}

pub fn let_stmt(name: impl Into<String>, value: impl IntoExpr, body: StmtRef) -> StmtRef {
    Rc::new(Stmt::LetStmt { name: name.into(), value: value.into_expr(), body })
}

pub fn block_pair(first: StmtRef, rest: StmtRef) -> StmtRef {
    Rc::new(Stmt::Block { first, rest })
}

pub fn if_then_else(condition: impl IntoExpr, then_case: StmtRef, else_case: Option<StmtRef>) -> StmtRef {
    Rc::new(Stmt::IfThenElse { condition: condition.into_expr(), then_case, else_case })
}

pub fn realize(
    name: impl Into<String>,
    types: Vec<ElemType>,
    bounds: Vec<(ExprRef, ExprRef)>,
    body: StmtRef,
) -> StmtRef {
    Rc::new(Stmt::Realize { name: name.into(), types, bounds, body })
}

pub fn producer_consumer(
    name: impl Into<String>,
    produce: StmtRef,
    update: Option<StmtRef>,
    consume: StmtRef,
) -> StmtRef {
    Rc::new(Stmt::ProducerConsumer { name: name.into(), produce, update, consume })
}

pub fn assert_stmt(condition: impl IntoExpr, message: impl IntoExpr) -> StmtRef {
    Rc::new(Stmt::AssertStmt { condition: condition.into_expr(), message: message.into_expr() })
}

pub fn evaluate(value: impl IntoExpr) -> StmtRef {
    Rc::new(Stmt::Evaluate(value.into_expr()))
}
