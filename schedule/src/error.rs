//! User-facing scheduling errors.
//!
//! Two severities exist in this crate: user errors (this enum, returned as
//! `Result` and fatal to compilation) and internal invariant violations,
//! which panic. Warnings go through `tracing` and never fail the build.

use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// An exact split whose factor could not be proven to divide the extent.
    #[snafu(display(
        "when splitting {var:?} into {outer:?} and {inner:?}, could not prove the split \
         factor ({factor}) divides the extent of {var:?} ({extent}); this is required when \
         the split originates from a reduction variable"
    ))]
    ExactSplit { var: String, outer: String, inner: String, factor: String, extent: String },

    /// A store/compute placement that is not among the legal sites, or that
    /// straddles a parallel loop. The diagnostic carries the schedule in
    /// source syntax, the legal sites, and the tree of uses.
    #[snafu(display("func {func:?} has an illegal schedule\n{diagnostic}"))]
    IllegalSchedule { func: String, diagnostic: String },

    /// Output functions must be stored and computed at the root.
    #[snafu(display("func {func:?} is an output, so it must be scheduled compute_root"))]
    OutputNotRoot { func: String },

    /// A function consumed by an extern stage cannot be inlined: there is
    /// no call site to substitute it into.
    #[snafu(display(
        "func {func:?} cannot be scheduled inline, because it is used by the \
         externally-computed function {extern_func:?}"
    ))]
    InlinedIntoExtern { func: String, extern_func: String },

    /// Errors bubbled up from pipeline construction and ordering.
    #[snafu(transparent)]
    Ir { source: fresco_ir::Error },
}
