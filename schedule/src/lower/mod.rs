//! Lowering: from (pipeline, schedule) to a concrete loop-nest statement.
//!
//! - [`nest`] - split normalization and per-stage loop-nest synthesis
//! - [`production`] - produce/update assembly, extern stages, bound asserts
//! - [`inject`] - realization injection and the `schedule_functions` driver
//! - [`validate`] - legal-site computation and race checks

pub mod inject;
pub mod nest;
pub mod production;
pub mod validate;

pub use inject::{InjectRealization, function_is_used_in_stmt, schedule_functions};
pub use nest::{build_loop_nest, normalize_splits};
pub use production::{
    EXPLICIT_BOUNDS_TOO_SMALL, EXTERN_STAGE_FAILED, build_produce, build_production, build_update,
    inject_explicit_bounds,
};
pub use validate::{Site, legal_sites, schedule_to_source, validate_schedule};
