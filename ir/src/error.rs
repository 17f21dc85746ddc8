//! User-facing errors raised while building or ordering pipeline functions.

use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Function argument names must be unique.
    #[snafu(display("function {func:?} declares argument {arg:?} more than once"))]
    DuplicateArgument { func: String, arg: String },

    /// Pure and update definitions must agree on the number of values.
    #[snafu(display(
        "definition of {func:?} produces {found} values, but the function has {expected}"
    ))]
    ValueCountMismatch { func: String, expected: usize, found: usize },

    /// An update site must have one coordinate per function argument.
    #[snafu(display("update of {func:?} has {found} site coordinates, expected {expected}"))]
    UpdateArityMismatch { func: String, expected: usize, found: usize },

    /// Extern functions are opaque; they cannot also carry a definition.
    #[snafu(display("extern function {func:?} cannot have an internal definition"))]
    ExternWithDefinition { func: String },

    /// The pipeline call graph must be a DAG.
    #[snafu(display("pipeline call graph contains a cycle through {func:?}"))]
    CyclicCallGraph { func: String },

    /// A call names a function missing from the environment.
    #[snafu(display("function {func:?} is called but not defined in the pipeline"))]
    UndefinedFunction { func: String },
}
