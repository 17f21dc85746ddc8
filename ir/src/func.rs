//! Pipeline functions: pure definitions, reduction updates and extern
//! stages, each carrying its schedule.

use std::collections::BTreeMap;

use snafu::ensure;

use crate::error::{
    DuplicateArgumentSnafu, ExternWithDefinitionSnafu, Result, UpdateArityMismatchSnafu,
    ValueCountMismatchSnafu,
};
use crate::expr::ExprRef;
use crate::schedule::Schedule;
use crate::types::ElemType;

/// The pipeline environment: every function, keyed by name. Ordered so that
/// every pass iterates deterministically.
pub type Env = BTreeMap<String, Function>;

/// One reduction variable of an update's domain.
#[derive(Debug, Clone, PartialEq)]
pub struct ReductionVariable {
    pub var: String,
    pub min: ExprRef,
    pub extent: ExprRef,
}

/// The iteration domain of a reduction update.
#[derive(Debug, Clone, PartialEq)]
pub struct ReductionDomain {
    pub domain: Vec<ReductionVariable>,
}

/// One update stage: per-axis site expressions, values, an optional
/// reduction domain, and its own schedule.
#[derive(Debug, Clone)]
pub struct UpdateDefinition {
    pub args: Vec<ExprRef>,
    pub values: Vec<ExprRef>,
    pub domain: Option<ReductionDomain>,
    pub schedule: Schedule,
}

/// An argument to an extern stage.
#[derive(Debug, Clone)]
pub enum ExternArgument {
    /// Passed through as a scalar expression.
    Expr(ExprRef),
    /// A pipeline function; lowered to one buffer handle per output channel.
    FuncRef(String),
    /// A concrete buffer bound at compile time.
    BufferRef { name: String, elem: ElemType, dims: usize },
    /// A runtime image parameter.
    ImageParam { name: String, elem: ElemType, dims: usize },
}

/// The extern definition of an opaque stage.
#[derive(Debug, Clone)]
pub struct ExternDefinition {
    pub name: String,
    pub args: Vec<ExternArgument>,
}

/// A pipeline function.
#[derive(Debug, Clone)]
pub struct Function {
    name: String,
    args: Vec<String>,
    values: Vec<ExprRef>,
    updates: Vec<UpdateDefinition>,
    extern_def: Option<ExternDefinition>,
    output_types: Vec<ElemType>,
    schedule: Schedule,
}

impl Function {
    /// Define a pure function over the given arguments.
    pub fn new<S: AsRef<str>>(
        name: impl Into<String>,
        args: &[S],
        values: Vec<ExprRef>,
        output_types: Vec<ElemType>,
    ) -> Result<Self> {
        let name = name.into();
        let args: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();
        for (i, a) in args.iter().enumerate() {
            ensure!(
                !args[..i].contains(a),
                DuplicateArgumentSnafu { func: name.clone(), arg: a.clone() }
            );
        }
        ensure!(
            values.len() == output_types.len(),
            ValueCountMismatchSnafu { func: name.clone(), expected: output_types.len(), found: values.len() }
        );
        let schedule = Schedule::for_args(&args);
        Ok(Self { name, args, values, updates: Vec::new(), extern_def: None, output_types, schedule })
    }

    /// Define an extern function: a named outside symbol filling the
    /// function's buffer. No internal definition is permitted.
    pub fn new_extern<S: AsRef<str>>(
        name: impl Into<String>,
        args: &[S],
        output_types: Vec<ElemType>,
        extern_def: ExternDefinition,
    ) -> Result<Self> {
        let name = name.into();
        let args: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();
        for (i, a) in args.iter().enumerate() {
            ensure!(
                !args[..i].contains(a),
                DuplicateArgumentSnafu { func: name.clone(), arg: a.clone() }
            );
        }
        let schedule = Schedule::for_args(&args);
        Ok(Self {
            name,
            args,
            values: Vec::new(),
            updates: Vec::new(),
            extern_def: Some(extern_def),
            output_types,
            schedule,
        })
    }

    /// Append an update stage. The site must cover every argument and the
    /// value count must match the pure definition's.
    pub fn define_update(
        &mut self,
        args: Vec<ExprRef>,
        values: Vec<ExprRef>,
        domain: Option<ReductionDomain>,
    ) -> Result<()> {
        ensure!(self.extern_def.is_none(), ExternWithDefinitionSnafu { func: self.name.clone() });
        ensure!(
            args.len() == self.args.len(),
            UpdateArityMismatchSnafu { func: self.name.clone(), expected: self.args.len(), found: args.len() }
        );
        ensure!(
            values.len() == self.values.len(),
            ValueCountMismatchSnafu {
                func: self.name.clone(),
                expected: self.values.len(),
                found: values.len()
            }
        );
        // Only the pure vars the site actually iterates over become loop
        // dims of the update stage.
        let used_args: Vec<String> = self
            .args
            .iter()
            .filter(|a| args.iter().any(|site| crate::substitute::expr_uses_var(site, a)))
            .cloned()
            .collect();
        let schedule = Schedule::for_update(&used_args, domain.as_ref());
        self.updates.push(UpdateDefinition { args, values, domain, schedule });
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn dimensions(&self) -> usize {
        self.args.len()
    }

    pub fn values(&self) -> &[ExprRef] {
        &self.values
    }

    pub fn updates(&self) -> &[UpdateDefinition] {
        &self.updates
    }

    pub fn updates_mut(&mut self) -> &mut [UpdateDefinition] {
        &mut self.updates
    }

    pub fn output_types(&self) -> &[ElemType] {
        &self.output_types
    }

    pub fn outputs(&self) -> usize {
        self.output_types.len()
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn schedule_mut(&mut self) -> &mut Schedule {
        &mut self.schedule
    }

    pub fn has_pure_definition(&self) -> bool {
        !self.values.is_empty()
    }

    pub fn has_update_definition(&self) -> bool {
        !self.updates.is_empty()
    }

    pub fn has_extern_definition(&self) -> bool {
        self.extern_def.is_some()
    }

    pub fn extern_definition(&self) -> Option<&ExternDefinition> {
        self.extern_def.as_ref()
    }

    /// Pure: a single stage, no updates, no extern body.
    pub fn is_pure(&self) -> bool {
        self.updates.is_empty() && self.extern_def.is_none()
    }
}
