//! cellspec: type specialization of memoized cell programs.
//!
//! A model is a package of "spaces", classes whose public methods ("cells")
//! are memoized formulas. This crate turns a model exported as plain host
//! source into statically typed source plus declaration files:
//! - Trace collection over a representative driver run
//! - Unification of observed argument and return types
//! - Structural parsing of space classes without evaluating them
//! - Storage decisions (scalar slot, dense array, sparse map) with bounds
//! - Source rewriting and declaration emission
//! - Python bindings via PyO3 (feature `python`)

pub mod codegen;
pub mod config;
pub mod consts;
pub mod diagnostics;
pub mod error;
pub mod parser;
pub mod trace;
pub mod translate;
pub mod unify;
pub mod value;

#[cfg(feature = "python")]
mod python;

// Re-exports for convenience
pub use codegen::{GenConfig, ModuleModel, StorageKind};
pub use config::TranslationSpec;
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use error::{Error, Result};
pub use trace::{trace_calls, TraceLog, TracerConfig};
pub use translate::{translate, TranslateOptions, Translation};
pub use unify::{CellFacts, RuntimeFacts, TypeFact};
pub use value::{Category, Value};
