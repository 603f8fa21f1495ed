//! Specialized source generation.
//!
//! Runtime facts and static structure are combined into a resolved model,
//! from which each module is rewritten into Cython pure-Python mode and
//! given a declaration file:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        Generation Pipeline                          │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                                                                     │
//! │  ┌──────────────┐   ┌──────────────┐   ┌─────────────────────────┐  │
//! │  │ SymbolTable  │──►│ ModuleModel  │──►│ SpaceTransformer        │  │
//! │  └──────────────┘   │              │   │ - typed storage slots   │  │
//! │  ┌──────────────┐   │ - storage    │   │ - dense accessors       │  │
//! │  │ RuntimeFacts │──►│ - bounds     │   │ - typed declarations    │  │
//! │  └──────────────┘   │ - types      │   └─────────────────────────┘  │
//! │  ┌──────────────┐   │ - cimports   │   ┌─────────────────────────┐  │
//! │  │ Override spec│──►│              │──►│ Declarations (.pxd)     │  │
//! │  └──────────────┘   └──────────────┘   └─────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Storage layout
//!
//! | cell shape                                  | storage        |
//! |---------------------------------------------|----------------|
//! | no parameters                               | scalar slot    |
//! | integral non-negative parameters, numeric   | dense array    |
//! | anything else                               | sparse map     |
//!
//! [`runtime`] is the Rust counterpart of these layouts.

pub mod decl;
pub mod model;
pub mod runtime;
pub mod transform;

#[cfg(test)]
mod pipeline_test;

pub use decl::Declarations;
pub use model::{CellModel, Cimport, MemberModel, ModuleModel, SpaceModel, StorageKind, TypeExpr};
pub use transform::SpaceTransformer;

use crate::consts::{CY_MOD, SYS_MOD};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerateError {
    #[error("{module} already imports the Cython shadow module; generation is one-shot")]
    AlreadyGenerated { module: String },
}

/// Configuration for code generation
#[derive(Clone, Debug)]
pub struct GenConfig {
    /// Alias of the Cython shadow module in rewritten sources
    pub cy_alias: String,
    /// Runtime support module cimported by every rewritten module
    pub sys_module: String,
    /// Indentation unit of generated nested lines
    pub indent: String,
}

impl Default for GenConfig {
    fn default() -> Self {
        Self {
            cy_alias: CY_MOD.to_string(),
            sys_module: SYS_MOD.to_string(),
            indent: "    ".to_string(),
        }
    }
}
