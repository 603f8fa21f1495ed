//! Structural parser for exported model modules.
//!
//! Modules are never executed. They are split into logical lines, arranged
//! into a tree of statements and blocks, and scanned for space classes:
//!
//! ```text
//! source ──► lexer ──► cst::SourceModule ──► symbols::SymbolTable
//!            (logical    (blocks, trivia)     (spaces, cells, refs,
//!             lines)                           child spaces)
//! ```

pub mod cst;
pub mod lexer;
pub mod symbols;

pub use cst::{Assign, Block, ClassHeader, DefHeader, Node, Param, SourceModule, Target};
pub use lexer::{LogicalLine, Token, TokenKind};
pub use symbols::{CellDecl, SpaceClass, SymbolTable};

use thiserror::Error;

/// Parser error type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("unterminated string on line {line}")]
    UnterminatedString { line: usize },
    #[error("unterminated statement starting on line {line}")]
    UnterminatedLine { line: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;
