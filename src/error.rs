//! Crate-level error type.

use crate::codegen::GenerateError;
use crate::parser::ParseError;
use crate::trace::TraceError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("override spec not found: {}", path.display())]
    MissingOverrideSpec { path: PathBuf },
    #[error("invalid override spec: {0}")]
    InvalidSpec(String),
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{module}: {source}")]
    Parse {
        module: String,
        #[source]
        source: ParseError,
    },
    #[error(transparent)]
    Trace(#[from] TraceError),
    #[error(transparent)]
    Generate(#[from] GenerateError),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error means a required input file does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::MissingOverrideSpec { .. } => true,
            Error::Io { source, .. } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
