//! Call and return events delivered to the profiling hook.

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Identity of a live call frame. Stable between its call and return events.
pub type FrameId = u64;

/// Static description of the code object behind a frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeInfo {
    /// Path of the source file.
    pub filename: String,
    /// Dotted module name, e.g. `Pkg._mx_classes`.
    pub module: String,
    /// Qualified name inside the module, e.g. `_c_Projection._f_age`.
    pub qualname: String,
}

impl CodeInfo {
    pub fn new(
        filename: impl Into<String>,
        module: impl Into<String>,
        qualname: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            module: module.into(),
            qualname: qualname.into(),
        }
    }

    /// Unqualified function name.
    pub fn name(&self) -> &str {
        self.qualname.rsplit('.').next().unwrap_or(&self.qualname)
    }

    /// Fully qualified function name, `module.qualname`.
    pub fn funcname(&self) -> String {
        format!("{}.{}", self.module, self.qualname)
    }

    /// File name without directory or extension.
    pub fn file_stem(&self) -> &str {
        let base = self
            .filename
            .rsplit(|c| c == '/' || c == '\\')
            .next()
            .unwrap_or(&self.filename);
        base.split('.').next().unwrap_or(base)
    }

    /// First component of the module name.
    pub fn package(&self) -> &str {
        self.module.split('.').next().unwrap_or(&self.module)
    }
}

/// How a frame handed control back to its caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnKind {
    /// Normal completion.
    Return,
    /// Intermediate yield of a generator; the frame stays live.
    Yield,
    /// Exception propagation; no value.
    Unwind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TraceEvent {
    Call {
        frame: FrameId,
        code: CodeInfo,
        /// Bound arguments in declaration order, owner included.
        args: Vec<(String, Value)>,
    },
    Return {
        frame: FrameId,
        code: CodeInfo,
        kind: ReturnKind,
        #[serde(default)]
        value: Option<Value>,
        /// Attributes of the owner object at return time.
        #[serde(default)]
        owner_attrs: Vec<(String, Value)>,
    },
}

impl TraceEvent {
    pub fn code(&self) -> &CodeInfo {
        match self {
            TraceEvent::Call { code, .. } | TraceEvent::Return { code, .. } => code,
        }
    }

    pub fn frame(&self) -> FrameId {
        match self {
            TraceEvent::Call { frame, .. } | TraceEvent::Return { frame, .. } => *frame,
        }
    }

    pub fn call(frame: FrameId, code: CodeInfo, args: Vec<(String, Value)>) -> Self {
        TraceEvent::Call { frame, code, args }
    }

    pub fn ret(frame: FrameId, code: CodeInfo, value: Value) -> Self {
        TraceEvent::Return {
            frame,
            code,
            kind: ReturnKind::Return,
            value: Some(value),
            owner_attrs: Vec::new(),
        }
    }
}
