//! Values observed while tracing a model run.
//!
//! The tracer never holds host objects. Every argument, return value and
//! attribute is reduced to a [`Value`] that keeps just enough to unify types
//! and to quote a readable example in diagnostics.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write};

/// Value category of the type lattice.
///
/// `Boolean` and `Integral` form the integral family; `Real` absorbs both.
/// Everything else only unifies with itself, and any conflict is `Dynamic`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Boolean,
    Integral,
    Real,
    Str,
    Dynamic,
}

impl Category {
    /// Boolean or integral.
    pub fn is_integral(self) -> bool {
        matches!(self, Category::Boolean | Category::Integral)
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Category::Boolean | Category::Integral | Category::Real)
    }

    /// Least upper bound of two categories.
    pub fn join(self, other: Category) -> Category {
        use Category::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Boolean, Integral) | (Integral, Boolean) => Integral,
            (a, b) if a.is_numeric() && b.is_numeric() => Real,
            _ => Dynamic,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Boolean => "boolean",
            Category::Integral => "integral",
            Category::Real => "real",
            Category::Str => "string",
            Category::Dynamic => "dynamic",
        };
        f.write_str(name)
    }
}

/// A traced host value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(OrderedFloat<f64>),
    Str(String),
    /// Integral scalar of a non-builtin type, e.g. `int64`.
    IntLike { type_name: String, value: i64 },
    /// Real scalar of a non-builtin type, e.g. `float32`.
    FloatLike {
        type_name: String,
        value: OrderedFloat<f64>,
    },
    /// N-dimensional array whose elements fall in `elem`.
    Array { elem: Category, ndim: usize },
    /// Instance of a space class, by fully qualified class name.
    Space { class: String },
    /// Anything else.
    Object { type_name: String, repr: String },
}

impl Value {
    pub fn float(x: f64) -> Self {
        Value::Float(OrderedFloat(x))
    }

    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn array(elem: Category, ndim: usize) -> Self {
        Value::Array { elem, ndim }
    }

    pub fn space(class: impl Into<String>) -> Self {
        Value::Space {
            class: class.into(),
        }
    }

    /// Host type name as it would be reported by the host language.
    pub fn type_name(&self) -> &str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::IntLike { type_name, .. } | Value::FloatLike { type_name, .. } => type_name,
            Value::Array { .. } => "ndarray",
            Value::Space { class } => class.rsplit('.').next().unwrap_or(class),
            Value::Object { type_name, .. } => type_name,
        }
    }

    /// Category of the value, or of its elements for arrays.
    pub fn category(&self) -> Category {
        match self {
            Value::Bool(_) => Category::Boolean,
            Value::Int(_) | Value::IntLike { .. } => Category::Integral,
            Value::Float(_) | Value::FloatLike { .. } => Category::Real,
            Value::Str(_) => Category::Str,
            Value::Array { elem, .. } => *elem,
            Value::None | Value::Space { .. } | Value::Object { .. } => Category::Dynamic,
        }
    }

    /// Dimensionality when the value is an array.
    pub fn ndim(&self) -> Option<usize> {
        match self {
            Value::Array { ndim, .. } => Some(*ndim),
            _ => None,
        }
    }

    /// Integer view used for bound tracking.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) | Value::IntLike { value: n, .. } => Some(*n),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }
}

/// Shortest round-trip digits, scientific outside `1e-4 <= |x| < 1e16`.
fn write_float(f: &mut fmt::Formatter<'_>, x: f64) -> fmt::Result {
    if x.is_nan() {
        return f.write_str("nan");
    }
    if x.is_infinite() {
        return f.write_str(if x > 0.0 { "inf" } else { "-inf" });
    }
    let sci = format!("{:e}", x);
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    if (-4..16).contains(&exp) {
        let plain = format!("{}", x);
        if plain.contains('.') {
            f.write_str(&plain)
        } else {
            write!(f, "{}.0", plain)
        }
    } else {
        let sign = if exp < 0 { '-' } else { '+' };
        write!(f, "{}e{}{:02}", mantissa, sign, exp.abs())
    }
}

/// Quotes with `'` unless only `"` avoids escaping.
fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    f.write_char(quote)?;
    for c in s.chars() {
        match c {
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c if c == quote => {
                f.write_char('\\')?;
                f.write_char(c)?;
            }
            c if c.is_ascii_control() => write!(f, "\\x{:02x}", c as u32)?,
            c => f.write_char(c)?,
        }
    }
    f.write_char(quote)
}

/// Host-style representation, e.g. `2.0`, `'abc'`, `True`.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(n) | Value::IntLike { value: n, .. } => write!(f, "{}", n),
            Value::Float(x) | Value::FloatLike { value: x, .. } => write_float(f, x.0),
            Value::Str(s) => write_quoted(f, s),
            Value::Array { elem, ndim } => write!(f, "array({}, ndim={})", elem, ndim),
            Value::Space { class } => write!(f, "<{} space>", class),
            Value::Object { repr, .. } => f.write_str(repr),
        }
    }
}
