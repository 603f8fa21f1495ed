//! Naming conventions of exported model sources.
//!
//! An exported model is a package of plain modules whose identifiers follow a
//! fixed prefix scheme. Every component of the pipeline recognizes roles by
//! these prefixes rather than by reflection.

/// Prefix of generated support modules (`_mx_model`, `_mx_classes`, ...).
pub const FILE_PREF: &str = "_mx_";
/// Prefix of submodule directories holding nested spaces.
pub const MODULE_PREF: &str = "_m_";
/// Prefix of space classes.
pub const SPACE_PREF: &str = "_c_";
/// Prefix of private formula methods.
pub const FORMULA_PREF: &str = "_f_";
/// Prefix of memoized value storage attributes.
pub const VAR_PREF: &str = "_v_";
/// Prefix of memoization guard attributes.
pub const HAS_PREF: &str = "_has_";

pub const SELF_NAME: &str = "self";

pub const MODEL_MOD: &str = "_mx_model";
pub const SPACE_MOD: &str = "_mx_classes";
pub const SYS_MOD: &str = "_mx_sys";

/// Reference initialization routine of a space.
pub const ASSIGN_REFS: &str = "_mx_assign_refs";
/// Copy construction routine of a space.
pub const COPY_REFS: &str = "_mx_copy_refs";
/// Handle name of the copy source inside [`COPY_REFS`].
pub const COPY_SOURCE: &str = "base";

pub const CALL: &str = "__call__";
pub const INIT: &str = "__init__";

/// Alias under which rewritten modules import the Cython shadow module.
pub const CY_MOD: &str = "_mx_cy";

/// A name visible to model users, i.e. not starting with an underscore.
pub fn is_user_defined(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('_')
}

/// A dunder name such as `__init__`.
pub fn is_special(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

/// Strips a prefix, returning the name unchanged when it is absent.
pub fn strip_pref<'a>(name: &'a str, prefix: &str) -> &'a str {
    name.strip_prefix(prefix).unwrap_or(name)
}

/// Replaces the first component of a dotted name.
pub fn replace_package(dotted: &str, package: &str) -> String {
    match dotted.split_once('.') {
        Some((_, rest)) => format!("{}.{}", package, rest),
        None => package.to_string(),
    }
}

/// Module file stems recorded by the tracer.
pub fn is_model_file(stem: &str) -> bool {
    stem == MODEL_MOD || stem == SPACE_MOD
}
