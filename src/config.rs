//! User override spec.
//!
//! The spec is a JSON document mirroring the space hierarchy. Each level may
//! pin array bounds of cell parameters, force return types of cells and
//! declare types of space parameters:
//!
//! ```json
//! {"spaces": {"Projection": {
//!     "cells": {"disc_factors": {"return_type": "object"}},
//!     "cells_params": {"t": {"size": 241}, "i, j": {"size": [3, 4]}},
//!     "space_params": {"point_id": {"param_type": "int"}},
//!     "spaces": {"Nested": {}}}}}
//! ```

use crate::consts::{FILE_PREF, MODULE_PREF, SPACE_PREF};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

/// Conventional file name of the spec, next to the model directory.
pub const DEFAULT_SPEC_FILE: &str = "spec.json";

/// Bound of one parameter or of each parameter in a tuple.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SizeSpec {
    One(usize),
    Many(Vec<usize>),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamSpec {
    pub size: Option<SizeSpec>,
    pub param_type: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellSpec {
    pub return_type: Option<String>,
}

/// Overrides for one space and its descendants.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpaceSpec {
    pub spaces: BTreeMap<String, SpaceSpec>,
    pub cells: BTreeMap<String, Option<CellSpec>>,
    pub cells_params: BTreeMap<String, ParamSpec>,
    pub space_params: BTreeMap<String, ParamSpec>,
}

/// Splits `"i, j"` or `"(i, j)"` into parameter names.
fn param_names(key: &str) -> Vec<&str> {
    key.trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .collect()
}

impl SpaceSpec {
    fn validate(&self, path: &str) -> Result<()> {
        for (key, param) in &self.cells_params {
            let names = param_names(key);
            if names.is_empty() {
                return Err(Error::InvalidSpec(format!(
                    "{}: empty parameter key '{}'",
                    path, key
                )));
            }
            if let Some(SizeSpec::Many(bounds)) = &param.size {
                if bounds.len() != names.len() {
                    return Err(Error::InvalidSpec(format!(
                        "{}: size of '{}' lists {} bounds for {} parameters",
                        path,
                        key,
                        bounds.len(),
                        names.len()
                    )));
                }
            }
        }
        for (name, child) in &self.spaces {
            child.validate(&format!("{}.{}", path, name))?;
        }
        Ok(())
    }

    /// Bound per parameter name.
    pub fn sizes(&self) -> BTreeMap<String, usize> {
        let mut sizes = BTreeMap::new();
        for (key, param) in &self.cells_params {
            let names = param_names(key);
            match &param.size {
                Some(SizeSpec::One(bound)) => {
                    for name in names {
                        sizes.insert(name.to_string(), *bound);
                    }
                }
                Some(SizeSpec::Many(bounds)) => {
                    for (name, bound) in names.into_iter().zip(bounds) {
                        sizes.insert(name.to_string(), *bound);
                    }
                }
                None => {}
            }
        }
        sizes
    }

    pub fn return_type(&self, cell: &str) -> Option<&str> {
        self.cells
            .get(cell)?
            .as_ref()?
            .return_type
            .as_deref()
    }

    pub fn param_type(&self, param: &str) -> Option<&str> {
        self.space_params.get(param)?.param_type.as_deref()
    }
}

/// The whole override spec.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TranslationSpec {
    pub root: SpaceSpec,
}

impl TranslationSpec {
    pub fn from_json(text: &str) -> Result<Self> {
        let spec: TranslationSpec = serde_json::from_str(text)?;
        spec.root.validate("<root>")?;
        Ok(spec)
    }

    /// Loads a spec file; a missing file is [`Error::MissingOverrideSpec`].
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::MissingOverrideSpec {
                path: path.to_path_buf(),
            },
            _ => Error::io(path, e),
        })?;
        tracing::info!(path = %path.display(), "loaded override spec");
        Self::from_json(&text)
    }

    /// Overrides for the object at a dotted path such as
    /// `Model._m_Projection._mx_classes._c_Nested`.
    ///
    /// The package component is skipped, as are `_mx_` module components;
    /// `_m_` and `_c_` components descend into `spaces`.
    pub fn get_spec(&self, object_path: &str) -> Option<&SpaceSpec> {
        let mut spec = &self.root;
        for part in object_path.split('.').skip(1) {
            if part.starts_with(FILE_PREF) {
                continue;
            }
            let name = part
                .strip_prefix(MODULE_PREF)
                .or_else(|| part.strip_prefix(SPACE_PREF))?;
            spec = spec.spaces.get(name)?;
        }
        Some(spec)
    }

    pub fn sizes(&self, object_path: &str) -> BTreeMap<String, usize> {
        self.get_spec(object_path)
            .map(SpaceSpec::sizes)
            .unwrap_or_default()
    }

    pub fn return_type(&self, object_path: &str, cell: &str) -> Option<&str> {
        self.get_spec(object_path)?.return_type(cell)
    }

    pub fn param_type(&self, object_path: &str, param: &str) -> Option<&str> {
        self.get_spec(object_path)?.param_type(param)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SPEC: &str = r#"{
        "spaces": {
            "Projection": {
                "cells": {"disc_factors": {"return_type": "object"}, "sample": null},
                "cells_params": {"t": {"size": 241}, "i, j": {"size": [3, 4]}},
                "space_params": {"point_id": {"param_type": "int"}},
                "spaces": {"Nested": {"cells_params": {"(k)": {"size": 7}}}}
            }
        }
    }"#;

    #[test]
    fn test_get_spec() {
        let spec = TranslationSpec::from_json(SPEC).unwrap();
        let projection = spec.get_spec("ModelName._mx_class_._c_Projection").unwrap();
        assert!(projection.spaces.contains_key("Nested"));

        let nested = spec
            .get_spec("ModelName._m_Projection._mx_classes._c_Nested")
            .unwrap();
        assert_eq!(nested.sizes().get("k"), Some(&7));

        assert!(spec.get_spec("ModelName._mx_classes._c_Missing").is_none());
        assert!(spec.sizes("ModelName._mx_classes._c_Missing").is_empty());
    }

    #[test]
    fn test_sizes_and_types() {
        let spec = TranslationSpec::from_json(SPEC).unwrap();
        let path = "M._mx_classes._c_Projection";
        let sizes = spec.sizes(path);
        assert_eq!(sizes.get("t"), Some(&241));
        assert_eq!(sizes.get("i"), Some(&3));
        assert_eq!(sizes.get("j"), Some(&4));
        assert_eq!(spec.return_type(path, "disc_factors"), Some("object"));
        assert_eq!(spec.return_type(path, "sample"), None);
        assert_eq!(spec.param_type(path, "point_id"), Some("int"));
    }

    #[test]
    fn test_invalid_tuple_size() {
        let err = TranslationSpec::from_json(
            r#"{"spaces": {"A": {"cells_params": {"i, j": {"size": [3]}}}}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidSpec(_)));
        assert!(err.to_string().contains("1 bounds for 2 parameters"));
    }

    #[test]
    fn test_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_SPEC_FILE);
        let err = TranslationSpec::load(&path).unwrap_err();
        assert!(matches!(err, Error::MissingOverrideSpec { .. }));

        let mut file = fs::File::create(&path).unwrap();
        file.write_all(SPEC.as_bytes()).unwrap();
        let spec = TranslationSpec::load(&path).unwrap();
        assert!(spec.get_spec("M._mx_classes._c_Projection").is_some());
    }
}
