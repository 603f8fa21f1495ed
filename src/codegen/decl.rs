//! Declaration files.
//!
//! Renders the `.pxd` companion of a rewritten module: one `cdef class` per
//! space with its storage slots, public attributes and method signatures.

use super::model::{CellModel, ModuleModel, SpaceModel, StorageKind, TypeExpr};
use crate::consts::{COPY_REFS, FORMULA_PREF, HAS_PREF, SELF_NAME, VAR_PREF};
use crate::value::Category;
use std::fmt::Write;

const INDENT: &str = "    ";

/// Declarations of one module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Declarations {
    header: Vec<String>,
    classes: Vec<ClassDecl>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct ClassDecl {
    name: String,
    bases: String,
    members: Vec<String>,
}

impl Declarations {
    pub fn from_model(model: &ModuleModel, sys_module: &str) -> Self {
        let mut header = vec![format!("from {} cimport {}", model.package(), sys_module)];
        for cimport in &model.cimports {
            let (parent, last) = cimport.split();
            header.push(format!("from {} cimport {} as {}", parent, last, cimport.alias));
        }
        let classes = model
            .spaces
            .iter()
            .map(|space| ClassDecl {
                name: space.name().to_string(),
                bases: space.symbols.bases.clone(),
                members: members(space),
            })
            .collect();
        Declarations { header, classes }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.header {
            let _ = writeln!(out, "{}", line);
        }
        for class in &self.classes {
            out.push('\n');
            if class.bases.is_empty() {
                let _ = writeln!(out, "cdef class {}:", class.name);
            } else {
                let _ = writeln!(out, "cdef class {}({}):", class.name, class.bases);
            }
            if class.members.is_empty() {
                let _ = writeln!(out, "{}pass", INDENT);
            }
            for member in &class.members {
                let _ = writeln!(out, "{}{}", INDENT, member);
            }
        }
        out
    }
}

fn members(space: &SpaceModel) -> Vec<String> {
    let mut lines = Vec::new();
    for cell in space.stored_cells() {
        let name = cell.name();
        let value = cell.value_type().c_decl();
        match cell.storage {
            StorageKind::Scalar => {
                lines.push(format!("cdef {} {}{}", value, VAR_PREF, name));
                lines.push(format!("cdef bint {}{}", HAS_PREF, name));
            }
            StorageKind::Dense => {
                let dims: String = cell.bounds.iter().map(|b| format!("[{}]", b)).collect();
                lines.push(format!("cdef {}{} {}{}", value, dims, VAR_PREF, name));
                lines.push(format!("cdef bint{} {}{}", dims, HAS_PREF, name));
            }
            StorageKind::Sparse => lines.push(format!("cdef dict {}{}", VAR_PREF, name)),
        }
    }
    for member in space.refs.iter().chain(&space.params).chain(&space.child_spaces) {
        lines.push(format!("cdef public {} {}", member.ty.c_decl(), member.name));
    }
    for cell in space.stored_cells() {
        let has_formula = space
            .symbols
            .cell_for_formula(&cell.decl.formula_name())
            .is_some();
        if has_formula && !cell.is_generator() {
            lines.push(format!(
                "cdef {} {}{}({})",
                return_decl(cell),
                FORMULA_PREF,
                cell.name(),
                signature(cell)
            ));
        }
        lines.push(format!(
            "cpdef {} {}({})",
            return_decl(cell),
            cell.name(),
            signature(cell)
        ));
    }
    if let Some(params) = &space.symbols.copy_refs {
        let params: Vec<&str> = std::iter::once(SELF_NAME)
            .chain(params.iter().map(String::as_str))
            .collect();
        lines.push(format!("cpdef {}({})", COPY_REFS, params.join(", ")));
    }
    lines
}

fn return_decl(cell: &CellModel) -> String {
    cell.ret
        .as_ref()
        .unwrap_or(&TypeExpr::Scalar(Category::Dynamic))
        .c_decl()
}

fn signature(cell: &CellModel) -> String {
    let mut params = vec![SELF_NAME.to_string()];
    for (name, ty) in cell.decl.params.iter().zip(&cell.params) {
        let c = ty
            .as_ref()
            .map_or_else(|| "object".to_string(), TypeExpr::c_decl);
        params.push(format!("{} {}", c, name));
    }
    params.join(", ")
}
