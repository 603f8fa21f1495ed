//! Symbol table of space classes.

use super::cst::{Assign, Block, Node, SourceModule, Target};
use super::ParseResult;
use crate::consts::{
    self, ASSIGN_REFS, CALL, COPY_REFS, FORMULA_PREF, INIT, SELF_NAME, SPACE_PREF,
};
use rustc_hash::FxHashMap;

/// A public cell of a space.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellDecl {
    pub module: String,
    pub class: String,
    pub name: String,
    /// Formal parameters, owner excluded.
    pub params: Vec<String>,
}

impl CellDecl {
    /// `__call__` and other dunder cells.
    pub fn is_special(&self) -> bool {
        consts::is_special(&self.name)
    }

    /// Method that computes the cell.
    pub fn formula_name(&self) -> String {
        if self.is_special() {
            self.name.clone()
        } else {
            format!("{}{}", FORMULA_PREF, self.name)
        }
    }

    /// Fully qualified name of the computing method, as traced.
    pub fn fqname(&self) -> String {
        format!("{}.{}.{}", self.module, self.class, self.formula_name())
    }
}

/// One space class of a module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpaceClass {
    pub module: String,
    pub name: String,
    pub bases: String,
    /// Cells in definition order.
    pub cells: Vec<CellDecl>,
    /// Attributes bound by the reference initializer.
    pub refs: Vec<String>,
    /// Public attributes bound in the constructor.
    pub child_spaces: Vec<String>,
    /// Parameters of the copy routine, owner excluded, if defined.
    pub copy_refs: Option<Vec<String>>,
    /// Formula method name to cell name.
    formulas: FxHashMap<String, String>,
}

impl SpaceClass {
    /// `module.Class`, the key runtime facts use for this space.
    pub fn path(&self) -> String {
        format!("{}.{}", self.module, self.name)
    }

    /// Name without the space prefix.
    pub fn space_name(&self) -> &str {
        consts::strip_pref(&self.name, SPACE_PREF)
    }

    pub fn cell(&self, name: &str) -> Option<&CellDecl> {
        self.cells.iter().find(|c| c.name == name)
    }

    /// Cell computed by a formula method.
    pub fn cell_for_formula(&self, method: &str) -> Option<&CellDecl> {
        self.formulas.get(method).and_then(|name| self.cell(name))
    }

    fn from_block(module: &str, name: String, bases: String, block: &Block) -> Self {
        let mut space = SpaceClass {
            module: module.to_string(),
            name,
            bases,
            cells: Vec::new(),
            refs: Vec::new(),
            child_spaces: Vec::new(),
            copy_refs: None,
            formulas: FxHashMap::default(),
        };
        let mut formula_methods = Vec::new();

        for node in &block.body {
            let Node::Block(method) = node else {
                continue;
            };
            let Some(def) = method.def_header() else {
                continue;
            };
            let params: Vec<String> = def
                .param_names()
                .filter(|p| *p != SELF_NAME)
                .map(str::to_string)
                .collect();

            match def.name.as_str() {
                INIT => space.child_spaces.extend(self_assignments(&method.body)),
                ASSIGN_REFS => space.refs.extend(attr_assignments(&method.body)),
                COPY_REFS => space.copy_refs = Some(params),
                n if n.starts_with(FORMULA_PREF) => formula_methods.push(def.name.clone()),
                n if n != CALL && n.starts_with('_') => {}
                n => {
                    let decl = space.decl(n, params);
                    space.cells.push(decl);
                }
            }
        }

        for method in formula_methods {
            let cell = consts::strip_pref(&method, FORMULA_PREF).to_string();
            if space.cell(&cell).is_some() {
                space.formulas.insert(method, cell);
            } else {
                tracing::debug!(space = %space.path(), "formula {} has no public cell", method);
            }
        }
        space
    }

    fn decl(&self, name: &str, params: Vec<String>) -> CellDecl {
        CellDecl {
            module: self.module.clone(),
            class: self.name.clone(),
            name: name.to_string(),
            params,
        }
    }
}

fn assignments(body: &[Node]) -> impl Iterator<Item = Assign> + '_ {
    body.iter().filter_map(|node| match node {
        Node::Stmt(line) => Assign::parse(line),
        Node::Block(_) => None,
    })
}

/// `self.<public> = ...` in a method body.
fn self_assignments(body: &[Node]) -> impl Iterator<Item = String> + '_ {
    assignments(body).filter_map(|assign| match assign.targets.into_iter().next() {
        Some(Target::Attr { object, attr })
            if object == SELF_NAME && consts::is_user_defined(&attr) =>
        {
            Some(attr)
        }
        _ => None,
    })
}

/// `<obj>.<attr> = ...` in a method body.
fn attr_assignments(body: &[Node]) -> impl Iterator<Item = String> + '_ {
    assignments(body).filter_map(|assign| match assign.targets.into_iter().next() {
        Some(Target::Attr { attr, .. }) => Some(attr),
        _ => None,
    })
}

/// Space classes of one module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SymbolTable {
    pub module: String,
    pub spaces: Vec<SpaceClass>,
}

impl SymbolTable {
    pub fn parse(module: &str, source: &str) -> ParseResult<Self> {
        Ok(Self::from_module(module, &SourceModule::parse(source)?))
    }

    pub fn from_module(module: &str, source: &SourceModule) -> Self {
        let spaces = source
            .blocks()
            .filter_map(|block| {
                let header = block.class_header()?;
                header
                    .name
                    .starts_with(SPACE_PREF)
                    .then(|| SpaceClass::from_block(module, header.name, header.bases, block))
            })
            .collect();
        SymbolTable {
            module: module.to_string(),
            spaces,
        }
    }

    pub fn space(&self, name: &str) -> Option<&SpaceClass> {
        self.spaces.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: &str = r#"from . import _mx_sys

class _c_Projection(_mx_sys.BaseSpace):

    def __init__(self, parent):
        self._mx_parent = parent
        self._v_pols_if = {}
        self._v_n_pols = None
        self._has_n_pols = False
        self.Policy = _c_Policy(self)
        if parent is None:
            self.Hidden = 1

    def _mx_assign_refs(self, io_data, pickle_data):
        self.point_id = pickle_data[1]
        self.np = _mx_sys.np
        pass

    def _mx_copy_refs(self, base, base_root):
        self.point_id = base.point_id

    def __call__(self, point_id):
        return self._mx_get_item(point_id)

    def __repr__(self):
        return "Projection"

    def pols_if(self, t):
        if t in self._v_pols_if:
            return self._v_pols_if[t]
        val = self._v_pols_if[t] = self._f_pols_if(t)
        return val

    def _f_pols_if(self, t):
        return 0

    def n_pols(self):
        return self._v_n_pols

    def _f_n_pols(self):
        return 10

    def _f_orphan(self):
        return 1


class Helper:
    pass
"#;

    #[test]
    fn test_symbols() {
        let table = SymbolTable::parse("Model._mx_classes", SRC).unwrap();
        assert_eq!(table.spaces.len(), 1);
        let space = table.space("_c_Projection").unwrap();
        assert_eq!(space.bases, "_mx_sys.BaseSpace");
        assert_eq!(space.space_name(), "Projection");
        assert_eq!(space.path(), "Model._mx_classes._c_Projection");

        let cells: Vec<_> = space.cells.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(cells, vec!["__call__", "pols_if", "n_pols"]);
        assert_eq!(space.cells[0].params, vec!["point_id".to_string()]);
        assert_eq!(space.cells[1].params, vec!["t".to_string()]);
        assert!(space.cells[2].params.is_empty());

        assert_eq!(space.refs, vec!["point_id".to_string(), "np".to_string()]);
        assert_eq!(space.child_spaces, vec!["Policy".to_string()]);
        assert_eq!(
            space.copy_refs,
            Some(vec!["base".to_string(), "base_root".to_string()])
        );
    }

    #[test]
    fn test_formula_pairing() {
        let table = SymbolTable::parse("Model._mx_classes", SRC).unwrap();
        let space = table.space("_c_Projection").unwrap();
        let cell = space.cell_for_formula("_f_pols_if").unwrap();
        assert_eq!(cell.fqname(), "Model._mx_classes._c_Projection._f_pols_if");
        assert!(space.cell_for_formula("_f_orphan").is_none());
        assert_eq!(
            space.cell("__call__").unwrap().fqname(),
            "Model._mx_classes._c_Projection.__call__"
        );
    }

    #[test]
    fn test_empty_space() {
        let src = "class _c_Empty(_mx_sys.BaseSpace):\n    def __init__(self, parent):\n        self._mx_parent = parent\n";
        let table = SymbolTable::parse("M._mx_classes", src).unwrap();
        let space = table.space("_c_Empty").unwrap();
        assert!(space.cells.is_empty());
        assert!(space.refs.is_empty());
        assert!(space.child_spaces.is_empty());
    }
}
