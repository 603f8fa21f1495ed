//! Resolved model of a module.
//!
//! Joins the symbol table of a module with runtime facts and user overrides
//! and decides, once per cell, how its values are stored:
//! - Storage kind (scalar slot, dense array, sparse map)
//! - Array bounds for dense cells
//! - Type expressions for parameters, returns, references and space parameters
//! - Cross-module space types that need a cimport

use crate::config::TranslationSpec;
use crate::consts::{self, MODEL_MOD, MODULE_PREF, SPACE_PREF};
use crate::diagnostics::Diagnostics;
use crate::parser::{CellDecl, SpaceClass, SymbolTable};
use crate::unify::{CellFacts, RefFact, RuntimeFacts, TypeFact};
use crate::value::Category;
use std::collections::BTreeMap;

/// C types accepted as numeric element types of dense storage.
const NUMERIC_C_TYPES: [&str; 12] = [
    "bint",
    "char",
    "short",
    "int",
    "long",
    "long long",
    "longlong",
    "float",
    "double",
    "Py_ssize_t",
    "size_t",
    "unsigned int",
];

/// A type as written in generated code.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeExpr {
    Scalar(Category),
    /// Typed memoryview.
    Array { elem: Category, ndim: usize },
    /// Space class; `alias` names the cimported module of a non-local class.
    Space { alias: Option<String>, class: String },
    /// Verbatim user override.
    Raw(String),
}

impl TypeExpr {
    pub fn from_fact(fact: &TypeFact) -> Self {
        if fact.is_array {
            Self::array(fact.category, fact.ndim)
        } else {
            TypeExpr::Scalar(fact.category)
        }
    }

    fn array(elem: Category, ndim: usize) -> Self {
        match elem {
            Category::Integral | Category::Real if ndim > 0 => TypeExpr::Array { elem, ndim },
            _ => TypeExpr::Scalar(Category::Dynamic),
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, TypeExpr::Scalar(Category::Dynamic))
    }

    /// Usable as the element type of a C array.
    pub fn is_numeric(&self) -> bool {
        match self {
            TypeExpr::Scalar(category) => category.is_numeric(),
            TypeExpr::Raw(raw) => {
                let name = raw.trim().trim_start_matches("cython.");
                NUMERIC_C_TYPES.contains(&name)
            }
            _ => false,
        }
    }

    /// Annotation in pure-Python mode, e.g. `_mx_cy.double[:, :]`.
    pub fn annotation(&self, cy: &str) -> String {
        match self {
            TypeExpr::Scalar(category) => scalar_annotation(*category, cy),
            TypeExpr::Array { elem, ndim } => {
                format!("{}[{}]", scalar_annotation(*elem, cy), vec![":"; *ndim].join(", "))
            }
            TypeExpr::Space { alias, class } => qualified(alias.as_deref(), class),
            TypeExpr::Raw(raw) => {
                let name = raw.trim();
                if NUMERIC_C_TYPES.contains(&name) {
                    format!("{}.{}", cy, name.replace(' ', ""))
                } else {
                    name.to_string()
                }
            }
        }
    }

    /// Declaration in a `.pxd` file, e.g. `double[:, :]`.
    pub fn c_decl(&self) -> String {
        match self {
            TypeExpr::Scalar(category) => scalar_c(*category).to_string(),
            TypeExpr::Array { elem, ndim } => {
                format!("{}[{}]", scalar_c(*elem), vec![":"; *ndim].join(", "))
            }
            TypeExpr::Space { alias, class } => qualified(alias.as_deref(), class),
            TypeExpr::Raw(raw) => raw.trim().to_string(),
        }
    }
}

fn qualified(alias: Option<&str>, class: &str) -> String {
    match alias {
        Some(alias) => format!("{}.{}", alias, class),
        None => class.to_string(),
    }
}

fn scalar_annotation(category: Category, cy: &str) -> String {
    match category {
        Category::Boolean => format!("{}.bint", cy),
        Category::Integral => format!("{}.longlong", cy),
        Category::Real => format!("{}.double", cy),
        Category::Str => "str".to_string(),
        Category::Dynamic => "object".to_string(),
    }
}

fn scalar_c(category: Category) -> &'static str {
    match category {
        Category::Boolean => "bint",
        Category::Integral => "long long",
        Category::Real => "double",
        Category::Str => "str",
        Category::Dynamic => "object",
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageKind {
    /// One slot and one guard.
    Scalar,
    /// C arrays of values and guards indexed by the arguments.
    Dense,
    /// Dictionary keyed by the arguments.
    Sparse,
}

/// A cell with its storage decision.
#[derive(Clone, Debug, PartialEq)]
pub struct CellModel {
    pub decl: CellDecl,
    pub facts: Option<CellFacts>,
    pub storage: StorageKind,
    /// Bound per parameter; dense cells only.
    pub bounds: Vec<usize>,
    /// Return type, `None` when left dynamic.
    pub ret: Option<TypeExpr>,
    /// Parameter types parallel to `decl.params`.
    pub params: Vec<Option<TypeExpr>>,
}

impl CellModel {
    pub fn name(&self) -> &str {
        &self.decl.name
    }

    pub fn is_special(&self) -> bool {
        self.decl.is_special()
    }

    pub fn is_generator(&self) -> bool {
        self.facts.as_ref().map_or(false, |f| f.is_generator)
    }

    /// Value type of the storage slot.
    pub fn value_type(&self) -> TypeExpr {
        self.ret
            .clone()
            .unwrap_or(TypeExpr::Scalar(Category::Dynamic))
    }

    pub fn param_type(&self, name: &str) -> Option<&TypeExpr> {
        let idx = self.decl.params.iter().position(|p| p == name)?;
        self.params.get(idx)?.as_ref()
    }

    fn build(
        decl: &CellDecl,
        facts: Option<&CellFacts>,
        ret_override: Option<&str>,
        sizes: &BTreeMap<String, usize>,
    ) -> Self {
        let params = decl
            .params
            .iter()
            .map(|p| {
                facts
                    .and_then(|f| f.param(p))
                    .map(TypeExpr::from_fact)
                    .filter(|t| !t.is_dynamic())
            })
            .collect();

        let ret = match (ret_override, facts) {
            (Some(raw), _) => Some(TypeExpr::Raw(raw.to_string())),
            (None, Some(f)) if !f.is_generator && !decl.is_special() => {
                Some(TypeExpr::from_fact(&f.ret))
            }
            _ => None,
        };

        let bounds = facts
            .filter(|f| !decl.is_special() && !f.is_generator)
            .and_then(|f| dense_bounds(decl, f, ret.as_ref(), sizes));
        let storage = match &bounds {
            Some(_) => StorageKind::Dense,
            None if decl.params.is_empty() && !decl.is_special() => StorageKind::Scalar,
            None => StorageKind::Sparse,
        };

        CellModel {
            decl: decl.clone(),
            facts: facts.cloned(),
            storage,
            bounds: bounds.unwrap_or_default(),
            ret,
            params,
        }
    }
}

/// Bounds per parameter when the cell qualifies for dense storage.
fn dense_bounds(
    decl: &CellDecl,
    facts: &CellFacts,
    ret: Option<&TypeExpr>,
    sizes: &BTreeMap<String, usize>,
) -> Option<Vec<usize>> {
    if decl.params.is_empty() || !ret?.is_numeric() {
        return None;
    }
    decl.params
        .iter()
        .map(|p| {
            let fact = facts.param(p)?;
            if !fact.is_integral() || fact.min? < 0 {
                return None;
            }
            sizes.get(p).copied()
        })
        .collect()
}

/// A typed public attribute: reference, space parameter or child space.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberModel {
    pub name: String,
    pub ty: TypeExpr,
}

/// Module cimported for a non-local space type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cimport {
    pub module: String,
    pub alias: String,
}

impl Cimport {
    fn of(module: &str) -> Self {
        let alias = module.split('.').skip(1).collect::<Vec<_>>().join("_");
        Cimport {
            module: module.to_string(),
            alias,
        }
    }

    /// Parent package and last component.
    pub fn split(&self) -> (&str, &str) {
        self.module
            .rsplit_once('.')
            .unwrap_or(("", self.module.as_str()))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SpaceModel {
    pub symbols: SpaceClass,
    /// Cells in definition order, `__call__` included.
    pub cells: Vec<CellModel>,
    pub refs: Vec<MemberModel>,
    pub params: Vec<MemberModel>,
    pub child_spaces: Vec<MemberModel>,
    /// Resolved bound per cell parameter name.
    pub sizes: BTreeMap<String, usize>,
}

impl SpaceModel {
    pub fn name(&self) -> &str {
        &self.symbols.name
    }

    pub fn path(&self) -> String {
        self.symbols.path()
    }

    pub fn cell(&self, name: &str) -> Option<&CellModel> {
        self.cells.iter().find(|c| c.name() == name)
    }

    /// Cell computed by a formula method, by the pairing made at parse time.
    pub fn cell_for_formula(&self, method: &str) -> Option<&CellModel> {
        let decl = self.symbols.cell_for_formula(method)?;
        self.cell(&decl.name)
    }

    /// Cells with storage, i.e. all but special methods.
    pub fn stored_cells(&self) -> impl Iterator<Item = &CellModel> {
        self.cells.iter().filter(|c| !c.is_special())
    }

    /// Whether the space declares nothing at all.
    pub fn is_empty(&self) -> bool {
        self.stored_cells().next().is_none()
            && self.refs.is_empty()
            && self.params.is_empty()
            && self.child_spaces.is_empty()
    }

    fn build(
        space: &SpaceClass,
        facts: &RuntimeFacts,
        spec: &TranslationSpec,
        cimports: &mut Vec<Cimport>,
        diags: &mut Diagnostics,
    ) -> Self {
        let path = space.path();
        let sizes = resolve_sizes(space, facts, spec, diags);

        let cells = space
            .cells
            .iter()
            .map(|decl| {
                let ret_override = spec.return_type(&path, &decl.name);
                CellModel::build(decl, facts.cell(&decl.fqname()), ret_override, &sizes)
            })
            .collect();

        let mut member = |name: &str, fact: Option<&RefFact>| MemberModel {
            name: name.to_string(),
            ty: fact.map_or(TypeExpr::Scalar(Category::Dynamic), |f| {
                ref_type(f, &space.module, cimports)
            }),
        };

        let refs: Vec<MemberModel> = space
            .refs
            .iter()
            .map(|name| member(name, facts.ref_fact(&path, name)))
            .collect();

        let mut params: Vec<MemberModel> = Vec::new();
        for (name, fact) in facts.space_params(&path) {
            if refs.iter().any(|r| &r.name == name) || params.iter().any(|p| &p.name == name) {
                continue;
            }
            let mut param = member(name, Some(fact));
            if let Some(raw) = spec.param_type(&path, name) {
                param.ty = TypeExpr::Raw(raw.to_string());
            }
            params.push(param);
        }
        if let Some(space_spec) = spec.get_spec(&path) {
            for (name, param_spec) in &space_spec.space_params {
                if params.iter().any(|p| &p.name == name) {
                    continue;
                }
                if let Some(raw) = &param_spec.param_type {
                    params.push(MemberModel {
                        name: name.clone(),
                        ty: TypeExpr::Raw(raw.clone()),
                    });
                }
            }
        }

        let child_spaces = space
            .child_spaces
            .iter()
            .map(|name| member(name, facts.ref_fact(&path, name)))
            .collect();

        SpaceModel {
            symbols: space.clone(),
            cells,
            refs,
            params,
            child_spaces,
            sizes,
        }
    }
}

fn ref_type(fact: &RefFact, module: &str, cimports: &mut Vec<Cimport>) -> TypeExpr {
    if let Some(class_path) = &fact.space_class {
        let Some((class_module, class)) = class_path.rsplit_once('.') else {
            return TypeExpr::Scalar(Category::Dynamic);
        };
        if class_module == module {
            return TypeExpr::Space {
                alias: None,
                class: class.to_string(),
            };
        }
        let cimport = Cimport::of(class_module);
        let alias = cimport.alias.clone();
        if !cimports.contains(&cimport) {
            cimports.push(cimport);
        }
        return TypeExpr::Space {
            alias: Some(alias),
            class: class.to_string(),
        };
    }
    match fact.ndim {
        Some(ndim) => TypeExpr::array(fact.category, ndim),
        None => TypeExpr::Scalar(fact.category),
    }
}

/// Bound per cell parameter name of one space.
///
/// Overrides come first. An observed maximum that does not fit replaces the
/// override and is reported; without an override the observed maximum + 1
/// is used.
fn resolve_sizes(
    space: &SpaceClass,
    facts: &RuntimeFacts,
    spec: &TranslationSpec,
    diags: &mut Diagnostics,
) -> BTreeMap<String, usize> {
    let path = space.path();
    let mut sizes = spec.sizes(&path);
    let overridden: Vec<String> = sizes.keys().cloned().collect();

    for decl in space.cells.iter().filter(|c| !c.is_special()) {
        let fqname = decl.fqname();
        let Some(cell) = facts.cell(&fqname) else {
            continue;
        };
        for (param, fact) in &cell.params {
            if !fact.is_integral() || !decl.params.contains(param) {
                continue;
            }
            let Some(max) = fact.max.filter(|m| *m >= 0) else {
                continue;
            };
            let needed = max as usize + 1;
            match sizes.get(param).copied() {
                Some(old) if needed > old => {
                    if overridden.contains(param) {
                        diags.info(format!(
                            "Specified max size of {} for cells parameter {} in {} is replaced by {} from {}",
                            old, param, path, needed, fqname
                        ));
                    }
                    sizes.insert(param.clone(), needed);
                }
                Some(_) => {}
                None => {
                    sizes.insert(param.clone(), needed);
                }
            }
        }
    }
    sizes
}

/// Resolved model of one module.
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleModel {
    pub name: String,
    pub spaces: Vec<SpaceModel>,
    /// Modules of non-local space types, first-seen order.
    pub cimports: Vec<Cimport>,
    /// Submodules holding child spaces, in class order.
    pub sub_modules: Vec<String>,
}

impl ModuleModel {
    pub fn build(
        table: &SymbolTable,
        facts: &RuntimeFacts,
        spec: &TranslationSpec,
        diags: &mut Diagnostics,
    ) -> Self {
        let mut cimports = Vec::new();
        let spaces = table
            .spaces
            .iter()
            .map(|space| SpaceModel::build(space, facts, spec, &mut cimports, diags))
            .collect();

        let is_model_module = table.module.rsplit('.').next() == Some(MODEL_MOD);
        let sub_modules = if is_model_module {
            Vec::new()
        } else {
            table
                .spaces
                .iter()
                .filter(|s| !s.child_spaces.is_empty())
                .map(|s| format!("{}{}", MODULE_PREF, s.space_name()))
                .collect()
        };

        ModuleModel {
            name: table.module.clone(),
            spaces,
            cimports,
            sub_modules,
        }
    }

    /// Top-level package.
    pub fn package(&self) -> &str {
        self.name.split('.').next().unwrap_or(&self.name)
    }

    pub fn space(&self, name: &str) -> Option<&SpaceModel> {
        self.spaces.iter().find(|s| s.name() == name)
    }

    /// Human-readable summary of the storage decisions.
    pub fn report(&self) -> String {
        let mut out = format!("Module {}\n", self.name);
        for space in &self.spaces {
            out.push_str(&format!("  {}\n", consts::strip_pref(space.name(), SPACE_PREF)));
            for cell in space.stored_cells() {
                let bounds = if cell.bounds.is_empty() {
                    String::new()
                } else {
                    format!(" {:?}", cell.bounds)
                };
                out.push_str(&format!(
                    "    {}({}) -> {}: {:?}{}\n",
                    cell.name(),
                    cell.decl.params.join(", "),
                    cell.value_type().c_decl(),
                    cell.storage,
                    bounds
                ));
            }
        }
        out
    }
}
