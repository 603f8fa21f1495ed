//! Source rewriter.
//!
//! Produces the Cython pure-Python-mode version of a module from its parsed
//! tree and resolved model. Nodes that need no change are copied verbatim,
//! comments and blank lines included.
//!
//! # Example
//!
//! A dense cell
//!
//! ```text
//! def age(self, t):
//!     if t in self._v_age:
//!         return self._v_age[t]
//!     ...
//! ```
//!
//! becomes
//!
//! ```text
//! _v_age: _mx_cy.double[241]
//! _has_age: _mx_cy.bint[241]
//!
//! @_mx_cy.ccall
//! def age(self, t: _mx_cy.longlong) -> _mx_cy.double:
//!     if not (0 <= t < 241):
//!         raise IndexError("age: argument out of range")
//!     if self._has_age[t]:
//!         return self._v_age[t]
//!     else:
//!         val = self._v_age[t] = self._f_age(t)
//!         self._has_age[t] = True
//!         return val
//! ```

use super::model::{CellModel, ModuleModel, SpaceModel, StorageKind};
use super::{GenConfig, GenerateError};
use crate::consts::{
    CALL, COPY_REFS, COPY_SOURCE, FORMULA_PREF, HAS_PREF, INIT, SELF_NAME, VAR_PREF,
};
use crate::parser::{Assign, Block, DefHeader, LogicalLine, Node, SourceModule, Target, TokenKind};
use std::fmt::Write;

/// Rewrites the space classes of one module.
pub struct SpaceTransformer<'a> {
    model: &'a ModuleModel,
    config: &'a GenConfig,
}

impl<'a> SpaceTransformer<'a> {
    pub fn new(model: &'a ModuleModel, config: &'a GenConfig) -> Self {
        Self { model, config }
    }

    fn cy(&self) -> &str {
        &self.config.cy_alias
    }

    pub fn transform(&self, source: &SourceModule) -> Result<String, GenerateError> {
        let shadow_import = format!("import cython as {}", self.cy());
        let generated = source.body.iter().any(|node| match node {
            Node::Stmt(line) => line.code() == shadow_import,
            Node::Block(_) => false,
        });
        if generated {
            return Err(GenerateError::AlreadyGenerated {
                module: self.model.name.clone(),
            });
        }

        let mut out = String::new();
        self.write_header(&mut out);
        for node in &source.body {
            match node {
                Node::Block(block) => {
                    let space = block
                        .class_header()
                        .and_then(|header| self.model.space(&header.name));
                    match space {
                        Some(space) => self.write_space(&mut out, block, space),
                        None => block.write_to(&mut out),
                    }
                }
                Node::Stmt(_) => node.write_to(&mut out),
            }
        }
        out.push_str(&source.trailing);
        Ok(out)
    }

    fn write_header(&self, out: &mut String) {
        let _ = writeln!(
            out,
            "from cython.cimports.{} import {}",
            self.model.package(),
            self.config.sys_module
        );
        let _ = writeln!(out, "import cython as {}", self.cy());
        for cimport in &self.model.cimports {
            let (parent, last) = cimport.split();
            let _ = writeln!(
                out,
                "from cython.cimports.{} import {} as {}",
                parent, last, cimport.alias
            );
        }
    }

    fn write_space(&self, out: &mut String, block: &Block, space: &SpaceModel) {
        let decorator = format!("{}.cclass", self.cy());
        write_head(out, block, Some(decorator.as_str()), None);

        let indent = block.body_indent();
        let mut body = block.body.iter().peekable();
        if let Some(doc) = body.next_if(|node| is_docstring(node)) {
            doc.write_to(out);
        }
        let decls = self.declarations(space);
        if !decls.is_empty() {
            out.push('\n');
            for decl in decls {
                if decl.is_empty() {
                    out.push('\n');
                } else {
                    let _ = writeln!(out, "{}{}", indent, decl);
                }
            }
        }

        for node in body {
            match node {
                Node::Block(method) => match method.def_header() {
                    Some(def) => self.write_method(out, space, method, &def),
                    None => method.write_to(out),
                },
                Node::Stmt(_) => node.write_to(out),
            }
        }
    }

    /// Class-level declarations of storage, references and child spaces.
    fn declarations(&self, space: &SpaceModel) -> Vec<String> {
        let cy = self.cy();
        let mut lines = Vec::new();
        for cell in space.stored_cells() {
            let name = cell.name();
            match cell.storage {
                StorageKind::Scalar => {
                    lines.push(format!("{}{}: {}", VAR_PREF, name, cell.value_type().annotation(cy)));
                    lines.push(format!("{}{}: {}.bint", HAS_PREF, name, cy));
                }
                StorageKind::Dense => {
                    let dims = dims(&cell.bounds);
                    lines.push(format!(
                        "{}{}: {}{}",
                        VAR_PREF,
                        name,
                        cell.value_type().annotation(cy),
                        dims
                    ));
                    lines.push(format!("{}{}: {}.bint{}", HAS_PREF, name, cy, dims));
                }
                StorageKind::Sparse => lines.push(format!("{}{}: dict", VAR_PREF, name)),
            }
        }

        let members: Vec<String> = space
            .refs
            .iter()
            .chain(&space.params)
            .chain(&space.child_spaces)
            .map(|m| {
                format!(
                    "{} = {}.declare({}, visibility='public')",
                    m.name,
                    cy,
                    m.ty.annotation(cy)
                )
            })
            .collect();
        if !lines.is_empty() && !members.is_empty() {
            lines.push(String::new());
        }
        lines.extend(members);
        lines
    }

    fn write_method(&self, out: &mut String, space: &SpaceModel, method: &Block, def: &DefHeader) {
        let cy = self.cy();
        match def.name.as_str() {
            INIT => self.write_init(out, space, method),
            COPY_REFS => self.write_copy_refs(out, space, method),
            CALL => match space.cell(CALL).filter(|c| c.facts.is_some()) {
                Some(cell) => {
                    let header = self.render_def(method, def, cell, false);
                    write_head(out, method, None, Some(header.as_str()));
                    write_body(out, method);
                }
                None => method.write_to(out),
            },
            name if name.starts_with(FORMULA_PREF) => {
                match space.cell_for_formula(name).filter(|c| !c.is_generator()) {
                    Some(cell) => {
                        let decorator = format!("{}.cfunc", cy);
                        let header = self.render_def(method, def, cell, true);
                        write_head(out, method, Some(decorator.as_str()), Some(header.as_str()));
                        write_body(out, method);
                    }
                    None => method.write_to(out),
                }
            }
            name if name.starts_with('_') => method.write_to(out),
            name => match space.cell(name) {
                Some(cell) => {
                    let decorator = format!("{}.ccall", cy);
                    let header = self.render_def(method, def, cell, true);
                    write_head(out, method, Some(decorator.as_str()), Some(header.as_str()));
                    if cell.storage == StorageKind::Dense {
                        self.write_dense_body(out, method, cell);
                    } else {
                        write_body(out, method);
                    }
                }
                None => method.write_to(out),
            },
        }
    }

    /// Header with parameter and return annotations from the cell model.
    fn render_def(&self, method: &Block, def: &DefHeader, cell: &CellModel, with_return: bool) -> String {
        let cy = self.cy();
        let params: Vec<String> = def
            .params
            .iter()
            .map(|param| {
                let annotation = match param.name.as_deref() {
                    Some(SELF_NAME) | None => None,
                    Some(name) => cell.param_type(name).map(|t| t.annotation(cy)),
                };
                param.render(annotation.as_deref())
            })
            .collect();
        let returns = if with_return {
            cell.ret
                .as_ref()
                .map(|t| t.annotation(cy))
                .or_else(|| def.returns.clone())
        } else {
            def.returns.clone()
        };

        let mut header = format!(
            "{}{}def {}({})",
            method.header.indent_str(),
            if def.is_async { "async " } else { "" },
            def.name,
            params.join(", ")
        );
        if let Some(returns) = returns {
            let _ = write!(header, " -> {}", returns);
        }
        header.push(':');
        header
    }

    /// Constructor without the initialization of typed slots.
    fn write_init(&self, out: &mut String, space: &SpaceModel, method: &Block) {
        let typed: Vec<String> = space
            .stored_cells()
            .filter(|c| matches!(c.storage, StorageKind::Scalar | StorageKind::Dense))
            .flat_map(|c| {
                [
                    format!("{}{}", VAR_PREF, c.name()),
                    format!("{}{}", HAS_PREF, c.name()),
                ]
            })
            .collect();
        let initializes_slot = |node: &Node| match node {
            Node::Stmt(line) => Assign::parse(line).map_or(false, |assign| {
                assign.targets.iter().all(|target| {
                    matches!(target, Target::Attr { object, attr }
                        if object == SELF_NAME && typed.contains(attr))
                })
            }),
            Node::Block(_) => false,
        };

        write_head(out, method, None, None);
        let mut kept = 0;
        for node in method.body.iter().filter(|n| !initializes_slot(*n)) {
            node.write_to(out);
            kept += 1;
        }
        if kept == 0 {
            let _ = writeln!(out, "{}pass", method.body_indent());
        }
    }

    /// Copy routine narrowing its source to the concrete class.
    fn write_copy_refs(&self, out: &mut String, space: &SpaceModel, method: &Block) {
        let cy = self.cy();
        let decorator = format!("{}.ccall", cy);
        write_head(out, method, Some(decorator.as_str()), None);
        let indent = method.body_indent();
        let _ = writeln!(
            out,
            "{}{}_: {} = {}.cast({}, {})",
            indent,
            COPY_SOURCE,
            space.name(),
            cy,
            space.name(),
            COPY_SOURCE
        );
        for node in &method.body {
            write_renamed(out, node, COPY_SOURCE, &format!("{}_", COPY_SOURCE));
        }
    }

    /// Bounds-checked dense accessor.
    fn write_dense_body(&self, out: &mut String, method: &Block, cell: &CellModel) {
        let indent = method.body_indent();
        let inner = format!("{}{}", indent, self.config.indent);
        let name = cell.name();
        let params = &cell.decl.params;
        let index: String = params.iter().map(|p| format!("[{}]", p)).collect();
        let checks: Vec<String> = params
            .iter()
            .zip(&cell.bounds)
            .map(|(p, bound)| format!("0 <= {} < {}", p, bound))
            .collect();

        let lines = [
            format!("{}if not ({}):", indent, checks.join(" and ")),
            format!("{}raise IndexError(\"{}: argument out of range\")", inner, name),
            format!("{}if self.{}{}{}:", indent, HAS_PREF, name, index),
            format!("{}return self.{}{}{}", inner, VAR_PREF, name, index),
            format!("{}else:", indent),
            format!(
                "{}val = self.{}{}{} = self.{}{}({})",
                inner,
                VAR_PREF,
                name,
                index,
                FORMULA_PREF,
                name,
                params.join(", ")
            ),
            format!("{}self.{}{}{} = True", inner, HAS_PREF, name, index),
            format!("{}return val", inner),
        ];
        for line in lines {
            let _ = writeln!(out, "{}", line);
        }
    }
}

fn dims(bounds: &[usize]) -> String {
    bounds.iter().map(|b| format!("[{}]", b)).collect()
}

fn is_docstring(node: &Node) -> bool {
    match node {
        Node::Stmt(line) => line.tokens.len() == 1 && line.tokens[0].kind == TokenKind::Str,
        Node::Block(_) => false,
    }
}

/// Writes decorators and header, optionally adding a decorator in front and
/// replacing the header line.
fn write_head(out: &mut String, block: &Block, decorator: Option<&str>, header: Option<&str>) {
    let indent = block.header.indent_str();
    let first = block.decorators.first().unwrap_or(&block.header);
    out.push_str(&first.leading);
    if let Some(decorator) = decorator {
        let _ = writeln!(out, "{}@{}", indent, decorator);
    }
    for (idx, line) in block.decorators.iter().enumerate() {
        if idx > 0 {
            out.push_str(&line.leading);
        }
        out.push_str(&line.text);
    }
    if !block.decorators.is_empty() {
        out.push_str(&block.header.leading);
    }
    match header {
        Some(header) => {
            let _ = writeln!(out, "{}", header);
        }
        None => out.push_str(&block.header.text),
    }
}

fn write_body(out: &mut String, block: &Block) {
    for node in &block.body {
        node.write_to(out);
    }
}

/// Copies a node, renaming attribute accesses on `from`.
fn write_renamed(out: &mut String, node: &Node, from: &str, to: &str) {
    match node {
        Node::Stmt(line) => {
            out.push_str(&line.leading);
            out.push_str(&rename_owner(line, from, to));
        }
        Node::Block(block) => {
            for line in &block.decorators {
                out.push_str(&line.leading);
                out.push_str(&line.text);
            }
            out.push_str(&block.header.leading);
            out.push_str(&rename_owner(&block.header, from, to));
            for child in &block.body {
                write_renamed(out, child, from, to);
            }
        }
    }
}

fn rename_owner(line: &LogicalLine, from: &str, to: &str) -> String {
    let mut text = line.text.clone();
    for (idx, token) in line.tokens.iter().enumerate().rev() {
        let preceded_by_dot = idx > 0 && line.is_op(idx - 1, ".");
        if token.kind == TokenKind::Name
            && line.token_text(token) == from
            && line.is_op(idx + 1, ".")
            && !preceded_by_dot
        {
            text.replace_range(token.start..token.end, to);
        }
    }
    text
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::TranslationSpec;
    use crate::diagnostics::Diagnostics;
    use crate::parser::SymbolTable;
    use crate::trace::{ReturnKind, TraceLog, TraceObservation};
    use crate::unify::RuntimeFacts;
    use crate::value::Value;

    const SRC: &str = "\
from . import _mx_sys

class _c_Space1(_mx_sys.BaseSpace):
    \"\"\"A space.\"\"\"

    def __init__(self, parent):
        self._mx_parent = parent
        self._v_foo = {}
        self._v_total = None
        self._has_total = False
        self._v_label = {}

    def _mx_copy_refs(self, base, base_root):
        self.rate = base.rate

    def foo(self, t):
        if t in self._v_foo:
            return self._v_foo[t]
        else:
            val = self._v_foo[t] = self._f_foo(t)
            return val

    def _f_foo(self, t):
        return t * 2

    def total(self):
        if self._has_total:
            return self._v_total
        else:
            val = self._v_total = self._f_total()
            self._has_total = True
            return val

    def _f_total(self):
        return 1.5

    def label(self, x):
        if x in self._v_label:
            return self._v_label[x]
        else:
            val = self._v_label[x] = self._f_label(x)
            return val

    def _f_label(self, x):
        return x

    def _mx_assign_refs(self, io_data, pickle_data):
        self.rate = pickle_data[1]


def helper():
    return 1
";

    fn module() -> (SourceModule, ModuleModel) {
        let cls = "M._mx_classes._c_Space1";
        let obs = |t: i64, v: Value| TraceObservation {
            args: vec![("t".to_string(), Value::Int(t))],
            value: v,
            kind: ReturnKind::Return,
        };
        let mut log = TraceLog::default();
        log.calls.insert(
            format!("{}._f_foo", cls),
            vec![obs(0, Value::Int(0)), obs(2, Value::Int(4))],
        );
        log.calls.insert(
            format!("{}._f_total", cls),
            vec![TraceObservation {
                args: vec![],
                value: Value::float(1.5),
                kind: ReturnKind::Return,
            }],
        );
        log.members.insert(
            format!("{}._mx_assign_refs", cls),
            vec![("rate".into(), Value::float(0.1))],
        );
        let facts = RuntimeFacts::from_log(&log);

        let source = SourceModule::parse(SRC).unwrap();
        let table = SymbolTable::from_module("M._mx_classes", &source);
        let model = ModuleModel::build(
            &table,
            &facts,
            &TranslationSpec::default(),
            &mut Diagnostics::new(),
        );
        (source, model)
    }

    const GRID_SRC: &str = "\
class _c_Grid(_mx_sys.BaseSpace):

    def __init__(self, parent):
        self._v_foo = {}

    def foo(self, i, j):
        if (i, j) in self._v_foo:
            return self._v_foo[(i, j)]
        else:
            val = self._v_foo[(i, j)] = self._f_foo(i, j)
            return val

    def _f_foo(self, i, j):
        return 0.5 * i * j
";

    /// `foo(i, j)` traced over `0..3` x `0..4` with real results.
    pub(crate) fn grid_model() -> (SourceModule, ModuleModel) {
        let mut log = TraceLog::default();
        let mut observations = Vec::new();
        for i in 0..3 {
            for j in 0..4 {
                observations.push(TraceObservation {
                    args: vec![("i".to_string(), Value::Int(i)), ("j".to_string(), Value::Int(j))],
                    value: Value::float(0.5 * (i * j) as f64),
                    kind: ReturnKind::Return,
                });
            }
        }
        log.calls.insert("M._mx_classes._c_Grid._f_foo".to_string(), observations);
        let facts = RuntimeFacts::from_log(&log);

        let source = SourceModule::parse(GRID_SRC).unwrap();
        let table = SymbolTable::from_module("M._mx_classes", &source);
        let model = ModuleModel::build(
            &table,
            &facts,
            &TranslationSpec::default(),
            &mut Diagnostics::new(),
        );
        (source, model)
    }

    fn generate() -> String {
        let (source, model) = module();
        let config = GenConfig::default();
        SpaceTransformer::new(&model, &config)
            .transform(&source)
            .unwrap()
    }

    #[test]
    fn test_header_and_class() {
        let out = generate();
        assert!(out.starts_with(
            "from cython.cimports.M import _mx_sys\nimport cython as _mx_cy\nfrom . import _mx_sys\n"
        ));
        assert!(out.contains(
            "\n@_mx_cy.cclass\nclass _c_Space1(_mx_sys.BaseSpace):\n    \"\"\"A space.\"\"\"\n\n    _v_foo: _mx_cy.longlong[3]\n"
        ));
        assert!(out.contains("    _has_foo: _mx_cy.bint[3]\n"));
        assert!(out.contains("    _v_total: _mx_cy.double\n    _has_total: _mx_cy.bint\n"));
        assert!(out.contains("    _v_label: dict\n\n    rate = _mx_cy.declare(_mx_cy.double, visibility='public')\n"));
        assert!(out.ends_with("\n\ndef helper():\n    return 1\n"));
    }

    #[test]
    fn test_init_keeps_sparse_slots() {
        let out = generate();
        assert!(out.contains(
            "    def __init__(self, parent):\n        self._mx_parent = parent\n        self._v_label = {}\n"
        ));
        assert!(!out.contains("self._v_foo = {}"));
        assert!(!out.contains("self._has_total = False"));
    }

    #[test]
    fn test_dense_accessor() {
        let out = generate();
        let expected = "\
    @_mx_cy.ccall
    def foo(self, t: _mx_cy.longlong) -> _mx_cy.longlong:
        if not (0 <= t < 3):
            raise IndexError(\"foo: argument out of range\")
        if self._has_foo[t]:
            return self._v_foo[t]
        else:
            val = self._v_foo[t] = self._f_foo(t)
            self._has_foo[t] = True
            return val
";
        assert!(out.contains(expected), "{}", out);
        assert!(out.contains(
            "    @_mx_cy.cfunc\n    def _f_foo(self, t: _mx_cy.longlong) -> _mx_cy.longlong:\n        return t * 2\n"
        ));
    }

    #[test]
    fn test_dense_accessor_two_params() {
        let (source, model) = grid_model();
        let config = GenConfig::default();
        let out = SpaceTransformer::new(&model, &config)
            .transform(&source)
            .unwrap();
        assert!(out.contains("    _v_foo: _mx_cy.double[3][4]\n    _has_foo: _mx_cy.bint[3][4]\n"), "{}", out);
        assert!(out.contains("    def __init__(self, parent):\n        pass\n"), "{}", out);
        let expected = "\
    @_mx_cy.ccall
    def foo(self, i: _mx_cy.longlong, j: _mx_cy.longlong) -> _mx_cy.double:
        if not (0 <= i < 3 and 0 <= j < 4):
            raise IndexError(\"foo: argument out of range\")
        if self._has_foo[i][j]:
            return self._v_foo[i][j]
        else:
            val = self._v_foo[i][j] = self._f_foo(i, j)
            self._has_foo[i][j] = True
            return val
";
        assert!(out.contains(expected), "{}", out);
        assert!(out.contains(
            "    @_mx_cy.cfunc\n    def _f_foo(self, i: _mx_cy.longlong, j: _mx_cy.longlong) -> _mx_cy.double:\n"
        ));
    }

    #[test]
    fn test_scalar_and_untraced_cells() {
        let out = generate();
        assert!(out.contains("    @_mx_cy.ccall\n    def total(self) -> _mx_cy.double:\n        if self._has_total:\n"));
        assert!(out.contains("    @_mx_cy.ccall\n    def label(self, x):\n        if x in self._v_label:\n"));
        assert!(out.contains("    @_mx_cy.cfunc\n    def _f_label(self, x):\n"));
    }

    #[test]
    fn test_copy_refs() {
        let out = generate();
        assert!(out.contains(
            "    @_mx_cy.ccall\n    def _mx_copy_refs(self, base, base_root):\n        base_: _c_Space1 = _mx_cy.cast(_c_Space1, base)\n        self.rate = base_.rate\n"
        ));
    }

    #[test]
    fn test_one_shot() {
        let (_, model) = module();
        let config = GenConfig::default();
        let transformer = SpaceTransformer::new(&model, &config);
        let generated = SourceModule::parse(&generate()).unwrap();
        assert_eq!(
            transformer.transform(&generated),
            Err(GenerateError::AlreadyGenerated {
                module: "M._mx_classes".into()
            })
        );
    }
}
