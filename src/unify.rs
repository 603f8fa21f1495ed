//! Type unification of traced observations.
//!
//! Each traced function yields many observations. Per parameter, and for
//! the return value, the observed types are folded pairwise in first-seen
//! order into a single [`TypeFact`]:
//!
//! - identical types pass through
//! - integral ⊔ integral → integral (booleans stay boolean among themselves)
//! - integral ⊔ real, real ⊔ real → real
//! - arrays of equal dimensionality unify their element types
//! - anything else is dynamic
//!
//! Every fold step between two distinct types is reported with one example
//! per side, so the same observations always produce the same messages.

use crate::consts::{self, ASSIGN_REFS};
use crate::diagnostics::Diagnostics;
use crate::trace::{ReturnKind, TraceLog, TraceObservation};
use crate::value::{Category, Value};
use std::collections::BTreeMap;

/// Unified type of one parameter or return value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeFact {
    pub category: Category,
    pub is_array: bool,
    /// Dimensionality, zero for scalars.
    pub ndim: usize,
    /// Largest observed value of an integral parameter.
    pub max: Option<i64>,
    /// Smallest observed value of an integral parameter.
    pub min: Option<i64>,
}

impl TypeFact {
    pub fn scalar(category: Category) -> Self {
        Self {
            category,
            is_array: false,
            ndim: 0,
            max: None,
            min: None,
        }
    }

    pub fn array(elem: Category, ndim: usize) -> Self {
        Self {
            category: elem,
            is_array: true,
            ndim,
            max: None,
            min: None,
        }
    }

    pub fn dynamic() -> Self {
        Self::scalar(Category::Dynamic)
    }

    pub fn is_dynamic(&self) -> bool {
        self.category == Category::Dynamic && !self.is_array
    }

    /// Integral scalar.
    pub fn is_integral(&self) -> bool {
        !self.is_array && self.category.is_integral()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Shape {
    category: Category,
    ndim: Option<usize>,
}

impl Shape {
    fn of(value: &Value) -> Self {
        Shape {
            category: value.category(),
            ndim: value.ndim(),
        }
    }

    fn fact(self) -> TypeFact {
        match self.ndim {
            Some(ndim) => TypeFact::array(self.category, ndim),
            None => TypeFact::scalar(self.category),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Widening {
    Integral,
    Numeric,
    Dimensions,
    Dynamic,
}

fn join(left: Shape, right: Shape) -> (Shape, Widening) {
    let dynamic = Shape {
        category: Category::Dynamic,
        ndim: None,
    };
    match (left.ndim, right.ndim) {
        (None, None) => {
            let category = left.category.join(right.category);
            let widening = if category == Category::Dynamic {
                Widening::Dynamic
            } else if category.is_integral() {
                Widening::Integral
            } else {
                Widening::Numeric
            };
            (Shape { category, ndim: None }, widening)
        }
        (Some(a), Some(b)) if a == b => {
            let category = left.category.join(right.category);
            let widening = if category == Category::Dynamic {
                Widening::Dynamic
            } else {
                Widening::Numeric
            };
            (Shape { category, ndim: Some(a) }, widening)
        }
        (Some(_), Some(_)) => (dynamic, Widening::Dimensions),
        _ => (dynamic, Widening::Dynamic),
    }
}

/// Folds values in order, calling `report` for every step that joins two
/// distinct types.
fn fold<'a>(
    values: impl IntoIterator<Item = &'a Value>,
    mut report: impl FnMut(Widening, &Value, &Value),
) -> Option<TypeFact> {
    let mut distinct: Vec<(&str, Shape, &Value)> = Vec::new();
    for value in values {
        let shape = Shape::of(value);
        let type_name = value.type_name();
        if !distinct
            .iter()
            .any(|(name, s, _)| *name == type_name && *s == shape)
        {
            distinct.push((type_name, shape, value));
        }
    }

    let mut iter = distinct.into_iter();
    let (_, mut acc, first) = iter.next()?;
    for (_, shape, example) in iter {
        let (joined, widening) = join(acc, shape);
        report(widening, first, example);
        acc = joined;
    }
    Some(acc.fact())
}

fn pair(left: &Value, right: &Value) -> String {
    format!(
        "{} {}, {} {}",
        left.type_name(),
        left,
        right.type_name(),
        right
    )
}

fn report(diags: &mut Diagnostics, widening: Widening, message: String) {
    match widening {
        Widening::Integral => diags.debug(message),
        Widening::Numeric => diags.info(message),
        Widening::Dimensions | Widening::Dynamic => diags.warn(message),
    }
}

/// Unified facts of one traced function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellFacts {
    pub fqname: String,
    /// Parameters in first-seen order.
    pub params: Vec<(String, TypeFact)>,
    pub ret: TypeFact,
    /// Number of observations folded.
    pub calls: usize,
    /// Whether the function yielded.
    pub is_generator: bool,
}

impl CellFacts {
    pub fn unify(fqname: &str, observations: &[TraceObservation], diags: &mut Diagnostics) -> Self {
        let mut names: Vec<&str> = Vec::new();
        for obs in observations {
            for (name, _) in &obs.args {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }

        let mut params = Vec::with_capacity(names.len());
        for name in names {
            let values: Vec<&Value> = observations
                .iter()
                .flat_map(|obs| obs.args.iter())
                .filter(|(n, _)| n == name)
                .map(|(_, v)| v)
                .collect();
            let mut fact = fold(values.iter().copied(), |widening, l, r| {
                let message = match widening {
                    Widening::Dimensions => format!(
                        "varying array dimensions given to argument '{}' in {}: {}",
                        name,
                        fqname,
                        pair(l, r)
                    ),
                    _ => format!(
                        "varying types given to argument '{}' in {}: {}",
                        name,
                        fqname,
                        pair(l, r)
                    ),
                };
                report(diags, widening, message);
            })
            .unwrap_or_else(TypeFact::dynamic);
            if fact.is_integral() {
                let ints = values.iter().filter_map(|v| v.as_int());
                fact.max = ints.clone().max();
                fact.min = ints.min();
            }
            params.push((name.to_string(), fact));
        }

        let is_generator = observations.iter().any(|o| o.kind == ReturnKind::Yield);
        let returned = observations
            .iter()
            .filter(|o| !is_generator || o.kind == ReturnKind::Yield)
            .map(|o| &o.value);
        let ret = fold(returned, |widening, l, r| {
            let message = match widening {
                Widening::Dimensions => {
                    format!("varying array dimensions returned from {}: {}", fqname, pair(l, r))
                }
                _ => format!("varying types returned from {}: {}", fqname, pair(l, r)),
            };
            report(diags, widening, message);
        })
        .unwrap_or_else(TypeFact::dynamic);

        CellFacts {
            fqname: fqname.to_string(),
            params,
            ret,
            calls: observations.len(),
            is_generator,
        }
    }

    pub fn param(&self, name: &str) -> Option<&TypeFact> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }
}

/// Type of a reference attribute or space parameter, from its first value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefFact {
    pub type_name: String,
    pub category: Category,
    pub ndim: Option<usize>,
    /// Qualified class when the value is a space.
    pub space_class: Option<String>,
}

impl RefFact {
    pub fn of(value: &Value) -> Self {
        RefFact {
            type_name: value.type_name().to_string(),
            category: value.category(),
            ndim: value.ndim(),
            space_class: match value {
                Value::Space { class } => Some(class.clone()),
                _ => None,
            },
        }
    }
}

/// Unified result of a trace session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RuntimeFacts {
    /// Keyed by fully qualified function name.
    pub cells: BTreeMap<String, CellFacts>,
    /// Keyed by `module.Class.attr`. Child spaces are recorded here too.
    pub refs: BTreeMap<String, RefFact>,
    /// Space parameters in first-seen order, keyed by `module.Class`.
    pub params: BTreeMap<String, Vec<(String, RefFact)>>,
    /// Traced modules in first-seen order.
    pub modules: Vec<String>,
    pub diagnostics: Diagnostics,
}

impl RuntimeFacts {
    pub fn from_log(log: &TraceLog) -> Self {
        let mut facts = RuntimeFacts {
            modules: log.modules.clone(),
            ..Default::default()
        };

        for (funcname, observations) in &log.calls {
            if funcname.rsplit('.').next() == Some(ASSIGN_REFS) {
                continue;
            }
            let cell = CellFacts::unify(funcname, observations, &mut facts.diagnostics);
            facts.cells.insert(funcname.clone(), cell);
        }

        for (funcname, attrs) in &log.members {
            let Some((class, _)) = funcname.rsplit_once('.') else {
                continue;
            };
            for (name, value) in attrs {
                facts
                    .refs
                    .entry(format!("{}.{}", class, name))
                    .or_insert_with(|| RefFact::of(value));
            }
        }

        for (class, children) in &log.children {
            for (name, child_class) in children {
                facts
                    .refs
                    .entry(format!("{}.{}", class, name))
                    .or_insert_with(|| RefFact::of(&Value::space(child_class.as_str())));
            }
        }

        for (class, bindings) in &log.params {
            let params = facts.params.entry(class.clone()).or_default();
            for (name, value) in bindings {
                if !params.iter().any(|(n, _)| n == name) {
                    params.push((name.clone(), RefFact::of(value)));
                }
            }
        }

        tracing::debug!(
            cells = facts.cells.len(),
            refs = facts.refs.len(),
            "unified runtime facts"
        );
        facts
    }

    pub fn cell(&self, fqname: &str) -> Option<&CellFacts> {
        self.cells.get(fqname)
    }

    pub fn ref_fact(&self, class: &str, name: &str) -> Option<&RefFact> {
        self.refs.get(&format!("{}.{}", class, name))
    }

    pub fn space_params(&self, class: &str) -> &[(String, RefFact)] {
        self.params.get(class).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Moves every fact to another top-level package name.
    pub fn rename_package(&mut self, package: &str) {
        let rename = |name: &str| consts::replace_package(name, package);

        self.cells = std::mem::take(&mut self.cells)
            .into_values()
            .map(|mut cell| {
                cell.fqname = rename(&cell.fqname);
                (cell.fqname.clone(), cell)
            })
            .collect();

        let retarget = |mut fact: RefFact| {
            fact.space_class = fact.space_class.as_deref().map(rename);
            fact
        };
        self.refs = std::mem::take(&mut self.refs)
            .into_iter()
            .map(|(key, fact)| (rename(&key), retarget(fact)))
            .collect();
        self.params = std::mem::take(&mut self.params)
            .into_iter()
            .map(|(key, params)| {
                let params = params
                    .into_iter()
                    .map(|(name, fact)| (name, retarget(fact)))
                    .collect();
                (rename(&key), params)
            })
            .collect();
        self.modules = self.modules.iter().map(|m| rename(m)).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Severity;

    const FQ: &str = "VaryingArgTypes_nomx._mx_classes._c_Space1._f_foo";

    fn obs(i: Value, ret: Value) -> TraceObservation {
        TraceObservation {
            args: vec![("i".to_string(), i)],
            value: ret,
            kind: ReturnKind::Return,
        }
    }

    #[test]
    fn test_int_int_is_integral() {
        let mut diags = Diagnostics::new();
        let facts = CellFacts::unify(
            FQ,
            &[obs(Value::Int(1), Value::Int(1)), obs(Value::Int(5), Value::Int(2))],
            &mut diags,
        );
        let i = facts.param("i").unwrap();
        assert_eq!(i.category, Category::Integral);
        assert_eq!(i.max, Some(5));
        assert_eq!(i.min, Some(1));
        assert_eq!(facts.ret, TypeFact::scalar(Category::Integral));
        assert!(diags.is_empty());
    }

    #[test]
    fn test_int_float_is_real() {
        let mut diags = Diagnostics::new();
        let facts = CellFacts::unify(
            FQ,
            &[
                obs(Value::Int(1), Value::Int(1)),
                obs(Value::float(2.0), Value::float(2.0)),
            ],
            &mut diags,
        );
        let i = facts.param("i").unwrap();
        assert_eq!(i.category, Category::Real);
        assert_eq!(i.max, None);
        let first = diags.iter().next().unwrap();
        assert_eq!(first.severity, Severity::Info);
        assert_eq!(
            first.message,
            "varying types given to argument 'i' in VaryingArgTypes_nomx._mx_classes._c_Space1._f_foo: int 1, float 2.0"
        );
        assert!(diags.contains("varying types returned from"));
    }

    #[test]
    fn test_int_str_is_dynamic() {
        let mut diags = Diagnostics::new();
        let facts = CellFacts::unify(
            FQ,
            &[
                obs(Value::Int(1), Value::None),
                obs(Value::str("a"), Value::None),
            ],
            &mut diags,
        );
        assert!(facts.param("i").unwrap().is_dynamic());
        let warnings: Vec<_> = diags.at_least(Severity::Warning).collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.ends_with(": int 1, str 'a'"));
    }

    #[test]
    fn test_bool_family() {
        let mut diags = Diagnostics::new();
        let facts = CellFacts::unify(
            FQ,
            &[
                obs(Value::Int(0), Value::Bool(true)),
                obs(Value::Int(1), Value::Bool(false)),
            ],
            &mut diags,
        );
        assert_eq!(facts.ret.category, Category::Boolean);

        let facts = CellFacts::unify(
            FQ,
            &[
                obs(Value::Int(0), Value::Bool(true)),
                obs(Value::Int(1), Value::Int(3)),
            ],
            &mut diags,
        );
        assert_eq!(facts.ret.category, Category::Integral);
        assert_eq!(diags.iter().last().unwrap().severity, Severity::Debug);
    }

    #[test]
    fn test_array_dimensions() {
        let mut diags = Diagnostics::new();
        let facts = CellFacts::unify(
            FQ,
            &[
                obs(Value::Int(0), Value::array(Category::Integral, 2)),
                obs(Value::Int(1), Value::array(Category::Real, 2)),
            ],
            &mut diags,
        );
        assert_eq!(facts.ret, TypeFact::array(Category::Real, 2));

        let mut diags = Diagnostics::new();
        let facts = CellFacts::unify(
            FQ,
            &[
                obs(Value::Int(0), Value::array(Category::Real, 1)),
                obs(Value::Int(1), Value::array(Category::Real, 2)),
            ],
            &mut diags,
        );
        assert!(facts.ret.is_dynamic());
        assert_eq!(
            diags.messages(),
            vec![format!(
                "varying array dimensions returned from {}: ndarray array(real, ndim=1), ndarray array(real, ndim=2)",
                FQ
            )]
        );
    }

    #[test]
    fn test_generator_uses_yields() {
        let mut diags = Diagnostics::new();
        let yielded = |v: i64| TraceObservation {
            args: vec![],
            value: Value::Int(v),
            kind: ReturnKind::Yield,
        };
        let done = TraceObservation {
            args: vec![],
            value: Value::None,
            kind: ReturnKind::Return,
        };
        let facts = CellFacts::unify(FQ, &[yielded(1), yielded(2), done], &mut diags);
        assert!(facts.is_generator);
        assert_eq!(facts.ret.category, Category::Integral);
        assert!(diags.is_empty());
    }

    #[test]
    fn test_deterministic() {
        let observations = vec![
            obs(Value::Int(1), Value::Int(1)),
            obs(Value::str("x"), Value::float(1.0)),
            obs(Value::float(0.5), Value::Bool(true)),
        ];
        let mut a = Diagnostics::new();
        let mut b = Diagnostics::new();
        let fa = CellFacts::unify(FQ, &observations, &mut a);
        let fb = CellFacts::unify(FQ, &observations, &mut b);
        assert_eq!(fa, fb);
        assert_eq!(a, b);
    }

    #[test]
    fn test_runtime_facts() {
        let mut log = TraceLog::default();
        log.calls.insert(FQ.to_string(), vec![obs(Value::Int(2), Value::float(1.0))]);
        log.calls.insert(
            "VaryingArgTypes_nomx._mx_classes._c_Space1._mx_assign_refs".to_string(),
            vec![obs(Value::Int(0), Value::None)],
        );
        log.members.insert(
            "VaryingArgTypes_nomx._mx_classes._c_Space1._mx_assign_refs".to_string(),
            vec![
                ("rate".to_string(), Value::float(0.1)),
                (
                    "Other".to_string(),
                    Value::space("VaryingArgTypes_nomx._mx_classes._c_Space2"),
                ),
            ],
        );
        log.params.insert(
            "VaryingArgTypes_nomx._mx_classes._c_Space1".to_string(),
            vec![
                ("k".to_string(), Value::Int(1)),
                ("k".to_string(), Value::str("x")),
            ],
        );
        log.modules.push("VaryingArgTypes_nomx._mx_classes".to_string());

        let mut facts = RuntimeFacts::from_log(&log);
        assert_eq!(facts.cells.len(), 1);
        let class = "VaryingArgTypes_nomx._mx_classes._c_Space1";
        assert_eq!(facts.ref_fact(class, "rate").unwrap().category, Category::Real);
        assert_eq!(facts.space_params(class).len(), 1);
        assert_eq!(facts.space_params(class)[0].1.category, Category::Integral);

        facts.rename_package("Renamed");
        assert!(facts.cell("Renamed._mx_classes._c_Space1._f_foo").is_some());
        assert_eq!(
            facts
                .ref_fact("Renamed._mx_classes._c_Space1", "Other")
                .unwrap()
                .space_class
                .as_deref(),
            Some("Renamed._mx_classes._c_Space2")
        );
        assert_eq!(facts.modules, vec!["Renamed._mx_classes".to_string()]);
        assert_eq!(facts.space_params("Renamed._mx_classes._c_Space1").len(), 1);
    }
}
