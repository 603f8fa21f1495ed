//! End-to-end tests: replayed trace, model directory on disk, generated files.

use crate::codegen::GenerateError;
use crate::diagnostics::Severity;
use crate::error::Error;
use crate::trace::replay::to_lines;
use crate::trace::{replay_file, CodeInfo, ReturnKind, TraceEvent, TraceRecord, TracerConfig, TEST_LOCK};
use crate::translate::{translate, TranslateOptions};
use crate::unify::RuntimeFacts;
use crate::value::Value;
use std::fs;
use std::path::{Path, PathBuf};

const CLASSES: &str = "\
from . import _mx_sys

class _c_Space1(_mx_sys.BaseSpace):

    def __init__(self, parent):
        self._mx_parent = parent
        self._v_foo = {}
        self._v_total = None
        self._has_total = False

    def foo(self, t):
        if t in self._v_foo:
            return self._v_foo[t]
        else:
            val = self._v_foo[t] = self._f_foo(t)
            return val

    def _f_foo(self, t):
        return 0.5 * t

    def total(self):
        if self._has_total:
            return self._v_total
        else:
            val = self._v_total = self._f_total()
            self._has_total = True
            return val

    def _f_total(self):
        return sum(self.foo(t) for t in range(11))

    def _mx_assign_refs(self, io_data, pickle_data):
        self.rate = pickle_data[1]
";

fn code(qualname: &str) -> CodeInfo {
    CodeInfo::new(
        "/work/Model/_mx_classes.py",
        "Model._mx_classes",
        format!("_c_Space1.{}", qualname),
    )
}

fn records() -> Vec<TraceRecord> {
    let mut records = Vec::new();
    let mut frame = 0;
    let mut next = || {
        frame += 1;
        frame
    };

    let init = next();
    let refs = code("_mx_assign_refs");
    records.push(TraceRecord::Event(TraceEvent::call(init, refs.clone(), vec![])));
    records.push(TraceRecord::Event(TraceEvent::Return {
        frame: init,
        code: refs,
        kind: ReturnKind::Return,
        value: Some(Value::None),
        owner_attrs: vec![("rate".into(), Value::float(0.05))],
    }));

    for t in 0..=10 {
        let f = next();
        records.push(TraceRecord::Event(TraceEvent::call(
            f,
            code("_f_foo"),
            vec![("self".into(), Value::space("Model._mx_classes._c_Space1")), ("t".into(), Value::Int(t))],
        )));
        records.push(TraceRecord::Event(TraceEvent::ret(
            f,
            code("_f_foo"),
            Value::float(0.5 * t as f64),
        )));
    }

    let total = next();
    records.push(TraceRecord::Event(TraceEvent::call(total, code("_f_total"), vec![])));
    records.push(TraceRecord::Event(TraceEvent::ret(total, code("_f_total"), Value::float(27.5))));
    records
}

/// Exported model `Model_cy` traced as `Model`, with a spec next to it.
fn setup(spec: Option<&str>) -> (tempfile::TempDir, PathBuf, RuntimeFacts) {
    let dir = tempfile::tempdir().unwrap();
    let model = dir.path().join("Model_cy");
    fs::create_dir_all(&model).unwrap();
    fs::write(model.join("_mx_classes.py"), CLASSES).unwrap();
    fs::write(model.join("_mx_sys.py"), "class BaseSpace:\n    pass\n").unwrap();
    if let Some(spec) = spec {
        fs::write(dir.path().join("spec.json"), spec).unwrap();
    }

    let trace = dir.path().join("trace.jsonl");
    fs::write(&trace, to_lines(&records()).unwrap()).unwrap();
    let log = {
        let _lock = TEST_LOCK.lock();
        replay_file(&trace, TracerConfig::new("Model")).unwrap()
    };
    (dir, model, RuntimeFacts::from_log(&log))
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

#[test]
fn test_translate_model() {
    let spec = r#"{"spaces": {"Space1": {"cells_params": {"t": {"size": 6}}}}}"#;
    let (_dir, model, facts) = setup(Some(spec));
    assert_eq!(facts.modules, vec!["Model._mx_classes".to_string()]);

    let translation = translate(&model, &facts, &TranslateOptions::default()).unwrap();
    assert_eq!(translation.package, "Model_cy");
    assert_eq!(
        translation.diagnostics.messages(),
        vec![
            "Specified max size of 6 for cells parameter t in Model_cy._mx_classes._c_Space1 is replaced by 11 from Model_cy._mx_classes._c_Space1._f_foo"
        ]
    );
    assert_eq!(
        translation
            .diagnostics
            .at_least(Severity::Info)
            .count(),
        1
    );

    translation.write_to(&model).unwrap();
    let source = read(&model.join("_mx_classes.py"));
    assert!(source.starts_with(
        "from cython.cimports.Model_cy import _mx_sys\nimport cython as _mx_cy\n"
    ));
    assert!(source.contains("    _v_foo: _mx_cy.double[11]\n    _has_foo: _mx_cy.bint[11]\n"));
    assert!(source.contains("    rate = _mx_cy.declare(_mx_cy.double, visibility='public')\n"));
    assert!(source.contains("        if not (0 <= t < 11):\n"));
    assert!(source.contains("    def _f_total(self) -> _mx_cy.double:\n"));
    assert!(!source.contains("self._has_total = False"));

    let decls = read(&model.join("_mx_classes.pxd"));
    assert!(decls.starts_with("from Model_cy cimport _mx_sys\n"));
    assert!(decls.contains("    cdef double[11] _v_foo\n"));
    assert!(decls.contains("    cdef double _v_total\n"));
    assert!(decls.contains("    cdef public double rate\n"));
    assert!(decls.contains("    cpdef double foo(self, long long t)\n"));

    assert_eq!(read(&model.join("__init__.pxd")), "from . cimport _mx_classes\n");

    let report = translation.report();
    assert!(report.contains("foo(t) -> double: Dense [11]"));
}

#[test]
fn test_generation_is_one_shot() {
    let (_dir, model, facts) = setup(None);
    let options = TranslateOptions::default().allow_inferred_sizes();
    translate(&model, &facts, &options)
        .unwrap()
        .write_to(&model)
        .unwrap();

    let err = translate(&model, &facts, &options).unwrap_err();
    assert!(matches!(
        err,
        Error::Generate(GenerateError::AlreadyGenerated { ref module }) if module == "Model_cy._mx_classes"
    ));
}

#[test]
fn test_missing_spec_is_fatal() {
    let (dir, model, facts) = setup(None);
    let err = translate(&model, &facts, &TranslateOptions::default()).unwrap_err();
    match err {
        Error::MissingOverrideSpec { path } => assert_eq!(path, dir.path().join("spec.json")),
        other => panic!("unexpected error: {}", other),
    }
    // nothing written
    assert!(!model.join("_mx_classes.pxd").exists());
}

#[test]
fn test_untraced_cells_stay_dynamic() {
    let (_dir, model, _) = setup(None);
    let translation = translate(
        &model,
        &RuntimeFacts::default(),
        &TranslateOptions::default().allow_inferred_sizes(),
    )
    .unwrap();
    let module = translation.module("Model_cy._mx_classes").unwrap();
    assert!(module.source.contains("    _v_foo: dict\n"));
    assert!(module.source.contains("    def foo(self, t):\n"));
    assert!(module.declarations.contains("    cpdef object foo(self, object t)\n"));
    assert!(module.declarations.contains("    cdef object _v_total\n"));
    assert!(translation.diagnostics.is_empty());
}
