//! Python bindings.
//!
//! A harness drives the model under its own profiler and forwards events:
//!
//! ```python
//! with cellspec.TraceSession("Model") as session:
//!     ...  # session.on_call / session.on_return from sys.setprofile
//! session.set_spaces(tree_json)
//! cellspec.translate("Model_cy", session, allow_inferred_sizes=True)
//! ```

use crate::trace::{self, CodeInfo, ReturnKind, SpaceInstance, TraceEvent, TraceLog, TracerConfig};
use crate::translate::{translate as run_translate, TranslateOptions};
use crate::unify::RuntimeFacts;
use crate::value::{Category, Value};
use ordered_float::OrderedFloat;
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyDict, PyFloat, PyLong, PyString};
use std::path::PathBuf;

/// Convert a Python object to a traced value.
///
/// Never fails: a value that cannot be read as a specific kind is recorded
/// as an opaque object, and the traced program keeps running.
fn py_to_value(obj: &PyAny) -> Value {
    match try_py_to_value(obj) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!("recording value as object: {}", err);
            opaque(obj)
        }
    }
}

fn opaque(obj: &PyAny) -> Value {
    Value::Object {
        type_name: obj
            .get_type()
            .name()
            .map_or_else(|_| "object".to_string(), str::to_string),
        repr: obj
            .repr()
            .map_or_else(|_| "<unrepresentable>".to_string(), |r| r.to_string()),
    }
}

fn try_py_to_value(obj: &PyAny) -> PyResult<Value> {
    if obj.is_none() {
        return Ok(Value::None);
    }
    let ty = obj.get_type();
    let type_name = ty.name()?.to_string();

    // bool is a subclass of int, check it first
    if obj.is_instance_of::<PyBool>() {
        return Ok(Value::Bool(obj.extract()?));
    }
    if obj.is_instance_of::<PyLong>() {
        // wider than 64 bits: no C integral type holds it
        let Ok(n) = obj.extract::<i64>() else {
            return Ok(opaque(obj));
        };
        return Ok(if type_name == "int" {
            Value::Int(n)
        } else {
            Value::IntLike { type_name, value: n }
        });
    }
    if obj.is_instance_of::<PyFloat>() {
        let x: f64 = obj.extract()?;
        return Ok(if type_name == "float" {
            Value::float(x)
        } else {
            Value::FloatLike {
                type_name,
                value: OrderedFloat(x),
            }
        });
    }
    if obj.is_instance_of::<PyString>() {
        return Ok(Value::Str(obj.extract()?));
    }

    // Arrays expose ndim and a dtype kind
    if let (Ok(ndim), Ok(dtype)) = (obj.getattr("ndim"), obj.getattr("dtype")) {
        let ndim: usize = ndim.extract()?;
        let kind: String = dtype.getattr("kind")?.extract()?;
        let elem = match kind.as_str() {
            "b" => Category::Boolean,
            "i" | "u" => Category::Integral,
            "f" => Category::Real,
            "U" => Category::Str,
            _ => Category::Dynamic,
        };
        if ndim == 0 {
            return Ok(match elem {
                Category::Integral => Value::IntLike {
                    type_name,
                    value: obj.call_method0("item")?.extract()?,
                },
                Category::Real => Value::FloatLike {
                    type_name,
                    value: OrderedFloat(obj.call_method0("item")?.extract()?),
                },
                _ => opaque(obj),
            });
        }
        return Ok(Value::array(elem, ndim));
    }

    let qualname: String = ty.getattr("__qualname__")?.extract()?;
    if qualname.starts_with(crate::consts::SPACE_PREF) {
        let module: String = ty.getattr("__module__")?.extract()?;
        return Ok(Value::space(format!("{}.{}", module, qualname)));
    }
    Ok(opaque(obj))
}

fn py_to_bindings(args: &PyDict) -> Vec<(String, Value)> {
    args.iter()
        .map(|(name, value)| {
            let name = name
                .extract::<String>()
                .unwrap_or_else(|_| name.to_string());
            (name, py_to_value(value))
        })
        .collect()
}

fn return_kind(kind: &str) -> Option<ReturnKind> {
    match kind {
        "return" => Some(ReturnKind::Return),
        "yield" => Some(ReturnKind::Yield),
        "unwind" => Some(ReturnKind::Unwind),
        _ => None,
    }
}

/// Python wrapper for a trace session.
#[pyclass(name = "TraceSession", unsendable)]
struct PyTraceSession {
    config: TracerConfig,
    session: Option<trace::TraceSession>,
    spaces: Option<SpaceInstance>,
    log: Option<TraceLog>,
}

#[pymethods]
impl PyTraceSession {
    #[new]
    #[pyo3(signature = (package, sample_rate=None))]
    fn new(package: &str, sample_rate: Option<usize>) -> Self {
        let mut config = TracerConfig::new(package);
        config.sample_rate = sample_rate;
        PyTraceSession {
            config,
            session: None,
            spaces: None,
            log: None,
        }
    }

    fn __enter__(mut slf: PyRefMut<'_, Self>) -> PyResult<PyRefMut<'_, Self>> {
        let session = trace::TraceSession::begin(slf.config.clone())
            .map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
        slf.session = Some(session);
        Ok(slf)
    }

    fn __exit__(&mut self, _ty: &PyAny, _value: &PyAny, _tb: &PyAny) -> bool {
        if let Some(session) = self.session.take() {
            self.log = Some(session.finish());
        }
        false
    }

    /// Forward a call event. Never raises into the traced program.
    fn on_call(&self, frame: u64, filename: &str, module: &str, qualname: &str, args: &PyDict) {
        let code = CodeInfo::new(filename, module, qualname);
        trace::dispatch(&TraceEvent::call(frame, code, py_to_bindings(args)));
    }

    /// Forward a return event; `kind` is "return", "yield" or "unwind".
    /// Never raises into the traced program.
    #[pyo3(signature = (frame, filename, module, qualname, kind, value=None, owner_attrs=None))]
    #[allow(clippy::too_many_arguments)]
    fn on_return(
        &self,
        frame: u64,
        filename: &str,
        module: &str,
        qualname: &str,
        kind: &str,
        value: Option<&PyAny>,
        owner_attrs: Option<&PyDict>,
    ) {
        let code = CodeInfo::new(filename, module, qualname);
        let Some(kind) = return_kind(kind) else {
            tracing::error!(funcname = %code.funcname(), "unknown return kind: {}", kind);
            return;
        };
        let event = TraceEvent::Return {
            frame,
            code,
            kind,
            value: value.map(py_to_value),
            owner_attrs: owner_attrs.map(py_to_bindings).unwrap_or_default(),
        };
        trace::dispatch(&event);
    }

    /// Set the space instance tree, as JSON.
    fn set_spaces(&mut self, tree: &str) -> PyResult<()> {
        let root: SpaceInstance =
            serde_json::from_str(tree).map_err(|e| PyValueError::new_err(e.to_string()))?;
        self.spaces = Some(root);
        Ok(())
    }

    /// Number of functions recorded so far.
    fn recorded(&self) -> usize {
        self.log.as_ref().map_or(0, |log| log.calls.len())
    }
}

impl PyTraceSession {
    fn facts(&self) -> PyResult<RuntimeFacts> {
        let mut log = self
            .log
            .clone()
            .ok_or_else(|| PyRuntimeError::new_err("trace session has not finished"))?;
        if let Some(root) = &self.spaces {
            log.record_spaces(root);
        }
        Ok(RuntimeFacts::from_log(&log))
    }
}

/// Translate a model directory with the facts of a finished session.
///
/// Returns the storage report.
#[pyfunction]
#[pyo3(signature = (model_dir, session, spec=None, allow_inferred_sizes=false))]
fn translate(
    model_dir: PathBuf,
    session: PyRef<'_, PyTraceSession>,
    spec: Option<PathBuf>,
    allow_inferred_sizes: bool,
) -> PyResult<String> {
    let facts = session.facts()?;
    let options = TranslateOptions {
        spec_path: spec,
        allow_inferred_sizes,
        ..TranslateOptions::default()
    };
    let translation = run_translate(&model_dir, &facts, &options)
        .map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
    translation
        .write_to(&model_dir)
        .map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
    Ok(translation.report())
}

/// Python module definition.
#[pymodule]
fn cellspec(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyTraceSession>()?;
    m.add_function(wrap_pyfunction!(translate, m)?)?;
    Ok(())
}

#[cfg(all(test, feature = "auto-initialize"))]
mod tests {
    use super::*;
    use crate::trace::TEST_LOCK;

    const FILE: &str = "/work/Model/_mx_classes.py";
    const MODULE: &str = "Model._mx_classes";
    const FORMULA: &str = "_c_Space1._f_foo";

    #[test]
    fn test_wide_int_is_recorded_as_object() {
        Python::with_gil(|py| {
            let wide = py.eval("2**70", None, None).unwrap();
            assert_eq!(
                py_to_value(wide),
                Value::Object {
                    type_name: "int".into(),
                    repr: "1180591620717411303424".into()
                }
            );
            assert_eq!(py_to_value(py.eval("7", None, None).unwrap()), Value::Int(7));
            assert_eq!(py_to_value(py.eval("True", None, None).unwrap()), Value::Bool(true));
        });
    }

    #[test]
    fn test_callbacks_never_raise() {
        let _lock = TEST_LOCK.lock();
        Python::with_gil(|py| {
            let session = PyCell::new(py, PyTraceSession::new("Model", None)).unwrap();
            drop(PyTraceSession::__enter__(session.borrow_mut()).unwrap());

            let args = PyDict::new(py);
            args.set_item("t", py.eval("2**70", None, None).unwrap()).unwrap();
            session.borrow().on_call(1, FILE, MODULE, FORMULA, args);
            session
                .borrow()
                .on_return(1, FILE, MODULE, FORMULA, "return", Some(py.eval("0.5", None, None).unwrap()), None);
            // unknown kinds are logged and dropped
            session.borrow().on_return(2, FILE, MODULE, FORMULA, "bogus", None, None);

            let none = py.None();
            let none = none.as_ref(py);
            assert!(!session.borrow_mut().__exit__(none, none, none));
            assert_eq!(session.borrow().recorded(), 1);

            let log = session.borrow().log.clone().unwrap();
            let observations = &log.calls["Model._mx_classes._c_Space1._f_foo"];
            assert_eq!(observations.len(), 1);
            assert!(matches!(observations[0].args[0].1, Value::Object { .. }));
            assert_eq!(observations[0].value, Value::float(0.5));
        });
    }
}
