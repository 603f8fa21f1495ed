//! Call tracer and trace sessions.
//!
//! [`CallTracer`] is the hook that records formula calls of one model
//! package. [`trace_calls`] wraps a driver run in a [`TraceSession`], the
//! only way to get a populated [`TraceLog`].

use super::event::{CodeInfo, FrameId, ReturnKind, TraceEvent};
use super::hook::{self, ProfileGuard, ProfileHook};
use super::TraceError;
use crate::codegen::runtime;
use crate::consts::{self, ASSIGN_REFS, CALL, FORMULA_PREF, SELF_NAME};
use crate::value::Value;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One completed (or yielded) call of a traced function.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceObservation {
    /// Arguments by parameter name, owner excluded.
    pub args: Vec<(String, Value)>,
    pub value: Value,
    pub kind: ReturnKind,
}

/// Everything recorded during one session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TraceLog {
    /// Observations keyed by fully qualified function name.
    pub calls: BTreeMap<String, Vec<TraceObservation>>,
    /// Owner attributes captured when a reference initializer returned,
    /// keyed by the initializer's fully qualified name.
    pub members: BTreeMap<String, Vec<(String, Value)>>,
    /// Parameter bindings of space classes, keyed by qualified class name.
    pub params: BTreeMap<String, Vec<(String, Value)>>,
    /// Child spaces as `(name, class)`, keyed by qualified parent class.
    pub children: BTreeMap<String, Vec<(String, String)>>,
    /// Modules of recorded functions in first-seen order.
    pub modules: Vec<String>,
}

impl TraceLog {
    pub fn observations(&self, funcname: &str) -> &[TraceObservation] {
        self.calls.get(funcname).map(Vec::as_slice).unwrap_or(&[])
    }

    fn note_module(&mut self, module: &str) {
        if !self.modules.iter().any(|m| m == module) {
            self.modules.push(module.to_string());
        }
    }

    pub fn record(&mut self, code: &CodeInfo, observation: TraceObservation) {
        self.note_module(&code.module);
        self.calls
            .entry(code.funcname())
            .or_default()
            .push(observation);
    }

    /// Keeps the first capture per initializer.
    pub fn record_members(&mut self, code: &CodeInfo, attrs: Vec<(String, Value)>) {
        self.note_module(&code.module);
        self.members.entry(code.funcname()).or_insert(attrs);
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
            && self.members.is_empty()
            && self.params.is_empty()
            && self.children.is_empty()
    }
}

/// Tracer settings.
#[derive(Clone, Debug)]
pub struct TracerConfig {
    /// Top-level package of the model; other frames are ignored.
    pub package: String,
    /// Record only every Nth call per function.
    pub sample_rate: Option<usize>,
    /// Run the driver on a dedicated thread with this stack size.
    pub stack_size: Option<usize>,
}

impl TracerConfig {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            sample_rate: None,
            stack_size: None,
        }
    }

    pub fn with_sample_rate(mut self, every: usize) -> Self {
        self.sample_rate = Some(every);
        self
    }

    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

/// Role of a traced function, by naming convention.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FuncRole {
    Formula,
    RefInit,
    SpaceCtor,
}

impl FuncRole {
    pub fn classify(code: &CodeInfo) -> Option<FuncRole> {
        if !consts::is_model_file(code.file_stem()) {
            return None;
        }
        match code.name() {
            name if name.starts_with(FORMULA_PREF) => Some(FuncRole::Formula),
            ASSIGN_REFS => Some(FuncRole::RefInit),
            CALL => Some(FuncRole::SpaceCtor),
            _ => None,
        }
    }
}

struct PendingCall {
    funcname: String,
    role: FuncRole,
    args: Vec<(String, Value)>,
}

/// Profiling hook recording calls of one model package.
pub struct CallTracer {
    config: TracerConfig,
    log: Arc<Mutex<TraceLog>>,
    pending: FxHashMap<FrameId, PendingCall>,
    seen: FxHashMap<String, usize>,
}

impl CallTracer {
    pub fn new(config: TracerConfig, log: Arc<Mutex<TraceLog>>) -> Self {
        Self {
            config,
            log,
            pending: FxHashMap::default(),
            seen: FxHashMap::default(),
        }
    }

    fn sampled(&mut self, funcname: &str) -> bool {
        let Some(every) = self.config.sample_rate.filter(|&n| n > 1) else {
            return true;
        };
        let count = self.seen.entry(funcname.to_string()).or_insert(0);
        let hit = *count % every == 0;
        *count += 1;
        hit
    }

    fn on_call(&mut self, frame: FrameId, code: &CodeInfo, args: &[(String, Value)]) {
        if code.package() != self.config.package {
            return;
        }
        let Some(role) = FuncRole::classify(code) else {
            return;
        };
        let funcname = code.funcname();
        if role != FuncRole::RefInit && !self.sampled(&funcname) {
            return;
        }
        let args = args
            .iter()
            .filter(|(name, _)| name != SELF_NAME)
            .cloned()
            .collect();
        self.pending.insert(
            frame,
            PendingCall {
                funcname,
                role,
                args,
            },
        );
    }

    fn on_return(
        &mut self,
        frame: FrameId,
        code: &CodeInfo,
        kind: ReturnKind,
        value: Option<&Value>,
        owner_attrs: &[(String, Value)],
    ) -> Result<(), TraceError> {
        let pending = match kind {
            ReturnKind::Unwind => {
                self.pending.remove(&frame);
                return Ok(());
            }
            ReturnKind::Yield => match self.pending.get(&frame) {
                Some(p) => PendingCall {
                    funcname: p.funcname.clone(),
                    role: p.role,
                    args: p.args.clone(),
                },
                None => return Ok(()),
            },
            ReturnKind::Return => match self.pending.remove(&frame) {
                Some(p) => p,
                None => return Ok(()),
            },
        };

        let found = code.funcname();
        if pending.funcname != found {
            self.pending.remove(&frame);
            return Err(TraceError::FrameMismatch {
                expected: pending.funcname,
                found,
            });
        }
        let value = value
            .cloned()
            .ok_or_else(|| TraceError::MissingReturnValue(found.clone()))?;

        let mut log = self.log.lock();
        if pending.role == FuncRole::RefInit && kind == ReturnKind::Return {
            let attrs = owner_attrs
                .iter()
                .filter(|(name, _)| consts::is_user_defined(name))
                .cloned()
                .collect();
            log.record_members(code, attrs);
        }
        log.record(
            code,
            TraceObservation {
                args: pending.args,
                value,
                kind,
            },
        );
        Ok(())
    }
}

impl ProfileHook for CallTracer {
    fn on_event(&mut self, event: &TraceEvent) -> Result<(), TraceError> {
        match event {
            TraceEvent::Call { frame, code, args } => {
                self.on_call(*frame, code, args);
                Ok(())
            }
            TraceEvent::Return {
                frame,
                code,
                kind,
                value,
                owner_attrs,
            } => self.on_return(*frame, code, *kind, value.as_ref(), owner_attrs),
        }
    }
}

static SESSION_ACTIVE: AtomicBool = AtomicBool::new(false);

/// An installed [`CallTracer`]. At most one exists per process.
pub struct TraceSession {
    guard: Option<ProfileGuard>,
    log: Arc<Mutex<TraceLog>>,
}

impl TraceSession {
    pub fn begin(config: TracerConfig) -> Result<Self, TraceError> {
        if SESSION_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TraceError::SessionActive);
        }
        tracing::debug!(package = %config.package, "trace session started");
        let log = Arc::new(Mutex::new(TraceLog::default()));
        let tracer = CallTracer::new(config, log.clone());
        Ok(Self {
            guard: Some(hook::install(Box::new(tracer))),
            log,
        })
    }

    /// Removes the hook and returns what it recorded.
    pub fn finish(mut self) -> TraceLog {
        self.guard.take();
        let log = std::mem::take(&mut *self.log.lock());
        tracing::debug!(
            functions = log.calls.len(),
            modules = log.modules.len(),
            "trace session finished"
        );
        log
    }
}

impl Drop for TraceSession {
    fn drop(&mut self) {
        self.guard.take();
        SESSION_ACTIVE.store(false, Ordering::Release);
    }
}

/// Runs `driver` with a tracer installed.
///
/// The previous hook is restored however the driver exits. With a
/// configured stack size the driver runs on its own thread, which the
/// process-wide hook still observes.
pub fn trace_calls<F, R>(config: TracerConfig, driver: F) -> Result<(R, TraceLog), TraceError>
where
    F: FnOnce() -> R + Send,
    R: Send,
{
    let stack_size = config.stack_size;
    let session = TraceSession::begin(config)?;
    let result = match stack_size {
        Some(bytes) => runtime::with_stack(bytes, driver).map_err(TraceError::Spawn)?,
        None => driver(),
    };
    Ok((result, session.finish()))
}
