//! Process-wide profiling hook.
//!
//! There is a single hook slot per process. Installing a hook returns a
//! [`ProfileGuard`] that puts the previous occupant back when dropped, so
//! the slot is restored on every exit path, unwinding included.

use super::event::TraceEvent;
use super::TraceError;
use parking_lot::{const_mutex, Mutex};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// Receiver of call and return events.
pub trait ProfileHook: Send {
    fn on_event(&mut self, event: &TraceEvent) -> Result<(), TraceError>;
}

static HOOK: Mutex<Option<Box<dyn ProfileHook>>> = const_mutex(None);

/// Replaces the active hook, returning the previous one.
pub fn set_profile(hook: Option<Box<dyn ProfileHook>>) -> Option<Box<dyn ProfileHook>> {
    std::mem::replace(&mut *HOOK.lock(), hook)
}

pub fn is_installed() -> bool {
    HOOK.lock().is_some()
}

/// Installs `hook` until the returned guard is dropped.
pub fn install(hook: Box<dyn ProfileHook>) -> ProfileGuard {
    ProfileGuard {
        previous: set_profile(Some(hook)),
    }
}

#[must_use = "the hook is removed as soon as the guard is dropped"]
pub struct ProfileGuard {
    previous: Option<Box<dyn ProfileHook>>,
}

impl Drop for ProfileGuard {
    fn drop(&mut self) {
        set_profile(self.previous.take());
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

/// Delivers an event to the active hook.
///
/// Errors and panics raised by the hook are logged and swallowed; the
/// traced program never observes them.
pub fn dispatch(event: &TraceEvent) {
    let mut slot = HOOK.lock();
    let Some(hook) = slot.as_mut() else {
        return;
    };
    match panic::catch_unwind(AssertUnwindSafe(|| hook.on_event(event))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::error!(funcname = %event.code().funcname(), "failed to record event: {}", err);
        }
        Err(payload) => {
            tracing::error!(
                funcname = %event.code().funcname(),
                "trace hook panicked: {}",
                panic_message(payload.as_ref())
            );
        }
    }
}
