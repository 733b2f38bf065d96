// SPDX-License-Identifier: MIT
//! Deferred results of external computations
//!
//! An encoder is launched, but its output file is not usable until the
//! process has been waited on. [`Deferred`] hands the caller the eventual
//! value immediately and forces the wait on first access, exactly once.
//! The temporary input files the encoder reads are owned by the shared
//! [`CompletionGate`], so they live until completion is observed and are
//! removed afterwards on every exit path.

use std::cell::RefCell;
use std::rc::Rc;

use tempfile::TempPath;

use crate::ipc::{IpcError, Subprocess};

enum GateState {
    Pending {
        process: Subprocess,
        temporaries: Vec<TempPath>,
    },
    Done,
}

/// A one-shot completion point shared by every value a single external
/// invocation produces.
///
/// Cloning the gate shares it: N deferred chunks from one `djvuextract`
/// launch cost one `wait()`, not N. Forcing spends the gate even when the
/// wait reports an error; the child cannot be waited on twice.
#[derive(Clone)]
pub struct CompletionGate(Rc<RefCell<GateState>>);

impl CompletionGate {
    /// Gate on a running process, keeping `temporaries` alive until it ends.
    pub fn new(process: Subprocess, temporaries: Vec<TempPath>) -> Self {
        Self(Rc::new(RefCell::new(GateState::Pending { process, temporaries })))
    }

    /// An already-completed gate.
    pub fn done() -> Self {
        Self(Rc::new(RefCell::new(GateState::Done)))
    }

    /// Wait for the process if it has not been waited on yet.
    pub fn force(&self) -> Result<(), IpcError> {
        let state = std::mem::replace(&mut *self.0.borrow_mut(), GateState::Done);
        match state {
            GateState::Pending { mut process, temporaries } => {
                let outcome = process.wait();
                drop(temporaries);
                outcome
            }
            GateState::Done => Ok(()),
        }
    }

    /// Whether the gate has already been forced.
    pub fn is_done(&self) -> bool {
        matches!(*self.0.borrow(), GateState::Done)
    }
}

/// A value produced by an asynchronous external computation.
///
/// Constructing the proxy does not block. Any access waits for the wrapped
/// process first; after that the proxy is a plain passthrough. Dropping a
/// still-pending proxy waits for the process before releasing the
/// temporaries it was keeping alive.
pub struct Deferred<T> {
    value: Option<T>,
    gate: CompletionGate,
}

impl<T> Deferred<T> {
    /// Defer `value` until `process` has completed, keeping `temporaries`
    /// alive until then.
    pub fn new(value: T, process: Subprocess, temporaries: Vec<TempPath>) -> Self {
        Self::with_gate(value, CompletionGate::new(process, temporaries))
    }

    /// Defer `value` behind an existing (possibly shared) gate.
    pub fn with_gate(value: T, gate: CompletionGate) -> Self {
        Self { value: Some(value), gate }
    }

    /// Wrap an already-complete value.
    pub fn ready(value: T) -> Self {
        Self::with_gate(value, CompletionGate::done())
    }

    /// Force completion and borrow the value.
    pub fn get(&mut self) -> Result<&T, IpcError> {
        self.gate.force()?;
        Ok(self.value.as_ref().expect("value taken only by into_inner"))
    }

    /// Force completion and borrow the value mutably.
    pub fn get_mut(&mut self) -> Result<&mut T, IpcError> {
        self.gate.force()?;
        Ok(self.value.as_mut().expect("value taken only by into_inner"))
    }

    /// Force completion and take the value out of the proxy.
    pub fn into_inner(mut self) -> Result<T, IpcError> {
        self.gate.force()?;
        Ok(self.value.take().expect("value taken only by into_inner"))
    }
}

impl<T> Drop for Deferred<T> {
    fn drop(&mut self) {
        // Let an abandoned computation finish before its inputs vanish.
        let _ = self.gate.force();
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Deferred")
            .field("value", &self.value)
            .field("done", &self.gate.is_done())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::temporary;
    use std::io::Write;

    #[test]
    fn test_ready_passthrough() {
        let mut deferred = Deferred::ready(42);
        assert_eq!(*deferred.get().unwrap(), 42);
        assert_eq!(deferred.into_inner().unwrap(), 42);
    }

    #[test]
    fn test_access_forces_wait() {
        let out = temporary::path(".txt").unwrap();
        let script = format!("printf done > {}", out.display());
        let process = Subprocess::new(&["sh", "-c", script.as_str()]).unwrap();
        let mut deferred = Deferred::new(out, process, Vec::new());
        let path = deferred.get().unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "done");
    }

    #[test]
    fn test_failure_surfaces_once() {
        let mut deferred = Deferred::new((), Subprocess::new(&["false"]).unwrap(), Vec::new());
        assert!(deferred.get().is_err());
        // The gate is spent; the value holder is reachable afterwards.
        assert!(deferred.get().is_ok());
    }

    #[test]
    fn test_temporaries_released_after_completion() {
        let mut input = temporary::file(".pbm").unwrap();
        input.write_all(b"P4 1 1 \x00").unwrap();
        let input_path = input.into_temp_path();
        let location = input_path.to_path_buf();

        let process = Subprocess::new(&["true"]).unwrap();
        let mut deferred = Deferred::new((), process, vec![input_path]);
        assert!(location.exists());
        deferred.get().unwrap();
        assert!(!location.exists());
    }

    #[test]
    fn test_drop_pending_proxy_waits() {
        let out = temporary::path(".txt").unwrap();
        let location = out.to_path_buf();
        let script = format!("printf late > {}", location.display());
        let process = Subprocess::new(&["sh", "-c", script.as_str()]).unwrap();
        drop(Deferred::new(out, process, Vec::new()));
        // The output file is gone (TempPath), but nothing raced its removal.
        assert!(!location.exists());
    }

    #[test]
    fn test_shared_gate_waits_once() {
        let process = Subprocess::new(&["true"]).unwrap();
        let gate = CompletionGate::new(process, Vec::new());
        let mut first = Deferred::with_gate(1, gate.clone());
        let mut second = Deferred::with_gate(2, gate.clone());
        assert!(!gate.is_done());
        assert_eq!(*first.get().unwrap(), 1);
        assert!(gate.is_done());
        assert_eq!(*second.get().unwrap(), 2);
    }
}
