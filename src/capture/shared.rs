//! State shared between a capture session's thread and its observers.
//!
//! The capture thread is the only writer of the records; observers take
//! snapshot copies under the same lock. The stop and done flags are atomics
//! and can be read without the lock.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;
use serde::Serialize;

use crate::postcode::PostcodeRecord;

/// Why a capture session ended.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The sentinel terminal code was received often enough.
    TerminalCode,
    /// The console went quiet for longer than the inactivity timeout.
    Inactivity,
    /// A stop was requested by a caller.
    Requested,
    /// The terminal emulator exited, or closed its output, on its own.
    ProcessExited,
    /// The terminal emulator could not be started.
    SpawnFailed,
}
impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::TerminalCode => "terminal_code",
            StopReason::Inactivity => "inactivity",
            StopReason::Requested => "requested",
            StopReason::ProcessExited => "process_exited",
            StopReason::SpawnFailed => "spawn_failed",
        }
    }
}
impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
pub struct SessionShared {
    records: Mutex<Vec<PostcodeRecord>>,
    reason: Mutex<Option<StopReason>>,
    stop: AtomicBool,
    done: AtomicBool,
}
impl SessionShared {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record. Records are never removed nor modified.
    pub(crate) fn push(&self, record: PostcodeRecord) {
        lock(&self.records).push(record);
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A copy of the records, starting at index `offset`.
    pub fn records_from(&self, offset: usize) -> Vec<PostcodeRecord> {
        lock(&self.records)
            .get(offset..)
            .map(<[PostcodeRecord]>::to_vec)
            .unwrap_or_default()
    }

    /// Ask the capture loop to exit. Idempotent.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Mark the session as finished. Only the first call has an effect.
    pub(crate) fn mark_done(&self) {
        if !self.done.swap(true, Ordering::SeqCst) {
            debug!("session marked done");
        }
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Record why the session ended. The first reason sticks.
    pub(crate) fn set_reason(&self, reason: StopReason) {
        lock(&self.reason).get_or_insert(reason);
    }

    pub fn reason(&self) -> Option<StopReason> {
        *lock(&self.reason)
    }
}

/// Marks a session done when dropped, whichever way its thread exits.
pub(crate) struct DoneOnDrop(pub(crate) Arc<SessionShared>);
impl Drop for DoneOnDrop {
    fn drop(&mut self) {
        self.0.mark_done();
    }
}

/// Lock `mutex`, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(code: &str) -> PostcodeRecord {
        PostcodeRecord {
            code: code.into(),
            timestamp: "12:00:00".into(),
            raw_line: code.into(),
        }
    }

    #[test]
    fn records_keep_arrival_order() {
        let shared = SessionShared::new();
        for code in ["e3", "a1", "e3"] {
            shared.push(record(code));
        }
        let codes: Vec<String> = shared.records_from(0).into_iter().map(|r| r.code).collect();
        assert_eq!(codes, vec!["e3", "a1", "e3"]);
        assert_eq!(shared.records_from(2), vec![record("e3")]);
        assert!(shared.records_from(3).is_empty());
        assert!(shared.records_from(10).is_empty());
    }

    #[test]
    fn first_reason_sticks() {
        let shared = SessionShared::new();
        assert_eq!(shared.reason(), None);
        shared.set_reason(StopReason::TerminalCode);
        shared.set_reason(StopReason::Requested);
        assert_eq!(shared.reason(), Some(StopReason::TerminalCode));
    }

    #[test]
    fn done_on_drop() {
        let shared = Arc::new(SessionShared::new());
        {
            let _guard = DoneOnDrop(Arc::clone(&shared));
            assert!(!shared.is_done());
        }
        assert!(shared.is_done());
    }

    #[test]
    fn done_survives_a_panicking_thread() {
        let shared = Arc::new(SessionShared::new());
        let guard_shared = Arc::clone(&shared);
        let result = std::thread::spawn(move || {
            let _guard = DoneOnDrop(guard_shared);
            panic!("reader failure");
        })
        .join();
        assert!(result.is_err());
        assert!(shared.is_done());
    }

    #[test]
    fn stop_reason_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&StopReason::ProcessExited).unwrap(),
            "\"process_exited\""
        );
        assert_eq!(StopReason::TerminalCode.to_string(), "terminal_code");
    }
}
