//! Events for the `postcom` capture session state machine.
//!
//! This modules is private and restricted to the [`capture`](crate::capture)
//! scope. The public interface of the session is provided by
//! [`capture`](crate::capture).
//!
//! Refer to the [`state_machine`](super::state_machine) module for an overview
//! of states, events and transitions.

use std::sync::mpsc::Receiver;
use std::sync::Arc;

use super::shared::{SessionShared, StopReason};
use crate::error::CaptureError;
use crate::settings::Settings;
use crate::transcript::Transcript;
use crate::utils::TerminalProcess;

/// Data shared by all states of one session.
#[derive(Debug, Clone)]
pub(crate) struct SessionContext {
    pub id: u64,
    pub settings: Settings,
    pub shared: Arc<SessionShared>,
}

// =============================================================================
// Crate-Public Interface
// =============================================================================

// SpawnedEvent ================================================================

/// Event fired from the `Starting` state once the terminal emulator runs and
/// its output is being pumped. Triggers the transition to the `Running`
/// state, which takes over the process, the transcript and the line channel.
#[derive(Debug)]
pub(crate) struct SpawnedEvent {
    pub ctx: SessionContext,
    pub process: TerminalProcess,
    /// `None` when the transcript could not be created; the session then
    /// captures in memory only.
    pub transcript: Option<Transcript>,
    pub lines: Receiver<String>,
}

// StopEvent ===================================================================

/// Event fired from the `Running` state when the capture loop exits, for
/// whatever `reason`. Triggers the transition to the `Stopping` state.
#[derive(Debug)]
pub(crate) struct StopEvent {
    pub ctx: SessionContext,
    pub process: TerminalProcess,
    pub transcript: Option<Transcript>,
    pub reason: StopReason,
}

// TerminateEvent ==============================================================

/// Event fired once the terminal process group has been dealt with, or
/// directly from the `Starting` state when the terminal could not be started.
/// Triggers the transition to the `Terminated` state.
#[derive(Debug)]
pub(crate) struct TerminateEvent {
    pub ctx: SessionContext,
    pub transcript: Option<Transcript>,
    pub reason: StopReason,
    pub failure: Option<CaptureError>,
}

// ExitEvent ===================================================================

/// The last event of a session. The state machine event loop terminates,
/// handing back the stop reason to the caller that started it.
#[derive(Debug)]
pub(crate) struct ExitEvent {
    pub ctx: SessionContext,
    pub reason: StopReason,
}

// Events enum ==================================================================

/// Events that can be triggered within the capture session state machine.
#[derive(Debug)]
pub(crate) enum Event {
    Spawned(SpawnedEvent),
    Stop(StopEvent),
    Terminate(TerminateEvent),
    Exit(ExitEvent),
}
