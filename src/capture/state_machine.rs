//! Capture session lifecycle.
//!
//! A session only ever moves forward, there is no resume. The `Starting`
//! state runs in the caller's thread so that a terminal that cannot be
//! started is reported right away, and leaves no session behind. The other
//! states run in a dedicated thread, which is the only owner of the terminal
//! process and of the transcript.
//!
//! ```text
//!                  START
//!                    |
//!                    v
//!              .----------.
//!              | Starting |------------------.
//!              '----------'                  |
//!                    |                     spawn
//!                 spawned                  failed
//!                    v                       |
//!              .----------.                  |
//!              | Running  |                  |
//!              '----------'                  |
//!                    |                       |
//!         terminal code / inactivity /       |
//!         stop requested / output closed     |
//!                    v                       |
//!              .----------.                  |
//!              | Stopping |                  |
//!              '----------'                  |
//!                    |                       |
//!                group reaped                |
//!                    v                       |
//!             .------------.                 |
//!             | Terminated |<----------------'
//!             '------------'
//!                    |
//!                    v
//!                   END
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use super::events::*;
use super::shared::{DoneOnDrop, SessionShared, StopReason};
use super::states::*;
use crate::error::CaptureError;
use crate::policy::TerminationPolicy;
use crate::settings::Settings;
use crate::utils::{signal_group, GroupSignal};

// =============================================================================
// Public Interface
// =============================================================================

/// Handle on a launched capture session.
///
/// The handle never touches the terminal process itself, it only asks the
/// session thread to stop and, as a last resort, kills the process group.
#[derive(Debug)]
pub struct CaptureSession {
    id: u64,
    pgid: u32,
    transcript: Option<PathBuf>,
    shared: Arc<SessionShared>,
    thread: Option<JoinHandle<()>>,
}
impl CaptureSession {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Process group id of the terminal emulator.
    pub fn pgid(&self) -> u32 {
        self.pgid
    }

    /// The transcript file, unless it could not be created.
    pub fn transcript(&self) -> Option<&Path> {
        self.transcript.as_deref()
    }

    /// Whether the session thread is still running.
    pub fn is_active(&self) -> bool {
        self.thread
            .as_ref()
            .map_or(false, |thread| !thread.is_finished())
    }

    /// Stop the session and wait up to `join_timeout` for its thread. When
    /// the thread does not finish in time, the process group is killed and
    /// the thread is given `join_timeout` once more before it is abandoned.
    ///
    /// Returns `true` when the session was still active.
    pub fn shutdown(mut self, join_timeout: Duration) -> bool {
        let was_active = self.is_active();
        let thread = match self.thread.take() {
            Some(thread) => thread,
            None => return false,
        };
        if was_active {
            info!("Stopping capture session {}", self.id);
            self.shared.request_stop();
        }

        if !wait_finished(&thread, join_timeout) {
            warn!(
                "capture session {} did not stop within {:?}, killing process group {}",
                self.id, join_timeout, self.pgid
            );
            signal_group(self.pgid, GroupSignal::Kill);
            if !wait_finished(&thread, join_timeout) {
                error!(
                    "capture session {} is stuck, process group {} may have been leaked",
                    self.id, self.pgid
                );
                self.shared.set_reason(StopReason::Requested);
                self.shared.mark_done();
                return was_active;
            }
        }
        if thread.join().is_err() {
            error!("capture session {} thread panicked", self.id);
        }
        was_active
    }
}
impl Drop for CaptureSession {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.shared.request_stop();
        }
    }
}

/// Launch a capture session with the given `settings`, reporting into
/// `shared`. Returns once the terminal emulator runs; the capture itself
/// proceeds in a background thread.
pub(crate) fn launch(
    id: u64,
    settings: Settings,
    shared: Arc<SessionShared>,
) -> Result<CaptureSession, CaptureError> {
    let ctx = SessionContext {
        id,
        settings,
        shared: Arc::clone(&shared),
    };
    let mut sm = CaptureStates::Starting(CaptureSM::new(ctx));
    sm = sm.step();

    let failure = match &mut sm {
        CaptureStates::Terminated(inner) => inner.state.failure.take(),
        _ => None,
    };
    if let Some(failure) = failure {
        CaptureMachine { sm }.run();
        return Err(failure);
    }

    let (pgid, transcript) = match &sm {
        CaptureStates::Running(inner) => (
            inner.state.process.as_ref().map_or(0, |p| p.pgid()),
            inner
                .state
                .transcript
                .as_ref()
                .map(|t| t.path().to_owned()),
        ),
        _ => unreachable!("session {} not running after start", id),
    };

    let guard_shared = Arc::clone(&shared);
    let thread = thread::Builder::new()
        .name(format!("capture-{}", id))
        .spawn(move || {
            let _done = DoneOnDrop(guard_shared);
            let reason = CaptureMachine { sm }.run();
            debug!("capture session {} finished: {}", id, reason);
        })
        .map_err(|e| {
            shared.set_reason(StopReason::SpawnFailed);
            shared.mark_done();
            CaptureError::Io(e)
        })?;

    Ok(CaptureSession {
        id,
        pgid,
        transcript,
        shared,
        thread: Some(thread),
    })
}

// =============================================================================
// Private stuff
// =============================================================================

fn wait_finished(thread: &JoinHandle<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !thread.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(20));
    }
    true
}

/// Runs the state machine event loop until the `Terminated` state is reached
/// and its `should_exit` flag is set, then returns the stop reason.
struct CaptureMachine {
    sm: CaptureStates,
}
impl CaptureMachine {
    fn run(&mut self) -> StopReason {
        loop {
            if let CaptureStates::Terminated(sm) = &self.sm {
                if sm.state.should_exit {
                    return sm.state.reason;
                }
            }
            self.sm = self.sm.step();
        }
    }
}

/// The raw capture session state machine. Using a generic type that holds
/// the current state lets all states share the session context, and shows
/// both when debugging.
#[derive(Debug)]
struct CaptureSM<S: Runnable> {
    ctx: SessionContext,
    state: S,
}
impl<S: Runnable> CaptureSM<S> {
    fn run(&mut self) -> Event {
        self.state.run(&self.ctx)
    }
}

/// The state machine starts in the `StartingState`.
impl CaptureSM<StartingState> {
    fn new(ctx: SessionContext) -> Self {
        CaptureSM {
            ctx,
            state: StartingState {},
        }
    }
}

/// An enum wrapper around the states of the capture session state machine,
/// used for pattern matching during state transitions.
#[derive(Debug)]
enum CaptureStates {
    Starting(CaptureSM<StartingState>),
    Running(CaptureSM<RunningState>),
    Stopping(CaptureSM<StoppingState>),
    Terminated(CaptureSM<TerminatedState>),
}
impl CaptureStates {
    /// The unit of work in the state machine event loop: run the current
    /// state and transition according to the event it returns. Any other
    /// combination of state and event is a bug.
    fn step(&mut self) -> Self {
        match self {
            CaptureStates::Starting(sm) => {
                let event = sm.run();
                match event {
                    Event::Spawned(ev) => CaptureStates::Running(ev.into()),
                    Event::Terminate(ev) => CaptureStates::Terminated(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            CaptureStates::Running(sm) => {
                let event = sm.run();
                match event {
                    Event::Stop(ev) => CaptureStates::Stopping(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            CaptureStates::Stopping(sm) => {
                let event = sm.run();
                match event {
                    Event::Terminate(ev) => CaptureStates::Terminated(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
            CaptureStates::Terminated(sm) => {
                let event = sm.run();
                match event {
                    Event::Exit(ev) => CaptureStates::Terminated(ev.into()),
                    _ => unreachable!("illegal event {:#?} at current state {:#?}", event, sm),
                }
            }
        }
    }
}

// -----------------------------------------------------------------------------
// State from Event transitions
// -----------------------------------------------------------------------------

impl From<SpawnedEvent> for CaptureSM<RunningState> {
    fn from(event: SpawnedEvent) -> CaptureSM<RunningState> {
        let policy = TerminationPolicy::new(&event.ctx.settings);
        CaptureSM {
            ctx: event.ctx,
            state: RunningState {
                process: Some(event.process),
                transcript: event.transcript,
                lines: Some(event.lines),
                policy,
            },
        }
    }
}

impl From<StopEvent> for CaptureSM<StoppingState> {
    fn from(event: StopEvent) -> CaptureSM<StoppingState> {
        CaptureSM {
            ctx: event.ctx,
            state: StoppingState {
                process: Some(event.process),
                transcript: event.transcript,
                reason: event.reason,
            },
        }
    }
}

impl From<TerminateEvent> for CaptureSM<TerminatedState> {
    fn from(event: TerminateEvent) -> CaptureSM<TerminatedState> {
        CaptureSM {
            ctx: event.ctx,
            state: TerminatedState {
                transcript: event.transcript,
                reason: event.reason,
                failure: event.failure,
                should_exit: false,
            },
        }
    }
}
impl From<ExitEvent> for CaptureSM<TerminatedState> {
    fn from(event: ExitEvent) -> CaptureSM<TerminatedState> {
        CaptureSM {
            ctx: event.ctx,
            state: TerminatedState {
                transcript: None,
                reason: event.reason,
                failure: None,
                should_exit: true,
            },
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
