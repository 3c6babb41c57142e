//! States for the `postcom` capture session state machine.
//!
//! This modules is private and restricted to the [`capture`](crate::capture)
//! scope. The public interface of the session is provided by
//! [`capture`](crate::capture).
//!
//! Refer to the [`state_machine`](super::state_machine) module for an overview
//! of states, events and transitions.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Instant;

use chrono::Local;
use hexplay::HexViewBuilder;
use log::{debug, error, info, log_enabled, trace, warn, Level::Trace};

use super::events::*;
use super::shared::StopReason;
use crate::error::CaptureError;
use crate::policy::{TerminationPolicy, Trigger};
use crate::postcode::{extract_postcode, PostcodeRecord};
use crate::sanitize::sanitize_line;
use crate::transcript::Transcript;
use crate::utils::TerminalProcess;

// =============================================================================
// Crate-Public Interface
// =============================================================================

/// Trait adding the ability for a state to be `run` after a transition into it.
pub(crate) trait Runnable {
    /// A state implements this method so it can be `run` after the state
    /// machine transitions into it.
    ///
    /// During this call, the state does its work and, when finished, requests
    /// a transition to a `new state` by returning the appropriate `event`. The
    /// `event` is consumed to create the `new state` using the corresponding
    /// [`From`] trait implementation.
    fn run(&mut self, ctx: &SessionContext) -> Event;
}

// Starting State ==============================================================

/// The initial state of a capture session.
///
///  * **[`SpawnedEvent`] => [`RunningState`]** once the terminal emulator
///    runs,
///  * **[`TerminateEvent`] => [`TerminatedState`]** when it could not be
///    started.
#[derive(Debug)]
pub(crate) struct StartingState {}
impl Runnable for StartingState {
    fn run(&mut self, ctx: &SessionContext) -> Event {
        info!("=> Starting");

        match TerminalProcess::spawn(&ctx.settings) {
            Ok((process, lines)) => {
                // Losing the transcript is not fatal, postcodes are still
                // captured in memory.
                let transcript = match Transcript::create(&ctx.settings, Local::now()) {
                    Ok(transcript) => {
                        info!("Log file: {}", transcript.path().display());
                        Some(transcript)
                    }
                    Err(ref e) => {
                        error!("transcript unavailable, capturing in memory only: {}", e);
                        None
                    }
                };
                Event::Spawned(SpawnedEvent {
                    ctx: ctx.clone(),
                    process,
                    transcript,
                    lines,
                })
            }
            Err(e) => {
                error!("{}", e);
                Event::Terminate(TerminateEvent {
                    ctx: ctx.clone(),
                    transcript: None,
                    reason: StopReason::SpawnFailed,
                    failure: Some(e),
                })
            }
        }
    }
}

// Running State ===============================================================

/// The capture loop. Lines are received from the terminal output pumps, then
/// sanitized, written to the transcript and parsed for a postcode. The
/// termination policy is evaluated after every line and on every idle tick,
/// and the stop flag is checked before each wait.
///
///  * **[`StopEvent`] => [`StoppingState`]** when the policy fires, a stop is
///    requested or the terminal output closes.
pub(crate) struct RunningState {
    /// Consumed and moved upon the transition to [`StoppingState`].
    pub process: Option<TerminalProcess>,
    pub transcript: Option<Transcript>,
    /// Dropped when leaving the state, which lets the pumps exit.
    pub lines: Option<Receiver<String>>,
    pub policy: TerminationPolicy,
}
impl Runnable for RunningState {
    fn run(&mut self, ctx: &SessionContext) -> Event {
        info!("=> Running");

        if let (Some(process), Some(lines)) = (self.process.take(), self.lines.take()) {
            let reason = loop {
                if ctx.shared.stop_requested() {
                    info!("Stop requested");
                    break StopReason::Requested;
                }
                match lines.recv_timeout(ctx.settings.idle_tick) {
                    Ok(raw) => {
                        if let Some(trigger) = self.process_line(ctx, &raw) {
                            break trigger.into();
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => (),
                    Err(RecvTimeoutError::Disconnected) => {
                        info!("Terminal output closed");
                        break StopReason::ProcessExited;
                    }
                }
                // Blank lines keep the channel busy without counting as
                // activity, check on every pass.
                if let Some(trigger) = self.policy.check_idle(Instant::now()) {
                    info!(
                        "[TIMEOUT] {:?} of inactivity",
                        ctx.settings.inactivity_timeout
                    );
                    break trigger.into();
                }
            };
            if self.policy.fired().is_some() {
                ctx.shared.set_reason(reason);
                ctx.shared.request_stop();
            }

            return Event::Stop(StopEvent {
                ctx: ctx.clone(),
                process,
                transcript: self.transcript.take(),
                reason,
            });
        }

        // We should never reach here!
        unreachable!()
    }
}
impl RunningState {
    /// Handle one raw line from the terminal. Returns the policy trigger if
    /// the line ends the session.
    fn process_line(&mut self, ctx: &SessionContext, raw: &str) -> Option<Trigger> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        if log_enabled!(Trace) {
            let view = HexViewBuilder::new(raw.as_bytes())
                .address_offset(0)
                .row_width(16)
                .finish();
            trace!("\n{}", view);
        }

        let line = sanitize_line(raw);
        let timestamp = Local::now().format("%H:%M:%S").to_string();
        debug!("[TERMINAL] {}", line);

        // The line is on disk before its postcode becomes visible.
        let failed = match self.transcript.as_mut() {
            Some(transcript) => transcript.write_line(&timestamp, &line).err(),
            None => None,
        };
        if let Some(ref e) = failed {
            error!("transcript write failed, capturing in memory only: {}", e);
            self.transcript = None;
        }

        let code = extract_postcode(&line);
        if let Some(code) = &code {
            ctx.shared.push(PostcodeRecord {
                code: code.clone(),
                timestamp,
                raw_line: line.into_owned(),
            });
        }
        self.policy.observe_line(code.as_deref(), Instant::now())
    }
}
impl std::fmt::Debug for RunningState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningState")
            .field("pgid", &self.process.as_ref().map(TerminalProcess::pgid))
            .field("transcript", &self.transcript.as_ref().map(Transcript::path))
            .field("policy", &self.policy)
            .finish()
    }
}

impl From<Trigger> for StopReason {
    fn from(trigger: Trigger) -> Self {
        match trigger {
            Trigger::TerminalCode => StopReason::TerminalCode,
            Trigger::Inactivity => StopReason::Inactivity,
        }
    }
}

// Stopping State ==============================================================

/// Terminates the terminal emulator's process group: `SIGTERM`, a bounded
/// wait, then `SIGKILL`.
///
///  * **[`TerminateEvent`] => [`TerminatedState`]** always, a process that
///    could not be killed is reported but does not block the session end.
#[derive(Debug)]
pub(crate) struct StoppingState {
    /// Consumed when the process has been terminated.
    pub process: Option<TerminalProcess>,
    pub transcript: Option<Transcript>,
    pub reason: StopReason,
}
impl Runnable for StoppingState {
    fn run(&mut self, ctx: &SessionContext) -> Event {
        info!("=> Stopping ({})", self.reason);

        if let Some(mut process) = self.process.take() {
            if !process.terminate(ctx.settings.termination_grace) {
                error!(
                    "terminal process group {} may have been leaked",
                    process.pgid()
                );
            }

            return Event::Terminate(TerminateEvent {
                ctx: ctx.clone(),
                transcript: self.transcript.take(),
                reason: self.reason,
                failure: None,
            });
        }

        // We should never reach here!
        unreachable!()
    }
}

// Terminated State ============================================================

/// Reached when the session is over, normally or not.
///
/// Like the other final states, it runs in two phases. During the first one
/// it writes the transcript footer, records the stop reason and raises the
/// done flag. It then triggers the [`ExitEvent`] to make the state machine
/// event loop exit.
#[derive(Debug)]
pub(crate) struct TerminatedState {
    pub transcript: Option<Transcript>,
    pub reason: StopReason,
    /// Set when the session never started; taken by the launcher to report
    /// it to the caller.
    pub failure: Option<CaptureError>,
    /// When `true` instructs the state machine to exit its event loop.
    pub should_exit: bool,
}
impl Runnable for TerminatedState {
    fn run(&mut self, ctx: &SessionContext) -> Event {
        info!("=> Terminated ({})", self.reason);
        if let Some(ref failure) = self.failure {
            warn!("session {} failed: {}", ctx.id, failure);
        }

        let total = ctx.shared.len();
        if let Some(transcript) = self.transcript.take() {
            let path = transcript.path().to_owned();
            if let Err(ref e) = transcript.finish(Local::now(), total) {
                error!("could not finish transcript {}: {}", path.display(), e);
            }
        }
        info!("Session ended. Total postcodes: {}", total);

        ctx.shared.set_reason(self.reason);
        ctx.shared.mark_done();

        Event::Exit(ExitEvent {
            ctx: ctx.clone(),
            reason: self.reason,
        })
    }
}
