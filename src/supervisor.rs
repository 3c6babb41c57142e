//! The capture session supervisor.
//!
//! The supervisor owns the single capture session slot of the service. Start
//! and stop requests are serialized on that slot, so at most one terminal
//! emulator is attached to the serial port at any time, even under rapid
//! repeated starts. Pollers and status queries never wait on the slot: they
//! read the current session's shared state through a separate, briefly held,
//! view.
//!
//! **Example** - Capturing until the session completes:
//! ```no_run
//! use postcom::{SessionStatus, SettingsBuilder, Supervisor};
//!
//! let supervisor = Supervisor::new(SettingsBuilder::new().finalize()).unwrap();
//! supervisor.start().unwrap();
//! loop {
//!     let snapshot = supervisor.poll();
//!     if snapshot.status == SessionStatus::Completed {
//!         println!("{} postcodes", snapshot.records.len());
//!         break;
//!     }
//!     std::thread::sleep(std::time::Duration::from_millis(500));
//! }
//! ```

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{error, info};
use serde::Serialize;

use crate::capture::{self, lock, CaptureSession, SessionShared, StopReason};
use crate::error::CaptureError;
use crate::postcode::PostcodeRecord;
use crate::settings::Settings;
use crate::transcript::TranscriptStore;

// =============================================================================
// Public Interface
// =============================================================================

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
}

/// What a poller sees of the current session.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Snapshot {
    pub status: SessionStatus,
    /// Records since the session start or the last clear, in arrival order.
    pub records: Vec<PostcodeRecord>,
    /// Why the session ended, once it has.
    pub reason: Option<StopReason>,
}

/// A successfully started session.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Started {
    pub id: u64,
    pub pgid: u32,
    pub transcript: Option<PathBuf>,
}

pub struct Supervisor {
    settings: Settings,
    store: TranscriptStore,
    next_id: AtomicU64,
    /// The session slot. Held for the whole of a start or stop.
    active: Mutex<Option<CaptureSession>>,
    /// What pollers read. Only ever held for a copy.
    view: Mutex<View>,
}

#[derive(Debug, Default)]
struct View {
    shared: Option<Arc<SessionShared>>,
    transcript: Option<PathBuf>,
    pgid: Option<u32>,
    /// Number of records hidden by the last `clear`.
    offset: usize,
}

impl Supervisor {
    /// Create a supervisor with no session, making sure the transcript
    /// directory exists.
    pub fn new(settings: Settings) -> Result<Self, CaptureError> {
        fs::create_dir_all(&settings.log_dir)?;
        Ok(Supervisor {
            store: TranscriptStore::new(settings.log_dir.clone()),
            settings,
            next_id: AtomicU64::new(1),
            active: Mutex::new(None),
            view: Mutex::new(View::default()),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn transcripts(&self) -> &TranscriptStore {
        &self.store
    }

    /// Start a new capture session, stopping the current one first if any.
    /// The display buffer starts empty. Returns as soon as the terminal
    /// emulator runs.
    pub fn start(&self) -> Result<Started, CaptureError> {
        let mut active = lock(&self.active);
        if let Some(previous) = active.take() {
            info!("Stopping existing capture session {}", previous.id());
            previous.shutdown(self.settings.join_timeout);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let shared = Arc::new(SessionShared::new());
        {
            let mut view = lock(&self.view);
            *view = View {
                shared: Some(Arc::clone(&shared)),
                transcript: None,
                pgid: None,
                offset: 0,
            };
        }

        match capture::launch(id, self.settings.clone(), shared) {
            Ok(session) => {
                let started = Started {
                    id,
                    pgid: session.pgid(),
                    transcript: session.transcript().map(|p| p.to_owned()),
                };
                {
                    let mut view = lock(&self.view);
                    view.transcript = started.transcript.clone();
                    view.pgid = Some(started.pgid);
                }
                info!("Capture session {} started", id);
                *active = Some(session);
                Ok(started)
            }
            Err(e) => {
                error!("Capture session {} failed to start: {}", id, e);
                Err(e)
            }
        }
    }

    /// Stop the active session. Returns `false` when there was none.
    pub fn stop(&self) -> bool {
        let mut active = lock(&self.active);
        match active.take() {
            Some(session) => session.shutdown(self.settings.join_timeout),
            None => false,
        }
    }

    /// A copy of the display buffer and the session status. Never waits on
    /// a start or a stop in progress.
    pub fn poll(&self) -> Snapshot {
        let (shared, offset) = {
            let view = lock(&self.view);
            (view.shared.clone(), view.offset)
        };
        match shared {
            Some(shared) => {
                // Records are all in once done is seen, read it first.
                let done = shared.is_done();
                Snapshot {
                    status: if done {
                        SessionStatus::Completed
                    } else {
                        SessionStatus::Running
                    },
                    records: shared.records_from(offset),
                    reason: if done { shared.reason() } else { None },
                }
            }
            None => Snapshot {
                status: SessionStatus::Completed,
                records: Vec::new(),
                reason: None,
            },
        }
    }

    /// Empty the display buffer. The session, its records and its
    /// transcript are not affected.
    pub fn clear(&self) {
        let mut guard = lock(&self.view);
        let view = &mut *guard;
        if let Some(shared) = &view.shared {
            view.offset = shared.len();
        }
    }

    /// Whether the current session is still capturing. Never waits on a
    /// start or a stop in progress.
    pub fn is_running(&self) -> bool {
        lock(&self.view)
            .shared
            .as_ref()
            .map_or(false, |shared| !shared.is_done())
    }

    /// Process group of the running session's terminal emulator.
    pub fn active_pgid(&self) -> Option<u32> {
        let view = lock(&self.view);
        match &view.shared {
            Some(shared) if !shared.is_done() => view.pgid,
            _ => None,
        }
    }

    /// Transcript of the current, or last, session.
    pub fn current_transcript(&self) -> Option<PathBuf> {
        lock(&self.view).transcript.clone()
    }
}
impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingsBuilder;
    use tempfile::TempDir;

    fn supervisor(dir: &std::path::Path) -> Supervisor {
        Supervisor::new(
            SettingsBuilder::new()
                .log_dir(dir)
                .command("/nonexistent/minicom", Vec::<String>::new())
                .finalize(),
        )
        .unwrap()
    }

    #[test]
    fn poll_without_session() {
        let tmp = TempDir::new().unwrap();
        let supervisor = supervisor(tmp.path());
        let snapshot = supervisor.poll();
        assert_eq!(snapshot.status, SessionStatus::Completed);
        assert!(snapshot.records.is_empty());
        assert_eq!(snapshot, supervisor.poll());
    }

    #[test]
    fn stop_without_session() {
        let tmp = TempDir::new().unwrap();
        let supervisor = supervisor(tmp.path());
        assert!(!supervisor.stop());
        assert!(!supervisor.is_running());
        assert_eq!(supervisor.active_pgid(), None);
    }

    #[test]
    fn creates_the_log_dir() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("logs");
        let supervisor = supervisor(&dir);
        assert!(dir.is_dir());
        assert_eq!(supervisor.transcripts().dir(), dir.as_path());
    }

    #[test]
    fn failed_start_leaves_no_active_session() {
        let tmp = TempDir::new().unwrap();
        let supervisor = supervisor(tmp.path());
        assert!(matches!(
            supervisor.start(),
            Err(CaptureError::Spawn { .. })
        ));
        assert!(!supervisor.is_running());
        assert!(!supervisor.stop());

        let snapshot = supervisor.poll();
        assert_eq!(snapshot.status, SessionStatus::Completed);
        assert_eq!(snapshot.reason, Some(StopReason::SpawnFailed));
    }
}
