//! Postcom captures the postcodes a board's firmware reports on its serial
//! console during power-on self-test, and makes them available, live, to
//! pollers such as a web page or a test harness.
//!
//! A capture session attaches a terminal emulator (`minicom` by default) to
//! the serial port, strips the terminal control sequences from its output,
//! extracts at most one postcode per line and writes a timestamped transcript
//! of everything it receives. The session ends when the sentinel terminal
//! code (`e3`) has been seen twice, when the console stays quiet for too
//! long after having produced output, when the terminal exits, or when a
//! stop is requested.
//!
//! The [`Supervisor`] holds the single capture session of the service and
//! exposes the `start`, `stop`, `poll` and `clear` operations; the [`Api`]
//! wraps them, together with transcript management, into JSON responses that
//! [`server::serve`] publishes over HTTP.
//!
//! The capture session itself is implemented as a state machine, in terms of
//! **states** and **transitions** between them:
//!
//! * It can only be in one state at any time.
//! * Data shared by all states (the session context) is held by the state
//!   machine, each state holds its own data.
//! * Transitions are triggered via typed **events**, and only the transitions
//!   for which a `From<Event>` implementation exists are possible; any other
//!   is detected at compile-time.
//! * Transitioning from one state to another consumes the original state,
//!   data moves along with the event.

mod api;
mod capture;
mod error;
mod policy;
mod postcode;
mod sanitize;
mod settings;
mod supervisor;
mod transcript;
mod utils;

pub mod server;

pub use api::{
    Api, ErrorResponse, ListResponse, PollResponse, Reply, StartResponse, StartStatus,
    StatusResponse, StopResponse, StopStatus, SuccessResponse, TranscriptResponse,
};
pub use capture::{CaptureSession, SessionShared, StopReason};
pub use error::CaptureError;
pub use policy::{TerminationPolicy, Trigger};
pub use postcode::{extract_postcode, PostcodeRecord};
pub use sanitize::sanitize_line;
pub use settings::{Settings, SettingsBuilder};
pub use supervisor::{SessionStatus, Snapshot, Started, Supervisor};
pub use transcript::{Transcript, TranscriptInfo, TranscriptStore};
