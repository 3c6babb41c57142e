//! `postcom` capture sessions.
//!
//! A capture session attaches a terminal emulator to the serial console,
//! cleans and parses its output line by line, records the postcodes it finds
//! and writes a transcript, until the termination policy fires, the terminal
//! exits or a stop is requested.
//!
//! **Example** - Launching a session and waiting for it to finish:
//! ```ignore
//! let shared = Arc::new(SessionShared::new());
//! let session = capture::launch(1, settings, Arc::clone(&shared))?;
//! while !shared.is_done() {
//!     thread::sleep(Duration::from_millis(500));
//! }
//! session.shutdown(Duration::from_secs(3));
//! ```

mod events;
mod shared;
mod state_machine;
mod states;

pub(crate) use shared::lock;
pub use shared::{SessionShared, StopReason};
pub use state_machine::CaptureSession;
pub(crate) use state_machine::launch;
