//! Terminal emulator process management.
//!
//! The terminal emulator is started in its own process group: it is usually
//! launched through `sudo` or a shell and forks children of its own, so it is
//! always the whole group that gets signalled, never just the direct child.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use log::{debug, error, info, trace, warn};
use wait_timeout::ChildExt;

use crate::error::CaptureError;
use crate::settings::Settings;

//==============================================================================
// Public Interface
//==============================================================================

/// A running terminal emulator, leader of its own process group.
///
/// Dropping a `TerminalProcess` that is still running kills its group.
#[derive(Debug)]
pub(crate) struct TerminalProcess {
    child: Child,
    pgid: u32,
}
impl TerminalProcess {
    /// Spawn the terminal emulator described by `settings`. Its stdout and
    /// stderr are read line by line by two pump threads and delivered on the
    /// returned channel, which disconnects once both streams are closed.
    pub(crate) fn spawn(settings: &Settings) -> Result<(Self, Receiver<String>), CaptureError> {
        let (program, args) = settings.command_line();
        info!("Starting `{} {}`", program, args.join(" "));

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|source| CaptureError::Spawn {
            program: program.clone(),
            source,
        })?;
        let pgid = child.id();
        info!("Terminal started with PID: {}", pgid);

        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            spawn_line_pump("stdout", stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_pump("stderr", stderr, tx);
        }

        Ok((TerminalProcess { child, pgid }, rx))
    }

    pub(crate) fn pgid(&self) -> u32 {
        self.pgid
    }

    /// Terminate the process group: `SIGTERM`, wait up to `grace`, then
    /// `SIGKILL` and wait up to `grace` again. Returns `false` when the
    /// process could not be reaped.
    pub(crate) fn terminate(&mut self, grace: Duration) -> bool {
        // Stray group members may outlive the leader, signal the group even
        // when the leader is already gone.
        signal_group(self.pgid, GroupSignal::Terminate);
        match self.child.wait_timeout(grace) {
            Ok(Some(status)) => {
                debug!("terminal exited: {}", status);
                return true;
            }
            Ok(None) => {
                warn!(
                    "{}",
                    CaptureError::TerminationTimeout {
                        pgid: self.pgid,
                        waited: grace
                    }
                );
            }
            Err(ref e) => warn!("error waiting for terminal: {}", e),
        }

        signal_group(self.pgid, GroupSignal::Kill);
        let _ = self.child.kill();
        match self.child.wait_timeout(grace) {
            Ok(Some(status)) => {
                debug!("terminal killed: {}", status);
                true
            }
            Ok(None) => {
                error!("terminal process group {} could not be killed", self.pgid);
                false
            }
            Err(ref e) => {
                error!("error waiting for killed terminal: {}", e);
                false
            }
        }
    }
}
impl Drop for TerminalProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            warn!("terminal {} dropped while running, killing it", self.pgid);
            signal_group(self.pgid, GroupSignal::Kill);
            let _ = self.child.kill();
            let _ = self.child.wait_timeout(Duration::from_millis(500));
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum GroupSignal {
    Terminate,
    Kill,
}

/// Send `signal` to every process in group `pgid`. A group that no longer
/// exists is not an error.
#[cfg(unix)]
pub(crate) fn signal_group(pgid: u32, signal: GroupSignal) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let sig = match signal {
        GroupSignal::Terminate => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    match killpg(Pid::from_raw(pgid as i32), sig) {
        Ok(()) => {
            debug!("sent {} to process group {}", sig, pgid);
            true
        }
        Err(Errno::ESRCH) => {
            trace!("process group {} is gone", pgid);
            true
        }
        Err(e) => {
            warn!("failed to send {} to process group {}: {}", sig, pgid, e);
            false
        }
    }
}

#[cfg(not(unix))]
pub(crate) fn signal_group(_pgid: u32, _signal: GroupSignal) -> bool {
    false
}

//==============================================================================
// Private stuff
//==============================================================================

/// Forward each line read from `stream` on `tx`, until end of stream, a read
/// error or the receiving side going away.
fn spawn_line_pump<R>(name: &'static str, stream: R, tx: Sender<String>)
where
    R: Read + Send + 'static,
{
    let spawned = thread::Builder::new()
        .name(format!("terminal-{}", name))
        .spawn(move || {
            let mut reader = BufReader::new(stream);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf).into_owned();
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(ref e) => {
                        debug!("terminal {} read error: {}", name, e);
                        break;
                    }
                }
            }
            trace!("terminal {} closed", name);
        });
    if let Err(e) = spawned {
        error!("could not start the terminal {} reader: {}", name, e);
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::settings::SettingsBuilder;
    use std::time::Instant;

    fn shell(script: &str) -> Settings {
        SettingsBuilder::new().command("sh", ["-c", script]).finalize()
    }

    #[test]
    fn merges_stdout_and_stderr_lines() {
        let (mut process, rx) = TerminalProcess::spawn(&shell("echo out; echo err 1>&2")).unwrap();
        let mut lines: Vec<String> = rx.iter().collect();
        lines.sort();
        assert_eq!(lines, vec!["err\n", "out\n"]);
        assert!(process.terminate(Duration::from_secs(2)));
    }

    #[test]
    fn spawn_failure_is_reported() {
        let settings = SettingsBuilder::new()
            .command("/nonexistent/terminal-emulator", Vec::<String>::new())
            .finalize();
        match TerminalProcess::spawn(&settings) {
            Err(CaptureError::Spawn { program, .. }) => {
                assert_eq!(program, "/nonexistent/terminal-emulator")
            }
            other => panic!("unexpected {:?}", other.map(|(p, _)| p.pgid())),
        }
    }

    #[test]
    fn terminate_kills_the_whole_group() {
        let (mut process, rx) = TerminalProcess::spawn(&shell("sleep 30 & sleep 30")).unwrap();
        let started = Instant::now();
        assert!(process.terminate(Duration::from_secs(2)));
        // Both sleeps held the pipes open; the channel only disconnects once
        // the background one is gone too.
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(5)),
            Err(mpsc::RecvTimeoutError::Disconnected)
        ));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn sigterm_resistant_terminal_is_killed() {
        let (mut process, _rx) =
            TerminalProcess::spawn(&shell("trap '' TERM; while :; do sleep 1; done")).unwrap();
        // Give the shell time to install the trap.
        thread::sleep(Duration::from_millis(300));
        assert!(process.terminate(Duration::from_millis(300)));
    }
}
