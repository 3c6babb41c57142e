//! Settings related to the serial console, the terminal emulator used to
//! attach to it and the capture session termination policy.
//!
//! Use the [builder](https://doc.rust-lang.org/1.0.0/style/ownership/builders.html)
//! pattern to set the configurable values.

use std::path::PathBuf;
use std::time::Duration;

// =============================================================================
// Public Interface
// =============================================================================

/// Groups all settings used by `postcom` and its capture sessions. Instances
/// are only created through the [`SettingsBuilder`].
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Settings {
    /// The serial port name, usually the device path.
    pub port: String,
    /// The baud rate in symbols-per-second.
    pub baud_rate: u32,
    /// Directory where the session transcripts are written.
    pub log_dir: PathBuf,

    /// The terminal emulator program attached to the serial port.
    pub program: String,
    /// Arguments passed to the terminal emulator. The placeholders `{port}`
    /// and `{baud}` are replaced with the corresponding settings values.
    pub args: Vec<String>,

    /// The postcode value reported by the firmware at the end of the test.
    pub terminal_code: String,
    /// How many times the terminal code must be seen before the session
    /// stops. The occurrences do not need to be consecutive.
    pub terminal_code_limit: u32,
    /// Stop the session after this long without any output, once some output
    /// has been received.
    pub inactivity_timeout: Duration,
    /// Wake-up period of the capture loop when no line is available.
    pub idle_tick: Duration,
    /// How long the terminal process group gets to exit after `SIGTERM`
    /// before it is killed.
    pub termination_grace: Duration,
    /// Upper bound for waiting on a capture thread to finish.
    pub join_timeout: Duration,
    /// Time given to a freshly started session before `start` is answered,
    /// so that early failures can be reported.
    pub start_grace: Duration,

    /// Restrict creation of `Settings` instances unless through the
    /// `SettingsBuilder`.
    #[doc(hidden)]
    _private_use_builder: (),
}
impl Settings {
    /// The terminal program and its arguments with the placeholders expanded.
    pub fn command_line(&self) -> (String, Vec<String>) {
        let baud = self.baud_rate.to_string();
        let args = self
            .args
            .iter()
            .map(|arg| arg.replace("{port}", &self.port).replace("{baud}", &baud))
            .collect();
        (self.program.clone(), args)
    }
}

/// The builder for the `Settings` values.
///
/// All values are optional and have default values that will be used if not
/// explicitly set.
///
/// **Example**
///
/// ```
/// use postcom::SettingsBuilder;
///
/// let settings = SettingsBuilder::new().port("/dev/ttyUSB0").finalize();
/// assert_eq!(settings.port, "/dev/ttyUSB0");
/// ```
pub struct SettingsBuilder {
    settings: Settings,
}
impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
impl SettingsBuilder {
    /// Start building the settings using default values.
    pub fn new() -> Self {
        SettingsBuilder {
            settings: Settings {
                port: "/dev/ttyAMA0".into(),
                baud_rate: 115_200,
                log_dir: PathBuf::from("postcode_logs"),
                program: "minicom".into(),
                args: ["-b", "{baud}", "-o", "-D", "{port}"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                terminal_code: "e3".into(),
                terminal_code_limit: 2,
                inactivity_timeout: Duration::from_secs(60),
                idle_tick: Duration::from_millis(200),
                termination_grace: Duration::from_secs(2),
                join_timeout: Duration::from_secs(3),
                start_grace: Duration::from_secs(1),
                _private_use_builder: (),
            },
        }
    }

    /// Set the path to the serial port
    pub fn port<'a>(mut self, port: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.port = port.into().into_owned();
        self
    }

    /// Set the baud rate in symbols-per-second
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.settings.baud_rate = baud_rate;
        self
    }

    /// Set the directory where transcripts are stored
    pub fn log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.settings.log_dir = log_dir.into();
        self
    }

    /// Set the terminal program and its argument templates
    pub fn command<I, S>(mut self, program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.settings.program = program.into();
        self.settings.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the terminal command from a single whitespace separated template,
    /// such as `sudo minicom -b {baud} -o -D {port}`. An empty template keeps
    /// the current command.
    pub fn command_template(self, template: &str) -> Self {
        let mut words = template.split_whitespace();
        match words.next() {
            Some(program) => {
                let args: Vec<&str> = words.collect();
                self.command(program, args)
            }
            None => self,
        }
    }

    /// Set the postcode value signalling the end of the test
    pub fn terminal_code<'a>(mut self, code: impl Into<std::borrow::Cow<'a, str>>) -> Self {
        self.settings.terminal_code = code.into().to_lowercase();
        self
    }

    /// Set how many terminal codes end the session
    pub fn terminal_code_limit(mut self, limit: u32) -> Self {
        self.settings.terminal_code_limit = limit;
        self
    }

    /// Set the inactivity timeout
    pub fn inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.settings.inactivity_timeout = timeout;
        self
    }

    /// Set the wake-up period of the capture loop
    pub fn idle_tick(mut self, tick: Duration) -> Self {
        self.settings.idle_tick = tick;
        self
    }

    /// Set the grace period between `SIGTERM` and `SIGKILL`
    pub fn termination_grace(mut self, grace: Duration) -> Self {
        self.settings.termination_grace = grace;
        self
    }

    /// Set the upper bound for joining a capture thread
    pub fn join_timeout(mut self, timeout: Duration) -> Self {
        self.settings.join_timeout = timeout;
        self
    }

    /// Set the grace period observed after starting a session
    pub fn start_grace(mut self, grace: Duration) -> Self {
        self.settings.start_grace = grace;
        self
    }

    pub fn finalize(self) -> Settings {
        self.settings
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[test]
fn all_default() {
    let settings = SettingsBuilder::new().finalize();
    assert_eq!(settings.port, "/dev/ttyAMA0");
    assert_eq!(settings.baud_rate, 115_200);
    assert_eq!(settings.log_dir, PathBuf::from("postcode_logs"));
    assert_eq!(settings.terminal_code, "e3");
    assert_eq!(settings.terminal_code_limit, 2);
    assert_eq!(settings.inactivity_timeout, Duration::from_secs(60));
    assert_eq!(settings.program, "minicom");
}

#[test]
fn port() {
    let settings = SettingsBuilder::new().port("/dev/ttyUSB0").finalize();
    assert_eq!(settings.port, "/dev/ttyUSB0");
}

#[test]
fn baud_rate() {
    let baud_rate = 9_600;
    let settings = SettingsBuilder::new().baud_rate(baud_rate).finalize();
    assert_eq!(settings.baud_rate, baud_rate);
}

#[test]
fn terminal_code_is_lowercased() {
    let settings = SettingsBuilder::new().terminal_code("E3").finalize();
    assert_eq!(settings.terminal_code, "e3");
}

#[test]
fn default_command_line_expands_placeholders() {
    let settings = SettingsBuilder::new()
        .port("/dev/ttyS1")
        .baud_rate(57_600)
        .finalize();
    let (program, args) = settings.command_line();
    assert_eq!(program, "minicom");
    assert_eq!(args, vec!["-b", "57600", "-o", "-D", "/dev/ttyS1"]);
}

#[test]
fn command_template() {
    let settings = SettingsBuilder::new()
        .port("/dev/ttyAMA0")
        .command_template("sudo minicom -b {baud} -D {port}")
        .finalize();
    let (program, args) = settings.command_line();
    assert_eq!(program, "sudo");
    assert_eq!(args, vec!["minicom", "-b", "115200", "-D", "/dev/ttyAMA0"]);
}

#[test]
fn empty_command_template_keeps_command() {
    let settings = SettingsBuilder::new().command_template("   ").finalize();
    assert_eq!(settings.program, "minicom");
}

#[test]
fn durations() {
    let settings = SettingsBuilder::new()
        .inactivity_timeout(Duration::from_secs(5))
        .idle_tick(Duration::from_millis(50))
        .termination_grace(Duration::from_millis(500))
        .join_timeout(Duration::from_secs(1))
        .start_grace(Duration::from_millis(0))
        .finalize();
    assert_eq!(settings.inactivity_timeout, Duration::from_secs(5));
    assert_eq!(settings.idle_tick, Duration::from_millis(50));
    assert_eq!(settings.termination_grace, Duration::from_millis(500));
    assert_eq!(settings.join_timeout, Duration::from_secs(1));
    assert_eq!(settings.start_grace, Duration::from_millis(0));
}
