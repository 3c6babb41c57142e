//! Termination policy of a capture session.
//!
//! The policy is evaluated by the capture loop after every captured line and
//! on every idle tick. It never looks at the clock itself: the caller passes
//! the current [`Instant`], which keeps the policy deterministic under test.

use std::time::{Duration, Instant};

use log::info;

use crate::settings::Settings;

/// What made the policy fire.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Trigger {
    /// The sentinel terminal code was seen often enough.
    TerminalCode,
    /// No output for longer than the inactivity timeout.
    Inactivity,
}

#[derive(Debug, Clone)]
pub struct TerminationPolicy {
    terminal_code: String,
    terminal_code_limit: u32,
    inactivity_timeout: Duration,

    terminal_hits: u32,
    last_activity: Option<Instant>,
    fired: Option<Trigger>,
}
impl TerminationPolicy {
    pub fn new(settings: &Settings) -> Self {
        TerminationPolicy {
            terminal_code: settings.terminal_code.clone(),
            terminal_code_limit: settings.terminal_code_limit,
            inactivity_timeout: settings.inactivity_timeout,
            terminal_hits: 0,
            last_activity: None,
            fired: None,
        }
    }

    /// Account for a non-empty line received at `now`, which produced the
    /// postcode `code` if any.
    ///
    /// Once the policy has fired, it keeps returning the first trigger.
    pub fn observe_line(&mut self, code: Option<&str>, now: Instant) -> Option<Trigger> {
        if self.fired.is_some() {
            return self.fired;
        }
        self.last_activity = Some(now);
        if code == Some(self.terminal_code.as_str()) {
            self.terminal_hits += 1;
            info!(
                "'{}' received ({}/{})",
                self.terminal_code, self.terminal_hits, self.terminal_code_limit
            );
            if self.terminal_hits >= self.terminal_code_limit {
                self.fired = Some(Trigger::TerminalCode);
            }
        }
        self.fired
    }

    /// Check for inactivity at `now`. A session that never produced output is
    /// never considered inactive.
    pub fn check_idle(&mut self, now: Instant) -> Option<Trigger> {
        if self.fired.is_some() {
            return self.fired;
        }
        if let Some(last) = self.last_activity {
            if now.saturating_duration_since(last) > self.inactivity_timeout {
                self.fired = Some(Trigger::Inactivity);
            }
        }
        self.fired
    }

    pub fn fired(&self) -> Option<Trigger> {
        self.fired
    }

    pub fn terminal_hits(&self) -> u32 {
        self.terminal_hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingsBuilder;

    fn policy() -> TerminationPolicy {
        TerminationPolicy::new(&SettingsBuilder::new().finalize())
    }

    #[test]
    fn second_terminal_code_fires() {
        let mut policy = policy();
        let now = Instant::now();
        assert_eq!(policy.observe_line(Some("e3"), now), None);
        assert_eq!(policy.observe_line(Some("a1"), now), None);
        assert_eq!(
            policy.observe_line(Some("e3"), now),
            Some(Trigger::TerminalCode)
        );
        assert_eq!(policy.terminal_hits(), 2);
    }

    #[test]
    fn terminal_codes_need_not_be_consecutive() {
        let mut policy = policy();
        let now = Instant::now();
        policy.observe_line(Some("e3"), now);
        for _ in 0..10 {
            assert_eq!(policy.observe_line(Some("10"), now), None);
            assert_eq!(policy.observe_line(None, now), None);
        }
        assert_eq!(
            policy.observe_line(Some("e3"), now),
            Some(Trigger::TerminalCode)
        );
    }

    #[test]
    fn inactivity_after_some_output() {
        let mut policy = policy();
        let start = Instant::now();
        policy.observe_line(Some("5a"), start);
        assert_eq!(policy.check_idle(start + Duration::from_secs(30)), None);
        assert_eq!(policy.check_idle(start + Duration::from_secs(60)), None);
        assert_eq!(
            policy.check_idle(start + Duration::from_secs(61)),
            Some(Trigger::Inactivity)
        );
    }

    #[test]
    fn activity_resets_the_idle_clock() {
        let mut policy = policy();
        let start = Instant::now();
        policy.observe_line(None, start);
        policy.observe_line(None, start + Duration::from_secs(50));
        assert_eq!(policy.check_idle(start + Duration::from_secs(100)), None);
        assert_eq!(
            policy.check_idle(start + Duration::from_secs(111)),
            Some(Trigger::Inactivity)
        );
    }

    #[test]
    fn silent_session_never_goes_idle() {
        let mut policy = policy();
        let start = Instant::now();
        assert_eq!(policy.check_idle(start + Duration::from_secs(3600)), None);
    }

    #[test]
    fn firing_is_idempotent() {
        let mut policy = policy();
        let start = Instant::now();
        policy.observe_line(Some("e3"), start);
        policy.observe_line(Some("e3"), start);
        assert_eq!(policy.fired(), Some(Trigger::TerminalCode));
        // Neither more codes nor a long silence change the outcome.
        assert_eq!(
            policy.observe_line(Some("e3"), start),
            Some(Trigger::TerminalCode)
        );
        assert_eq!(
            policy.check_idle(start + Duration::from_secs(120)),
            Some(Trigger::TerminalCode)
        );
        assert_eq!(policy.terminal_hits(), 2);
    }
}
