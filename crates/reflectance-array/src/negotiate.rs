//! Bounded-retry negotiation of a board's streaming mode.
//!
//! The board streams one mode at a time and has to be told which. A start
//! command or its confirmation may be lost, so the driver sends the start
//! command up to `attempts` times and after each one waits `window_ms` for the
//! decoder to stamp a fresh frame. The machine is pure: the caller supplies the
//! time and the latest frame stamp, and performs the I/O each [`Step`] asks for.

use crate::config::ArrayConfig;
use crate::mode::Mode;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NegotiationLimits {
    pub attempts: u8,
    pub window_ms: u64,
    pub confirm_window_ms: u64,
    pub inactivity_allowed_ms: u64,
}

impl From<&ArrayConfig> for NegotiationLimits {
    fn from(cfg: &ArrayConfig) -> Self {
        Self {
            attempts: cfg.start_attempts,
            window_ms: cfg.start_window_ms,
            confirm_window_ms: cfg.confirm_window_ms,
            inactivity_allowed_ms: cfg.inactivity_allowed_ms,
        }
    }
}

impl Default for NegotiationLimits {
    fn default() -> Self {
        Self::from(&ArrayConfig::default())
    }
}

impl NegotiationLimits {
    /// Steady state: the mode already matches and frames keep coming.
    pub fn mode_current(
        &self,
        active: Option<Mode>,
        desired: Mode,
        last_reading_ms: Option<u64>,
        now_ms: u64,
    ) -> bool {
        match last_reading_ms {
            Some(last) => {
                active == Some(desired)
                    && now_ms.saturating_sub(last) <= self.inactivity_allowed_ms
            }
            None => false,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Step {
    /// Send the start command for the target mode.
    Send(Mode),
    /// Let the receive path run, then poll again.
    Wait,
    Confirmed(Mode),
    TimedOut { attempts: u8 },
}

#[derive(Clone, Debug)]
pub struct Negotiation {
    target: Mode,
    limits: NegotiationLimits,
    attempts: u8,
    window_start: Option<u64>,
}

impl Negotiation {
    pub fn new(target: Mode, limits: NegotiationLimits) -> Self {
        Self {
            target,
            limits,
            attempts: 0,
            window_start: None,
        }
    }

    pub fn target(&self) -> Mode {
        self.target
    }

    pub fn attempts(&self) -> u8 {
        self.attempts
    }

    pub fn poll(&mut self, now_ms: u64, last_reading_ms: Option<u64>) -> Step {
        if let Some(start) = self.window_start {
            let confirmed = last_reading_ms
                .map(|last| now_ms.saturating_sub(last) < self.limits.confirm_window_ms)
                .unwrap_or(false);
            if confirmed {
                return Step::Confirmed(self.target);
            }
            if now_ms.saturating_sub(start) < self.limits.window_ms {
                return Step::Wait;
            }
            self.window_start = None;
        }
        if self.attempts >= self.limits.attempts {
            return Step::TimedOut {
                attempts: self.attempts,
            };
        }
        self.attempts += 1;
        self.window_start = Some(now_ms);
        Step::Send(self.target)
    }
}
