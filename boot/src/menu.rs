//! Countdown menu state machine.
//!
//! `Counting(n)` for n = timeout down to 1, then `Resolved`. Each tick draws
//! the prompt once and polls the keyboard `polls_per_tick` times, stalling
//! `poll_interval_us` between polls so a keystroke is seen within one poll
//! interval while the prompt still moves once per second.
//!
//! An unrecognized key restarts the countdown at the full timeout. The
//! restart is a loop in [`select`], so repeated bad input never grows the
//! stack.

use crate::config::{BootConfig, TICK_US};
use crate::error::{BootDecisionError, FirmwareError};
use crate::firmware::{Firmware, KeyPress};
use crate::ui;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuOption {
    BootDefault,
    OpenShell,
    ShowInfo,
    Reboot,
    Shutdown,
    Invalid,
}

impl MenuOption {
    /// Strict key decoding.
    pub fn decode(key: KeyPress) -> Result<Self, BootDecisionError> {
        match key {
            KeyPress::Char('1') | KeyPress::Char('\r') => Ok(MenuOption::BootDefault),
            KeyPress::Char('2') => Ok(MenuOption::OpenShell),
            KeyPress::Char('3') => Ok(MenuOption::ShowInfo),
            KeyPress::Char('4') => Ok(MenuOption::Reboot),
            KeyPress::Char('5') => Ok(MenuOption::Shutdown),
            KeyPress::Char(c) => Err(BootDecisionError::InvalidKey(c)),
            KeyPress::Special(code) => Err(BootDecisionError::InvalidScanCode(code)),
        }
    }

    pub fn from_key(key: KeyPress) -> Self {
        Self::decode(key).unwrap_or(MenuOption::Invalid)
    }
}

/// Outcome of one countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootDecision {
    Selected(MenuOption),
    Timeout,
}

impl BootDecision {
    /// A timeout always means the default entry.
    pub fn option(self) -> MenuOption {
        match self {
            BootDecision::Selected(option) => option,
            BootDecision::Timeout => MenuOption::BootDefault,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuState {
    Counting(u32),
    Resolved(BootDecision),
}

/// Mutable core of one countdown; terminal once a key arrives or ticks run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownState {
    pub remaining: u32,
    pub key: Option<KeyPress>,
}

impl CountdownState {
    pub fn new(timeout_seconds: u32) -> Self {
        Self {
            remaining: timeout_seconds,
            key: None,
        }
    }

    /// First key wins; later ones are ignored.
    pub fn press(&mut self, key: KeyPress) {
        self.key.get_or_insert(key);
    }

    /// One full tick went by without input.
    pub fn elapse(&mut self) {
        if self.key.is_none() {
            self.remaining = self.remaining.saturating_sub(1);
        }
    }

    pub fn state(&self) -> MenuState {
        match (self.key, self.remaining) {
            (Some(key), _) => MenuState::Resolved(BootDecision::Selected(MenuOption::from_key(key))),
            (None, 0) => MenuState::Resolved(BootDecision::Timeout),
            (None, n) => MenuState::Counting(n),
        }
    }
}

/// Run one countdown from the full timeout. May resolve to `Invalid`.
pub fn countdown<F: Firmware>(fw: &mut F, config: &BootConfig) -> Result<BootDecision, FirmwareError> {
    let polls = config.polls_per_tick();
    let interval = config.poll_interval_us;
    // Whatever the polls leave of a second is slept once at the end of the tick.
    let remainder = TICK_US.saturating_sub(polls.saturating_mul(interval));

    let mut state = CountdownState::new(config.timeout_seconds);
    loop {
        let n = match state.state() {
            MenuState::Counting(n) => n,
            MenuState::Resolved(decision) => {
                finish(fw, decision)?;
                return Ok(decision);
            }
        };

        ui::countdown_prompt(fw, n)?;
        for _ in 0..polls {
            if let Some(key) = fw.read_key()? {
                log::debug!(target: "menu", "key {:?} with {} tick(s) left", key, n);
                state.press(key);
                break;
            }
            fw.stall(interval as usize);
        }
        if state.key.is_none() && remainder > 0 {
            fw.stall(remainder as usize);
        }
        state.elapse();
    }
}

fn finish<F: Firmware>(fw: &mut F, decision: BootDecision) -> Result<(), FirmwareError> {
    match decision {
        BootDecision::Timeout => {
            log::info!(target: "menu", "countdown expired, booting default entry");
            fw.write_str("\r\nTimeout - proceeding with default boot...\r\n")
        }
        BootDecision::Selected(_) => fw.write_str("\r\n"),
    }
}

/// Count down until a valid decision is made, re-prompting on bad keys.
pub fn select<F: Firmware>(fw: &mut F, config: &BootConfig) -> Result<BootDecision, FirmwareError> {
    loop {
        let decision = countdown(fw, config)?;
        if decision.option() != MenuOption::Invalid {
            return Ok(decision);
        }
        log::debug!(target: "menu", "invalid selection, restarting countdown");
        ui::warn(fw, format_args!("Invalid option. Please try again."))?;
    }
}
