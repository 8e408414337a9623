//! Compile-time boot configuration.
//!
//! There is no configuration file: the loader keeps no persisted state, so
//! every knob is a constant here or a Cargo feature.

use crate::error::ConfigError;

/// Seconds the menu counts down before booting the default entry.
pub const DEFAULT_TIMEOUT_SECONDS: u32 = 10;

/// One countdown tick.
pub const TICK_US: u32 = 1_000_000;

/// Keyboard poll granularity inside a tick.
#[cfg(not(feature = "coarse-poll"))]
pub const DEFAULT_POLL_INTERVAL_US: u32 = 50_000;
#[cfg(feature = "coarse-poll")]
pub const DEFAULT_POLL_INTERVAL_US: u32 = TICK_US;

/// {snapshot, ExitBootServices} pairs tried before giving up on a handoff.
pub const DEFAULT_EXIT_ATTEMPTS: u8 = 3;

/// Kernel image on the boot volume.
pub const DEFAULT_KERNEL_PATH: &str = "\\EFI\\LUMEN\\KERNEL.ELF";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootConfig {
    pub timeout_seconds: u32,
    pub poll_interval_us: u32,
    pub exit_attempts: u8,
    pub kernel_path: &'static str,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            poll_interval_us: DEFAULT_POLL_INTERVAL_US,
            exit_attempts: DEFAULT_EXIT_ATTEMPTS,
            kernel_path: DEFAULT_KERNEL_PATH,
        }
    }
}

impl BootConfig {
    pub fn with_timeout(mut self, seconds: u32) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_poll_interval(mut self, microseconds: u32) -> Self {
        self.poll_interval_us = microseconds;
        self
    }

    pub fn with_exit_attempts(mut self, attempts: u8) -> Self {
        self.exit_attempts = attempts;
        self
    }

    pub fn with_kernel_path(mut self, path: &'static str) -> Self {
        self.kernel_path = path;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_us == 0 || self.poll_interval_us > TICK_US {
            return Err(ConfigError::PollInterval(self.poll_interval_us));
        }
        if self.exit_attempts == 0 {
            return Err(ConfigError::ExitAttempts);
        }
        if self.kernel_path.is_empty() {
            return Err(ConfigError::EmptyKernelPath);
        }
        Ok(())
    }

    /// Keyboard polls per displayed countdown tick (at least one).
    #[inline]
    pub fn polls_per_tick(&self) -> u32 {
        (TICK_US / self.poll_interval_us.max(1)).max(1)
    }
}
