//! Error taxonomy for the Lumen boot path.
//!
//! Three layers, mirroring how far a failure is allowed to travel:
//! - [`FirmwareError`] is what any facade call can return.
//! - [`BootDecisionError`] and [`KernelLoadError`] are recovered inside the
//!   menu loop (re-prompt / return to menu).
//! - [`BootError`] is the only thing that ever reaches the entry point.

use core::fmt;

use crate::firmware::ResetKind;

/// Failure reported by a firmware service call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareError {
    /// Caller buffer is short; `required` is the size the firmware asked for.
    BufferTooSmall { required: usize },
    OutOfResources,
    InvalidParameter,
    Unsupported,
    DeviceError,
    /// Requested object (file, protocol, image) does not exist.
    NotFound,
}

impl fmt::Display for FirmwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FirmwareError::BufferTooSmall { required } => {
                write!(f, "buffer too small ({} bytes required)", required)
            }
            FirmwareError::OutOfResources => f.write_str("out of resources"),
            FirmwareError::InvalidParameter => f.write_str("invalid parameter"),
            FirmwareError::Unsupported => f.write_str("unsupported"),
            FirmwareError::DeviceError => f.write_str("device error"),
            FirmwareError::NotFound => f.write_str("not found"),
        }
    }
}

/// A keystroke that does not name a menu entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootDecisionError {
    InvalidKey(char),
    InvalidScanCode(u16),
}

impl fmt::Display for BootDecisionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootDecisionError::InvalidKey(c) => write!(f, "invalid menu key {:?}", c),
            BootDecisionError::InvalidScanCode(code) => {
                write!(f, "invalid menu scan code {:#06x}", code)
            }
        }
    }
}

/// Why the kernel-load sequence gave up and returned to the menu.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelLoadError {
    NotFound,
    Invalid(&'static str),
    Firmware(FirmwareError),
    ExitBootServicesFailed { attempts: u8, last: FirmwareError },
}

impl From<FirmwareError> for KernelLoadError {
    fn from(e: FirmwareError) -> Self {
        match e {
            FirmwareError::NotFound => KernelLoadError::NotFound,
            other => KernelLoadError::Firmware(other),
        }
    }
}

impl fmt::Display for KernelLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelLoadError::NotFound => f.write_str("kernel image not found"),
            KernelLoadError::Invalid(why) => write!(f, "kernel image rejected: {}", why),
            KernelLoadError::Firmware(e) => write!(f, "firmware error while loading kernel: {}", e),
            KernelLoadError::ExitBootServicesFailed { attempts, last } => write!(
                f,
                "ExitBootServices failed after {} attempt(s): {}",
                attempts, last
            ),
        }
    }
}

/// Invalid compile-time boot configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    PollInterval(u32),
    ExitAttempts,
    EmptyKernelPath,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::PollInterval(us) => {
                write!(f, "poll interval {}us outside 1..=1000000", us)
            }
            ConfigError::ExitAttempts => f.write_str("exit attempts must be at least 1"),
            ConfigError::EmptyKernelPath => f.write_str("kernel path is empty"),
        }
    }
}

/// Unrecoverable outcome of the boot orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    /// A facade call failed somewhere the menu cannot recover (console, keyboard).
    Firmware(FirmwareError),
    /// ResetSystem came back; it must never return.
    ResetReturned { kind: ResetKind, error: FirmwareError },
    Config(ConfigError),
}

impl From<FirmwareError> for BootError {
    fn from(e: FirmwareError) -> Self {
        BootError::Firmware(e)
    }
}

impl From<ConfigError> for BootError {
    fn from(e: ConfigError) -> Self {
        BootError::Config(e)
    }
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootError::Firmware(e) => write!(f, "firmware: {}", e),
            BootError::ResetReturned { kind, error } => {
                write!(f, "{:?} reset returned: {}", kind, error)
            }
            BootError::Config(e) => write!(f, "config: {}", e),
        }
    }
}
