//! Lumen boot manager core.
//!
//! Firmware-agnostic pieces of the UEFI boot path: the countdown menu, the
//! memory map snapshot, kernel entry resolution and the ExitBootServices
//! handoff. All firmware access goes through the [`firmware::Firmware`]
//! trait, so the whole flow runs on the host under test.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod config;
pub mod entropy;
pub mod error;
pub mod firmware;
pub mod handoff;
pub mod loader;
pub mod memory_map;
pub mod menu;
pub mod orchestrator;
pub mod ui;

#[cfg(test)]
mod mock;

pub use config::BootConfig;
pub use error::{BootError, FirmwareError, KernelLoadError};
pub use firmware::Firmware;
pub use handoff::Handoff;
pub use orchestrator::Orchestrator;
