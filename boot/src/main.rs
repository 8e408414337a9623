#![cfg_attr(target_os = "uefi", no_std, no_main)]

#[cfg(target_os = "uefi")]
extern crate alloc;

#[cfg(target_os = "uefi")]
mod esp;
#[cfg(target_os = "uefi")]
mod platform;

#[cfg(target_os = "uefi")]
use uefi::prelude::*;

#[cfg(target_os = "uefi")]
use lumen_boot::{BootConfig, BootError, Orchestrator};

/// Entry point for UEFI firmware
#[cfg(target_os = "uefi")]
#[entry]
fn efi_main(image: Handle, mut system_table: SystemTable<Boot>) -> Status {
    // Allocator, logger and panic handler.
    if uefi_services::init(&mut system_table).is_err() {
        return Status::LOAD_ERROR;
    }
    configure_logging();
    log::info!(target: "boot", "Lumen boot manager v{}", env!("CARGO_PKG_VERSION"));

    let mut fw = platform::UefiFirmware::new(image, system_table);
    let orchestrator = match Orchestrator::new(&mut fw, esp::EspLoader, BootConfig::default()) {
        Ok(o) => o,
        Err(e) => return fail(&e),
    };

    match orchestrator.run() {
        // SAFETY: run() only returns a handoff after ExitBootServices
        // succeeded, with the entry point of the image it staged.
        Ok(handoff) => unsafe { handoff.enter() },
        Err(e) => fail(&e),
    }
}

#[cfg(target_os = "uefi")]
fn configure_logging() {
    #[cfg(feature = "logging")]
    log::set_max_level(log::LevelFilter::Info);
    #[cfg(not(feature = "logging"))]
    log::set_max_level(log::LevelFilter::Off);
}

/// Back to the firmware boot manager with a status that names the failure.
#[cfg(target_os = "uefi")]
fn fail(error: &BootError) -> Status {
    log::error!(target: "boot", "boot aborted: {}", error);
    match error {
        BootError::Firmware(e) => platform::error_to_status(*e),
        BootError::ResetReturned { .. } => Status::ABORTED,
        BootError::Config(_) => Status::INVALID_PARAMETER,
    }
}

#[cfg(not(target_os = "uefi"))]
fn main() {
    eprintln!("lumen_boot is a UEFI application; build it for x86_64-unknown-uefi");
    std::process::exit(1);
}
