//! Boot orchestrator: welcome screen, menu loop and decision dispatch.
//!
//! The loop only ends three ways: a successful ExitBootServices (the caller
//! then jumps to the kernel), a reset that unexpectedly returned, or a
//! console/keyboard failure the menu cannot recover from. Everything else,
//! missing kernel and exhausted exit retries included, is rendered and the
//! menu starts over.

use alloc::boxed::Box;

use crate::config::BootConfig;
use crate::entropy;
use crate::error::{BootError, FirmwareError, KernelLoadError};
use crate::firmware::{Firmware, ResetKind};
use crate::handoff::{BootFlags, BootInfo, Handoff};
use crate::loader::{ImageLoader, KernelImage};
use crate::memory_map::MemoryMapSnapshot;
use crate::menu::{self, BootDecision, MenuOption};
use crate::ui;

pub struct Orchestrator<'fw, F, L> {
    fw: &'fw mut F,
    loader: L,
    config: BootConfig,
    seed: u64,
}

impl<'fw, F, L> Orchestrator<'fw, F, L>
where
    F: Firmware,
    L: ImageLoader<F>,
{
    pub fn new(fw: &'fw mut F, loader: L, config: BootConfig) -> Result<Self, BootError> {
        config.validate()?;
        Ok(Self {
            fw,
            loader,
            config,
            seed: 0,
        })
    }

    /// Drive the menu until a kernel is ready to be entered.
    pub fn run(mut self) -> Result<Handoff<F::Pool>, BootError> {
        self.seed = entropy::gather_seed(self.fw);
        self.welcome()?;

        loop {
            ui::draw_menu(self.fw)?;
            let decision = menu::select(self.fw, &self.config)?;
            log::info!(target: "boot", "decision: {:?}", decision);
            if let Some(handoff) = self.dispatch(decision)? {
                return Ok(handoff);
            }
        }
    }

    fn welcome(&mut self) -> Result<(), BootError> {
        let tagline = entropy::choose(&entropy::TAGLINES, self.seed).copied();
        ui::draw_banner(self.fw, tagline)?;
        self.show_info()?;
        Ok(())
    }

    fn dispatch(&mut self, decision: BootDecision) -> Result<Option<Handoff<F::Pool>>, BootError> {
        match decision.option() {
            MenuOption::BootDefault => self.boot_kernel(decision),
            MenuOption::OpenShell => {
                self.open_shell()?;
                Ok(None)
            }
            MenuOption::ShowInfo => {
                self.show_info()?;
                Ok(None)
            }
            MenuOption::Reboot => Err(self.reset(ResetKind::Cold, "Rebooting system...")),
            MenuOption::Shutdown => Err(self.reset(ResetKind::Shutdown, "Shutting down system...")),
            // select() never hands these out.
            MenuOption::Invalid => {
                log::debug!(target: "boot", "ignoring invalid decision");
                Ok(None)
            }
        }
    }

    fn show_info(&mut self) -> Result<(), FirmwareError> {
        // The snapshot is dropped as soon as it is summarised.
        let memory = MemoryMapSnapshot::acquire(self.fw).map(|map| map.summary());
        if let Err(e) = memory {
            log::warn!(target: "memmap", "memory map unavailable: {}", e);
        }
        let info = self.fw.info();
        ui::draw_system_info(self.fw, memory, &info)
    }

    fn open_shell(&mut self) -> Result<(), FirmwareError> {
        ui::info(self.fw, format_args!("Starting UEFI Shell..."))?;
        match self.loader.launch_shell(self.fw) {
            Ok(()) => Ok(()),
            Err(e) => {
                log::warn!(target: "boot", "shell unavailable: {}", e);
                ui::display_failure(self.fw, format_args!("UEFI Shell unavailable: {}", e))
            }
        }
    }

    /// Only comes back if ResetSystem did.
    fn reset(&mut self, kind: ResetKind, message: &str) -> BootError {
        if let Err(e) = ui::info(self.fw, format_args!("{}", message)) {
            log::warn!(target: "boot", "console write failed before reset: {}", e);
        }
        log::info!(target: "boot", "{:?} reset requested", kind);
        let error = self.fw.reset(kind);
        log::error!(target: "boot", "{:?} reset returned: {}", kind, error);
        BootError::ResetReturned { kind, error }
    }

    fn boot_kernel(&mut self, decision: BootDecision) -> Result<Option<Handoff<F::Pool>>, BootError> {
        let path = self.config.kernel_path;
        ui::info(self.fw, format_args!("Loading kernel from {}...", path))?;

        match self.try_boot(decision) {
            Ok(handoff) => Ok(Some(handoff)),
            Err(KernelLoadError::NotFound) => {
                log::warn!(target: "loader", "kernel not found at {}", path);
                ui::warn(
                    self.fw,
                    format_args!("Kernel not found at {} - returning to menu.", path),
                )?;
                Ok(None)
            }
            Err(e) => {
                log::error!(target: "loader", "boot aborted: {}", e);
                ui::display_failure(self.fw, format_args!("{}", e))?;
                Ok(None)
            }
        }
    }

    fn try_boot(&mut self, decision: BootDecision) -> Result<Handoff<F::Pool>, KernelLoadError> {
        let kernel = self.loader.load_kernel(self.fw, self.config.kernel_path)?;
        log::info!(
            target: "loader",
            "kernel at {:#x} ({} bytes), entry {:#x}",
            kernel.base,
            kernel.size,
            kernel.entry
        );

        let flags = match decision {
            BootDecision::Timeout => BootFlags::TIMEOUT,
            BootDecision::Selected(_) => BootFlags::SELECTED,
        };
        // Allocated now: nothing may allocate between the final snapshot and exit.
        let info = Box::new(BootInfo::new(&kernel, flags, self.seed));
        let handoff = self.exit_boot_services(kernel, info);
        if handoff.is_err() {
            // Still in boot services: the staged copy is ours to free.
            if let Err(e) = self.loader.unload(self.fw, &kernel) {
                log::warn!(target: "loader", "could not release kernel pages: {}", e);
            }
        }
        handoff
    }

    /// Up to `exit_attempts` {snapshot, ExitBootServices} pairs.
    fn exit_boot_services(
        &mut self,
        kernel: KernelImage,
        mut info: Box<BootInfo>,
    ) -> Result<Handoff<F::Pool>, KernelLoadError> {
        let attempts = self.config.exit_attempts;
        let mut last = FirmwareError::InvalidParameter;

        for attempt in 1..=attempts {
            let map = match MemoryMapSnapshot::acquire(self.fw) {
                Ok(map) => map,
                Err(e) => {
                    log::warn!(target: "handoff", "snapshot {}/{} failed: {}", attempt, attempts, e);
                    last = e;
                    continue;
                }
            };

            match self.fw.exit_boot_services(map.key()) {
                Ok(()) => {
                    // Boot services are gone: no firmware calls, no logging.
                    if attempt > 1 {
                        info.set_flags(BootFlags::EXIT_RETRIED);
                    }
                    return Ok(Handoff::new(kernel.entry, info, map));
                }
                Err(e) => {
                    drop(map);
                    log::warn!(
                        target: "handoff",
                        "ExitBootServices {}/{} rejected: {}",
                        attempt,
                        attempts,
                        e
                    );
                    last = e;
                }
            }
        }

        Err(KernelLoadError::ExitBootServicesFailed { attempts, last })
    }
}
