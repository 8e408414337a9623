//! Lumen boot UI: console rendering for the boot menu.
//!
//! Everything here is cosmetic text and colour over the [`Firmware`] console.
//! Lines end in CRLF; the countdown prompt rewrites itself in place with a
//! bare carriage return. Output errors are returned, never dropped.

use core::fmt;

use crate::error::FirmwareError;
use crate::firmware::{Firmware, FirmwareInfo, Tone};
use crate::memory_map::MemorySummary;

/// `core::fmt` front-end over [`Firmware::write_str`].
pub fn print<F: Firmware>(fw: &mut F, args: fmt::Arguments<'_>) -> Result<(), FirmwareError> {
    struct Sink<'a, F> {
        fw: &'a mut F,
        error: Option<FirmwareError>,
    }

    impl<F: Firmware> fmt::Write for Sink<'_, F> {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            self.fw.write_str(s).map_err(|e| {
                self.error = Some(e);
                fmt::Error
            })
        }
    }

    let mut sink = Sink { fw, error: None };
    fmt::write(&mut sink, args).map_err(|_| sink.error.unwrap_or(FirmwareError::DeviceError))
}

/// One line in the given tone, colour restored afterwards.
pub fn line<F: Firmware>(fw: &mut F, tone: Tone, args: fmt::Arguments<'_>) -> Result<(), FirmwareError> {
    fw.set_tone(tone)?;
    print(fw, args)?;
    fw.write_str("\r\n")?;
    fw.set_tone(Tone::Text)
}

pub fn draw_banner<F: Firmware>(fw: &mut F, tagline: Option<&str>) -> Result<(), FirmwareError> {
    const BANNER: [&str; 4] = [
        "╔══════════════════════════════════════════════════════════════╗\r\n",
        "║                    LUMEN UEFI BOOT MANAGER                   ║\r\n",
        "║           boot menu :: memory map :: kernel handoff          ║\r\n",
        "╚══════════════════════════════════════════════════════════════╝\r\n",
    ];

    fw.clear()?;
    fw.set_tone(Tone::Title)?;
    for row in BANNER {
        fw.write_str(row)?;
    }
    fw.write_str("\r\n")?;

    if let Some(tagline) = tagline {
        fw.set_tone(Tone::Accent)?;
        print(fw, format_args!("  \"{}\"\r\n\r\n", tagline))?;
    }
    fw.set_tone(Tone::Text)
}

/// System information block; `memory` is `Err` when the map could not be read.
pub fn draw_system_info<F: Firmware>(
    fw: &mut F,
    memory: Result<MemorySummary, FirmwareError>,
    info: &FirmwareInfo,
) -> Result<(), FirmwareError> {
    fw.set_tone(Tone::Text)?;
    fw.write_str("=== System Information ===\r\n")?;
    match memory {
        Ok(summary) => print(
            fw,
            format_args!(
                "Memory: {} MB detected ({} MB usable, {} regions)\r\n",
                summary.total_mib(),
                summary.usable_mib(),
                summary.regions
            ),
        )?,
        Err(e) => line(fw, Tone::Warning, format_args!("Memory: map unavailable ({})", e))?,
    }
    print(
        fw,
        format_args!("UEFI Version: {}.{}\r\n", info.uefi_major, info.uefi_minor),
    )?;
    print(
        fw,
        format_args!(
            "Firmware: {} (rev {:#x})\r\n\r\n",
            info.vendor, info.firmware_revision
        ),
    )
}

pub fn draw_menu<F: Firmware>(fw: &mut F) -> Result<(), FirmwareError> {
    fw.set_tone(Tone::Title)?;
    fw.write_str("=== Boot Menu ===\r\n")?;
    fw.set_tone(Tone::Text)?;
    fw.write_str("  [1] Boot Kernel (default)\r\n")?;
    fw.write_str("  [2] UEFI Shell\r\n")?;
    fw.write_str("  [3] System Information\r\n")?;
    fw.write_str("  [4] Reboot System\r\n")?;
    fw.write_str("  [5] Shutdown System\r\n\r\n")?;
    fw.set_tone(Tone::Prompt)?;
    fw.write_str("Select option (1-5, Enter=Boot): \r\n")?;
    fw.set_tone(Tone::Text)
}

/// Rewrites the current line; trailing spaces cover a shrinking digit count.
pub fn countdown_prompt<F: Firmware>(fw: &mut F, remaining: u32) -> Result<(), FirmwareError> {
    print(
        fw,
        format_args!(
            "\rAuto-boot in {} seconds (press any key to interrupt)...  ",
            remaining
        ),
    )
}

/// Red fault block with a reason.
pub fn display_failure<F: Firmware>(fw: &mut F, reason: fmt::Arguments<'_>) -> Result<(), FirmwareError> {
    fw.set_tone(Tone::Fault)?;
    fw.write_str("\r\n──────────────────── BOOT FAULT ────────────────────\r\n")?;
    fw.write_str("[!] ")?;
    print(fw, reason)?;
    fw.write_str("\r\n────────────────────────────────────────────────────\r\n")?;
    fw.set_tone(Tone::Text)
}

pub fn warn<F: Firmware>(fw: &mut F, args: fmt::Arguments<'_>) -> Result<(), FirmwareError> {
    line(fw, Tone::Warning, args)
}

pub fn info<F: Firmware>(fw: &mut F, args: fmt::Arguments<'_>) -> Result<(), FirmwareError> {
    line(fw, Tone::Accent, args)
}
