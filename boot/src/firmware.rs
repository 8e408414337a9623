//! Firmware service facade.
//!
//! Every component borrows one [`Firmware`] implementation for the duration
//! of a call; nothing in the crate reaches for a global system table. The
//! UEFI binary implements it over the boot/runtime service tables, the unit
//! tests over a scripted mock.

use alloc::string::String;
use core::ops::DerefMut;

use crate::error::FirmwareError;

/// A single keystroke from the console input device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPress {
    /// Printable character or control code (Enter arrives as `'\r'`).
    Char(char),
    /// Non-printable key identified by its UEFI scan code.
    Special(u16),
}

/// Kind of ResetSystem call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    Cold,
    Shutdown,
}

/// Freshness token of one memory map; any allocation or free invalidates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapKey(pub usize);

/// What GetMemoryMap reported alongside the descriptors it wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapLayout {
    pub map_size: usize,
    pub key: MapKey,
    pub descriptor_size: usize,
    pub descriptor_version: u32,
}

/// Colour roles for console output. Purely cosmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Title,
    Accent,
    Text,
    Prompt,
    Warning,
    Fault,
}

/// Identity of the running firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareInfo {
    pub vendor: String,
    pub firmware_revision: u32,
    pub uefi_major: u16,
    pub uefi_minor: u16,
}

/// Wall-clock sample from the runtime clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FirmwareTime {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub nanosecond: u32,
}

/// The subset of boot and runtime services the boot path needs.
///
/// Calls are strictly sequential; implementations never need interior locking.
pub trait Firmware {
    /// Pool allocation handed back by [`Firmware::allocate_pool`]; freed on drop.
    type Pool: DerefMut<Target = [u8]>;

    /// Non-blocking keyboard poll.
    fn read_key(&mut self) -> Result<Option<KeyPress>, FirmwareError>;

    /// Busy-wait; cannot be interrupted.
    fn stall(&mut self, microseconds: usize);

    /// Raw GetMemoryMap into `buffer`.
    ///
    /// A short buffer fails with [`FirmwareError::BufferTooSmall`] carrying
    /// the exact size the firmware needs.
    fn memory_map(&mut self, buffer: &mut [u8]) -> Result<MapLayout, FirmwareError>;

    fn allocate_pool(&mut self, size: usize) -> Result<Self::Pool, FirmwareError>;

    /// Terminates boot services. On success no other method may be called.
    fn exit_boot_services(&mut self, key: MapKey) -> Result<(), FirmwareError>;

    /// ResetSystem. Does not return when it works, so the return value is
    /// always the failure.
    fn reset(&mut self, kind: ResetKind) -> FirmwareError;

    fn write_str(&mut self, text: &str) -> Result<(), FirmwareError>;

    fn set_tone(&mut self, tone: Tone) -> Result<(), FirmwareError>;

    fn clear(&mut self) -> Result<(), FirmwareError>;

    fn info(&self) -> FirmwareInfo;

    fn time(&mut self) -> Result<FirmwareTime, FirmwareError>;
}
