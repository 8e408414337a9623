//! [`Firmware`] over the real UEFI system table.
//!
//! Console, keyboard, clock and reset go through the `uefi` crate. The memory
//! map, pool and ExitBootServices calls use the raw `r-efi` boot services
//! table instead: the safe wrapper allocates its own map and consumes the
//! system table, and this loader needs to exit with the key of a snapshot it
//! took itself.

use alloc::string::String;
use core::ffi::c_void;
use core::fmt::Write as _;
use core::ops::{Deref, DerefMut};
use core::ptr::{self, NonNull};

use r_efi::efi;
use uefi::prelude::*;
use uefi::proto::console::text::{Color, Key};
use uefi::table::boot::BootServices;
use uefi::table::runtime::ResetType;

use lumen_boot::error::FirmwareError;
use lumen_boot::firmware::{
    Firmware, FirmwareInfo, FirmwareTime, KeyPress, MapKey, MapLayout, ResetKind, Tone,
};

pub fn status_to_error(status: Status) -> FirmwareError {
    match status {
        Status::BUFFER_TOO_SMALL => FirmwareError::BufferTooSmall { required: 0 },
        Status::OUT_OF_RESOURCES => FirmwareError::OutOfResources,
        Status::INVALID_PARAMETER => FirmwareError::InvalidParameter,
        Status::UNSUPPORTED => FirmwareError::Unsupported,
        Status::NOT_FOUND => FirmwareError::NotFound,
        _ => FirmwareError::DeviceError,
    }
}

pub fn error_to_status(error: FirmwareError) -> Status {
    match error {
        FirmwareError::BufferTooSmall { .. } => Status::BUFFER_TOO_SMALL,
        FirmwareError::OutOfResources => Status::OUT_OF_RESOURCES,
        FirmwareError::InvalidParameter => Status::INVALID_PARAMETER,
        FirmwareError::Unsupported => Status::UNSUPPORTED,
        FirmwareError::DeviceError => Status::DEVICE_ERROR,
        FirmwareError::NotFound => Status::NOT_FOUND,
    }
}

#[inline]
fn check(status: efi::Status) -> Result<(), FirmwareError> {
    if status.is_error() {
        Err(status_to_error(Status(status.as_usize())))
    } else {
        Ok(())
    }
}

/// LOADER_DATA pool allocation, returned to the firmware on drop.
pub struct PoolBuffer {
    ptr: NonNull<u8>,
    len: usize,
    bs: *mut efi::BootServices,
}

impl Deref for PoolBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: `ptr` owns `len` bytes of pool memory until drop.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for PoolBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above; `&mut self` makes the access exclusive.
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for PoolBuffer {
    fn drop(&mut self) {
        if self.len == 0 {
            return;
        }
        // SAFETY: the pointer came from AllocatePool and is freed once.
        let status = unsafe { ((*self.bs).free_pool)(self.ptr.as_ptr().cast()) };
        if status.is_error() {
            log::warn!(target: "memmap", "FreePool failed: {:#x}", status.as_usize());
        }
    }
}

pub struct UefiFirmware {
    image: Handle,
    system_table: SystemTable<Boot>,
}

impl UefiFirmware {
    pub fn new(image: Handle, system_table: SystemTable<Boot>) -> Self {
        Self {
            image,
            system_table,
        }
    }

    #[inline]
    pub fn image(&self) -> Handle {
        self.image
    }

    #[inline]
    pub fn boot_services(&self) -> &BootServices {
        self.system_table.boot_services()
    }

    fn raw_boot_services(&self) -> *mut efi::BootServices {
        let st = self.system_table.as_ptr() as *const efi::SystemTable;
        // SAFETY: the firmware keeps the system table alive while boot services run.
        unsafe { (*st).boot_services }
    }
}

impl Firmware for UefiFirmware {
    type Pool = PoolBuffer;

    fn read_key(&mut self) -> Result<Option<KeyPress>, FirmwareError> {
        match self.system_table.stdin().read_key() {
            Ok(Some(Key::Printable(c))) => Ok(Some(KeyPress::Char(char::from(c)))),
            Ok(Some(Key::Special(code))) => Ok(Some(KeyPress::Special(code.0))),
            Ok(None) => Ok(None),
            Err(e) => Err(status_to_error(e.status())),
        }
    }

    fn stall(&mut self, microseconds: usize) {
        self.system_table.boot_services().stall(microseconds);
    }

    fn memory_map(&mut self, buffer: &mut [u8]) -> Result<MapLayout, FirmwareError> {
        let bs = self.raw_boot_services();
        let mut map_size = buffer.len();
        let mut key = 0usize;
        let mut descriptor_size = 0usize;
        let mut descriptor_version = 0u32;
        let map = if buffer.is_empty() {
            ptr::null_mut()
        } else {
            buffer.as_mut_ptr().cast::<efi::MemoryDescriptor>()
        };

        // SAFETY: `map` is null with size 0 or points at `map_size` writable bytes.
        let status = unsafe {
            ((*bs).get_memory_map)(
                &mut map_size,
                map,
                &mut key,
                &mut descriptor_size,
                &mut descriptor_version,
            )
        };
        if status == efi::Status::BUFFER_TOO_SMALL {
            return Err(FirmwareError::BufferTooSmall { required: map_size });
        }
        check(status)?;

        Ok(MapLayout {
            map_size,
            key: MapKey(key),
            descriptor_size,
            descriptor_version,
        })
    }

    fn allocate_pool(&mut self, size: usize) -> Result<PoolBuffer, FirmwareError> {
        let bs = self.raw_boot_services();
        if size == 0 {
            return Ok(PoolBuffer {
                ptr: NonNull::dangling(),
                len: 0,
                bs,
            });
        }

        let mut raw: *mut c_void = ptr::null_mut();
        // SAFETY: plain AllocatePool call with a valid out pointer.
        let status = unsafe { ((*bs).allocate_pool)(efi::LOADER_DATA, size, &mut raw) };
        check(status)?;
        let ptr = NonNull::new(raw.cast::<u8>()).ok_or(FirmwareError::OutOfResources)?;
        Ok(PoolBuffer { ptr, len: size, bs })
    }

    fn exit_boot_services(&mut self, key: MapKey) -> Result<(), FirmwareError> {
        let bs = self.raw_boot_services();
        // SAFETY: image handle of this application; a stale key is reported, not UB.
        let status = unsafe { ((*bs).exit_boot_services)(self.image.as_ptr(), key.0) };
        check(status)
    }

    fn reset(&mut self, kind: ResetKind) -> FirmwareError {
        let rt = match kind {
            ResetKind::Cold => ResetType::COLD,
            ResetKind::Shutdown => ResetType::SHUTDOWN,
        };
        self.system_table
            .runtime_services()
            .reset(rt, Status::SUCCESS, None)
    }

    fn write_str(&mut self, text: &str) -> Result<(), FirmwareError> {
        self.system_table
            .stdout()
            .write_str(text)
            .map_err(|_| FirmwareError::DeviceError)
    }

    fn set_tone(&mut self, tone: Tone) -> Result<(), FirmwareError> {
        let fg = match tone {
            Tone::Title => Color::LightMagenta,
            Tone::Accent => Color::LightCyan,
            Tone::Text => Color::LightGray,
            Tone::Prompt => Color::White,
            Tone::Warning => Color::Yellow,
            Tone::Fault => Color::LightRed,
        };
        self.system_table
            .stdout()
            .set_color(fg, Color::Black)
            .map_err(|e| status_to_error(e.status()))
    }

    fn clear(&mut self) -> Result<(), FirmwareError> {
        self.system_table
            .stdout()
            .clear()
            .map_err(|e| status_to_error(e.status()))
    }

    fn info(&self) -> FirmwareInfo {
        let revision = self.system_table.uefi_revision();
        FirmwareInfo {
            vendor: String::from(self.system_table.firmware_vendor()),
            firmware_revision: self.system_table.firmware_revision(),
            uefi_major: revision.major(),
            uefi_minor: revision.minor(),
        }
    }

    fn time(&mut self) -> Result<FirmwareTime, FirmwareError> {
        let t = self
            .system_table
            .runtime_services()
            .get_time()
            .map_err(|e| status_to_error(e.status()))?;
        Ok(FirmwareTime {
            hour: t.hour(),
            minute: t.minute(),
            second: t.second(),
            nanosecond: t.nanosecond(),
        })
    }
}
