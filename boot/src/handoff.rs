//! Lumen boot handoff: the block passed to the kernel at entry.
//!
//! `BootInfo` is C-compatible and lives in loader pool memory that survives
//! ExitBootServices. The kernel checks `magic` and `version` before trusting
//! any other field.
//!
//! The memory map fields describe the snapshot whose key was accepted by
//! ExitBootServices, i.e. the final map. Descriptors must be walked with
//! `descriptor_size`, not a compiled-in struct size.

use alloc::boxed::Box;
use core::mem::ManuallyDrop;
use core::ops::Deref;

use bitflags::bitflags;

use crate::loader::KernelImage;
use crate::memory_map::MemoryMapSnapshot;

/// Kernel entry signature.
pub type KernelEntry = extern "C" fn(*const BootInfo) -> !;

bitflags! {
    /// How the boot was reached.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BootFlags: u32 {
        /// Countdown expired without input.
        const TIMEOUT      = 0x01;
        /// User picked the entry explicitly.
        const SELECTED     = 0x02;
        /// ExitBootServices needed more than one attempt.
        const EXIT_RETRIED = 0x04;
        const FLAT_IMAGE   = 0x08;
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BootInfo {
    pub magic: u64,
    pub version: u16,
    pub header_size: u16,
    pub flags: u32,

    pub kernel_base: u64,
    pub kernel_size: u64,
    pub kernel_entry: u64,

    pub memory_map: u64,
    pub memory_map_size: u64,
    pub descriptor_size: u64,
    pub descriptor_version: u32,
    pub descriptor_count: u32,

    pub total_memory: u64,
    pub usable_memory: u64,

    /// Seed the boot menu used; free low-grade entropy for the kernel.
    pub seed: u64,
    pub reserved: [u8; 16],
}

impl BootInfo {
    pub const MAGIC: u64 = 0x4F4F_424E_454D_554C; // "LUMENBOO"
    pub const VERSION: u16 = 1;

    pub fn new(kernel: &KernelImage, flags: BootFlags, seed: u64) -> Self {
        let mut flags = flags;
        if kernel.entry == kernel.base {
            flags |= BootFlags::FLAT_IMAGE;
        }
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            header_size: core::mem::size_of::<BootInfo>() as u16,
            flags: flags.bits(),
            kernel_base: kernel.base,
            kernel_size: kernel.size as u64,
            kernel_entry: kernel.entry,
            memory_map: 0,
            memory_map_size: 0,
            descriptor_size: 0,
            descriptor_version: 0,
            descriptor_count: 0,
            total_memory: 0,
            usable_memory: 0,
            seed,
            reserved: [0u8; 16],
        }
    }

    #[inline]
    pub fn flags(&self) -> BootFlags {
        BootFlags::from_bits_retain(self.flags)
    }

    #[inline]
    pub fn set_flags(&mut self, flags: BootFlags) {
        self.flags |= flags.bits();
    }

    /// Point at the final map. Plain field writes: safe after ExitBootServices.
    pub fn record_memory_map<P: Deref<Target = [u8]>>(&mut self, map: &MemoryMapSnapshot<P>) {
        let bytes = map.as_bytes();
        let summary = map.summary();
        self.memory_map = bytes.as_ptr() as u64;
        self.memory_map_size = bytes.len() as u64;
        self.descriptor_size = map.descriptor_size() as u64;
        self.descriptor_version = map.descriptor_version();
        self.descriptor_count = map.len() as u32;
        self.total_memory = summary.total_bytes;
        self.usable_memory = summary.usable_bytes;
    }
}

/// Everything needed to jump once boot services are gone.
///
/// The map buffer is never freed: after ExitBootServices there is no pool to
/// return it to, and the kernel owns it from here on.
pub struct Handoff<P> {
    entry: u64,
    info: Box<BootInfo>,
    memory_map: ManuallyDrop<MemoryMapSnapshot<P>>,
}

impl<P: Deref<Target = [u8]>> Handoff<P> {
    pub fn new(entry: u64, mut info: Box<BootInfo>, memory_map: MemoryMapSnapshot<P>) -> Self {
        info.record_memory_map(&memory_map);
        Self {
            entry,
            info,
            memory_map: ManuallyDrop::new(memory_map),
        }
    }

    #[inline]
    pub fn entry(&self) -> u64 {
        self.entry
    }

    #[inline]
    pub fn boot_info(&self) -> &BootInfo {
        &self.info
    }

    #[inline]
    pub fn memory_map(&self) -> &MemoryMapSnapshot<P> {
        &self.memory_map
    }

    /// Transfer control to the kernel.
    ///
    /// # Safety
    /// Boot services must have been exited and `entry` must point at
    /// executable code of the staged image.
    pub unsafe fn enter(self) -> ! {
        log::logger().flush();
        let info: *const BootInfo = Box::into_raw(self.info);
        // SAFETY: caller guarantees `entry` is the image's entry point.
        let kernel: KernelEntry = unsafe { core::mem::transmute(self.entry as usize) };
        kernel(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::{MapKey, MapLayout};
    use crate::mock::{encode_map, MockRegion};

    fn kernel() -> KernelImage {
        KernelImage {
            base: 0x10_0000,
            size: 0x2000,
            entry: 0x10_1000,
        }
    }

    #[test]
    fn header_fields() {
        let info = BootInfo::new(&kernel(), BootFlags::TIMEOUT, 42);
        assert_eq!(info.magic, BootInfo::MAGIC);
        assert_eq!(&info.magic.to_le_bytes(), b"LUMENBOO");
        assert_eq!(info.header_size as usize, core::mem::size_of::<BootInfo>());
        assert_eq!(info.flags(), BootFlags::TIMEOUT);
        assert_eq!(info.kernel_entry, 0x10_1000);
        assert_eq!(info.seed, 42);
    }

    #[test]
    fn flat_images_are_flagged() {
        let flat = KernelImage { entry: 0x10_0000, ..kernel() };
        let info = BootInfo::new(&flat, BootFlags::SELECTED, 0);
        assert!(info.flags().contains(BootFlags::FLAT_IMAGE | BootFlags::SELECTED));
    }

    #[test]
    fn handoff_records_the_final_map() {
        let regions = [
            MockRegion::new(7, 0, 256, 0xF),
            MockRegion::new(7, 0x10_0000, 512, 0xF),
        ];
        let bytes = encode_map(&regions, 48);
        let layout = MapLayout {
            map_size: bytes.len(),
            key: MapKey(3),
            descriptor_size: 48,
            descriptor_version: 1,
        };
        let map = MemoryMapSnapshot::from_parts(bytes, layout).unwrap();
        let base = map.as_bytes().as_ptr() as u64;

        let info = Box::new(BootInfo::new(&kernel(), BootFlags::TIMEOUT, 0));
        let handoff = Handoff::new(kernel().entry, info, map);

        let info = handoff.boot_info();
        assert_eq!(info.memory_map, base);
        assert_eq!(info.memory_map_size, 96);
        assert_eq!(info.descriptor_size, 48);
        assert_eq!(info.descriptor_count, 2);
        assert_eq!(info.total_memory, 768 * 4096);
        assert_eq!(handoff.entry(), 0x10_1000);
    }
}
