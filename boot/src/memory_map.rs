//! memory_map.rs: firmware memory map snapshot
//!
//! Two-phase GetMemoryMap: probe with an empty buffer to learn the exact
//! size, allocate exactly that, query again. A second short-buffer answer is
//! final; the query is never retried more than once.
//!
//! Descriptors are walked with the stride the firmware reports, never with
//! `size_of` of a local struct: newer firmware may widen the descriptor.
//!
//! The [`MapKey`] of a snapshot is only good until the next allocation or
//! free. That includes dropping the snapshot itself.

use core::ops::{Deref, DerefMut};
use core::slice::ChunksExact;

use bitflags::bitflags;
use zerocopy::byteorder::{LittleEndian, U32, U64};
use zerocopy::{FromBytes, LayoutVerified, Unaligned};

use crate::error::FirmwareError;
use crate::firmware::{Firmware, MapKey, MapLayout};

pub const PAGE_SIZE: u64 = 4096;

/// UEFI v1 descriptor as laid out in memory (little-endian, unaligned view).
#[derive(FromBytes, Unaligned)]
#[repr(C)]
struct RawDescriptor {
    ty: U32<LittleEndian>,
    _pad: U32<LittleEndian>,
    phys_start: U64<LittleEndian>,
    _virt_start: U64<LittleEndian>,
    page_count: U64<LittleEndian>,
    attribute: U64<LittleEndian>,
}

/// Smallest stride we can parse.
pub const MIN_DESCRIPTOR_SIZE: usize = core::mem::size_of::<RawDescriptor>();

/// UEFI memory type of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Reserved,
    LoaderCode,
    LoaderData,
    BootServicesCode,
    BootServicesData,
    RuntimeServicesCode,
    RuntimeServicesData,
    Conventional,
    Unusable,
    AcpiReclaim,
    AcpiNvs,
    Mmio,
    MmioPortSpace,
    PalCode,
    Persistent,
    Unaccepted,
    /// OEM (0x7000_0000..) and OS-defined (0x8000_0000..) types.
    Other(u32),
}

impl RegionKind {
    pub fn from_raw(ty: u32) -> Self {
        match ty {
            0 => RegionKind::Reserved,
            1 => RegionKind::LoaderCode,
            2 => RegionKind::LoaderData,
            3 => RegionKind::BootServicesCode,
            4 => RegionKind::BootServicesData,
            5 => RegionKind::RuntimeServicesCode,
            6 => RegionKind::RuntimeServicesData,
            7 => RegionKind::Conventional,
            8 => RegionKind::Unusable,
            9 => RegionKind::AcpiReclaim,
            10 => RegionKind::AcpiNvs,
            11 => RegionKind::Mmio,
            12 => RegionKind::MmioPortSpace,
            13 => RegionKind::PalCode,
            14 => RegionKind::Persistent,
            15 => RegionKind::Unaccepted,
            other => RegionKind::Other(other),
        }
    }

    /// Free for the kernel once boot services are gone. Loader regions hold
    /// the staged image and the handoff data, so they do not count.
    pub fn is_usable_after_exit(self) -> bool {
        matches!(
            self,
            RegionKind::Conventional | RegionKind::BootServicesCode | RegionKind::BootServicesData
        )
    }
}

bitflags! {
    /// EFI_MEMORY_* attribute bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MemoryAttributes: u64 {
        const UC            = 0x0000_0000_0000_0001;
        const WC            = 0x0000_0000_0000_0002;
        const WT            = 0x0000_0000_0000_0004;
        const WB            = 0x0000_0000_0000_0008;
        const UCE           = 0x0000_0000_0000_0010;
        const WP            = 0x0000_0000_0000_1000;
        const RP            = 0x0000_0000_0000_2000;
        const XP            = 0x0000_0000_0000_4000;
        const NV            = 0x0000_0000_0000_8000;
        const MORE_RELIABLE = 0x0000_0000_0001_0000;
        const RO            = 0x0000_0000_0002_0000;
        const SP            = 0x0000_0000_0004_0000;
        const CPU_CRYPTO    = 0x0000_0000_0008_0000;
        const RUNTIME       = 0x8000_0000_0000_0000;
    }
}

/// One normalized memory map entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub phys_start: u64,
    pub page_count: u64,
    pub kind: RegionKind,
    pub attributes: MemoryAttributes,
}

impl MemoryRegion {
    #[inline]
    pub fn byte_len(&self) -> u64 {
        self.page_count.saturating_mul(PAGE_SIZE)
    }

    #[inline]
    pub fn end(&self) -> u64 {
        self.phys_start.saturating_add(self.byte_len())
    }
}

impl From<&RawDescriptor> for MemoryRegion {
    fn from(raw: &RawDescriptor) -> Self {
        Self {
            phys_start: raw.phys_start.get(),
            page_count: raw.page_count.get(),
            kind: RegionKind::from_raw(raw.ty.get()),
            attributes: MemoryAttributes::from_bits_retain(raw.attribute.get()),
        }
    }
}

/// Totals over a snapshot, computed without allocating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemorySummary {
    pub regions: usize,
    pub total_bytes: u64,
    pub usable_bytes: u64,
}

impl MemorySummary {
    #[inline]
    pub fn total_mib(&self) -> u64 {
        self.total_bytes / (1024 * 1024)
    }

    #[inline]
    pub fn usable_mib(&self) -> u64 {
        self.usable_bytes / (1024 * 1024)
    }
}

/// Memory map captured by one GetMemoryMap call, plus the buffer it lives in.
pub struct MemoryMapSnapshot<P> {
    buffer: P,
    layout: MapLayout,
}

impl<P: Deref<Target = [u8]>> MemoryMapSnapshot<P> {
    /// Run the two-phase query against the firmware.
    pub fn acquire<F>(fw: &mut F) -> Result<Self, FirmwareError>
    where
        F: Firmware<Pool = P>,
        P: DerefMut<Target = [u8]>,
    {
        let required = match fw.memory_map(&mut []) {
            Err(FirmwareError::BufferTooSmall { required }) => required,
            Ok(layout) => layout.map_size,
            Err(e) => return Err(e),
        };

        let mut buffer = fw.allocate_pool(required)?;

        // The allocation above may have split a region; if the map grew we
        // report it rather than chase it.
        let layout = match fw.memory_map(&mut *buffer) {
            Ok(layout) => layout,
            Err(e) => {
                log::warn!(target: "memmap", "second GetMemoryMap failed: {}", e);
                return Err(e);
            }
        };

        Self::from_parts(buffer, layout)
    }

    /// Wrap an already-filled buffer. Rejects strides below the v1 layout and
    /// sizes that overrun the buffer.
    pub fn from_parts(buffer: P, layout: MapLayout) -> Result<Self, FirmwareError> {
        if layout.descriptor_size < MIN_DESCRIPTOR_SIZE {
            return Err(FirmwareError::InvalidParameter);
        }
        if layout.map_size > buffer.len() {
            return Err(FirmwareError::InvalidParameter);
        }
        Ok(Self { buffer, layout })
    }

    #[inline]
    pub fn key(&self) -> MapKey {
        self.layout.key
    }

    #[inline]
    pub fn layout(&self) -> MapLayout {
        self.layout
    }

    #[inline]
    pub fn descriptor_size(&self) -> usize {
        self.layout.descriptor_size
    }

    #[inline]
    pub fn descriptor_version(&self) -> u32 {
        self.layout.descriptor_version
    }

    /// Number of descriptors: `map_size / descriptor_size`.
    #[inline]
    pub fn len(&self) -> usize {
        self.layout.map_size / self.layout.descriptor_size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The descriptor bytes the firmware wrote (trailing partial stride excluded).
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer[..self.len() * self.layout.descriptor_size]
    }

    pub fn regions(&self) -> Regions<'_> {
        Regions {
            chunks: self.as_bytes().chunks_exact(self.layout.descriptor_size),
        }
    }

    /// Sum of `page_count * 4096` over every region.
    pub fn total_bytes(&self) -> u64 {
        self.regions()
            .fold(0u64, |acc, r| acc.saturating_add(r.byte_len()))
    }

    pub fn summary(&self) -> MemorySummary {
        self.regions().fold(MemorySummary::default(), |mut s, r| {
            s.regions += 1;
            s.total_bytes = s.total_bytes.saturating_add(r.byte_len());
            if r.kind.is_usable_after_exit() {
                s.usable_bytes = s.usable_bytes.saturating_add(r.byte_len());
            }
            s
        })
    }
}

/// Stride-aware walk over the descriptors of a snapshot.
pub struct Regions<'a> {
    chunks: ChunksExact<'a, u8>,
}

impl Iterator for Regions<'_> {
    type Item = MemoryRegion;

    fn next(&mut self) -> Option<MemoryRegion> {
        let chunk = self.chunks.next()?;
        let (raw, _) = LayoutVerified::<_, RawDescriptor>::new_unaligned_from_prefix(chunk)?;
        Some(MemoryRegion::from(&*raw))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chunks.size_hint()
    }
}

impl ExactSizeIterator for Regions<'_> {}
