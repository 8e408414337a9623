//! loader.rs: kernel image collaborator and entry resolution
//!
//! Finding and reading the image is the platform's job ([`ImageLoader`]);
//! this module only decides where inside the loaded bytes execution starts:
//! - ELF64 → file offset of `e_entry` inside the PT_LOAD segment holding it
//! - anything else → flat binary entered at offset 0
//!
//! Segments are not relocated: the image runs where it was read.

use xmas_elf::{header, program, ElfFile};

use crate::error::{FirmwareError, KernelLoadError};
use crate::firmware::Firmware;

/// A kernel image staged in memory and ready for handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelImage {
    /// Physical address of the first byte of the image.
    pub base: u64,
    pub size: usize,
    /// Physical address control transfers to.
    pub entry: u64,
}

impl KernelImage {
    /// Describe an image whose bytes are already at `base`.
    pub fn from_loaded(base: u64, bytes: &[u8]) -> Result<Self, KernelLoadError> {
        let offset = entry_offset(bytes)?;
        let entry = base
            .checked_add(offset as u64)
            .ok_or(KernelLoadError::Invalid("entry address overflows"))?;
        Ok(Self {
            base,
            size: bytes.len(),
            entry,
        })
    }
}

/// Locates external images on behalf of the orchestrator.
pub trait ImageLoader<F: Firmware> {
    /// Read the kernel at `path`. A missing file is [`KernelLoadError::NotFound`].
    fn load_kernel(&mut self, fw: &mut F, path: &str) -> Result<KernelImage, KernelLoadError>;

    /// Start the firmware shell and return when it exits.
    fn launch_shell(&mut self, fw: &mut F) -> Result<(), FirmwareError>;

    /// Give back the memory of an image that will not be entered.
    fn unload(&mut self, fw: &mut F, image: &KernelImage) -> Result<(), FirmwareError>;
}

impl<F: Firmware, L: ImageLoader<F> + ?Sized> ImageLoader<F> for &mut L {
    fn load_kernel(&mut self, fw: &mut F, path: &str) -> Result<KernelImage, KernelLoadError> {
        (**self).load_kernel(fw, path)
    }

    fn launch_shell(&mut self, fw: &mut F) -> Result<(), FirmwareError> {
        (**self).launch_shell(fw)
    }

    fn unload(&mut self, fw: &mut F, image: &KernelImage) -> Result<(), FirmwareError> {
        (**self).unload(fw, image)
    }
}

const ELF_MAGIC: &[u8; 4] = b"\x7FELF";
const PHDR64_SIZE: u64 = 56;

#[inline]
fn is_elf(image: &[u8]) -> bool {
    image.starts_with(ELF_MAGIC)
}

/// Byte offset inside `image` where execution starts.
pub fn entry_offset(image: &[u8]) -> Result<usize, KernelLoadError> {
    if image.is_empty() {
        return Err(KernelLoadError::Invalid("image is empty"));
    }
    if !is_elf(image) {
        return Ok(0);
    }

    let elf = ElfFile::new(image).map_err(KernelLoadError::Invalid)?;
    if !matches!(elf.header.pt1.class(), header::Class::SixtyFour) {
        return Err(KernelLoadError::Invalid("elf: not a 64-bit image"));
    }

    // xmas-elf indexes program headers without bounds checks.
    let pt2 = &elf.header.pt2;
    if u64::from(pt2.ph_entry_size()) != PHDR64_SIZE {
        return Err(KernelLoadError::Invalid("elf: bad phentsize"));
    }
    let table_end = u64::from(pt2.ph_count())
        .checked_mul(PHDR64_SIZE)
        .and_then(|len| len.checked_add(pt2.ph_offset()))
        .ok_or(KernelLoadError::Invalid("elf: ph table overflow"))?;
    if table_end > image.len() as u64 {
        return Err(KernelLoadError::Invalid("elf: ph table oob"));
    }

    let entry = pt2.entry_point();
    for ph in elf.program_iter() {
        if !matches!(ph.get_type(), Ok(program::Type::Load)) {
            continue;
        }
        let start = ph.virtual_addr();
        let end = start
            .checked_add(ph.file_size())
            .ok_or(KernelLoadError::Invalid("elf: filesz overflow"))?;
        if !(start..end).contains(&entry) {
            continue;
        }

        let file_off = ph
            .offset()
            .checked_add(entry - start)
            .ok_or(KernelLoadError::Invalid("elf: offset overflow"))?;
        let file_off = usize::try_from(file_off)
            .map_err(|_| KernelLoadError::Invalid("elf: offset too large"))?;
        if file_off >= image.len() {
            return Err(KernelLoadError::Invalid("elf: entry offset oob"));
        }
        return Ok(file_off);
    }

    Err(KernelLoadError::Invalid("elf: entry not in any PT_LOAD"))
}
