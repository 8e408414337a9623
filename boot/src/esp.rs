//! Kernel loading from the boot volume (the ESP the image was started from).

use uefi::proto::media::file::{File, FileAttribute, FileInfo, FileMode, RegularFile};
use uefi::table::boot::{AllocateType, MemoryType};
use uefi::CString16;

use lumen_boot::error::{FirmwareError, KernelLoadError};
use lumen_boot::loader::{ImageLoader, KernelImage};
use lumen_boot::memory_map::PAGE_SIZE;

use crate::platform::{status_to_error, UefiFirmware};

fn fw_error(e: uefi::Error<impl core::fmt::Debug>) -> KernelLoadError {
    KernelLoadError::from(status_to_error(e.status()))
}

pub struct EspLoader;

impl ImageLoader<UefiFirmware> for EspLoader {
    fn load_kernel(
        &mut self,
        fw: &mut UefiFirmware,
        path: &str,
    ) -> Result<KernelImage, KernelLoadError> {
        let bs = fw.boot_services();
        let mut fs = bs.get_image_file_system(fw.image()).map_err(fw_error)?;
        let mut root = fs.open_volume().map_err(fw_error)?;

        let name = CString16::try_from(path)
            .map_err(|_| KernelLoadError::Invalid("kernel path is not UCS-2"))?;
        let mut file = root
            .open(&name, FileMode::Read, FileAttribute::empty())
            .map_err(fw_error)?
            .into_regular_file()
            .ok_or(KernelLoadError::Invalid("kernel path names a directory"))?;

        let info = file.get_boxed_info::<FileInfo>().map_err(fw_error)?;
        let size = usize::try_from(info.file_size())
            .map_err(|_| KernelLoadError::Invalid("kernel too large"))?;
        if size == 0 {
            return Err(KernelLoadError::Invalid("image is empty"));
        }

        let pages = pages_for(size);
        let base = bs
            .allocate_pages(AllocateType::AnyPages, MemoryType::LOADER_CODE, pages)
            .map_err(fw_error)?;
        log::info!(target: "loader", "{}: {} bytes -> {:#x}", path, size, base);

        // SAFETY: freshly allocated pages, owned by nobody else.
        let image = unsafe { core::slice::from_raw_parts_mut(base as *mut u8, size) };
        let staged = match read_exact(&mut file, &mut *image) {
            Ok(()) => KernelImage::from_loaded(base, image),
            Err(e) => Err(e),
        };
        if staged.is_err() {
            if let Err(e) = bs.free_pages(base, pages) {
                log::warn!(target: "loader", "FreePages failed: {:?}", e.status());
            }
        }
        staged
    }

    fn launch_shell(&mut self, _fw: &mut UefiFirmware) -> Result<(), FirmwareError> {
        log::info!(target: "boot", "no shell image configured");
        Err(FirmwareError::Unsupported)
    }

    fn unload(&mut self, fw: &mut UefiFirmware, image: &KernelImage) -> Result<(), FirmwareError> {
        fw.boot_services()
            .free_pages(image.base, pages_for(image.size))
            .map_err(|e| status_to_error(e.status()))
    }
}

fn pages_for(size: usize) -> usize {
    (size + PAGE_SIZE as usize - 1) / PAGE_SIZE as usize
}

fn read_exact(file: &mut RegularFile, mut buf: &mut [u8]) -> Result<(), KernelLoadError> {
    while !buf.is_empty() {
        let n = file.read(buf).map_err(fw_error)?;
        if n == 0 {
            return Err(KernelLoadError::Invalid("kernel file truncated"));
        }
        let rest = buf;
        buf = &mut rest[n..];
    }
    Ok(())
}
