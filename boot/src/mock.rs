//! Scripted firmware and image loader for unit tests.
//!
//! The map key is a generation counter bumped by every allocation and every
//! pool free, so a stale key really is rejected by `exit_boot_services`.
//! Any facade call after a successful exit panics.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use crate::error::{FirmwareError, KernelLoadError};
use crate::firmware::{
    Firmware, FirmwareInfo, FirmwareTime, KeyPress, MapKey, MapLayout, ResetKind, Tone,
};
use crate::loader::{ImageLoader, KernelImage};

/// Stride reported by the mock; wider than the 40-byte v1 layout, like OVMF.
pub const DESCRIPTOR_SIZE: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockRegion {
    pub ty: u32,
    pub start: u64,
    pub pages: u64,
    pub attribute: u64,
}

impl MockRegion {
    pub fn new(ty: u32, start: u64, pages: u64, attribute: u64) -> Self {
        Self { ty, start, pages, attribute }
    }
}

pub fn write_descriptor(dst: &mut [u8], r: &MockRegion) {
    dst[0..4].copy_from_slice(&r.ty.to_le_bytes());
    dst[4..8].fill(0);
    dst[8..16].copy_from_slice(&r.start.to_le_bytes());
    dst[16..24].copy_from_slice(&r.start.to_le_bytes());
    dst[24..32].copy_from_slice(&r.pages.to_le_bytes());
    dst[32..40].copy_from_slice(&r.attribute.to_le_bytes());
    dst[40..].fill(0xA5);
}

pub fn encode_map(regions: &[MockRegion], stride: usize) -> Vec<u8> {
    let mut out = vec![0u8; regions.len() * stride];
    for (chunk, r) in out.chunks_exact_mut(stride).zip(regions) {
        write_descriptor(chunk, r);
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Output(String),
    Stall(usize),
    MapQuery(usize),
    Alloc(usize),
    Free,
    Exit { key: MapKey, ok: bool },
    Reset(ResetKind),
}

type EventLog = Rc<RefCell<Vec<Event>>>;

pub struct MockPool {
    data: Vec<u8>,
    generation: Rc<Cell<usize>>,
    events: EventLog,
}

impl Deref for MockPool {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for MockPool {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for MockPool {
    fn drop(&mut self) {
        self.generation.set(self.generation.get() + 1);
        self.events.borrow_mut().push(Event::Free);
    }
}

pub struct MockFirmware {
    pub regions: Vec<MockRegion>,
    pub descriptor_size: usize,
    /// Descriptors the map gains per allocation (region splits).
    pub growth_after_alloc: usize,
    /// Exit attempts to fail as if something allocated behind our back.
    pub stale_exits: u32,
    pub fail_next_query: Option<FirmwareError>,
    pub alloc_fails: bool,
    keys: BTreeMap<usize, KeyPress>,
    polls: usize,
    stall_budget: usize,
    extra_descriptors: usize,
    generation: Rc<Cell<usize>>,
    events: EventLog,
    output: String,
    exited: bool,
}

impl MockFirmware {
    pub fn new() -> Self {
        Self {
            regions: vec![
                MockRegion::new(7, 0x0000_0000, 160, 0xF),
                MockRegion::new(2, 0x0010_0000, 256, 0xF),
                MockRegion::new(7, 0x0020_0000, 0x3_FE00, 0xF),
                MockRegion::new(4, 0x4000_0000, 1024, 0xF),
                MockRegion::new(10, 0x7FF0_0000, 16, 0xF),
            ],
            descriptor_size: DESCRIPTOR_SIZE,
            growth_after_alloc: 0,
            stale_exits: 0,
            fail_next_query: None,
            alloc_fails: false,
            keys: BTreeMap::new(),
            polls: 0,
            stall_budget: 100_000,
            extra_descriptors: 0,
            generation: Rc::new(Cell::new(1)),
            events: Rc::new(RefCell::new(Vec::new())),
            output: String::new(),
            exited: false,
        }
    }

    /// Deliver `key` on the `poll`-th call to `read_key` (0-based, global).
    pub fn key_at(mut self, poll: usize, key: char) -> Self {
        self.keys.insert(poll, KeyPress::Char(key));
        self
    }

    pub fn special_key_at(mut self, poll: usize, scan_code: u16) -> Self {
        self.keys.insert(poll, KeyPress::Special(scan_code));
        self
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn occurrences(&self, needle: &str) -> usize {
        self.output.matches(needle).count()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    pub fn polls(&self) -> usize {
        self.polls
    }

    pub fn stalls(&self) -> Vec<usize> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Stall(us) => Some(*us),
                _ => None,
            })
            .collect()
    }

    pub fn stalled_us(&self) -> usize {
        self.stalls().iter().sum()
    }

    pub fn resets(&self) -> Vec<ResetKind> {
        self.events
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Reset(kind) => Some(*kind),
                _ => None,
            })
            .collect()
    }

    pub fn exit_attempts(&self) -> usize {
        self.count(|e| matches!(e, Event::Exit { .. }))
    }

    pub fn map_queries(&self) -> usize {
        self.count(|e| matches!(e, Event::MapQuery(_)))
    }

    pub fn allocations(&self) -> usize {
        self.count(|e| matches!(e, Event::Alloc(_)))
    }

    pub fn exited(&self) -> bool {
        self.exited
    }

    pub fn current_key(&self) -> MapKey {
        MapKey(self.generation.get())
    }

    fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.borrow().iter().filter(|e| pred(e)).count()
    }

    fn record(&self, event: Event) {
        self.events.borrow_mut().push(event);
    }

    fn alive(&self) {
        assert!(!self.exited, "firmware service used after ExitBootServices");
    }
}

impl Firmware for MockFirmware {
    type Pool = MockPool;

    fn read_key(&mut self) -> Result<Option<KeyPress>, FirmwareError> {
        self.alive();
        let poll = self.polls;
        self.polls += 1;
        Ok(self.keys.remove(&poll))
    }

    fn stall(&mut self, microseconds: usize) {
        self.alive();
        self.record(Event::Stall(microseconds));
        self.stall_budget = self
            .stall_budget
            .checked_sub(1)
            .expect("stall budget exhausted: menu never resolved");
    }

    fn memory_map(&mut self, buffer: &mut [u8]) -> Result<MapLayout, FirmwareError> {
        self.alive();
        self.record(Event::MapQuery(buffer.len()));
        if let Some(e) = self.fail_next_query.take() {
            return Err(e);
        }

        let count = self.regions.len() + self.extra_descriptors;
        let required = count * self.descriptor_size;
        if buffer.len() < required {
            return Err(FirmwareError::BufferTooSmall { required });
        }

        let filler = MockRegion::new(0, 0, 0, 0);
        let entries = self
            .regions
            .iter()
            .chain(std::iter::repeat(&filler).take(self.extra_descriptors));
        for (chunk, r) in buffer[..required]
            .chunks_exact_mut(self.descriptor_size)
            .zip(entries)
        {
            write_descriptor(chunk, r);
        }

        Ok(MapLayout {
            map_size: required,
            key: self.current_key(),
            descriptor_size: self.descriptor_size,
            descriptor_version: 1,
        })
    }

    fn allocate_pool(&mut self, size: usize) -> Result<MockPool, FirmwareError> {
        self.alive();
        if self.alloc_fails {
            return Err(FirmwareError::OutOfResources);
        }
        self.generation.set(self.generation.get() + 1);
        self.extra_descriptors += self.growth_after_alloc;
        self.record(Event::Alloc(size));
        Ok(MockPool {
            data: vec![0u8; size],
            generation: Rc::clone(&self.generation),
            events: Rc::clone(&self.events),
        })
    }

    fn exit_boot_services(&mut self, key: MapKey) -> Result<(), FirmwareError> {
        self.alive();
        if self.stale_exits > 0 {
            self.stale_exits -= 1;
            self.generation.set(self.generation.get() + 1);
            self.record(Event::Exit { key, ok: false });
            return Err(FirmwareError::InvalidParameter);
        }
        let ok = key == self.current_key();
        self.record(Event::Exit { key, ok });
        if !ok {
            return Err(FirmwareError::InvalidParameter);
        }
        self.exited = true;
        Ok(())
    }

    fn reset(&mut self, kind: ResetKind) -> FirmwareError {
        self.alive();
        self.record(Event::Reset(kind));
        FirmwareError::DeviceError
    }

    fn write_str(&mut self, text: &str) -> Result<(), FirmwareError> {
        self.alive();
        self.output.push_str(text);
        self.record(Event::Output(text.to_string()));
        Ok(())
    }

    fn set_tone(&mut self, _tone: Tone) -> Result<(), FirmwareError> {
        self.alive();
        Ok(())
    }

    fn clear(&mut self) -> Result<(), FirmwareError> {
        self.alive();
        Ok(())
    }

    fn info(&self) -> FirmwareInfo {
        FirmwareInfo {
            vendor: "EDK II".to_string(),
            firmware_revision: 0x0001_0000,
            uefi_major: 2,
            uefi_minor: 70,
        }
    }

    fn time(&mut self) -> Result<FirmwareTime, FirmwareError> {
        self.alive();
        Ok(FirmwareTime {
            hour: 12,
            minute: 34,
            second: 56,
            nanosecond: 789,
        })
    }
}

pub struct MockLoader {
    pub kernel: Result<KernelImage, KernelLoadError>,
    pub shell: Result<(), FirmwareError>,
    pub loads: usize,
    pub shells: usize,
    pub unloaded: Vec<KernelImage>,
    pub last_path: Option<String>,
}

impl MockLoader {
    pub fn missing() -> Self {
        Self::returning(Err(KernelLoadError::NotFound))
    }

    pub fn with_kernel(kernel: KernelImage) -> Self {
        Self::returning(Ok(kernel))
    }

    pub fn returning(kernel: Result<KernelImage, KernelLoadError>) -> Self {
        Self {
            kernel,
            shell: Err(FirmwareError::Unsupported),
            loads: 0,
            shells: 0,
            unloaded: Vec::new(),
            last_path: None,
        }
    }
}

impl ImageLoader<MockFirmware> for MockLoader {
    fn load_kernel(
        &mut self,
        _fw: &mut MockFirmware,
        path: &str,
    ) -> Result<KernelImage, KernelLoadError> {
        self.loads += 1;
        self.last_path = Some(path.to_string());
        self.kernel
    }

    fn launch_shell(&mut self, _fw: &mut MockFirmware) -> Result<(), FirmwareError> {
        self.shells += 1;
        self.shell
    }

    fn unload(&mut self, _fw: &mut MockFirmware, image: &KernelImage) -> Result<(), FirmwareError> {
        self.unloaded.push(*image);
        Ok(())
    }
}
