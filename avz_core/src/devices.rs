//! Simulated platform devices
//!
//! Deterministic implementations of the HAL traits. Each device keeps
//! its observable state behind a shared handle so tests can inspect
//! what the hypervisor did to the hardware: bytes written to the
//! console, IPIs sent, pages remapped.

use avz_hal::{ConsoleDevice, IpiController, RemapError, RemapService, TickSource};
use avz_types::CpuId;
use std::cell::RefCell;
use std::rc::Rc;

/// An in-memory UART. Bytes accumulate in a shared buffer.
pub struct SimConsole {
    output: Rc<RefCell<Vec<u8>>>,
}

impl SimConsole {
    pub fn new() -> Self {
        Self {
            output: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// A handle to the bytes written so far.
    pub fn output(&self) -> Rc<RefCell<Vec<u8>>> {
        Rc::clone(&self.output)
    }
}

impl Default for SimConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleDevice for SimConsole {
    fn put_byte(&mut self, byte: u8) {
        self.output.borrow_mut().push(byte);
    }
}

/// An interrupt controller that records every IPI and affinity change.
pub struct SimIpiController {
    ipis: Rc<RefCell<Vec<CpuId>>>,
    affinities: Rc<RefCell<Vec<(u32, CpuId)>>>,
}

impl SimIpiController {
    pub fn new() -> Self {
        Self {
            ipis: Rc::new(RefCell::new(Vec::new())),
            affinities: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// A handle to the IPIs sent so far, in order.
    pub fn ipis(&self) -> Rc<RefCell<Vec<CpuId>>> {
        Rc::clone(&self.ipis)
    }

    /// A handle to the affinity changes applied so far.
    pub fn affinities(&self) -> Rc<RefCell<Vec<(u32, CpuId)>>> {
        Rc::clone(&self.affinities)
    }
}

impl Default for SimIpiController {
    fn default() -> Self {
        Self::new()
    }
}

impl IpiController for SimIpiController {
    fn send_ipi(&mut self, cpu: CpuId) {
        self.ipis.borrow_mut().push(cpu);
    }

    fn set_affinity(&mut self, irq: u32, cpu: CpuId) {
        self.affinities.borrow_mut().push((irq, cpu));
    }
}

/// A tick source that advances only when told to.
pub struct SimTickSource {
    ticks: Rc<RefCell<u64>>,
    frequency_hz: u64,
}

impl SimTickSource {
    pub fn new(frequency_hz: u64) -> Self {
        Self {
            ticks: Rc::new(RefCell::new(0)),
            frequency_hz,
        }
    }

    /// A handle that lets a test advance the counter.
    pub fn ticks(&self) -> Rc<RefCell<u64>> {
        Rc::clone(&self.ticks)
    }
}

impl TickSource for SimTickSource {
    fn poll_ticks(&self) -> u64 {
        *self.ticks.borrow()
    }

    fn frequency_hz(&self) -> u64 {
        self.frequency_hz
    }
}

/// A remap service that hands out page-aligned virtual addresses from a
/// bump allocator and remembers every mapping.
pub struct SimRemap {
    next_va: u64,
    mappings: Rc<RefCell<Vec<(u64, u64, u64)>>>,
}

/// Base of the simulated remap window.
const REMAP_WINDOW_BASE: u64 = 0xffff_8000_0000_0000;

impl SimRemap {
    pub fn new() -> Self {
        Self {
            next_va: REMAP_WINDOW_BASE,
            mappings: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// A handle to `(phys, size, virt)` triples for every mapping made.
    pub fn mappings(&self) -> Rc<RefCell<Vec<(u64, u64, u64)>>> {
        Rc::clone(&self.mappings)
    }
}

impl Default for SimRemap {
    fn default() -> Self {
        Self::new()
    }
}

impl RemapService for SimRemap {
    fn remap(&mut self, base: u64, size: u64) -> Result<u64, RemapError> {
        if size == 0 {
            return Err(RemapError::Unmappable { base, size });
        }
        let va = self.next_va;
        let pages = size.div_ceil(crate::PAGE_SIZE);
        self.next_va = self
            .next_va
            .checked_add(pages * crate::PAGE_SIZE)
            .ok_or(RemapError::OutOfSpace)?;
        self.mappings.borrow_mut().push((base, size, va));
        Ok(va)
    }
}

/// The full set of platform devices the hypervisor consumes.
pub struct PlatformDevices {
    pub console: Box<dyn ConsoleDevice>,
    pub ipi: Box<dyn IpiController>,
    pub remap: Box<dyn RemapService>,
}

impl PlatformDevices {
    /// The simulated platform used by tests and the hosted build.
    pub fn simulated() -> Self {
        Self {
            console: Box::new(SimConsole::new()),
            ipi: Box::new(SimIpiController::new()),
            remap: Box::new(SimRemap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_records_bytes() {
        let mut console = SimConsole::new();
        let output = console.output();
        console.put_str("ok");
        assert_eq!(&*output.borrow(), b"ok");
    }

    #[test]
    fn test_ipi_controller_records_sends() {
        let mut ipi = SimIpiController::new();
        let sent = ipi.ipis();
        ipi.send_ipi(CpuId(2));
        ipi.set_affinity(0, CpuId(1));
        assert_eq!(&*sent.borrow(), &[CpuId(2)]);
        assert_eq!(&*ipi.affinities().borrow(), &[(0, CpuId(1))]);
    }

    #[test]
    fn test_remap_hands_out_distinct_pages() {
        let mut remap = SimRemap::new();
        let a = remap.remap(0x8000_0000, crate::PAGE_SIZE).unwrap();
        let b = remap.remap(0x8000_1000, crate::PAGE_SIZE).unwrap();
        assert_ne!(a, b);
        assert_eq!(b - a, crate::PAGE_SIZE);
    }

    #[test]
    fn test_remap_rejects_empty_range() {
        let mut remap = SimRemap::new();
        assert!(matches!(
            remap.remap(0x8000_0000, 0),
            Err(RemapError::Unmappable { .. })
        ));
    }

    #[test]
    fn test_tick_source_is_explicit() {
        let source = SimTickSource::new(1_000);
        let ticks = source.ticks();
        assert_eq!(source.poll_ticks(), 0);
        *ticks.borrow_mut() = 5;
        assert_eq!(source.poll_ticks(), 5);
    }
}
