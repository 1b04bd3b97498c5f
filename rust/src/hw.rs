//! Hardware seam: register access, clock query and the double-buffered ring
//! commit.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::models::Slot;

/// Register I/O failure, propagated verbatim to callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HwError {
    #[error("Register read from {addr:#x} failed")]
    ReadFailed { addr: u32 },
    #[error("Register write to {addr:#x} failed")]
    WriteFailed { addr: u32 },
    #[error("Clock query failed: {0}")]
    Clock(String),
    #[error("Ring of {len} slots does not fit a {max}-word page")]
    RingTooLong { len: usize, max: usize },
}

/// Raw register access provided by the platform.
pub trait RegisterIo: Send {
    fn read32(&mut self, addr: u32) -> Result<u32, HwError>;
    fn read64(&mut self, addr: u32) -> Result<u64, HwError>;
    fn write32(&mut self, addr: u32, value: u32) -> Result<(), HwError>;
    fn write64(&mut self, addr: u32, value: u64) -> Result<(), HwError>;
}

/// System clock query.
pub trait ClockSource: Send + Sync {
    fn clock_freq_mhz(&self) -> Result<f64, HwError>;
}

/// Base address of each ring page.
pub const SCHED_RING_BASE: [u32; 2] = [0x0010_0000, 0x0010_4000];
/// Ring length register of each page.
pub const SCHED_RING_LEN: [u32; 2] = [0x0010_8000, 0x0010_8004];
/// Selects which page the fabric walks.
pub const SCHED_ACTIVE_PAGE: u32 = 0x0010_8008;
/// Ring words one page holds.
pub const RING_PAGE_WORDS: usize = ((SCHED_RING_BASE[1] - SCHED_RING_BASE[0]) / 4) as usize;

const SLOT_FABRIC_MASK: u32 = 0x3f;
const SLOT_QUAD_BIT: u32 = 1 << 6;
const SLOT_IDLE_BIT: u32 = 1 << 7;

/// Pack one slot into its ring word.
pub fn encode_slot(slot: &Slot) -> u32 {
    if slot.idle {
        return SLOT_IDLE_BIT;
    }
    let fabric = slot.fabric.unwrap_or(0) as u32 & SLOT_FABRIC_MASK;
    let quad = if slot.quad { SLOT_QUAD_BIT } else { 0 };
    fabric | quad
}

/// Write `slots` to the page not currently walked, then flip the active page.
///
/// Returns the page that is active afterwards. On error the active page is
/// unchanged. A ring longer than a page is refused before any write.
pub fn commit_ring(io: &mut dyn RegisterIo, slots: &[Slot], active_page: u8) -> Result<u8, HwError> {
    if slots.len() > RING_PAGE_WORDS {
        return Err(HwError::RingTooLong {
            len: slots.len(),
            max: RING_PAGE_WORDS,
        });
    }
    let page = (active_page ^ 1) as usize;
    for (i, slot) in slots.iter().enumerate() {
        io.write32(SCHED_RING_BASE[page] + 4 * i as u32, encode_slot(slot))?;
    }
    io.write32(SCHED_RING_LEN[page], slots.len() as u32)?;
    io.write32(SCHED_ACTIVE_PAGE, page as u32)?;
    Ok(page as u8)
}

/// In-memory register file.
#[derive(Clone, Debug, Default)]
pub struct MemRegisters {
    regs: FxHashMap<u32, u64>,
    /// Address whose write fails, for exercising error paths.
    pub fail_write_at: Option<u32>,
    pub writes: usize,
}

impl MemRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, addr: u32) -> Option<u64> {
        self.regs.get(&addr).copied()
    }
}

impl RegisterIo for MemRegisters {
    fn read32(&mut self, addr: u32) -> Result<u32, HwError> {
        Ok(self.regs.get(&addr).copied().unwrap_or(0) as u32)
    }

    fn read64(&mut self, addr: u32) -> Result<u64, HwError> {
        Ok(self.regs.get(&addr).copied().unwrap_or(0))
    }

    fn write32(&mut self, addr: u32, value: u32) -> Result<(), HwError> {
        self.write64(addr, value as u64)
    }

    fn write64(&mut self, addr: u32, value: u64) -> Result<(), HwError> {
        if self.fail_write_at == Some(addr) {
            return Err(HwError::WriteFailed { addr });
        }
        self.writes += 1;
        self.regs.insert(addr, value);
        Ok(())
    }
}

/// Register file shared between the scheduler and an observer.
#[derive(Clone, Debug, Default)]
pub struct SharedRegisters(Arc<Mutex<MemRegisters>>);

impl SharedRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, addr: u32) -> Option<u64> {
        self.0.lock().get(addr)
    }

    pub fn writes(&self) -> usize {
        self.0.lock().writes
    }

    pub fn fail_write_at(&self, addr: Option<u32>) {
        self.0.lock().fail_write_at = addr;
    }

    /// Ring words of `page` as last written.
    pub fn ring(&self, page: usize) -> Vec<u32> {
        let regs = self.0.lock();
        let len = regs.get(SCHED_RING_LEN[page]).unwrap_or(0) as u32;
        (0..len)
            .map(|i| regs.get(SCHED_RING_BASE[page] + 4 * i).unwrap_or(0) as u32)
            .collect()
    }
}

impl RegisterIo for SharedRegisters {
    fn read32(&mut self, addr: u32) -> Result<u32, HwError> {
        self.0.lock().read32(addr)
    }

    fn read64(&mut self, addr: u32) -> Result<u64, HwError> {
        self.0.lock().read64(addr)
    }

    fn write32(&mut self, addr: u32, value: u32) -> Result<(), HwError> {
        self.0.lock().write32(addr, value)
    }

    fn write64(&mut self, addr: u32, value: u64) -> Result<(), HwError> {
        self.0.lock().write64(addr, value)
    }
}

/// Clock with a fixed frequency, or a fixed failure.
#[derive(Clone, Debug)]
pub struct FixedClock {
    pub mhz: Option<f64>,
}

impl FixedClock {
    pub fn new(mhz: f64) -> Self {
        Self { mhz: Some(mhz) }
    }

    pub fn unavailable() -> Self {
        Self { mhz: None }
    }
}

impl ClockSource for FixedClock {
    fn clock_freq_mhz(&self) -> Result<f64, HwError> {
        self.mhz
            .ok_or_else(|| HwError::Clock("frequency not reported".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_slot() {
        assert_eq!(encode_slot(&Slot::IDLE), SLOT_IDLE_BIT);
        assert_eq!(encode_slot(&Slot::owned(3, 9, false)), 9);
        assert_eq!(encode_slot(&Slot::owned(3, 9, true)), 9 | SLOT_QUAD_BIT);
    }

    #[test]
    fn test_commit_flips_page() {
        let mut regs = MemRegisters::new();
        let slots = vec![Slot::IDLE, Slot::owned(1, 4, false)];

        let page = commit_ring(&mut regs, &slots, 0).unwrap();
        assert_eq!(page, 1);
        assert_eq!(regs.get(SCHED_ACTIVE_PAGE), Some(1));
        assert_eq!(regs.get(SCHED_RING_LEN[1]), Some(2));
        assert_eq!(regs.get(SCHED_RING_BASE[1] + 4), Some(4));

        let page = commit_ring(&mut regs, &slots, page).unwrap();
        assert_eq!(page, 0);
        assert_eq!(regs.get(SCHED_ACTIVE_PAGE), Some(0));
    }

    #[test]
    fn test_commit_failure_keeps_active_page() {
        let mut regs = MemRegisters::new();
        regs.fail_write_at = Some(SCHED_RING_LEN[1]);
        let err = commit_ring(&mut regs, &[Slot::IDLE], 0).unwrap_err();
        assert_eq!(err, HwError::WriteFailed { addr: SCHED_RING_LEN[1] });
        assert_eq!(regs.get(SCHED_ACTIVE_PAGE), None);
    }

    #[test]
    fn test_ring_longer_than_a_page_is_refused() {
        assert_eq!(RING_PAGE_WORDS, 4096);
        let mut regs = MemRegisters::new();
        let err = commit_ring(&mut regs, &vec![Slot::IDLE; 5000], 0).unwrap_err();
        assert_eq!(err, HwError::RingTooLong { len: 5000, max: 4096 });
        assert_eq!(regs.writes, 0);

        let page = commit_ring(&mut regs, &vec![Slot::IDLE; RING_PAGE_WORDS], 0).unwrap();
        assert_eq!(page, 1);
        assert_eq!(regs.get(SCHED_RING_LEN[1]), Some(4096));
    }

    #[test]
    fn test_shared_registers_see_commits() {
        let regs = SharedRegisters::new();
        let mut handle = regs.clone();
        commit_ring(&mut handle, &[Slot::IDLE, Slot::owned(2, 5, true)], 0).unwrap();

        assert_eq!(regs.get(SCHED_ACTIVE_PAGE), Some(1));
        assert_eq!(regs.ring(1), vec![SLOT_IDLE_BIT, 5 | SLOT_QUAD_BIT]);
        assert_eq!(regs.writes(), 4);
    }

    #[test]
    fn test_fixed_clock() {
        assert_eq!(FixedClock::new(700.0).clock_freq_mhz().unwrap(), 700.0);
        assert!(FixedClock::unavailable().clock_freq_mhz().is_err());
    }
}
