//! Software TLB
//!
//! A direct-mapped, 1-way cache from `(pid, pgn)` to a PTE value, stored in
//! an unformatted random-access memphy as consecutive `(tag, value)` word
//! pairs. For a key the hash is `i = pid * max_pgn + pgn` (wrapping 32-bit);
//! the slot is `i % N` and the tag is `i / N`.
//!
//! Bit 31 of the stored tag word is a validity bit. Without it a zeroed slot
//! would read as a hit for every key whose tag is 0.
//!
//! One lock serializes every operation; it also guards the counters.

use spin::Mutex;

use vmsim_api::{AccessMode, LockOption, PageNum, Pid, Result};

use crate::memphy::Memphy;

/// Bytes per slot: a tag word and a value word
pub const TLB_SLOT_SIZE: usize = 8;

const TLB_VALID: u32 = 1 << 31;

/// TLB counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TlbStats {
    /// Lookups whose tag matched
    pub hits: u64,
    /// Lookups whose tag did not match
    pub misses: u64,
    /// Slot writes
    pub writes: u64,
    /// Whole-cache and per-pid flushes
    pub flushes: u64,
}

/// The shared TLB cache
pub struct TlbCache {
    device: Memphy,
    slots: u32,
    max_pgn: u32,
    stats: Mutex<TlbStats>,
}

impl TlbCache {
    /// Creates a cache over `size` bytes of backing storage.
    ///
    /// `max_pgn` is the page-directory size used in the key hash.
    pub fn new(size: usize, max_pgn: usize) -> Self {
        let slots = (size / TLB_SLOT_SIZE).max(1);
        Self {
            device: Memphy::unformatted(LockOption::Ram, slots * TLB_SLOT_SIZE, AccessMode::Random),
            slots: slots as u32,
            max_pgn: max_pgn as u32,
            stats: Mutex::new(TlbStats::default()),
        }
    }

    /// Number of slots
    pub fn slots(&self) -> usize {
        self.slots as usize
    }

    #[inline]
    fn index(&self, pid: Pid, pgn: PageNum) -> u32 {
        pid.wrapping_mul(self.max_pgn).wrapping_add(pgn as u32)
    }

    /// Byte address of the slot and the tag word expected there
    #[inline]
    fn locate(&self, pid: Pid, pgn: PageNum) -> (usize, u32) {
        let i = self.index(pid, pgn);
        let slot = (i % self.slots) as usize;
        let tag = i / self.slots;
        (slot * TLB_SLOT_SIZE, tag | TLB_VALID)
    }

    /// Looks up a cached PTE value; `None` on a miss
    pub fn read(&self, pid: Pid, pgn: PageNum) -> Option<u32> {
        let (addr, tag) = self.locate(pid, pgn);
        let mut stats = self.stats.lock();
        let hit = self.device.read_word(addr).ok() == Some(tag);
        if !hit {
            stats.misses += 1;
            return None;
        }
        stats.hits += 1;
        self.device.read_word(addr + 4).ok()
    }

    /// Caches a PTE value, evicting whatever occupied the slot
    pub fn write(&self, pid: Pid, pgn: PageNum, value: u32) -> Result<()> {
        let (addr, tag) = self.locate(pid, pgn);
        let mut stats = self.stats.lock();
        self.device.write_word(addr, tag)?;
        self.device.write_word(addr + 4, value)?;
        stats.writes += 1;
        Ok(())
    }

    /// Rewrites the slot only if it currently caches this key
    pub fn refresh(&self, pid: Pid, pgn: PageNum, value: u32) -> Result<bool> {
        let (addr, tag) = self.locate(pid, pgn);
        let mut stats = self.stats.lock();
        if self.device.read_word(addr)? != tag {
            return Ok(false);
        }
        self.device.write_word(addr + 4, value)?;
        stats.writes += 1;
        Ok(true)
    }

    /// Empties the slot if it currently caches this key
    pub fn invalidate(&self, pid: Pid, pgn: PageNum) -> Result<bool> {
        let (addr, tag) = self.locate(pid, pgn);
        let _stats = self.stats.lock();
        if self.device.read_word(addr)? != tag {
            return Ok(false);
        }
        self.device.write_word(addr, 0)?;
        self.device.write_word(addr + 4, 0)?;
        Ok(true)
    }

    /// Zeroes every slot
    pub fn flush(&self) {
        let mut stats = self.stats.lock();
        self.device.zero();
        stats.flushes += 1;
    }

    /// Zeroes every slot holding a key of `pid`.
    ///
    /// Keys are reconstructed from slot and tag, which is exact as long as
    /// `pid * max_pgn` did not wrap when the entry was written.
    pub fn flush_pid(&self, pid: Pid) -> Result<usize> {
        let mut stats = self.stats.lock();
        let mut cleared = 0;
        for slot in 0..self.slots {
            let addr = slot as usize * TLB_SLOT_SIZE;
            let word = self.device.read_word(addr)?;
            if word & TLB_VALID == 0 {
                continue;
            }
            let i = (word & !TLB_VALID).wrapping_mul(self.slots).wrapping_add(slot);
            if self.max_pgn != 0 && i / self.max_pgn == pid {
                self.device.write_word(addr, 0)?;
                self.device.write_word(addr + 4, 0)?;
                cleared += 1;
            }
        }
        stats.flushes += 1;
        Ok(cleared)
    }

    /// Counter snapshot
    pub fn stats(&self) -> TlbStats {
        *self.stats.lock()
    }
}
