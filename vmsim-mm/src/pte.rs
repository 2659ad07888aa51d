//! Page table entry codec and page directory
//!
//! A PTE is a 32-bit descriptor:
//!
//! ```text
//!  31  30  29  28  27 ........ 13 12 ............ 0
//! +---+---+---+---+---------------+----------------+
//! | P | S | R | D |    unused     |   frame number | resident
//! +---+---+---+---+------+--------+---------+------+
//! | P | S | R | D |unused|     swap offset  | type | swapped
//! +---+---+---+---+------+------------------+------+
//!                  31..26      25 .. 5        4..0
//! ```
//!
//! The frame number and the swap fields share their low bits. A slot that is
//! all zero has never been touched.

use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;
use static_assertions::const_assert;

use vmsim_api::{Error, FrameNum, PageNum, Result};

bitflags! {
    /// Status bits of a page table entry
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u32 {
        /// Page is mapped to a frame
        const PRESENT = 1 << 31;
        /// Page's last known location is a swap device
        const SWAPPED = 1 << 30;
        /// Reserved
        const RESERVED = 1 << 29;
        /// Page was written (kept, not consulted)
        const DIRTY = 1 << 28;
    }
}

/// Frame number field, bits 0..=12
pub const PTE_FPN_MASK: u32 = 0x0000_1fff;
/// Frame number low bit
pub const PTE_FPN_LOBIT: u32 = 0;
/// Swap type field, bits 0..=4
pub const PTE_SWPTYP_MASK: u32 = 0x0000_001f;
/// Swap type low bit
pub const PTE_SWPTYP_LOBIT: u32 = 0;
/// Swap offset field, bits 5..=25
pub const PTE_SWPOFF_MASK: u32 = 0x03ff_ffe0;
/// Swap offset low bit
pub const PTE_SWPOFF_LOBIT: u32 = 5;

/// Largest frame number the FPN field can hold
pub const MAX_PTE_FPN: usize = (PTE_FPN_MASK >> PTE_FPN_LOBIT) as usize;
/// Largest swap device index the swap type field can hold
pub const MAX_PTE_SWPTYP: usize = (PTE_SWPTYP_MASK >> PTE_SWPTYP_LOBIT) as usize;
/// Largest swap offset the swap offset field can hold
pub const MAX_PTE_SWPOFF: usize = (PTE_SWPOFF_MASK >> PTE_SWPOFF_LOBIT) as usize;

const STATUS_BITS: u32 = PteFlags::all().bits();

const_assert!(PTE_FPN_MASK & STATUS_BITS == 0);
const_assert!(PTE_SWPOFF_MASK & STATUS_BITS == 0);
const_assert!(PTE_SWPTYP_MASK & PTE_SWPOFF_MASK == 0);
const_assert!(PTE_SWPTYP_MASK & PTE_FPN_MASK == PTE_SWPTYP_MASK);

#[inline]
const fn getval(word: u32, mask: u32, lobit: u32) -> u32 {
    (word & mask) >> lobit
}

#[inline]
const fn setval(word: u32, val: u32, mask: u32, lobit: u32) -> u32 {
    (word & !mask) | ((val << lobit) & mask)
}

/// Decoded view of a page table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PteState {
    /// Never touched (all zero)
    Unused,
    /// Mapped to a RAM frame
    Resident(FrameNum),
    /// Stored on swap device `swap_type` at frame `swap_offset`
    Swapped {
        /// Swap device index
        swap_type: usize,
        /// Frame number on that device
        swap_offset: FrameNum,
    },
    /// Non-zero but neither present nor swapped (e.g. only dirty set)
    Invalid,
}

/// A 32-bit page table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[repr(transparent)]
pub struct Pte(u32);

impl Pte {
    /// The all-zero "never touched" entry
    pub const EMPTY: Pte = Pte(0);

    /// Wraps a raw descriptor
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw descriptor
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Status bits
    pub const fn flags(self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0)
    }

    /// Builds the descriptor in place.
    ///
    /// Does nothing when `present` is false. Otherwise sets the present bit
    /// and, depending on `swapped`, either the frame number (clearing the
    /// swapped bit) or the swap fields (setting the swapped bit as well).
    /// Bits outside the written fields keep their value.
    pub fn init(
        &mut self,
        present: bool,
        fpn: FrameNum,
        dirty: bool,
        swapped: bool,
        swap_type: usize,
        swap_offset: FrameNum,
    ) {
        if !present {
            return;
        }
        let mut word = self.0 | PteFlags::PRESENT.bits();
        if dirty {
            word |= PteFlags::DIRTY.bits();
        } else {
            word &= !PteFlags::DIRTY.bits();
        }
        if swapped {
            word |= PteFlags::SWAPPED.bits();
            word = setval(word, swap_type as u32, PTE_SWPTYP_MASK, PTE_SWPTYP_LOBIT);
            word = setval(word, swap_offset as u32, PTE_SWPOFF_MASK, PTE_SWPOFF_LOBIT);
        } else {
            word &= !PteFlags::SWAPPED.bits();
            word = setval(word, fpn as u32, PTE_FPN_MASK, PTE_FPN_LOBIT);
        }
        self.0 = word;
    }

    /// Marks the page swapped out to `swap_type`/`swap_offset`
    pub fn set_swap(&mut self, swap_type: usize, swap_offset: FrameNum) {
        let mut word = self.0 & !PteFlags::PRESENT.bits();
        word |= PteFlags::SWAPPED.bits();
        word = setval(word, swap_type as u32, PTE_SWPTYP_MASK, PTE_SWPTYP_LOBIT);
        word = setval(word, swap_offset as u32, PTE_SWPOFF_MASK, PTE_SWPOFF_LOBIT);
        self.0 = word;
    }

    /// Marks the page resident in frame `fpn`
    pub fn set_fpn(&mut self, fpn: FrameNum) {
        let mut word = self.0 | PteFlags::PRESENT.bits();
        word &= !PteFlags::SWAPPED.bits();
        word = setval(word, fpn as u32, PTE_FPN_MASK, PTE_FPN_LOBIT);
        self.0 = word;
    }

    /// Sets or clears the dirty bit
    pub fn set_dirty(&mut self, dirty: bool) {
        self.0 = if dirty {
            self.0 | PteFlags::DIRTY.bits()
        } else {
            self.0 & !PteFlags::DIRTY.bits()
        };
    }

    /// Present bit
    pub const fn is_present(self) -> bool {
        self.0 & PteFlags::PRESENT.bits() != 0
    }

    /// Swapped bit
    pub const fn is_swapped(self) -> bool {
        self.0 & PteFlags::SWAPPED.bits() != 0
    }

    /// Dirty bit
    pub const fn is_dirty(self) -> bool {
        self.0 & PteFlags::DIRTY.bits() != 0
    }

    /// True for a never-touched slot
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Frame number field
    pub const fn fpn(self) -> FrameNum {
        getval(self.0, PTE_FPN_MASK, PTE_FPN_LOBIT) as FrameNum
    }

    /// Swap type field
    pub const fn swap_type(self) -> usize {
        getval(self.0, PTE_SWPTYP_MASK, PTE_SWPTYP_LOBIT) as usize
    }

    /// Swap offset field
    pub const fn swap_offset(self) -> FrameNum {
        getval(self.0, PTE_SWPOFF_MASK, PTE_SWPOFF_LOBIT) as FrameNum
    }

    /// True when the entry describes a page usable without a fault
    pub const fn is_resident(self) -> bool {
        self.is_present() && !self.is_swapped()
    }

    /// Decodes the entry. The swapped bit wins over the present bit.
    pub const fn state(self) -> PteState {
        if self.is_empty() {
            PteState::Unused
        } else if self.is_swapped() {
            PteState::Swapped {
                swap_type: self.swap_type(),
                swap_offset: self.swap_offset(),
            }
        } else if self.is_present() {
            PteState::Resident(self.fpn())
        } else {
            PteState::Invalid
        }
    }
}

/// One address space's page directory
///
/// Slots are atomics so another process's fault path may rewrite an entry
/// (when evicting a frame it owns) without a lock. Each update is a
/// read-modify-write of one slot; nothing ties it to the matching TLB or
/// frame-list update.
pub struct PageDirectory {
    entries: alloc::boxed::Box<[AtomicU32]>,
}

impl PageDirectory {
    /// Creates a directory of `max_pgn` empty slots
    pub fn new(max_pgn: usize) -> Self {
        let entries = (0..max_pgn).map(|_| AtomicU32::new(0)).collect();
        Self { entries }
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the directory has no slots
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn slot(&self, pgn: PageNum) -> Result<&AtomicU32> {
        self.entries.get(pgn).ok_or(Error::InvalidPageAccess(pgn))
    }

    /// Reads an entry
    pub fn get(&self, pgn: PageNum) -> Result<Pte> {
        Ok(Pte(self.slot(pgn)?.load(Ordering::Acquire)))
    }

    /// Overwrites an entry
    pub fn set(&self, pgn: PageNum, pte: Pte) -> Result<()> {
        self.slot(pgn)?.store(pte.0, Ordering::Release);
        Ok(())
    }

    /// Applies a codec operation to an entry and returns the new value
    pub fn update<F>(&self, pgn: PageNum, f: F) -> Result<Pte>
    where
        F: Fn(&mut Pte),
    {
        let slot = self.slot(pgn)?;
        let mut current = slot.load(Ordering::Acquire);
        loop {
            let mut pte = Pte(current);
            f(&mut pte);
            match slot.compare_exchange_weak(current, pte.0, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return Ok(pte),
                Err(actual) => current = actual,
            }
        }
    }

    /// Like [`update`](Self::update), but `f` may decline by returning
    /// `false`, in which case the entry is left as it is and `None` returned
    pub fn update_if<F>(&self, pgn: PageNum, f: F) -> Result<Option<Pte>>
    where
        F: Fn(&mut Pte) -> bool,
    {
        let slot = self.slot(pgn)?;
        let mut current = slot.load(Ordering::Acquire);
        loop {
            let mut pte = Pte(current);
            if !f(&mut pte) {
                return Ok(None);
            }
            match slot.compare_exchange_weak(current, pte.0, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return Ok(Some(pte)),
                Err(actual) => current = actual,
            }
        }
    }

    /// Zeroes an entry and returns its previous value
    pub fn clear(&self, pgn: PageNum) -> Result<Pte> {
        Ok(Pte(self.slot(pgn)?.swap(0, Ordering::AcqRel)))
    }

    /// Iterates over the non-empty entries in `[start, end)`
    pub fn entries(&self, start: PageNum, end: PageNum) -> impl Iterator<Item = (PageNum, Pte)> + '_ {
        let end = end.min(self.entries.len());
        let start = start.min(end);
        (start..end).filter_map(move |pgn| {
            let pte = Pte(self.entries[pgn].load(Ordering::Acquire));
            (!pte.is_empty()).then_some((pgn, pte))
        })
    }
}
