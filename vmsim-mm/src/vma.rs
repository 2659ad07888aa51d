//! Virtual memory areas and their free-region lists
//!
//! A [`VmArea`] is a contiguous range of an address space with a heap that
//! grows upward from its start (`sbrk`). Regions handed back by `free` are
//! kept on a free list that later allocations search first-fit before the
//! heap is grown. Adjacent free regions are never merged.

use alloc::vec::Vec;
use core::ops::Range;

use vmsim_api::{Addr, AreaId, PageNum, Size};

/// A half-open byte range `[start, end)` of an address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    /// First byte
    pub start: Addr,
    /// One past the last byte
    pub end: Addr,
}

impl Region {
    /// Creates a region
    pub const fn new(start: Addr, end: Addr) -> Self {
        Self { start, end }
    }

    /// Length in bytes
    pub const fn len(&self) -> Size {
        self.end.saturating_sub(self.start)
    }

    /// True when the region covers no byte
    pub const fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// True when `addr` lies inside the region
    pub const fn contains(&self, addr: Addr) -> bool {
        self.start <= addr && addr < self.end
    }

    /// True when the two ranges share at least one byte
    pub const fn overlaps(&self, other: &Region) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Page numbers touched by the region
    pub fn pages(&self, page_shift: u32) -> Range<PageNum> {
        if self.is_empty() {
            return 0..0;
        }
        let first = self.start >> page_shift;
        let last = (self.end - 1) >> page_shift;
        first..last + 1
    }
}

/// A virtual memory area
#[derive(Debug, Clone)]
pub struct VmArea {
    id: AreaId,
    start: Addr,
    end: Addr,
    sbrk: Addr,
    free_regions: Vec<Region>,
}

impl VmArea {
    /// Creates an empty area spanning `[start, end)` with the heap at `start`
    pub fn new(id: AreaId, start: Addr, end: Addr) -> Self {
        Self {
            id,
            start,
            end,
            sbrk: start,
            free_regions: Vec::new(),
        }
    }

    /// Area id
    pub fn id(&self) -> AreaId {
        self.id
    }

    /// Lower bound
    pub fn start(&self) -> Addr {
        self.start
    }

    /// Upper bound the heap may not cross
    pub fn end(&self) -> Addr {
        self.end
    }

    /// Current heap top
    pub fn sbrk(&self) -> Addr {
        self.sbrk
    }

    /// The full range
    pub fn range(&self) -> Region {
        Region::new(self.start, self.end)
    }

    /// Free list, head first
    pub fn free_regions(&self) -> &[Region] {
        &self.free_regions
    }

    /// Index of the first free region that can hold `size` bytes
    pub fn first_fit(&self, size: Size) -> Option<usize> {
        self.free_regions
            .iter()
            .position(|rg| rg.start + size <= rg.end)
    }

    /// Carves `size` bytes off the front of free region `index`.
    ///
    /// The remainder stays on the list in place; a fragment consumed whole
    /// is removed.
    pub fn take_free_region(&mut self, index: usize, size: Size) -> Option<Region> {
        let fragment = self.free_regions.get_mut(index)?;
        if fragment.start + size > fragment.end {
            return None;
        }
        let taken = Region::new(fragment.start, fragment.start + size);
        if taken.end < fragment.end {
            fragment.start = taken.end;
        } else {
            self.free_regions.remove(index);
        }
        Some(taken)
    }

    /// First-fit search and carve in one step
    pub fn get_free_region(&mut self, size: Size) -> Option<Region> {
        let index = self.first_fit(size)?;
        self.take_free_region(index, size)
    }

    /// Pushes a region onto the head of the free list.
    ///
    /// Empty regions are dropped. Returns whether the region was listed.
    pub fn enlist_free_region(&mut self, region: Region) -> bool {
        if region.is_empty() {
            return false;
        }
        self.free_regions.insert(0, region);
        true
    }

    /// The span the heap would cover after growing by `size`, if it stays
    /// within the area
    pub fn heap_extent(&self, size: Size) -> Option<Region> {
        let new_top = self.sbrk.checked_add(size)?;
        (new_top <= self.end).then_some(Region::new(self.sbrk, new_top))
    }

    /// Lowers the upper bound to `end` if the heap and every free region
    /// stay below it
    pub fn shrink_end(&mut self, end: Addr) -> bool {
        let fits = self.sbrk <= end && self.free_regions.iter().all(|rg| rg.end <= end);
        if fits && end >= self.start {
            self.end = end;
        }
        fits && end >= self.start
    }

    /// Moves the heap top. Never moves it outside the area.
    pub fn set_sbrk(&mut self, top: Addr) {
        self.sbrk = top.clamp(self.start, self.end);
    }
}
