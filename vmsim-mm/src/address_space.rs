//! Per-process address space: page directory, VMAs and the symbol table

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use vmsim_api::paging::is_aligned;
use vmsim_api::{Addr, AreaId, Error, MmId, PageNum, Pid, Result, SymbolId};

use crate::config::MmConfig;
use crate::pte::PageDirectory;
use crate::vma::{Region, VmArea};

/// Area created for every new address space
pub const DEFAULT_AREA: AreaId = 0;

/// An address space
///
/// The page directory is shared with the system arena so that another
/// process's fault path can rewrite entries of pages it evicts. Everything
/// else is private to the owning process.
pub struct AddressSpace {
    id: MmId,
    pid: Pid,
    pgd: Arc<PageDirectory>,
    areas: Vec<VmArea>,
    symbols: Vec<Option<Region>>,
    page_size: usize,
    page_shift: u32,
}

impl AddressSpace {
    /// Creates an address space with one area spanning the whole directory
    pub fn new(id: MmId, pid: Pid, pgd: Arc<PageDirectory>, config: &MmConfig) -> Self {
        let top = config.address_space_size();
        Self {
            id,
            pid,
            pgd,
            areas: vec![VmArea::new(DEFAULT_AREA, 0, top)],
            symbols: vec![None; config.symbol_table_size],
            page_size: config.page_size,
            page_shift: config.page_shift(),
        }
    }

    /// Arena id
    pub fn id(&self) -> MmId {
        self.id
    }

    /// Owning pid
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Page directory
    pub fn pgd(&self) -> &PageDirectory {
        &self.pgd
    }

    /// Page size in bytes
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// log2 of the page size
    pub fn page_shift(&self) -> u32 {
        self.page_shift
    }

    /// Page holding `addr`
    pub fn page_of(&self, addr: Addr) -> PageNum {
        addr >> self.page_shift
    }

    /// Offset of `addr` inside its page
    pub fn offset_of(&self, addr: Addr) -> usize {
        addr & (self.page_size - 1)
    }

    fn is_page_aligned(&self, addr: Addr) -> bool {
        is_aligned(addr, self.page_size)
    }

    // ------------------------------------------------------------------
    // Areas
    // ------------------------------------------------------------------

    /// Adds an area over `[start, end)` and returns its id.
    ///
    /// Both bounds must be page aligned so that no page is shared between
    /// areas. The range must lie inside the page directory and must not
    /// overlap an existing area.
    pub fn add_vma(&mut self, start: Addr, end: Addr) -> Result<AreaId> {
        let range = Region::new(start, end);
        let top = self.pgd.len() << self.page_shift;
        if range.is_empty() || end > top || !self.is_page_aligned(start) || !self.is_page_aligned(end) {
            return Err(Error::OutOfRange);
        }
        if self.areas.iter().any(|vma| vma.range().overlaps(&range)) {
            return Err(Error::VmaLimitExceeded);
        }
        let id = self.areas.iter().map(VmArea::id).max().map_or(0, |max| max + 1);
        self.areas.push(VmArea::new(id, start, end));
        Ok(id)
    }

    /// Splits the default area at `at`: the default area keeps `[start, at)`
    /// and a new area takes `[at, end)`.
    ///
    /// `at` must be page aligned. Fails once the default heap has grown
    /// past `at`.
    pub fn split_vma(&mut self, at: Addr) -> Result<AreaId> {
        if !self.is_page_aligned(at) {
            return Err(Error::OutOfRange);
        }
        let default = self.vma_mut(DEFAULT_AREA)?;
        let end = default.end();
        if at <= default.start() || at >= end || !default.shrink_end(at) {
            return Err(Error::VmaLimitExceeded);
        }
        self.add_vma(at, end)
    }

    /// Looks an area up by id
    pub fn vma(&self, id: AreaId) -> Result<&VmArea> {
        self.areas
            .iter()
            .find(|vma| vma.id() == id)
            .ok_or(Error::VmaNotFound(id))
    }

    /// Looks an area up by id for modification
    pub fn vma_mut(&mut self, id: AreaId) -> Result<&mut VmArea> {
        self.areas
            .iter_mut()
            .find(|vma| vma.id() == id)
            .ok_or(Error::VmaNotFound(id))
    }

    /// Area containing `addr`
    pub fn vma_of(&self, addr: Addr) -> Result<AreaId> {
        self.areas
            .iter()
            .find(|vma| vma.range().contains(addr))
            .map(VmArea::id)
            .ok_or(Error::RegionNotFound)
    }

    /// All areas
    pub fn areas(&self) -> &[VmArea] {
        &self.areas
    }

    /// Snapshot of an area's free list
    pub fn free_regions(&self, area: AreaId) -> Result<Vec<Region>> {
        Ok(self.vma(area)?.free_regions().to_vec())
    }

    // ------------------------------------------------------------------
    // Symbol table
    // ------------------------------------------------------------------

    /// Symbol table capacity
    pub fn symbol_capacity(&self) -> usize {
        self.symbols.len()
    }

    /// Region bound to a symbol
    pub fn symbol(&self, id: SymbolId) -> Result<Region> {
        self.symbols
            .get(id)
            .copied()
            .flatten()
            .ok_or(Error::RegionNotFound)
    }

    /// True when `id` names an unbound slot
    pub fn is_symbol_free(&self, id: SymbolId) -> bool {
        matches!(self.symbols.get(id), Some(None))
    }

    /// First unbound slot
    pub fn free_symbol_slot(&self) -> Option<SymbolId> {
        self.symbols.iter().position(Option::is_none)
    }

    /// Binds a slot to a region
    pub fn set_symbol(&mut self, id: SymbolId, region: Region) -> Result<()> {
        let slot = self.symbols.get_mut(id).ok_or(Error::SymbolTableFull)?;
        *slot = Some(region);
        Ok(())
    }

    /// Unbinds a slot and returns the region it held
    pub fn clear_symbol(&mut self, id: SymbolId) -> Result<Region> {
        self.symbols
            .get_mut(id)
            .and_then(Option::take)
            .ok_or(Error::RegionNotFound)
    }

    /// Symbol whose region starts exactly at `addr`
    pub fn symbol_at(&self, addr: Addr) -> Option<SymbolId> {
        self.symbols
            .iter()
            .position(|rg| rg.is_some_and(|rg| rg.start == addr))
    }

    /// Symbol whose region contains `addr`
    pub fn symbol_containing(&self, addr: Addr) -> Option<SymbolId> {
        self.symbols
            .iter()
            .position(|rg| rg.is_some_and(|rg| rg.contains(addr)))
    }

    /// Bound slots in slot order
    pub fn symbols(&self) -> Vec<(SymbolId, Region)> {
        self.symbols
            .iter()
            .enumerate()
            .filter_map(|(id, rg)| rg.map(|rg| (id, rg)))
            .collect()
    }
}
