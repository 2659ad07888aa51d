//! Translation API
//!
//! The entry points the instruction dispatcher calls on a [`Process`]:
//! region allocation and release through the symbol table, byte access by
//! symbol and offset, and the register-level variants that consult the TLB
//! before walking the page table.

use vmsim_api::paging::align_up;
use vmsim_api::{Addr, AreaId, Error, Result, Size, SymbolId};

use crate::address_space::DEFAULT_AREA;
use crate::process::Process;
use crate::pte::Pte;
use crate::vma::Region;

impl Process {
    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    /// Allocates `size` bytes in the default area into the first free
    /// symbol slot and returns the base address
    pub fn allocate(&mut self, size: Size) -> Result<Addr> {
        self.allocate_in(DEFAULT_AREA, size)
    }

    /// Allocates `size` bytes in area `area` into the first free symbol slot
    pub fn allocate_in(&mut self, area: AreaId, size: Size) -> Result<Addr> {
        let Some(symbol) = self.mm().free_symbol_slot() else {
            mm_warn!("mm: pid {} symbol table full", self.pid());
            return Err(Error::SymbolTableFull);
        };
        self.alloc_at_in(area, symbol, size)
    }

    /// Allocates `size` bytes in the default area into symbol slot `symbol`
    pub fn alloc_at(&mut self, symbol: SymbolId, size: Size) -> Result<Addr> {
        self.alloc_at_in(DEFAULT_AREA, symbol, size)
    }

    /// Allocates `size` bytes in area `area` into symbol slot `symbol`.
    ///
    /// The slot must exist and be unbound.
    pub fn alloc_at_in(&mut self, area: AreaId, symbol: SymbolId, size: Size) -> Result<Addr> {
        if !self.mm().is_symbol_free(symbol) {
            return Err(Error::SymbolTableFull);
        }
        let region = self.allocate_region(area, size)?;
        self.mm_mut().set_symbol(symbol, region)?;
        mm_debug!(
            "mm: pid {} alloc symbol {} [{:#x}, {:#x})",
            self.pid(),
            symbol,
            region.start,
            region.end
        );
        Ok(region.start)
    }

    /// Finds or grows space for `size` bytes in area `area` and backs every
    /// page of it with a RAM frame.
    ///
    /// A recycled free fragment is searched first-fit. Otherwise the heap
    /// grows, failing with [`Error::VmaLimitExceeded`] past the area's end.
    /// Nothing changes in the area unless the mapping succeeds.
    pub fn allocate_region(&mut self, area: AreaId, size: Size) -> Result<Region> {
        if size == 0 {
            return Err(Error::OutOfRange);
        }
        let page_shift = self.mm().page_shift();
        let size = align_up(size, self.mm().page_size());
        let vma = self.mm().vma(area)?;

        if let Some(index) = vma.first_fit(size) {
            let fragment = vma.free_regions()[index];
            let region = Region::new(fragment.start, fragment.start + size);
            self.map_region(region, page_shift)?;
            self.mm_mut().vma_mut(area)?.take_free_region(index, size);
            return Ok(region);
        }

        let region = vma.heap_extent(size).ok_or(Error::VmaLimitExceeded)?;
        self.map_region(region, page_shift)?;
        self.mm_mut().vma_mut(area)?.set_sbrk(region.end);
        Ok(region)
    }

    fn map_region(&self, region: Region, page_shift: u32) -> Result<()> {
        let pages = region.pages(page_shift);
        self.system().map_range(self.ctx(), pages.start, pages.len())
    }

    // ------------------------------------------------------------------
    // Release
    // ------------------------------------------------------------------

    /// Releases the region bound to `symbol` and unbinds the slot
    pub fn free(&mut self, symbol: SymbolId) -> Result<()> {
        let region = self.mm().symbol(symbol)?;
        let area = self.mm().vma_of(region.start)?;
        self.free_region(area, region)?;
        self.mm_mut().clear_symbol(symbol)?;
        mm_debug!(
            "mm: pid {} free symbol {} [{:#x}, {:#x})",
            self.pid(),
            symbol,
            region.start,
            region.end
        );
        Ok(())
    }

    /// Returns every frame behind `region` to its device, zeroes the page
    /// table and TLB entries of its pages, and lists the region as free
    pub fn free_region(&mut self, area: AreaId, region: Region) -> Result<()> {
        self.mm().vma(area)?;
        let sys = self.system().clone();
        for pgn in region.pages(self.mm().page_shift()) {
            let pte = self.mm().pgd().clear(pgn)?;
            sys.release_page(pte)?;
            sys.tlb().invalidate(self.pid(), pgn)?;
        }
        self.mm_mut().vma_mut(area)?.enlist_free_region(region);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Access by symbol
    // ------------------------------------------------------------------

    fn symbol_addr(&self, symbol: SymbolId, offset: usize) -> Result<Addr> {
        let region = self.mm().symbol(symbol)?;
        if offset >= region.len() {
            return Err(Error::OutOfRange);
        }
        Ok(region.start + offset)
    }

    /// Reads the byte at `offset` inside the region bound to `symbol`
    pub fn read(&self, symbol: SymbolId, offset: usize) -> Result<u8> {
        let addr = self.symbol_addr(symbol, offset)?;
        self.read_addr(addr)
    }

    /// Writes the byte at `offset` inside the region bound to `symbol`
    pub fn write(&self, symbol: SymbolId, offset: usize, value: u8) -> Result<()> {
        let addr = self.symbol_addr(symbol, offset)?;
        self.write_addr(addr, value)
    }

    /// Makes the page of `addr` resident and returns the physical address
    pub fn translate(&self, addr: Addr) -> Result<Addr> {
        let pgn = self.mm().page_of(addr);
        let fpn = self.system().get_page(self.ctx(), pgn)?;
        Ok((fpn << self.mm().page_shift()) + self.mm().offset_of(addr))
    }

    fn read_addr(&self, addr: Addr) -> Result<u8> {
        let phys = self.translate(addr)?;
        self.system().ram().read(phys)
    }

    fn write_addr(&self, addr: Addr, value: u8) -> Result<()> {
        let phys = self.translate(addr)?;
        self.system().ram().write(phys, value)
    }

    // ------------------------------------------------------------------
    // Register-level entry points
    // ------------------------------------------------------------------

    /// Allocates `size` bytes, stores the base address in register `reg`
    /// and primes the TLB with every new page
    pub fn alloc_reg(&mut self, size: Size, reg: usize) -> Result<Addr> {
        self.reg(reg)?;
        let addr = self.allocate(size)?;
        self.set_reg(reg, addr)?;

        let region = self.mm().symbol(self.mm().symbol_at(addr).ok_or(Error::RegionNotFound)?)?;
        let sys = self.system();
        for pgn in region.pages(self.mm().page_shift()) {
            let pte = self.mm().pgd().get(pgn)?;
            sys.tlb().write(self.pid(), pgn, pte.raw())?;
        }
        Ok(addr)
    }

    /// Frees the region whose base address is in register `reg`
    pub fn free_reg(&mut self, reg: usize) -> Result<()> {
        let addr = self.reg(reg)?;
        let symbol = self.mm().symbol_at(addr).ok_or(Error::RegionNotFound)?;
        self.free(symbol)
    }

    /// Reads the byte at `regs[src] + offset` into register `dst`
    pub fn read_reg(&mut self, src: usize, offset: usize, dst: usize) -> Result<u8> {
        self.reg(dst)?;
        let addr = self.reg(src)?.checked_add(offset).ok_or(Error::OutOfRange)?;
        let value = match self.cached_frame(addr)? {
            Some(phys) => self.system().ram().read(phys)?,
            None => self.read_addr(addr)?,
        };
        self.set_reg(dst, value as usize)?;
        Ok(value)
    }

    /// Writes the low byte of register `data` to `regs[dst] + offset`
    pub fn write_reg(&mut self, data: usize, dst: usize, offset: usize) -> Result<()> {
        let value = self.reg(data)? as u8;
        let addr = self.reg(dst)?.checked_add(offset).ok_or(Error::OutOfRange)?;
        match self.cached_frame(addr)? {
            Some(phys) => self.system().ram().write(phys, value),
            None => self.write_addr(addr, value),
        }
    }

    /// TLB fast path: the physical address of `addr` if the TLB holds a
    /// resident entry that still matches the page table.
    ///
    /// `addr` must fall inside an allocated region. A hit refreshes the
    /// frame's position on the used list like any other access.
    fn cached_frame(&self, addr: Addr) -> Result<Option<Addr>> {
        if self.mm().symbol_containing(addr).is_none() {
            return Err(Error::RegionNotFound);
        }
        let pgn = self.mm().page_of(addr);
        let Some(raw) = self.system().tlb().read(self.pid(), pgn) else {
            return Ok(None);
        };
        let cached = Pte::from_raw(raw);
        if !cached.is_resident() || self.mm().pgd().get(pgn)? != cached {
            return Ok(None);
        }
        let fpn = cached.fpn();
        if !self.system().ram().touch_frame(fpn, self.mm().id(), pgn)? {
            return Ok(None);
        }
        mm_trace!("mm: pid {} TLB hit pgn {} fpn {}", self.pid(), pgn, fpn);
        Ok(Some((fpn << self.mm().page_shift()) + self.mm().offset_of(addr)))
    }
}
