//! Process control handle
//!
//! A [`Process`] is what the instruction dispatcher holds for each simulated
//! process: pid, register file, address space, the shared system and the
//! index of the swap device evicted pages go to. The translation API is
//! implemented on it in the `vm` module.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use vmsim_api::{Error, PageNum, Pid, Result};

use crate::address_space::AddressSpace;
use crate::fault::FaultCtx;
use crate::pte::{Pte, PteState};
use crate::system::MmSystem;

/// A simulated process as seen by the memory subsystem
pub struct Process {
    pid: Pid,
    regs: Vec<usize>,
    mm: AddressSpace,
    sys: Arc<MmSystem>,
    active_swap: usize,
    exited: bool,
}

impl Process {
    pub(crate) fn new(pid: Pid, mm: AddressSpace, sys: Arc<MmSystem>) -> Self {
        let regs = vec![0; sys.config().registers];
        Self {
            pid,
            regs,
            mm,
            sys,
            active_swap: 0,
            exited: false,
        }
    }

    /// Process id
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Address space
    pub fn mm(&self) -> &AddressSpace {
        &self.mm
    }

    /// Address space, mutable (to add areas)
    pub fn mm_mut(&mut self) -> &mut AddressSpace {
        &mut self.mm
    }

    /// Shared system
    pub fn system(&self) -> &Arc<MmSystem> {
        &self.sys
    }

    /// Register file
    pub fn regs(&self) -> &[usize] {
        &self.regs
    }

    /// Reads a register
    pub fn reg(&self, index: usize) -> Result<usize> {
        self.regs.get(index).copied().ok_or(Error::InvalidRegister(index))
    }

    /// Writes a register
    pub fn set_reg(&mut self, index: usize, value: usize) -> Result<()> {
        let reg = self.regs.get_mut(index).ok_or(Error::InvalidRegister(index))?;
        *reg = value;
        Ok(())
    }

    /// Swap device receiving this process's evictions
    pub fn active_swap(&self) -> usize {
        self.active_swap
    }

    /// Selects the swap device receiving this process's evictions
    pub fn set_active_swap(&mut self, index: usize) -> Result<()> {
        self.sys.swap(index)?;
        self.active_swap = index;
        Ok(())
    }

    /// Non-empty page table entries in `[start, end)`
    pub fn page_table(&self, start: PageNum, end: PageNum) -> Vec<(PageNum, Pte)> {
        self.mm.pgd().entries(start, end).collect()
    }

    pub(crate) fn ctx(&self) -> FaultCtx<'_> {
        FaultCtx {
            owner: self.mm.id(),
            pid: self.pid,
            pgd: self.mm.pgd(),
            active_swap: self.active_swap,
        }
    }

    /// Releases every frame, flushes the TLB entries of this pid and
    /// unregisters the address space
    pub fn exit(mut self) -> Result<()> {
        self.exited = true;
        self.teardown()
    }

    fn teardown(&mut self) -> Result<()> {
        let pgd = self.mm.pgd();
        let mut released = 0usize;
        for pgn in 0..pgd.len() {
            let pte = pgd.clear(pgn)?;
            if self.sys.release_page(pte)? {
                released += 1;
            }
        }
        let flushed = self.sys.tlb.flush_pid(self.pid)?;
        self.sys.unregister(self.pid)?;
        mm_debug!(
            "mm: pid {} exited, {} page(s) released, {} TLB entries flushed",
            self.pid,
            released,
            flushed
        );
        Ok(())
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        if self.exited {
            return;
        }
        self.exited = true;
        if let Err(e) = self.teardown() {
            mm_warn!("mm: teardown of pid {} failed: {}", self.pid, e);
        }
    }
}

impl MmSystem {
    /// Returns the frame behind a cleared entry to the device it lives on.
    ///
    /// Returns whether a frame was released. A RAM frame already popped as
    /// an eviction victim is left to the evictor.
    pub(crate) fn release_page(&self, pte: Pte) -> Result<bool> {
        match pte.state() {
            PteState::Resident(fpn) => self.ram.release_used_frame(fpn),
            PteState::Swapped { swap_type, swap_offset } => {
                self.swap(swap_type)?.put_free_frame(swap_offset)?;
                Ok(true)
            }
            PteState::Unused | PteState::Invalid => Ok(false),
        }
    }
}
