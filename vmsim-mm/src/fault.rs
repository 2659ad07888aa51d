//! Page-fault and eviction engine
//!
//! Every access resolves its page through [`MmSystem::get_page`]:
//!
//! - a resident page is touched (moved to the RAM used-list tail) and its
//!   frame returned;
//! - a swapped page is faulted in. A free RAM frame is used when there is
//!   one; otherwise the RAM used-list head, the least recently touched frame
//!   of any address space, is written out to the active swap device first.
//!
//! Fresh ranges are mapped by [`MmSystem::map_range`], which resolves the
//! whole batch of frames before publishing a single page table entry.
//!
//! The RAM lock, each swap lock and the TLB lock are taken one at a time.
//! A PTE update, the matching TLB write and the frame-list update are
//! separate steps; another thread may observe the state in between.
//!
//! A victim popped off the used list belongs to the evictor until it is
//! handed out again. Its owner may race the eviction:
//!
//! - a touch of the page finds the frame off the used list and waits for
//!   the evictor to rewrite the entry, then faults the page back in;
//! - a free of the page clears the entry and leaves the frame alone. The
//!   evictor rewrites the entry only if it still maps the victim frame, so
//!   it sees the page gone, returns its swap frame and keeps the RAM frame.
//!
//! A frame therefore never sits on a list while someone else holds it.

use alloc::vec::Vec;
use core::sync::atomic::Ordering;

use vmsim_api::{Error, FrameNum, MmId, PageNum, Pid, Result};

use crate::memphy::{swap_copy, UsedFrame};
use crate::pte::{PageDirectory, Pte, PteState};
use crate::system::MmSystem;

/// What the engine needs to know about the faulting process
#[derive(Clone, Copy)]
pub struct FaultCtx<'a> {
    /// Owner recorded on RAM frames
    pub owner: MmId,
    /// Pid used as TLB key
    pub pid: Pid,
    /// Faulting page directory
    pub pgd: &'a PageDirectory,
    /// Swap device receiving victims
    pub active_swap: usize,
}

impl MmSystem {
    /// Makes `pgn` resident and returns its RAM frame
    pub(crate) fn get_page(&self, ctx: FaultCtx<'_>, pgn: PageNum) -> Result<FrameNum> {
        loop {
            let pte = ctx.pgd.get(pgn)?;
            return match pte.state() {
                PteState::Resident(fpn) => {
                    if !self.ram.touch_frame(fpn, ctx.owner, pgn)? {
                        // Being written out by another thread
                        core::hint::spin_loop();
                        continue;
                    }
                    self.tlb.write(ctx.pid, pgn, pte.raw())?;
                    mm_trace!("mm: pid {} touch pgn {} fpn {}", ctx.pid, pgn, fpn);
                    Ok(fpn)
                }
                PteState::Swapped { swap_type, swap_offset } => {
                    self.swap_in(ctx, pgn, swap_type, swap_offset)
                }
                PteState::Unused | PteState::Invalid => Err(Error::InvalidPageAccess(pgn)),
            };
        }
    }

    fn swap_in(
        &self,
        ctx: FaultCtx<'_>,
        pgn: PageNum,
        swap_type: usize,
        swap_offset: FrameNum,
    ) -> Result<FrameNum> {
        let src = self.swap(swap_type)?;
        let fpn = self.acquire_ram_frame(ctx.active_swap)?;

        if let Err(e) = swap_copy(src, swap_offset, &self.ram, fpn) {
            self.ram.put_free_frame(fpn)?;
            return Err(e);
        }
        src.put_free_frame(swap_offset)?;

        let pte = ctx.pgd.update(pgn, |p| p.set_fpn(fpn))?;
        self.ram.put_used_frame(fpn, ctx.owner, pgn)?;
        self.tlb.write(ctx.pid, pgn, pte.raw())?;

        self.page_faults.fetch_add(1, Ordering::Relaxed);
        mm_debug!(
            "mm: pid {} fault pgn {} swap {}:{} -> fpn {}",
            ctx.pid,
            pgn,
            swap_type,
            swap_offset,
            fpn
        );
        Ok(fpn)
    }

    /// A RAM frame off every list: the free-list head, or an evicted victim
    fn acquire_ram_frame(&self, active_swap: usize) -> Result<FrameNum> {
        match self.ram.get_free_frame() {
            Some(fpn) => Ok(fpn),
            None => self.evict(active_swap),
        }
    }

    /// Writes the least recently touched RAM frame out to swap device
    /// `active_swap` and returns the freed frame.
    ///
    /// The swap frame is reserved before the victim is chosen, so running out
    /// of swap leaves the used list untouched.
    fn evict(&self, active_swap: usize) -> Result<FrameNum> {
        let swap = self.swap(active_swap)?;
        let Some(swpfpn) = swap.get_free_frame() else {
            mm_warn!("mm: swap device {} exhausted", active_swap);
            return Err(Error::SwapExhausted);
        };
        let Some(victim) = self.ram.pop_used_frame() else {
            swap.put_free_frame(swpfpn)?;
            return Err(Error::FrameExhausted);
        };

        let Some((pid, pgd)) = self.space(victim.owner) else {
            // Owner already gone; the frame holds nothing worth keeping
            swap.put_free_frame(swpfpn)?;
            return Ok(victim.fpn);
        };

        if let Err(e) = swap_copy(&self.ram, victim.fpn, swap, swpfpn) {
            swap.put_free_frame(swpfpn)?;
            self.ram.put_used_frame(victim.fpn, victim.owner, victim.pgn)?;
            return Err(e);
        }
        let Some(pte) = swap_out_entry(&pgd, victim, active_swap, swpfpn)? else {
            mm_debug!("mm: pid {} freed pgn {} during eviction", pid, victim.pgn);
            swap.put_free_frame(swpfpn)?;
            return Ok(victim.fpn);
        };
        self.tlb.refresh(pid, victim.pgn, pte.raw())?;

        self.evictions.fetch_add(1, Ordering::Relaxed);
        mm_debug!(
            "mm: evict pid {} pgn {} fpn {} -> swap {}:{}",
            pid,
            victim.pgn,
            victim.fpn,
            active_swap,
            swpfpn
        );
        Ok(victim.fpn)
    }

    /// Frames a range of `count` fresh pages could obtain right now
    fn range_capacity(&self, active_swap: usize) -> Result<usize> {
        let ram = self.ram.stats();
        let swap = self.swap(active_swap)?.stats();
        Ok(ram.free_frames + swap.free_frames.min(ram.used_frames))
    }

    /// Obtains `count` RAM frames, draining the free list before evicting.
    ///
    /// All or nothing: on failure every frame obtained so far goes back to
    /// the RAM free list.
    pub(crate) fn alloc_pages_range(&self, count: usize, active_swap: usize) -> Result<Vec<FrameNum>> {
        if self.range_capacity(active_swap)? < count {
            mm_warn!("mm: cannot back {} page(s)", count);
            return Err(Error::FrameExhausted);
        }
        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            match self.acquire_ram_frame(active_swap) {
                Ok(fpn) => frames.push(fpn),
                Err(e) => {
                    mm_warn!("mm: range allocation lost frames mid-way: {}", e);
                    for fpn in frames {
                        self.ram.put_free_frame(fpn)?;
                    }
                    return Err(Error::FrameExhausted);
                }
            }
        }
        Ok(frames)
    }

    /// Publishes resident entries for pages `start_pgn..` and queues their
    /// frames on the used list
    pub(crate) fn vm_map_ram(&self, ctx: FaultCtx<'_>, start_pgn: PageNum, frames: &[FrameNum]) -> Result<()> {
        for (i, &fpn) in frames.iter().enumerate() {
            let pgn = start_pgn + i;
            let mut pte = Pte::EMPTY;
            pte.init(true, fpn, false, false, 0, 0);
            ctx.pgd.set(pgn, pte)?;
            self.ram.put_used_frame(fpn, ctx.owner, pgn)?;
        }
        Ok(())
    }

    /// Backs `count` pages starting at `start_pgn` with fresh RAM frames
    pub(crate) fn map_range(&self, ctx: FaultCtx<'_>, start_pgn: PageNum, count: usize) -> Result<()> {
        let end = start_pgn.checked_add(count).ok_or(Error::InvalidPageAccess(start_pgn))?;
        if end > ctx.pgd.len() {
            return Err(Error::InvalidPageAccess(end - 1));
        }
        let frames = self.alloc_pages_range(count, ctx.active_swap)?;
        self.vm_map_ram(ctx, start_pgn, &frames)?;
        mm_debug!("mm: pid {} mapped pgn {}..{}", ctx.pid, start_pgn, end);
        Ok(())
    }
}

/// Points the victim's entry at swap frame `swpfpn` of device `swap_type`,
/// unless its owner has since released the page
fn swap_out_entry(
    pgd: &PageDirectory,
    victim: UsedFrame,
    swap_type: usize,
    swpfpn: FrameNum,
) -> Result<Option<Pte>> {
    pgd.update_if(victim.pgn, |pte| {
        if pte.state() != PteState::Resident(victim.fpn) {
            return false;
        }
        pte.set_swap(swap_type, swpfpn);
        true
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;

    use crate::config::MmConfig;

    const PAGE: usize = 256;

    fn system(ram: usize, swap: usize) -> Arc<MmSystem> {
        MmSystem::with_config(MmConfig::with_frames(ram, swap)).unwrap()
    }

    #[test]
    fn test_map_range_publishes_resident_entries() {
        let sys = system(4, 4);
        let proc = sys.spawn(1).unwrap();
        sys.map_range(proc.ctx(), 2, 3).unwrap();
        let table = proc.page_table(0, 8);
        assert_eq!(table.iter().map(|(pgn, _)| *pgn).collect::<Vec<_>>(), vec![2, 3, 4]);
        assert!(table.iter().all(|(_, pte)| pte.is_resident()));
        assert_eq!(sys.ram().dump().iter().map(|f| f.pgn).collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[test]
    fn test_map_range_evicts_oldest_when_ram_full() {
        let sys = system(2, 4);
        let proc = sys.spawn(1).unwrap();
        sys.map_range(proc.ctx(), 0, 2).unwrap();
        sys.map_range(proc.ctx(), 2, 1).unwrap();

        let pgd = proc.mm().pgd();
        assert!(pgd.get(0).unwrap().is_swapped());
        assert!(pgd.get(1).unwrap().is_resident());
        assert!(pgd.get(2).unwrap().is_resident());
        assert_eq!(sys.stats().evictions, 1);
    }

    #[test]
    fn test_map_range_over_capacity_changes_nothing() {
        let sys = system(2, 1);
        let proc = sys.spawn(1).unwrap();
        sys.map_range(proc.ctx(), 0, 2).unwrap();
        let before = proc.page_table(0, 16);

        // 0 free RAM + min(1 free swap, 2 used) = 1 < 2
        assert_eq!(sys.map_range(proc.ctx(), 2, 2), Err(Error::FrameExhausted));
        assert_eq!(proc.page_table(0, 16), before);
        assert_eq!(sys.stats().evictions, 0);
    }

    #[test]
    fn test_map_range_beyond_directory() {
        let sys = system(2, 2);
        let proc = sys.spawn(1).unwrap();
        let max = sys.config().max_pgn;
        assert_eq!(sys.map_range(proc.ctx(), max - 1, 2), Err(Error::InvalidPageAccess(max)));
        assert_eq!(sys.ram().stats().free_frames, 2);
    }

    #[test]
    fn test_fault_restores_contents() {
        let sys = system(1, 2);
        let proc = sys.spawn(1).unwrap();
        sys.map_range(proc.ctx(), 0, 1).unwrap();
        let fpn = sys.get_page(proc.ctx(), 0).unwrap();
        sys.ram().write(fpn * PAGE + 5, 0x5a).unwrap();

        sys.map_range(proc.ctx(), 1, 1).unwrap();
        assert!(proc.mm().pgd().get(0).unwrap().is_swapped());

        let fpn = sys.get_page(proc.ctx(), 0).unwrap();
        assert_eq!(sys.ram().read(fpn * PAGE + 5).unwrap(), 0x5a);
        assert!(proc.mm().pgd().get(1).unwrap().is_swapped());
        let stats = sys.stats();
        assert_eq!((stats.page_faults, stats.evictions), (1, 2));
        // One swap frame holds page 1, the one page 0 used went back
        assert_eq!(stats.swaps[0].free_frames, 1);
    }

    #[test]
    fn test_swap_exhaustion_leaves_used_list() {
        let sys = system(1, 1);
        let proc = sys.spawn(1).unwrap();
        sys.map_range(proc.ctx(), 0, 1).unwrap();
        sys.map_range(proc.ctx(), 1, 1).unwrap();
        // RAM holds page 1, swap holds page 0, swap is full
        let before = sys.ram().dump();
        assert_eq!(sys.get_page(proc.ctx(), 0), Err(Error::SwapExhausted));
        assert_eq!(sys.ram().dump(), before);
        assert!(proc.mm().pgd().get(0).unwrap().is_swapped());
    }

    #[test]
    fn test_fault_uses_free_frame_without_evicting() {
        let sys = system(2, 2);
        let proc = sys.spawn(1).unwrap();
        sys.map_range(proc.ctx(), 0, 2).unwrap();
        sys.map_range(proc.ctx(), 2, 1).unwrap();
        assert_eq!(sys.stats().evictions, 1);

        // Freeing page 1 leaves a RAM frame for the next fault
        let pte = proc.mm().pgd().clear(1).unwrap();
        sys.release_page(pte).unwrap();
        sys.get_page(proc.ctx(), 0).unwrap();
        assert_eq!(sys.stats().evictions, 1);
    }

    #[test]
    fn test_page_freed_during_eviction_stays_with_evictor() {
        let sys = system(2, 2);
        let proc = sys.spawn(1).unwrap();
        sys.map_range(proc.ctx(), 0, 2).unwrap();

        // Victim popped, its owner frees the page before the entry rewrite
        let victim = sys.ram().pop_used_frame().unwrap();
        assert_eq!(victim.pgn, 0);
        let pte = proc.mm().pgd().clear(0).unwrap();
        assert_eq!(sys.release_page(pte), Ok(false));
        assert_eq!(sys.ram().stats().free_frames, 0);

        let swpfpn = sys.swap(0).unwrap().get_free_frame().unwrap();
        assert_eq!(swap_out_entry(proc.mm().pgd(), victim, 0, swpfpn), Ok(None));
        assert!(proc.mm().pgd().get(0).unwrap().is_empty());

        // The other page still maps its frame, so its entry is rewritten
        let live = sys.ram().pop_used_frame().unwrap();
        let swapped = swap_out_entry(proc.mm().pgd(), live, 0, swpfpn).unwrap().unwrap();
        assert_eq!(swapped.state(), PteState::Swapped { swap_type: 0, swap_offset: swpfpn });
    }

    #[test]
    fn test_unmapped_page_is_invalid() {
        let sys = system(1, 1);
        let proc = sys.spawn(1).unwrap();
        assert_eq!(sys.get_page(proc.ctx(), 9), Err(Error::InvalidPageAccess(9)));
        let max = sys.config().max_pgn;
        assert_eq!(sys.get_page(proc.ctx(), max), Err(Error::InvalidPageAccess(max)));
    }
}
