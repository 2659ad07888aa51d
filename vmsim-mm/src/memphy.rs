//! Memphy: the simulated physical storage device
//!
//! One `Memphy` backs RAM, each swap device, and (unformatted) the TLB. It
//! wraps a byte array partitioned into page-sized frames and keeps two
//! intrusive lists over an index-based frame table:
//!
//! - the free list, a LIFO stack (`get_free_frame` pops the head,
//!   `put_free_frame` pushes onto it);
//! - the used list, a FIFO queue (`put_used_frame` appends at the tail,
//!   `pop_used_frame` removes the head). Because a resident page is moved to
//!   the tail each time it is touched, the head is the least recently touched
//!   frame across every address space sharing the device.
//!
//! The list bookkeeping sits behind the device lock. Storage cells are
//! atomics and are accessed without it.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use spin::Mutex;

use vmsim_api::{AccessMode, Addr, Error, FrameNum, LockOption, MmId, PageNum, Result};

/// A frame on the used list together with its current owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsedFrame {
    /// Frame number on the device
    pub fpn: FrameNum,
    /// Owning address space
    pub owner: MmId,
    /// Page number inside the owner
    pub pgn: PageNum,
}

/// Frame bookkeeping snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemphyStats {
    /// Frames the device was formatted into
    pub total_frames: usize,
    /// Frames on the free list
    pub free_frames: usize,
    /// Frames on the used list
    pub used_frames: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// On the free list
    Free,
    /// On the used list
    Used,
    /// Handed out, on neither list
    Taken,
}

#[derive(Debug, Clone, Copy)]
struct FrameSlot {
    state: SlotState,
    prev: Option<FrameNum>,
    next: Option<FrameNum>,
    owner: MmId,
    pgn: PageNum,
}

impl FrameSlot {
    const fn free(next: Option<FrameNum>) -> Self {
        Self {
            state: SlotState::Free,
            prev: None,
            next,
            owner: 0,
            pgn: 0,
        }
    }
}

/// Free and used lists threaded through one frame table
#[derive(Debug, Default)]
struct FrameLists {
    slots: Vec<FrameSlot>,
    free_head: Option<FrameNum>,
    free_count: usize,
    used_head: Option<FrameNum>,
    used_tail: Option<FrameNum>,
    used_count: usize,
}

impl FrameLists {
    /// Seeds the free list with frames `0..num_frames`, frame 0 at the head
    fn format(num_frames: usize) -> Self {
        let slots = (0..num_frames)
            .map(|fpn| FrameSlot::free((fpn + 1 < num_frames).then_some(fpn + 1)))
            .collect();
        Self {
            slots,
            free_head: (num_frames > 0).then_some(0),
            free_count: num_frames,
            used_head: None,
            used_tail: None,
            used_count: 0,
        }
    }

    fn slot_mut(&mut self, fpn: FrameNum) -> Result<&mut FrameSlot> {
        self.slots.get_mut(fpn).ok_or(Error::InvalidFrame(fpn))
    }

    fn pop_free(&mut self) -> Option<FrameNum> {
        let fpn = self.free_head?;
        let slot = &mut self.slots[fpn];
        self.free_head = slot.next;
        slot.next = None;
        slot.state = SlotState::Taken;
        self.free_count -= 1;
        Some(fpn)
    }

    fn push_free(&mut self, fpn: FrameNum) -> Result<()> {
        match self.slot_mut(fpn)?.state {
            SlotState::Free => return Err(Error::InvalidFrame(fpn)),
            SlotState::Used => {
                self.unlink_used(fpn)?;
            }
            SlotState::Taken => {}
        }
        let head = self.free_head;
        let slot = &mut self.slots[fpn];
        *slot = FrameSlot::free(head);
        self.free_head = Some(fpn);
        self.free_count += 1;
        Ok(())
    }

    fn push_used(&mut self, fpn: FrameNum, owner: MmId, pgn: PageNum) -> Result<()> {
        match self.slot_mut(fpn)?.state {
            SlotState::Free => return Err(Error::InvalidFrame(fpn)),
            SlotState::Used => {
                self.unlink_used(fpn)?;
            }
            SlotState::Taken => {}
        }
        let tail = self.used_tail;
        let slot = &mut self.slots[fpn];
        slot.state = SlotState::Used;
        slot.prev = tail;
        slot.next = None;
        slot.owner = owner;
        slot.pgn = pgn;
        match tail {
            Some(t) => self.slots[t].next = Some(fpn),
            None => self.used_head = Some(fpn),
        }
        self.used_tail = Some(fpn);
        self.used_count += 1;
        Ok(())
    }

    /// Relinks a used frame at the tail. A taken frame is left alone.
    fn touch(&mut self, fpn: FrameNum, owner: MmId, pgn: PageNum) -> Result<bool> {
        match self.slot_mut(fpn)?.state {
            SlotState::Used => self.push_used(fpn, owner, pgn).map(|()| true),
            SlotState::Taken => Ok(false),
            SlotState::Free => Err(Error::InvalidFrame(fpn)),
        }
    }

    /// Frees a used frame. A taken frame is left alone.
    fn release_used(&mut self, fpn: FrameNum) -> Result<bool> {
        match self.slot_mut(fpn)?.state {
            SlotState::Used => self.push_free(fpn).map(|()| true),
            SlotState::Taken => Ok(false),
            SlotState::Free => Err(Error::InvalidFrame(fpn)),
        }
    }

    fn unlink_used(&mut self, fpn: FrameNum) -> Result<UsedFrame> {
        let slot = *self.slot_mut(fpn)?;
        if slot.state != SlotState::Used {
            return Err(Error::InvalidFrame(fpn));
        }
        match slot.prev {
            Some(p) => self.slots[p].next = slot.next,
            None => self.used_head = slot.next,
        }
        match slot.next {
            Some(n) => self.slots[n].prev = slot.prev,
            None => self.used_tail = slot.prev,
        }
        let entry = &mut self.slots[fpn];
        entry.state = SlotState::Taken;
        entry.prev = None;
        entry.next = None;
        self.used_count -= 1;
        Ok(UsedFrame {
            fpn,
            owner: slot.owner,
            pgn: slot.pgn,
        })
    }

    fn pop_used(&mut self) -> Option<UsedFrame> {
        let head = self.used_head?;
        self.unlink_used(head).ok()
    }

    fn used_in_order(&self) -> Vec<UsedFrame> {
        let mut out = Vec::with_capacity(self.used_count);
        let mut cur = self.used_head;
        while let Some(fpn) = cur {
            let slot = &self.slots[fpn];
            out.push(UsedFrame {
                fpn,
                owner: slot.owner,
                pgn: slot.pgn,
            });
            cur = slot.next;
        }
        out
    }

    fn free_in_order(&self) -> Vec<FrameNum> {
        let mut out = Vec::with_capacity(self.free_count);
        let mut cur = self.free_head;
        while let Some(fpn) = cur {
            out.push(fpn);
            cur = self.slots[fpn].next;
        }
        out
    }
}

/// A simulated storage device
pub struct Memphy {
    role: LockOption,
    storage: Box<[AtomicU8]>,
    mode: AccessMode,
    cursor: AtomicUsize,
    page_size: usize,
    lists: Mutex<FrameLists>,
}

impl Memphy {
    /// Creates a device of `max_size` bytes and formats it into frames
    pub fn new(role: LockOption, max_size: usize, page_size: usize, mode: AccessMode) -> Result<Self> {
        let mut dev = Self::unformatted(role, max_size, mode);
        dev.format(page_size)?;
        Ok(dev)
    }

    /// Creates a raw device with no frames (used as TLB backing)
    pub fn unformatted(role: LockOption, max_size: usize, mode: AccessMode) -> Self {
        let storage = (0..max_size).map(|_| AtomicU8::new(0)).collect();
        Self {
            role,
            storage,
            mode,
            cursor: AtomicUsize::new(0),
            page_size: 0,
            lists: Mutex::new(FrameLists::default()),
        }
    }

    /// Partitions storage into `max_size / page_size` frames and seeds the
    /// free list. Any previous frame bookkeeping is discarded.
    pub fn format(&mut self, page_size: usize) -> Result<()> {
        if page_size == 0 {
            return Err(vmsim_api::error::invalid_config("page size must be non-zero"));
        }
        let num_frames = self.storage.len() / page_size;
        if num_frames == 0 {
            return Err(vmsim_api::error::invalid_config("device smaller than one page"));
        }
        self.page_size = page_size;
        *self.lists.get_mut() = FrameLists::format(num_frames);
        Ok(())
    }

    /// Lock selector naming this device's lock
    pub fn role(&self) -> LockOption {
        self.role
    }

    /// Device size in bytes
    pub fn max_size(&self) -> usize {
        self.storage.len()
    }

    /// Frame size in bytes (0 while unformatted)
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Access mode
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Current cursor position of a sequential device
    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }

    /// Total number of frames
    pub fn num_frames(&self) -> usize {
        self.lists.lock().slots.len()
    }

    // ------------------------------------------------------------------
    // Frame lists
    // ------------------------------------------------------------------

    /// Pops the head of the free list
    pub fn get_free_frame(&self) -> Option<FrameNum> {
        let fpn = self.lists.lock().pop_free();
        if fpn.is_none() {
            mm_trace!("{} free list empty", self.role);
        }
        fpn
    }

    /// Pushes a frame back onto the head of the free list.
    ///
    /// A frame still on the used list is unlinked first. Freeing a frame
    /// that is already free fails with [`Error::InvalidFrame`].
    pub fn put_free_frame(&self, fpn: FrameNum) -> Result<()> {
        self.lists.lock().push_free(fpn)
    }

    /// Appends a frame at the used-list tail, recording its owner
    pub fn put_used_frame(&self, fpn: FrameNum, owner: MmId, pgn: PageNum) -> Result<()> {
        self.lists.lock().push_used(fpn, owner, pgn)
    }

    /// Removes a specific frame from the used list
    pub fn get_used_frame(&self, fpn: FrameNum) -> Result<UsedFrame> {
        self.lists.lock().unlink_used(fpn)
    }

    /// Removes and returns the used-list head, the least recently touched
    /// frame on this device
    pub fn pop_used_frame(&self) -> Option<UsedFrame> {
        self.lists.lock().pop_used()
    }

    /// Moves a frame to the used-list tail under a single lock acquisition.
    ///
    /// Returns `false` without touching anything when the frame is off the
    /// used list, i.e. popped as a victim and not yet handed back.
    pub fn touch_frame(&self, fpn: FrameNum, owner: MmId, pgn: PageNum) -> Result<bool> {
        self.lists.lock().touch(fpn, owner, pgn)
    }

    /// Pushes a frame from the used list onto the free list.
    ///
    /// Returns `false` and leaves the frame with its holder when it is off
    /// the used list; a frame popped as a victim belongs to the evictor.
    pub fn release_used_frame(&self, fpn: FrameNum) -> Result<bool> {
        self.lists.lock().release_used(fpn)
    }

    /// Returns up to `count` frames, all-or-nothing
    pub fn get_free_frames(&self, count: usize) -> Option<Vec<FrameNum>> {
        let mut lists = self.lists.lock();
        if lists.free_count < count {
            return None;
        }
        Some((0..count).filter_map(|_| lists.pop_free()).collect())
    }

    /// Frame bookkeeping snapshot
    pub fn stats(&self) -> MemphyStats {
        let lists = self.lists.lock();
        MemphyStats {
            total_frames: lists.slots.len(),
            free_frames: lists.free_count,
            used_frames: lists.used_count,
        }
    }

    /// Used list from head (next victim) to tail
    pub fn dump(&self) -> Vec<UsedFrame> {
        self.lists.lock().used_in_order()
    }

    /// Free list from head (next handed out) to tail
    pub fn free_frames(&self) -> Vec<FrameNum> {
        self.lists.lock().free_in_order()
    }

    // ------------------------------------------------------------------
    // Storage access
    // ------------------------------------------------------------------

    fn cell(&self, addr: Addr) -> Result<&AtomicU8> {
        self.storage.get(addr).ok_or(Error::OutOfRange)
    }

    fn move_cursor(&self, offset: Addr) {
        let max = self.storage.len().max(1);
        self.cursor.store(offset % max, Ordering::Relaxed);
    }

    /// Sequential read: moves the cursor to `addr`, then reads there
    pub fn seq_read(&self, addr: Addr) -> Result<u8> {
        let cell = self.cell(addr)?;
        self.move_cursor(addr);
        Ok(cell.load(Ordering::Relaxed))
    }

    /// Sequential write: moves the cursor to `addr`, then writes there
    pub fn seq_write(&self, addr: Addr, value: u8) -> Result<()> {
        let cell = self.cell(addr)?;
        self.move_cursor(addr);
        cell.store(value, Ordering::Relaxed);
        Ok(())
    }

    /// Reads one byte, going through the cursor on sequential devices
    pub fn read(&self, addr: Addr) -> Result<u8> {
        match self.mode {
            AccessMode::Random => Ok(self.cell(addr)?.load(Ordering::Relaxed)),
            AccessMode::Sequential => self.seq_read(addr),
        }
    }

    /// Writes one byte, going through the cursor on sequential devices
    pub fn write(&self, addr: Addr, value: u8) -> Result<()> {
        match self.mode {
            AccessMode::Random => {
                self.cell(addr)?.store(value, Ordering::Relaxed);
                Ok(())
            }
            AccessMode::Sequential => self.seq_write(addr, value),
        }
    }

    /// Reads a little-endian 32-bit word at `addr`
    pub fn read_word(&self, addr: Addr) -> Result<u32> {
        let mut bytes = [0u8; 4];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = self.read(addr + i)?;
        }
        Ok(u32::from_le_bytes(bytes))
    }

    /// Writes a little-endian 32-bit word at `addr`
    pub fn write_word(&self, addr: Addr, value: u32) -> Result<()> {
        if addr + 4 > self.storage.len() {
            return Err(Error::OutOfRange);
        }
        for (i, b) in value.to_le_bytes().into_iter().enumerate() {
            self.write(addr + i, b)?;
        }
        Ok(())
    }

    /// Zeroes every cell
    pub fn zero(&self) {
        for cell in self.storage.iter() {
            cell.store(0, Ordering::Relaxed);
        }
    }
}

/// Copies one frame between devices byte by byte
pub fn swap_copy(src: &Memphy, src_fpn: FrameNum, dst: &Memphy, dst_fpn: FrameNum) -> Result<()> {
    let page_size = src.page_size();
    if page_size == 0 || page_size != dst.page_size() {
        return Err(vmsim_api::error::invalid_config("swap copy between mismatched frame sizes"));
    }
    let src_base = src_fpn * page_size;
    let dst_base = dst_fpn * page_size;
    for cell in 0..page_size {
        let data = src.read(src_base + cell)?;
        dst.write(dst_base + cell, data)?;
    }
    Ok(())
}
