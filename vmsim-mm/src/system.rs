//! System context
//!
//! [`MmSystem`] owns every shared device of the simulation: the RAM memphy,
//! the swap memphys, the TLB, and the arena of registered address spaces.
//! It is created once, wrapped in an [`Arc`], and handed to each process.
//!
//! The arena maps an [`MmId`] (the owner recorded on RAM frames) back to the
//! page directory and pid needed when a frame of that address space is
//! chosen as an eviction victim.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use spin::RwLock;

use vmsim_api::{Error, LockOption, MmId, Pid, Result};

use crate::address_space::AddressSpace;
use crate::config::MmConfig;
use crate::memphy::{Memphy, MemphyStats};
use crate::process::Process;
use crate::pte::PageDirectory;
use crate::tlb::{TlbCache, TlbStats};

/// Arena slot of a registered address space
struct SpaceEntry {
    pid: Pid,
    pgd: Arc<PageDirectory>,
}

/// System-wide statistics snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemStats {
    /// RAM frame bookkeeping
    pub ram: MemphyStats,
    /// Frame bookkeeping of each swap device
    pub swaps: Vec<MemphyStats>,
    /// TLB counters
    pub tlb: TlbStats,
    /// Faults that swapped a page in
    pub page_faults: u64,
    /// Resident pages written out to swap
    pub evictions: u64,
    /// Registered address spaces
    pub processes: usize,
}

/// The shared memory subsystem
pub struct MmSystem {
    config: MmConfig,
    pub(crate) ram: Memphy,
    pub(crate) swaps: Vec<Memphy>,
    pub(crate) tlb: TlbCache,
    spaces: RwLock<Vec<Option<SpaceEntry>>>,
    pids: RwLock<HashMap<Pid, MmId>>,
    pub(crate) page_faults: AtomicU64,
    pub(crate) evictions: AtomicU64,
}

impl MmSystem {
    /// Creates a system with the default configuration
    pub fn new() -> Result<Arc<Self>> {
        Self::with_config(MmConfig::default())
    }

    /// Creates a system with a custom configuration
    pub fn with_config(config: MmConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let ram = Memphy::new(LockOption::Ram, config.ram_size, config.page_size, config.ram_access)?;
        let swaps = config
            .swap_sizes
            .iter()
            .map(|size| Memphy::new(LockOption::Swap, *size, config.page_size, config.swap_access))
            .collect::<Result<Vec<_>>>()?;
        let tlb = TlbCache::new(config.tlb_size, config.max_pgn);

        mm_info!(
            "mm: {} RAM frames, {} swap device(s), {} TLB slots, page size {}",
            ram.num_frames(),
            swaps.len(),
            tlb.slots(),
            config.page_size
        );

        Ok(Arc::new(Self {
            config,
            ram,
            swaps,
            tlb,
            spaces: RwLock::new(Vec::new()),
            pids: RwLock::new(HashMap::new()),
            page_faults: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }))
    }

    /// Active configuration
    pub fn config(&self) -> &MmConfig {
        &self.config
    }

    /// The RAM device
    pub fn ram(&self) -> &Memphy {
        &self.ram
    }

    /// A swap device by index
    pub fn swap(&self, index: usize) -> Result<&Memphy> {
        self.swaps
            .get(index)
            .ok_or_else(|| vmsim_api::error::invalid_config("no such swap device"))
    }

    /// Number of swap devices
    pub fn swap_count(&self) -> usize {
        self.swaps.len()
    }

    /// The TLB
    pub fn tlb(&self) -> &TlbCache {
        &self.tlb
    }

    /// Resolves a lock selector to its device; `Swap` names `active_swap`
    pub fn device(&self, opt: LockOption, active_swap: usize) -> Result<&Memphy> {
        match opt {
            LockOption::Ram => Ok(&self.ram),
            LockOption::Swap => self.swap(active_swap),
        }
    }

    /// Resolves a raw lock selector as passed by the instruction dispatcher
    pub fn device_raw(&self, raw: u8, active_swap: usize) -> Result<&Memphy> {
        self.device(LockOption::from_raw(raw)?, active_swap)
    }

    // ------------------------------------------------------------------
    // Process lifecycle
    // ------------------------------------------------------------------

    /// Registers a new address space for `pid` and returns its process
    /// handle. Fails if `pid` is already registered.
    pub fn spawn(self: &Arc<Self>, pid: Pid) -> Result<Process> {
        let pgd = Arc::new(PageDirectory::new(self.config.max_pgn));
        let id = self.register(pid, pgd.clone())?;
        let mm = AddressSpace::new(id, pid, pgd, &self.config);
        mm_debug!("mm: spawned pid {} as address space {}", pid, id);
        Ok(Process::new(pid, mm, self.clone()))
    }

    fn register(&self, pid: Pid, pgd: Arc<PageDirectory>) -> Result<MmId> {
        let mut pids = self.pids.write();
        if pids.contains_key(&pid) {
            return Err(Error::ProcessExists(pid));
        }
        let mut spaces = self.spaces.write();
        let entry = SpaceEntry { pid, pgd };
        let id = match spaces.iter().position(Option::is_none) {
            Some(id) => {
                spaces[id] = Some(entry);
                id
            }
            None => {
                spaces.push(Some(entry));
                spaces.len() - 1
            }
        };
        pids.insert(pid, id);
        Ok(id)
    }

    pub(crate) fn unregister(&self, pid: Pid) -> Result<()> {
        let mut pids = self.pids.write();
        let id = pids.remove(&pid).ok_or(Error::ProcessNotFound(pid))?;
        if let Some(slot) = self.spaces.write().get_mut(id) {
            *slot = None;
        }
        Ok(())
    }

    /// Pid and page directory of a registered address space
    pub(crate) fn space(&self, id: MmId) -> Option<(Pid, Arc<PageDirectory>)> {
        self.spaces
            .read()
            .get(id)
            .and_then(Option::as_ref)
            .map(|entry| (entry.pid, entry.pgd.clone()))
    }

    /// Address space id registered for `pid`
    pub fn lookup(&self, pid: Pid) -> Result<MmId> {
        self.pids
            .read()
            .get(&pid)
            .copied()
            .ok_or(Error::ProcessNotFound(pid))
    }

    /// Number of registered address spaces
    pub fn process_count(&self) -> usize {
        self.pids.read().len()
    }

    /// Statistics snapshot
    pub fn stats(&self) -> SystemStats {
        SystemStats {
            ram: self.ram.stats(),
            swaps: self.swaps.iter().map(Memphy::stats).collect(),
            tlb: self.tlb.stats(),
            page_faults: self.page_faults.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            processes: self.process_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> Arc<MmSystem> {
        MmSystem::with_config(MmConfig::with_frames(4, 4)).unwrap()
    }

    #[test]
    fn test_with_config_builds_devices() {
        let sys = small();
        let stats = sys.stats();
        assert_eq!(stats.ram.total_frames, 4);
        assert_eq!(stats.swaps.len(), 1);
        assert_eq!(stats.swaps[0].free_frames, 4);
        assert_eq!(sys.tlb().slots(), 512);
        assert_eq!(stats.processes, 0);
    }

    #[test]
    fn test_with_config_rejects_invalid() {
        let config = MmConfig { page_size: 100, ..MmConfig::default() };
        assert!(matches!(MmSystem::with_config(config), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_device_selector() {
        let sys = small();
        assert!(core::ptr::eq(sys.device(LockOption::Ram, 0).unwrap(), sys.ram()));
        assert_eq!(sys.device_raw(2, 0).unwrap().role(), LockOption::Swap);
        assert_eq!(sys.device_raw(3, 0).err(), Some(Error::InvalidLockOption(3)));
        assert!(sys.device(LockOption::Swap, 1).is_err());
    }

    #[test]
    fn test_spawn_rejects_duplicate_pid() {
        let sys = small();
        let p1 = sys.spawn(1).unwrap();
        assert_eq!(sys.spawn(1).err(), Some(Error::ProcessExists(1)));
        assert_eq!(sys.lookup(1), Ok(p1.mm().id()));
        drop(p1);
        assert_eq!(sys.lookup(1), Err(Error::ProcessNotFound(1)));
        assert!(sys.spawn(1).is_ok());
    }

    #[test]
    fn test_arena_reuses_slots() {
        let sys = small();
        let a = sys.spawn(1).unwrap();
        let b = sys.spawn(2).unwrap();
        assert_eq!((a.mm().id(), b.mm().id()), (0, 1));
        drop(a);
        let c = sys.spawn(3).unwrap();
        assert_eq!(c.mm().id(), 0);
        assert_eq!(sys.space(0).map(|(pid, _)| pid), Some(3));
        assert_eq!(sys.process_count(), 2);
    }
}
