//! VMSIM Memory Management
//!
//! A simulated demand-paged virtual memory manager. Each simulated process
//! owns an address space whose pages live either in a shared RAM device or
//! on a swap device, with a software TLB in front of the page tables.
//!
//! # Layers
//!
//! - **pte**: 32-bit page table entry codec and the atomic page directory
//! - **memphy**: byte-array storage devices with free and used frame lists
//! - **tlb**: direct-mapped translation cache keyed by `(pid, page)`
//! - **vma**: areas, regions and the first-fit free-region allocator
//! - **address_space**: page directory, areas and the symbol table
//! - **system**: the shared context owning RAM, swap, TLB and the arena
//! - **process**: the process handle the instruction dispatcher drives
//! - **fault** and **vm**: the page-fault engine and the translation API
//!
//! Eviction is global LRU: a resident page moves to the tail of the RAM used
//! list on every access, and the head is evicted when RAM runs out.
//!
//! # Usage
//!
//! ```rust
//! use vmsim_mm::{MmConfig, MmSystem};
//!
//! let sys = MmSystem::with_config(MmConfig::with_frames(4, 4)).unwrap();
//! let mut proc = sys.spawn(1).unwrap();
//!
//! proc.allocate(300).unwrap();
//! proc.write(0, 20, 0x7f).unwrap();
//! assert_eq!(proc.read(0, 20).unwrap(), 0x7f);
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

#[macro_use]
pub mod logging;

pub mod address_space;
pub mod config;
pub mod memphy;
pub mod process;
pub mod pte;
pub mod system;
pub mod tlb;
pub mod vma;

mod fault;
mod vm;

// Re-export commonly used types
pub use crate::address_space::{AddressSpace, DEFAULT_AREA};
pub use crate::config::MmConfig;
pub use crate::memphy::{Memphy, MemphyStats, UsedFrame};
pub use crate::process::Process;
pub use crate::pte::{PageDirectory, Pte, PteFlags, PteState};
pub use crate::system::{MmSystem, SystemStats};
pub use crate::tlb::{TlbCache, TlbStats};
pub use crate::vma::{Region, VmArea};

pub use vmsim_api::{Error, Result};
