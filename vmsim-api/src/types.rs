//! Core types used throughout the paging subsystem

use core::fmt;

use crate::error::{Error, Result};

/// Process identifier type
pub type Pid = u32;

/// Virtual or physical byte address
pub type Addr = usize;

/// Page number (index into a page directory)
pub type PageNum = usize;

/// Frame number (index of a page-sized frame on a memphy device)
pub type FrameNum = usize;

/// Address space identifier (slot in the system arena)
pub type MmId = usize;

/// Symbol table slot identifier
pub type SymbolId = usize;

/// Virtual memory area identifier
pub type AreaId = usize;

/// Size type
pub type Size = usize;

/// Raw lock selector for the RAM device
pub const RAM_LCK: u8 = 1;
/// Raw lock selector for the swap device
pub const SWP_LCK: u8 = 2;

/// Device lock selector
///
/// The instruction dispatcher names devices by raw selector; anything other
/// than [`RAM_LCK`] or [`SWP_LCK`] is a programming error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockOption {
    /// Main memory device
    Ram,
    /// Active swap device
    Swap,
}

impl LockOption {
    /// Decodes a raw selector
    pub fn from_raw(raw: u8) -> Result<Self> {
        match raw {
            RAM_LCK => Ok(LockOption::Ram),
            SWP_LCK => Ok(LockOption::Swap),
            other => Err(Error::InvalidLockOption(other)),
        }
    }

    /// Returns the raw selector
    pub const fn raw(self) -> u8 {
        match self {
            LockOption::Ram => RAM_LCK,
            LockOption::Swap => SWP_LCK,
        }
    }
}

impl fmt::Display for LockOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockOption::Ram => write!(f, "RAM"),
            LockOption::Swap => write!(f, "SWAP"),
        }
    }
}

/// Memphy access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Any cell can be addressed directly
    #[default]
    Random,
    /// Cells are reached by moving a cursor
    Sequential,
}

impl AccessMode {
    /// Builds the mode from a random-access flag
    pub const fn from_random_flag(random: bool) -> Self {
        if random {
            AccessMode::Random
        } else {
            AccessMode::Sequential
        }
    }

    /// Returns true for random-access devices
    pub const fn is_random(self) -> bool {
        matches!(self, AccessMode::Random)
    }
}
