//! Error handling module for the paging subsystem
//!
//! None of these conditions are retried inside the subsystem. The instruction
//! dispatcher turns them into process-visible faults through [`Error::code`].

use core::fmt;
use alloc::string::String;

use crate::types::{AreaId, FrameNum, PageNum, Pid};

/// Common error type used throughout the paging subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Symbol or address has no matching region
    RegionNotFound,
    /// No free region slot in the symbol table
    SymbolTableFull,
    /// RAM and swap are both out of frames for a requested range
    FrameExhausted,
    /// No free swap frame to receive a victim page
    SwapExhausted,
    /// Unknown device lock selector
    InvalidLockOption(u8),
    /// Page number outside the page directory, or a page with no mapping
    InvalidPageAccess(PageNum),
    /// Offset outside a region, or byte address outside a device
    OutOfRange,
    /// No virtual memory area with this id
    VmaNotFound(AreaId),
    /// Growing the heap would cross the area's upper bound
    VmaLimitExceeded,
    /// Frame number out of range or not in the expected list
    InvalidFrame(FrameNum),
    /// An address space is already registered for this pid
    ProcessExists(Pid),
    /// No address space is registered for this pid
    ProcessNotFound(Pid),
    /// Register index outside the register file
    InvalidRegister(usize),
    /// Rejected configuration
    InvalidConfig(String),
}

impl Error {
    /// Returns the sentinel code reported to the instruction dispatcher
    pub fn code(&self) -> i32 {
        match self {
            Error::RegionNotFound => -1,
            Error::SymbolTableFull => -2,
            Error::FrameExhausted => -3,
            Error::SwapExhausted => -4,
            Error::InvalidLockOption(_) => -5,
            Error::InvalidPageAccess(_) => -6,
            Error::OutOfRange => -7,
            Error::VmaNotFound(_) => -8,
            Error::VmaLimitExceeded => -9,
            Error::InvalidFrame(_) => -10,
            Error::ProcessExists(_) => -11,
            Error::ProcessNotFound(_) => -12,
            Error::InvalidRegister(_) => -13,
            Error::InvalidConfig(_) => -14,
        }
    }

    /// Returns true for conditions caused by memory pressure rather than
    /// by a bad request
    pub fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            Error::FrameExhausted | Error::SwapExhausted | Error::SymbolTableFull
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::RegionNotFound => write!(f, "Region not found"),
            Error::SymbolTableFull => write!(f, "Symbol table full"),
            Error::FrameExhausted => write!(f, "Frames exhausted"),
            Error::SwapExhausted => write!(f, "I/O error: no free swap frame"),
            Error::InvalidLockOption(raw) => write!(f, "Invalid lock option: {}", raw),
            Error::InvalidPageAccess(pgn) => write!(f, "Invalid page access: {}", pgn),
            Error::OutOfRange => write!(f, "Address out of range"),
            Error::VmaNotFound(id) => write!(f, "VMA not found: {}", id),
            Error::VmaLimitExceeded => write!(f, "VMA limit exceeded"),
            Error::InvalidFrame(fpn) => write!(f, "Invalid frame: {}", fpn),
            Error::ProcessExists(pid) => write!(f, "Process already registered: {}", pid),
            Error::ProcessNotFound(pid) => write!(f, "Process not found: {}", pid),
            Error::InvalidRegister(reg) => write!(f, "Invalid register: {}", reg),
            Error::InvalidConfig(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl core::error::Error for Error {}

/// Result type for operations that can fail
pub type Result<T> = core::result::Result<T, Error>;

/// Creates a new configuration error
pub fn invalid_config(msg: &str) -> Error {
    Error::InvalidConfig(String::from(msg))
}
