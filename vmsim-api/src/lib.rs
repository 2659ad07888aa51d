//! VMSIM API - Core types and error taxonomy for the simulated paging subsystem
//!
//! This crate provides the vocabulary shared by every layer of the simulated
//! virtual memory manager: identifier and address aliases, the device lock
//! selector, the paging constants of the default machine, and the error type
//! returned through the translation API.
//!
//! # Modules
//!
//! - **types**: identifier aliases, `LockOption`, `AccessMode`
//! - **paging**: default page geometry and alignment helpers
//! - **error**: the `Error` taxonomy and `Result` alias
//!
//! # Usage
//!
//! ```rust
//! use vmsim_api::{Error, LockOption, Result};
//!
//! fn select(raw: u8) -> Result<LockOption> {
//!     LockOption::from_raw(raw)
//! }
//!
//! assert_eq!(select(1), Ok(LockOption::Ram));
//! assert_eq!(select(7), Err(Error::InvalidLockOption(7)));
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod error;
pub mod paging;
pub mod types;

// Re-export commonly used types
pub use crate::error::{Error, Result};
pub use crate::types::*;
