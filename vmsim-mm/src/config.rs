//! Memory subsystem configuration

use alloc::format;
use alloc::vec;
use alloc::vec::Vec;
use core::str::FromStr;

use vmsim_api::error::invalid_config;
use vmsim_api::paging::{log2_pow2, MAX_PGN, NUM_REGISTERS, PAGE_SIZE, SYMBOL_TABLE_SIZE};
use vmsim_api::{AccessMode, Error, Result};

use crate::pte::{MAX_PTE_FPN, MAX_PTE_SWPOFF, MAX_PTE_SWPTYP};
use crate::tlb::TLB_SLOT_SIZE;

/// Default RAM size (1 MiB)
pub const DEFAULT_RAM_SIZE: usize = 0x10_0000;
/// Default size of the first swap device (16 MiB)
pub const DEFAULT_SWAP_SIZE: usize = 0x100_0000;
/// Default TLB backing size in bytes
pub const DEFAULT_TLB_SIZE: usize = 0x1000;

/// Memory subsystem configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmConfig {
    /// Page and frame size in bytes (power of two)
    pub page_size: usize,
    /// Page directory slots per address space
    pub max_pgn: usize,
    /// RAM size in bytes
    pub ram_size: usize,
    /// RAM access mode
    pub ram_access: AccessMode,
    /// Size in bytes of each swap device
    pub swap_sizes: Vec<usize>,
    /// Swap access mode
    pub swap_access: AccessMode,
    /// TLB backing size in bytes
    pub tlb_size: usize,
    /// Symbol table slots per address space
    pub symbol_table_size: usize,
    /// Registers per process
    pub registers: usize,
}

impl Default for MmConfig {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            max_pgn: MAX_PGN,
            ram_size: DEFAULT_RAM_SIZE,
            ram_access: AccessMode::Random,
            swap_sizes: vec![DEFAULT_SWAP_SIZE],
            swap_access: AccessMode::Random,
            tlb_size: DEFAULT_TLB_SIZE,
            symbol_table_size: SYMBOL_TABLE_SIZE,
            registers: NUM_REGISTERS,
        }
    }
}

impl MmConfig {
    /// Configuration with `ram_frames` RAM frames and one swap device of
    /// `swap_frames` frames, other fields at their defaults
    ///
    /// A frame count too large to express in bytes saturates, which
    /// [`validate`](Self::validate) then rejects.
    pub fn with_frames(ram_frames: usize, swap_frames: usize) -> Self {
        let page_size = PAGE_SIZE;
        Self {
            ram_size: ram_frames.saturating_mul(page_size),
            swap_sizes: vec![swap_frames.saturating_mul(page_size)],
            ..Self::default()
        }
    }

    /// log2 of the page size
    pub fn page_shift(&self) -> u32 {
        log2_pow2(self.page_size).unwrap_or(0)
    }

    /// RAM frame count
    pub fn ram_frames(&self) -> usize {
        self.ram_size / self.page_size.max(1)
    }

    /// Upper bound (exclusive) of the virtual address space.
    ///
    /// Saturates on overflow; [`validate`](Self::validate) rejects any
    /// configuration where that happens.
    pub fn address_space_size(&self) -> usize {
        self.max_pgn.saturating_mul(self.page_size)
    }

    /// Checks that every size fits the PTE layout and the hash
    pub fn validate(&self) -> Result<()> {
        if log2_pow2(self.page_size).is_none() {
            return Err(invalid_config("page size must be a power of two"));
        }
        if self.max_pgn == 0 {
            return Err(invalid_config("page directory must have at least one slot"));
        }
        let size = self
            .max_pgn
            .checked_mul(self.page_size)
            .ok_or_else(|| invalid_config("address space size overflows"))?;
        if size as u64 > u64::from(u32::MAX) + 1 {
            return Err(invalid_config("address space does not fit in 32 bits"));
        }
        Self::check_device("RAM", self.ram_size, self.page_size, MAX_PTE_FPN)?;
        if self.swap_sizes.is_empty() {
            return Err(invalid_config("at least one swap device is required"));
        }
        if self.swap_sizes.len() > MAX_PTE_SWPTYP + 1 {
            return Err(invalid_config("too many swap devices for the swap type field"));
        }
        for size in &self.swap_sizes {
            Self::check_device("swap", *size, self.page_size, MAX_PTE_SWPOFF)?;
        }
        if self.tlb_size < 2 * TLB_SLOT_SIZE {
            return Err(invalid_config("TLB needs at least two slots"));
        }
        if self.symbol_table_size == 0 {
            return Err(invalid_config("symbol table must have at least one slot"));
        }
        if self.registers == 0 {
            return Err(invalid_config("register file must not be empty"));
        }
        Ok(())
    }

    fn check_device(name: &str, size: usize, page_size: usize, max_fpn: usize) -> Result<()> {
        if size == 0 || size % page_size != 0 {
            return Err(Error::InvalidConfig(format!(
                "{} size {} is not a whole number of pages",
                name, size
            )));
        }
        if size / page_size > max_fpn + 1 {
            return Err(Error::InvalidConfig(format!(
                "{} has {} frames, more than the PTE can address",
                name,
                size / page_size
            )));
        }
        Ok(())
    }
}

fn parse_size(token: &str) -> Result<usize> {
    let parsed = match token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => token.parse::<usize>(),
    };
    parsed.map_err(|_| Error::InvalidConfig(format!("bad size: {}", token)))
}

/// Parses the memory line of a simulation input: `RAM SWAP0 [SWAP1 ...]`.
///
/// Zero-sized swap entries are skipped and the remaining devices are
/// numbered in order, so `"R 0 0x1000"` yields a single swap device 0 of
/// `0x1000` bytes.
impl FromStr for MmConfig {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut sizes = line.split_whitespace().map(parse_size);
        let ram_size = sizes
            .next()
            .ok_or_else(|| invalid_config("missing RAM size"))??;
        let swap_sizes = sizes
            .filter(|s| !matches!(s, Ok(0)))
            .collect::<Result<Vec<_>>>()?;
        if swap_sizes.is_empty() {
            return Err(invalid_config("missing swap size"));
        }
        let config = Self {
            ram_size,
            swap_sizes,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = MmConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.page_shift(), 8);
        assert_eq!(config.ram_frames(), 4096);
        assert_eq!(config.address_space_size(), 1 << 22);
    }

    #[test]
    fn test_rejects_bad_page_size() {
        let config = MmConfig { page_size: 300, ..MmConfig::default() };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_ram_beyond_fpn_field() {
        let config = MmConfig::with_frames(MAX_PTE_FPN + 2, 4);
        assert!(config.validate().is_err());
        assert!(MmConfig::with_frames(MAX_PTE_FPN + 1, 4).validate().is_ok());
    }

    #[test]
    fn test_rejects_partial_pages_and_tiny_tlb() {
        let config = MmConfig { ram_size: 1000, ..MmConfig::default() };
        assert!(config.validate().is_err());
        let config = MmConfig { tlb_size: 8, ..MmConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_too_many_swaps() {
        let config = MmConfig {
            swap_sizes: vec![PAGE_SIZE; MAX_PTE_SWPTYP + 2],
            ..MmConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_memory_line() {
        let config: MmConfig = "1048576 16777216 0 0x1000 0".parse().unwrap();
        assert_eq!(config.ram_size, 1 << 20);
        assert_eq!(config.swap_sizes, vec![1 << 24, 0x1000]);
    }

    #[test]
    fn test_rejects_overflowing_geometry() {
        let config = MmConfig {
            page_size: 1 << 40,
            max_pgn: 1 << 30,
            ..MmConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
        assert_eq!(config.address_space_size(), usize::MAX);

        let config = MmConfig::with_frames(usize::MAX, 4);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_parse_renumbers_after_zero_swap() {
        let config: MmConfig = "0x800 0 0x1000".parse().unwrap();
        assert_eq!(config.swap_sizes, vec![0x1000]);
        let config: MmConfig = "0x800 0x200 0 0x300".parse().unwrap();
        assert_eq!(config.swap_sizes, vec![0x200, 0x300]);
    }

    #[test]
    fn test_parse_errors() {
        assert!("".parse::<MmConfig>().is_err());
        assert!("1048576".parse::<MmConfig>().is_err());
        assert!("1048576 abc".parse::<MmConfig>().is_err());
        assert!("1000 4096".parse::<MmConfig>().is_err());
    }
}
