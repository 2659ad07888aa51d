//! Page geometry of the default simulated machine
//!
//! The defaults describe a 22-bit virtual address: a 14-bit page number
//! followed by an 8-bit page offset.

/// Default page shift (log2 of [`PAGE_SIZE`])
pub const PAGE_SHIFT: usize = 8;
/// Default page size (256 bytes)
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;
/// Default number of page directory slots
pub const MAX_PGN: usize = 1 << 14;
/// Default symbol table size
pub const SYMBOL_TABLE_SIZE: usize = 30;
/// Default register file size
pub const NUM_REGISTERS: usize = 10;

/// Align up to the given power-of-two alignment
#[inline]
pub const fn align_up(addr: usize, align: usize) -> usize {
    (addr + align - 1) & !(align - 1)
}

/// Align down to the given power-of-two alignment
#[inline]
pub const fn align_down(addr: usize, align: usize) -> usize {
    addr & !(align - 1)
}

/// Check if an address is aligned to the given power-of-two alignment
#[inline]
pub const fn is_aligned(addr: usize, align: usize) -> bool {
    (addr & (align - 1)) == 0
}

/// Get the log2 of a power-of-two number, or `None` if it is not one
#[inline]
pub const fn log2_pow2(n: usize) -> Option<u32> {
    if n == 0 || !n.is_power_of_two() {
        None
    } else {
        Some(n.trailing_zeros())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment() {
        assert_eq!(align_up(0, PAGE_SIZE), 0);
        assert_eq!(align_up(1, PAGE_SIZE), PAGE_SIZE);
        assert_eq!(align_up(PAGE_SIZE, PAGE_SIZE), PAGE_SIZE);
        assert_eq!(align_down(PAGE_SIZE + 3, PAGE_SIZE), PAGE_SIZE);
        assert!(is_aligned(3 * PAGE_SIZE, PAGE_SIZE));
        assert!(!is_aligned(3 * PAGE_SIZE + 1, PAGE_SIZE));
    }

    #[test]
    fn test_log2() {
        assert_eq!(log2_pow2(PAGE_SIZE), Some(PAGE_SHIFT as u32));
        assert_eq!(log2_pow2(0), None);
        assert_eq!(log2_pow2(300), None);
    }
}
