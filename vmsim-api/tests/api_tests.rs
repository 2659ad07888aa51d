//! API tests

use vmsim_api::paging::{align_up, MAX_PGN, PAGE_SHIFT, PAGE_SIZE};
use vmsim_api::{AccessMode, Error, LockOption, RAM_LCK, SWP_LCK};

#[test]
fn test_default_geometry_is_22_bit() {
    assert_eq!(PAGE_SIZE, 256);
    assert_eq!(MAX_PGN * PAGE_SIZE, 1 << 22);
    assert_eq!(1usize << PAGE_SHIFT, PAGE_SIZE);
}

#[test]
fn test_lock_selectors() {
    assert_eq!(LockOption::from_raw(RAM_LCK).unwrap(), LockOption::Ram);
    assert_eq!(LockOption::from_raw(SWP_LCK).unwrap(), LockOption::Swap);
    let err = LockOption::from_raw(0xff).unwrap_err();
    assert_eq!(err, Error::InvalidLockOption(0xff));
    assert_eq!(err.code(), -5);
}

#[test]
fn test_page_alignment_of_sizes() {
    assert_eq!(align_up(300, PAGE_SIZE), 512);
    assert_eq!(align_up(256, PAGE_SIZE), 256);
}

#[test]
fn test_access_mode() {
    assert!(AccessMode::Random.is_random());
    assert!(!AccessMode::Sequential.is_random());
}

#[test]
fn test_error_is_std_error() {
    fn takes_error(_: &dyn std::error::Error) {}
    takes_error(&Error::FrameExhausted);
}
