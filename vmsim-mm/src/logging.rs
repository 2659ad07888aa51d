//! Logging support for the paging subsystem
//!
//! The macros forward to the `log` crate when the `log` feature is enabled.
//! Without it they still evaluate nothing but keep their arguments
//! type-checked, so call sites need no `#[cfg]` of their own.

/// Trace-level logging (per-access paths)
#[macro_export]
macro_rules! mm_trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "log")]
        log::trace!($($arg)*);
        #[cfg(not(feature = "log"))]
        { let _ = format_args!($($arg)*); }
    }
}

/// Debug-level logging (allocation, free, fault)
#[macro_export]
macro_rules! mm_debug {
    ($($arg:tt)*) => {
        #[cfg(feature = "log")]
        log::debug!($($arg)*);
        #[cfg(not(feature = "log"))]
        { let _ = format_args!($($arg)*); }
    }
}

/// Info-level logging (system lifecycle)
#[macro_export]
macro_rules! mm_info {
    ($($arg:tt)*) => {
        #[cfg(feature = "log")]
        log::info!($($arg)*);
        #[cfg(not(feature = "log"))]
        { let _ = format_args!($($arg)*); }
    }
}

/// Warn-level logging (recoverable exhaustion)
#[macro_export]
macro_rules! mm_warn {
    ($($arg:tt)*) => {
        #[cfg(feature = "log")]
        log::warn!($($arg)*);
        #[cfg(not(feature = "log"))]
        { let _ = format_args!($($arg)*); }
    }
}

/// Error-level logging
#[macro_export]
macro_rules! mm_error {
    ($($arg:tt)*) => {
        #[cfg(feature = "log")]
        log::error!($($arg)*);
        #[cfg(not(feature = "log"))]
        { let _ = format_args!($($arg)*); }
    }
}
