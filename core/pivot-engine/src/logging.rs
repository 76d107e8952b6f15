//! FILENAME: core/pivot-engine/src/logging.rs
// PURPOSE: Category-tagged logging macros on top of the `log` facade.
//
// Usage: `log_info!("MAP", "built {} entries", n)`. The category becomes the
// `log` target, so any installed logger can filter or print it.

#[doc(hidden)]
pub use log as __log;

// ============================================================================
// MACRO DEFINITIONS & EXPORTS
// ============================================================================

#[macro_export]
macro_rules! log_trace {
    ($cat:expr, $($arg:tt)*) => {
        $crate::logging::__log::trace!(target: $cat, $($arg)*)
    };
}

#[macro_export]
macro_rules! log_debug {
    ($cat:expr, $($arg:tt)*) => {
        $crate::logging::__log::debug!(target: $cat, $($arg)*)
    };
}

#[macro_export]
macro_rules! log_info {
    ($cat:expr, $($arg:tt)*) => {
        $crate::logging::__log::info!(target: $cat, $($arg)*)
    };
}

#[macro_export]
macro_rules! log_warn {
    ($cat:expr, $($arg:tt)*) => {
        $crate::logging::__log::warn!(target: $cat, $($arg)*)
    };
}

#[macro_export]
macro_rules! log_error {
    ($cat:expr, $($arg:tt)*) => {
        $crate::logging::__log::error!(target: $cat, $($arg)*)
    };
}

// ENTER/EXIT macros for lifecycle tracing

#[macro_export]
macro_rules! log_enter {
    ($cat:expr, $func:expr) => {
        $crate::logging::__log::info!(target: $cat, "ENTER {}", $func)
    };
    ($cat:expr, $func:expr, $($arg:tt)*) => {
        $crate::logging::__log::info!(target: $cat, "ENTER {} {}", $func, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_exit {
    ($cat:expr, $func:expr) => {
        $crate::logging::__log::info!(target: $cat, "EXIT {}", $func)
    };
    ($cat:expr, $func:expr, $($arg:tt)*) => {
        $crate::logging::__log::info!(target: $cat, "EXIT {} {}", $func, format_args!($($arg)*))
    };
}

// Re-export the macros so they can be imported via `use crate::logging::log_info;`
pub use crate::log_debug;
pub use crate::log_enter;
pub use crate::log_error;
pub use crate::log_exit;
pub use crate::log_info;
pub use crate::log_trace;
pub use crate::log_warn;
