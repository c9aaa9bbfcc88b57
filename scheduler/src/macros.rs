//! Logging macros gated on the `log-*` cargo features.
//!
//! Each level forwards to the `log` facade when its feature is enabled and
//! expands to nothing otherwise.

/// Logs an error message.
#[cfg(feature = "log-error")]
macro_rules! error {
    ($($arg:tt)*) => {
        ::log::error!($($arg)*)
    };
}

/// No-op error macro when log-error feature is disabled.
#[cfg(not(feature = "log-error"))]
macro_rules! error {
    ($($arg:tt)*) => {};
}

/// Logs a warning message.
#[cfg(feature = "log-warn")]
#[allow(unused_macros)]
macro_rules! warn {
    ($($arg:tt)*) => {
        ::log::warn!($($arg)*)
    };
}

/// No-op warn macro when log-warn feature is disabled.
#[cfg(not(feature = "log-warn"))]
#[allow(unused_macros)]
macro_rules! warn {
    ($($arg:tt)*) => {};
}

/// Logs an info message.
#[cfg(feature = "log-info")]
macro_rules! info {
    ($($arg:tt)*) => {
        ::log::info!($($arg)*)
    };
}

/// No-op info macro when log-info feature is disabled.
#[cfg(not(feature = "log-info"))]
macro_rules! info {
    ($($arg:tt)*) => {};
}

/// Logs a debug message.
#[cfg(feature = "log-debug")]
macro_rules! debug {
    ($($arg:tt)*) => {
        ::log::debug!($($arg)*)
    };
}

/// No-op debug macro when log-debug feature is disabled.
#[cfg(not(feature = "log-debug"))]
macro_rules! debug {
    ($($arg:tt)*) => {};
}

/// Logs a trace message.
#[cfg(feature = "log-trace")]
macro_rules! trace {
    ($($arg:tt)*) => {
        ::log::trace!($($arg)*)
    };
}

/// No-op trace macro when log-trace feature is disabled.
#[cfg(not(feature = "log-trace"))]
macro_rules! trace {
    ($($arg:tt)*) => {};
}
