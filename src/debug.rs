// NOTE: Exporting macros in Rust is a bit weird. `#[macro_export]` causes them to be exported to
//       the crate root, but that makes it difficult to include just the macros without using
//       `#[macro_use] extern crate clap_remote;`. That's why the macros are also re-exported from
//       this module.

/// Write something to the logger. Where the output ends up depends on how the logger was set up,
/// see [`setup_logger()`][crate::wrapper::setup_logger()]. By default this is STDERR, and the
/// `CLAP_REMOTE_LOG` environment variable can redirect it to a file.
#[macro_export]
macro_rules! remote_log {
    ($($args:tt)*) => (
        $crate::log::info!($($args)*)
    );
}
pub use remote_log;

/// Similar to `remote_log!()`, more scream-y. Used for printing fatal errors.
#[macro_export]
macro_rules! remote_error {
    ($($args:tt)*) => (
        $crate::log::error!($($args)*)
    );
}
pub use remote_error;

/// The same as `remote_log!()`, but only shown when compiling in debug mode. Used for chatty
/// diagnostics on the event and session paths.
#[macro_export]
macro_rules! remote_trace {
    ($($args:tt)*) => (
        $crate::log::trace!($($args)*)
    );
}
pub use remote_trace;

/// A `debug_assert!()` analogue that prints the error with line number information instead of
/// panicking. The host's audio thread is not a place to unwind from.
#[macro_export]
macro_rules! remote_debug_assert {
    ($cond:expr $(,)?) => (
        if cfg!(debug_assertions) && !$cond {
            $crate::log::debug!(concat!("Debug assertion failed: ", stringify!($cond)));
        }
    );
    ($cond:expr, $format:expr $(, $($args:tt)*)?) => (
        if cfg!(debug_assertions) && !$cond {
            $crate::log::debug!(concat!("Debug assertion failed: ", stringify!($cond), ", ", $format), $($($args)*)?);
        }
    );
}
pub use remote_debug_assert;

/// An unconditional debug assertion failure, for if the condition has already been checked
/// elsewhere.
#[macro_export]
macro_rules! remote_debug_assert_failure {
    () => (
        if cfg!(debug_assertions) {
            $crate::log::debug!("Debug assertion failed");
        }
    );
    ($format:expr $(, $($args:tt)*)?) => (
        if cfg!(debug_assertions) {
            $crate::log::debug!(concat!("Debug assertion failed: ", $format), $($($args)*)?);
        }
    );
}
pub use remote_debug_assert_failure;

/// A `debug_assert_eq!()` analogue that prints the error with line number information instead of
/// panicking.
#[macro_export]
macro_rules! remote_debug_assert_eq {
    ($left:expr, $right:expr $(,)?) => (
        if cfg!(debug_assertions) && $left != $right {
            $crate::log::debug!(concat!("Debug assertion failed: ", stringify!($left), " != ", stringify!($right)));
        }
    );
    ($left:expr, $right:expr, $format:expr $(, $($args:tt)*)?) => (
        if cfg!(debug_assertions) && $left != $right  {
            $crate::log::debug!(concat!("Debug assertion failed: ", stringify!($left), " != ", stringify!($right), ", ", $format), $($($args)*)?);
        }
    );
}
pub use remote_debug_assert_eq;
