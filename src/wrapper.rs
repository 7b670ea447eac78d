//! The CLAP-facing side of the crate: the ABI adapter for plugin instances and the entry point
//! macro that exports them.

pub mod clap;
pub(crate) mod util;

// This is used by the entry macro.
pub use util::setup_logger;
