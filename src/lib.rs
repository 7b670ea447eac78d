//! Turn an in-process CLAP plugin into a service that remote clients can
//! observe and drive over gRPC.
//!
//! The host loads the shared object and calls into the exported `clap_entry`
//! like it would for any other plugin. Every plugin instance additionally
//! registers itself with a process-wide registry and RPC server, and clients
//! can open a bidirectional event stream against a specific instance: host
//! events (lifecycle, notes, MIDI, transport deltas) flow out, and control
//! requests (restart, process, transport subscription) flow back in.

#[macro_use]
pub mod debug;

/// Everything you need to write and export a plugin. Import this with
/// `use clap_remote::prelude::*;`.
pub mod prelude;

pub mod descriptor;
pub mod event;
pub mod plugin;
pub mod queue;
pub mod registry;
pub mod rpc;
pub mod server;
pub mod transport;
pub mod wrapper;

// Re-exported for use by the `export_clap_entry!` macro and the raw process
// hook signatures.
pub use clap_sys;
pub use log;
