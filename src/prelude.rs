pub use crate::debug::*;

pub use crate::descriptor::Descriptor;
pub use crate::event::{
    BufferConfig, ClientEvent, MidiData, NoteKind, PluginEvent, PluginLifecycleEvent,
    TransportChanges, TransportSnapshot,
};
pub use crate::plugin::{NotePort, Plugin};
pub use crate::queue::MpmcQueue;
pub use crate::registry::{Instances, Registry};
pub use crate::server::{Server, ServerState};
pub use crate::transport::TransportWatcher;
pub use crate::wrapper::clap::CorePlugin;
pub use crate::export_clap_entry;

pub use clap_sys::process::{
    clap_process, clap_process_status, CLAP_PROCESS_CONTINUE, CLAP_PROCESS_CONTINUE_IF_NOT_QUIET,
    CLAP_PROCESS_ERROR, CLAP_PROCESS_SLEEP,
};
