//! The trait a plugin kind implements. All hooks have sensible defaults, so the smallest possible
//! plugin is a unit struct with a descriptor; the instance wrapper takes care of event
//! forwarding, client sessions, and registry bookkeeping around these hooks.

use clap_sys::process::{clap_process, clap_process_status, CLAP_PROCESS_CONTINUE};

use crate::descriptor::Descriptor;
use crate::event::ClientEvent;

/// A note port advertised through the `note-ports` extension. Safe mirror of
/// `clap_note_port_info`; the wrapper copies it into the host's fixed-size record on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotePort {
    pub id: u32,
    pub name: String,
    pub supported_dialects: u32,
    pub preferred_dialect: u32,
}

impl NotePort {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            supported_dialects: clap_sys::ext::note_ports::CLAP_NOTE_DIALECT_CLAP,
            preferred_dialect: clap_sys::ext::note_ports::CLAP_NOTE_DIALECT_CLAP,
        }
    }

    pub fn with_dialects(mut self, supported: u32, preferred: u32) -> Self {
        self.supported_dialects = supported;
        self.preferred_dialect = preferred;
        self
    }
}

/// A plugin kind. One implementation of this trait plus an [`export_clap_entry!`]
/// [crate::export_clap_entry] invocation makes a loadable CLAP plugin whose instances are
/// remotely observable.
///
/// The hooks mirror the host's lifecycle callbacks. The wrapper runs first (latching state,
/// pushing the corresponding event to connected clients) and then defers to the hook; returning
/// `false` from `init`/`activate`/`start_processing` fails the host call.
#[allow(unused_variables)]
pub trait Plugin: Default + Send + Sync + 'static {
    /// The kind's identity. Must live for the registry's lifetime and be unique per process,
    /// which is checked on registration.
    fn descriptor() -> &'static Descriptor;

    /// Called once before the instance is handed to the registry. Push any note ports the kind
    /// wants to advertise; leaving both lists empty keeps the `note-ports` extension hidden.
    fn configure_note_ports(&self, inputs: &mut Vec<NotePort>, outputs: &mut Vec<NotePort>) {}

    fn init(&mut self) -> bool {
        true
    }

    fn destroy(&mut self) {}

    fn activate(&mut self, sample_rate: f64, min_frames: u32, max_frames: u32) -> bool {
        true
    }

    fn deactivate(&mut self) {}

    fn start_processing(&mut self) -> bool {
        true
    }

    fn stop_processing(&mut self) {}

    fn reset(&mut self) {}

    /// Process an audio block. The wrapper has already forwarded the block's events to connected
    /// clients by the time this runs; this hook is where actual DSP would live.
    fn process(&mut self, process: &clap_process) -> clap_process_status {
        CLAP_PROCESS_CONTINUE
    }

    /// A control event a client sent over the stream, observed from the audio thread on the next
    /// process call. The wrapper has already applied the event's own effect (host restart
    /// request, transport toggle); this hook only exists so the kind can react as well.
    fn client_event(&mut self, event: ClientEvent) {}
}

/// Object-safe subset of [`Plugin`] stored in the instance table. Everything except the static
/// descriptor accessor, which the registry entry carries separately.
pub(crate) trait DynPlugin: Send + Sync {
    fn init(&mut self) -> bool;
    fn destroy(&mut self);
    fn activate(&mut self, sample_rate: f64, min_frames: u32, max_frames: u32) -> bool;
    fn deactivate(&mut self);
    fn start_processing(&mut self) -> bool;
    fn stop_processing(&mut self);
    fn reset(&mut self);
    fn process(&mut self, process: &clap_process) -> clap_process_status;
    fn client_event(&mut self, event: ClientEvent);
}

impl<P: Plugin> DynPlugin for P {
    fn init(&mut self) -> bool {
        Plugin::init(self)
    }

    fn destroy(&mut self) {
        Plugin::destroy(self)
    }

    fn activate(&mut self, sample_rate: f64, min_frames: u32, max_frames: u32) -> bool {
        Plugin::activate(self, sample_rate, min_frames, max_frames)
    }

    fn deactivate(&mut self) {
        Plugin::deactivate(self)
    }

    fn start_processing(&mut self) -> bool {
        Plugin::start_processing(self)
    }

    fn stop_processing(&mut self) {
        Plugin::stop_processing(self)
    }

    fn reset(&mut self) {
        Plugin::reset(self)
    }

    fn process(&mut self, process: &clap_process) -> clap_process_status {
        Plugin::process(self, process)
    }

    fn client_event(&mut self, event: ClientEvent) {
        Plugin::client_event(self, event)
    }
}
