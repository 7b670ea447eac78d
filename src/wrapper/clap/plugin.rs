use clap_sys::events::{
    clap_event_header, clap_event_midi, clap_event_midi2, clap_event_midi_sysex, clap_event_note,
    CLAP_CORE_EVENT_SPACE_ID, CLAP_EVENT_MIDI, CLAP_EVENT_MIDI2, CLAP_EVENT_MIDI_SYSEX,
    CLAP_EVENT_NOTE_CHOKE, CLAP_EVENT_NOTE_END, CLAP_EVENT_NOTE_OFF, CLAP_EVENT_NOTE_ON,
    CLAP_EVENT_TRANSPORT,
};
use clap_sys::ext::note_ports::{clap_note_port_info, clap_plugin_note_ports, CLAP_EXT_NOTE_PORTS};
use clap_sys::host::clap_host;
use clap_sys::plugin::clap_plugin;
use clap_sys::process::{clap_process, clap_process_status, CLAP_PROCESS_ERROR};
use clap_sys::string_sizes::CLAP_NAME_SIZE;
use crossbeam::atomic::AtomicCell;
use parking_lot::RwLock;
use std::ffi::{c_void, CStr};
use std::os::raw::c_char;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::shared::InstanceShared;
use super::util::{check_null_ptr, clap_call, ClapPtr};
use crate::descriptor::Descriptor;
use crate::event::{BufferConfig, MidiData, NoteKind, PluginEvent, PluginLifecycleEvent};
use crate::plugin::{DynPlugin, NotePort, Plugin};
use crate::registry::{Instances, Registry};
use crate::wrapper::util::strlcpy;

/// A live plugin instance: the `clap_plugin` vtable the host drives, the user's plugin object,
/// and the shared state the RPC side attaches to.
///
/// The instance table owns this exclusively (boxed, so the address the host sees is stable); the
/// host only ever holds the `clap_plugin` pointer back into it.
#[repr(C)]
pub struct CorePlugin {
    // Keep the vtable as the first field so we can do a simple pointer cast
    pub(crate) clap_plugin: clap_plugin,

    /// The user's plugin object behind its lifecycle hooks.
    hooks: RwLock<Box<dyn DynPlugin>>,

    descriptor: &'static Descriptor,
    kind_id: &'static str,
    /// The instance's own boxed address, mixed through a finalizer so clients get an opaque,
    /// evenly distributed token. Unique for this instance's lifetime within the process.
    instance_id: u64,

    active: AtomicBool,
    processing: AtomicBool,
    /// Latched in `activate()`.
    config: AtomicCell<Option<BufferConfig>>,

    shared: Arc<InstanceShared>,

    clap_plugin_note_ports: clap_plugin_note_ports,
}

// The raw pointers in the vtable are either function pointers or the leaked 'static descriptor;
// the host pointer is wrapped in `ClapPtr` which carries its own Send+Sync contract.
unsafe impl Send for CorePlugin {}
unsafe impl Sync for CorePlugin {}

/// MurmurHash3's 64-bit finalizer. The boxed instance address is already unique within the
/// process; this only spreads that uniqueness across all the bits so truncated or modulo'd uses
/// of the id stay collision free.
fn mix_instance_id(address: u64) -> u64 {
    let mut h = address;
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^ (h >> 33)
}

fn note_port_info(port: &NotePort) -> clap_note_port_info {
    let mut info = clap_note_port_info {
        id: port.id,
        supported_dialects: port.supported_dialects,
        preferred_dialect: port.preferred_dialect,
        name: [0; CLAP_NAME_SIZE],
    };
    strlcpy(&mut info.name, &port.name);
    info
}

impl CorePlugin {
    /// Create an instance of the plugin kind `P`, register it with the instance table, and hand
    /// the host its `clap_plugin` pointer. This is the registry entry's factory hook.
    pub(crate) fn create<P: Plugin>(host: *const clap_host) -> *const clap_plugin {
        check_null_ptr!(ptr::null(), host);

        let descriptor = P::descriptor();
        let Some(raw_descriptor) = Registry::raw_descriptor(descriptor.id()) else {
            remote_debug_assert_failure!(
                "Tried to instantiate unregistered plugin kind '{}'",
                descriptor.id()
            );
            return ptr::null();
        };
        let Some(kind_id) = Registry::kind_id(descriptor.id()) else {
            return ptr::null();
        };

        // The server is shared by every instance in the process. It comes up with the first
        // instance and stays up: hosts create and destroy instances at will, and restarting the
        // transport every time would drop reconnecting clients for no reason.
        crate::server::ensure_started();

        let plugin = P::default();
        let shared = Arc::new(InstanceShared::new(
            unsafe { ClapPtr::new(host) },
            kind_id,
        ));

        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        plugin.configure_note_ports(&mut inputs, &mut outputs);
        for port in &inputs {
            shared.add_note_port(note_port_info(port), true);
        }
        for port in &outputs {
            shared.add_note_port(note_port_info(port), false);
        }

        let mut wrapper = Box::new(Self {
            clap_plugin: clap_plugin {
                desc: raw_descriptor,
                // We don't need the data pointer, the vtable lives at the start of `Self`
                plugin_data: ptr::null_mut(),
                init: Some(Self::init),
                destroy: Some(Self::destroy),
                activate: Some(Self::activate),
                deactivate: Some(Self::deactivate),
                start_processing: Some(Self::start_processing),
                stop_processing: Some(Self::stop_processing),
                reset: Some(Self::reset),
                process: Some(Self::process),
                get_extension: Some(Self::get_extension),
                on_main_thread: Some(Self::on_main_thread),
            },
            hooks: RwLock::new(Box::new(plugin)),
            descriptor,
            kind_id,
            instance_id: 0,
            active: AtomicBool::new(false),
            processing: AtomicBool::new(false),
            config: AtomicCell::new(None),
            shared,
            clap_plugin_note_ports: clap_plugin_note_ports {
                count: Some(Self::ext_note_ports_count),
                get: Some(Self::ext_note_ports_get),
            },
        });

        // The id is derived from the final allocation, so it can only be filled in now. Nothing
        // else has seen the instance or its shared state yet.
        let instance_id = mix_instance_id(&*wrapper as *const Self as u64);
        wrapper.instance_id = instance_id;
        wrapper.shared.set_instance_id(instance_id);

        remote_log!(
            "Created instance {} of plugin kind '{}'",
            instance_id,
            kind_id
        );

        Instances::emplace(kind_id, wrapper)
    }

    pub fn descriptor(&self) -> &'static Descriptor {
        self.descriptor
    }

    pub fn kind_id(&self) -> &'static str {
        self.kind_id
    }

    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    /// The configuration latched by the last `activate()`, if the instance is or has been active.
    pub fn buffer_config(&self) -> Option<BufferConfig> {
        self.config.load()
    }

    pub fn wants_transport(&self) -> bool {
        self.shared.wants_transport()
    }

    pub fn set_wants_transport(&self, value: bool) {
        self.shared.set_wants_transport(value);
    }

    /// Advertise another note input port. Ports can only change while the instance is inactive.
    pub fn with_note_port_in(&self, port: NotePort) -> bool {
        if self.is_active() {
            return false;
        }
        self.shared.add_note_port(note_port_info(&port), true);
        true
    }

    /// Advertise another note output port. Ports can only change while the instance is inactive.
    pub fn with_note_port_out(&self, port: NotePort) -> bool {
        if self.is_active() {
            return false;
        }
        self.shared.add_note_port(note_port_info(&port), false);
        true
    }

    /// Ask the host to deactivate and reactivate the instance.
    pub fn host_request_restart(&self) {
        self.shared.host_request_restart();
    }

    /// Ask the host to start processing the instance.
    pub fn host_request_process(&self) {
        self.shared.host_request_process();
    }

    /// Queue an event for every connected client. Returns `false` when the event was dropped,
    /// either because nobody is listening or because the outbound ring stayed full.
    pub fn push_event(&self, event: PluginEvent) -> bool {
        self.shared.push_event(event)
    }

    pub(crate) fn shared(&self) -> &Arc<InstanceShared> {
        &self.shared
    }

    /// Translate one event from the block's input list into its outbound representation and queue
    /// it. Runs on the audio thread.
    unsafe fn translate_event(&self, event: *const clap_event_header) {
        let header = &*event;
        if header.space_id != CLAP_CORE_EVENT_SPACE_ID {
            return;
        }

        match header.type_ {
            CLAP_EVENT_NOTE_ON | CLAP_EVENT_NOTE_OFF | CLAP_EVENT_NOTE_CHOKE
            | CLAP_EVENT_NOTE_END => {
                let kind = match header.type_ {
                    CLAP_EVENT_NOTE_ON => NoteKind::NoteOn,
                    CLAP_EVENT_NOTE_OFF => NoteKind::NoteOff,
                    CLAP_EVENT_NOTE_CHOKE => NoteKind::NoteChoke,
                    _ => NoteKind::NoteEnd,
                };
                let note = &*(event as *const clap_event_note);
                self.push_event(PluginEvent::Note {
                    kind,
                    note_id: note.note_id,
                    port_index: note.port_index,
                    channel: note.channel,
                    key: note.key,
                    velocity: note.velocity,
                });
            }
            CLAP_EVENT_MIDI => {
                let midi = &*(event as *const clap_event_midi);
                self.push_event(PluginEvent::Midi {
                    port_index: midi.port_index,
                    data: MidiData::short(midi.data),
                });
            }
            CLAP_EVENT_MIDI_SYSEX => {
                let sysex = &*(event as *const clap_event_midi_sysex);
                if !sysex.buffer.is_null() {
                    let data = std::slice::from_raw_parts(sysex.buffer, sysex.size as usize);
                    self.push_event(PluginEvent::Midi {
                        port_index: sysex.port_index,
                        data: MidiData::sysex(data),
                    });
                }
            }
            CLAP_EVENT_MIDI2 => {
                let midi2 = &*(event as *const clap_event_midi2);
                self.push_event(PluginEvent::Midi {
                    port_index: midi2.port_index,
                    data: MidiData::midi2(midi2.data),
                });
            }
            // The transport record is watched separately, through the process struct
            CLAP_EVENT_TRANSPORT => (),
            _ => remote_trace!("Unhandled event type {} in the core event space", header.type_),
        }
    }

    unsafe extern "C" fn init(plugin: *const clap_plugin) -> bool {
        check_null_ptr!(false, plugin);
        let wrapper = &*(plugin as *const Self);

        wrapper.hooks.write().init()
    }

    unsafe extern "C" fn destroy(plugin: *const clap_plugin) {
        check_null_ptr!((), plugin);

        // The borrow has to end before the instance table drops the allocation below
        let (kind_id, instance_id) = {
            let wrapper = &*(plugin as *const Self);
            wrapper.hooks.write().destroy();
            // Kick every attached session off; they finish any in-flight write against the
            // shared state and detach on their own time
            wrapper.shared.cancel_all_clients();
            (wrapper.kind_id, wrapper.instance_id)
        };

        if !Instances::destroy(kind_id, plugin as *const Self) {
            remote_error!(
                "Destroyed instance {instance_id} of kind '{kind_id}' was not in the instance \
                 table"
            );
        }
    }

    unsafe extern "C" fn activate(
        plugin: *const clap_plugin,
        sample_rate: f64,
        min_frames_count: u32,
        max_frames_count: u32,
    ) -> bool {
        check_null_ptr!(false, plugin);
        let wrapper = &*(plugin as *const Self);

        wrapper.config.store(Some(BufferConfig {
            sample_rate,
            min_frames: min_frames_count,
            max_frames: max_frames_count,
        }));
        wrapper.active.store(true, Ordering::Release);

        if wrapper
            .hooks
            .write()
            .activate(sample_rate, min_frames_count, max_frames_count)
        {
            wrapper.push_event(PluginEvent::Lifecycle(PluginLifecycleEvent::Activate));
            true
        } else {
            wrapper.active.store(false, Ordering::Release);
            false
        }
    }

    unsafe extern "C" fn deactivate(plugin: *const clap_plugin) {
        check_null_ptr!((), plugin);
        let wrapper = &*(plugin as *const Self);

        wrapper.active.store(false, Ordering::Release);
        wrapper.hooks.write().deactivate();
        wrapper.push_event(PluginEvent::Lifecycle(PluginLifecycleEvent::Deactivate));
    }

    unsafe extern "C" fn start_processing(plugin: *const clap_plugin) -> bool {
        check_null_ptr!(false, plugin);
        let wrapper = &*(plugin as *const Self);

        wrapper.processing.store(true, Ordering::Release);
        if wrapper.hooks.write().start_processing() {
            wrapper.push_event(PluginEvent::Lifecycle(PluginLifecycleEvent::StartProcessing));
            true
        } else {
            wrapper.processing.store(false, Ordering::Release);
            false
        }
    }

    unsafe extern "C" fn stop_processing(plugin: *const clap_plugin) {
        check_null_ptr!((), plugin);
        let wrapper = &*(plugin as *const Self);

        wrapper.processing.store(false, Ordering::Release);
        wrapper.hooks.write().stop_processing();
        wrapper.push_event(PluginEvent::Lifecycle(PluginLifecycleEvent::StopProcessing));
    }

    unsafe extern "C" fn reset(plugin: *const clap_plugin) {
        check_null_ptr!((), plugin);
        let wrapper = &*(plugin as *const Self);

        wrapper.hooks.write().reset();
        wrapper.push_event(PluginEvent::Lifecycle(PluginLifecycleEvent::Reset));
    }

    unsafe extern "C" fn process(
        plugin: *const clap_plugin,
        process: *const clap_process,
    ) -> clap_process_status {
        check_null_ptr!(CLAP_PROCESS_ERROR, plugin, process);
        let wrapper = &*(plugin as *const Self);
        let process = &*process;

        // Control events clients sent since the last block
        while let Some(event) = wrapper.shared.pop_client_event() {
            wrapper.hooks.write().client_event(event);
        }

        if !process.transport.is_null() && wrapper.shared.wants_transport() {
            if let Some(event) = wrapper.shared.transport_delta(&*process.transport) {
                wrapper.push_event(event);
            }
        }

        if !process.in_events.is_null() {
            let in_events = process.in_events;
            let num_events = clap_call! { in_events=>size(in_events) };
            for event_idx in 0..num_events {
                let event = clap_call! { in_events=>get(in_events, event_idx) };
                if !event.is_null() {
                    wrapper.translate_event(event);
                }
            }
        }

        wrapper.hooks.write().process(process)
    }

    unsafe extern "C" fn get_extension(
        plugin: *const clap_plugin,
        id: *const c_char,
    ) -> *const c_void {
        check_null_ptr!(ptr::null(), plugin, id);
        let wrapper = &*(plugin as *const Self);

        let id = CStr::from_ptr(id);
        if id == CLAP_EXT_NOTE_PORTS && wrapper.shared.has_note_ports() {
            &wrapper.clap_plugin_note_ports as *const _ as *const c_void
        } else {
            remote_trace!("Host queried extension '{id:?}'");
            ptr::null()
        }
    }

    unsafe extern "C" fn on_main_thread(plugin: *const clap_plugin) {
        check_null_ptr!((), plugin);
        // Nothing is scheduled onto the host's main thread right now
    }

    unsafe extern "C" fn ext_note_ports_count(plugin: *const clap_plugin, is_input: bool) -> u32 {
        check_null_ptr!(0, plugin);
        let wrapper = &*(plugin as *const Self);

        wrapper.shared.note_port_count(is_input)
    }

    unsafe extern "C" fn ext_note_ports_get(
        plugin: *const clap_plugin,
        index: u32,
        is_input: bool,
        info: *mut clap_note_port_info,
    ) -> bool {
        check_null_ptr!(false, plugin, info);
        let wrapper = &*(plugin as *const Self);

        match wrapper.shared.note_port(index, is_input) {
            Some(port) => {
                *info = port;
                true
            }
            None => {
                remote_debug_assert_failure!("Host queried out of bounds note port {}", index);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Instances;
    use clap_sys::version::CLAP_VERSION;
    use lazy_static::lazy_static;
    use std::sync::OnceLock;

    #[derive(Default)]
    struct LifecycleKind;

    lazy_static! {
        static ref LIFECYCLE_DESCRIPTOR: Descriptor = Descriptor::new(
            "dev.example.core-lifecycle",
            "Lifecycle",
            "Example Audio",
            "0.1.0"
        );
    }

    impl Plugin for LifecycleKind {
        fn descriptor() -> &'static Descriptor {
            &LIFECYCLE_DESCRIPTOR
        }

        fn configure_note_ports(&self, inputs: &mut Vec<NotePort>, _outputs: &mut Vec<NotePort>) {
            inputs.push(NotePort::new(0, "Notes In"));
        }
    }

    unsafe extern "C" fn host_noop(_host: *const clap_host) {}
    unsafe extern "C" fn host_no_extension(
        _host: *const clap_host,
        _id: *const c_char,
    ) -> *const c_void {
        ptr::null()
    }

    struct HostHolder(clap_host);
    unsafe impl Sync for HostHolder {}

    fn test_host() -> &'static clap_host {
        static HOST: OnceLock<HostHolder> = OnceLock::new();
        &HOST
            .get_or_init(|| {
                HostHolder(clap_host {
                    clap_version: CLAP_VERSION,
                    host_data: ptr::null_mut(),
                    name: b"unit test host\0".as_ptr() as *const c_char,
                    vendor: b"clap_remote\0".as_ptr() as *const c_char,
                    url: b"https://example.dev\0".as_ptr() as *const c_char,
                    version: b"1.0.0\0".as_ptr() as *const c_char,
                    get_extension: Some(host_no_extension),
                    request_restart: Some(host_noop),
                    request_process: Some(host_noop),
                    request_callback: Some(host_noop),
                })
            })
            .0
    }

    #[test]
    fn instance_lifecycle_and_table_bookkeeping() {
        Registry::register::<LifecycleKind>();

        let plugin = CorePlugin::create::<LifecycleKind>(test_host());
        assert!(!plugin.is_null());

        let wrapper = unsafe { &*(plugin as *const CorePlugin) };
        let instance_id = wrapper.instance_id();
        assert_ne!(instance_id, 0);

        // The instance is resolvable through the table while it lives
        assert!(Instances::contains(instance_id));
        let shared = Instances::shared(instance_id).expect("a live instance resolves");
        assert_eq!(shared.instance_id(), instance_id);

        // An event with no clients attached is dropped
        assert!(!wrapper.push_event(PluginEvent::Lifecycle(PluginLifecycleEvent::Reset)));

        // Port metadata can only change while inactive
        assert!(!wrapper.is_active());
        assert!(wrapper.with_note_port_in(NotePort::new(1, "Second In")));
        assert!(unsafe { ((*plugin).activate.unwrap())(plugin, 48_000.0, 32, 4096) });
        assert!(wrapper.is_active());
        assert_eq!(
            wrapper.buffer_config(),
            Some(BufferConfig {
                sample_rate: 48_000.0,
                min_frames: 32,
                max_frames: 4096
            })
        );
        assert!(!wrapper.with_note_port_in(NotePort::new(2, "Too Late")));
        unsafe { ((*plugin).deactivate.unwrap())(plugin) };
        assert!(!wrapper.is_active());

        // Destroy removes the instance; the old id no longer resolves
        unsafe { ((*plugin).destroy.unwrap())(plugin) };
        assert!(!Instances::contains(instance_id));
        assert!(Instances::shared(instance_id).is_none());

        // The shared state itself outlives the destroy for as long as someone holds it
        assert_eq!(shared.instance_id(), instance_id);
    }

    #[test]
    fn instance_id_mixing_spreads_bits() {
        // Nearby addresses must land far apart
        let a = mix_instance_id(0x7f00_0000_1000);
        let b = mix_instance_id(0x7f00_0000_1010);
        assert_ne!(a, b);
        assert_ne!(a >> 32, b >> 32, "high bits did not diverge");

        // The reference finalizer values must be reproduced exactly
        assert_eq!(mix_instance_id(0), 0);
    }

    #[test]
    fn note_port_info_copies_name() {
        let port = NotePort::new(7, "Notes In");
        let info = note_port_info(&port);
        assert_eq!(info.id, 7);
        let name = unsafe { CStr::from_ptr(info.name.as_ptr()) };
        assert_eq!(name.to_str().unwrap(), "Notes In");
    }
}
