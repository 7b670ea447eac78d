use clap_sys::events::clap_event_transport;
use clap_sys::ext::note_ports::clap_note_port_info;
use clap_sys::host::clap_host;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use super::util::{unsafe_clap_call, ClapPtr};
use crate::event::{ClientEvent, PluginEvent};
use crate::queue::MpmcQueue;
use crate::rpc::ClientEventMessage;
use crate::server::reactor::EventStreamReactor;
use crate::server::worker::queue_worker;
use crate::transport::TransportWatcher;
use atomic_refcell::AtomicRefCell;

/// Capacity of the per-instance event rings, in both directions.
pub(crate) const EVENT_QUEUE_CAPACITY: usize = 256;

/// Connected clients across every instance in the process. The queue worker runs exactly when
/// this is nonzero.
static CONNECTED_CLIENTS: AtomicUsize = AtomicUsize::new(0);

/// The part of a plugin instance that client sessions hang on to.
///
/// The host-visible [`CorePlugin`][super::CorePlugin] holds one strong reference and every
/// [`EventStreamReactor`] holds another, so a session that races the host's destroy callback can
/// still finish its in-flight writes against valid state. The state is freed when the last
/// reactor lets go.
pub(crate) struct InstanceShared {
    host: ClapPtr<clap_host>,
    kind_id: &'static str,
    /// Set right after the owning instance is boxed, before anything else can observe it.
    instance_id: AtomicU64,

    /// The sessions currently attached to this instance. Only locked on connect/disconnect and
    /// for the worker's brief fan-out snapshot.
    clients: Mutex<Vec<Arc<EventStreamReactor>>>,
    /// Lock-free mirror of `clients.len()` for the audio thread's empty check.
    client_count: AtomicUsize,

    /// Plugin-to-clients events, drained by the queue worker.
    outbound: MpmcQueue<PluginEvent, EVENT_QUEUE_CAPACITY>,
    /// Clients-to-plugin events, drained on the next process call.
    inbound: MpmcQueue<ClientEvent, EVENT_QUEUE_CAPACITY>,

    /// Only the audio thread borrows this, during `process`.
    transport: AtomicRefCell<TransportWatcher>,
    wants_transport: AtomicBool,

    note_ports_in: Mutex<Vec<clap_note_port_info>>,
    note_ports_out: Mutex<Vec<clap_note_port_info>>,

    /// Capacity overruns on the outbound ring are reported once per instance, not per event.
    drop_logged: AtomicBool,
}

// `clap_note_port_info` is a plain data record; the raw pointer inside `ClapPtr` is already
// Send+Sync by its own contract.
unsafe impl Send for InstanceShared {}
unsafe impl Sync for InstanceShared {}

impl InstanceShared {
    pub fn new(host: ClapPtr<clap_host>, kind_id: &'static str) -> Self {
        Self {
            host,
            kind_id,
            instance_id: AtomicU64::new(0),
            clients: Mutex::new(Vec::new()),
            client_count: AtomicUsize::new(0),
            outbound: MpmcQueue::new(),
            inbound: MpmcQueue::new(),
            transport: AtomicRefCell::new(TransportWatcher::new()),
            wants_transport: AtomicBool::new(true),
            note_ports_in: Mutex::new(Vec::new()),
            note_ports_out: Mutex::new(Vec::new()),
            drop_logged: AtomicBool::new(false),
        }
    }

    pub fn instance_id(&self) -> u64 {
        self.instance_id.load(Ordering::Relaxed)
    }

    pub(crate) fn set_instance_id(&self, instance_id: u64) {
        self.instance_id.store(instance_id, Ordering::Relaxed);
    }

    /// Attach a new client session. Starts the shared queue worker when this is the first client
    /// anywhere in the process.
    pub fn connect(&self, client: Arc<EventStreamReactor>) {
        let mut clients = self.clients.lock();

        if CONNECTED_CLIENTS.load(Ordering::Acquire) == 0 {
            queue_worker().start();
        }

        clients.push(client);
        self.client_count.store(clients.len(), Ordering::Release);
        let global = CONNECTED_CLIENTS.fetch_add(1, Ordering::AcqRel) + 1;

        remote_trace!(
            "Client connected to instance {} of kind '{}'. Local: {}, global: {}",
            self.instance_id(),
            self.kind_id,
            clients.len(),
            global
        );
    }

    /// Detach the session with the given id. Every session termination path funnels into this;
    /// only the call that actually removes the session updates the counters, so racing paths are
    /// harmless. Stops the queue worker when the last client across the process leaves.
    pub fn disconnect(&self, session: u64) -> bool {
        let global = {
            let mut clients = self.clients.lock();
            let before = clients.len();
            clients.retain(|client| client.session() != session);
            if clients.len() == before {
                return false;
            }

            self.client_count.store(clients.len(), Ordering::Release);
            remote_trace!(
                "Client disconnected from instance {}. Local: {}",
                self.instance_id(),
                clients.len()
            );
            CONNECTED_CLIENTS.fetch_sub(1, Ordering::AcqRel) - 1
        };

        // The worker joins its thread on stop, so this must happen after the client-set lock is
        // released: the worker's fan-out takes that same lock.
        if global == 0 {
            queue_worker().stop();
        }

        true
    }

    /// Cancel every attached session. Called from the host's destroy callback; the sessions
    /// observe the cancellation, finish, and detach themselves.
    pub fn cancel_all_clients(&self) {
        let clients = self.clients_snapshot();
        for client in clients {
            client.try_cancel();
        }
    }

    /// A copy of the current session list, so fan-out never writes while holding the lock.
    pub fn clients_snapshot(&self) -> Vec<Arc<EventStreamReactor>> {
        self.clients.lock().clone()
    }

    pub fn has_clients(&self) -> bool {
        // Deliberately racy: a connect that happens concurrently with this check may lose the
        // event being pushed right now, and a disconnect may cause one spurious enqueue that the
        // worker drains harmlessly.
        self.client_count.load(Ordering::Relaxed) > 0
    }

    /// Enqueue an event for the connected clients and wake the worker. Real-time safe: drops the
    /// oldest queued event when the ring is full, drops the new event when there are no clients.
    pub fn push_event(&self, event: PluginEvent) -> bool {
        if !self.has_clients() {
            return false;
        }

        if !self.outbound.push(event) {
            if !self.drop_logged.swap(true, Ordering::Relaxed) {
                remote_error!(
                    "Outbound event ring of instance {} overflowed, events were dropped",
                    self.instance_id()
                );
            }
            return false;
        }

        queue_worker().try_notify();
        true
    }

    pub fn pop_event(&self) -> Option<PluginEvent> {
        self.outbound.pop()
    }

    pub fn pop_client_event(&self) -> Option<ClientEvent> {
        self.inbound.pop()
    }

    /// Handle one message read from a client's stream: apply its effect directly, then queue it
    /// on the inbound ring so the plugin's hooks can observe it on the audio thread.
    pub fn dispatch_client_event(&self, message: &ClientEventMessage) {
        let event = match ClientEvent::try_from(message.event) {
            Ok(event) => event,
            Err(_) => {
                remote_trace!("Ignoring unknown client event {}", message.event);
                return;
            }
        };

        match event {
            ClientEvent::RequestRestart => self.host_request_restart(),
            ClientEvent::RequestProcess => self.host_request_process(),
            ClientEvent::EnableTransportEvents => self.set_wants_transport(true),
            ClientEvent::DisableTransportEvents => self.set_wants_transport(false),
        }

        let _ = self.inbound.push(event);
    }

    pub fn host_request_restart(&self) {
        let host = &self.host;
        unsafe_clap_call! { host.as_ptr()=>request_restart(host.as_ptr()) };
    }

    pub fn host_request_process(&self) {
        let host = &self.host;
        unsafe_clap_call! { host.as_ptr()=>request_process(host.as_ptr()) };
    }

    pub fn wants_transport(&self) -> bool {
        self.wants_transport.load(Ordering::Acquire)
    }

    pub fn set_wants_transport(&self, value: bool) {
        self.wants_transport.store(value, Ordering::Release);
    }

    /// Run the transport watcher over the block's transport record. Audio thread only.
    pub fn transport_delta(&self, transport: &clap_event_transport) -> Option<PluginEvent> {
        self.transport.borrow_mut().update(transport)
    }

    pub fn add_note_port(&self, info: clap_note_port_info, is_input: bool) {
        if is_input {
            self.note_ports_in.lock().push(info);
        } else {
            self.note_ports_out.lock().push(info);
        }
    }

    pub fn note_port_count(&self, is_input: bool) -> u32 {
        if is_input {
            self.note_ports_in.lock().len() as u32
        } else {
            self.note_ports_out.lock().len() as u32
        }
    }

    pub fn note_port(&self, index: u32, is_input: bool) -> Option<clap_note_port_info> {
        let ports = if is_input {
            self.note_ports_in.lock()
        } else {
            self.note_ports_out.lock()
        };
        ports.get(index as usize).copied()
    }

    pub fn has_note_ports(&self) -> bool {
        !self.note_ports_in.lock().is_empty() || !self.note_ports_out.lock().is_empty()
    }
}
