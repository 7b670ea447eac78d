//! End-to-end exercise of the exported entry point: a minimal in-process host drives the CLAP
//! callbacks while a real gRPC client observes the instance over the event stream.

use std::ffi::c_void;
use std::mem;
use std::os::raw::c_char;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic::{Code, Request, Streaming};

use clap_remote::clap_sys::events::{
    clap_event_header, clap_event_note, clap_event_transport, clap_input_events,
    CLAP_CORE_EVENT_SPACE_ID, CLAP_EVENT_NOTE_ON, CLAP_EVENT_TRANSPORT,
};
use clap_remote::clap_sys::factory::plugin_factory::{
    clap_plugin_factory, CLAP_PLUGIN_FACTORY_ID,
};
use clap_remote::clap_sys::host::clap_host;
use clap_remote::clap_sys::plugin::clap_plugin;
use clap_remote::clap_sys::process::clap_process;
use clap_remote::clap_sys::version::CLAP_VERSION;
use clap_remote::prelude::*;
use clap_remote::rpc::grpc::plugin_service_client::PluginServiceClient;
use clap_remote::rpc::{
    plugin_event_message::Kind, transport, ClientEventMessage, Empty, NoteType,
    PluginEventMessage,
};
use clap_remote::server::worker::queue_worker;

#[derive(Default)]
struct TestInstrument;

impl Plugin for TestInstrument {
    fn descriptor() -> &'static Descriptor {
        static DESCRIPTOR: OnceLock<Descriptor> = OnceLock::new();
        DESCRIPTOR.get_or_init(|| {
            Descriptor::new(
                "dev.example.test-instrument",
                "Test Instrument",
                "Example Audio",
                "0.1.0",
            )
            .with_description("Fixture for the event stream tests")
            .with_features(["instrument", "utility"])
        })
    }

    fn configure_note_ports(&self, inputs: &mut Vec<NotePort>, _outputs: &mut Vec<NotePort>) {
        inputs.push(NotePort::new(0, "Notes In"));
    }
}

clap_remote::export_clap_entry!(TestInstrument);

// ---- a minimal in-process host ----

static RESTART_REQUESTS: AtomicUsize = AtomicUsize::new(0);
static PROCESS_REQUESTS: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" fn host_get_extension(
    _host: *const clap_host,
    _id: *const c_char,
) -> *const c_void {
    ptr::null()
}

unsafe extern "C" fn host_request_restart(_host: *const clap_host) {
    RESTART_REQUESTS.fetch_add(1, Ordering::SeqCst);
}

unsafe extern "C" fn host_request_process(_host: *const clap_host) {
    PROCESS_REQUESTS.fetch_add(1, Ordering::SeqCst);
}

unsafe extern "C" fn host_request_callback(_host: *const clap_host) {}

struct HostHolder(clap_host);
unsafe impl Sync for HostHolder {}

fn test_host() -> &'static clap_host {
    static HOST: OnceLock<HostHolder> = OnceLock::new();
    &HOST
        .get_or_init(|| {
            HostHolder(clap_host {
                clap_version: CLAP_VERSION,
                host_data: ptr::null_mut(),
                name: b"basic test host\0".as_ptr() as *const c_char,
                vendor: b"clap_remote\0".as_ptr() as *const c_char,
                url: b"https://example.dev\0".as_ptr() as *const c_char,
                version: b"1.0.0\0".as_ptr() as *const c_char,
                get_extension: Some(host_get_extension),
                request_restart: Some(host_request_restart),
                request_process: Some(host_request_process),
                request_callback: Some(host_request_callback),
            })
        })
        .0
}

// ---- a hand-rolled input event list ----

unsafe extern "C" fn events_size(list: *const clap_input_events) -> u32 {
    let events = &*((*list).ctx as *const Vec<clap_event_note>);
    events.len() as u32
}

unsafe extern "C" fn events_get(
    list: *const clap_input_events,
    index: u32,
) -> *const clap_event_header {
    let events = &*((*list).ctx as *const Vec<clap_event_note>);
    match events.get(index as usize) {
        Some(event) => event as *const clap_event_note as *const clap_event_header,
        None => ptr::null(),
    }
}

fn note_on(key: i16, velocity: f64) -> clap_event_note {
    clap_event_note {
        header: clap_event_header {
            size: mem::size_of::<clap_event_note>() as u32,
            time: 0,
            space_id: CLAP_CORE_EVENT_SPACE_ID,
            type_: CLAP_EVENT_NOTE_ON,
            flags: 0,
        },
        note_id: 1,
        port_index: 0,
        channel: 0,
        key,
        velocity,
    }
}

fn transport_record(flags: u32, song_pos_beats: i64, tempo: f64) -> clap_event_transport {
    clap_event_transport {
        header: clap_event_header {
            size: mem::size_of::<clap_event_transport>() as u32,
            time: 0,
            space_id: CLAP_CORE_EVENT_SPACE_ID,
            type_: CLAP_EVENT_TRANSPORT,
            flags: 0,
        },
        flags,
        song_pos_beats,
        song_pos_seconds: 0,
        tempo,
        tempo_inc: 0.0,
        loop_start_beats: 0,
        loop_end_beats: 0,
        loop_start_seconds: 0,
        loop_end_seconds: 0,
        bar_start: 0,
        bar_number: 0,
        tsig_num: 4,
        tsig_denom: 4,
    }
}

/// Run one process call over the given events and transport record.
unsafe fn process_block(
    plugin: *const clap_plugin,
    events: &Vec<clap_event_note>,
    transport: Option<&clap_event_transport>,
) {
    let list = clap_input_events {
        ctx: events as *const Vec<clap_event_note> as *mut c_void,
        size: Some(events_size),
        get: Some(events_get),
    };
    let process = clap_process {
        steady_time: 0,
        frames_count: 64,
        transport: transport.map_or(ptr::null(), |t| t as *const clap_event_transport),
        audio_inputs: ptr::null(),
        audio_outputs: ptr::null_mut(),
        audio_inputs_count: 0,
        audio_outputs_count: 0,
        in_events: &list,
        out_events: ptr::null(),
    };

    ((*plugin).process.unwrap())(plugin, &process);
}

// ---- helpers ----

async fn open_session(
    client: &mut PluginServiceClient<Channel>,
    instance_id: Option<u64>,
) -> Result<
    (
        mpsc::Sender<ClientEventMessage>,
        Streaming<PluginEventMessage>,
    ),
    tonic::Status,
> {
    let (tx, rx) = mpsc::channel(8);
    let mut request = Request::new(ReceiverStream::new(rx));
    if let Some(instance_id) = instance_id {
        request
            .metadata_mut()
            .insert("plugin_id", instance_id.to_string().parse().unwrap());
    }
    let response = client.event_stream(request).await?;
    Ok((tx, response.into_inner()))
}

async fn next_message(stream: &mut Streaming<PluginEventMessage>) -> PluginEventMessage {
    tokio::time::timeout(Duration::from_secs(10), stream.message())
        .await
        .expect("timed out waiting for a plugin event")
        .expect("stream failed")
        .expect("stream ended unexpectedly")
}

async fn expect_cancelled(stream: &mut Streaming<PluginEventMessage>) {
    loop {
        match tokio::time::timeout(Duration::from_secs(10), stream.message())
            .await
            .expect("timed out waiting for the stream to end")
        {
            Ok(Some(_)) => continue,
            Ok(None) => panic!("stream finished cleanly instead of being cancelled"),
            Err(status) => {
                assert_eq!(status.code(), Code::Cancelled);
                return;
            }
        }
    }
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting until {what}");
}

fn lifecycle(message: &PluginEventMessage) -> Option<PluginLifecycleEvent> {
    match message.kind {
        Some(Kind::Event(event)) => PluginLifecycleEvent::try_from(event).ok(),
        _ => None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_session_lifecycle() {
    // -- boundary: entry, factory, instance creation --

    let init = clap_entry.init.unwrap();
    assert!(unsafe { init(b"/tmp/plugins\0".as_ptr() as *const c_char) });

    let get_factory = clap_entry.get_factory.unwrap();
    assert!(unsafe { get_factory(b"not.a.factory\0".as_ptr() as *const c_char) }.is_null());
    let factory = unsafe { get_factory(CLAP_PLUGIN_FACTORY_ID.as_ptr()) }
        as *const clap_plugin_factory;
    assert!(!factory.is_null());

    assert_eq!(unsafe { ((*factory).get_plugin_count.unwrap())(factory) }, 1);
    let raw_descriptor = unsafe { ((*factory).get_plugin_descriptor.unwrap())(factory, 0) };
    assert!(!raw_descriptor.is_null());
    let descriptor = unsafe { Descriptor::from_raw(&*raw_descriptor) };
    assert_eq!(descriptor, *TestInstrument::descriptor());

    let plugin = unsafe {
        ((*factory).create_plugin.unwrap())(
            factory,
            test_host(),
            b"dev.example.test-instrument\0".as_ptr() as *const c_char,
        )
    };
    assert!(!plugin.is_null());
    assert!(unsafe { ((*plugin).init.unwrap())(plugin) });

    let snapshot = Instances::snapshot();
    assert_eq!(snapshot.len(), 1);
    let (kind_id, instance_id) = snapshot[0];
    assert_eq!(kind_id, "dev.example.test-instrument");

    // The shared server came up with the instance
    let port = clap_remote::server::global()
        .lock()
        .port()
        .expect("the RPC server is running");

    let mut client = PluginServiceClient::connect(format!("http://127.0.0.1:{port}"))
        .await
        .expect("client connects");

    // -- unary listing --

    let instances = client
        .get_plugin_instances(Empty {})
        .await
        .unwrap()
        .into_inner()
        .instances;
    assert_eq!(instances.get(kind_id), Some(&instance_id));

    // -- discovery: no plugin_id means a metadata-carrying rejection --

    let status = open_session(&mut client, None)
        .await
        .expect_err("sessions without a plugin_id are refused");
    assert_eq!(status.code(), Code::Unauthenticated);
    let advertised = status
        .metadata()
        .get(kind_id)
        .expect("the rejection advertises live instances")
        .to_str()
        .unwrap()
        .to_owned();
    assert_eq!(advertised, instance_id.to_string());

    // -- events flow to an attached session --

    let (control_tx, mut stream) = open_session(&mut client, Some(instance_id))
        .await
        .expect("session opens");
    assert!(queue_worker().is_running(), "first client starts the worker");

    assert!(unsafe { ((*plugin).activate.unwrap())(plugin, 48_000.0, 32, 4096) });
    assert_eq!(
        lifecycle(&next_message(&mut stream).await),
        Some(PluginLifecycleEvent::Activate)
    );

    assert!(unsafe { ((*plugin).start_processing.unwrap())(plugin) });
    assert_eq!(
        lifecycle(&next_message(&mut stream).await),
        Some(PluginLifecycleEvent::StartProcessing)
    );

    // A note-on in the block arrives as exactly one note message
    let events = vec![note_on(60, 0.5)];
    unsafe { process_block(plugin, &events, None) };
    match next_message(&mut stream).await.kind {
        Some(Kind::Note(note)) => {
            assert_eq!(note.r#type, NoteType::NoteOn as i32);
            assert_eq!(note.note_id, 1);
            assert_eq!(note.port_index, 0);
            assert_eq!(note.channel, 0);
            assert_eq!(note.key, 60);
            assert_eq!(note.velocity, 0.5);
        }
        other => panic!("expected a note event, got {other:?}"),
    }

    // A first transport record with two changed groups collapses into transport_all
    let no_events = Vec::new();
    let record = transport_record(1, 0, 120.0);
    unsafe { process_block(plugin, &no_events, Some(&record)) };
    match next_message(&mut stream).await.kind {
        Some(Kind::Transport(delta)) => {
            assert_eq!(delta.flags, Some(1));
            match delta.kind {
                Some(transport::Kind::TransportAll(all)) => {
                    assert_eq!(all.tempo.unwrap().value, 120.0);
                    assert_eq!(all.position.unwrap().beats, 0);
                }
                other => panic!("expected transport_all, got {other:?}"),
            }
        }
        other => panic!("expected a transport event, got {other:?}"),
    }

    // Only the position moves on the next block: a minimal delta without flags
    let record = transport_record(1, 480, 120.0);
    unsafe { process_block(plugin, &no_events, Some(&record)) };
    match next_message(&mut stream).await.kind {
        Some(Kind::Transport(delta)) => {
            assert_eq!(delta.flags, None);
            match delta.kind {
                Some(transport::Kind::Position(position)) => {
                    assert_eq!(position.beats, 480);
                    assert_eq!(position.seconds, 0);
                }
                other => panic!("expected a position delta, got {other:?}"),
            }
        }
        other => panic!("expected a transport event, got {other:?}"),
    }

    // -- fan-out to a second client --

    let (control_tx2, mut stream2) = open_session(&mut client, Some(instance_id))
        .await
        .expect("second session opens");

    unsafe { ((*plugin).reset.unwrap())(plugin) };
    assert_eq!(
        lifecycle(&next_message(&mut stream).await),
        Some(PluginLifecycleEvent::Reset)
    );
    assert_eq!(
        lifecycle(&next_message(&mut stream2).await),
        Some(PluginLifecycleEvent::Reset)
    );

    // -- control events flow back into the host --

    control_tx
        .send(ClientEventMessage {
            event: ClientEvent::RequestRestart as i32,
        })
        .await
        .unwrap();
    wait_until("the restart request reaches the host", || {
        RESTART_REQUESTS.load(Ordering::SeqCst) == 1
    })
    .await;

    control_tx2
        .send(ClientEventMessage {
            event: ClientEvent::RequestProcess as i32,
        })
        .await
        .unwrap();
    wait_until("the process request reaches the host", || {
        PROCESS_REQUESTS.load(Ordering::SeqCst) == 1
    })
    .await;

    // -- unknown instances are refused --

    let status = open_session(&mut client, Some(instance_id.wrapping_add(1)))
        .await
        .expect_err("unknown instance ids are refused");
    assert_eq!(status.code(), Code::Unauthenticated);

    // -- destroy cancels every session and clears the table --

    unsafe { ((*plugin).destroy.unwrap())(plugin) };
    expect_cancelled(&mut stream).await;
    expect_cancelled(&mut stream2).await;

    assert!(Instances::is_empty());
    wait_until("the last disconnect stops the worker", || {
        !queue_worker().is_running()
    })
    .await;

    let instances = client
        .get_plugin_instances(Empty {})
        .await
        .unwrap()
        .into_inner()
        .instances;
    assert!(instances.is_empty());

    let status = open_session(&mut client, Some(instance_id))
        .await
        .expect_err("destroyed instances are gone");
    assert_eq!(status.code(), Code::Unauthenticated);

    unsafe { (clap_entry.deinit.unwrap())() };
}
