//! The process-wide table of plugin kinds and live instances. The exported entry point is a thin
//! shim over this module: registration happens when the host calls the entry's `init`, instance
//! creation goes through [`Registry::create`], and everything the RPC side knows about live
//! plugins it learns from [`Instances`].

use clap_sys::host::clap_host;
use clap_sys::plugin::{clap_plugin, clap_plugin_descriptor};
use lazy_static::lazy_static;
use parking_lot::Mutex;
use std::ffi::CStr;
use std::sync::Arc;

use crate::descriptor::Descriptor;
use crate::plugin::Plugin;
use crate::wrapper::clap::{ClapDescriptor, CorePlugin, InstanceShared};

/// One registered plugin kind: its identity plus the factory that turns a host handle into a live
/// instance in the table.
struct PluginEntry {
    descriptor: &'static Descriptor,
    /// The ABI view handed to the host. Lives as long as the entry, which is leaked.
    view: ClapDescriptor,
    create: fn(*const clap_host) -> *const clap_plugin,
}

struct InstanceEntry {
    kind_id: &'static str,
    plugin: Box<CorePlugin>,
}

lazy_static! {
    /// Entries are leaked so the descriptor pointers handed to the host stay stable no matter
    /// what the vector does afterwards. Kinds live for the process lifetime anyway.
    static ref PLUGIN_ENTRIES: Mutex<Vec<&'static PluginEntry>> = Mutex::new(Vec::new());
    static ref CLAP_PATH: Mutex<Option<String>> = Mutex::new(None);
    static ref PLUGIN_INSTANCES: Mutex<Vec<InstanceEntry>> = Mutex::new(Vec::new());
}

/// The process-wide plugin kind registry.
pub struct Registry;

impl Registry {
    /// Register the plugin kind `P`. Called for every exported kind from the entry's `init`, and
    /// idempotent so a host that cycles `init`/`deinit` doesn't accumulate duplicates.
    /// Registering two different kinds under the same id is a misuse of the library and trips a
    /// debug assertion; the second kind is ignored.
    pub fn register<P: Plugin>() {
        let descriptor = P::descriptor();
        let mut entries = PLUGIN_ENTRIES.lock();

        if let Some(existing) = entries
            .iter()
            .find(|entry| entry.descriptor.id() == descriptor.id())
        {
            remote_debug_assert!(
                std::ptr::eq(existing.descriptor, descriptor),
                "Two plugin kinds registered under the id '{}'",
                descriptor.id()
            );
            return;
        }

        entries.push(Box::leak(Box::new(PluginEntry {
            descriptor,
            view: ClapDescriptor::new(descriptor),
            create: CorePlugin::create::<P>,
        })));
    }

    /// Record the host's plugin search path. Fails when no plugin kinds are registered, which
    /// tells the host this library has nothing to offer.
    pub fn init(path: &str) -> bool {
        if Self::entry_size() == 0 {
            return false;
        }

        remote_log!("Registry initialized with plugin path '{path}'");
        *CLAP_PATH.lock() = Some(path.to_owned());
        true
    }

    pub fn deinit() {
        remote_debug_assert!(
            Instances::is_empty(),
            "Registry deinitialized while instances are still alive"
        );
        *CLAP_PATH.lock() = None;
    }

    /// The plugin search path recorded at `init`.
    pub fn clap_path() -> Option<String> {
        CLAP_PATH.lock().clone()
    }

    pub fn entry_size() -> u32 {
        PLUGIN_ENTRIES.lock().len() as u32
    }

    pub fn find_descriptor(id: &str) -> Option<&'static Descriptor> {
        PLUGIN_ENTRIES
            .lock()
            .iter()
            .find(|entry| entry.descriptor.id() == id)
            .map(|&entry| entry.descriptor)
    }

    /// The ABI descriptor at `index`, for the factory's enumeration hook. The returned reference
    /// points into a leaked entry, hence the `'static` lifetime.
    pub fn descriptor_at(index: u32) -> Option<&'static clap_plugin_descriptor> {
        PLUGIN_ENTRIES
            .lock()
            .get(index as usize)
            .map(|&entry| entry.view.as_raw())
    }

    /// The ABI descriptor of the kind with the given id, used when building instances.
    pub(crate) fn raw_descriptor(id: &str) -> Option<&'static clap_plugin_descriptor> {
        PLUGIN_ENTRIES
            .lock()
            .iter()
            .find(|entry| entry.descriptor.id() == id)
            .map(|&entry| entry.view.as_raw())
    }

    /// The registry's own copy of the kind id, with the `'static` lifetime instance bookkeeping
    /// wants.
    pub(crate) fn kind_id(id: &str) -> Option<&'static str> {
        PLUGIN_ENTRIES
            .lock()
            .iter()
            .find(|entry| entry.descriptor.id() == id)
            .map(|&entry| entry.descriptor.id())
    }

    /// Instantiate the kind with the given id. This is the factory's `create_plugin` hook; the
    /// new instance is owned by the table and the returned pointer is the host's handle to it.
    pub fn create(host: *const clap_host, id: &CStr) -> *const clap_plugin {
        let Ok(id) = id.to_str() else {
            return std::ptr::null();
        };

        let create = PLUGIN_ENTRIES
            .lock()
            .iter()
            .find(|entry| entry.descriptor.id() == id)
            .map(|entry| entry.create);

        match create {
            Some(create) => create(host),
            None => std::ptr::null(),
        }
    }
}

/// The process-wide table of live plugin instances, keyed by kind id with duplicates allowed.
pub struct Instances;

impl Instances {
    /// Take ownership of a new instance. Returns the host's `clap_plugin` handle into it.
    pub(crate) fn emplace(kind_id: &'static str, plugin: Box<CorePlugin>) -> *const clap_plugin {
        // The vtable lives at a stable heap address; moving the box around does not move it
        let handle = &plugin.clap_plugin as *const clap_plugin;
        PLUGIN_INSTANCES
            .lock()
            .push(InstanceEntry { kind_id, plugin });
        handle
    }

    /// Remove and drop the given instance. Returns whether a matching instance was found.
    pub(crate) fn destroy(kind_id: &str, instance: *const CorePlugin) -> bool {
        let mut instances = PLUGIN_INSTANCES.lock();
        let position = instances.iter().position(|entry| {
            entry.kind_id == kind_id && std::ptr::eq(&*entry.plugin, instance)
        });

        match position {
            Some(position) => {
                instances.remove(position);
                true
            }
            None => false,
        }
    }

    /// Resolve an instance id to the instance's shared state. Linear scan; session opens are not
    /// a hot path.
    pub(crate) fn shared(instance_id: u64) -> Option<Arc<InstanceShared>> {
        PLUGIN_INSTANCES
            .lock()
            .iter()
            .find(|entry| entry.plugin.instance_id() == instance_id)
            .map(|entry| Arc::clone(entry.plugin.shared()))
    }

    /// Whether an instance with this id is currently alive.
    pub fn contains(instance_id: u64) -> bool {
        PLUGIN_INSTANCES
            .lock()
            .iter()
            .any(|entry| entry.plugin.instance_id() == instance_id)
    }

    /// Every live instance's shared state, for the worker's drain loop.
    pub(crate) fn all_shared() -> Vec<Arc<InstanceShared>> {
        PLUGIN_INSTANCES
            .lock()
            .iter()
            .map(|entry| Arc::clone(entry.plugin.shared()))
            .collect()
    }

    /// `(kind id, instance id)` of every live instance.
    pub fn snapshot() -> Vec<(&'static str, u64)> {
        PLUGIN_INSTANCES
            .lock()
            .iter()
            .map(|entry| (entry.kind_id, entry.plugin.instance_id()))
            .collect()
    }

    pub fn len() -> usize {
        PLUGIN_INSTANCES.lock().len()
    }

    pub fn is_empty() -> bool {
        PLUGIN_INSTANCES.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lazy_static::lazy_static;

    // The registry is process-wide state shared by every test in this binary, so these tests use
    // kind ids nothing else claims and avoid asserting on totals.

    #[derive(Default)]
    struct KindA;

    #[derive(Default)]
    struct KindB;

    lazy_static! {
        static ref KIND_A: Descriptor = Descriptor::new(
            "dev.example.registry-kind-a",
            "Kind A",
            "Example Audio",
            "0.1.0"
        )
        .with_feature("utility");
        static ref KIND_B: Descriptor = Descriptor::new(
            "dev.example.registry-kind-b",
            "Kind B",
            "Example Audio",
            "0.1.0"
        );
    }

    impl Plugin for KindA {
        fn descriptor() -> &'static Descriptor {
            &KIND_A
        }
    }

    impl Plugin for KindB {
        fn descriptor() -> &'static Descriptor {
            &KIND_B
        }
    }

    #[test]
    fn registration_is_idempotent_and_searchable() {
        Registry::register::<KindA>();
        Registry::register::<KindA>();
        Registry::register::<KindB>();

        let found = Registry::find_descriptor("dev.example.registry-kind-a")
            .expect("kind A is registered");
        assert_eq!(found.name(), "Kind A");
        assert!(Registry::find_descriptor("dev.example.registry-missing").is_none());

        // Enumerating by index yields each registered kind exactly once, round-trippable
        // through the ABI view
        let mut seen_a = 0;
        let mut seen_b = 0;
        for index in 0..Registry::entry_size() {
            let raw = Registry::descriptor_at(index).expect("index within entry_size");
            let descriptor = unsafe { Descriptor::from_raw(raw) };
            match descriptor.id() {
                "dev.example.registry-kind-a" => {
                    seen_a += 1;
                    assert_eq!(descriptor, *KindA::descriptor());
                }
                "dev.example.registry-kind-b" => seen_b += 1,
                _ => {}
            }
        }
        assert_eq!((seen_a, seen_b), (1, 1));
        assert!(Registry::descriptor_at(Registry::entry_size()).is_none());
    }

    #[test]
    fn init_records_the_search_path() {
        Registry::register::<KindA>();
        assert!(Registry::init("/opt/clap"));
        assert_eq!(Registry::clap_path().as_deref(), Some("/opt/clap"));
    }

    #[test]
    fn unknown_instances_resolve_to_nothing() {
        assert!(Instances::shared(0xdead_beef).is_none());
        assert!(!Instances::contains(0xdead_beef));
    }
}
