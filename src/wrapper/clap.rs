pub(crate) mod util;

mod descriptor;
mod plugin;
mod shared;

// Re-exported for the macro and the rest of the crate
pub use self::descriptor::ClapDescriptor;
pub use self::plugin::CorePlugin;
pub(crate) use self::shared::InstanceShared;
pub use clap_sys::entry::clap_plugin_entry;
pub use clap_sys::factory::plugin_factory::{clap_plugin_factory, CLAP_PLUGIN_FACTORY_ID};
pub use clap_sys::host::clap_host;
pub use clap_sys::plugin::{clap_plugin, clap_plugin_descriptor};
pub use clap_sys::version::CLAP_VERSION;

/// Export the CLAP entry point for one or more plugin kinds from this library.
///
/// The generated `init` registers every listed kind with the
/// [`Registry`][crate::registry::Registry] and the factory hooks delegate straight to it, so
/// beyond this macro invocation no generated code is involved.
///
/// ```ignore
/// clap_remote::export_clap_entry!(MyInstrument, MyOtherInstrument);
/// ```
#[macro_export]
macro_rules! export_clap_entry {
    ($($plugin_ty:ty),+ $(,)?) => {
        #[doc(hidden)]
        mod _clap_entry {
            use $crate::registry::Registry;
            use $crate::wrapper::clap::{
                clap_host, clap_plugin, clap_plugin_descriptor, clap_plugin_factory,
                CLAP_PLUGIN_FACTORY_ID,
            };
            use $crate::wrapper::setup_logger;
            use ::std::ffi::{c_void, CStr};
            use ::std::os::raw::c_char;

            // Because the `$plugin_ty`s are likely defined in the enclosing scope. This works
            // even if the types are not public because this is a child module.
            use super::*;

            const PLUGIN_FACTORY: clap_plugin_factory = clap_plugin_factory {
                get_plugin_count: Some(get_plugin_count),
                get_plugin_descriptor: Some(get_plugin_descriptor),
                create_plugin: Some(create_plugin),
            };

            unsafe extern "C" fn get_plugin_count(_factory: *const clap_plugin_factory) -> u32 {
                Registry::entry_size()
            }

            unsafe extern "C" fn get_plugin_descriptor(
                _factory: *const clap_plugin_factory,
                index: u32,
            ) -> *const clap_plugin_descriptor {
                match Registry::descriptor_at(index) {
                    Some(descriptor) => descriptor,
                    None => ::std::ptr::null(),
                }
            }

            unsafe extern "C" fn create_plugin(
                _factory: *const clap_plugin_factory,
                host: *const clap_host,
                plugin_id: *const c_char,
            ) -> *const clap_plugin {
                if plugin_id.is_null() {
                    return ::std::ptr::null();
                }

                Registry::create(host, CStr::from_ptr(plugin_id))
            }

            pub extern "C" fn init(plugin_path: *const c_char) -> bool {
                setup_logger();

                $(Registry::register::<$plugin_ty>();)+

                let path = if plugin_path.is_null() {
                    ""
                } else {
                    match unsafe { CStr::from_ptr(plugin_path) }.to_str() {
                        Ok(path) => path,
                        Err(_) => return false,
                    }
                };

                Registry::init(path)
            }

            pub extern "C" fn deinit() {
                Registry::deinit();
            }

            pub extern "C" fn get_factory(factory_id: *const c_char) -> *const c_void {
                if !factory_id.is_null()
                    && unsafe { CStr::from_ptr(factory_id) } == CLAP_PLUGIN_FACTORY_ID
                {
                    &PLUGIN_FACTORY as *const _ as *const c_void
                } else {
                    ::std::ptr::null()
                }
            }
        }

        /// The CLAP plugin's entry point.
        #[no_mangle]
        #[used]
        #[allow(non_upper_case_globals)]
        pub static clap_entry: $crate::wrapper::clap::clap_plugin_entry =
            $crate::wrapper::clap::clap_plugin_entry {
                clap_version: $crate::wrapper::clap::CLAP_VERSION,
                init: Some(self::_clap_entry::init),
                deinit: Some(self::_clap_entry::deinit),
                get_factory: Some(self::_clap_entry::get_factory),
            };
    };
}
