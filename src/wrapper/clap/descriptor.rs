use clap_sys::plugin::clap_plugin_descriptor;
use clap_sys::version::CLAP_VERSION;
use std::ffi::{CStr, CString};
use std::mem::MaybeUninit;
use std::os::raw::c_char;
use std::ptr;

use crate::descriptor::Descriptor;

/// The host ABI view of a [`Descriptor`]: owned `CString` copies of every field plus an in-place
/// `clap_plugin_descriptor` pointing at them, so handing the host a descriptor costs nothing per
/// query.
///
/// This cannot be cloned as [`Self::features_ptrs`] contains pointers into [`Self::features`].
/// The registry stores one of these per plugin kind behind a stable (leaked) allocation; the
/// pointers handed to the host stay valid for the process lifetime.
pub struct ClapDescriptor {
    id: CString,
    name: CString,
    vendor: CString,
    url: CString,
    manual_url: CString,
    support_url: CString,
    version: CString,
    description: CString,
    features: Vec<CString>,
    features_ptrs: MaybeUninit<Vec<*const c_char>>,

    /// Built after the `CString` fields above, since it points into them.
    descriptor: MaybeUninit<clap_plugin_descriptor>,
}

unsafe impl Send for ClapDescriptor {}
unsafe impl Sync for ClapDescriptor {}

impl ClapDescriptor {
    pub fn new(source: &Descriptor) -> Self {
        let cstring = |s: &str, field: &str| {
            CString::new(s).unwrap_or_else(|_| panic!("`{field}` contained null bytes"))
        };

        let mut descriptor = Self {
            id: cstring(source.id(), "id"),
            name: cstring(source.name(), "name"),
            vendor: cstring(source.vendor(), "vendor"),
            url: cstring(source.url().unwrap_or(""), "url"),
            manual_url: cstring(source.manual_url().unwrap_or(""), "manual_url"),
            support_url: cstring(source.support_url().unwrap_or(""), "support_url"),
            version: cstring(source.version(), "version"),
            description: cstring(source.description().unwrap_or(""), "description"),
            features: source
                .features()
                .iter()
                .map(|feature| cstring(feature, "features"))
                .collect(),
            features_ptrs: MaybeUninit::uninit(),
            descriptor: MaybeUninit::uninit(),
        };

        // The feature list is an environ-like list of char pointers terminated by a null pointer
        let mut features_ptrs: Vec<*const c_char> = descriptor
            .features
            .iter()
            .map(|feature| feature.as_ptr())
            .collect();
        features_ptrs.push(ptr::null());
        descriptor.features_ptrs.write(features_ptrs);

        // We couldn't initialize this directly because of all the CStrings
        descriptor.descriptor.write(clap_plugin_descriptor {
            clap_version: CLAP_VERSION,
            id: descriptor.id.as_ptr(),
            name: descriptor.name.as_ptr(),
            vendor: descriptor.vendor.as_ptr(),
            url: descriptor.url.as_ptr(),
            manual_url: descriptor.manual_url.as_ptr(),
            support_url: descriptor.support_url.as_ptr(),
            version: descriptor.version.as_ptr(),
            description: descriptor.description.as_ptr(),
            features: unsafe { descriptor.features_ptrs.assume_init_ref() }.as_ptr(),
        });

        descriptor
    }

    pub fn as_raw(&self) -> &clap_plugin_descriptor {
        unsafe { self.descriptor.assume_init_ref() }
    }

    pub fn id(&self) -> &CStr {
        self.id.as_c_str()
    }
}
