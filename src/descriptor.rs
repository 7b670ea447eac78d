//! Plugin kind identity. A [`Descriptor`] owns the strings a plugin advertises to the host and to
//! remote clients; the zero-copy ABI view lives in
//! [`wrapper::clap`][crate::wrapper::clap] and is built once per registered kind.

use clap_sys::plugin::clap_plugin_descriptor;
use std::ffi::CStr;

/// The immutable identity record of a plugin kind: a unique reverse-domain id, display metadata,
/// and an ordered list of feature tags.
///
/// Descriptors are built fluently and then stored for the lifetime of the registry, typically in
/// a `lazy_static`:
///
/// ```
/// # use clap_remote::descriptor::Descriptor;
/// let descriptor = Descriptor::new("dev.example.gain", "Gain", "Example Audio", "0.1.0")
///     .with_url("https://example.dev/gain")
///     .with_description("A gain plugin")
///     .with_features(["audio-effect", "utility"]);
/// assert_eq!(descriptor.id(), "dev.example.gain");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Descriptor {
    id: String,
    name: String,
    vendor: String,
    version: String,
    url: Option<String>,
    manual_url: Option<String>,
    support_url: Option<String>,
    description: Option<String>,
    features: Vec<String>,
}

impl Descriptor {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        vendor: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            vendor: vendor.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    /// Copy a descriptor back out of its host ABI representation.
    ///
    /// # Safety
    ///
    /// All non-null pointers in `raw` must point to valid null-terminated strings, and `features`
    /// (when non-null) must be a null-terminated array of such strings.
    pub unsafe fn from_raw(raw: &clap_plugin_descriptor) -> Self {
        let string_of = |ptr: *const std::os::raw::c_char| -> String {
            if ptr.is_null() {
                String::new()
            } else {
                CStr::from_ptr(ptr).to_string_lossy().into_owned()
            }
        };
        let optional = |ptr: *const std::os::raw::c_char| -> Option<String> {
            let s = string_of(ptr);
            if s.is_empty() {
                None
            } else {
                Some(s)
            }
        };

        let mut features = Vec::new();
        if !raw.features.is_null() {
            let mut entry = raw.features;
            while !(*entry).is_null() {
                features.push(string_of(*entry));
                entry = entry.add(1);
            }
        }

        Self {
            id: string_of(raw.id),
            name: string_of(raw.name),
            vendor: string_of(raw.vendor),
            version: string_of(raw.version),
            url: optional(raw.url),
            manual_url: optional(raw.manual_url),
            support_url: optional(raw.support_url),
            description: optional(raw.description),
            features,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = vendor.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_manual_url(mut self, manual_url: impl Into<String>) -> Self {
        self.manual_url = Some(manual_url.into());
        self
    }

    pub fn with_support_url(mut self, support_url: impl Into<String>) -> Self {
        self.support_url = Some(support_url.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Append a single feature tag. Order is preserved and meaningful for equality.
    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.features.push(feature.into());
        self
    }

    pub fn with_features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.features.extend(features.into_iter().map(Into::into));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn manual_url(&self) -> Option<&str> {
        self.manual_url.as_deref()
    }

    pub fn support_url(&self) -> Option<&str> {
        self.support_url.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wrapper::clap::ClapDescriptor;

    fn example() -> Descriptor {
        Descriptor::new("dev.example.test", "Test Plugin", "Example Audio", "1.2.3")
            .with_url("https://example.dev")
            .with_manual_url("https://example.dev/manual")
            .with_support_url("https://example.dev/support")
            .with_description("An example")
            .with_features(["instrument", "synthesizer"])
    }

    #[test]
    fn builders_compose() {
        let descriptor = example();
        assert_eq!(descriptor.id(), "dev.example.test");
        assert_eq!(descriptor.name(), "Test Plugin");
        assert_eq!(descriptor.vendor(), "Example Audio");
        assert_eq!(descriptor.version(), "1.2.3");
        assert_eq!(descriptor.url(), Some("https://example.dev"));
        assert_eq!(descriptor.description(), Some("An example"));
        assert_eq!(descriptor.features(), ["instrument", "synthesizer"]);
    }

    #[test]
    fn equality_covers_features_in_order() {
        let a = example();
        let b = example();
        assert_eq!(a, b);

        let reordered = Descriptor::new("dev.example.test", "Test Plugin", "Example Audio", "1.2.3")
            .with_url("https://example.dev")
            .with_manual_url("https://example.dev/manual")
            .with_support_url("https://example.dev/support")
            .with_description("An example")
            .with_features(["synthesizer", "instrument"]);
        assert_ne!(a, reordered);

        let different_version = b.clone().with_version("1.2.4");
        assert_ne!(a, different_version);
    }

    #[test]
    fn abi_view_round_trips() {
        let descriptor = example();
        let view = ClapDescriptor::new(&descriptor);
        let round_tripped = unsafe { Descriptor::from_raw(view.as_raw()) };
        assert_eq!(descriptor, round_tripped);
    }

    #[test]
    fn abi_view_round_trips_without_optional_fields() {
        let descriptor = Descriptor::new("dev.example.bare", "Bare", "Example Audio", "0.0.1");
        let view = ClapDescriptor::new(&descriptor);
        let round_tripped = unsafe { Descriptor::from_raw(view.as_raw()) };
        assert_eq!(descriptor, round_tripped);
    }
}
