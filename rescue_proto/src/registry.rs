use std::collections::BTreeMap;

use crate::property::PropertyKind;

/// Maps property URNs to their value kinds.
///
/// Built once at startup by the embedder and shared with every connection;
/// decoding a property whose URN is not registered fails with
/// `ProtoError::UnknownPropertyUrn`, which callers treat as a protocol
/// desynchronization on that connection.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    properties: BTreeMap<String, PropertyKind>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_property(&mut self, urn: impl Into<String>, kind: PropertyKind) {
        self.properties.insert(urn.into(), kind);
    }

    pub fn property_kind(&self, urn: &str) -> Option<PropertyKind> {
        self.properties.get(urn).copied()
    }

    pub fn property_urns(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }
}
