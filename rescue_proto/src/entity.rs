use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::codec::{string_bytes_length, write_i32, write_string, write_u32, ByteReader, ProtoError};
use crate::property::Property;
use crate::registry::Registry;

/// Identifier for a simulated entity. Never reused within a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out monotonically increasing entity ids.
#[derive(Debug, Default)]
pub struct EntityIdGenerator {
    next: AtomicU32,
}

impl EntityIdGenerator {
    pub fn starting_at(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
        }
    }

    pub fn next_id(&self) -> EntityId {
        EntityId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// A uniquely identified simulated object: an immutable id, a type URN and a
/// set of typed properties keyed by property URN.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    id: EntityId,
    urn: String,
    properties: BTreeMap<String, Property>,
}

impl Entity {
    pub fn new(id: EntityId, urn: impl Into<String>) -> Self {
        Self {
            id,
            urn: urn.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn urn(&self) -> &str {
        &self.urn
    }

    pub fn add_property(&mut self, property: Property) {
        self.properties.insert(property.urn().to_string(), property);
    }

    pub fn property(&self, urn: &str) -> Option<&Property> {
        self.properties.get(urn)
    }

    pub fn property_mut(&mut self, urn: &str) -> Option<&mut Property> {
        self.properties.get_mut(urn)
    }

    pub fn properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.values()
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    fn content_length(&self) -> usize {
        4 + self
            .properties
            .values()
            .map(Property::bytes_length)
            .sum::<usize>()
    }

    /// Total encoded size: URN, id, content-size prefix and content.
    pub fn bytes_length(&self) -> usize {
        string_bytes_length(&self.urn) + 4 + 4 + self.content_length()
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        write_string(&self.urn, out);
        write_u32(self.id.0, out);
        write_i32(self.content_length() as i32, out);
        write_i32(self.properties.len() as i32, out);
        for property in self.properties.values() {
            property.write_to(out);
        }
    }

    pub fn read_from(reader: &mut ByteReader<'_>, registry: &Registry) -> Result<Self, ProtoError> {
        let urn = reader.read_string()?;
        let id = EntityId(reader.read_u32()?);
        let declared = reader.read_len()?;
        let start = reader.position();
        let count = reader.read_len()?;
        let mut entity = Entity::new(id, urn);
        for _ in 0..count {
            entity.add_property(Property::read_from(reader, registry)?);
        }
        let consumed = reader.position() - start;
        if consumed != declared {
            return Err(ProtoError::LengthMismatch { declared, consumed });
        }
        Ok(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{PropertyKind, PropertyValue};

    fn test_registry() -> Registry {
        let mut registry = Registry::new();
        registry.register_property("urn:test:property:hp", PropertyKind::Int);
        registry.register_property("urn:test:property:name", PropertyKind::Str);
        registry
    }

    #[test]
    fn entity_round_trips_with_mixed_definedness() {
        let registry = test_registry();
        let mut entity = Entity::new(EntityId(9), "urn:test:entity:civilian");
        entity.add_property(Property::new(
            "urn:test:property:hp",
            PropertyValue::Int(100),
        ));
        entity.add_property(Property::undefined("urn:test:property:name"));

        let mut out = Vec::new();
        entity.write_to(&mut out);
        assert_eq!(out.len(), entity.bytes_length());

        let mut reader = ByteReader::new(&out);
        let decoded = Entity::read_from(&mut reader, &registry).unwrap();
        assert_eq!(decoded, entity);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn id_generator_never_reuses() {
        let generator = EntityIdGenerator::starting_at(5);
        assert_eq!(generator.next_id(), EntityId(5));
        assert_eq!(generator.next_id(), EntityId(6));
        assert_eq!(generator.next_id(), EntityId(7));
    }
}
