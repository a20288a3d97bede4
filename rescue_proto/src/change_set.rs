use std::collections::{btree_map::Entry, BTreeMap, BTreeSet};

use crate::codec::{string_bytes_length, write_i32, write_string, write_u32, ByteReader, ProtoError};
use crate::entity::{Entity, EntityId};
use crate::property::Property;
use crate::registry::Registry;

/// The property changes recorded for one entity.
#[derive(Debug, Clone, PartialEq)]
struct EntityChanges {
    urn: String,
    properties: BTreeMap<String, Property>,
}

/// The unit of world mutation exchanged every round: the properties that
/// changed per entity plus the set of deleted entities.
///
/// Deletion wins over change: recording a deletion drops any pending changes
/// for that entity, and changes recorded or merged for an already-deleted
/// entity are ignored. Merging applies per-key property overwrite and
/// deletion set union; merge order is significant when two sources write the
/// same property (last writer wins).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    changes: BTreeMap<EntityId, EntityChanges>,
    deleted: BTreeSet<EntityId>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.deleted.is_empty()
    }

    /// Record a changed property for an entity.
    pub fn record_change(&mut self, id: EntityId, entity_urn: &str, property: Property) {
        if self.deleted.contains(&id) {
            return;
        }
        match self.changes.entry(id) {
            Entry::Vacant(slot) => {
                let mut properties = BTreeMap::new();
                properties.insert(property.urn().to_string(), property);
                slot.insert(EntityChanges {
                    urn: entity_urn.to_string(),
                    properties,
                });
            }
            Entry::Occupied(mut slot) => {
                let changes = slot.get_mut();
                changes.urn = entity_urn.to_string();
                changes
                    .properties
                    .insert(property.urn().to_string(), property);
            }
        }
    }

    /// Convenience for recording a property straight off an entity.
    pub fn record_entity_change(&mut self, entity: &Entity, property: Property) {
        self.record_change(entity.id(), entity.urn(), property);
    }

    /// Record an entity deletion, discarding any changes recorded for it.
    pub fn record_deletion(&mut self, id: EntityId) {
        self.deleted.insert(id);
        self.changes.remove(&id);
    }

    /// Merge another change-set into this one. Idempotent for self-merge;
    /// merging an empty set is a no-op.
    pub fn merge(&mut self, other: &ChangeSet) {
        for (id, changes) in &other.changes {
            for property in changes.properties.values() {
                self.record_change(*id, &changes.urn, property.clone());
            }
        }
        for id in &other.deleted {
            self.record_deletion(*id);
        }
    }

    pub fn changed_entity_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.changes.keys().copied()
    }

    pub fn deleted_entity_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.deleted.iter().copied()
    }

    pub fn is_deleted(&self, id: EntityId) -> bool {
        self.deleted.contains(&id)
    }

    pub fn entity_urn(&self, id: EntityId) -> Option<&str> {
        self.changes.get(&id).map(|changes| changes.urn.as_str())
    }

    pub fn properties_for(&self, id: EntityId) -> impl Iterator<Item = &Property> {
        self.changes
            .get(&id)
            .into_iter()
            .flat_map(|changes| changes.properties.values())
    }

    pub fn changed_entity_count(&self) -> usize {
        self.changes.len()
    }

    pub fn deleted_entity_count(&self) -> usize {
        self.deleted.len()
    }

    pub fn bytes_length(&self) -> usize {
        let mut total = 4;
        for changes in self.changes.values() {
            total += 4;
            total += string_bytes_length(&changes.urn);
            total += 4;
            for property in changes.properties.values() {
                total += property.bytes_length();
            }
        }
        total += 4;
        total += 4 * self.deleted.len();
        total
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        write_i32(self.changes.len() as i32, out);
        for (id, changes) in &self.changes {
            write_u32(id.0, out);
            write_string(&changes.urn, out);
            write_i32(changes.properties.len() as i32, out);
            for property in changes.properties.values() {
                property.write_to(out);
            }
        }
        write_i32(self.deleted.len() as i32, out);
        for id in &self.deleted {
            write_u32(id.0, out);
        }
    }

    /// Decode a change-set. Any decoding failure is returned as an error
    /// rather than a truncated subset of the changes.
    pub fn read_from(reader: &mut ByteReader<'_>, registry: &Registry) -> Result<Self, ProtoError> {
        let mut result = ChangeSet::new();
        let entity_count = reader.read_len()?;
        for _ in 0..entity_count {
            let id = EntityId(reader.read_u32()?);
            let urn = reader.read_string()?;
            let property_count = reader.read_len()?;
            for _ in 0..property_count {
                let property = Property::read_from(reader, registry)?;
                result.record_change(id, &urn, property);
            }
        }
        let deleted_count = reader.read_len()?;
        for _ in 0..deleted_count {
            result.record_deletion(EntityId(reader.read_u32()?));
        }
        Ok(result)
    }
}
