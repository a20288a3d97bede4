use std::collections::BTreeMap;

use tracing::warn;

use rescue_proto::{ChangeSet, Entity, EntityId};

/// The authoritative superset of all entities and their current property
/// values. Mutated exclusively by merging change-sets; everything else reads
/// a consistent snapshot under the kernel's round lock.
#[derive(Debug, Default)]
pub struct WorldModel {
    entities: BTreeMap<EntityId, Entity>,
}

impl WorldModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entity(&mut self, entity: Entity) {
        self.entities.insert(entity.id(), entity);
    }

    pub fn remove_entity(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(&id)
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Apply a change-set: changed properties are taken over existing values
    /// (entities absent from the model are created from the change-set's
    /// entity URN), then deletions are applied, so a deletion always wins
    /// over a change to the same entity.
    ///
    /// A property whose kind disagrees with the model is skipped with a
    /// warning rather than aborting the merge; a misbehaving contributor
    /// degrades its own changes, not the round.
    pub fn merge(&mut self, changes: &ChangeSet) {
        for id in changes.changed_entity_ids() {
            let Some(urn) = changes.entity_urn(id) else {
                continue;
            };
            let entity = self
                .entities
                .entry(id)
                .or_insert_with(|| Entity::new(id, urn));
            for property in changes.properties_for(id) {
                match entity.property_mut(property.urn()) {
                    Some(existing) => {
                        if let Err(err) = existing.take_value(property) {
                            warn!(
                                target: "rescue_kernel::world",
                                entity = %id,
                                property = property.urn(),
                                %err,
                                "skipping property with mismatched kind"
                            );
                        }
                    }
                    None => entity.add_property(property.clone()),
                }
            }
        }
        for id in changes.deleted_entity_ids() {
            self.entities.remove(&id);
        }
    }

    /// Deterministic FNV-1a digest over the encoded entity list, used for
    /// round audit logging.
    pub fn digest(&self) -> u64 {
        let mut encoded = Vec::new();
        for entity in self.entities.values() {
            entity.write_to(&mut encoded);
        }
        fnv1a(&encoded)
    }
}

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut state = FNV_OFFSET_BASIS;
    for &byte in bytes {
        state ^= byte as u64;
        state = state.wrapping_mul(FNV_PRIME);
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use rescue_proto::{Property, PropertyValue};

    const CIVILIAN: &str = "urn:test:entity:civilian";
    const HP: &str = "urn:test:property:hp";

    #[test]
    fn merge_creates_and_updates_entities() {
        let mut world = WorldModel::new();

        let mut changes = ChangeSet::new();
        changes.record_change(
            EntityId(1),
            CIVILIAN,
            Property::new(HP, PropertyValue::Int(100)),
        );
        world.merge(&changes);
        assert_eq!(world.len(), 1);

        let mut update = ChangeSet::new();
        update.record_change(
            EntityId(1),
            CIVILIAN,
            Property::new(HP, PropertyValue::Int(97)),
        );
        world.merge(&update);
        let hp = world.entity(EntityId(1)).unwrap().property(HP).unwrap();
        assert_eq!(hp.value(), Some(&PropertyValue::Int(97)));
    }

    #[test]
    fn deletion_wins_over_stale_changes() {
        let mut world = WorldModel::new();
        let mut entity = Entity::new(EntityId(5), CIVILIAN);
        entity.add_property(Property::new(HP, PropertyValue::Int(10)));
        world.add_entity(entity);

        // One contributor changes the entity, a later one deletes it; the
        // merged set must not re-materialise it in a fresh model either.
        let mut changed = ChangeSet::new();
        changed.record_change(
            EntityId(5),
            CIVILIAN,
            Property::new(HP, PropertyValue::Int(1)),
        );
        let mut deleted = ChangeSet::new();
        deleted.record_deletion(EntityId(5));
        changed.merge(&deleted);

        world.merge(&changed);
        assert!(world.entity(EntityId(5)).is_none());

        let mut fresh = WorldModel::new();
        fresh.merge(&changed);
        assert!(fresh.is_empty());
    }

    #[test]
    fn digest_is_stable_and_change_sensitive() {
        let mut world = WorldModel::new();
        let mut changes = ChangeSet::new();
        changes.record_change(
            EntityId(1),
            CIVILIAN,
            Property::new(HP, PropertyValue::Int(100)),
        );
        world.merge(&changes);
        let before = world.digest();
        assert_eq!(before, world.digest());

        let mut update = ChangeSet::new();
        update.record_change(
            EntityId(1),
            CIVILIAN,
            Property::new(HP, PropertyValue::Int(99)),
        );
        world.merge(&update);
        assert_ne!(before, world.digest());
    }
}
