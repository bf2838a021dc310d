use std::any::TypeId;
use std::collections::HashMap;

use tracing::{debug, trace};

use crate::archetype::{Archetype, RowTaker, RowWriter};
use crate::component::{Bundle, Component, TypeInfo};
use crate::entity::{Entity, EntityAllocator, Location, ReserveEntitiesIterator};
use crate::entity_ref::{EntityRef, Ref, RefMut};
use crate::error::{ComponentError, NoSuchEntity};
use crate::query::{QueryBorrow, QueryMut, WorldQuery};
use crate::type_map::TypeIdMap;

/// Every archetype ever created, looked up by component type set.
struct ArchetypeSet {
    index: HashMap<Box<[TypeId]>, u32>,
    archetypes: Vec<Archetype>,
}

impl ArchetypeSet {
    fn new() -> Self {
        let mut set = Self {
            index: HashMap::new(),
            archetypes: Vec::new(),
        };
        // Archetype 0 holds entities with no components.
        set.get_or_insert(Vec::new());
        set
    }

    /// `types` must be sorted and deduplicated.
    fn get_or_insert(&mut self, types: Vec<TypeInfo>) -> u32 {
        let key: Box<[TypeId]> = types.iter().map(|ty| ty.id()).collect();
        if let Some(&id) = self.index.get(&key) {
            return id;
        }
        let id = u32::try_from(self.archetypes.len()).expect("too many archetypes");
        debug!(archetype = id, ?types, "created archetype");
        self.archetypes.push(Archetype::new(types));
        self.index.insert(key, id);
        id
    }

    fn get(&self, id: u32) -> &Archetype {
        &self.archetypes[id as usize]
    }

    fn get_mut(&mut self, id: u32) -> &mut Archetype {
        &mut self.archetypes[id as usize]
    }

    fn get_pair_mut(&mut self, a: u32, b: u32) -> (&mut Archetype, &mut Archetype) {
        let (a, b) = (a as usize, b as usize);
        assert_ne!(a, b, "source and target archetype must differ");
        if a < b {
            let (low, high) = self.archetypes.split_at_mut(b);
            (&mut low[a], &mut high[0])
        } else {
            let (low, high) = self.archetypes.split_at_mut(a);
            (&mut high[0], &mut low[b])
        }
    }
}

/// The central ECS container. Owns all entities and their components.
///
/// Entities with identical component type sets share an archetype, so queries walk
/// dense columns instead of probing per-entity storage.
pub struct World {
    entities: EntityAllocator,
    archetypes: ArchetypeSet,
    /// Archetype each bundle type spawns into.
    bundle_to_archetype: TypeIdMap<u32>,
}

impl World {
    pub fn new() -> Self {
        Self {
            entities: EntityAllocator::new(),
            archetypes: ArchetypeSet::new(),
            bundle_to_archetype: TypeIdMap::default(),
        }
    }

    fn bundle_archetype<B: Bundle>(&mut self) -> u32 {
        let key = TypeId::of::<B>();
        if let Some(&id) = self.bundle_to_archetype.get(&key) {
            return id;
        }
        let id = self.archetypes.get_or_insert(B::type_infos());
        self.bundle_to_archetype.insert(key, id);
        id
    }

    /// Spawn a new entity with the given components.
    ///
    /// # Panics
    /// If the bundle names a component type twice.
    pub fn spawn<B: Bundle>(&mut self, components: B) -> Entity {
        self.flush();
        let archetype_id = self.bundle_archetype::<B>();
        let entity = self.entities.alloc();
        self.place(entity, archetype_id, components);
        entity
    }

    /// Spawn with a caller-chosen handle, replacing any live entity with the same id.
    ///
    /// Useful for mirroring entities from another world.
    ///
    /// # Panics
    /// If `entity` carries generation 0.
    pub fn spawn_at<B: Bundle>(&mut self, entity: Entity, components: B) {
        self.flush();
        let archetype_id = self.bundle_archetype::<B>();
        if let Some(old) = self.entities.alloc_at(entity) {
            if old.index != u32::MAX {
                if let Some(moved) = self.archetypes.get_mut(old.archetype).remove(old.index, true) {
                    self.entities.set_index(moved, old.index);
                }
            }
        }
        self.place(entity, archetype_id, components);
    }

    fn place<B: Bundle>(&mut self, entity: Entity, archetype_id: u32, components: B) {
        let archetype = self.archetypes.get_mut(archetype_id);
        let row = archetype.len();
        components.put(&mut RowWriter { archetype, row });
        let index = archetype.allocate(entity.id);
        self.entities.set_location(
            entity.id,
            Location {
                archetype: archetype_id,
                index,
            },
        );
    }

    /// Spawn one entity per bundle, returning the handles in iteration order.
    pub fn spawn_batch<I>(&mut self, iter: I) -> Vec<Entity>
    where
        I: IntoIterator,
        I::Item: Bundle,
    {
        self.flush();
        let bundles = iter.into_iter().collect::<Vec<_>>();
        let count = u32::try_from(bundles.len()).expect("too many entities");
        let archetype_id = self.bundle_archetype::<I::Item>();
        let archetype = self.archetypes.get_mut(archetype_id);

        let mut ids = self.entities.alloc_many(count, archetype_id, archetype.len());
        let mut spawned = Vec::with_capacity(bundles.len());
        for bundle in bundles {
            let id = ids
                .next(&self.entities)
                .expect("allocated fewer ids than bundles");
            let row = archetype.len();
            bundle.put(&mut RowWriter { archetype, row });
            archetype.allocate(id);
            spawned.push(Entity {
                generation: self.entities.meta[id as usize].generation,
                id,
            });
        }
        self.entities.finish_alloc_many(ids);

        trace!(count, archetype = archetype_id, "spawned batch");
        spawned
    }

    /// Reserve an entity handle through a shared reference.
    ///
    /// The entity has no components and becomes visible to queries after the next
    /// [`flush`](World::flush), which every structural operation performs.
    pub fn reserve_entity(&self) -> Entity {
        self.entities.reserve_entity()
    }

    /// Reserve `count` entity handles through a shared reference.
    pub fn reserve_entities(&self, count: u32) -> ReserveEntitiesIterator<'_> {
        self.entities.reserve_entities(count)
    }

    /// Give every reserved entity a row in the empty archetype.
    pub fn flush(&mut self) {
        if !self.entities.needs_flush() {
            return;
        }
        trace!("flushing reserved entities");
        let empty = self.archetypes.get_mut(0);
        self.entities.flush(|id, location| {
            location.archetype = 0;
            location.index = empty.allocate(id);
        });
    }

    /// Destroy an entity and drop its components.
    pub fn despawn(&mut self, entity: Entity) -> Result<(), NoSuchEntity> {
        self.flush();
        let loc = self.entities.free(entity)?;
        if let Some(moved) = self.archetypes.get_mut(loc.archetype).remove(loc.index, true) {
            self.entities.set_index(moved, loc.index);
        }
        Ok(())
    }

    /// Despawn every entity. Outstanding handles may alias entities spawned later.
    pub fn clear(&mut self) {
        for archetype in &mut self.archetypes.archetypes {
            archetype.clear();
        }
        self.entities.clear();
    }

    /// Whether `entity` is alive (or reserved and not yet flushed).
    pub fn contains(&self, entity: Entity) -> bool {
        self.entities.get(entity).is_ok()
    }

    /// Number of alive entities.
    pub fn len(&self) -> u32 {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Borrow a component shared.
    ///
    /// # Panics
    /// If the component is already borrowed exclusively.
    pub fn get<T: Component>(&self, entity: Entity) -> Result<Ref<'_, T>, ComponentError> {
        let loc = self.entities.get(entity)?;
        if loc.index == u32::MAX {
            return Err(ComponentError::missing::<T>());
        }
        Ref::new(self.archetypes.get(loc.archetype), loc.index)
    }

    /// Borrow a component exclusively.
    ///
    /// # Panics
    /// If the component is already borrowed.
    pub fn get_mut<T: Component>(&self, entity: Entity) -> Result<RefMut<'_, T>, ComponentError> {
        let loc = self.entities.get(entity)?;
        if loc.index == u32::MAX {
            return Err(ComponentError::missing::<T>());
        }
        RefMut::new(self.archetypes.get(loc.archetype), loc.index)
    }

    /// Handle for inspecting any of an entity's components.
    pub fn entity(&self, entity: Entity) -> Result<EntityRef<'_>, NoSuchEntity> {
        let loc = self.entities.get(entity)?;
        Ok(EntityRef::new(self.archetypes.get(loc.archetype), entity, loc.index))
    }

    /// Add components to an entity. Components it already has are overwritten.
    pub fn insert<B: Bundle>(&mut self, entity: Entity, components: B) -> Result<(), NoSuchEntity> {
        self.flush();
        let loc = self.entities.get(entity)?;
        let target = self.insert_target::<B>(loc.archetype);

        if target == loc.archetype {
            let archetype = self.archetypes.get_mut(target);
            components.put(&mut RowWriter {
                archetype,
                row: loc.index,
            });
            return Ok(());
        }

        let (source, dest) = self.archetypes.get_pair_mut(loc.archetype, target);
        let row = dest.len();
        source.move_row_into(loc.index, dest);
        components.put(&mut RowWriter {
            archetype: dest,
            row,
        });
        dest.allocate(entity.id);
        if let Some(moved) = source.remove(loc.index, false) {
            self.entities.set_index(moved, loc.index);
        }
        self.entities.set_location(
            entity.id,
            Location {
                archetype: target,
                index: row,
            },
        );
        Ok(())
    }

    fn insert_target<B: Bundle>(&mut self, source: u32) -> u32 {
        let key = TypeId::of::<B>();
        if let Some(&target) = self.archetypes.get(source).insert_edges.get(&key) {
            return target;
        }
        let archetype = self.archetypes.get(source);
        let mut types = archetype.types().to_vec();
        types.extend(
            B::type_infos()
                .into_iter()
                .filter(|ty| !archetype.has_dynamic(ty.id())),
        );
        types.sort_unstable();
        let target = self.archetypes.get_or_insert(types);
        self.archetypes
            .get_mut(source)
            .insert_edges
            .insert(key, target);
        target
    }

    /// Add a single component to an entity.
    pub fn insert_one<T: Component>(&mut self, entity: Entity, component: T) -> Result<(), NoSuchEntity> {
        self.insert(entity, (component,))
    }

    /// Remove components from an entity and return them.
    ///
    /// Fails without touching the entity if any of the components is missing.
    pub fn remove<B: Bundle>(&mut self, entity: Entity) -> Result<B, ComponentError> {
        self.flush();
        let loc = self.entities.get(entity)?;
        let target = self.remove_target::<B>(loc.archetype)?;

        if target == loc.archetype {
            // Only an empty bundle removes nothing.
            return Ok(B::take(&mut RowTaker {
                archetype: self.archetypes.get_mut(target),
                row: loc.index,
            }));
        }

        let (source, dest) = self.archetypes.get_pair_mut(loc.archetype, target);
        let row = dest.len();
        source.move_row_into(loc.index, dest);
        let removed = B::take(&mut RowTaker {
            archetype: source,
            row: loc.index,
        });
        dest.allocate(entity.id);
        if let Some(moved) = source.remove(loc.index, false) {
            self.entities.set_index(moved, loc.index);
        }
        self.entities.set_location(
            entity.id,
            Location {
                archetype: target,
                index: row,
            },
        );
        Ok(removed)
    }

    fn remove_target<B: Bundle>(&mut self, source: u32) -> Result<u32, ComponentError> {
        let key = TypeId::of::<B>();
        if let Some(&target) = self.archetypes.get(source).remove_edges.get(&key) {
            return Ok(target);
        }
        let archetype = self.archetypes.get(source);
        let removed = B::type_infos();
        if let Some(missing) = removed.iter().find(|ty| !archetype.has_dynamic(ty.id())) {
            return Err(ComponentError::MissingComponent(missing.name()));
        }
        let types = archetype
            .types()
            .iter()
            .filter(|ty| !removed.contains(ty))
            .copied()
            .collect();
        let target = self.archetypes.get_or_insert(types);
        self.archetypes
            .get_mut(source)
            .remove_edges
            .insert(key, target);
        Ok(target)
    }

    /// Remove a single component from an entity and return it.
    pub fn remove_one<T: Component>(&mut self, entity: Entity) -> Result<T, ComponentError> {
        self.remove::<(T,)>(entity).map(|(component,)| component)
    }

    /// Query the world with runtime-checked column borrows.
    ///
    /// ```
    /// # use strata_ecs::World;
    /// let mut world = World::new();
    /// let a = world.spawn((123u32, true, "abc"));
    /// let b = world.spawn((456u32, false));
    /// let mut query = world.query::<(&u32, &bool)>();
    /// let mut rows = query.iter().map(|(e, (&n, &flag))| (e, n, flag)).collect::<Vec<_>>();
    /// rows.sort();
    /// assert_eq!(rows, [(a, 123, true), (b, 456, false)]);
    /// ```
    pub fn query<Q: WorldQuery>(&self) -> QueryBorrow<'_, Q> {
        QueryBorrow::new(&self.entities.meta, &self.archetypes.archetypes)
    }

    /// Query a uniquely borrowed world. No runtime borrows are held while iterating.
    ///
    /// # Panics
    /// If `Q` names the same component both shared and exclusively.
    pub fn query_mut<Q: WorldQuery>(&mut self) -> QueryMut<'_, Q> {
        QueryMut::new(&self.entities.meta, &self.archetypes.archetypes)
    }

    /// All archetypes in creation order. The first one holds component-less entities.
    pub fn archetypes(&self) -> impl ExactSizeIterator<Item = &Archetype> + '_ {
        self.archetypes.archetypes.iter()
    }

    /// The current handle for a raw id, whether live or reserved.
    ///
    /// # Panics
    /// If `id` was never allocated or reserved.
    pub fn find_entity_from_id(&self, id: u32) -> Entity {
        self.entities.resolve_unknown_gen(id)
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}
