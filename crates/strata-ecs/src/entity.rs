use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::NoSuchEntity;

/// A generational entity handle. Uses compact u32 id + generation for cache performance.
///
/// Generation 0 is never issued, so a zeroed handle never resolves.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    pub(crate) generation: u32,
    pub(crate) id: u32,
}

impl Entity {
    /// Create an entity from raw parts (mainly for testing).
    pub fn from_raw(id: u32, generation: u32) -> Self {
        Self { generation, id }
    }

    /// Pack the handle into one `u64`: generation in the high half, id in the low half.
    pub const fn to_bits(self) -> u64 {
        (self.generation as u64) << 32 | self.id as u64
    }

    /// Reconstruct a handle packed by [`Entity::to_bits`].
    ///
    /// Returns `None` for a zero generation, which no allocator ever hands out.
    pub const fn from_bits(bits: u64) -> Option<Self> {
        let generation = (bits >> 32) as u32;
        if generation == 0 {
            return None;
        }
        Some(Self {
            generation,
            id: bits as u32,
        })
    }

    /// The slot id of this entity.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The generation of this entity (incremented on reuse).
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({}v{})", self.id, self.generation)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.id, self.generation)
    }
}

/// Where an entity's components currently live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub archetype: u32,
    /// Row within the archetype. `u32::MAX` while the entity is reserved but not yet flushed.
    pub index: u32,
}

impl Location {
    pub const EMPTY: Location = Location {
        archetype: 0,
        index: u32::MAX,
    };
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct EntityMeta {
    pub generation: u32,
    pub location: Location,
}

impl EntityMeta {
    const EMPTY: EntityMeta = EntityMeta {
        generation: 1,
        location: Location::EMPTY,
    };
}

/// Allocates and recycles entity ids with generational tracking.
///
/// Ids can also be reserved through a shared reference with [`reserve_entity`] and
/// [`reserve_entities`]; reserved ids are materialized by the next [`flush`].
///
/// [`reserve_entity`]: EntityAllocator::reserve_entity
/// [`reserve_entities`]: EntityAllocator::reserve_entities
/// [`flush`]: EntityAllocator::flush
#[derive(Default)]
pub struct EntityAllocator {
    pub(crate) meta: Vec<EntityMeta>,
    /// Ids freed and awaiting reuse. The top `free_cursor` entries are still available.
    pending: Vec<u32>,
    /// `>= 0`: number of ids available at the top of `pending`.
    /// `< 0`: number of ids reserved past the end of `meta`.
    free_cursor: AtomicI64,
    len: u32,
}

impl EntityAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `count` ids without touching `meta`. They become valid after [`flush`].
    ///
    /// [`flush`]: EntityAllocator::flush
    pub fn reserve_entities(&self, count: u32) -> ReserveEntitiesIterator<'_> {
        let range_end = self
            .free_cursor
            .fetch_sub(i64::from(count), Ordering::Relaxed);
        let range_start = range_end - i64::from(count);

        let freelist_range = range_start.max(0) as usize..range_end.max(0) as usize;

        let (new_id_start, new_id_end) = if range_start >= 0 {
            (0, 0)
        } else {
            // Only the part of the range below zero needs fresh ids.
            let base = self.meta.len() as i64;
            let new_id_end = u32::try_from(base - range_start).expect("too many entities");
            let new_id_start = (base - range_end.min(0)) as u32;
            (new_id_start, new_id_end)
        };

        ReserveEntitiesIterator {
            meta: &self.meta,
            id_iter: self.pending[freelist_range].iter(),
            id_range: new_id_start..new_id_end,
        }
    }

    /// Reserve a single id. It becomes valid after [`flush`].
    ///
    /// [`flush`]: EntityAllocator::flush
    pub fn reserve_entity(&self) -> Entity {
        let n = self.free_cursor.fetch_sub(1, Ordering::Relaxed);
        if n > 0 {
            let id = self.pending[(n - 1) as usize];
            Entity {
                generation: self.meta[id as usize].generation,
                id,
            }
        } else {
            Entity {
                generation: 1,
                id: u32::try_from(self.meta.len() as i64 - n).expect("too many entities"),
            }
        }
    }

    fn verify_flushed(&mut self) {
        assert!(
            !self.needs_flush(),
            "flush() needs to be called before this operation is legal"
        );
    }

    /// Allocate a new entity, reusing a freed id if one is available.
    pub fn alloc(&mut self) -> Entity {
        self.verify_flushed();

        self.len += 1;
        if let Some(id) = self.pending.pop() {
            let new_free_cursor = self.pending.len() as i64;
            *self.free_cursor.get_mut() = new_free_cursor;
            Entity {
                generation: self.meta[id as usize].generation,
                id,
            }
        } else {
            let id = u32::try_from(self.meta.len()).expect("too many entities");
            self.meta.push(EntityMeta::EMPTY);
            Entity { generation: 1, id }
        }
    }

    /// Claim a specific id and generation.
    ///
    /// Returns the previous location if the id was live, in which case the caller owns
    /// the cleanup of the old row.
    ///
    /// # Panics
    /// If `entity` carries generation 0.
    pub fn alloc_at(&mut self, entity: Entity) -> Option<Location> {
        assert!(entity.generation != 0, "generation 0 is never issued");
        self.verify_flushed();

        let loc = if entity.id as usize >= self.meta.len() {
            self.pending.extend((self.meta.len() as u32)..entity.id);
            let new_free_cursor = self.pending.len() as i64;
            *self.free_cursor.get_mut() = new_free_cursor;
            self.meta.resize(entity.id as usize + 1, EntityMeta::EMPTY);
            self.len += 1;
            None
        } else if let Some(index) = self.pending.iter().position(|item| *item == entity.id) {
            self.pending.swap_remove(index);
            let new_free_cursor = self.pending.len() as i64;
            *self.free_cursor.get_mut() = new_free_cursor;
            self.len += 1;
            None
        } else {
            Some(std::mem::replace(
                &mut self.meta[entity.id as usize].location,
                Location::EMPTY,
            ))
        };

        self.meta[entity.id as usize].generation = entity.generation;
        loc
    }

    /// Allocate `n` ids whose rows start at `index` in `archetype`.
    ///
    /// Freed ids are drained first, the rest are minted fresh. The returned cursor
    /// yields the ids in row order; call [`finish_alloc_many`] once it is exhausted.
    ///
    /// [`finish_alloc_many`]: EntityAllocator::finish_alloc_many
    pub fn alloc_many(&mut self, n: u32, archetype: u32, mut index: u32) -> AllocManyState {
        self.verify_flushed();

        let fresh = (n as usize).saturating_sub(self.pending.len()) as u32;
        assert!(
            (self.meta.len() + fresh as usize) < u32::MAX as usize,
            "too many entities"
        );
        let pending_end = self.pending.len().saturating_sub(n as usize);
        for &id in &self.pending[pending_end..] {
            self.meta[id as usize].location = Location { archetype, index };
            index += 1;
        }

        let fresh_start = self.meta.len() as u32;
        self.meta.extend((fresh_start..(fresh_start + fresh)).map(|_| {
            let meta = EntityMeta {
                generation: 1,
                location: Location { archetype, index },
            };
            index += 1;
            meta
        }));

        self.len += n;

        AllocManyState {
            pending_end,
            cursor: pending_end..self.pending.len(),
            fresh: fresh_start..(fresh_start + fresh),
        }
    }

    /// Drop the pending ids handed out by an [`alloc_many`] cursor.
    ///
    /// [`alloc_many`]: EntityAllocator::alloc_many
    pub fn finish_alloc_many(&mut self, state: AllocManyState) {
        self.pending.truncate(state.pending_end);
        let new_free_cursor = self.pending.len() as i64;
        *self.free_cursor.get_mut() = new_free_cursor;
    }

    /// Retire an entity, returning where its components lived.
    pub fn free(&mut self, entity: Entity) -> Result<Location, NoSuchEntity> {
        self.verify_flushed();

        if !self.is_live(entity) {
            return Err(NoSuchEntity);
        }
        let meta = &mut self.meta[entity.id as usize];

        // Generation 0 marks an invalid handle, so wrap past it.
        meta.generation = meta.generation.checked_add(1).unwrap_or(1);
        let loc = std::mem::replace(&mut meta.location, Location::EMPTY);

        self.pending.push(entity.id);
        let new_free_cursor = self.pending.len() as i64;
        *self.free_cursor.get_mut() = new_free_cursor;
        self.len -= 1;

        Ok(loc)
    }

    /// Whether the handle is current, treating ids unknown to the table as reserved.
    pub fn contains(&self, entity: Entity) -> bool {
        entity.id as usize >= self.meta.len() || self.is_live(entity)
    }

    /// Whether `entity` names a materialized id that is neither stale nor sitting
    /// unclaimed in the freelist.
    fn is_live(&self, entity: Entity) -> bool {
        let Some(meta) = self.meta.get(entity.id as usize) else {
            return false;
        };
        if meta.generation != entity.generation {
            return false;
        }
        // A freed id keeps its bumped generation, so only the freelist tells it apart
        // from a live one. Placed entities never need the scan.
        meta.location.index != u32::MAX || !self.is_free(entity.id)
    }

    /// Whether `id` is in the freelist and not handed out by a reservation.
    fn is_free(&self, id: u32) -> bool {
        let available = self
            .free_cursor
            .load(Ordering::Relaxed)
            .clamp(0, self.pending.len() as i64) as usize;
        self.pending[..available].contains(&id)
    }

    /// Look up where an entity's components live.
    pub fn get(&self, entity: Entity) -> Result<Location, NoSuchEntity> {
        if self.meta.len() <= entity.id as usize {
            // Could have come from `reserve_entity` and not been flushed yet.
            let free = self.free_cursor.load(Ordering::Relaxed);
            if entity.generation == 1
                && free < 0
                && i64::from(entity.id) < self.meta.len() as i64 - free
            {
                return Ok(Location::EMPTY);
            }
            return Err(NoSuchEntity);
        }
        if !self.is_live(entity) {
            return Err(NoSuchEntity);
        }
        Ok(self.meta[entity.id as usize].location)
    }

    pub(crate) fn set_location(&mut self, id: u32, location: Location) {
        self.meta[id as usize].location = location;
    }

    pub(crate) fn set_index(&mut self, id: u32, index: u32) {
        self.meta[id as usize].location.index = index;
    }

    /// Whether reserved ids are waiting for [`flush`].
    ///
    /// [`flush`]: EntityAllocator::flush
    pub fn needs_flush(&mut self) -> bool {
        *self.free_cursor.get_mut() != self.pending.len() as i64
    }

    /// Materialize every reserved id, calling `init` once per id so the caller can
    /// give it a real location. Calling this with nothing reserved is a no-op.
    pub fn flush(&mut self, mut init: impl FnMut(u32, &mut Location)) {
        let free_cursor = *self.free_cursor.get_mut();

        let new_free_cursor = if free_cursor >= 0 {
            free_cursor as usize
        } else {
            let old_meta_len = self.meta.len();
            let new_meta_len = old_meta_len + (-free_cursor) as usize;
            self.meta.resize(new_meta_len, EntityMeta::EMPTY);
            self.len += (-free_cursor) as u32;
            for (id, meta) in self.meta.iter_mut().enumerate().skip(old_meta_len) {
                init(id as u32, &mut meta.location);
            }
            *self.free_cursor.get_mut() = 0;
            0
        };

        self.len += (self.pending.len() - new_free_cursor) as u32;
        for id in self.pending.drain(new_free_cursor..) {
            init(id, &mut self.meta[id as usize].location);
        }
    }

    /// Best-effort handle for a raw id that may be live or reserved.
    ///
    /// # Panics
    /// If `id` lies past every materialized and reserved id.
    pub fn resolve_unknown_gen(&self, id: u32) -> Entity {
        let meta_len = self.meta.len();

        if meta_len > id as usize {
            let meta = &self.meta[id as usize];
            Entity {
                generation: meta.generation,
                id,
            }
        } else {
            let free_cursor = self.free_cursor.load(Ordering::Relaxed);
            let num_pending = if free_cursor < 0 {
                (-free_cursor) as usize
            } else {
                0
            };
            assert!(
                (id as usize) < meta_len + num_pending,
                "entity id {id} is out of range"
            );
            Entity { generation: 1, id }
        }
    }

    /// Forget every entity. Generations restart, so outstanding handles may alias.
    pub fn clear(&mut self) {
        self.meta.clear();
        self.pending.clear();
        *self.free_cursor.get_mut() = 0;
        self.len = 0;
    }

    /// Number of currently alive entities.
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Whether there are no alive entities.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Cursor over the ids handed out by [`EntityAllocator::alloc_many`].
pub struct AllocManyState {
    /// Length `pending` is truncated to once the batch is done.
    pending_end: usize,
    /// Reused ids still to hand out, as indices into `pending`.
    cursor: Range<usize>,
    fresh: Range<u32>,
}

impl AllocManyState {
    pub fn next(&mut self, entities: &EntityAllocator) -> Option<u32> {
        match self.cursor.next() {
            Some(i) => Some(entities.pending[i]),
            None => self.fresh.next(),
        }
    }

    pub fn len(&self) -> usize {
        self.cursor.len() + self.fresh.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Iterator over ids reserved by [`EntityAllocator::reserve_entities`].
pub struct ReserveEntitiesIterator<'a> {
    meta: &'a [EntityMeta],
    /// Reused ids, drawn from the freelist.
    id_iter: std::slice::Iter<'a, u32>,
    /// Fresh ids past the end of `meta`.
    id_range: Range<u32>,
}

impl Iterator for ReserveEntitiesIterator<'_> {
    type Item = Entity;

    fn next(&mut self) -> Option<Self::Item> {
        self.id_iter
            .next()
            .map(|&id| Entity {
                generation: self.meta[id as usize].generation,
                id,
            })
            .or_else(|| self.id_range.next().map(|id| Entity { generation: 1, id }))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.id_iter.len() + self.id_range.len();
        (len, Some(len))
    }
}

impl ExactSizeIterator for ReserveEntitiesIterator<'_> {}
