//! Strata ECS - archetype-based Entity Component System
//!
//! Entities that share a component type set live together in one archetype, stored
//! column by column. Entity handles are generational, so stale handles are detected
//! instead of silently aliasing a reused slot. Column access is checked at runtime by
//! per-column borrow counters.

mod archetype;
mod borrow;
mod component;
mod entity;
mod entity_ref;
mod error;
mod query;
mod type_map;
mod world;

pub use archetype::Archetype;
pub use borrow::{Access, BorrowState};
pub use component::{Bundle, Component, ComponentSink, ComponentSource, TypeInfo};
pub use entity::{AllocManyState, Entity, EntityAllocator, Location, ReserveEntitiesIterator};
pub use entity_ref::{EntityRef, Ref, RefMut};
pub use error::{BorrowConflict, ComponentError, NoSuchEntity};
pub use query::{QueryBorrow, QueryIter, QueryMut, WorldQuery};
pub use world::World;
