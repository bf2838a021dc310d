use std::any::TypeId;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use crate::archetype::Archetype;
use crate::component::Component;
use crate::entity::Entity;
use crate::error::ComponentError;

/// Handle to an entity with any component types.
#[derive(Clone, Copy)]
pub struct EntityRef<'a> {
    archetype: &'a Archetype,
    entity: Entity,
    index: u32,
}

impl<'a> EntityRef<'a> {
    pub(crate) fn new(archetype: &'a Archetype, entity: Entity, index: u32) -> Self {
        Self {
            archetype,
            entity,
            index,
        }
    }

    pub fn entity(&self) -> Entity {
        self.entity
    }

    /// Whether the entity has a `T` component.
    pub fn has<T: Component>(&self) -> bool {
        self.archetype.has::<T>()
    }

    /// Borrow the `T` component shared, if present.
    ///
    /// # Panics
    /// If the component is already borrowed exclusively.
    pub fn get<T: Component>(&self) -> Option<Ref<'a, T>> {
        Ref::new(self.archetype, self.index).ok()
    }

    /// Borrow the `T` component exclusively, if present.
    ///
    /// # Panics
    /// If the component is already borrowed.
    pub fn get_mut<T: Component>(&self) -> Option<RefMut<'a, T>> {
        RefMut::new(self.archetype, self.index).ok()
    }

    /// Enumerate the types of the entity's components.
    pub fn component_types(&self) -> impl ExactSizeIterator<Item = TypeId> + 'a {
        self.archetype.component_types()
    }
}

impl fmt::Debug for EntityRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRef")
            .field("entity", &self.entity)
            .field("index", &self.index)
            .finish()
    }
}

/// Shared borrow of one entity's component. Released on drop.
pub struct Ref<'a, T: Component> {
    archetype: &'a Archetype,
    state: usize,
    target: NonNull<T>,
}

impl<'a, T: Component> Ref<'a, T> {
    pub(crate) fn new(archetype: &'a Archetype, index: u32) -> Result<Self, ComponentError> {
        let state = archetype
            .get_state::<T>()
            .ok_or_else(ComponentError::missing::<T>)?;
        archetype.borrow::<T>(state);
        let cell = &archetype.get_base::<T>(state)[index as usize];
        // SAFETY: `UnsafeCell::get` never returns null.
        let target = unsafe { NonNull::new_unchecked(cell.get()) };
        Ok(Self {
            archetype,
            state,
            target,
        })
    }
}

unsafe impl<T: Component> Send for Ref<'_, T> {}
unsafe impl<T: Component> Sync for Ref<'_, T> {}

impl<T: Component> Drop for Ref<'_, T> {
    fn drop(&mut self) {
        self.archetype.release::<T>(self.state);
    }
}

impl<T: Component> Clone for Ref<'_, T> {
    fn clone(&self) -> Self {
        self.archetype.borrow::<T>(self.state);
        Self {
            archetype: self.archetype,
            state: self.state,
            target: self.target,
        }
    }
}

impl<T: Component> Deref for Ref<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the shared column borrow is held for as long as `self` lives.
        unsafe { self.target.as_ref() }
    }
}

impl<T: Component + fmt::Debug> fmt::Debug for Ref<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.deref().fmt(f)
    }
}

/// Exclusive borrow of one entity's component. Released on drop.
pub struct RefMut<'a, T: Component> {
    archetype: &'a Archetype,
    state: usize,
    target: NonNull<T>,
}

impl<'a, T: Component> RefMut<'a, T> {
    pub(crate) fn new(archetype: &'a Archetype, index: u32) -> Result<Self, ComponentError> {
        let state = archetype
            .get_state::<T>()
            .ok_or_else(ComponentError::missing::<T>)?;
        archetype.borrow_mut::<T>(state);
        let cell = &archetype.get_base::<T>(state)[index as usize];
        // SAFETY: `UnsafeCell::get` never returns null.
        let target = unsafe { NonNull::new_unchecked(cell.get()) };
        Ok(Self {
            archetype,
            state,
            target,
        })
    }
}

unsafe impl<T: Component> Send for RefMut<'_, T> {}
unsafe impl<T: Component> Sync for RefMut<'_, T> {}

impl<T: Component> Drop for RefMut<'_, T> {
    fn drop(&mut self) {
        self.archetype.release_mut::<T>(self.state);
    }
}

impl<T: Component> Deref for RefMut<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the exclusive column borrow is held for as long as `self` lives.
        unsafe { self.target.as_ref() }
    }
}

impl<T: Component> DerefMut for RefMut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as above, and `&mut self` rules out aliasing through this handle.
        unsafe { self.target.as_mut() }
    }
}

impl<T: Component + fmt::Debug> fmt::Debug for RefMut<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.deref().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archetype::RowWriter;
    use crate::borrow::BorrowState;
    use crate::component::Bundle;

    fn archetype_with(value: u32, label: &str) -> Archetype {
        let mut arch = Archetype::new(<(u32, String)>::type_infos());
        (value, label.to_string()).put(&mut RowWriter {
            archetype: &mut arch,
            row: 0,
        });
        arch.allocate(0);
        arch
    }

    #[test]
    fn ref_releases_on_drop() {
        let arch = archetype_with(5, "five");
        {
            let a = Ref::<u32>::new(&arch, 0).unwrap();
            let b = a.clone();
            assert_eq!(*a + *b, 10);
            assert_eq!(arch.borrow_state::<u32>(), Some(BorrowState::Shared(2)));
        }
        assert_eq!(arch.borrow_state::<u32>(), Some(BorrowState::Unborrowed));
    }

    #[test]
    fn ref_mut_writes_through() {
        let arch = archetype_with(5, "five");
        {
            let mut label = RefMut::<String>::new(&arch, 0).unwrap();
            label.push('!');
            assert_eq!(arch.borrow_state::<String>(), Some(BorrowState::Exclusive));
        }
        assert_eq!(*Ref::<String>::new(&arch, 0).unwrap(), "five!");
    }

    #[test]
    fn missing_component() {
        let arch = archetype_with(5, "five");
        let err = Ref::<bool>::new(&arch, 0).err();
        assert_eq!(err, Some(ComponentError::MissingComponent("bool")));
    }

    #[test]
    #[should_panic(expected = "already borrowed")]
    fn ref_mut_while_shared_panics() {
        let arch = archetype_with(5, "five");
        let _shared = Ref::<u32>::new(&arch, 0).unwrap();
        let _exclusive = RefMut::<u32>::new(&arch, 0).unwrap();
    }

    #[test]
    fn entity_ref_access() {
        let arch = archetype_with(9, "nine");
        let entity = Entity::from_raw(0, 1);
        let handle = EntityRef::new(&arch, entity, 0);
        assert_eq!(handle.entity(), entity);
        assert!(handle.has::<String>());
        assert!(handle.get::<bool>().is_none());
        *handle.get_mut::<u32>().unwrap() += 1;
        assert_eq!(*handle.get::<u32>().unwrap(), 10);
        assert_eq!(handle.component_types().len(), 2);
    }
}
