use std::cell::UnsafeCell;
use std::marker::PhantomData;

use crate::archetype::Archetype;
use crate::borrow::Access;
use crate::component::Component;
use crate::entity::{Entity, EntityMeta};
use crate::error::BorrowConflict;

/// Trait implemented for query parameter types (`&T`, `&mut T`, `Option<&T>`, etc.).
///
/// # Safety
/// `access`, `borrow`, and `release` must cover every column `fetch` touches, in the
/// mode `fetch` touches it.
pub unsafe trait WorldQuery {
    /// What a matching row yields.
    type Item<'q>;
    /// Column views prepared once per archetype.
    type Fetch<'q>;

    /// How this query would touch `archetype`, or `None` if the archetype does not match.
    fn access(archetype: &Archetype) -> Option<Access>;

    /// Acquire the column borrows for a matching archetype.
    ///
    /// On conflict nothing taken by this call stays borrowed.
    fn borrow(archetype: &Archetype) -> Result<(), BorrowConflict>;

    /// Release what [`borrow`](WorldQuery::borrow) acquired.
    fn release(archetype: &Archetype);

    /// Look up the columns to read, or `None` if the archetype does not match.
    fn prepare(archetype: &Archetype) -> Option<Self::Fetch<'_>>;

    /// Read one row.
    ///
    /// # Safety
    /// `row` must be in bounds and the columns must be borrowed in the mode `access` reports.
    unsafe fn fetch<'q>(fetch: &Self::Fetch<'q>, row: usize) -> Self::Item<'q>;
}

// --- &T ---

unsafe impl<T: Component> WorldQuery for &T {
    type Item<'q> = &'q T;
    type Fetch<'q> = &'q [UnsafeCell<T>];

    fn access(archetype: &Archetype) -> Option<Access> {
        archetype.has::<T>().then_some(Access::Read)
    }

    fn borrow(archetype: &Archetype) -> Result<(), BorrowConflict> {
        match archetype.get_state::<T>() {
            Some(state) => archetype.try_borrow::<T>(state),
            None => Ok(()),
        }
    }

    fn release(archetype: &Archetype) {
        if let Some(state) = archetype.get_state::<T>() {
            archetype.release::<T>(state);
        }
    }

    fn prepare(archetype: &Archetype) -> Option<Self::Fetch<'_>> {
        let state = archetype.get_state::<T>()?;
        Some(archetype.get_base::<T>(state))
    }

    unsafe fn fetch<'q>(fetch: &Self::Fetch<'q>, row: usize) -> Self::Item<'q> {
        &*fetch[row].get()
    }
}

// --- &mut T ---

unsafe impl<T: Component> WorldQuery for &mut T {
    type Item<'q> = &'q mut T;
    type Fetch<'q> = &'q [UnsafeCell<T>];

    fn access(archetype: &Archetype) -> Option<Access> {
        archetype.has::<T>().then_some(Access::Write)
    }

    fn borrow(archetype: &Archetype) -> Result<(), BorrowConflict> {
        match archetype.get_state::<T>() {
            Some(state) => archetype.try_borrow_mut::<T>(state),
            None => Ok(()),
        }
    }

    fn release(archetype: &Archetype) {
        if let Some(state) = archetype.get_state::<T>() {
            archetype.release_mut::<T>(state);
        }
    }

    fn prepare(archetype: &Archetype) -> Option<Self::Fetch<'_>> {
        let state = archetype.get_state::<T>()?;
        Some(archetype.get_base::<T>(state))
    }

    unsafe fn fetch<'q>(fetch: &Self::Fetch<'q>, row: usize) -> Self::Item<'q> {
        &mut *fetch[row].get()
    }
}

// --- Option<&T> ---

unsafe impl<T: Component> WorldQuery for Option<&T> {
    type Item<'q> = Option<&'q T>;
    type Fetch<'q> = Option<&'q [UnsafeCell<T>]>;

    fn access(archetype: &Archetype) -> Option<Access> {
        Some(if archetype.has::<T>() {
            Access::Read
        } else {
            Access::Iterate
        })
    }

    fn borrow(archetype: &Archetype) -> Result<(), BorrowConflict> {
        <&T as WorldQuery>::borrow(archetype)
    }

    fn release(archetype: &Archetype) {
        <&T as WorldQuery>::release(archetype);
    }

    fn prepare(archetype: &Archetype) -> Option<Self::Fetch<'_>> {
        Some(<&T as WorldQuery>::prepare(archetype))
    }

    unsafe fn fetch<'q>(fetch: &Self::Fetch<'q>, row: usize) -> Self::Item<'q> {
        fetch.map(|cells| &*cells[row].get())
    }
}

// --- Option<&mut T> ---

unsafe impl<T: Component> WorldQuery for Option<&mut T> {
    type Item<'q> = Option<&'q mut T>;
    type Fetch<'q> = Option<&'q [UnsafeCell<T>]>;

    fn access(archetype: &Archetype) -> Option<Access> {
        Some(if archetype.has::<T>() {
            Access::Write
        } else {
            Access::Iterate
        })
    }

    fn borrow(archetype: &Archetype) -> Result<(), BorrowConflict> {
        <&mut T as WorldQuery>::borrow(archetype)
    }

    fn release(archetype: &Archetype) {
        <&mut T as WorldQuery>::release(archetype);
    }

    fn prepare(archetype: &Archetype) -> Option<Self::Fetch<'_>> {
        Some(<&mut T as WorldQuery>::prepare(archetype))
    }

    unsafe fn fetch<'q>(fetch: &Self::Fetch<'q>, row: usize) -> Self::Item<'q> {
        fetch.map(|cells| &mut *cells[row].get())
    }
}

// --- Tuple implementations ---

macro_rules! impl_world_query_tuple {
    ($($name:ident),*) => {
        #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments, clippy::unused_unit)]
        unsafe impl<$($name: WorldQuery),*> WorldQuery for ($($name,)*) {
            type Item<'q> = ($($name::Item<'q>,)*);
            type Fetch<'q> = ($($name::Fetch<'q>,)*);

            fn access(archetype: &Archetype) -> Option<Access> {
                let mut access = Access::Iterate;
                $(access = access.max($name::access(archetype)?);)*
                Some(access)
            }

            fn borrow(archetype: &Archetype) -> Result<(), BorrowConflict> {
                let mut taken = 0usize;
                let result = (|| -> Result<(), BorrowConflict> {
                    $($name::borrow(archetype)?; taken += 1;)*
                    Ok(())
                })();
                if result.is_err() {
                    // Undo the elements borrowed before the conflict.
                    let mut element = 0usize;
                    $(
                        if element < taken {
                            $name::release(archetype);
                        }
                        element += 1;
                    )*
                }
                result
            }

            fn release(archetype: &Archetype) {
                $($name::release(archetype);)*
            }

            fn prepare(archetype: &Archetype) -> Option<Self::Fetch<'_>> {
                Some(($($name::prepare(archetype)?,)*))
            }

            unsafe fn fetch<'q>(fetch: &Self::Fetch<'q>, row: usize) -> Self::Item<'q> {
                let ($($name,)*) = fetch;
                ($($name::fetch($name, row),)*)
            }
        }
    };
}

impl_world_query_tuple!();
impl_world_query_tuple!(A);
impl_world_query_tuple!(A, B);
impl_world_query_tuple!(A, B, C);
impl_world_query_tuple!(A, B, C, D);
impl_world_query_tuple!(A, B, C, D, E);
impl_world_query_tuple!(A, B, C, D, E, F);
impl_world_query_tuple!(A, B, C, D, E, F, G);
impl_world_query_tuple!(A, B, C, D, E, F, G, H);

/// A borrow of the world's columns for query `Q`.
///
/// Columns are borrowed on the first call to [`iter`](QueryBorrow::iter) and stay
/// borrowed until this value is dropped.
pub struct QueryBorrow<'w, Q: WorldQuery> {
    meta: &'w [EntityMeta],
    archetypes: &'w [Archetype],
    borrowed: bool,
    _marker: PhantomData<fn() -> Q>,
}

impl<'w, Q: WorldQuery> QueryBorrow<'w, Q> {
    pub(crate) fn new(meta: &'w [EntityMeta], archetypes: &'w [Archetype]) -> Self {
        Self {
            meta,
            archetypes,
            borrowed: false,
            _marker: PhantomData,
        }
    }

    /// Execute the query.
    ///
    /// # Panics
    /// If a column the query needs is already borrowed incompatibly, for example by
    /// another live query or a [`RefMut`](crate::RefMut).
    pub fn iter(&mut self) -> QueryIter<'_, Q> {
        self.borrow();
        QueryIter::new(self.meta, self.archetypes)
    }

    fn borrow(&mut self) {
        if self.borrowed {
            return;
        }
        for (i, archetype) in self.archetypes.iter().enumerate() {
            if !Self::borrows(archetype) {
                continue;
            }
            if let Err(conflict) = Q::borrow(archetype) {
                for earlier in self.archetypes[..i].iter().filter(|a| Self::borrows(a)) {
                    Q::release(earlier);
                }
                panic!("{conflict}");
            }
        }
        self.borrowed = true;
    }

    /// Empty archetypes yield nothing and are skipped.
    fn borrows(archetype: &Archetype) -> bool {
        !archetype.is_empty() && Q::access(archetype).is_some()
    }
}

impl<Q: WorldQuery> Drop for QueryBorrow<'_, Q> {
    fn drop(&mut self) {
        if !self.borrowed {
            return;
        }
        for archetype in self.archetypes.iter().filter(|a| Self::borrows(a)) {
            Q::release(archetype);
        }
    }
}

impl<'q, 'w, Q: WorldQuery> IntoIterator for &'q mut QueryBorrow<'w, Q> {
    type Item = (Entity, Q::Item<'q>);
    type IntoIter = QueryIter<'q, Q>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A query over a uniquely borrowed world.
///
/// No runtime borrows are held, but the query shape is still validated on creation.
pub struct QueryMut<'w, Q: WorldQuery> {
    meta: &'w [EntityMeta],
    archetypes: &'w [Archetype],
    _marker: PhantomData<fn() -> Q>,
}

impl<'w, Q: WorldQuery> QueryMut<'w, Q> {
    /// # Panics
    /// If `Q` borrows the same component type both shared and exclusively, or
    /// exclusively twice.
    pub(crate) fn new(meta: &'w [EntityMeta], archetypes: &'w [Archetype]) -> Self {
        for archetype in archetypes {
            if Q::access(archetype).is_some() {
                if let Err(conflict) = Q::borrow(archetype) {
                    panic!("{conflict}");
                }
                Q::release(archetype);
            }
        }
        Self {
            meta,
            archetypes,
            _marker: PhantomData,
        }
    }

    pub fn iter(&mut self) -> QueryIter<'_, Q> {
        QueryIter::new(self.meta, self.archetypes)
    }
}

impl<'w, Q: WorldQuery> IntoIterator for QueryMut<'w, Q> {
    type Item = (Entity, Q::Item<'w>);
    type IntoIter = QueryIter<'w, Q>;

    fn into_iter(self) -> Self::IntoIter {
        QueryIter::new(self.meta, self.archetypes)
    }
}

/// Iterator over the rows matched by a query, archetype by archetype.
pub struct QueryIter<'q, Q: WorldQuery> {
    meta: &'q [EntityMeta],
    archetypes: std::slice::Iter<'q, Archetype>,
    current: Option<(&'q Archetype, Q::Fetch<'q>)>,
    row: u32,
}

impl<'q, Q: WorldQuery> QueryIter<'q, Q> {
    /// The caller holds the borrows `Q` needs, statically or at runtime.
    fn new(meta: &'q [EntityMeta], archetypes: &'q [Archetype]) -> Self {
        Self {
            meta,
            archetypes: archetypes.iter(),
            current: None,
            row: 0,
        }
    }
}

impl<'q, Q: WorldQuery> Iterator for QueryIter<'q, Q> {
    type Item = (Entity, Q::Item<'q>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((archetype, fetch)) = &self.current {
                if self.row < archetype.len() {
                    let row = self.row;
                    self.row += 1;
                    let id = archetype.entity_id(row);
                    let entity = Entity {
                        generation: self.meta[id as usize].generation,
                        id,
                    };
                    // SAFETY: `row < len` and the borrows were taken by our creator.
                    let item = unsafe { Q::fetch(fetch, row as usize) };
                    return Some((entity, item));
                }
            }

            let archetype = self.archetypes.next()?;
            self.current = Q::prepare(archetype).map(|fetch| (archetype, fetch));
            self.row = 0;
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = match &self.current {
            Some((archetype, _)) => (archetype.len() - self.row) as usize,
            None => 0,
        };
        (remaining, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BorrowState, World};
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn tuple_access_is_strongest_element() {
        let mut world = World::new();
        world.spawn((1u32, true));
        let archetype = world.archetypes().last().unwrap();

        assert_eq!(<()>::access(archetype), Some(Access::Iterate));
        assert_eq!(<(&u32,)>::access(archetype), Some(Access::Read));
        assert_eq!(<(&u32, &mut bool)>::access(archetype), Some(Access::Write));
        assert_eq!(<(&u32, &String)>::access(archetype), None);
        assert_eq!(<(&u32, Option<&String>)>::access(archetype), Some(Access::Read));
        assert_eq!(<Option<&mut String>>::access(archetype), Some(Access::Iterate));
    }

    #[test]
    fn optional_elements() {
        let mut world = World::new();
        let a = world.spawn((1u32, "a"));
        let b = world.spawn((2u32,));

        let mut rows = world
            .query::<(&u32, Option<&&str>)>()
            .iter()
            .map(|(e, (n, label))| (e, *n, label.copied()))
            .collect::<Vec<_>>();
        rows.sort_by_key(|(_, n, _)| *n);
        assert_eq!(rows, vec![(a, 1, Some("a")), (b, 2, None)]);
    }

    #[test]
    fn optional_mut_writes_present_rows() {
        let mut world = World::new();
        let a = world.spawn((1u32, 10i64));
        world.spawn((2u32,));

        for (_, (_, value)) in world.query_mut::<(&u32, Option<&mut i64>)>() {
            if let Some(value) = value {
                *value *= 3;
            }
        }
        assert_eq!(*world.get::<i64>(a).unwrap(), 30);
    }

    #[test]
    fn unit_query_visits_every_entity() {
        let mut world = World::new();
        world.spawn((1u32,));
        world.spawn(("x",));
        world.spawn(());
        assert_eq!(world.query::<()>().iter().count(), 3);
    }

    #[test]
    fn borrow_held_until_drop() {
        let mut world = World::new();
        world.spawn((1u32,));
        {
            let mut query = world.query::<&mut u32>();
            assert_eq!(query.iter().count(), 1);
            // Iterating again reuses the borrows already held.
            assert_eq!(query.iter().count(), 1);
            let archetype = world.archetypes().last().unwrap();
            assert_eq!(
                archetype.borrow_state::<u32>(),
                Some(BorrowState::Exclusive)
            );
        }
        let archetype = world.archetypes().last().unwrap();
        assert_eq!(
            archetype.borrow_state::<u32>(),
            Some(BorrowState::Unborrowed)
        );
    }

    #[test]
    #[should_panic(expected = "already borrowed")]
    fn conflicting_queries_panic() {
        let mut world = World::new();
        world.spawn((1u32,));
        let mut reader = world.query::<&u32>();
        let _rows = reader.iter();
        let mut writer = world.query::<&mut u32>();
        writer.iter();
    }

    #[test]
    fn conflict_in_later_archetype_releases_earlier_ones() {
        let mut world = World::new();
        world.spawn((1u32,));
        let held = world.spawn((2u32, true));

        let exclusive = world.get_mut::<u32>(held).unwrap();
        let result = catch_unwind(AssertUnwindSafe(|| world.query::<&u32>().iter().count()));
        assert!(result.is_err());
        drop(exclusive);

        for archetype in world.archetypes().filter(|a| a.has::<u32>()) {
            assert_eq!(archetype.borrow_state::<u32>(), Some(BorrowState::Unborrowed));
        }
        assert_eq!(world.query::<&mut u32>().iter().count(), 2);
    }

    #[test]
    fn aliasing_tuple_releases_first_element() {
        let mut world = World::new();
        world.spawn((1u32,));
        let result = catch_unwind(AssertUnwindSafe(|| {
            world.query::<(&mut u32, &u32)>().iter().count()
        }));
        assert!(result.is_err());

        let archetype = world.archetypes().last().unwrap();
        assert_eq!(archetype.borrow_state::<u32>(), Some(BorrowState::Unborrowed));
        assert_eq!(world.query::<&mut u32>().iter().count(), 1);
    }

    #[test]
    #[should_panic(expected = "already borrowed")]
    fn aliasing_query_mut_panics() {
        let mut world = World::new();
        world.spawn((1u32,));
        world.query_mut::<(&mut u32, &u32)>();
    }
}
