use std::any::{type_name, TypeId};
use std::cell::UnsafeCell;

use crate::borrow::{BorrowState, ColumnBorrow};
use crate::component::{Column, Component, ComponentSink, ComponentSource, TypeInfo, TypedColumn};
use crate::error::BorrowConflict;
use crate::type_map::{OrderedTypeIdMap, TypeIdMap};

/// Storage for every entity that has exactly one particular set of component types.
///
/// Components are stored column by column, one dense column per type, with row `i`
/// of every column belonging to `entities[i]`. Removal swaps the last row into the
/// hole so columns never contain gaps.
pub struct Archetype {
    types: Vec<TypeInfo>,
    index: OrderedTypeIdMap<usize>,
    len: u32,
    entities: Vec<u32>,
    /// One column per type, in the same order as `types`.
    data: Box<[Data]>,
    /// Archetype reached by removing a component set, keyed by the set's type.
    pub(crate) remove_edges: TypeIdMap<u32>,
    /// Archetype reached by inserting a component set, keyed by the set's type.
    pub(crate) insert_edges: TypeIdMap<u32>,
}

struct Data {
    state: ColumnBorrow,
    column: Box<dyn Column>,
}

impl Archetype {
    /// `types` must be sorted by `TypeId` and free of duplicates.
    pub(crate) fn new(types: Vec<TypeInfo>) -> Self {
        debug_assert!(
            types.windows(2).all(|pair| pair[0] < pair[1]),
            "type info is unsorted or duplicated"
        );
        let data = types
            .iter()
            .map(|ty| Data {
                state: ColumnBorrow::new(),
                column: ty.new_column(),
            })
            .collect();

        Self {
            index: OrderedTypeIdMap::new(types.iter().enumerate().map(|(i, ty)| (ty.id(), i))),
            types,
            len: 0,
            entities: Vec::new(),
            data,
            remove_edges: TypeIdMap::default(),
            insert_edges: TypeIdMap::default(),
        }
    }

    /// Whether this archetype contains `T` components.
    pub fn has<T: Component>(&self) -> bool {
        self.has_dynamic(TypeId::of::<T>())
    }

    /// Whether this archetype contains components with the type identified by `id`.
    pub fn has_dynamic(&self, id: TypeId) -> bool {
        self.index.contains_key(&id)
    }

    /// Column position of `T`, if present.
    pub(crate) fn get_state<T: Component>(&self) -> Option<usize> {
        self.index.get(&TypeId::of::<T>()).copied()
    }

    /// The cells of the `T` column found by [`get_state`](Archetype::get_state).
    pub(crate) fn get_base<T: Component>(&self, state: usize) -> &[UnsafeCell<T>] {
        self.data[state]
            .column
            .as_any()
            .downcast_ref::<TypedColumn<T>>()
            .expect("component type mismatch")
            .cells()
    }

    fn column_mut<T: Component>(&mut self, state: usize) -> &mut TypedColumn<T> {
        self.data[state]
            .column
            .as_any_mut()
            .downcast_mut::<TypedColumn<T>>()
            .expect("component type mismatch")
    }

    pub(crate) fn try_borrow<T: Component>(&self, state: usize) -> Result<(), BorrowConflict> {
        debug_assert_eq!(self.types[state].id(), TypeId::of::<T>());
        if self.data[state].state.borrow() {
            Ok(())
        } else {
            Err(BorrowConflict::Shared(type_name::<T>()))
        }
    }

    pub(crate) fn try_borrow_mut<T: Component>(&self, state: usize) -> Result<(), BorrowConflict> {
        debug_assert_eq!(self.types[state].id(), TypeId::of::<T>());
        if self.data[state].state.borrow_mut() {
            Ok(())
        } else {
            Err(BorrowConflict::Exclusive(type_name::<T>()))
        }
    }

    pub(crate) fn borrow<T: Component>(&self, state: usize) {
        if let Err(conflict) = self.try_borrow::<T>(state) {
            panic!("{conflict}");
        }
    }

    pub(crate) fn borrow_mut<T: Component>(&self, state: usize) {
        if let Err(conflict) = self.try_borrow_mut::<T>(state) {
            panic!("{conflict}");
        }
    }

    pub(crate) fn release<T: Component>(&self, state: usize) {
        debug_assert_eq!(self.types[state].id(), TypeId::of::<T>());
        self.data[state].state.release();
    }

    pub(crate) fn release_mut<T: Component>(&self, state: usize) {
        debug_assert_eq!(self.types[state].id(), TypeId::of::<T>());
        self.data[state].state.release_mut();
    }

    /// Current borrow state of the `T` column, if this archetype has one.
    pub fn borrow_state<T: Component>(&self) -> Option<BorrowState> {
        let state = self.get_state::<T>()?;
        Some(self.data[state].state.state())
    }

    /// Number of entities in this archetype.
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Whether this archetype contains no entities.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Raw ids of the entities in this archetype, in row order.
    pub fn ids(&self) -> &[u32] {
        &self.entities
    }

    pub(crate) fn entity_id(&self, row: u32) -> u32 {
        self.entities[row as usize]
    }

    pub(crate) fn types(&self) -> &[TypeInfo] {
        &self.types
    }

    /// Enumerate the types of the components stored in this archetype.
    pub fn component_types(&self) -> impl ExactSizeIterator<Item = TypeId> + '_ {
        self.types.iter().map(|ty| ty.id())
    }

    /// Append a row for `id` and return its index.
    ///
    /// Every column must receive exactly one value for the new row within the same
    /// structural operation.
    pub(crate) fn allocate(&mut self, id: u32) -> u32 {
        self.entities.push(id);
        self.len += 1;
        self.len - 1
    }

    /// Swap-remove `row`. Returns the id of the entity moved into `row`, if any.
    ///
    /// With `drop` set, the row's components are dropped here. Otherwise they must
    /// already have been moved out with [`move_row_into`](Archetype::move_row_into)
    /// or taken through a [`RowTaker`].
    pub(crate) fn remove(&mut self, row: u32, drop: bool) -> Option<u32> {
        assert!(row < self.len, "row {row} out of bounds (len {})", self.len);
        let last = self.len - 1;
        for data in self.data.iter_mut() {
            if drop {
                data.column.swap_remove(row as usize);
            }
            debug_assert_eq!(data.column.len(), last as usize, "column left unbalanced");
        }
        self.entities.swap_remove(row as usize);
        self.len = last;
        if row != last {
            Some(self.entities[row as usize])
        } else {
            None
        }
    }

    /// Move every component of `row` that `target` also stores onto the end of
    /// `target`'s columns. Components `target` lacks are left in place.
    pub(crate) fn move_row_into(&mut self, row: u32, target: &mut Archetype) {
        for (ty, data) in self.types.iter().zip(self.data.iter_mut()) {
            if let Some(&target_state) = target.index.get(&ty.id()) {
                data.column
                    .move_row(row as usize, &mut *target.data[target_state].column);
            }
        }
    }

    /// Drop every entity and component.
    pub(crate) fn clear(&mut self) {
        for data in self.data.iter_mut() {
            data.column.clear();
        }
        self.entities.clear();
        self.len = 0;
    }

    #[cfg(test)]
    pub(crate) fn assert_balanced(&self) {
        for (ty, data) in self.types.iter().zip(self.data.iter()) {
            assert_eq!(
                data.column.len(),
                self.len as usize,
                "{} column out of step with entity list",
                ty.name()
            );
        }
    }
}

/// Writes components into `row` of an archetype, overwriting values already
/// present and appending to columns that have not reached `row` yet.
pub(crate) struct RowWriter<'a> {
    pub archetype: &'a mut Archetype,
    pub row: u32,
}

impl ComponentSink for RowWriter<'_> {
    fn put<T: Component>(&mut self, component: T) {
        let row = self.row as usize;
        let state = self
            .archetype
            .get_state::<T>()
            .expect("archetype is missing a bundle component");
        let column = self.archetype.column_mut::<T>(state);
        if row < column.len() {
            column.replace(row, component);
        } else {
            debug_assert_eq!(row, column.len());
            column.push(component);
        }
    }
}

/// Swap-removes components out of `row` of an archetype.
pub(crate) struct RowTaker<'a> {
    pub archetype: &'a mut Archetype,
    pub row: u32,
}

impl ComponentSource for RowTaker<'_> {
    fn take<T: Component>(&mut self) -> T {
        let state = self
            .archetype
            .get_state::<T>()
            .expect("archetype is missing a bundle component");
        self.archetype.column_mut::<T>(state).take(self.row as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Bundle;

    fn spawn_row(archetype: &mut Archetype, id: u32, bundle: impl Bundle) -> u32 {
        let row = archetype.len();
        bundle.put(&mut RowWriter { archetype, row });
        archetype.allocate(id)
    }

    fn read<T: Component + Clone>(archetype: &Archetype, row: u32) -> T {
        let state = archetype.get_state::<T>().unwrap();
        let cells = archetype.get_base::<T>(state);
        unsafe { (*cells[row as usize].get()).clone() }
    }

    #[test]
    fn allocate_and_read() {
        let mut arch = Archetype::new(<(u32, bool)>::type_infos());
        assert_eq!(spawn_row(&mut arch, 7, (123u32, true)), 0);
        assert_eq!(spawn_row(&mut arch, 9, (456u32, false)), 1);
        arch.assert_balanced();
        assert_eq!(arch.len(), 2);
        assert_eq!(arch.ids(), &[7, 9]);
        assert_eq!(read::<u32>(&arch, 1), 456);
        assert!(!read::<bool>(&arch, 1));
        assert!(arch.has::<u32>());
        assert!(!arch.has::<String>());
    }

    #[test]
    fn remove_swaps_last_row_in() {
        let mut arch = Archetype::new(<(u32,)>::type_infos());
        for id in 0..4 {
            spawn_row(&mut arch, id, (id * 10,));
        }
        assert_eq!(arch.remove(1, true), Some(3));
        arch.assert_balanced();
        assert_eq!(arch.ids(), &[0, 3, 2]);
        assert_eq!(read::<u32>(&arch, 1), 30);

        // Removing the last row moves nothing.
        assert_eq!(arch.remove(2, true), None);
        assert_eq!(arch.ids(), &[0, 3]);
    }

    #[test]
    fn remove_only_row() {
        let mut arch = Archetype::new(<(String,)>::type_infos());
        spawn_row(&mut arch, 5, ("solo".to_string(),));
        assert_eq!(arch.remove(0, true), None);
        assert!(arch.is_empty());
        arch.assert_balanced();
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn remove_from_empty_panics() {
        let mut arch = Archetype::new(<(u32,)>::type_infos());
        arch.remove(0, true);
    }

    #[test]
    fn move_row_between_archetypes() {
        let mut small = Archetype::new(<(u32,)>::type_infos());
        let mut big = Archetype::new(<(u32, bool)>::type_infos());
        spawn_row(&mut small, 1, (11u32,));
        spawn_row(&mut small, 2, (22u32,));

        let row = big.len();
        small.move_row_into(0, &mut big);
        (true,).put(&mut RowWriter { archetype: &mut big, row });
        big.allocate(1);
        assert_eq!(small.remove(0, false), Some(2));

        small.assert_balanced();
        big.assert_balanced();
        assert_eq!(read::<u32>(&big, 0), 11);
        assert!(read::<bool>(&big, 0));
        assert_eq!(read::<u32>(&small, 0), 22);
    }

    #[test]
    fn take_row_components() {
        let mut arch = Archetype::new(<(u32, String)>::type_infos());
        spawn_row(&mut arch, 1, (1u32, "one".to_string()));
        let taken = <(String, u32)>::take(&mut RowTaker { archetype: &mut arch, row: 0 });
        assert_eq!(taken, ("one".to_string(), 1));
        assert_eq!(arch.remove(0, false), None);
    }

    #[test]
    fn borrow_tracking() {
        let mut arch = Archetype::new(<(u32,)>::type_infos());
        spawn_row(&mut arch, 0, (1u32,));
        let state = arch.get_state::<u32>().unwrap();

        arch.borrow::<u32>(state);
        arch.borrow::<u32>(state);
        assert_eq!(arch.borrow_state::<u32>(), Some(BorrowState::Shared(2)));
        arch.release::<u32>(state);
        arch.release::<u32>(state);

        arch.borrow_mut::<u32>(state);
        assert_eq!(arch.borrow_state::<u32>(), Some(BorrowState::Exclusive));
        arch.release_mut::<u32>(state);
        assert_eq!(arch.borrow_state::<u32>(), Some(BorrowState::Unborrowed));
    }

    #[test]
    #[should_panic(expected = "already borrowed")]
    fn exclusive_while_shared_panics() {
        let arch = Archetype::new(<(u32,)>::type_infos());
        let state = arch.get_state::<u32>().unwrap();
        arch.borrow::<u32>(state);
        arch.borrow_mut::<u32>(state);
    }

    #[test]
    #[should_panic(expected = "already borrowed uniquely")]
    fn shared_while_exclusive_panics() {
        let arch = Archetype::new(<(u32,)>::type_infos());
        let state = arch.get_state::<u32>().unwrap();
        arch.borrow_mut::<u32>(state);
        arch.borrow::<u32>(state);
    }
}
