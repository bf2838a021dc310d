use std::any::{Any, TypeId};
use std::cell::UnsafeCell;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Marker trait for types that can be stored as ECS components.
pub trait Component: 'static + Send + Sync {}

/// Blanket implementation: any `'static + Send + Sync` type is a valid component.
impl<T: 'static + Send + Sync> Component for T {}

/// Metadata needed to store a component type without knowing it statically.
///
/// Ordered by `TypeId`, which is the sort key for archetype columns.
#[derive(Clone, Copy)]
pub struct TypeInfo {
    id: TypeId,
    name: &'static str,
    new_column: fn() -> Box<dyn Column>,
}

impl TypeInfo {
    pub fn of<T: Component>() -> Self {
        fn new_column<T: Component>() -> Box<dyn Column> {
            Box::new(TypedColumn::<T>::new())
        }

        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            new_column: new_column::<T>,
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn new_column(&self) -> Box<dyn Column> {
        (self.new_column)()
    }
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypeInfo").field(&self.name).finish()
    }
}

impl PartialEq for TypeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeInfo {}

impl PartialOrd for TypeInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TypeInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Hash for TypeInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Sort by `TypeId` and reject sets that name a type twice.
pub(crate) fn sorted_type_infos(mut types: Vec<TypeInfo>) -> Vec<TypeInfo> {
    types.sort_unstable();
    if let Some(pair) = types.windows(2).find(|pair| pair[0] == pair[1]) {
        panic!(
            "duplicate {} components; each type must occur at most once",
            pair[0].name
        );
    }
    types
}

/// Type-erased column interface. One column holds every value of one component
/// type within an archetype, indexed by row.
pub(crate) trait Column: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn len(&self) -> usize;
    /// Swap-remove `row`, dropping its value.
    fn swap_remove(&mut self, row: usize);
    /// Swap-remove `row` and push its value onto `target`, which must store the same type.
    fn move_row(&mut self, row: usize, target: &mut dyn Column);
    fn clear(&mut self);
}

/// Dense storage for a single component type.
///
/// Each value sits in its own `UnsafeCell` so distinct rows can be handed out
/// mutably while the column itself is only shared.
pub(crate) struct TypedColumn<T> {
    cells: Vec<UnsafeCell<T>>,
}

// SAFETY: cells are only reached through `&mut self` or while the owning archetype
// holds the matching `ColumnBorrow`, which rules out aliased mutable access.
unsafe impl<T: Component> Sync for TypedColumn<T> {}

impl<T: Component> TypedColumn<T> {
    pub fn new() -> Self {
        Self { cells: Vec::new() }
    }

    pub fn cells(&self) -> &[UnsafeCell<T>] {
        &self.cells
    }

    pub fn push(&mut self, value: T) {
        self.cells.push(UnsafeCell::new(value));
    }

    /// Overwrite the value at `row`, dropping the old one.
    pub fn replace(&mut self, row: usize, value: T) {
        *self.cells[row].get_mut() = value;
    }

    /// Swap-remove `row` and hand its value back.
    pub fn take(&mut self, row: usize) -> T {
        self.cells.swap_remove(row).into_inner()
    }
}

impl<T: Component> Column for TypedColumn<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn len(&self) -> usize {
        self.cells.len()
    }

    fn swap_remove(&mut self, row: usize) {
        self.cells.swap_remove(row);
    }

    fn move_row(&mut self, row: usize, target: &mut dyn Column) {
        let value = self.cells.swap_remove(row);
        target
            .as_any_mut()
            .downcast_mut::<TypedColumn<T>>()
            .expect("component type mismatch")
            .cells
            .push(value);
    }

    fn clear(&mut self) {
        self.cells.clear();
    }
}

/// Receives the components of a [`Bundle`] one at a time.
pub trait ComponentSink {
    fn put<T: Component>(&mut self, component: T);
}

/// Hands out components to rebuild a [`Bundle`].
pub trait ComponentSource {
    fn take<T: Component>(&mut self) -> T;
}

/// A statically known set of components, spawned, inserted, or removed together.
///
/// Implemented for tuples of up to 8 components and for `()`.
pub trait Bundle: 'static {
    /// Component types in this bundle, sorted by `TypeId`.
    ///
    /// # Panics
    /// If the same component type occurs twice.
    fn type_infos() -> Vec<TypeInfo>;

    /// Move every component into `sink`.
    fn put(self, sink: &mut impl ComponentSink);

    /// Rebuild the bundle from `source`.
    fn take(source: &mut impl ComponentSource) -> Self;
}

macro_rules! impl_bundle_tuple {
    ($($name:ident),*) => {
        #[allow(non_snake_case, unused_variables)]
        impl<$($name: Component),*> Bundle for ($($name,)*) {
            fn type_infos() -> Vec<TypeInfo> {
                let types: Vec<TypeInfo> = vec![$(TypeInfo::of::<$name>()),*];
                sorted_type_infos(types)
            }

            fn put(self, sink: &mut impl ComponentSink) {
                let ($($name,)*) = self;
                $(sink.put($name);)*
            }

            fn take(source: &mut impl ComponentSource) -> Self {
                ($(source.take::<$name>(),)*)
            }
        }
    };
}

impl_bundle_tuple!();
impl_bundle_tuple!(A);
impl_bundle_tuple!(A, B);
impl_bundle_tuple!(A, B, C);
impl_bundle_tuple!(A, B, C, D);
impl_bundle_tuple!(A, B, C, D, E);
impl_bundle_tuple!(A, B, C, D, E, F);
impl_bundle_tuple!(A, B, C, D, E, F, G);
impl_bundle_tuple!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_infos_sorted() {
        let types = <(u8, String, f64)>::type_infos();
        assert_eq!(types.len(), 3);
        assert!(types.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(<()>::type_infos().is_empty());
    }

    #[test]
    #[should_panic(expected = "duplicate")]
    fn duplicate_types_rejected() {
        <(u32, u32)>::type_infos();
    }

    #[test]
    fn column_swap_remove() {
        let mut col = TypedColumn::new();
        col.push('a');
        col.push('b');
        col.push('c');
        col.swap_remove(0);
        assert_eq!(col.len(), 2);
        assert_eq!(col.take(0), 'c');
        assert_eq!(col.take(0), 'b');
    }

    #[test]
    fn column_move_row() {
        let mut from = TypedColumn::new();
        let mut to = TypedColumn::<String>::new();
        from.push("x".to_string());
        from.push("y".to_string());
        from.move_row(0, &mut to);
        assert_eq!(from.len(), 1);
        assert_eq!(to.take(0), "x");
        assert_eq!(from.take(0), "y");
    }

    #[test]
    fn column_replace_drops_old() {
        let mut col = TypedColumn::new();
        col.push(vec![1, 2]);
        col.replace(0, vec![3]);
        assert_eq!(col.take(0), vec![3]);
    }
}
