use std::any::TypeId;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{BuildHasherDefault, Hasher};

/// Small immutable map from `TypeId` to `V`, kept sorted and binary searched.
///
/// Archetypes hold only a handful of component types, so a sorted slice beats a
/// hash table here.
pub(crate) struct OrderedTypeIdMap<V>(Box<[(TypeId, V)]>);

impl<V> OrderedTypeIdMap<V> {
    pub fn new(iter: impl Iterator<Item = (TypeId, V)>) -> Self {
        let mut vals = iter.collect::<Box<[_]>>();
        vals.sort_unstable_by_key(|(id, _)| *id);
        Self(vals)
    }

    fn search(&self, id: &TypeId) -> Option<usize> {
        self.0.binary_search_by_key(id, |(id, _)| *id).ok()
    }

    pub fn contains_key(&self, id: &TypeId) -> bool {
        self.search(id).is_some()
    }

    pub fn get(&self, id: &TypeId) -> Option<&V> {
        self.search(id).map(move |idx| &self.0[idx].1)
    }
}

/// Hasher for maps keyed by a single `TypeId`.
///
/// `TypeId` is already a hash, so its bits are used unchanged.
#[derive(Default)]
pub(crate) struct TypeIdHasher {
    hash: u64,
}

impl Hasher for TypeIdHasher {
    fn write_u64(&mut self, n: u64) {
        self.hash = self.hash.rotate_left(32) ^ n;
    }

    fn write_u128(&mut self, n: u128) {
        self.write_u64(n as u64);
    }

    fn write(&mut self, bytes: &[u8]) {
        // Only reached if `TypeId` hashes as something other than an integer.
        let mut hasher = DefaultHasher::new();
        hasher.write(bytes);
        self.write_u64(hasher.finish());
    }

    fn finish(&self) -> u64 {
        self.hash
    }
}

/// A `HashMap` keyed by `TypeId` that skips rehashing the key.
pub(crate) type TypeIdMap<V> = HashMap<TypeId, V, BuildHasherDefault<TypeIdHasher>>;
