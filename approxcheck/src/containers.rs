//! Container data structures shared by the analyses

use unordered::UnorderedMap;

/// A set that remembers the order in which its members were first inserted
#[derive(Clone, Default)]
pub struct InsertionOrderedSet<T: Eq + std::hash::Hash + Ord + Clone> {
    data: Vec<T>,
    revmap: UnorderedMap<T, usize>,
}

impl<T: Eq + std::hash::Hash + Ord + Clone> InsertionOrderedSet<T> {
    pub fn new() -> Self {
        Self {
            data: Default::default(),
            revmap: Default::default(),
        }
    }

    /// Insert `v`, returning its position in insertion order and whether it was newly added.
    /// Re-inserting an existing member is a no-op.
    pub fn insert(&mut self, v: T) -> (usize, bool) {
        if let Some(idx) = self.revmap.get(&v) {
            (*idx, false)
        } else {
            let idx = self.data.len();
            self.data.push(v.clone());
            self.revmap.insert(v, idx);
            (idx, true)
        }
    }

    pub fn contains(&self, v: &T) -> bool {
        self.revmap.contains_key(v)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Iterate in order of insertion
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.data.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
}

impl<T: Eq + std::hash::Hash + Ord + Clone + std::fmt::Debug> std::fmt::Debug
    for InsertionOrderedSet<T>
{
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_set().entries(self.data.iter()).finish()
    }
}

pub mod unordered {
    //! Maps and sets whose iteration order carries no meaning. With the
    //! `deterministic_containers` feature they are backed by ordered storage, so that runs (and
    //! their logs) are reproducible.

    #[cfg(not(feature = "deterministic_containers"))]
    type BaseMap<K, V> = std::collections::HashMap<K, V>;
    #[cfg(feature = "deterministic_containers")]
    type BaseMap<K, V> = std::collections::BTreeMap<K, V>;
    #[cfg(not(feature = "deterministic_containers"))]
    type BaseSet<T> = std::collections::HashSet<T>;
    #[cfg(feature = "deterministic_containers")]
    type BaseSet<T> = std::collections::BTreeSet<T>;

    /// An unordered map
    #[derive(Clone, PartialEq, Eq)]
    pub struct UnorderedMap<K: std::hash::Hash + Ord + Eq, V> {
        map: BaseMap<K, V>,
    }

    impl<K: std::hash::Hash + Ord + Eq, V> UnorderedMap<K, V> {
        pub fn new() -> Self {
            Self {
                map: Default::default(),
            }
        }

        pub fn contains_key<Q: ?Sized>(&self, k: &Q) -> bool
        where
            K: std::borrow::Borrow<Q>,
            Q: std::hash::Hash + Ord + Eq,
        {
            self.map.contains_key(k)
        }

        pub fn get<Q: ?Sized>(&self, k: &Q) -> Option<&V>
        where
            K: std::borrow::Borrow<Q>,
            Q: std::hash::Hash + Ord + Eq,
        {
            self.map.get(k)
        }

        /// Insert `k -> v`, returning the value previously held for `k`, if any
        pub fn insert(&mut self, k: K, v: V) -> Option<V> {
            self.map.insert(k, v)
        }
    }

    impl<K: std::hash::Hash + Ord + Eq, V> Default for UnorderedMap<K, V> {
        fn default() -> Self {
            Self::new()
        }
    }

    /// An unordered set
    #[derive(Clone, PartialEq, Eq)]
    pub struct UnorderedSet<T: std::hash::Hash + Ord + Eq> {
        set: BaseSet<T>,
    }

    impl<T: std::hash::Hash + Ord + Eq> UnorderedSet<T> {
        pub fn new() -> Self {
            Self {
                set: BaseSet::new(),
            }
        }

        /// Add `value`, returning whether it was newly added
        pub fn insert(&mut self, value: T) -> bool {
            self.set.insert(value)
        }

        pub fn contains<Q: ?Sized>(&self, value: &Q) -> bool
        where
            T: std::borrow::Borrow<Q>,
            Q: std::hash::Hash + Ord + Eq,
        {
            self.set.contains(value)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn insertion_order_is_kept() {
        let mut s = InsertionOrderedSet::new();
        assert_eq!(s.insert(30), (0, true));
        assert_eq!(s.insert(10), (1, true));
        assert_eq!(s.insert(30), (0, false));
        assert_eq!(s.insert(20), (2, true));
        assert_eq!(s.as_slice(), &[30, 10, 20]);
        assert!(s.contains(&10));
        assert!(!s.contains(&40));
        assert_eq!(s.len(), 3);
    }
}
