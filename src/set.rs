//! Minimal unordered set used for node label collections.

use std::collections::HashSet;
use std::hash::Hash;

/// Unordered collection of unique items.
///
/// Iteration order is unspecified. Callers that expose an ordering must go
/// through [`Set::sorted`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Set<T: Eq + Hash> {
    inner: HashSet<T>,
}

impl<T: Eq + Hash> Set<T> {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self {
            inner: HashSet::new(),
        }
    }

    /// Inserts `item`, returning `false` if it was already present.
    pub fn add(&mut self, item: T) -> bool {
        self.inner.insert(item)
    }

    /// Removes `item`, returning whether it was present.
    pub fn remove(&mut self, item: &T) -> bool {
        self.inner.remove(item)
    }

    /// Membership test.
    pub fn contains<Q>(&self, item: &Q) -> bool
    where
        T: std::borrow::Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.inner.contains(item)
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if the set holds no items.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterates in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.inner.iter()
    }
}

impl<T: Eq + Hash + Clone> Set<T> {
    /// Copies the items out in unspecified order.
    pub fn to_vec(&self) -> Vec<T> {
        self.inner.iter().cloned().collect()
    }
}

impl<T: Eq + Hash + Clone + Ord> Set<T> {
    /// Copies the items out in ascending order.
    pub fn sorted(&self) -> Vec<T> {
        let mut items = self.to_vec();
        items.sort();
        items
    }
}

impl<T: Eq + Hash> Default for Set<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Eq + Hash> FromIterator<T> for Set<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

impl<T: Eq + Hash> Extend<T> for Set<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.inner.extend(iter);
    }
}
