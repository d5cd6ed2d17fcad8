//! Hash container: field -> bytes mapping with random-field sampling.

use bytes::Bytes;
use rand::seq::IteratorRandom;
use std::collections::HashMap;

/// A hash of field/value pairs. Iteration order is unspecified.
#[derive(Debug, Clone, Default)]
pub struct Hash {
    fields: HashMap<Bytes, Bytes>,
}

impl Hash {
    /// Create an empty hash.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fields.
    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true when the hash holds no fields.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Insert or overwrite a field. Returns true when the field was
    /// newly created.
    pub fn insert(&mut self, field: Bytes, value: Bytes) -> bool {
        self.fields.insert(field, value).is_none()
    }

    /// Value of `field`, if present.
    #[inline]
    pub fn get(&self, field: &[u8]) -> Option<&Bytes> {
        self.fields.get(field)
    }

    /// Remove `field`, returning its value.
    #[inline]
    pub fn remove(&mut self, field: &[u8]) -> Option<Bytes> {
        self.fields.remove(field)
    }

    /// Returns true when `field` exists.
    #[inline]
    pub fn contains(&self, field: &[u8]) -> bool {
        self.fields.contains_key(field)
    }

    /// Visit fields; stop when `consumer` returns false.
    pub fn for_each(&self, mut consumer: impl FnMut(&Bytes, &Bytes) -> bool) {
        for (field, value) in &self.fields {
            if !consumer(field, value) {
                break;
            }
        }
    }

    /// Up to `count` distinct random fields.
    pub fn random_fields(&self, count: usize) -> Vec<Bytes> {
        let mut rng = rand::thread_rng();
        self.fields
            .keys()
            .cloned()
            .choose_multiple(&mut rng, count.min(self.fields.len()))
    }

    /// Exactly `count` random fields, sampled with replacement.
    /// Empty when the hash is empty.
    pub fn random_fields_repeating(&self, count: usize) -> Vec<Bytes> {
        if self.fields.is_empty() {
            return Vec::new();
        }
        let mut rng = rand::thread_rng();
        (0..count)
            .filter_map(|_| self.fields.keys().choose(&mut rng).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn insert_counts_new_fields_only() {
        let mut hash = Hash::new();
        assert!(hash.insert(b("f1"), b("v1")));
        assert!(!hash.insert(b("f1"), b("v2")));
        assert_eq!(hash.get(b"f1".as_ref()), Some(&b("v2")));
        assert_eq!(hash.len(), 1);
    }

    #[test]
    fn remove_and_contains() {
        let mut hash = Hash::new();
        hash.insert(b("f"), b("v"));
        assert!(hash.contains(b"f".as_ref()));
        assert_eq!(hash.remove(b"f".as_ref()), Some(b("v")));
        assert!(!hash.contains(b"f".as_ref()));
        assert!(hash.is_empty());
    }

    #[test]
    fn distinct_sampling_is_bounded_and_unique() {
        let mut hash = Hash::new();
        for i in 0..8 {
            hash.insert(b(&format!("f{i}")), b("v"));
        }
        let sample = hash.random_fields(5);
        assert_eq!(sample.len(), 5);
        let unique: std::collections::HashSet<_> = sample.iter().collect();
        assert_eq!(unique.len(), 5);

        assert_eq!(hash.random_fields(100).len(), 8);
    }

    #[test]
    fn repeating_sampling_has_exact_length() {
        let mut hash = Hash::new();
        hash.insert(b("only"), b("v"));
        let sample = hash.random_fields_repeating(4);
        assert_eq!(sample.len(), 4);
        assert!(sample.iter().all(|f| f == &b("only")));

        assert!(Hash::new().random_fields_repeating(3).is_empty());
    }
}
