//! Set container with union/intersection/difference and sampling.

use bytes::Bytes;
use rand::seq::IteratorRandom;
use std::collections::{HashMap, HashSet};

/// A set of byte strings.
#[derive(Debug, Clone, Default)]
pub struct Set {
    members: HashSet<Bytes>,
}

impl Set {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a set from initial members.
    pub fn from_members(members: impl IntoIterator<Item = Bytes>) -> Self {
        Self {
            members: members.into_iter().collect(),
        }
    }

    /// Number of members.
    #[inline]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true when the set holds no members.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Add a member. Returns true when it was not already present.
    #[inline]
    pub fn add(&mut self, member: Bytes) -> bool {
        self.members.insert(member)
    }

    /// Remove a member. Returns true when it was present.
    #[inline]
    pub fn remove(&mut self, member: &[u8]) -> bool {
        self.members.remove(member)
    }

    /// Returns true when `member` is in the set.
    #[inline]
    pub fn contains(&self, member: &[u8]) -> bool {
        self.members.contains(member)
    }

    /// All members, in unspecified order.
    pub fn members(&self) -> Vec<Bytes> {
        self.members.iter().cloned().collect()
    }

    /// Visit members; stop when `consumer` returns false.
    pub fn for_each(&self, mut consumer: impl FnMut(&Bytes) -> bool) {
        for member in &self.members {
            if !consumer(member) {
                break;
            }
        }
    }

    /// Up to `count` distinct random members.
    pub fn random_members(&self, count: usize) -> Vec<Bytes> {
        let mut rng = rand::thread_rng();
        self.members
            .iter()
            .cloned()
            .choose_multiple(&mut rng, count.min(self.members.len()))
    }

    /// Exactly `count` random members, sampled with replacement.
    /// Empty when the set is empty.
    pub fn random_members_repeating(&self, count: usize) -> Vec<Bytes> {
        if self.members.is_empty() {
            return Vec::new();
        }
        let mut rng = rand::thread_rng();
        (0..count)
            .filter_map(|_| self.members.iter().choose(&mut rng).cloned())
            .collect()
    }

    /// Union of the given sets.
    pub fn union(sets: &[&Set]) -> Set {
        let mut result = Set::new();
        for set in sets {
            for member in &set.members {
                result.members.insert(member.clone());
            }
        }
        result
    }

    /// Intersection of the given sets. Any empty operand short-circuits
    /// to the empty set.
    pub fn intersect(sets: &[&Set]) -> Set {
        if sets.is_empty() {
            return Set::new();
        }
        let mut counts: HashMap<Bytes, usize> = HashMap::new();
        for set in sets {
            if set.is_empty() {
                return Set::new();
            }
            for member in &set.members {
                *counts.entry(member.clone()).or_insert(0) += 1;
            }
        }
        let needed = sets.len();
        Set {
            members: counts
                .into_iter()
                .filter(|(_, count)| *count == needed)
                .map(|(member, _)| member)
                .collect(),
        }
    }

    /// Difference: members of the first set not present in any of the
    /// rest.
    pub fn diff(sets: &[&Set]) -> Set {
        let Some((first, rest)) = sets.split_first() else {
            return Set::new();
        };
        let mut result = (*first).clone();
        for set in rest {
            for member in &set.members {
                result.members.remove(member);
            }
            if result.is_empty() {
                break;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    fn set_of(members: &[&str]) -> Set {
        Set::from_members(members.iter().map(|s| b(s)))
    }

    fn sorted(set: &Set) -> Vec<Bytes> {
        let mut members = set.members();
        members.sort();
        members
    }

    #[test]
    fn add_counts_new_members_only() {
        let mut set = Set::new();
        assert!(set.add(b("a")));
        assert!(!set.add(b("a")));
        assert!(set.contains(b"a".as_ref()));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn union_collects_everything() {
        let result = Set::union(&[&set_of(&["a", "b"]), &set_of(&["b", "c"])]);
        assert_eq!(sorted(&result), vec![b("a"), b("b"), b("c")]);
    }

    #[test]
    fn intersect_requires_membership_everywhere() {
        let result = Set::intersect(&[&set_of(&["a", "b", "c"]), &set_of(&["b", "c", "d"])]);
        assert_eq!(sorted(&result), vec![b("b"), b("c")]);

        let empty = Set::intersect(&[&set_of(&["a"]), &Set::new()]);
        assert!(empty.is_empty());
    }

    #[test]
    fn diff_is_first_minus_rest() {
        let result = Set::diff(&[
            &set_of(&["a", "b", "c"]),
            &set_of(&["b"]),
            &set_of(&["c", "d"]),
        ]);
        assert_eq!(sorted(&result), vec![b("a")]);
    }

    #[test]
    fn sampling_bounds() {
        let set = set_of(&["a", "b", "c"]);
        assert_eq!(set.random_members(2).len(), 2);
        assert_eq!(set.random_members(10).len(), 3);
        assert_eq!(set.random_members_repeating(5).len(), 5);
        assert!(Set::new().random_members_repeating(5).is_empty());
    }
}
