//! Stable integer ids for runtime handles
//!
//! Input sources, planes and meshes arrive as shared handles. Consumers want
//! small stable ids (map keys, log output) that stay fixed for as long as the
//! runtime keeps the handle alive. The registry holds only weak references, so
//! it never extends a handle's lifetime, and dead entries are pruned lazily.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::collections::HashMap;
use std::rc::{Rc, Weak};

/// Weakly keyed side table from handle to id.
///
/// Ids come from a monotonic counter and are never handed out twice, even
/// after the original handle died.
#[derive(Debug)]
pub struct IdRegistry<T> {
    entries: HashMap<usize, (Weak<T>, u64)>,
    next_id: u64,
    /// Inserts since the last prune
    churn: usize,
    /// Entries left standing by the last prune
    survivors: usize,
}

impl<T> Default for IdRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> IdRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_id: 1,
            churn: 0,
            survivors: 0,
        }
    }

    /// Id for `handle`, assigned on first sight
    pub fn id_of(&mut self, handle: &Rc<T>) -> u64 {
        let key = Rc::as_ptr(handle) as *const () as usize;
        if let Some((weak, id)) = self.entries.get(&key) {
            // A dead entry at the same address belongs to an older allocation.
            if weak.upgrade().is_some_and(|live| Rc::ptr_eq(&live, handle)) {
                return *id;
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(key, (Rc::downgrade(handle), id));
        self.churn += 1;
        if self.churn > self.survivors {
            self.prune();
        }
        id
    }

    /// Id for `handle` without assigning one
    pub fn get(&self, handle: &Rc<T>) -> Option<u64> {
        let key = Rc::as_ptr(handle) as *const () as usize;
        self.entries
            .get(&key)
            .filter(|(weak, _)| weak.strong_count() > 0)
            .map(|(_, id)| *id)
    }

    /// Drop entries whose handle is gone
    pub fn prune(&mut self) {
        self.entries.retain(|_, (weak, _)| weak.strong_count() > 0);
        self.churn = 0;
        self.survivors = self.entries.len();
    }

    /// Live entries
    pub fn len(&self) -> usize {
        self.entries
            .values()
            .filter(|(weak, _)| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_handle_same_id() {
        let mut registry = IdRegistry::new();
        let handle = Rc::new("left-hand");

        let first = registry.id_of(&handle);
        let second = registry.id_of(&Rc::clone(&handle));

        assert_eq!(first, second);
        assert_eq!(registry.get(&handle), Some(first));
    }

    #[test]
    fn test_distinct_handles_distinct_ids() {
        let mut registry = IdRegistry::new();
        let a = Rc::new(1u32);
        let b = Rc::new(1u32);

        assert_ne!(registry.id_of(&a), registry.id_of(&b));
    }

    #[test]
    fn test_dropped_handles_are_pruned_and_ids_not_reused() {
        let mut registry = IdRegistry::new();
        let first = Rc::new(7u64);
        let first_id = registry.id_of(&first);
        drop(first);

        registry.prune();
        assert!(registry.is_empty());

        let second = Rc::new(7u64);
        assert!(registry.id_of(&second) > first_id);
    }

    #[test]
    fn test_churn_of_short_lived_handles_stays_bounded() {
        let mut registry = IdRegistry::new();
        let held = Rc::new(0u32);
        let held_id = registry.id_of(&held);

        // Keep freed slots occupied so each transient lands at a new address.
        let mut ballast = Vec::new();
        for value in 1..1000u32 {
            let transient = Rc::new(value);
            registry.id_of(&transient);
            drop(transient);
            ballast.push(Rc::new(value));
        }

        assert!(registry.entries.len() <= 4, "{} entries", registry.entries.len());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.id_of(&held), held_id);
    }
}
