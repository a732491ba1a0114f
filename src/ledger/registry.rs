use std::collections::HashSet;

use crate::model::TxId;

/// Transaction ids that have already passed the idempotency check.
///
/// Ids are never removed for the life of the process.
#[derive(Debug, Default)]
pub struct IdempotencyRegistry {
    ids: HashSet<TxId>,
}

impl IdempotencyRegistry {
    /// Record `id` if unseen. Returns `false` when it was already reserved.
    pub fn try_reserve(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        self.ids.insert(id.to_owned())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Load ids that are already persisted.
    pub fn seed(&mut self, ids: impl IntoIterator<Item = TxId>) {
        self.ids.extend(ids);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_reservation_wins() {
        let mut registry = IdempotencyRegistry::default();
        assert!(registry.try_reserve("id-10"));
        assert!(!registry.try_reserve("id-10"));
        assert!(registry.try_reserve("id-11"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn seeded_ids_are_reserved() {
        let mut registry = IdempotencyRegistry::default();
        registry.seed(vec!["a".to_string(), "b".to_string()]);
        assert!(registry.contains("a"));
        assert!(!registry.try_reserve("b"));
        assert!(registry.try_reserve("c"));
    }
}
