use std::collections::{HashMap, VecDeque};

use crate::Amount;
use crate::model::{BalanceUpdate, UserId};

use super::error::BalanceError;

/// A user's cached balance.
///
/// `dirty` is set while the amount differs from the last value handed out
/// for persistence.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UserBalance {
    pub amount: Amount,
    pub dirty: bool,
}

/// In-memory balances with dirty tracking for write-behind sync.
#[derive(Debug, Default)]
pub struct BalanceStore {
    entries: HashMap<UserId, UserBalance>,
    /// Dirty users in the order they became dirty. Holds each user at most once.
    dirty: VecDeque<UserId>,
}

impl BalanceStore {
    pub fn get(&self, user: &str) -> Option<Amount> {
        self.entries.get(user).map(|b| b.amount)
    }

    pub fn contains(&self, user: &str) -> bool {
        self.entries.contains_key(user)
    }

    /// Insert a clean balance. Returns `false` if the user already exists.
    pub fn insert(&mut self, user: UserId, amount: Amount) -> bool {
        if self.entries.contains_key(&user) {
            return false;
        }
        self.entries.insert(
            user,
            UserBalance {
                amount,
                dirty: false,
            },
        );
        true
    }

    /// Add a signed `delta` to the user's balance.
    ///
    /// The stored value is left untouched on error.
    pub fn apply_delta(&mut self, user: &str, delta: Amount) -> Result<Amount, BalanceError> {
        let entry = self
            .entries
            .get_mut(user)
            .ok_or_else(|| BalanceError::UserNotFound(user.to_string()))?;

        let updated = entry
            .amount
            .checked_add(delta)
            .ok_or_else(|| BalanceError::Overflow(user.to_string()))?;

        if updated.is_negative() {
            return Err(BalanceError::InsufficientBalance {
                user: user.to_string(),
                balance: entry.amount,
                requested: -delta,
            });
        }

        entry.amount = updated;
        if !entry.dirty {
            entry.dirty = true;
            self.dirty.push_back(user.to_string());
        }
        Ok(updated)
    }

    /// Snapshot up to `max` dirty balances and clear their flag.
    ///
    /// A delta applied after this call marks the entry dirty again, so it is
    /// picked up by the next drain.
    pub fn drain_dirty(&mut self, max: usize) -> Vec<BalanceUpdate> {
        let mut drained = Vec::with_capacity(max.min(self.dirty.len()));
        while drained.len() < max {
            let Some(user) = self.dirty.pop_front() else {
                break;
            };
            if let Some(entry) = self.entries.get_mut(&user) {
                entry.dirty = false;
                drained.push(BalanceUpdate {
                    user_id: user,
                    amount: entry.amount,
                });
            }
        }
        drained
    }

    /// Flag a user for the next sync, e.g. after a failed write.
    pub fn mark_dirty(&mut self, user: &str) {
        if let Some(entry) = self.entries.get_mut(user) {
            if !entry.dirty {
                entry.dirty = true;
                self.dirty.push_back(user.to_string());
            }
        }
    }

    pub fn dirty_len(&self) -> usize {
        self.dirty.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All balances, sorted by user id.
    pub fn snapshot(&self) -> Vec<BalanceUpdate> {
        let mut all: Vec<_> = self
            .entries
            .iter()
            .map(|(user, b)| BalanceUpdate {
                user_id: user.clone(),
                amount: b.amount,
            })
            .collect();
        all.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        all
    }
}
