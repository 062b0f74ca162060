//! Slot-indexed registry of live connections.
//!
//! The server stores every accepted connection in a [`SlotRegistry`].  A
//! connection's slot is chosen when it is registered and never moves:
//!
//! ```text
//! identity:   base   base+1   base+2   base+3
//! slots:    [ Some ,  None  ,  Some  ,  Some ]
//!                     ▲
//!                     tombstone – never reused
//! ```
//!
//! Removing a connection leaves a tombstone, so an identity is never handed
//! out twice while its neighbours are alive.  When the last live connection
//! goes away the slot vector is dropped to release memory; what the next
//! identity is afterwards depends on the [`IdentityPolicy`].
//!
//! The registry itself is not synchronised.  The server keeps it behind a
//! single mutex so that appends, removals and snapshots are serialised.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::connection::ConnectionId;

/// Numbering rule applied once the registry becomes empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityPolicy {
    /// Keep counting: the next identity is one past the highest ever issued.
    #[default]
    Monotonic,
    /// Start again at 1 once no connection is alive.
    RestartWhenEmpty,
}

/// Error returned by [`SlotRegistry::register`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection identities exhausted")]
    IdentitiesExhausted,
}

/// Ordered, append-only collection mapping identity → value.
#[derive(Debug)]
pub struct SlotRegistry<T> {
    slots: Vec<Option<T>>,
    /// Identity stored in `slots[0]`.  Kept as `u64` so that the position
    /// one past `u32::MAX` is representable and reported as exhaustion.
    base: u64,
    live: usize,
    policy: IdentityPolicy,
}

impl<T> SlotRegistry<T> {
    pub fn new(policy: IdentityPolicy) -> Self {
        Self {
            slots: Vec::new(),
            base: 1,
            live: 0,
            policy,
        }
    }

    fn identity_at(&self, index: usize) -> Option<ConnectionId> {
        u32::try_from(self.base + index as u64)
            .ok()
            .and_then(ConnectionId::new)
    }

    /// Identity the next [`register`](Self::register) call will assign.
    pub fn next_identity(&self) -> Option<ConnectionId> {
        self.identity_at(self.slots.len())
    }

    /// Appends `value` and returns its identity.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::IdentitiesExhausted`] once `u32::MAX`
    /// identities have been issued.
    pub fn register(&mut self, value: T) -> Result<ConnectionId, RegistryError> {
        let id = self
            .next_identity()
            .ok_or(RegistryError::IdentitiesExhausted)?;
        self.slots.push(Some(value));
        self.live += 1;
        Ok(id)
    }

    fn index_of(&self, id: ConnectionId) -> Option<usize> {
        let offset = u64::from(id.get()).checked_sub(self.base)?;
        usize::try_from(offset)
            .ok()
            .filter(|offset| *offset < self.slots.len())
    }

    /// Returns the live value for `id`, `None` for tombstones and unknown ids.
    pub fn get(&self, id: ConnectionId) -> Option<&T> {
        self.index_of(id).and_then(|i| self.slots[i].as_ref())
    }

    /// Tombstones `id` and returns its value.
    ///
    /// Removing an already-removed identity is a no-op returning `None`, so
    /// the live count is decremented exactly once per connection.
    pub fn remove(&mut self, id: ConnectionId) -> Option<T> {
        let index = self.index_of(id)?;
        let value = self.slots[index].take()?;
        self.live -= 1;
        if self.live == 0 {
            self.release_slots();
        }
        Some(value)
    }

    /// Removes every live value, in identity order, and empties the registry.
    pub fn drain(&mut self) -> Vec<(ConnectionId, T)> {
        let mut drained = Vec::with_capacity(self.live);
        for index in 0..self.slots.len() {
            let Some(id) = self.identity_at(index) else {
                continue;
            };
            if let Some(value) = self.slots[index].take() {
                drained.push((id, value));
            }
        }
        self.live = 0;
        self.release_slots();
        drained
    }

    fn release_slots(&mut self) {
        let next = self.base + self.slots.len() as u64;
        self.slots.clear();
        self.base = match self.policy {
            IdentityPolicy::Monotonic => next,
            IdentityPolicy::RestartWhenEmpty => 1,
        };
    }

    /// Number of live (non-tombstoned) entries.
    pub fn live_count(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Iterates live entries in identity order.
    pub fn iter(&self) -> impl Iterator<Item = (ConnectionId, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(move |(i, slot)| {
            let id = self.identity_at(i)?;
            slot.as_ref().map(|value| (id, value))
        })
    }

    /// Point-in-time copy of every live entry.
    pub fn snapshot(&self) -> Vec<(ConnectionId, T)>
    where
        T: Clone,
    {
        self.iter().map(|(id, value)| (id, value.clone())).collect()
    }
}

impl<T> Default for SlotRegistry<T> {
    fn default() -> Self {
        Self::new(IdentityPolicy::default())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
