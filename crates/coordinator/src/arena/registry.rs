//! Process-wide index of registered inputs.

use std::{collections::HashMap, sync::Arc};

use bitcoin::OutPoint;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use wabisabi_primitives::ids::{AliceId, RoundId};

/// A registered input's entry: where it lives and the lock serializing requests about it.
#[derive(Debug)]
pub(crate) struct AliceEntry {
    pub(crate) id: AliceId,
    pub(crate) round_id: RoundId,
    pub(crate) outpoint: OutPoint,
    lock: Arc<AsyncMutex<()>>,
}

impl AliceEntry {
    /// Waits for exclusive access to this Alice.
    pub(crate) async fn lock(&self) -> OwnedMutexGuard<()> {
        self.lock.clone().lock_owned().await
    }
}

#[derive(Debug, Default)]
struct Index {
    by_outpoint: HashMap<OutPoint, AliceId>,
    by_id: HashMap<AliceId, Arc<AliceEntry>>,
}

/// At most one Alice per outpoint, across all rounds.
#[derive(Debug, Default)]
pub(crate) struct AliceRegistry {
    index: Mutex<Index>,
}

/// A claim on an outpoint taken at the start of input registration.
///
/// Dropping it without calling [`Reservation::commit`] releases the outpoint again.
#[derive(Debug)]
pub(crate) struct Reservation<'a> {
    registry: &'a AliceRegistry,
    entry: Arc<AliceEntry>,
    _guard: OwnedMutexGuard<()>,
    committed: bool,
}

impl Reservation<'_> {
    /// Keeps the registration.
    pub(crate) fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.registry.release(&self.entry.id);
        }
    }
}

impl AliceRegistry {
    /// Claims `outpoint` for a new Alice in `round_id`, holding the Alice's lock.
    ///
    /// Returns `None` if the outpoint is already registered.
    pub(crate) fn reserve(
        &self,
        id: AliceId,
        round_id: RoundId,
        outpoint: OutPoint,
    ) -> Option<Reservation<'_>> {
        let lock = Arc::new(AsyncMutex::new(()));
        let guard = lock
            .clone()
            .try_lock_owned()
            .expect("a freshly created lock is free");
        let entry = Arc::new(AliceEntry {
            id,
            round_id,
            outpoint,
            lock,
        });

        let mut index = self.index.lock();
        if index.by_outpoint.contains_key(&outpoint) {
            return None;
        }
        assert!(
            !index.by_id.contains_key(&id),
            "alice id {id} generated twice"
        );
        index.by_outpoint.insert(outpoint, id);
        index.by_id.insert(id, entry.clone());
        drop(index);

        Some(Reservation {
            registry: self,
            entry,
            _guard: guard,
            committed: false,
        })
    }

    /// Looks up an Alice.
    pub(crate) fn get(&self, id: &AliceId) -> Option<Arc<AliceEntry>> {
        self.index.lock().by_id.get(id).cloned()
    }

    /// Forgets an Alice, freeing its outpoint.
    pub(crate) fn release(&self, id: &AliceId) {
        let mut index = self.index.lock();
        if let Some(entry) = index.by_id.remove(id) {
            index.by_outpoint.remove(&entry.outpoint);
        }
    }

    /// Whether `outpoint` is registered.
    #[cfg(test)]
    pub(crate) fn contains_outpoint(&self, outpoint: &OutPoint) -> bool {
        self.index.lock().by_outpoint.contains_key(outpoint)
    }

    /// Locks the given Alices in id order, skipping those no longer registered.
    pub(crate) async fn lock_many(&self, ids: &[AliceId]) -> Vec<(AliceId, OwnedMutexGuard<()>)> {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = self.get(&id) {
                guards.push((id, entry.lock().await));
            }
        }
        guards
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::hashes::{sha256, Hash};
    use rand::thread_rng;
    use wabisabi_test_utils::bitcoin::generate_outpoint;

    use super::*;

    fn round_id() -> RoundId {
        RoundId::from_hash(sha256::Hash::all_zeros())
    }

    #[test]
    fn outpoint_can_only_be_reserved_once() {
        let registry = AliceRegistry::default();
        let outpoint = generate_outpoint();

        let first = registry
            .reserve(AliceId::random(&mut thread_rng()), round_id(), outpoint)
            .expect("free outpoint");
        assert!(registry
            .reserve(AliceId::random(&mut thread_rng()), round_id(), outpoint)
            .is_none());

        first.commit();
        assert!(registry.contains_outpoint(&outpoint));
    }

    #[test]
    fn dropped_reservation_frees_the_outpoint() {
        let registry = AliceRegistry::default();
        let outpoint = generate_outpoint();
        let id = AliceId::random(&mut thread_rng());

        drop(registry.reserve(id, round_id(), outpoint));
        assert!(!registry.contains_outpoint(&outpoint));
        assert!(registry.get(&id).is_none());
    }
}
