use crate::{entity::CachedEntity, key::Key, tx::TxId, tx::guard::UndoLog};
use std::collections::BTreeMap;

///
/// EntryKey
/// Cache identity: entity name plus key.
///

#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub(super) struct EntryKey {
    pub(super) entity: String,
    pub(super) key: Key,
}

impl EntryKey {
    pub(super) fn new(entity: &str, key: Key) -> Self {
        Self {
            entity: entity.to_string(),
            key,
        }
    }
}

///
/// PendingOp
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum PendingOp {
    Create,
    Update,
    Delete,
}

///
/// PendingEntry
///

#[derive(Clone, Debug)]
pub(super) struct PendingEntry {
    pub(super) op: PendingOp,
    pub(super) entity: CachedEntity,
}

///
/// TxWork
///
/// Pending entries of one transaction, replayed against the store in the
/// order they were first recorded.
///

#[derive(Debug, Default)]
pub(super) struct TxWork {
    entries: BTreeMap<EntryKey, PendingEntry>,
    order: Vec<EntryKey>,
}

impl TxWork {
    pub(super) fn get(&self, key: &EntryKey) -> Option<&PendingEntry> {
        self.entries.get(key)
    }

    pub(super) fn contains(&self, key: &EntryKey) -> bool {
        self.entries.contains_key(key)
    }

    pub(super) fn record(&mut self, key: EntryKey, op: PendingOp, entity: CachedEntity) {
        if !self.entries.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.entries.insert(key, PendingEntry { op, entity });
    }

    pub(super) fn remove(&mut self, key: &EntryKey) -> Option<PendingEntry> {
        self.order.retain(|k| k != key);
        self.entries.remove(key)
    }

    pub(super) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries in replay order.
    pub(super) fn ordered(&self) -> impl Iterator<Item = (&EntryKey, &PendingEntry)> {
        self.order
            .iter()
            .filter_map(|key| self.entries.get(key).map(|entry| (key, entry)))
    }

    /// Pending entries of one entity type.
    pub(super) fn of_entity<'a>(
        &'a self,
        entity: &'a str,
    ) -> impl Iterator<Item = (&'a EntryKey, &'a PendingEntry)> + 'a {
        self.ordered().filter(move |(key, _)| key.entity == entity)
    }

    pub(super) fn into_entries(self) -> impl Iterator<Item = (EntryKey, PendingEntry)> {
        self.entries.into_iter()
    }
}

///
/// AppliedCommit
/// Store writes of a committed transaction, kept until the transaction ends.
///

pub(super) struct AppliedCommit {
    pub(super) undo: UndoLog,
    pub(super) touched: Vec<Touched>,
}

///
/// Touched
/// Cache entry written by an applied commit. `keep` is the instance that
/// stays cached once the writes are undone; created entries are dropped.
///

pub(super) struct Touched {
    pub(super) key: EntryKey,
    pub(super) keep: Option<CachedEntity>,
}

///
/// CacheState
///

#[derive(Default)]
pub(super) struct CacheState {
    pub(super) committed: BTreeMap<EntryKey, CachedEntity>,
    pub(super) pending: BTreeMap<TxId, TxWork>,
    pub(super) applied: BTreeMap<TxId, AppliedCommit>,
    pub(super) next_provisional: u64,
}

impl CacheState {
    /// Pending entry of `key` as seen from `view`.
    pub(super) fn pending_entry(&self, view: Option<TxId>, key: &EntryKey) -> Option<&PendingEntry> {
        view.and_then(|tx| self.pending.get(&tx))
            .and_then(|work| work.get(key))
    }

    pub(super) fn provisional_key(&mut self) -> Key {
        self.next_provisional += 1;
        Key::Provisional(self.next_provisional)
    }
}
