//! Explicit transaction scopes.
//!
//! A transaction is carried as a `TxContext` value threaded through every
//! cache, record and relation call; nothing is tied to the current thread.
//! Components that hold pending state enlist as participants and are driven
//! through prepare → commit (by phase) or rollback.

pub(crate) mod guard;


use crate::{
    cache::CacheError,
    error::{Error, ErrorOrigin},
};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

static NEXT_TX_ID: AtomicU64 = AtomicU64::new(1);

///
/// TxId
///

#[derive(
    Clone, Copy, Debug, Deserialize, Display, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
#[display("tx#{_0}")]
pub struct TxId(u64);

impl TxId {
    fn next() -> Self {
        Self(NEXT_TX_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

///
/// CommitPhase
///
/// Participants commit in phase order: entity rows first (so new parents
/// have store identities), then relation cascades, then field slots.
///

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum CommitPhase {
    Entities,
    Relations,
    Fields,
}

///
/// TxParticipant
///

pub trait TxParticipant: Send + Sync {
    fn phase(&self) -> CommitPhase;

    /// Check that `tx` can commit; no state may change here.
    fn prepare(&self, _tx: TxId) -> Result<(), Error> {
        Ok(())
    }

    fn commit(&self, tx: TxId) -> Result<(), Error>;

    /// Discard pending state of `tx`, undoing an already applied commit.
    fn rollback(&self, tx: TxId);

    /// The whole transaction committed; drop any undo state.
    fn finish(&self, _tx: TxId) {}
}

///
/// TxStatus
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TxStatus {
    Active,
    Committing,
    Committed,
    RolledBack,
}

struct TxState {
    status: TxStatus,
    participants: Vec<Arc<dyn TxParticipant>>,
}

///
/// Transaction
///

pub struct Transaction {
    id: TxId,
    state: Mutex<TxState>,
}

impl Transaction {
    fn new() -> Self {
        Self {
            id: TxId::next(),
            state: Mutex::new(TxState {
                status: TxStatus::Active,
                participants: Vec::new(),
            }),
        }
    }

    #[must_use]
    pub const fn id(&self) -> TxId {
        self.id
    }

    #[must_use]
    pub fn status(&self) -> TxStatus {
        self.state_infallible().status
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status() == TxStatus::Active
    }

    fn state(&self) -> Result<MutexGuard<'_, TxState>, Error> {
        self.state
            .lock()
            .map_err(|_| Error::poisoned(ErrorOrigin::Transaction, "transaction"))
    }

    fn state_infallible(&self) -> MutexGuard<'_, TxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn closed(&self) -> Error {
        CacheError::TransactionClosed { tx: self.id }.into()
    }

    /// Register a participant once (by identity).
    pub(crate) fn enlist(&self, participant: Arc<dyn TxParticipant>) -> Result<(), Error> {
        let mut state = self.state()?;
        if state.status != TxStatus::Active {
            return Err(self.closed());
        }

        let known = state
            .participants
            .iter()
            .any(|p| std::ptr::addr_eq(Arc::as_ptr(p), Arc::as_ptr(&participant)));
        if !known {
            state.participants.push(participant);
        }

        Ok(())
    }

    /// Prepare and commit every participant; any failure rolls all back.
    pub fn commit(&self) -> Result<(), Error> {
        let mut participants = {
            let mut state = self.state()?;
            if state.status != TxStatus::Active {
                return Err(self.closed());
            }
            state.status = TxStatus::Committing;
            std::mem::take(&mut state.participants)
        };
        participants.sort_by_key(|p| p.phase());

        if let Err(err) = self.apply(&participants) {
            tracing::warn!(tx = %self.id, "commit failed, rolling back: {err}");
            for participant in participants.iter().rev() {
                participant.rollback(self.id);
            }
            self.state_infallible().status = TxStatus::RolledBack;

            return Err(err);
        }

        for participant in &participants {
            participant.finish(self.id);
        }
        self.state_infallible().status = TxStatus::Committed;
        tracing::debug!(tx = %self.id, participants = participants.len(), "transaction committed");

        Ok(())
    }

    fn apply(&self, participants: &[Arc<dyn TxParticipant>]) -> Result<(), Error> {
        for participant in participants {
            participant.prepare(self.id)?;
        }
        for participant in participants {
            participant.commit(self.id)?;
        }

        Ok(())
    }

    /// Discard all pending state. No-op once the transaction has ended.
    pub fn rollback(&self) {
        let participants = {
            let mut state = self.state_infallible();
            if state.status != TxStatus::Active {
                return;
            }
            state.status = TxStatus::RolledBack;
            std::mem::take(&mut state.participants)
        };

        for participant in participants.iter().rev() {
            participant.rollback(self.id);
        }
        tracing::debug!(tx = %self.id, participants = participants.len(), "transaction rolled back");
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

///
/// TxContext
///
/// Scope handle passed to every transactional operation.
/// `TxContext::none()` means "outside any transaction".
///

#[derive(Clone, Debug, Default)]
pub struct TxContext {
    tx: Option<Arc<Transaction>>,
}

impl TxContext {
    #[must_use]
    pub const fn none() -> Self {
        Self { tx: None }
    }

    #[must_use]
    pub const fn transaction(&self) -> Option<&Arc<Transaction>> {
        self.tx.as_ref()
    }

    /// True while the scope's transaction is open.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.is_active())
    }

    #[must_use]
    pub fn tx_id(&self) -> Option<TxId> {
        self.tx.as_ref().map(|tx| tx.id)
    }

    /// The visibility view of this scope. Fails when the scope's
    /// transaction has already ended.
    pub fn view(&self) -> Result<Option<TxId>, Error> {
        match &self.tx {
            None => Ok(None),
            Some(tx) if tx.is_active() => Ok(Some(tx.id)),
            Some(tx) => Err(tx.closed()),
        }
    }

    pub(crate) fn enlist(&self, participant: Arc<dyn TxParticipant>) -> Result<(), Error> {
        match &self.tx {
            Some(tx) => tx.enlist(participant),
            None => Ok(()),
        }
    }
}

///
/// TxScope
///
/// Owning guard of a transaction. Dropping it without `commit` rolls back.
///

#[derive(Debug)]
pub struct TxScope {
    ctx: TxContext,
}

impl TxScope {
    #[must_use]
    pub fn begin() -> Self {
        let tx = Arc::new(Transaction::new());
        tracing::debug!(tx = %tx.id, "transaction started");

        Self {
            ctx: TxContext { tx: Some(tx) },
        }
    }

    #[must_use]
    pub const fn ctx(&self) -> &TxContext {
        &self.ctx
    }

    #[must_use]
    pub fn id(&self) -> TxId {
        self.transaction().id
    }

    fn transaction(&self) -> &Transaction {
        match &self.ctx.tx {
            Some(tx) => tx,
            None => unreachable!("scope always owns a transaction"),
        }
    }

    pub fn commit(self) -> Result<(), Error> {
        self.transaction().commit()
    }

    pub fn rollback(self) {
        self.transaction().rollback();
    }
}

impl Drop for TxScope {
    fn drop(&mut self) {
        self.transaction().rollback();
    }
}
