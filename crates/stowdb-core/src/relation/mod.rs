//! One-to-many child collections.
//!
//! A relation list belongs to one parent record. Committed children are
//! discovered page by page from the child store through the foreign key;
//! children added before the parent had a key are held until it is created;
//! mutations inside a transaction stay pending until it commits.

#[cfg(test)]
mod tests;

use crate::{
    cache::{CacheError, TransactionalCache},
    entity::{CachedEntity, Entity, EntityError, EntityRecord, RecordState, RecordStatus},
    error::{Error, ErrorClass, ErrorOrigin},
    key::Key,
    model::RelationModel,
    tx::{
        CommitPhase, TxContext, TxId, TxParticipant,
        guard::{CommitApplyGuard, UndoLog, undo_step},
    },
    value::Value,
};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    marker::PhantomData,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    vec,
};
use thiserror::Error as ThisError;

///
/// RelationError
///

#[derive(Debug, ThisError)]
pub enum RelationError {
    #[error("index {index} is out of range for relation '{relation}' ({len} visible)")]
    IndexOutOfRange {
        relation: String,
        index: usize,
        len: usize,
    },

    #[error("relation '{relation}' holds '{expected}', not '{actual}'")]
    WrongChildType {
        relation: String,
        expected: String,
        actual: String,
    },

    #[error("relation '{relation}' needs a single-column parent key ('{entity}')")]
    CompositeParentKey { relation: String, entity: String },

    #[error("entity is not a member of relation '{relation}'")]
    NotAMember { relation: String },

    #[error("relation '{relation}' is not attached to a cache")]
    Unbound { relation: String },
}

impl RelationError {
    pub(crate) const fn class(&self) -> ErrorClass {
        match self {
            Self::IndexOutOfRange { .. } | Self::NotAMember { .. } => ErrorClass::NotFound,
            Self::WrongChildType { .. } => ErrorClass::Validation,
            Self::CompositeParentKey { .. } | Self::Unbound { .. } => ErrorClass::Unsupported,
        }
    }
}

///
/// Member
/// One visible position of a list.
///

#[derive(Clone, Debug)]
enum Member {
    /// Committed child, materialized through the cache on demand.
    Stored(Key),

    /// Live instance not yet written under this parent.
    Live(CachedEntity),
}

///
/// RelationWork
/// Pending mutations of one transaction.
///

#[derive(Debug, Default)]
struct RelationWork {
    added: Vec<CachedEntity>,
    removed: BTreeSet<Key>,
    dropped: BTreeSet<u64>,
}

impl RelationWork {
    fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.dropped.len()
    }
}

#[derive(Default)]
struct RelationInner {
    cache: Weak<TransactionalCache>,
    committed: Vec<Key>,
    exhausted: bool,
    unsaved: Vec<CachedEntity>,
    pending: BTreeMap<TxId, RelationWork>,
    undo: BTreeMap<TxId, UndoLog>,
}

impl RelationInner {
    // store membership changed; rediscover from the first page
    fn reset_discovery(&mut self) {
        self.committed.clear();
        self.exhausted = false;
    }

    fn members(&self, view: Option<TxId>) -> Vec<Member> {
        let work = view.and_then(|tx| self.pending.get(&tx));
        let removed = |key: &Key| work.is_some_and(|w| w.removed.contains(key));
        let dropped = |entity: &CachedEntity| work.is_some_and(|w| w.dropped.contains(&entity.record.id()));

        let mut members: Vec<Member> = self
            .committed
            .iter()
            .filter(|key| !removed(key))
            .cloned()
            .map(Member::Stored)
            .collect();

        if self.exhausted {
            members.extend(
                self.unsaved
                    .iter()
                    .filter(|entity| !dropped(entity))
                    .cloned()
                    .map(Member::Live),
            );
            if let Some(work) = work {
                members.extend(work.added.iter().cloned().map(Member::Live));
            }
        }

        members
    }
}

///
/// RelationState
///
/// Shared state of one relation list of one parent record.
///

pub(crate) struct RelationState {
    this: Weak<Self>,
    name: String,
    model: RelationModel,
    parent: Weak<RecordState>,
    inner: Mutex<RelationInner>,
}

impl RelationState {
    pub(crate) fn new(name: &str, model: RelationModel, parent: Weak<RecordState>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            name: name.to_string(),
            model,
            parent,
            inner: Mutex::new(RelationInner::default()),
        })
    }

    /// Attach to the cache that owns the parent. The first binding wins.
    pub(crate) fn bind(&self, cache: &Weak<TransactionalCache>) {
        let mut inner = self.lock_infallible();
        if inner.cache.strong_count() == 0 {
            inner.cache = cache.clone();
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Visible children, materialized.
    pub(crate) fn entities(&self, ctx: &TxContext) -> Result<Vec<CachedEntity>, Error> {
        let members = self.discover(ctx, None)?;

        let mut out = Vec::with_capacity(members.len());
        for member in members {
            if let Some(entity) = self.materialize(ctx, member)? {
                out.push(entity);
            }
        }

        Ok(out)
    }

    fn count(&self, ctx: &TxContext) -> Result<usize, Error> {
        Ok(self.discover(ctx, None)?.len())
    }

    fn range(&self, ctx: &TxContext, start: usize, len: usize) -> Result<Vec<CachedEntity>, Error> {
        let end = start.saturating_add(len);
        let members = self.discover(ctx, Some(end))?;
        if end > members.len() {
            let visible = self.count(ctx)?;
            return Err(RelationError::IndexOutOfRange {
                relation: self.name.clone(),
                index: end.saturating_sub(1),
                len: visible,
            }
            .into());
        }

        let mut out = Vec::with_capacity(len);
        for member in members.into_iter().skip(start).take(len) {
            let entity = self
                .materialize(ctx, member)?
                .ok_or_else(|| self.not_a_member())?;
            out.push(entity);
        }

        Ok(out)
    }

    fn index_of(&self, ctx: &TxContext, child: &CachedEntity) -> Result<Option<usize>, Error> {
        let key = child.record.key();
        let persisted = child.record.is_persisted();

        Ok(self
            .discover(ctx, None)?
            .iter()
            .position(|member| match member {
                Member::Stored(stored) => persisted && key.as_ref() == Some(stored),
                Member::Live(live) => live.is(&child.record),
            }))
    }

    // Members visible from `ctx`. With `want`, discovery stops once that
    // many committed members are known; otherwise every page is read.
    fn discover(&self, ctx: &TxContext, want: Option<usize>) -> Result<Vec<Member>, Error> {
        let view = ctx.view()?;
        let page_size = self.page_size();

        loop {
            let (offset, cache) = {
                let inner = self.lock()?;
                let members = inner.members(view);
                let enough = want.is_some_and(|n| members.len() >= n);
                if inner.exhausted || enough {
                    return Ok(members);
                }
                (inner.committed.len(), inner.cache.upgrade())
            };

            // a parent without a key has nothing stored under it
            let Some(parent_value) = self.parent_value_if_persisted()? else {
                self.lock()?.exhausted = true;
                continue;
            };
            let cache = cache.ok_or_else(|| self.unbound())?;

            let (keys, exhausted) = cache.scan_keys(
                &self.model.child,
                &self.model.foreign_key,
                &parent_value,
                offset,
                page_size,
            )?;

            let mut inner = self.lock()?;
            if inner.committed.len() == offset {
                inner.committed.extend(keys);
                inner.exhausted = exhausted;
            }
        }
    }

    fn materialize(&self, ctx: &TxContext, member: Member) -> Result<Option<CachedEntity>, Error> {
        match member {
            Member::Live(entity) => Ok(Some(entity)),
            Member::Stored(key) => self.cache()?.read_erased(ctx, &self.model.child, &key),
        }
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    fn add(&self, ctx: &TxContext, child: CachedEntity) -> Result<(), Error> {
        let view = ctx.view()?;
        self.check_child(&child)?;
        if self.index_of(ctx, &child)?.is_some() {
            return Ok(());
        }

        if let Some(tx) = view {
            self.lock()?
                .pending
                .entry(tx)
                .or_default()
                .added
                .push(child);
            return self.enlist(ctx);
        }

        match self.parent_value_if_persisted()? {
            Some(parent_value) => {
                self.attach(&child, &parent_value, None)?;
                self.lock()?.reset_discovery();
            }
            None => self.lock()?.unsaved.push(child),
        }

        Ok(())
    }

    fn remove(&self, ctx: &TxContext, child: &CachedEntity) -> Result<bool, Error> {
        let view = ctx.view()?;
        let Some(index) = self.index_of(ctx, child)? else {
            return Ok(false);
        };
        let member = self
            .discover(ctx, None)?
            .into_iter()
            .nth(index)
            .ok_or_else(|| self.not_a_member())?;

        self.remove_member(ctx, view, member)?;

        Ok(true)
    }

    fn remove_at(&self, ctx: &TxContext, index: usize) -> Result<(), Error> {
        let view = ctx.view()?;
        let members = self.discover(ctx, Some(index.saturating_add(1)))?;
        let Some(member) = members.into_iter().nth(index) else {
            return Err(RelationError::IndexOutOfRange {
                relation: self.name.clone(),
                index,
                len: self.count(ctx)?,
            }
            .into());
        };

        self.remove_member(ctx, view, member)
    }

    fn remove_member(&self, ctx: &TxContext, view: Option<TxId>, member: Member) -> Result<(), Error> {
        if let Some(tx) = view {
            {
                let mut inner = self.lock()?;
                let work = inner.pending.entry(tx).or_default();
                match member {
                    Member::Stored(key) => {
                        work.removed.insert(key);
                    }
                    Member::Live(live) => {
                        let before = work.added.len();
                        work.added.retain(|added| !added.is(&live.record));
                        if work.added.len() == before {
                            work.dropped.insert(live.record.id());
                        }
                    }
                }
            }
            return self.enlist(ctx);
        }

        match member {
            Member::Stored(key) => {
                let cache = self.cache()?;
                if let Some(child) = cache.read_erased(ctx, &self.model.child, &key)? {
                    cache.delete_entity(ctx, child)?;
                }
                self.lock()?.reset_discovery();
            }
            Member::Live(live) => {
                self.lock()?
                    .unsaved
                    .retain(|held| !held.is(&live.record));
            }
        }

        Ok(())
    }

    /// Remove every visible child. Used by parent deletion as the cascade.
    pub(crate) fn clear(&self, ctx: &TxContext) -> Result<(), Error> {
        let view = ctx.view()?;
        let members = self.discover(ctx, None)?;

        if let Some(tx) = view {
            if members.is_empty() {
                return Ok(());
            }
            {
                let mut inner = self.lock()?;
                let unsaved: Vec<u64> = inner.unsaved.iter().map(|e| e.record.id()).collect();
                let work = inner.pending.entry(tx).or_default();
                work.added.clear();
                work.dropped.extend(unsaved);
                work.removed.extend(members.into_iter().filter_map(|member| match member {
                    Member::Stored(key) => Some(key),
                    Member::Live(_) => None,
                }));
            }
            return self.enlist(ctx);
        }

        let stored: Vec<Key> = members
            .into_iter()
            .filter_map(|member| match member {
                Member::Stored(key) => Some(key),
                Member::Live(_) => None,
            })
            .collect();

        if !stored.is_empty() {
            let cache = self.cache()?;
            for key in &stored {
                if let Some(child) = cache.read_erased(ctx, &self.model.child, key)? {
                    cache.delete_entity(ctx, child)?;
                }
            }
        }

        let mut inner = self.lock()?;
        inner.unsaved.clear();
        inner.reset_discovery();

        Ok(())
    }

    fn update(&self, ctx: &TxContext, child: CachedEntity) -> Result<(), Error> {
        if self.index_of(ctx, &child)?.is_none() {
            return Err(self.not_a_member());
        }
        if !child.record.is_persisted() {
            // written when the parent or the transaction commits
            return Ok(());
        }

        self.cache()?.update_entity(ctx, child)
    }

    /// Write children held for an unsaved parent, now that it has a key.
    pub(crate) fn flush_unsaved(&self) -> Result<UndoLog, Error> {
        let unsaved = {
            let mut inner = self.lock()?;
            inner.reset_discovery();
            std::mem::take(&mut inner.unsaved)
        };
        if unsaved.is_empty() {
            return Ok(UndoLog::default());
        }

        let parent_value = self.parent_value()?;
        let mut guard = CommitApplyGuard::new("relation");
        for child in &unsaved {
            let created = !child.record.is_persisted();
            let nested = self.attach(child, &parent_value, None)?;
            if created {
                self.record_undo(&mut guard, child);
            }
            guard.record_rollback(move || nested.run());
        }

        guard.finish()
    }

    // Write `child` under the parent: create it (with its own held
    // children), or re-point a stored one.
    fn attach(
        &self,
        child: &CachedEntity,
        parent_value: &Value,
        view: Option<TxId>,
    ) -> Result<UndoLog, Error> {
        let cache = self.cache()?;
        child
            .record
            .set_column(&self.model.foreign_key, parent_value.clone())?;

        if child.record.is_persisted() {
            cache.rewrite(child, view)?;
            return Ok(UndoLog::default());
        }

        cache.persist(child, view)?;
        cache.flush_children(&child.record)
    }

    fn record_undo(&self, guard: &mut CommitApplyGuard, child: &CachedEntity) {
        let Ok(cache) = self.cache() else {
            return;
        };
        let Some(key) = child.record.key() else {
            return;
        };
        let schema = Arc::clone(&self.model.child);
        let record = child.record.clone();
        let assigned = schema.store_assigns_identity();
        let weak = Arc::downgrade(&cache);

        guard.record_rollback(move || {
            if let Some(cache) = weak.upgrade() {
                undo_step(
                    "delete attached child",
                    schema.name(),
                    cache.store().delete(&schema, &key),
                );
                cache.evict(schema.name(), &key);
            }
            record.mark_new(assigned);
        });
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn lock(&self) -> Result<MutexGuard<'_, RelationInner>, Error> {
        self.inner
            .lock()
            .map_err(|_| Error::poisoned(ErrorOrigin::Relation, "relation"))
    }

    fn lock_infallible(&self) -> MutexGuard<'_, RelationInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cache(&self) -> Result<Arc<TransactionalCache>, Error> {
        self.lock()?.cache.upgrade().ok_or_else(|| self.unbound())
    }

    fn page_size(&self) -> usize {
        self.lock_infallible()
            .cache
            .upgrade()
            .map_or(crate::config::DEFAULT_PAGE_SIZE, |cache| {
                cache.services().config.relation.page_size
            })
            .max(1)
    }

    fn enlist(&self, ctx: &TxContext) -> Result<(), Error> {
        let this = self.this.upgrade().ok_or_else(|| {
            Error::invariant(ErrorOrigin::Relation, "relation dropped while in use")
        })?;

        ctx.enlist(this)
    }

    fn parent(&self) -> Result<EntityRecord, Error> {
        self.parent
            .upgrade()
            .map(EntityRecord::from_state)
            .ok_or_else(|| {
                Error::invariant(
                    ErrorOrigin::Relation,
                    format!("parent of relation '{}' was dropped", self.name),
                )
            })
    }

    fn parent_value_if_persisted(&self) -> Result<Option<Value>, Error> {
        if self.parent()?.is_persisted() {
            self.parent_value().map(Some)
        } else {
            Ok(None)
        }
    }

    // foreign key value for children of this parent
    fn parent_value(&self) -> Result<Value, Error> {
        let parent = self.parent()?;
        let entity = parent.schema().name().to_string();

        match parent.key() {
            Some(key) if parent.is_persisted() => key.to_value().ok_or_else(|| {
                RelationError::CompositeParentKey {
                    relation: self.name.clone(),
                    entity,
                }
                .into()
            }),
            _ => Err(CacheError::NotPersisted { entity }.into()),
        }
    }

    fn check_child(&self, child: &CachedEntity) -> Result<(), Error> {
        let actual = child.record.schema().name();
        if actual != self.model.child.name() {
            return Err(RelationError::WrongChildType {
                relation: self.name.clone(),
                expected: self.model.child.name().to_string(),
                actual: actual.to_string(),
            }
            .into());
        }
        if child.record.is_deleted() {
            return Err(EntityError::Deleted {
                entity: actual.to_string(),
            }
            .into());
        }

        Ok(())
    }

    fn not_a_member(&self) -> Error {
        RelationError::NotAMember {
            relation: self.name.clone(),
        }
        .into()
    }

    fn unbound(&self) -> Error {
        RelationError::Unbound {
            relation: self.name.clone(),
        }
        .into()
    }
}

impl TxParticipant for RelationState {
    fn phase(&self) -> CommitPhase {
        CommitPhase::Relations
    }

    // runs after the entity phase, so a parent created in the same
    // transaction already has its store key
    fn commit(&self, tx: TxId) -> Result<(), Error> {
        let Some(mut work) = self.lock()?.pending.remove(&tx) else {
            return Ok(());
        };
        let mut guard = CommitApplyGuard::new("relation");

        for key in &work.removed {
            let cache = self.cache()?;
            let Some(child) = cache.read_erased(&TxContext::none(), &self.model.child, key)? else {
                continue;
            };
            let previous = cache.delete_committed(&child)?;

            let schema = Arc::clone(&self.model.child);
            let store = Arc::clone(cache.store());
            let record = child.record.clone();
            guard.record_rollback(move || {
                if let Some(previous) = previous {
                    undo_step(
                        "restore removed child",
                        schema.name(),
                        store.create(&schema, previous),
                    );
                }
                record.set_status(RecordStatus::Persisted);
            });
        }

        // a parent that never got a key keeps its additions held
        let held = if self.parent()?.is_persisted() {
            Vec::new()
        } else {
            std::mem::take(&mut work.added)
        };

        if !work.added.is_empty() {
            let cache = self.cache()?;
            let parent_value = self.parent_value()?;
            for child in &work.added {
                let previous = match child.record.key() {
                    Some(key) if child.record.is_persisted() => cache
                        .store()
                        .read(&self.model.child, &key)?
                        .map(|row| (key, row)),
                    _ => None,
                };
                let nested = self.attach(child, &parent_value, Some(tx))?;

                match previous {
                    Some((key, row)) => {
                        let schema = Arc::clone(&self.model.child);
                        let store = Arc::clone(cache.store());
                        guard.record_rollback(move || {
                            undo_step(
                                "restore child row",
                                schema.name(),
                                store.update(&schema, &key, row),
                            );
                        });
                    }
                    None => self.record_undo(&mut guard, child),
                }
                guard.record_rollback(move || nested.run());
            }
        }

        let undo = guard.finish()?;
        let changes = work.len() + held.len();
        let mut inner = self.lock()?;
        inner
            .unsaved
            .retain(|entity| !work.dropped.contains(&entity.record.id()));
        inner.unsaved.extend(held);
        inner.reset_discovery();
        inner.undo.insert(tx, undo);
        drop(inner);

        tracing::trace!(relation = %self.name, %tx, changes, "relation committed");

        Ok(())
    }

    fn rollback(&self, tx: TxId) {
        let undo = {
            let mut inner = self.lock_infallible();
            inner.pending.remove(&tx);
            inner.undo.remove(&tx)
        };

        if let Some(undo) = undo {
            undo.run();
            self.lock_infallible().reset_discovery();
        }
    }

    fn finish(&self, tx: TxId) {
        self.lock_infallible().undo.remove(&tx);
    }
}

///
/// RelationManyList
///
/// Typed handle to a parent's child collection. Every operation takes the
/// transaction scope it runs in.
///

pub struct RelationManyList<T> {
    state: Arc<RelationState>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> RelationManyList<T> {
    pub(crate) const fn new(state: Arc<RelationState>) -> Self {
        Self {
            state,
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Append a child. Adding a current member is a no-op.
    pub fn add(&self, ctx: &TxContext, child: &Arc<T>) -> Result<(), Error> {
        self.state.add(ctx, CachedEntity::of(child))
    }

    pub fn add_range<'a>(
        &self,
        ctx: &TxContext,
        children: impl IntoIterator<Item = &'a Arc<T>>,
    ) -> Result<(), Error> {
        for child in children {
            self.add(ctx, child)?;
        }

        Ok(())
    }

    /// Remove a child; false when it was not a member.
    pub fn remove(&self, ctx: &TxContext, child: &Arc<T>) -> Result<bool, Error> {
        self.state.remove(ctx, &CachedEntity::of(child))
    }

    pub fn remove_at(&self, ctx: &TxContext, index: usize) -> Result<(), Error> {
        self.state.remove_at(ctx, index)
    }

    pub fn clear(&self, ctx: &TxContext) -> Result<(), Error> {
        self.state.clear(ctx)
    }

    pub fn index_of(&self, ctx: &TxContext, child: &Arc<T>) -> Result<Option<usize>, Error> {
        self.state.index_of(ctx, &CachedEntity::of(child))
    }

    pub fn contains(&self, ctx: &TxContext, child: &Arc<T>) -> Result<bool, Error> {
        Ok(self.index_of(ctx, child)?.is_some())
    }

    /// Exact visible count; reads every page of committed keys.
    pub fn count(&self, ctx: &TxContext) -> Result<usize, Error> {
        self.state.count(ctx)
    }

    pub fn get(&self, ctx: &TxContext, index: usize) -> Result<Arc<T>, Error> {
        let mut range = self.get_range(ctx, index, 1)?;

        range.pop().ok_or_else(|| self.state.not_a_member())
    }

    /// `len` children from `start`; only those are materialized.
    pub fn get_range(&self, ctx: &TxContext, start: usize, len: usize) -> Result<Vec<Arc<T>>, Error> {
        self.state
            .range(ctx, start, len)?
            .into_iter()
            .map(CachedEntity::downcast)
            .collect()
    }

    /// Persist changes to a member.
    pub fn update(&self, ctx: &TxContext, child: &Arc<T>) -> Result<(), Error> {
        self.state.update(ctx, CachedEntity::of(child))
    }

    pub fn to_vec(&self, ctx: &TxContext) -> Result<Vec<Arc<T>>, Error> {
        self.state
            .entities(ctx)?
            .into_iter()
            .map(CachedEntity::downcast)
            .collect()
    }

    pub fn iter(&self, ctx: &TxContext) -> Result<vec::IntoIter<Arc<T>>, Error> {
        Ok(self.to_vec(ctx)?.into_iter())
    }
}

impl<T> Clone for RelationManyList<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for RelationManyList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationManyList")
            .field("name", &self.state.name)
            .field("child", &self.state.model.child.name())
            .finish_non_exhaustive()
    }
}
