//! Transactional identity cache.
//!
//! One live instance per `(entity, key)`. Outside a transaction every write
//! goes straight to the store; inside one it is held as a pending entry that
//! only the owning scope sees, and is replayed against the store at commit.

mod entry;


use crate::{
    build::entity_schema,
    config::EngineConfig,
    crypto::{Cipher, KeySource},
    entity::{
        CachedEntity, Entity, EntityError, EntityRecord, EntityType, RecordStatus, Services,
        instantiate, materialize,
    },
    error::{Error, ErrorClass, ErrorOrigin},
    key::Key,
    model::{Row, Schema},
    obs::{EngineEvent, EventSink},
    store::{Command, CommandKind, Store},
    tx::{
        CommitPhase, TxContext, TxId, TxParticipant,
        guard::{CommitApplyGuard, UndoLog, undo_step},
    },
    validate::validate_record,
    value::{OperatorRegistry, Value},
};
use entry::{AppliedCommit, CacheState, EntryKey, PendingOp, Touched, TxWork};
use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};
use thiserror::Error as ThisError;

///
/// CacheError
///

#[derive(Debug, ThisError)]
pub enum CacheError {
    #[error("transaction {tx} is no longer active")]
    TransactionClosed { tx: TxId },

    #[error("cache cannot be cleared inside an active transaction")]
    ClearInTransaction,

    #[error("'{entity}' with key {key} is already cached")]
    DuplicateKey { entity: String, key: Key },

    #[error("'{entity}' has not been persisted")]
    NotPersisted { entity: String },

    #[error("'{entity}' is already persisted or pending creation")]
    AlreadyPersisted { entity: String },
}

impl CacheError {
    pub(crate) const fn class(&self) -> ErrorClass {
        match self {
            Self::TransactionClosed { .. } | Self::ClearInTransaction => ErrorClass::Transaction,
            Self::DuplicateKey { .. } | Self::NotPersisted { .. } | Self::AlreadyPersisted { .. } => {
                ErrorClass::Conflict
            }
        }
    }
}

///
/// CacheBuilder
///

pub struct CacheBuilder {
    store: Arc<dyn Store>,
    config: EngineConfig,
    key_source: Option<Arc<dyn KeySource>>,
    cipher: Option<Arc<dyn Cipher>>,
    operators: Option<Arc<OperatorRegistry>>,
    sink: Option<Arc<dyn EventSink>>,
}

impl CacheBuilder {
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn key_source(mut self, key_source: Arc<dyn KeySource>) -> Self {
        self.key_source = Some(key_source);
        self
    }

    #[must_use]
    pub fn cipher(mut self, cipher: Arc<dyn Cipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    #[must_use]
    pub fn operators(mut self, operators: OperatorRegistry) -> Self {
        self.operators = Some(Arc::new(operators));
        self
    }

    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Validate the configuration and assemble the shared services.
    pub fn build(self) -> Result<Arc<TransactionalCache>, Error> {
        self.config.validate()?;

        let mut services = Services::from_config(self.config);
        if let Some(key_source) = self.key_source {
            services.key_source = key_source;
        }
        if let Some(cipher) = self.cipher {
            services.cipher = cipher;
        }
        if let Some(operators) = self.operators {
            services.operators = operators;
        }
        if let Some(sink) = self.sink {
            services.sink = sink;
        }

        Ok(Arc::new_cyclic(|this| TransactionalCache {
            this: this.clone(),
            store: self.store,
            services,
            state: Mutex::new(CacheState::default()),
        }))
    }
}

///
/// TransactionalCache
///

pub struct TransactionalCache {
    this: Weak<Self>,
    store: Arc<dyn Store>,
    services: Services,
    state: Mutex<CacheState>,
}

impl TransactionalCache {
    #[must_use]
    pub fn builder(store: Arc<dyn Store>) -> CacheBuilder {
        CacheBuilder {
            store,
            config: EngineConfig::default(),
            key_source: None,
            cipher: None,
            operators: None,
            sink: None,
        }
    }

    /// Cache with default configuration and services.
    pub fn new(store: Arc<dyn Store>) -> Result<Arc<Self>, Error> {
        Self::builder(store).build()
    }

    #[must_use]
    pub const fn services(&self) -> &Services {
        &self.services
    }

    #[must_use]
    pub const fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    // ------------------------------------------------------------------
    // Typed API
    // ------------------------------------------------------------------

    /// Fresh instance bound to this cache, declared defaults applied.
    pub fn new_entity<T: EntityType>(&self) -> Result<Arc<T>, Error> {
        let schema = entity_schema::<T>()?;
        let (entity, initialized) = instantiate(&schema, &self.services)?;
        if !initialized {
            entity.record.apply_defaults()?;
        }
        self.bind(&entity.record);

        entity.downcast()
    }

    pub fn create<T: Entity>(&self, ctx: &TxContext, entity: &Arc<T>) -> Result<Key, Error> {
        self.create_entity(ctx, CachedEntity::of(entity))
    }

    pub fn read<T: EntityType>(&self, ctx: &TxContext, key: &Key) -> Result<Option<Arc<T>>, Error> {
        let schema = entity_schema::<T>()?;

        self.read_erased(ctx, &schema, key)?
            .map(CachedEntity::downcast)
            .transpose()
    }

    /// Every entity of `T` visible from `ctx`: stored rows in store order,
    /// then creates pending in the scope.
    pub fn read_all<T: EntityType>(&self, ctx: &TxContext) -> Result<Vec<Arc<T>>, Error> {
        let schema = entity_schema::<T>()?;

        self.read_all_erased(ctx, &schema)?
            .into_iter()
            .map(CachedEntity::downcast)
            .collect()
    }

    pub fn update<T: Entity>(&self, ctx: &TxContext, entity: &Arc<T>) -> Result<(), Error> {
        self.update_entity(ctx, CachedEntity::of(entity))
    }

    /// Delete an entity, cascading into its relation lists first.
    pub fn delete<T: Entity>(&self, ctx: &TxContext, entity: &Arc<T>) -> Result<(), Error> {
        self.delete_entity(ctx, CachedEntity::of(entity))
    }

    /// Delete every entity of `T`, returning how many were removed.
    pub fn delete_all<T: EntityType>(&self, ctx: &TxContext) -> Result<usize, Error> {
        let schema = entity_schema::<T>()?;
        let view = ctx.view()?;

        // nothing to cascade and nothing pending: one bulk store command
        if view.is_none() && schema.relations().next().is_none() {
            self.emit_command(&schema, CommandKind::DeleteAll);
            let removed = self.store.delete_all(&schema)?;

            let mut evicted = Vec::new();
            self.lock()?.committed.retain(|key, entity| {
                let keep = key.entity != schema.name();
                if !keep {
                    evicted.push(entity.record.clone());
                }
                keep
            });
            for record in evicted {
                record.set_status(RecordStatus::Deleted);
            }

            return Ok(removed);
        }

        let entities = self.read_all_erased(ctx, &schema)?;
        let removed = entities.len();
        for entity in entities {
            self.delete_entity(ctx, entity)?;
        }

        Ok(removed)
    }

    /// Number of entities of `T` visible from `ctx`.
    pub fn count<T: EntityType>(&self, ctx: &TxContext) -> Result<usize, Error> {
        let schema = entity_schema::<T>()?;
        let view = ctx.view()?;

        self.emit_command(&schema, CommandKind::Count);
        let stored = self.store.count(&schema)?;

        let Some(tx) = view else {
            return Ok(stored);
        };
        let state = self.lock()?;
        let (mut creates, mut deletes) = (0, 0);
        if let Some(work) = state.pending.get(&tx) {
            for (_, entry) in work.of_entity(schema.name()) {
                match entry.op {
                    PendingOp::Create => creates += 1,
                    PendingOp::Delete => deletes += 1,
                    PendingOp::Update => {}
                }
            }
        }

        Ok((stored + creates).saturating_sub(deletes))
    }

    /// Evict every committed entry; pending entries stay.
    pub fn clear_cache(&self, ctx: &TxContext) -> Result<usize, Error> {
        if ctx.is_active() {
            return Err(CacheError::ClearInTransaction.into());
        }

        let evicted = {
            let mut state = self.lock()?;
            let evicted = state.committed.len();
            state.committed.clear();
            evicted
        };
        self.services
            .sink
            .record(EngineEvent::CacheCleared { evicted });

        Ok(evicted)
    }

    /// True when a committed entry for `key` is held.
    pub fn is_cached<T: EntityType>(&self, key: &Key) -> Result<bool, Error> {
        let schema = entity_schema::<T>()?;
        let entry_key = EntryKey::new(schema.name(), key.clone());

        Ok(self.lock()?.committed.contains_key(&entry_key))
    }

    // ------------------------------------------------------------------
    // Erased operations
    // ------------------------------------------------------------------

    pub(crate) fn create_entity(&self, ctx: &TxContext, entity: CachedEntity) -> Result<Key, Error> {
        let view = ctx.view()?;
        let record = &entity.record;
        let schema = Arc::clone(record.schema());

        match record.status() {
            RecordStatus::New if record.key().is_none() => {}
            RecordStatus::Deleted => return Err(deleted(&schema)),
            RecordStatus::New | RecordStatus::Persisted => {
                return Err(CacheError::AlreadyPersisted {
                    entity: schema.name().to_string(),
                }
                .into());
            }
        }
        self.bind(record);

        let Some(tx) = view else {
            let key = self.persist(&entity, None)?;
            // children held until the parent had a key
            self.flush_children(record)?;

            return Ok(key);
        };

        validate_record(record, view)?;
        let supplied = schema.key_from_row(&record.to_row(view)?)?;
        let key = {
            let mut state = self.lock()?;
            let key = match supplied {
                Some(key) => key,
                None => state.provisional_key(),
            };
            let entry_key = EntryKey::new(schema.name(), key.clone());
            let known = state.committed.contains_key(&entry_key)
                || state.pending.get(&tx).is_some_and(|work| work.contains(&entry_key));
            if known {
                return Err(CacheError::DuplicateKey {
                    entity: schema.name().to_string(),
                    key,
                }
                .into());
            }

            state
                .pending
                .entry(tx)
                .or_default()
                .record(entry_key, PendingOp::Create, entity.clone());
            key
        };
        record.set_pending_key(key.clone());
        self.enlist(ctx)?;

        Ok(key)
    }

    pub(crate) fn read_erased(
        &self,
        ctx: &TxContext,
        schema: &Arc<Schema>,
        key: &Key,
    ) -> Result<Option<CachedEntity>, Error> {
        let view = ctx.view()?;
        let entry_key = EntryKey::new(schema.name(), key.clone());

        {
            let state = self.lock()?;
            if let Some(entry) = state.pending_entry(view, &entry_key) {
                self.hit(schema);
                return Ok(match entry.op {
                    PendingOp::Delete => None,
                    PendingOp::Create | PendingOp::Update => Some(entry.entity.clone()),
                });
            }
            if let Some(entity) = state.committed.get(&entry_key) {
                self.hit(schema);
                return Ok(Some(entity.clone()));
            }
        }

        self.services.sink.record(EngineEvent::CacheMiss {
            entity: schema.name().to_string(),
        });
        self.emit_command(schema, CommandKind::ReadBy);
        let Some(row) = self.store.read(schema, key)? else {
            return Ok(None);
        };

        self.admit(schema, &row, key.clone()).map(Some)
    }

    pub(crate) fn read_all_erased(
        &self,
        ctx: &TxContext,
        schema: &Arc<Schema>,
    ) -> Result<Vec<CachedEntity>, Error> {
        let view = ctx.view()?;

        self.emit_command(schema, CommandKind::ReadAll);
        let rows = self.store.read_all(schema)?;

        let mut out = Vec::new();
        let mut seen = BTreeSet::new();
        for row in rows {
            let Some(key) = schema.key_from_row(&row)? else {
                continue;
            };
            let entry_key = EntryKey::new(schema.name(), key.clone());

            let known = {
                let state = self.lock()?;
                match state.pending_entry(view, &entry_key) {
                    Some(entry) if entry.op == PendingOp::Delete => {
                        seen.insert(entry_key);
                        continue;
                    }
                    Some(entry) => Some(entry.entity.clone()),
                    None => state.committed.get(&entry_key).cloned(),
                }
            };
            seen.insert(entry_key);

            match known {
                Some(entity) => out.push(entity),
                None => out.push(self.admit(schema, &row, key)?),
            }
        }

        if let Some(tx) = view {
            let state = self.lock()?;
            if let Some(work) = state.pending.get(&tx) {
                out.extend(
                    work.of_entity(schema.name())
                        .filter(|(key, entry)| entry.op == PendingOp::Create && !seen.contains(*key))
                        .map(|(_, entry)| entry.entity.clone()),
                );
            }
        }

        Ok(out)
    }

    pub(crate) fn update_entity(&self, ctx: &TxContext, entity: CachedEntity) -> Result<(), Error> {
        let view = ctx.view()?;
        let record = &entity.record;
        let schema = Arc::clone(record.schema());

        if record.is_deleted() {
            return Err(deleted(&schema));
        }
        validate_record(record, view)?;
        let key = record.key().ok_or_else(|| not_persisted(&schema))?;

        let Some(tx) = view else {
            if !record.is_persisted() {
                return Err(not_persisted(&schema));
            }
            self.write_update(&schema, record, &key, None)?;
            self.lock()?
                .committed
                .entry(EntryKey::new(schema.name(), key))
                .or_insert(entity);

            return Ok(());
        };

        {
            let mut state = self.lock()?;
            let entry_key = EntryKey::new(schema.name(), key);
            let work = state.pending.entry(tx).or_default();

            match work.get(&entry_key).map(|entry| entry.op) {
                Some(PendingOp::Create | PendingOp::Update) => {}
                Some(PendingOp::Delete) => return Err(deleted(&schema)),
                None => {
                    if !record.is_persisted() {
                        return Err(not_persisted(&schema));
                    }
                    work.record(entry_key, PendingOp::Update, entity.clone());
                }
            }
        }
        self.enlist(ctx)
    }

    pub(crate) fn delete_entity(&self, ctx: &TxContext, entity: CachedEntity) -> Result<(), Error> {
        let view = ctx.view()?;
        let record = &entity.record;
        let schema = Arc::clone(record.schema());

        if record.is_deleted() {
            return Ok(());
        }
        for relation in record.relation_states() {
            relation.clear(ctx)?;
        }

        let Some(key) = record.key() else {
            // never stored: nothing to remove
            return Ok(());
        };
        let entry_key = EntryKey::new(schema.name(), key.clone());

        let Some(tx) = view else {
            if !record.is_persisted() {
                return Ok(());
            }
            self.emit_command(&schema, CommandKind::DeleteBy);
            self.store.delete(&schema, &key)?;
            record.set_status(RecordStatus::Deleted);
            self.lock()?.committed.remove(&entry_key);

            return Ok(());
        };

        {
            let mut state = self.lock()?;
            let work = state.pending.entry(tx).or_default();

            match work.get(&entry_key).map(|entry| entry.op) {
                Some(PendingOp::Create) => {
                    work.remove(&entry_key);
                    drop(state);
                    record.mark_new(false);

                    return Ok(());
                }
                Some(PendingOp::Delete) => return Ok(()),
                Some(PendingOp::Update) | None => {
                    if !record.is_persisted() {
                        return Ok(());
                    }
                    work.record(entry_key, PendingOp::Delete, entity.clone());
                }
            }
        }
        self.enlist(ctx)
    }

    /// Validate and write a new entity through to the store, caching it as
    /// committed. `view` selects the transactional field values written.
    pub(crate) fn persist(&self, entity: &CachedEntity, view: Option<TxId>) -> Result<Key, Error> {
        let record = &entity.record;
        let schema = Arc::clone(record.schema());

        validate_record(record, view)?;
        let key = self.write_create(&schema, record, view)?;
        self.bind(record);
        self.lock()?
            .committed
            .insert(EntryKey::new(schema.name(), key.clone()), entity.clone());

        Ok(key)
    }

    /// Write the current state of a persisted entity as seen from `view`.
    pub(crate) fn rewrite(&self, entity: &CachedEntity, view: Option<TxId>) -> Result<(), Error> {
        let record = &entity.record;
        let schema = Arc::clone(record.schema());
        let key = match record.key() {
            Some(key) if record.is_persisted() => key,
            _ => return Err(not_persisted(&schema)),
        };

        validate_record(record, view)?;
        self.write_update(&schema, record, &key, view)?;
        self.lock()?
            .committed
            .entry(EntryKey::new(schema.name(), key))
            .or_insert_with(|| entity.clone());

        Ok(())
    }

    /// Delete a persisted entity outside any transaction, returning its
    /// previous row for undo.
    pub(crate) fn delete_committed(&self, entity: &CachedEntity) -> Result<Option<Row>, Error> {
        let record = &entity.record;
        let previous = match record.key() {
            Some(key) if record.is_persisted() => self.store.read(record.schema(), &key)?,
            _ => None,
        };
        self.delete_entity(&TxContext::none(), entity.clone())?;

        Ok(previous)
    }

    /// Keys of stored `schema` rows whose `column` equals `value`, in store
    /// order, skipping `offset` matches and returning at most `limit`.
    /// The flag is true when no further matches exist.
    pub(crate) fn scan_keys(
        &self,
        schema: &Schema,
        column: &str,
        value: &Value,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<Key>, bool), Error> {
        self.emit_command(schema, CommandKind::ReadAll);

        let mut matches = self
            .store
            .read_all(schema)?
            .filter(|row| row.get(column) == Some(value))
            .skip(offset);

        let mut keys = Vec::new();
        for row in matches.by_ref().take(limit) {
            if let Some(key) = schema.key_from_row(&row)? {
                keys.push(key);
            }
        }
        let exhausted = matches.next().is_none();

        Ok((keys, exhausted))
    }

    pub(crate) fn evict(&self, entity: &str, key: &Key) {
        let entry_key = EntryKey::new(entity, key.clone());
        self.lock_infallible().committed.remove(&entry_key);
    }

    /// Persist children that were added to `record`'s relations before it
    /// had a key. Partial failure undoes what was written.
    pub(crate) fn flush_children(&self, record: &EntityRecord) -> Result<UndoLog, Error> {
        let mut log = UndoLog::default();

        for relation in record.relation_states() {
            relation.bind(&self.this);
            match relation.flush_unsaved() {
                Ok(undo) => log.append(undo),
                Err(err) => {
                    log.run();
                    return Err(err);
                }
            }
        }

        Ok(log)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn lock(&self) -> Result<MutexGuard<'_, CacheState>, Error> {
        self.state
            .lock()
            .map_err(|_| Error::poisoned(ErrorOrigin::Cache, "cache"))
    }

    fn lock_infallible(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enlist(&self, ctx: &TxContext) -> Result<(), Error> {
        let this = self.this.upgrade().ok_or_else(|| {
            Error::invariant(ErrorOrigin::Cache, "cache dropped while in use")
        })?;

        ctx.enlist(this)
    }

    fn bind(&self, record: &EntityRecord) {
        for relation in record.relation_states() {
            relation.bind(&self.this);
        }
    }

    fn hit(&self, schema: &Schema) {
        self.services.sink.record(EngineEvent::CacheHit {
            entity: schema.name().to_string(),
        });
    }

    fn emit_command(&self, schema: &Schema, kind: CommandKind) {
        self.services.sink.record(EngineEvent::Command {
            command: Command::for_schema(schema, kind),
        });
    }

    // cache a stored row as committed unless another reader got there first
    fn admit(&self, schema: &Arc<Schema>, row: &Row, key: Key) -> Result<CachedEntity, Error> {
        let entity = materialize(schema, &self.services, row, key.clone(), Arc::clone(&self.store))?;
        self.bind(&entity.record);

        let mut state = self.lock()?;
        Ok(state
            .committed
            .entry(EntryKey::new(schema.name(), key))
            .or_insert(entity)
            .clone())
    }

    fn write_create(
        &self,
        schema: &Schema,
        record: &EntityRecord,
        view: Option<TxId>,
    ) -> Result<Key, Error> {
        self.emit_command(schema, CommandKind::Create);
        let key = self.store.create(schema, record.to_row(view)?)?;
        record.mark_persisted(key.clone(), Arc::clone(&self.store))?;

        Ok(key)
    }

    fn write_update(
        &self,
        schema: &Schema,
        record: &EntityRecord,
        key: &Key,
        view: Option<TxId>,
    ) -> Result<(), Error> {
        self.emit_command(schema, CommandKind::UpdateBy);
        self.store.update(schema, key, record.to_row(view)?)
    }

    fn apply(
        &self,
        tx: TxId,
        work: &TxWork,
        guard: &mut CommitApplyGuard,
    ) -> Result<Vec<Applied>, Error> {
        let mut applied = Vec::with_capacity(work.len());
        for (entry_key, entry) in work.ordered() {
            let record = entry.entity.record.clone();
            let schema = Arc::clone(record.schema());
            let store = Arc::clone(&self.store);

            let key = match entry.op {
                PendingOp::Create => {
                    let assigned = entry_key.key.is_provisional();
                    let key = self.write_create(&schema, &record, Some(tx))?;
                    let (undo_schema, undo_key) = (Arc::clone(&schema), key.clone());
                    guard.record_rollback(move || {
                        undo_step(
                            "delete created row",
                            undo_schema.name(),
                            store.delete(&undo_schema, &undo_key),
                        );
                        record.mark_new(assigned);
                    });
                    key
                }
                PendingOp::Update => {
                    let key = entry_key.key.clone();
                    let previous = self.store.read(&schema, &key)?;
                    self.write_update(&schema, &record, &key, Some(tx))?;
                    if let Some(previous) = previous {
                        let (undo_schema, undo_key) = (Arc::clone(&schema), key.clone());
                        guard.record_rollback(move || {
                            undo_step(
                                "restore updated row",
                                undo_schema.name(),
                                store.update(&undo_schema, &undo_key, previous),
                            );
                        });
                    }
                    key
                }
                PendingOp::Delete => {
                    let key = entry_key.key.clone();
                    let previous = self.store.read(&schema, &key)?;
                    self.emit_command(&schema, CommandKind::DeleteBy);
                    self.store.delete(&schema, &key)?;
                    record.set_status(RecordStatus::Deleted);
                    let undo_schema = Arc::clone(&schema);
                    guard.record_rollback(move || {
                        if let Some(previous) = previous {
                            undo_step(
                                "restore deleted row",
                                undo_schema.name(),
                                store.create(&undo_schema, previous),
                            );
                        }
                        record.set_status(RecordStatus::Persisted);
                    });
                    key
                }
            };

            applied.push(Applied {
                previous: entry_key.clone(),
                current: EntryKey::new(schema.name(), key),
                op: entry.op,
                entity: entry.entity.clone(),
            });
        }

        Ok(applied)
    }
}

///
/// Applied
/// One pending entry after its store write.
///

struct Applied {
    previous: EntryKey,
    current: EntryKey,
    op: PendingOp,
    entity: CachedEntity,
}

impl TxParticipant for TransactionalCache {
    fn phase(&self) -> CommitPhase {
        CommitPhase::Entities
    }

    fn prepare(&self, tx: TxId) -> Result<(), Error> {
        let records: Vec<EntityRecord> = {
            let state = self.lock()?;
            state
                .pending
                .get(&tx)
                .map(|work| {
                    work.ordered()
                        .filter(|(_, entry)| entry.op != PendingOp::Delete)
                        .map(|(_, entry)| entry.entity.record.clone())
                        .collect()
                })
                .unwrap_or_default()
        };

        for record in &records {
            validate_record(record, Some(tx))?;
        }

        Ok(())
    }

    fn commit(&self, tx: TxId) -> Result<(), Error> {
        let Some(work) = self.lock()?.pending.remove(&tx) else {
            return Ok(());
        };

        let mut guard = CommitApplyGuard::new("cache");
        let applied = match self.apply(tx, &work, &mut guard) {
            Ok(applied) => applied,
            Err(err) => {
                drop(guard);
                self.abandon(work);
                return Err(err);
            }
        };
        let mut undo = guard.finish()?;

        {
            let mut state = self.lock()?;
            for entry in &applied {
                state.committed.remove(&entry.previous);
                if entry.op != PendingOp::Delete {
                    state
                        .committed
                        .insert(entry.current.clone(), entry.entity.clone());
                }
            }
        }

        for entry in applied.iter().filter(|e| e.op == PendingOp::Create) {
            match self.flush_children(&entry.entity.record) {
                Ok(log) => undo.append(log),
                Err(err) => {
                    self.stash(tx, undo, &applied);
                    return Err(err);
                }
            }
        }

        self.services.sink.record(EngineEvent::Commit {
            tx,
            operations: applied.len(),
        });
        self.stash(tx, undo, &applied);

        Ok(())
    }

    fn rollback(&self, tx: TxId) {
        let (applied, work) = {
            let mut state = self.lock_infallible();
            (state.applied.remove(&tx), state.pending.remove(&tx))
        };
        let mut discarded = 0;

        if let Some(AppliedCommit { undo, touched }) = applied {
            undo.run();
            discarded += touched.len();
            let mut state = self.lock_infallible();
            for Touched { key, keep } in touched {
                match keep {
                    Some(entity) => state.committed.insert(key, entity),
                    None => state.committed.remove(&key),
                };
            }
        }

        if let Some(work) = work {
            for (_, entry) in work.into_entries() {
                if entry.op == PendingOp::Create {
                    entry.entity.record.mark_new(false);
                }
                discarded += 1;
            }
        }

        self.services
            .sink
            .record(EngineEvent::Rollback { tx, discarded });
    }

    fn finish(&self, tx: TxId) {
        self.lock_infallible().applied.remove(&tx);
    }
}

impl TransactionalCache {
    // a failed replay: writes are undone, entries go back to their
    // pre-transaction state and cached instances stay cached
    fn abandon(&self, work: TxWork) {
        for (_, entry) in work.into_entries() {
            if entry.op == PendingOp::Create {
                entry.entity.record.mark_new(false);
            }
        }
    }

    // keep the undo log until the transaction ends
    fn stash(&self, tx: TxId, undo: UndoLog, applied: &[Applied]) {
        let touched = applied
            .iter()
            .map(|entry| Touched {
                key: entry.current.clone(),
                keep: (entry.op != PendingOp::Create).then(|| entry.entity.clone()),
            })
            .collect();
        self.lock_infallible()
            .applied
            .insert(tx, AppliedCommit { undo, touched });
    }
}

fn deleted(schema: &Schema) -> Error {
    EntityError::Deleted {
        entity: schema.name().to_string(),
    }
    .into()
}

fn not_persisted(schema: &Schema) -> Error {
    CacheError::NotPersisted {
        entity: schema.name().to_string(),
    }
    .into()
}
