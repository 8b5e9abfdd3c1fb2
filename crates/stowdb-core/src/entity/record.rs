use crate::{
    entity::{EntityError, Services},
    error::{Error, ErrorOrigin},
    key::Key,
    model::{Field, FieldRole, Row, Schema},
    obs::EngineEvent,
    relation::{RelationManyList, RelationState},
    serialize::EntitySnapshot,
    store::{Command, CommandKind, Store},
    tx::{CommitPhase, TxContext, TxId, TxParticipant},
    value::{FieldValue, Value},
    wrapper::{
        WrapContext, WrapperKind,
        slot::{self, Access, Cell},
    },
};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

static NEXT_RECORD_ID: AtomicU64 = AtomicU64::new(1);

///
/// RecordStatus
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecordStatus {
    /// Never written to the store.
    New,
    Persisted,
    Deleted,
}

///
/// LazySource
/// Where deferred fields of a persisted record are fetched from.
///

#[derive(Clone)]
struct LazySource {
    store: Arc<dyn Store>,
    key: Key,
}

struct RecordInner {
    cells: Vec<Cell>,
    // per-transaction copies of fields without a transactional stage
    staged: BTreeMap<TxId, BTreeMap<usize, Cell>>,
    status: RecordStatus,
    key: Option<Key>,
    source: Option<LazySource>,
    enlisted: BTreeSet<TxId>,
}

impl RecordInner {
    fn cell(&self, index: usize, view: Option<TxId>) -> &Cell {
        view.and_then(|tx| self.staged.get(&tx))
            .and_then(|cells| cells.get(&index))
            .unwrap_or(&self.cells[index])
    }

    fn cell_mut(&mut self, index: usize, view: Option<TxId>) -> &mut Cell {
        if let Some(cell) = view
            .and_then(|tx| self.staged.get_mut(&tx))
            .and_then(|cells| cells.get_mut(&index))
        {
            return cell;
        }

        &mut self.cells[index]
    }
}

///
/// RecordState
///
/// Shared state behind an `EntityRecord`: one slot cell per schema field,
/// lifecycle status, and the relation lists owned by the instance.
///

pub(crate) struct RecordState {
    id: u64,
    schema: Arc<Schema>,
    services: Services,
    inner: Mutex<RecordInner>,
    relations: BTreeMap<String, Arc<RelationState>>,
}

impl RecordState {
    fn lock(&self) -> Result<MutexGuard<'_, RecordInner>, Error> {
        self.inner
            .lock()
            .map_err(|_| Error::poisoned(ErrorOrigin::Entity, "record"))
    }

    fn lock_infallible(&self) -> MutexGuard<'_, RecordInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TxParticipant for RecordState {
    fn phase(&self) -> CommitPhase {
        CommitPhase::Fields
    }

    // all pending branches of one record move under a single lock
    fn commit(&self, tx: TxId) -> Result<(), Error> {
        let mut inner = self.lock()?;
        if let Some(staged) = inner.staged.remove(&tx) {
            for (index, cell) in staged {
                inner.cells[index] = cell;
            }
        }
        for cell in &mut inner.cells {
            cell.commit(tx);
        }
        inner.enlisted.remove(&tx);

        Ok(())
    }

    fn rollback(&self, tx: TxId) {
        let mut inner = self.lock_infallible();
        inner.staged.remove(&tx);
        for cell in &mut inner.cells {
            cell.rollback(tx);
        }
        inner.enlisted.remove(&tx);
    }
}

///
/// Slot
///

enum Slot<'a> {
    Field(usize, &'a Field),
    Suppressed,
}

///
/// EntityRecord
///
/// Default backing of an entity instance. Cloning shares the same state.
///

#[derive(Clone)]
pub struct EntityRecord {
    state: Arc<RecordState>,
}

impl EntityRecord {
    pub(crate) fn new(schema: Arc<Schema>, services: Services) -> Self {
        let cells = schema
            .slots()
            .iter()
            .map(|field| Cell::for_stages(field.chain().stages()))
            .collect();

        let state = Arc::new_cyclic(|parent: &Weak<RecordState>| RecordState {
            id: NEXT_RECORD_ID.fetch_add(1, Ordering::Relaxed),
            relations: schema
                .relations()
                .filter_map(|field| {
                    let model = field.relation()?.clone();
                    let state = RelationState::new(field.name(), model, parent.clone());
                    Some((field.name().to_string(), state))
                })
                .collect(),
            schema: Arc::clone(&schema),
            services,
            inner: Mutex::new(RecordInner {
                cells,
                staged: BTreeMap::new(),
                status: RecordStatus::New,
                key: None,
                source: None,
                enlisted: BTreeSet::new(),
            }),
        });

        Self { state }
    }

    pub(crate) const fn from_state(state: Arc<RecordState>) -> Self {
        Self { state }
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.state.schema
    }

    #[must_use]
    pub fn services(&self) -> &Services {
        &self.state.services
    }

    /// Process-unique instance id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.state.id
    }

    #[must_use]
    pub fn status(&self) -> RecordStatus {
        self.state.lock_infallible().status
    }

    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.status() == RecordStatus::Persisted
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.status() == RecordStatus::Deleted
    }

    /// Identity key: store-assigned once persisted, provisional while only
    /// pending inside a transaction, `None` before either.
    #[must_use]
    pub fn key(&self) -> Option<Key> {
        self.state.lock_infallible().key.clone()
    }

    // ------------------------------------------------------------------
    // Field access
    // ------------------------------------------------------------------

    /// User-level value of a field as seen from `ctx`.
    /// Suppressed members read as `Null`.
    pub fn get(&self, ctx: &TxContext, name: &str) -> Result<Value, Error> {
        let view = ctx.view()?;
        let (index, field) = match self.slot(name)? {
            Slot::Suppressed => return Ok(Value::Null),
            Slot::Field(index, field) => (index, field),
        };

        let mut inner = self.state.lock()?;
        self.read_cell(&mut inner, index, field, view)
    }

    /// Typed read; fails when the stored value does not convert to `V`.
    pub fn get_as<V: FieldValue>(&self, ctx: &TxContext, name: &str) -> Result<V, Error> {
        let value = self.get(ctx, name)?;

        V::from_value(&value).ok_or_else(|| {
            EntityError::TypeMismatch {
                entity: self.schema().name().to_string(),
                field: name.to_string(),
                expected: std::any::type_name::<V>().to_string(),
                value,
            }
            .into()
        })
    }

    /// Write a field in `ctx`. Writing a suppressed member is a no-op.
    pub fn set(&self, ctx: &TxContext, name: &str, value: impl Into<Value>) -> Result<(), Error> {
        let view = ctx.view()?;
        let value = value.into();
        let (index, field) = match self.slot(name)? {
            Slot::Suppressed => return Ok(()),
            Slot::Field(index, field) => (index, field),
        };

        if !value.conforms_to(field.kind()) {
            return Err(EntityError::type_mismatch(
                self.schema().name(),
                field.name(),
                field.kind(),
                value,
            )
            .into());
        }

        let enlist = {
            let mut inner = self.state.lock()?;
            match inner.status {
                RecordStatus::Deleted => {
                    return Err(EntityError::Deleted {
                        entity: self.schema().name().to_string(),
                    }
                    .into());
                }
                RecordStatus::Persisted if field.is_read_only() => {
                    return Err(EntityError::ReadOnlyField {
                        entity: self.schema().name().to_string(),
                        field: field.name().to_string(),
                    }
                    .into());
                }
                _ => {}
            }

            let pending = self.write_cell(&mut inner, index, field, view, value)?;
            match view {
                Some(tx) if pending => inner.enlisted.insert(tx),
                _ => false,
            }
        };

        if enlist {
            ctx.enlist(Arc::clone(&self.state) as Arc<dyn TxParticipant>)?;
        }

        Ok(())
    }

    /// False while a deferred field has not been fetched yet.
    pub fn is_loaded(&self, name: &str) -> Result<bool, Error> {
        match self.slot(name)? {
            Slot::Suppressed => Ok(true),
            Slot::Field(index, _) => Ok(self.state.lock()?.cells[index].is_loaded()),
        }
    }

    /// Typed handle to a relation list.
    pub fn relation<T: crate::entity::Entity>(
        &self,
        name: &str,
    ) -> Result<RelationManyList<T>, Error> {
        self.state
            .relations
            .get(name)
            .map(|state| RelationManyList::new(Arc::clone(state)))
            .ok_or_else(|| self.unknown_field(name))
    }

    /// Materialize declared defaults into every live field.
    pub fn apply_defaults(&self) -> Result<(), Error> {
        let mut inner = self.state.lock()?;

        for (index, field) in self.schema().slots().iter().enumerate() {
            if matches!(field.role(), FieldRole::Column) && !field.default_value().is_null() {
                let value = field.default_value().clone();
                self.write_cell(&mut inner, index, field, None, value)?;
            }
        }

        Ok(())
    }

    /// Detached graph of this entity and its visible children.
    pub fn snapshot(&self, ctx: &TxContext) -> Result<EntitySnapshot, Error> {
        let mut values = BTreeMap::new();
        for field in self.schema().fields() {
            values.insert(field.name().to_string(), self.get(ctx, field.name())?);
        }

        let mut relations = BTreeMap::new();
        for (name, state) in &self.state.relations {
            let children = state
                .entities(ctx)?
                .iter()
                .map(|child| child.record.snapshot(ctx))
                .collect::<Result<Vec<_>, _>>()?;
            relations.insert(name.clone(), children);
        }

        Ok(EntitySnapshot {
            entity: self.schema().name().to_string(),
            key: self.key(),
            values,
            relations,
        })
    }

    // ------------------------------------------------------------------
    // Engine hooks
    // ------------------------------------------------------------------

    pub(crate) fn relation_states(&self) -> impl Iterator<Item = &Arc<RelationState>> {
        self.state.relations.values()
    }

    /// Storage-form row as seen from `view`; unloaded deferred fields are
    /// left out.
    pub(crate) fn to_row(&self, view: Option<TxId>) -> Result<Row, Error> {
        let inner = self.state.lock()?;
        let mut row = Row::new();

        for (index, field) in self.schema().slots().iter().enumerate() {
            if field.is_relation() {
                continue;
            }
            if let Some(raw) = inner.cell(index, view).raw(view) {
                field.flatten_into(&raw, &mut row);
            }
        }

        Ok(row)
    }

    /// Seed committed state from a stored row. Deferred fields stay
    /// unloaded and fetch from `store` on first access.
    pub(crate) fn hydrate(&self, row: &Row, key: Key, store: Arc<dyn Store>) -> Result<(), Error> {
        let mut inner = self.state.lock()?;

        for (index, field) in self.schema().slots().iter().enumerate() {
            if field.is_relation() {
                continue;
            }
            if let Some(raw) = field.extract(row) {
                inner.cells[index].hydrate(raw);
            }
        }

        inner.status = RecordStatus::Persisted;
        inner.source = Some(LazySource {
            store,
            key: key.clone(),
        });
        inner.key = Some(key);

        Ok(())
    }

    /// Record the store-assigned key after a successful create.
    pub(crate) fn mark_persisted(&self, key: Key, store: Arc<dyn Store>) -> Result<(), Error> {
        let row = self.schema().identity_row(&key)?;
        let mut inner = self.state.lock()?;

        for (index, field) in self.schema().slots().iter().enumerate() {
            if field.is_identity()
                && let Some(raw) = field.extract(&row)
            {
                inner.cells[index].fill(raw);
            }
        }

        inner.status = RecordStatus::Persisted;
        inner.source = Some(LazySource {
            store,
            key: key.clone(),
        });
        inner.key = Some(key);

        Ok(())
    }

    /// Undo of a create: back to a never-stored record. A store-assigned
    /// identity is cleared as well.
    pub(crate) fn mark_new(&self, assigned: bool) {
        let mut inner = self.state.lock_infallible();

        if assigned {
            for (index, field) in self.schema().slots().iter().enumerate() {
                if field.is_identity() {
                    inner.cells[index].fill(Value::Null);
                }
            }
        }
        inner.status = RecordStatus::New;
        inner.source = None;
        inner.key = None;
    }

    pub(crate) fn set_status(&self, status: RecordStatus) {
        self.state.lock_infallible().status = status;
    }

    /// Key of a create that is still pending in a transaction.
    pub(crate) fn set_pending_key(&self, key: Key) {
        self.state.lock_infallible().key = Some(key);
    }

    /// Write a plain column (foreign keys) in the committed view, bypassing
    /// the read-only check.
    pub(crate) fn set_column(&self, column: &str, value: Value) -> Result<(), Error> {
        let (index, field) = self
            .schema()
            .slots()
            .iter()
            .enumerate()
            .find(|(_, f)| !f.is_relation() && f.nested().is_none() && f.storage_name() == column)
            .ok_or_else(|| {
                Error::invariant(
                    ErrorOrigin::Entity,
                    format!("'{}' has no column '{column}'", self.schema().name()),
                )
            })?;

        let mut inner = self.state.lock()?;
        self.write_cell(&mut inner, index, field, None, value)?;

        Ok(())
    }

    /// Loaded live fields with their user-level values.
    pub(crate) fn loaded_values(&self, view: Option<TxId>) -> Result<Vec<(&Field, Value)>, Error> {
        let mut inner = self.state.lock()?;
        let mut out = Vec::new();

        for (index, field) in self.schema().slots().iter().enumerate() {
            if !matches!(field.role(), FieldRole::Column)
                || inner.cell(index, view).raw(view).is_none()
            {
                continue;
            }
            let value = self.read_cell(&mut inner, index, field, view)?;
            out.push((field, value));
        }

        Ok(out)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn slot(&self, name: &str) -> Result<Slot<'_>, Error> {
        let schema = self.schema();

        if let Some(index) = schema.field_index(name) {
            let field = &schema.slots()[index];
            if field.is_relation() {
                return Err(self.unknown_field(name));
            }
            return Ok(Slot::Field(index, field));
        }
        if schema.is_suppressed(name) {
            return Ok(Slot::Suppressed);
        }

        Err(self.unknown_field(name))
    }

    fn unknown_field(&self, name: &str) -> Error {
        EntityError::UnknownField {
            entity: self.schema().name().to_string(),
            field: name.to_string(),
        }
        .into()
    }

    fn read_cell(
        &self,
        inner: &mut RecordInner,
        index: usize,
        field: &Field,
        view: Option<TxId>,
    ) -> Result<Value, Error> {
        let source = inner.source.clone();
        let access = Access {
            cx: self.wrap_context(field),
            view,
        };
        let mut load = || self.load_column(source.as_ref(), field);

        slot::read(field.chain().stages(), inner.cell_mut(index, view), &access, &mut load)
    }

    // true when a pending branch or staged copy for `view` was written
    fn write_cell(
        &self,
        inner: &mut RecordInner,
        index: usize,
        field: &Field,
        view: Option<TxId>,
        value: Value,
    ) -> Result<bool, Error> {
        let source = inner.source.clone();
        let access = Access {
            cx: self.wrap_context(field),
            view,
        };
        let mut load = || self.load_column(source.as_ref(), field);
        let stages = field.chain().stages();

        // only the writing transaction sees the edit until it commits
        if let Some(tx) = view
            && !field.chain().contains(WrapperKind::Transactional)
        {
            let RecordInner { cells, staged, .. } = inner;
            let cell = staged
                .entry(tx)
                .or_default()
                .entry(index)
                .or_insert_with(|| cells[index].clone());
            slot::write(stages, cell, &access, value, &mut load)?;

            return Ok(true);
        }

        slot::write(stages, &mut inner.cells[index], &access, value, &mut load)
    }

    fn wrap_context<'a>(&'a self, field: &'a Field) -> WrapContext<'a> {
        WrapContext {
            entity: self.schema().name(),
            field: field.name(),
            services: &self.state.services,
        }
    }

    // one row read per deferred field fetch
    fn load_column(&self, source: Option<&LazySource>, field: &Field) -> Result<Value, Error> {
        let Some(source) = source else {
            return Ok(Value::Null);
        };
        let schema = self.schema();
        let sink = &self.state.services.sink;

        sink.record(EngineEvent::Command {
            command: Command::for_schema(schema, CommandKind::ReadBy).with_columns(field.columns()),
        });
        let row = source.store.read(schema, &source.key)?;
        sink.record(EngineEvent::LazyLoad {
            entity: schema.name().to_string(),
            field: field.name().to_string(),
        });

        Ok(row.and_then(|row| field.extract(&row)).unwrap_or_default())
    }
}

impl fmt::Debug for EntityRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.state.lock_infallible();

        f.debug_struct("EntityRecord")
            .field("entity", &self.schema().name())
            .field("id", &self.state.id)
            .field("status", &inner.status)
            .field("key", &inner.key)
            .finish_non_exhaustive()
    }
}
