use crate::{
    error::{Error, ErrorOrigin},
    key::Key,
    model::{Row, Schema},
    store::{CommandKind, RowIter, Store, StoreError},
    value::{Value, ValueKind},
};
use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard},
};

///
/// Table
///

#[derive(Debug, Default)]
struct Table {
    rows: BTreeMap<Key, Row>,
    next_id: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, Table>,
    executed: BTreeMap<CommandKind, u64>,
}

///
/// MemoryStore
///
/// In-memory reference backend. Tables are keyed by entity name and rows are
/// kept in key order. Single integer identities are assigned from a
/// per-table counter. Every call bumps the counter of its command kind.
///

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commands of `kind` executed so far.
    #[must_use]
    pub fn executed(&self, kind: CommandKind) -> u64 {
        self.lock()
            .map(|state| state.executed.get(&kind).copied().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Raw stored row, bypassing the command counters.
    #[must_use]
    pub fn peek(&self, schema: &Schema, key: &Key) -> Option<Row> {
        let state = self.lock().ok()?;
        state.tables.get(schema.name())?.rows.get(key).cloned()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, Error> {
        self.state
            .lock()
            .map_err(|_| Error::poisoned(ErrorOrigin::Store, "memory store"))
    }

    fn begin(&self, kind: CommandKind) -> Result<MutexGuard<'_, MemoryState>, Error> {
        let mut state = self.lock()?;
        *state.executed.entry(kind).or_default() += 1;

        Ok(state)
    }
}

impl Store for MemoryStore {
    fn create(&self, schema: &Schema, mut row: Row) -> Result<Key, Error> {
        let mut state = self.begin(CommandKind::Create)?;
        let table = state.tables.entry(schema.name().to_string()).or_default();

        let key = match schema.key_from_row(&row)? {
            Some(key) => key,
            None if schema.store_assigns_identity() => {
                let (key, column, value) = assign_identity(schema, table)?;
                row.insert(column, value);
                key
            }
            None => {
                return Err(StoreError::MissingIdentity {
                    entity: schema.name().to_string(),
                }
                .into());
            }
        };

        if table.rows.contains_key(&key) {
            return Err(StoreError::DuplicateKey {
                entity: schema.name().to_string(),
                key,
            }
            .into());
        }

        // explicit integer keys move the counter past them
        match key {
            Key::Int(v) => table.next_id = table.next_id.max(u64::try_from(v).unwrap_or(0)),
            Key::Uint(v) => table.next_id = table.next_id.max(v),
            _ => {}
        }

        table.rows.insert(key.clone(), row);

        Ok(key)
    }

    fn read(&self, schema: &Schema, key: &Key) -> Result<Option<Row>, Error> {
        let state = self.begin(CommandKind::ReadBy)?;

        Ok(state
            .tables
            .get(schema.name())
            .and_then(|table| table.rows.get(key))
            .cloned())
    }

    fn read_all(&self, schema: &Schema) -> Result<RowIter, Error> {
        let state = self.begin(CommandKind::ReadAll)?;
        let rows: Vec<Row> = state
            .tables
            .get(schema.name())
            .map(|table| table.rows.values().cloned().collect())
            .unwrap_or_default();

        Ok(Box::new(rows.into_iter()))
    }

    fn update(&self, schema: &Schema, key: &Key, row: Row) -> Result<(), Error> {
        let mut state = self.begin(CommandKind::UpdateBy)?;
        let stored = state
            .tables
            .get_mut(schema.name())
            .and_then(|table| table.rows.get_mut(key))
            .ok_or_else(|| StoreError::NotFound {
                entity: schema.name().to_string(),
                key: key.clone(),
            })?;

        stored.extend(row);

        Ok(())
    }

    fn delete(&self, schema: &Schema, key: &Key) -> Result<bool, Error> {
        let mut state = self.begin(CommandKind::DeleteBy)?;

        Ok(state
            .tables
            .get_mut(schema.name())
            .is_some_and(|table| table.rows.remove(key).is_some()))
    }

    fn delete_all(&self, schema: &Schema) -> Result<usize, Error> {
        let mut state = self.begin(CommandKind::DeleteAll)?;

        Ok(state
            .tables
            .get_mut(schema.name())
            .map(|table| std::mem::take(&mut table.rows).len())
            .unwrap_or_default())
    }

    fn count(&self, schema: &Schema) -> Result<usize, Error> {
        let state = self.begin(CommandKind::Count)?;

        Ok(state
            .tables
            .get(schema.name())
            .map(|table| table.rows.len())
            .unwrap_or_default())
    }
}

// next integer identity for a single-column identity schema
fn assign_identity(schema: &Schema, table: &mut Table) -> Result<(Key, String, Value), Error> {
    let field = schema.identity_fields().next().ok_or_else(|| {
        Error::invariant(
            ErrorOrigin::Store,
            format!("'{}' has no identity field", schema.name()),
        )
    })?;

    table.next_id += 1;
    let id = table.next_id;
    let (key, value) = match field.kind() {
        ValueKind::Int => {
            let id = i64::try_from(id).map_err(|_| {
                Error::invariant(
                    ErrorOrigin::Store,
                    format!("identity space exhausted for '{}'", schema.name()),
                )
            })?;
            (Key::Int(id), Value::Int(id))
        }
        _ => (Key::Uint(id), Value::Uint(id)),
    };

    Ok((key, field.storage_name().to_string(), value))
}
