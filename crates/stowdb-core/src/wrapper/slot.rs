//! Per-record state for stateful wrapper stages.
//!
//! A field's chain is mirrored by a `Cell` tree holding one node per stateful
//! stage (in chain order) and a `Value` leaf carrying the storage-form value.
//! Stateless stages never own a node; reads and writes apply them while
//! walking the chain, so the leaf always holds what the store holds.

use crate::{
    error::{Error, ErrorOrigin},
    tx::TxId,
    value::Value,
    wrapper::{Stage, WrapContext, Wrapper},
};
use std::collections::BTreeMap;

///
/// Cell
///

#[derive(Clone, Debug)]
pub(crate) enum Cell {
    Value(Value),
    Lazy { loaded: bool, inner: Box<Self> },
    Tx { committed: Box<Self>, pending: BTreeMap<TxId, Self> },
}

///
/// Access
/// Read/write context for one slot operation.
///

pub(crate) struct Access<'a> {
    pub(crate) cx: WrapContext<'a>,
    pub(crate) view: Option<TxId>,
}

/// Fetches the storage-form value of the field from the store.
pub(crate) type Loader<'a> = dyn FnMut() -> Result<Value, Error> + 'a;

impl Cell {
    /// Fresh (unloaded, empty) cell tree for a chain.
    pub(crate) fn for_stages(stages: &[Stage]) -> Self {
        for (i, stage) in stages.iter().enumerate() {
            let rest = &stages[i + 1..];
            match stage.wrapper {
                Wrapper::LazyLoad => {
                    return Self::Lazy {
                        loaded: false,
                        inner: Box::new(Self::for_stages(rest)),
                    };
                }
                Wrapper::Transactional => {
                    return Self::Tx {
                        committed: Box::new(Self::for_stages(rest)),
                        pending: BTreeMap::new(),
                    };
                }
                _ => {}
            }
        }

        Self::Value(Value::Null)
    }

    /// Seed the committed path from a freshly loaded row.
    /// Lazy nodes stay unloaded.
    pub(crate) fn hydrate(&mut self, raw: Value) {
        match self {
            Self::Value(v) => *v = raw,
            Self::Lazy { .. } => {}
            Self::Tx { committed, .. } => committed.hydrate(raw),
        }
    }

    /// Materialize the committed path, marking lazy nodes loaded.
    pub(crate) fn fill(&mut self, raw: Value) {
        match self {
            Self::Value(v) => *v = raw,
            Self::Lazy { loaded, inner } => {
                *loaded = true;
                inner.fill(raw);
            }
            Self::Tx { committed, .. } => committed.fill(raw),
        }
    }

    /// Storage-form value seen from `view`; `None` when it was never loaded.
    pub(crate) fn raw(&self, view: Option<TxId>) -> Option<Value> {
        match self {
            Self::Value(v) => Some(v.clone()),
            Self::Lazy { loaded, inner } => loaded.then(|| inner.raw(view)).flatten(),
            Self::Tx { committed, pending } => match view.and_then(|t| pending.get(&t)) {
                Some(branch) => branch.raw(view),
                None => committed.raw(view),
            },
        }
    }

    /// True unless the outermost lazy node on the committed path is unloaded.
    pub(crate) fn is_loaded(&self) -> bool {
        match self {
            Self::Value(_) => true,
            Self::Lazy { loaded, .. } => *loaded,
            Self::Tx { committed, .. } => committed.is_loaded(),
        }
    }

    pub(crate) fn has_pending(&self, tx: TxId) -> bool {
        match self {
            Self::Value(_) => false,
            Self::Lazy { inner, .. } => inner.has_pending(tx),
            Self::Tx { committed, pending } => {
                pending.contains_key(&tx) || committed.has_pending(tx)
            }
        }
    }

    /// Promote the pending branches created by `tx`.
    pub(crate) fn commit(&mut self, tx: TxId) {
        match self {
            Self::Value(_) => {}
            Self::Lazy { inner, .. } => inner.commit(tx),
            Self::Tx { committed, pending } => {
                if let Some(branch) = pending.remove(&tx) {
                    **committed = branch;
                }
                committed.commit(tx);
                for branch in pending.values_mut() {
                    branch.commit(tx);
                }
            }
        }
    }

    /// Discard the pending branches created by `tx`.
    pub(crate) fn rollback(&mut self, tx: TxId) {
        match self {
            Self::Value(_) => {}
            Self::Lazy { inner, .. } => inner.rollback(tx),
            Self::Tx { committed, pending } => {
                pending.remove(&tx);
                committed.rollback(tx);
                for branch in pending.values_mut() {
                    branch.rollback(tx);
                }
            }
        }
    }
}

/// Read through the chain, loading lazy nodes on first access.
pub(crate) fn read(
    stages: &[Stage],
    cell: &mut Cell,
    access: &Access<'_>,
    load: &mut Loader<'_>,
) -> Result<Value, Error> {
    let Some((stage, rest)) = stages.split_first() else {
        return match cell {
            Cell::Value(v) => Ok(v.clone()),
            _ => Err(shape_error(access)),
        };
    };

    match (&stage.wrapper, cell) {
        (Wrapper::LazyLoad, Cell::Lazy { loaded, inner }) => {
            if !*loaded {
                inner.fill(load()?);
                *loaded = true;
            }
            read(rest, inner, access, load)
        }
        (Wrapper::Transactional, Cell::Tx { committed, pending }) => {
            let branch: &mut Cell = match access.view.filter(|t| pending.contains_key(t)) {
                Some(tx) => pending.get_mut(&tx).ok_or_else(|| shape_error(access))?,
                None => &mut **committed,
            };
            read(rest, branch, access, load)
        }
        (Wrapper::LazyLoad | Wrapper::Transactional, _) => Err(shape_error(access)),
        (wrapper, cell) => {
            let value = read(rest, cell, access, load)?;
            wrapper.read(&access.cx, value)
        }
    }
}

/// Write through the chain. Returns true when a pending branch for the
/// access view was written.
pub(crate) fn write(
    stages: &[Stage],
    cell: &mut Cell,
    access: &Access<'_>,
    value: Value,
    load: &mut Loader<'_>,
) -> Result<bool, Error> {
    let Some((stage, rest)) = stages.split_first() else {
        return match cell {
            Cell::Value(v) => {
                *v = value;
                Ok(false)
            }
            _ => Err(shape_error(access)),
        };
    };

    match (&stage.wrapper, cell) {
        (Wrapper::LazyLoad, Cell::Lazy { loaded, inner }) => {
            // a deferred subtree must hold the committed state before it
            // can take a pending write
            if !*loaded && !matches!(**inner, Cell::Value(_)) {
                inner.fill(load()?);
            }
            *loaded = true;
            write(rest, inner, access, value, load)
        }
        (Wrapper::Transactional, Cell::Tx { committed, pending }) => match access.view {
            Some(tx) => {
                let branch = pending
                    .entry(tx)
                    .or_insert_with(|| Cell::for_stages(rest));
                write(rest, branch, access, value, load)?;
                Ok(true)
            }
            None => write(rest, committed, access, value, load),
        },
        (Wrapper::LazyLoad | Wrapper::Transactional, _) => Err(shape_error(access)),
        (wrapper, cell) => {
            let value = wrapper.write(&access.cx, value)?;
            write(rest, cell, access, value, load)
        }
    }
}

fn shape_error(access: &Access<'_>) -> Error {
    Error::invariant(
        ErrorOrigin::Wrapper,
        format!(
            "slot for '{}.{}' does not match its wrapper chain",
            access.cx.entity, access.cx.field
        ),
    )
}
