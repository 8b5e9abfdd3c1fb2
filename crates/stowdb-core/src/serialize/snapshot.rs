use crate::{key::Key, value::Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

///
/// EntitySnapshot
///
/// Detached, serializable view of an entity graph as seen from one scope:
/// public field values plus the visible children of every relation.
///

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct EntitySnapshot {
    pub entity: String,
    pub key: Option<Key>,
    pub values: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relations: BTreeMap<String, Vec<Self>>,
}

impl EntitySnapshot {
    #[must_use]
    pub fn value(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    #[must_use]
    pub fn children(&self, relation: &str) -> &[Self] {
        self.relations.get(relation).map_or(&[], Vec::as_slice)
    }
}
