//! Ulid serde as canonical 26-char text.
//!
//! The ulid crate's serde impls sit behind its `serde` feature, which is not
//! enabled here (default features pull in `rand`).

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

pub(super) fn serialize<S>(value: &Ulid, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut buffer = [0; ulid::ULID_LEN];
    let text = value.array_to_str(&mut buffer);
    text.serialize(serializer)
}

pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Ulid, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    Ulid::from_string(&text).map_err(|_| serde::de::Error::custom("invalid ulid string"))
}
