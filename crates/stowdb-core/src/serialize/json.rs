use crate::serialize::SerializeError;
use serde::{Serialize, de::DeserializeOwned};

pub(super) fn to_json<T>(t: &T) -> Result<String, SerializeError>
where
    T: Serialize,
{
    serde_json::to_string_pretty(t).map_err(|e| SerializeError::Serialize(e.to_string()))
}

pub(super) fn from_json<T>(text: &str) -> Result<T, SerializeError>
where
    T: DeserializeOwned,
{
    serde_json::from_str(text).map_err(|e| SerializeError::Deserialize(e.to_string()))
}
