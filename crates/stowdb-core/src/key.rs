use crate::value::Value;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

///
/// Key
///
/// Identity value of a stored entity.
/// `Provisional` keys are cache-local placeholders handed out to entities
/// created inside an open transaction; the store never sees them.
///

#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Key {
    Int(i64),
    Uint(u64),
    Text(String),
    Char(char),
    Ulid(#[serde(with = "key_ulid")] Ulid),
    Date(NaiveDate),
    Composite(Vec<Self>),
    Provisional(u64),
}

impl Key {
    /// Convert a scalar value into a key. Null, floats, blobs and records
    /// have no key form.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(v) => Some(Self::Int(*v)),
            Value::Uint(v) => Some(Self::Uint(*v)),
            Value::Text(v) => Some(Self::Text(v.clone())),
            Value::Char(v) => Some(Self::Char(*v)),
            Value::Ulid(v) => Some(Self::Ulid(*v)),
            Value::Date(v) => Some(Self::Date(*v)),
            _ => None,
        }
    }

    /// Scalar value form of the key; composite and provisional keys have none.
    #[must_use]
    pub fn to_value(&self) -> Option<Value> {
        match self {
            Self::Int(v) => Some(Value::Int(*v)),
            Self::Uint(v) => Some(Value::Uint(*v)),
            Self::Text(v) => Some(Value::Text(v.clone())),
            Self::Char(v) => Some(Value::Char(*v)),
            Self::Ulid(v) => Some(Value::Ulid(*v)),
            Self::Date(v) => Some(Value::Date(*v)),
            Self::Composite(_) | Self::Provisional(_) => None,
        }
    }

    #[must_use]
    pub const fn is_provisional(&self) -> bool {
        matches!(self, Self::Provisional(_))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Uint(v) => write!(f, "{v}"),
            Self::Text(v) => write!(f, "{v:?}"),
            Self::Char(v) => write!(f, "{v:?}"),
            Self::Ulid(v) => write!(f, "{v}"),
            Self::Date(v) => write!(f, "{v}"),
            Self::Composite(parts) => {
                f.write_str("(")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{part}")?;
                }
                f.write_str(")")
            }
            Self::Provisional(v) => write!(f, "provisional#{v}"),
        }
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for Key {
    fn from(v: u64) -> Self {
        Self::Uint(v)
    }
}

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<Ulid> for Key {
    fn from(v: Ulid) -> Self {
        Self::Ulid(v)
    }
}

mod key_ulid {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use ulid::Ulid;

    pub(super) fn serialize<S: Serializer>(value: &Ulid, serializer: S) -> Result<S::Ok, S::Error> {
        let mut buffer = [0; ulid::ULID_LEN];
        value.array_to_str(&mut buffer).serialize(serializer)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Ulid, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ulid::from_string(&text).map_err(|_| serde::de::Error::custom("invalid ulid string"))
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn composite_key_orders_lexicographically() {
        let a = Key::Composite(vec![Key::Int(1), Key::from("b")]);
        let b = Key::Composite(vec![Key::Int(1), Key::from("c")]);

        assert!(a < b);
    }

    #[test]
    fn float_value_has_no_key_form() {
        assert_eq!(Key::from_value(&Value::Float64(1.5)), None);
        assert_eq!(Key::from_value(&Value::Null), None);
    }

    #[test]
    fn provisional_key_has_no_value_form() {
        assert!(Key::Provisional(3).is_provisional());
        assert_eq!(Key::Provisional(3).to_value(), None);
    }

    proptest! {
        #[test]
        fn int_key_value_conversion_is_lossless(v in any::<i64>()) {
            let key = Key::from_value(&Value::Int(v)).unwrap();
            prop_assert_eq!(key.to_value(), Some(Value::Int(v)));
        }

        #[test]
        fn int_key_order_matches_native(a in any::<i64>(), b in any::<i64>()) {
            prop_assert_eq!(Key::Int(a).cmp(&Key::Int(b)), a.cmp(&b));
        }
    }
}
