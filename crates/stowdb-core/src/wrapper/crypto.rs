use crate::{
    crypto::KeyDescriptor,
    error::Error,
    serialize,
    value::Value,
    wrapper::WrapContext,
};
use serde::{Deserialize, Serialize};

///
/// Crypto
///
/// Encrypt-on-write / decrypt-on-read. The plain value is CBOR encoded before
/// encryption so any kind round-trips; `Null` is stored unencrypted.
///

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct Crypto {
    pub key: KeyDescriptor,
}

impl Crypto {
    pub(super) fn write(&self, cx: &WrapContext<'_>, value: Value) -> Result<Value, Error> {
        if value.is_null() {
            return Ok(value);
        }

        let plain = serialize::serialize(&value)?;
        let key = cx.services.key_source.resolve_key(&self.key)?;
        let sealed = cx.services.cipher.encrypt(&key, &plain)?;

        Ok(Value::Blob(sealed))
    }

    pub(super) fn read(&self, cx: &WrapContext<'_>, raw: Value) -> Result<Value, Error> {
        let sealed = match raw {
            Value::Null => return Ok(Value::Null),
            Value::Blob(bytes) => bytes,
            other => {
                return Err(Error::wrapper_corruption(
                    cx.entity,
                    cx.field,
                    format!("encrypted column holds {other} instead of a blob"),
                ));
            }
        };

        let key = cx.services.key_source.resolve_key(&self.key)?;
        let plain = cx.services.cipher.decrypt(&key, &sealed)?;

        Ok(serialize::deserialize(&plain)?)
    }
}
