use std::collections::BTreeMap;
use std::io::Cursor;

use ciborium::Value;
use coset::{cbor, CoseError, EndOfFile};
use serde::{de, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CborError {
    /// CBOR decoding failure.
    #[error("CBOR decoding failure: {0}")]
    DecodeFailed(cbor::de::Error<EndOfFile>),
    /// Duplicate map key detected.
    #[error("duplicate map key")]
    DuplicateMapKey,
    /// CBOR encoding failure.
    #[error("CBOR encoding failure")]
    EncodeFailed,
    /// CBOR input had extra data.
    #[error("extraneous data")]
    ExtraneousData,
    /// Integer value on the wire is outside the range of integers representable in this crate.
    #[error("integer value out of range")]
    OutOfRangeIntegerValue,
    /// Unexpected CBOR item encountered (got, want).
    #[error("unexpected item: {0}, want {1}")]
    UnexpectedItem(&'static str, &'static str),
    /// Unrecognized value in IANA-controlled range (with no private range).
    #[error("unregistered IANA value")]
    UnregisteredIanaValue,
    /// Unrecognized value in neither IANA-controlled range nor private range.
    #[error("unregistered non-private IANA value")]
    UnregisteredIanaNonPrivateValue,
}

impl From<CoseError> for CborError {
    fn from(e: CoseError) -> Self {
        match e {
            CoseError::DecodeFailed(e) => CborError::DecodeFailed(e),
            CoseError::DuplicateMapKey => CborError::DuplicateMapKey,
            CoseError::EncodeFailed => CborError::EncodeFailed,
            CoseError::ExtraneousData => CborError::ExtraneousData,
            CoseError::OutOfRangeIntegerValue => CborError::OutOfRangeIntegerValue,
            CoseError::UnexpectedItem(s, s2) => CborError::UnexpectedItem(s, s2),
            CoseError::UnregisteredIanaValue => CborError::UnregisteredIanaValue,
            CoseError::UnregisteredIanaNonPrivateValue => {
                CborError::UnregisteredIanaNonPrivateValue
            }
        }
    }
}

fn semantic(msg: impl ToString) -> CborError {
    CborError::DecodeFailed(ciborium::de::Error::Semantic(None, msg.to_string()))
}

pub fn to_vec<T>(value: &T) -> Result<Vec<u8>, CborError>
where
    T: Serialize,
{
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|_| CborError::EncodeFailed)?;
    Ok(buf)
}

/// Decode a single CBOR item, rejecting trailing bytes.
pub fn from_slice<T>(slice: &[u8]) -> Result<T, CborError>
where
    T: de::DeserializeOwned,
{
    let mut cursor = Cursor::new(slice);
    let value = ciborium::from_reader(&mut cursor).map_err(semantic)?;
    if (cursor.position() as usize) != slice.len() {
        return Err(CborError::ExtraneousData);
    }
    Ok(value)
}

/// Convert a `ciborium::Value` into a type `T`
pub fn from_value<T>(value: Value) -> Result<T, CborError>
where
    T: de::DeserializeOwned,
{
    value.deserialized().map_err(semantic)
}

pub fn into_value<S>(v: S) -> Result<Value, CborError>
where
    S: Serialize,
{
    Value::serialized(&v).map_err(|_| CborError::EncodeFailed)
}

/// Turn a CBOR map with integer keys into a lookup table.
pub(crate) fn int_keyed_map(value: Value) -> Result<BTreeMap<i128, Value>, CborError> {
    let Value::Map(entries) = value else {
        return Err(CborError::UnexpectedItem("non-map", "map"));
    };
    let mut map = BTreeMap::new();
    for (k, v) in entries {
        let k: i128 = k
            .as_integer()
            .ok_or(CborError::UnexpectedItem("non-integer key", "integer key"))?
            .into();
        if map.insert(k, v).is_some() {
            return Err(CborError::DuplicateMapKey);
        }
    }
    Ok(map)
}

/// Turn a CBOR map with text keys into a lookup table.
pub(crate) fn text_keyed_map(value: Value) -> Result<BTreeMap<String, Value>, CborError> {
    let Value::Map(entries) = value else {
        return Err(CborError::UnexpectedItem("non-map", "map"));
    };
    let mut map = BTreeMap::new();
    for (k, v) in entries {
        let Value::Text(k) = k else {
            return Err(CborError::UnexpectedItem("non-text key", "text key"));
        };
        if map.insert(k, v).is_some() {
            return Err(CborError::DuplicateMapKey);
        }
    }
    Ok(map)
}

pub(crate) fn uint(value: &Value) -> Option<u64> {
    value.as_integer().and_then(|i| u64::try_from(i).ok())
}
