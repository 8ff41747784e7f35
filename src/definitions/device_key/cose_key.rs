use ciborium::Value;
use coset::iana::Algorithm;
use serde::{Deserialize, Serialize};

use crate::cbor::int_keyed_map;
use crate::cose::{self, Curve, VerifyingKey};

/// An implementation of RFC-8152 [COSE_Key](https://datatracker.ietf.org/doc/html/rfc8152#section-13)
/// restricted to the requirements of ISO/IEC 18013-5:2021.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "Value", into = "Value")]
pub enum CoseKey {
    EC2 { crv: EC2Curve, x: Vec<u8>, y: EC2Y },
    OKP { crv: OKPCurve, x: Vec<u8> },
}

/// The sign bit or value of the y-coordinate for the EC point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EC2Y {
    Value(Vec<u8>),
    SignBit(bool),
}

/// The RFC-8152 identifier of the curve, for EC2 key type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EC2Curve {
    P256,
    P384,
    P521,
    BrainpoolP256r1,
    BrainpoolP320r1,
    BrainpoolP384r1,
    BrainpoolP512r1,
}

/// The RFC-8152 identifier of the curve, for OKP key type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OKPCurve {
    X25519,
    X448,
    Ed25519,
    Ed448,
}

/// Errors that can occur when deserialising a COSE_Key.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("COSE_Key of kty 'EC2' missing x coordinate")]
    EC2MissingX,
    #[error("COSE_Key of kty 'EC2' missing y coordinate")]
    EC2MissingY,
    #[error("Expected to parse a CBOR bool or bstr for y-coordinate, received: '{0:?}'")]
    InvalidTypeY(Value),
    #[error("Expected to parse a CBOR map with integer keys")]
    NotAMap,
    #[error("Unable to discern the elliptic curve")]
    UnknownCurve,
    #[error("This implementation of COSE_Key only supports EC2 and OKP keys")]
    UnsupportedKeyType,
    #[error("Could not reconstruct coordinates from the provided COSE_Key")]
    InvalidCoseKey,
}

impl TryFrom<i128> for EC2Curve {
    type Error = Error;

    fn try_from(crv_id: i128) -> Result<Self, Error> {
        match crv_id {
            1 => Ok(EC2Curve::P256),
            2 => Ok(EC2Curve::P384),
            3 => Ok(EC2Curve::P521),
            256 => Ok(EC2Curve::BrainpoolP256r1),
            257 => Ok(EC2Curve::BrainpoolP320r1),
            258 => Ok(EC2Curve::BrainpoolP384r1),
            259 => Ok(EC2Curve::BrainpoolP512r1),
            _ => Err(Error::UnknownCurve),
        }
    }
}

impl TryFrom<i128> for OKPCurve {
    type Error = Error;

    fn try_from(crv_id: i128) -> Result<Self, Error> {
        match crv_id {
            4 => Ok(OKPCurve::X25519),
            5 => Ok(OKPCurve::X448),
            6 => Ok(OKPCurve::Ed25519),
            7 => Ok(OKPCurve::Ed448),
            _ => Err(Error::UnknownCurve),
        }
    }
}

impl From<EC2Curve> for Curve {
    fn from(crv: EC2Curve) -> Curve {
        match crv {
            EC2Curve::P256 => Curve::P256,
            EC2Curve::P384 => Curve::P384,
            EC2Curve::P521 => Curve::P521,
            EC2Curve::BrainpoolP256r1 => Curve::BrainpoolP256r1,
            EC2Curve::BrainpoolP320r1 => Curve::BrainpoolP320r1,
            EC2Curve::BrainpoolP384r1 => Curve::BrainpoolP384r1,
            EC2Curve::BrainpoolP512r1 => Curve::BrainpoolP512r1,
        }
    }
}

impl CoseKey {
    /// Signing curve of the key; `None` for key-agreement-only OKP curves.
    pub fn curve(&self) -> Option<Curve> {
        match self {
            CoseKey::EC2 { crv, .. } => Some((*crv).into()),
            CoseKey::OKP {
                crv: OKPCurve::Ed25519,
                ..
            } => Some(Curve::Ed25519),
            CoseKey::OKP {
                crv: OKPCurve::Ed448,
                ..
            } => Some(Curve::Ed448),
            CoseKey::OKP { .. } => None,
        }
    }

    pub fn signature_algorithm(&self) -> Option<Algorithm> {
        self.curve().map(Curve::default_algorithm)
    }
}

impl From<CoseKey> for Value {
    fn from(key: CoseKey) -> Value {
        let int = |i: i64| Value::Integer(i.into());
        let mut entries = Vec::with_capacity(4);
        match key {
            CoseKey::EC2 { crv, x, y } => {
                // kty: 1, EC2: 2
                entries.push((int(1), int(2)));
                // crv: -1
                entries.push((int(-1), int(Curve::from(crv).cose_id())));
                // x: -2
                entries.push((int(-2), Value::Bytes(x)));
                // y: -3
                entries.push((int(-3), y.into()));
            }
            CoseKey::OKP { crv, x } => {
                // kty: 1, OKP: 1
                entries.push((int(1), int(1)));
                entries.push((
                    int(-1),
                    int(match crv {
                        OKPCurve::X25519 => 4,
                        OKPCurve::X448 => 5,
                        OKPCurve::Ed25519 => 6,
                        OKPCurve::Ed448 => 7,
                    }),
                ));
                entries.push((int(-2), Value::Bytes(x)));
            }
        }
        Value::Map(entries)
    }
}

impl TryFrom<Value> for CoseKey {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Error> {
        let mut map = int_keyed_map(v).map_err(|_| Error::NotAMap)?;
        let kty = map.remove(&1).and_then(|v| v.as_integer()).map(i128::from);
        let crv = map
            .remove(&-1)
            .and_then(|v| v.as_integer())
            .map(i128::from)
            .ok_or(Error::UnknownCurve)?;
        let x = match map.remove(&-2) {
            Some(Value::Bytes(x)) => x,
            Some(_) => return Err(Error::InvalidCoseKey),
            None => return Err(Error::EC2MissingX),
        };
        match kty {
            Some(2) => {
                let crv = EC2Curve::try_from(crv)?;
                let y = map.remove(&-3).ok_or(Error::EC2MissingY)?.try_into()?;
                Ok(CoseKey::EC2 { crv, x, y })
            }
            Some(1) => Ok(CoseKey::OKP {
                crv: OKPCurve::try_from(crv)?,
                x,
            }),
            _ => Err(Error::UnsupportedKeyType),
        }
    }
}

impl From<EC2Y> for Value {
    fn from(y: EC2Y) -> Value {
        match y {
            EC2Y::Value(s) => Value::Bytes(s),
            EC2Y::SignBit(b) => Value::Bool(b),
        }
    }
}

impl TryFrom<Value> for EC2Y {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Error> {
        match v {
            Value::Bytes(s) => Ok(EC2Y::Value(s)),
            Value::Bool(b) => Ok(EC2Y::SignBit(b)),
            _ => Err(Error::InvalidTypeY(v)),
        }
    }
}

impl TryFrom<&CoseKey> for VerifyingKey {
    type Error = cose::Error;

    fn try_from(key: &CoseKey) -> Result<VerifyingKey, cose::Error> {
        let curve = key
            .curve()
            .ok_or_else(|| cose::Error::InvalidKey("key agreement curve cannot verify".into()))?;
        match key {
            CoseKey::EC2 { x, y, .. } => {
                let mut sec1 = Vec::with_capacity(1 + 2 * x.len());
                match y {
                    EC2Y::Value(y) => {
                        sec1.push(0x04);
                        sec1.extend_from_slice(x);
                        sec1.extend_from_slice(y);
                    }
                    EC2Y::SignBit(odd) => {
                        sec1.push(if *odd { 0x03 } else { 0x02 });
                        sec1.extend_from_slice(x);
                    }
                }
                VerifyingKey::from_public_bytes(curve, &sec1)
            }
            CoseKey::OKP { x, .. } => VerifyingKey::from_public_bytes(curve, x),
        }
    }
}

impl From<&VerifyingKey> for CoseKey {
    fn from(key: &VerifyingKey) -> CoseKey {
        let bytes = key.to_public_bytes();
        let crv = match key.curve() {
            Curve::Ed25519 => {
                return CoseKey::OKP {
                    crv: OKPCurve::Ed25519,
                    x: bytes,
                }
            }
            Curve::Ed448 => {
                return CoseKey::OKP {
                    crv: OKPCurve::Ed448,
                    x: bytes,
                }
            }
            Curve::P256 => EC2Curve::P256,
            Curve::P384 => EC2Curve::P384,
            Curve::P521 => EC2Curve::P521,
            Curve::BrainpoolP256r1 => EC2Curve::BrainpoolP256r1,
            Curve::BrainpoolP320r1 => EC2Curve::BrainpoolP320r1,
            Curve::BrainpoolP384r1 => EC2Curve::BrainpoolP384r1,
            Curve::BrainpoolP512r1 => EC2Curve::BrainpoolP512r1,
        };
        let len = key.curve().coordinate_len();
        // Uncompressed SEC1: 0x04 || x || y
        CoseKey::EC2 {
            crv,
            x: bytes[1..1 + len].to_vec(),
            y: EC2Y::Value(bytes[1 + len..].to_vec()),
        }
    }
}
