use ciborium::Value;
use coset::{
    iana, mac_structure_data, AsCborValue, CborSerializable, Header, MacContext, ProtectedHeader,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Sha256, Sha384, Sha512};

use super::{assigned_algorithm, untag, Error, SignatureAlgorithm};

const COSE_MAC0_TAG: u64 = 17;

/// A COSE_Mac0 structure, as used for device MAC authentication.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CoseMac0(pub(crate) coset::CoseMac0);

/// An HMAC key tied to one of the COSE HMAC algorithms.
#[derive(Clone)]
pub struct MacKey {
    algorithm: iana::Algorithm,
    secret: Vec<u8>,
}

impl MacKey {
    pub fn new(algorithm: iana::Algorithm, secret: impl Into<Vec<u8>>) -> Result<Self, Error> {
        match algorithm {
            iana::Algorithm::HMAC_256_256
            | iana::Algorithm::HMAC_384_384
            | iana::Algorithm::HMAC_512_512 => Ok(Self {
                algorithm,
                secret: secret.into(),
            }),
            other => Err(Error::UnsupportedAlgorithm(coset::Algorithm::Assigned(
                other,
            ))),
        }
    }

    fn tag(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        let invalid = |e: hmac::digest::InvalidLength| Error::InvalidKey(e.to_string());
        Ok(match self.algorithm {
            iana::Algorithm::HMAC_384_384 => {
                let mut mac = Hmac::<Sha384>::new_from_slice(&self.secret).map_err(invalid)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            iana::Algorithm::HMAC_512_512 => {
                let mut mac = Hmac::<Sha512>::new_from_slice(&self.secret).map_err(invalid)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            _ => {
                let mut mac = Hmac::<Sha256>::new_from_slice(&self.secret).map_err(invalid)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        })
    }

    fn check(&self, data: &[u8], tag: &[u8]) -> Result<(), Error> {
        let invalid = |e: hmac::digest::InvalidLength| Error::InvalidKey(e.to_string());
        let rejected = |_: hmac::digest::MacError| Error::MacVerification;
        match self.algorithm {
            iana::Algorithm::HMAC_384_384 => {
                let mut mac = Hmac::<Sha384>::new_from_slice(&self.secret).map_err(invalid)?;
                mac.update(data);
                mac.verify_slice(tag).map_err(rejected)
            }
            iana::Algorithm::HMAC_512_512 => {
                let mut mac = Hmac::<Sha512>::new_from_slice(&self.secret).map_err(invalid)?;
                mac.update(data);
                mac.verify_slice(tag).map_err(rejected)
            }
            _ => {
                let mut mac = Hmac::<Sha256>::new_from_slice(&self.secret).map_err(invalid)?;
                mac.update(data);
                mac.verify_slice(tag).map_err(rejected)
            }
        }
    }
}

impl SignatureAlgorithm for MacKey {
    fn algorithm(&self) -> iana::Algorithm {
        self.algorithm
    }
}

impl CoseMac0 {
    /// Compute a MAC over `message`, recording the key's algorithm in the protected header.
    pub fn mac(
        key: &MacKey,
        message: &[u8],
        include_message: bool,
        mut protected: Header,
        unprotected: Header,
    ) -> Result<Self, Error> {
        protected.alg = Some(coset::Algorithm::Assigned(key.algorithm));
        let protected = ProtectedHeader {
            original_data: None,
            header: protected,
        };
        let data = mac_structure_data(MacContext::CoseMac0, protected.clone(), &[], message);
        let tag = key.tag(&data)?;
        Ok(CoseMac0(coset::CoseMac0 {
            protected,
            unprotected,
            payload: include_message.then(|| message.to_vec()),
            tag,
        }))
    }

    /// Recompute the MAC and compare it in constant time.
    pub fn verify(&self, key: &MacKey, detached_payload: Option<&[u8]>) -> Result<(), Error> {
        if let Some(alg) = self.0.protected.header.alg.as_ref() {
            let alg = assigned_algorithm(alg)?;
            if alg != key.algorithm {
                return Err(Error::UnsupportedAlgorithm(coset::Algorithm::Assigned(alg)));
            }
        }
        let payload = self
            .0
            .payload
            .as_deref()
            .or(detached_payload)
            .ok_or(Error::MissingPayload)?;
        let data = mac_structure_data(MacContext::CoseMac0, self.0.protected.clone(), &[], payload);
        key.check(&data, &self.0.tag)
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.0.payload.as_deref()
    }

    pub fn tag(&self) -> &[u8] {
        &self.0.tag
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        self.0
            .clone()
            .to_vec()
            .map_err(|e| Error::Malformed(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let value: Value =
            crate::cbor::from_slice(bytes).map_err(|e| Error::Malformed(e.to_string()))?;
        Self::try_from(value)
    }
}

impl TryFrom<Value> for CoseMac0 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Error> {
        coset::CoseMac0::from_cbor_value(untag(value, COSE_MAC0_TAG))
            .map(Self)
            .map_err(|e| Error::Malformed(e.to_string()))
    }
}

impl Serialize for CoseMac0 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0
            .clone()
            .to_cbor_value()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CoseMac0 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        CoseMac0::try_from(value).map_err(serde::de::Error::custom)
    }
}
