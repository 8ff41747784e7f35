//! COSE_Sign1 and COSE_Mac0 envelopes over [coset], with the signing curves
//! an mdoc issuer or holder can use.
pub mod keys;
pub mod mac0;
pub mod sign1;

use coset::iana;

pub use keys::{Curve, SigningKey, VerifyingKey};
pub use mac0::CoseMac0;
pub use sign1::CoseSign1;

/// Trait to represent the signature algorithm of a signer or verifier.
pub trait SignatureAlgorithm {
    fn algorithm(&self) -> iana::Algorithm;
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("signature did not verify")]
    SignatureVerification,
    #[error("MAC did not verify")]
    MacVerification,
    #[error("curve {0:?} is recognised but not supported")]
    UnsupportedCurve(Curve),
    #[error("unknown COSE curve identifier {0}")]
    UnknownCurve(i64),
    #[error("algorithm {algorithm:?} cannot be used with curve {curve:?}")]
    IncompatibleAlgorithm {
        curve: Curve,
        algorithm: iana::Algorithm,
    },
    #[error("unsupported algorithm: {0:?}")]
    UnsupportedAlgorithm(coset::Algorithm),
    #[error("no payload embedded and none supplied")]
    MissingPayload,
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("malformed COSE structure: {0}")]
    Malformed(String),
}

/// Resolve the algorithm identifier carried by a header.
pub(crate) fn assigned_algorithm(alg: &coset::Algorithm) -> Result<iana::Algorithm, Error> {
    match alg {
        coset::Algorithm::Assigned(a) => Ok(*a),
        other => Err(Error::UnsupportedAlgorithm(other.clone())),
    }
}

/// COSE structures may arrive with or without their CBOR tag.
pub(crate) fn untag(value: ciborium::Value, tag: u64) -> ciborium::Value {
    match value {
        ciborium::Value::Tag(t, inner) if t == tag => *inner,
        v => v,
    }
}
