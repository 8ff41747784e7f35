use coset::iana;
use rand::{CryptoRng, RngCore};
use signature::{Signer, Verifier};

use super::{Error, SignatureAlgorithm};

/// Curves identified by the COSE Elliptic Curves registry.
///
/// Brainpool P-320 and P-512 keys are recognised so they can be reported, but
/// no signing or verification backend is wired for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Curve {
    P256,
    P384,
    P521,
    Ed25519,
    Ed448,
    BrainpoolP256r1,
    BrainpoolP320r1,
    BrainpoolP384r1,
    BrainpoolP512r1,
}

const ED448_KEY_LEN: usize = 57;

impl Curve {
    pub fn cose_id(self) -> i64 {
        match self {
            Curve::P256 => 1,
            Curve::P384 => 2,
            Curve::P521 => 3,
            Curve::Ed25519 => 6,
            Curve::Ed448 => 7,
            Curve::BrainpoolP256r1 => 256,
            Curve::BrainpoolP320r1 => 257,
            Curve::BrainpoolP384r1 => 258,
            Curve::BrainpoolP512r1 => 259,
        }
    }

    pub fn from_cose_id(id: i64) -> Result<Self, Error> {
        Ok(match id {
            1 => Curve::P256,
            2 => Curve::P384,
            3 => Curve::P521,
            6 => Curve::Ed25519,
            7 => Curve::Ed448,
            256 => Curve::BrainpoolP256r1,
            257 => Curve::BrainpoolP320r1,
            258 => Curve::BrainpoolP384r1,
            259 => Curve::BrainpoolP512r1,
            _ => return Err(Error::UnknownCurve(id)),
        })
    }

    pub fn is_edwards(self) -> bool {
        matches!(self, Curve::Ed25519 | Curve::Ed448)
    }

    pub fn is_supported(self) -> bool {
        !matches!(self, Curve::BrainpoolP320r1 | Curve::BrainpoolP512r1)
    }

    /// Length in bytes of a single affine coordinate (or of the raw public key
    /// for the Edwards curves).
    pub fn coordinate_len(self) -> usize {
        match self {
            Curve::P256 | Curve::BrainpoolP256r1 | Curve::Ed25519 => 32,
            Curve::BrainpoolP320r1 => 40,
            Curve::P384 | Curve::BrainpoolP384r1 => 48,
            Curve::Ed448 => ED448_KEY_LEN,
            Curve::BrainpoolP512r1 => 64,
            Curve::P521 => 66,
        }
    }

    pub fn default_algorithm(self) -> iana::Algorithm {
        match self {
            Curve::P256 | Curve::BrainpoolP256r1 => iana::Algorithm::ES256,
            Curve::P384 | Curve::BrainpoolP320r1 | Curve::BrainpoolP384r1 => {
                iana::Algorithm::ES384
            }
            Curve::P521 | Curve::BrainpoolP512r1 => iana::Algorithm::ES512,
            Curve::Ed25519 | Curve::Ed448 => iana::Algorithm::EdDSA,
        }
    }

    /// Fails unless `algorithm` is the one this crate pairs with the curve.
    pub fn check_algorithm(self, algorithm: iana::Algorithm) -> Result<(), Error> {
        if self.default_algorithm() == algorithm {
            Ok(())
        } else {
            Err(Error::IncompatibleAlgorithm {
                curve: self,
                algorithm,
            })
        }
    }
}

/// A private key able to produce COSE signatures.
#[derive(Clone)]
pub enum SigningKey {
    P256(p256::ecdsa::SigningKey),
    P384(p384::ecdsa::SigningKey),
    P521(p521::ecdsa::SigningKey),
    BrainpoolP256r1(bp256::r1::ecdsa::SigningKey),
    BrainpoolP384r1(bp384::r1::ecdsa::SigningKey),
    Ed25519(ed25519_dalek::SigningKey),
    Ed448(ed448_goldilocks_plus::SigningKey),
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SigningKey({:?})", self.curve())
    }
}

impl SigningKey {
    pub fn generate<R: RngCore + CryptoRng>(curve: Curve, rng: &mut R) -> Result<Self, Error> {
        Ok(match curve {
            Curve::P256 => SigningKey::P256(p256::ecdsa::SigningKey::random(rng)),
            Curve::P384 => SigningKey::P384(p384::ecdsa::SigningKey::random(rng)),
            Curve::P521 => SigningKey::P521(p521::ecdsa::SigningKey::random(rng)),
            Curve::BrainpoolP256r1 => {
                SigningKey::BrainpoolP256r1(bp256::r1::ecdsa::SigningKey::random(rng))
            }
            Curve::BrainpoolP384r1 => {
                SigningKey::BrainpoolP384r1(bp384::r1::ecdsa::SigningKey::random(rng))
            }
            Curve::Ed25519 => SigningKey::Ed25519(ed25519_dalek::SigningKey::generate(rng)),
            Curve::Ed448 => SigningKey::Ed448(ed448_goldilocks_plus::SigningKey::generate(rng)),
            other => return Err(Error::UnsupportedCurve(other)),
        })
    }

    /// Load a private scalar (or EdDSA seed) for the given curve.
    pub fn from_bytes(curve: Curve, secret: &[u8]) -> Result<Self, Error> {
        let invalid = |e: signature::Error| Error::InvalidKey(e.to_string());
        Ok(match curve {
            Curve::P256 => {
                SigningKey::P256(p256::ecdsa::SigningKey::from_slice(secret).map_err(invalid)?)
            }
            Curve::P384 => {
                SigningKey::P384(p384::ecdsa::SigningKey::from_slice(secret).map_err(invalid)?)
            }
            Curve::P521 => {
                SigningKey::P521(p521::ecdsa::SigningKey::from_slice(secret).map_err(invalid)?)
            }
            Curve::BrainpoolP256r1 => SigningKey::BrainpoolP256r1(
                bp256::r1::ecdsa::SigningKey::from_slice(secret).map_err(invalid)?,
            ),
            Curve::BrainpoolP384r1 => SigningKey::BrainpoolP384r1(
                bp384::r1::ecdsa::SigningKey::from_slice(secret).map_err(invalid)?,
            ),
            Curve::Ed25519 => {
                let seed: [u8; 32] = secret
                    .try_into()
                    .map_err(|_| Error::InvalidKey("Ed25519 seed must be 32 bytes".into()))?;
                SigningKey::Ed25519(ed25519_dalek::SigningKey::from_bytes(&seed))
            }
            Curve::Ed448 => {
                if secret.len() != ED448_KEY_LEN {
                    return Err(Error::InvalidKey("Ed448 seed must be 57 bytes".into()));
                }
                let seed = ed448_goldilocks_plus::SecretKey::clone_from_slice(secret);
                SigningKey::Ed448(ed448_goldilocks_plus::SigningKey::from(&seed))
            }
            other => return Err(Error::UnsupportedCurve(other)),
        })
    }

    pub fn curve(&self) -> Curve {
        match self {
            SigningKey::P256(_) => Curve::P256,
            SigningKey::P384(_) => Curve::P384,
            SigningKey::P521(_) => Curve::P521,
            SigningKey::BrainpoolP256r1(_) => Curve::BrainpoolP256r1,
            SigningKey::BrainpoolP384r1(_) => Curve::BrainpoolP384r1,
            SigningKey::Ed25519(_) => Curve::Ed25519,
            SigningKey::Ed448(_) => Curve::Ed448,
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        match self {
            SigningKey::P256(k) => VerifyingKey::P256(*k.verifying_key()),
            SigningKey::P384(k) => VerifyingKey::P384(*k.verifying_key()),
            SigningKey::P521(k) => VerifyingKey::P521(p521::ecdsa::VerifyingKey::from(k)),
            SigningKey::BrainpoolP256r1(k) => VerifyingKey::BrainpoolP256r1(*k.verifying_key()),
            SigningKey::BrainpoolP384r1(k) => VerifyingKey::BrainpoolP384r1(*k.verifying_key()),
            SigningKey::Ed25519(k) => VerifyingKey::Ed25519(k.verifying_key()),
            SigningKey::Ed448(k) => VerifyingKey::Ed448(k.verifying_key()),
        }
    }

    /// Sign `data` and return the raw COSE signature (`r || s` for ECDSA).
    pub fn sign(&self, algorithm: iana::Algorithm, data: &[u8]) -> Result<Vec<u8>, Error> {
        self.curve().check_algorithm(algorithm)?;
        let failed = |e: signature::Error| Error::InvalidKey(e.to_string());
        Ok(match self {
            SigningKey::P256(k) => {
                let s: p256::ecdsa::Signature = k.try_sign(data).map_err(failed)?;
                s.to_bytes().to_vec()
            }
            SigningKey::P384(k) => {
                let s: p384::ecdsa::Signature = k.try_sign(data).map_err(failed)?;
                s.to_bytes().to_vec()
            }
            SigningKey::P521(k) => {
                let s: p521::ecdsa::Signature = k.try_sign(data).map_err(failed)?;
                s.to_bytes().to_vec()
            }
            SigningKey::BrainpoolP256r1(k) => {
                let s: bp256::r1::ecdsa::Signature = k.try_sign(data).map_err(failed)?;
                s.to_bytes().to_vec()
            }
            SigningKey::BrainpoolP384r1(k) => {
                let s: bp384::r1::ecdsa::Signature = k.try_sign(data).map_err(failed)?;
                s.to_bytes().to_vec()
            }
            SigningKey::Ed25519(k) => {
                let s: ed25519_dalek::Signature = k.try_sign(data).map_err(failed)?;
                s.to_bytes().to_vec()
            }
            // PureEdDSA, empty context
            SigningKey::Ed448(k) => k.sign_raw(data).to_bytes().to_vec(),
        })
    }
}

impl SignatureAlgorithm for SigningKey {
    fn algorithm(&self) -> iana::Algorithm {
        self.curve().default_algorithm()
    }
}

/// A public key able to check COSE signatures.
#[derive(Clone)]
pub enum VerifyingKey {
    P256(p256::ecdsa::VerifyingKey),
    P384(p384::ecdsa::VerifyingKey),
    P521(p521::ecdsa::VerifyingKey),
    BrainpoolP256r1(bp256::r1::ecdsa::VerifyingKey),
    BrainpoolP384r1(bp384::r1::ecdsa::VerifyingKey),
    Ed25519(ed25519_dalek::VerifyingKey),
    Ed448(ed448_goldilocks_plus::VerifyingKey),
}

impl std::fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("VerifyingKey").field(&self.curve()).finish()
    }
}

impl VerifyingKey {
    /// Parse a SEC1 point for the Weierstrass curves, or the raw key for the
    /// Edwards curves.
    pub fn from_public_bytes(curve: Curve, bytes: &[u8]) -> Result<Self, Error> {
        let invalid = |e: signature::Error| Error::InvalidKey(e.to_string());
        Ok(match curve {
            Curve::P256 => VerifyingKey::P256(
                p256::ecdsa::VerifyingKey::from_sec1_bytes(bytes).map_err(invalid)?,
            ),
            Curve::P384 => VerifyingKey::P384(
                p384::ecdsa::VerifyingKey::from_sec1_bytes(bytes).map_err(invalid)?,
            ),
            Curve::P521 => VerifyingKey::P521(
                p521::ecdsa::VerifyingKey::from_sec1_bytes(bytes).map_err(invalid)?,
            ),
            Curve::BrainpoolP256r1 => VerifyingKey::BrainpoolP256r1(
                bp256::r1::ecdsa::VerifyingKey::from_sec1_bytes(bytes).map_err(invalid)?,
            ),
            Curve::BrainpoolP384r1 => VerifyingKey::BrainpoolP384r1(
                bp384::r1::ecdsa::VerifyingKey::from_sec1_bytes(bytes).map_err(invalid)?,
            ),
            Curve::Ed25519 => {
                let raw: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| Error::InvalidKey("Ed25519 key must be 32 bytes".into()))?;
                VerifyingKey::Ed25519(ed25519_dalek::VerifyingKey::from_bytes(&raw).map_err(invalid)?)
            }
            Curve::Ed448 => {
                let raw: [u8; ED448_KEY_LEN] = bytes
                    .try_into()
                    .map_err(|_| Error::InvalidKey("Ed448 key must be 57 bytes".into()))?;
                VerifyingKey::Ed448(
                    ed448_goldilocks_plus::VerifyingKey::from_bytes(&raw)
                        .map_err(|_| Error::InvalidKey("not an Ed448 point".into()))?,
                )
            }
            other => return Err(Error::UnsupportedCurve(other)),
        })
    }

    pub fn curve(&self) -> Curve {
        match self {
            VerifyingKey::P256(_) => Curve::P256,
            VerifyingKey::P384(_) => Curve::P384,
            VerifyingKey::P521(_) => Curve::P521,
            VerifyingKey::BrainpoolP256r1(_) => Curve::BrainpoolP256r1,
            VerifyingKey::BrainpoolP384r1(_) => Curve::BrainpoolP384r1,
            VerifyingKey::Ed25519(_) => Curve::Ed25519,
            VerifyingKey::Ed448(_) => Curve::Ed448,
        }
    }

    /// Public key bytes: the uncompressed SEC1 point, or the raw Edwards key.
    pub fn to_public_bytes(&self) -> Vec<u8> {
        match self {
            VerifyingKey::P256(k) => k.to_encoded_point(false).as_bytes().to_vec(),
            VerifyingKey::P384(k) => k.to_encoded_point(false).as_bytes().to_vec(),
            VerifyingKey::P521(k) => k.to_encoded_point(false).as_bytes().to_vec(),
            VerifyingKey::BrainpoolP256r1(k) => k.to_encoded_point(false).as_bytes().to_vec(),
            VerifyingKey::BrainpoolP384r1(k) => k.to_encoded_point(false).as_bytes().to_vec(),
            VerifyingKey::Ed25519(k) => k.to_bytes().to_vec(),
            VerifyingKey::Ed448(k) => k.to_bytes().to_vec(),
        }
    }

    pub fn verify(
        &self,
        algorithm: iana::Algorithm,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), Error> {
        self.curve().check_algorithm(algorithm)?;
        let rejected = |_: signature::Error| Error::SignatureVerification;
        match self {
            VerifyingKey::P256(k) => {
                let s = p256::ecdsa::Signature::from_slice(signature).map_err(rejected)?;
                k.verify(data, &s).map_err(rejected)
            }
            VerifyingKey::P384(k) => {
                let s = p384::ecdsa::Signature::from_slice(signature).map_err(rejected)?;
                k.verify(data, &s).map_err(rejected)
            }
            VerifyingKey::P521(k) => {
                let s = p521::ecdsa::Signature::from_slice(signature).map_err(rejected)?;
                k.verify(data, &s).map_err(rejected)
            }
            VerifyingKey::BrainpoolP256r1(k) => {
                let s = bp256::r1::ecdsa::Signature::from_slice(signature).map_err(rejected)?;
                k.verify(data, &s).map_err(rejected)
            }
            VerifyingKey::BrainpoolP384r1(k) => {
                let s = bp384::r1::ecdsa::Signature::from_slice(signature).map_err(rejected)?;
                k.verify(data, &s).map_err(rejected)
            }
            VerifyingKey::Ed25519(k) => {
                let s = ed25519_dalek::Signature::from_slice(signature).map_err(rejected)?;
                Verifier::verify(k, data, &s).map_err(rejected)
            }
            VerifyingKey::Ed448(k) => {
                let s = ed448_goldilocks_plus::Signature::try_from(signature)
                    .map_err(|_| Error::SignatureVerification)?;
                k.verify_raw(&s, data)
                    .map_err(|_| Error::SignatureVerification)
            }
        }
    }
}

impl SignatureAlgorithm for VerifyingKey {
    fn algorithm(&self) -> iana::Algorithm {
        self.curve().default_algorithm()
    }
}
