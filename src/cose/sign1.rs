use ciborium::Value;
use coset::{
    iana, sig_structure_data, AsCborValue, CborSerializable, Header, ProtectedHeader,
    SignatureContext,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{assigned_algorithm, untag, Error, SigningKey, VerifyingKey};

const COSE_SIGN1_TAG: u64 = 18;

/// A COSE_Sign1 structure.
///
/// The protected header keeps the bytes it was received with, so a decoded
/// structure verifies against exactly what the signer signed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CoseSign1(pub(crate) coset::CoseSign1);

impl CoseSign1 {
    /// Sign `message` with `key`.
    ///
    /// The algorithm defaults to the one paired with the key's curve and is
    /// written into the protected header. When `include_message` is false the
    /// payload is detached and must be supplied again to [CoseSign1::verify].
    pub fn sign(
        key: &SigningKey,
        message: &[u8],
        include_message: bool,
        mut protected: Header,
        unprotected: Header,
        algorithm: Option<iana::Algorithm>,
    ) -> Result<Self, Error> {
        let algorithm = algorithm.unwrap_or_else(|| key.curve().default_algorithm());
        key.curve().check_algorithm(algorithm)?;
        protected.alg = Some(coset::Algorithm::Assigned(algorithm));
        let protected = ProtectedHeader {
            original_data: None,
            header: protected,
        };
        let tbs = sig_structure_data(
            SignatureContext::CoseSign1,
            protected.clone(),
            None,
            &[],
            message,
        );
        let signature = key.sign(algorithm, &tbs)?;
        Ok(CoseSign1(coset::CoseSign1 {
            protected,
            unprotected,
            payload: include_message.then(|| message.to_vec()),
            signature,
        }))
    }

    /// Check the signature, substituting `detached_payload` when no payload is embedded.
    ///
    /// `algorithm` overrides the protected header; without either the key's
    /// default algorithm is assumed.
    pub fn verify(
        &self,
        key: &VerifyingKey,
        detached_payload: Option<&[u8]>,
        algorithm: Option<iana::Algorithm>,
    ) -> Result<(), Error> {
        let algorithm = match (algorithm, self.0.protected.header.alg.as_ref()) {
            (Some(a), _) => a,
            (None, Some(alg)) => assigned_algorithm(alg)?,
            (None, None) => key.curve().default_algorithm(),
        };
        let payload = self
            .0
            .payload
            .as_deref()
            .or(detached_payload)
            .ok_or(Error::MissingPayload)?;
        let tbs = sig_structure_data(
            SignatureContext::CoseSign1,
            self.0.protected.clone(),
            None,
            &[],
            payload,
        );
        key.verify(algorithm, &tbs, &self.0.signature)
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.0.payload.as_deref()
    }

    pub fn protected(&self) -> &Header {
        &self.0.protected.header
    }

    pub fn unprotected(&self) -> &Header {
        &self.0.unprotected
    }

    pub fn signature(&self) -> &[u8] {
        &self.0.signature
    }

    pub fn inner(&self) -> &coset::CoseSign1 {
        &self.0
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        self.0
            .clone()
            .to_vec()
            .map_err(|e| Error::Malformed(e.to_string()))
    }

    /// Decode a COSE_Sign1, tagged or untagged.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let value: Value =
            crate::cbor::from_slice(bytes).map_err(|e| Error::Malformed(e.to_string()))?;
        Self::try_from(value)
    }
}

impl From<coset::CoseSign1> for CoseSign1 {
    fn from(inner: coset::CoseSign1) -> Self {
        Self(inner)
    }
}

impl TryFrom<Value> for CoseSign1 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Error> {
        coset::CoseSign1::from_cbor_value(untag(value, COSE_SIGN1_TAG))
            .map(Self)
            .map_err(|e| Error::Malformed(e.to_string()))
    }
}

impl Serialize for CoseSign1 {
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

impl<'de> Deserialize<'de> for CoseSign1 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        CoseSign1::try_from(value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cose::Curve;
    use coset::HeaderBuilder;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const PAYLOAD: &[u8] = b"This is the content.";

    fn signed(curve: Curve, include_message: bool) -> (CoseSign1, VerifyingKey) {
        let mut rng = StdRng::seed_from_u64(curve.cose_id() as u64);
        let key = SigningKey::generate(curve, &mut rng).unwrap();
        let protected = HeaderBuilder::new().key_id(b"key-1".to_vec()).build();
        let sign1 = CoseSign1::sign(
            &key,
            PAYLOAD,
            include_message,
            protected,
            Header::default(),
            None,
        )
        .unwrap();
        (sign1, key.verifying_key())
    }

    fn position(haystack: &[u8], needle: &[u8]) -> usize {
        haystack
            .windows(needle.len())
            .position(|w| w == needle)
            .unwrap()
    }

    #[test]
    fn roundtrip_every_supported_curve() {
        for curve in [
            Curve::P256,
            Curve::P384,
            Curve::P521,
            Curve::BrainpoolP256r1,
            Curve::BrainpoolP384r1,
            Curve::Ed25519,
            Curve::Ed448,
        ] {
            let (sign1, public) = signed(curve, true);
            let bytes = sign1.to_bytes().unwrap();
            let decoded = CoseSign1::from_bytes(&bytes).unwrap();
            assert_eq!(decoded.payload(), Some(PAYLOAD));
            decoded.verify(&public, None, None).unwrap();
            assert_eq!(
                decoded.protected().alg,
                Some(coset::Algorithm::Assigned(curve.default_algorithm()))
            );
        }
    }

    #[test]
    fn detached_payload() {
        let (sign1, public) = signed(Curve::P256, false);
        assert!(sign1.payload().is_none());
        assert!(matches!(
            sign1.verify(&public, None, None),
            Err(Error::MissingPayload)
        ));
        sign1.verify(&public, Some(PAYLOAD), None).unwrap();
        assert!(matches!(
            sign1.verify(&public, Some(b"This is the content!"), None),
            Err(Error::SignatureVerification)
        ));
    }

    #[test]
    fn mutated_protected_header_fails() {
        for curve in [Curve::P256, Curve::BrainpoolP256r1, Curve::Ed25519, Curve::Ed448] {
            let (sign1, public) = signed(curve, true);
            let mut bytes = sign1.to_bytes().unwrap();
            let at = position(&bytes, b"key-1");
            bytes[at + 4] = b'2';
            let tampered = CoseSign1::from_bytes(&bytes).unwrap();
            assert_eq!(tampered.protected().key_id, b"key-2".to_vec());
            assert!(matches!(
                tampered.verify(&public, None, None),
                Err(Error::SignatureVerification)
            ));
        }
    }

    #[test]
    fn mutated_payload_and_signature_fail() {
        let (sign1, public) = signed(Curve::P384, true);
        let bytes = sign1.to_bytes().unwrap();

        let mut payload_flip = bytes.clone();
        let at = position(&payload_flip, PAYLOAD);
        payload_flip[at] ^= 0x01;
        assert!(matches!(
            CoseSign1::from_bytes(&payload_flip)
                .unwrap()
                .verify(&public, None, None),
            Err(Error::SignatureVerification)
        ));

        let mut signature_flip = bytes;
        let last = signature_flip.len() - 1;
        signature_flip[last] ^= 0x80;
        assert!(matches!(
            CoseSign1::from_bytes(&signature_flip)
                .unwrap()
                .verify(&public, None, None),
            Err(Error::SignatureVerification)
        ));
    }

    #[test]
    fn wrong_key_fails() {
        let (sign1, _) = signed(Curve::P256, true);
        let mut rng = StdRng::seed_from_u64(99);
        let other = SigningKey::generate(Curve::P256, &mut rng)
            .unwrap()
            .verifying_key();
        assert!(matches!(
            sign1.verify(&other, None, None),
            Err(Error::SignatureVerification)
        ));
    }

    #[test]
    fn tagged_input_is_accepted() {
        let (sign1, public) = signed(Curve::Ed25519, true);
        let value = sign1.0.clone().to_cbor_value().unwrap();
        let tagged = crate::cbor::to_vec(&Value::Tag(COSE_SIGN1_TAG, Box::new(value))).unwrap();
        CoseSign1::from_bytes(&tagged)
            .unwrap()
            .verify(&public, None, None)
            .unwrap();
    }
}
