use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use coset::{iana, sig_structure_data, Header, ProtectedHeader, SignatureContext};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::cose::{self, CoseSign1, SigningKey, VerifyingKey};
use crate::definitions::{
    helpers::{tag24, Tag24},
    issuer_signed::{self, item_digest, IssuerNamespaces, IssuerSigned},
    mso::MSO_VERSION,
    DeviceKeyInfo, DigestAlgorithm, Mso, ValidityInfo,
};

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
/// A signed mdoc.
pub struct Mdoc {
    pub doc_type: String,
    pub mso: Mso,
    pub namespaces: IssuerNamespaces,
    pub issuer_auth: CoseSign1,
}

#[derive(Debug, Clone)]
/// An incomplete mdoc, requiring a remotely signed signature to be completed.
pub struct PreparedMdoc {
    doc_type: String,
    mso: Mso,
    namespaces: IssuerNamespaces,
    protected: ProtectedHeader,
    payload: Vec<u8>,
    signature_payload: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct Builder {
    doc_type: Option<String>,
    namespaces: Option<IssuerNamespaces>,
    validity_info: Option<ValidityInfo>,
    digest_algorithm: Option<DigestAlgorithm>,
    device_key_info: Option<DeviceKeyInfo>,
    status: Option<ciborium::Value>,
}

/// Failures when checking an mdoc received from a holder.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("issuer signature is invalid: {0}")]
    IssuerAuth(#[from] cose::Error),
    #[error("issuer auth carries no mobile security object")]
    MissingMso,
    #[error("mobile security object could not be decoded: {0}")]
    MsoDecoding(#[from] tag24::Error),
    #[error("doc type '{found}' does not match the signed '{signed}'")]
    DocTypeMismatch { signed: String, found: String },
    #[error("item {element} in {namespace} has no signed digest")]
    UnsignedItem { namespace: String, element: String },
    #[error("digest of {element} in {namespace} does not match the signed value")]
    DigestMismatch { namespace: String, element: String },
    #[error(transparent)]
    Item(#[from] issuer_signed::Error),
}

impl Mdoc {
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Prepare mdoc for remote signing.
    pub fn prepare(
        doc_type: String,
        namespaces: IssuerNamespaces,
        validity_info: ValidityInfo,
        digest_algorithm: DigestAlgorithm,
        device_key_info: DeviceKeyInfo,
        status: Option<ciborium::Value>,
        signature_algorithm: iana::Algorithm,
    ) -> Result<PreparedMdoc> {
        if let Some(authorizations) = &device_key_info.key_authorizations {
            authorizations.validate()?;
        }

        let value_digests = namespaces.value_digests(digest_algorithm)?;

        let mso = Mso {
            version: MSO_VERSION.to_string(),
            digest_algorithm,
            value_digests,
            device_key_info,
            doc_type: doc_type.clone(),
            validity_info,
            status,
        };

        let payload = Tag24::new(&mso)?.to_tagged_bytes()?;

        let protected = ProtectedHeader {
            original_data: None,
            header: Header {
                alg: Some(coset::Algorithm::Assigned(signature_algorithm)),
                ..Default::default()
            },
        };
        let signature_payload = sig_structure_data(
            SignatureContext::CoseSign1,
            protected.clone(),
            None,
            &[],
            &payload,
        );

        Ok(PreparedMdoc {
            doc_type,
            mso,
            namespaces,
            protected,
            payload,
            signature_payload,
        })
    }

    /// Directly sign and issue an mdoc.
    pub fn issue(
        doc_type: String,
        namespaces: IssuerNamespaces,
        validity_info: ValidityInfo,
        digest_algorithm: DigestAlgorithm,
        device_key_info: DeviceKeyInfo,
        status: Option<ciborium::Value>,
        signer: &SigningKey,
    ) -> Result<Mdoc> {
        let algorithm = signer.curve().default_algorithm();
        let prepared_mdoc = Self::prepare(
            doc_type,
            namespaces,
            validity_info,
            digest_algorithm,
            device_key_info,
            status,
            algorithm,
        )?;

        let signature = signer
            .sign(algorithm, prepared_mdoc.signature_payload())
            .map_err(|e| anyhow!("error signing cosesign1: {}", e))?;

        Ok(prepared_mdoc.complete(signature))
    }

    /// The issuer-signed structure disclosing only `requested` elements.
    pub fn issuer_signed(&self, requested: &BTreeMap<String, Vec<String>>) -> IssuerSigned {
        IssuerSigned {
            namespaces: Some(self.namespaces.filter(requested)),
            issuer_auth: self.issuer_auth.clone(),
        }
    }

    pub fn verify_issuer_auth(&self, issuer_key: &VerifyingKey) -> Result<(), Error> {
        verify_issuer_auth(&self.issuer_auth, issuer_key).map(|_| ())
    }

    pub fn verify_item_digests(&self) -> Result<(), Error> {
        verify_item_digests(&self.mso, &self.namespaces)
    }
}

impl PreparedMdoc {
    /// Retrieve the payload for a remote signature.
    pub fn signature_payload(&self) -> &[u8] {
        &self.signature_payload
    }

    /// Supply the remotely signed signature to complete and issue the prepared mdoc.
    pub fn complete(self, signature: Vec<u8>) -> Mdoc {
        let PreparedMdoc {
            doc_type,
            namespaces,
            mso,
            protected,
            payload,
            ..
        } = self;

        let issuer_auth = CoseSign1::from(coset::CoseSign1 {
            protected,
            unprotected: Header::default(),
            payload: Some(payload),
            signature,
        });

        Mdoc {
            doc_type,
            mso,
            namespaces,
            issuer_auth,
        }
    }
}

impl Builder {
    /// Set the document type.
    pub fn doc_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }

    /// Set the data elements.
    pub fn namespaces(mut self, namespaces: IssuerNamespaces) -> Self {
        self.namespaces = Some(namespaces);
        self
    }

    /// Build the issuer namespaces from `(namespace, element, value)` triples.
    pub fn elements<R, I, N, E>(mut self, elements: I, rng: &mut R) -> Result<Self>
    where
        R: RngCore + CryptoRng,
        I: IntoIterator<Item = (N, E, ciborium::Value)>,
        N: Into<String>,
        E: Into<String>,
    {
        let builder = elements
            .into_iter()
            .fold(IssuerNamespaces::builder(), |b, (namespace, element, value)| {
                b.element(namespace, element, value)
            });
        self.namespaces = Some(builder.build(rng)?);
        Ok(self)
    }

    /// Set the validity information
    pub fn validity_info(mut self, validity_info: ValidityInfo) -> Self {
        self.validity_info = Some(validity_info);
        self
    }

    /// Set the digest algorithm to be used for hashing the data elements.
    pub fn digest_algorithm(mut self, digest_algorithm: DigestAlgorithm) -> Self {
        self.digest_algorithm = Some(digest_algorithm);
        self
    }

    /// Set the information about the device key that this mdoc will be issued to.
    pub fn device_key_info(mut self, device_key_info: DeviceKeyInfo) -> Self {
        self.device_key_info = Some(device_key_info);
        self
    }

    /// Attach a status descriptor, carried as is.
    pub fn status(mut self, status: ciborium::Value) -> Self {
        self.status = Some(status);
        self
    }

    #[allow(clippy::type_complexity)]
    fn into_parts(
        self,
    ) -> Result<(
        String,
        IssuerNamespaces,
        ValidityInfo,
        DigestAlgorithm,
        DeviceKeyInfo,
        Option<ciborium::Value>,
    )> {
        let doc_type = self
            .doc_type
            .ok_or_else(|| anyhow!("missing parameter: 'doc_type'"))?;
        let namespaces = self
            .namespaces
            .ok_or_else(|| anyhow!("missing parameter: 'namespaces'"))?;
        let validity_info = self
            .validity_info
            .ok_or_else(|| anyhow!("missing parameter: 'validity_info'"))?;
        let digest_algorithm = self
            .digest_algorithm
            .ok_or_else(|| anyhow!("missing parameter: 'digest_algorithm'"))?;
        let device_key_info = self
            .device_key_info
            .ok_or_else(|| anyhow!("missing parameter: 'device_key_info'"))?;
        Ok((
            doc_type,
            namespaces,
            validity_info,
            digest_algorithm,
            device_key_info,
            self.status,
        ))
    }

    /// Prepare the mdoc for remote signing.
    ///
    /// The signature algorithm which the mdoc will be signed with must be known ahead of time as
    /// it is a required field in the signature headers.
    pub fn prepare(self, signature_algorithm: iana::Algorithm) -> Result<PreparedMdoc> {
        let (doc_type, namespaces, validity_info, digest_algorithm, device_key_info, status) =
            self.into_parts()?;
        Mdoc::prepare(
            doc_type,
            namespaces,
            validity_info,
            digest_algorithm,
            device_key_info,
            status,
            signature_algorithm,
        )
    }

    /// Directly issue an mdoc.
    pub fn issue(self, signer: &SigningKey) -> Result<Mdoc> {
        let (doc_type, namespaces, validity_info, digest_algorithm, device_key_info, status) =
            self.into_parts()?;
        Mdoc::issue(
            doc_type,
            namespaces,
            validity_info,
            digest_algorithm,
            device_key_info,
            status,
            signer,
        )
    }
}

/// Check the issuer signature and return the signed mobile security object.
pub fn verify_issuer_auth(issuer_auth: &CoseSign1, issuer_key: &VerifyingKey) -> Result<Mso, Error> {
    issuer_auth.verify(issuer_key, None, None)?;
    let payload = issuer_auth.payload().ok_or(Error::MissingMso)?;
    let mso: Tag24<Mso> = crate::cbor::from_slice(payload)
        .map_err(|e| Error::MsoDecoding(tag24::Error::UnableToDecode(e)))?;
    Ok(mso.into_inner())
}

/// Check that every disclosed item hashes to the digest the issuer signed for it.
pub fn verify_item_digests(mso: &Mso, namespaces: &IssuerNamespaces) -> Result<(), Error> {
    for (namespace, item) in namespaces.items() {
        let element = item.as_ref().element_identifier().to_string();
        let signed = mso
            .digest(namespace, item.as_ref().digest_id())
            .ok_or_else(|| Error::UnsignedItem {
                namespace: namespace.to_string(),
                element: element.clone(),
            })?;
        if item_digest(item, mso.digest_algorithm)? != signed.as_ref() {
            return Err(Error::DigestMismatch {
                namespace: namespace.to_string(),
                element,
            });
        }
    }
    Ok(())
}

/// Verify an [IssuerSigned] received for `doc_type`, returning its mobile security object.
pub fn verify_issuer_signed(
    issuer_signed: &IssuerSigned,
    doc_type: &str,
    issuer_key: &VerifyingKey,
) -> Result<Mso, Error> {
    let mso = verify_issuer_auth(&issuer_signed.issuer_auth, issuer_key)?;
    if mso.doc_type != doc_type {
        return Err(Error::DocTypeMismatch {
            signed: mso.doc_type,
            found: doc_type.to_string(),
        });
    }
    if let Some(namespaces) = &issuer_signed.namespaces {
        verify_item_digests(&mso, namespaces)?;
    }
    tracing::debug!(
        "issuer signed {} items of {doc_type}",
        issuer_signed.namespaces.as_ref().map_or(0, IssuerNamespaces::len)
    );
    Ok(mso)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cose::Curve;
    use crate::definitions::{CoseKey, KeyAuthorizations};
    use rand::{rngs::StdRng, SeedableRng};
    use time::macros::datetime;

    const DOC_TYPE: &str = "org.iso.18013.5.1.mDL";
    const MDL: &str = "org.iso.18013.5.1";

    fn validity_info() -> ValidityInfo {
        ValidityInfo::new(
            datetime!(2024-03-01 10:00 UTC),
            datetime!(2024-03-01 10:00 UTC),
            datetime!(2029-03-01 10:00 UTC),
            Some(datetime!(2025-03-01 10:00 UTC)),
        )
        .unwrap()
    }

    fn issue(curve: Curve, rng: &mut StdRng) -> (Mdoc, SigningKey) {
        let issuer = SigningKey::generate(curve, rng).unwrap();
        let device = SigningKey::generate(Curve::P256, rng).unwrap();
        let device_key_info = DeviceKeyInfo {
            device_key: CoseKey::from(&device.verifying_key()),
            key_authorizations: Some(KeyAuthorizations {
                namespaces: Some(vec![MDL.to_string()]),
                data_elements: None,
            }),
            key_info: None,
        };
        let elements = [
            (MDL, "family_name", ciborium::Value::from("Smith")),
            (MDL, "given_name", "Alice".into()),
            (MDL, "document_number", "I8889680".into()),
        ];
        let mdoc = Mdoc::builder()
            .doc_type(DOC_TYPE)
            .elements(elements, rng)
            .unwrap()
            .validity_info(validity_info())
            .digest_algorithm(DigestAlgorithm::SHA256)
            .device_key_info(device_key_info)
            .issue(&issuer)
            .unwrap();
        (mdoc, issuer)
    }

    #[test]
    fn issue_minimal_mdoc() {
        let mut rng = StdRng::seed_from_u64(11);
        for curve in [Curve::P256, Curve::P384, Curve::P521, Curve::Ed25519] {
            let (mdoc, issuer) = issue(curve, &mut rng);
            mdoc.verify_issuer_auth(&issuer.verifying_key()).unwrap();
            mdoc.verify_item_digests().unwrap();
            assert_eq!(mdoc.mso.value_digests[MDL].len(), 3);
        }
    }

    #[test]
    fn disclosure_verifies_against_signed_digests() {
        let mut rng = StdRng::seed_from_u64(12);
        let (mdoc, issuer) = issue(Curve::P256, &mut rng);
        let requested = BTreeMap::from([(MDL.to_string(), vec!["given_name".to_string()])]);
        let disclosed = mdoc.issuer_signed(&requested);

        let bytes = crate::cbor::to_vec(&disclosed).unwrap();
        let received: IssuerSigned = crate::cbor::from_slice(&bytes).unwrap();
        let mso = verify_issuer_signed(&received, DOC_TYPE, &issuer.verifying_key()).unwrap();
        assert_eq!(mso.validity_info, validity_info());
        assert!(matches!(
            verify_issuer_signed(&received, "org.example.other", &issuer.verifying_key()),
            Err(Error::DocTypeMismatch { .. })
        ));
    }

    #[test]
    fn foreign_item_is_rejected() {
        let mut rng = StdRng::seed_from_u64(13);
        let (mdoc, _) = issue(Curve::P256, &mut rng);
        let (other, _) = issue(Curve::P256, &mut rng);
        // same digest IDs, different salts
        assert!(matches!(
            verify_item_digests(&mdoc.mso, &other.namespaces),
            Err(Error::DigestMismatch { .. })
        ));
    }

    #[test]
    fn wrong_issuer_key() {
        let mut rng = StdRng::seed_from_u64(14);
        let (mdoc, _) = issue(Curve::P256, &mut rng);
        let stranger = SigningKey::generate(Curve::P256, &mut rng).unwrap();
        assert!(matches!(
            mdoc.verify_issuer_auth(&stranger.verifying_key()),
            Err(Error::IssuerAuth(cose::Error::SignatureVerification))
        ));
    }

    #[test]
    fn remote_signing() {
        let mut rng = StdRng::seed_from_u64(15);
        let issuer = SigningKey::generate(Curve::P384, &mut rng).unwrap();
        let device = SigningKey::generate(Curve::P256, &mut rng).unwrap();
        let namespaces = IssuerNamespaces::builder()
            .element(MDL, "family_name", "Smith")
            .build(&mut rng)
            .unwrap();
        let prepared = Mdoc::builder()
            .doc_type(DOC_TYPE)
            .namespaces(namespaces)
            .validity_info(validity_info())
            .digest_algorithm(DigestAlgorithm::SHA384)
            .device_key_info(DeviceKeyInfo {
                device_key: CoseKey::from(&device.verifying_key()),
                key_authorizations: None,
                key_info: None,
            })
            .prepare(iana::Algorithm::ES384)
            .unwrap();
        let signature = issuer
            .sign(iana::Algorithm::ES384, prepared.signature_payload())
            .unwrap();
        let mdoc = prepared.complete(signature);
        mdoc.verify_issuer_auth(&issuer.verifying_key()).unwrap();
    }

    #[test]
    fn missing_parameter() {
        let err = Mdoc::builder()
            .doc_type(DOC_TYPE)
            .prepare(iana::Algorithm::ES256)
            .unwrap_err();
        assert!(err.to_string().contains("namespaces"));
    }
}
