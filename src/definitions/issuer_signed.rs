//! This module contains the definition of the [IssuerSigned] struct and related types.
//!
//! Every data element the issuer vouches for travels as an [IssuerSignedItem]
//! wrapped in a tag 24 bstr. The digest of that tagged item, not of the bare
//! value, is what the mobile security object commits to.
//!
//! # Notes
//!
//! - [IssuerNamespaces] is only produced by [IssuerNamespaces::builder], which
//!   draws the digest IDs of a document from one shuffled `0..k` sequence and a
//!   fresh salt per item, or by decoding.
//! - [IssuerNamespaces::filter] never re-encodes an item, so the disclosed
//!   bytes hash to exactly what was signed.
use std::collections::{BTreeMap, BTreeSet};

use ciborium::Value;
use rand::{seq::SliceRandom, CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::cose::CoseSign1;
use crate::definitions::{
    helpers::{tag24, ByteStr, Tag24},
    mso::{DigestAlgorithm, DigestId, DigestIds},
};

/// Shortest salt an item may carry.
pub const MIN_RANDOM_LEN: usize = 16;

/// Represents an issuer-signed object.
///
/// [IssuerSigned::namespaces] holds the disclosed items, [IssuerSigned::issuer_auth] the
/// COSE_Sign1 over the mobile security object.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerSigned {
    #[serde(skip_serializing_if = "Option::is_none", rename = "nameSpaces")]
    pub namespaces: Option<IssuerNamespaces>,
    pub issuer_auth: CoseSign1,
}

pub type IssuerSignedItemBytes = Tag24<IssuerSignedItem>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("random must be at least {MIN_RANDOM_LEN} bytes, got {0}")]
    RandomTooShort(usize),
    #[error("element '{element}' appears twice in namespace '{namespace}'")]
    DuplicateElement { namespace: String, element: String },
    #[error("digest ID {0} is used by more than one item")]
    DuplicateDigestId(DigestId),
    #[error("at least one data element is required")]
    NoElements,
    #[error("unable to encode item: {0}")]
    Encoding(#[from] tag24::Error),
}

/// Represents an item signed by the issuer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "UncheckedItem")]
pub struct IssuerSignedItem {
    #[serde(rename = "digestID")]
    pub(crate) digest_id: DigestId,
    pub(crate) random: ByteStr,
    pub(crate) element_identifier: String,
    pub(crate) element_value: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UncheckedItem {
    #[serde(rename = "digestID")]
    digest_id: DigestId,
    random: ByteStr,
    element_identifier: String,
    element_value: Value,
}

impl TryFrom<UncheckedItem> for IssuerSignedItem {
    type Error = Error;

    fn try_from(item: UncheckedItem) -> Result<Self, Error> {
        IssuerSignedItem::new(
            item.digest_id,
            item.random,
            item.element_identifier,
            item.element_value,
        )
    }
}

impl IssuerSignedItem {
    pub fn new(
        digest_id: DigestId,
        random: impl Into<ByteStr>,
        element_identifier: impl Into<String>,
        element_value: Value,
    ) -> Result<Self, Error> {
        let random = random.into();
        if random.as_ref().len() < MIN_RANDOM_LEN {
            return Err(Error::RandomTooShort(random.as_ref().len()));
        }
        Ok(Self {
            digest_id,
            random,
            element_identifier: element_identifier.into(),
            element_value,
        })
    }

    pub fn digest_id(&self) -> DigestId {
        self.digest_id
    }

    pub fn random(&self) -> &[u8] {
        self.random.as_ref()
    }

    pub fn element_identifier(&self) -> &str {
        &self.element_identifier
    }

    pub fn element_value(&self) -> &Value {
        &self.element_value
    }
}

/// Digest of `#6.24(bstr .cbor IssuerSignedItem)`, the form the MSO commits to.
pub fn item_digest(
    item: &IssuerSignedItemBytes,
    algorithm: DigestAlgorithm,
) -> Result<Vec<u8>, Error> {
    Ok(algorithm.digest(&item.to_tagged_bytes()?))
}

/// Issuer-signed items keyed by namespace.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, Vec<IssuerSignedItemBytes>>")]
pub struct IssuerNamespaces(BTreeMap<String, Vec<IssuerSignedItemBytes>>);

impl TryFrom<BTreeMap<String, Vec<IssuerSignedItemBytes>>> for IssuerNamespaces {
    type Error = Error;

    fn try_from(map: BTreeMap<String, Vec<IssuerSignedItemBytes>>) -> Result<Self, Error> {
        let mut seen = BTreeSet::new();
        for (namespace, items) in map.iter() {
            let mut elements = BTreeSet::new();
            for item in items {
                let item = item.as_ref();
                if !seen.insert(item.digest_id) {
                    return Err(Error::DuplicateDigestId(item.digest_id));
                }
                if !elements.insert(item.element_identifier.as_str()) {
                    return Err(Error::DuplicateElement {
                        namespace: namespace.clone(),
                        element: item.element_identifier.clone(),
                    });
                }
            }
        }
        Ok(Self(map))
    }
}

impl IssuerNamespaces {
    pub fn builder() -> Builder {
        Builder::default()
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn get(&self, namespace: &str) -> Option<&[IssuerSignedItemBytes]> {
        self.0.get(namespace).map(Vec::as_slice)
    }

    /// Every item with the namespace it belongs to.
    pub fn items(&self) -> impl Iterator<Item = (&str, &IssuerSignedItemBytes)> {
        self.0
            .iter()
            .flat_map(|(namespace, items)| items.iter().map(move |i| (namespace.as_str(), i)))
    }

    pub fn len(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn value_digests(
        &self,
        algorithm: DigestAlgorithm,
    ) -> Result<BTreeMap<String, DigestIds>, Error> {
        self.0
            .iter()
            .map(|(namespace, items)| {
                let digests = items
                    .iter()
                    .map(|item| {
                        Ok((
                            item.as_ref().digest_id,
                            ByteStr::from(item_digest(item, algorithm)?),
                        ))
                    })
                    .collect::<Result<DigestIds, Error>>()?;
                Ok((namespace.clone(), digests))
            })
            .collect()
    }

    /// Keep only the requested elements. The source is left untouched and
    /// namespaces with nothing left are dropped.
    pub fn filter(&self, requested: &BTreeMap<String, Vec<String>>) -> IssuerNamespaces {
        let filtered = self
            .0
            .iter()
            .filter_map(|(namespace, items)| {
                let wanted = requested.get(namespace)?;
                let kept: Vec<_> = items
                    .iter()
                    .filter(|item| wanted.contains(&item.as_ref().element_identifier))
                    .cloned()
                    .collect();
                (!kept.is_empty()).then(|| (namespace.clone(), kept))
            })
            .collect();
        IssuerNamespaces(filtered)
    }
}

/// Collects `(namespace, element, value)` triples for [IssuerNamespaces].
#[derive(Debug, Clone, Default)]
pub struct Builder {
    elements: Vec<(String, String, Value)>,
}

impl Builder {
    pub fn element(
        mut self,
        namespace: impl Into<String>,
        element_identifier: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.elements
            .push((namespace.into(), element_identifier.into(), value.into()));
        self
    }

    /// Assign every element a digest ID from a shuffled `0..k` and a fresh salt.
    pub fn build<R: RngCore + CryptoRng>(self, rng: &mut R) -> Result<IssuerNamespaces, Error> {
        if self.elements.is_empty() {
            return Err(Error::NoElements);
        }
        let mut digest_ids: Vec<DigestId> = (0..self.elements.len() as DigestId).collect();
        digest_ids.shuffle(rng);

        let mut namespaces: BTreeMap<String, Vec<IssuerSignedItemBytes>> = BTreeMap::new();
        for ((namespace, element_identifier, value), digest_id) in
            self.elements.into_iter().zip(digest_ids)
        {
            let items = namespaces.entry(namespace.clone()).or_default();
            if items
                .iter()
                .any(|i| i.as_ref().element_identifier == element_identifier)
            {
                return Err(Error::DuplicateElement {
                    namespace,
                    element: element_identifier,
                });
            }
            let mut random = [0u8; MIN_RANDOM_LEN];
            rng.fill_bytes(&mut random);
            let item = IssuerSignedItem::new(digest_id, random.to_vec(), element_identifier, value)?;
            items.push(Tag24::new(item)?);
        }
        Ok(IssuerNamespaces(namespaces))
    }
}
