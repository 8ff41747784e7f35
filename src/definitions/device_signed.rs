//! This module contains the definitions related to device signing.
//!
//! The [DeviceSigned] struct carries the elements the holder's device vouches for
//! itself together with a signature or MAC over [DeviceAuthentication], which binds
//! them to the session transcript.
use std::collections::BTreeMap;

use ciborium::Value;
use serde::{Deserialize, Serialize};

use crate::cose::{mac0::MacKey, CoseMac0, CoseSign1, SigningKey, VerifyingKey};
use crate::definitions::{
    helpers::{tag24, Tag24},
    session::SessionTranscript,
};

/// Represents a device-signed structure.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSigned {
    #[serde(rename = "nameSpaces")]
    pub namespaces: DeviceNamespacesBytes,
    pub device_auth: DeviceAuth,
}

pub type DeviceNamespacesBytes = Tag24<DeviceNamespaces>;
pub type DeviceSignedItems = BTreeMap<String, Value>;

/// Namespace to element to value, as asserted by the device.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceNamespaces(BTreeMap<String, DeviceSignedItems>);

impl DeviceNamespaces {
    pub fn builder() -> Builder {
        Builder::default()
    }

    pub fn get(&self, namespace: &str) -> Option<&DeviceSignedItems> {
        self.0.get(namespace)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &Value)> {
        self.0.iter().flat_map(|(namespace, items)| {
            items
                .iter()
                .map(move |(element, value)| (namespace.as_str(), element.as_str(), value))
        })
    }

    pub fn len(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A new instance holding only the requested elements.
    pub fn filter(&self, requested: &BTreeMap<String, Vec<String>>) -> DeviceNamespaces {
        let filtered = self
            .0
            .iter()
            .filter_map(|(namespace, items)| {
                let wanted = requested.get(namespace)?;
                let kept: DeviceSignedItems = items
                    .iter()
                    .filter(|(element, _)| wanted.contains(element))
                    .map(|(element, value)| (element.clone(), value.clone()))
                    .collect();
                (!kept.is_empty()).then(|| (namespace.clone(), kept))
            })
            .collect();
        DeviceNamespaces(filtered)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Builder {
    namespaces: BTreeMap<String, DeviceSignedItems>,
}

impl Builder {
    pub fn element(
        mut self,
        namespace: impl Into<String>,
        element_identifier: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.namespaces
            .entry(namespace.into())
            .or_default()
            .insert(element_identifier.into(), value.into());
        self
    }

    pub fn build(self) -> DeviceNamespaces {
        DeviceNamespaces(self.namespaces)
    }
}

/// Device authentication, either a signature or a MAC with a session-derived key.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceAuth {
    DeviceSignature(CoseSign1),
    DeviceMac(CoseMac0),
}

pub type DeviceAuthenticationBytes = Tag24<DeviceAuthentication>;

/// `["DeviceAuthentication", SessionTranscript, DocType, DeviceNameSpacesBytes]`
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DeviceAuthentication(
    String,
    SessionTranscript,
    String,
    DeviceNamespacesBytes,
);

impl DeviceAuthentication {
    pub fn new(
        transcript: SessionTranscript,
        doc_type: String,
        namespaces_bytes: DeviceNamespacesBytes,
    ) -> Self {
        Self(
            "DeviceAuthentication".to_string(),
            transcript,
            doc_type,
            namespaces_bytes,
        )
    }

    /// The detached payload of the device signature or MAC.
    pub fn to_tagged_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(Tag24::new(self.clone())?.to_tagged_bytes()?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unable to encode value as CBOR: {0}")]
    UnableToEncode(#[from] tag24::Error),
    #[error(transparent)]
    Cose(#[from] crate::cose::Error),
    #[error("expected a device {expected}, found the other kind")]
    WrongAuthKind { expected: &'static str },
}

impl DeviceSigned {
    /// Sign `namespaces` for `doc_type` within the given session.
    pub fn sign(
        key: &SigningKey,
        transcript: SessionTranscript,
        doc_type: String,
        namespaces: DeviceNamespaces,
    ) -> Result<Self, Error> {
        let namespaces = Tag24::new(namespaces)?;
        let payload =
            DeviceAuthentication::new(transcript, doc_type, namespaces.clone()).to_tagged_bytes()?;
        let signature = CoseSign1::sign(
            key,
            &payload,
            false,
            Default::default(),
            Default::default(),
            None,
        )?;
        Ok(Self {
            namespaces,
            device_auth: DeviceAuth::DeviceSignature(signature),
        })
    }

    /// MAC `namespaces` for `doc_type` within the given session.
    pub fn mac(
        key: &MacKey,
        transcript: SessionTranscript,
        doc_type: String,
        namespaces: DeviceNamespaces,
    ) -> Result<Self, Error> {
        let namespaces = Tag24::new(namespaces)?;
        let payload =
            DeviceAuthentication::new(transcript, doc_type, namespaces.clone()).to_tagged_bytes()?;
        let tag = CoseMac0::mac(key, &payload, false, Default::default(), Default::default())?;
        Ok(Self {
            namespaces,
            device_auth: DeviceAuth::DeviceMac(tag),
        })
    }

    fn authentication_payload(
        &self,
        transcript: SessionTranscript,
        doc_type: String,
    ) -> Result<Vec<u8>, Error> {
        DeviceAuthentication::new(transcript, doc_type, self.namespaces.clone()).to_tagged_bytes()
    }

    pub fn verify_signature(
        &self,
        key: &VerifyingKey,
        transcript: SessionTranscript,
        doc_type: String,
    ) -> Result<(), Error> {
        let DeviceAuth::DeviceSignature(signature) = &self.device_auth else {
            return Err(Error::WrongAuthKind {
                expected: "signature",
            });
        };
        let payload = self.authentication_payload(transcript, doc_type)?;
        Ok(signature.verify(key, Some(&payload), None)?)
    }

    pub fn verify_mac(
        &self,
        key: &MacKey,
        transcript: SessionTranscript,
        doc_type: String,
    ) -> Result<(), Error> {
        let DeviceAuth::DeviceMac(tag) = &self.device_auth else {
            return Err(Error::WrongAuthKind { expected: "MAC" });
        };
        let payload = self.authentication_payload(transcript, doc_type)?;
        Ok(tag.verify(key, Some(&payload))?)
    }
}
