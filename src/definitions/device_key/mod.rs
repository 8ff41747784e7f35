use std::collections::BTreeMap;

use ciborium::Value;
use serde::{Deserialize, Serialize};

pub mod cose_key;
pub use cose_key::CoseKey;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceKeyInfo {
    pub device_key: CoseKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_authorizations: Option<KeyAuthorizations>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_info: Option<BTreeMap<i64, Value>>,
}

#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KeyAuthorizations {
    #[serde(skip_serializing_if = "Option::is_none", rename = "nameSpaces")]
    pub namespaces: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_elements: Option<BTreeMap<String, Vec<String>>>,
}

impl KeyAuthorizations {
    /// If a namespace is present in authorized namespaces then it cannot be present in
    /// authorized data elements. Neither list may be empty when present.
    pub fn validate(&self) -> Result<(), Error> {
        if matches!(&self.namespaces, Some(ns) if ns.is_empty()) {
            return Err(Error::Empty("nameSpaces"));
        }
        let Some(authorized_data_elements) = &self.data_elements else {
            return Ok(());
        };
        if authorized_data_elements.is_empty()
            || authorized_data_elements.values().any(Vec::is_empty)
        {
            return Err(Error::Empty("dataElements"));
        }

        if let Some(authorized_namespaces) = &self.namespaces {
            authorized_namespaces.iter().try_for_each(|namespace| {
                authorized_data_elements
                    .get(namespace)
                    .map_or(Ok(()), |_| Err(Error::DoubleAuthorized(namespace.clone())))
            })
        } else {
            Ok(())
        }
    }

    /// Determine whether the key is permitted to sign over the designated element.
    pub fn permitted(&self, namespace: &str, element_identifier: &str) -> bool {
        if let Some(namespaces) = self.namespaces.as_ref() {
            if namespaces.iter().any(|n| n == namespace) {
                return true;
            }
        }
        self.data_elements
            .as_ref()
            .and_then(|namespaces| namespaces.get(namespace))
            .map(|elements| elements.iter().any(|e| e == element_identifier))
            .unwrap_or(false)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("namespace '{0}' cannot be present in both authorized_namespaces and authorized_data_elements")]
    DoubleAuthorized(String),
    #[error("{0} must not be empty")]
    Empty(&'static str),
}
