use std::collections::BTreeMap;

use ciborium::Value;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::definitions::{helpers::ByteStr, DeviceKeyInfo, ValidityInfo};

pub type DigestId = u64;
pub type DigestIds = BTreeMap<DigestId, ByteStr>;

pub const MSO_VERSION: &str = "1.0";

/// Mobile security object, the issuer-signed statement binding item digests to a device key.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mso {
    pub version: String,
    pub digest_algorithm: DigestAlgorithm,
    pub value_digests: BTreeMap<String, DigestIds>,
    pub device_key_info: DeviceKeyInfo,
    pub doc_type: String,
    pub validity_info: ValidityInfo,
    /// Status list reference, carried opaquely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
}

impl Mso {
    pub fn digest(&self, namespace: &str, digest_id: DigestId) -> Option<&ByteStr> {
        self.value_digests.get(namespace)?.get(&digest_id)
    }
}

#[derive(Clone, Debug, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum DigestAlgorithm {
    #[serde(rename = "SHA-256")]
    SHA256,
    #[serde(rename = "SHA-384")]
    SHA384,
    #[serde(rename = "SHA-512")]
    SHA512,
}

impl DigestAlgorithm {
    pub fn digest(self, bytes: &[u8]) -> Vec<u8> {
        match self {
            DigestAlgorithm::SHA256 => Sha256::digest(bytes).to_vec(),
            DigestAlgorithm::SHA384 => Sha384::digest(bytes).to_vec(),
            DigestAlgorithm::SHA512 => Sha512::digest(bytes).to_vec(),
        }
    }
}
