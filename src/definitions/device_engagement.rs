//! This module contains the definitions for the [DeviceEngagement] struct and related types.
//!
//! A [DeviceEngagement] carries the holder's ephemeral key, the connection methods it
//! can be reached on and, from version 1.1, origin infos and capabilities. The same
//! structure doubles as a reader engagement.
use std::collections::BTreeMap;

use ciborium::Value;
use serde::{Deserialize, Serialize};

pub use connection_method::{
    BleOptions, ConnectionMethod, NfcOptions, RestApiOptions, WifiOptions,
};
pub use error::Error;
pub use origin_info::OriginInfo;

use crate::cbor::{self, int_keyed_map};
use crate::definitions::helpers::Tag24;
use crate::definitions::CoseKey;

pub mod connection_method;
pub mod error;
pub mod nfc;
pub mod origin_info;

pub type EDeviceKeyBytes = Tag24<CoseKey>;
pub type EReaderKeyBytes = Tag24<CoseKey>;

const CIPHER_SUITE: i128 = 1;
const BASE64_CONFIG: base64::Config = base64::Config::new(base64::CharacterSet::UrlSafe, false);

/// Optional features announced under key 6.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    HandoverSessionEstablishment,
    ReaderAuthAll,
    ExtendedRequest,
}

impl Capability {
    pub fn id(self) -> u64 {
        match self {
            Capability::HandoverSessionEstablishment => 2,
            Capability::ReaderAuthAll => 3,
            Capability::ExtendedRequest => 4,
        }
    }

    pub fn from_id(id: u64) -> Option<Self> {
        match id {
            2 => Some(Capability::HandoverSessionEstablishment),
            3 => Some(Capability::ReaderAuthAll),
            4 => Some(Capability::ExtendedRequest),
            _ => None,
        }
    }
}

/// An engagement version, `<major>.<minor>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    pub const V1_0: Version = Version { major: 1, minor: 0 };
    pub const V1_1: Version = Version { major: 1, minor: 1 };

    pub fn parse(s: &str) -> Result<Self, Error> {
        let invalid = || Error::InvalidVersion(s.to_string());
        let (major, minor) = s.split_once('.').ok_or_else(invalid)?;
        let number = |part: &str| {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            part.parse::<u32>().map_err(|_| invalid())
        };
        Ok(Version {
            major: number(major)?,
            minor: number(minor)?,
        })
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Represents a device (or reader) engagement.
///
/// Built once through [DeviceEngagement::builder] or decoded from bytes, immutable afterwards.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "Value", into = "Value")]
pub struct DeviceEngagement {
    version: String,
    sender_key: EDeviceKeyBytes,
    connection_methods: Vec<ConnectionMethod>,
    origin_infos: Vec<OriginInfo>,
    capabilities: BTreeMap<Capability, Value>,
}

impl DeviceEngagement {
    pub fn builder(sender_key: CoseKey) -> Builder {
        Builder {
            sender_key,
            version: None,
            connection_methods: vec![],
            origin_infos: vec![],
            capabilities: BTreeMap::new(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn sender_key(&self) -> &CoseKey {
        self.sender_key.as_ref()
    }

    /// The key exactly as it was encoded on the wire.
    pub fn sender_key_bytes(&self) -> &[u8] {
        &self.sender_key.inner_bytes
    }

    pub fn sender_key_tagged(&self) -> &EDeviceKeyBytes {
        &self.sender_key
    }

    pub fn connection_methods(&self) -> &[ConnectionMethod] {
        &self.connection_methods
    }

    pub fn origin_infos(&self) -> &[OriginInfo] {
        &self.origin_infos
    }

    pub fn capabilities(&self) -> &BTreeMap<Capability, Value> {
        &self.capabilities
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        Ok(cbor::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let value: Value = cbor::from_slice(bytes)?;
        Self::try_from(value)
    }

    fn check_version(version: &str, extended: bool) -> Result<(), Error> {
        let parsed = Version::parse(version)?;
        if extended && parsed < Version::V1_1 {
            return Err(Error::VersionTooLow {
                version: version.to_string(),
            });
        }
        if !extended && parsed != Version::V1_0 {
            return Err(Error::VersionTooHigh {
                version: version.to_string(),
            });
        }
        Ok(())
    }
}

/// Collects the parts of a [DeviceEngagement]; the version rules are checked by [Builder::build].
#[derive(Debug, Clone)]
pub struct Builder {
    sender_key: CoseKey,
    version: Option<String>,
    connection_methods: Vec<ConnectionMethod>,
    origin_infos: Vec<OriginInfo>,
    capabilities: BTreeMap<Capability, Value>,
}

impl Builder {
    /// Pin the version. Without it the lowest version able to carry the contents is used.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn connection_method(mut self, method: ConnectionMethod) -> Self {
        self.connection_methods.push(method);
        self
    }

    pub fn connection_methods(mut self, methods: impl IntoIterator<Item = ConnectionMethod>) -> Self {
        self.connection_methods.extend(methods);
        self
    }

    pub fn origin_info(mut self, info: OriginInfo) -> Self {
        self.origin_infos.push(info);
        self
    }

    pub fn capability(mut self, capability: Capability, value: Value) -> Self {
        self.capabilities.insert(capability, value);
        self
    }

    pub fn build(self) -> Result<DeviceEngagement, Error> {
        let extended = !self.origin_infos.is_empty() || !self.capabilities.is_empty();
        let version = self.version.unwrap_or_else(|| {
            if extended {
                Version::V1_1.to_string()
            } else {
                Version::V1_0.to_string()
            }
        });
        DeviceEngagement::check_version(&version, extended)?;
        Ok(DeviceEngagement {
            version,
            sender_key: Tag24::new(self.sender_key)?,
            connection_methods: self.connection_methods,
            origin_infos: self.origin_infos,
            capabilities: self.capabilities,
        })
    }
}

impl From<DeviceEngagement> for Value {
    fn from(device_engagement: DeviceEngagement) -> Value {
        let extended = Version::parse(&device_engagement.version)
            .map(|v| v >= Version::V1_1)
            .unwrap_or(false);
        let mut map = vec![];
        map.push((Value::Integer(0.into()), Value::Text(device_engagement.version)));
        map.push((
            Value::Integer(1.into()),
            Value::Array(vec![
                Value::Integer(1.into()),
                device_engagement.sender_key.into(),
            ]),
        ));
        if !device_engagement.connection_methods.is_empty() {
            let methods = device_engagement
                .connection_methods
                .into_iter()
                .map(Value::from)
                .collect();
            map.push((Value::Integer(2.into()), Value::Array(methods)));
        }
        if extended {
            let infos = device_engagement
                .origin_infos
                .into_iter()
                .map(Value::from)
                .collect();
            map.push((Value::Integer(5.into()), Value::Array(infos)));
        }
        if !device_engagement.capabilities.is_empty() {
            let capabilities = device_engagement
                .capabilities
                .into_iter()
                .map(|(capability, value)| (Value::Integer(capability.id().into()), value))
                .collect();
            map.push((Value::Integer(6.into()), Value::Map(capabilities)));
        }
        Value::Map(map)
    }
}

impl TryFrom<Value> for DeviceEngagement {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Error> {
        let malformed = |what: &str| Error::Malformed(what.to_string());
        let mut map = int_keyed_map(v).map_err(|e| Error::Malformed(e.to_string()))?;

        let version = match map.remove(&0) {
            Some(Value::Text(v)) => v,
            _ => return Err(malformed("missing version")),
        };
        let parsed_version = Version::parse(&version)?;
        if (map.contains_key(&5) || map.contains_key(&6)) && parsed_version < Version::V1_1 {
            return Err(Error::VersionTooLow { version });
        }

        let security = match map.remove(&1) {
            Some(Value::Array(security)) => security,
            _ => return Err(malformed("missing security")),
        };
        let [cipher_suite, sender_key]: [Value; 2] = security
            .try_into()
            .map_err(|_| malformed("security must have 2 entries"))?;
        match cipher_suite.as_integer().map(i128::from) {
            Some(CIPHER_SUITE) => {}
            Some(other) => {
                return Err(Error::Malformed(format!(
                    "cipher suite {other}, expected {CIPHER_SUITE}"
                )))
            }
            None => return Err(malformed("cipher suite is not an integer")),
        }
        let sender_key = Tag24::<CoseKey>::try_from(sender_key)?;

        let mut connection_methods = vec![];
        match map.remove(&2) {
            None => {}
            Some(Value::Array(methods)) => {
                for method in methods {
                    match ConnectionMethod::try_from(method) {
                        Ok(m) => connection_methods.push(m),
                        Err(Error::UnsupportedConnectionMethod(t)) => {
                            tracing::warn!("skipping connection method of unknown type {t}")
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            Some(_) => return Err(malformed("connection methods is not an array")),
        }

        let mut origin_infos = vec![];
        match map.remove(&5) {
            None if parsed_version >= Version::V1_1 => {
                return Err(malformed("origin infos are required from version 1.1"))
            }
            None => {}
            Some(Value::Array(infos)) => {
                for info in infos {
                    match OriginInfo::try_from(info) {
                        Ok(info) => origin_infos.push(info),
                        Err(e) => tracing::warn!("skipping origin info: {e}"),
                    }
                }
            }
            Some(_) => return Err(malformed("origin infos is not an array")),
        }

        let mut capabilities = BTreeMap::new();
        match map.remove(&6) {
            None => {}
            Some(Value::Map(entries)) => {
                for (id, value) in entries {
                    match cbor::uint(&id).and_then(Capability::from_id) {
                        Some(capability) => {
                            capabilities.insert(capability, value);
                        }
                        None => tracing::warn!("ignoring unknown capability {id:?}"),
                    }
                }
            }
            Some(_) => return Err(malformed("capabilities is not a map")),
        }

        for key in map.keys() {
            tracing::debug!("ignoring engagement entry {key}");
        }

        Ok(DeviceEngagement {
            version,
            sender_key,
            connection_methods,
            origin_infos,
            capabilities,
        })
    }
}

impl Tag24<DeviceEngagement> {
    pub fn to_qr_code_uri(&self) -> String {
        let mut qr_code_uri = String::from("mdoc:");
        base64::encode_config_buf(&self.inner_bytes, BASE64_CONFIG, &mut qr_code_uri);
        qr_code_uri
    }

    pub fn from_qr_code_uri(qr_code_uri: &str) -> Result<Self, Error> {
        let encoded_de = qr_code_uri
            .strip_prefix("mdoc:")
            .ok_or(Error::InvalidQrCodePrefix)?;
        let decoded_de = base64::decode_config(encoded_de, BASE64_CONFIG)?;
        Ok(Tag24::<DeviceEngagement>::from_bytes(decoded_de)?)
    }
}
