//! Device retrieval methods carried in an engagement, and in NFC handover
//! carrier records.
use std::collections::BTreeMap;

use ciborium::Value;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Error;
use crate::cbor::{int_keyed_map, uint};
use crate::definitions::helpers::ByteStr;

pub const METHOD_TYPE_NFC: u64 = 1;
pub const METHOD_TYPE_BLE: u64 = 2;
pub const METHOD_TYPE_WIFI_AWARE: u64 = 3;
pub const METHOD_TYPE_REST_API: u64 = 4;

const METHOD_VERSION: u64 = 1;

/// A way for the reader to reach the holder, encoded as `[type, version, options]`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "Value", into = "Value")]
pub enum ConnectionMethod {
    Ble(BleOptions),
    Nfc(NfcOptions),
    WifiAware(WifiOptions),
    RestApi(RestApiOptions),
}

/// Options for `Bluetooth Low Energy` retrieval.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct BleOptions {
    pub supports_peripheral_server_mode: bool,
    pub supports_central_client_mode: bool,
    pub peripheral_server_mode_uuid: Option<Uuid>,
    pub central_client_mode_uuid: Option<Uuid>,
    /// The BLE device address of the peripheral server, if advertised.
    pub peripheral_server_mode_mac_address: Option<ByteStr>,
}

/// Maximum APDU data field lengths for NFC retrieval.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NfcOptions {
    max_command_data_length: u64,
    max_response_data_length: u64,
}

/// Options for a `Wi-Fi Aware` retrieval.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct WifiOptions {
    /// The passphrase for the Wi-Fi connection. If [None], no passphrase is required.
    pub pass_phrase: Option<String>,
    pub channel_info_operating_class: Option<u64>,
    pub channel_info_channel_number: Option<u64>,
    pub band_info: Option<ByteStr>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestApiOptions {
    pub uri: String,
}

impl ConnectionMethod {
    pub fn version(&self) -> u64 {
        METHOD_VERSION
    }

    pub fn method_type(&self) -> u64 {
        match self {
            Self::Nfc(_) => METHOD_TYPE_NFC,
            Self::Ble(_) => METHOD_TYPE_BLE,
            Self::WifiAware(_) => METHOD_TYPE_WIFI_AWARE,
            Self::RestApi(_) => METHOD_TYPE_REST_API,
        }
    }

    /// Whether `other` addresses the same physical carrier as `self`.
    ///
    /// BLE methods match on any shared UUID, Wi-Fi Aware on passphrase and
    /// REST on URI. There is only one NFC carrier.
    pub fn is_same_carrier(&self, other: &ConnectionMethod) -> bool {
        match (self, other) {
            (Self::Nfc(_), Self::Nfc(_)) => true,
            (Self::Ble(a), Self::Ble(b)) => {
                let ours = [a.peripheral_server_mode_uuid, a.central_client_mode_uuid];
                let theirs = [b.peripheral_server_mode_uuid, b.central_client_mode_uuid];
                ours.iter()
                    .flatten()
                    .any(|uuid| theirs.iter().flatten().any(|other| other == uuid))
            }
            (Self::WifiAware(a), Self::WifiAware(b)) => a.pass_phrase == b.pass_phrase,
            (Self::RestApi(a), Self::RestApi(b)) => a.uri == b.uri,
            _ => false,
        }
    }
}

impl TryFrom<Value> for ConnectionMethod {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Error> {
        let Value::Array(list) = value else {
            return Err(Error::Malformed("connection method is not an array".into()));
        };
        let [method_type, version, options]: [Value; 3] = list
            .try_into()
            .map_err(|_| Error::Malformed("connection method must have 3 entries".into()))?;
        let method_type = uint(&method_type)
            .ok_or_else(|| Error::Malformed("connection method type".into()))?;
        if uint(&version) != Some(METHOD_VERSION) {
            return Err(Error::Malformed("connection method version".into()));
        }
        match method_type {
            METHOD_TYPE_NFC => Ok(Self::Nfc(options.try_into()?)),
            METHOD_TYPE_BLE => Ok(Self::Ble(options.try_into()?)),
            METHOD_TYPE_WIFI_AWARE => Ok(Self::WifiAware(options.try_into()?)),
            METHOD_TYPE_REST_API => Ok(Self::RestApi(options.try_into()?)),
            other => Err(Error::UnsupportedConnectionMethod(other)),
        }
    }
}

impl From<ConnectionMethod> for Value {
    fn from(method: ConnectionMethod) -> Value {
        let method_type = method.method_type().into();
        let version = method.version().into();
        let options = match method {
            ConnectionMethod::Nfc(opts) => opts.into(),
            ConnectionMethod::Ble(opts) => opts.into(),
            ConnectionMethod::WifiAware(opts) => opts.into(),
            ConnectionMethod::RestApi(opts) => opts.into(),
        };
        Value::Array(vec![method_type, version, options])
    }
}

fn options_map(v: Value, kind: &'static str) -> Result<BTreeMap<i128, Value>, Error> {
    int_keyed_map(v).map_err(|_| Error::InvalidOptions {
        kind,
        reason: "not a map with integer keys",
    })
}

fn uuid_at(
    map: &mut BTreeMap<i128, Value>,
    key: i128,
    kind: &'static str,
) -> Result<Option<Uuid>, Error> {
    match map.remove(&key) {
        None => Ok(None),
        Some(Value::Bytes(bytes)) => Uuid::from_slice(&bytes)
            .map(Some)
            .map_err(|_| Error::InvalidOptions {
                kind,
                reason: "UUID must be 16 bytes",
            }),
        Some(_) => Err(Error::InvalidOptions {
            kind,
            reason: "UUID must be a byte string",
        }),
    }
}

fn entry(key: i64, value: Value) -> (Value, Value) {
    (Value::Integer(key.into()), value)
}

impl TryFrom<Value> for BleOptions {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Error> {
        const KIND: &str = "BLE";
        let mut map = options_map(v, KIND)?;
        let mode = |v: Option<Value>| match v {
            Some(Value::Bool(b)) => Ok(b),
            _ => Err(Error::InvalidOptions {
                kind: KIND,
                reason: "mode flags must be booleans",
            }),
        };
        let supports_peripheral_server_mode = mode(map.remove(&0))?;
        let supports_central_client_mode = mode(map.remove(&1))?;
        let peripheral_server_mode_uuid = uuid_at(&mut map, 10, KIND)?;
        let central_client_mode_uuid = uuid_at(&mut map, 11, KIND)?;
        let peripheral_server_mode_mac_address = match map.remove(&20) {
            None => None,
            Some(Value::Bytes(mac)) => Some(ByteStr::from(mac)),
            Some(_) => {
                return Err(Error::InvalidOptions {
                    kind: KIND,
                    reason: "device address must be a byte string",
                })
            }
        };
        Ok(BleOptions {
            supports_peripheral_server_mode,
            supports_central_client_mode,
            peripheral_server_mode_uuid,
            central_client_mode_uuid,
            peripheral_server_mode_mac_address,
        })
    }
}

impl From<BleOptions> for Value {
    fn from(o: BleOptions) -> Value {
        let mut map = vec![
            entry(0, Value::Bool(o.supports_peripheral_server_mode)),
            entry(1, Value::Bool(o.supports_central_client_mode)),
        ];
        if let Some(uuid) = o.peripheral_server_mode_uuid {
            map.push(entry(10, Value::Bytes(uuid.as_bytes().to_vec())));
        }
        if let Some(uuid) = o.central_client_mode_uuid {
            map.push(entry(11, Value::Bytes(uuid.as_bytes().to_vec())));
        }
        if let Some(address) = o.peripheral_server_mode_mac_address {
            map.push(entry(20, address.into()));
        }
        Value::Map(map)
    }
}

impl NfcOptions {
    pub const MIN_COMMAND_DATA_LENGTH: u64 = 255;
    pub const MAX_COMMAND_DATA_LENGTH: u64 = 65_535;
    pub const MIN_RESPONSE_DATA_LENGTH: u64 = 256;
    pub const MAX_RESPONSE_DATA_LENGTH: u64 = 65_536;

    pub fn new(max_command_data_length: u64, max_response_data_length: u64) -> Result<Self, Error> {
        if !(Self::MIN_COMMAND_DATA_LENGTH..=Self::MAX_COMMAND_DATA_LENGTH)
            .contains(&max_command_data_length)
        {
            return Err(Error::InvalidNfcCommandDataLength);
        }
        if !(Self::MIN_RESPONSE_DATA_LENGTH..=Self::MAX_RESPONSE_DATA_LENGTH)
            .contains(&max_response_data_length)
        {
            return Err(Error::InvalidNfcResponseDataLength);
        }
        Ok(Self {
            max_command_data_length,
            max_response_data_length,
        })
    }

    pub fn max_command_data_length(&self) -> u64 {
        self.max_command_data_length
    }

    pub fn max_response_data_length(&self) -> u64 {
        self.max_response_data_length
    }
}

/// ISO 18013-5 does not specify defaults, so the minimum values are assumed.
impl Default for NfcOptions {
    fn default() -> Self {
        Self {
            max_command_data_length: Self::MIN_COMMAND_DATA_LENGTH,
            max_response_data_length: Self::MIN_RESPONSE_DATA_LENGTH,
        }
    }
}

impl TryFrom<Value> for NfcOptions {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Error> {
        let map = options_map(v, "NFC")?;
        let command = map
            .get(&0)
            .and_then(uint)
            .ok_or(Error::InvalidNfcCommandDataLength)?;
        let response = map
            .get(&1)
            .and_then(uint)
            .ok_or(Error::InvalidNfcResponseDataLength)?;
        NfcOptions::new(command, response)
    }
}

impl From<NfcOptions> for Value {
    fn from(o: NfcOptions) -> Value {
        Value::Map(vec![
            entry(0, o.max_command_data_length.into()),
            entry(1, o.max_response_data_length.into()),
        ])
    }
}

impl TryFrom<Value> for WifiOptions {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Error> {
        const KIND: &str = "Wi-Fi Aware";
        let invalid = |reason| Error::InvalidOptions { kind: KIND, reason };
        let mut map = options_map(v, KIND)?;

        let pass_phrase = match map.remove(&0) {
            None => None,
            Some(Value::Text(text)) => Some(text),
            Some(_) => return Err(invalid("passphrase must be text")),
        };
        let mut lookup_opt_u64 = |idx: i128| match map.remove(&idx) {
            None => Ok(None),
            Some(v) => uint(&v)
                .map(Some)
                .ok_or_else(|| invalid("channel info must be an unsigned integer")),
        };
        let channel_info_operating_class = lookup_opt_u64(1)?;
        let channel_info_channel_number = lookup_opt_u64(2)?;
        let band_info = match map.remove(&3) {
            None => None,
            Some(Value::Bytes(bytes)) => Some(ByteStr::from(bytes)),
            Some(_) => return Err(invalid("band info must be a byte string")),
        };
        Ok(WifiOptions {
            pass_phrase,
            channel_info_operating_class,
            channel_info_channel_number,
            band_info,
        })
    }
}

impl From<WifiOptions> for Value {
    fn from(o: WifiOptions) -> Value {
        let mut map = vec![];
        if let Some(v) = o.pass_phrase {
            map.push(entry(0, Value::Text(v)));
        }
        if let Some(v) = o.channel_info_operating_class {
            map.push(entry(1, v.into()));
        }
        if let Some(v) = o.channel_info_channel_number {
            map.push(entry(2, v.into()));
        }
        if let Some(v) = o.band_info {
            map.push(entry(3, v.into()));
        }
        Value::Map(map)
    }
}

impl TryFrom<Value> for RestApiOptions {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Error> {
        let mut map = options_map(v, "REST API")?;
        match map.remove(&0) {
            Some(Value::Text(uri)) => Ok(RestApiOptions { uri }),
            _ => Err(Error::InvalidOptions {
                kind: "REST API",
                reason: "uri must be text",
            }),
        }
    }
}

impl From<RestApiOptions> for Value {
    fn from(o: RestApiOptions) -> Value {
        Value::Map(vec![entry(0, Value::Text(o.uri))])
    }
}
