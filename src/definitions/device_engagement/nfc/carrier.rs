//! Alternative carrier records: how a [ConnectionMethod] travels inside a handover message.
use thiserror::Error;
use uuid::Uuid;

use super::ndef::{NdefRecord, Record, TNF};
use super::util::{DisplayBytesAsHex, KnownOrRaw};
use crate::definitions::device_engagement::{self, BleOptions, ConnectionMethod, NfcOptions};
use crate::definitions::helpers::ByteStr;

pub const BLE_OOB_TYPE: &[u8] = b"application/vnd.bluetooth.le.oob";
pub const NFC_CARRIER_TYPE: &[u8] = b"iso.org:18013:nfc";
pub const NFC_CARRIER_ID: &[u8] = b"nfc";

const NFC_CARRIER_VERSION: u8 = 0x01;
const NFC_MAX_COMMAND_DATA_LENGTH: u8 = 0x01;
const NFC_MAX_RESPONSE_DATA_LENGTH: u8 = 0x02;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid BLE out-of-band data: {0}")]
    InvalidBleOob(&'static str),
    #[error("invalid NFC carrier record: {0}")]
    InvalidNfcCarrier(&'static str),
    #[error(transparent)]
    ConnectionMethod(#[from] device_engagement::Error),
}

pub mod ad_packet {
    use crate::definitions::device_engagement::nfc::util::impl_partial_enum;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::EnumIter)]
    #[repr(u8)]
    pub enum KnownType {
        LeRole = 0x1c,
        CompleteList128BitServiceUuids = 0x07,
        MacAddress = 0x1b,
        PeripheralServerModePsm = 0x77,
    }

    impl_partial_enum!(KnownType, u8);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::FromRepr)]
#[repr(u8)]
pub enum LeRole {
    /// Only Peripheral Role supported
    PeripheralOnly = 0x00,
    /// Only Central Role supported
    CentralOnly = 0x01,
    /// Peripheral and Central Role supported, Peripheral Role preferred for connection establishment
    PeripheralPreferred = 0x02,
    /// Peripheral and Central Role supported, Central Role preferred for connection establishment
    CentralPreferred = 0x03,
}

pub struct AdPacket<'a> {
    pub kind: KnownOrRaw<u8, ad_packet::KnownType>,
    pub data: &'a [u8],
}

impl<'a> AdPacket<'a> {
    /// Length-type-value structures; parsing stops at the first one that overruns the buffer.
    pub fn parse_buffer(buffer: &'a [u8]) -> impl Iterator<Item = Self> + 'a {
        let mut cursor = 0;
        std::iter::from_fn(move || {
            let len = *buffer.get(cursor)? as usize;
            cursor += 1;
            if len == 0 || cursor + len > buffer.len() {
                return None;
            }
            let ad_type = buffer[cursor];
            let ad_data = &buffer[cursor + 1..cursor + len];
            cursor += len;

            Some(Self {
                kind: ad_type.into(),
                data: ad_data,
            })
        })
    }
}

fn push_ad(out: &mut Vec<u8>, kind: ad_packet::KnownType, data: &[u8]) {
    out.push(data.len() as u8 + 1);
    out.push(kind as u8);
    out.extend_from_slice(data);
}

/// The carrier record for a method, or `None` when the method cannot travel over NFC handover.
pub fn to_carrier_record(method: &ConnectionMethod, id: &[u8]) -> Option<Record> {
    match method {
        ConnectionMethod::Ble(options) => Some(
            Record::new(TNF::Media, BLE_OOB_TYPE, ble_oob_payload(options)).with_id(id),
        ),
        ConnectionMethod::Nfc(options) => Some(
            Record::new(TNF::External, NFC_CARRIER_TYPE, nfc_carrier_payload(options))
                .with_id(NFC_CARRIER_ID),
        ),
        ConnectionMethod::WifiAware(_) | ConnectionMethod::RestApi(_) => {
            tracing::warn!(
                "connection method of type {} has no handover carrier record",
                method.method_type()
            );
            None
        }
    }
}

/// The connection method a carrier record describes; `Ok(None)` for records that are not carriers.
pub fn from_carrier_record(record: &NdefRecord) -> Result<Option<ConnectionMethod>, Error> {
    if record.is(TNF::Media, BLE_OOB_TYPE) {
        return parse_ble_oob(record.payload).map(|o| Some(ConnectionMethod::Ble(o)));
    }
    if record.is(TNF::External, NFC_CARRIER_TYPE) {
        return parse_nfc_carrier(record.payload).map(|o| Some(ConnectionMethod::Nfc(o)));
    }
    Ok(None)
}

fn ble_oob_payload(options: &BleOptions) -> Vec<u8> {
    let mut payload = vec![];
    let role = match (
        options.supports_peripheral_server_mode,
        options.supports_central_client_mode,
    ) {
        (true, true) => Some(LeRole::CentralPreferred),
        (true, false) => Some(LeRole::PeripheralOnly),
        (false, true) => Some(LeRole::CentralOnly),
        (false, false) => None,
    };
    if let Some(role) = role {
        push_ad(&mut payload, ad_packet::KnownType::LeRole, &[role as u8]);
    }

    let mut uuids: Vec<Uuid> = vec![];
    for uuid in [
        options.peripheral_server_mode_uuid,
        options.central_client_mode_uuid,
    ]
    .into_iter()
    .flatten()
    {
        if !uuids.contains(&uuid) {
            uuids.push(uuid);
        }
    }
    if !uuids.is_empty() {
        // Bluetooth AD fields are little endian.
        let mut list = Vec::with_capacity(16 * uuids.len());
        for uuid in uuids {
            let mut uuid_bytes = *uuid.as_bytes();
            uuid_bytes.reverse();
            list.extend_from_slice(&uuid_bytes);
        }
        push_ad(
            &mut payload,
            ad_packet::KnownType::CompleteList128BitServiceUuids,
            &list,
        );
    }

    if let Some(mac) = &options.peripheral_server_mode_mac_address {
        match <[u8; 6]>::try_from(mac.as_ref()) {
            Ok(mut address) => {
                address.reverse();
                // public device address
                let data = [&address[..], &[0x00]].concat();
                push_ad(&mut payload, ad_packet::KnownType::MacAddress, &data);
            }
            Err(_) => tracing::warn!(
                "dropping BLE device address of {} bytes",
                mac.as_ref().len()
            ),
        }
    }
    payload
}

fn parse_ble_oob(payload: &[u8]) -> Result<BleOptions, Error> {
    let mut role = None;
    let mut uuids = vec![];
    let mut mac_address = None;
    for AdPacket { kind, data } in AdPacket::parse_buffer(payload) {
        let KnownOrRaw::Known(kind) = kind else {
            tracing::debug!("skipping AD structure {kind:?}");
            continue;
        };
        match kind {
            ad_packet::KnownType::LeRole => {
                let raw = *data.first().ok_or(Error::InvalidBleOob("empty LE role"))?;
                role = Some(LeRole::from_repr(raw).ok_or(Error::InvalidBleOob("unknown LE role"))?);
            }
            ad_packet::KnownType::CompleteList128BitServiceUuids => {
                if data.is_empty() || data.len() % 16 != 0 {
                    return Err(Error::InvalidBleOob("UUID list is not a multiple of 16 bytes"));
                }
                for chunk in data.chunks_exact(16) {
                    let mut uuid_bytes = [0u8; 16];
                    uuid_bytes.copy_from_slice(chunk);
                    uuid_bytes.reverse();
                    uuids.push(Uuid::from_bytes(uuid_bytes));
                }
            }
            ad_packet::KnownType::MacAddress => {
                if data.len() != 7 {
                    return Err(Error::InvalidBleOob("device address must be 7 bytes"));
                }
                let mut address = data[..6].to_vec();
                address.reverse();
                mac_address = Some(ByteStr::from(address));
            }
            ad_packet::KnownType::PeripheralServerModePsm => {
                tracing::debug!("L2CAP PSM: {}", DisplayBytesAsHex::from(data));
            }
        }
    }

    let role = role.ok_or(Error::InvalidBleOob("missing LE role"))?;
    let (peripheral, central) = match role {
        LeRole::PeripheralOnly => (true, false),
        LeRole::CentralOnly => (false, true),
        LeRole::PeripheralPreferred | LeRole::CentralPreferred => (true, true),
    };
    // One UUID serves every supported mode, two are peripheral then central.
    let (peripheral_uuid, central_uuid) = match uuids.as_slice() {
        [] => (None, None),
        [uuid] => (Some(*uuid), Some(*uuid)),
        [first, second, ..] => (Some(*first), Some(*second)),
    };
    Ok(BleOptions {
        supports_peripheral_server_mode: peripheral,
        supports_central_client_mode: central,
        peripheral_server_mode_uuid: peripheral_uuid.filter(|_| peripheral),
        central_client_mode_uuid: central_uuid.filter(|_| central),
        peripheral_server_mode_mac_address: mac_address,
    })
}

fn nfc_carrier_payload(options: &NfcOptions) -> Vec<u8> {
    let command = (options.max_command_data_length() as u16).to_be_bytes();
    let response = (options.max_response_data_length() as u32).to_be_bytes();
    vec![
        NFC_CARRIER_VERSION,
        0x03,
        NFC_MAX_COMMAND_DATA_LENGTH,
        command[0],
        command[1],
        0x04,
        NFC_MAX_RESPONSE_DATA_LENGTH,
        response[1],
        response[2],
        response[3],
    ]
}

fn parse_nfc_carrier(payload: &[u8]) -> Result<NfcOptions, Error> {
    let Some((version, mut rest)) = payload.split_first() else {
        return Err(Error::InvalidNfcCarrier("empty"));
    };
    if *version != NFC_CARRIER_VERSION {
        return Err(Error::InvalidNfcCarrier("unknown version"));
    }
    let mut command = None;
    let mut response = None;
    while let [len, entry @ ..] = rest {
        let len = *len as usize;
        if len == 0 || entry.len() < len {
            return Err(Error::InvalidNfcCarrier("truncated entry"));
        }
        let (kind, value) = (entry[0], &entry[1..len]);
        let number = value.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        match kind {
            NFC_MAX_COMMAND_DATA_LENGTH => command = Some(number),
            NFC_MAX_RESPONSE_DATA_LENGTH => response = Some(number),
            other => tracing::debug!("skipping NFC carrier entry {other}"),
        }
        rest = &entry[len..];
    }
    let command = command.ok_or(Error::InvalidNfcCarrier("missing command data length"))?;
    let response = response.ok_or(Error::InvalidNfcCarrier("missing response data length"))?;
    Ok(NfcOptions::new(command, response)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::definitions::device_engagement::nfc::ndef::{encode_message, parse_message};
    use hex_literal::hex;

    #[test]
    fn captured_central_client_oob() {
        // BLE carrier of a holder's static handover select.
        let payload = hex!("02 1c 01 11 07 43bc2a67bf797ab0404da09e0e2e81e0");
        let options = parse_ble_oob(&payload).unwrap();
        let uuid = Uuid::parse_str("e0812e0e-9ea0-4d40-b07a-79bf672abc43").unwrap();
        assert_eq!(
            options,
            BleOptions {
                supports_central_client_mode: true,
                central_client_mode_uuid: Some(uuid),
                ..Default::default()
            }
        );
        assert_eq!(ble_oob_payload(&options), payload.to_vec());
    }

    #[test]
    fn dual_role_and_address() {
        let options = BleOptions {
            supports_peripheral_server_mode: true,
            supports_central_client_mode: true,
            peripheral_server_mode_uuid: Some(Uuid::from_u128(1)),
            central_client_mode_uuid: Some(Uuid::from_u128(2)),
            peripheral_server_mode_mac_address: Some(vec![1, 2, 3, 4, 5, 6].into()),
        };
        let payload = ble_oob_payload(&options);
        assert_eq!(&payload[..3], &[0x02, 0x1c, 0x03]);
        assert_eq!(&payload[3..5], &[0x21, 0x07]);
        assert_eq!(&payload[payload.len() - 9..], &hex!("08 1b 06 05 04 03 02 01 00"));
        assert_eq!(parse_ble_oob(&payload).unwrap(), options);
    }

    #[test]
    fn ble_oob_requires_role() {
        assert!(matches!(
            parse_ble_oob(&hex!("11 07 43bc2a67bf797ab0404da09e0e2e81e0")),
            Err(Error::InvalidBleOob(_))
        ));
        assert!(matches!(
            parse_ble_oob(&hex!("02 1c 09")),
            Err(Error::InvalidBleOob(_))
        ));
    }

    #[test]
    fn captured_nfc_carrier() {
        let captured = [
            &hex!("5c 11 0a 03")[..],
            NFC_CARRIER_TYPE,
            NFC_CARRIER_ID,
            &hex!("01 03 01 ff ff 04 02 01 00 00"),
        ]
        .concat();
        let records = parse_message(&captured).unwrap();
        let method = from_carrier_record(&records[0]).unwrap().unwrap();
        assert_eq!(
            method,
            ConnectionMethod::Nfc(NfcOptions::new(65_535, 65_536).unwrap())
        );
        let record = to_carrier_record(&method, b"ignored").unwrap();
        let rewritten = encode_message(&[record]);
        // the captured record was not the first of its message
        assert_eq!(rewritten[0], captured[0] | 0x80);
        assert_eq!(rewritten[1..], captured[1..]);
    }

    #[test]
    fn nfc_carrier_bounds_are_checked() {
        let too_small = hex!("01 03 01 00 10 04 02 01 00 00");
        assert!(matches!(
            parse_nfc_carrier(&too_small),
            Err(Error::ConnectionMethod(_))
        ));
        assert!(matches!(
            parse_nfc_carrier(&hex!("01 03 01 ff")),
            Err(Error::InvalidNfcCarrier(_))
        ));
    }

    #[test]
    fn other_records_are_not_carriers() {
        let message = encode_message(&[Record::well_known(b"Te", vec![0])]);
        let records = parse_message(&message).unwrap();
        assert!(from_carrier_record(&records[0]).unwrap().is_none());
    }
}
