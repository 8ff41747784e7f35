//! Handover Request and Handover Select messages (NFC Forum Connection Handover 1.5)
//! with the ISO 18013-5 engagement records.
use thiserror::Error;

use super::carrier::{self, from_carrier_record, to_carrier_record, NFC_CARRIER_ID};
use super::ndef::{encode_message, parse_message, NdefRecord, ReadRecordError, Record, RecordType, TNF};
use crate::definitions::device_engagement::{self, ConnectionMethod, DeviceEngagement};

pub const DEVICE_ENGAGEMENT_TYPE: &[u8] = b"iso.org:18013:deviceengagement";
pub const DEVICE_ENGAGEMENT_ID: &[u8] = b"mdoc";
pub const READER_ENGAGEMENT_TYPE: &[u8] = b"iso.org:18013:readerengagement";
pub const READER_ENGAGEMENT_ID: &[u8] = b"mdocreader";

/// Connection Handover 1.5
const HANDOVER_VERSION: u8 = 0x15;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid NDEF message: {0}")]
    Ndef(#[from] ReadRecordError),
    #[error(transparent)]
    Carrier(#[from] carrier::Error),
    #[error("message has no {0} record")]
    MissingRecord(&'static str),
    #[error("message has {count} {record} records, expected one")]
    DuplicateRecord { record: &'static str, count: usize },
    #[error("{0} record is truncated")]
    Truncated(&'static str),
    #[error("alternative carrier references missing record {0:?}")]
    DanglingReference(String),
}

/// Carrier power state of an alternative carrier record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::FromRepr)]
#[repr(u8)]
pub enum CarrierPowerState {
    Inactive = 0x00,
    Active = 0x01,
    Activating = 0x02,
    Unknown = 0x03,
}

/// An `ac` record: points at a carrier configuration record, and optionally at auxiliary records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlternativeCarrier {
    pub power_state: CarrierPowerState,
    pub carrier_data_reference: Vec<u8>,
    pub auxiliary_data_references: Vec<Vec<u8>>,
}

impl AlternativeCarrier {
    fn to_record(&self) -> Record {
        let mut payload = vec![
            self.power_state as u8,
            self.carrier_data_reference.len() as u8,
        ];
        payload.extend_from_slice(&self.carrier_data_reference);
        payload.push(self.auxiliary_data_references.len() as u8);
        for aux in &self.auxiliary_data_references {
            payload.push(aux.len() as u8);
            payload.extend_from_slice(aux);
        }
        Record::typed(RecordType::AlternativeCarrier, payload)
    }

    fn parse(payload: &[u8]) -> Result<Self, Error> {
        let truncated = || Error::Truncated("ac");
        let mut cursor = payload.iter().copied();
        let mut take = |len: usize| -> Result<Vec<u8>, Error> {
            let bytes: Vec<u8> = cursor.by_ref().take(len).collect();
            (bytes.len() == len).then_some(bytes).ok_or_else(truncated)
        };
        let power_state = take(1)?[0] & 0b11;
        let reference_len = take(1)?[0] as usize;
        let carrier_data_reference = take(reference_len)?;
        let mut auxiliary_data_references = vec![];
        // the auxiliary count is optional in the wild
        if let Ok(count) = take(1) {
            for _ in 0..count[0] {
                let len = take(1)?[0] as usize;
                auxiliary_data_references.push(take(len)?);
            }
        }
        Ok(AlternativeCarrier {
            power_state: CarrierPowerState::from_repr(power_state)
                .unwrap_or(CarrierPowerState::Unknown),
            carrier_data_reference,
            auxiliary_data_references,
        })
    }
}

/// Identifier of the carrier record for the method at `index`.
fn carrier_id(method: &ConnectionMethod, index: usize) -> Vec<u8> {
    match method {
        ConnectionMethod::Nfc(_) => NFC_CARRIER_ID.to_vec(),
        _ => index.to_string().into_bytes(),
    }
}

/// Header record (`Hs` or `Hr`) followed by one carrier record per encodable method.
fn handover_records(
    header: RecordType,
    methods: &[ConnectionMethod],
    auxiliary: &[&[u8]],
) -> (Record, Vec<Record>) {
    let mut alternative_carriers = vec![];
    let mut carriers = vec![];
    for (index, method) in methods.iter().enumerate() {
        let id = carrier_id(method, index);
        let Some(record) = to_carrier_record(method, &id) else {
            continue;
        };
        alternative_carriers.push(
            AlternativeCarrier {
                power_state: CarrierPowerState::Active,
                carrier_data_reference: id,
                auxiliary_data_references: auxiliary.iter().map(|aux| aux.to_vec()).collect(),
            }
            .to_record(),
        );
        carriers.push(record);
    }
    let mut payload = vec![HANDOVER_VERSION];
    payload.extend(encode_message(&alternative_carriers));
    (Record::typed(header, payload), carriers)
}

fn find_header<'a, 'b>(
    records: &'a [NdefRecord<'b>],
    header: RecordType,
) -> Result<&'a NdefRecord<'b>, Error> {
    records
        .iter()
        .find(|r| RecordType::of(r) == Some(header))
        .ok_or(Error::MissingRecord(header.as_str()))
}

/// Resolve the alternative carriers embedded in a handover header record.
fn referenced_carriers(
    header: &NdefRecord,
    records: &[NdefRecord],
) -> Result<Vec<ConnectionMethod>, Error> {
    let Some((_version, embedded)) = header.payload.split_first() else {
        return Err(Error::Truncated("handover"));
    };
    let mut methods = vec![];
    for record in parse_message(embedded)? {
        if RecordType::of(&record) != Some(RecordType::AlternativeCarrier) {
            continue;
        }
        let ac = AlternativeCarrier::parse(record.payload)?;
        let carrier = records
            .iter()
            .find(|r| r.id == Some(ac.carrier_data_reference.as_slice()))
            .ok_or_else(|| {
                Error::DanglingReference(
                    String::from_utf8_lossy(&ac.carrier_data_reference).into_owned(),
                )
            })?;
        match from_carrier_record(carrier)? {
            Some(method) => methods.push(method),
            None => tracing::warn!("skipping unsupported alternative carrier {carrier:?}"),
        }
    }
    Ok(methods)
}

/// The holder's answer: its engagement and the carriers it can be reached on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoverSelect {
    /// Encoded device engagement, kept exactly as it was received.
    pub device_engagement: Vec<u8>,
    pub connection_methods: Vec<ConnectionMethod>,
}

impl HandoverSelect {
    pub fn new(
        device_engagement: &DeviceEngagement,
        connection_methods: Vec<ConnectionMethod>,
    ) -> Result<Self, device_engagement::Error> {
        Ok(HandoverSelect {
            device_engagement: device_engagement.encode()?,
            connection_methods,
        })
    }

    pub fn to_ndef_message(&self) -> Vec<u8> {
        let (hs, carriers) = handover_records(
            RecordType::HandoverSelect,
            &self.connection_methods,
            &[DEVICE_ENGAGEMENT_ID],
        );
        let engagement = Record::new(
            TNF::External,
            DEVICE_ENGAGEMENT_TYPE,
            self.device_engagement.clone(),
        )
        .with_id(DEVICE_ENGAGEMENT_ID);
        let mut records = vec![hs, engagement];
        records.extend(carriers);
        encode_message(&records)
    }

    /// Parse a handover select message. The connection method list may come back empty,
    /// callers decide whether that is fatal.
    pub fn parse(message: &[u8]) -> Result<Self, Error> {
        let records = parse_message(message)?;
        tracing::debug!("handover select: {records:?}");
        let hs = find_header(&records, RecordType::HandoverSelect)?;

        let engagements: Vec<_> = records
            .iter()
            .filter(|r| {
                r.is(TNF::External, DEVICE_ENGAGEMENT_TYPE) && r.id == Some(DEVICE_ENGAGEMENT_ID)
            })
            .collect();
        let device_engagement = match engagements.as_slice() {
            [engagement] => engagement.payload.to_vec(),
            [] => return Err(Error::MissingRecord("device engagement")),
            more => {
                return Err(Error::DuplicateRecord {
                    record: "device engagement",
                    count: more.len(),
                })
            }
        };

        Ok(HandoverSelect {
            device_engagement,
            connection_methods: referenced_carriers(hs, &records)?,
        })
    }

    pub fn decode_device_engagement(&self) -> Result<DeviceEngagement, device_engagement::Error> {
        DeviceEngagement::decode(&self.device_engagement)
    }
}

/// The reader's offer in negotiated handover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoverRequest {
    /// Encoded reader engagement, if the reader sends one.
    pub reader_engagement: Option<Vec<u8>>,
    pub connection_methods: Vec<ConnectionMethod>,
}

impl HandoverRequest {
    pub fn to_ndef_message(&self) -> Vec<u8> {
        let (hr, carriers) =
            handover_records(RecordType::HandoverRequest, &self.connection_methods, &[]);
        let mut records = vec![hr];
        if let Some(reader_engagement) = &self.reader_engagement {
            records.push(
                Record::new(
                    TNF::External,
                    READER_ENGAGEMENT_TYPE,
                    reader_engagement.clone(),
                )
                .with_id(READER_ENGAGEMENT_ID),
            );
        }
        records.extend(carriers);
        encode_message(&records)
    }

    pub fn parse(message: &[u8]) -> Result<Self, Error> {
        let records = parse_message(message)?;
        tracing::debug!("handover request: {records:?}");
        let hr = find_header(&records, RecordType::HandoverRequest)?;
        let reader_engagement = records
            .iter()
            .find(|r| r.is(TNF::External, READER_ENGAGEMENT_TYPE))
            .map(|r| r.payload.to_vec());
        Ok(HandoverRequest {
            reader_engagement,
            connection_methods: referenced_carriers(hr, &records)?,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::definitions::device_engagement::{BleOptions, NfcOptions};
    use hex_literal::hex;
    use uuid::Uuid;

    // Static handover select read from a holder.
    const CAPTURED_HS: [u8; 204] = hex!(
        "91020f487315d10209616301013001046d646f631c1e580469736f2e6f72673a31383031333a646576
         696365656e676167656d656e746d646f63a20063312e30018201d818584ba401022001215820812e9e
         fe35395a9f669a743f1b26d13fc4dfd7a5becc848fb6ea0b6ee8dc6cc722582020912755a436b0acc4
         4defb07c0676b9274f6df7246d1627f91e8adfaa435acb5a2015016170706c69636174696f6e2f766e
         642e626c7565746f6f74682e6c652e6f6f6230021c01110743bc2a67bf797ab0404da09e0e2e81e0"
    );

    // Handover request written by a reader during negotiated handover.
    const CAPTURED_HR: [u8; 168] = hex!(
        "910215487215910204616301013000510206616301036e6663001c1e060a69736f2e6f72673a3138
         3031333a726561646572656e676167656d656e746d646f63726561646572a10063312e301a201501
         6170706c69636174696f6e2f766e642e626c7565746f6f74682e6c652e6f6f6230021c031107b66e
         ef55ee782ea2514bb6a1c42ad5b35c110a0369736f2e6f72673a31383031333a6e66636e66630103
         01ffff0402010000"
    );

    #[test]
    fn captured_static_handover_select() {
        let hs = HandoverSelect::parse(&CAPTURED_HS).unwrap();
        let uuid = Uuid::parse_str("e0812e0e-9ea0-4d40-b07a-79bf672abc43").unwrap();
        assert_eq!(
            hs.connection_methods,
            vec![ConnectionMethod::Ble(BleOptions {
                supports_central_client_mode: true,
                central_client_mode_uuid: Some(uuid),
                ..Default::default()
            })]
        );
        assert_eq!(hs.device_engagement.len(), 0x58);
        let engagement = hs.decode_device_engagement().unwrap();
        assert_eq!(engagement.version(), "1.0");
        assert!(engagement.connection_methods().is_empty());

        assert_eq!(hs.to_ndef_message(), CAPTURED_HS.to_vec());
    }

    #[test]
    fn captured_negotiated_handover_request() {
        let hr = HandoverRequest::parse(&CAPTURED_HR).unwrap();
        let uuid = Uuid::parse_str("b3d52ac4-a1b6-4b51-a22e-78ee55ef6eb6").unwrap();
        assert_eq!(hr.reader_engagement, Some(hex!("a1 00 63 31 2e 30").to_vec()));
        assert_eq!(
            hr.connection_methods,
            vec![
                ConnectionMethod::Ble(BleOptions {
                    supports_peripheral_server_mode: true,
                    supports_central_client_mode: true,
                    peripheral_server_mode_uuid: Some(uuid),
                    central_client_mode_uuid: Some(uuid),
                    peripheral_server_mode_mac_address: None,
                }),
                ConnectionMethod::Nfc(NfcOptions::new(65_535, 65_536).unwrap()),
            ]
        );
        assert_eq!(hr.to_ndef_message(), CAPTURED_HR.to_vec());
    }

    #[test]
    fn select_requires_one_engagement() {
        let ble = ConnectionMethod::Ble(BleOptions {
            supports_peripheral_server_mode: true,
            peripheral_server_mode_uuid: Some(Uuid::from_u128(7)),
            ..Default::default()
        });
        let (hs, carriers) =
            handover_records(RecordType::HandoverSelect, &[ble], &[DEVICE_ENGAGEMENT_ID]);
        let mut records = vec![hs];
        records.extend(carriers);
        let message = encode_message(&records);
        assert!(matches!(
            HandoverSelect::parse(&message),
            Err(Error::MissingRecord("device engagement"))
        ));

        let engagement = Record::new(TNF::External, DEVICE_ENGAGEMENT_TYPE, vec![0xa0])
            .with_id(DEVICE_ENGAGEMENT_ID);
        records.push(engagement.clone());
        records.push(engagement);
        assert!(matches!(
            HandoverSelect::parse(&encode_message(&records)),
            Err(Error::DuplicateRecord { count: 2, .. })
        ));
    }

    #[test]
    fn select_without_carriers() {
        let hs = HandoverSelect {
            device_engagement: vec![0xa0],
            connection_methods: vec![],
        };
        let parsed = HandoverSelect::parse(&hs.to_ndef_message()).unwrap();
        assert_eq!(parsed, hs);
    }

    #[test]
    fn dangling_carrier_reference() {
        let ac = AlternativeCarrier {
            power_state: CarrierPowerState::Active,
            carrier_data_reference: b"7".to_vec(),
            auxiliary_data_references: vec![],
        };
        let mut payload = vec![HANDOVER_VERSION];
        payload.extend(encode_message(&[ac.to_record()]));
        let message = encode_message(&[
            Record::typed(RecordType::HandoverRequest, payload),
        ]);
        assert!(matches!(
            HandoverRequest::parse(&message),
            Err(Error::DanglingReference(r)) if r == "7"
        ));
    }

    #[test]
    fn alternative_carrier_record() {
        let ac = AlternativeCarrier {
            power_state: CarrierPowerState::Active,
            carrier_data_reference: b"0".to_vec(),
            auxiliary_data_references: vec![b"mdoc".to_vec()],
        };
        let record = ac.to_record();
        assert_eq!(record.payload, hex!("01 01 30 01 04 6d646f63").to_vec());
        assert_eq!(AlternativeCarrier::parse(&record.payload).unwrap(), ac);
        assert!(AlternativeCarrier::parse(&hex!("01 05 30")).is_err());
    }
}
