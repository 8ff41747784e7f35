//! Tag NDEF Exchange Protocol records (NFC Forum TNEP 1.0).
use std::time::Duration;

use thiserror::Error;

use super::ndef::{NdefRecord, Record, RecordType};

/// Service name of negotiated handover.
pub const HANDOVER_SERVICE: &str = "urn:nfc:sn:handover";

pub const TNEP_VERSION: u8 = 0x10;
/// Single response communication mode, TNEP 1.0 §4.1.5
pub const COMMUNICATION_MODE_SINGLE_RESPONSE: u8 = 0x00;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("{record} record is truncated")]
    Truncated { record: &'static str },
    #[error("service name is not UTF-8")]
    InvalidServiceName,
    #[error("minimum waiting time {0} is outside of 0..=63")]
    InvalidWaitTime(u8),
    #[error("maximum number of time extensions {0} is outside of 0..=15")]
    InvalidWaitCount(u8),
}

/// The service parameter record a TNEP tag announces for each service it offers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceParameterRecord {
    pub version: u8,
    pub service_name: String,
    pub communication_mode: u8,
    /// Raw WT, TNEP 1.0 §4.1.6
    pub wait_time: u8,
    /// Maximum number of time extensions, TNEP 1.0 §4.1.7
    pub n_wait: u8,
    pub max_ndef_size: u16,
}

impl ServiceParameterRecord {
    pub fn handover(wait_time: u8, n_wait: u8, max_ndef_size: u16) -> Result<Self, Error> {
        if wait_time > 63 {
            return Err(Error::InvalidWaitTime(wait_time));
        }
        if n_wait > 15 {
            return Err(Error::InvalidWaitCount(n_wait));
        }
        Ok(ServiceParameterRecord {
            version: TNEP_VERSION,
            service_name: HANDOVER_SERVICE.to_string(),
            communication_mode: COMMUNICATION_MODE_SINGLE_RESPONSE,
            wait_time,
            n_wait,
            max_ndef_size,
        })
    }

    /// `T_wait = 2^(WT/4 - 1)` milliseconds.
    pub fn t_wait_millis(&self) -> f64 {
        2f64.powf(f64::from(self.wait_time) / 4.0 - 1.0)
    }

    pub fn t_wait(&self) -> Duration {
        Duration::from_nanos((self.t_wait_millis() * 1_000_000.0).round() as u64)
    }

    pub fn is_handover(&self) -> bool {
        self.service_name == HANDOVER_SERVICE
    }

    pub fn parse(payload: &[u8]) -> Result<Self, Error> {
        let truncated = Error::Truncated { record: "Tp" };
        let [version, name_len, rest @ ..] = payload else {
            return Err(truncated);
        };
        let name_len = *name_len as usize;
        if rest.len() < name_len + 5 {
            return Err(truncated);
        }
        let (name, rest) = rest.split_at(name_len);
        let service_name = std::str::from_utf8(name)
            .map_err(|_| Error::InvalidServiceName)?
            .to_string();
        Ok(ServiceParameterRecord {
            version: *version,
            service_name,
            communication_mode: rest[0],
            wait_time: rest[1] & 0b0011_1111,
            n_wait: rest[2] & 0b0000_1111,
            max_ndef_size: u16::from_be_bytes([rest[3], rest[4]]),
        })
    }

    pub fn from_record(record: &NdefRecord) -> Option<Result<Self, Error>> {
        (RecordType::of(record) == Some(RecordType::TnepServiceParameter))
            .then(|| Self::parse(record.payload))
    }

    pub fn to_record(&self) -> Record {
        let mut payload = vec![self.version, self.service_name.len() as u8];
        payload.extend_from_slice(self.service_name.as_bytes());
        payload.extend_from_slice(&[self.communication_mode, self.wait_time, self.n_wait]);
        payload.extend_from_slice(&self.max_ndef_size.to_be_bytes());
        Record::typed(RecordType::TnepServiceParameter, payload)
    }
}

/// The reader's choice of service.
pub fn service_select(service_name: &str) -> Record {
    let mut payload = vec![service_name.len() as u8];
    payload.extend_from_slice(service_name.as_bytes());
    Record::typed(RecordType::TnepServiceSelect, payload)
}

pub fn parse_service_select(payload: &[u8]) -> Result<String, Error> {
    let truncated = Error::Truncated { record: "Ts" };
    let [name_len, name @ ..] = payload else {
        return Err(truncated);
    };
    let name = name.get(..*name_len as usize).ok_or(truncated)?;
    Ok(std::str::from_utf8(name)
        .map_err(|_| Error::InvalidServiceName)?
        .to_string())
}

/// Status carried by a TNEP status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status(pub u8);

impl Status {
    pub const SUCCESS: Status = Status(0x00);
    pub const PROTOCOL_ERROR: Status = Status(0x01);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    pub fn parse(payload: &[u8]) -> Result<Self, Error> {
        payload
            .first()
            .map(|status| Status(*status))
            .ok_or(Error::Truncated { record: "Te" })
    }

    pub fn to_record(self) -> Record {
        Record::typed(RecordType::TnepStatus, vec![self.0])
    }
}
