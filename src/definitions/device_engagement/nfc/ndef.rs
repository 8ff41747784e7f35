//! NDEF record reading and writing (NFC Forum NDEF 1.0).
use thiserror::Error;

use super::util::DisplayBytesAsHex;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReadRecordError {
    #[error("Buffer too small: cursor={cursor}, buffer_len={buffer_len}, required_space={required_space}, rem={rem}", rem = buffer_len - cursor)]
    BufferTooSmall {
        cursor: usize,
        required_space: usize,
        buffer_len: usize,
    },
    #[error("Unknown or invalid TNF: {0:x}")]
    UnknownOrInvalidTnf(u8),
    #[error("Chunked records are not supported")]
    Chunked,
}

#[derive(Debug, Clone, Copy, strum_macros::FromRepr, PartialEq, Eq)]
#[repr(u8)]
// NDEF §3.2.6
pub enum TNF {
    Empty = 0x00,
    WellKnown = 0x01,
    Media = 0x02,
    AbsoluteUri = 0x03,
    External = 0x04,
    Unknown = 0x05,
    Unchanged = 0x06,
}

const FLAG_MB: u8 = 0b1000_0000;
const FLAG_ME: u8 = 0b0100_0000;
const FLAG_CF: u8 = 0b0010_0000;
const FLAG_SR: u8 = 0b0001_0000;
const FLAG_IL: u8 = 0b0000_1000;
const TNF_MASK: u8 = 0b0000_0111;

/// A record borrowed from a received message.
#[derive(Clone, PartialEq, Eq)]
pub struct NdefRecord<'a> {
    pub first_record: bool,
    pub last_record: bool,
    pub tnf: TNF,
    pub type_bytes: &'a [u8],
    pub id: Option<&'a [u8]>,
    pub payload: &'a [u8],
}

impl<'a> std::fmt::Debug for NdefRecord<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ret = f.debug_struct("NdefRecord");
        ret.field("first_record", &self.first_record)
            .field("last_record", &self.last_record)
            .field("tnf", &self.tnf);
        match std::str::from_utf8(self.type_bytes) {
            Ok(type_str) => ret.field("type_bytes", &type_str),
            Err(_) => ret.field("type_bytes", &self.type_bytes),
        };
        match self.id.map(std::str::from_utf8) {
            Some(Ok(id_str)) => ret.field("id", &Some(id_str)),
            _ => ret.field("id", &self.id),
        };
        ret.field("payload", &DisplayBytesAsHex::from(self.payload))
            .finish()
    }
}

impl<'a> NdefRecord<'a> {
    pub fn is(&self, tnf: TNF, type_bytes: &[u8]) -> bool {
        self.tnf == tnf && self.type_bytes == type_bytes
    }

    pub fn to_record(&self) -> Record {
        Record {
            tnf: self.tnf,
            type_bytes: self.type_bytes.to_vec(),
            id: self.id.map(<[u8]>::to_vec),
            payload: self.payload.to_vec(),
        }
    }

    pub fn iterator_from_bytes(
        bytes: &'a [u8],
    ) -> impl Iterator<Item = Result<NdefRecord<'a>, ReadRecordError>> + 'a {
        let mut cursor = 0;
        let mut failed = false;
        std::iter::from_fn(move || {
            if failed || cursor == bytes.len() {
                return None;
            }
            let record = read_record(bytes, &mut cursor);
            failed = record.is_err();
            Some(record)
        })
    }
}

/// Parse a complete NDEF message.
pub fn parse_message(bytes: &[u8]) -> Result<Vec<NdefRecord<'_>>, ReadRecordError> {
    NdefRecord::iterator_from_bytes(bytes).collect()
}

fn take<'a>(
    bytes: &'a [u8],
    cursor: &mut usize,
    len: usize,
) -> Result<&'a [u8], ReadRecordError> {
    if bytes.len() < *cursor + len {
        return Err(ReadRecordError::BufferTooSmall {
            cursor: *cursor,
            required_space: len,
            buffer_len: bytes.len(),
        });
    }
    let slice = &bytes[*cursor..*cursor + len];
    *cursor += len;
    Ok(slice)
}

// NDEF §3.2
fn read_record<'a>(bytes: &'a [u8], cursor: &mut usize) -> Result<NdefRecord<'a>, ReadRecordError> {
    // 7  6  5  4  3  2  1  0
    // MB ME CF SR IL TNF----
    let header = take(bytes, cursor, 2)?;
    let (flags_byte, type_len) = (header[0], header[1] as usize);
    if flags_byte & FLAG_CF != 0 {
        return Err(ReadRecordError::Chunked);
    }
    let raw_tnf = flags_byte & TNF_MASK;
    let tnf = TNF::from_repr(raw_tnf).ok_or(ReadRecordError::UnknownOrInvalidTnf(raw_tnf))?;

    // NDEF §3.2.4
    let payload_len = if flags_byte & FLAG_SR != 0 {
        take(bytes, cursor, 1)?[0] as usize
    } else {
        let len = take(bytes, cursor, 4)?;
        u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize
    };
    let id_len = if flags_byte & FLAG_IL != 0 {
        Some(take(bytes, cursor, 1)?[0] as usize)
    } else {
        None
    };
    let type_bytes = take(bytes, cursor, type_len)?;
    let id = match id_len {
        Some(len) => Some(take(bytes, cursor, len)?),
        None => None,
    };
    let payload = take(bytes, cursor, payload_len)?;

    Ok(NdefRecord {
        first_record: flags_byte & FLAG_MB != 0,
        last_record: flags_byte & FLAG_ME != 0,
        tnf,
        type_bytes,
        id,
        payload,
    })
}

/// Well-known record types exchanged during handover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::EnumIter)]
pub enum RecordType {
    /// From the holder
    TnepServiceParameter,
    /// From the reader
    TnepServiceSelect,
    /// From the holder
    TnepStatus,
    /// From the reader
    HandoverRequest,
    /// From the holder
    HandoverSelect,
    /// Embedded in handover request and select
    AlternativeCarrier,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::TnepServiceParameter => "Tp",
            RecordType::TnepServiceSelect => "Ts",
            RecordType::TnepStatus => "Te",
            RecordType::HandoverRequest => "Hr",
            RecordType::HandoverSelect => "Hs",
            RecordType::AlternativeCarrier => "ac",
        }
    }

    pub fn as_bytes(&self) -> &'static [u8] {
        self.as_str().as_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        use strum::IntoEnumIterator;
        RecordType::iter().find(|record_type| record_type.as_bytes() == bytes)
    }

    pub fn of(record: &NdefRecord) -> Option<Self> {
        match record.tnf {
            TNF::WellKnown => Self::from_bytes(record.type_bytes),
            _ => None,
        }
    }
}

/// A record to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub tnf: TNF,
    pub type_bytes: Vec<u8>,
    pub id: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

impl Record {
    pub fn new(tnf: TNF, type_bytes: &[u8], payload: Vec<u8>) -> Self {
        Record {
            tnf,
            type_bytes: type_bytes.to_vec(),
            id: None,
            payload,
        }
    }

    pub fn well_known(type_bytes: &[u8], payload: Vec<u8>) -> Self {
        Self::new(TNF::WellKnown, type_bytes, payload)
    }

    pub fn typed(record_type: RecordType, payload: Vec<u8>) -> Self {
        Self::well_known(record_type.as_bytes(), payload)
    }

    pub fn with_id(mut self, id: &[u8]) -> Self {
        self.id = Some(id.to_vec());
        self
    }

    fn write(&self, first: bool, last: bool, out: &mut Vec<u8>) {
        let short = self.payload.len() < 256;
        let mut flags = self.tnf as u8;
        if first {
            flags |= FLAG_MB;
        }
        if last {
            flags |= FLAG_ME;
        }
        if short {
            flags |= FLAG_SR;
        }
        if self.id.is_some() {
            flags |= FLAG_IL;
        }
        out.push(flags);
        out.push(self.type_bytes.len() as u8);
        if short {
            out.push(self.payload.len() as u8);
        } else {
            out.extend_from_slice(&(self.payload.len() as u32).to_be_bytes());
        }
        if let Some(id) = &self.id {
            out.push(id.len() as u8);
        }
        out.extend_from_slice(&self.type_bytes);
        if let Some(id) = &self.id {
            out.extend_from_slice(id);
        }
        out.extend_from_slice(&self.payload);
    }
}

/// Encode records as one message, setting the begin and end flags.
pub fn encode_message(records: &[Record]) -> Vec<u8> {
    let mut out = vec![];
    let count = records.len();
    for (i, record) in records.iter().enumerate() {
        record.write(i == 0, i + 1 == count, &mut out);
    }
    out
}
