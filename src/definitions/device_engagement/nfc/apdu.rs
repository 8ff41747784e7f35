use strum_macros::EnumIter;
use thiserror::Error;

// This has been written according to ISO 7816-4 (2005) and the NFC Forum
// Type 4 Tag specification. Only what NFC handover needs is implemented.

use super::util::{impl_partial_enum, IntoRaw, KnownOrRaw};

/// Application identifier of the NFC Forum NDEF application.
pub const AID_NDEF_APPLICATION: &[u8] = &[0xD2, 0x76, 0x00, 0x00, 0x85, 0x01, 0x01];
/// Application identifier of the ISO 18013-5 mdoc application.
pub const AID_MDOC: &[u8] = &[0xA0, 0x00, 0x00, 0x02, 0x48, 0x04, 0x00];

/// Largest data field of a short APDU.
pub const SHORT_APDU_MAX_DATA: usize = 255;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("response APDU is {0} bytes, a status word needs 2")]
    ResponseTooShort(usize),
    #[error("capability container is {0} bytes instead of {CC_FILE_LEN}")]
    CapabilityContainerLength(usize),
    #[error("capability container names file {0:04X} instead of the NDEF file")]
    CapabilityContainerFileId(u16),
    #[error("capability container has no NDEF file control TLV")]
    CapabilityContainerTlv,
    #[error("offset {0:#x} does not fit the 15 bits of P1-P2")]
    OffsetOutOfRange(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: KnownOrRaw<u16, ResponseCode>,
    pub payload: Vec<u8>,
}

impl Response {
    pub fn ok(payload: Vec<u8>) -> Self {
        Response {
            code: KnownOrRaw::Known(ResponseCode::Ok),
            payload,
        }
    }

    /// The status word as it went over the air.
    pub fn status_word(&self) -> [u8; 2] {
        self.code.into_raw().to_be_bytes()
    }

    /// Split off the payload if the status word is `90 00`, otherwise hand back the status word.
    pub fn into_payload(self) -> Result<Vec<u8>, [u8; 2]> {
        match self.code {
            KnownOrRaw::Known(ResponseCode::Ok) => Ok(self.payload),
            _ => Err(self.status_word()),
        }
    }
}

impl From<Response> for Vec<u8> {
    fn from(response: Response) -> Self {
        let mut response_bytes = Vec::with_capacity(2 + response.payload.len());
        response_bytes.extend_from_slice(&response.payload);
        response_bytes.extend_from_slice(&response.status_word());
        response_bytes
    }
}

impl TryFrom<&[u8]> for Response {
    type Error = Error;
    fn try_from(response: &[u8]) -> Result<Self, Self::Error> {
        let Some((payload, code)) = response.split_last_chunk::<2>() else {
            return Err(Error::ResponseTooShort(response.len()));
        };
        Ok(Self {
            code: u16::from_be_bytes(*code).into(),
            payload: payload.to_vec(),
        })
    }
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum ResponseCode {
    Ok = 0x9000,
    IncorrectLength = 0x6700,
    IncorrectP1OrP2 = 0x6B00,
    ConditionsNotSatisfied = 0x6985,
    FileOrApplicationNotFound = 0x6A82,
    InstructionNotSupported = 0x6D00,
    Unspecified = 0x6F00,
}
impl_partial_enum!(ResponseCode, u16);

impl From<ResponseCode> for Response {
    fn from(code: ResponseCode) -> Self {
        Response {
            code: KnownOrRaw::Known(code),
            payload: Vec::new(),
        }
    }
}

#[repr(u16)]
#[derive(Debug, EnumIter, Clone, Copy, PartialEq, Eq)]
pub enum FileId {
    CapabilityContainer = 0xE103,
    NdefFile = 0xE104,
}
impl_partial_enum!(FileId, u16);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Apdu<'a> {
    SelectFile {
        occurrence: select::Occurrence,
        control_info: select::ControlInfo,
        file_id: KnownOrRaw<u16, FileId>,
    },
    SelectAid {
        occurrence: select::Occurrence,
        control_info: select::ControlInfo,
        aid: &'a [u8],
    },
    ReadBinary {
        slice: std::ops::Range<usize>,
    },
    UpdateBinary {
        offset: usize,
        data: &'a [u8],
    },
}

macro_rules! apdu_fail {
    ($code:expr) => {
        return Err(Response::from($code))
    };
}

pub mod select {
    use super::{Response, ResponseCode};

    #[repr(u8)]
    #[rustfmt::skip]
    #[derive(strum_macros::FromRepr, Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Occurrence {
        FirstOrOnly = 0b0000,
        Last        = 0b0001,
        Next        = 0b0010,
        Prev        = 0b0011,
    }

    #[repr(u8)]
    #[rustfmt::skip]
    #[derive(strum_macros::FromRepr, Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ControlInfo {
        FciTemplate = 0b0000,
        FcpTemplate = 0b0100,
        FmdTemplate = 0b1000,
        NoResponse  = 0b1100,
    }

    pub fn get_request_info(p2: u8) -> (Occurrence, ControlInfo) {
        let occurrence = match p2 & 0b0011 {
            0b0000 => Occurrence::FirstOrOnly,
            0b0001 => Occurrence::Last,
            0b0010 => Occurrence::Next,
            _ => Occurrence::Prev,
        };
        let control_info = match p2 & 0b1100 {
            0b0000 => ControlInfo::FciTemplate,
            0b0100 => ControlInfo::FcpTemplate,
            0b1000 => ControlInfo::FmdTemplate,
            _ => ControlInfo::NoResponse,
        };
        (occurrence, control_info)
    }

    impl ControlInfo {
        pub fn get_payload(&self) -> Result<Response, Response> {
            match *self {
                ControlInfo::NoResponse => Ok(ResponseCode::Ok.into()),
                // Both the 6F header and the name may be omitted when the full
                // identifier was given, and only full identifiers are matched.
                ControlInfo::FciTemplate => Ok(ResponseCode::Ok.into()),
                _ => Err(ResponseCode::InstructionNotSupported.into()),
            }
        }
    }
}

fn serialize_l_c_len(len: usize) -> Vec<u8> {
    if len < 256 {
        vec![len as u8]
    } else {
        [&[0x00], (len as u16).to_be_bytes().as_slice()].concat()
    }
}

fn serialize_l_e_len(len: usize) -> Vec<u8> {
    match len {
        // 0x00 stands for 256 in a short Le.
        0..=256 => vec![len as u8],
        _ => [&[0x00], (len.min(u16::MAX as usize) as u16).to_be_bytes().as_slice()].concat(),
    }
}

/// Largest offset P1-P2 can carry; b8 of P1 set would turn the offset into a
/// short EF identifier (ISO 7816-4 §7.2.2).
const MAX_OFFSET: usize = 0x7FFF;

fn split_offset(offset: usize) -> Result<(u8, u8), Error> {
    if offset > MAX_OFFSET {
        return Err(Error::OffsetOutOfRange(offset));
    }
    let [p1, p2] = (offset as u16).to_be_bytes();
    Ok((p1, p2))
}

impl<'a> Apdu<'a> {
    pub fn select_aid(aid: &'a [u8]) -> Self {
        Apdu::SelectAid {
            occurrence: select::Occurrence::FirstOrOnly,
            control_info: select::ControlInfo::FciTemplate,
            aid,
        }
    }

    pub fn select_file(file_id: FileId) -> Self {
        Apdu::SelectFile {
            occurrence: select::Occurrence::FirstOrOnly,
            control_info: select::ControlInfo::NoResponse,
            file_id: KnownOrRaw::Known(file_id),
        }
    }

    pub fn parse(command_bytes: &'a [u8]) -> Result<Self, Response> {
        if command_bytes.len() < 4 {
            apdu_fail!(ResponseCode::IncorrectLength);
        }

        let (cla, ins, p1, p2) = (
            command_bytes[0],
            command_bytes[1],
            command_bytes[2],
            command_bytes[3],
        );

        let (payload_len, l_c_len) = if command_bytes.len() > 4 {
            if command_bytes[4] == 0x00 && command_bytes.len() > 6 {
                // 3 byte L_c (first byte is 0x00)
                (
                    u16::from_be_bytes([command_bytes[5], command_bytes[6]]) as usize,
                    3,
                )
            } else {
                (command_bytes[4] as usize, 1)
            }
        } else {
            (0, 0)
        };

        let command_remainder = &command_bytes[4 + l_c_len..];

        // READ BINARY carries no data, the length byte is Le.
        let is_read = ins == 0xB0;
        if !is_read && command_remainder.len() < payload_len {
            apdu_fail!(ResponseCode::IncorrectLength);
        }

        let mut response_len = 0;
        if !is_read && command_remainder.len() > payload_len {
            if command_remainder.len() - payload_len != l_c_len {
                tracing::error!(
                    "Expected the remainder({}) after payload len({}) to be same as Lc len ({})",
                    command_remainder.len(),
                    payload_len,
                    l_c_len
                );
                apdu_fail!(ResponseCode::Unspecified);
            }
            let resp_bytes = &command_remainder[payload_len..];
            response_len = match resp_bytes {
                [le] => *le as usize,
                [_, hi, lo] => u16::from_be_bytes([*hi, *lo]) as usize,
                _ => apdu_fail!(ResponseCode::Unspecified),
            }
        }

        tracing::trace!("Processing APDU command: CLA: {cla}, INS: {ins}, P1: {p1}, P2: {p2}, LC Len: {l_c_len}, Payload Length: {payload_len}, Resp len: {response_len}");

        let ins_bit1 = (ins & 0b0000_0001) != 0;
        let p1_bit8 = (p1 & 0b1000_0000) != 0;

        let offset = || match (ins_bit1, p1_bit8) {
            (false, false) => Ok(u16::from_be_bytes([p1, p2]) as usize),
            // P1 carrying a short EF identifier is not supported, ISO 7816-4:2005 §7.2.2
            (false, true) => Err(Response::from(ResponseCode::Unspecified)),
            _ => Err(Response::from(ResponseCode::InstructionNotSupported)),
        };

        Ok(match ins {
            0xA4 => {
                // Select §7.1.1
                let (occurrence, control_info) = select::get_request_info(p2);
                let payload = &command_remainder[..payload_len];
                match p1 {
                    0x00 => {
                        let [hi, lo] = payload else {
                            apdu_fail!(ResponseCode::IncorrectLength);
                        };
                        Apdu::SelectFile {
                            occurrence,
                            control_info,
                            file_id: u16::from_be_bytes([*hi, *lo]).into(),
                        }
                    }
                    0x04 => Apdu::SelectAid {
                        occurrence,
                        control_info,
                        aid: payload,
                    },
                    _ => apdu_fail!(ResponseCode::IncorrectP1OrP2),
                }
            }
            0xB0 => {
                // Read binary §7.2.3
                let offset = offset()?;
                let response_len = match (payload_len, l_c_len) {
                    (0, 1) => 256,
                    (len, _) => len,
                };
                Apdu::ReadBinary {
                    slice: offset..offset + response_len,
                }
            }
            0xD6 => {
                // Update binary §7.2.5
                Apdu::UpdateBinary {
                    offset: offset()?,
                    data: &command_remainder[..payload_len],
                }
            }
            _ => apdu_fail!(ResponseCode::InstructionNotSupported),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let cla = 0x00;

        let (ins, p1, p2, remainder) = match self {
            Apdu::SelectFile {
                occurrence,
                control_info,
                file_id,
            } => {
                let p2 = *control_info as u8 | *occurrence as u8;
                let payload = file_id.into_raw().to_be_bytes().to_vec();
                // no restrictions on the response length
                let remainder = [serialize_l_c_len(payload.len()), payload].concat();
                (0xA4, 0x00, p2, remainder)
            }
            Apdu::SelectAid {
                occurrence,
                control_info,
                aid,
            } => {
                let p2 = *control_info as u8 | *occurrence as u8;
                // a short response is enough
                let remainder = [serialize_l_c_len(aid.len()), aid.to_vec(), vec![0x00]].concat();
                (0xA4, 0x04, p2, remainder)
            }
            Apdu::ReadBinary { slice } => {
                let (p1, p2) = split_offset(slice.start)?;
                (0xB0, p1, p2, serialize_l_e_len(slice.len()))
            }
            Apdu::UpdateBinary { offset, data } => {
                let (p1, p2) = split_offset(*offset)?;
                let remainder = [serialize_l_c_len(data.len()), data.to_vec()].concat();
                (0xD6, p1, p2, remainder)
            }
        };
        Ok([vec![cla, ins, p1, p2], remainder].concat())
    }
}

pub const CC_FILE_LEN: usize = 15;

/// The capability container file of a Type 4 tag (NFC Forum T4T §5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityContainer {
    pub mapping_version: u8,
    /// MLe: largest R-APDU data field the tag returns.
    pub max_read_len: u16,
    /// MLc: largest C-APDU data field the tag accepts.
    pub max_update_len: u16,
    pub max_ndef_size: u16,
    pub read_access: u8,
    pub write_access: u8,
}

impl CapabilityContainer {
    pub const WRITE_GRANTED: u8 = 0x00;
    pub const WRITE_DENIED: u8 = 0xFF;

    /// The container a handover tag exposes; writes are only granted for negotiated handover.
    pub fn for_handover(negotiated: bool, max_apdu_data: u16, max_ndef_size: u16) -> Self {
        CapabilityContainer {
            mapping_version: 0x20,
            max_read_len: max_apdu_data,
            max_update_len: max_apdu_data,
            max_ndef_size,
            read_access: 0x00,
            write_access: if negotiated {
                Self::WRITE_GRANTED
            } else {
                Self::WRITE_DENIED
            },
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        let Ok(cc) = <&[u8; CC_FILE_LEN]>::try_from(bytes) else {
            return Err(Error::CapabilityContainerLength(bytes.len()));
        };
        // NDEF file control TLV
        if cc[7] != 0x04 || cc[8] != 0x06 {
            return Err(Error::CapabilityContainerTlv);
        }
        let file_id = u16::from_be_bytes([cc[9], cc[10]]);
        if file_id != FileId::NdefFile.into_raw() {
            return Err(Error::CapabilityContainerFileId(file_id));
        }
        Ok(CapabilityContainer {
            mapping_version: cc[2],
            max_read_len: u16::from_be_bytes([cc[3], cc[4]]),
            max_update_len: u16::from_be_bytes([cc[5], cc[6]]),
            max_ndef_size: u16::from_be_bytes([cc[11], cc[12]]),
            read_access: cc[13],
            write_access: cc[14],
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut cc = Vec::with_capacity(CC_FILE_LEN);
        cc.extend_from_slice(&(CC_FILE_LEN as u16).to_be_bytes());
        cc.push(self.mapping_version);
        cc.extend_from_slice(&self.max_read_len.to_be_bytes());
        cc.extend_from_slice(&self.max_update_len.to_be_bytes());
        cc.extend_from_slice(&[0x04, 0x06]);
        cc.extend_from_slice(&FileId::NdefFile.into_raw().to_be_bytes());
        cc.extend_from_slice(&self.max_ndef_size.to_be_bytes());
        cc.push(self.read_access);
        cc.push(self.write_access);
        cc
    }
}
