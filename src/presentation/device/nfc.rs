//! Holder side of NFC engagement: answers the reader's APDUs as an emulated
//! Type 4 tag carrying the handover NDEF file.
use thiserror::Error;

use crate::definitions::{
    device_engagement::{
        self,
        nfc::{
            apdu::{self, Apdu, CapabilityContainer, FileId, Response, ResponseCode, AID_MDOC, AID_NDEF_APPLICATION},
            handover::{self, HandoverRequest, HandoverSelect},
            ndef::{encode_message, parse_message, ReadRecordError, RecordType},
            tnep::{self, parse_service_select, ServiceParameterRecord, Status},
            util::KnownOrRaw,
            HANDOVER_SERVICE,
        },
    },
    ConnectionMethod, DeviceEngagement, NfcHandover,
};

/// NDEF file size announced for static handover.
const STATIC_MAX_NDEF_SIZE: u16 = 0x7FFF;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid NDEF message: {0}")]
    Ndef(#[from] ReadRecordError),
    #[error("invalid TNEP record: {0}")]
    Tnep(#[from] tnep::Error),
    #[error(transparent)]
    Handover(#[from] handover::Error),
    #[error("unable to encode the device engagement: {0}")]
    Engagement(#[from] device_engagement::Error),
    #[error("expected a {0} record")]
    UnexpectedMessage(&'static str),
    #[error("reader wrote a message while none was expected")]
    UnexpectedWrite,
    #[error("none of the reader's connection methods is supported")]
    NoCommonCarrier,
    #[error("NDEF message of {len} bytes does not fit the NDEF file of {max}")]
    MessageTooLarge { len: usize, max: usize },
}

/// How the holder hands over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoverMode {
    /// The NDEF file holds the handover select right away.
    Static,
    /// The NDEF file announces the handover service and the select is built
    /// from the reader's handover request.
    Negotiated(ServiceParameterRecord),
}

/// What the holder agreed to, available through [HolderApduResponder::take_handover].
#[derive(Debug, Clone, PartialEq)]
pub struct HolderHandover {
    pub handover: NfcHandover,
    /// The methods put into the handover select.
    pub connection_methods: Vec<ConnectionMethod>,
}

#[derive(Debug, Clone, PartialEq)]
enum State {
    Init,
    AwaitingServiceSelect,
    AwaitingHandoverRequest,
    Done(Box<HolderHandover>),
}

type Selector =
    Box<dyn Fn(&[ConnectionMethod], &[ConnectionMethod]) -> Option<ConnectionMethod> + Send>;

/// The first reader method the holder also offers, in the reader's order.
pub fn first_common_method(
    reader: &[ConnectionMethod],
    holder: &[ConnectionMethod],
) -> Option<ConnectionMethod> {
    reader
        .iter()
        .find(|r| holder.iter().any(|h| h.method_type() == r.method_type()))
        .cloned()
}

pub struct HolderApduResponder {
    mode: HandoverMode,
    device_engagement: DeviceEngagement,
    connection_methods: Vec<ConnectionMethod>,
    selector: Selector,
    max_apdu_data: u16,
    state: State,
    selected_file: Option<KnownOrRaw<u16, FileId>>,
    cc_file: Vec<u8>,
    ndef_file: Vec<u8>,
}

impl std::fmt::Debug for HolderApduResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HolderApduResponder")
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("selected_file", &self.selected_file)
            .finish_non_exhaustive()
    }
}

impl HolderApduResponder {
    /// Create a responder for `device_engagement`, offering `connection_methods`.
    pub fn new(
        mode: HandoverMode,
        device_engagement: DeviceEngagement,
        connection_methods: Vec<ConnectionMethod>,
    ) -> Result<Self, Error> {
        let mut responder = Self {
            mode,
            device_engagement,
            connection_methods,
            selector: Box::new(first_common_method),
            max_apdu_data: apdu::SHORT_APDU_MAX_DATA as u16,
            state: State::Init,
            selected_file: None,
            cc_file: vec![],
            ndef_file: vec![],
        };
        // Fail early if the select cannot be encoded.
        responder.initial_message()?;
        responder.cc_file = responder.capability_container().to_bytes();
        Ok(responder)
    }

    /// Replace how a method is picked from the reader's handover request.
    pub fn with_selector(
        mut self,
        selector: impl Fn(&[ConnectionMethod], &[ConnectionMethod]) -> Option<ConnectionMethod>
            + Send
            + 'static,
    ) -> Self {
        self.selector = Box::new(selector);
        self
    }

    pub fn with_max_apdu_data(mut self, max_apdu_data: u16) -> Self {
        self.max_apdu_data = max_apdu_data;
        self.cc_file = self.capability_container().to_bytes();
        self
    }

    fn negotiated(&self) -> bool {
        matches!(self.mode, HandoverMode::Negotiated(_))
    }

    fn max_ndef_size(&self) -> u16 {
        match &self.mode {
            HandoverMode::Static => STATIC_MAX_NDEF_SIZE,
            HandoverMode::Negotiated(parameters) => parameters.max_ndef_size,
        }
    }

    fn capability_container(&self) -> CapabilityContainer {
        CapabilityContainer::for_handover(
            self.negotiated(),
            self.max_apdu_data,
            self.max_ndef_size(),
        )
    }

    fn initial_message(&self) -> Result<Vec<u8>, Error> {
        match &self.mode {
            HandoverMode::Static => Ok(HandoverSelect::new(
                &self.device_engagement,
                self.connection_methods.clone(),
            )?
            .to_ndef_message()),
            HandoverMode::Negotiated(parameters) => Ok(encode_message(&[parameters.to_record()])),
        }
    }

    /// Perform a full reset, keeping the engagement and configuration.
    pub fn reset(&mut self) {
        self.state = State::Init;
        self.selected_file = None;
        self.ndef_file = vec![];
    }

    /// If the handover is complete, return what was agreed and start over.
    pub fn take_handover(&mut self) -> Option<HolderHandover> {
        if !matches!(self.state, State::Done(_)) {
            return None;
        }
        match std::mem::replace(&mut self.state, State::Init) {
            State::Done(handover) => Some(*handover),
            _ => None,
        }
    }

    fn set_ndef_file(&mut self, message: &[u8]) {
        self.ndef_file = [&(message.len() as u16).to_be_bytes()[..], message].concat();
    }

    fn select_ndef_file(&mut self) -> Result<(), Error> {
        let message = self.initial_message()?;
        self.set_ndef_file(&message);
        self.state = match &self.mode {
            HandoverMode::Static => State::Done(Box::new(HolderHandover {
                handover: NfcHandover::new(message, None),
                connection_methods: self.connection_methods.clone(),
            })),
            HandoverMode::Negotiated(_) => State::AwaitingServiceSelect,
        };
        Ok(())
    }

    /// Called once the reader has written a complete message.
    fn on_message(&mut self, message: Vec<u8>) -> Result<(), Error> {
        tracing::debug!("reader wrote {} byte NDEF message", message.len());
        match self.state {
            State::AwaitingServiceSelect => {
                let records = parse_message(&message)?;
                let record = records
                    .iter()
                    .find(|r| RecordType::of(r) == Some(RecordType::TnepServiceSelect))
                    .ok_or(Error::UnexpectedMessage("TNEP service select"))?;
                let service = parse_service_select(record.payload)?;
                let status = if service == HANDOVER_SERVICE {
                    self.state = State::AwaitingHandoverRequest;
                    Status::SUCCESS
                } else {
                    tracing::warn!("reader selected unknown service {service:?}");
                    Status::PROTOCOL_ERROR
                };
                self.set_ndef_file(&encode_message(&[status.to_record()]));
                Ok(())
            }
            State::AwaitingHandoverRequest => {
                let request = HandoverRequest::parse(&message)?;
                let method = (self.selector)(&request.connection_methods, &self.connection_methods)
                    .ok_or(Error::NoCommonCarrier)?;
                let select = HandoverSelect::new(&self.device_engagement, vec![method])?;
                let select_message = select.to_ndef_message();
                self.set_ndef_file(&select_message);
                self.state = State::Done(Box::new(HolderHandover {
                    handover: NfcHandover::new(select_message, Some(message)),
                    connection_methods: select.connection_methods,
                }));
                Ok(())
            }
            State::Init | State::Done(_) => Err(Error::UnexpectedWrite),
        }
    }

    fn update_ndef_file(&mut self, offset: usize, data: &[u8]) -> Result<(), Error> {
        let end = offset + data.len();
        let max = usize::from(self.max_ndef_size());
        if end > max {
            return Err(Error::MessageTooLarge { len: end, max });
        }
        if self.ndef_file.len() < end {
            self.ndef_file.resize(end, 0);
        }
        self.ndef_file[offset..end].copy_from_slice(data);

        // The reader commits a message by writing a non-zero NLEN.
        if offset != 0 {
            return Ok(());
        }
        let [hi, lo, ..] = self.ndef_file[..] else {
            return Ok(());
        };
        let len = usize::from(u16::from_be_bytes([hi, lo]));
        if len == 0 {
            return Ok(());
        }
        match self.ndef_file.get(2..2 + len).map(<[u8]>::to_vec) {
            Some(message) => self.on_message(message),
            None => Ok(()),
        }
    }

    fn process_apdu_inner(&mut self, command: &[u8]) -> Response {
        let command = match Apdu::parse(command) {
            Ok(command) => command,
            Err(ret) => return ret,
        };

        tracing::debug!("Received APDU: {:?}", command);

        match command {
            Apdu::SelectFile {
                control_info,
                file_id,
                ..
            } => match file_id {
                KnownOrRaw::Known(FileId::CapabilityContainer) => {
                    let response = match control_info.get_payload() {
                        Ok(payload) => payload,
                        Err(err) => return err,
                    };
                    self.selected_file = Some(file_id);
                    response
                }
                KnownOrRaw::Known(FileId::NdefFile) => {
                    let response = match control_info.get_payload() {
                        Ok(payload) => payload,
                        Err(err) => return err,
                    };
                    // Selecting the file again must not reset the exchange.
                    if self.selected_file == Some(file_id) {
                        return response;
                    }
                    if let Err(err) = self.select_ndef_file() {
                        tracing::error!("Handover error: {err}");
                        self.reset();
                        return ResponseCode::Unspecified.into();
                    }
                    self.selected_file = Some(file_id);
                    response
                }
                KnownOrRaw::Unknown(_) => ResponseCode::FileOrApplicationNotFound.into(),
            },
            Apdu::SelectAid {
                control_info, aid, ..
            } => match aid {
                // Readers may select the mdoc application first; it changes nothing.
                AID_MDOC | AID_NDEF_APPLICATION => {
                    control_info.get_payload().unwrap_or_else(|err| err)
                }
                _ => ResponseCode::FileOrApplicationNotFound.into(),
            },
            Apdu::ReadBinary { slice } => {
                let file = match self.selected_file {
                    Some(KnownOrRaw::Known(FileId::CapabilityContainer)) => &self.cc_file,
                    Some(KnownOrRaw::Known(FileId::NdefFile)) => &self.ndef_file,
                    _ => return ResponseCode::ConditionsNotSatisfied.into(),
                };
                if slice.start > file.len() {
                    return ResponseCode::IncorrectP1OrP2.into();
                }
                let end = slice.end.min(file.len());
                Response::ok(file[slice.start..end].to_vec())
            }
            Apdu::UpdateBinary { offset, data } => {
                if !self.negotiated()
                    || self.selected_file != Some(KnownOrRaw::Known(FileId::NdefFile))
                {
                    return ResponseCode::ConditionsNotSatisfied.into();
                }
                match self.update_ndef_file(offset, data) {
                    Ok(()) => ResponseCode::Ok.into(),
                    Err(err) => {
                        tracing::error!("Handover error: {err}");
                        self.reset();
                        ResponseCode::Unspecified.into()
                    }
                }
            }
        }
    }

    /// Answer one command APDU.
    pub fn process_apdu(&mut self, command: &[u8]) -> Vec<u8> {
        self.process_apdu_inner(command).into()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cose::{Curve, SigningKey};
    use crate::definitions::{BleOptions, CoseKey, NfcOptions};
    use hex_literal::hex;
    use rand::{rngs::StdRng, SeedableRng};
    use uuid::Uuid;

    fn engagement() -> DeviceEngagement {
        let key = SigningKey::generate(Curve::P256, &mut StdRng::seed_from_u64(11)).unwrap();
        DeviceEngagement::builder(CoseKey::from(&key.verifying_key()))
            .build()
            .unwrap()
    }

    fn ble(uuid: u128) -> ConnectionMethod {
        ConnectionMethod::Ble(BleOptions {
            supports_peripheral_server_mode: true,
            peripheral_server_mode_uuid: Some(Uuid::from_u128(uuid)),
            ..Default::default()
        })
    }

    fn negotiated() -> HolderApduResponder {
        HolderApduResponder::new(
            HandoverMode::Negotiated(ServiceParameterRecord::handover(0, 15, 0xffff).unwrap()),
            engagement(),
            vec![ble(1)],
        )
        .unwrap()
    }

    fn select_ndef(responder: &mut HolderApduResponder) {
        for command in [
            Apdu::select_aid(AID_NDEF_APPLICATION),
            Apdu::select_file(FileId::NdefFile),
        ] {
            assert_eq!(responder.process_apdu(&command.to_bytes().unwrap()), vec![0x90, 0x00]);
        }
    }

    fn write(responder: &mut HolderApduResponder, message: &[u8]) -> Vec<u8> {
        let data = [&(message.len() as u16).to_be_bytes()[..], message].concat();
        responder.process_apdu(&Apdu::UpdateBinary { offset: 0, data: &data }.to_bytes().unwrap())
    }

    fn read(responder: &mut HolderApduResponder) -> Vec<u8> {
        let nlen = responder.process_apdu(&Apdu::ReadBinary { slice: 0..2 }.to_bytes().unwrap());
        let len = usize::from(u16::from_be_bytes([nlen[0], nlen[1]]));
        let mut message = responder.process_apdu(&Apdu::ReadBinary { slice: 2..2 + len }.to_bytes().unwrap());
        assert_eq!(message.split_off(len), vec![0x90, 0x00]);
        message
    }

    #[test]
    fn static_file_holds_handover_select() {
        let mut responder =
            HolderApduResponder::new(HandoverMode::Static, engagement(), vec![ble(1)])
                .unwrap();
        select_ndef(&mut responder);
        let message = read(&mut responder);
        let select = HandoverSelect::parse(&message).unwrap();
        assert_eq!(select.connection_methods, vec![ble(1)]);

        let report = responder.take_handover().unwrap();
        assert!(report.handover.is_static());
        assert_eq!(report.handover.handover_select(), &message[..]);
        assert!(responder.take_handover().is_none());
    }

    #[test]
    fn capability_container_reflects_mode() {
        let mut responder = negotiated();
        responder.process_apdu(&Apdu::select_file(FileId::CapabilityContainer).to_bytes().unwrap());
        let cc = responder.process_apdu(&Apdu::ReadBinary { slice: 0..15 }.to_bytes().unwrap());
        assert_eq!(cc, hex!("000F2000FF00FF0406E104FFFF0000 9000").to_vec());
    }

    #[test]
    fn static_refuses_writes() {
        let mut responder =
            HolderApduResponder::new(HandoverMode::Static, engagement(), vec![ble(1)])
                .unwrap();
        select_ndef(&mut responder);
        assert_eq!(write(&mut responder, &[0xd1]), hex!("6985").to_vec());
    }

    #[test]
    fn negotiated_exchange() {
        let mut responder = negotiated();
        select_ndef(&mut responder);
        let tp = read(&mut responder);
        let records = parse_message(&tp).unwrap();
        assert!(ServiceParameterRecord::from_record(&records[0])
            .unwrap()
            .unwrap()
            .is_handover());

        let ts = encode_message(&[tnep::service_select(HANDOVER_SERVICE)]);
        assert_eq!(write(&mut responder, &ts), vec![0x90, 0x00]);
        assert_eq!(read(&mut responder), hex!("d102015465 00").to_vec());

        let reader_methods = vec![ConnectionMethod::Nfc(NfcOptions::default()), ble(2)];
        let hr = HandoverRequest {
            reader_engagement: None,
            connection_methods: reader_methods,
        }
        .to_ndef_message();
        assert_eq!(write(&mut responder, &hr), vec![0x90, 0x00]);
        let hs = read(&mut responder);
        let select = HandoverSelect::parse(&hs).unwrap();
        assert_eq!(select.connection_methods, vec![ble(2)]);

        let report = responder.take_handover().unwrap();
        assert_eq!(report.handover, NfcHandover::new(hs, Some(hr)));
        assert_eq!(report.connection_methods, vec![ble(2)]);
    }

    #[test]
    fn chunked_write_commits_on_nlen() {
        let mut responder = negotiated();
        select_ndef(&mut responder);
        let ts = encode_message(&[tnep::service_select(HANDOVER_SERVICE)]);

        let mut apdus = vec![Apdu::UpdateBinary { offset: 0, data: &[0, 0] }.to_bytes().unwrap()];
        for (i, chunk) in ts.chunks(10).enumerate() {
            apdus.push(Apdu::UpdateBinary { offset: 2 + i * 10, data: chunk }.to_bytes().unwrap());
        }
        let nlen = (ts.len() as u16).to_be_bytes();
        apdus.push(Apdu::UpdateBinary { offset: 0, data: &nlen }.to_bytes().unwrap());
        for apdu in apdus {
            assert_eq!(responder.process_apdu(&apdu), vec![0x90, 0x00]);
        }
        let te = read(&mut responder);
        let records = parse_message(&te).unwrap();
        assert_eq!(RecordType::of(&records[0]), Some(RecordType::TnepStatus));
        assert!(Status::parse(records[0].payload).unwrap().is_success());
    }

    #[test]
    fn unknown_service_is_a_protocol_error() {
        let mut responder = negotiated();
        select_ndef(&mut responder);
        let ts = encode_message(&[tnep::service_select("urn:nfc:sn:other")]);
        write(&mut responder, &ts);
        let te = read(&mut responder);
        let records = parse_message(&te).unwrap();
        assert_eq!(Status::parse(records[0].payload).unwrap(), Status::PROTOCOL_ERROR);
    }

    #[test]
    fn no_common_carrier() {
        let mut responder = negotiated();
        select_ndef(&mut responder);
        write(&mut responder, &encode_message(&[tnep::service_select(HANDOVER_SERVICE)]));
        let hr = HandoverRequest {
            reader_engagement: None,
            connection_methods: vec![ConnectionMethod::Nfc(NfcOptions::default())],
        }
        .to_ndef_message();
        assert_eq!(write(&mut responder, &hr), hex!("6F00").to_vec());
        assert!(responder.take_handover().is_none());
    }

    #[test]
    fn ndef_application_without_mdoc_aid() {
        let mut responder =
            HolderApduResponder::new(HandoverMode::Static, engagement(), vec![ble(1)]).unwrap();
        let select = Apdu::select_aid(AID_NDEF_APPLICATION).to_bytes().unwrap();
        assert_eq!(responder.process_apdu(&select), hex!("9000").to_vec());
        let cc = Apdu::select_file(FileId::CapabilityContainer).to_bytes().unwrap();
        assert_eq!(responder.process_apdu(&cc), hex!("9000").to_vec());

        // Selecting the mdoc application as well is accepted.
        let mdoc = Apdu::select_aid(AID_MDOC).to_bytes().unwrap();
        assert_eq!(responder.process_apdu(&mdoc), hex!("9000").to_vec());
        assert_eq!(responder.process_apdu(&select), hex!("9000").to_vec());
    }
}
