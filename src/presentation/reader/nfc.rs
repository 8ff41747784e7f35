//! Reader side of NFC engagement: drives a Type 4 tag emulated by the holder
//! through static or negotiated handover.
//!
//! ```text
//! SelectNdefApp -> SelectCapabilityFile -> ReadCapabilityFile -> SelectNdefFile
//!   -> ReadInitialMessage -> StaticHandoverDone
//!                         \-> NegotiatedServiceSelect -> NegotiatedHandoverRequest
//!                               -> NegotiatedHandoverDone
//! ```
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::spawn_blocking;
use tracing::{debug, info};

use crate::definitions::{
    device_engagement::nfc::{
        apdu::{self, Apdu, CapabilityContainer, FileId, Response, AID_NDEF_APPLICATION, CC_FILE_LEN},
        handover::{self, HandoverRequest, HandoverSelect},
        ndef::{encode_message, parse_message, ReadRecordError, RecordType},
        tnep::{self, ServiceParameterRecord, Status},
        DisplayBytesAsHex, HANDOVER_SERVICE,
    },
    device_engagement::EReaderKeyBytes,
    helpers::{tag24, Tag24},
    session::{DeviceEngagementBytes, Handover, SessionTranscript},
    ConnectionMethod, NfcHandover,
};
use crate::transport;

/// Failure reported by the platform NFC stack.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TagError {
    #[error("tag was lost")]
    TagLost,
    #[error("tag I/O failed: {0}")]
    Io(String),
}

/// An ISO-DEP tag, as handed over by the platform once it is in the field.
///
/// `transceive` blocks until the tag answers. `close` can be called from
/// another thread while a `transceive` is still pending, and should make it
/// fail.
pub trait NfcTag: Send + Sync {
    fn transceive(&self, command: &[u8]) -> Result<Vec<u8>, TagError>;

    fn close(&self);
}

/// Shares a tag with the blocking exchanges and closes it when dropped, even
/// with an exchange still in flight.
pub struct TagGuard(Arc<dyn NfcTag>);

impl TagGuard {
    pub fn new(tag: Arc<dyn NfcTag>) -> Self {
        Self(tag)
    }
}

impl From<Arc<dyn NfcTag>> for TagGuard {
    fn from(tag: Arc<dyn NfcTag>) -> Self {
        Self::new(tag)
    }
}

impl From<Box<dyn NfcTag>> for TagGuard {
    fn from(tag: Box<dyn NfcTag>) -> Self {
        Self::new(Arc::from(tag))
    }
}

impl Drop for TagGuard {
    fn drop(&mut self) {
        debug!("closing NFC tag");
        self.0.close();
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Tag(#[from] TagError),
    #[error("APDU failed with status word {:02X}{:02X}", .0[0], .0[1])]
    ApduStatus([u8; 2]),
    #[error(transparent)]
    Apdu(#[from] apdu::Error),
    #[error("invalid NDEF message: {0}")]
    Ndef(#[from] ReadRecordError),
    #[error("invalid TNEP record: {0}")]
    Tnep(#[from] tnep::Error),
    #[error(transparent)]
    Handover(#[from] handover::Error),
    #[error("invalid device engagement: {0}")]
    Engagement(#[from] tag24::Error),
    #[error(transparent)]
    Transport(#[from] transport::Error),
    #[error("holder offered no connection method")]
    NoConnectionMethods,
    #[error("service selection failed with TNEP status {0:#04x}")]
    ServiceSelectionFailed(u8),
    #[error("malformed handover select: {0}")]
    MalformedHandoverSelect(String),
    #[error("negotiated handover takes exactly one carrier, {0} were offered")]
    UnsupportedNegotiatedCarriers(usize),
    #[error("holder did not answer within the TNEP waiting time")]
    TnepTimeout,
    #[error("read {actual} bytes where {expected} were expected")]
    ShortRead { expected: usize, actual: usize },
    #[error("NDEF message of {len} bytes exceeds the limit of {max}")]
    MessageTooLarge { len: usize, max: usize },
    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum HandoverState {
    SelectNdefApp,
    SelectCapabilityFile,
    ReadCapabilityFile,
    SelectNdefFile,
    ReadInitialMessage,
    StaticHandoverDone,
    NegotiatedServiceSelect,
    NegotiatedHandoverRequest,
    NegotiatedHandoverDone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoverOptions {
    /// Upper bound on the data field of each READ BINARY and UPDATE BINARY,
    /// on top of what the capability container allows.
    pub max_apdu_data: usize,
    /// Floor for the wait between TNEP polls.
    pub min_poll_wait: Duration,
    /// Encoded reader engagement sent along with the handover request.
    pub reader_engagement: Option<Vec<u8>>,
}

impl Default for HandoverOptions {
    fn default() -> Self {
        Self {
            max_apdu_data: apdu::SHORT_APDU_MAX_DATA,
            min_poll_wait: Duration::ZERO,
            reader_engagement: None,
        }
    }
}

/// Outcome of a completed handover.
#[derive(Debug, Clone)]
pub struct HandoverResult {
    pub handover: NfcHandover,
    /// The holder's engagement, with the bytes exactly as they were read.
    pub device_engagement: DeviceEngagementBytes,
    /// Methods listed in the handover select, in the holder's order.
    pub connection_methods: Vec<ConnectionMethod>,
}

impl HandoverResult {
    pub fn session_transcript(&self, e_reader_key: EReaderKeyBytes) -> SessionTranscript {
        SessionTranscript::new(
            self.device_engagement.clone(),
            e_reader_key,
            Handover::Nfc(self.handover.clone()),
        )
    }
}

/// Sequential APDU exchange with one tag.
struct TagSession {
    tag: TagGuard,
    state: HandoverState,
    max_read: usize,
    max_write: usize,
    /// Largest NDEF message the NDEF file holds, NLEN excluded.
    max_message: usize,
}

impl TagSession {
    fn new(tag: TagGuard, max_apdu_data: usize) -> Self {
        Self {
            tag,
            state: HandoverState::SelectNdefApp,
            max_read: max_apdu_data.max(1),
            max_write: max_apdu_data.max(1),
            max_message: usize::from(u16::MAX),
        }
    }

    fn apply(&mut self, cc: &CapabilityContainer) {
        self.max_read = self.max_read.min(usize::from(cc.max_read_len).max(1));
        self.max_write = self.max_write.min(usize::from(cc.max_update_len).max(1));
        self.max_message = usize::from(cc.max_ndef_size.saturating_sub(2));
    }

    fn enter(&mut self, next: HandoverState) {
        debug!("handover state {} -> {next}", self.state);
        self.state = next;
    }

    /// Runs the blocking transceive off the scheduler. The guard stays here,
    /// so dropping the session closes the tag while the exchange is pending.
    async fn transceive(&mut self, command: Apdu<'_>) -> Result<Vec<u8>, Error> {
        let command = command.to_bytes()?;
        debug!("> {}", DisplayBytesAsHex::from(&command));
        let tag = self.tag.0.clone();
        let response = spawn_blocking(move || tag.transceive(&command))
            .await
            .map_err(|e| TagError::Io(e.to_string()))??;

        debug!("< {}", DisplayBytesAsHex::from(&response));
        Response::try_from(response.as_slice())?
            .into_payload()
            .map_err(Error::ApduStatus)
    }

    async fn read_binary(&mut self, offset: usize, len: usize) -> Result<Vec<u8>, Error> {
        let payload = self
            .transceive(Apdu::ReadBinary {
                slice: offset..offset + len,
            })
            .await?;
        if payload.len() != len {
            return Err(Error::ShortRead {
                expected: len,
                actual: payload.len(),
            });
        }
        Ok(payload)
    }

    async fn update_binary(&mut self, offset: usize, data: &[u8]) -> Result<(), Error> {
        self.transceive(Apdu::UpdateBinary { offset, data }).await?;
        Ok(())
    }

    async fn read_nlen(&mut self) -> Result<usize, Error> {
        let nlen = self.read_binary(0, 2).await?;
        let len = usize::from(u16::from_be_bytes([nlen[0], nlen[1]]));
        if len > self.max_message {
            return Err(Error::MessageTooLarge {
                len,
                max: self.max_message,
            });
        }
        Ok(len)
    }

    async fn read_message(&mut self, len: usize) -> Result<Vec<u8>, Error> {
        let mut message = Vec::with_capacity(len);
        while message.len() < len {
            let chunk = (len - message.len()).min(self.max_read);
            message.extend(self.read_binary(2 + message.len(), chunk).await?);
        }
        Ok(message)
    }

    /// A message that fits one APDU goes out with its length in a single
    /// UPDATE BINARY. Anything longer is written with NLEN zeroed first and
    /// set last, so the holder never sees a partial message.
    async fn write_message(&mut self, message: &[u8]) -> Result<(), Error> {
        let len = u16::try_from(message.len()).map_err(|_| Error::MessageTooLarge {
            len: message.len(),
            max: usize::from(u16::MAX),
        })?;
        if message.len() + 2 <= self.max_write {
            let data = [&len.to_be_bytes()[..], message].concat();
            return self.update_binary(0, &data).await;
        }
        self.update_binary(0, &[0x00, 0x00]).await?;
        for (i, chunk) in message.chunks(self.max_write).enumerate() {
            self.update_binary(2 + i * self.max_write, chunk).await?;
        }
        self.update_binary(0, &len.to_be_bytes()).await
    }

    /// Poll for the holder's answer, waiting `T_wait` before each read and
    /// giving up after the `N_wait` extensions are spent.
    async fn await_response(
        &mut self,
        parameters: &ServiceParameterRecord,
        min_wait: Duration,
    ) -> Result<Vec<u8>, Error> {
        let wait = parameters.t_wait().max(min_wait);
        for attempt in 0..=parameters.n_wait {
            tokio::time::sleep(wait).await;
            let len = self.read_nlen().await?;
            if len > 0 {
                return self.read_message(len).await;
            }
            debug!("no TNEP response yet, attempt {attempt}");
        }
        Err(Error::TnepTimeout)
    }
}

/// Run the handover with the tag, which is closed once this returns.
///
/// `reader_methods` are only used for negotiated handover, where they go into
/// the handover request.
pub async fn perform_handover(
    tag: impl Into<TagGuard>,
    reader_methods: &[ConnectionMethod],
    options: &HandoverOptions,
) -> Result<HandoverResult, Error> {
    let mut session = TagSession::new(tag.into(), options.max_apdu_data);

    session
        .transceive(Apdu::select_aid(AID_NDEF_APPLICATION))
        .await?;

    session.enter(HandoverState::SelectCapabilityFile);
    session
        .transceive(Apdu::select_file(FileId::CapabilityContainer))
        .await?;

    session.enter(HandoverState::ReadCapabilityFile);
    let cc = CapabilityContainer::parse(&session.read_binary(0, CC_FILE_LEN).await?)?;
    debug!("capability container: {cc:?}");
    session.apply(&cc);

    session.enter(HandoverState::SelectNdefFile);
    session
        .transceive(Apdu::select_file(FileId::NdefFile))
        .await?;

    session.enter(HandoverState::ReadInitialMessage);
    let len = session.read_nlen().await?;
    let initial = session.read_message(len).await?;

    let service_parameters = parse_message(&initial)?
        .iter()
        .filter_map(ServiceParameterRecord::from_record)
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .find(ServiceParameterRecord::is_handover);

    let result = match service_parameters {
        None => {
            session.enter(HandoverState::StaticHandoverDone);
            static_handover(initial)?
        }
        Some(parameters) => {
            session.enter(HandoverState::NegotiatedServiceSelect);
            negotiated_handover(&mut session, &parameters, reader_methods, options).await?
        }
    };
    info!(
        "handover done, holder offered {} connection methods",
        result.connection_methods.len()
    );
    Ok(result)
}

fn static_handover(message: Vec<u8>) -> Result<HandoverResult, Error> {
    let select = HandoverSelect::parse(&message)?;
    if select.connection_methods.is_empty() {
        return Err(Error::NoConnectionMethods);
    }
    Ok(HandoverResult {
        device_engagement: Tag24::from_bytes(select.device_engagement)?,
        connection_methods: select.connection_methods,
        handover: NfcHandover::new(message, None),
    })
}

async fn negotiated_handover(
    session: &mut TagSession,
    parameters: &ServiceParameterRecord,
    reader_methods: &[ConnectionMethod],
    options: &HandoverOptions,
) -> Result<HandoverResult, Error> {
    if reader_methods.len() != 1 {
        return Err(Error::UnsupportedNegotiatedCarriers(reader_methods.len()));
    }
    let max_message = usize::from(parameters.max_ndef_size).min(session.max_message);

    let service_select = encode_message(&[tnep::service_select(HANDOVER_SERVICE)]);
    session.write_message(&service_select).await?;
    let answer = session.await_response(parameters, options.min_poll_wait).await?;
    let status = parse_message(&answer)?
        .iter()
        .find(|r| RecordType::of(r) == Some(RecordType::TnepStatus))
        .map(|r| Status::parse(r.payload))
        .ok_or(handover::Error::MissingRecord("TNEP status"))??;
    if !status.is_success() {
        return Err(Error::ServiceSelectionFailed(status.0));
    }

    session.enter(HandoverState::NegotiatedHandoverRequest);
    let request = HandoverRequest {
        reader_engagement: options.reader_engagement.clone(),
        connection_methods: reader_methods.to_vec(),
    }
    .to_ndef_message();
    if request.len() > max_message {
        return Err(Error::MessageTooLarge {
            len: request.len(),
            max: max_message,
        });
    }
    session.write_message(&request).await?;
    let message = session.await_response(parameters, options.min_poll_wait).await?;

    let select = HandoverSelect::parse(&message).map_err(|e| match e {
        handover::Error::MissingRecord(_) | handover::Error::DuplicateRecord { .. } => {
            Error::MalformedHandoverSelect(e.to_string())
        }
        e => Error::Handover(e),
    })?;
    if select.connection_methods.is_empty() {
        return Err(Error::MalformedHandoverSelect(
            "no alternative carrier".to_string(),
        ));
    }
    session.enter(HandoverState::NegotiatedHandoverDone);
    Ok(HandoverResult {
        device_engagement: Tag24::from_bytes(select.device_engagement)?,
        connection_methods: select.connection_methods,
        handover: NfcHandover::new(message, Some(request)),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::definitions::{BleOptions, CoseKey, DeviceEngagement};
    use crate::cose::{Curve, SigningKey};
    use hex_literal::hex;
    use rand::{rngs::StdRng, SeedableRng};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    const OK: [u8; 2] = [0x90, 0x00];

    // Static handover select read from a holder.
    const CAPTURED_HS: [u8; 204] = hex!(
        "91020f487315d10209616301013001046d646f631c1e580469736f2e6f72673a31383031333a646576
         696365656e676167656d656e746d646f63a20063312e30018201d818584ba401022001215820812e9e
         fe35395a9f669a743f1b26d13fc4dfd7a5becc848fb6ea0b6ee8dc6cc722582020912755a436b0acc4
         4defb07c0676b9274f6df7246d1627f91e8adfaa435acb5a2015016170706c69636174696f6e2f766e
         642e626c7565746f6f74682e6c652e6f6f6230021c01110743bc2a67bf797ab0404da09e0e2e81e0"
    );

    const STATIC_CC: [u8; 15] = hex!("000F207FFF7FFF0406E1047FFF00FF");
    const NEGOTIATED_CC: [u8; 15] = hex!("000F207FFF7FFF0406E1047FFF0000");

    /// Answers from a script and records what the reader sent.
    #[derive(Default, Clone)]
    struct ScriptedTag {
        responses: Arc<Mutex<VecDeque<Vec<u8>>>>,
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
        closed: Arc<Mutex<usize>>,
    }

    impl ScriptedTag {
        fn new(responses: Vec<Vec<u8>>) -> Self {
            Self {
                responses: Arc::new(Mutex::new(responses.into())),
                ..Default::default()
            }
        }

        fn boxed(&self) -> Box<dyn NfcTag> {
            Box::new(self.clone())
        }

        fn sent(&self) -> Vec<Vec<u8>> {
            self.sent.lock().unwrap().clone()
        }

        fn closed(&self) -> usize {
            *self.closed.lock().unwrap()
        }
    }

    impl NfcTag for ScriptedTag {
        fn transceive(&self, command: &[u8]) -> Result<Vec<u8>, TagError> {
            self.sent.lock().unwrap().push(command.to_vec());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(TagError::TagLost)
        }

        fn close(&self) {
            *self.closed.lock().unwrap() += 1;
        }
    }

    fn ok(payload: &[u8]) -> Vec<u8> {
        [payload, &OK].concat()
    }

    fn initial(cc: &[u8], message: &[u8]) -> Vec<Vec<u8>> {
        vec![
            OK.to_vec(),
            OK.to_vec(),
            ok(cc),
            OK.to_vec(),
            ok(&(message.len() as u16).to_be_bytes()),
            ok(message),
        ]
    }

    fn tp(n_wait: u8) -> Vec<u8> {
        encode_message(&[ServiceParameterRecord::handover(0, n_wait, 0xffff)
            .unwrap()
            .to_record()])
    }

    fn reader_ble() -> ConnectionMethod {
        ConnectionMethod::Ble(BleOptions {
            supports_central_client_mode: true,
            central_client_mode_uuid: Some(Uuid::from_u128(0x1234)),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn multipaz_static() {
        let tag = ScriptedTag::new(initial(&STATIC_CC, &CAPTURED_HS));
        let result = perform_handover(tag.boxed(), &[], &HandoverOptions::default())
            .await
            .unwrap();

        assert!(result.handover.is_static());
        assert_eq!(result.handover.handover_select(), &CAPTURED_HS[..]);
        assert_eq!(result.device_engagement.as_ref().version(), "1.0");

        let uuid = Uuid::parse_str("e0812e0e-9ea0-4d40-b07a-79bf672abc43").unwrap();
        let expected = ConnectionMethod::Ble(BleOptions {
            peripheral_server_mode_uuid: Some(uuid),
            central_client_mode_uuid: Some(uuid),
            ..Default::default()
        });
        assert_eq!(result.connection_methods.len(), 1);
        assert!(result.connection_methods[0].is_same_carrier(&expected));

        assert_eq!(
            tag.sent(),
            vec![
                hex!("00A4040007D276000085010100").to_vec(),
                hex!("00A4000C02E103").to_vec(),
                hex!("00B000000F").to_vec(),
                hex!("00A4000C02E104").to_vec(),
                hex!("00B0000002").to_vec(),
                hex!("00B00002CC").to_vec(),
            ]
        );
        assert_eq!(tag.closed(), 1);
    }

    #[tokio::test]
    async fn rejected_service_select_sends_no_request() {
        let mut script = initial(&NEGOTIATED_CC, &tp(15));
        let te = encode_message(&[Status::PROTOCOL_ERROR.to_record()]);
        script.extend([
            OK.to_vec(),
            ok(&(te.len() as u16).to_be_bytes()),
            ok(&te),
        ]);
        let tag = ScriptedTag::new(script);

        let err = perform_handover(tag.boxed(), &[reader_ble()], &HandoverOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ServiceSelectionFailed(0x01)), "{err}");

        let sent = tag.sent();
        assert_eq!(sent.len(), 9);
        assert_eq!(
            sent[6],
            hex!("00D600001B0019D102145473137572 6E3A6E66633A736E3A68616E646F766572").to_vec()
        );
        assert_eq!(tag.closed(), 1);
    }

    #[tokio::test]
    async fn tnep_timeout() {
        let mut script = initial(&NEGOTIATED_CC, &tp(1));
        script.push(OK.to_vec());
        script.extend(std::iter::repeat(ok(&[0x00, 0x00])).take(2));
        let tag = ScriptedTag::new(script);

        let err = perform_handover(tag.boxed(), &[reader_ble()], &HandoverOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TnepTimeout), "{err}");
        assert_eq!(tag.sent().len(), 9);
    }

    #[tokio::test]
    async fn negotiated_needs_exactly_one_carrier() {
        let tag = ScriptedTag::new(initial(&NEGOTIATED_CC, &tp(1)));
        let methods = [reader_ble(), ConnectionMethod::Nfc(Default::default())];
        let err = perform_handover(tag.boxed(), &methods, &HandoverOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedNegotiatedCarriers(2)));
        // nothing written
        assert_eq!(tag.sent().len(), 6);
    }

    #[tokio::test]
    async fn nlen_beyond_the_ndef_file_is_refused() {
        // A tag announcing the largest NDEF file a CC can describe.
        let cc = hex!("000F207FFF7FFF0406E104FFFF00FF");
        let tag = ScriptedTag::new(vec![
            OK.to_vec(),
            OK.to_vec(),
            ok(&cc),
            OK.to_vec(),
            ok(&[0xFF, 0xFE]),
        ]);
        let err = perform_handover(tag.boxed(), &[], &HandoverOptions::default())
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::MessageTooLarge { len: 0xFFFE, max: 0xFFFD }),
            "{err}"
        );
        // no read past NLEN
        assert_eq!(tag.sent().len(), 5);
        assert_eq!(tag.closed(), 1);
    }

    #[tokio::test]
    async fn nlen_within_a_small_ndef_file() {
        let mut cc = STATIC_CC;
        // 0x00CE leaves room for exactly CAPTURED_HS
        cc[11..13].copy_from_slice(&[0x00, 0xCE]);
        let tag = ScriptedTag::new(initial(&cc, &CAPTURED_HS));
        perform_handover(tag.boxed(), &[], &HandoverOptions::default())
            .await
            .unwrap();

        cc[11..13].copy_from_slice(&[0x00, 0xCD]);
        let tag = ScriptedTag::new(initial(&cc, &CAPTURED_HS));
        let err = perform_handover(tag.boxed(), &[], &HandoverOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MessageTooLarge { len: 204, max: 203 }), "{err}");
    }

    /// Blocks every exchange until closed.
    #[derive(Default)]
    struct StuckTag {
        closed: Mutex<bool>,
        wake: std::sync::Condvar,
        closes: std::sync::atomic::AtomicUsize,
    }

    impl NfcTag for StuckTag {
        fn transceive(&self, _command: &[u8]) -> Result<Vec<u8>, TagError> {
            let mut closed = self.closed.lock().unwrap();
            while !*closed {
                closed = self.wake.wait(closed).unwrap();
            }
            Err(TagError::TagLost)
        }

        fn close(&self) {
            self.closes
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            *self.closed.lock().unwrap() = true;
            self.wake.notify_all();
        }
    }

    #[tokio::test]
    async fn dropping_the_handover_closes_a_pending_tag() {
        let tag = Arc::new(StuckTag::default());
        let shared: Arc<dyn NfcTag> = tag.clone();
        let result = tokio::time::timeout(
            Duration::from_millis(20),
            perform_handover(shared, &[], &HandoverOptions::default()),
        )
        .await;
        assert!(result.is_err());
        // closed by the guard, not by the blocked exchange returning
        assert_eq!(tag.closes.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(*tag.closed.lock().unwrap());
    }

    #[tokio::test]
    async fn bad_status_word() {
        let tag = ScriptedTag::new(vec![hex!("6A82").to_vec()]);
        let err = perform_handover(tag.boxed(), &[], &HandoverOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ApduStatus([0x6A, 0x82])));
        assert_eq!(tag.closed(), 1);
    }

    #[tokio::test]
    async fn static_select_without_carriers() {
        let key = SigningKey::generate(Curve::P256, &mut StdRng::seed_from_u64(3)).unwrap();
        let engagement = DeviceEngagement::builder(CoseKey::from(&key.verifying_key()))
            .build()
            .unwrap();
        let hs = HandoverSelect::new(&engagement, vec![])
            .unwrap()
            .to_ndef_message();
        let tag = ScriptedTag::new(initial(&STATIC_CC, &hs));
        let err = perform_handover(tag.boxed(), &[], &HandoverOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoConnectionMethods));
    }

    #[tokio::test]
    async fn reads_are_chunked() {
        let tag = ScriptedTag::new(vec![
            OK.to_vec(),
            OK.to_vec(),
            ok(&STATIC_CC),
            OK.to_vec(),
            ok(&[0x00, 0xCC]),
            ok(&CAPTURED_HS[..100]),
            ok(&CAPTURED_HS[100..200]),
            ok(&CAPTURED_HS[200..]),
        ]);
        let options = HandoverOptions {
            max_apdu_data: 100,
            ..Default::default()
        };
        let result = perform_handover(tag.boxed(), &[], &options).await.unwrap();
        assert_eq!(result.handover.handover_select(), &CAPTURED_HS[..]);
        let sent = tag.sent();
        assert_eq!(sent[5], hex!("00B0000264").to_vec());
        assert_eq!(sent[6], hex!("00B0006664").to_vec());
        assert_eq!(sent[7], hex!("00B000CA04").to_vec());
    }
}
