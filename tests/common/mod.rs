#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::{rngs::StdRng, SeedableRng};
use tokio::sync::watch;
use uuid::Uuid;

use mdoc_proximity::cose::{Curve, SigningKey};
use mdoc_proximity::definitions::{BleOptions, ConnectionMethod, CoseKey, DeviceEngagement};
use mdoc_proximity::presentation::device::HolderApduResponder;
use mdoc_proximity::presentation::reader::{NfcTag, TagError};
use mdoc_proximity::transport::{
    ConnectionState, Error, Role, Transport, TransportFactory, TransportOptions,
};

pub fn ble(uuid: u128) -> ConnectionMethod {
    ConnectionMethod::Ble(BleOptions {
        supports_peripheral_server_mode: true,
        peripheral_server_mode_uuid: Some(Uuid::from_u128(uuid)),
        ..Default::default()
    })
}

pub fn device_key(seed: u64) -> SigningKey {
    SigningKey::generate(Curve::P256, &mut StdRng::seed_from_u64(seed)).unwrap()
}

pub fn engagement(seed: u64) -> DeviceEngagement {
    DeviceEngagement::builder(CoseKey::from(&device_key(seed).verifying_key()))
        .build()
        .unwrap()
}

/// A tag backed by the holder responder, as if both phones were in the field.
#[derive(Clone)]
pub struct InMemoryTag {
    pub responder: Arc<Mutex<HolderApduResponder>>,
    pub closed: Arc<AtomicUsize>,
    /// Stall every exchange, to catch the reader mid-handover.
    pub delay: Option<Duration>,
}

impl InMemoryTag {
    pub fn new(responder: HolderApduResponder) -> Self {
        Self {
            responder: Arc::new(Mutex::new(responder)),
            closed: Arc::new(AtomicUsize::new(0)),
            delay: None,
        }
    }

    pub fn boxed(&self) -> Box<dyn NfcTag> {
        Box::new(self.clone())
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl NfcTag for InMemoryTag {
    fn transceive(&self, command: &[u8]) -> Result<Vec<u8>, TagError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let mut responder = self
            .responder
            .lock()
            .map_err(|e| TagError::Io(e.to_string()))?;
        Ok(responder.process_apdu(command))
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockTransport {
    method: ConnectionMethod,
    state: watch::Sender<ConnectionState>,
    closed: AtomicUsize,
    opened: AtomicUsize,
    advertised: AtomicUsize,
}

impl MockTransport {
    pub fn new(method: ConnectionMethod) -> Arc<Self> {
        Arc::new(Self {
            method,
            state: watch::Sender::new(ConnectionState::Idle),
            closed: AtomicUsize::new(0),
            opened: AtomicUsize::new(0),
            advertised: AtomicUsize::new(0),
        })
    }

    pub fn set(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn advertise_count(&self) -> usize {
        self.advertised.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn connection_method(&self) -> &ConnectionMethod {
        &self.method
    }

    async fn advertise(&self) -> Result<(), Error> {
        self.advertised.fetch_add(1, Ordering::SeqCst);
        self.set(ConnectionState::Advertising);
        Ok(())
    }

    async fn open(&self, _e_sender_key: &CoseKey) -> Result<(), Error> {
        if *self.state.borrow() == ConnectionState::Closed {
            return Err(Error::Closed);
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.set(ConnectionState::Connected);
        Ok(())
    }

    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.set(ConnectionState::Closed);
    }

    fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

/// Hands out mock transports and keeps them for inspection.
#[derive(Default)]
pub struct MockFactory {
    pub created: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockFactory {
    pub fn created(&self) -> Vec<Arc<MockTransport>> {
        self.created.lock().unwrap().clone()
    }
}

impl TransportFactory for MockFactory {
    fn create_transport(
        &self,
        method: &ConnectionMethod,
        _role: Role,
        _options: &TransportOptions,
    ) -> Result<Arc<dyn Transport>, Error> {
        let transport = MockTransport::new(method.clone());
        self.created
            .lock()
            .map_err(|e| Error::Open(e.to_string()))?
            .push(transport.clone());
        Ok(transport)
    }
}
