//! Data transports the holder and reader meet on after engagement.
//!
//! The platform supplies concrete transports through a [TransportFactory]. This
//! module only sequences them: advertising several at once, handing one over to
//! the session and closing the rest.
//!
//! ```text
//! Idle -> Advertising -> Connecting -> Connected -> Closed
//!                    \-> Failed
//! ```
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::definitions::{CoseKey, ConnectionMethod};

pub mod race;

pub use race::race_for_connection;

/// Lifecycle of a transport, observed through [Transport::state].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum ConnectionState {
    Idle,
    Advertising,
    Connecting,
    Connected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// The remote side has shown up on this transport.
    pub fn is_connecting_or_connected(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }
}

/// Which end of the presentation a transport serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Mdoc,
    MdocReader,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    /// Prefer an L2CAP channel over GATT characteristics on BLE.
    pub ble_use_l2cap: bool,
    /// Size of the receive buffer handed to the platform transport.
    pub buffer_size: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            ble_use_l2cap: false,
            buffer_size: 32 * 1024,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no transport for connection method {0:?}")]
    Unsupported(ConnectionMethod),
    #[error("advertising failed: {0}")]
    Advertise(String),
    #[error("opening the connection failed: {0}")]
    Open(String),
    #[error("transport is closed")]
    Closed,
    #[error("no transport connected")]
    NoConnection,
    #[error("racing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A data transport for one connection method.
///
/// `close` never suspends, so it can be called from `Drop` while a scan is
/// being torn down, and calling it again has no effect.
#[async_trait]
pub trait Transport: Send + Sync {
    fn connection_method(&self) -> &ConnectionMethod;

    /// Make this end reachable, e.g. start BLE advertising.
    async fn advertise(&self) -> Result<(), Error>;

    /// Connect to the other end, keyed by the holder's ephemeral key.
    async fn open(&self, e_sender_key: &CoseKey) -> Result<(), Error>;

    fn close(&self);

    fn state(&self) -> watch::Receiver<ConnectionState>;
}

pub trait TransportFactory: Send + Sync {
    fn create_transport(
        &self,
        method: &ConnectionMethod,
        role: Role,
        options: &TransportOptions,
    ) -> Result<Arc<dyn Transport>, Error>;
}

/// Transports advertised ahead of engagement.
///
/// Whatever has not been claimed when this is dropped gets closed, so an error
/// or a cancelled scan never leaves a transport advertising.
#[derive(Default)]
pub struct AdvertisedTransports {
    transports: Vec<Arc<dyn Transport>>,
}

impl AdvertisedTransports {
    /// Create and advertise one transport per method.
    pub async fn advertise(
        factory: &dyn TransportFactory,
        methods: &[ConnectionMethod],
        role: Role,
        options: &TransportOptions,
    ) -> Result<Self, Error> {
        let mut advertised = AdvertisedTransports::default();
        for method in methods {
            advertised
                .transports
                .push(factory.create_transport(method, role, options)?);
        }
        // On failure `advertised` is dropped, closing every transport created so far.
        try_join_all(advertised.transports.iter().map(|t| t.advertise())).await?;
        info!("advertising on {} transports", advertised.transports.len());
        Ok(advertised)
    }

    pub fn connection_methods(&self) -> Vec<ConnectionMethod> {
        self.transports
            .iter()
            .map(|t| t.connection_method().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.transports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transports.is_empty()
    }

    /// Take the transport for the carrier the holder selected, closing all the others.
    pub fn claim(mut self, selected: &ConnectionMethod) -> Option<Arc<dyn Transport>> {
        let index = self
            .transports
            .iter()
            .position(|t| t.connection_method().is_same_carrier(selected))?;
        debug!("reusing advertised transport for {selected:?}");
        Some(self.transports.swap_remove(index))
    }

    /// Give up every transport, e.g. to race them.
    pub fn into_inner(mut self) -> Vec<Arc<dyn Transport>> {
        std::mem::take(&mut self.transports)
    }

    pub fn close_all(self) {
        drop(self)
    }
}

impl From<Vec<Arc<dyn Transport>>> for AdvertisedTransports {
    fn from(transports: Vec<Arc<dyn Transport>>) -> Self {
        Self { transports }
    }
}

impl Drop for AdvertisedTransports {
    fn drop(&mut self) {
        for transport in self.transports.drain(..) {
            transport.close();
        }
    }
}

/// Closes a transport on drop unless it was handed on with [TransportGuard::release].
pub struct TransportGuard {
    transport: Arc<dyn Transport>,
    armed: bool,
}

impl TransportGuard {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            armed: true,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn release(mut self) -> Arc<dyn Transport> {
        self.armed = false;
        self.transport.clone()
    }
}

impl Drop for TransportGuard {
    fn drop(&mut self) {
        if self.armed {
            self.transport.close();
        }
    }
}

/// Reuse the advertised transport for `selected`, or close them all and create a fresh one.
pub fn select_transport(
    advertised: AdvertisedTransports,
    selected: &ConnectionMethod,
    factory: &dyn TransportFactory,
    role: Role,
    options: &TransportOptions,
) -> Result<Arc<dyn Transport>, Error> {
    if let Some(transport) = advertised.claim(selected) {
        return Ok(transport);
    }
    info!("holder selected a method that was not advertised, creating a transport for it");
    factory.create_transport(selected, role, options)
}
