//! A full NFC scan: advertise transports, hand over, connect.
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info};

use super::nfc::{perform_handover, Error, HandoverOptions, HandoverResult, TagGuard};
use crate::definitions::ConnectionMethod;
use crate::transport::{
    select_transport, AdvertisedTransports, Role, Transport, TransportFactory, TransportGuard,
    TransportOptions,
};

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub handover: HandoverOptions,
    pub transport: TransportOptions,
    pub role: Role,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            handover: HandoverOptions::default(),
            transport: TransportOptions::default(),
            role: Role::MdocReader,
        }
    }
}

pub struct ScanResult {
    /// Opened towards the holder.
    pub transport: Arc<dyn Transport>,
    pub handover: HandoverResult,
    /// The method the transport was chosen for.
    pub connection_method: ConnectionMethod,
}

impl std::fmt::Debug for ScanResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanResult")
            .field("handover", &self.handover)
            .field("connection_method", &self.connection_method)
            .finish_non_exhaustive()
    }
}

/// Advertise a transport per method in `methods`, perform the handover with
/// `tag` and open the transport for the first method the holder selected.
///
/// When the holder selected an advertised carrier that transport is reused and
/// the others are closed. Otherwise all of them are closed and a fresh
/// transport is created. The tag is closed before this returns, and nothing is
/// left open on error or when the future is dropped.
pub async fn scan(
    tag: impl Into<TagGuard>,
    factory: &dyn TransportFactory,
    methods: &[ConnectionMethod],
    options: &ScanOptions,
) -> Result<ScanResult, Error> {
    let tag: TagGuard = tag.into();
    let advertised =
        AdvertisedTransports::advertise(factory, methods, options.role, &options.transport)
            .await?;

    let handover = perform_handover(tag, methods, &options.handover).await?;
    let connection_method = handover
        .connection_methods
        .first()
        .cloned()
        .ok_or(Error::NoConnectionMethods)?;
    debug!("holder selected {connection_method:?}");

    let transport = TransportGuard::new(select_transport(
        advertised,
        &connection_method,
        factory,
        options.role,
        &options.transport,
    )?);
    transport
        .transport()
        .open(handover.device_engagement.as_ref().sender_key())
        .await?;
    info!("transport open");

    Ok(ScanResult {
        transport: transport.release(),
        handover,
        connection_method,
    })
}

/// [scan], abandoned with [Error::Cancelled] as soon as `cancel` resolves.
pub async fn scan_until(
    tag: impl Into<TagGuard>,
    factory: &dyn TransportFactory,
    methods: &[ConnectionMethod],
    options: &ScanOptions,
    cancel: impl Future<Output = ()>,
) -> Result<ScanResult, Error> {
    tokio::select! {
        result = scan(tag, factory, methods, options) => result,
        _ = cancel => {
            debug!("scan cancelled");
            Err(Error::Cancelled)
        }
    }
}
