use crate::cbor::CborError;
use crate::definitions::device_key::cose_key::Error as CoseKeyError;
use crate::definitions::helpers::tag24::Error as Tag24Error;

/// Errors that can occur when building or deserialising an engagement.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed engagement: {0}")]
    Malformed(String),
    #[error("invalid engagement version '{0}', expected <major>.<minor>")]
    InvalidVersion(String),
    #[error("version {version} cannot carry origin infos or capabilities")]
    VersionTooLow { version: String },
    #[error("version {version} requires origin infos or capabilities, use 1.0")]
    VersionTooHigh { version: String },
    #[error("unsupported connection method type {0}")]
    UnsupportedConnectionMethod(u64),
    #[error("invalid {kind} connection method options: {reason}")]
    InvalidOptions {
        kind: &'static str,
        reason: &'static str,
    },
    #[error("NFC Command Data Length must be between 255 and 65535")]
    InvalidNfcCommandDataLength,
    #[error("NFC Response Data Length must be between 256 and 65536")]
    InvalidNfcResponseDataLength,
    #[error("invalid origin info: {0}")]
    InvalidOriginInfo(&'static str),
    #[error("qr code has invalid prefix")]
    InvalidQrCodePrefix,
    #[error("qr code is not valid base64url: {0}")]
    InvalidQrCodeEncoding(#[from] base64::DecodeError),
    #[error("Something went wrong parsing a cose key: {0}")]
    CoseKey(#[from] CoseKeyError),
    #[error("Something went wrong parsing a tag24: {0}")]
    Tag24(#[from] Tag24Error),
    #[error(transparent)]
    Cbor(#[from] CborError),
}
