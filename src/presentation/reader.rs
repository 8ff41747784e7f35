//! The reader engages the holder over NFC and connects on the carrier the
//! holder selected.
pub mod nfc;
pub mod scan;

pub use nfc::{
    perform_handover, Error, HandoverOptions, HandoverResult, HandoverState, NfcTag, TagError,
    TagGuard,
};
pub use scan::{scan, scan_until, ScanOptions, ScanResult};
