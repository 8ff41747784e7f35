//! CBOR data structures exchanged during engagement and presentation.
pub mod device_engagement;
pub mod device_key;
pub mod device_signed;
pub mod helpers;
pub mod issuer_signed;
pub mod mso;
pub mod session;
pub mod validity_info;

pub use device_engagement::{
    BleOptions, Capability, ConnectionMethod, DeviceEngagement, NfcOptions, OriginInfo,
    RestApiOptions, WifiOptions,
};
pub use device_key::cose_key::{EC2Curve, EC2Y};
pub use device_key::{CoseKey, DeviceKeyInfo, KeyAuthorizations};
pub use device_signed::{DeviceAuth, DeviceNamespaces, DeviceSigned};
pub use issuer_signed::{IssuerNamespaces, IssuerSigned, IssuerSignedItem};
pub use mso::{DigestAlgorithm, DigestId, DigestIds, Mso};
pub use session::{Handover, NfcHandover, SessionTranscript};
pub use validity_info::ValidityInfo;
