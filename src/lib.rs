//! ISO/IEC 18013-5 mdoc proximity presentment: device engagement, NFC static
//! and negotiated handover, transport selection and the COSE secured
//! documents exchanged once connected.
pub mod cbor;
pub mod cose;
pub mod definitions;
pub mod issuance;
pub mod presentation;
pub mod transport;
