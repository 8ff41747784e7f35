//! Wire formats of NFC engagement: Type 4 tag APDUs, NDEF records, TNEP
//! service negotiation and connection handover messages.
pub mod apdu;
pub mod carrier;
pub mod handover;
pub mod ndef;
pub mod tnep;
pub mod util;

pub use apdu::{Apdu, CapabilityContainer, FileId, Response, ResponseCode};
pub use handover::{HandoverRequest, HandoverSelect};
pub use tnep::{ServiceParameterRecord, Status as TnepStatus, HANDOVER_SERVICE};
pub use util::DisplayBytesAsHex;
