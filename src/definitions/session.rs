//! The session transcript both parties bind their authentication to.
use serde::{Deserialize, Serialize};

use crate::definitions::{
    device_engagement::EReaderKeyBytes,
    helpers::{tag24, ByteStr, Tag24},
    DeviceEngagement,
};

pub type DeviceEngagementBytes = Tag24<DeviceEngagement>;

/// `[HandoverSelect message, HandoverRequest message | null]`.
///
/// Static handover has no request message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NfcHandover(pub ByteStr, pub Option<ByteStr>);

impl NfcHandover {
    pub fn new(handover_select: Vec<u8>, handover_request: Option<Vec<u8>>) -> Self {
        Self(handover_select.into(), handover_request.map(Into::into))
    }

    pub fn handover_select(&self) -> &[u8] {
        self.0.as_ref()
    }

    pub fn handover_request(&self) -> Option<&[u8]> {
        self.1.as_ref().map(AsRef::as_ref)
    }

    pub fn is_static(&self) -> bool {
        self.1.is_none()
    }
}

/// Engagement-specific part of the transcript; QR engagement has none.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Handover {
    Qr,
    Nfc(NfcHandover),
}

/// `[DeviceEngagementBytes, EReaderKeyBytes, Handover]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionTranscript(
    pub DeviceEngagementBytes,
    pub EReaderKeyBytes,
    pub Handover,
);

impl SessionTranscript {
    pub fn new(
        device_engagement: DeviceEngagementBytes,
        e_reader_key: EReaderKeyBytes,
        handover: Handover,
    ) -> Self {
        Self(device_engagement, e_reader_key, handover)
    }

    pub fn device_engagement(&self) -> &DeviceEngagement {
        self.0.as_ref()
    }

    pub fn handover(&self) -> &Handover {
        &self.2
    }

    /// `#6.24(bstr .cbor SessionTranscript)`
    pub fn to_tagged_bytes(&self) -> Result<Vec<u8>, tag24::Error> {
        Tag24::new(self.clone())?.to_tagged_bytes()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cbor;
    use crate::cose::{Curve, SigningKey};
    use crate::definitions::CoseKey;
    use ciborium::Value;
    use rand::{rngs::StdRng, SeedableRng};

    fn key(seed: u64) -> CoseKey {
        let key = SigningKey::generate(Curve::P256, &mut StdRng::seed_from_u64(seed)).unwrap();
        CoseKey::from(&key.verifying_key())
    }

    #[test]
    fn nfc_handover_encoding() {
        let static_handover = NfcHandover::new(vec![0x91, 0x02], None);
        let value = cbor::into_value(&static_handover).unwrap();
        assert_eq!(
            value,
            Value::Array(vec![Value::Bytes(vec![0x91, 0x02]), Value::Null])
        );
        assert!(static_handover.is_static());

        let negotiated = NfcHandover::new(vec![0x91], Some(vec![0xd1]));
        let bytes = cbor::to_vec(&Handover::Nfc(negotiated.clone())).unwrap();
        let decoded: Handover = cbor::from_slice(&bytes).unwrap();
        assert_eq!(decoded, Handover::Nfc(negotiated));
    }

    #[test]
    fn transcript_is_a_three_element_array() {
        let engagement = DeviceEngagement::builder(key(1)).build().unwrap();
        let transcript = SessionTranscript::new(
            Tag24::new(engagement).unwrap(),
            Tag24::new(key(2)).unwrap(),
            Handover::Qr,
        );
        let Value::Array(items) = cbor::into_value(&transcript).unwrap() else {
            panic!("transcript is not an array")
        };
        assert_eq!(items.len(), 3);
        assert!(matches!(&items[0], Value::Tag(24, _)));
        assert!(matches!(&items[1], Value::Tag(24, _)));
        assert_eq!(items[2], Value::Null);

        let tagged = transcript.to_tagged_bytes().unwrap();
        assert_eq!(&tagged[..2], &[0xd8, 0x18]);
    }
}
