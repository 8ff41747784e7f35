use ciborium::Value;
use serde::{Deserialize, Serialize};

use super::Error;
use crate::cbor::{int_keyed_map, text_keyed_map, uint};

const CATEGORY_DELIVERY: u64 = 1;
const TYPE_DOMAIN: u64 = 1;

/// Where an engagement was delivered from, as carried under key 5.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "Value", into = "Value")]
pub enum OriginInfo {
    /// `{0: 1, 1: 1, 2: {"domain": url}}`
    Domain { url: String },
}

impl TryFrom<Value> for OriginInfo {
    type Error = Error;

    fn try_from(v: Value) -> Result<Self, Error> {
        let mut map = int_keyed_map(v).map_err(|_| Error::InvalidOriginInfo("not a map"))?;
        let category = map.get(&0).and_then(uint);
        let kind = map.get(&1).and_then(uint);
        match (category, kind) {
            (Some(CATEGORY_DELIVERY), Some(TYPE_DOMAIN)) => {
                let details = map
                    .remove(&2)
                    .ok_or(Error::InvalidOriginInfo("missing details"))?;
                let mut details = text_keyed_map(details)
                    .map_err(|_| Error::InvalidOriginInfo("details is not a text map"))?;
                match details.remove("domain") {
                    Some(Value::Text(url)) => Ok(OriginInfo::Domain { url }),
                    _ => Err(Error::InvalidOriginInfo("missing domain")),
                }
            }
            _ => Err(Error::InvalidOriginInfo("unknown category or type")),
        }
    }
}

impl From<OriginInfo> for Value {
    fn from(info: OriginInfo) -> Value {
        match info {
            OriginInfo::Domain { url } => Value::Map(vec![
                (0.into(), CATEGORY_DELIVERY.into()),
                (1.into(), TYPE_DOMAIN.into()),
                (
                    2.into(),
                    Value::Map(vec![(Value::Text("domain".into()), Value::Text(url))]),
                ),
            ]),
        }
    }
}
