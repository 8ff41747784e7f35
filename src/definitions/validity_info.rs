use ciborium::Value;
use serde::{Deserialize, Serialize};
use time::{format_description::well_known::Rfc3339, OffsetDateTime, UtcOffset};

use crate::cbor::text_keyed_map;

/// Validity window of a mobile security object.
///
/// Every timestamp is whole seconds in UTC; fractional seconds are refused both
/// when constructing and when decoding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct ValidityInfo {
    signed: Timestamp,
    valid_from: Timestamp,
    valid_until: Timestamp,
    expected_update: Option<Timestamp>,
}

/// A timestamp together with its RFC 3339 text, formatted once up front.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Timestamp {
    at: OffsetDateTime,
    text: String,
}

impl Timestamp {
    fn new(name: &'static str, at: OffsetDateTime) -> Result<Self> {
        if at.nanosecond() != 0 {
            return Err(Error::SubSecondPrecision(name));
        }
        let at = at.to_offset(UtcOffset::UTC);
        let text = at
            .format(&Rfc3339)
            .map_err(|source| Error::UnableToFormatDate { field: name, source })?;
        Ok(Self { at, text })
    }

    fn to_cbor(&self) -> Value {
        Value::Tag(0, Box::new(Value::Text(self.text.clone())))
    }
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("When parsing a CBOR map, could not find required field: '{0}'")]
    MissingField(&'static str),
    #[error("Expected to parse a CBOR map: {0}")]
    NotAMap(crate::cbor::CborError),
    #[error("Expected to parse a CBOR text string, received: '{0:?}'")]
    NotATextString(Box<Value>),
    #[error("Expected to parse a CBOR tag (number {0}), received: '{1:?}'")]
    NotATag(u64, Value),
    #[error("Failed to parse date string as rfc3339 date: {0}")]
    UnableToParseDate(#[from] time::error::Parse),
    #[error("Failed to format '{field}' as rfc3339: {source}")]
    UnableToFormatDate {
        field: &'static str,
        source: time::error::Format,
    },
    #[error("'{0}' carries fractional seconds")]
    SubSecondPrecision(&'static str),
    #[error("validUntil is earlier than validFrom")]
    EmptyWindow,
}

impl ValidityInfo {
    pub fn new(
        signed: OffsetDateTime,
        valid_from: OffsetDateTime,
        valid_until: OffsetDateTime,
        expected_update: Option<OffsetDateTime>,
    ) -> Result<Self> {
        let signed = Timestamp::new("signed", signed)?;
        let valid_from = Timestamp::new("validFrom", valid_from)?;
        let valid_until = Timestamp::new("validUntil", valid_until)?;
        if valid_until.at < valid_from.at {
            return Err(Error::EmptyWindow);
        }
        Ok(Self {
            signed,
            valid_from,
            valid_until,
            expected_update: expected_update
                .map(|t| Timestamp::new("expectedUpdate", t))
                .transpose()?,
        })
    }

    pub fn signed(&self) -> OffsetDateTime {
        self.signed.at
    }

    pub fn valid_from(&self) -> OffsetDateTime {
        self.valid_from.at
    }

    pub fn valid_until(&self) -> OffsetDateTime {
        self.valid_until.at
    }

    pub fn expected_update(&self) -> Option<OffsetDateTime> {
        self.expected_update.as_ref().map(|t| t.at)
    }

    /// Whether `at` falls within `validFrom..=validUntil`.
    pub fn is_valid_at(&self, at: OffsetDateTime) -> bool {
        self.valid_from.at <= at && at <= self.valid_until.at
    }
}

fn cbor_to_datetime(v: Value) -> Result<OffsetDateTime> {
    if let Value::Tag(0, inner) = v {
        if let Value::Text(date_str) = inner.as_ref() {
            Ok(OffsetDateTime::parse(date_str, &Rfc3339)?)
        } else {
            Err(Error::NotATextString(inner))
        }
    } else {
        Err(Error::NotATag(0, v))
    }
}

impl From<ValidityInfo> for Value {
    fn from(v: ValidityInfo) -> Value {
        let mut entries = vec![
            (Value::Text("signed".into()), v.signed.to_cbor()),
            (Value::Text("validFrom".into()), v.valid_from.to_cbor()),
            (Value::Text("validUntil".into()), v.valid_until.to_cbor()),
        ];
        if let Some(expected_update) = &v.expected_update {
            entries.push((Value::Text("expectedUpdate".into()), expected_update.to_cbor()));
        }
        Value::Map(entries)
    }
}

impl TryFrom<Value> for ValidityInfo {
    type Error = Error;

    fn try_from(v: Value) -> Result<ValidityInfo> {
        let mut map = text_keyed_map(v).map_err(Error::NotAMap)?;
        let mut required = |key: &'static str| {
            map.remove(key)
                .ok_or(Error::MissingField(key))
                .and_then(cbor_to_datetime)
        };
        let signed = required("signed")?;
        let valid_from = required("validFrom")?;
        let valid_until = required("validUntil")?;
        let expected_update = map
            .remove("expectedUpdate")
            .map(cbor_to_datetime)
            .transpose()?;
        ValidityInfo::new(signed, valid_from, valid_until, expected_update)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cbor;
    use time::macros::datetime;

    fn window() -> ValidityInfo {
        ValidityInfo::new(
            datetime!(2024-01-01 0:00 UTC),
            datetime!(2024-01-01 0:00 UTC),
            datetime!(2025-01-01 0:00 UTC),
            None,
        )
        .unwrap()
    }

    #[test]
    fn encodes_tagged_rfc3339() {
        let bytes = cbor::to_vec(&window()).unwrap();
        let value: Value = cbor::from_slice(&bytes).unwrap();
        let map = text_keyed_map(value).unwrap();
        assert_eq!(
            map["validUntil"],
            Value::Tag(0, Box::new(Value::Text("2025-01-01T00:00:00Z".into())))
        );
        assert!(!map.contains_key("expectedUpdate"));
        let decoded: ValidityInfo = cbor::from_slice(&bytes).unwrap();
        assert_eq!(decoded, window());
    }

    #[test]
    fn fractional_seconds_are_refused() {
        let result = ValidityInfo::new(
            datetime!(2024-01-01 0:00:00.5 UTC),
            datetime!(2024-01-01 0:00 UTC),
            datetime!(2025-01-01 0:00 UTC),
            None,
        );
        assert!(matches!(result, Err(Error::SubSecondPrecision("signed"))));

        let tdate = |s: &str| Value::Tag(0, Box::new(Value::Text(s.into())));
        let value = Value::Map(vec![
            (Value::Text("signed".into()), tdate("2024-01-01T00:00:00Z")),
            (Value::Text("validFrom".into()), tdate("2024-01-01T00:00:00.250Z")),
            (Value::Text("validUntil".into()), tdate("2025-01-01T00:00:00Z")),
        ]);
        assert!(matches!(
            ValidityInfo::try_from(value),
            Err(Error::SubSecondPrecision("validFrom"))
        ));
    }

    #[test]
    fn window_checks() {
        let info = window();
        assert!(info.is_valid_at(datetime!(2024-06-01 12:00 UTC)));
        assert!(!info.is_valid_at(datetime!(2025-06-01 12:00 UTC)));
        assert!(matches!(
            ValidityInfo::new(
                datetime!(2024-01-01 0:00 UTC),
                datetime!(2025-01-01 0:00 UTC),
                datetime!(2024-01-01 0:00 UTC),
                None,
            ),
            Err(Error::EmptyWindow)
        ));
    }

    #[test]
    fn years_before_zero_are_refused() {
        let before_year_zero = time::Date::from_calendar_date(-1, time::Month::January, 1)
            .unwrap()
            .midnight()
            .assume_utc();
        let result = ValidityInfo::new(
            before_year_zero,
            datetime!(2024-01-01 0:00 UTC),
            datetime!(2025-01-01 0:00 UTC),
            None,
        );
        assert!(matches!(
            result,
            Err(Error::UnableToFormatDate { field: "signed", .. })
        ));
    }

    #[test]
    fn expected_update_is_encoded() {
        let info = ValidityInfo::new(
            datetime!(2024-01-01 0:00 UTC),
            datetime!(2024-01-01 0:00 UTC),
            datetime!(2025-01-01 0:00 UTC),
            Some(datetime!(2024-07-01 12:30 +02:00)),
        )
        .unwrap();
        let map = text_keyed_map(Value::from(info.clone())).unwrap();
        assert_eq!(map.len(), 4);
        assert_eq!(
            map["expectedUpdate"],
            Value::Tag(0, Box::new(Value::Text("2024-07-01T10:30:00Z".into())))
        );
        assert_eq!(ValidityInfo::try_from(Value::from(info.clone())).unwrap(), info);
    }

    #[test]
    fn missing_field() {
        let value = Value::Map(vec![]);
        assert!(matches!(
            ValidityInfo::try_from(value),
            Err(Error::MissingField("signed"))
        ));
    }
}
