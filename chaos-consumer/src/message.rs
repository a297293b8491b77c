use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Record value written by the load generator. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestMessage {
    pub sequence_number: i64,
    pub producer_id: String,
    #[serde(with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
    pub partition: i32,
    #[serde(default, with = "base64_bytes")]
    pub payload: Vec<u8>,
}

/// A delivered record: transport metadata from the broker client plus the decoded value.
/// `value` is `None` when the payload was absent or could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub value: Option<TestMessage>,
}

impl InboundRecord {
    pub fn decode(topic: &str, partition: i32, offset: i64, payload: Option<&[u8]>) -> Self {
        let value = payload.and_then(|bytes| match serde_json::from_slice(bytes) {
            Ok(message) => Some(message),
            Err(e) => {
                debug!(partition, offset, error = %e, "Record value is not a valid test message");
                None
            }
        });

        Self {
            topic: topic.to_string(),
            partition,
            offset,
            value,
        }
    }
}

/// `yyyy-MM-ddTHH:mm:ss.SSSZ` on the way out, any RFC 3339 instant on the way in.
mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        DateTime::<Utc>::deserialize(deserializer)
    }
}

/// Binary payloads travel as standard base64 strings; `null` decodes to empty.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD.decode(encoded).map_err(D::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}
