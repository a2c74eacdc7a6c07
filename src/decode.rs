//! Extraction of the producer-written timestamp from a record payload.
//!
//! Producers write each record as a self-describing map carrying a
//! `timestamp` entry of unix seconds. Nothing on the broker side guarantees
//! that, so the lag engine only sees this module through [`TimestampDecoder`].

use crate::error::{KlagError, Result};
use rmp::Marker;
use rmpv::Value;

pub trait TimestampDecoder: Send + Sync + 'static {
    /// Returns `Ok(None)` when the payload decodes but has no timestamp entry,
    /// and an error when it cannot be decoded or the entry has the wrong type.
    fn decode_timestamp(&self, payload: &[u8]) -> Result<Option<u64>>;
}

/// MessagePack map payloads, e.g. `{"timestamp": 1700000000, ...}`.
#[derive(Debug, Clone)]
pub struct MsgpackTimestampDecoder {
    field: String,
}

impl MsgpackTimestampDecoder {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl Default for MsgpackTimestampDecoder {
    fn default() -> Self {
        Self::new("timestamp")
    }
}

impl TimestampDecoder for MsgpackTimestampDecoder {
    fn decode_timestamp(&self, payload: &[u8]) -> Result<Option<u64>> {
        let mut reader = payload;
        let entries = rmp::decode::read_map_len(&mut reader)
            .map_err(|e| KlagError::Decode(format!("payload is not a MessagePack map: {e}")))?;

        for _ in 0..entries {
            let key = read_value(&mut reader)?;
            if key.as_str() != Some(self.field.as_str()) {
                read_value(&mut reader)?;
                continue;
            }

            // Signed markers decode to the same `Integer` as unsigned ones,
            // so the type is checked on the wire.
            let marker = reader.first().copied().map(Marker::from_u8);
            let found = read_value(&mut reader)?;

            return match (marker, &found) {
                (
                    Some(Marker::FixPos(_) | Marker::U8 | Marker::U16 | Marker::U32 | Marker::U64),
                    Value::Integer(n),
                ) => n.as_u64().map(Some).ok_or_else(|| {
                    KlagError::Decode(format!("field '{}' out of range: {}", self.field, found))
                }),
                _ => Err(KlagError::Decode(format!(
                    "field '{}' is not an unsigned integer: {}",
                    self.field, found
                ))),
            };
        }

        Ok(None)
    }
}

fn read_value(reader: &mut &[u8]) -> Result<Value> {
    rmpv::decode::read_value(reader)
        .map_err(|e| KlagError::Decode(format!("invalid MessagePack payload: {e}")))
}
