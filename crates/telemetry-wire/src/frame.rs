//! Length-prefixed frame codec.
//!
//! Wire format, identical in both directions (edge → broker, broker → ingest):
//!
//! ```text
//! frame   := u32_be(length) || length bytes of UTF-8 JSON
//! message := one or more frames concatenated
//! ```
//!
//! The decoder is strict: declared lengths must sum to the remaining payload
//! exactly. Any mismatch — a short header, a short payload, undecodable JSON —
//! poisons the *whole* transport message. Malformed input is terminated, never
//! retried, which is what keeps poison messages from looping through broker
//! redelivery forever.

use crate::record::{RecordError, SensorRecord};
use thiserror::Error;

/// Size of the big-endian length prefix.
pub const HEADER_LEN: usize = 4;

/// Framing-level errors. All terminal for the carrying transport message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Fewer than [`HEADER_LEN`] bytes remained where a frame header was expected.
    #[error("short frame header: {remaining} trailing bytes")]
    ShortHeader { remaining: usize },
    /// The header declared more payload than the message still holds.
    #[error("short frame payload: declared {declared} bytes, {remaining} remain")]
    ShortPayload { declared: usize, remaining: usize },
    /// Payload too large to express in a u32 length prefix.
    #[error("payload of {len} bytes exceeds the u32 frame length limit")]
    Oversize { len: usize },
}

/// Decode-level errors: framing, JSON, or semantic validation.
///
/// Frame indexes are zero-based within the transport message, for log lines
/// that point at the offending frame.
#[derive(Debug, Error)]
pub enum WireError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("frame {index}: invalid JSON payload: {source}")]
    Json {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("frame {index}: {source}")]
    Record {
        index: usize,
        #[source]
        source: RecordError,
    },
}

/// Appends one frame (header + payload) to `buf`.
pub fn encode_frame_into(buf: &mut Vec<u8>, payload: &[u8]) -> Result<(), FrameError> {
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::Oversize {
        len: payload.len(),
    })?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(())
}

/// Encodes one payload as a standalone frame.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    encode_frame_into(&mut buf, payload)?;
    Ok(buf)
}

/// Serializes a record to JSON and wraps it in a frame.
pub fn encode_record(record: &SensorRecord) -> Result<Vec<u8>, serde_json::Error> {
    let payload = serde_json::to_vec(record)?;
    // A JSON-serialized record is always far below the u32 length limit.
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Splits a transport message into its frame payloads.
///
/// Returns the payload slices in order, or the framing error that poisons the
/// message. An empty message yields an empty list.
pub fn split_frames(message: &[u8]) -> Result<Vec<&[u8]>, FrameError> {
    let mut frames = Vec::new();
    let mut offset = 0;

    while offset < message.len() {
        let remaining = message.len() - offset;
        if remaining < HEADER_LEN {
            return Err(FrameError::ShortHeader { remaining });
        }

        let declared = u32::from_be_bytes([
            message[offset],
            message[offset + 1],
            message[offset + 2],
            message[offset + 3],
        ]) as usize;
        offset += HEADER_LEN;

        if message.len() - offset < declared {
            return Err(FrameError::ShortPayload {
                declared,
                remaining: message.len() - offset,
            });
        }

        frames.push(&message[offset..offset + declared]);
        offset += declared;
    }

    Ok(frames)
}

/// Decodes a transport message into validated records.
///
/// All-or-nothing: the first framing, JSON, or validation failure aborts the
/// whole message so the caller can terminate it atomically.
pub fn decode_message(message: &[u8]) -> Result<Vec<SensorRecord>, WireError> {
    let frames = split_frames(message)?;
    let mut records = Vec::with_capacity(frames.len());

    for (index, payload) in frames.iter().enumerate() {
        let record: SensorRecord = serde_json::from_slice(payload)
            .map_err(|source| WireError::Json { index, source })?;
        record
            .validate()
            .map_err(|source| WireError::Record { index, source })?;
        records.push(record);
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::sample_record;

    #[test]
    fn test_encode_then_split_roundtrip() {
        let mut message = Vec::new();
        encode_frame_into(&mut message, b"alpha").unwrap();
        encode_frame_into(&mut message, b"").unwrap();
        encode_frame_into(&mut message, b"beta").unwrap();

        let frames = split_frames(&message).unwrap();
        assert_eq!(frames, vec![&b"alpha"[..], &b""[..], &b"beta"[..]]);
    }

    #[test]
    fn test_short_header_terminates() {
        let mut message = encode_frame(b"ok").unwrap();
        message.extend_from_slice(&[0, 0, 1]); // three stray bytes

        assert_eq!(
            split_frames(&message),
            Err(FrameError::ShortHeader { remaining: 3 })
        );
    }

    #[test]
    fn test_short_payload_terminates() {
        // Header declares 10 bytes but only 4 follow.
        let mut message = 10u32.to_be_bytes().to_vec();
        message.extend_from_slice(b"four");

        assert_eq!(
            split_frames(&message),
            Err(FrameError::ShortPayload {
                declared: 10,
                remaining: 4
            })
        );
    }

    #[test]
    fn test_decode_message_roundtrip() {
        let records = vec![sample_record("M1", 1), sample_record("M1", 2)];
        let mut message = Vec::new();
        for record in &records {
            message.extend_from_slice(&encode_record(record).unwrap());
        }

        let decoded = decode_message(&message).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn test_decode_rejects_truncated_json() {
        let good = encode_record(&sample_record("M1", 1)).unwrap();
        let payload = serde_json::to_vec(&sample_record("M1", 2)).unwrap();
        let truncated = &payload[..payload.len() / 2];

        let mut message = good;
        message.extend_from_slice(&encode_frame(truncated).unwrap());

        assert!(matches!(
            decode_message(&message),
            Err(WireError::Json { index: 1, .. })
        ));
    }

    #[test]
    fn test_decode_rejects_semantic_violations() {
        let message = encode_record(&sample_record("M1", 0)).unwrap();
        assert!(matches!(
            decode_message(&message),
            Err(WireError::Record { index: 0, .. })
        ));
    }

    #[test]
    fn test_empty_message_decodes_to_no_records() {
        assert!(decode_message(&[]).unwrap().is_empty());
    }
}
