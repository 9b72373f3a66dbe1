//! Telemetry Wire Format
//!
//! The shared vocabulary of the CNC telemetry pipeline: the
//! [`SensorRecord`] data model and the length-prefixed JSON frame codec
//! used identically on the edge (framing records into the buffer tiers and
//! publish batches) and in the ingest service (splitting broker deliveries
//! back into records).
//!
//! Framing is deliberately unforgiving: a transport message either decodes
//! completely or is rejected as a whole, so poison messages terminate instead
//! of looping through redelivery.

mod frame;
mod record;

pub use frame::{
    decode_message, encode_frame, encode_frame_into, encode_record, split_frames, FrameError,
    WireError, HEADER_LEN,
};
pub use record::{Machine, RecordError, SensorRecord};
