//! Property tests for the frame codec.

use proptest::prelude::*;
use telemetry_wire::{encode_frame_into, split_frames};

proptest! {
    /// Any list of payloads survives encode → split unchanged.
    #[test]
    fn prop_frame_list_roundtrip(payloads in prop::collection::vec(
        prop::collection::vec(any::<u8>(), 0..512),
        0..32,
    )) {
        let mut message = Vec::new();
        for payload in &payloads {
            encode_frame_into(&mut message, payload).unwrap();
        }

        let frames = split_frames(&message).unwrap();
        prop_assert_eq!(frames.len(), payloads.len());
        for (frame, payload) in frames.iter().zip(&payloads) {
            prop_assert_eq!(*frame, payload.as_slice());
        }
    }

    /// Truncating a non-empty message anywhere inside the last frame makes the
    /// decoder reject it rather than return partial frames.
    #[test]
    fn prop_truncation_never_yields_partial_tail(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..64), 1..8),
        cut in 1usize..32,
    ) {
        let mut message = Vec::new();
        for payload in &payloads {
            encode_frame_into(&mut message, payload).unwrap();
        }

        let last_len = payloads.last().unwrap().len() + 4;
        let cut = cut.min(last_len - 1).min(message.len() - 1);
        let truncated = &message[..message.len() - cut];

        prop_assert!(split_frames(truncated).is_err());
    }
}
