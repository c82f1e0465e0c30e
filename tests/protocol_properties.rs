//! Property tests for the frame codec and the transmit ring.

use proptest::prelude::*;

use debug_tool::cspi::SpscRing;
use debug_tool::protocol::{crc16, encode, Frame, FrameDecoder, MAX_PAYLOAD};

fn decode_all(bytes: &[u8]) -> Vec<Frame> {
    let mut decoder = FrameDecoder::new();
    bytes.iter().filter_map(|&b| decoder.push(b)).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn encoded_frames_decode_unchanged(msg_id in any::<u8>(), payload in prop::collection::vec(any::<u8>(), 0..=MAX_PAYLOAD)) {
        let bytes = encode(msg_id, &payload).unwrap();
        prop_assert_eq!(bytes.len(), payload.len() + 7);

        let frames = decode_all(&bytes);
        prop_assert_eq!(frames.len(), 1);
        prop_assert_eq!(frames[0].msg_id, msg_id);
        prop_assert_eq!(&frames[0].payload[..], &payload[..]);
    }

    #[test]
    fn crc_trailer_covers_id_length_and_payload(msg_id in any::<u8>(), payload in prop::collection::vec(any::<u8>(), 0..64)) {
        let bytes = encode(msg_id, &payload).unwrap();
        let n = bytes.len();
        let trailer = u16::from_be_bytes([bytes[n - 2], bytes[n - 1]]);
        prop_assert_eq!(trailer, crc16(&bytes[2..n - 2]));
    }

    #[test]
    fn leading_noise_is_skipped(
        noise in prop::collection::vec(any::<u8>().prop_filter("no SOF", |b| *b != 0xAA), 0..64),
        msg_id in any::<u8>(),
        payload in prop::collection::vec(any::<u8>(), 0..32),
    ) {
        let mut stream = noise;
        stream.extend_from_slice(&encode(msg_id, &payload).unwrap());

        let frames = decode_all(&stream);
        prop_assert_eq!(frames.len(), 1);
        prop_assert_eq!(frames[0].msg_id, msg_id);
    }

    #[test]
    fn single_bit_errors_are_rejected(
        payload in prop::collection::vec(any::<u8>(), 1..32),
        index in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let mut bytes = encode(0x10, &payload).unwrap();
        // Corrupt the payload or CRC, never the header
        let i = 5 + index.index(bytes.len() - 5);
        bytes[i] ^= 1 << bit;
        prop_assert!(decode_all(&bytes).is_empty());
    }

    #[test]
    fn ring_never_loses_or_invents_bytes(chunks in prop::collection::vec((prop::collection::vec(any::<u8>(), 0..300), 0usize..300), 1..40)) {
        let ring: SpscRing<512> = SpscRing::new();
        let (mut producer, mut consumer) = ring.try_split().unwrap();
        let mut sent = Vec::new();
        let mut received = Vec::new();

        for (data, pops) in chunks {
            let accepted = producer.push(&data);
            prop_assert!(accepted <= data.len());
            sent.extend_from_slice(&data[..accepted]);
            prop_assert_eq!(producer.used() + producer.free(), ring.size() - 1);

            for _ in 0..pops {
                match consumer.pop() {
                    Some(b) => received.push(b),
                    None => break,
                }
            }
            prop_assert_eq!(producer.used() + producer.free(), ring.size() - 1);
        }

        while let Some(b) = consumer.pop() {
            received.push(b);
        }
        prop_assert_eq!(received, sent);
    }
}

#[test]
fn stored_image_round_trips_through_flash_layout() {
    let payload = [1, 0, 0];
    let mut image = [0xFFu8; 600];
    let bytes = encode(0x91, &payload).unwrap();
    image[..bytes.len()].copy_from_slice(&bytes);

    let frame = Frame::from_stored(&image).unwrap();
    assert_eq!(frame.msg_id, 0x91);
    assert_eq!(&frame.payload[..], &payload);
}
