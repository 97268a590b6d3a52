//! Frame header layout and the encode/decode pair
//!
//! Encoding is a pure function: header, payload, then zero padding so the
//! framed length is a multiple of four. Decoding validates the magic, the
//! command, and the channel id, and clamps a declared length that exceeds the
//! physical buffer rather than trusting the wire value.

use tracing::warn;

use crate::error::FrameError;
use crate::{ChannelId, Command, HEADER_LEN, MAGIC, MAX_PAYLOAD};

/// Decoded fixed header of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Magic marker, [`MAGIC`] on every valid frame
    pub magic: u16,
    /// Reserved signal byte, zero on send
    pub signal: u8,
    /// Frame command
    pub command: Command,
    /// Number of trailing zero-padding bytes (0..=3)
    pub pad: u8,
    /// Target channel
    pub channel: ChannelId,
    /// Payload length, excluding header and padding
    pub len: u16,
}

/// One decoded frame: header plus the payload with padding stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The decoded header
    pub header: FrameHeader,
    /// Payload bytes, header and padding removed
    pub payload: Vec<u8>,
}

/// Padding needed so `len` bytes of payload end on a four-byte boundary.
fn pad_for(len: usize) -> usize {
    (4 - len % 4) % 4
}

/// Frame a payload for the wire.
///
/// Returns the full framed buffer: header, payload, zero padding. Control
/// frames use an empty payload.
pub fn encode(channel: ChannelId, command: Command, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge(payload.len()));
    }

    let pad = pad_for(payload.len());
    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len() + pad);
    buf.extend_from_slice(&MAGIC.to_le_bytes());
    buf.push(0); // signal, reserved
    buf.push(command.to_wire());
    buf.push(pad as u8);
    buf.push(channel.as_u8());
    buf.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    buf.extend_from_slice(payload);
    buf.resize(buf.len() + pad, 0);
    Ok(buf)
}

/// Unframe a received buffer.
///
/// The declared payload length is clamped to the bytes physically present
/// after the header; a mismatch is logged but not fatal, since the peer's
/// length field cannot be trusted unconditionally.
pub fn decode(buf: &[u8]) -> Result<Frame, FrameError> {
    if buf.len() < HEADER_LEN {
        return Err(FrameError::Truncated {
            need: HEADER_LEN,
            have: buf.len(),
        });
    }

    let magic = u16::from_le_bytes([buf[0], buf[1]]);
    if magic != MAGIC {
        return Err(FrameError::BadMagic(magic));
    }

    let signal = buf[2];
    let command = Command::from_wire(buf[3])?;
    let pad = buf[4];
    let channel = ChannelId::from_wire(buf[5])?;
    let mut len = u16::from_le_bytes([buf[6], buf[7]]) as usize;

    let capacity = buf.len() - HEADER_LEN;
    if len > capacity {
        warn!(
            "frame larger than buffer? ({} > {}), clamping",
            len, capacity
        );
        len = capacity;
    }

    Ok(Frame {
        header: FrameHeader {
            magic,
            signal,
            command,
            pad,
            channel,
            len: len as u16,
        },
        payload: buf[HEADER_LEN..HEADER_LEN + len].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn encode_layout_matches_wire_format() {
        let wire = encode(ChannelId(3), Command::Data, b"abc").unwrap();

        assert_eq!(&wire[0..2], &MAGIC.to_le_bytes());
        assert_eq!(wire[2], 0, "signal reserved");
        assert_eq!(wire[3], 0, "DATA command");
        assert_eq!(wire[4], 1, "pad for 3-byte payload");
        assert_eq!(wire[5], 3, "channel");
        assert_eq!(&wire[6..8], &3u16.to_le_bytes());
        assert_eq!(&wire[8..11], b"abc");
        assert_eq!(wire[11], 0, "padding is zeroed");
        assert_eq!(wire.len(), 12);
    }

    #[test]
    fn control_frame_is_header_only() {
        let wire = encode(ChannelId(0), Command::Open, &[]).unwrap();
        assert_eq!(wire.len(), HEADER_LEN);

        let frame = decode(&wire).unwrap();
        assert_eq!(frame.header.command, Command::Open);
        assert_eq!(frame.header.pad, 0);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn pad_counts_per_length() {
        for (len, pad) in [(0usize, 0usize), (1, 3), (2, 2), (3, 1), (4, 0), (5, 3)] {
            assert_eq!(pad_for(len), pad, "len {}", len);
        }
    }

    #[test]
    fn oversized_payload_rejected() {
        let payload = vec![0u8; MAX_PAYLOAD + 1];
        assert!(matches!(
            encode(ChannelId(0), Command::Data, &payload),
            Err(FrameError::PayloadTooLarge(_))
        ));
    }

    #[test]
    fn bad_magic_rejected() {
        let mut wire = encode(ChannelId(0), Command::Data, b"xy").unwrap();
        wire[0] = 0xde;
        wire[1] = 0xad;
        assert!(matches!(decode(&wire), Err(FrameError::BadMagic(0xadde))));
    }

    #[test]
    fn out_of_range_channel_rejected() {
        let mut wire = encode(ChannelId(0), Command::Data, b"xy").unwrap();
        wire[5] = crate::NUM_CHANNELS;
        assert!(matches!(
            decode(&wire),
            Err(FrameError::UnknownChannel(_))
        ));
    }

    #[test]
    fn short_buffer_rejected() {
        assert!(matches!(
            decode(&[0x33, 0xfc, 0, 0]),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn oversized_declared_length_is_clamped() {
        let mut wire = encode(ChannelId(1), Command::Data, b"abcd").unwrap();
        // Lie about the payload length: declare far more than is present.
        wire[6..8].copy_from_slice(&4096u16.to_le_bytes());

        let frame = decode(&wire).unwrap();
        assert_eq!(frame.header.len as usize, wire.len() - HEADER_LEN);
        assert_eq!(&frame.payload[..4], b"abcd");
    }

    proptest! {
        #[test]
        fn round_trip_recovers_payload(
            payload in prop::collection::vec(any::<u8>(), 0..MAX_PAYLOAD),
            ch in 0u8..crate::NUM_CHANNELS,
        ) {
            let wire = encode(ChannelId(ch), Command::Data, &payload).unwrap();

            prop_assert_eq!(wire.len() % 4, 0, "framed length word-aligned");
            prop_assert_eq!(wire.len(), HEADER_LEN + payload.len() + pad_for(payload.len()));

            let frame = decode(&wire).unwrap();
            prop_assert_eq!(frame.header.channel, ChannelId(ch));
            prop_assert_eq!(frame.header.command, Command::Data);
            prop_assert_eq!(frame.payload, payload);
        }

        #[test]
        fn decode_never_panics(buf in prop::collection::vec(any::<u8>(), 0..64)) {
            let _ = decode(&buf);
        }
    }
}
