//! Payload classification heuristic
//!
//! The remote side can speak several downstream framings over the same
//! channel: raw IPv4, raw IPv6, or an encapsulated multiplexed format with
//! its own header. The only discriminator available is the leading nibble of
//! the payload, which for raw IP packets is the IP version. This is a
//! heuristic carried over from the peer protocol, not a guarantee; payloads
//! that are neither are classified as the multiplexed format.

/// Downstream framing of a data payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Leading nibble 0x4: raw IPv4 packet
    Ipv4,
    /// Leading nibble 0x6: raw IPv6 packet
    Ipv6,
    /// Anything else: encapsulated multiplexed format
    Mux,
}

/// Classify a payload by its leading nibble.
pub fn classify(payload: &[u8]) -> PayloadKind {
    match payload.first().map(|b| b & 0xf0) {
        Some(0x40) => PayloadKind::Ipv4,
        Some(0x60) => PayloadKind::Ipv6,
        _ => PayloadKind::Mux,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv4_header_detected() {
        // Version 4, IHL 5
        assert_eq!(classify(&[0x45, 0x00, 0x00, 0x1c]), PayloadKind::Ipv4);
    }

    #[test]
    fn ipv6_header_detected() {
        assert_eq!(classify(&[0x60, 0x00, 0x00, 0x00]), PayloadKind::Ipv6);
    }

    #[test]
    fn other_leading_nibbles_are_mux() {
        for first in [0x00u8, 0x10, 0x30, 0x50, 0x70, 0xf0] {
            assert_eq!(classify(&[first, 0xaa]), PayloadKind::Mux, "{first:#x}");
        }
    }

    #[test]
    fn empty_payload_is_mux() {
        assert_eq!(classify(&[]), PayloadKind::Mux);
    }
}
