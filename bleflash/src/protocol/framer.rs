//! Packet framing for the BLE write characteristic.
//!
//! A command is split into packets that fit one transport write. Every packet
//! starts with a continuation flag:
//!
//! ```text
//! +------+------------------------+
//! | FLAG |  PAYLOAD (<= 240 bytes) |
//! +------+------------------------+
//! | 1    |  1..=240               |
//! +------+------------------------+
//! ```
//!
//! `FLAG` is [`MORE_FOLLOWS`] while more than 240 command bytes remain before
//! the packet is sent and [`LAST_PACKET`] otherwise.

use std::iter::FusedIterator;

/// Maximum command bytes carried by one packet.
pub const MAX_PACKET_PAYLOAD: usize = 240;

/// Flag value: more packets of this command follow.
pub const MORE_FOLLOWS: u8 = 1;

/// Flag value: this packet ends the command.
pub const LAST_PACKET: u8 = 0;

/// One transport write unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    bytes: Vec<u8>,
}

impl Packet {
    fn new(flag: u8, payload: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(1 + payload.len());
        bytes.push(flag);
        bytes.extend_from_slice(payload);
        Self { bytes }
    }

    /// Continuation flag byte.
    pub fn flag(&self) -> u8 {
        self.bytes[0]
    }

    /// Whether more packets of the same command follow.
    pub fn has_more(&self) -> bool {
        self.flag() == MORE_FOLLOWS
    }

    /// Command bytes carried by this packet.
    pub fn payload(&self) -> &[u8] {
        &self.bytes[1..]
    }

    /// Complete packet as written to the transport.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Lazy packet sequence over one command, created by [`fragment`].
#[derive(Debug)]
pub struct Fragments<'a> {
    remaining: &'a [u8],
}

impl Iterator for Fragments<'_> {
    type Item = Packet;

    fn next(&mut self) -> Option<Packet> {
        if self
            .remaining
            .is_empty()
        {
            return None;
        }

        let flag = if self
            .remaining
            .len()
            <= MAX_PACKET_PAYLOAD
        {
            LAST_PACKET
        } else {
            MORE_FOLLOWS
        };
        let take = self
            .remaining
            .len()
            .min(MAX_PACKET_PAYLOAD);
        let (payload, rest) = self
            .remaining
            .split_at(take);
        self.remaining = rest;

        Some(Packet::new(flag, payload))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self
            .remaining
            .len()
            .div_ceil(MAX_PACKET_PAYLOAD);
        (n, Some(n))
    }
}

impl ExactSizeIterator for Fragments<'_> {}
impl FusedIterator for Fragments<'_> {}

/// Split `command` into transport packets.
///
/// An empty command yields no packets.
pub fn fragment(command: &[u8]) -> Fragments<'_> {
    Fragments { remaining: command }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(clippy::cast_possible_truncation)]
    fn command_of(len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| (i * 7) as u8)
            .collect()
    }

    #[test]
    fn test_five_hundred_bytes_make_three_packets() {
        let packets: Vec<Packet> = fragment(&command_of(500)).collect();

        let lens: Vec<usize> = packets
            .iter()
            .map(|p| {
                p.payload()
                    .len()
            })
            .collect();
        let flags: Vec<u8> = packets
            .iter()
            .map(Packet::flag)
            .collect();

        assert_eq!(lens, vec![240, 240, 20]);
        assert_eq!(flags, vec![1, 1, 0]);
    }

    #[test]
    fn test_empty_command_has_no_packets() {
        assert_eq!(fragment(&[]).count(), 0);
    }

    #[test]
    fn test_exactly_one_payload_is_single_last_packet() {
        let packets: Vec<Packet> = fragment(&command_of(MAX_PACKET_PAYLOAD)).collect();
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].flag(), LAST_PACKET);
        assert!(!packets[0].has_more());
        assert_eq!(packets[0].as_bytes().len(), 1 + MAX_PACKET_PAYLOAD);
    }

    #[test]
    fn test_one_byte_over_payload_splits() {
        let packets: Vec<Packet> = fragment(&command_of(MAX_PACKET_PAYLOAD + 1)).collect();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].flag(), MORE_FOLLOWS);
        assert_eq!(packets[1].flag(), LAST_PACKET);
        assert_eq!(packets[1].payload().len(), 1);
    }

    #[test]
    fn test_payloads_reconstruct_command() {
        for len in [1, 239, 240, 241, 480, 481, 4096 + 4, 10_000] {
            let command = command_of(len);
            let fragments = fragment(&command);
            assert_eq!(fragments.len(), len.div_ceil(MAX_PACKET_PAYLOAD));

            let packets: Vec<Packet> = fragments.collect();
            let rebuilt: Vec<u8> = packets
                .iter()
                .flat_map(|p| {
                    p.payload()
                        .iter()
                        .copied()
                })
                .collect();
            assert_eq!(rebuilt, command, "len {len}");

            let (last, rest) = packets
                .split_last()
                .unwrap();
            assert!(rest.iter().all(Packet::has_more), "len {len}");
            assert_eq!(last.flag(), LAST_PACKET, "len {len}");
        }
    }

    #[test]
    fn test_packet_layout() {
        let packet = fragment(&[0xAA, 0xBB])
            .next()
            .unwrap();
        assert_eq!(packet.as_bytes(), &[LAST_PACKET, 0xAA, 0xBB]);
    }
}
