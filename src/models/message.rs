//! Test message data model and the in-band control constants

use serde::{Deserialize, Serialize};

/// Payload size of the pre-test warm-up burst
pub const INITIALIZE_SIZE: usize = 1;

/// Payload size announcing that a publisher is done
pub const FINISHED_SIZE: usize = 2;

/// Payload size announcing a data-length change in scan mode
pub const LENGTH_CHANGED_SIZE: usize = 3;

/// Smallest payload that carries measured traffic
pub const MIN_PAYLOAD_SIZE: usize = 4;

/// Per-sample wire overhead added back to every byte count and length label
pub const OVERHEAD_BYTES: usize = 28;

/// Latency marker of a sample that does not request an echo
pub const NOT_A_PING: i32 = -1;

/// Payload size of an announcement-channel acknowledgment
pub const ANNOUNCEMENT_SIZE: usize = 1;

/// A unit of measured traffic
///
/// The payload length doubles as the control signal, see
/// [`ControlSignal`](crate::classifier::ControlSignal).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestMessage {
    /// Instance key, all zeros unless a keyed test is run
    pub key: [u8; 4],

    /// Publisher (or subscriber, on the echo path) that produced the message
    pub entity_id: i32,

    /// Per-origin sequence number
    pub seq_num: u32,

    /// High 32 bits of the microsecond send time
    pub timestamp_sec: i32,

    /// Low 32 bits of the microsecond send time
    pub timestamp_usec: u32,

    /// Target subscriber of a ping, or [`NOT_A_PING`]
    pub latency_ping: i32,

    /// Raw payload bytes
    pub data: Vec<u8>,
}

impl TestMessage {
    /// Create a zero-filled message of `size` payload bytes
    pub fn new(entity_id: i32, size: usize) -> Self {
        Self {
            key: [0; 4],
            entity_id,
            seq_num: 0,
            timestamp_sec: 0,
            timestamp_usec: 0,
            latency_ping: NOT_A_PING,
            data: vec![0; size],
        }
    }

    /// Payload length in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Truncate or zero-pad the payload
    pub fn set_size(&mut self, size: usize) {
        self.data.resize(size, 0);
    }

    /// Payload plus wire overhead, the length reports are labelled with
    pub fn wire_length(&self) -> usize {
        self.size() + OVERHEAD_BYTES
    }

    /// Split a microsecond wall-clock value into the two timestamp halves
    pub fn stamp(&mut self, now_usec: u64) {
        self.timestamp_sec = (now_usec >> 32) as u32 as i32;
        self.timestamp_usec = (now_usec & 0xFFFF_FFFF) as u32;
    }

    /// Rebuild the 64-bit send time from the timestamp halves
    pub fn sent_time_usec(&self) -> u64 {
        ((self.timestamp_sec as u32 as u64) << 32) | self.timestamp_usec as u64
    }

    pub fn is_ping(&self) -> bool {
        self.latency_ping != NOT_A_PING
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_message_is_not_a_ping() {
        let msg = TestMessage::new(3, 72);
        assert_eq!(msg.size(), 72);
        assert_eq!(msg.wire_length(), 100);
        assert_eq!(msg.entity_id, 3);
        assert!(!msg.is_ping());
    }

    #[test]
    fn test_set_size_pads_and_truncates() {
        let mut msg = TestMessage::new(0, 4);
        msg.data.copy_from_slice(&[1, 2, 3, 4]);

        msg.set_size(6);
        assert_eq!(msg.data, vec![1, 2, 3, 4, 0, 0]);

        msg.set_size(FINISHED_SIZE);
        assert_eq!(msg.data, vec![1, 2]);
    }

    #[test]
    fn test_timestamp_halves() {
        let now = 0x0006_1A2B_3C4D_5E6F_u64;
        let mut msg = TestMessage::new(0, 10);
        msg.stamp(now);

        assert_eq!(msg.timestamp_sec, 0x0006_1A2B);
        assert_eq!(msg.timestamp_usec, 0x3C4D_5E6F);
        assert_eq!(msg.sent_time_usec(), now);
    }

    #[test]
    fn test_sentinels_are_below_real_payloads() {
        assert!(INITIALIZE_SIZE < MIN_PAYLOAD_SIZE);
        assert!(FINISHED_SIZE < MIN_PAYLOAD_SIZE);
        assert!(LENGTH_CHANGED_SIZE < MIN_PAYLOAD_SIZE);
    }
}
