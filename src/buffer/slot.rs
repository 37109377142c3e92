use std::fmt;

use super::kind::SlotKey;
use crate::protocol::MAX_PACKET_SIZE;

/// One fixed-size packet cell, reused for the lifetime of the buffer.
#[derive(Clone)]
pub struct PacketSlot {
    data: [u8; MAX_PACKET_SIZE],
    size: usize,
    arrival_us: u64,
    key: SlotKey,
    valid: bool,
}

impl PacketSlot {
    pub fn empty() -> Self {
        Self {
            data: [0; MAX_PACKET_SIZE],
            size: 0,
            arrival_us: 0,
            key: SlotKey::default(),
            valid: false,
        }
    }

    /// Packet bytes, zero-padded to the stream's packet size.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.size]
    }

    pub fn arrival_us(&self) -> u64 {
        self.arrival_us
    }

    pub fn sequence_num(&self) -> u16 {
        self.key.sequence_num
    }

    pub fn frame_num(&self) -> u16 {
        self.key.frame_num
    }

    pub fn line_num(&self) -> u16 {
        self.key.line_num
    }

    pub fn key(&self) -> &SlotKey {
        &self.key
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub(crate) fn fill(&mut self, data: &[u8], packet_size: usize, key: SlotKey, arrival_us: u64) {
        let copy_len = data.len().min(packet_size);
        self.data[..copy_len].copy_from_slice(&data[..copy_len]);
        self.data[copy_len..packet_size].fill(0);
        self.size = packet_size;
        self.arrival_us = arrival_us;
        self.key = key;
        self.valid = true;
    }

    pub(crate) fn set_arrival_us(&mut self, arrival_us: u64) {
        self.arrival_us = arrival_us;
    }

    pub(crate) fn invalidate(&mut self) {
        self.valid = false;
    }
}

impl Default for PacketSlot {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for PacketSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketSlot")
            .field("size", &self.size)
            .field("arrival_us", &self.arrival_us)
            .field("key", &self.key)
            .field("valid", &self.valid)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_pads_short_packets() {
        let mut slot = PacketSlot::empty();
        slot.fill(&[0xAA; 780], 780, SlotKey::default(), 1);
        slot.fill(&[1, 2, 3], 770, SlotKey::default(), 2);

        assert_eq!(slot.data().len(), 770);
        assert_eq!(&slot.data()[..3], &[1, 2, 3]);
        assert!(slot.data()[3..].iter().all(|&b| b == 0));
        assert_eq!(slot.arrival_us(), 2);
        assert!(slot.is_valid());
    }
}
