//! Reassembles video packets into complete frames.
//!
//! A frame spans up to 68 packets of 4 raster lines each. The packet carrying
//! the last-packet flag tells how many packets the frame has, and thereby its
//! height (272 lines for PAL, 240 for NTSC). Frames are delivered once every
//! packet has arrived. A frame superseded by a newer one, or older than
//! [`FRAME_TIMEOUT_NS`], is dropped.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::frame::VideoGeometry;
use super::palette::{self, BLACK, RGBA_LINE_BYTES};
use crate::error::PacketError;
use crate::protocol::{
    BYTES_PER_LINE, MAX_PACKETS_PER_FRAME, PAL_HEIGHT, RASTER_BYTES, VIDEO_HEADER_SIZE,
    VIDEO_PACKET_SIZE, VideoHeader, seq_diff,
};
use crate::session::SessionStats;
use crate::util::RateLimiter;

pub const FRAME_TIMEOUT_NS: u64 = 100_000_000;
/// Packets for frames less than this far behind the last delivered one are
/// stale. A larger backward jump means the source restarted its numbering.
const STALE_FRAME_WINDOW: i16 = 8;

#[derive(Clone)]
struct FramePacket {
    line_num: u16,
    lines: u8,
    raster: [u8; RASTER_BYTES],
}

/// Packets received so far for one frame number.
pub struct FrameAssembly {
    frame_num: u16,
    packets: Box<[FramePacket]>,
    received_mask: u128,
    received_packets: u16,
    expected_packets: u16,
    started_ns: u64,
    delivered: bool,
}

impl FrameAssembly {
    fn new() -> Self {
        let empty = FramePacket {
            line_num: 0,
            lines: 0,
            raster: [0; RASTER_BYTES],
        };
        Self {
            frame_num: 0,
            packets: vec![empty; MAX_PACKETS_PER_FRAME].into_boxed_slice(),
            received_mask: 0,
            received_packets: 0,
            expected_packets: 0,
            started_ns: 0,
            delivered: false,
        }
    }

    fn reset(&mut self, frame_num: u16, now_ns: u64) {
        self.frame_num = frame_num;
        self.received_mask = 0;
        self.received_packets = 0;
        self.expected_packets = 0;
        self.started_ns = now_ns;
        self.delivered = false;
    }

    pub fn frame_num(&self) -> u16 {
        self.frame_num
    }

    pub fn received_packets(&self) -> u16 {
        self.received_packets
    }

    /// Zero until the packet with the last-packet flag has arrived.
    pub fn expected_packets(&self) -> u16 {
        self.expected_packets
    }

    pub fn received_mask(&self) -> u128 {
        self.received_mask
    }

    pub fn has_packet(&self, index: usize) -> bool {
        index < MAX_PACKETS_PER_FRAME && self.received_mask & (1u128 << index) != 0
    }

    pub fn is_complete(&self) -> bool {
        self.expected_packets > 0 && self.received_packets >= self.expected_packets
    }

    pub fn is_delivered(&self) -> bool {
        self.delivered
    }

    pub fn is_timed_out(&self, now_ns: u64) -> bool {
        now_ns.saturating_sub(self.started_ns) > FRAME_TIMEOUT_NS
    }

    /// Stores a packet; `false` when its slot was already filled.
    fn insert(&mut self, index: usize, header: &VideoHeader, raster: &[u8]) -> bool {
        if self.has_packet(index) {
            return false;
        }
        let packet = &mut self.packets[index];
        packet.line_num = header.line_num;
        packet.lines = header.lines_per_packet;
        packet.raster.copy_from_slice(&raster[..RASTER_BYTES]);
        self.received_mask |= 1u128 << index;
        self.received_packets += 1;
        true
    }

    /// Renders the received lines as RGBA into `out`, `height` rows of
    /// [`RGBA_LINE_BYTES`]. Missing rows repeat the nearest received row above
    /// them; rows above the first received one are black.
    pub fn render_into(&self, height: u32, out: &mut [u8]) {
        let height = height as usize;
        let mut written = vec![false; height];

        for (index, packet) in self.packets.iter().enumerate() {
            if !self.has_packet(index) {
                continue;
            }
            for line in 0..packet.lines as usize {
                let row = packet.line_num as usize + line;
                if row >= height {
                    break;
                }
                let src = &packet.raster[line * BYTES_PER_LINE..(line + 1) * BYTES_PER_LINE];
                palette::convert_line(src, &mut out[row * RGBA_LINE_BYTES..(row + 1) * RGBA_LINE_BYTES]);
                written[row] = true;
            }
        }

        let mut source_row = None;
        for row in 0..height {
            if written[row] {
                source_row = Some(row);
                continue;
            }
            let dst = row * RGBA_LINE_BYTES;
            match source_row {
                Some(src) => out.copy_within(
                    src * RGBA_LINE_BYTES..(src + 1) * RGBA_LINE_BYTES,
                    dst,
                ),
                None => {
                    for px in out[dst..dst + RGBA_LINE_BYTES].chunks_exact_mut(4) {
                        px.copy_from_slice(&BLACK);
                    }
                }
            }
        }
    }
}

/// A frame handed out by the assembler, not yet stamped with a presentation time.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledFrame {
    pub frame_num: u16,
    pub geometry: VideoGeometry,
    pub data: Vec<u8>,
}

pub struct FrameAssembler {
    current: FrameAssembly,
    active: bool,
    last_completed_frame: Option<u16>,
    geometry: VideoGeometry,
    format_detected: bool,
    stats: Arc<SessionStats>,
    malformed_log: RateLimiter,
    timeout_log: RateLimiter,
}

impl FrameAssembler {
    pub fn new(stats: Arc<SessionStats>) -> Self {
        Self {
            current: FrameAssembly::new(),
            active: false,
            last_completed_frame: None,
            geometry: VideoGeometry::default(),
            format_detected: false,
            stats,
            malformed_log: RateLimiter::new(Duration::from_secs(1)),
            timeout_log: RateLimiter::new(Duration::from_secs(1)),
        }
    }

    pub fn geometry(&self) -> VideoGeometry {
        self.geometry
    }

    pub fn format_detected(&self) -> bool {
        self.format_detected
    }

    pub fn last_completed_frame(&self) -> Option<u16> {
        self.last_completed_frame
    }

    /// The frame being assembled, if any.
    pub fn current(&self) -> Option<&FrameAssembly> {
        self.active.then_some(&self.current)
    }

    /// Feeds one video datagram. Completed frames are passed to `emit`.
    pub fn push_packet(&mut self, data: &[u8], now_ns: u64, mut emit: impl FnMut(AssembledFrame)) {
        let header = match Self::parse(data) {
            Ok(header) => header,
            Err(e) => {
                self.stats.packet_drops.fetch_add(1, Ordering::Relaxed);
                if let Some(suppressed) = self.malformed_log.check(now_ns / 1000) {
                    warn!("Dropping video packet: {} ({} suppressed)", e, suppressed);
                }
                return;
            }
        };

        if let Some(last) = self.last_completed_frame {
            let behind = seq_diff(header.frame_num, last);
            if behind <= -STALE_FRAME_WINDOW {
                info!(
                    "Video source restarted: frame {} after {}",
                    header.frame_num, last
                );
                self.last_completed_frame = None;
            } else if behind <= 0 {
                self.stats.stale_packets.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        if !self.active || self.current.frame_num != header.frame_num {
            self.finish_current(now_ns);
            self.current.reset(header.frame_num, now_ns);
            self.active = true;
        }

        let index = header.packet_index();
        if index >= MAX_PACKETS_PER_FRAME {
            self.stats.packet_drops.fetch_add(1, Ordering::Relaxed);
            if let Some(suppressed) = self.malformed_log.check(now_ns / 1000) {
                warn!(
                    "Dropping video packet: line {} beyond frame ({} suppressed)",
                    header.line_num, suppressed
                );
            }
            return;
        }

        if !self
            .current
            .insert(index, &header, &data[VIDEO_HEADER_SIZE..VIDEO_PACKET_SIZE])
        {
            self.stats.packet_drops.fetch_add(1, Ordering::Relaxed);
            self.stats.duplicate_packets.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if header.last_packet && self.current.expected_packets == 0 {
            self.current.expected_packets = index as u16 + 1;
            self.detect_geometry(header.line_num as u32 + header.lines_per_packet as u32);
        }

        if self.current.is_complete() && !self.current.delivered {
            emit(self.deliver());
        }
    }

    fn parse(data: &[u8]) -> Result<VideoHeader, PacketError> {
        PacketError::check_size(data.len(), VIDEO_PACKET_SIZE)?;
        VideoHeader::parse_validated(data)
    }

    /// Drops the frame in progress if it has been waiting longer than the timeout.
    pub fn expire(&mut self, now_ns: u64) {
        if self.active
            && !self.current.delivered
            && self.current.received_packets > 0
            && self.current.is_timed_out(now_ns)
        {
            self.drop_current(now_ns, true);
            self.active = false;
        }
    }

    /// Forgets all frame state, including the detected format.
    pub fn reset(&mut self) {
        self.active = false;
        self.last_completed_frame = None;
        self.geometry = VideoGeometry::default();
        self.format_detected = false;
    }

    fn finish_current(&mut self, now_ns: u64) {
        if !self.active || self.current.delivered || self.current.received_packets == 0 {
            return;
        }
        let timed_out = self.current.is_timed_out(now_ns);
        self.drop_current(now_ns, timed_out);
    }

    fn drop_current(&mut self, now_ns: u64, timed_out: bool) {
        self.stats.frame_drops.fetch_add(1, Ordering::Relaxed);
        let frame = &self.current;
        if timed_out {
            if let Some(suppressed) = self.timeout_log.check(now_ns / 1000) {
                warn!(
                    "Frame {} timed out with {}/{} packets ({} suppressed)",
                    frame.frame_num,
                    frame.received_packets,
                    frame.expected_packets,
                    suppressed
                );
            }
        } else {
            debug!(
                "Frame {} superseded with {}/{} packets",
                frame.frame_num, frame.received_packets, frame.expected_packets
            );
        }
    }

    fn detect_geometry(&mut self, height: u32) {
        let height = height.min(PAL_HEIGHT);
        let geometry = VideoGeometry::from_height(height);
        if !self.format_detected || geometry != self.geometry {
            info!(
                "Detected {:?} video: {}x{} @ {:.3} Hz",
                geometry.standard,
                geometry.width,
                geometry.height,
                geometry.standard.fps()
            );
        }
        self.geometry = geometry;
        self.format_detected = true;
    }

    fn deliver(&mut self) -> AssembledFrame {
        let geometry = self.geometry;
        let mut data = vec![0u8; geometry.frame_bytes()];
        self.current.render_into(geometry.height, &mut data);

        self.current.delivered = true;
        self.last_completed_frame = Some(self.current.frame_num);
        self.stats.frames_completed.fetch_add(1, Ordering::Relaxed);

        AssembledFrame {
            frame_num: self.current.frame_num,
            geometry,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_video_packet, build_audio_packet};
    use proptest::prelude::*;

    const PAL_PACKETS: u16 = 68;
    const NTSC_PACKETS: u16 = 60;

    fn packet(frame: u16, index: u16, packets: u16, fill: u8) -> [u8; 780] {
        build_video_packet(index, frame, index * 4, index == packets - 1, fill)
    }

    fn collect(assembler: &mut FrameAssembler, data: &[u8], now_ns: u64) -> Vec<AssembledFrame> {
        let mut out = Vec::new();
        assembler.push_packet(data, now_ns, |f| out.push(f));
        out
    }

    fn new_assembler() -> (FrameAssembler, Arc<SessionStats>) {
        let stats = Arc::new(SessionStats::default());
        (FrameAssembler::new(stats.clone()), stats)
    }

    fn load(stats: &SessionStats) -> (u64, u64, u64) {
        (
            stats.frames_completed.load(Ordering::Relaxed),
            stats.frame_drops.load(Ordering::Relaxed),
            stats.packet_drops.load(Ordering::Relaxed),
        )
    }

    #[test]
    fn test_complete_pal_frame() {
        let (mut assembler, stats) = new_assembler();
        let mut frames = Vec::new();
        for index in 0..PAL_PACKETS {
            frames.extend(collect(&mut assembler, &packet(100, index, PAL_PACKETS, 0x11), 0));
        }

        assert_eq!(frames.len(), 1);
        let frame = &frames[0];
        assert_eq!(frame.frame_num, 100);
        assert_eq!(frame.geometry, VideoGeometry::PAL);
        assert_eq!(frame.data.len(), 384 * 272 * 4);
        assert!(frame.data.chunks_exact(4).all(|px| px == palette::PALETTE[1]));

        let current = assembler.current().unwrap();
        assert_eq!(current.expected_packets(), 68);
        assert_eq!(current.received_packets(), 68);
        assert!(current.is_complete());
        assert_eq!(assembler.last_completed_frame(), Some(100));
        assert_eq!(load(&stats), (1, 0, 0));
    }

    #[test]
    fn test_out_of_order_packets_complete() {
        let (mut assembler, _) = new_assembler();
        let mut frames = Vec::new();
        for index in (0..PAL_PACKETS).rev() {
            frames.extend(collect(&mut assembler, &packet(7, index, PAL_PACKETS, 0x00), 0));
        }
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_ntsc_detection() {
        let (mut assembler, _) = new_assembler();
        let mut frames = Vec::new();
        for index in 0..NTSC_PACKETS {
            frames.extend(collect(&mut assembler, &packet(1, index, NTSC_PACKETS, 0x22), 0));
        }

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].geometry, VideoGeometry::NTSC);
        assert_eq!(frames[0].data.len(), 384 * 240 * 4);
        assert!(assembler.format_detected());
    }

    #[test]
    fn test_duplicate_packet_rejected() {
        let (mut assembler, stats) = new_assembler();
        collect(&mut assembler, &packet(3, 0, PAL_PACKETS, 0), 0);
        collect(&mut assembler, &packet(3, 0, PAL_PACKETS, 0), 0);

        assert_eq!(assembler.current().unwrap().received_packets(), 1);
        assert_eq!(load(&stats).2, 1);
        assert_eq!(stats.duplicate_packets.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_no_second_delivery_of_completed_frame() {
        let (mut assembler, stats) = new_assembler();
        for index in 0..PAL_PACKETS {
            collect(&mut assembler, &packet(5, index, PAL_PACKETS, 0), 0);
        }
        // A late retransmission of the whole frame.
        let mut again = Vec::new();
        for index in 0..PAL_PACKETS {
            again.extend(collect(&mut assembler, &packet(5, index, PAL_PACKETS, 0), 0));
        }
        assert!(again.is_empty());
        assert_eq!(stats.stale_packets.load(Ordering::Relaxed), 68);
    }

    #[test]
    fn test_late_packets_for_recent_frames_are_stale() {
        let (mut assembler, stats) = new_assembler();
        for index in 0..PAL_PACKETS {
            collect(&mut assembler, &packet(20, index, PAL_PACKETS, 0), 0);
        }
        collect(&mut assembler, &packet(19, 3, PAL_PACKETS, 0), 0);
        collect(&mut assembler, &packet(13, 3, PAL_PACKETS, 0), 0);

        assert_eq!(stats.stale_packets.load(Ordering::Relaxed), 2);
        assert_eq!(assembler.last_completed_frame(), Some(20));
    }

    #[test]
    fn test_source_restart_to_lower_frame_numbers() {
        let (mut assembler, stats) = new_assembler();
        let mut frames = Vec::new();
        for frame in [200u16, 0, 1, 2, 3, 4] {
            for index in 0..PAL_PACKETS {
                frames.extend(collect(&mut assembler, &packet(frame, index, PAL_PACKETS, 0), 0));
            }
        }

        let nums: Vec<u16> = frames.iter().map(|f| f.frame_num).collect();
        assert_eq!(nums, vec![200, 0, 1, 2, 3, 4]);
        assert_eq!(stats.stale_packets.load(Ordering::Relaxed), 0);
        assert_eq!(load(&stats), (6, 0, 0));
    }

    #[test]
    fn test_superseded_frame_counts_as_drop() {
        let (mut assembler, stats) = new_assembler();
        for index in 0..10 {
            collect(&mut assembler, &packet(1, index, PAL_PACKETS, 0), 0);
        }
        collect(&mut assembler, &packet(2, 0, PAL_PACKETS, 0), 1_000);

        assert_eq!(load(&stats), (0, 1, 0));
        assert_eq!(assembler.current().unwrap().frame_num(), 2);
    }

    #[test]
    fn test_expire_drops_stalled_frame() {
        let (mut assembler, stats) = new_assembler();
        collect(&mut assembler, &packet(1, 0, PAL_PACKETS, 0), 0);

        assembler.expire(FRAME_TIMEOUT_NS);
        assert!(assembler.current().is_some());

        assembler.expire(FRAME_TIMEOUT_NS + 1);
        assert!(assembler.current().is_none());
        assert_eq!(load(&stats).1, 1);

        // Later packets for the same frame start over instead of completing it.
        collect(&mut assembler, &packet(1, 1, PAL_PACKETS, 0), FRAME_TIMEOUT_NS + 2);
        assert_eq!(assembler.current().unwrap().received_packets(), 1);
    }

    #[test]
    fn test_malformed_packets_dropped() {
        let (mut assembler, stats) = new_assembler();
        collect(&mut assembler, &packet(1, 0, PAL_PACKETS, 0)[..700], 0);
        collect(&mut assembler, &build_video_packet(1, 1, 6, false, 0), 0);
        collect(&mut assembler, &build_video_packet(1, 1, 272, false, 0), 0);
        collect(&mut assembler, &build_audio_packet(1, |_| 0), 0);

        assert_eq!(load(&stats).2, 4);
    }

    #[test]
    fn test_missing_rows_repeat_row_above() {
        let mut assembly = FrameAssembly::new();
        assembly.reset(1, 0);

        let mut raster = [0u8; RASTER_BYTES];
        // Rows 0-3 of packet 0: colours 1, 2, 3, 4.
        for line in 0..4 {
            raster[line * BYTES_PER_LINE..(line + 1) * BYTES_PER_LINE].fill(0x11 * (line as u8 + 1));
        }
        let header = VideoHeader::parse(&build_video_packet(0, 1, 0, false, 0)).unwrap();
        assembly.insert(0, &header, &raster);

        let header = VideoHeader::parse(&build_video_packet(2, 1, 8, false, 0)).unwrap();
        assembly.insert(2, &header, &[0x55; RASTER_BYTES]);

        let mut out = vec![0u8; 16 * RGBA_LINE_BYTES];
        assembly.render_into(16, &mut out);

        let row_colour = |row: usize| {
            let mut px = [0u8; 4];
            px.copy_from_slice(&out[row * RGBA_LINE_BYTES..row * RGBA_LINE_BYTES + 4]);
            px
        };
        assert_eq!(row_colour(3), palette::PALETTE[4]);
        // Packet 1 (rows 4-7) is missing and takes row 3.
        for row in 4..8 {
            assert_eq!(row_colour(row), palette::PALETTE[4]);
        }
        assert_eq!(row_colour(8), palette::PALETTE[5]);
        // Nothing after packet 2 either.
        assert_eq!(row_colour(15), palette::PALETTE[5]);
    }

    #[test]
    fn test_missing_top_rows_are_black() {
        let mut assembly = FrameAssembly::new();
        assembly.reset(1, 0);
        let header = VideoHeader::parse(&build_video_packet(0, 1, 4, false, 0)).unwrap();
        assembly.insert(1, &header, &[0x11; RASTER_BYTES]);

        let mut out = vec![0u8; 8 * RGBA_LINE_BYTES];
        assembly.render_into(8, &mut out);
        assert_eq!(&out[..4], &BLACK);
        assert_eq!(&out[4 * RGBA_LINE_BYTES..4 * RGBA_LINE_BYTES + 4], &palette::PALETTE[1]);
    }

    #[test]
    fn test_wraparound_frame_numbers() {
        let (mut assembler, _) = new_assembler();
        let mut frames = Vec::new();
        for frame in [65534u16, 65535, 0, 1] {
            for index in 0..PAL_PACKETS {
                frames.extend(collect(&mut assembler, &packet(frame, index, PAL_PACKETS, 0), 0));
            }
        }
        let nums: Vec<u16> = frames.iter().map(|f| f.frame_num).collect();
        assert_eq!(nums, vec![65534, 65535, 0, 1]);
    }

    proptest! {
        #[test]
        fn test_each_frame_delivered_at_most_once(
            packets in prop::collection::vec((0u16..6, 0u16..PAL_PACKETS), 1..800)
        ) {
            let (mut assembler, _) = new_assembler();
            let mut delivered = Vec::new();
            for (frame, index) in packets {
                assembler.push_packet(&packet(frame, index, PAL_PACKETS, 0), 0, |f| {
                    delivered.push(f.frame_num)
                });
            }
            let mut unique = delivered.clone();
            unique.sort_unstable();
            unique.dedup();
            prop_assert_eq!(unique.len(), delivered.len());
        }
    }
}
