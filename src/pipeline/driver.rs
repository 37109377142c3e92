//! The consumer side of the jitter buffers.
//!
//! One driver thread pops ready packet pairs, feeds video into the frame
//! assembler, stamps completed frames and audio blocks with presentation
//! timestamps and pushes them to the configured outputs. While the stream is
//! silent it keeps the picture alive with placeholder frames and asks for the
//! device to be restarted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::dyn_traits::Pushable;
use crate::audio::AudioBlock;
use crate::buffer::{NetworkBuffer, PacketPair};
use crate::clock::{AudioClock, VideoClock};
use crate::session::SessionStats;
use crate::util::{MonotonicClock, RateLimiter, lock};
use crate::video::{AssembledFrame, FrameAssembler, VideoFrame, VideoGeometry, render_placeholder};

/// Silence after which placeholder frames are shown.
pub const PLACEHOLDER_AFTER_NS: u64 = 3_000_000_000;
pub const PLACEHOLDER_INTERVAL_NS: u64 = 20_000_000;
/// Time without video packets after which a reconnect is requested.
pub const RECONNECT_AFTER_NS: u64 = 1_000_000_000;
pub const RECONNECT_INTERVAL_NS: u64 = 1_000_000_000;
pub const STATS_INTERVAL_NS: u64 = 5_000_000_000;
const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Asks whoever controls the device to restart the streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectRequest {
    pub silent_for: Duration,
    /// Consecutive requests since video was last seen.
    pub attempt: u32,
}

/// Where the driver sends its results.
#[derive(Clone)]
pub struct MediaOutput {
    pub video: Arc<dyn Pushable<VideoFrame>>,
    pub audio: Arc<dyn Pushable<AudioBlock>>,
    pub reconnect: Arc<dyn Pushable<ReconnectRequest>>,
}

pub struct PipelineDriver {
    buffers: Arc<NetworkBuffer>,
    assembler: Arc<Mutex<FrameAssembler>>,
    stats: Arc<SessionStats>,
    output: MediaOutput,
    video_clock: VideoClock,
    audio_clock: AudioClock,
    pair: PacketPair,
    completed: Vec<AssembledFrame>,
    geometry: VideoGeometry,
    started_ns: u64,
    last_delivery_ns: u64,
    last_placeholder_ns: Option<u64>,
    last_reconnect_ns: Option<u64>,
    reconnect_attempts: u32,
    last_stats_ns: u64,
    decode_log: RateLimiter,
}

impl PipelineDriver {
    pub fn new(
        buffers: Arc<NetworkBuffer>,
        assembler: Arc<Mutex<FrameAssembler>>,
        stats: Arc<SessionStats>,
        output: MediaOutput,
        now_ns: u64,
    ) -> Self {
        Self {
            buffers,
            assembler,
            stats,
            output,
            video_clock: VideoClock::default(),
            audio_clock: AudioClock::new(),
            pair: PacketPair::new(),
            completed: Vec::with_capacity(2),
            geometry: VideoGeometry::default(),
            started_ns: now_ns,
            last_delivery_ns: now_ns,
            last_placeholder_ns: None,
            last_reconnect_ns: None,
            reconnect_attempts: 0,
            last_stats_ns: now_ns,
            decode_log: RateLimiter::new(Duration::from_secs(1)),
        }
    }

    pub fn run(mut self, clock: MonotonicClock, active: Arc<AtomicBool>) {
        info!("Pipeline driver started");

        while active.load(Ordering::Acquire) {
            if !self.step(clock.now_ns()) {
                thread::sleep(IDLE_SLEEP);
            }
        }

        info!("Pipeline driver stopped");
    }

    /// One iteration of the driver loop. Returns whether a packet pair was processed.
    pub fn step(&mut self, now_ns: u64) -> bool {
        let processed = self.buffers.pop_pair_into(now_ns / 1000, &mut self.pair);

        if processed {
            self.process_pair(now_ns);
            self.last_delivery_ns = now_ns;
            self.last_placeholder_ns = None;
        } else {
            lock(&self.assembler).expire(now_ns);
            self.emit_placeholder_if_idle(now_ns);
        }

        self.check_connection(now_ns);

        let since_stats = now_ns.saturating_sub(self.last_stats_ns);
        if since_stats >= STATS_INTERVAL_NS {
            self.stats.log_batch(Duration::from_nanos(since_stats));
            self.last_stats_ns = now_ns;
        }

        processed
    }

    fn process_pair(&mut self, now_ns: u64) {
        {
            let mut assembler = lock(&self.assembler);
            let completed = &mut self.completed;
            assembler.push_packet(self.pair.video().data(), now_ns, |frame| completed.push(frame));
        }

        let mut completed = std::mem::take(&mut self.completed);
        for frame in completed.drain(..) {
            self.deliver_frame(frame, now_ns);
        }
        self.completed = completed;

        if let Some(audio) = self.pair.audio() {
            match AudioBlock::decode(audio.data()) {
                Ok(mut block) => {
                    block.timestamp_ns = self.audio_clock.next_timestamp(now_ns);
                    self.stats.audio_blocks.fetch_add(1, Ordering::Relaxed);
                    self.output.audio.push(block);
                }
                Err(e) => {
                    self.stats.audio_decode_errors.fetch_add(1, Ordering::Relaxed);
                    if let Some(suppressed) = self.decode_log.check(now_ns / 1000) {
                        warn!("Dropping audio packet: {} ({} suppressed)", e, suppressed);
                    }
                }
            }
        }
    }

    fn deliver_frame(&mut self, frame: AssembledFrame, now_ns: u64) {
        self.video_clock
            .set_frame_interval(frame.geometry.frame_interval_ns());
        let timestamp_ns = self.video_clock.timestamp(frame.frame_num, now_ns);
        self.geometry = frame.geometry;

        self.stats.frames_delivered.fetch_add(1, Ordering::Relaxed);
        self.output.video.push(VideoFrame {
            frame_num: Some(frame.frame_num),
            width: frame.geometry.width,
            height: frame.geometry.height,
            timestamp_ns,
            data: frame.data,
        });
    }

    fn emit_placeholder_if_idle(&mut self, now_ns: u64) {
        if now_ns.saturating_sub(self.last_delivery_ns) < PLACEHOLDER_AFTER_NS {
            return;
        }
        if self
            .last_placeholder_ns
            .is_some_and(|last| now_ns.saturating_sub(last) < PLACEHOLDER_INTERVAL_NS)
        {
            return;
        }
        if self.last_placeholder_ns.is_none() {
            debug!("No packets delivered for 3 s, showing placeholder");
        }

        self.last_placeholder_ns = Some(now_ns);
        self.stats.placeholder_frames.fetch_add(1, Ordering::Relaxed);
        self.output
            .video
            .push(render_placeholder(self.geometry, now_ns));
    }

    fn check_connection(&mut self, now_ns: u64) {
        let last_packet_ns = self
            .stats
            .video
            .last_packet_ns()
            .unwrap_or(self.started_ns);
        let silent_ns = now_ns.saturating_sub(last_packet_ns);

        if silent_ns <= RECONNECT_AFTER_NS {
            if self.reconnect_attempts > 0 {
                info!(
                    "Video stream is back after {} reconnect requests",
                    self.reconnect_attempts
                );
                self.reconnect_attempts = 0;
                self.last_reconnect_ns = None;
            }
            return;
        }

        if self
            .last_reconnect_ns
            .is_some_and(|last| now_ns.saturating_sub(last) < RECONNECT_INTERVAL_NS)
        {
            return;
        }

        self.last_reconnect_ns = Some(now_ns);
        self.reconnect_attempts += 1;
        self.stats.reconnect_requests.fetch_add(1, Ordering::Relaxed);
        warn!(
            "No video packets for {} ms, requesting reconnect (attempt {})",
            silent_ns / 1_000_000,
            self.reconnect_attempts
        );
        self.output.reconnect.push(ReconnectRequest {
            silent_for: Duration::from_nanos(silent_ns),
            attempt: self.reconnect_attempts,
        });
    }
}
