//! Bounded, reordering packet ring buffer.
//!
//! Packets are kept sorted by the stream's ordering key. A new packet walks
//! back from the newest entry at most [`StreamKind::SEARCH_DEPTH`] slots to find
//! its place; anything older than that is appended at the head anyway, trading a
//! small ordering error for bounded insertion cost.
//!
//! `head` and `tail` are monotonically increasing positions (slot index is
//! `position % capacity`). They are published through atomics so the consumer
//! can check for emptiness without touching the slot storage. Unlike a
//! lock-free SPSC ring, every push and pop takes the slot mutex for its short
//! copy or shift, because a reordering insert moves slots the consumer may be
//! reading. A reader of `len()` can therefore see `tail` moved past the `head`
//! it loaded earlier while a trim runs.

use std::cmp::Ordering as KeyOrdering;
use std::marker::PhantomData;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam::utils::CachePadded;
use tracing::{debug, info, warn};

use super::kind::StreamKind;
use super::slot::PacketSlot;
use crate::protocol::seq_diff;
use crate::util::{RateLimiter, lock};

/// Never allocate fewer slots than this, whatever the configured delay.
pub const MIN_CAPACITY: usize = 16;
/// Dropping the delay to zero from above this flushes the buffer outright.
const SHARP_RESET_THRESHOLD_US: u64 = 50_000;
/// Upper bound accepted by [`PacketRingBuffer::set_delay`].
pub const MAX_DELAY_MS: u32 = 500;
const WARN_INTERVAL: Duration = Duration::from_secs(1);

/// Slots needed to hold `delay_ms` worth of packets at `rate` packets per second.
pub fn slots_for(rate: u32, delay_ms: u32) -> usize {
    (rate as u64 * delay_ms as u64).div_ceil(1000) as usize
}

/// Packets dropped from the tail when a push finds the buffer full.
fn overflow_batch(occupancy: usize) -> usize {
    (occupancy / 10).max(2).min((occupancy / 2).max(1))
}

/// What happened to a pushed packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Stored at the head, already in order.
    Appended,
    /// Stored before newer packets.
    Reordered,
    /// Too far out of order for the bounded search; stored at the head.
    OutOfWindow,
    /// Same ordering key as a buffered packet; dropped.
    Duplicate,
    /// Shorter than the stream's header; dropped.
    Rejected,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RingStatsSnapshot {
    pub pushed: u64,
    pub popped: u64,
    pub reordered: u64,
    pub out_of_window: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub overflow_dropped: u64,
    pub delay_discarded: u64,
    pub sequence_gaps: u64,
    pub late_packets: u64,
    pub sequence_restarts: u64,
}

#[derive(Default)]
struct RingStats {
    pushed: AtomicU64,
    popped: AtomicU64,
    reordered: AtomicU64,
    out_of_window: AtomicU64,
    duplicates: AtomicU64,
    rejected: AtomicU64,
    overflow_dropped: AtomicU64,
    delay_discarded: AtomicU64,
    sequence_gaps: AtomicU64,
    late_packets: AtomicU64,
    sequence_restarts: AtomicU64,
}

impl RingStats {
    fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RingStatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        RingStatsSnapshot {
            pushed: get(&self.pushed),
            popped: get(&self.popped),
            reordered: get(&self.reordered),
            out_of_window: get(&self.out_of_window),
            duplicates: get(&self.duplicates),
            rejected: get(&self.rejected),
            overflow_dropped: get(&self.overflow_dropped),
            delay_discarded: get(&self.delay_discarded),
            sequence_gaps: get(&self.sequence_gaps),
            late_packets: get(&self.late_packets),
            sequence_restarts: get(&self.sequence_restarts),
        }
    }
}

struct RingState {
    slots: Box<[PacketSlot]>,
    next_expected_seq: u16,
    seq_initialized: bool,
}

pub struct PacketRingBuffer<K: StreamKind> {
    state: Mutex<RingState>,
    capacity: usize,
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    delay_us: AtomicU64,
    active_slots: AtomicUsize,
    stats: RingStats,
    overflow_log: RateLimiter,
    pressure_log: RateLimiter,
    gap_log: RateLimiter,
    _kind: PhantomData<K>,
}

impl<K: StreamKind> PacketRingBuffer<K> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let slots = (0..capacity).map(|_| PacketSlot::empty()).collect();

        Self {
            state: Mutex::new(RingState {
                slots,
                next_expected_seq: 0,
                seq_initialized: false,
            }),
            capacity,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            delay_us: AtomicU64::new(0),
            active_slots: AtomicUsize::new(capacity),
            stats: RingStats::default(),
            overflow_log: RateLimiter::new(WARN_INTERVAL),
            pressure_log: RateLimiter::new(WARN_INTERVAL),
            gap_log: RateLimiter::new(WARN_INTERVAL),
            _kind: PhantomData,
        }
    }

    /// Sized to hold `max_delay_ms` of traffic at the stream's peak packet rate.
    pub fn with_max_delay(max_delay_ms: u32) -> Self {
        Self::new(slots_for(K::MAX_PACKET_RATE, max_delay_ms).max(MIN_CAPACITY))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.saturating_sub(tail)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn delay_us(&self) -> u64 {
        self.delay_us.load(Ordering::Acquire)
    }

    /// Slot count matching the current delay; bounds the trim done by [`Self::set_delay`].
    pub fn active_slots(&self) -> usize {
        self.active_slots.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> RingStatsSnapshot {
        self.stats.snapshot()
    }

    /// Stores a packet in key order. Never blocks on the consumer and never fails
    /// loudly; problems are reflected in the outcome and the statistics.
    pub fn push(&self, data: &[u8], arrival_us: u64) -> PushOutcome {
        if data.len() < K::MIN_HEADER_SIZE {
            RingStats::add(&self.stats.rejected, 1);
            return PushOutcome::Rejected;
        }

        let key = K::parse_key(data);
        let mut state = lock(&self.state);
        self.track_sequence(&mut state, key.sequence_num, arrival_us);

        let head = self.head.load(Ordering::Acquire);
        let mut tail = self.tail.load(Ordering::Acquire);
        let occupancy = head - tail;

        if occupancy >= self.capacity {
            let dropped = overflow_batch(occupancy);
            for pos in tail..tail + dropped {
                state.slots[pos % self.capacity].invalidate();
            }
            tail += dropped;
            self.tail.store(tail, Ordering::Release);
            RingStats::add(&self.stats.overflow_dropped, dropped as u64);

            if let Some(suppressed) = self.overflow_log.check(arrival_us) {
                warn!(
                    "{} buffer: overflow, dropped {} oldest packets ({} warnings suppressed)",
                    K::NAME,
                    dropped,
                    suppressed
                );
            }
        } else if occupancy * 10 >= self.capacity * 9 {
            if let Some(suppressed) = self.pressure_log.check(arrival_us) {
                warn!(
                    "{} buffer: {}/{} slots in use ({} warnings suppressed)",
                    K::NAME,
                    occupancy,
                    self.capacity,
                    suppressed
                );
            }
        }

        let mut pos = head;
        let mut steps = 0;
        let outcome = loop {
            if pos == tail {
                break if pos == head {
                    PushOutcome::Appended
                } else {
                    PushOutcome::Reordered
                };
            }

            let prev = &state.slots[(pos - 1) % self.capacity];
            match K::compare(&key, prev.key()) {
                KeyOrdering::Greater => {
                    break if pos == head {
                        PushOutcome::Appended
                    } else {
                        PushOutcome::Reordered
                    };
                }
                KeyOrdering::Equal if prev.is_valid() => {
                    RingStats::add(&self.stats.duplicates, 1);
                    debug!(
                        "{} buffer: dropping duplicate packet seq={}",
                        K::NAME,
                        key.sequence_num
                    );
                    return PushOutcome::Duplicate;
                }
                _ => {
                    if steps == K::SEARCH_DEPTH {
                        pos = head;
                        break PushOutcome::OutOfWindow;
                    }
                    pos -= 1;
                    steps += 1;
                }
            }
        };

        // Open a gap at `pos` by moving newer packets one slot towards the head.
        let mut shift = head;
        while shift > pos {
            state
                .slots
                .swap(shift % self.capacity, (shift - 1) % self.capacity);
            shift -= 1;
        }

        state.slots[pos % self.capacity].fill(data, K::PACKET_SIZE, key, arrival_us);
        self.head.store(head + 1, Ordering::Release);

        RingStats::add(&self.stats.pushed, 1);
        match outcome {
            PushOutcome::Reordered => RingStats::add(&self.stats.reordered, 1),
            PushOutcome::OutOfWindow => RingStats::add(&self.stats.out_of_window, 1),
            _ => {}
        }
        outcome
    }

    fn track_sequence(&self, state: &mut RingState, seq: u16, now_us: u64) {
        if !state.seq_initialized {
            state.seq_initialized = true;
            state.next_expected_seq = seq.wrapping_add(1);
            debug!("{} buffer: initialized with sequence {}", K::NAME, seq);
            return;
        }

        let diff = seq_diff(seq, state.next_expected_seq);
        if diff == 0 {
            state.next_expected_seq = seq.wrapping_add(1);
        } else if diff > 0 && diff < K::JUMP_THRESHOLD {
            RingStats::add(&self.stats.sequence_gaps, diff as u64);
            state.next_expected_seq = seq.wrapping_add(1);
            if let Some(suppressed) = self.gap_log.check(now_us) {
                debug!(
                    "{} buffer: sequence gap of {} before seq={} ({} suppressed)",
                    K::NAME,
                    diff,
                    seq,
                    suppressed
                );
            }
        } else if diff < 0 && diff > -K::JUMP_THRESHOLD {
            RingStats::add(&self.stats.late_packets, 1);
        } else {
            info!(
                "{} buffer: sequence jump from {} to {}, re-initializing",
                K::NAME,
                state.next_expected_seq,
                seq
            );
            RingStats::add(&self.stats.sequence_restarts, 1);
            state.next_expected_seq = seq.wrapping_add(1);
        }
    }

    /// Copies the oldest packet into `out` and removes it, regardless of its age.
    pub fn pop_oldest_into(&self, out: &mut PacketSlot) -> bool {
        if self.is_empty() {
            return false;
        }
        let mut state = lock(&self.state);
        self.pop_locked(&mut state, out)
    }

    pub fn pop_oldest(&self) -> Option<PacketSlot> {
        let mut out = PacketSlot::empty();
        self.pop_oldest_into(&mut out).then_some(out)
    }

    /// Releases the oldest packet only once it has waited at least the configured delay.
    /// Packets behind a waiting one are never released first.
    pub fn pop_if_ready_into(&self, now_us: u64, out: &mut PacketSlot) -> bool {
        if self.is_empty() {
            return false;
        }
        let mut state = lock(&self.state);
        let tail = self.tail.load(Ordering::Acquire);
        if tail == self.head.load(Ordering::Acquire) {
            return false;
        }

        let oldest = &state.slots[tail % self.capacity];
        if now_us.saturating_sub(oldest.arrival_us()) < self.delay_us() {
            return false;
        }
        self.pop_locked(&mut state, out)
    }

    pub fn pop_if_ready(&self, now_us: u64) -> Option<PacketSlot> {
        let mut out = PacketSlot::empty();
        self.pop_if_ready_into(now_us, &mut out).then_some(out)
    }

    /// Whether [`Self::pop_if_ready`] would release a packet at `now_us`.
    pub fn is_ready(&self, now_us: u64) -> bool {
        if self.is_empty() {
            return false;
        }
        let state = lock(&self.state);
        let tail = self.tail.load(Ordering::Acquire);
        tail != self.head.load(Ordering::Acquire)
            && now_us.saturating_sub(state.slots[tail % self.capacity].arrival_us())
                >= self.delay_us()
    }

    fn pop_locked(&self, state: &mut RingState, out: &mut PacketSlot) -> bool {
        let tail = self.tail.load(Ordering::Acquire);
        if tail == self.head.load(Ordering::Acquire) {
            return false;
        }

        let slot = &mut state.slots[tail % self.capacity];
        out.clone_from(slot);
        slot.invalidate();
        self.tail.store(tail + 1, Ordering::Release);
        RingStats::add(&self.stats.popped, 1);
        true
    }

    /// Changes the release delay.
    ///
    /// Going to zero from more than 50 ms flushes everything. Any other decrease
    /// keeps only the newest packets that fit the new delay and makes them
    /// eligible for release immediately.
    pub fn set_delay(&self, delay_ms: u32, now_us: u64) {
        let delay_ms = delay_ms.min(MAX_DELAY_MS);
        let new_us = delay_ms as u64 * 1000;
        let active = slots_for(K::MAX_PACKET_RATE, delay_ms).min(self.capacity);
        self.active_slots.store(active, Ordering::Release);

        let mut state = lock(&self.state);
        let old_us = self.delay_us.swap(new_us, Ordering::AcqRel);

        if new_us == 0 && old_us > SHARP_RESET_THRESHOLD_US {
            self.reset_locked(&mut state);
            info!(
                "{} buffer: delay {} ms -> 0 ms, buffer flushed",
                K::NAME,
                old_us / 1000
            );
            return;
        }

        if new_us >= old_us {
            info!(
                "{} buffer: delay set to {} ms ({} slots)",
                K::NAME,
                delay_ms,
                active
            );
            return;
        }

        let head = self.head.load(Ordering::Acquire);
        let mut tail = self.tail.load(Ordering::Acquire);
        let len = head - tail;
        let mut discarded = 0;
        if len > active {
            discarded = len - active;
            for pos in tail..tail + discarded {
                state.slots[pos % self.capacity].invalidate();
            }
            tail += discarded;
            self.tail.store(tail, Ordering::Release);
            RingStats::add(&self.stats.delay_discarded, discarded as u64);
        }

        let eligible_us = now_us.saturating_sub(new_us);
        for pos in tail..head {
            let slot = &mut state.slots[pos % self.capacity];
            if slot.arrival_us() > eligible_us {
                slot.set_arrival_us(eligible_us);
            }
        }

        info!(
            "{} buffer: delay {} ms -> {} ms ({} slots), discarded {} packets",
            K::NAME,
            old_us / 1000,
            delay_ms,
            active,
            discarded
        );
    }

    /// Empties the buffer and forgets the sequence state.
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        self.reset_locked(&mut state);
    }

    fn reset_locked(&self, state: &mut RingState) {
        for slot in state.slots.iter_mut() {
            slot.invalidate();
        }
        state.seq_initialized = false;
        state.next_expected_seq = 0;
        self.tail.store(0, Ordering::Release);
        self.head.store(0, Ordering::Release);
    }
}
