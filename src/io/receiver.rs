//! UDP receivers for the video and audio streams.
//!
//! Each stream gets its own socket and thread. A receiver only validates the
//! datagram, updates its counters and pushes the packet into its ring buffer;
//! everything else happens on the driver thread.

use std::io::ErrorKind;
use std::marker::PhantomData;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{error, info, warn};

use crate::buffer::{PacketRingBuffer, StreamKind};
use crate::session::StreamCounters;
use crate::util::{MonotonicClock, RateLimiter};

/// Kernel receive buffer requested for each stream; roughly 1 s of video.
const RECV_BUFFER_SIZE: usize = 4 * 1024 * 1024;
/// Larger than any valid datagram so oversized packets are seen as such.
const DATAGRAM_BUFFER_SIZE: usize = 2048;

/// Binds a UDP socket with address reuse and a read timeout, so the receive
/// loop can notice shutdown.
pub fn bind_udp(addr: SocketAddr, recv_timeout: Duration) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .context("Failed to create socket")?;

    socket
        .set_reuse_address(true)
        .context("Failed to set reuse address")?;

    if let Err(e) = socket.set_recv_buffer_size(RECV_BUFFER_SIZE) {
        warn!("Could not enlarge receive buffer for {}: {}", addr, e);
    }

    socket
        .bind(&addr.into())
        .with_context(|| format!("Failed to bind UDP socket to {addr}"))?;

    socket
        .set_read_timeout(Some(recv_timeout))
        .context("Failed to set read timeout")?;

    Ok(socket.into())
}

pub struct StreamReceiver<K: StreamKind> {
    socket: UdpSocket,
    ring: Arc<PacketRingBuffer<K>>,
    counters: Arc<StreamCounters>,
    clock: MonotonicClock,
    last_seq: Option<u16>,
    malformed_log: RateLimiter,
    error_log: RateLimiter,
    _kind: PhantomData<K>,
}

impl<K: StreamKind> StreamReceiver<K> {
    pub fn new(
        socket: UdpSocket,
        ring: Arc<PacketRingBuffer<K>>,
        counters: Arc<StreamCounters>,
        clock: MonotonicClock,
    ) -> Self {
        Self {
            socket,
            ring,
            counters,
            clock,
            last_seq: None,
            malformed_log: RateLimiter::new(Duration::from_secs(1)),
            error_log: RateLimiter::new(Duration::from_secs(1)),
            _kind: PhantomData,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .context("Failed to get local address")
    }

    pub fn run(mut self, active: Arc<AtomicBool>) {
        match self.socket.local_addr() {
            Ok(addr) => info!("{} receiver listening on {}", K::NAME, addr),
            Err(_) => info!("{} receiver started", K::NAME),
        }

        let mut buf = [0u8; DATAGRAM_BUFFER_SIZE];
        while active.load(Ordering::Acquire) {
            match self.socket.recv(&mut buf) {
                Ok(len) => {
                    let now_ns = self.clock.now_ns();
                    self.handle_datagram(&buf[..len], now_ns);
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) => {}
                Err(e) => {
                    if let Some(suppressed) = self.error_log.check(self.clock.now_us()) {
                        error!(
                            "{} receiver: failed to receive UDP packet: {} ({} suppressed)",
                            K::NAME,
                            e,
                            suppressed
                        );
                    }
                }
            }
        }

        info!("{} receiver shutting down", K::NAME);
    }

    /// Validates one datagram and buffers it. Returns whether it was accepted.
    pub fn handle_datagram(&mut self, data: &[u8], now_ns: u64) -> bool {
        if let Err(e) = K::validate(data) {
            self.counters.malformed.fetch_add(1, Ordering::Relaxed);
            if let Some(suppressed) = self.malformed_log.check(now_ns / 1000) {
                warn!(
                    "{} receiver: dropping malformed packet: {} ({} suppressed)",
                    K::NAME,
                    e,
                    suppressed
                );
            }
            return false;
        }

        let seq = K::parse_key(data).sequence_num;
        if self.last_seq.is_some_and(|last| seq != last.wrapping_add(1)) {
            self.counters.out_of_sequence.fetch_add(1, Ordering::Relaxed);
        }
        self.last_seq = Some(seq);

        self.counters.record_packet(data.len(), now_ns);
        self.ring.push(data, now_ns / 1000);
        true
    }
}
