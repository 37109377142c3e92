use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::config::StreamConfig;
use super::stats::SessionStats;
use crate::buffer::NetworkBuffer;
use crate::io::{StreamReceiver, bind_udp};
use crate::pipeline::{MediaOutput, PipelineDriver};
use crate::util::{MonotonicClock, lock};
use crate::video::FrameAssembler;

/// A running (or stoppable) C64 Ultimate stream: two receivers feeding the
/// jitter buffers and one driver delivering frames and audio to the outputs.
pub struct StreamSession {
    config: StreamConfig,
    clock: MonotonicClock,
    buffers: Arc<NetworkBuffer>,
    assembler: Arc<Mutex<FrameAssembler>>,
    stats: Arc<SessionStats>,
    active: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
    video_addr: Option<SocketAddr>,
    audio_addr: Option<SocketAddr>,
}

impl StreamSession {
    pub fn new(config: StreamConfig) -> Self {
        let config = config.clamped();
        let stats = Arc::new(SessionStats::default());

        Self {
            buffers: Arc::new(NetworkBuffer::new(config.max_delay_ms)),
            assembler: Arc::new(Mutex::new(FrameAssembler::new(stats.clone()))),
            stats,
            config,
            clock: MonotonicClock::new(),
            active: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
            video_addr: None,
            audio_addr: None,
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<SessionStats> {
        &self.stats
    }

    pub fn buffers(&self) -> &Arc<NetworkBuffer> {
        &self.buffers
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Bound addresses of the video and audio sockets while running.
    pub fn local_addrs(&self) -> Option<(SocketAddr, SocketAddr)> {
        self.video_addr.zip(self.audio_addr)
    }

    /// Binds both sockets and spawns the receiver and driver threads.
    pub fn start(&mut self, output: MediaOutput) -> Result<()> {
        if self.is_running() {
            warn!("Stream session already running");
            return Ok(());
        }

        let recv_timeout = self.config.recv_timeout();
        let video_socket = bind_udp(self.config.video_bind_addr(), recv_timeout)
            .context("Failed to open video socket")?;
        let audio_socket = bind_udp(self.config.audio_bind_addr(), recv_timeout)
            .context("Failed to open audio socket")?;

        let now_ns = self.clock.now_ns();
        self.buffers.flush();
        self.buffers.set_delay(
            self.config.video_delay_ms,
            self.config.audio_delay_ms,
            now_ns / 1000,
        );
        lock(&self.assembler).reset();
        self.stats.video.clear_last_packet();
        self.stats.audio.clear_last_packet();

        let video_rx = StreamReceiver::new(
            video_socket,
            self.buffers.video().clone(),
            self.stats.video.clone(),
            self.clock,
        );
        let audio_rx = StreamReceiver::new(
            audio_socket,
            self.buffers.audio().clone(),
            self.stats.audio.clone(),
            self.clock,
        );
        self.video_addr = Some(video_rx.local_addr()?);
        self.audio_addr = Some(audio_rx.local_addr()?);

        let driver = PipelineDriver::new(
            self.buffers.clone(),
            self.assembler.clone(),
            self.stats.clone(),
            output,
            now_ns,
        );

        self.active.store(true, Ordering::Release);

        let spawned = self.spawn("c64-video-rx", {
            let active = self.active.clone();
            move || video_rx.run(active)
        })
        .and_then(|_| {
            self.spawn("c64-audio-rx", {
                let active = self.active.clone();
                move || audio_rx.run(active)
            })
        })
        .and_then(|_| {
            let clock = self.clock;
            self.spawn("c64-driver", {
                let active = self.active.clone();
                move || driver.run(clock, active)
            })
        });

        if let Err(e) = spawned {
            self.stop();
            return Err(e);
        }

        info!(
            "Stream session started: video on {}, audio on {}, delay {}/{} ms",
            self.config.video_bind_addr(),
            self.config.audio_bind_addr(),
            self.config.video_delay_ms,
            self.config.audio_delay_ms
        );
        Ok(())
    }

    fn spawn(&mut self, name: &str, f: impl FnOnce() + Send + 'static) -> Result<()> {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(f)
            .with_context(|| format!("Failed to spawn {name} thread"))?;
        self.handles.push(handle);
        Ok(())
    }

    /// Signals all threads to finish and waits for them.
    pub fn stop(&mut self) {
        let was_running = self.active.swap(false, Ordering::AcqRel);

        for handle in self.handles.drain(..) {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                warn!("{} thread panicked", name);
            }
        }

        self.video_addr = None;
        self.audio_addr = None;

        if was_running {
            info!("Stream session stopped");
        }
    }

    /// Changes the buffering delays of a live or stopped session.
    pub fn set_delay(&mut self, video_delay_ms: u32, audio_delay_ms: u32) {
        let clamped = StreamConfig {
            video_delay_ms,
            audio_delay_ms,
            ..self.config.clone()
        }
        .clamped();
        self.config.video_delay_ms = clamped.video_delay_ms;
        self.config.audio_delay_ms = clamped.audio_delay_ms;

        self.buffers.set_delay(
            self.config.video_delay_ms,
            self.config.audio_delay_ms,
            self.clock.now_us(),
        );
    }

    /// Width and height of the current (or last detected) video format.
    pub fn frame_dimensions(&self) -> (u32, u32) {
        let geometry = lock(&self.assembler).geometry();
        (geometry.width, geometry.height)
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.stop();
    }
}
