use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use c64_stream::audio::AudioBlock;
use c64_stream::io::ControlClient;
use c64_stream::video::VideoFrame;
use c64_stream::{MediaOutput, Pushable, ReconnectRequest, StreamConfig, StreamSession};
use crossbeam::channel::{Receiver, RecvTimeoutError, bounded};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Counts what the session delivers; stands in for a renderer and audio output.
#[derive(Default)]
struct ReportingSink {
    frames: AtomicU64,
    placeholders: AtomicU64,
    audio_blocks: AtomicU64,
    last_timestamp_ns: AtomicU64,
}

impl ReportingSink {
    fn report(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        let frames = self.frames.swap(0, Ordering::Relaxed);
        let placeholders = self.placeholders.swap(0, Ordering::Relaxed);
        let blocks = self.audio_blocks.swap(0, Ordering::Relaxed);
        info!(
            "Output: {:.1} fps, {} placeholder frames, {:.0} audio blocks/s, last pts {:.3} s",
            frames as f64 / secs,
            placeholders,
            blocks as f64 / secs,
            self.last_timestamp_ns.load(Ordering::Relaxed) as f64 / 1e9
        );
    }
}

impl Pushable<VideoFrame> for ReportingSink {
    fn push(&self, frame: VideoFrame) {
        if frame.is_placeholder() {
            self.placeholders.fetch_add(1, Ordering::Relaxed);
        } else {
            self.frames.fetch_add(1, Ordering::Relaxed);
            self.last_timestamp_ns
                .store(frame.timestamp_ns, Ordering::Relaxed);
        }
    }
}

impl Pushable<AudioBlock> for ReportingSink {
    fn push(&self, _block: AudioBlock) {
        self.audio_blocks.fetch_add(1, Ordering::Relaxed);
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run() {
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => StreamConfig::load(&path)?,
        None => {
            info!("No config file given, using defaults");
            StreamConfig::default()
        }
    };
    info!("Starting c64-stream with {:?}", config);

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            running.store(false, Ordering::Release);
        })
        .context("Error setting Ctrl-C handler")?;
    }

    let mut control = ControlClient::from_config(&config)?;
    if let Some(control) = control.as_mut() {
        if let Err(e) = control.start_streams() {
            warn!("Could not start streams on {}: {:#}", control.host(), e);
        }
    }

    let (reconnect_tx, reconnect_rx) = bounded::<ReconnectRequest>(1);
    let sink = Arc::new(ReportingSink::default());
    let output = MediaOutput {
        video: sink.clone(),
        audio: sink.clone(),
        reconnect: Arc::new(reconnect_tx),
    };

    let mut session = StreamSession::new(config);
    session.start(output)?;

    let reconnect_handle = {
        let running = running.clone();
        thread::Builder::new()
            .name("c64-reconnect".to_string())
            .spawn(move || run_reconnect(reconnect_rx, control, running))
            .context("Failed to spawn reconnect thread")?
    };

    let mut last_report = Instant::now();
    while running.load(Ordering::Acquire) {
        thread::sleep(Duration::from_millis(100));
        if last_report.elapsed() >= REPORT_INTERVAL {
            sink.report(last_report.elapsed());
            last_report = Instant::now();
        }
    }

    info!("Shutting down");
    session.stop();
    if reconnect_handle.join().is_err() {
        warn!("Reconnect thread panicked");
    }
    Ok(())
}

fn run_reconnect(
    requests: Receiver<ReconnectRequest>,
    mut control: Option<ControlClient>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Acquire) {
        match requests.recv_timeout(Duration::from_millis(200)) {
            Ok(request) => match control.as_mut() {
                Some(control) => control.handle(request),
                None => info!(
                    "No video for {} ms; no device host configured, waiting",
                    request.silent_for.as_millis()
                ),
            },
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if let Some(control) = control {
        if let Err(e) = control.stop_streams() {
            warn!("Could not stop streams: {:#}", e);
        }
    }
}
