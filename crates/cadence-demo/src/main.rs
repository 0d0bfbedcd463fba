//! Headless A/V sync baseline measurement.
//!
//! Runs a playback session with synthetic media: a video "decoder" that
//! produces gray frames at 30fps and an audio "decoder" that produces a sine
//! tone, wired through the real queues, clocks, and scheduler threads. Runs
//! for a set duration, reports drift once per second, and prints a final
//! sync-quality summary.
//!
//! Usage:
//!   cargo run -p cadence-demo              # 10 second run
//!   cargo run -p cadence-demo -- 30        # 30 second run

use std::f32::consts::TAU;
use std::time::{Duration, Instant};

use cadence_core::{
    AudioDecodeStep, AudioDecoder, AudioError, AudioPcm, DecodedVideo, FrameImage, FramePresenter,
    Packet, Picture, PixelFormat, PlaybackSession, SampleBuffer, SampleLayout, SessionConfig,
    TimeBase, VideoDecoder, VideoError,
};

/// Microsecond stream ticks.
const TB_US: TimeBase = TimeBase {
    num: 1,
    den: 1_000_000,
};

/// 30fps frame period in ticks.
const FRAME_TICKS: i64 = 33_333;

const SAMPLE_RATE: u32 = 48_000;
const CHANNELS: u16 = 2;

/// Default run duration in seconds.
const DEFAULT_DURATION_SECS: u64 = 10;

/// Synthetic video decoder: payload carries the frame index, the "image" is a
/// flat gray whose shade cycles with it.
struct SyntheticVideoDecoder;

impl VideoDecoder for SyntheticVideoDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Option<DecodedVideo>, VideoError> {
        let index = packet.data.first().copied().unwrap_or(0);
        let shade = 64 + (index % 128);
        Ok(Some(DecodedVideo {
            image: FrameImage::new(PixelFormat::Rgba8, vec![shade; 64 * 36 * 4]),
            width: 64,
            height: 36,
            pts: packet.pts,
            repeat: 0,
        }))
    }
}

/// Synthetic audio decoder: packet payload is raw f32 sine samples.
struct SyntheticAudioDecoder;

impl AudioDecoder for SyntheticAudioDecoder {
    fn decode(&mut self, data: &[u8]) -> Result<AudioDecodeStep, AudioError> {
        let samples: Vec<f32> = data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(AudioDecodeStep {
            consumed: data.len(),
            pcm: Some(AudioPcm {
                sample_rate: SAMPLE_RATE,
                channels: CHANNELS,
                layout: SampleLayout::Interleaved,
                samples: SampleBuffer::F32(samples),
            }),
        })
    }
}

/// Presenter that forwards presented timestamps to the reporter.
struct ReportingPresenter {
    sender: crossbeam_channel::Sender<f64>,
}

impl FramePresenter for ReportingPresenter {
    fn present(&mut self, picture: &Picture) {
        let _ = self.sender.send(picture.pts);
    }
}

/// One 100ms packet of 440Hz stereo sine, stamped at `pts_ms`.
fn sine_packet(pts_ms: i64) -> Packet {
    let frames = SAMPLE_RATE as usize / 10;
    let mut bytes = Vec::with_capacity(frames * CHANNELS as usize * 4);
    for i in 0..frames {
        let t = (pts_ms as f32 / 1000.0) + i as f32 / SAMPLE_RATE as f32;
        let value = (t * 440.0 * TAU).sin() * 0.2;
        for _ in 0..CHANNELS {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
    }
    Packet::new(bytes, pts_ms * 1000, TB_US)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let duration_secs = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(DEFAULT_DURATION_SECS);
    let run_for = Duration::from_secs(duration_secs);

    println!("A/V sync baseline: synthetic 30fps video + 440Hz tone, {duration_secs}s run");

    let mut session = PlaybackSession::new(SessionConfig::default());

    // Feed the whole program up front; the picture queue's backpressure
    // keeps the decode thread from racing ahead of presentation.
    let total_frames = duration_secs as i64 * 30 + 30;
    for i in 0..total_frames {
        let packet = Packet::new(vec![(i % 256) as u8], i * FRAME_TICKS, TB_US);
        if session.video_packets().put(packet).is_err() {
            break;
        }
    }
    session.video_packets().finish();

    let total_audio_packets = duration_secs as i64 * 10 + 10;
    for i in 0..total_audio_packets {
        if session.audio_packets().put(sine_packet(i * 100)).is_err() {
            break;
        }
    }
    session.audio_packets().finish();

    let (sender, receiver) = crossbeam_channel::unbounded();
    session.start_video(SyntheticVideoDecoder);
    session.start_refresh(ReportingPresenter { sender });

    let driver = session.audio_driver(SyntheticAudioDecoder);

    #[cfg(feature = "cpal-output")]
    let _output = match cadence_core::CpalOutput::new(driver) {
        Ok(output) => Some(output),
        Err(e) => {
            tracing::warn!("audio output unavailable, running silent: {e}");
            None
        }
    };

    // Without a device, emulate the output subsystem: pull 10ms of PCM
    // every 10ms so the audio clock advances in real time.
    #[cfg(not(feature = "cpal-output"))]
    let callback_thread = {
        let mut driver = driver;
        let ticks = duration_secs * 100 + 100;
        std::thread::spawn(move || {
            let mut buf = vec![0i16; SAMPLE_RATE as usize / 100 * CHANNELS as usize];
            for _ in 0..ticks {
                driver.fill(&mut buf);
                std::thread::sleep(Duration::from_millis(10));
            }
        })
    };

    let start = Instant::now();
    let mut presented: u64 = 0;
    let mut last_report = Instant::now();
    while start.elapsed() < run_for {
        while receiver.try_recv().is_ok() {
            presented += 1;
        }
        if last_report.elapsed() >= Duration::from_secs(1) {
            let snapshot = session.metrics().snapshot();
            tracing::info!("{presented} frames presented | {snapshot}");
            last_report = Instant::now();
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    let snapshot = session.metrics().snapshot();
    session.stop();
    #[cfg(not(feature = "cpal-output"))]
    callback_thread.join().ok();

    println!();
    println!("==== sync baseline result ====");
    println!("frames presented : {presented}");
    println!("drift samples    : {}", snapshot.sample_count);
    println!("avg drift        : {:.1}ms", snapshot.avg_drift_ms());
    println!("peak drift       : {}ms", snapshot.max_drift_ms());
    println!("out of sync      : {:.1}%", snapshot.out_of_sync_percentage());
    println!("quality          : {}", snapshot.quality_summary());
}
