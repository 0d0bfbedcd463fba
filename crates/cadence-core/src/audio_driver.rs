//! Audio render driver.
//!
//! The audio output subsystem owns the cadence here: whenever it wants more
//! samples it calls [`AudioRenderDriver::fill`] from its own (possibly
//! realtime) thread. The driver decodes incrementally from the packet it
//! currently holds, converts to the fixed output format, advances the audio
//! clock by the produced duration, and never blocks the caller — if no packet
//! is buffered it returns zero samples and the output stays silent until the
//! next callback.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::audio::{
    AudioDecoder, AudioOutputFormat, AudioPcm, SampleBuffer, SampleFormat, SampleLayout,
};
use crate::clock::ClockSet;
use crate::packet::{Dequeue, PacketQueue};
use crate::session::{PlaybackState, StateCell};

/// Volume and mute control, shareable with UI code.
#[derive(Clone)]
pub struct AudioDriverHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    /// Volume level, 0-100
    volume: AtomicU32,
    muted: AtomicBool,
}

impl AudioDriverHandle {
    fn new() -> Self {
        Self {
            inner: Arc::new(HandleInner {
                volume: AtomicU32::new(100),
                muted: AtomicBool::new(false),
            }),
        }
    }

    /// Current volume (0-100).
    pub fn volume(&self) -> u32 {
        self.inner.volume.load(Ordering::Relaxed)
    }

    /// Sets the volume, clamped to 0-100.
    pub fn set_volume(&self, volume: u32) {
        self.inner.volume.store(volume.min(100), Ordering::Relaxed);
    }

    /// Returns whether output is muted.
    pub fn is_muted(&self) -> bool {
        self.inner.muted.load(Ordering::Relaxed)
    }

    /// Sets the mute state.
    pub fn set_muted(&self, muted: bool) {
        self.inner.muted.store(muted, Ordering::Relaxed);
    }

    /// Gain factor (0.0-1.0) accounting for mute.
    pub fn effective_gain(&self) -> f32 {
        if self.is_muted() {
            0.0
        } else {
            self.volume() as f32 / 100.0
        }
    }
}

/// Source-side format the conversion pipeline was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SourceFormat {
    sample_rate: u32,
    channels: u16,
    format: SampleFormat,
    layout: SampleLayout,
}

impl SourceFormat {
    fn of(pcm: &AudioPcm) -> Self {
        Self {
            sample_rate: pcm.sample_rate,
            channels: pcm.channels,
            format: pcm.samples.format(),
            layout: pcm.layout,
        }
    }
}

/// Lazily initialized conversion pipeline.
///
/// Built from the first decoded frame's format; rebuilt whenever a decoded
/// frame no longer matches, which is how mid-stream format changes are
/// absorbed.
enum Pipeline {
    Uninitialized,
    Ready(Converter),
}

struct Converter {
    source: SourceFormat,
}

impl Converter {
    /// Converts one decoded block to interleaved s16 in the target format.
    fn convert(&self, pcm: &AudioPcm, target: &AudioOutputFormat) -> Vec<i16> {
        let frames = pcm.frames();
        if frames == 0 {
            return Vec::new();
        }
        let interleaved = to_interleaved_f32(pcm, frames);
        let remixed = remix_channels(&interleaved, pcm.channels as usize, target.channels as usize);
        let resampled = resample_linear(
            &remixed,
            target.channels as usize,
            pcm.sample_rate,
            target.sample_rate,
        );
        resampled
            .iter()
            .map(|s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
            .collect()
    }
}

/// Normalizes any supported sample encoding/layout to interleaved f32.
fn to_interleaved_f32(pcm: &AudioPcm, frames: usize) -> Vec<f32> {
    let channels = pcm.channels as usize;
    let mut out = Vec::with_capacity(frames * channels);
    match (&pcm.samples, pcm.layout) {
        (SampleBuffer::F32(v), SampleLayout::Interleaved) => {
            out.extend_from_slice(&v[..frames * channels]);
        }
        (SampleBuffer::I16(v), SampleLayout::Interleaved) => {
            out.extend(v[..frames * channels].iter().map(|s| *s as f32 / 32768.0));
        }
        (SampleBuffer::F32(v), SampleLayout::Planar) => {
            for frame in 0..frames {
                for channel in 0..channels {
                    out.push(v[channel * frames + frame]);
                }
            }
        }
        (SampleBuffer::I16(v), SampleLayout::Planar) => {
            for frame in 0..frames {
                for channel in 0..channels {
                    out.push(v[channel * frames + frame] as f32 / 32768.0);
                }
            }
        }
    }
    out
}

/// Maps interleaved frames from `src_ch` to `dst_ch` channels.
///
/// Downmix to mono averages; upmix repeats the last source channel.
fn remix_channels(samples: &[f32], src_ch: usize, dst_ch: usize) -> Vec<f32> {
    if src_ch == dst_ch || src_ch == 0 {
        return samples.to_vec();
    }
    let frames = samples.len() / src_ch;
    let mut out = Vec::with_capacity(frames * dst_ch);
    for frame in 0..frames {
        let base = frame * src_ch;
        if dst_ch == 1 {
            let sum: f32 = samples[base..base + src_ch].iter().sum();
            out.push(sum / src_ch as f32);
        } else {
            for channel in 0..dst_ch {
                out.push(samples[base + channel.min(src_ch - 1)]);
            }
        }
    }
    out
}

/// Linear-interpolation rate conversion on interleaved frames.
fn resample_linear(samples: &[f32], channels: usize, src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || src_rate == 0 || channels == 0 {
        return samples.to_vec();
    }
    let src_frames = samples.len() / channels;
    if src_frames == 0 {
        return Vec::new();
    }
    let dst_frames =
        ((src_frames as u64 * dst_rate as u64) / src_rate as u64).max(1) as usize;
    let step = src_frames as f64 / dst_frames as f64;
    let mut out = Vec::with_capacity(dst_frames * channels);
    for i in 0..dst_frames {
        let pos = i as f64 * step;
        let i0 = pos as usize;
        let i1 = (i0 + 1).min(src_frames - 1);
        let frac = (pos - i0 as f64) as f32;
        for channel in 0..channels {
            let a = samples[i0 * channels + channel];
            let b = samples[i1 * channels + channel];
            out.push(a + (b - a) * frac);
        }
    }
    out
}

struct HeldPacket {
    data: Vec<u8>,
    offset: usize,
}

/// Pull-driven audio decode and conversion front end.
///
/// Constructed by [`PlaybackSession::audio_driver`](crate::PlaybackSession::audio_driver);
/// the output subsystem calls [`fill`](Self::fill) from its data callback.
pub struct AudioRenderDriver<D: AudioDecoder> {
    decoder: D,
    output: AudioOutputFormat,
    packets: Arc<PacketQueue>,
    clocks: Arc<ClockSet>,
    state: Arc<StateCell>,
    handle: AudioDriverHandle,
    pipeline: Pipeline,
    held: Option<HeldPacket>,
    /// Converted samples not yet copied out
    pending: Vec<i16>,
    pending_pos: usize,
    logged_no_data: bool,
}

impl<D: AudioDecoder> AudioRenderDriver<D> {
    pub(crate) fn new(
        decoder: D,
        output: AudioOutputFormat,
        packets: Arc<PacketQueue>,
        clocks: Arc<ClockSet>,
        state: Arc<StateCell>,
    ) -> Self {
        Self {
            decoder,
            output,
            packets,
            clocks,
            state,
            handle: AudioDriverHandle::new(),
            pipeline: Pipeline::Uninitialized,
            held: None,
            pending: Vec::new(),
            pending_pos: 0,
            logged_no_data: false,
        }
    }

    /// The volume/mute control handle.
    pub fn handle(&self) -> AudioDriverHandle {
        self.handle.clone()
    }

    /// The fixed format `fill` delivers.
    pub fn output_format(&self) -> AudioOutputFormat {
        self.output
    }

    /// Fills `out` with interleaved s16 samples, returning how many were
    /// written. Never blocks: a shortfall means the queue ran dry and the
    /// remainder of `out` is untouched.
    pub fn fill(&mut self, out: &mut [i16]) -> usize {
        if self.state.get() != PlaybackState::Playing {
            return 0;
        }
        let gain = self.handle.effective_gain();
        let mut written = 0;
        while written < out.len() {
            if self.pending_pos >= self.pending.len() && !self.decode_more() {
                break;
            }
            let available = &self.pending[self.pending_pos..];
            let n = available.len().min(out.len() - written);
            if gain >= 1.0 {
                out[written..written + n].copy_from_slice(&available[..n]);
            } else {
                for (dst, src) in out[written..written + n].iter_mut().zip(available) {
                    *dst = (*src as f32 * gain) as i16;
                }
            }
            self.pending_pos += n;
            written += n;
        }
        if written > 0 {
            self.clocks
                .audio()
                .record_buffer(written * 2, self.clocks.now());
            self.logged_no_data = false;
        }
        written
    }

    /// Decodes until a converted block is pending. Returns false when the
    /// packet queue has nothing for us right now.
    fn decode_more(&mut self) -> bool {
        loop {
            let exhausted = match &self.held {
                Some(held) => held.offset >= held.data.len(),
                None => true,
            };
            if exhausted {
                match self.packets.try_get() {
                    Dequeue::Packet(packet) => {
                        if let Some(seconds) = packet.pts_seconds() {
                            self.clocks.audio().set_position(seconds);
                        }
                        self.held = Some(HeldPacket {
                            data: packet.data,
                            offset: 0,
                        });
                    }
                    Dequeue::Empty => return false,
                    Dequeue::Ended | Dequeue::Closed => {
                        if !self.logged_no_data {
                            tracing::debug!("audio packet queue has no more data");
                            self.logged_no_data = true;
                        }
                        return false;
                    }
                }
            }
            let Some(held) = self.held.as_ref() else {
                return false;
            };

            let step = match self.decoder.decode(&held.data[held.offset..]) {
                Ok(step) => step,
                Err(e) => {
                    tracing::error!("audio decode error, discarding packet: {e}");
                    self.held = None;
                    continue;
                }
            };
            if let Some(held) = self.held.as_mut() {
                held.offset = (held.offset + step.consumed).min(held.data.len());
            }
            if step.consumed == 0 && step.pcm.is_none() {
                tracing::warn!("audio decoder made no progress, discarding packet");
                self.held = None;
                continue;
            }
            let Some(pcm) = step.pcm else {
                continue;
            };

            self.ensure_pipeline(&pcm);
            let Pipeline::Ready(converter) = &self.pipeline else {
                continue;
            };
            let samples = converter.convert(&pcm, &self.output);
            if samples.is_empty() {
                if step.consumed == 0 {
                    // Empty frame and no input progress: drop the packet.
                    self.held = None;
                }
                continue;
            }
            self.clocks.audio().advance_bytes(samples.len() * 2);
            self.pending = samples;
            self.pending_pos = 0;
            return true;
        }
    }

    /// Builds or rebuilds the conversion pipeline for the frame's format.
    fn ensure_pipeline(&mut self, pcm: &AudioPcm) {
        let source = SourceFormat::of(pcm);
        let rebuild = match &self.pipeline {
            Pipeline::Uninitialized => true,
            Pipeline::Ready(converter) => converter.source != source,
        };
        if rebuild {
            tracing::info!(
                "audio pipeline configured: {}Hz {}ch {:?}/{:?} -> {}Hz {}ch s16",
                source.sample_rate,
                source.channels,
                source.format,
                source.layout,
                self.output.sample_rate,
                self.output.channels,
            );
            self.pipeline = Pipeline::Ready(Converter { source });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioDecodeStep, AudioError};
    use crate::clock::SyncMode;
    use crate::packet::{Packet, TimeBase};

    /// Treats packet payload bytes as i16 little-endian stereo samples.
    struct PassthroughDecoder;

    impl AudioDecoder for PassthroughDecoder {
        fn decode(&mut self, data: &[u8]) -> Result<AudioDecodeStep, AudioError> {
            let samples: Vec<i16> = data
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]))
                .collect();
            Ok(AudioDecodeStep {
                consumed: data.len(),
                pcm: Some(AudioPcm {
                    sample_rate: 48_000,
                    channels: 2,
                    layout: SampleLayout::Interleaved,
                    samples: SampleBuffer::I16(samples),
                }),
            })
        }
    }

    fn driver(decoder: impl AudioDecoder) -> AudioRenderDriver<impl AudioDecoder> {
        let packets = Arc::new(PacketQueue::new());
        let clocks = Arc::new(ClockSet::new(SyncMode::AudioMaster));
        let output = AudioOutputFormat {
            sample_rate: 48_000,
            channels: 2,
        };
        clocks.audio().set_format(&output);
        AudioRenderDriver::new(
            decoder,
            output,
            packets,
            clocks,
            Arc::new(StateCell::new(PlaybackState::Playing)),
        )
    }

    fn pcm_packet(samples: &[i16], pts_ticks: i64) -> Packet {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Packet::new(bytes, pts_ticks, TimeBase::MICROS)
    }

    #[test]
    fn fill_delivers_decoded_samples() {
        let mut driver = driver(PassthroughDecoder);
        let samples: Vec<i16> = (0..96).collect();
        driver.packets.put(pcm_packet(&samples, 0)).unwrap();

        let mut out = [0i16; 96];
        assert_eq!(driver.fill(&mut out), 96);
        assert_eq!(out[..96], samples[..]);
    }

    #[test]
    fn empty_queue_yields_zero_without_blocking() {
        let mut driver = driver(PassthroughDecoder);
        let mut out = [0i16; 64];
        let start = std::time::Instant::now();
        assert_eq!(driver.fill(&mut out), 0);
        assert!(start.elapsed() < std::time::Duration::from_millis(50));
    }

    #[test]
    fn closed_queue_yields_no_data() {
        let mut driver = driver(PassthroughDecoder);
        driver.packets.abort();
        let mut out = [0i16; 64];
        assert_eq!(driver.fill(&mut out), 0);
        assert_eq!(driver.fill(&mut out), 0);
    }

    #[test]
    fn pause_silences_output() {
        let mut driver = driver(PassthroughDecoder);
        driver.packets.put(pcm_packet(&[1; 32], 0)).unwrap();
        driver.state.set(PlaybackState::Paused);
        let mut out = [0i16; 32];
        assert_eq!(driver.fill(&mut out), 0);
    }

    #[test]
    fn clock_tracks_packet_timestamp() {
        let mut driver = driver(PassthroughDecoder);
        // One packet stamped at 2.0s.
        driver.packets.put(pcm_packet(&[0; 9600], 2_000_000)).unwrap();

        let mut out = [0i16; 9600];
        assert_eq!(driver.fill(&mut out), 9600);

        // Decoded position advanced by the produced duration, and the same
        // duration is still buffered downstream, so the audible position at
        // the fill instant is the packet timestamp.
        let now = driver.clocks.now();
        let pos = driver.clocks.audio().position(now).unwrap();
        assert!((pos - 2.0).abs() < 0.01, "position was {pos}");
    }

    #[test]
    fn volume_scales_and_mute_silences_samples() {
        let mut driver = driver(PassthroughDecoder);
        driver.packets.put(pcm_packet(&[10_000; 32], 0)).unwrap();
        driver.handle().set_volume(50);
        let mut out = [0i16; 32];
        assert_eq!(driver.fill(&mut out), 32);
        assert_eq!(out[0], 5_000);

        driver.packets.put(pcm_packet(&[10_000; 32], 0)).unwrap();
        driver.handle().set_muted(true);
        assert_eq!(driver.fill(&mut out), 32);
        assert_eq!(out[0], 0);
    }

    /// Emits a fixed format regardless of input, switchable mid-test.
    struct FormatDecoder {
        rate: u32,
        channels: u16,
    }

    impl AudioDecoder for FormatDecoder {
        fn decode(&mut self, data: &[u8]) -> Result<AudioDecodeStep, AudioError> {
            Ok(AudioDecodeStep {
                consumed: data.len(),
                pcm: Some(AudioPcm {
                    sample_rate: self.rate,
                    channels: self.channels,
                    layout: SampleLayout::Planar,
                    samples: SampleBuffer::F32(vec![0.5; 480 * self.channels as usize]),
                }),
            })
        }
    }

    #[test]
    fn planar_mono_is_upmixed_and_resampled() {
        let mut driver = driver(FormatDecoder {
            rate: 24_000,
            channels: 1,
        });
        driver.packets.put(pcm_packet(&[0; 16], 0)).unwrap();

        // 480 mono frames at 24kHz become ~960 stereo frames at 48kHz.
        let mut out = [0i16; 2048];
        let written = driver.fill(&mut out);
        assert_eq!(written, 960 * 2);
        assert_eq!(out[0], (0.5f32 * 32767.0) as i16);
        assert_eq!(out[0], out[1]); // both channels carry the mono signal
    }

    #[test]
    fn converter_helpers() {
        // Planar to interleaved.
        let pcm = AudioPcm {
            sample_rate: 48_000,
            channels: 2,
            layout: SampleLayout::Planar,
            samples: SampleBuffer::F32(vec![0.1, 0.2, 0.3, -0.1, -0.2, -0.3]),
        };
        let interleaved = to_interleaved_f32(&pcm, 3);
        assert_eq!(interleaved, vec![0.1, -0.1, 0.2, -0.2, 0.3, -0.3]);

        // Stereo downmix averages.
        let mono = remix_channels(&[0.2, 0.4, 0.6, 0.8], 2, 1);
        assert!((mono[0] - 0.3).abs() < 1e-6);
        assert!((mono[1] - 0.7).abs() < 1e-6);

        // Doubling the rate doubles the frame count.
        let doubled = resample_linear(&[0.0, 1.0], 1, 24_000, 48_000);
        assert_eq!(doubled.len(), 4);
        assert_eq!(doubled[0], 0.0);
    }
}
