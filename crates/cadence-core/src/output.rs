//! cpal-backed audio output adapter.
//!
//! Reference implementation of the output-subsystem collaborator: opens the
//! default device as an interleaved s16 stream in the driver's output format
//! and pumps [`AudioRenderDriver::fill`] from the cpal data callback. The
//! core engine never depends on this module; it exists so an embedding
//! application gets working audio without writing its own adapter.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::audio::{AudioDecoder, AudioError};
use crate::audio_driver::AudioRenderDriver;

/// Owns the cpal stream driving an [`AudioRenderDriver`].
///
/// The stream stops when this is dropped.
pub struct CpalOutput {
    _stream: cpal::Stream,
}

impl CpalOutput {
    /// Opens the default output device and starts pulling from `driver`.
    pub fn new<D: AudioDecoder + 'static>(
        mut driver: AudioRenderDriver<D>,
    ) -> Result<Self, AudioError> {
        let format = driver.output_format();
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::NoOutputDevice("no default output device".to_string()))?;

        let config = cpal::StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    let written = driver.fill(data);
                    // Shortfall plays as silence until the next callback.
                    data[written..].fill(0);
                },
                |err| tracing::error!("cpal output error: {err}"),
                None,
            )
            .map_err(|e| AudioError::OutputStream(format!("failed to build stream: {e}")))?;

        stream
            .play()
            .map_err(|e| AudioError::OutputStream(format!("failed to start stream: {e}")))?;

        tracing::info!(
            "audio output started (cpal, {}Hz, {}ch, s16)",
            format.sample_rate,
            format.channels,
        );

        Ok(Self { _stream: stream })
    }
}
