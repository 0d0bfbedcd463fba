//! Video decode loop.
//!
//! A dedicated thread that drains the video packet queue, runs the external
//! decoder, stamps each frame with a presentation timestamp, and hands it to
//! the picture queue. Pushing into a full picture queue blocks the loop,
//! which is the intended backpressure when decode outruns display.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::packet::{Dequeue, PacketQueue, TimeBase};
use crate::picture::PictureQueue;
use crate::session::{PlaybackState, StateCell};
use crate::video::{Picture, VideoDecoder};

/// Sleep quantum while paused or idle, keeping state changes observable.
const IDLE_QUANTUM: Duration = Duration::from_millis(10);

/// Derives presentation timestamps for frames that may lack their own.
///
/// A frame that carries a timestamp resets the predicted clock to it; a frame
/// without one inherits the prediction. Either way the prediction then
/// advances by the decoder's repeated-picture hint (half a tick period per
/// repeat), so a run of untimed frames still moves forward instead of
/// stacking on one instant.
#[derive(Debug, Default)]
struct PtsPredictor {
    next: f64,
}

impl PtsPredictor {
    fn synchronize(&mut self, frame_pts: Option<i64>, repeat: u32, time_base: TimeBase) -> f64 {
        let pts = match frame_pts {
            Some(ticks) => {
                let seconds = time_base.to_seconds(ticks);
                self.next = seconds;
                seconds
            }
            None => self.next,
        };
        self.next += repeat as f64 * (time_base.tick_seconds() * 0.5);
        pts
    }
}

/// Owner handle for the decode thread. Dropping it joins the thread; the
/// session stops the shared state first so the join cannot hang.
pub struct VideoDecodeThread {
    handle: Option<JoinHandle<()>>,
}

impl VideoDecodeThread {
    pub(crate) fn spawn<D: VideoDecoder + 'static>(
        decoder: D,
        packets: Arc<PacketQueue>,
        pictures: Arc<PictureQueue>,
        state: Arc<StateCell>,
    ) -> Self {
        let handle = thread::spawn(move || decode_loop(decoder, packets, pictures, state));
        Self {
            handle: Some(handle),
        }
    }
}

impl Drop for VideoDecodeThread {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn decode_loop<D: VideoDecoder>(
    mut decoder: D,
    packets: Arc<PacketQueue>,
    pictures: Arc<PictureQueue>,
    state: Arc<StateCell>,
) {
    let mut predictor = PtsPredictor::default();
    let mut logged_ended = false;

    loop {
        match state.get() {
            PlaybackState::Stopped => break,
            PlaybackState::Paused => {
                thread::sleep(IDLE_QUANTUM);
                continue;
            }
            PlaybackState::Playing => {}
        }

        let packet = match packets.get() {
            Dequeue::Packet(packet) => packet,
            Dequeue::Closed => {
                tracing::debug!("video packet queue closed, decode loop exiting");
                break;
            }
            Dequeue::Ended => {
                if !logged_ended {
                    tracing::debug!("video stream ended, decode loop idling");
                    logged_ended = true;
                }
                thread::sleep(IDLE_QUANTUM);
                continue;
            }
            // The blocking get never reports Empty.
            Dequeue::Empty => continue,
        };

        let decoded = match decoder.decode(&packet) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                tracing::error!("video decode error, skipping packet: {e}");
                continue;
            }
        };

        let pts = predictor.synchronize(decoded.pts, decoded.repeat, packet.time_base);
        tracing::trace!("decoded frame pts={pts:.3}");

        let picture = Picture {
            image: decoded.image,
            width: decoded.width,
            height: decoded.height,
            pts,
        };
        if !pictures.push(picture) {
            tracing::debug!("picture queue stopped, decode loop exiting");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;
    use crate::video::{DecodedVideo, FrameImage, PixelFormat, VideoError};

    const TB: TimeBase = TimeBase {
        num: 1,
        den: 1000,
    };

    #[test]
    fn timestamped_frame_resets_prediction() {
        let mut predictor = PtsPredictor::default();
        assert_eq!(predictor.synchronize(Some(500), 0, TB), 0.5);
        assert_eq!(predictor.synchronize(Some(1000), 0, TB), 1.0);
    }

    #[test]
    fn untimed_frame_inherits_prediction() {
        let mut predictor = PtsPredictor::default();
        predictor.synchronize(Some(1000), 0, TB);
        // No timestamp, no repeat hint: same predicted instant.
        assert_eq!(predictor.synchronize(None, 0, TB), 1.0);
        assert_eq!(predictor.synchronize(None, 0, TB), 1.0);
    }

    #[test]
    fn repeat_hint_advances_by_half_ticks() {
        let mut predictor = PtsPredictor::default();
        predictor.synchronize(Some(0), 2, TB);
        // Two repeats at 1ms ticks pushed the prediction forward 1ms.
        let pts = predictor.synchronize(None, 0, TB);
        assert!((pts - 0.001).abs() < 1e-12);
    }

    struct CountingDecoder {
        frames: u32,
    }

    impl VideoDecoder for CountingDecoder {
        fn decode(&mut self, packet: &Packet) -> Result<Option<DecodedVideo>, VideoError> {
            if packet.data.is_empty() {
                return Err(VideoError::DecodeFailed("empty packet".into()));
            }
            self.frames += 1;
            Ok(Some(DecodedVideo {
                image: FrameImage::new(PixelFormat::Rgba8, vec![0; 4]),
                width: 1,
                height: 1,
                pts: packet.pts,
                repeat: 0,
            }))
        }
    }

    #[test]
    fn decode_errors_skip_packet_and_continue() {
        let packets = Arc::new(PacketQueue::new());
        let pictures = Arc::new(PictureQueue::new(8));
        let state = Arc::new(StateCell::new(PlaybackState::Playing));

        packets.put(Packet::new(vec![1], 0, TB)).unwrap();
        packets.put(Packet::new(vec![], 33, TB)).unwrap(); // decode error
        packets.put(Packet::new(vec![1], 66, TB)).unwrap();

        let thread = VideoDecodeThread::spawn(
            CountingDecoder { frames: 0 },
            Arc::clone(&packets),
            Arc::clone(&pictures),
            Arc::clone(&state),
        );

        // Both good packets become pictures; the corrupt one is skipped.
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while pictures.len() < 2 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(pictures.len(), 2);
        assert_eq!(pictures.peek().unwrap().pts, 0.0);

        state.set(PlaybackState::Stopped);
        packets.abort();
        drop(thread);
    }
}
