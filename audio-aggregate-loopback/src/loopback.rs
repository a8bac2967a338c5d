//! Self-clocked virtual duplex device.
//!
//! A named clock thread ticks once per buffer period and delivers exchanges
//! through the registered callback, exactly like a real driver's callback
//! thread. Output written by one cycle is queued and replayed as input a
//! cycle later, so data produced through the engine comes back through it —
//! which is what makes this backend useful for end-to-end tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use audio_aggregate_core::{
    AudioSystem, BufferCallback, ChannelSpec, DeviceStream, Latency, SampleBlock, StreamBuffer,
    StreamError, StreamFormat,
};

/// Cycles of produced output the device holds before dropping the oldest.
const LOOP_QUEUE_BOUND: usize = 8;

struct LoopbackShared {
    callback: Mutex<Option<BufferCallback>>,
    loop_queue: Mutex<VecDeque<SampleBlock>>,
}

/// A full-duplex [`DeviceStream`] with no hardware behind it.
///
/// Push-only: the clock thread is the device's own callback thread, so
/// aggregate use goes through
/// [`BlockingAdapter`](audio_aggregate_core::BlockingAdapter). Input is the
/// output of an earlier cycle when the channel counts match (silence
/// otherwise, and before any output has been produced).
pub struct LoopbackStream {
    shared: Arc<LoopbackShared>,
    running: Arc<AtomicBool>,
    format: StreamFormat,
    interleaved: bool,
    frames: usize,
    clock_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl LoopbackStream {
    pub fn new(sample_rate: u32, channels: ChannelSpec, frames: usize, interleaved: bool) -> Self {
        Self {
            shared: Arc::new(LoopbackShared {
                callback: Mutex::new(None),
                loop_queue: Mutex::new(VecDeque::new()),
            }),
            running: Arc::new(AtomicBool::new(false)),
            format: StreamFormat {
                sample_rate,
                channels,
            },
            interleaved,
            frames,
            clock_handle: Mutex::new(None),
        }
    }

    fn period(&self) -> Duration {
        Duration::from_secs_f64(self.frames as f64 / f64::from(self.format.sample_rate))
    }
}

impl DeviceStream for LoopbackStream {
    fn start(&mut self) -> Result<(), StreamError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(StreamError::AlreadyRunning);
        }
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let shared = Arc::clone(&self.shared);
        let interleaved = self.interleaved;
        let channels = self.format.channels;
        let frames = self.frames;
        let period = self.period();

        let handle = thread::Builder::new()
            .name("loopback-clock".into())
            .spawn(move || {
                clock_loop(&running, &shared, interleaved, channels, frames, period);
            })
            .map_err(|e| StreamError::Unknown(format!("failed to spawn clock thread: {e}")))?;

        *self.clock_handle.lock() = Some(handle);
        log::debug!(
            "loopback clock running: {} frames @ {} Hz",
            self.frames,
            self.format.sample_rate
        );
        Ok(())
    }

    fn stop(&mut self) -> Result<(), StreamError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.clock_handle.lock().take() {
            let _ = handle.join();
        }
        self.shared.loop_queue.lock().clear();
        log::debug!("loopback clock stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn request_stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn frames(&self) -> Result<usize, StreamError> {
        Ok(self.frames)
    }

    fn format(&self) -> StreamFormat {
        self.format
    }

    fn interleaved(&self) -> bool {
        self.interleaved
    }

    fn system(&self) -> AudioSystem {
        AudioSystem::Loopback
    }

    fn latency(&self) -> Result<Latency, StreamError> {
        let period_ms = self.frames as f64 * 1000.0 / f64::from(self.format.sample_rate);
        let queued = self.shared.loop_queue.lock().len() as f64;
        Ok(Latency::new(period_ms * (queued + 1.0), period_ms))
    }

    fn set_buffer_callback(&mut self, callback: BufferCallback) {
        *self.shared.callback.lock() = Some(callback);
    }
}

impl Drop for LoopbackStream {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.clock_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

/// Clock loop running on the dedicated device thread.
fn clock_loop(
    running: &AtomicBool,
    shared: &LoopbackShared,
    interleaved: bool,
    channels: ChannelSpec,
    frames: usize,
    period: Duration,
) {
    let inputs = channels.inputs as usize;
    let outputs = channels.outputs as usize;
    while running.load(Ordering::SeqCst) {
        thread::sleep(period);
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let looped = if inputs == outputs && inputs > 0 {
            shared.loop_queue.lock().pop_front()
        } else {
            None
        };
        let input = looped.unwrap_or_else(|| SampleBlock::new(interleaved, inputs, frames));
        let mut output = SampleBlock::new(interleaved, outputs, frames);

        let callback = shared.callback.lock().clone();
        if let Some(callback) = callback {
            let mut buffer = StreamBuffer::new(
                frames,
                (inputs > 0).then(|| input.as_view()),
                (outputs > 0).then(|| output.as_view_mut()),
            );
            callback(&mut buffer);
        }

        if outputs > 0 {
            let mut queue = shared.loop_queue.lock();
            if queue.len() >= LOOP_QUEUE_BOUND {
                queue.pop_front();
            }
            queue.push_back(output);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn clock_thread_delivers_exchanges() {
        let mut stream = LoopbackStream::new(48_000, ChannelSpec::new(2, 2), 96, true);
        let cycles = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&cycles);
        stream.set_buffer_callback(Arc::new(move |buffer: &mut StreamBuffer<'_>| {
            assert_eq!(buffer.frames, 96);
            count.fetch_add(1, Ordering::SeqCst);
        }));

        stream.start().unwrap();
        assert!(stream.is_running());
        assert_eq!(stream.start(), Err(StreamError::AlreadyRunning));

        thread::sleep(Duration::from_millis(200));
        stream.stop().unwrap();
        assert!(cycles.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn output_loops_back_as_input() {
        let mut stream = LoopbackStream::new(48_000, ChannelSpec::new(1, 1), 48, true);
        let heard_own_output = Arc::new(AtomicBool::new(false));
        let heard = Arc::clone(&heard_own_output);
        stream.set_buffer_callback(Arc::new(move |buffer: &mut StreamBuffer<'_>| {
            if let Some(audio_aggregate_core::BlockRef::Interleaved(samples)) = buffer.input {
                if samples.iter().any(|s| *s == 0.5) {
                    heard.store(true, Ordering::SeqCst);
                }
            }
            if let Some(audio_aggregate_core::BlockMut::Interleaved(samples)) =
                buffer.output.as_mut()
            {
                samples.fill(0.5);
            }
        }));

        stream.start().unwrap();
        thread::sleep(Duration::from_millis(200));
        stream.stop().unwrap();
        assert!(heard_own_output.load(Ordering::SeqCst));
    }

    #[test]
    fn latency_reports_at_least_one_period() {
        let stream = LoopbackStream::new(48_000, ChannelSpec::new(2, 2), 480, true);
        let latency = stream.latency().unwrap();
        assert!(latency.input_ms >= 10.0);
        assert!(latency.output_ms >= 10.0);
    }
}
