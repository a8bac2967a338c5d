//! Multi-device aggregate stream.
//!
//! Combines N independently clocked sub-streams into one logically
//! synchronized virtual stream. One sub-stream is the master (clock source);
//! its callback thread pumps the slaves, weaves every device's channels into
//! a unified buffer, invokes the application callback exactly once per cycle,
//! and distributes the application's output back into per-device ring
//! buffers. Slave callback threads only move data through their own rings.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::buffer::{SampleBlock, StreamBuffer};
use crate::models::error::StreamError;
use crate::models::format::{AudioSystem, ChannelSpec, Latency, StreamFormat};
use crate::processing::ring_buffer::RingBuffer;
use crate::processing::weave::{weave, zero_buffer};
use crate::traits::blocking_stream::BlockingStream;
use crate::traits::device_stream::{BufferCallback, DeviceStream, XRunCallback};

/// Configuration for an aggregate stream.
pub struct AggregateParams {
    /// Index of the sub-stream acting as clock source.
    pub master_index: usize,
    /// Sample layout shared by the aggregate and every sub-stream.
    pub interleaved: bool,
    /// Frames per application buffer exchange.
    pub frames: usize,
    /// The application's buffer callback.
    pub on_buffer: BufferCallback,
    /// The application's under/overrun notification callback.
    pub on_xrun: Option<XRunCallback>,
}

struct SubStream {
    stream: Mutex<Box<dyn BlockingStream>>,
    input_ring: Mutex<RingBuffer>,
    output_ring: Mutex<RingBuffer>,
    channels: ChannelSpec,
}

/// Staging buffers for the master's weave work, touched only from the
/// master's callback thread. The mutex is therefore never contended.
struct WeaveScratch {
    ring_input: SampleBlock,
    ring_output: SampleBlock,
    app_input: SampleBlock,
    app_output: SampleBlock,
}

struct AggregateInner {
    frames: usize,
    interleaved: bool,
    format: StreamFormat,
    master_index: usize,
    running: AtomicBool,
    inside_callback: AtomicUsize,
    subs: Vec<SubStream>,
    scratch: Mutex<WeaveScratch>,
    on_buffer: Mutex<BufferCallback>,
    on_xrun: Option<XRunCallback>,
}

/// A composite stream over N exclusively owned sub-streams.
///
/// Presents the application surface of a single stream (`start`, `stop`,
/// `latency`, one buffer callback, one XRun callback) and implements the
/// full backend capability set itself, so an aggregate can in turn be a
/// sub-stream of an outer aggregate.
pub struct Aggregate {
    inner: Arc<AggregateInner>,
}

impl Aggregate {
    /// Builds an aggregate over already opened sub-streams.
    ///
    /// Fails atomically: every sub-stream is validated (matching mix rate and
    /// layout, master index in range) before any callback is registered, and
    /// on error the streams are simply dropped, never started.
    pub fn new(
        streams: Vec<Box<dyn BlockingStream>>,
        params: AggregateParams,
    ) -> Result<Self, StreamError> {
        if streams.is_empty() {
            return Err(StreamError::InvalidConfig(
                "aggregate requires at least one sub-stream".into(),
            ));
        }
        if params.master_index >= streams.len() {
            return Err(StreamError::InvalidConfig(format!(
                "master index {} out of range for {} sub-streams",
                params.master_index,
                streams.len()
            )));
        }
        if params.frames == 0 {
            return Err(StreamError::InvalidConfig("frame count must be positive".into()));
        }

        let sample_rate = streams[0].format().sample_rate;
        let mut total = ChannelSpec::default();
        for stream in &streams {
            let format = stream.format();
            if format.sample_rate != sample_rate {
                return Err(StreamError::InvalidConfig(format!(
                    "mix rate mismatch: {} vs {}",
                    format.sample_rate, sample_rate
                )));
            }
            if stream.interleaved() != params.interleaved {
                return Err(StreamError::InvalidConfig("sample layout mismatch".into()));
            }
            total.inputs += format.channels.inputs;
            total.outputs += format.channels.outputs;
        }

        let mut subs = Vec::with_capacity(streams.len());
        for stream in streams {
            let channels = stream.format().channels;
            let device_frames = stream.frames()?;
            // Two full exchanges of slack per direction.
            let capacity = 2 * params.frames.max(device_frames);
            subs.push(SubStream {
                input_ring: Mutex::new(RingBuffer::new(
                    params.interleaved,
                    channels.inputs as usize,
                    capacity,
                )),
                output_ring: Mutex::new(RingBuffer::new(
                    params.interleaved,
                    channels.outputs as usize,
                    capacity,
                )),
                channels,
                stream: Mutex::new(stream),
            });
        }

        let inner = Arc::new(AggregateInner {
            frames: params.frames,
            interleaved: params.interleaved,
            format: StreamFormat {
                sample_rate,
                channels: total,
            },
            master_index: params.master_index,
            running: AtomicBool::new(false),
            inside_callback: AtomicUsize::new(0),
            subs,
            scratch: Mutex::new(WeaveScratch {
                ring_input: SampleBlock::new(params.interleaved, total.inputs as usize, params.frames),
                ring_output: SampleBlock::new(params.interleaved, total.outputs as usize, params.frames),
                app_input: SampleBlock::new(params.interleaved, total.inputs as usize, params.frames),
                app_output: SampleBlock::new(params.interleaved, total.outputs as usize, params.frames),
            }),
            on_buffer: Mutex::new(params.on_buffer),
            on_xrun: params.on_xrun,
        });

        for (index, sub) in inner.subs.iter().enumerate() {
            let weak = Arc::downgrade(&inner);
            let callback: BufferCallback = if index == inner.master_index {
                Arc::new(move |buffer: &mut StreamBuffer<'_>| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_master_buffer(index, buffer);
                    }
                })
            } else {
                Arc::new(move |buffer: &mut StreamBuffer<'_>| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_slave_buffer(index, buffer);
                    }
                })
            };
            sub.stream.lock().set_buffer_callback(callback);
        }

        Ok(Self { inner })
    }

    /// Starts every sub-stream as one unit.
    ///
    /// Rings are cleared, slaves start first so they are buffering before the
    /// clock runs, the master starts last. On any failure the already started
    /// slaves are stopped again: the aggregate never ends up half-started.
    pub fn start(&self) -> Result<(), StreamError> {
        let inner = &*self.inner;
        for sub in &inner.subs {
            sub.input_ring.lock().clear();
            sub.output_ring.lock().clear();
        }

        let mut started = Vec::new();
        for index in 0..inner.subs.len() {
            if index == inner.master_index {
                continue;
            }
            if let Err(err) = inner.subs[index].stream.lock().start_slave_buffer() {
                log::warn!("sub-stream {index} failed to start, rolling back: {err}");
                inner.stop_started(&started);
                return Err(err);
            }
            started.push(index);
        }
        if let Err(err) = inner.subs[inner.master_index]
            .stream
            .lock()
            .start_master_buffer()
        {
            log::warn!(
                "master sub-stream {} failed to start, rolling back: {err}",
                inner.master_index
            );
            inner.stop_started(&started);
            return Err(err);
        }

        let was_stopped = inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        assert!(was_stopped, "aggregate started while already running");
        log::debug!(
            "aggregate running: {} sub-streams, master {}",
            inner.subs.len(),
            inner.master_index
        );
        Ok(())
    }

    /// Stops every sub-stream as one unit. Idempotent: a second call returns
    /// success without touching any sub-stream.
    ///
    /// Waits (spinning; callback bodies are microseconds) until no callback
    /// is executing before any sub-stream is told to stop. Every stop is
    /// attempted even after a failure; the first fault is returned.
    pub fn stop(&self) -> Result<(), StreamError> {
        let inner = &*self.inner;
        if inner
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        while inner.inside_callback.load(Ordering::SeqCst) != 0 {
            std::hint::spin_loop();
        }
        assert!(inner.master_index < inner.subs.len(), "master index out of range");

        let mut first_fault = None;
        if let Err(err) = inner.subs[inner.master_index].stream.lock().stop() {
            log::error!("master sub-stream {} stop failed: {err}", inner.master_index);
            first_fault.get_or_insert(err);
        }
        for (index, sub) in inner.subs.iter().enumerate() {
            if index == inner.master_index {
                continue;
            }
            if let Err(err) = sub.stream.lock().stop() {
                log::error!("sub-stream {index} stop failed: {err}");
                first_fault.get_or_insert(err);
            }
        }
        log::debug!("aggregate stopped");
        match first_fault {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Frames per application buffer exchange.
    pub fn frames(&self) -> usize {
        self.inner.frames
    }

    /// Aggregate-wide format: the shared mix rate and the summed channel
    /// counts of all sub-streams.
    pub fn format(&self) -> StreamFormat {
        self.inner.format
    }

    /// The master sub-stream's native system.
    pub fn system(&self) -> AudioSystem {
        self.inner.subs[self.inner.master_index].stream.lock().system()
    }

    /// The master sub-stream's native handle.
    pub fn handle(&self) -> usize {
        self.inner.subs[self.inner.master_index].stream.lock().handle()
    }

    /// Aggregate latency: per direction, the maximum over sub-streams of
    /// native latency plus currently queued ring frames.
    ///
    /// A sub-stream reporting zero latency in both directions invalidates the
    /// aggregate-wide estimate: the call returns zero immediately, discarding
    /// whatever other sub-streams already contributed.
    pub fn latency(&self) -> Result<Latency, StreamError> {
        let inner = &*self.inner;
        let inv_rate = 1000.0 / f64::from(inner.format.sample_rate);
        let mut result = Latency::default();
        for sub in &inner.subs {
            let local = sub.stream.lock().latency()?;
            if local.is_zero() {
                return Ok(Latency::default());
            }
            if local.input_ms > 0.0 {
                let queued = sub.input_ring.lock().frames_queued();
                let input = local.input_ms + queued as f64 * inv_rate;
                result.input_ms = result.input_ms.max(input);
            }
            if local.output_ms > 0.0 {
                let queued = sub.output_ring.lock().frames_queued();
                let output = local.output_ms + queued as f64 * inv_rate;
                result.output_ms = result.output_ms.max(output);
            }
        }
        Ok(result)
    }
}

impl AggregateInner {
    fn notify_xrun(&self, index: Option<usize>) {
        if let Some(on_xrun) = &self.on_xrun {
            on_xrun(index);
        }
    }

    fn stop_started(&self, started: &[usize]) {
        for &index in started {
            self.subs[index].stream.lock().stop_slave_buffer();
        }
    }

    /// Moves one device exchange through sub-stream `index`'s rings.
    ///
    /// Runs on that sub-stream's callback thread; also executed as the first
    /// step of the master's own callback.
    fn on_slave_buffer(&self, index: usize, buffer: &mut StreamBuffer<'_>) {
        let sub = &self.subs[index];
        self.inside_callback.fetch_add(1, Ordering::SeqCst);
        if buffer.error.is_some() {
            for (other, other_sub) in self.subs.iter().enumerate() {
                if other != index {
                    other_sub.stream.lock().request_stop();
                }
            }
            // One final application callback carries the fault, so every
            // start is matched by a terminal callback, not silent death.
            let on_buffer = self.on_buffer.lock().clone();
            on_buffer(buffer);
        } else if !self.running.load(Ordering::SeqCst) {
            if let Some(output) = buffer.output.as_mut() {
                zero_buffer(output, 0, sub.channels.outputs as usize, buffer.frames);
            }
        } else {
            if let Some(input) = buffer.input {
                let written = sub.input_ring.lock().write(input, buffer.frames);
                if written < buffer.frames {
                    self.notify_xrun(Some(index));
                }
            }
            if let Some(output) = buffer.output.as_mut() {
                let mut ring = sub.output_ring.lock();
                let read = ring.read(output.reborrow(), buffer.frames);
                drop(ring);
                if read < buffer.frames {
                    zero_buffer(
                        output,
                        read,
                        sub.channels.outputs as usize,
                        buffer.frames - read,
                    );
                    self.notify_xrun(Some(index));
                }
            }
        }
        self.inside_callback.fetch_sub(1, Ordering::SeqCst);
    }

    /// The master exchange: pump the slaves, run the master's own slave step,
    /// then weave all rings through the application callback.
    fn on_master_buffer(&self, index: usize, buffer: &mut StreamBuffer<'_>) {
        for (other, sub) in self.subs.iter().enumerate() {
            if other != self.master_index {
                let _ = sub.stream.lock().process_buffer(false);
            }
        }

        self.on_slave_buffer(index, buffer);
        if buffer.error.is_some() {
            return;
        }
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        self.inside_callback.fetch_add(1, Ordering::SeqCst);
        let frames = buffer.frames;
        assert!(frames <= self.frames, "exchange larger than the aggregate buffer");
        let mut scratch = self.scratch.lock();
        let WeaveScratch {
            ring_input,
            ring_output,
            app_input,
            app_output,
        } = &mut *scratch;
        let total_inputs = self.format.channels.inputs as usize;
        let total_outputs = self.format.channels.outputs as usize;

        let mut offset = 0;
        for (i, sub) in self.subs.iter().enumerate() {
            let inputs = sub.channels.inputs as usize;
            if inputs == 0 {
                continue;
            }
            let read = sub.input_ring.lock().read(ring_input.as_view_mut(), frames);
            if read < frames {
                zero_buffer(&mut ring_input.as_view_mut(), read, inputs, frames - read);
                self.notify_xrun(Some(i));
            }
            for channel in 0..inputs {
                weave(
                    &mut app_input.as_view_mut(),
                    &ring_input.as_view(),
                    total_inputs,
                    inputs,
                    offset + channel,
                    channel,
                    frames,
                );
            }
            offset += inputs;
        }

        let on_buffer = self.on_buffer.lock().clone();
        {
            let mut app_buffer = StreamBuffer::new(
                frames,
                (total_inputs > 0).then(|| app_input.as_view()),
                (total_outputs > 0).then(|| app_output.as_view_mut()),
            );
            on_buffer(&mut app_buffer);
        }

        let mut offset = 0;
        for (i, sub) in self.subs.iter().enumerate() {
            let outputs = sub.channels.outputs as usize;
            if outputs == 0 {
                continue;
            }
            for channel in 0..outputs {
                weave(
                    &mut ring_output.as_view_mut(),
                    &app_output.as_view(),
                    outputs,
                    total_outputs,
                    channel,
                    offset + channel,
                    frames,
                );
            }
            offset += outputs;
            let written = sub.output_ring.lock().write(ring_output.as_view(), frames);
            if written < frames {
                self.notify_xrun(Some(i));
            }
        }
        self.inside_callback.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Drop for AggregateInner {
    fn drop(&mut self) {
        // Release sub-streams in reverse construction order.
        while self.subs.pop().is_some() {}
    }
}

impl Drop for Aggregate {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::error!("aggregate stop on drop failed: {err}");
        }
    }
}

impl DeviceStream for Aggregate {
    fn start(&mut self) -> Result<(), StreamError> {
        Aggregate::start(self)
    }

    fn stop(&mut self) -> Result<(), StreamError> {
        Aggregate::stop(self)
    }

    fn is_running(&self) -> bool {
        Aggregate::is_running(self)
    }

    fn request_stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        for sub in &self.inner.subs {
            sub.stream.lock().request_stop();
        }
    }

    fn frames(&self) -> Result<usize, StreamError> {
        Ok(self.inner.frames)
    }

    fn format(&self) -> StreamFormat {
        self.inner.format
    }

    fn interleaved(&self) -> bool {
        self.inner.interleaved
    }

    fn system(&self) -> AudioSystem {
        Aggregate::system(self)
    }

    fn handle(&self) -> usize {
        Aggregate::handle(self)
    }

    fn latency(&self) -> Result<Latency, StreamError> {
        Aggregate::latency(self)
    }

    fn set_buffer_callback(&mut self, callback: BufferCallback) {
        *self.inner.on_buffer.lock() = callback;
    }
}

impl BlockingStream for Aggregate {
    /// Starting the clock is what makes a nested aggregate running: an outer
    /// aggregate starts its sub-streams with `start_slave_buffer` then
    /// `start_master_buffer`, never through [`Aggregate::start`].
    fn start_master_buffer(&mut self) -> Result<(), StreamError> {
        self.inner.subs[self.inner.master_index]
            .stream
            .lock()
            .start_master_buffer()?;
        let _ = self
            .inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst);
        Ok(())
    }

    fn stop_master_buffer(&mut self) {
        if self
            .inner
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            while self.inner.inside_callback.load(Ordering::SeqCst) != 0 {
                std::hint::spin_loop();
            }
        }
        self.inner.subs[self.inner.master_index]
            .stream
            .lock()
            .stop_master_buffer();
    }

    fn start_slave_buffer(&mut self) -> Result<(), StreamError> {
        let inner = &*self.inner;
        for sub in &inner.subs {
            sub.input_ring.lock().clear();
            sub.output_ring.lock().clear();
        }
        let mut started = Vec::new();
        for index in 0..inner.subs.len() {
            if index == inner.master_index {
                continue;
            }
            if let Err(err) = inner.subs[index].stream.lock().start_slave_buffer() {
                inner.stop_started(&started);
                return Err(err);
            }
            started.push(index);
        }
        if let Err(err) = inner.subs[inner.master_index]
            .stream
            .lock()
            .start_slave_buffer()
        {
            inner.stop_started(&started);
            return Err(err);
        }
        Ok(())
    }

    fn stop_slave_buffer(&mut self) {
        let inner = &*self.inner;
        inner.subs[inner.master_index].stream.lock().stop_slave_buffer();
        for (index, sub) in inner.subs.iter().enumerate() {
            if index != inner.master_index {
                sub.stream.lock().stop_slave_buffer();
            }
        }
    }

    fn process_buffer(&mut self, blocking: bool) -> Result<(), StreamError> {
        self.inner.subs[self.inner.master_index]
            .stream
            .lock()
            .process_buffer(blocking)
    }

    fn block_master_buffer(&mut self) -> Result<bool, StreamError> {
        self.inner.subs[self.inner.master_index]
            .stream
            .lock()
            .block_master_buffer()
    }

    fn prefill_output_buffer(&mut self) -> Result<(), StreamError> {
        for sub in &self.inner.subs {
            sub.stream.lock().prefill_output_buffer()?;
        }
        Ok(())
    }
}
