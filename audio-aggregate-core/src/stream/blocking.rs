//! Push-to-pull adaptation for callback-only backends.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::models::buffer::StreamBuffer;
use crate::models::error::StreamError;
use crate::models::format::{AudioSystem, Latency, StreamFormat};
use crate::processing::weave::zero_buffer;
use crate::traits::blocking_stream::BlockingStream;
use crate::traits::device_stream::{BufferCallback, DeviceStream};

struct GateState {
    /// Clock-source mode: every native cycle is delivered downstream.
    master: bool,
    /// Exchange requests not yet serviced.
    pending: u32,
    /// Exchanges serviced since the gate was created.
    serviced: u64,
    /// Set while stopping so blocked requesters wake instead of waiting on a
    /// clock that is no longer ticking.
    halted: bool,
}

struct ExchangeGate {
    state: Mutex<GateState>,
    completed: Condvar,
    downstream: Mutex<Option<BufferCallback>>,
    output_channels: usize,
}

impl ExchangeGate {
    /// Runs on the wrapped stream's native thread, once per driver cycle.
    fn on_device_buffer(&self, buffer: &mut StreamBuffer<'_>) {
        // Faults always pass through, gated or not.
        let deliver = if buffer.error.is_some() {
            true
        } else {
            let mut state = self.state.lock();
            if state.master {
                true
            } else if state.pending > 0 {
                state.pending -= 1;
                true
            } else {
                false
            }
        };
        if deliver {
            let callback = self.downstream.lock().clone();
            if let Some(callback) = callback {
                callback(buffer);
            }
            let mut state = self.state.lock();
            state.serviced += 1;
            drop(state);
            self.completed.notify_all();
        } else if let Some(output) = buffer.output.as_mut() {
            // No exchange requested this cycle: hand the driver silence
            // rather than stale memory.
            zero_buffer(output, 0, self.output_channels, buffer.frames);
        }
    }

    fn halt(&self) {
        let mut state = self.state.lock();
        state.pending = 0;
        state.halted = true;
        drop(state);
        self.completed.notify_all();
    }
}

/// Drives a push-only [`DeviceStream`] through the pull-style
/// [`BlockingStream`] protocol.
///
/// The adapter interposes on the wrapped stream's buffer callback. In master
/// mode the device stays the clock and every cycle flows through. In slave
/// mode cycles are held back until [`BlockingStream::process_buffer`] queues
/// a request, which the next native cycle consumes — this is what lets an
/// aggregate's master pump a slave device once per master cycle even though
/// the slave's driver only knows how to push.
pub struct BlockingAdapter {
    stream: Box<dyn DeviceStream>,
    gate: Arc<ExchangeGate>,
}

impl BlockingAdapter {
    pub fn new(mut stream: Box<dyn DeviceStream>) -> Self {
        let gate = Arc::new(ExchangeGate {
            state: Mutex::new(GateState {
                master: false,
                pending: 0,
                serviced: 0,
                halted: false,
            }),
            completed: Condvar::new(),
            downstream: Mutex::new(None),
            output_channels: stream.format().channels.outputs as usize,
        });
        let forward = Arc::clone(&gate);
        stream.set_buffer_callback(Arc::new(move |buffer: &mut StreamBuffer<'_>| {
            forward.on_device_buffer(buffer);
        }));
        Self { stream, gate }
    }

    fn start_gated(&mut self, master: bool) -> Result<(), StreamError> {
        {
            let mut state = self.gate.state.lock();
            state.master = master;
            state.pending = 0;
            state.halted = false;
        }
        // Slave-buffer then master-buffer is a legal start sequence; the
        // second phase only retargets the gate.
        if self.stream.is_running() {
            return Ok(());
        }
        self.stream.start()
    }
}

impl DeviceStream for BlockingAdapter {
    fn start(&mut self) -> Result<(), StreamError> {
        self.start_gated(true)
    }

    fn stop(&mut self) -> Result<(), StreamError> {
        self.gate.halt();
        self.stream.stop()
    }

    fn is_running(&self) -> bool {
        self.stream.is_running()
    }

    fn request_stop(&self) {
        self.gate.halt();
        self.stream.request_stop();
    }

    fn frames(&self) -> Result<usize, StreamError> {
        self.stream.frames()
    }

    fn format(&self) -> StreamFormat {
        self.stream.format()
    }

    fn interleaved(&self) -> bool {
        self.stream.interleaved()
    }

    fn system(&self) -> AudioSystem {
        self.stream.system()
    }

    fn handle(&self) -> usize {
        self.stream.handle()
    }

    fn latency(&self) -> Result<Latency, StreamError> {
        self.stream.latency()
    }

    fn set_buffer_callback(&mut self, callback: BufferCallback) {
        *self.gate.downstream.lock() = Some(callback);
    }
}

impl BlockingStream for BlockingAdapter {
    fn start_master_buffer(&mut self) -> Result<(), StreamError> {
        self.start_gated(true)
    }

    fn stop_master_buffer(&mut self) {
        if let Err(err) = self.stop() {
            log::error!("blocking adapter master stop failed: {err}");
        }
    }

    fn start_slave_buffer(&mut self) -> Result<(), StreamError> {
        self.start_gated(false)
    }

    fn stop_slave_buffer(&mut self) {
        if let Err(err) = self.stop() {
            log::error!("blocking adapter slave stop failed: {err}");
        }
    }

    fn process_buffer(&mut self, blocking: bool) -> Result<(), StreamError> {
        let mut state = self.gate.state.lock();
        state.pending += 1;
        let target = state.serviced + u64::from(state.pending);
        if blocking {
            while state.serviced < target && !state.halted {
                self.gate.completed.wait(&mut state);
            }
        }
        Ok(())
    }

    fn block_master_buffer(&mut self) -> Result<bool, StreamError> {
        let mut state = self.gate.state.lock();
        if state.pending > 0 && !state.halted {
            let _ = self
                .gate
                .completed
                .wait_for(&mut state, Duration::from_millis(10));
        }
        Ok(state.pending == 0)
    }

    /// Callback-driven devices hand over a fresh output buffer every cycle,
    /// so there is no device-side queue to preload.
    fn prefill_output_buffer(&mut self) -> Result<(), StreamError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockStream;
    use crate::models::buffer::{BlockRef, SampleBlock};
    use crate::models::format::ChannelSpec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn adapter() -> (BlockingAdapter, crate::mock::MockHandle, Arc<AtomicUsize>) {
        let (stream, handle) = MockStream::new(48_000, ChannelSpec::new(1, 1), 4, true);
        let mut adapter = BlockingAdapter::new(Box::new(stream));
        let delivered = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&delivered);
        adapter.set_buffer_callback(Arc::new(move |_: &mut StreamBuffer<'_>| {
            count.fetch_add(1, Ordering::SeqCst);
        }));
        (adapter, handle, delivered)
    }

    #[test]
    fn slave_cycles_are_gated_until_requested() {
        let (mut adapter, handle, delivered) = adapter();
        adapter.start_slave_buffer().unwrap();

        handle.exchange(Some(&SampleBlock::new(true, 1, 4)), 4);
        assert_eq!(delivered.load(Ordering::SeqCst), 0);

        adapter.process_buffer(false).unwrap();
        handle.exchange(Some(&SampleBlock::new(true, 1, 4)), 4);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);

        // The request was consumed: the next unrequested cycle is gated again.
        handle.exchange(Some(&SampleBlock::new(true, 1, 4)), 4);
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ungated_cycle_silences_device_output() {
        let (mut adapter, handle, _) = adapter();
        adapter.start_slave_buffer().unwrap();

        // The output block arrives dirty, like real driver memory.
        let stale = SampleBlock::Interleaved(vec![7.0; 4]);
        let output = handle.exchange_with_output(Some(&SampleBlock::new(true, 1, 4)), stale, 4);
        match output.as_view() {
            BlockRef::Interleaved(samples) => assert!(samples.iter().all(|s| *s == 0.0)),
            BlockRef::Planar(_) => panic!("expected interleaved"),
        }
    }

    #[test]
    fn master_mode_delivers_every_cycle() {
        let (mut adapter, handle, delivered) = adapter();
        adapter.start_master_buffer().unwrap();

        handle.exchange(Some(&SampleBlock::new(true, 1, 4)), 4);
        handle.exchange(Some(&SampleBlock::new(true, 1, 4)), 4);
        assert_eq!(delivered.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn error_buffers_bypass_the_gate() {
        let (mut adapter, handle, _) = adapter();
        let errors = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&errors);
        adapter.set_buffer_callback(Arc::new(move |buffer: &mut StreamBuffer<'_>| {
            if buffer.error.is_some() {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        }));
        adapter.start_slave_buffer().unwrap();

        handle.deliver_error(4, StreamError::backend(AudioSystem::Loopback, 7));
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn blocking_process_buffer_waits_for_the_exchange() {
        let (mut adapter, handle, delivered) = adapter();
        adapter.start_slave_buffer().unwrap();

        // Native thread keeps cycling until the request is serviced.
        let driver = {
            let handle = handle.clone();
            let delivered = Arc::clone(&delivered);
            thread::spawn(move || {
                while delivered.load(Ordering::SeqCst) == 0 {
                    thread::sleep(Duration::from_millis(5));
                    handle.exchange(Some(&SampleBlock::new(true, 1, 4)), 4);
                }
            })
        };

        adapter.process_buffer(true).unwrap();
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        driver.join().unwrap();
    }

    #[test]
    fn block_master_buffer_reports_readiness() {
        let (mut adapter, handle, _) = adapter();
        adapter.start_slave_buffer().unwrap();

        assert!(adapter.block_master_buffer().unwrap());

        adapter.process_buffer(false).unwrap();
        assert!(!adapter.block_master_buffer().unwrap());

        handle.exchange(Some(&SampleBlock::new(true, 1, 4)), 4);
        assert!(adapter.block_master_buffer().unwrap());
    }

    #[test]
    fn halted_gate_does_not_block_requesters() {
        let (mut adapter, _handle, _) = adapter();
        adapter.start_slave_buffer().unwrap();
        adapter.stop().unwrap();

        // Returns immediately: there is no clock left to wait on.
        assert!(adapter.process_buffer(true).is_ok());
        // The request stays unserviced, so the gate reports not ready.
        assert!(!adapter.block_master_buffer().unwrap());
    }
}
