use crate::models::error::StreamError;

use super::device_stream::DeviceStream;

/// Pull-driven buffer exchange protocol on top of [`DeviceStream`].
///
/// A blocking stream can be driven synchronously from another thread's
/// callback: a master pumps each slave's [`process_buffer`] once per cycle so
/// every sub-stream exchanges buffers on the master's cadence. Implemented
/// natively by backends whose drivers support it, by
/// [`BlockingAdapter`](crate::stream::blocking::BlockingAdapter) for
/// push-only backends, and by
/// [`Aggregate`](crate::stream::aggregate::Aggregate) so aggregates nest.
///
/// [`process_buffer`]: BlockingStream::process_buffer
pub trait BlockingStream: DeviceStream {
    /// Starts the stream as the clock source: every native cycle is delivered.
    fn start_master_buffer(&mut self) -> Result<(), StreamError>;

    /// Stops a stream started with [`BlockingStream::start_master_buffer`].
    fn stop_master_buffer(&mut self);

    /// Starts the stream without acting as clock: exchanges happen only when
    /// requested through [`BlockingStream::process_buffer`].
    fn start_slave_buffer(&mut self) -> Result<(), StreamError>;

    /// Stops a stream started with [`BlockingStream::start_slave_buffer`].
    fn stop_slave_buffer(&mut self);

    /// Requests exactly one buffer exchange.
    ///
    /// With `blocking` set, waits until that exchange completes. Otherwise
    /// fire-and-forget: the request is queued and a previously in-flight
    /// exchange may still be running when this returns.
    fn process_buffer(&mut self, blocking: bool) -> Result<(), StreamError>;

    /// Polls whether the most recently requested exchange has completed,
    /// waiting at most a short bounded interval.
    fn block_master_buffer(&mut self) -> Result<bool, StreamError>;

    /// Queues one buffer of silence ahead of the first exchange, so the first
    /// hardware cycle never observes an empty output queue.
    fn prefill_output_buffer(&mut self) -> Result<(), StreamError>;
}
