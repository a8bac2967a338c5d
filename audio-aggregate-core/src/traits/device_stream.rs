use std::sync::Arc;

use crate::models::buffer::StreamBuffer;
use crate::models::error::StreamError;
use crate::models::format::{AudioSystem, Latency, StreamFormat};

/// Callback invoked for every buffer exchange.
///
/// Fires on the backend's audio thread — keep processing minimal and never
/// block. The receiver reads `buffer.input`, fills `buffer.output`, and
/// checks `buffer.error` for a native fault accompanying the exchange.
pub type BufferCallback = Arc<dyn Fn(&mut StreamBuffer<'_>) + Send + Sync>;

/// Notification of a ring under/overrun.
///
/// Carries the offending sub-stream's index, or `None` when the shortfall is
/// not attributable to one device. Transient and non-fatal: the stream keeps
/// running and degrades by under-delivering data.
pub type XRunCallback = Arc<dyn Fn(Option<usize>) + Send + Sync>;

/// Capability set every backend stream exposes to the engine.
///
/// Implemented by native-callback streams (a driver thread pushes buffers),
/// by [`BlockingAdapter`](crate::stream::blocking::BlockingAdapter) wrapping
/// one of those, and by [`Aggregate`](crate::stream::aggregate::Aggregate)
/// itself. The engine depends only on this surface, never on a concrete
/// backend type.
pub trait DeviceStream: Send {
    /// Starts native buffer delivery.
    fn start(&mut self) -> Result<(), StreamError>;

    /// Stops native buffer delivery and releases the device.
    ///
    /// Must not be called from a buffer callback — it may join the thread the
    /// callback runs on. Use [`DeviceStream::request_stop`] there instead.
    fn stop(&mut self) -> Result<(), StreamError>;

    fn is_running(&self) -> bool;

    /// Asks the stream to cease buffer delivery without blocking.
    ///
    /// Safe to call from any thread, including buffer callbacks.
    fn request_stop(&self);

    /// Buffer size of one exchange, in frames.
    fn frames(&self) -> Result<usize, StreamError>;

    fn format(&self) -> StreamFormat;

    /// Whether this stream exchanges interleaved buffers.
    fn interleaved(&self) -> bool;

    fn system(&self) -> AudioSystem;

    /// Backend-defined opaque handle, 0 when the backend has none.
    fn handle(&self) -> usize {
        0
    }

    /// Native latency per direction, in milliseconds.
    fn latency(&self) -> Result<Latency, StreamError>;

    /// Registers the callback receiving this stream's buffer exchanges.
    ///
    /// Called once during aggregate construction; a later call replaces the
    /// previous callback.
    fn set_buffer_callback(&mut self, callback: BufferCallback);
}
