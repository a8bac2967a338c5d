//! # audio-aggregate-core
//!
//! Platform-agnostic multi-device audio aggregation engine.
//!
//! Combines several independently clocked device streams — each with its own
//! callback thread, channel count and buffer size — into one logically
//! synchronized multi-channel virtual stream behind a single application
//! callback. Platform backends (ASIO, JACK, WASAPI, ...) implement the
//! `DeviceStream`/`BlockingStream` traits and plug into the generic
//! `Aggregate`.
//!
//! ## Architecture
//!
//! ```text
//! audio-aggregate-core (this crate)
//! ├── traits/       ← DeviceStream, BlockingStream, callback types
//! ├── models/       ← StreamError, formats, sample blocks, StreamBuffer
//! ├── processing/   ← RingBuffer, channel weave codec
//! ├── stream/       ← BlockingAdapter, Aggregate (the orchestrator)
//! └── mock          ← scripted backend for tests
//! ```
//!
//! One sub-stream is designated master and its native callback drives the
//! whole aggregate: it pumps the slaves' blocking adapters, weaves every
//! device's channels into one unified buffer, invokes the application
//! callback exactly once per cycle, and distributes the application's output
//! back into per-device ring buffers for the slaves to drain.

pub mod mock;
pub mod models;
pub mod processing;
pub mod stream;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use models::buffer::{BlockMut, BlockRef, SampleBlock, StreamBuffer};
pub use models::error::StreamError;
pub use models::format::{AudioSystem, ChannelSpec, Latency, StreamFormat};
pub use processing::ring_buffer::RingBuffer;
pub use processing::weave::{weave, zero_buffer};
pub use stream::aggregate::{Aggregate, AggregateParams};
pub use stream::blocking::BlockingAdapter;
pub use traits::blocking_stream::BlockingStream;
pub use traits::device_stream::{BufferCallback, DeviceStream, XRunCallback};
