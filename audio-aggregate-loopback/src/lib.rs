//! # audio-aggregate-loopback
//!
//! In-process loopback backend for audio-aggregate-kit.
//!
//! Provides `LoopbackStream` — a self-clocked full-duplex device whose output
//! is replayed as its own input one cycle later. No hardware, no vendor SDK:
//! the clock thread plays the role a driver's callback thread plays for a
//! real backend, which makes this crate the workspace's end-to-end test
//! driver.
//!
//! ## Usage
//! ```ignore
//! use audio_aggregate_core::{Aggregate, AggregateParams, BlockingAdapter, ChannelSpec};
//! use audio_aggregate_loopback::LoopbackStream;
//!
//! let device = LoopbackStream::new(48_000, ChannelSpec::new(2, 2), 480, true);
//! let sub = BlockingAdapter::new(Box::new(device));
//! ```

pub mod loopback;

pub use loopback::LoopbackStream;
