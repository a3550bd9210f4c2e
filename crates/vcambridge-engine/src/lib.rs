//! # vcambridge engine
//!
//! Captures the rendered output of one compositing node and republishes it as a
//! camera-style video feed.
//!
//! ## Pipeline
//! - [`framebuffer`]: render the upstream into an offscreen target, stage it, map it.
//! - [`channel`]: a timestamped ring of BGRA frames, reopened whenever the size changes.
//! - [`publisher`]: start/stop lifecycle of the output endpoint, with a background start,
//!   failure cooldown and idempotent forced teardown.
//! - [`driver`]: the per-frame and per-tick entry points a host calls.
//!
//! The host supplies graphics ([`gfx::Graphics`]), the upstream node, the endpoint and its
//! lifecycle signals ([`host`]). [`software`] provides a CPU-only compositor; the `testkit`
//! feature adds scripted stand-ins for the rest.

pub mod assets;
pub mod channel;
pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod framebuffer;
pub mod gfx;
pub mod host;
pub mod publisher;
pub mod software;
#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use channel::{ChannelFactory, ChannelState, RingFactory, RingFrame, RingReader, VideoOutputInfo, VideoRing};
pub use config::{BridgeConfig, ConfigMode, VideoInfo};
pub use driver::{ContextParts, FilterContext};
pub use error::BridgeError;
pub use events::{BridgeEvent, EventSink, LogLevel, ShutdownTrigger, StopReason};
pub use host::{Clock, HostEvent, HostSignals, MonotonicClock, OutputEndpoint, TaskSpawner, ThreadSpawner, UpstreamSource};
pub use publisher::{OutputPublisher, PublisherState};
