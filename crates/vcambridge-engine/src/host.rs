//! Interfaces the bridge consumes from its host.
//!
//! None of these are implemented here except the small defaults (`MonotonicClock`,
//! `ThreadSpawner`). The runner and the tests provide the rest.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::channel::VideoRing;
use crate::error::BridgeError;
use crate::gfx::Graphics;

/// The compositing node whose output the bridge republishes.
pub trait UpstreamSource<G: Graphics>: Send + Sync {
    fn base_width(&self) -> u32;
    fn base_height(&self) -> u32;
    /// Host-side enable toggle of the filter.
    fn enabled(&self) -> bool;
    /// True once the node has been removed from its scene.
    fn removed(&self) -> bool;
    /// Draw the node's current video into the pass that is in progress on `gfx`.
    fn render_video(&self, gfx: &mut G);
}

/// Externally visible publishing endpoint (virtual camera, NDI sender, ...).
///
/// Methods take `&self` because the blocking `start` runs on a background task while the
/// render thread may still stop or replace the bound ring.
pub trait OutputEndpoint: Send + Sync {
    fn name(&self) -> &str;
    /// Bind the ring the endpoint reads from. `None` detaches it.
    fn set_media(&self, ring: Option<Arc<VideoRing>>);
    /// Blocking start. Never called on the render thread.
    fn start(&self) -> Result<(), BridgeError>;
    fn stop(&self);
    /// Stop without waiting for queued frames to drain.
    fn force_stop(&self);
    /// Stop consuming frames from the bound ring.
    fn end_data_capture(&self);
}

/// Notifications the bridge sends back to its host.
pub trait HostSignals: Send + Sync {
    /// The upstream node is now contributing to an output (reference counted).
    fn show(&self);
    /// Balances a previous `show`.
    fn hide(&self);
    fn add_render_callback(&self, context_id: u64);
    fn remove_render_callback(&self, context_id: u64);
}

/// Video frame clock of the host pipeline.
pub trait Clock: Send + Sync {
    /// Time of the current video frame, measured from an arbitrary fixed origin.
    fn frame_time(&self) -> Duration;
}

/// Clock backed by `Instant`, with its origin at construction.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn frame_time(&self) -> Duration {
        self.origin.elapsed()
    }
}

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs blocking work off the render thread.
pub trait TaskSpawner: Send + Sync {
    /// Hand `task` to a background worker. On error the task has been dropped unrun.
    fn spawn(&self, name: &str, task: Task) -> std::io::Result<()>;
}

/// Spawns one named OS thread per task.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSpawner;

impl TaskSpawner for ThreadSpawner {
    fn spawn(&self, name: &str, task: Task) -> std::io::Result<()> {
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(task)
            .map(|_| ())
    }
}

/// Application-level notifications, delivered asynchronously by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    /// The application is exiting.
    Exit,
    /// The scene collection that owns the node is being torn down.
    CollectionCleanup,
    /// The filter was removed from its parent.
    SourceRemoved,
}
