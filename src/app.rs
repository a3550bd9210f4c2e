//! Startup state shared by the headless and windowed runners.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use vcambridge_engine::assets::AssetsRoot;
use vcambridge_engine::config::ConfigMode;
use vcambridge_engine::gfx::Graphics;
use vcambridge_engine::{
    BridgeConfig, ContextParts, EventSink, MonotonicClock, RingFactory, ThreadSpawner, UpstreamSource,
};

use crate::host::SimHost;
use crate::logi;
use crate::output::RingEndpoint;
use crate::settings::HostConfig;

/// How long exit waits for output workers to wind down.
pub const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Id of the single filter context this runner hosts.
pub const CONTEXT_ID: u64 = 1;

pub struct App {
    pub assets: AssetsRoot,
    pub bridge: BridgeConfig,
    pub host_cfg: HostConfig,
    pub host_path: PathBuf,
    pub mode: ConfigMode,
    /// Command line override of `run.frames`.
    pub frames: Option<u64>,
}

impl App {
    pub fn frame_limit(&self) -> Option<u64> {
        self.frames.or(self.host_cfg.run.frames)
    }
}

/// Wire a context to the runner's host, endpoint and default clock/spawner.
pub fn context_parts<G: Graphics>(
    upstream: Arc<dyn UpstreamSource<G>>,
    endpoint: Arc<RingEndpoint>,
    host: Arc<SimHost>,
    events: EventSink,
) -> ContextParts<G> {
    ContextParts {
        upstream,
        endpoint,
        channels: Arc::new(RingFactory),
        host,
        clock: Arc::new(MonotonicClock::new()),
        spawner: Arc::new(ThreadSpawner),
        events,
    }
}

/// Common tail of both runners once the context has been destroyed.
pub fn finish(endpoint: &RingEndpoint, frames_rendered: u64) {
    if !endpoint.join_workers(WORKER_JOIN_TIMEOUT) {
        crate::logw!("EXIT", "output worker still busy after {:?}, leaving it behind", WORKER_JOIN_TIMEOUT);
    }
    logi!(
        "EXIT",
        "rendered {frames_rendered} frame(s), {} delivered to output",
        endpoint.frames_out()
    );
}
