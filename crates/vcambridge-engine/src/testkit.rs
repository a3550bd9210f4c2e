//! Deterministic collaborators for driving a context without a real host.
//!
//! Used by the engine's own tests and by the runner's session tests, through the `testkit` feature.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::channel::VideoRing;
use crate::error::BridgeError;
use crate::host::{Clock, HostSignals, OutputEndpoint, Task, TaskSpawner, UpstreamSource};
use crate::software::SoftGraphics;

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn new(start: Duration) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }

    pub fn set(&self, to: Duration) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn frame_time(&self) -> Duration {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Queues tasks until `run_all` / `run_next` is called.
#[derive(Default)]
pub struct ManualSpawner {
    tasks: Mutex<VecDeque<Task>>,
    spawned: AtomicU32,
    /// Refuse the next spawn, as if the OS were out of threads.
    pub fail_next: AtomicBool,
}

impl ManualSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn spawned(&self) -> u32 {
        self.spawned.load(Ordering::Acquire)
    }

    pub fn run_next(&self) -> bool {
        let task = self.tasks.lock().unwrap_or_else(|p| p.into_inner()).pop_front();
        match task {
            Some(t) => {
                t();
                true
            }
            None => false,
        }
    }

    pub fn run_all(&self) -> usize {
        let mut n = 0;
        while self.run_next() {
            n += 1;
        }
        n
    }
}

impl TaskSpawner for ManualSpawner {
    fn spawn(&self, _name: &str, task: Task) -> std::io::Result<()> {
        if self.fail_next.swap(false, Ordering::AcqRel) {
            return Err(std::io::Error::other("spawn refused"));
        }
        self.spawned.fetch_add(1, Ordering::AcqRel);
        self.tasks.lock().unwrap_or_else(|p| p.into_inner()).push_back(task);
        Ok(())
    }
}

/// Endpoint whose start results are scripted up front. Unscripted starts succeed.
#[derive(Default)]
pub struct ScriptedEndpoint {
    script: Mutex<VecDeque<Result<(), String>>>,
    media: Mutex<Option<Arc<VideoRing>>>,
    running: AtomicBool,
    pub starts: AtomicU32,
    pub stops: AtomicU32,
    pub force_stops: AtomicU32,
    pub data_capture_ends: AtomicU32,
}

impl ScriptedEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of the next start call.
    pub fn push_start_result(&self, result: Result<(), &str>) {
        self.script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(result.map_err(str::to_string));
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn media(&self) -> Option<Arc<VideoRing>> {
        self.media.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn count(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::Acquire)
    }
}

impl OutputEndpoint for ScriptedEndpoint {
    fn name(&self) -> &str {
        "scripted"
    }

    fn set_media(&self, ring: Option<Arc<VideoRing>>) {
        *self.media.lock().unwrap_or_else(|p| p.into_inner()) = ring;
    }

    fn start(&self) -> Result<(), BridgeError> {
        self.starts.fetch_add(1, Ordering::AcqRel);
        let next = self.script.lock().unwrap_or_else(|p| p.into_inner()).pop_front();
        match next.unwrap_or(Ok(())) {
            Ok(()) => {
                self.running.store(true, Ordering::Release);
                Ok(())
            }
            Err(msg) => Err(BridgeError::output_start(self.name(), msg)),
        }
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::AcqRel);
        self.running.store(false, Ordering::Release);
    }

    fn force_stop(&self) {
        self.force_stops.fetch_add(1, Ordering::AcqRel);
        self.running.store(false, Ordering::Release);
    }

    fn end_data_capture(&self) {
        self.data_capture_ends.fetch_add(1, Ordering::AcqRel);
    }
}

/// Host that records what it was told.
#[derive(Debug, Default)]
pub struct RecordingHost {
    showing: AtomicI64,
    pub shows: AtomicU32,
    pub hides: AtomicU32,
    registered: Mutex<Vec<u64>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current show reference count.
    pub fn showing(&self) -> i64 {
        self.showing.load(Ordering::Acquire)
    }

    pub fn registered(&self) -> Vec<u64> {
        self.registered.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl HostSignals for RecordingHost {
    fn show(&self) {
        self.shows.fetch_add(1, Ordering::AcqRel);
        self.showing.fetch_add(1, Ordering::AcqRel);
    }

    fn hide(&self) {
        self.hides.fetch_add(1, Ordering::AcqRel);
        self.showing.fetch_sub(1, Ordering::AcqRel);
    }

    fn add_render_callback(&self, context_id: u64) {
        self.registered.lock().unwrap_or_else(|p| p.into_inner()).push(context_id);
    }

    fn remove_render_callback(&self, context_id: u64) {
        self.registered
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .retain(|&id| id != context_id);
    }
}

/// Upstream that paints a solid color, with every property adjustable from tests.
#[derive(Debug)]
pub struct SolidSource {
    size: AtomicU64,
    enabled: AtomicBool,
    removed: AtomicBool,
    color: Mutex<[u8; 4]>,
    pub renders: AtomicU32,
}

impl SolidSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: AtomicU64::new(pack(width, height)),
            enabled: AtomicBool::new(true),
            removed: AtomicBool::new(false),
            color: Mutex::new([0x20, 0x40, 0x80, 0xFF]),
            renders: AtomicU32::new(0),
        }
    }

    pub fn set_size(&self, width: u32, height: u32) {
        self.size.store(pack(width, height), Ordering::Release);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn set_removed(&self, removed: bool) {
        self.removed.store(removed, Ordering::Release);
    }

    pub fn set_color(&self, bgra: [u8; 4]) {
        *self.color.lock().unwrap_or_else(|p| p.into_inner()) = bgra;
    }

    pub fn color(&self) -> [u8; 4] {
        *self.color.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn pack(width: u32, height: u32) -> u64 {
    ((width as u64) << 32) | height as u64
}

impl UpstreamSource<SoftGraphics> for SolidSource {
    fn base_width(&self) -> u32 {
        (self.size.load(Ordering::Acquire) >> 32) as u32
    }

    fn base_height(&self) -> u32 {
        self.size.load(Ordering::Acquire) as u32
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    fn render_video(&self, gfx: &mut SoftGraphics) {
        self.renders.fetch_add(1, Ordering::AcqRel);
        let (w, h) = (self.base_width(), self.base_height());
        gfx.fill_rect(0, 0, w, h, self.color());
    }
}
