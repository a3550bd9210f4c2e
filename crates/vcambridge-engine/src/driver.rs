//! Render tick driver: the host-facing entry points of one attached filter.
//!
//! The host calls [`FilterContext::render_frame`] once per rendered frame on its render
//! thread and [`FilterContext::tick`] once per application tick from wherever it ticks.
//! Neither ever waits on the output endpoint's start.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::channel::{ChannelFactory, VideoOutputInfo};
use crate::config::{BridgeConfig, VideoInfo};
use crate::events::{EventSink, ShutdownTrigger};
use crate::framebuffer::FrameBuffer;
use crate::gfx::Graphics;
use crate::host::{Clock, HostEvent, HostSignals, OutputEndpoint, TaskSpawner, UpstreamSource};
use crate::publisher::{OutputPublisher, PublisherParts, PublisherState};

/// Everything a context needs from its host.
pub struct ContextParts<G: Graphics> {
    pub upstream: Arc<dyn UpstreamSource<G>>,
    pub endpoint: Arc<dyn OutputEndpoint>,
    pub channels: Arc<dyn ChannelFactory>,
    pub host: Arc<dyn HostSignals>,
    pub clock: Arc<dyn Clock>,
    pub spawner: Arc<dyn TaskSpawner>,
    pub events: EventSink,
}

pub struct FilterContext<G: Graphics> {
    id: u64,
    cfg: BridgeConfig,
    video: VideoInfo,
    upstream: Arc<dyn UpstreamSource<G>>,
    host: Arc<dyn HostSignals>,
    clock: Arc<dyn Clock>,
    publisher: OutputPublisher,
    frame: Mutex<FrameBuffer<G>>,
    render_registered: AtomicBool,
    graphics_released: AtomicBool,
}

impl<G: Graphics> FilterContext<G> {
    /// Create the context and its render target. `video` is the global pipeline format at
    /// creation time; later changes to it are not picked up.
    pub fn new(id: u64, cfg: BridgeConfig, video: VideoInfo, parts: ContextParts<G>, gfx: &mut G) -> Self {
        let ContextParts {
            upstream,
            endpoint,
            channels,
            host,
            clock,
            spawner,
            events,
        } = parts;

        let publisher = OutputPublisher::new(
            PublisherParts {
                endpoint,
                channels,
                host: Arc::clone(&host),
                clock: Arc::clone(&clock),
                spawner,
                events,
            },
            cfg.retry_cooldown(),
        );

        Self {
            id,
            cfg,
            video,
            upstream,
            host,
            clock,
            publisher,
            frame: Mutex::new(FrameBuffer::new(gfx)),
            render_registered: AtomicBool::new(false),
            graphics_released: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.cfg
    }

    pub fn publisher(&self) -> &OutputPublisher {
        &self.publisher
    }

    pub fn state(&self) -> PublisherState {
        self.publisher.state()
    }

    pub fn is_stopping(&self) -> bool {
        self.publisher.is_stopping()
    }

    pub fn render_registered(&self) -> bool {
        self.render_registered.load(Ordering::Acquire)
    }

    fn frame(&self) -> MutexGuard<'_, FrameBuffer<G>> {
        self.frame.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Last captured width (0 before the first successful resize).
    pub fn width(&self) -> u32 {
        self.frame().width()
    }

    pub fn height(&self) -> u32 {
        self.frame().height()
    }

    /// Render-thread entry point, once per rendered frame.
    pub fn render_frame(&self, gfx: &mut G) {
        if self.is_stopping() || self.upstream.removed() {
            return;
        }

        let width = self.upstream.base_width();
        let height = self.upstream.base_height();

        let mut fb = self.frame();
        let upstream = &self.upstream;
        if !fb.capture(gfx, width, height, |g| upstream.render_video(g)) {
            return;
        }

        if fb.size_changed(width, height) {
            fb.recreate_stage(gfx, width, height);
            let info = VideoOutputInfo::bgra(&self.cfg.name, width, height, self.video, self.cfg.cache_size);
            if self.publisher.reopen_channel(&info).is_some() {
                fb.commit_size(width, height);
            }
        }

        let Some(ring) = self.publisher.live_ring() else {
            return;
        };

        self.publisher.update(self.upstream.enabled());

        let timestamp = self.clock.frame_time().as_nanos() as u64;
        let Some(mut frame) = ring.lock_frame(self.cfg.lock_timeout_frames, timestamp) else {
            return;
        };
        fb.copy_to(gfx, &mut frame);
        // `frame` publishes on drop, on every path out of here.
    }

    /// Application tick entry point. Registers the render callback on first use.
    pub fn tick(&self, _seconds: f32) {
        if self.is_stopping() {
            return;
        }
        if !self.render_registered.swap(true, Ordering::AcqRel) {
            self.host.add_render_callback(self.id);
        }
        self.publisher.tick(self.upstream.enabled());
    }

    /// Settings changed: drop and re-add the render registration.
    pub fn update(&self) {
        if self.is_stopping() {
            return;
        }
        self.host.remove_render_callback(self.id);
        self.host.add_render_callback(self.id);
        self.render_registered.store(true, Ordering::Release);
    }

    /// The filter's own video: the upstream, untouched.
    pub fn render_passthrough(&self, gfx: &mut G) {
        if self.upstream.removed() {
            return;
        }
        self.upstream.render_video(gfx);
    }

    pub fn handle_host_event(&self, event: HostEvent) {
        match event {
            HostEvent::Exit => self.shutdown(ShutdownTrigger::Exit),
            HostEvent::CollectionCleanup => self.shutdown(ShutdownTrigger::CollectionCleanup),
            HostEvent::SourceRemoved => self.remove(),
        }
    }

    /// The filter was removed from its parent.
    pub fn remove(&self) {
        self.shutdown(ShutdownTrigger::Removed);
    }

    /// Lifecycle teardown. Only the first trigger has any effect.
    pub fn shutdown(&self, trigger: ShutdownTrigger) {
        if self.publisher.shutdown(trigger) && self.render_registered.swap(false, Ordering::AcqRel) {
            self.host.remove_render_callback(self.id);
        }
    }

    /// Full teardown including GPU resources. Must run on the render thread.
    pub fn destroy(&self, gfx: &mut G) {
        self.shutdown(ShutdownTrigger::Destroy);
        if !self.graphics_released.swap(true, Ordering::AcqRel) {
            self.frame().release(gfx);
        }
    }
}

impl<G: Graphics> Drop for FilterContext<G> {
    fn drop(&mut self) {
        // GPU resources need the render thread; only the lifecycle can be torn down here.
        self.shutdown(ShutdownTrigger::Destroy);
    }
}
