use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver};

use vcambridge_engine::channel::{ChannelFactory, RingFactory, VideoOutputInfo, VideoRing};
use vcambridge_engine::software::SoftGraphics;
use vcambridge_engine::testkit::{ManualClock, ManualSpawner, RecordingHost, ScriptedEndpoint, SolidSource};
use vcambridge_engine::{
    BridgeConfig, BridgeError, BridgeEvent, ChannelState, ContextParts, EventSink, FilterContext, HostEvent,
    PublisherState, ShutdownTrigger, StopReason, UpstreamSource, VideoInfo,
};

struct Rig {
    gfx: SoftGraphics,
    ctx: FilterContext<SoftGraphics>,
    source: Arc<SolidSource>,
    endpoint: Arc<ScriptedEndpoint>,
    host: Arc<RecordingHost>,
    clock: Arc<ManualClock>,
    spawner: Arc<ManualSpawner>,
    events: Receiver<BridgeEvent>,
}

impl Rig {
    fn new(width: u32, height: u32) -> Self {
        Self::with(width, height, Arc::new(RingFactory), SoftGraphics::new())
    }

    fn with(width: u32, height: u32, channels: Arc<dyn ChannelFactory>, mut gfx: SoftGraphics) -> Self {
        let source = Arc::new(SolidSource::new(width, height));
        Self::with_upstream(source.clone(), source, channels, &mut gfx).finish(gfx)
    }

    fn with_upstream(
        source: Arc<SolidSource>,
        upstream: Arc<dyn UpstreamSource<SoftGraphics>>,
        channels: Arc<dyn ChannelFactory>,
        gfx: &mut SoftGraphics,
    ) -> PartialRig {
        let endpoint = Arc::new(ScriptedEndpoint::new());
        let host = Arc::new(RecordingHost::new());
        let clock = Arc::new(ManualClock::new(Duration::from_secs(10)));
        let spawner = Arc::new(ManualSpawner::new());
        let (tx, events) = unbounded();

        let ctx = FilterContext::new(
            7,
            BridgeConfig::default(),
            VideoInfo::new(1000, 1),
            ContextParts {
                upstream,
                endpoint: endpoint.clone(),
                channels,
                host: host.clone(),
                clock: clock.clone(),
                spawner: spawner.clone(),
                events: EventSink::new(tx),
            },
            gfx,
        );

        PartialRig {
            ctx,
            source,
            endpoint,
            host,
            clock,
            spawner,
            events,
        }
    }

    fn render(&mut self) {
        self.ctx.render_frame(&mut self.gfx);
    }

    fn tick(&self) {
        self.ctx.tick(1.0 / 60.0);
    }

    /// Render, then let any background start finish.
    fn render_and_settle(&mut self) {
        self.render();
        self.spawner.run_all();
    }

    fn drain_events(&self) -> Vec<BridgeEvent> {
        self.events.try_iter().collect()
    }

    fn ring(&self) -> Arc<VideoRing> {
        self.ctx.publisher().live_ring().expect("live ring")
    }
}

struct PartialRig {
    ctx: FilterContext<SoftGraphics>,
    source: Arc<SolidSource>,
    endpoint: Arc<ScriptedEndpoint>,
    host: Arc<RecordingHost>,
    clock: Arc<ManualClock>,
    spawner: Arc<ManualSpawner>,
    events: Receiver<BridgeEvent>,
}

impl PartialRig {
    fn finish(self, gfx: SoftGraphics) -> Rig {
        Rig {
            gfx,
            ctx: self.ctx,
            source: self.source,
            endpoint: self.endpoint,
            host: self.host,
            clock: self.clock,
            spawner: self.spawner,
            events: self.events,
        }
    }
}

/// Refuses to open rings of one particular size.
struct RejectSize(u32, u32);

impl ChannelFactory for RejectSize {
    fn open(&self, info: &VideoOutputInfo) -> Result<Arc<VideoRing>, BridgeError> {
        if (info.width, info.height) == (self.0, self.1) {
            return Err(BridgeError::channel_open(info.width, info.height, "rejected"));
        }
        VideoRing::open(info)
    }
}

/// Paints a deterministic per-pixel pattern so copies can be compared byte for byte.
struct GradientSource {
    width: u32,
    height: u32,
}

impl GradientSource {
    fn image(&self) -> Vec<u8> {
        (0..self.width * self.height * 4).map(|i| (i.wrapping_mul(31) % 256) as u8).collect()
    }
}

impl UpstreamSource<SoftGraphics> for GradientSource {
    fn base_width(&self) -> u32 {
        self.width
    }
    fn base_height(&self) -> u32 {
        self.height
    }
    fn enabled(&self) -> bool {
        true
    }
    fn removed(&self) -> bool {
        false
    }
    fn render_video(&self, gfx: &mut SoftGraphics) {
        gfx.blit(&self.image(), self.width, self.height);
    }
}

#[test]
fn first_tick_registers_render_callback_once() {
    let rig = Rig::new(64, 48);
    assert!(rig.host.registered().is_empty());
    rig.tick();
    rig.tick();
    assert_eq!(rig.host.registered(), vec![7]);
}

#[test]
fn update_reregisters_render_callback() {
    let rig = Rig::new(64, 48);
    rig.tick();
    rig.ctx.update();
    assert_eq!(rig.host.registered(), vec![7]);
}

#[test]
fn enabled_source_starts_output_in_background() {
    let mut rig = Rig::new(64, 48);
    rig.render();

    assert_eq!(rig.ctx.width(), 64);
    assert_eq!(rig.ctx.height(), 48);
    assert_eq!(rig.ctx.state(), PublisherState::Starting);
    assert_eq!(rig.endpoint.starts.load(Ordering::Acquire), 0, "start must not run on the render thread");
    assert_eq!(rig.host.showing(), 0);

    assert_eq!(rig.spawner.run_all(), 1);
    assert_eq!(rig.ctx.state(), PublisherState::Running);
    assert!(rig.endpoint.is_running());
    assert_eq!(rig.host.showing(), 1);

    let bound = rig.endpoint.media().expect("ring bound before start");
    assert!(Arc::ptr_eq(&bound, &rig.ring()));
}

#[test]
fn disabled_source_never_starts() {
    let mut rig = Rig::new(64, 48);
    rig.source.set_enabled(false);
    for _ in 0..5 {
        rig.render();
        rig.tick();
    }
    assert_eq!(rig.spawner.spawned(), 0);
    assert_eq!(rig.ctx.state(), PublisherState::Stopped);
    // Frames still flow into the ring.
    assert!(rig.ring().stats().published >= 5);
}

#[test]
fn disabling_stops_running_output() {
    let mut rig = Rig::new(64, 48);
    rig.render_and_settle();
    assert_eq!(rig.ctx.state(), PublisherState::Running);

    rig.source.set_enabled(false);
    rig.tick();

    assert_eq!(rig.ctx.state(), PublisherState::Stopped);
    assert_eq!(rig.endpoint.stops.load(Ordering::Acquire), 1);
    assert_eq!(rig.host.showing(), 0);
    assert!(rig
        .drain_events()
        .iter()
        .any(|e| matches!(e, BridgeEvent::OutputStopped { reason: StopReason::Disabled })));
}

#[test]
fn failed_start_waits_out_cooldown() {
    let mut rig = Rig::new(64, 48);
    rig.endpoint.push_start_result(Err("device busy"));

    rig.render_and_settle();
    assert_eq!(rig.ctx.state(), PublisherState::Stopped);
    assert_eq!(rig.ctx.publisher().last_failed_start(), Some(Duration::from_secs(10)));
    assert_eq!(rig.host.shows.load(Ordering::Acquire), 0);

    rig.clock.advance(Duration::from_millis(900));
    for _ in 0..10 {
        rig.render();
        rig.tick();
    }
    assert_eq!(rig.spawner.spawned(), 1);
    assert_eq!(rig.ctx.state(), PublisherState::Stopped);

    rig.clock.advance(Duration::from_millis(200));
    rig.render();
    assert_eq!(rig.spawner.spawned(), 2);
    assert_eq!(rig.ctx.state(), PublisherState::Starting);

    rig.spawner.run_all();
    assert_eq!(rig.ctx.state(), PublisherState::Running);
}

#[test]
fn tick_alone_retries_after_cooldown() {
    let mut rig = Rig::new(64, 48);
    rig.endpoint.push_start_result(Err("nope"));
    rig.render_and_settle();

    rig.clock.advance(Duration::from_millis(1100));
    rig.tick();
    assert_eq!(rig.ctx.state(), PublisherState::Starting);
}

#[test]
fn only_one_start_in_flight() {
    let mut rig = Rig::new(64, 48);
    for _ in 0..20 {
        rig.render();
        rig.tick();
    }
    assert_eq!(rig.spawner.spawned(), 1);
    assert_eq!(rig.spawner.pending(), 1);
    assert!(rig.ctx.publisher().starting());

    rig.spawner.run_all();
    assert!(!rig.ctx.publisher().starting());
    rig.render();
    rig.tick();
    assert_eq!(rig.spawner.spawned(), 1);
}

#[test]
fn interleaved_callbacks_never_stack_starts() {
    let mut rig = Rig::new(32, 32);
    rig.endpoint.push_start_result(Err("a"));
    rig.endpoint.push_start_result(Err("b"));
    let mut seed: u32 = 0x1234_5678;
    for _ in 0..500 {
        seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        match seed >> 29 {
            0 | 1 | 2 => rig.render(),
            3 | 4 | 5 => rig.tick(),
            6 => {
                rig.spawner.run_next();
            }
            _ => {
                rig.clock.advance(Duration::from_millis(400));
                rig.source.set_enabled(seed & 1 == 0);
            }
        }
        assert!(rig.spawner.pending() <= 1);
    }
}

#[test]
fn output_follows_last_enable_signal() {
    let mut rig = Rig::new(16, 16);
    rig.render();
    rig.spawner.run_all();

    let mut seed: u32 = 42;
    for _ in 0..200 {
        seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        let enabled = (seed >> 16) & 1 == 1;
        rig.source.set_enabled(enabled);
        rig.tick();
        rig.spawner.run_all();

        let expected = if enabled { PublisherState::Running } else { PublisherState::Stopped };
        assert_eq!(rig.ctx.state(), expected);
        assert_eq!(rig.host.showing(), enabled as i64);
    }
}

#[test]
fn resize_while_running_restarts_against_new_ring() {
    let mut rig = Rig::new(1920, 1080);
    rig.render_and_settle();
    assert_eq!(rig.ctx.state(), PublisherState::Running);
    let old_ring = rig.ring();
    rig.drain_events();

    rig.source.set_size(1280, 720);
    rig.render();

    let new_ring = rig.ring();
    assert_eq!((new_ring.width(), new_ring.height()), (1280, 720));
    assert!(old_ring.stopped());
    assert!(old_ring.is_closed());
    assert!(rig.ctx.publisher().restart_pending());
    assert_eq!((rig.ctx.width(), rig.ctx.height()), (1280, 720));
    assert!(rig
        .drain_events()
        .iter()
        .any(|e| matches!(e, BridgeEvent::ChannelReopened { width: 1280, height: 720, .. })));

    rig.tick();
    assert_eq!(rig.ctx.state(), PublisherState::Stopped);
    assert!(!rig.ctx.publisher().restart_pending());
    assert!(!rig.ctx.publisher().output_active());
    assert_eq!(rig.host.showing(), 0);

    rig.tick();
    assert_eq!(rig.ctx.state(), PublisherState::Starting);
    rig.spawner.run_all();
    assert_eq!(rig.ctx.state(), PublisherState::Running);
    assert!(Arc::ptr_eq(&rig.endpoint.media().unwrap(), &new_ring));
    assert_eq!(rig.host.showing(), 1);
}

#[test]
fn disable_after_resize_consumes_the_restart() {
    let mut rig = Rig::new(64, 48);
    rig.render_and_settle();
    assert_eq!(rig.ctx.state(), PublisherState::Running);
    rig.drain_events();

    rig.source.set_size(32, 24);
    rig.source.set_enabled(false);
    rig.render();
    assert_eq!(rig.ctx.state(), PublisherState::Stopped);
    assert!(!rig.ctx.publisher().restart_pending());

    rig.source.set_enabled(true);
    rig.tick();
    rig.spawner.run_all();
    assert_eq!(rig.ctx.state(), PublisherState::Running);
    assert!(Arc::ptr_eq(&rig.endpoint.media().unwrap(), &rig.ring()));

    rig.tick();
    rig.tick();
    assert_eq!(rig.ctx.state(), PublisherState::Running);
    assert_eq!(ScriptedEndpoint::count(&rig.endpoint.stops), 1);
    assert_eq!(rig.host.showing(), 1);
    let stops: Vec<_> = rig
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            BridgeEvent::OutputStopped { reason } => Some(reason),
            _ => None,
        })
        .collect();
    assert_eq!(stops, vec![StopReason::Disabled]);
}

#[test]
fn resize_before_output_runs_does_not_schedule_restart() {
    let mut rig = Rig::new(640, 480);
    rig.source.set_enabled(false);
    rig.render();
    rig.source.set_size(320, 240);
    rig.render();
    assert!(!rig.ctx.publisher().restart_pending());
    assert_eq!(rig.ctx.publisher().channel_generation(), 2);
}

#[test]
fn ring_replaced_during_start_forces_restart() {
    let mut rig = Rig::new(640, 480);
    rig.render();
    assert_eq!(rig.ctx.state(), PublisherState::Starting);

    rig.source.set_size(800, 600);
    rig.render();
    rig.spawner.run_all();

    assert_eq!(rig.ctx.state(), PublisherState::Running);
    assert!(rig.ctx.publisher().restart_pending());
    rig.tick();
    assert_eq!(rig.ctx.state(), PublisherState::Stopped);
    rig.tick();
    rig.spawner.run_all();
    assert!(Arc::ptr_eq(&rig.endpoint.media().unwrap(), &rig.ring()));
}

#[test]
fn failed_reopen_keeps_old_size_and_ring() {
    let mut rig = Rig::with(1920, 1080, Arc::new(RejectSize(1280, 720)), SoftGraphics::new());
    rig.render_and_settle();
    let ring = rig.ring();

    rig.source.set_size(1280, 720);
    rig.render();

    assert_eq!((rig.ctx.width(), rig.ctx.height()), (1920, 1080));
    assert!(Arc::ptr_eq(&ring, &rig.ring()));
    assert!(!rig.ctx.publisher().restart_pending());
    assert_eq!(rig.ctx.state(), PublisherState::Running);
    assert!(rig
        .drain_events()
        .iter()
        .any(|e| matches!(e, BridgeEvent::ChannelReopenFailed { width: 1280, .. })));

    // Retried on the next frame, and succeeds once the size is acceptable again.
    rig.source.set_size(1024, 576);
    rig.render();
    assert_eq!((rig.ctx.width(), rig.ctx.height()), (1024, 576));
}

#[test]
fn zero_sized_source_opens_nothing() {
    let mut rig = Rig::new(0, 720);
    rig.render();
    rig.tick();
    assert_eq!(rig.ctx.publisher().channel_state(), ChannelState::Closed);
    assert_eq!(rig.spawner.spawned(), 0);
    assert_eq!(rig.source.renders.load(Ordering::Acquire), 0);
}

#[test]
fn removed_upstream_skips_render() {
    let mut rig = Rig::new(64, 64);
    rig.source.set_removed(true);
    rig.render();
    assert_eq!(rig.source.renders.load(Ordering::Acquire), 0);
    assert_eq!(rig.ctx.publisher().channel_state(), ChannelState::Closed);
}

#[test]
fn captured_frame_matches_upstream_bytes() {
    let (w, h) = (37, 11);
    let upstream = Arc::new(GradientSource { width: w, height: h });
    let expected = upstream.image();
    let mut gfx = SoftGraphics::with_row_padding(24);
    let source = Arc::new(SolidSource::new(w, h));
    let mut rig = Rig::with_upstream(source, upstream, Arc::new(RingFactory), &mut gfx).finish(gfx);

    rig.render();
    let reader = rig.ring().attach_reader();
    rig.render();

    let mut last = None;
    while let Some(f) = reader.next_frame(Duration::ZERO) {
        last = Some(f);
    }
    let frame = last.expect("frame published");
    assert_eq!((frame.width, frame.height), (w, h));
    let row = (w * 4) as usize;
    for y in 0..h as usize {
        let got = &frame.data[y * frame.linesize as usize..][..row];
        assert_eq!(got, &expected[y * row..][..row], "row {y}");
    }
}

#[test]
fn frames_carry_clock_timestamps() {
    let mut rig = Rig::new(8, 8);
    rig.render();
    let reader = rig.ring().attach_reader();
    let _ = reader.next_frame(Duration::ZERO);

    rig.clock.advance(Duration::from_millis(33));
    rig.render();
    let f = reader.next_frame(Duration::ZERO).unwrap();
    assert_eq!(f.timestamp, Duration::from_millis(10_033).as_nanos() as u64);
}

#[test]
fn destroy_during_outstanding_start_is_safe() {
    let mut rig = Rig::new(64, 48);
    rig.tick();
    rig.render();
    assert_eq!(rig.spawner.pending(), 1);

    rig.ctx.destroy(&mut rig.gfx);
    assert_eq!(rig.ctx.state(), PublisherState::ForceStopped);
    assert_eq!(rig.ctx.publisher().channel_state(), ChannelState::Closed);
    assert_eq!(rig.endpoint.force_stops.load(Ordering::Acquire), 1);
    assert_eq!(rig.endpoint.data_capture_ends.load(Ordering::Acquire), 1);
    assert!(rig.endpoint.media().is_none());
    assert!(rig.host.registered().is_empty());
    assert_eq!(rig.gfx.stats().targets_destroyed, 1);

    // The straggling start completes after teardown.
    rig.spawner.run_all();
    assert!(!rig.endpoint.is_running());
    assert_eq!(rig.endpoint.force_stops.load(Ordering::Acquire), 2);
    assert!(!rig.ctx.publisher().output_active());
    assert!(!rig.ctx.publisher().starting());
    assert_eq!(rig.host.showing(), 0);
    assert_eq!(rig.ctx.state(), PublisherState::ForceStopped);
}

#[test]
fn nothing_happens_after_shutdown() {
    let mut rig = Rig::new(64, 48);
    rig.tick();
    rig.render_and_settle();
    assert_eq!(rig.host.showing(), 1);

    rig.ctx.handle_host_event(HostEvent::Exit);
    assert_eq!(rig.host.showing(), 0);
    assert!(rig.host.registered().is_empty());

    let renders = rig.source.renders.load(Ordering::Acquire);
    let spawned = rig.spawner.spawned();
    for _ in 0..5 {
        rig.render();
        rig.tick();
        rig.ctx.update();
    }
    assert_eq!(rig.source.renders.load(Ordering::Acquire), renders);
    assert_eq!(rig.spawner.spawned(), spawned);
    assert!(rig.host.registered().is_empty());
    assert_eq!(rig.ctx.width(), 64);
}

#[test]
fn repeated_shutdown_triggers_are_noops() {
    let mut rig = Rig::new(64, 48);
    rig.tick();
    rig.render_and_settle();
    rig.drain_events();

    rig.ctx.handle_host_event(HostEvent::CollectionCleanup);
    rig.ctx.handle_host_event(HostEvent::Exit);
    rig.ctx.remove();
    rig.ctx.destroy(&mut rig.gfx);
    rig.ctx.destroy(&mut rig.gfx);

    let shutdowns: Vec<_> = rig
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            BridgeEvent::Shutdown { trigger } => Some(trigger),
            _ => None,
        })
        .collect();
    assert_eq!(shutdowns, vec![ShutdownTrigger::CollectionCleanup]);
    assert_eq!(rig.endpoint.force_stops.load(Ordering::Acquire), 1);
    assert_eq!(rig.host.hides.load(Ordering::Acquire), 1);
    assert_eq!(rig.gfx.stats().targets_destroyed, 1);
}

#[test]
fn source_removed_event_tears_down() {
    let rig = Rig::new(64, 48);
    rig.tick();
    rig.ctx.handle_host_event(HostEvent::SourceRemoved);
    assert_eq!(rig.ctx.state(), PublisherState::ForceStopped);
    assert!(rig
        .drain_events()
        .iter()
        .any(|e| matches!(e, BridgeEvent::Shutdown { trigger: ShutdownTrigger::Removed })));
}

#[test]
fn refused_spawn_counts_as_failed_start() {
    let mut rig = Rig::new(64, 48);
    rig.spawner.fail_next.store(true, Ordering::Release);
    rig.render();

    assert_eq!(rig.ctx.state(), PublisherState::Stopped);
    assert_eq!(rig.ctx.publisher().last_failed_start(), Some(Duration::from_secs(10)));

    rig.render();
    assert_eq!(rig.spawner.spawned(), 0);
    rig.clock.advance(Duration::from_secs(1));
    rig.render();
    assert_eq!(rig.spawner.spawned(), 1);
}

#[test]
fn passthrough_renders_upstream_untouched() {
    let mut rig = Rig::new(4, 4);
    rig.ctx.render_passthrough(&mut rig.gfx);
    assert_eq!(rig.source.renders.load(Ordering::Acquire), 1);
    assert_eq!(rig.gfx.stats().passes, 0);
}

#[test]
fn staging_surface_follows_resizes() {
    let mut rig = Rig::new(64, 48);
    rig.render();
    rig.source.set_size(32, 24);
    rig.render();
    assert_eq!(rig.gfx.stats().stages_created, 2);
    assert_eq!(rig.gfx.stats().stages_destroyed, 1);
}
