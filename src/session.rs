//! Everything the render loop does between frames that isn't rendering.
//!
//! Pumps, in order: `host.json` hot reload, OSC controls, host events for the filter, and
//! the engine's event stream into our log.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use vcambridge_engine::config::ConfigMode;
use vcambridge_engine::gfx::Graphics;
use vcambridge_engine::{BridgeEvent, EventSink, FilterContext, HostEvent, LogLevel};

use crate::host::SimHost;
use crate::hotreload::HotReload;
use crate::osc::{connect_osc, Control, OscHandle};
use crate::pattern::PatternSource;
use crate::settings::{load_host_config, HostConfig, SourceCfg};
use crate::{loge, logi, logw};

pub struct Session {
    host: Arc<SimHost>,
    source: Arc<PatternSource>,
    events: Receiver<BridgeEvent>,
    control_tx: Sender<Control>,
    control_rx: Receiver<Control>,
    hot: Option<HotReload>,
    _osc: Option<OscHandle>,
    host_path: PathBuf,
    mode: ConfigMode,
    applied: SourceCfg,
    quit: bool,
}

impl Session {
    /// Returns the session and the sink the filter context should emit into.
    pub fn new(
        host: Arc<SimHost>,
        source: Arc<PatternSource>,
        cfg: &HostConfig,
        host_path: &Path,
        mode: ConfigMode,
    ) -> (Self, EventSink) {
        let (ev_tx, events) = unbounded();
        let (control_tx, control_rx) = unbounded();

        let hot = if host_path.exists() {
            match HotReload::new(host_path) {
                Ok(h) => {
                    logi!("HOT", "watching {}", host_path.display());
                    Some(h)
                }
                Err(e) => {
                    logw!("HOT", "hot reload unavailable: {e:#}");
                    None
                }
            }
        } else {
            None
        };

        let osc = connect_osc(&cfg.osc, control_tx.clone());

        let session = Self {
            host,
            source,
            events,
            control_tx,
            control_rx,
            hot,
            _osc: osc,
            host_path: host_path.to_path_buf(),
            mode,
            applied: cfg.source.clone(),
            quit: false,
        };
        (session, EventSink::new(ev_tx))
    }

    /// Sender for in-process controls (the window uses it for key bindings).
    pub fn controls(&self) -> Sender<Control> {
        self.control_tx.clone()
    }

    pub fn quit_requested(&self) -> bool {
        self.quit
    }

    pub fn request_quit(&mut self) {
        if !self.quit {
            self.host.post(HostEvent::Exit);
            self.quit = true;
        }
    }

    pub fn pump<G: Graphics>(&mut self, ctx: &FilterContext<G>) {
        if self.hot.as_ref().is_some_and(|h| h.changed()) {
            self.reload();
        }

        let controls: Vec<Control> = self.control_rx.try_iter().collect();
        for c in controls {
            self.apply_control(c);
        }

        for ev in self.host.drain() {
            logi!("HOST", "delivering {ev:?}");
            ctx.handle_host_event(ev);
        }

        self.drain_events();
    }

    /// Log anything the engine emitted since the last pump.
    pub fn drain_events(&self) {
        for ev in self.events.try_iter() {
            log_bridge_event(&ev);
        }
    }

    fn reload(&mut self) {
        match load_host_config(&self.host_path, self.mode) {
            Ok(cfg) => {
                logi!("HOT", "reloaded {}", self.host_path.display());
                self.apply_source(&cfg.source);
            }
            Err(e) => logw!("HOT", "reload failed, keeping previous settings: {e:#}"),
        }
    }

    fn apply_source(&mut self, next: &SourceCfg) {
        if next.width != self.applied.width || next.height != self.applied.height {
            logi!("HOT", "source size {}x{} -> {}x{}", self.applied.width, self.applied.height, next.width, next.height);
            self.source.set_size(next.width, next.height);
        }
        if next.enabled != self.applied.enabled {
            logi!("HOT", "source enabled -> {}", next.enabled);
            self.source.set_enabled(next.enabled);
        }
        self.applied = next.clone();
    }

    fn apply_control(&mut self, c: Control) {
        match c {
            Control::Enabled(on) => {
                self.source.set_enabled(on);
                self.applied.enabled = on;
            }
            Control::Size(w, h) => {
                self.source.set_size(w, h);
                self.applied.width = w;
                self.applied.height = h;
            }
            Control::Remove => {
                self.source.mark_removed();
                self.host.post(HostEvent::SourceRemoved);
            }
            Control::Quit => self.request_quit(),
        }
    }
}

fn log_bridge_event(ev: &BridgeEvent) {
    match ev {
        BridgeEvent::Log { level, tag, msg } => match level {
            LogLevel::Warn => logw!(tag, "{msg}"),
            LogLevel::Error => loge!(tag, "{msg}"),
            LogLevel::Trace | LogLevel::Debug | LogLevel::Info => logi!(tag, "{msg}"),
        },
        BridgeEvent::ChannelReopened { width, height, generation } => {
            logi!("CHANNEL", "ring reopened at {width}x{height} (gen {generation})")
        }
        BridgeEvent::ChannelReopenFailed { width, height, error } => {
            logw!("CHANNEL", "ring reopen at {width}x{height} failed, keeping previous: {error}")
        }
        BridgeEvent::OutputStarted { generation } => logi!("OUTPUT", "output started (gen {generation})"),
        BridgeEvent::OutputStopped { reason } => logi!("OUTPUT", "output stopped ({reason:?})"),
        BridgeEvent::StartFailed { error } => logw!("OUTPUT", "start failed, retrying after cooldown: {error}"),
        BridgeEvent::Shutdown { trigger } => logi!("BRIDGE", "context shut down ({trigger:?})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vcambridge_engine::software::SoftGraphics;
    use vcambridge_engine::testkit::{ManualClock, ManualSpawner, ScriptedEndpoint};
    use vcambridge_engine::{BridgeConfig, ContextParts, PublisherState, RingFactory, VideoInfo};

    struct Fixture {
        gfx: SoftGraphics,
        ctx: FilterContext<SoftGraphics>,
        session: Session,
        source: Arc<PatternSource>,
        host: Arc<SimHost>,
        spawner: Arc<ManualSpawner>,
    }

    fn fixture() -> Fixture {
        let mut gfx = SoftGraphics::new();
        let host = Arc::new(SimHost::new());
        let source = Arc::new(PatternSource::new(64, 36, true));
        let spawner = Arc::new(ManualSpawner::new());
        let cfg = HostConfig::default();
        let (session, events) = Session::new(
            host.clone(),
            source.clone(),
            &cfg,
            Path::new("/nonexistent/host.json"),
            ConfigMode::Lenient,
        );
        let ctx = FilterContext::new(
            1,
            BridgeConfig::default(),
            VideoInfo::new(30, 1),
            ContextParts::<SoftGraphics> {
                upstream: source.clone(),
                endpoint: Arc::new(ScriptedEndpoint::new()),
                channels: Arc::new(RingFactory),
                host: host.clone(),
                clock: Arc::new(ManualClock::new(Duration::from_secs(1))),
                spawner: spawner.clone(),
                events,
            },
            &mut gfx,
        );
        Fixture {
            gfx,
            ctx,
            session,
            source,
            host,
            spawner,
        }
    }

    #[test]
    fn controls_drive_the_source() {
        let mut f = fixture();
        let tx = f.session.controls();
        tx.send(Control::Size(320, 240)).unwrap();
        tx.send(Control::Enabled(false)).unwrap();
        f.session.pump(&f.ctx);
        assert_eq!(f.source.size(), (320, 240));
        assert!(!f.source.is_enabled());
    }

    #[test]
    fn remove_control_tears_the_context_down() {
        let mut f = fixture();
        f.ctx.tick(0.0);
        f.ctx.render_frame(&mut f.gfx);
        f.spawner.run_all();
        assert_eq!(f.ctx.state(), PublisherState::Running);

        f.session.controls().send(Control::Remove).unwrap();
        f.session.pump(&f.ctx);
        assert!(f.ctx.is_stopping());
        assert!(!f.host.is_registered(f.ctx.id()));
        assert_eq!(f.host.showing(), 0);
    }

    #[test]
    fn quit_posts_exit_once() {
        let mut f = fixture();
        f.session.controls().send(Control::Quit).unwrap();
        f.session.controls().send(Control::Quit).unwrap();
        f.session.pump(&f.ctx);
        assert!(f.session.quit_requested());
        assert!(f.ctx.is_stopping());
        assert!(f.host.drain().is_empty());
    }
}
