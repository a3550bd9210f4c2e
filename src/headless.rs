//! Headless runner: CPU compositing, no window, paced at the pipeline frame rate.

use std::sync::Arc;
use std::time::Instant;

use vcambridge_engine::software::SoftGraphics;
use vcambridge_engine::FilterContext;

use crate::app::{context_parts, finish, App, CONTEXT_ID};
use crate::host::SimHost;
use crate::logi;
use crate::output::RingEndpoint;
use crate::pattern::PatternSource;
use crate::session::Session;

pub fn run(app: &App, endpoint: Arc<RingEndpoint>) -> anyhow::Result<()> {
    let video = app.host_cfg.video.info();
    let src = &app.host_cfg.source;

    let mut gfx = SoftGraphics::new();
    let host = Arc::new(SimHost::new());
    let source = Arc::new(PatternSource::new(src.width, src.height, src.enabled));
    let (mut session, events) = Session::new(host.clone(), source.clone(), &app.host_cfg, &app.host_path, app.mode);

    let ctx = FilterContext::new(
        CONTEXT_ID,
        app.bridge.clone(),
        video,
        context_parts::<SoftGraphics>(source.clone(), endpoint.clone(), host.clone(), events),
        &mut gfx,
    );

    let interval = video.frame_interval();
    let limit = app.frame_limit();
    logi!("HEADLESS", "running at {:?}/frame, limit={limit:?}", interval);

    let mut rendered = 0u64;
    let mut last = Instant::now();
    let mut next = last + interval;

    loop {
        session.pump(&ctx);
        if session.quit_requested() {
            break;
        }

        let now = Instant::now();
        ctx.tick(now.duration_since(last).as_secs_f32());
        last = now;

        if host.is_registered(ctx.id()) {
            ctx.render_frame(&mut gfx);
            rendered += 1;
        }
        source.advance();

        if limit.is_some_and(|n| rendered >= n) {
            logi!("HEADLESS", "frame limit reached");
            break;
        }

        let now = Instant::now();
        if next > now {
            std::thread::sleep(next - now);
            next += interval;
        } else {
            // Fell behind; don't try to catch up with a burst.
            next = now + interval;
        }
    }

    session.request_quit();
    session.pump(&ctx);
    ctx.destroy(&mut gfx);
    session.drain_events();

    let s = gfx.stats();
    logi!(
        "HEADLESS",
        "gfx: targets {}/{} stages {}/{} maps={} passes={}",
        s.targets_created,
        s.targets_destroyed,
        s.stages_created,
        s.stages_destroyed,
        s.maps,
        s.passes
    );
    finish(&endpoint, rendered);
    Ok(())
}
