//! Windowed runner: OpenGL compositing with a letterboxed preview of the captured frames.
//!
//! Keys: `E` toggles the source, `1`/`2`/`3` resize it to 640x360/1280x720/1920x1080,
//! `R` removes the filter, `Esc` quits.

use std::ffi::CString;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context};
use glow::HasContext;
use glutin::config::ConfigTemplateBuilder;
use glutin::context::{ContextApi, ContextAttributesBuilder, NotCurrentContext, Version};
use glutin::display::GetGlDisplay;
use glutin::prelude::*;
use glutin::surface::{SurfaceAttributesBuilder, SwapInterval, WindowSurface};
use glutin_winit::DisplayBuilder;
use raw_window_handle::HasRawWindowHandle;
use vcambridge_engine::FilterContext;
use winit::dpi::PhysicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};

use crate::app::{context_parts, finish, App, CONTEXT_ID};
use crate::gl_backend::{compile_program, GlGraphics, VERT_SRC};
use crate::host::SimHost;
use crate::osc::Control;
use crate::output::RingEndpoint;
use crate::pattern::PatternSource;
use crate::presenter::{NullPresenter, Presenter, WindowPresenter};
use crate::session::Session;
use crate::{logi, logw};

fn key_control(code: KeyCode, source: &PatternSource) -> Option<Control> {
    match code {
        KeyCode::KeyE => Some(Control::Enabled(!source.is_enabled())),
        KeyCode::Digit1 | KeyCode::Numpad1 => Some(Control::Size(640, 360)),
        KeyCode::Digit2 | KeyCode::Numpad2 => Some(Control::Size(1280, 720)),
        KeyCode::Digit3 | KeyCode::Numpad3 => Some(Control::Size(1920, 1080)),
        KeyCode::KeyR => Some(Control::Remove),
        KeyCode::Escape => Some(Control::Quit),
        _ => None,
    }
}

pub fn run(app: &App, endpoint: Arc<RingEndpoint>) -> anyhow::Result<()> {
    let preview = &app.host_cfg.preview;
    let pattern_path = app.assets.join("shaders/pattern.frag");
    let present_path = app.assets.join("shaders/present.frag");
    let pattern_src =
        std::fs::read_to_string(&pattern_path).with_context(|| format!("read {}", pattern_path.display()))?;
    let present_src =
        std::fs::read_to_string(&present_path).with_context(|| format!("read {}", present_path.display()))?;

    let (win_w, win_h) = (preview.width.max(1), preview.height.max(1));
    let event_loop = EventLoop::new().context("create event loop")?;
    let window_builder = winit::window::WindowBuilder::new()
        .with_title(format!("vcambridge - {}", app.bridge.name))
        .with_inner_size(PhysicalSize::new(win_w, win_h))
        .with_visible(preview.enabled);

    let template = ConfigTemplateBuilder::new().with_alpha_size(8).with_depth_size(0);
    let display_builder = DisplayBuilder::new().with_window_builder(Some(window_builder));

    let (window, gl_config) = display_builder
        .build(&event_loop, template, |configs| {
            // glutin never calls this with an empty iterator.
            configs
                .reduce(|a, b| if a.num_samples() > b.num_samples() { a } else { b })
                .unwrap()
        })
        .map_err(|e| anyhow!("build display: {e}"))?;
    let window = window.ok_or_else(|| anyhow!("no window created"))?;

    let raw_window_handle = window.raw_window_handle();
    let gl_display = gl_config.display();

    let context_attributes = ContextAttributesBuilder::new()
        .with_context_api(ContextApi::OpenGl(Some(Version::new(3, 3))))
        .build(Some(raw_window_handle));

    let not_current: NotCurrentContext = unsafe {
        gl_display
            .create_context(&gl_config, &context_attributes)
            .context("create GL context")?
    };

    let size = window.inner_size();
    let attrs = SurfaceAttributesBuilder::<WindowSurface>::new().build(
        raw_window_handle,
        NonZeroU32::new(size.width.max(1)).unwrap_or(NonZeroU32::MIN),
        NonZeroU32::new(size.height.max(1)).unwrap_or(NonZeroU32::MIN),
    );
    let gl_surface = unsafe {
        gl_display
            .create_window_surface(&gl_config, &attrs)
            .context("create window surface")?
    };
    let gl_context = not_current.make_current(&gl_surface).context("make GL context current")?;

    let interval = if preview.vsync {
        SwapInterval::Wait(NonZeroU32::MIN)
    } else {
        SwapInterval::DontWait
    };
    if let Err(e) = gl_surface.set_swap_interval(&gl_context, interval) {
        logw!("WINDOW", "could not set swap interval: {e}");
    }

    let gl = unsafe {
        glow::Context::from_loader_function(|s| match CString::new(s) {
            Ok(name) => gl_display.get_proc_address(&name) as *const _,
            Err(_) => std::ptr::null(),
        })
    };

    let mut presenter = if preview.enabled {
        let program = unsafe { compile_program(&gl, VERT_SRC, &present_src)? };
        let vao = unsafe { gl.create_vertex_array().map_err(|e| anyhow!("create vertex array: {e}"))? };
        Presenter::Window(WindowPresenter { program, vao })
    } else {
        Presenter::Null(NullPresenter)
    };
    let mut gfx = GlGraphics::new(gl, &pattern_src)?;

    let video = app.host_cfg.video.info();
    let src = &app.host_cfg.source;
    let host = Arc::new(SimHost::new());
    let source = Arc::new(PatternSource::new(src.width, src.height, src.enabled));
    let (mut session, events) = Session::new(host.clone(), source.clone(), &app.host_cfg, &app.host_path, app.mode);
    let controls = session.controls();

    let ctx = FilterContext::new(
        CONTEXT_ID,
        app.bridge.clone(),
        video,
        context_parts::<GlGraphics>(source.clone(), endpoint.clone(), host.clone(), events),
        &mut gfx,
    );

    let limit = app.frame_limit();
    logi!(
        "WINDOW",
        "preview={} {}x{} vsync={} limit={limit:?}",
        presenter.is_enabled(),
        win_w,
        win_h,
        preview.vsync
    );

    let mut rendered = 0u64;
    let mut last = Instant::now();
    let mut torn_down = false;

    event_loop
        .run(move |event, target| {
            target.set_control_flow(ControlFlow::Poll);

            match event {
                Event::WindowEvent { event, .. } => match event {
                    WindowEvent::CloseRequested => target.exit(),

                    WindowEvent::KeyboardInput { event, .. } => {
                        if event.state.is_pressed() && !event.repeat {
                            if let PhysicalKey::Code(code) = event.physical_key {
                                if let Some(c) = key_control(code, &source) {
                                    logi!("WINDOW", "key {code:?} -> {c:?}");
                                    let _ = controls.send(c);
                                }
                            }
                        }
                    }

                    WindowEvent::Resized(new_size) => {
                        if let (Some(w), Some(h)) = (NonZeroU32::new(new_size.width), NonZeroU32::new(new_size.height)) {
                            gl_surface.resize(&gl_context, w, h);
                        }
                    }

                    WindowEvent::RedrawRequested => {
                        session.pump(&ctx);
                        if session.quit_requested() {
                            target.exit();
                            return;
                        }

                        let now = Instant::now();
                        ctx.tick(now.duration_since(last).as_secs_f32());
                        last = now;

                        if host.is_registered(ctx.id()) {
                            ctx.render_frame(&mut gfx);
                            rendered += 1;
                        }
                        source.advance();

                        let size = window.inner_size();
                        let out = if ctx.is_stopping() { None } else { gfx.last_output() };
                        presenter.present(gfx.gl(), out, size.width as i32, size.height as i32, || {
                            if let Err(e) = gl_surface.swap_buffers(&gl_context) {
                                logw!("WINDOW", "swap_buffers failed: {e}");
                            }
                        });

                        if limit.is_some_and(|n| rendered >= n) {
                            logi!("WINDOW", "frame limit reached");
                            target.exit();
                        }
                    }

                    _ => {}
                },

                Event::AboutToWait => window.request_redraw(),

                Event::LoopExiting if !torn_down => {
                    torn_down = true;
                    session.request_quit();
                    session.pump(&ctx);
                    ctx.destroy(&mut gfx);
                    session.drain_events();
                    presenter.destroy(gfx.gl());
                    gfx.destroy();
                    finish(&endpoint, rendered);
                }

                _ => {}
            }
        })
        .map_err(|e| anyhow!("event loop: {e}"))
}
