mod app;
mod gl_backend;
mod headless;
mod host;
mod hotreload;
mod logging;
mod osc;
mod output;
mod pattern;
mod presenter;
mod session;
mod settings;
mod validate;
mod window;

use std::path::{Path, PathBuf};

use anyhow::Context;
use vcambridge_engine::assets::AssetsRoot;
use vcambridge_engine::config::{load_bridge_config, ConfigMode};

use crate::app::App;
use crate::settings::load_host_config;

#[derive(Debug, Default)]
struct Args {
    log_file: Option<PathBuf>,
    headless: bool,
    frames: Option<u64>,
    strict: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(a) = it.next() {
        match a.as_str() {
            "--log-file" => args.log_file = it.next().map(PathBuf::from),
            "--headless" => args.headless = true,
            "--strict" => args.strict = true,
            "--frames" => {
                let n = it.next().context("--frames needs a count")?;
                args.frames = Some(n.parse().with_context(|| format!("--frames: bad count '{n}'"))?);
            }
            other => logw!("INIT", "ignoring unknown argument '{other}'"),
        }
    }
    if args.log_file.is_none() {
        if let Ok(p) = std::env::var("VCAMBRIDGE_LOG_FILE") {
            if !p.trim().is_empty() {
                args.log_file = Some(PathBuf::from(p));
            }
        }
    }
    Ok(args)
}

fn run() -> anyhow::Result<()> {
    let args = parse_args()?;
    let run_id = logging::init(args.log_file.clone());
    logi!("INIT", "run_id={run_id}");

    let mode = if args.strict { ConfigMode::Strict } else { ConfigMode::Lenient };
    let assets = AssetsRoot::discover(Path::new(env!("CARGO_MANIFEST_DIR")))?;
    logi!("INIT", "assets base: {}", assets.path().display());

    let bridge = load_bridge_config(&assets, mode)?;
    logi!(
        "INIT",
        "bridge: name='{}' cache={} cooldown={}ms frames_per_write={}",
        bridge.name,
        bridge.cache_size,
        bridge.retry_cooldown_ms,
        bridge.lock_timeout_frames
    );

    let host_path = assets.pick_platform_json("host");
    let host_cfg = load_host_config(&host_path, mode)?;
    logi!("INIT", "host.json: {}", host_path.display());

    let headless = args.headless || host_cfg.run.headless;
    // GL readback is bottom-up; the software compositor writes top-down.
    let vflip = !headless;
    let endpoint = output::build_endpoint(&host_cfg.output, &bridge.name, vflip)?;

    let app = App {
        assets,
        bridge,
        host_cfg,
        host_path,
        mode,
        frames: args.frames,
    };

    if headless {
        headless::run(&app, endpoint)
    } else {
        window::run(&app, endpoint)
    }
}

fn main() {
    if let Err(e) = run() {
        loge!("INIT", "{e:#}");
        std::process::exit(1);
    }
}
