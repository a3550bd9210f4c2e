use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::assets::{read_to_string_result, AssetsRoot};
use crate::error::BridgeError;

/// How strictly to interpret/validate config files.
///
/// - `Lenient` is forward-compatible: unknown fields are ignored and missing optional
///   keys fall back to defaults.
/// - `Strict` is fail-fast: unknown fields and unsupported versions become errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigMode {
    Lenient,
    Strict,
}

/// Typed view of `assets/bridge.json`.
///
/// Versioning: `version` defaults to 1 when omitted.
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Name given to the video ring and reported by the output endpoint.
    #[serde(default = "default_name")]
    pub name: String,

    /// Number of frames the ring keeps in flight.
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,

    /// Minimum delay between a failed output start and the next attempt.
    #[serde(default = "default_retry_cooldown_ms")]
    pub retry_cooldown_ms: u64,

    /// Frames each ring write stands for. A refused write lock counts this many as skipped;
    /// the render thread never waits for a slot.
    #[serde(default = "default_lock_timeout_frames")]
    pub lock_timeout_frames: u32,
}

/// Strict version of `BridgeConfig` that fails on unknown fields.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct BridgeConfigStrict {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default = "default_name")]
    name: String,
    #[serde(default = "default_cache_size")]
    cache_size: usize,
    #[serde(default = "default_retry_cooldown_ms")]
    retry_cooldown_ms: u64,
    #[serde(default = "default_lock_timeout_frames")]
    lock_timeout_frames: u32,
}

fn default_version() -> u32 {
    1
}
fn default_name() -> String {
    "Virtual Camera".to_string()
}
fn default_cache_size() -> usize {
    16
}
fn default_retry_cooldown_ms() -> u64 {
    1000
}
fn default_lock_timeout_frames() -> u32 {
    1
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            name: default_name(),
            cache_size: default_cache_size(),
            retry_cooldown_ms: default_retry_cooldown_ms(),
            lock_timeout_frames: default_lock_timeout_frames(),
        }
    }
}

impl From<BridgeConfigStrict> for BridgeConfig {
    fn from(s: BridgeConfigStrict) -> Self {
        Self {
            version: s.version,
            name: s.name,
            cache_size: s.cache_size,
            retry_cooldown_ms: s.retry_cooldown_ms,
            lock_timeout_frames: s.lock_timeout_frames,
        }
    }
}

impl BridgeConfig {
    pub fn retry_cooldown(&self) -> Duration {
        Duration::from_millis(self.retry_cooldown_ms)
    }
}

/// Global video pipeline settings, captured once when a context is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoInfo {
    pub fps_num: u32,
    pub fps_den: u32,
}

impl VideoInfo {
    pub fn new(fps_num: u32, fps_den: u32) -> Self {
        Self { fps_num, fps_den }
    }

    /// Duration of one frame. Degenerate rates fall back to 60 fps.
    pub fn frame_interval(&self) -> Duration {
        if self.fps_num == 0 || self.fps_den == 0 {
            return Duration::from_nanos(1_000_000_000 / 60);
        }
        Duration::from_nanos(1_000_000_000u64 * self.fps_den as u64 / self.fps_num as u64)
    }
}

impl Default for VideoInfo {
    fn default() -> Self {
        Self { fps_num: 30, fps_den: 1 }
    }
}

/// Load `bridge(.<os>).json` from the assets directory.
///
/// A missing file is not an error: the defaults are returned.
pub fn load_bridge_config(assets: &AssetsRoot, mode: ConfigMode) -> Result<BridgeConfig, BridgeError> {
    let path = assets.pick_platform_json("bridge");
    if !path.exists() {
        return Ok(BridgeConfig::default());
    }
    load_bridge_config_file(&path, mode)
}

/// Load a specific bridge config file.
pub fn load_bridge_config_file(path: &Path, mode: ConfigMode) -> Result<BridgeConfig, BridgeError> {
    let src = read_to_string_result(path)?;
    parse_bridge_config(&src, path, mode)
}

pub fn parse_bridge_config(src: &str, path: &Path, mode: ConfigMode) -> Result<BridgeConfig, BridgeError> {
    let json_err = |e| BridgeError::Json {
        path: path.to_path_buf(),
        source: e,
    };
    let cfg: BridgeConfig = match mode {
        ConfigMode::Lenient => serde_json::from_str(src).map_err(json_err)?,
        ConfigMode::Strict => serde_json::from_str::<BridgeConfigStrict>(src)
            .map_err(json_err)?
            .into(),
    };
    validate(&cfg, path, mode)?;
    Ok(cfg)
}

fn validate(cfg: &BridgeConfig, path: &Path, mode: ConfigMode) -> Result<(), BridgeError> {
    let invalid = |msg: String| BridgeError::InvalidConfig {
        path: PathBuf::from(path),
        msg,
    };

    if mode == ConfigMode::Strict && cfg.version != 1 {
        return Err(invalid(format!(
            "unsupported bridge.json version {} (expected 1)",
            cfg.version
        )));
    }
    if cfg.cache_size == 0 {
        return Err(invalid("cache_size must be at least 1".into()));
    }
    if cfg.lock_timeout_frames == 0 {
        return Err(invalid("lock_timeout_frames must be at least 1".into()));
    }
    Ok(())
}
