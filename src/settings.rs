//! Runner configuration (`host.json`).
//!
//! Every field has a default so a partial file (or no file at all) still runs.

use std::path::Path;

use anyhow::{bail, Context};
use serde::Deserialize;
use vcambridge_engine::config::ConfigMode;
use vcambridge_engine::VideoInfo;

use crate::validate::{self, IssueLevel};

#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub source: SourceCfg,
    #[serde(default)]
    pub video: VideoCfg,
    #[serde(default)]
    pub run: RunCfg,
    #[serde(default)]
    pub preview: PreviewCfg,
    #[serde(default)]
    pub output: OutputCfg,
    #[serde(default)]
    pub osc: OscCfg,
}

fn default_version() -> u32 {
    1
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            source: SourceCfg::default(),
            video: VideoCfg::default(),
            run: RunCfg::default(),
            preview: PreviewCfg::default(),
            output: OutputCfg::default(),
            osc: OscCfg::default(),
        }
    }
}

/// The synthetic upstream node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceCfg {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_true() -> bool {
    true
}

impl Default for SourceCfg {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            enabled: true,
        }
    }
}

/// Global pipeline frame rate, fixed for the lifetime of a context.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct VideoCfg {
    #[serde(default = "default_fps_num")]
    pub fps_num: u32,
    #[serde(default = "default_fps_den")]
    pub fps_den: u32,
}

fn default_fps_num() -> u32 {
    30
}
fn default_fps_den() -> u32 {
    1
}

impl Default for VideoCfg {
    fn default() -> Self {
        Self {
            fps_num: default_fps_num(),
            fps_den: default_fps_den(),
        }
    }
}

impl VideoCfg {
    pub fn info(&self) -> VideoInfo {
        VideoInfo::new(self.fps_num, self.fps_den)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunCfg {
    #[serde(default)]
    pub headless: bool,
    /// Stop after this many frames. Runs until quit when absent.
    #[serde(default)]
    pub frames: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreviewCfg {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_true")]
    pub vsync: bool,
}

impl Default for PreviewCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            width: default_width(),
            height: default_height(),
            vsync: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Raw BGRA into an ffmpeg child (v4l2loopback by default).
    Pipe,
    Ndi,
    /// Drain and count frames.
    Null,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputCfg {
    #[serde(default = "default_output_kind")]
    pub kind: OutputKind,
    #[serde(default)]
    pub pipe: PipeCfg,
    #[serde(default)]
    pub ndi: NdiCfg,
}

fn default_output_kind() -> OutputKind {
    OutputKind::Pipe
}

impl Default for OutputCfg {
    fn default() -> Self {
        Self {
            kind: default_output_kind(),
            pipe: PipeCfg::default(),
            ndi: NdiCfg::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipeCfg {
    #[serde(default)]
    pub ffmpeg_path: Option<String>,
    /// Everything after the raw-video input: filters, encoder and destination.
    #[serde(default = "default_pipe_output_args")]
    pub output_args: Vec<String>,
}

fn default_pipe_output_args() -> Vec<String> {
    ["-f", "v4l2", "-pix_fmt", "yuv420p", "/dev/video10"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for PipeCfg {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            output_args: default_pipe_output_args(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NdiCfg {
    /// Source name; falls back to the bridge's channel name.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub groups: Option<String>,
    #[serde(default = "default_true")]
    pub clock_video: bool,
}

impl Default for NdiCfg {
    fn default() -> Self {
        Self {
            name: None,
            groups: None,
            clock_video: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OscCfg {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_osc_bind")]
    pub bind: String,
    #[serde(default = "default_osc_prefix")]
    pub prefix: String,
}

fn default_osc_bind() -> String {
    "127.0.0.1:9000".into()
}
fn default_osc_prefix() -> String {
    "/vcam".into()
}

impl Default for OscCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: default_osc_bind(),
            prefix: default_osc_prefix(),
        }
    }
}

/// Load and validate `host.json`. A missing file yields defaults.
///
/// Validation issues are always logged. In strict mode any error-level issue fails the load.
pub fn load_host_config(path: &Path, mode: ConfigMode) -> anyhow::Result<HostConfig> {
    if !path.exists() {
        crate::logw!("CONFIG", "{} not found, using defaults", path.display());
        return Ok(HostConfig::default());
    }
    let src = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_host_config(&src, mode).with_context(|| format!("load {}", path.display()))
}

pub fn parse_host_config(src: &str, mode: ConfigMode) -> anyhow::Result<HostConfig> {
    let value: serde_json::Value = serde_json::from_str(src)?;

    let issues = validate::validate_host_json(&value, mode);
    validate::emit_summary("CONFIG", "host.json", &issues);
    validate::emit_issues("CONFIG", &issues);

    if mode == ConfigMode::Strict {
        let errors = issues.iter().filter(|i| i.level == IssueLevel::Error).count();
        if errors > 0 {
            bail!("{errors} validation error(s) in strict mode");
        }
    }

    Ok(serde_json::from_value(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_defaults() {
        let cfg = parse_host_config("{}", ConfigMode::Lenient).unwrap();
        assert_eq!(cfg.source, SourceCfg::default());
        assert_eq!(cfg.output.kind, OutputKind::Pipe);
        assert_eq!(cfg.output.pipe.output_args.last().map(String::as_str), Some("/dev/video10"));
        assert_eq!(cfg.video.info(), VideoInfo::new(30, 1));
        assert!(!cfg.osc.enabled);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = parse_host_config(
            r#"{ "source": { "width": 640 }, "output": { "kind": "null" }, "run": { "frames": 90 } }"#,
            ConfigMode::Lenient,
        )
        .unwrap();
        assert_eq!((cfg.source.width, cfg.source.height), (640, 720));
        assert!(cfg.source.enabled);
        assert_eq!(cfg.output.kind, OutputKind::Null);
        assert_eq!(cfg.run.frames, Some(90));
    }

    #[test]
    fn strict_rejects_unknown_sections() {
        let src = r#"{ "version": 1, "sauce": {} }"#;
        assert!(parse_host_config(src, ConfigMode::Lenient).is_ok());
        assert!(parse_host_config(src, ConfigMode::Strict).is_err());
    }

    #[test]
    fn unknown_output_kind_is_an_error() {
        assert!(parse_host_config(r#"{ "output": { "kind": "syphon" } }"#, ConfigMode::Lenient).is_err());
    }
}
