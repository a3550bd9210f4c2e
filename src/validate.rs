//! Config validation with friendly errors.
//!
//! Explains what is wrong, where it lives and what to do about it. Lenient loads keep running
//! on warnings; strict loads turn unknown keys into errors.

use std::collections::BTreeSet;

use vcambridge_engine::channel::MAX_DIMENSION;
use vcambridge_engine::config::ConfigMode;

use crate::{logi, loge, logw};

#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub level: IssueLevel,
    pub path: String,
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueLevel {
    Warn,
    Error,
}

impl ValidationIssue {
    pub fn warn(path: impl Into<String>, message: impl Into<String>, hint: Option<String>) -> Self {
        Self { level: IssueLevel::Warn, path: path.into(), message: message.into(), hint }
    }
    pub fn error(path: impl Into<String>, message: impl Into<String>, hint: Option<String>) -> Self {
        Self { level: IssueLevel::Error, path: path.into(), message: message.into(), hint }
    }
}

pub fn emit_issues(tag: &str, issues: &[ValidationIssue]) {
    for it in issues {
        let hint = it.hint.as_deref().map(|h| format!(" (hint: {h})")).unwrap_or_default();
        match it.level {
            IssueLevel::Warn => logw!(tag, "{}: {}{}", it.path, it.message, hint),
            IssueLevel::Error => loge!(tag, "{}: {}{}", it.path, it.message, hint),
        }
    }
}

/// One summary line, even when there are zero issues.
pub fn emit_summary(tag: &str, label: &str, issues: &[ValidationIssue]) {
    let warns = issues.iter().filter(|i| i.level == IssueLevel::Warn).count();
    let errs = issues.iter().filter(|i| i.level == IssueLevel::Error).count();
    if errs == 0 && warns == 0 {
        logi!(tag, "validation: {label} OK (0 issues)");
    } else {
        logw!(tag, "validation: {label} issues found (errors={errs} warnings={warns})");
    }
}

const TOP_KEYS: &[&str] = &["version", "source", "video", "run", "preview", "output", "osc"];
const OUTPUT_KINDS: &[&str] = &["pipe", "ndi", "null"];

/// Validate `host.json` before it is deserialized.
pub fn validate_host_json(v: &serde_json::Value, mode: ConfigMode) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    let Some(obj) = v.as_object() else {
        issues.push(ValidationIssue::error(
            "host.json:/",
            "top level must be a JSON object",
            Some("expected: { \"source\": {...}, \"output\": {...} }".into()),
        ));
        return issues;
    };

    for key in obj.keys() {
        if !TOP_KEYS.contains(&key.as_str()) {
            let msg = format!("unknown key '{key}'");
            let hint = Some(format!("known keys: {}", TOP_KEYS.join(", ")));
            let path = format!("host.json:/{}", escape_ptr(key));
            issues.push(match mode {
                ConfigMode::Strict => ValidationIssue::error(path, msg, hint),
                ConfigMode::Lenient => ValidationIssue::warn(path, msg, hint),
            });
        }
    }

    if let Some(ver) = obj.get("version").and_then(|v| v.as_u64()) {
        if ver != 1 {
            issues.push(ValidationIssue::warn(
                "host.json:/version",
                format!("unsupported version {ver}"),
                Some("this runner understands version 1".into()),
            ));
        }
    }

    if let Some(source) = obj.get("source") {
        for dim in ["width", "height"] {
            if let Some(n) = source.get(dim).and_then(|v| v.as_u64()) {
                if n == 0 {
                    issues.push(ValidationIssue::warn(
                        format!("host.json:/source/{dim}"),
                        "zero-sized source never publishes frames",
                        Some("set a positive size, e.g. 1280x720".into()),
                    ));
                } else if n > MAX_DIMENSION as u64 {
                    issues.push(ValidationIssue::error(
                        format!("host.json:/source/{dim}"),
                        format!("{n} exceeds the maximum of {MAX_DIMENSION}"),
                        None,
                    ));
                }
            }
        }
    }

    if let Some(video) = obj.get("video") {
        for key in ["fps_num", "fps_den"] {
            if video.get(key).and_then(|v| v.as_u64()) == Some(0) {
                issues.push(ValidationIssue::error(
                    format!("host.json:/video/{key}"),
                    "frame rate terms must be positive",
                    Some("e.g. fps_num=30, fps_den=1".into()),
                ));
            }
        }
    }

    if let Some(output) = obj.get("output") {
        validate_output(output, &mut issues);
    }

    if let Some(osc) = obj.get("osc") {
        if let Some(bind) = osc.get("bind").and_then(|v| v.as_str()) {
            if bind.parse::<std::net::SocketAddr>().is_err() {
                issues.push(ValidationIssue::error(
                    "host.json:/osc/bind",
                    format!("'{bind}' is not a socket address"),
                    Some("expected host:port, e.g. 127.0.0.1:9000".into()),
                ));
            }
        }
        if let Some(prefix) = osc.get("prefix").and_then(|v| v.as_str()) {
            if !prefix.starts_with('/') {
                issues.push(ValidationIssue::warn(
                    "host.json:/osc/prefix",
                    "OSC addresses start with '/'",
                    Some(format!("did you mean '/{prefix}'?")),
                ));
            }
        }
    }

    issues
}

fn validate_output(output: &serde_json::Value, issues: &mut Vec<ValidationIssue>) {
    let kind = output.get("kind").and_then(|v| v.as_str()).unwrap_or("pipe");
    if !OUTPUT_KINDS.contains(&kind) {
        let known: BTreeSet<String> = OUTPUT_KINDS.iter().map(|s| s.to_string()).collect();
        issues.push(ValidationIssue::error(
            "host.json:/output/kind",
            format!("unknown output kind '{kind}'"),
            Some(format!("available: {}", join_set(&known))),
        ));
        return;
    }

    if kind == "pipe" {
        if let Some(args) = output.pointer("/pipe/output_args").and_then(|v| v.as_array()) {
            if args.is_empty() {
                issues.push(ValidationIssue::error(
                    "host.json:/output/pipe/output_args",
                    "ffmpeg needs an output destination",
                    Some("e.g. [\"-f\", \"v4l2\", \"/dev/video10\"]".into()),
                ));
            } else if args.iter().any(|a| !a.is_string()) {
                issues.push(ValidationIssue::error(
                    "host.json:/output/pipe/output_args",
                    "every argument must be a string",
                    None,
                ));
            }
        }
    }

    if kind == "ndi" && !cfg!(feature = "ndi") {
        issues.push(ValidationIssue::warn(
            "host.json:/output/kind",
            "NDI output requested but this build has no NDI support",
            Some("rebuild with --features ndi".into()),
        ));
    }
}

fn join_set(set: &BTreeSet<String>) -> String {
    set.iter().cloned().collect::<Vec<_>>().join(", ")
}

// JSON Pointer escaping for friendly paths
fn escape_ptr(s: &str) -> String {
    s.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn errors(issues: &[ValidationIssue]) -> Vec<&str> {
        issues
            .iter()
            .filter(|i| i.level == IssueLevel::Error)
            .map(|i| i.path.as_str())
            .collect()
    }

    #[test]
    fn shipped_defaults_are_clean() {
        let v = json!({
            "version": 1,
            "source": { "width": 1280, "height": 720, "enabled": true },
            "output": { "kind": "null" },
            "osc": { "enabled": true, "bind": "127.0.0.1:9000", "prefix": "/vcam" }
        });
        assert!(validate_host_json(&v, ConfigMode::Strict).is_empty());
    }

    #[test]
    fn unknown_keys_depend_on_mode() {
        let v = json!({ "outputs": {} });
        let lenient = validate_host_json(&v, ConfigMode::Lenient);
        assert_eq!(lenient.len(), 1);
        assert_eq!(lenient[0].level, IssueLevel::Warn);
        assert_eq!(errors(&validate_host_json(&v, ConfigMode::Strict)), vec!["host.json:/outputs"]);
    }

    #[test]
    fn oversize_and_zero_dimensions() {
        let v = json!({ "source": { "width": 0, "height": 20000 } });
        let issues = validate_host_json(&v, ConfigMode::Lenient);
        assert_eq!(errors(&issues), vec!["host.json:/source/height"]);
        assert!(issues.iter().any(|i| i.path == "host.json:/source/width" && i.level == IssueLevel::Warn));
    }

    #[test]
    fn bad_output_and_osc_settings() {
        let v = json!({
            "video": { "fps_num": 0 },
            "output": { "kind": "pipe", "pipe": { "output_args": [] } },
            "osc": { "bind": "nowhere", "prefix": "vcam" }
        });
        let issues = validate_host_json(&v, ConfigMode::Lenient);
        assert_eq!(
            errors(&issues),
            vec!["host.json:/video/fps_num", "host.json:/output/pipe/output_args", "host.json:/osc/bind"]
        );
        assert!(issues.iter().any(|i| i.path == "host.json:/osc/prefix"));
    }

    #[test]
    fn unknown_output_kind_lists_choices() {
        let issues = validate_host_json(&json!({ "output": { "kind": "spout" } }), ConfigMode::Lenient);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].hint.as_deref(), Some("available: ndi, null, pipe"));
    }

    #[test]
    fn non_object_is_rejected() {
        assert_eq!(errors(&validate_host_json(&json!([1, 2]), ConfigMode::Lenient)), vec!["host.json:/"]);
    }
}
