use std::path::{Path, PathBuf};

use crate::error::BridgeError;

/// A validated root directory containing runtime assets (JSON configs + shaders).
///
/// Runner, tests and any future host resolve configuration through this type so path
/// handling stays consistent.
#[derive(Debug, Clone)]
pub struct AssetsRoot {
    path: PathBuf,
}

impl AssetsRoot {
    /// Locate the `assets/` directory.
    ///
    /// Resolution order:
    /// 1) `VCAMBRIDGE_ASSETS` env var (if set and existing)
    /// 2) Search upward from `start_dir` for a folder named `assets`
    pub fn discover(start_dir: &Path) -> Result<Self, BridgeError> {
        if let Ok(p) = std::env::var("VCAMBRIDGE_ASSETS") {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Ok(Self { path: pb });
            }
        }

        let mut cur = start_dir.to_path_buf();
        loop {
            let cand = cur.join("assets");
            if cand.is_dir() {
                return Ok(Self { path: cand });
            }
            if !cur.pop() {
                break;
            }
        }

        Err(BridgeError::AssetsNotFound {
            start_dir: start_dir.to_path_buf(),
        })
    }

    /// Wrap an explicit directory without searching.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.path.join(rel)
    }

    /// Choose OS-specific JSON config if present, otherwise fall back to `<stem>.json`.
    ///
    /// Example: `host.linux.json` overrides `host.json` on Linux.
    pub fn pick_platform_json(&self, stem: &str) -> PathBuf {
        pick_platform_json(&self.path, stem)
    }
}

/// Choose OS-specific JSON config if present, otherwise fall back to `<stem>.json`.
pub fn pick_platform_json(assets: &Path, stem: &str) -> PathBuf {
    let os = if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "macos") {
        "macos"
    } else if cfg!(target_os = "linux") {
        "linux"
    } else {
        "other"
    };

    let platform = assets.join(format!("{stem}.{os}.json"));
    if platform.exists() {
        platform
    } else {
        assets.join(format!("{stem}.json"))
    }
}

/// Resolve a JSON-provided path relative to the assets directory unless it is already absolute.
pub fn resolve_assets_path(assets_dir: &Path, s: &str) -> PathBuf {
    let p = PathBuf::from(s);
    if p.is_absolute() {
        p
    } else {
        assets_dir.join(p)
    }
}

/// Read a UTF-8 file into a String (Result-based).
pub fn read_to_string_result(path: &Path) -> Result<String, BridgeError> {
    std::fs::read_to_string(path).map_err(|e| BridgeError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Deserialize JSON from a file (Result-based).
pub fn load_json_result<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, BridgeError> {
    let s = read_to_string_result(path)?;
    serde_json::from_str(&s).map_err(|e| BridgeError::Json {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vcambridge-assets-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn discover_walks_up_to_assets() {
        let root = scratch_dir("walk");
        std::fs::create_dir_all(root.join("assets")).unwrap();
        let nested = root.join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = AssetsRoot::discover(&nested).unwrap();
        assert_eq!(found.path(), root.join("assets"));
    }

    #[test]
    fn platform_json_falls_back_to_plain_stem() {
        let root = scratch_dir("platform");
        std::fs::write(root.join("host.json"), "{}").unwrap();
        assert_eq!(pick_platform_json(&root, "host"), root.join("host.json"));
    }

    #[test]
    fn relative_paths_resolve_against_assets() {
        let base = Path::new("/opt/vcam/assets");
        assert_eq!(resolve_assets_path(base, "shaders/a.frag"), base.join("shaders/a.frag"));
        assert_eq!(resolve_assets_path(base, "/tmp/x.frag"), PathBuf::from("/tmp/x.frag"));
    }
}
