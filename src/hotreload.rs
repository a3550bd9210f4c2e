//! Hot-reload watcher for `host.json`.
//!
//! We watch the parent **directory**, not the file: editors often save by writing a temp file
//! and renaming it over the original, which a file watch would miss.
//!
//! The watcher only sends a signal. Re-reading and applying the config happens on the
//! render loop.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotEvent {
    ConfigChanged(PathBuf),
}

pub struct HotReload {
    _watcher: RecommendedWatcher,
    rx: Receiver<HotEvent>,
}

impl HotReload {
    pub fn new(config_path: &Path) -> anyhow::Result<Self> {
        let (tx, rx) = unbounded::<HotEvent>();
        let wanted = config_path.file_name().map(|n| n.to_os_string());

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                let Ok(ev) = res else { return };
                for p in ev.paths {
                    if p.file_name().map(|n| n.to_os_string()) == wanted {
                        let _ = tx.send(HotEvent::ConfigChanged(p));
                    }
                }
            },
            // notify 6 has no debouncer; a slower poll keeps the fallback backend quiet.
            Config::default().with_poll_interval(Duration::from_millis(250)),
        )?;

        let parent = match config_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher.watch(&parent, RecursiveMode::NonRecursive)?;

        Ok(Self { _watcher: watcher, rx })
    }

    /// True if at least one change arrived since the last call. Bursts collapse into one.
    pub fn changed(&self) -> bool {
        self.rx.try_iter().count() > 0
    }
}
