//! In-process stand-in for the compositing application.
//!
//! Keeps the show reference count and the render-callback registry, and queues
//! application-level events for the render loop to deliver.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use crossbeam_channel::{unbounded, Receiver, Sender};
use vcambridge_engine::{HostEvent, HostSignals};

use crate::{logi, logw};

pub struct SimHost {
    showing: AtomicI64,
    callbacks: Mutex<BTreeSet<u64>>,
    tx: Sender<HostEvent>,
    rx: Receiver<HostEvent>,
}

impl SimHost {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            showing: AtomicI64::new(0),
            callbacks: Mutex::new(BTreeSet::new()),
            tx,
            rx,
        }
    }

    /// Queue an event for delivery on the next pump.
    pub fn post(&self, ev: HostEvent) {
        let _ = self.tx.send(ev);
    }

    pub fn drain(&self) -> Vec<HostEvent> {
        self.rx.try_iter().collect()
    }

    pub fn showing(&self) -> i64 {
        self.showing.load(Ordering::Acquire)
    }

    /// Whether the host would invoke this context's render callback.
    pub fn is_registered(&self, context_id: u64) -> bool {
        self.callbacks
            .lock()
            .map(|set| set.contains(&context_id))
            .unwrap_or(false)
    }
}

impl Default for SimHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostSignals for SimHost {
    fn show(&self) {
        let n = self.showing.fetch_add(1, Ordering::AcqRel) + 1;
        logi!("HOST", "source shown (refs={n})");
    }

    fn hide(&self) {
        let n = self.showing.fetch_sub(1, Ordering::AcqRel) - 1;
        if n < 0 {
            logw!("HOST", "unbalanced hide (refs={n})");
        } else {
            logi!("HOST", "source hidden (refs={n})");
        }
    }

    fn add_render_callback(&self, context_id: u64) {
        if let Ok(mut set) = self.callbacks.lock() {
            set.insert(context_id);
        }
    }

    fn remove_render_callback(&self, context_id: u64) {
        if let Ok(mut set) = self.callbacks.lock() {
            set.remove(&context_id);
        }
    }
}
