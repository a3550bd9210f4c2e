//! Output publisher: the start/stop lifecycle of the externally visible endpoint.
//!
//! Every mutable lifecycle field lives behind one mutex. `stopping` is additionally mirrored
//! in an atomic so the hot paths can bail out without locking. The blocking endpoint start
//! runs on a spawned task that owns an `Arc` of the shared state, so it can finish safely
//! after the context has been torn down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::channel::{ChannelFactory, ChannelState, VideoChannel, VideoOutputInfo, VideoRing};
use crate::error::BridgeError;
use crate::events::{BridgeEvent, EventSink, LogLevel, ShutdownTrigger, StopReason};
use crate::host::{Clock, HostSignals, OutputEndpoint, TaskSpawner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherState {
    Stopped,
    Starting,
    Running,
    /// Terminal: a shutdown trigger fired.
    ForceStopped,
}

struct Lifecycle {
    channel: VideoChannel,
    endpoint: Option<Arc<dyn OutputEndpoint>>,
    output_active: bool,
    starting: bool,
    restart_pending: bool,
    last_failed_start: Option<Duration>,
}

struct Shared {
    stopping: AtomicBool,
    state: Mutex<Lifecycle>,
    host: Arc<dyn HostSignals>,
    clock: Arc<dyn Clock>,
    spawner: Arc<dyn TaskSpawner>,
    events: EventSink,
    cooldown: Duration,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Completion of a background start attempt. Clearing `starting` is the last thing it does.
    fn finish_start(&self, endpoint: &dyn OutputEndpoint, generation: u64, result: Result<(), BridgeError>) {
        let mut st = self.lock();
        match result {
            Ok(()) if self.stopping() => {
                // Teardown ran while we were starting; undo what we just did.
                endpoint.force_stop();
                endpoint.end_data_capture();
            }
            Ok(()) => {
                st.output_active = true;
                self.host.show();
                if st.channel.generation() != generation {
                    // Started against a ring that was replaced mid-start.
                    st.restart_pending = true;
                }
                self.events.emit(BridgeEvent::OutputStarted { generation });
            }
            Err(e) => {
                if !self.stopping() {
                    st.last_failed_start = Some(self.clock.frame_time());
                }
                self.events.emit(BridgeEvent::StartFailed { error: e.to_string() });
            }
        }
        st.starting = false;
    }
}

/// A start attempt prepared under the lock and dispatched after releasing it.
struct PendingStart {
    endpoint: Arc<dyn OutputEndpoint>,
    generation: u64,
    requested_at: Duration,
}

/// Collaborators a publisher needs from the host.
pub struct PublisherParts {
    pub endpoint: Arc<dyn OutputEndpoint>,
    pub channels: Arc<dyn ChannelFactory>,
    pub host: Arc<dyn HostSignals>,
    pub clock: Arc<dyn Clock>,
    pub spawner: Arc<dyn TaskSpawner>,
    pub events: EventSink,
}

#[derive(Clone)]
pub struct OutputPublisher {
    shared: Arc<Shared>,
}

impl OutputPublisher {
    pub fn new(parts: PublisherParts, cooldown: Duration) -> Self {
        let PublisherParts {
            endpoint,
            channels,
            host,
            clock,
            spawner,
            events,
        } = parts;
        Self {
            shared: Arc::new(Shared {
                stopping: AtomicBool::new(false),
                state: Mutex::new(Lifecycle {
                    channel: VideoChannel::new(channels),
                    endpoint: Some(endpoint),
                    output_active: false,
                    starting: false,
                    restart_pending: false,
                    last_failed_start: None,
                }),
                host,
                clock,
                spawner,
                events,
                cooldown,
            }),
        }
    }

    pub fn state(&self) -> PublisherState {
        if self.is_stopping() {
            return PublisherState::ForceStopped;
        }
        let st = self.shared.lock();
        if st.output_active {
            PublisherState::Running
        } else if st.starting {
            PublisherState::Starting
        } else {
            PublisherState::Stopped
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.stopping()
    }

    pub fn output_active(&self) -> bool {
        self.shared.lock().output_active
    }

    pub fn starting(&self) -> bool {
        self.shared.lock().starting
    }

    pub fn restart_pending(&self) -> bool {
        self.shared.lock().restart_pending
    }

    pub fn last_failed_start(&self) -> Option<Duration> {
        self.shared.lock().last_failed_start
    }

    pub fn channel_state(&self) -> ChannelState {
        self.shared.lock().channel.state()
    }

    pub fn channel_generation(&self) -> u64 {
        self.shared.lock().channel.generation()
    }

    /// The current ring, if it is open and not stopped.
    pub fn live_ring(&self) -> Option<Arc<VideoRing>> {
        let st = self.shared.lock();
        st.channel.ring().filter(|r| !r.stopped()).cloned()
    }

    /// Recreate the ring at a new format. Returns the new generation on success.
    ///
    /// If the output is running, a restart is scheduled so it is stopped and started again
    /// against the new ring.
    pub fn reopen_channel(&self, info: &VideoOutputInfo) -> Option<u64> {
        let shared = &self.shared;
        let mut st = shared.lock();
        if shared.stopping() {
            return None;
        }
        match st.channel.reopen(info) {
            Ok(generation) => {
                if st.output_active {
                    st.restart_pending = true;
                }
                shared.events.emit(BridgeEvent::ChannelReopened {
                    width: info.width,
                    height: info.height,
                    generation,
                });
                Some(generation)
            }
            Err(e) => {
                shared.events.emit(BridgeEvent::ChannelReopenFailed {
                    width: info.width,
                    height: info.height,
                    error: e.to_string(),
                });
                None
            }
        }
    }

    /// Enable-signal driven transitions: `Stopped -> Starting` and `Running -> Stopped`.
    pub fn update(&self, enabled: bool) {
        let pending = {
            let mut st = self.shared.lock();
            if self.is_stopping() {
                return;
            }
            self.apply_enable(&mut st, enabled)
        };
        self.dispatch(pending);
    }

    /// Per-tick evaluation: a pending restart takes precedence over the enable signal.
    pub fn tick(&self, enabled: bool) {
        let pending = {
            let mut st = self.shared.lock();
            if self.is_stopping() {
                return;
            }
            if st.restart_pending && st.output_active {
                self.stop_output(&mut st, StopReason::Restart);
                None
            } else {
                self.apply_enable(&mut st, enabled)
            }
        };
        self.dispatch(pending);
    }

    fn apply_enable(&self, st: &mut Lifecycle, enabled: bool) -> Option<PendingStart> {
        if !st.output_active && enabled {
            if !st.channel.is_running() {
                return None;
            }
            self.prepare_start(st)
        } else if st.output_active && !enabled {
            self.stop_output(st, StopReason::Disabled);
            None
        } else {
            None
        }
    }

    fn prepare_start(&self, st: &mut Lifecycle) -> Option<PendingStart> {
        if st.starting {
            return None;
        }
        let now = self.shared.clock.frame_time();
        if let Some(failed) = st.last_failed_start {
            if now.saturating_sub(failed) < self.shared.cooldown {
                return None;
            }
        }
        let endpoint = st.endpoint.clone()?;
        endpoint.set_media(st.channel.ring().cloned());
        st.starting = true;
        Some(PendingStart {
            endpoint,
            generation: st.channel.generation(),
            requested_at: now,
        })
    }

    fn dispatch(&self, pending: Option<PendingStart>) {
        let Some(PendingStart {
            endpoint,
            generation,
            requested_at,
        }) = pending
        else {
            return;
        };

        let shared = Arc::clone(&self.shared);
        let task_endpoint = Arc::clone(&endpoint);
        let spawned = self.shared.spawner.spawn(
            "vcam-start",
            Box::new(move || {
                let result = task_endpoint.start();
                shared.finish_start(&*task_endpoint, generation, result);
            }),
        );

        if let Err(e) = spawned {
            let mut st = self.shared.lock();
            st.starting = false;
            st.last_failed_start = Some(requested_at);
            self.shared.events.emit(BridgeEvent::StartFailed {
                error: format!("could not dispatch start for '{}': {e}", endpoint.name()),
            });
        }
    }

    fn stop_output(&self, st: &mut Lifecycle, reason: StopReason) {
        if let Some(endpoint) = st.endpoint.as_ref() {
            endpoint.stop();
        }
        st.output_active = false;
        self.shared.host.hide();
        // The next start binds the live ring whatever stopped this one.
        st.restart_pending = false;
        self.shared.events.emit(BridgeEvent::OutputStopped { reason });
    }

    /// Force every state to `ForceStopped`. Returns false if a previous trigger already did.
    ///
    /// Proceeds regardless of an outstanding start attempt; that attempt cleans up after
    /// itself when it completes.
    pub fn shutdown(&self, trigger: ShutdownTrigger) -> bool {
        let shared = &self.shared;
        let mut st = shared.lock();
        if shared.stopping.swap(true, Ordering::AcqRel) {
            return false;
        }

        if st.output_active {
            shared.host.hide();
            st.output_active = false;
            shared.events.emit(BridgeEvent::OutputStopped {
                reason: StopReason::Shutdown,
            });
        }
        if let Some(endpoint) = st.endpoint.take() {
            endpoint.force_stop();
            endpoint.end_data_capture();
            endpoint.set_media(None);
        }
        st.channel.close();
        st.restart_pending = false;

        shared.events.log(LogLevel::Debug, "BRIDGE", format!("shutdown via {trigger:?}"));
        shared.events.emit(BridgeEvent::Shutdown { trigger });
        true
    }
}
