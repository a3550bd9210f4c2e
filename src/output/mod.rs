//! Output endpoints: where the bridge's video ring ends up.
//!
//! Every endpoint is a [`RingEndpoint`] around a [`SinkFactory`]. `start` spawns a worker
//! thread that opens the sink, reports back whether that worked, then copies frames from the
//! bound ring into the sink until told to stop or the ring is stopped.

pub mod null;
pub mod pipe;

#[cfg(feature = "ndi")]
pub mod ndi;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use vcambridge_engine::{BridgeError, OutputEndpoint, RingFrame, VideoOutputInfo, VideoRing};

use crate::settings::{OutputCfg, OutputKind};
use crate::{logi, logw};

/// Consumer of published frames.
pub trait FrameSink {
    fn write(&mut self, frame: &RingFrame) -> std::io::Result<()>;
}

/// Adapter for sinks that are easiest to express as a closure.
pub struct FnSink<F>(pub F);

impl<F: FnMut(&RingFrame) -> std::io::Result<()>> FrameSink for FnSink<F> {
    fn write(&mut self, frame: &RingFrame) -> std::io::Result<()> {
        (self.0)(frame)
    }
}

/// Feeds frames to a sink until the worker should exit. Returns true if the stop was forced.
pub type Pump<'a> = &'a mut dyn FnMut(&mut dyn FrameSink) -> bool;

pub trait SinkFactory: Send + Sync + 'static {
    fn kind(&self) -> &'static str;

    /// Runs on the worker thread: open the sink, hand it to `pump`, clean up.
    ///
    /// An error before `pump` is called is reported as a failed start.
    fn serve(&self, info: &VideoOutputInfo, pump: Pump<'_>) -> Result<(), BridgeError>;
}

struct Worker {
    stop: Arc<AtomicBool>,
    force: Arc<AtomicBool>,
    join: thread::JoinHandle<()>,
}

pub struct RingEndpoint {
    name: String,
    factory: Arc<dyn SinkFactory>,
    media: Mutex<Option<Arc<VideoRing>>>,
    worker: Mutex<Option<Worker>>,
    retired: Mutex<Vec<thread::JoinHandle<()>>>,
    frames_out: Arc<AtomicU64>,
}

impl RingEndpoint {
    pub fn new(name: impl Into<String>, factory: Arc<dyn SinkFactory>) -> Self {
        Self {
            name: name.into(),
            factory,
            media: Mutex::new(None),
            worker: Mutex::new(None),
            retired: Mutex::new(Vec::new()),
            frames_out: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Frames handed to a sink since construction.
    pub fn frames_out(&self) -> u64 {
        self.frames_out.load(Ordering::Acquire)
    }

    fn signal(&self, force: bool) {
        let Some(w) = self.worker.lock().ok().and_then(|mut g| g.take()) else {
            return;
        };
        w.force.store(force, Ordering::Release);
        w.stop.store(true, Ordering::Release);
        // Not joined here: the worker may be blocked in sink IO and this runs on the render
        // thread. `join_workers` collects it at exit.
        if let Ok(mut retired) = self.retired.lock() {
            retired.push(w.join);
        }
    }

    /// Wait for stopped workers to wind down, up to `timeout` in total.
    pub fn join_workers(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let handles: Vec<_> = match self.retired.lock() {
            Ok(mut g) => g.drain(..).collect(),
            Err(_) => return false,
        };
        let mut clean = true;
        for h in handles {
            while !h.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            if h.is_finished() {
                let _ = h.join();
            } else {
                clean = false;
            }
        }
        clean
    }
}

impl OutputEndpoint for RingEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_media(&self, ring: Option<Arc<VideoRing>>) {
        if let Ok(mut m) = self.media.lock() {
            *m = ring;
        }
    }

    fn start(&self) -> Result<(), BridgeError> {
        let ring = self
            .media
            .lock()
            .ok()
            .and_then(|m| m.clone())
            .ok_or_else(|| BridgeError::output_start(&self.name, "no media bound"))?;
        if ring.stopped() {
            return Err(BridgeError::output_start(&self.name, "bound ring is stopped"));
        }

        // A previous worker would compete for the same frames.
        self.signal(false);

        let stop = Arc::new(AtomicBool::new(false));
        let force = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), BridgeError>>(1);

        let factory = Arc::clone(&self.factory);
        let frames_out = Arc::clone(&self.frames_out);
        let (w_stop, w_force) = (Arc::clone(&stop), Arc::clone(&force));
        let kind = factory.kind();

        let join = thread::Builder::new()
            .name(format!("vcam-out-{kind}"))
            .spawn(move || {
                let info = ring.info().clone();
                let poll = info.frame_interval() * 4;
                let mut sent = 0u64;

                let mut pump = |sink: &mut dyn FrameSink| -> bool {
                    let _ = ready_tx.send(Ok(()));
                    let reader = ring.attach_reader();
                    while !w_stop.load(Ordering::Acquire) {
                        match reader.next_frame(poll) {
                            Some(frame) => {
                                if let Err(e) = sink.write(&frame) {
                                    logw!("OUTPUT", "{kind} sink write failed: {e}");
                                    break;
                                }
                                sent += 1;
                                frames_out.fetch_add(1, Ordering::AcqRel);
                            }
                            None if reader.ring().stopped() => break,
                            None => {}
                        }
                    }
                    w_force.load(Ordering::Acquire)
                };

                if let Err(e) = factory.serve(&info, &mut pump) {
                    // Only reaches the starter if the sink never opened.
                    let _ = ready_tx.send(Err(e));
                    return;
                }
                logi!("OUTPUT", "{kind} worker exited after {sent} frames");
            })
            .map_err(|e| BridgeError::output_start(&self.name, format!("spawn worker: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                if let Ok(mut w) = self.worker.lock() {
                    *w = Some(Worker { stop, force, join });
                }
                logi!("OUTPUT", "{} started ({kind})", self.name);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = join.join();
                Err(e)
            }
            Err(_) => Err(BridgeError::output_start(&self.name, "worker exited during start")),
        }
    }

    fn stop(&self) {
        logi!("OUTPUT", "{} stopping", self.name);
        self.signal(false);
    }

    fn force_stop(&self) {
        self.signal(true);
    }

    fn end_data_capture(&self) {
        self.signal(true);
        self.set_media(None);
    }
}

/// Build the endpoint selected in `host.json`.
///
/// `vflip` is set when frames arrive bottom-up (OpenGL readback).
pub fn build_endpoint(cfg: &OutputCfg, channel_name: &str, vflip: bool) -> anyhow::Result<Arc<RingEndpoint>> {
    let factory: Arc<dyn SinkFactory> = match cfg.kind {
        OutputKind::Pipe => Arc::new(pipe::PipeSinkFactory::new(&cfg.pipe, vflip)),
        OutputKind::Null => Arc::new(null::NullSinkFactory),
        #[cfg(feature = "ndi")]
        OutputKind::Ndi => Arc::new(ndi::NdiSinkFactory::new(&cfg.ndi, channel_name, vflip)),
        #[cfg(not(feature = "ndi"))]
        OutputKind::Ndi => anyhow::bail!("output kind 'ndi' needs a build with --features ndi"),
    };
    logi!("OUTPUT", "endpoint '{channel_name}' kind={:?} vflip={vflip}", cfg.kind);
    Ok(Arc::new(RingEndpoint::new(channel_name, factory)))
}

/// Copy `frame` into `out` as tightly packed rows, optionally bottom-up.
pub fn pack_rows(frame: &RingFrame, vflip: bool, out: &mut Vec<u8>) {
    let row = frame.width as usize * 4;
    let ls = frame.linesize as usize;
    let h = frame.height as usize;
    out.clear();
    out.reserve(row * h);
    for i in 0..h {
        let y = if vflip { h - 1 - i } else { i };
        match frame.data.get(y * ls..y * ls + row) {
            Some(src) => out.extend_from_slice(src),
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcambridge_engine::config::VideoInfo;

    struct Collect {
        seen: Arc<Mutex<Vec<u64>>>,
        fail_open: bool,
    }

    impl SinkFactory for Collect {
        fn kind(&self) -> &'static str {
            "collect"
        }

        fn serve(&self, _info: &VideoOutputInfo, pump: Pump<'_>) -> Result<(), BridgeError> {
            if self.fail_open {
                return Err(BridgeError::output_start("collect", "refused"));
            }
            let seen = Arc::clone(&self.seen);
            let mut sink = FnSink(move |f: &RingFrame| -> std::io::Result<()> {
                seen.lock().unwrap().push(f.timestamp);
                Ok(())
            });
            pump(&mut sink);
            Ok(())
        }
    }

    fn ring() -> Arc<VideoRing> {
        VideoRing::open(&VideoOutputInfo::bgra("t", 4, 2, VideoInfo::new(1000, 1), 8)).unwrap()
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn start_without_media_fails() {
        let ep = RingEndpoint::new("x", Arc::new(null::NullSinkFactory));
        assert!(ep.start().is_err());
    }

    #[test]
    fn open_failure_is_reported_by_start() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let ep = RingEndpoint::new("x", Arc::new(Collect { seen, fail_open: true }));
        ep.set_media(Some(ring()));
        let err = ep.start().unwrap_err();
        assert!(err.to_string().contains("refused"), "{err}");
    }

    #[test]
    fn worker_forwards_frames_until_ring_stops() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let ep = RingEndpoint::new("x", Arc::new(Collect { seen: Arc::clone(&seen), fail_open: false }));
        let r = ring();
        ep.set_media(Some(Arc::clone(&r)));
        ep.start().unwrap();
        // The reader attaches right after the start handshake.
        assert!(wait_for(|| r.reader_count() == 1));

        for ts in 1..=3 {
            drop(r.lock_frame(1, ts).unwrap());
        }
        assert!(wait_for(|| seen.lock().unwrap().len() == 3));
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(ep.frames_out(), 3);

        r.stop();
        ep.stop();
        assert!(ep.join_workers(Duration::from_secs(2)));
    }

    #[test]
    fn pack_rows_drops_padding_and_flips() {
        let frame = RingFrame {
            timestamp: 0,
            width: 1,
            height: 2,
            linesize: 8,
            data: vec![1, 1, 1, 1, 0, 0, 0, 0, 2, 2, 2, 2, 0, 0, 0, 0],
        };
        let mut out = Vec::new();
        pack_rows(&frame, false, &mut out);
        assert_eq!(out, vec![1, 1, 1, 1, 2, 2, 2, 2]);
        pack_rows(&frame, true, &mut out);
        assert_eq!(out, vec![2, 2, 2, 2, 1, 1, 1, 1]);
    }
}
