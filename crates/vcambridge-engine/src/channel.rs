//! Video ring channel.
//!
//! `VideoRing` is a fixed-format, timestamped circular buffer of frames. The render thread
//! writes one frame per tick through a [`FrameWriter`]; output endpoints attach a
//! [`RingReader`] and drain frames on their own threads.
//!
//! A ring is never resized. When the source dimensions change, [`VideoChannel::reopen`]
//! opens a replacement and retires the old one.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::config::VideoInfo;
use crate::error::BridgeError;
use crate::gfx::ColorFormat;

/// Largest accepted frame edge, in pixels.
pub const MAX_DIMENSION: u32 = 16384;

/// Row alignment of ring frames, in bytes.
const LINESIZE_ALIGN: u32 = 32;

/// Format of a ring. Fixed for the ring's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoOutputInfo {
    pub name: String,
    pub format: ColorFormat,
    pub width: u32,
    pub height: u32,
    pub fps_num: u32,
    pub fps_den: u32,
    pub cache_size: usize,
}

impl VideoOutputInfo {
    pub fn bgra(name: impl Into<String>, width: u32, height: u32, video: VideoInfo, cache_size: usize) -> Self {
        Self {
            name: name.into(),
            format: ColorFormat::Bgra,
            width,
            height,
            fps_num: video.fps_num,
            fps_den: video.fps_den,
            cache_size,
        }
    }

    pub fn frame_interval(&self) -> Duration {
        VideoInfo::new(self.fps_num, self.fps_den).frame_interval()
    }
}

struct Slot {
    data: Vec<u8>,
    timestamp: u64,
}

struct RingInner {
    slots: Vec<Slot>,
    /// Next slot the writer fills.
    write_pos: usize,
    /// Oldest published slot not yet read.
    read_pos: usize,
    /// Published, unread frames.
    queued: usize,
    writing: bool,
}

/// Counters exposed for diagnostics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RingStats {
    pub published: u64,
    pub skipped: u64,
    pub overwritten: u64,
}

pub struct VideoRing {
    info: VideoOutputInfo,
    linesize: u32,
    inner: Mutex<RingInner>,
    cond: Condvar,
    stopped: AtomicBool,
    closed: AtomicBool,
    readers: AtomicUsize,
    published: AtomicU64,
    skipped: AtomicU64,
    overwritten: AtomicU64,
}

impl std::fmt::Debug for VideoRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoRing")
            .field("info", &self.info)
            .field("linesize", &self.linesize)
            .field("stopped", &self.stopped())
            .finish()
    }
}

impl VideoRing {
    pub fn open(info: &VideoOutputInfo) -> Result<Arc<Self>, BridgeError> {
        let (w, h) = (info.width, info.height);
        if w == 0 || h == 0 {
            return Err(BridgeError::channel_open(w, h, "zero-sized frame"));
        }
        if w > MAX_DIMENSION || h > MAX_DIMENSION {
            return Err(BridgeError::channel_open(w, h, format!("dimension above {MAX_DIMENSION}")));
        }
        if info.fps_num == 0 || info.fps_den == 0 {
            return Err(BridgeError::channel_open(w, h, "invalid frame rate"));
        }
        if info.cache_size == 0 {
            return Err(BridgeError::channel_open(w, h, "cache size must be at least 1"));
        }

        let row = w * info.format.bytes_per_pixel();
        let linesize = row.div_ceil(LINESIZE_ALIGN) * LINESIZE_ALIGN;
        let frame_bytes = linesize as usize * h as usize;
        let slots = (0..info.cache_size)
            .map(|_| Slot {
                data: vec![0; frame_bytes],
                timestamp: 0,
            })
            .collect();

        Ok(Arc::new(Self {
            info: info.clone(),
            linesize,
            inner: Mutex::new(RingInner {
                slots,
                write_pos: 0,
                read_pos: 0,
                queued: 0,
                writing: false,
            }),
            cond: Condvar::new(),
            stopped: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            readers: AtomicUsize::new(0),
            published: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            overwritten: AtomicU64::new(0),
        }))
    }

    pub fn info(&self) -> &VideoOutputInfo {
        &self.info
    }

    pub fn width(&self) -> u32 {
        self.info.width
    }

    pub fn height(&self) -> u32 {
        self.info.height
    }

    /// Bytes per row of every frame (plane 0).
    pub fn linesize(&self) -> u32 {
        self.linesize
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop the ring: writers are refused and blocked readers wake up empty-handed.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.cond.notify_all();
    }

    /// Stop and release the frame memory. Idempotent.
    pub fn close(&self) {
        self.stop();
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut inner = self.lock_inner();
        inner.queued = 0;
        for slot in inner.slots.iter_mut() {
            slot.data = Vec::new();
        }
    }

    pub fn stats(&self) -> RingStats {
        RingStats {
            published: self.published.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            overwritten: self.overwritten.load(Ordering::Relaxed),
        }
    }

    pub fn reader_count(&self) -> usize {
        self.readers.load(Ordering::Acquire)
    }

    fn lock_inner(&self) -> MutexGuard<'_, RingInner> {
        // A writer or reader that panicked mid-copy leaves only pixel data behind; keep going.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Acquire the next write slot. Never waits.
    ///
    /// `count` is how many frame intervals the written frame stands for. With no reader
    /// attached the oldest unread frame is overwritten when the ring is full. With readers
    /// attached and no free slot the lock fails at once and `count` frames are recorded as
    /// skipped.
    pub fn lock_frame(&self, count: u32, timestamp: u64) -> Option<FrameWriter<'_>> {
        if self.stopped() {
            return None;
        }

        let mut inner = self.lock_inner();
        if self.stopped() {
            return None;
        }
        if inner.writing {
            self.skipped.fetch_add(count as u64, Ordering::Relaxed);
            return None;
        }
        if inner.queued >= inner.slots.len() {
            if self.reader_count() > 0 {
                self.skipped.fetch_add(count as u64, Ordering::Relaxed);
                return None;
            }
            inner.read_pos = (inner.read_pos + 1) % inner.slots.len();
            inner.queued -= 1;
            self.overwritten.fetch_add(1, Ordering::Relaxed);
        }

        inner.writing = true;
        let pos = inner.write_pos;
        let data = std::mem::take(&mut inner.slots[pos].data);
        drop(inner);

        Some(FrameWriter {
            ring: self,
            pos,
            data,
            timestamp,
        })
    }

    /// Attach a consumer. Frames are only held back for consumers while one is attached.
    pub fn attach_reader(self: &Arc<Self>) -> RingReader {
        self.readers.fetch_add(1, Ordering::AcqRel);
        RingReader { ring: Arc::clone(self) }
    }

    fn publish(&self, pos: usize, data: Vec<u8>, timestamp: u64) {
        let mut inner = self.lock_inner();
        inner.writing = false;
        if self.is_closed() {
            return;
        }
        inner.slots[pos].data = data;
        inner.slots[pos].timestamp = timestamp;
        inner.write_pos = (pos + 1) % inner.slots.len();
        inner.queued += 1;
        drop(inner);
        self.published.fetch_add(1, Ordering::Relaxed);
        self.cond.notify_all();
    }
}

/// Exclusive access to one ring slot. Dropping it publishes the frame.
pub struct FrameWriter<'a> {
    ring: &'a VideoRing,
    pos: usize,
    data: Vec<u8>,
    timestamp: u64,
}

impl FrameWriter<'_> {
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn width(&self) -> u32 {
        self.ring.width()
    }

    pub fn height(&self) -> u32 {
        self.ring.height()
    }

    /// Number of planes. BGRA frames are packed into one.
    pub fn planes(&self) -> usize {
        1
    }

    pub fn linesize(&self, plane: usize) -> u32 {
        match plane {
            0 => self.ring.linesize(),
            _ => 0,
        }
    }

    pub fn plane_mut(&mut self, plane: usize) -> Option<&mut [u8]> {
        match plane {
            0 => Some(&mut self.data),
            _ => None,
        }
    }
}

impl Drop for FrameWriter<'_> {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        self.ring.publish(self.pos, data, self.timestamp);
    }
}

/// A frame copied out of the ring.
#[derive(Debug, Clone)]
pub struct RingFrame {
    pub timestamp: u64,
    pub width: u32,
    pub height: u32,
    pub linesize: u32,
    pub data: Vec<u8>,
}

/// Consumer handle. Dropping it detaches from the ring.
pub struct RingReader {
    ring: Arc<VideoRing>,
}

impl RingReader {
    pub fn ring(&self) -> &Arc<VideoRing> {
        &self.ring
    }

    /// Wait up to `timeout` for the next published frame.
    ///
    /// Returns `None` on timeout or once the ring is stopped.
    pub fn next_frame(&self, timeout: Duration) -> Option<RingFrame> {
        let ring = &*self.ring;
        let deadline = Instant::now() + timeout;
        let mut inner = ring.lock_inner();
        loop {
            if ring.stopped() {
                return None;
            }
            if inner.queued > 0 {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            inner = match ring.cond.wait_timeout(inner, deadline - now) {
                Ok((g, _)) => g,
                Err(p) => p.into_inner().0,
            };
        }

        let pos = inner.read_pos;
        let slot = &inner.slots[pos];
        let frame = RingFrame {
            timestamp: slot.timestamp,
            width: ring.width(),
            height: ring.height(),
            linesize: ring.linesize(),
            data: slot.data.clone(),
        };
        inner.read_pos = (pos + 1) % inner.slots.len();
        inner.queued -= 1;
        drop(inner);
        ring.cond.notify_all();
        Some(frame)
    }
}

impl Drop for RingReader {
    fn drop(&mut self) {
        self.ring.readers.fetch_sub(1, Ordering::AcqRel);
        self.ring.cond.notify_all();
    }
}

/// Opens rings. Hosts can substitute their own to pool memory or inject failures.
pub trait ChannelFactory: Send + Sync {
    fn open(&self, info: &VideoOutputInfo) -> Result<Arc<VideoRing>, BridgeError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RingFactory;

impl ChannelFactory for RingFactory {
    fn open(&self, info: &VideoOutputInfo) -> Result<Arc<VideoRing>, BridgeError> {
        VideoRing::open(info)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    OpenStopped,
    OpenRunning,
}

/// The context's current ring plus the generation it was opened at.
pub struct VideoChannel {
    ring: Option<Arc<VideoRing>>,
    generation: u64,
    factory: Arc<dyn ChannelFactory>,
}

impl VideoChannel {
    pub fn new(factory: Arc<dyn ChannelFactory>) -> Self {
        Self {
            ring: None,
            generation: 0,
            factory,
        }
    }

    /// Replace the ring with one of the given format.
    ///
    /// The new ring is opened first. On failure the current ring (if any) is left untouched
    /// and keeps serving at its old size. On success the old ring is stopped, then closed.
    pub fn reopen(&mut self, info: &VideoOutputInfo) -> Result<u64, BridgeError> {
        let ring = self.factory.open(info)?;
        if let Some(old) = self.ring.replace(ring) {
            old.stop();
            old.close();
        }
        self.generation += 1;
        Ok(self.generation)
    }

    /// Stop, then close. Safe to call on a closed channel.
    pub fn close(&mut self) {
        if let Some(ring) = self.ring.take() {
            ring.stop();
            ring.close();
        }
    }

    pub fn ring(&self) -> Option<&Arc<VideoRing>> {
        self.ring.as_ref()
    }

    /// Bumped on every successful reopen.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> ChannelState {
        match &self.ring {
            None => ChannelState::Closed,
            Some(r) if r.stopped() => ChannelState::OpenStopped,
            Some(_) => ChannelState::OpenRunning,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state() == ChannelState::OpenRunning
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(w: u32, h: u32, cache: usize) -> VideoOutputInfo {
        VideoOutputInfo::bgra("test", w, h, VideoInfo::new(1000, 1), cache)
    }

    #[test]
    fn linesize_is_aligned() {
        let ring = VideoRing::open(&info(3, 2, 2)).unwrap();
        assert_eq!(ring.linesize(), 32);
        let ring = VideoRing::open(&info(1920, 2, 2)).unwrap();
        assert_eq!(ring.linesize(), 7680);
    }

    #[test]
    fn rejects_degenerate_formats() {
        assert!(VideoRing::open(&info(0, 10, 2)).is_err());
        assert!(VideoRing::open(&info(10, 10, 0)).is_err());
        assert!(VideoRing::open(&info(MAX_DIMENSION + 1, 10, 2)).is_err());
    }

    #[test]
    fn written_frame_reaches_reader() {
        let ring = VideoRing::open(&info(2, 2, 4)).unwrap();
        let reader = ring.attach_reader();
        {
            let mut w = ring.lock_frame(1, 42).unwrap();
            w.plane_mut(0).unwrap()[0] = 7;
        }
        let f = reader.next_frame(Duration::from_millis(50)).unwrap();
        assert_eq!(f.timestamp, 42);
        assert_eq!(f.data[0], 7);
        assert_eq!(ring.stats().published, 1);
    }

    #[test]
    fn stopped_ring_refuses_writers_and_wakes_readers() {
        let ring = VideoRing::open(&info(2, 2, 4)).unwrap();
        let reader = ring.attach_reader();
        ring.stop();
        assert!(ring.lock_frame(1, 0).is_none());
        assert!(reader.next_frame(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn full_ring_without_readers_overwrites_oldest() {
        let ring = VideoRing::open(&info(1, 1, 2)).unwrap();
        for ts in 0..5 {
            assert!(ring.lock_frame(1, ts).is_some());
        }
        assert_eq!(ring.stats().overwritten, 3);

        let reader = ring.attach_reader();
        assert_eq!(reader.next_frame(Duration::ZERO).unwrap().timestamp, 3);
        assert_eq!(reader.next_frame(Duration::ZERO).unwrap().timestamp, 4);
    }

    #[test]
    fn full_ring_with_slow_reader_skips_frame() {
        let ring = VideoRing::open(&info(1, 1, 1)).unwrap();
        let _reader = ring.attach_reader();
        assert!(ring.lock_frame(1, 0).is_some());
        assert!(ring.lock_frame(1, 1).is_none());
        assert_eq!(ring.stats().skipped, 1);
    }

    #[test]
    fn full_ring_refuses_writer_without_waiting() {
        let ring = VideoRing::open(&info(1, 1, 1)).unwrap();
        let _reader = ring.attach_reader();
        assert!(ring.lock_frame(1, 0).is_some());

        let started = Instant::now();
        assert!(ring.lock_frame(600, 1).is_none());
        assert!(started.elapsed() < Duration::from_millis(300));
        assert_eq!(ring.stats().skipped, 600);
    }

    #[test]
    fn second_writer_is_refused_while_slot_held() {
        let ring = VideoRing::open(&info(1, 1, 4)).unwrap();
        let first = ring.lock_frame(1, 0).unwrap();
        assert!(ring.lock_frame(1, 1).is_none());
        drop(first);
        assert!(ring.lock_frame(1, 2).is_some());
    }

    struct FailingFactory;
    impl ChannelFactory for FailingFactory {
        fn open(&self, info: &VideoOutputInfo) -> Result<Arc<VideoRing>, BridgeError> {
            Err(BridgeError::channel_open(info.width, info.height, "no memory"))
        }
    }

    #[test]
    fn reopen_swaps_and_retires_old_ring() {
        let mut ch = VideoChannel::new(Arc::new(RingFactory));
        assert_eq!(ch.state(), ChannelState::Closed);
        ch.reopen(&info(4, 4, 2)).unwrap();
        let old = Arc::clone(ch.ring().unwrap());
        assert_eq!(ch.reopen(&info(8, 8, 2)).unwrap(), 2);
        assert!(old.stopped());
        assert!(old.is_closed());
        assert_eq!(ch.ring().unwrap().width(), 8);
        assert_eq!(ch.state(), ChannelState::OpenRunning);
    }

    #[test]
    fn failed_reopen_keeps_previous_ring() {
        let mut ch = VideoChannel::new(Arc::new(RingFactory));
        ch.reopen(&info(4, 4, 2)).unwrap();
        ch.factory = Arc::new(FailingFactory);
        assert!(ch.reopen(&info(8, 8, 2)).is_err());
        assert_eq!(ch.ring().unwrap().width(), 4);
        assert_eq!(ch.generation(), 1);
        assert!(ch.is_running());
    }

    #[test]
    fn close_is_idempotent() {
        let mut ch = VideoChannel::new(Arc::new(RingFactory));
        ch.reopen(&info(4, 4, 2)).unwrap();
        ch.close();
        ch.close();
        assert_eq!(ch.state(), ChannelState::Closed);
    }
}
