//! Synthetic upstream node: animated color bars.
//!
//! All properties are atomics so hot reload and OSC can change them from other threads
//! while the render loop draws.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use vcambridge_engine::software::SoftGraphics;
use vcambridge_engine::UpstreamSource;

use crate::gl_backend::GlGraphics;

/// BGRA, opaque: white, yellow, cyan, green, magenta, red, blue.
pub const BARS: [[u8; 4]; 7] = [
    [0xC0, 0xC0, 0xC0, 0xFF],
    [0x00, 0xC0, 0xC0, 0xFF],
    [0xC0, 0xC0, 0x00, 0xFF],
    [0x00, 0xC0, 0x00, 0xFF],
    [0xC0, 0x00, 0xC0, 0xFF],
    [0x00, 0x00, 0xC0, 0xFF],
    [0xC0, 0x00, 0x00, 0xFF],
];

const MARKER: [u8; 4] = [0xFF, 0xFF, 0xFF, 0xFF];

#[derive(Debug)]
pub struct PatternSource {
    size: AtomicU64,
    enabled: AtomicBool,
    removed: AtomicBool,
    frame: AtomicU64,
}

impl PatternSource {
    pub fn new(width: u32, height: u32, enabled: bool) -> Self {
        Self {
            size: AtomicU64::new(pack(width, height)),
            enabled: AtomicBool::new(enabled),
            removed: AtomicBool::new(false),
            frame: AtomicU64::new(0),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        unpack(self.size.load(Ordering::Acquire))
    }

    pub fn set_size(&self, width: u32, height: u32) {
        self.size.store(pack(width, height), Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn mark_removed(&self) {
        self.removed.store(true, Ordering::Release);
    }

    /// Advance the animation by one frame.
    pub fn advance(&self) {
        self.frame.fetch_add(1, Ordering::AcqRel);
    }

    pub fn frame(&self) -> u64 {
        self.frame.load(Ordering::Acquire)
    }

    /// Left edge of the moving marker.
    fn marker_x(&self, width: u32) -> u32 {
        if width == 0 {
            return 0;
        }
        ((self.frame() * 8) % width as u64) as u32
    }
}

fn pack(width: u32, height: u32) -> u64 {
    ((width as u64) << 32) | height as u64
}

fn unpack(v: u64) -> (u32, u32) {
    ((v >> 32) as u32, v as u32)
}

impl UpstreamSource<SoftGraphics> for PatternSource {
    fn base_width(&self) -> u32 {
        self.size().0
    }

    fn base_height(&self) -> u32 {
        self.size().1
    }

    fn enabled(&self) -> bool {
        self.is_enabled()
    }

    fn removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    fn render_video(&self, gfx: &mut SoftGraphics) {
        let (w, h) = self.size();
        let n = BARS.len() as u32;
        for (i, color) in BARS.iter().enumerate() {
            let x0 = w * i as u32 / n;
            let x1 = w * (i as u32 + 1) / n;
            gfx.fill_rect(x0, 0, x1 - x0, h, *color);
        }
        let marker_w = (w / 64).max(1);
        gfx.fill_rect(self.marker_x(w), h - h / 8, marker_w, h / 8, MARKER);
    }
}

impl UpstreamSource<GlGraphics> for PatternSource {
    fn base_width(&self) -> u32 {
        self.size().0
    }

    fn base_height(&self) -> u32 {
        self.size().1
    }

    fn enabled(&self) -> bool {
        self.is_enabled()
    }

    fn removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    fn render_video(&self, gfx: &mut GlGraphics) {
        gfx.draw_pattern(self.frame(), self.marker_x(self.size().0));
    }
}
