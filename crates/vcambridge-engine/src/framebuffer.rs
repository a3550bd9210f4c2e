//! Frame buffer manager: render target -> staging copy -> raw pixels.

use crate::channel::FrameWriter;
use crate::gfx::{BlendState, ColorFormat, Graphics, Ortho};

/// Transparent black.
const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 0.0];

pub struct FrameBuffer<G: Graphics> {
    target: Option<G::RenderTarget>,
    stage: Option<G::StageSurface>,
    /// The staging surface is left mapped between ticks and unmapped lazily.
    mapped: bool,
    /// Dimensions the staging surface and ring were last sized for.
    width: u32,
    height: u32,
    /// Size of the last successful capture pass.
    captured: (u32, u32),
}

impl<G: Graphics> FrameBuffer<G> {
    pub fn new(gfx: &mut G) -> Self {
        Self {
            target: gfx.target_create(ColorFormat::Bgra),
            stage: None,
            mapped: false,
            width: 0,
            height: 0,
            captured: (0, 0),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn has_stage(&self) -> bool {
        self.stage.is_some()
    }

    /// Render the upstream into the target at `width` x `height`.
    ///
    /// `draw` runs inside the pass with copy blending (source replaces destination) and a
    /// pixel-unit orthographic projection; the previous blend state is restored afterwards.
    /// Returns false if nothing was captured this frame.
    pub fn capture(&mut self, gfx: &mut G, width: u32, height: u32, draw: impl FnOnce(&mut G)) -> bool {
        if width == 0 || height == 0 {
            return false;
        }
        if self.target.is_none() {
            self.target = gfx.target_create(ColorFormat::Bgra);
        }
        let Some(target) = self.target.as_mut() else {
            return false;
        };

        gfx.target_reset(target);
        if !gfx.target_begin(target, width, height) {
            return false;
        }

        gfx.clear(CLEAR_COLOR);
        gfx.ortho(Ortho::pixels(width, height));

        gfx.blend_push();
        gfx.blend_function(BlendState::COPY);
        draw(gfx);
        gfx.blend_pop();

        gfx.target_end(target);
        self.captured = (width, height);
        true
    }

    pub fn size_changed(&self, width: u32, height: u32) -> bool {
        self.width != width || self.height != height
    }

    /// Throw away the staging surface and create one at the new size.
    pub fn recreate_stage(&mut self, gfx: &mut G, width: u32, height: u32) {
        self.drop_stage(gfx);
        self.stage = gfx.stage_create(width, height, ColorFormat::Bgra);
    }

    /// Record the dimensions the ring was successfully reopened at.
    pub fn commit_size(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    /// Stage the last capture and copy it into `frame`.
    ///
    /// Rows are copied using the destination's row stride, clamped to what the mapped source
    /// row actually holds. At most `height` rows are written.
    pub fn copy_to(&mut self, gfx: &mut G, frame: &mut FrameWriter<'_>) -> bool {
        let Some(target) = self.target.as_ref() else {
            return false;
        };

        if self.mapped {
            if let Some(stage) = self.stage.as_mut() {
                gfx.stage_unmap(stage);
            }
            self.mapped = false;
        }
        if self.stage.is_none() {
            let (w, h) = self.captured;
            self.stage = gfx.stage_create(w, h, ColorFormat::Bgra);
        }
        let Some(stage) = self.stage.as_mut() else {
            return false;
        };

        gfx.stage_texture(stage, target);
        let Some(mapped) = gfx.stage_map(stage) else {
            return false;
        };
        self.mapped = true;
        if mapped.data.is_empty() || mapped.linesize == 0 {
            return false;
        }

        let dst_linesize = frame.linesize(0) as usize;
        let src_linesize = mapped.linesize as usize;
        let row_bytes = dst_linesize.min(src_linesize);
        let rows = (self.height as usize).min(mapped.rows()).min(frame.height() as usize);

        let Some(dst) = frame.plane_mut(0) else {
            return false;
        };
        for i in 0..rows {
            let d = dst_linesize * i;
            let s = src_linesize * i;
            let (Some(out), Some(src)) = (dst.get_mut(d..d + row_bytes), mapped.data.get(s..s + row_bytes)) else {
                break;
            };
            out.copy_from_slice(src);
        }
        true
    }

    fn drop_stage(&mut self, gfx: &mut G) {
        if let Some(mut stage) = self.stage.take() {
            if self.mapped {
                gfx.stage_unmap(&mut stage);
                self.mapped = false;
            }
            gfx.stage_destroy(stage);
        }
    }

    /// Release every GPU resource. Must run on the render thread.
    pub fn release(&mut self, gfx: &mut G) {
        self.drop_stage(gfx);
        if let Some(target) = self.target.take() {
            gfx.target_destroy(target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{VideoOutputInfo, VideoRing};
    use crate::config::VideoInfo;
    use crate::software::SoftGraphics;

    fn gradient(w: u32, h: u32) -> Vec<u8> {
        (0..w * h * 4).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn zero_size_capture_is_skipped() {
        let mut g = SoftGraphics::new();
        let mut fb = FrameBuffer::new(&mut g);
        let mut drew = false;
        assert!(!fb.capture(&mut g, 0, 720, |_| drew = true));
        assert!(!drew);
        assert_eq!(g.stats().passes, 0);
    }

    #[test]
    fn capture_uses_copy_blend_and_restores_it() {
        let mut g = SoftGraphics::new();
        let mut fb = FrameBuffer::new(&mut g);
        assert!(fb.capture(&mut g, 4, 2, |g| g.fill_rect(0, 0, 4, 2, [1, 2, 3, 0])));
        assert_eq!(g.take_draw_blends(), vec![BlendState::COPY]);
        assert_eq!(g.blend(), BlendState::ALPHA);
        assert_eq!(g.blend_depth(), 0);
        assert_eq!(g.projection(), Some(Ortho::pixels(4, 2)));
    }

    #[test]
    fn failed_begin_skips_frame() {
        let mut g = SoftGraphics::new();
        let mut fb = FrameBuffer::new(&mut g);
        g.fail_begin = true;
        let mut drew = false;
        assert!(!fb.capture(&mut g, 4, 4, |_| drew = true));
        assert!(!drew);
    }

    #[test]
    fn copy_matches_staged_rows_with_padding_mismatch() {
        let (w, h) = (5, 3);
        let mut g = SoftGraphics::with_row_padding(12);
        let mut fb = FrameBuffer::new(&mut g);
        let img = gradient(w, h);
        assert!(fb.capture(&mut g, w, h, |g| g.blit(&img, w, h)));
        fb.recreate_stage(&mut g, w, h);
        fb.commit_size(w, h);

        let ring = VideoRing::open(&VideoOutputInfo::bgra("t", w, h, VideoInfo::default(), 2)).unwrap();
        let reader = ring.attach_reader();
        {
            let mut frame = ring.lock_frame(1, 0).unwrap();
            assert!(fb.copy_to(&mut g, &mut frame));
        }
        let out = reader.next_frame(std::time::Duration::from_millis(10)).unwrap();
        let row = (w * 4) as usize;
        for y in 0..h as usize {
            let dst = &out.data[y * out.linesize as usize..][..row];
            assert_eq!(dst, &img[y * row..][..row], "row {y}");
        }
    }

    #[test]
    fn copy_never_exceeds_recorded_height() {
        let mut g = SoftGraphics::new();
        let mut fb = FrameBuffer::new(&mut g);
        let img = vec![0xAB; 4 * 4 * 4];
        assert!(fb.capture(&mut g, 4, 4, |g| g.blit(&img, 4, 4)));
        fb.recreate_stage(&mut g, 4, 4);
        fb.commit_size(4, 2);

        let ring = VideoRing::open(&VideoOutputInfo::bgra("t", 4, 4, VideoInfo::default(), 2)).unwrap();
        let reader = ring.attach_reader();
        {
            let mut frame = ring.lock_frame(1, 0).unwrap();
            frame.plane_mut(0).unwrap().fill(0);
            assert!(fb.copy_to(&mut g, &mut frame));
        }
        let out = reader.next_frame(std::time::Duration::from_millis(10)).unwrap();
        let ls = out.linesize as usize;
        assert!(out.data[..ls * 2].iter().take(16).all(|&b| b == 0xAB));
        assert!(out.data[ls * 2..].iter().all(|&b| b == 0));
    }

    #[test]
    fn each_capture_starts_from_transparent_black() {
        let (w, h) = (4, 4);
        let mut g = SoftGraphics::new();
        let mut fb = FrameBuffer::new(&mut g);
        fb.recreate_stage(&mut g, w, h);
        fb.commit_size(w, h);
        let ring = VideoRing::open(&VideoOutputInfo::bgra("t", w, h, VideoInfo::default(), 4)).unwrap();
        let reader = ring.attach_reader();

        let full = vec![0xAB; (w * h * 4) as usize];
        assert!(fb.capture(&mut g, w, h, |g| g.blit(&full, w, h)));
        {
            let mut frame = ring.lock_frame(1, 0).unwrap();
            assert!(fb.copy_to(&mut g, &mut frame));
        }

        let px = [1, 2, 3, 4];
        assert!(fb.capture(&mut g, w, h, |g| g.fill_rect(0, 0, 2, 1, px)));
        {
            let mut frame = ring.lock_frame(1, 1).unwrap();
            assert!(fb.copy_to(&mut g, &mut frame));
        }

        let _ = reader.next_frame(std::time::Duration::from_millis(10)).unwrap();
        let out = reader.next_frame(std::time::Duration::from_millis(10)).unwrap();
        let row = (w * 4) as usize;
        for y in 0..h as usize {
            let line = &out.data[y * out.linesize as usize..][..row];
            for (x, p) in line.chunks_exact(4).enumerate() {
                if y == 0 && x < 2 {
                    assert_eq!(p, px, "drawn pixel {x},{y}");
                } else {
                    assert_eq!(p, [0, 0, 0, 0], "undrawn pixel {x},{y}");
                }
            }
        }
    }

    #[test]
    fn stage_stays_mapped_until_next_copy_or_release() {
        let mut g = SoftGraphics::new();
        let mut fb = FrameBuffer::new(&mut g);
        let ring = VideoRing::open(&VideoOutputInfo::bgra("t", 2, 2, VideoInfo::default(), 4)).unwrap();
        fb.commit_size(2, 2);

        for _ in 0..2 {
            assert!(fb.capture(&mut g, 2, 2, |_| {}));
            let mut frame = ring.lock_frame(1, 0).unwrap();
            assert!(fb.copy_to(&mut g, &mut frame));
        }
        assert_eq!(g.stats().maps, 2);
        assert_eq!(g.stats().unmaps, 1);
        assert_eq!(g.stats().stages_created, 1);

        fb.release(&mut g);
        assert_eq!(g.stats().unmaps, 2);
        assert_eq!(g.stats().stages_destroyed, 1);
        assert_eq!(g.stats().targets_destroyed, 1);
    }
}
