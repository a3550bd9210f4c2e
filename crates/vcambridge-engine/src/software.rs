//! CPU reference graphics backend.
//!
//! Render targets are plain BGRA byte buffers and staging surfaces are row-padded copies of
//! them, which is enough to run the whole bridge headless and to observe exactly what it
//! asks of the GPU layer.

use crate::gfx::{BlendFactor, BlendState, ColorFormat, Graphics, MappedSurface, Ortho};

#[derive(Debug)]
pub struct SoftTarget {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl SoftTarget {
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Tightly packed BGRA content from the last finished pass.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

#[derive(Debug)]
pub struct SoftStage {
    width: u32,
    height: u32,
    linesize: u32,
    data: Vec<u8>,
    mapped: bool,
}

impl SoftStage {
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped
    }
}

/// Counters for everything the bridge asked of the backend.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SoftStats {
    pub targets_created: u32,
    pub targets_destroyed: u32,
    pub stages_created: u32,
    pub stages_destroyed: u32,
    pub maps: u32,
    pub unmaps: u32,
    pub passes: u32,
}

#[derive(Debug, Default)]
pub struct SoftGraphics {
    /// Extra bytes appended to every staged row, like drivers that align pitch.
    row_padding: u32,
    /// Force `target_begin` to fail (simulates a lost device).
    pub fail_begin: bool,

    canvas: Vec<u8>,
    pass: Option<(u32, u32)>,
    blend: BlendState,
    blend_stack: Vec<BlendState>,
    projection: Option<Ortho>,

    draw_blends: Vec<BlendState>,
    stats: SoftStats,
}

impl SoftGraphics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_row_padding(row_padding: u32) -> Self {
        Self {
            row_padding,
            ..Self::default()
        }
    }

    pub fn stats(&self) -> &SoftStats {
        &self.stats
    }

    pub fn blend(&self) -> BlendState {
        self.blend
    }

    pub fn blend_depth(&self) -> usize {
        self.blend_stack.len()
    }

    pub fn projection(&self) -> Option<Ortho> {
        self.projection
    }

    /// Blend state that was active for each draw call since the last `take_draw_blends`.
    pub fn take_draw_blends(&mut self) -> Vec<BlendState> {
        std::mem::take(&mut self.draw_blends)
    }

    /// Size of the pass in progress, if any.
    pub fn pass_size(&self) -> Option<(u32, u32)> {
        self.pass
    }

    /// Fill a rectangle of the current pass with a BGRA color.
    pub fn fill_rect(&mut self, x: u32, y: u32, w: u32, h: u32, bgra: [u8; 4]) {
        let Some((pw, ph)) = self.pass else { return };
        self.draw_blends.push(self.blend);
        let x1 = x.saturating_add(w).min(pw);
        let y1 = y.saturating_add(h).min(ph);
        for row in y.min(ph)..y1 {
            for col in x.min(pw)..x1 {
                let i = ((row * pw + col) * 4) as usize;
                blend_pixel(self.blend, &mut self.canvas[i..i + 4], bgra);
            }
        }
    }

    /// Draw a tightly packed BGRA image at the origin of the current pass.
    pub fn blit(&mut self, src: &[u8], width: u32, height: u32) {
        let Some((pw, ph)) = self.pass else { return };
        self.draw_blends.push(self.blend);
        let cols = width.min(pw) as usize;
        for row in 0..height.min(ph) as usize {
            for col in 0..cols {
                let s = (row * width as usize + col) * 4;
                let d = (row * pw as usize + col) * 4;
                let Some(px) = src.get(s..s + 4) else { return };
                let px = [px[0], px[1], px[2], px[3]];
                blend_pixel(self.blend, &mut self.canvas[d..d + 4], px);
            }
        }
    }
}

fn blend_pixel(state: BlendState, dst: &mut [u8], src: [u8; 4]) {
    let a = src[3] as u32;
    for c in 0..4 {
        let s = src[c] as u32;
        let d = dst[c] as u32;
        let sf = factor(state.src, a);
        let df = factor(state.dst, a);
        dst[c] = ((s * sf + d * df) / 255).min(255) as u8;
    }
}

fn factor(f: BlendFactor, alpha: u32) -> u32 {
    match f {
        BlendFactor::Zero => 0,
        BlendFactor::One => 255,
        BlendFactor::SrcAlpha => alpha,
        BlendFactor::InvSrcAlpha => 255 - alpha,
    }
}

impl Graphics for SoftGraphics {
    type RenderTarget = SoftTarget;
    type StageSurface = SoftStage;

    fn target_create(&mut self, format: ColorFormat) -> Option<SoftTarget> {
        let ColorFormat::Bgra = format;
        self.stats.targets_created += 1;
        Some(SoftTarget {
            width: 0,
            height: 0,
            pixels: Vec::new(),
        })
    }

    fn target_destroy(&mut self, _target: SoftTarget) {
        self.stats.targets_destroyed += 1;
    }

    fn target_reset(&mut self, target: &mut SoftTarget) {
        target.pixels.clear();
        target.width = 0;
        target.height = 0;
    }

    fn target_begin(&mut self, _target: &mut SoftTarget, width: u32, height: u32) -> bool {
        if self.fail_begin || width == 0 || height == 0 || self.pass.is_some() {
            return false;
        }
        self.canvas.clear();
        // Fresh targets hold undefined content; the caller is expected to clear.
        self.canvas.resize((width * height * 4) as usize, 0xCD);
        self.pass = Some((width, height));
        self.projection = None;
        true
    }

    fn target_end(&mut self, target: &mut SoftTarget) {
        let Some((w, h)) = self.pass.take() else { return };
        target.width = w;
        target.height = h;
        target.pixels = std::mem::take(&mut self.canvas);
        self.stats.passes += 1;
    }

    fn clear(&mut self, color: [f32; 4]) {
        if self.pass.is_none() {
            return;
        }
        let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        // color is RGBA; canvas is BGRA.
        let px = [to_u8(color[2]), to_u8(color[1]), to_u8(color[0]), to_u8(color[3])];
        for chunk in self.canvas.chunks_exact_mut(4) {
            chunk.copy_from_slice(&px);
        }
    }

    fn ortho(&mut self, projection: Ortho) {
        self.projection = Some(projection);
    }

    fn blend_push(&mut self) {
        self.blend_stack.push(self.blend);
    }

    fn blend_pop(&mut self) {
        if let Some(prev) = self.blend_stack.pop() {
            self.blend = prev;
        }
    }

    fn blend_function(&mut self, state: BlendState) {
        self.blend = state;
    }

    fn stage_create(&mut self, width: u32, height: u32, format: ColorFormat) -> Option<SoftStage> {
        if width == 0 || height == 0 {
            return None;
        }
        let linesize = width * format.bytes_per_pixel() + self.row_padding;
        self.stats.stages_created += 1;
        Some(SoftStage {
            width,
            height,
            linesize,
            data: vec![0; (linesize * height) as usize],
            mapped: false,
        })
    }

    fn stage_destroy(&mut self, _surface: SoftStage) {
        self.stats.stages_destroyed += 1;
    }

    fn stage_texture(&mut self, surface: &mut SoftStage, target: &SoftTarget) {
        let rows = surface.height.min(target.height) as usize;
        let row_bytes = (surface.width.min(target.width) * 4) as usize;
        let src_pitch = (target.width * 4) as usize;
        let dst_pitch = surface.linesize as usize;
        for row in 0..rows {
            let s = row * src_pitch;
            let d = row * dst_pitch;
            surface.data[d..d + row_bytes].copy_from_slice(&target.pixels[s..s + row_bytes]);
        }
    }

    fn stage_map<'a>(&mut self, surface: &'a mut SoftStage) -> Option<MappedSurface<'a>> {
        if surface.mapped {
            return None;
        }
        surface.mapped = true;
        self.stats.maps += 1;
        Some(MappedSurface {
            data: &surface.data,
            linesize: surface.linesize,
        })
    }

    fn stage_unmap(&mut self, surface: &mut SoftStage) {
        if surface.mapped {
            surface.mapped = false;
            self.stats.unmaps += 1;
        }
    }
}
