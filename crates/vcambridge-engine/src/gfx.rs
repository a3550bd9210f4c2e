//! GPU abstraction consumed by the frame buffer manager.
//!
//! The bridge never talks to a graphics API directly. A host hands in something that
//! implements [`Graphics`]: the OpenGL backend in the runner, or [`crate::software::SoftGraphics`]
//! for headless runs and tests.

/// Pixel layout of render targets, staging surfaces and ring frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorFormat {
    Bgra,
}

impl ColorFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            ColorFormat::Bgra => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    InvSrcAlpha,
}

/// Blend function in effect (source factor, destination factor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendState {
    pub src: BlendFactor,
    pub dst: BlendFactor,
}

impl BlendState {
    /// Straight copy: the source replaces the destination.
    pub const COPY: BlendState = BlendState {
        src: BlendFactor::One,
        dst: BlendFactor::Zero,
    };

    /// Regular premultiplied-free alpha blending.
    pub const ALPHA: BlendState = BlendState {
        src: BlendFactor::SrcAlpha,
        dst: BlendFactor::InvSrcAlpha,
    };
}

impl Default for BlendState {
    fn default() -> Self {
        BlendState::ALPHA
    }
}

/// Orthographic projection bounds for a render pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ortho {
    pub left: f32,
    pub right: f32,
    pub top: f32,
    pub bottom: f32,
    pub znear: f32,
    pub zfar: f32,
}

impl Ortho {
    /// Projection mapping one unit to one pixel of a `width` x `height` target.
    pub fn pixels(width: u32, height: u32) -> Self {
        Self {
            left: 0.0,
            right: width as f32,
            top: 0.0,
            bottom: height as f32,
            znear: -100.0,
            zfar: 100.0,
        }
    }
}

/// CPU view of a mapped staging surface.
#[derive(Debug)]
pub struct MappedSurface<'a> {
    pub data: &'a [u8],
    /// Bytes per row in `data`. May exceed `width * 4` when the driver pads rows.
    pub linesize: u32,
}

impl MappedSurface<'_> {
    /// Number of complete rows available.
    pub fn rows(&self) -> usize {
        if self.linesize == 0 {
            return 0;
        }
        self.data.len() / self.linesize as usize
    }
}

/// Graphics operations the bridge needs from the host.
///
/// All methods are called from the render thread only.
pub trait Graphics {
    type RenderTarget: Send;
    type StageSurface: Send;

    fn target_create(&mut self, format: ColorFormat) -> Option<Self::RenderTarget>;
    fn target_destroy(&mut self, target: Self::RenderTarget);
    /// Drop the previous frame's content so the next `target_begin` starts fresh.
    fn target_reset(&mut self, target: &mut Self::RenderTarget);
    /// Begin a pass into `target` at the given size. Returns false if the pass cannot start.
    fn target_begin(&mut self, target: &mut Self::RenderTarget, width: u32, height: u32) -> bool;
    fn target_end(&mut self, target: &mut Self::RenderTarget);

    fn clear(&mut self, color: [f32; 4]);
    fn ortho(&mut self, projection: Ortho);

    fn blend_push(&mut self);
    fn blend_pop(&mut self);
    fn blend_function(&mut self, state: BlendState);

    fn stage_create(&mut self, width: u32, height: u32, format: ColorFormat) -> Option<Self::StageSurface>;
    fn stage_destroy(&mut self, surface: Self::StageSurface);
    /// Copy the target's texture into the staging surface.
    fn stage_texture(&mut self, surface: &mut Self::StageSurface, target: &Self::RenderTarget);
    fn stage_map<'a>(&mut self, surface: &'a mut Self::StageSurface) -> Option<MappedSurface<'a>>;
    fn stage_unmap(&mut self, surface: &mut Self::StageSurface);
}
