//! OpenGL implementation of the bridge's graphics interface.
//!
//! Render targets are FBO-backed textures. Staging surfaces are pixel-pack buffers: the
//! target is read into the PBO asynchronously and mapped with `glMapBufferRange` on demand.
//! Rows come back bottom-up; endpoints flip them when asked to.

use anyhow::anyhow;
use glow::HasContext;
use vcambridge_engine::gfx::{BlendFactor, BlendState, ColorFormat, Graphics, MappedSurface, Ortho};

use crate::logw;

// Fullscreen triangle vertex shader
pub const VERT_SRC: &str = r#"#version 330 core
out vec2 v_uv;
void main() {
    vec2 pos;
    if (gl_VertexID == 0) pos = vec2(-1.0, -1.0);
    else if (gl_VertexID == 1) pos = vec2( 3.0, -1.0);
    else pos = vec2(-1.0,  3.0);
    v_uv = pos * 0.5 + 0.5;
    gl_Position = vec4(pos, 0.0, 1.0);
}"#;

#[derive(Debug)]
pub struct GlTarget {
    fbo: glow::NativeFramebuffer,
    tex: glow::NativeTexture,
    w: i32,
    h: i32,
}

#[derive(Debug)]
pub struct GlStage {
    pbo: glow::NativeBuffer,
    w: i32,
    h: i32,
    linesize: u32,
    mapped: bool,
}

impl GlStage {
    fn len(&self) -> i32 {
        self.linesize as i32 * self.h
    }
}

pub struct GlGraphics {
    gl: glow::Context,
    pattern: glow::NativeProgram,
    vao: glow::NativeVertexArray,
    blend: BlendState,
    blend_stack: Vec<BlendState>,
    projection: Option<Ortho>,
    pass: Option<(i32, i32)>,
    /// Texture and size of the last finished pass, for the preview.
    last_output: Option<(glow::NativeTexture, i32, i32)>,
}

impl GlGraphics {
    pub fn new(gl: glow::Context, pattern_frag: &str) -> anyhow::Result<Self> {
        let pattern = unsafe { compile_program(&gl, VERT_SRC, pattern_frag)? };
        let vao = unsafe { gl.create_vertex_array().map_err(|e| anyhow!("create vertex array: {e}"))? };
        Ok(Self {
            gl,
            pattern,
            vao,
            blend: BlendState::ALPHA,
            blend_stack: Vec::new(),
            projection: None,
            pass: None,
            last_output: None,
        })
    }

    pub fn gl(&self) -> &glow::Context {
        &self.gl
    }

    pub fn last_output(&self) -> Option<(glow::NativeTexture, i32, i32)> {
        self.last_output
    }

    /// Draw the color-bar pattern over the pass in progress.
    pub fn draw_pattern(&mut self, frame: u64, marker_x: u32) {
        let Some((w, h)) = self.pass else { return };
        let gl = &self.gl;
        unsafe {
            gl.use_program(Some(self.pattern));
            if let Some(loc) = gl.get_uniform_location(self.pattern, "u_resolution") {
                gl.uniform_2_f32(Some(&loc), w as f32, h as f32);
            }
            if let Some(loc) = gl.get_uniform_location(self.pattern, "u_frame") {
                gl.uniform_1_f32(Some(&loc), frame as f32);
            }
            if let Some(loc) = gl.get_uniform_location(self.pattern, "u_marker_x") {
                gl.uniform_1_f32(Some(&loc), marker_x as f32);
            }
            if let Some(p) = self.projection {
                if let Some(loc) = gl.get_uniform_location(self.pattern, "u_ortho") {
                    gl.uniform_4_f32(Some(&loc), p.left, p.right, p.top, p.bottom);
                }
            }
            gl.bind_vertex_array(Some(self.vao));
            gl.draw_arrays(glow::TRIANGLES, 0, 3);
            gl.bind_vertex_array(None);
            gl.use_program(None);
        }
    }

    fn apply_blend(&self) {
        let f = |b: BlendFactor| match b {
            BlendFactor::Zero => glow::ZERO,
            BlendFactor::One => glow::ONE,
            BlendFactor::SrcAlpha => glow::SRC_ALPHA,
            BlendFactor::InvSrcAlpha => glow::ONE_MINUS_SRC_ALPHA,
        };
        unsafe {
            self.gl.enable(glow::BLEND);
            self.gl.blend_func(f(self.blend.src), f(self.blend.dst));
        }
    }

    unsafe fn alloc_texture(&self, tex: glow::NativeTexture, w: i32, h: i32) {
        let gl = &self.gl;
        gl.bind_texture(glow::TEXTURE_2D, Some(tex));
        gl.tex_image_2d(
            glow::TEXTURE_2D,
            0,
            glow::RGBA8 as i32,
            w,
            h,
            0,
            glow::BGRA,
            glow::UNSIGNED_BYTE,
            glow::PixelUnpackData::Slice(None),
        );
        gl.bind_texture(glow::TEXTURE_2D, None);
    }

    /// Release programs owned by the backend. Targets and stages are released by their owner.
    pub fn destroy(&mut self) {
        unsafe {
            self.gl.delete_program(self.pattern);
            self.gl.delete_vertex_array(self.vao);
        }
    }
}

impl Graphics for GlGraphics {
    type RenderTarget = GlTarget;
    type StageSurface = GlStage;

    fn target_create(&mut self, format: ColorFormat) -> Option<GlTarget> {
        let ColorFormat::Bgra = format;
        let gl = &self.gl;
        unsafe {
            let tex = match gl.create_texture() {
                Ok(t) => t,
                Err(e) => {
                    logw!("GL", "create_texture failed: {e}");
                    return None;
                }
            };
            gl.bind_texture(glow::TEXTURE_2D, Some(tex));
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);
            gl.bind_texture(glow::TEXTURE_2D, None);

            let fbo = match gl.create_framebuffer() {
                Ok(f) => f,
                Err(e) => {
                    logw!("GL", "create_framebuffer failed: {e}");
                    gl.delete_texture(tex);
                    return None;
                }
            };
            Some(GlTarget { fbo, tex, w: 0, h: 0 })
        }
    }

    fn target_destroy(&mut self, target: GlTarget) {
        if self.last_output.map(|(t, _, _)| t) == Some(target.tex) {
            self.last_output = None;
        }
        unsafe {
            self.gl.delete_framebuffer(target.fbo);
            self.gl.delete_texture(target.tex);
        }
    }

    fn target_reset(&mut self, _target: &mut GlTarget) {
        // Content is cleared by every pass; storage is kept and resized on begin.
    }

    fn target_begin(&mut self, target: &mut GlTarget, width: u32, height: u32) -> bool {
        if self.pass.is_some() || width == 0 || height == 0 {
            return false;
        }
        let (w, h) = (width as i32, height as i32);
        unsafe {
            if target.w != w || target.h != h {
                self.alloc_texture(target.tex, w, h);
                target.w = w;
                target.h = h;
            }
            let gl = &self.gl;
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(target.fbo));
            gl.framebuffer_texture_2d(glow::FRAMEBUFFER, glow::COLOR_ATTACHMENT0, glow::TEXTURE_2D, Some(target.tex), 0);
            let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
            if status != glow::FRAMEBUFFER_COMPLETE {
                logw!("GL", "FBO incomplete: 0x{status:x}");
                gl.bind_framebuffer(glow::FRAMEBUFFER, None);
                return false;
            }
            gl.viewport(0, 0, w, h);
        }
        self.pass = Some((w, h));
        self.projection = None;
        true
    }

    fn target_end(&mut self, target: &mut GlTarget) {
        if self.pass.take().is_none() {
            return;
        }
        unsafe {
            self.gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        }
        self.last_output = Some((target.tex, target.w, target.h));
    }

    fn clear(&mut self, color: [f32; 4]) {
        unsafe {
            self.gl.clear_color(color[0], color[1], color[2], color[3]);
            self.gl.clear(glow::COLOR_BUFFER_BIT);
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
            self.apply_blend();
        }
    }

    fn blend_function(&mut self, state: BlendState) {
        self.blend = state;
        self.apply_blend();
    }

    fn stage_create(&mut self, width: u32, height: u32, format: ColorFormat) -> Option<GlStage> {
        if width == 0 || height == 0 {
            return None;
        }
        let linesize = width * format.bytes_per_pixel();
        let gl = &self.gl;
        unsafe {
            let pbo = match gl.create_buffer() {
                Ok(b) => b,
                Err(e) => {
                    logw!("GL", "create_buffer failed: {e}");
                    return None;
                }
            };
            gl.bind_buffer(glow::PIXEL_PACK_BUFFER, Some(pbo));
            gl.buffer_data_size(glow::PIXEL_PACK_BUFFER, (linesize * height) as i32, glow::STREAM_READ);
            gl.bind_buffer(glow::PIXEL_PACK_BUFFER, None);
            Some(GlStage {
                pbo,
                w: width as i32,
                h: height as i32,
                linesize,
                mapped: false,
            })
        }
    }

    fn stage_destroy(&mut self, surface: GlStage) {
        unsafe {
            self.gl.delete_buffer(surface.pbo);
        }
    }

    fn stage_texture(&mut self, surface: &mut GlStage, target: &GlTarget) {
        let w = surface.w.min(target.w);
        let h = surface.h.min(target.h);
        if w <= 0 || h <= 0 {
            return;
        }
        let gl = &self.gl;
        unsafe {
            gl.bind_framebuffer(glow::READ_FRAMEBUFFER, Some(target.fbo));
            gl.bind_buffer(glow::PIXEL_PACK_BUFFER, Some(surface.pbo));
            gl.pixel_store_i32(glow::PACK_ALIGNMENT, 4);
            gl.pixel_store_i32(glow::PACK_ROW_LENGTH, surface.w);
            gl.read_pixels(0, 0, w, h, glow::BGRA, glow::UNSIGNED_BYTE, glow::PixelPackData::BufferOffset(0));
            gl.pixel_store_i32(glow::PACK_ROW_LENGTH, 0);
            gl.bind_buffer(glow::PIXEL_PACK_BUFFER, None);
            gl.bind_framebuffer(glow::READ_FRAMEBUFFER, None);
        }
    }

    fn stage_map<'a>(&mut self, surface: &'a mut GlStage) -> Option<MappedSurface<'a>> {
        if surface.mapped {
            return None;
        }
        let len = surface.len();
        let gl = &self.gl;
        unsafe {
            gl.bind_buffer(glow::PIXEL_PACK_BUFFER, Some(surface.pbo));
            let ptr = gl.map_buffer_range(glow::PIXEL_PACK_BUFFER, 0, len, glow::MAP_READ_BIT);
            gl.bind_buffer(glow::PIXEL_PACK_BUFFER, None);
            if ptr.is_null() {
                return None;
            }
            surface.mapped = true;
            // The mapping lives until `stage_unmap`, which needs `&mut` on the same surface,
            // so the slice cannot outlive it.
            let data = std::slice::from_raw_parts(ptr as *const u8, len as usize);
            Some(MappedSurface {
                data,
                linesize: surface.linesize,
            })
        }
    }

    fn stage_unmap(&mut self, surface: &mut GlStage) {
        if !surface.mapped {
            return;
        }
        unsafe {
            self.gl.bind_buffer(glow::PIXEL_PACK_BUFFER, Some(surface.pbo));
            self.gl.unmap_buffer(glow::PIXEL_PACK_BUFFER);
            self.gl.bind_buffer(glow::PIXEL_PACK_BUFFER, None);
        }
        surface.mapped = false;
    }
}

pub unsafe fn compile_program(gl: &glow::Context, vert_src: &str, frag_src: &str) -> anyhow::Result<glow::NativeProgram> {
    let vs = gl.create_shader(glow::VERTEX_SHADER).map_err(|e| anyhow!("create vertex shader: {e}"))?;
    gl.shader_source(vs, vert_src);
    gl.compile_shader(vs);
    if !gl.get_shader_compile_status(vs) {
        let log = gl.get_shader_info_log(vs);
        gl.delete_shader(vs);
        return Err(anyhow!("Vertex shader compile error:\n{log}"));
    }

    let fs = gl.create_shader(glow::FRAGMENT_SHADER).map_err(|e| anyhow!("create fragment shader: {e}"))?;
    gl.shader_source(fs, frag_src);
    gl.compile_shader(fs);
    if !gl.get_shader_compile_status(fs) {
        let log = gl.get_shader_info_log(fs);
        gl.delete_shader(vs);
        gl.delete_shader(fs);
        return Err(anyhow!("Fragment shader compile error:\n{log}"));
    }

    let program = gl.create_program().map_err(|e| anyhow!("create program: {e}"))?;
    gl.attach_shader(program, vs);
    gl.attach_shader(program, fs);
    gl.link_program(program);

    let linked = gl.get_program_link_status(program);
    gl.detach_shader(program, vs);
    gl.detach_shader(program, fs);
    gl.delete_shader(vs);
    gl.delete_shader(fs);

    if !linked {
        let log = gl.get_program_info_log(program);
        gl.delete_program(program);
        return Err(anyhow!("Program link error:\n{log}"));
    }

    Ok(program)
}
