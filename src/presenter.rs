use glow::HasContext;

/// Presentation-only preview of what the bridge captured.
///
/// The capture target's size is authoritative (it follows the upstream node). The preview
/// window just shows that texture letterboxed into whatever size the window has. With the
/// preview disabled the null presenter keeps the render loop free of conditionals.
#[derive(Debug)]
pub enum Presenter {
    Window(WindowPresenter),
    Null(NullPresenter),
}

impl Presenter {
    pub fn is_enabled(&self) -> bool {
        matches!(self, Presenter::Window(_))
    }

    /// Present `tex` to the default framebuffer, then swap via `swap_fn`.
    ///
    /// `swap_fn` is injected so this module doesn't need to know glutin surface types.
    pub fn present(
        &mut self,
        gl: &glow::Context,
        src: Option<(glow::NativeTexture, i32, i32)>,
        win_w: i32,
        win_h: i32,
        swap_fn: impl FnOnce(),
    ) {
        match self {
            Presenter::Window(p) => {
                p.present(gl, src, win_w, win_h);
                swap_fn();
            }
            Presenter::Null(_) => {}
        }
    }

    pub fn destroy(&mut self, gl: &glow::Context) {
        if let Presenter::Window(p) = self {
            unsafe {
                gl.delete_program(p.program);
                gl.delete_vertex_array(p.vao);
            }
        }
    }
}

#[derive(Debug)]
pub struct WindowPresenter {
    pub program: glow::NativeProgram,
    pub vao: glow::NativeVertexArray,
}

impl WindowPresenter {
    pub fn present(&mut self, gl: &glow::Context, src: Option<(glow::NativeTexture, i32, i32)>, win_w: i32, win_h: i32) {
        unsafe {
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            gl.viewport(0, 0, win_w, win_h);
            gl.disable(glow::BLEND);
            gl.clear_color(0.02, 0.02, 0.02, 1.0);
            gl.clear(glow::COLOR_BUFFER_BIT);

            let Some((tex, src_w, src_h)) = src else {
                return;
            };

            gl.use_program(Some(self.program));
            gl.bind_vertex_array(Some(self.vao));

            if let Some(loc) = gl.get_uniform_location(self.program, "u_resolution") {
                gl.uniform_2_f32(Some(&loc), win_w as f32, win_h as f32);
            }
            if let Some(loc) = gl.get_uniform_location(self.program, "u_src_resolution") {
                gl.uniform_2_f32(Some(&loc), src_w as f32, src_h as f32);
            }
            if let Some(loc) = gl.get_uniform_location(self.program, "u_tex") {
                gl.uniform_1_i32(Some(&loc), 0);
            }
            gl.active_texture(glow::TEXTURE0);
            gl.bind_texture(glow::TEXTURE_2D, Some(tex));

            gl.draw_arrays(glow::TRIANGLES, 0, 3);

            gl.bind_texture(glow::TEXTURE_2D, None);
            gl.bind_vertex_array(None);
            gl.use_program(None);
        }
    }
}

#[derive(Debug, Default)]
pub struct NullPresenter;
