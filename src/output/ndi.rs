//! NDI output (feature `ndi`).
//!
//! Publishes the ring as an NDI source that OBS (via DistroAV) and other receivers can pick up.

use grafton_ndi::{LineStrideOrSize, PixelFormat, ScanType, Sender, SenderOptions, VideoFrame, NDI};
use vcambridge_engine::{BridgeError, RingFrame, VideoOutputInfo};

use super::{pack_rows, FnSink, Pump, SinkFactory};
use crate::logi;
use crate::settings::NdiCfg;

pub struct NdiSinkFactory {
    name: String,
    groups: Option<String>,
    clock_video: bool,
    vflip: bool,
}

impl NdiSinkFactory {
    pub fn new(cfg: &NdiCfg, channel_name: &str, vflip: bool) -> Self {
        Self {
            name: cfg.name.clone().unwrap_or_else(|| channel_name.to_string()),
            groups: cfg.groups.clone(),
            clock_video: cfg.clock_video,
            vflip,
        }
    }
}

fn ndi_err(what: &str, e: impl std::fmt::Debug) -> BridgeError {
    BridgeError::output_start("ndi", format!("{what}: {e:?}"))
}

impl SinkFactory for NdiSinkFactory {
    fn kind(&self) -> &'static str {
        "ndi"
    }

    fn serve(&self, info: &VideoOutputInfo, pump: Pump<'_>) -> Result<(), BridgeError> {
        let ndi = NDI::new().map_err(|e| ndi_err("init", e))?;

        let mut builder = SenderOptions::builder(&self.name);
        if let Some(g) = self.groups.as_deref() {
            builder = builder.groups(g);
        }
        let opts = builder.clock_video(self.clock_video).build();
        let sender = Sender::new(&ndi, &opts).map_err(|e| ndi_err("create sender", e))?;

        let (w, h) = (info.width as i32, info.height as i32);
        let (fps_n, fps_d) = (info.fps_num.max(1) as i32, info.fps_den.max(1) as i32);
        let mut frame = VideoFrame::builder()
            .resolution(w, h)
            .pixel_format(PixelFormat::BGRA)
            .frame_rate(fps_n, fps_d)
            .aspect_ratio(w as f32 / h.max(1) as f32)
            .scan_type(ScanType::Progressive)
            .build()
            .map_err(|e| ndi_err("build frame", e))?;

        logi!("OUTPUT", "NDI source '{}' up ({w}x{h} @ {fps_n}/{fps_d})", self.name);

        let vflip = self.vflip;
        let mut buf = Vec::new();
        let mut sink = FnSink(|f: &RingFrame| -> std::io::Result<()> {
            pack_rows(f, vflip, &mut buf);
            frame.data = std::mem::take(&mut buf);
            frame.line_stride_or_size = LineStrideOrSize::LineStrideBytes(w.saturating_mul(4));
            sender.send_video(&frame);
            buf = std::mem::take(&mut frame.data);
            Ok(())
        });
        pump(&mut sink);

        logi!("OUTPUT", "NDI source '{}' closed", self.name);
        Ok(())
    }
}
