//! ffmpeg pipe output.
//!
//! Raw BGRA frames are written to an ffmpeg child's stdin. The default destination is a
//! v4l2loopback device, which shows up as a webcam to every other application.

use std::io::Write;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::time::Duration;

use vcambridge_engine::{BridgeError, RingFrame, VideoOutputInfo};

use super::{pack_rows, FrameSink, Pump, SinkFactory};
use crate::logging::spawn_pipe_thread;
use crate::settings::PipeCfg;
use crate::{logi, logw};

/// How long ffmpeg gets to fail on bad arguments or a missing device before we call it started.
const STARTUP_GRACE: Duration = Duration::from_millis(250);

pub struct PipeSinkFactory {
    ffmpeg: String,
    output_args: Vec<String>,
    vflip: bool,
}

impl PipeSinkFactory {
    pub fn new(cfg: &PipeCfg, vflip: bool) -> Self {
        Self {
            ffmpeg: cfg.ffmpeg_path.clone().unwrap_or_else(|| "ffmpeg".to_string()),
            output_args: cfg.output_args.clone(),
            vflip,
        }
    }

    /// Full ffmpeg argument list for a ring of the given format.
    pub fn args_for(&self, info: &VideoOutputInfo) -> Vec<String> {
        let mut args: Vec<String> = [
            "-hide_banner",
            "-loglevel",
            "warning",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "bgra",
            "-s",
            &format!("{}x{}", info.width, info.height),
            "-r",
            &format!("{}/{}", info.fps_num.max(1), info.fps_den.max(1)),
            "-i",
            "-",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        args.extend(self.output_args.iter().cloned());
        args
    }

    fn spawn(&self, info: &VideoOutputInfo) -> Result<(Child, ChildStdin), BridgeError> {
        let args = self.args_for(info);
        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BridgeError::output_start("pipe", format!("failed to start {}: {e}", self.ffmpeg)))?;

        // Pipe ffmpeg output through our logging so everything is timestamped/tagged.
        if let Some(out) = child.stdout.take() {
            spawn_pipe_thread("ffmpeg_out", "FFMPEG", out, false);
        }
        if let Some(err) = child.stderr.take() {
            spawn_pipe_thread("ffmpeg_err", "FFMPEG", err, true);
        }

        let Some(stdin) = child.stdin.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(BridgeError::output_start("pipe", "failed to open ffmpeg stdin"));
        };

        std::thread::sleep(STARTUP_GRACE);
        if let Ok(Some(status)) = child.try_wait() {
            return Err(BridgeError::output_start("pipe", format!("ffmpeg exited during startup ({status})")));
        }

        Ok((child, stdin))
    }
}

struct PipeSink {
    stdin: ChildStdin,
    vflip: bool,
    buf: Vec<u8>,
}

impl FrameSink for PipeSink {
    fn write(&mut self, frame: &RingFrame) -> std::io::Result<()> {
        pack_rows(frame, self.vflip, &mut self.buf);
        self.stdin.write_all(&self.buf)
    }
}

impl SinkFactory for PipeSinkFactory {
    fn kind(&self) -> &'static str {
        "pipe"
    }

    fn serve(&self, info: &VideoOutputInfo, pump: Pump<'_>) -> Result<(), BridgeError> {
        let (mut child, stdin) = self.spawn(info)?;
        logi!("OUTPUT", "ffmpeg started ({}x{}), args: {}", info.width, info.height, self.output_args.join(" "));

        let mut sink = PipeSink {
            stdin,
            vflip: self.vflip,
            buf: Vec::new(),
        };
        let forced = pump(&mut sink);

        // Closing stdin lets ffmpeg flush and exit on its own.
        drop(sink);
        if forced {
            let _ = child.kill();
        }
        match child.wait() {
            Ok(status) => logi!("OUTPUT", "ffmpeg stopped ({status})"),
            Err(e) => logw!("OUTPUT", "ffmpeg wait failed: {e}"),
        }
        Ok(())
    }
}
