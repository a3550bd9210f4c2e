//! Drains frames without sending them anywhere. Useful for soak runs and CI.

use vcambridge_engine::{BridgeError, RingFrame, VideoOutputInfo};

use super::{FnSink, Pump, SinkFactory};
use crate::logi;

pub struct NullSinkFactory;

impl SinkFactory for NullSinkFactory {
    fn kind(&self) -> &'static str {
        "null"
    }

    fn serve(&self, info: &VideoOutputInfo, pump: Pump<'_>) -> Result<(), BridgeError> {
        let mut bytes = 0u64;
        let mut last_ts = 0u64;
        let mut sink = FnSink(|f: &RingFrame| -> std::io::Result<()> {
            bytes += f.data.len() as u64;
            last_ts = f.timestamp;
            Ok(())
        });
        let forced = pump(&mut sink);
        logi!(
            "OUTPUT",
            "null sink drained {bytes} bytes at {}x{} (last ts={last_ts}ns forced={forced})",
            info.width,
            info.height
        );
        Ok(())
    }
}
