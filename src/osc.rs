//! OSC remote control (UDP).
//!
//! Addresses, relative to the configured prefix (default `/vcam`):
//! - `/enabled <i|f|T/F>`: host-side enable toggle of the filter
//! - `/size <w> <h>`: resize the upstream node
//! - `/remove`: remove the filter from its parent
//! - `/quit`: exit the application

use std::net::UdpSocket;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};
use rosc::{OscMessage, OscPacket, OscType};

use crate::settings::OscCfg;
use crate::{logi, logw};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Enabled(bool),
    Size(u32, u32),
    Remove,
    Quit,
}

pub struct OscHandle {
    stop_tx: Sender<()>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl Drop for OscHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

pub fn connect_osc(cfg: &OscCfg, out: Sender<Control>) -> Option<OscHandle> {
    if !cfg.enabled {
        return None;
    }

    let sock = match UdpSocket::bind(&cfg.bind) {
        Ok(s) => s,
        Err(e) => {
            logw!("OSC", "failed to bind {}: {e}", cfg.bind);
            return None;
        }
    };
    // Short timeout so the thread notices the stop signal.
    let _ = sock.set_read_timeout(Some(Duration::from_millis(20)));

    logi!("OSC", "listening on {} prefix={}", cfg.bind, cfg.prefix);
    let (stop_tx, stop_rx) = bounded::<()>(1);
    let prefix = cfg.prefix.clone();

    let join = std::thread::Builder::new()
        .name("osc".to_string())
        .spawn(move || {
            let mut buf = [0u8; 2048];
            while stop_rx.try_recv().is_err() {
                let Ok((sz, from)) = sock.recv_from(&mut buf) else {
                    continue;
                };
                let Ok((_rest, pkt)) = rosc::decoder::decode_udp(&buf[..sz]) else {
                    logw!("OSC", "undecodable packet from {from}");
                    continue;
                };
                let mut controls = Vec::new();
                collect_controls(&prefix, pkt, &mut controls);
                for c in controls {
                    logi!("OSC", "{from} -> {c:?}");
                    let _ = out.send(c);
                }
            }
            logi!("OSC", "stopped");
        });

    match join {
        Ok(j) => Some(OscHandle {
            stop_tx,
            join: Some(j),
        }),
        Err(e) => {
            logw!("OSC", "failed to spawn listener: {e}");
            None
        }
    }
}

fn collect_controls(prefix: &str, pkt: OscPacket, out: &mut Vec<Control>) {
    match pkt {
        OscPacket::Message(msg) => {
            if let Some(c) = parse_message(prefix, &msg) {
                out.push(c);
            }
        }
        OscPacket::Bundle(b) => {
            for p in b.content {
                collect_controls(prefix, p, out);
            }
        }
    }
}

/// Map one message onto a control, or `None` if it isn't ours or is malformed.
pub fn parse_message(prefix: &str, msg: &OscMessage) -> Option<Control> {
    let rest = msg.addr.strip_prefix(prefix)?;
    match rest {
        "/enabled" => as_bool(msg.args.first()?).map(Control::Enabled),
        "/size" => {
            let w = as_u32(msg.args.first()?)?;
            let h = as_u32(msg.args.get(1)?)?;
            Some(Control::Size(w, h))
        }
        "/remove" => Some(Control::Remove),
        "/quit" => Some(Control::Quit),
        _ => None,
    }
}

fn as_bool(v: &OscType) -> Option<bool> {
    match v {
        OscType::Bool(b) => Some(*b),
        OscType::Int(i) => Some(*i != 0),
        OscType::Float(f) => Some(*f >= 0.5),
        _ => None,
    }
}

fn as_u32(v: &OscType) -> Option<u32> {
    match v {
        OscType::Int(i) if *i >= 0 => Some(*i as u32),
        OscType::Float(f) if *f >= 0.0 => Some(f.round() as u32),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(addr: &str, args: Vec<OscType>) -> OscMessage {
        OscMessage {
            addr: addr.to_string(),
            args,
        }
    }

    #[test]
    fn parses_known_addresses() {
        assert_eq!(parse_message("/vcam", &msg("/vcam/enabled", vec![OscType::Int(0)])), Some(Control::Enabled(false)));
        assert_eq!(parse_message("/vcam", &msg("/vcam/enabled", vec![OscType::Float(1.0)])), Some(Control::Enabled(true)));
        assert_eq!(
            parse_message("/vcam", &msg("/vcam/size", vec![OscType::Int(1280), OscType::Float(720.0)])),
            Some(Control::Size(1280, 720))
        );
        assert_eq!(parse_message("/vcam", &msg("/vcam/remove", vec![])), Some(Control::Remove));
        assert_eq!(parse_message("/vcam", &msg("/vcam/quit", vec![])), Some(Control::Quit));
    }

    #[test]
    fn ignores_foreign_and_malformed() {
        assert_eq!(parse_message("/vcam", &msg("/other/quit", vec![])), None);
        assert_eq!(parse_message("/vcam", &msg("/vcam/size", vec![OscType::Int(5)])), None);
        assert_eq!(parse_message("/vcam", &msg("/vcam/size", vec![OscType::Int(-1), OscType::Int(2)])), None);
        assert_eq!(parse_message("/vcam", &msg("/vcam/enabled", vec![OscType::String("yes".into())])), None);
    }

    #[test]
    fn bundles_are_flattened() {
        let pkt = OscPacket::Bundle(rosc::OscBundle {
            timetag: rosc::OscTime { seconds: 0, fractional: 1 },
            content: vec![
                OscPacket::Message(msg("/vcam/enabled", vec![OscType::Bool(true)])),
                OscPacket::Message(msg("/vcam/quit", vec![])),
            ],
        });
        let mut out = Vec::new();
        collect_controls("/vcam", pkt, &mut out);
        assert_eq!(out, vec![Control::Enabled(true), Control::Quit]);
    }
}
