use crossbeam_channel::Sender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Why the output endpoint was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Upstream enable signal went false.
    Disabled,
    /// A resize recreated the channel while the output was running.
    Restart,
    /// A shutdown trigger fired.
    Shutdown,
}

/// Which trigger tore the context down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    Destroy,
    Removed,
    Exit,
    CollectionCleanup,
}

#[derive(Debug, Clone)]
pub enum BridgeEvent {
    /// General-purpose log line.
    Log {
        level: LogLevel,
        tag: &'static str,
        msg: String,
    },

    /// The video ring was recreated at new dimensions.
    ChannelReopened { width: u32, height: u32, generation: u64 },

    /// The video ring could not be recreated; the previous one stays in use.
    ChannelReopenFailed { width: u32, height: u32, error: String },

    /// The output endpoint started and the upstream was told it is showing.
    OutputStarted { generation: u64 },

    /// The output endpoint was stopped.
    OutputStopped { reason: StopReason },

    /// A background start attempt failed; the next attempt waits for the cooldown.
    StartFailed { error: String },

    /// The context was torn down. Emitted exactly once.
    Shutdown { trigger: ShutdownTrigger },
}

/// Optional event stream out of the engine.
///
/// The engine never prints; hosts drain the receiver and log however they like.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<Sender<BridgeEvent>>,
}

impl EventSink {
    pub fn new(tx: Sender<BridgeEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn none() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, ev: BridgeEvent) {
        if let Some(tx) = &self.tx {
            // Receiver gone means nobody is listening any more.
            let _ = tx.try_send(ev);
        }
    }

    pub fn log(&self, level: LogLevel, tag: &'static str, msg: impl Into<String>) {
        self.emit(BridgeEvent::Log { level, tag, msg: msg.into() });
    }
}
