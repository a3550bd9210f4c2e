use std::{fmt, path::PathBuf};

#[derive(Debug)]
pub enum BridgeError {
    /// The `assets/` folder could not be found.
    AssetsNotFound { start_dir: PathBuf },
    /// I/O error reading a file.
    Io { path: PathBuf, source: std::io::Error },
    /// JSON parse error for a file.
    Json { path: PathBuf, source: serde_json::Error },

    /// Config is syntactically valid but semantically invalid.
    InvalidConfig { path: PathBuf, msg: String },

    /// A video ring could not be opened with the requested format.
    ChannelOpen { width: u32, height: u32, msg: String },

    /// The output endpoint refused to start.
    OutputStart { name: String, msg: String },

    /// A graphics resource could not be created.
    Graphics { msg: String },
}

impl BridgeError {
    pub fn channel_open(width: u32, height: u32, msg: impl Into<String>) -> Self {
        BridgeError::ChannelOpen { width, height, msg: msg.into() }
    }

    pub fn output_start(name: impl Into<String>, msg: impl Into<String>) -> Self {
        BridgeError::OutputStart { name: name.into(), msg: msg.into() }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::AssetsNotFound { start_dir } => {
                write!(f, "Could not locate assets/ starting from {}", start_dir.display())
            }
            BridgeError::Io { path, source } => {
                write!(f, "I/O error for {}: {}", path.display(), source)
            }
            BridgeError::Json { path, source } => {
                write!(f, "JSON parse error for {}: {}", path.display(), source)
            }
            BridgeError::InvalidConfig { path, msg } => {
                write!(f, "Invalid config {}: {}", path.display(), msg)
            }
            BridgeError::ChannelOpen { width, height, msg } => {
                write!(f, "Failed to open video ring {}x{}: {}", width, height, msg)
            }
            BridgeError::OutputStart { name, msg } => {
                write!(f, "Output '{}' failed to start: {}", name, msg)
            }
            BridgeError::Graphics { msg } => write!(f, "Graphics error: {}", msg),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::Io { source, .. } => Some(source),
            BridgeError::Json { source, .. } => Some(source),
            _ => None,
        }
    }
}
