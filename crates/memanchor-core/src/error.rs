use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Process unavailable: {0}")]
    ProcessUnavailable(String),

    #[error("Failed to read region at {base:#x} ({size} bytes)")]
    RegionReadFailed { base: u64, size: usize },

    #[error("Failed to read process memory at address {address:#x}: {message}")]
    MemoryReadFailed { address: u64, message: String },

    #[error("No candidate found for value {0}")]
    NoCandidateFound(i32),

    #[error("Record validation failed at {address:#x} (score {score:.2})")]
    ValidationFailed { address: u64, score: f64 },

    #[error("Pointer chain broken at hop {hop}: pointer {pointer:#x}")]
    ChainBroken { hop: usize, pointer: u64 },

    #[error("Filter mismatch at offset {offset}: expected {expected}")]
    FilterMismatch { offset: i64, expected: i32 },

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Invalid filter '{0}': expected field=value")]
    InvalidFilter(String),

    #[error("Unknown field '{name}'. Known fields: {known}")]
    UnknownField { name: String, known: String },

    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is a "file not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }

    /// Check if this error means the target process is gone
    pub fn is_process_lost(&self) -> bool {
        matches!(self, Error::ProcessUnavailable(_))
    }

    pub(crate) fn read_failed(address: u64, message: impl Into<String>) -> Self {
        Error::MemoryReadFailed {
            address,
            message: message.into(),
        }
    }
}
