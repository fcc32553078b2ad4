use std::error::Error;
use std::fmt;

/// Errors raised by operations that require a loaded plugin, an in-range
/// index, or that otherwise fail a precondition before ever touching the
/// plugin backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostError {
    /// The instance has no plugin loaded.
    NotLoaded,
    /// A parameter or program index was out of the declared range.
    IndexOutOfRange { index: i32, count: usize },
    /// The operation was refused because of the instance's current state
    /// (e.g. `open` while already `Loading`).
    PreconditionViolation(&'static str),
}

impl Error for HostError {}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostError::NotLoaded => write!(f, "no plugin is loaded on this instance"),
            HostError::IndexOutOfRange { index, count } => {
                write!(f, "index {} is out of range (declared count: {})", index, count)
            }
            HostError::PreconditionViolation(reason) => write!(f, "refused: {}", reason),
        }
    }
}

/// Errors raised while loading or activating a plugin backend on the
/// worker thread.
#[derive(Debug)]
pub enum ActivateError {
    /// The backend failed to create an instance from the file at the given
    /// path.
    BackendLoadFailure(String),
    /// The backend created successfully but failed the handshake (e.g.
    /// returned a zero-channel port layout).
    HandshakeFailure(String),
}

impl Error for ActivateError {}

impl fmt::Display for ActivateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivateError::BackendLoadFailure(e) => {
                write!(f, "plugin backend failed to load: {}", e)
            }
            ActivateError::HandshakeFailure(e) => {
                write!(f, "plugin backend failed its handshake: {}", e)
            }
        }
    }
}

/// Errors raised by worker-thread file I/O (preset/bank read and write).
#[derive(Debug)]
pub struct IoError {
    pub path: std::path::PathBuf,
    pub source: std::io::Error,
}

impl Error for IoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I/O error on {}: {}", self.path.display(), self.source)
    }
}

/// Errors raised by the FXP/FXB and VST3 chunk-list codecs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    TooShort { expected_at_least: usize, got: usize },
    BadMagic { expected: [u8; 4], got: [u8; 4] },
    ByteSizeExceedsInput { declared: usize, available: usize },
    ParamCountMismatch { declared_params: usize, remaining_bytes: usize },
    ChunkFormMismatch { input_is_chunk: bool, plugin_expects_chunk: bool },
    ClassIdMismatch,
    /// A codec path deliberately left unimplemented rather than guessed at.
    NotImplemented(&'static str),
}

impl Error for CodecError {}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::TooShort { expected_at_least, got } => {
                write!(f, "input too short: expected at least {} bytes, got {}", expected_at_least, got)
            }
            CodecError::BadMagic { expected, got } => write!(
                f,
                "bad magic: expected {:?}, got {:?}",
                std::str::from_utf8(expected).unwrap_or("?"),
                std::str::from_utf8(got).unwrap_or("?")
            ),
            CodecError::ByteSizeExceedsInput { declared, available } => write!(
                f,
                "declared byte-size {} exceeds supplied input ({} bytes available)",
                declared, available
            ),
            CodecError::ParamCountMismatch { declared_params, remaining_bytes } => write!(
                f,
                "parameter count {} * 4 does not match remaining body of {} bytes",
                declared_params, remaining_bytes
            ),
            CodecError::ChunkFormMismatch { input_is_chunk, plugin_expects_chunk } => write!(
                f,
                "chunk-form mismatch: input is chunk = {}, plugin expects chunk = {}",
                input_is_chunk, plugin_expects_chunk
            ),
            CodecError::ClassIdMismatch => write!(f, "class id in preset does not match plugin"),
            CodecError::NotImplemented(what) => write!(f, "not implemented: {}", what),
        }
    }
}
