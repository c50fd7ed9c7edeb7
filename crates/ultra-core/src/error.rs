use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;

/// Terminal failure reported by a [`crate::audio::SampleSink`].
///
/// Transient backpressure is not an error; sinks report it as `Ok(0)`.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("audio device unavailable: {0}")]
    Unavailable(String),

    #[error("audio format not supported by device: {0}")]
    UnsupportedFormat(String),

    #[error("audio device write failed: {0}")]
    Write(String),

    #[error("audio sink already closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("failed to open audio sink: {0}")]
    Open(#[from] SinkError),

    #[error("failed to spawn audio thread: {0}")]
    Spawn(#[source] io::Error),

    #[error("audio thread already running")]
    AlreadyActive,
}

#[derive(Error, Debug)]
pub enum RomError {
    #[error("zip file '{}' does not exist", .0.display())]
    ArchiveMissing(PathBuf),

    #[error("zip file '{}' is not a file", .0.display())]
    NotAFile(PathBuf),

    #[error("no compatible ROMs found in .zip archive")]
    NoRomInArchive,

    #[error("zip entry '{0}' has an unsafe path")]
    UnsafeEntry(String),

    #[error("zip error, ensure file is a valid .zip archive and is not corrupt: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to access preference file: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse preference file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize preferences: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Most recent user-visible failure, tagged with the operation that produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LastError {
    pub context: String,
    pub message: String,
}

/// Single last-error slot shared by every layer of a session.
///
/// Failures never cross the engine boundary as structured errors; the
/// bridge records them here and raises a transient notification instead.
#[derive(Debug, Default)]
pub struct ErrorSlot {
    last: Mutex<Option<LastError>>,
}

impl ErrorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, context: &str, message: impl Into<String>) {
        *self.slot() = Some(LastError {
            context: context.to_string(),
            message: message.into(),
        });
    }

    /// Re-tags the current error with `context`, or records `fallback` when
    /// nothing has been reported yet.
    pub fn retag(&self, context: &str, fallback: impl Into<String>) {
        let mut slot = self.slot();
        match slot.as_mut() {
            Some(last) => last.context = context.to_string(),
            None => {
                *slot = Some(LastError {
                    context: context.to_string(),
                    message: fallback.into(),
                })
            }
        }
    }

    pub fn last(&self) -> Option<LastError> {
        self.slot().clone()
    }

    pub fn has_error(&self) -> bool {
        self.slot().is_some()
    }

    pub fn clear(&self) {
        *self.slot() = None;
    }

    fn slot(&self) -> MutexGuard<'_, Option<LastError>> {
        self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retag_keeps_message_of_existing_error() {
        let slot = ErrorSlot::new();
        slot.set("UNZIP", "no compatible ROMs found");
        slot.retag("READ_HEADER", "unable to unzip");

        let last = slot.last().unwrap();
        assert_eq!(last.context, "READ_HEADER");
        assert_eq!(last.message, "no compatible ROMs found");
    }

    #[test]
    fn retag_without_error_records_fallback() {
        let slot = ErrorSlot::new();
        slot.retag("READ_HEADER", "unable to unzip");
        assert_eq!(slot.last().unwrap().message, "unable to unzip");
        slot.clear();
        assert!(!slot.has_error());
    }
}
