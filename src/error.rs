//! Application-wide error types.
//!
//! Library modules surface specific, typed errors via `thiserror`; the CLI
//! layer in [`crate::cli`] and [`crate::main`] wraps them in `anyhow` for
//! convenient top-level propagation. Per §7's error taxonomy, I/O/codec and
//! HTTP failures are meant to be recoverable (skip a file, 404 a request);
//! DB and migration failures are surfaced and the caller decides whether to
//! abort.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Unreadable file, unsupported container, or unsupported codec (§4.2).
    #[error("Codec error: {0}")]
    Codec(String),

    /// The resampler's destination channel count is outside {1,2,4,5,6}.
    #[error("Unsupported output channel layout: {0} channels")]
    UnsupportedChannelLayout(u16),

    /// The resampler's destination sample format is neither i16 nor f32.
    #[error("Unsupported sample format")]
    UnsupportedSampleFormat,

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Metadata error for {path}: {message}")]
    Metadata { path: PathBuf, message: String },

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Filter error: {0}")]
    Filter(String),

    /// Migration/backup driver failure (§4.9, §4.15): the pre-upgrade
    /// backup is retained even when this is returned.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A request that fails HTTP-level validation; the vote server turns
    /// this into a 404 rather than propagating it further (§7).
    #[error("Vote server request error: {0}")]
    VoteRequest(String),

    #[error("File not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn metadata(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Metadata {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound(path.into())
    }

    pub fn playback(message: impl Into<String>) -> Self {
        Self::Playback(message.into())
    }

    pub fn filter(message: impl Into<String>) -> Self {
        Self::Filter(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn context(self, ctx: impl Into<String>) -> Self {
        Self::WithContext {
            context: ctx.into(),
            source: Box::new(self),
        }
    }
}

pub trait ResultExt<T> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Io(e).context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, sqlx::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Database(e).context(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_path() {
        let err = Error::not_found("/path/to/file.mp3");
        assert!(err.to_string().contains("/path/to/file.mp3"));
    }

    #[test]
    fn context_wraps_and_displays_both_messages() {
        let err = Error::playback("buffer underrun").context("while playing track");
        let msg = err.to_string();
        assert!(msg.contains("while playing track"));
        assert!(msg.contains("buffer underrun"));
    }

    #[test]
    fn result_ext_adds_context_to_io_errors() {
        let result: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::other("disk full"));
        let with_ctx = result.with_context("writing backup");
        assert!(with_ctx.unwrap_err().to_string().contains("writing backup"));
    }
}
