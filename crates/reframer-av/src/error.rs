//! Error types for reframer-av.

use std::path::PathBuf;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Reasons a playback session could not be opened.
///
/// Returned by [`MediaInput::begin`](crate::MediaInput::begin). By the time
/// one of these reaches the caller the session has already been reset.
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    /// The container could not be opened or its stream info parsed.
    #[error("could not open {}: {message}", path.display())]
    Container { path: PathBuf, message: String },

    /// The container holds no video stream.
    #[error("no video stream in {}", path.display())]
    NoVideoStream { path: PathBuf },

    /// No decoder is available for the video codec.
    #[error("no decoder available for {codec}")]
    NoDecoder { codec: String },

    /// The decoder exists but refused to open.
    #[error("could not open {codec} decoder: {message}")]
    Decoder { codec: String, message: String },

    /// The scratch conversion buffer could not be set up.
    #[error("could not prepare pixel conversion: {0}")]
    Conversion(String),
}

/// Errors that can occur while playing back or recording.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A playback session failed to open.
    #[error(transparent)]
    Open(#[from] OpenError),

    /// No playback session is open.
    #[error("no media is open")]
    NotOpen,

    /// No recording is active.
    #[error("no recording in progress")]
    NotRecording,

    /// The output container or its streams could not be set up.
    #[error("could not create output {}: {message}", path.display())]
    Output { path: PathBuf, message: String },

    /// A frame could not be converted between pixel layouts.
    #[error("pixel conversion failed: {0}")]
    Scale(String),

    /// The encoder rejected a frame.
    #[error("encode failed: {0}")]
    Encode(String),

    /// A packet or the trailer could not be written.
    #[error("write failed: {0}")]
    Write(String),

    /// A frame arrived without a usable timestamp.
    #[error("frame has no presentation timestamp")]
    MissingTimestamp,

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// FFmpeg library error.
    #[error("FFmpeg error: {0}")]
    FFmpeg(String),
}

impl Error {
    /// Create an output setup error.
    pub fn output(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Output {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an encode error.
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode(message.into())
    }

    /// Create a write error.
    pub fn write(message: impl Into<String>) -> Self {
        Self::Write(message.into())
    }

    /// Create a scale error.
    pub fn scale(message: impl Into<String>) -> Self {
        Self::Scale(message.into())
    }
}

impl From<ffmpeg_the_third::Error> for Error {
    fn from(err: ffmpeg_the_third::Error) -> Self {
        Error::FFmpeg(err.to_string())
    }
}
