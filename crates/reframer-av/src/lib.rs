//! # reframer-av
//!
//! Frame-stepping playback and re-encoding engine for rendered video.
//!
//! This crate provides:
//! - [`MediaInput`]: opens a file and surfaces one decoded RGB frame per
//!   step, with play/pause, byte-or-timestamp seeking and position reporting
//! - [`MediaOutput`]: encodes externally rendered frames to H.264 next to the
//!   source and copies the source audio through untouched
//! - [`RecordingCoordinator`]: ties the two together for a recording
//! - [`PixelConverter`]: cached pixel layout conversion between them
//!
//! Everything is driven synchronously by the caller's render loop; nothing
//! here spawns threads or timers.
//!
//! ## Features
//!
//! - `tracing` (default) - Enable tracing support
//!
//! ## Example
//!
//! ```no_run
//! use reframer_av::{MediaInput, MediaOutput, RecordingCoordinator};
//!
//! let mut input = MediaInput::new();
//! input.begin("/path/to/video.mp4", 1280, 720)?;
//!
//! let mut output = MediaOutput::new();
//! let mut recording = RecordingCoordinator::new(&mut input, &mut output);
//! recording.toggle(1280, 720)?;
//!
//! while let Some(frame) = recording.step(false) {
//!     let rendered = frame.image.to_owned_image();
//!     recording.write_frame(&rendered.as_image_ref())?;
//! }
//! recording.toggle(1280, 720)?;
//! # Ok::<(), reframer_av::Error>(())
//! ```

mod error;
pub mod convert;
pub mod input;
pub mod output;
pub mod paths;
pub mod recording;

use ffmpeg_the_third as ffmpeg;
use std::sync::Once;

// Re-exports
pub use convert::{Image, ImageRef, PixelConverter, PixelLayout};
pub use error::{Error, OpenError, Result};
pub use input::{
    DecodeStats, DecodedFrame, MediaInput, PlaybackState, SeekOutcome, SessionInfo, SourceRef,
};
pub use output::{EncoderSettings, MediaOutput, RecordingState};
pub use paths::reframed_path;
pub use recording::{AudioSink, RecordingCoordinator, RecordingToggle};

static FFMPEG_INIT: Once = Once::new();

/// Initialise the FFmpeg libraries once per process.
pub(crate) fn init_ffmpeg() {
    FFMPEG_INIT.call_once(|| {
        if let Err(e) = ffmpeg::init() {
            #[cfg(feature = "tracing")]
            tracing::error!("Failed to initialize FFmpeg: {}", e);
            let _ = e;
        }
        ffmpeg::util::log::set_level(ffmpeg::util::log::Level::Error);
    });
}

/// Whether an H.264 encoder is available for recordings.
pub fn h264_available() -> bool {
    init_ffmpeg();
    ffmpeg::encoder::find(ffmpeg::codec::Id::H264).is_some()
}
