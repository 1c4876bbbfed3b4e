//! Binding a playback session to a recording.

use crate::convert::ImageRef;
use crate::input::{DecodedFrame, MediaInput};
use crate::output::MediaOutput;
use crate::{Error, Result};
use ffmpeg_the_third::Packet;
use std::path::PathBuf;

/// Receives audio packets met while decoding.
pub trait AudioSink {
    fn save_audio_packet(&mut self, packet: &Packet) -> Result<()>;
}

impl AudioSink for MediaOutput {
    fn save_audio_packet(&mut self, packet: &Packet) -> Result<()> {
        MediaOutput::save_audio_packet(self, packet)
    }
}

/// What [`RecordingCoordinator::toggle`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingToggle {
    Started(PathBuf),
    Stopped(PathBuf),
}

/// Borrows one input and one output for the duration of a recording.
///
/// While recording, [`step`](Self::step) forwards the input's audio packets
/// to the output and [`write_frame`](Self::write_frame) stamps rendered
/// images with the timestamp of the frame they were rendered from.
pub struct RecordingCoordinator<'a> {
    input: &'a mut MediaInput,
    output: &'a mut MediaOutput,
}

impl<'a> RecordingCoordinator<'a> {
    pub fn new(input: &'a mut MediaInput, output: &'a mut MediaOutput) -> Self {
        Self { input, output }
    }

    /// Start a recording sized `render_width`x`render_height`, or finish the
    /// active one.
    pub fn toggle(&mut self, render_width: u32, render_height: u32) -> Result<RecordingToggle> {
        if self.input.is_recording() || self.output.is_recording() {
            self.input.set_recording(false);
            return self.output.end_write().map(RecordingToggle::Stopped);
        }

        let source = self.input.source().ok_or(Error::NotOpen)?;
        let path = self
            .output
            .begin_write(source.path, render_width, render_height, &source)?;
        self.input.set_recording(true);
        Ok(RecordingToggle::Started(path))
    }

    /// Step the input, forwarding audio to the output while recording.
    pub fn step(&mut self, force_frame: bool) -> Option<DecodedFrame<'_>> {
        self.input.step_with(force_frame, &mut *self.output)
    }

    /// Encode `image` with the timestamp of the input's current frame.
    pub fn write_frame(&mut self, image: &ImageRef<'_>) -> Result<()> {
        let pts = self
            .input
            .current_frame_pts()
            .ok_or(Error::MissingTimestamp)?;
        self.output.write_frame(pts, image)
    }

    pub fn is_recording(&self) -> bool {
        self.output.is_recording()
    }

    pub fn input(&mut self) -> &mut MediaInput {
        self.input
    }

    pub fn output(&mut self) -> &mut MediaOutput {
        self.output
    }
}
