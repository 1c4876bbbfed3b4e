//! Headless render loop.
//!
//! [`Player`] owns a [`MediaInput`]/[`MediaOutput`] pair and a renderer and
//! does what a display widget does on every repaint: step once, render the
//! frame, feed the rendered image to the recording, and report where the
//! timeline slider should sit.

use crate::config::Config;
use crate::render::{FrameRenderer, IdentityRenderer};
use reframer_av::{
    MediaInput, MediaOutput, PlaybackState, RecordingCoordinator, RecordingToggle, SeekOutcome,
};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Slider positions run from 0 to this value.
pub const TIMELINE_MAX: u32 = 10_000;

/// Map a playback fraction to a slider position.
pub fn timeline_position(percentage: f64) -> u32 {
    let position = (percentage.clamp(0.0, 1.0) * TIMELINE_MAX as f64) as u32;
    position.min(TIMELINE_MAX)
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tick {
    /// A new frame was decoded and rendered.
    pub frame: bool,
    /// Timestamp of the new frame, in the source video timebase.
    pub pts: Option<i64>,
    pub percentage: f64,
    /// Slider position in `0..=TIMELINE_MAX`.
    pub timeline: u32,
    pub recording: bool,
    /// Set when this tick ended a recording at end of stream.
    pub finished_recording: Option<PathBuf>,
}

pub struct Player<R: FrameRenderer = IdentityRenderer> {
    input: MediaInput,
    output: MediaOutput,
    renderer: R,
    config: Config,
    force_frame: bool,
    frames_rendered: u64,
}

impl Player<IdentityRenderer> {
    /// Open `path` with the pass-through renderer.
    pub fn open(path: impl AsRef<Path>, config: &Config) -> reframer_av::Result<Self> {
        Self::with_renderer(path, config, IdentityRenderer)
    }
}

impl<R: FrameRenderer> Player<R> {
    pub fn with_renderer(
        path: impl AsRef<Path>,
        config: &Config,
        renderer: R,
    ) -> reframer_av::Result<Self> {
        let path = path.as_ref();
        let (width, height) = config.recording.render_size().unwrap_or((0, 0));

        let mut input = MediaInput::new();
        input.begin(path, width, height)?;
        input.set_speed(config.playback.speed);

        tracing::info!("Playing {:?}", path);

        Ok(Self {
            input,
            output: MediaOutput::with_settings(config.recording.encoder_settings()),
            renderer,
            config: config.clone(),
            force_frame: false,
            frames_rendered: 0,
        })
    }

    /// Advance the render loop by one tick.
    pub fn tick(&mut self) -> Tick {
        let force_frame = std::mem::take(&mut self.force_frame);
        let (width, height) = self.render_size();
        let mut tick = Tick::default();

        let mut coordinator = RecordingCoordinator::new(&mut self.input, &mut self.output);
        let rendered = match coordinator.step(force_frame) {
            Some(frame) => {
                tick.frame = true;
                tick.pts = frame.pts;
                self.renderer.render(&frame)
            }
            None => None,
        };

        if let Some(image) = rendered {
            self.frames_rendered += 1;
            if coordinator.is_recording() {
                if let Err(e) = coordinator.write_frame(&image.as_image_ref()) {
                    tracing::warn!("Dropped frame from recording: {}", e);
                }
            }
        }

        if !tick.frame
            && coordinator.is_recording()
            && coordinator.input().state() == PlaybackState::EndOfStream
        {
            match coordinator.toggle(width, height) {
                Ok(RecordingToggle::Stopped(path)) => {
                    tracing::info!("Playback ended, recording saved to {:?}", path);
                    tick.finished_recording = Some(path);
                }
                Ok(RecordingToggle::Started(_)) => {}
                Err(e) => tracing::warn!("Recording did not finish cleanly: {}", e),
            }
        }

        tick.percentage = self.input.playback_percentage();
        tick.timeline = timeline_position(tick.percentage);
        tick.recording = self.output.is_recording();
        tick
    }

    /// Produce one frame on the next tick even while paused.
    pub fn request_frame(&mut self) {
        self.force_frame = true;
    }

    /// Switch between playing and paused. Returns the new state.
    pub fn toggle_pause(&mut self) -> PlaybackState {
        match self.input.state() {
            PlaybackState::Playing => self.input.pause(),
            _ => self.input.play(),
        }
        self.input.state()
    }

    pub fn seek(&mut self, fraction: f64) -> SeekOutcome {
        self.input.set_position(fraction)
    }

    /// Seek to a slider position in `0..=TIMELINE_MAX`.
    pub fn seek_timeline(&mut self, position: u32) -> SeekOutcome {
        self.seek(position as f64 / TIMELINE_MAX as f64)
    }

    pub fn set_speed(&mut self, speed: f64) {
        if speed.is_finite() && speed > 0.0 {
            self.input.set_speed(speed);
        } else {
            tracing::warn!("Ignoring invalid playback speed {}", speed);
        }
    }

    /// Start or stop recording at the render size.
    pub fn toggle_record(&mut self) -> reframer_av::Result<RecordingToggle> {
        let (width, height) = self.render_size();
        let toggle =
            RecordingCoordinator::new(&mut self.input, &mut self.output).toggle(width, height)?;

        match &toggle {
            RecordingToggle::Started(path) => tracing::info!("Recording to {:?}", path),
            RecordingToggle::Stopped(path) => tracing::info!("Recording saved to {:?}", path),
        }
        Ok(toggle)
    }

    /// Time between ticks at the current speed.
    pub fn tick_interval(&self) -> Duration {
        let fps = self
            .input
            .frame_rate()
            .filter(|fps| *fps > 0.0)
            .unwrap_or(self.config.playback.fallback_fps);
        Duration::from_secs_f64(1.0 / (fps * self.input.speed()))
    }

    /// Finish any recording and close the input.
    pub fn shutdown(&mut self) -> reframer_av::Result<Option<PathBuf>> {
        let saved = if self.output.is_recording() {
            match self.toggle_record()? {
                RecordingToggle::Stopped(path) => Some(path),
                RecordingToggle::Started(_) => None,
            }
        } else {
            None
        };
        self.input.reset();
        Ok(saved)
    }

    /// Size frames are rendered at: configured, else the source size.
    pub fn render_size(&self) -> (u32, u32) {
        self.input
            .render_size()
            .filter(|(w, h)| *w > 0 && *h > 0)
            .or_else(|| self.input.dimensions())
            .unwrap_or((0, 0))
    }

    pub fn state(&self) -> PlaybackState {
        self.input.state()
    }

    pub fn is_recording(&self) -> bool {
        self.output.is_recording()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn input(&self) -> &MediaInput {
        &self.input
    }

    pub fn output(&self) -> &MediaOutput {
        &self.output
    }
}
