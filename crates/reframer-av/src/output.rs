//! Re-encoding rendered frames into a new container.
//!
//! A recording always lands next to its source as `<name>_reframed.<ext>`
//! (see [`reframed_path`]). Video is encoded to H.264 in planar 4:2:0 at even
//! dimensions; the source's first audio stream, if any, is copied packet for
//! packet without re-encoding.

use crate::convert::{fill_frame, ImageRef, PixelConverter};
use crate::input::{stream_frame_rate, SourceRef};
use crate::paths::{reframed_path, Container};
use crate::{init_ffmpeg, Error, Result};
use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::util::frame::video::Video as VideoFrame;
use ffmpeg::{codec, format, Dictionary, Packet, Rational, Rescale};
use std::path::{Path, PathBuf};

/// Frame rate assumed when the source stream declares none.
const FALLBACK_FRAME_RATE: Rational = Rational(24, 1);

/// Lifecycle of a [`MediaOutput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordingState {
    /// No recording has been started since creation or the last reset.
    #[default]
    Idle,
    /// Frames and audio packets are being accepted.
    Writing,
    /// The encoder is being flushed and the trailer written.
    Draining,
    /// The last recording was finished.
    Closed,
}

/// Encoder options applied to every recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    /// x264 preset.
    pub preset: String,
    /// H.264 profile.
    pub profile: String,
    /// Container `title` tag.
    pub title: String,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            preset: "slow".to_string(),
            profile: "high".to_string(),
            title: "Reframer".to_string(),
        }
    }
}

/// Round down to the nearest even value.
pub fn even_dimension(value: u32) -> u32 {
    value & !1
}

#[derive(Debug, Clone, Copy)]
struct AudioRoute {
    output_index: usize,
    source_time_base: Rational,
    output_time_base: Rational,
}

/// Muxer, encoder and scratch frames for one recording.
struct Recording {
    path: PathBuf,
    octx: format::context::Output,
    encoder: ffmpeg::encoder::Video,
    video_index: usize,
    video_time_base: Rational,
    source_time_base: Rational,
    encoder_time_base: Rational,
    audio: Option<AudioRoute>,
    width: u32,
    height: u32,
    staging: Option<VideoFrame>,
    yuv: VideoFrame,
    converter: PixelConverter,
    last_pts: Option<i64>,
}

impl Recording {
    fn open(
        path: PathBuf,
        width: u32,
        height: u32,
        source: &SourceRef<'_>,
        settings: &EncoderSettings,
    ) -> Result<Self> {
        init_ffmpeg();

        let octx = format::output(&path).map_err(|e| Error::output(&path, e.to_string()))?;

        // The muxer has created the file by now; don't leave a stub behind.
        Self::with_output(path.clone(), octx, width, height, source, settings).map_err(|e| {
            if let Err(remove) = std::fs::remove_file(&path) {
                #[cfg(feature = "tracing")]
                tracing::debug!("Could not remove partial recording {:?}: {}", path, remove);
                let _ = remove;
            }
            e
        })
    }

    fn with_output(
        path: PathBuf,
        mut octx: format::context::Output,
        width: u32,
        height: u32,
        source: &SourceRef<'_>,
        settings: &EncoderSettings,
    ) -> Result<Self> {
        let h264 = ffmpeg::encoder::find(codec::Id::H264)
            .ok_or_else(|| Error::output(&path, "no H.264 encoder available"))?;

        let (source_time_base, frame_rate) = {
            let stream = source
                .container
                .stream(source.video_index)
                .ok_or_else(|| Error::output(&path, "source video stream not found"))?;
            (
                stream.time_base(),
                stream_frame_rate(&stream).unwrap_or(FALLBACK_FRAME_RATE),
            )
        };

        let video_index = {
            let mut stream = octx
                .add_stream(h264)
                .map_err(|e| Error::output(&path, format!("could not add video stream: {}", e)))?;
            stream.set_time_base(source_time_base);
            stream.set_rate(frame_rate);
            stream.set_avg_frame_rate(frame_rate);
            stream.index()
        };

        let global_header = octx
            .format()
            .flags()
            .contains(format::Flags::GLOBAL_HEADER);

        let mut video = codec::context::Context::new_with_codec(h264)
            .encoder()
            .video()
            .map_err(|e| Error::output(&path, format!("could not create encoder: {}", e)))?;
        video.set_width(width);
        video.set_height(height);
        video.set_format(Pixel::YUV420P);
        video.set_time_base(source_time_base);
        video.set_frame_rate(Some(frame_rate));
        if global_header {
            video.set_flags(codec::Flags::GLOBAL_HEADER);
        }

        let mut options = Dictionary::new();
        options.set("preset", &settings.preset);
        options.set("profile", &settings.profile);

        let encoder = video
            .open_as_with(h264, options)
            .map_err(|e| Error::output(&path, format!("could not open H.264 encoder: {}", e)))?;

        // The muxer needs resolution, format and extradata from the opened encoder.
        unsafe {
            let ret = ffmpeg::ffi::avcodec_parameters_from_context(
                (**(*octx.as_mut_ptr()).streams.add(video_index)).codecpar,
                encoder.as_ptr() as *mut ffmpeg::ffi::AVCodecContext,
            );
            if ret < 0 {
                return Err(Error::output(
                    &path,
                    format!("could not copy encoder parameters ({})", ret),
                ));
            }
        }

        let audio = match source.audio_index {
            Some(index) => {
                let input_stream = source
                    .container
                    .stream(index)
                    .ok_or_else(|| Error::output(&path, "source audio stream not found"))?;

                let mut output_stream = octx
                    .add_stream(ffmpeg::encoder::find(codec::Id::None))
                    .map_err(|e| {
                        Error::output(&path, format!("could not add audio stream: {}", e))
                    })?;
                output_stream.set_parameters(input_stream.parameters());

                // The source container's codec tag may be invalid in the output container.
                unsafe {
                    (*(*output_stream.as_mut_ptr()).codecpar).codec_tag = 0;
                }
                output_stream.set_time_base(input_stream.time_base());

                Some(AudioRoute {
                    output_index: output_stream.index(),
                    source_time_base: input_stream.time_base(),
                    output_time_base: input_stream.time_base(),
                })
            }
            None => None,
        };

        let mut metadata = Dictionary::new();
        metadata.set("title", &settings.title);
        octx.set_metadata(metadata);

        let faststart = Container::from_path(&path).is_some_and(|c| c.supports_faststart());
        if faststart {
            let mut options = Dictionary::new();
            options.set("movflags", "+faststart");
            octx.write_header_with(options)
                .map_err(|e| Error::output(&path, format!("could not write header: {}", e)))?;
        } else {
            octx.write_header()
                .map_err(|e| Error::output(&path, format!("could not write header: {}", e)))?;
        }

        // Muxers may pick their own stream timebases while writing the header.
        let video_time_base = octx
            .stream(video_index)
            .map(|s| s.time_base())
            .unwrap_or(source_time_base);
        let audio = audio.map(|route| AudioRoute {
            output_time_base: octx
                .stream(route.output_index)
                .map(|s| s.time_base())
                .unwrap_or(route.output_time_base),
            ..route
        });

        #[cfg(feature = "tracing")]
        tracing::info!(
            "Recording to {:?}: {}x{} H.264 ({}/{}), audio passthrough: {}",
            path,
            width,
            height,
            settings.preset,
            settings.profile,
            audio.is_some()
        );

        Ok(Self {
            path,
            octx,
            encoder,
            video_index,
            video_time_base,
            source_time_base,
            encoder_time_base: source_time_base,
            audio,
            width,
            height,
            staging: None,
            yuv: VideoFrame::new(Pixel::YUV420P, width, height),
            converter: PixelConverter::new(),
            last_pts: None,
        })
    }

    fn write_frame(&mut self, source_pts: i64, image: &ImageRef<'_>) -> Result<()> {
        image.validate()?;
        let pts = source_pts.rescale(self.source_time_base, self.encoder_time_base);
        if let Some(last) = self.last_pts {
            if pts <= last {
                return Err(Error::InvalidInput(format!(
                    "frame timestamp {} does not follow {}",
                    pts, last
                )));
            }
        }

        let layout_changed = self.staging.as_ref().is_some_and(|frame| {
            frame.format() != image.layout.pixel()
                || frame.width() != image.width
                || frame.height() != image.height
        });
        if layout_changed {
            self.staging = None;
        }
        let staging = self
            .staging
            .get_or_insert_with(|| VideoFrame::new(image.layout.pixel(), image.width, image.height));
        fill_frame(image, staging)?;

        // The encoder may still reference the previous frame's buffers.
        unsafe {
            if ffmpeg::ffi::av_frame_make_writable(self.yuv.as_mut_ptr()) < 0 {
                return Err(Error::encode("could not make encode frame writable"));
            }
        }
        self.converter.convert(staging, &mut self.yuv)?;
        self.yuv.set_pts(Some(pts));

        self.encoder
            .send_frame(&self.yuv)
            .map_err(|e| Error::encode(e.to_string()))?;
        self.last_pts = Some(pts);

        #[cfg(feature = "tracing")]
        tracing::trace!("Encoded frame pts={}", pts);

        self.drain()
    }

    fn write_audio(&mut self, packet: &Packet) -> Result<()> {
        let route = self
            .audio
            .ok_or_else(|| Error::InvalidInput("recording has no audio stream".to_string()))?;

        let mut packet = packet.clone();
        packet.set_stream(route.output_index);
        packet.rescale_ts(route.source_time_base, route.output_time_base);
        packet.set_position(-1);
        packet
            .write_interleaved(&mut self.octx)
            .map_err(|e| Error::write(format!("audio packet: {}", e)))
    }

    /// Write every packet the encoder has ready.
    fn drain(&mut self) -> Result<()> {
        let mut packet = Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(self.video_index);
            packet.rescale_ts(self.encoder_time_base, self.video_time_base);
            packet
                .write_interleaved(&mut self.octx)
                .map_err(|e| Error::write(format!("video packet: {}", e)))?;
        }
        Ok(())
    }

    /// Flush the encoder and write the trailer. The trailer is attempted
    /// even when flushing fails.
    fn finish(&mut self) -> Result<()> {
        let flushed = self
            .encoder
            .send_eof()
            .map_err(|e| Error::encode(e.to_string()))
            .and_then(|()| self.drain());

        if let Err(e) = &flushed {
            #[cfg(feature = "tracing")]
            tracing::warn!("Could not flush encoder for {:?}: {}", self.path, e);
            let _ = e;
        }

        self.octx
            .write_trailer()
            .map_err(|e| Error::write(format!("trailer: {}", e)))?;
        flushed
    }
}

/// Encoder/muxer session fed one rendered frame at a time.
pub struct MediaOutput {
    settings: EncoderSettings,
    recording: Option<Recording>,
    state: RecordingState,
    frames_written: u64,
    audio_packets_written: u64,
}

impl Default for MediaOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaOutput {
    pub fn new() -> Self {
        Self::with_settings(EncoderSettings::default())
    }

    pub fn with_settings(settings: EncoderSettings) -> Self {
        Self {
            settings,
            recording: None,
            state: RecordingState::Idle,
            frames_written: 0,
            audio_packets_written: 0,
        }
    }

    pub fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    /// Start recording next to `input_path`.
    ///
    /// `width`/`height` are rounded down to even values. The encoder takes
    /// its timebase and frame rate from the source video stream, and an
    /// audio stream is created only when the source has one. Returns the
    /// output path. Any recording already in progress is finished first.
    pub fn begin_write(
        &mut self,
        input_path: impl AsRef<Path>,
        width: u32,
        height: u32,
        source: &SourceRef<'_>,
    ) -> Result<PathBuf> {
        if self.recording.is_some() {
            if let Err(e) = self.end_write() {
                #[cfg(feature = "tracing")]
                tracing::warn!("Previous recording ended with an error: {}", e);
                let _ = e;
            }
        }

        let (width, height) = (even_dimension(width), even_dimension(height));
        if width == 0 || height == 0 {
            return Err(Error::InvalidInput(format!(
                "recording size {}x{} is too small",
                width, height
            )));
        }

        let path = reframed_path(input_path.as_ref());
        let recording = Recording::open(path.clone(), width, height, source, &self.settings)?;

        self.recording = Some(recording);
        self.state = RecordingState::Writing;
        self.frames_written = 0;
        self.audio_packets_written = 0;
        Ok(path)
    }

    /// Encode one rendered frame.
    ///
    /// `source_pts` is the timestamp of the decoded frame the image was
    /// rendered from, in the source video stream's timebase. Timestamps must
    /// strictly increase. Failures leave the recording open.
    pub fn write_frame(&mut self, source_pts: i64, image: &ImageRef<'_>) -> Result<()> {
        let recording = self.recording.as_mut().ok_or(Error::NotRecording)?;

        match recording.write_frame(source_pts, image) {
            Ok(()) => {
                self.frames_written += 1;
                Ok(())
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Could not write frame to {:?}: {}", recording.path, e);
                Err(e)
            }
        }
    }

    /// Copy a source audio packet into the recording unchanged.
    pub fn save_audio_packet(&mut self, packet: &Packet) -> Result<()> {
        let recording = self.recording.as_mut().ok_or(Error::NotRecording)?;

        match recording.write_audio(packet) {
            Ok(()) => {
                self.audio_packets_written += 1;
                Ok(())
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Could not write audio to {:?}: {}", recording.path, e);
                Err(e)
            }
        }
    }

    /// Flush, write the trailer and release the recording.
    ///
    /// Resources are released even when flushing or the trailer fails.
    pub fn end_write(&mut self) -> Result<PathBuf> {
        let mut recording = self.recording.take().ok_or(Error::NotRecording)?;

        self.state = RecordingState::Draining;
        let result = recording.finish();
        self.state = RecordingState::Closed;

        let path = recording.path.clone();
        drop(recording);

        #[cfg(feature = "tracing")]
        match &result {
            Ok(()) => tracing::info!(
                "Finished {:?}: {} frames, {} audio packets",
                path,
                self.frames_written,
                self.audio_packets_written
            ),
            Err(e) => tracing::warn!("Finished {:?} with error: {}", path, e),
        }

        result.map(|()| path)
    }

    /// Drop any recording without writing a trailer.
    pub fn reset(&mut self) {
        if let Some(recording) = self.recording.take() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Discarding recording {:?}", recording.path);
            drop(recording);
        }
        self.state = RecordingState::Idle;
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.recording.as_ref().map(|r| r.path.as_path())
    }

    /// Encoded frame size.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.recording.as_ref().map(|r| (r.width, r.height))
    }

    pub fn has_audio(&self) -> bool {
        self.recording.as_ref().is_some_and(|r| r.audio.is_some())
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    /// Frames accepted by the encoder in the current or last recording.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Audio packets copied in the current or last recording.
    pub fn audio_packets_written(&self) -> u64 {
        self.audio_packets_written
    }
}

impl Drop for MediaOutput {
    fn drop(&mut self) {
        if self.recording.is_some() {
            if let Err(e) = self.end_write() {
                #[cfg(feature = "tracing")]
                tracing::warn!("Recording did not finish cleanly: {}", e);
                let _ = e;
            }
        }
    }
}
