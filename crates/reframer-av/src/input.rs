//! Frame-at-a-time playback of one source file.
//!
//! [`MediaInput`] is driven by an external render loop: every tick calls
//! [`MediaInput::step`], which surfaces at most one new frame. Frames the
//! decoder still holds from the last packet are drained before another
//! packet is read, so frames come out in decode order and no more than one
//! container packet is consumed per produced frame (audio and other
//! streams' packets aside).

use crate::convert::{frame_image, ImageRef, PixelConverter, PixelLayout};
use crate::recording::AudioSink;
use crate::{init_ffmpeg, OpenError, Result};
use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::util::frame::video::Video as VideoFrame;
use ffmpeg::{codec, format, media, Packet, Rational, Rescale};
use libc::c_int;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Transport state of a playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// Nothing is open.
    #[default]
    Closed,
    /// Each step decodes the next frame.
    Playing,
    /// Steps only decode when forced.
    Paused,
    /// The container ran out of packets and the decoder is drained.
    EndOfStream,
}

/// How a seek was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOutcome {
    /// Seeked to the requested byte offset.
    Exact,
    /// Byte seeking was unavailable; seeked by timestamp to the keyframe at
    /// or before the requested point.
    Approximate,
    /// Neither strategy worked; the position is unchanged.
    Failed,
}

impl SeekOutcome {
    pub fn succeeded(&self) -> bool {
        !matches!(self, SeekOutcome::Failed)
    }
}

/// A decoded frame converted to interleaved RGB.
///
/// Borrows the session's scratch buffer, which the next step overwrites.
#[derive(Debug, Clone, Copy)]
pub struct DecodedFrame<'a> {
    pub image: ImageRef<'a>,
    /// Presentation timestamp in the source video stream's timebase.
    pub pts: Option<i64>,
}

/// Counters describing the work done by a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecodeStats {
    /// Container packets read, of any stream.
    pub packets_read: u64,
    /// Video packets accepted by the decoder.
    pub video_packets: u64,
    /// Video packets the decoder rejected and that were skipped.
    pub rejected_packets: u64,
    /// Packets of audio or other streams.
    pub other_packets: u64,
    /// Audio packets handed to a recording.
    pub audio_forwarded: u64,
    /// Frames surfaced by `step`.
    pub frames: u64,
}

/// Summary of an open session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub path: PathBuf,
    pub container: String,
    pub video_codec: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: Option<f64>,
    pub duration_secs: Option<f64>,
    pub video_stream: usize,
    pub audio_stream: Option<usize>,
    pub audio_codec: Option<String>,
    pub total_bytes: i64,
}

/// Borrowed view of an open source, used to set up a matching recording.
#[derive(Clone, Copy)]
pub struct SourceRef<'a> {
    pub path: &'a Path,
    pub container: &'a format::context::Input,
    pub video_index: usize,
    pub audio_index: Option<usize>,
}

/// Demuxer, decoder and scratch buffers for one open file.
///
/// Dropping it releases every FFmpeg resource it holds.
struct Session {
    path: PathBuf,
    ictx: format::context::Input,
    decoder: ffmpeg::decoder::Video,
    video_index: usize,
    audio_index: Option<usize>,
    video_time_base: Rational,
    frame_rate: Option<Rational>,
    width: u32,
    height: u32,
    decoded: VideoFrame,
    rgb: VideoFrame,
    converter: PixelConverter,
    /// The decoder may still hold frames from the last packet sent.
    pending: bool,
    eof_sent: bool,
    has_frame: bool,
    current_pts: Option<i64>,
    playback_pos: i64,
    total_bytes: i64,
    stats: DecodeStats,
}

impl Session {
    fn open(path: &Path) -> std::result::Result<Self, OpenError> {
        init_ffmpeg();

        let ictx = format::input(path).map_err(|e| OpenError::Container {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let video_index = ictx
            .streams()
            .find(|s| s.parameters().medium() == media::Type::Video)
            .map(|s| s.index())
            .ok_or_else(|| OpenError::NoVideoStream {
                path: path.to_path_buf(),
            })?;

        let audio_index = ictx
            .streams()
            .find(|s| s.parameters().medium() == media::Type::Audio)
            .map(|s| s.index());

        let (video_time_base, frame_rate, mut context) = {
            let stream = ictx
                .stream(video_index)
                .ok_or_else(|| OpenError::NoVideoStream {
                    path: path.to_path_buf(),
                })?;

            let context = codec::context::Context::from_parameters(stream.parameters())
                .map_err(|e| OpenError::Decoder {
                    codec: "unknown".to_string(),
                    message: e.to_string(),
                })?;

            (stream.time_base(), stream_frame_rate(&stream), context)
        };

        let codec_id = context.id();
        if ffmpeg::decoder::find(codec_id).is_none() {
            return Err(OpenError::NoDecoder {
                codec: format!("{:?}", codec_id),
            });
        }

        // Let the decoder pick its thread count and split work by frame and slice.
        unsafe {
            let raw = context.as_mut_ptr();
            (*raw).thread_count = 0;
            (*raw).thread_type =
                (ffmpeg::ffi::FF_THREAD_FRAME | ffmpeg::ffi::FF_THREAD_SLICE) as c_int;
        }

        let decoder = context
            .decoder()
            .video()
            .map_err(|e| OpenError::Decoder {
                codec: format!("{:?}", codec_id),
                message: e.to_string(),
            })?;

        let (width, height) = (decoder.width(), decoder.height());
        if width == 0 || height == 0 {
            return Err(OpenError::Conversion(format!(
                "video stream reports {}x{}",
                width, height
            )));
        }

        let total_bytes = std::fs::metadata(path)
            .map(|m| m.len() as i64)
            .unwrap_or(-1);

        #[cfg(feature = "tracing")]
        tracing::info!(
            "Opened {:?}: {:?} {}x{}, video stream {}, audio stream {:?}",
            path,
            codec_id,
            width,
            height,
            video_index,
            audio_index
        );

        Ok(Self {
            path: path.to_path_buf(),
            ictx,
            decoder,
            video_index,
            audio_index,
            video_time_base,
            frame_rate,
            width,
            height,
            decoded: VideoFrame::empty(),
            rgb: VideoFrame::new(Pixel::RGB24, width, height),
            converter: PixelConverter::new(),
            pending: false,
            eof_sent: false,
            has_frame: false,
            current_pts: None,
            playback_pos: 0,
            total_bytes,
            stats: DecodeStats::default(),
        })
    }

    /// Produce the next frame into the RGB scratch buffer.
    ///
    /// `Ok(false)` means the source is exhausted.
    fn decode_next(&mut self, mut sink: Option<&mut dyn AudioSink>) -> Result<bool> {
        if self.pending {
            if self.receive()? {
                return Ok(true);
            }
            self.pending = false;
        }

        loop {
            let mut packet = Packet::empty();
            match packet.read(&mut self.ictx) {
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => return self.drain_at_eof(),
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Read failed in {:?}, treating as end of stream: {}", self.path, e);
                    let _ = e;
                    return self.drain_at_eof();
                }
            }

            self.stats.packets_read += 1;
            let position = packet.position() as i64;
            if position >= 0 {
                self.playback_pos = position;
            }

            let index = packet.stream();
            if index == self.video_index {
                match self.decoder.send_packet(&packet) {
                    Ok(()) => {
                        self.stats.video_packets += 1;
                        self.pending = true;
                        if self.receive()? {
                            return Ok(true);
                        }
                    }
                    Err(e) => {
                        self.stats.rejected_packets += 1;
                        #[cfg(feature = "tracing")]
                        tracing::debug!("Skipping undecodable packet at {}: {}", position, e);
                        let _ = e;
                    }
                }
            } else {
                self.stats.other_packets += 1;
                if Some(index) != self.audio_index {
                    continue;
                }
                if let Some(sink) = sink.as_deref_mut() {
                    match sink.save_audio_packet(&packet) {
                        Ok(()) => self.stats.audio_forwarded += 1,
                        Err(e) => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!("Could not forward audio packet: {}", e);
                            let _ = e;
                        }
                    }
                }
            }
        }
    }

    fn drain_at_eof(&mut self) -> Result<bool> {
        if !self.eof_sent {
            self.eof_sent = true;
            if let Err(e) = self.decoder.send_eof() {
                #[cfg(feature = "tracing")]
                tracing::debug!("Decoder refused end of stream: {}", e);
                let _ = e;
            }
            if self.receive()? {
                self.pending = true;
                return Ok(true);
            }
        }

        if self.total_bytes > 0 {
            self.playback_pos = self.total_bytes;
        }
        Ok(false)
    }

    /// Pull one frame from the decoder and convert it. `Ok(false)` when the
    /// decoder has nothing ready.
    fn receive(&mut self) -> Result<bool> {
        if self.decoder.receive_frame(&mut self.decoded).is_err() {
            return Ok(false);
        }

        self.current_pts = self.decoded.pts().or_else(|| self.decoded.timestamp());
        self.converter.convert(&self.decoded, &mut self.rgb)?;
        self.has_frame = true;
        self.stats.frames += 1;

        #[cfg(feature = "tracing")]
        tracing::trace!("Decoded frame pts={:?}", self.current_pts);

        Ok(true)
    }

    fn seek(&mut self, fraction: f64) -> SeekOutcome {
        let outcome = if self.seek_bytes(fraction) {
            SeekOutcome::Exact
        } else if self.seek_timestamp(fraction) {
            SeekOutcome::Approximate
        } else {
            #[cfg(feature = "tracing")]
            tracing::warn!("Could not seek {:?} to {:.3}", self.path, fraction);
            return SeekOutcome::Failed;
        };

        self.decoder.flush();
        self.pending = false;
        self.eof_sent = false;
        self.current_pts = None;
        if self.total_bytes > 0 {
            self.playback_pos = (self.total_bytes as f64 * fraction) as i64;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Seeked {:?} to {:.3} ({:?})", self.path, fraction, outcome);

        outcome
    }

    fn seek_bytes(&mut self, fraction: f64) -> bool {
        unsafe {
            let ctx = self.ictx.as_mut_ptr();
            let pb = (*ctx).pb;
            if pb.is_null() || (*pb).seekable & ffmpeg::ffi::AVIO_SEEKABLE_NORMAL as c_int == 0 {
                return false;
            }

            let size = ffmpeg::ffi::avio_size(pb);
            if size <= 0 {
                return false;
            }

            let target = (fraction * size as f64) as i64;
            ffmpeg::ffi::av_seek_frame(ctx, -1, target, ffmpeg::ffi::AVSEEK_FLAG_BYTE as c_int) >= 0
        }
    }

    /// Seek to the keyframe at or before `fraction` of the duration.
    fn seek_timestamp(&mut self, fraction: f64) -> bool {
        let av_time_base = Rational::new(1, ffmpeg::ffi::AV_TIME_BASE as i32);
        let (duration, start) = match self.ictx.stream(self.video_index) {
            Some(stream) => (stream.duration(), stream.start_time()),
            None => return false,
        };

        let duration = if duration > 0 {
            duration.rescale(self.video_time_base, av_time_base)
        } else if self.ictx.duration() > 0 {
            self.ictx.duration()
        } else {
            return false;
        };

        let mut target = (fraction * duration as f64) as i64;
        if start > 0 {
            target += start.rescale(self.video_time_base, av_time_base);
        }

        match self.ictx.seek(target, ..=target) {
            Ok(()) => true,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Timestamp seek to {} failed: {}", target, e);
                let _ = e;
                false
            }
        }
    }

    fn frame(&self) -> Option<DecodedFrame<'_>> {
        if !self.has_frame {
            return None;
        }
        Some(DecodedFrame {
            image: frame_image(&self.rgb, PixelLayout::Rgb24),
            pts: self.current_pts,
        })
    }

    fn info(&self) -> SessionInfo {
        let audio_codec = self.audio_index.and_then(|index| {
            self.ictx
                .stream(index)
                .map(|s| format!("{:?}", s.parameters().id()))
        });

        SessionInfo {
            path: self.path.clone(),
            container: self
                .ictx
                .format()
                .name()
                .split(',')
                .next()
                .unwrap_or("unknown")
                .to_string(),
            video_codec: format!("{:?}", self.decoder.id()),
            width: self.width,
            height: self.height,
            frame_rate: self.frame_rate.map(f64::from),
            duration_secs: duration_of(&self.ictx).map(|d| d.as_secs_f64()),
            video_stream: self.video_index,
            audio_stream: self.audio_index,
            audio_codec,
            total_bytes: self.total_bytes,
        }
    }
}

/// Real base frame rate, else the average frame rate.
pub(crate) fn stream_frame_rate(stream: &format::stream::Stream<'_>) -> Option<Rational> {
    [stream.rate(), stream.avg_frame_rate()]
        .into_iter()
        .find(|r| r.numerator() > 0 && r.denominator() > 0)
}

fn duration_of(ictx: &format::context::Input) -> Option<Duration> {
    if ictx.duration() > 0 {
        Some(Duration::from_micros(ictx.duration() as u64))
    } else {
        None
    }
}

/// Playback of one source file, one frame per step.
pub struct MediaInput {
    session: Option<Session>,
    state: PlaybackState,
    speed: f64,
    recording: bool,
    render_size: Option<(u32, u32)>,
}

impl Default for MediaInput {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaInput {
    pub fn new() -> Self {
        Self {
            session: None,
            state: PlaybackState::Closed,
            speed: 1.0,
            recording: false,
            render_size: None,
        }
    }

    /// Open `path` and start playing.
    ///
    /// Any open session is released first. `render_width`/`render_height`
    /// are remembered as the size the caller renders at. On failure the
    /// input is left closed.
    pub fn begin(
        &mut self,
        path: impl AsRef<Path>,
        render_width: u32,
        render_height: u32,
    ) -> std::result::Result<(), OpenError> {
        self.reset();

        let session = Session::open(path.as_ref())?;
        self.session = Some(session);
        self.render_size = Some((render_width, render_height));
        self.play();
        Ok(())
    }

    /// Release the session. Safe to call at any time, any number of times.
    pub fn reset(&mut self) {
        if let Some(session) = self.session.take() {
            #[cfg(feature = "tracing")]
            tracing::info!("Closing {:?}", session.path);
            drop(session);
        }

        self.state = PlaybackState::Closed;
        self.recording = false;
        self.render_size = None;
    }

    /// Advance by one frame.
    ///
    /// Returns `None` when nothing is open, when paused and `force_frame`
    /// is false, and once the source is exhausted.
    pub fn step(&mut self, force_frame: bool) -> Option<DecodedFrame<'_>> {
        if self.advance(force_frame, None) {
            self.current_frame()
        } else {
            None
        }
    }

    /// Like [`step`](Self::step), forwarding audio packets met along the way
    /// to `sink` while a recording is active.
    pub fn step_with(
        &mut self,
        force_frame: bool,
        sink: &mut dyn AudioSink,
    ) -> Option<DecodedFrame<'_>> {
        if self.advance(force_frame, Some(sink)) {
            self.current_frame()
        } else {
            None
        }
    }

    fn advance(&mut self, force_frame: bool, sink: Option<&mut dyn AudioSink>) -> bool {
        let sink = if self.recording { sink } else { None };

        let Some(session) = self.session.as_mut() else {
            return false;
        };

        match self.state {
            PlaybackState::Closed => return false,
            PlaybackState::Paused | PlaybackState::EndOfStream if !force_frame => return false,
            _ => {}
        }

        match session.decode_next(sink) {
            Ok(true) => true,
            Ok(false) => {
                #[cfg(feature = "tracing")]
                tracing::info!("End of video: {:?}", session.path);
                self.state = PlaybackState::EndOfStream;
                false
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Could not produce frame: {}", e);
                let _ = e;
                false
            }
        }
    }

    /// The most recently produced frame.
    pub fn current_frame(&self) -> Option<DecodedFrame<'_>> {
        self.session.as_ref().and_then(Session::frame)
    }

    /// Presentation timestamp of the most recently produced frame.
    pub fn current_frame_pts(&self) -> Option<i64> {
        self.session.as_ref().and_then(|s| s.current_pts)
    }

    pub fn play(&mut self) {
        if self.session.is_some() {
            self.state = PlaybackState::Playing;
        }
    }

    pub fn pause(&mut self) {
        if self.session.is_some() {
            self.state = PlaybackState::Paused;
        }
    }

    /// Seek to `fraction` of the file, clamped to `[0, 1]`.
    ///
    /// Tries a byte seek first and falls back to a timestamp seek. On
    /// success playback resumes from the new position.
    pub fn set_position(&mut self, fraction: f64) -> SeekOutcome {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };

        let Some(session) = self.session.as_mut() else {
            return SeekOutcome::Failed;
        };

        let outcome = session.seek(fraction);
        if outcome.succeeded() {
            self.state = PlaybackState::Playing;
        }
        outcome
    }

    /// Store a playback rate hint for whoever paces the render loop.
    pub fn set_speed(&mut self, speed: f64) {
        self.speed = speed;
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Byte position over file size, `0.0` when either is unknown.
    pub fn playback_percentage(&self) -> f64 {
        match &self.session {
            Some(s) if s.playback_pos >= 0 && s.total_bytes > 0 => {
                (s.playback_pos as f64 / s.total_bytes as f64).clamp(0.0, 1.0)
            }
            _ => 0.0,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub(crate) fn set_recording(&mut self, recording: bool) {
        self.recording = recording && self.session.is_some();
    }

    /// Coded size of the video stream.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.session.as_ref().map(|s| (s.width, s.height))
    }

    /// Render size given to [`begin`](Self::begin).
    pub fn render_size(&self) -> Option<(u32, u32)> {
        self.render_size
    }

    /// Declared frame rate of the video stream.
    pub fn frame_rate(&self) -> Option<f64> {
        self.session
            .as_ref()
            .and_then(|s| s.frame_rate)
            .map(f64::from)
    }

    /// Timebase of the video stream's timestamps.
    pub fn time_base(&self) -> Option<Rational> {
        self.session.as_ref().map(|s| s.video_time_base)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.session.as_ref().and_then(|s| duration_of(&s.ictx))
    }

    pub fn path(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.path.as_path())
    }

    pub fn stats(&self) -> DecodeStats {
        self.session.as_ref().map(|s| s.stats).unwrap_or_default()
    }

    pub fn info(&self) -> Option<SessionInfo> {
        self.session.as_ref().map(Session::info)
    }

    /// The open container and its stream indices.
    pub fn source(&self) -> Option<SourceRef<'_>> {
        self.session.as_ref().map(|s| SourceRef {
            path: &s.path,
            container: &s.ictx,
            video_index: s.video_index,
            audio_index: s.audio_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_input_is_closed() {
        let input = MediaInput::new();
        assert_eq!(input.state(), PlaybackState::Closed);
        assert!(!input.is_open());
        assert_eq!(input.playback_percentage(), 0.0);
        assert!(input.dimensions().is_none());
        assert!(input.current_frame_pts().is_none());
    }

    #[test]
    fn test_reset_is_idempotent() {
        let mut input = MediaInput::new();
        input.reset();
        input.reset();
        assert_eq!(input.state(), PlaybackState::Closed);
    }

    #[test]
    fn test_closed_input_ignores_transport() {
        let mut input = MediaInput::new();
        input.play();
        assert_eq!(input.state(), PlaybackState::Closed);
        input.pause();
        assert_eq!(input.state(), PlaybackState::Closed);
        assert!(input.step(true).is_none());
        assert_eq!(input.set_position(0.5), SeekOutcome::Failed);
        input.set_recording(true);
        assert!(!input.is_recording());
    }

    #[test]
    fn test_speed_is_stored() {
        let mut input = MediaInput::new();
        assert_eq!(input.speed(), 1.0);
        input.set_speed(0.25);
        assert_eq!(input.speed(), 0.25);
    }

    #[test]
    fn test_begin_missing_file_leaves_input_closed() {
        let mut input = MediaInput::new();
        let err = input
            .begin("/nonexistent/reframer/clip.mp4", 640, 360)
            .unwrap_err();
        assert!(matches!(err, OpenError::Container { .. }));
        assert!(!input.is_open());
        assert_eq!(input.state(), PlaybackState::Closed);
        assert!(input.render_size().is_none());
    }

    #[test]
    fn test_seek_outcome_success() {
        assert!(SeekOutcome::Exact.succeeded());
        assert!(SeekOutcome::Approximate.succeeded());
        assert!(!SeekOutcome::Failed.succeeded());
    }
}
