//! Shared fixtures for reframer-av integration tests.
//!
//! Clips are synthesised into a [`TempDir`] with the same FFmpeg bindings the
//! crate uses: MPEG-4 Part 2 video (always built into libavcodec) and
//! optional 16-bit PCM audio, muxed into Matroska.

#![allow(dead_code)]

use ffmpeg_the_third as ffmpeg;
use ffmpeg::codec;
use ffmpeg::encoder;
use ffmpeg::format::sample::Type as SampleType;
use ffmpeg::format::{self, Pixel, Sample};
use ffmpeg::util::channel_layout::{ChannelLayout, ChannelLayoutMask};
use ffmpeg::util::frame::audio::Audio as AudioFrame;
use ffmpeg::util::frame::video::Video as VideoFrame;
use ffmpeg::util::rational::Rational;
use ffmpeg::Packet;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const SAMPLE_RATE: i32 = 8000;

/// Shape of a synthetic clip.
#[derive(Debug, Clone, Copy)]
pub struct ClipSpec {
    pub width: u32,
    pub height: u32,
    pub frames: usize,
    pub fps: i32,
    pub audio: bool,
}

impl ClipSpec {
    /// Audio samples per video frame.
    fn samples_per_frame(&self) -> usize {
        (SAMPLE_RATE / self.fps) as usize
    }
}

impl Default for ClipSpec {
    fn default() -> Self {
        Self {
            width: 160,
            height: 120,
            frames: 10,
            fps: 25,
            audio: true,
        }
    }
}

/// A synthetic clip and the directory that owns it.
pub struct Fixture {
    pub dir: TempDir,
    pub path: PathBuf,
    pub spec: ClipSpec,
}

impl Fixture {
    pub fn new(spec: ClipSpec) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("clip.mkv");
        write_clip(&path, &spec);
        Self { dir, path, spec }
    }
}

/// Whether recordings can be tested on this machine.
pub fn h264_available() -> bool {
    if reframer_av::h264_available() {
        return true;
    }
    eprintln!("Skipping: no H.264 encoder available in this FFmpeg build");
    false
}

fn write_clip(path: &Path, spec: &ClipSpec) {
    ffmpeg::init().expect("failed to initialise FFmpeg");

    let mut octx = format::output(path).expect("failed to create fixture container");
    let global_header = octx
        .format()
        .flags()
        .contains(format::Flags::GLOBAL_HEADER);

    // Video, stream 0.
    let video_tb = Rational::new(1, spec.fps);
    let mpeg4 = encoder::find(codec::Id::MPEG4).expect("MPEG-4 encoder not built in");
    let mut stream = octx.add_stream(mpeg4).expect("add video stream");
    stream.set_time_base(video_tb);

    let mut video = codec::context::Context::new_with_codec(mpeg4)
        .encoder()
        .video()
        .expect("video encoder context");
    video.set_width(spec.width);
    video.set_height(spec.height);
    video.set_format(Pixel::YUV420P);
    video.set_time_base(video_tb);
    video.set_frame_rate(Some(Rational::new(spec.fps, 1)));
    video.set_gop(5);
    video.set_max_b_frames(0);
    video.set_bit_rate(400_000);
    if global_header {
        video.set_flags(codec::Flags::GLOBAL_HEADER);
    }
    let mut video_encoder = video.open_as(mpeg4).expect("open MPEG-4 encoder");

    unsafe {
        let ret = ffmpeg::ffi::avcodec_parameters_from_context(
            (**(*octx.as_mut_ptr()).streams.add(0)).codecpar,
            video_encoder.as_ptr() as *mut ffmpeg::ffi::AVCodecContext,
        );
        assert!(ret >= 0, "copy video parameters: {}", ret);
    }

    // Audio, stream 1.
    let audio_tb = Rational::new(1, SAMPLE_RATE);
    let mut audio_encoder = if spec.audio {
        let pcm = encoder::find(codec::Id::PCM_S16LE).expect("PCM encoder not built in");
        let mut stream = octx.add_stream(pcm).expect("add audio stream");
        stream.set_time_base(audio_tb);

        let mut audio = codec::context::Context::new_with_codec(pcm)
            .encoder()
            .audio()
            .expect("audio encoder context");
        audio.set_rate(SAMPLE_RATE);
        audio.set_ch_layout(ChannelLayout::MONO);
        audio.set_format(Sample::I16(SampleType::Packed));
        audio.set_time_base(audio_tb);
        let audio_encoder = audio.open_as(pcm).expect("open PCM encoder");

        unsafe {
            let ret = ffmpeg::ffi::avcodec_parameters_from_context(
                (**(*octx.as_mut_ptr()).streams.add(1)).codecpar,
                audio_encoder.as_ptr() as *mut ffmpeg::ffi::AVCodecContext,
            );
            assert!(ret >= 0, "copy audio parameters: {}", ret);
        }
        Some(audio_encoder)
    } else {
        None
    };

    // Short clusters give byte seeks somewhere to land in tiny clips.
    let mut options = ffmpeg::Dictionary::new();
    options.set("cluster_time_limit", "200");
    octx.write_header_with(options)
        .expect("write fixture header");
    let video_stream_tb = octx.stream(0).expect("video stream").time_base();
    let audio_stream_tb = octx.stream(1).map(|s| s.time_base());

    let samples_per_frame = spec.samples_per_frame();
    let mut packet = Packet::empty();
    let mut frame = VideoFrame::new(Pixel::YUV420P, spec.width, spec.height);
    for index in 0..spec.frames {
        paint(&mut frame, index);
        frame.set_pts(Some(index as i64));
        video_encoder.send_frame(&frame).expect("encode video frame");
        while video_encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(0);
            packet.rescale_ts(video_tb, video_stream_tb);
            packet.write_interleaved(&mut octx).expect("write video packet");
        }

        if let (Some(encoder), Some(stream_tb)) = (audio_encoder.as_mut(), audio_stream_tb) {
            let mut samples = AudioFrame::new(
                Sample::I16(SampleType::Packed),
                samples_per_frame,
                ChannelLayoutMask::MONO,
            );
            samples.set_rate(SAMPLE_RATE as u32);
            samples.set_pts(Some((index * samples_per_frame) as i64));
            tone(samples.data_mut(0), index, samples_per_frame);

            encoder.send_frame(&samples).expect("encode audio frame");
            while encoder.receive_packet(&mut packet).is_ok() {
                packet.set_stream(1);
                packet.rescale_ts(audio_tb, stream_tb);
                packet.write_interleaved(&mut octx).expect("write audio packet");
            }
        }
    }

    video_encoder.send_eof().expect("flush video encoder");
    while video_encoder.receive_packet(&mut packet).is_ok() {
        packet.set_stream(0);
        packet.rescale_ts(video_tb, video_stream_tb);
        packet.write_interleaved(&mut octx).expect("write video packet");
    }
    if let (Some(encoder), Some(stream_tb)) = (audio_encoder.as_mut(), audio_stream_tb) {
        encoder.send_eof().expect("flush audio encoder");
        while encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(1);
            packet.rescale_ts(audio_tb, stream_tb);
            packet.write_interleaved(&mut octx).expect("write audio packet");
        }
    }

    octx.write_trailer().expect("write fixture trailer");
}

/// A moving gradient so consecutive frames differ.
fn paint(frame: &mut VideoFrame, index: usize) {
    let (width, height) = (frame.width() as usize, frame.height() as usize);

    let stride = frame.stride(0);
    let luma = frame.data_mut(0);
    for y in 0..height {
        for x in 0..width {
            luma[y * stride + x] = ((x + y + index * 8) % 220 + 16) as u8;
        }
    }

    for plane in 1..3 {
        let stride = frame.stride(plane);
        let chroma = frame.data_mut(plane);
        for y in 0..height / 2 {
            for x in 0..width / 2 {
                chroma[y * stride + x] = 128;
            }
        }
    }
}

fn tone(data: &mut [u8], index: usize, samples: usize) {
    for (i, sample) in data.chunks_exact_mut(2).take(samples).enumerate() {
        let value = (((i + index * 7) % 64) as i16 - 32) * 256;
        sample.copy_from_slice(&value.to_le_bytes());
    }
}

/// Concatenated payload of every packet in the first audio stream of `path`.
pub fn audio_payload(path: &Path) -> Vec<u8> {
    let mut ictx = format::input(path).expect("open for audio payload");
    let index = ictx
        .streams()
        .find(|s| s.parameters().medium() == ffmpeg::media::Type::Audio)
        .map(|s| s.index())
        .expect("no audio stream");

    let mut payload = Vec::new();
    loop {
        let mut packet = Packet::empty();
        match packet.read(&mut ictx) {
            Ok(()) => {
                if packet.stream() == index {
                    payload.extend_from_slice(packet.data().unwrap_or_default());
                }
            }
            Err(ffmpeg::Error::Eof) => break,
            Err(e) => panic!("read failed: {}", e),
        }
    }
    payload
}

/// Number of streams of each kind in `path`: (video, audio).
pub fn stream_counts(path: &Path) -> (usize, usize) {
    let ictx = format::input(path).expect("open for stream count");
    let count = |kind| {
        ictx.streams()
            .filter(|s| s.parameters().medium() == kind)
            .count()
    };
    (
        count(ffmpeg::media::Type::Video),
        count(ffmpeg::media::Type::Audio),
    )
}
