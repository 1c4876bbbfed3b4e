//! Playback integration tests
//!
//! Steps, pauses and seeks through synthetic clips.

mod common;

use common::{ClipSpec, Fixture};
use reframer_av::{MediaInput, PixelLayout, PlaybackState, SeekOutcome};

fn open(fixture: &Fixture) -> MediaInput {
    let mut input = MediaInput::new();
    input
        .begin(&fixture.path, 640, 360)
        .expect("fixture should open");
    input
}

#[test]
fn test_begin_reports_coded_dimensions() {
    let fixture = Fixture::new(ClipSpec::default());
    let mut input = open(&fixture);

    assert_eq!(input.state(), PlaybackState::Playing);
    assert_eq!(input.dimensions(), Some((160, 120)));
    assert_eq!(input.render_size(), Some((640, 360)));
    assert!(input.source().is_some_and(|s| s.audio_index.is_some()));

    let frame = input.step(false).expect("first step should yield a frame");
    assert_eq!(frame.image.layout, PixelLayout::Rgb24);
    assert_eq!((frame.image.width, frame.image.height), (160, 120));
    assert!(frame.image.stride >= 160 * 3);
}

#[test]
fn test_plays_every_frame_in_order() {
    let fixture = Fixture::new(ClipSpec {
        frames: 12,
        ..ClipSpec::default()
    });
    let mut input = open(&fixture);

    let mut timestamps = Vec::new();
    let mut last_percentage = 0.0;
    loop {
        let pts = match input.step(false) {
            Some(frame) => frame.pts,
            None => break,
        };
        timestamps.push(pts.expect("decoded frame should carry a timestamp"));

        let percentage = input.playback_percentage();
        assert!(
            percentage >= last_percentage,
            "position went backwards: {} -> {}",
            last_percentage,
            percentage
        );
        assert!((0.0..=1.0).contains(&percentage));
        last_percentage = percentage;

        assert!(timestamps.len() <= 12, "more frames than were encoded");
    }

    assert_eq!(timestamps.len(), 12);
    assert!(
        timestamps.windows(2).all(|w| w[0] < w[1]),
        "frames out of order: {:?}",
        timestamps
    );
    assert_eq!(input.state(), PlaybackState::EndOfStream);
    assert!(input.step(false).is_none());
    assert!(input.step(true).is_none());
    assert_eq!(input.playback_percentage(), 1.0);
}

#[test]
fn test_one_frame_per_accepted_packet() {
    let fixture = Fixture::new(ClipSpec::default());
    let mut input = open(&fixture);

    let mut first_frame_seen = false;
    loop {
        let before = input.stats().video_packets;
        if input.step(false).is_none() {
            break;
        }
        let consumed = input.stats().video_packets - before;
        // Threaded decoders may buffer several packets before the first frame.
        if first_frame_seen {
            assert!(consumed <= 1, "step consumed {} video packets", consumed);
        }
        first_frame_seen = true;
    }

    let stats = input.stats();
    assert_eq!(stats.frames, 10);
    assert_eq!(stats.video_packets, 10);
    assert_eq!(stats.rejected_packets, 0);
    assert_eq!(
        stats.packets_read,
        stats.video_packets + stats.rejected_packets + stats.other_packets
    );
    assert!(stats.other_packets > 0);
    // Audio is only forwarded while recording.
    assert_eq!(stats.audio_forwarded, 0);
}

#[test]
fn test_pause_only_steps_when_forced() {
    let fixture = Fixture::new(ClipSpec::default());
    let mut input = open(&fixture);

    assert!(input.step(false).is_some());
    input.pause();
    assert_eq!(input.state(), PlaybackState::Paused);
    assert!(input.step(false).is_none());

    let forced = input.step(true).map(|f| f.pts);
    assert!(forced.is_some());
    assert_eq!(input.state(), PlaybackState::Paused);

    input.play();
    assert!(input.step(false).is_some());
    assert_eq!(input.stats().frames, 3);
}

#[test]
fn test_seek_to_middle() {
    let fixture = Fixture::new(ClipSpec {
        frames: 30,
        ..ClipSpec::default()
    });
    let mut input = open(&fixture);
    assert!(input.step(false).is_some());

    let outcome = input.set_position(0.5);
    assert!(outcome.succeeded(), "seek failed");
    assert_eq!(input.state(), PlaybackState::Playing);
    assert!((input.playback_percentage() - 0.5).abs() < 0.05);

    let frame = (0..10)
        .find_map(|_| input.step(false).map(|f| (f.image.width, f.image.height)))
        .expect("a frame after seeking");
    assert_eq!(frame, (160, 120));
}

#[test]
fn test_seek_discards_frames_held_by_decoder() {
    let fixture = Fixture::new(ClipSpec {
        frames: 30,
        ..ClipSpec::default()
    });
    let mut input = open(&fixture);

    let mut timestamps = Vec::new();
    while let Some(frame) = input.step(false) {
        timestamps.push(frame.pts.expect("timestamp"));
    }
    assert_eq!(timestamps.len(), 30);

    // Rewind mid-stream, while the decoder may still hold later frames.
    assert!(input.set_position(0.0).succeeded());
    for _ in 0..4 {
        assert!(input.step(false).is_some());
    }
    assert!(input.set_position(0.0).succeeded());
    let pts = input.step(false).and_then(|f| f.pts);
    assert_eq!(pts, Some(timestamps[0]));

    for _ in 0..3 {
        assert!(input.step(false).is_some());
    }
    assert!(input.set_position(0.8).succeeded());
    let pts = (0..30)
        .find_map(|_| input.step(false).and_then(|f| f.pts))
        .expect("a frame after seeking forward");
    assert!(
        pts > timestamps[15],
        "frame {} after seeking to 80% is not past the midpoint {}",
        pts,
        timestamps[15]
    );
}

#[test]
fn test_seek_clamps_fraction() {
    let fixture = Fixture::new(ClipSpec::default());
    let mut input = open(&fixture);

    assert!(input.set_position(-3.0).succeeded());
    assert_eq!(input.playback_percentage(), 0.0);
    assert!(input.step(false).is_some());

    assert!(input.set_position(7.5).succeeded());
    assert_eq!(input.playback_percentage(), 1.0);
}

#[test]
fn test_seek_resumes_after_end_of_stream() {
    let fixture = Fixture::new(ClipSpec::default());
    let mut input = open(&fixture);

    while input.step(false).is_some() {}
    assert_eq!(input.state(), PlaybackState::EndOfStream);

    assert_ne!(input.set_position(0.0), SeekOutcome::Failed);
    assert_eq!(input.state(), PlaybackState::Playing);
    assert!(input.step(false).is_some());
}

#[test]
fn test_reset_twice_after_playback() {
    let fixture = Fixture::new(ClipSpec::default());
    let mut input = open(&fixture);
    assert!(input.step(false).is_some());

    input.reset();
    input.reset();
    assert_eq!(input.state(), PlaybackState::Closed);
    assert!(input.step(true).is_none());
    assert!(input.current_frame().is_none());
    assert_eq!(input.playback_percentage(), 0.0);
}

#[test]
fn test_begin_replaces_open_session() {
    let first = Fixture::new(ClipSpec::default());
    let second = Fixture::new(ClipSpec {
        width: 96,
        height: 64,
        audio: false,
        ..ClipSpec::default()
    });

    let mut input = open(&first);
    assert!(input.step(false).is_some());

    input.begin(&second.path, 320, 240).expect("second clip");
    assert_eq!(input.dimensions(), Some((96, 64)));
    assert!(input.current_frame().is_none());
    assert!(input.source().is_some_and(|s| s.audio_index.is_none()));
}

#[test]
fn test_begin_rejects_non_media() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.mkv");
    std::fs::write(&path, b"definitely not a matroska file").unwrap();

    let mut input = MediaInput::new();
    assert!(input.begin(&path, 640, 360).is_err());
    assert_eq!(input.state(), PlaybackState::Closed);
    assert!(!input.is_open());
}

#[test]
fn test_info_summarises_session() {
    let fixture = Fixture::new(ClipSpec::default());
    let input = open(&fixture);

    let info = input.info().expect("open session has info");
    assert_eq!(info.path, fixture.path);
    assert_eq!((info.width, info.height), (160, 120));
    assert_eq!(info.container, "matroska");
    assert!(info.audio_stream.is_some());
    assert!(info.total_bytes > 0);
    let fps = info.frame_rate.expect("declared frame rate");
    assert!((fps - 25.0).abs() < 0.5, "unexpected frame rate {}", fps);
}

#[test]
fn test_four_second_clip_at_24_fps() {
    let fixture = Fixture::new(ClipSpec {
        width: 640,
        height: 360,
        frames: 96,
        fps: 24,
        audio: true,
    });
    let mut input = open(&fixture);

    let info = input.info().expect("open session has info");
    assert_eq!((info.width, info.height), (640, 360));
    let fps = info.frame_rate.expect("declared frame rate");
    assert!((fps - 24.0).abs() < 0.5, "unexpected frame rate {}", fps);
    let duration = info.duration_secs.expect("container duration");
    assert!((duration - 4.0).abs() < 0.2, "unexpected duration {}", duration);

    let mut frames = 0;
    while let Some(frame) = input.step(false) {
        assert_eq!((frame.image.width, frame.image.height), (640, 360));
        frames += 1;
    }
    assert_eq!(frames, 96);
    assert_eq!(input.state(), PlaybackState::EndOfStream);
    assert_eq!(input.playback_percentage(), 1.0);
}
