mod cli;

use reframer::config;
use reframer::player::Player;
use reframer::render::{FlippedReadback, FrameRenderer, IdentityRenderer};
use reframer_av::paths::is_video_file;
use reframer_av::{MediaInput, PlaybackState, RecordingToggle};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "reframer=trace,reframer_av=trace".to_string()
        } else {
            "reframer=debug,reframer_av=debug".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Play {
            file,
            speed,
            seek,
            realtime,
        } => play_file(&file, cli.config.as_deref(), speed, seek, realtime),
        Commands::Reframe {
            file,
            width,
            height,
            flip,
        } => reframe_file(&file, cli.config.as_deref(), width.zip(height), flip),
        Commands::Probe { file, json } => probe_file(&file, json),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("reframer {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn play_file(
    file: &Path,
    config_path: Option<&Path>,
    speed: Option<f64>,
    seek: Option<f64>,
    realtime: bool,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;
    if let Some(speed) = speed {
        config.playback.speed = speed;
    }
    config.playback.realtime |= realtime;
    config::validate_config(&config)?;

    check_input(file)?;

    let mut player =
        Player::open(file, &config).with_context(|| format!("Failed to open {:?}", file))?;

    if let Some(fraction) = seek {
        let outcome = player.seek(fraction);
        tracing::info!("Seek to {:.3}: {:?}", fraction, outcome);
    }

    let last = run_to_end(&mut player, config.playback.realtime);

    println!("File: {}", file.display());
    println!("Frames: {}", player.frames_rendered());
    println!("Position: {:.1}%", last.percentage * 100.0);

    player.shutdown()?;
    Ok(())
}

fn reframe_file(
    file: &Path,
    config_path: Option<&Path>,
    size: Option<(u32, u32)>,
    flip: bool,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;
    if let Some((width, height)) = size {
        config.recording.render_width = Some(width);
        config.recording.render_height = Some(height);
    }
    config::validate_config(&config)?;

    check_input(file)?;

    let renderer: Box<dyn FrameRenderer> = if flip {
        Box::new(FlippedReadback)
    } else {
        Box::new(IdentityRenderer)
    };
    let mut player = Player::with_renderer(file, &config, renderer)
        .with_context(|| format!("Failed to open {:?}", file))?;

    match player.toggle_record().context("Failed to start recording")? {
        RecordingToggle::Started(path) => tracing::info!("Writing {:?}", path),
        RecordingToggle::Stopped(_) => anyhow::bail!("Recording was unexpectedly active"),
    }

    let last = run_to_end(&mut player, config.playback.realtime);
    let frames = player.output().frames_written();
    let audio_packets = player.output().audio_packets_written();

    let output = match last.finished_recording {
        Some(path) => path,
        None => player
            .shutdown()?
            .context("Recording ended without an output file")?,
    };

    println!("Output: {}", output.display());
    println!("Frames: {}", frames);
    println!("Audio packets: {}", audio_packets);
    Ok(())
}

fn check_input(file: &Path) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("Input file does not exist: {:?}", file);
    }
    if !is_video_file(file) {
        tracing::warn!("{:?} does not have a known video extension", file);
    }
    Ok(())
}

/// Tick until the input stops producing frames.
fn run_to_end<R: FrameRenderer>(player: &mut Player<R>, realtime: bool) -> reframer::player::Tick {
    loop {
        let tick = player.tick();
        if !tick.frame && player.state() != PlaybackState::Playing {
            return tick;
        }
        if realtime {
            std::thread::sleep(player.tick_interval());
        }
    }
}

fn probe_file(file: &Path, json: bool) -> Result<()> {
    check_input(file)?;

    let mut input = MediaInput::new();
    input
        .begin(file, 0, 0)
        .with_context(|| format!("Failed to open {:?}", file))?;
    let info = input.info().context("No session after opening")?;

    if json {
        let json_str = serde_json::to_string_pretty(&info)?;
        println!("{}", json_str);
    } else {
        println!("File: {}", info.path.display());
        println!("Container: {}", info.container);
        println!("Size: {} bytes", info.total_bytes);
        if let Some(duration) = info.duration_secs {
            let secs = duration as u64;
            let mins = secs / 60;
            let hours = mins / 60;
            println!("Duration: {:02}:{:02}:{:02}", hours, mins % 60, secs % 60);
        }

        print!(
            "Video: [{}] {} {}x{}",
            info.video_stream, info.video_codec, info.width, info.height
        );
        if let Some(fps) = info.frame_rate {
            print!(", {:.3} fps", fps);
        }
        println!();

        match (info.audio_stream, &info.audio_codec) {
            (Some(index), Some(codec)) => println!("Audio: [{}] {} (passthrough)", index, codec),
            _ => println!("Audio: none"),
        }
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            print_config(&config);
        }
        None => {
            println!("No config file specified, using defaults");
            print_config(&config::Config::default());
        }
    }

    Ok(())
}

fn print_config(config: &config::Config) {
    println!("  Speed: {}", config.playback.speed);
    println!("  Fallback fps: {}", config.playback.fallback_fps);
    println!("  Realtime: {}", config.playback.realtime);
    match config.recording.render_size() {
        Some((w, h)) => println!("  Render size: {}x{}", w, h),
        None => println!("  Render size: source"),
    }
    println!(
        "  Encoder: H.264 preset={} profile={}",
        config.recording.preset, config.recording.profile
    );
}
