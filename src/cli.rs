use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "reframer")]
#[command(author, version, about = "Frame-stepping video player and re-encoder")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Play a video to the end without a display
    Play {
        /// Video file to play
        #[arg(required = true)]
        file: PathBuf,

        /// Playback rate (overrides config)
        #[arg(long)]
        speed: Option<f64>,

        /// Start at this fraction of the file (0.0 - 1.0)
        #[arg(long)]
        seek: Option<f64>,

        /// Pace ticks at the source frame rate
        #[arg(long)]
        realtime: bool,
    },

    /// Play a video while recording the rendered frames next to it
    Reframe {
        /// Video file to reframe
        #[arg(required = true)]
        file: PathBuf,

        /// Render width (default: config, then source width)
        #[arg(long, requires = "height")]
        width: Option<u32>,

        /// Render height (default: config, then source height)
        #[arg(long, requires = "width")]
        height: Option<u32>,

        /// Render through a flipped BGR framebuffer readback
        #[arg(long)]
        flip: bool,
    },

    /// Probe a video file and display information
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
