use reframer_av::EncoderSettings;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub recording: RecordingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaybackConfig {
    /// Playback rate hint (1.0 = source rate)
    #[serde(default = "default_speed")]
    pub speed: f64,

    /// Tick rate used when the source declares no frame rate
    #[serde(default = "default_fallback_fps")]
    pub fallback_fps: f64,

    /// Sleep between ticks to play at the source rate
    #[serde(default)]
    pub realtime: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            speed: default_speed(),
            fallback_fps: default_fallback_fps(),
            realtime: false,
        }
    }
}

fn default_speed() -> f64 {
    1.0
}

fn default_fallback_fps() -> f64 {
    24.0
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecordingConfig {
    /// Width of the rendered frames (default: source width)
    #[serde(default)]
    pub render_width: Option<u32>,

    /// Height of the rendered frames (default: source height)
    #[serde(default)]
    pub render_height: Option<u32>,

    /// x264 preset
    #[serde(default = "default_preset")]
    pub preset: String,

    /// H.264 profile
    #[serde(default = "default_profile")]
    pub profile: String,

    /// Container title tag
    #[serde(default = "default_title")]
    pub title: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            render_width: None,
            render_height: None,
            preset: default_preset(),
            profile: default_profile(),
            title: default_title(),
        }
    }
}

impl RecordingConfig {
    /// Configured render size, when both dimensions are set.
    pub fn render_size(&self) -> Option<(u32, u32)> {
        self.render_width.zip(self.render_height)
    }

    pub fn encoder_settings(&self) -> EncoderSettings {
        EncoderSettings {
            preset: self.preset.clone(),
            profile: self.profile.clone(),
            title: self.title.clone(),
        }
    }
}

fn default_preset() -> String {
    EncoderSettings::default().preset
}

fn default_profile() -> String {
    EncoderSettings::default().profile
}

fn default_title() -> String {
    format!("Reframer {}", env!("CARGO_PKG_VERSION"))
}
