use clap::ValueEnum;
use std::path::PathBuf;

use crate::core::audio::AudioSource;
use crate::core::region::Geometry;

/// Capture framerate passed to x11grab.
pub const FRAMERATE: u32 = 30;
/// AAC bitrate used when audio capture is enabled.
pub const AUDIO_BITRATE: &str = "128k";
/// Marker ffmpeg prints on stderr when an input device cannot be opened.
/// Seeing it after a non-clean exit triggers the no-audio retry.
pub const AUDIO_OPEN_ERROR_MARKER: &str = "Error opening input";

/// Quality preset. Maps to a fixed x264 CRF; lower CRF means higher
/// quality and a larger file. The table is a contract, not a formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Quality {
    Low,
    #[default]
    Medium,
    High,
    Ultra,
}

impl Quality {
    pub fn crf(self) -> u32 {
        match self {
            Quality::Low => 36,
            Quality::Medium => 28,
            Quality::High => 20,
            Quality::Ultra => 14,
        }
    }
}

/// Output container. The video format itself is entirely ffmpeg's business;
/// we only pick the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Container {
    #[default]
    Mp4,
    Mkv,
    Webm,
}

impl Container {
    pub fn extension(self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
            Container::Mkv => "mkv",
            Container::Webm => "webm",
        }
    }
}

/// A fully resolved encoder invocation: everything needed to spawn ffmpeg.
///
/// Built once per session start; `without_audio` derives the retry plan with
/// the identical output path and video parameters.
#[derive(Debug, Clone)]
pub struct EncoderPlan {
    pub output: PathBuf,
    pub audio: Option<AudioSource>,
    display: String,
    crf: u32,
    geometry: Option<Geometry>,
}

impl EncoderPlan {
    pub fn new(
        quality: Quality,
        geometry: Option<Geometry>,
        audio: Option<AudioSource>,
        output: PathBuf,
    ) -> Self {
        let display = std::env::var("DISPLAY").unwrap_or_else(|_| ":0".to_string());
        Self {
            output,
            audio,
            display,
            crf: quality.crf(),
            geometry,
        }
    }

    pub fn wants_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// The retry plan: same output, same video parameters, no audio input.
    pub fn without_audio(&self) -> Self {
        let mut plan = self.clone();
        plan.audio = None;
        plan
    }

    /// Command-line arguments for ffmpeg (the program name itself excluded).
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "-y".into(),
            "-f".into(),
            "x11grab".into(),
            "-framerate".into(),
            FRAMERATE.to_string(),
        ];

        let (x, y) = match &self.geometry {
            Some(g) => {
                // libx264 + yuv420p rejects odd dimensions; round down.
                let w = g.width & !1;
                let h = g.height & !1;
                args.push("-video_size".into());
                args.push(format!("{}x{}", w, h));
                (g.x, g.y)
            }
            None => (0, 0),
        };

        args.push("-i".into());
        args.push(format!("{}+{},{}", self.display, x, y));

        if let Some(source) = &self.audio {
            args.push("-f".into());
            args.push(source.driver.clone());
            args.push("-i".into());
            args.push(source.device.clone());
        }

        args.extend(
            [
                "-c:v",
                "libx264",
                "-preset",
                "ultrafast",
                "-crf",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push(self.crf.to_string());
        args.push("-pix_fmt".into());
        args.push("yuv420p".into());

        if self.audio.is_some() {
            args.extend(["-c:a", "aac", "-b:a", AUDIO_BITRATE].iter().map(|s| s.to_string()));
        }

        args.push(self.output.to_string_lossy().to_string());
        args
    }
}
