use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::core::audio::AudioSourceResolver;
use crate::core::config::Config;
use crate::core::controller::{CaptureController, ControllerEvent, RecordOptions, RecorderState};
use crate::core::encoder::{Container, Quality};
use crate::core::error::RecorderError;
use crate::core::region::{self, CaptureRegion};
use crate::core::session::FfmpegLauncher;

/// Everything the CLI hands over for one invocation.
pub struct RunOptions {
    pub quality: Quality,
    pub format: Container,
    pub no_audio: bool,
    pub window: bool,
    pub select: bool,
    pub duration: Option<u64>,
    pub output_dir: Option<PathBuf>,
    pub probe_audio: bool,
}

pub async fn run(options: RunOptions) -> Result<()> {
    let mut config = Config::load();
    if let Some(dir) = &options.output_dir {
        // Persist the last-used destination folder.
        config.output_dir = dir.clone();
        config.save()?;
    }

    if options.probe_audio {
        let source = AudioSourceResolver::default().resolve();
        println!("{}", source);
        return Ok(());
    }

    let region = if options.window {
        CaptureRegion::Window
    } else if options.select {
        CaptureRegion::Selection
    } else {
        CaptureRegion::FullScreen
    };

    // Selection happens before the countdown; a cancelled pick aborts the
    // start request while the controller is still idle.
    let geometry = match region::pick(region).await {
        Ok(geometry) => geometry,
        Err(RecorderError::SelectionCancelled) => {
            println!("Selection cancelled");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let (mut controller, events) = CaptureController::new(
        Box::new(FfmpegLauncher::default()),
        AudioSourceResolver::default(),
    );
    let renderer = tokio::spawn(render_status(events));

    let record = RecordOptions {
        quality: options.quality,
        container: options.format,
        audio: !options.no_audio,
        geometry,
        output_dir: config.output_dir.clone(),
        output_name: None,
    };

    let result = match controller.start(record).await {
        Ok(()) => match options.duration {
            Some(secs) => {
                info!("Recording for {} seconds", secs);
                controller
                    .record_until(tokio::time::sleep(Duration::from_secs(secs)))
                    .await
            }
            None => {
                info!("Recording until Ctrl-C");
                controller.record_until(wait_for_ctrl_c()).await
            }
        },
        Err(e) => Err(e),
    };

    // Closes the event channel so the renderer drains and finishes.
    drop(controller);
    let _ = renderer.await;

    result.map_err(Into::into)
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Presentation layer: renders controller events as status text.
async fn render_status(mut events: mpsc::UnboundedReceiver<ControllerEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ControllerEvent::Countdown(n) => println!("Starting in {}…", n),
            ControllerEvent::StateChanged(RecorderState::Recording) => println!("Recording"),
            ControllerEvent::StateChanged(RecorderState::Stopping) => println!("Saving…"),
            ControllerEvent::Started { output } => println!("→ {}", output.display()),
            ControllerEvent::RetryingWithoutAudio => {
                println!("Audio device failed, retrying without audio")
            }
            ControllerEvent::Saved { output } => println!("Saved {}", output.display()),
            ControllerEvent::Failed { reason } => println!("Error: {}", reason),
            ControllerEvent::StateChanged(_) => {}
        }
    }
}
