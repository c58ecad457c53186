use chrono::Local;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::core::audio::AudioSourceResolver;
use crate::core::encoder::{Container, EncoderPlan, Quality};
use crate::core::error::{RecorderError, Result};
use crate::core::region::Geometry;
use crate::core::session::{EncoderChild, EncoderLauncher, SessionOutcome};

/// Length of the visible countdown before the encoder is launched.
pub const COUNTDOWN_SECS: u32 = 3;

/// Bounded wait after the stop interrupt before escalating to a forceful
/// kill. ffmpeg normally finalizes the container well within this.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Recorder lifecycle. `Error` is a transit state: after reporting, the
/// controller settles back in `Idle` so a new session can be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    CountingDown,
    Recording,
    Stopping,
    Error,
}

impl std::fmt::Display for RecorderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RecorderState::Idle => "idle",
            RecorderState::CountingDown => "counting-down",
            RecorderState::Recording => "recording",
            RecorderState::Stopping => "stopping",
            RecorderState::Error => "error",
        };
        f.write_str(name)
    }
}

/// State-change and progress events, rendered by whatever presentation
/// layer is subscribed. The controller itself never touches a UI.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    StateChanged(RecorderState),
    Countdown(u32),
    Started { output: PathBuf },
    /// The audio device could not be opened; the recording is restarting
    /// from zero without audio. Footage from the first attempt is lost.
    RetryingWithoutAudio,
    Saved { output: PathBuf },
    Failed { reason: String },
}

/// User-selected options for one recording session.
#[derive(Debug, Clone)]
pub struct RecordOptions {
    pub quality: Quality,
    pub container: Container,
    pub audio: bool,
    /// `None` captures the full screen.
    pub geometry: Option<Geometry>,
    pub output_dir: PathBuf,
    /// Derived from the session start timestamp when not supplied.
    pub output_name: Option<String>,
}

struct ActiveSession {
    child: Box<dyn EncoderChild>,
    outcome_rx: oneshot::Receiver<SessionOutcome>,
    plan: EncoderPlan,
    retried: bool,
}

/// Owns recording state and the encoder child process. At most one session
/// is active at a time; `start` while not idle is a no-op.
pub struct CaptureController {
    launcher: Box<dyn EncoderLauncher>,
    resolver: AudioSourceResolver,
    events: mpsc::UnboundedSender<ControllerEvent>,
    state: RecorderState,
    session: Option<ActiveSession>,
}

impl CaptureController {
    pub fn new(
        launcher: Box<dyn EncoderLauncher>,
        resolver: AudioSourceResolver,
    ) -> (Self, mpsc::UnboundedReceiver<ControllerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                launcher,
                resolver,
                events,
                state: RecorderState::Idle,
                session: None,
            },
            rx,
        )
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// Begin a recording session: visible countdown, audio resolution,
    /// output path derivation, encoder launch. Rejected (no-op) unless idle.
    pub async fn start(&mut self, options: RecordOptions) -> Result<()> {
        if self.state != RecorderState::Idle {
            warn!("Start requested while {}, ignoring", self.state);
            return Ok(());
        }

        self.set_state(RecorderState::CountingDown);
        for remaining in (1..=COUNTDOWN_SECS).rev() {
            self.emit(ControllerEvent::Countdown(remaining));
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        match self.launch_session(&options) {
            Ok(output) => {
                self.set_state(RecorderState::Recording);
                self.emit(ControllerEvent::Started { output });
                Ok(())
            }
            Err(e) => {
                error!("Failed to start recording: {}", e);
                self.fail(e.to_string());
                Err(e)
            }
        }
    }

    fn launch_session(&mut self, options: &RecordOptions) -> Result<PathBuf> {
        let output = self.prepare_output(options)?;

        // Re-resolved every session; the default sink may have changed.
        let audio = options.audio.then(|| self.resolver.resolve());

        let plan = EncoderPlan::new(options.quality, options.geometry, audio, output.clone());
        let (child, outcome_rx) = self.launcher.launch(&plan)?;

        info!("Recording to {}", output.display());
        self.session = Some(ActiveSession {
            child,
            outcome_rx,
            plan,
            retried: false,
        });
        Ok(output)
    }

    fn prepare_output(&self, options: &RecordOptions) -> Result<PathBuf> {
        std::fs::create_dir_all(&options.output_dir)?;

        let metadata = std::fs::metadata(&options.output_dir)?;
        if metadata.permissions().readonly() {
            return Err(RecorderError::OutputDirNotWritable(
                options.output_dir.clone(),
            ));
        }

        let name = options.output_name.clone().unwrap_or_else(|| {
            format!(
                "rec_{}.{}",
                Local::now().format("%Y%m%d_%H%M%S"),
                options.container.extension()
            )
        });
        Ok(options.output_dir.join(name))
    }

    /// Stop the active session: SIGINT to the encoder's process group so it
    /// can finalize the container, bounded wait, then SIGKILL escalation.
    /// Valid only while recording; otherwise a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state != RecorderState::Recording {
            warn!("Stop requested while {}, ignoring", self.state);
            return Ok(());
        }
        let Some(mut session) = self.session.take() else {
            self.set_state(RecorderState::Idle);
            return Ok(());
        };

        self.set_state(RecorderState::Stopping);
        session.child.interrupt()?;

        let outcome = match timeout(STOP_TIMEOUT, &mut session.outcome_rx).await {
            Ok(received) => received.unwrap_or_else(|_| channel_closed()),
            Err(_) => {
                session.child.force_kill()?;
                match timeout(STOP_TIMEOUT, &mut session.outcome_rx).await {
                    Ok(received) => received.unwrap_or_else(|_| channel_closed()),
                    Err(_) => SessionOutcome::Failed {
                        status: None,
                        detail: "encoder unresponsive after SIGKILL".to_string(),
                    },
                }
            }
        };

        self.conclude(session, outcome, true)
    }

    /// Drive the session until the encoder exits or `stop_signal` fires.
    /// Handles the mid-recording failure path (including the no-audio retry)
    /// while the caller waits on a timer or Ctrl-C.
    pub async fn record_until<F>(&mut self, stop_signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(stop_signal);

        loop {
            if self.state != RecorderState::Recording {
                return Ok(());
            }
            let Some(mut session) = self.session.take() else {
                return Ok(());
            };

            tokio::select! {
                received = &mut session.outcome_rx => {
                    let outcome = received.unwrap_or_else(|_| channel_closed());
                    self.conclude(session, outcome, false)?;
                }
                _ = &mut stop_signal => {
                    self.session = Some(session);
                    return self.stop().await;
                }
            }
        }
    }

    /// Apply a session outcome to the state machine. The one-shot no-audio
    /// retry relaunches with the identical output path; everything else
    /// ends the session.
    fn conclude(
        &mut self,
        session: ActiveSession,
        outcome: SessionOutcome,
        stopping: bool,
    ) -> Result<()> {
        match outcome {
            SessionOutcome::Completed => {
                info!("Recording saved: {}", session.plan.output.display());
                self.set_state(RecorderState::Idle);
                self.emit(ControllerEvent::Saved {
                    output: session.plan.output,
                });
                Ok(())
            }
            SessionOutcome::AudioInputFailed
                if !stopping && session.plan.wants_audio() && !session.retried =>
            {
                warn!("Audio device open failed, retrying once without audio");
                self.emit(ControllerEvent::RetryingWithoutAudio);

                let plan = session.plan.without_audio();
                match self.launcher.launch(&plan) {
                    Ok((child, outcome_rx)) => {
                        self.session = Some(ActiveSession {
                            child,
                            outcome_rx,
                            plan,
                            retried: true,
                        });
                        Ok(())
                    }
                    Err(e) => {
                        error!("No-audio retry failed to launch: {}", e);
                        self.fail(e.to_string());
                        Err(e)
                    }
                }
            }
            SessionOutcome::AudioInputFailed => {
                let reason = "encoder could not open the audio device".to_string();
                error!("{}", reason);
                self.fail(reason.clone());
                Err(RecorderError::EncoderFailed(reason))
            }
            SessionOutcome::Failed { status, detail } => {
                let reason = match status {
                    Some(code) => format!("encoder exited with status {}: {}", code, detail),
                    None => format!("encoder failed: {}", detail),
                };
                error!("{}", reason);
                self.fail(reason.clone());
                Err(RecorderError::EncoderFailed(reason))
            }
        }
    }

    /// Report a terminal session failure, then settle back in `Idle`.
    fn fail(&mut self, reason: String) {
        self.session = None;
        self.set_state(RecorderState::Error);
        self.emit(ControllerEvent::Failed { reason });
        self.set_state(RecorderState::Idle);
    }

    fn set_state(&mut self, state: RecorderState) {
        if self.state != state {
            self.state = state;
            self.emit(ControllerEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: ControllerEvent) {
        // A dropped subscriber must never wedge the state machine.
        let _ = self.events.send(event);
    }
}

fn channel_closed() -> SessionOutcome {
    SessionOutcome::Failed {
        status: None,
        detail: "encoder outcome channel closed".to_string(),
    }
}
