use nix::sys::signal::Signal;
use std::process::{ExitStatus, Stdio};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::core::encoder::{EncoderPlan, AUDIO_OPEN_ERROR_MARKER};
use crate::core::error::{RecorderError, Result};

/// How a finished encoder process is reported back to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Clean exit, or voluntary exit after the stop interrupt. The output
    /// container has been finalized.
    Completed,
    /// The encoder could not open its audio input device. Recoverable via
    /// the one-shot no-audio retry.
    AudioInputFailed,
    /// Launch-time or runtime failure that is terminal for the session.
    Failed { status: Option<i32>, detail: String },
}

/// Control handle for a running encoder. Stopping is cooperative: an
/// interrupt first, a forceful kill only after the bounded wait expires.
pub trait EncoderChild: Send {
    fn interrupt(&mut self) -> Result<()>;
    fn force_kill(&mut self) -> Result<()>;
}

/// Seam between the controller and the real encoder process, so the state
/// machine can be exercised in tests with a scripted launcher.
pub trait EncoderLauncher: Send + Sync {
    /// Spawn the encoder for `plan`. The returned receiver resolves exactly
    /// once, when the process exits and its outcome has been classified.
    fn launch(
        &self,
        plan: &EncoderPlan,
    ) -> Result<(Box<dyn EncoderChild>, oneshot::Receiver<SessionOutcome>)>;
}

/// Launches ffmpeg in its own process group and classifies its exit.
pub struct FfmpegLauncher {
    binary: String,
}

impl Default for FfmpegLauncher {
    fn default() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
        }
    }
}

impl EncoderLauncher for FfmpegLauncher {
    fn launch(
        &self,
        plan: &EncoderPlan,
    ) -> Result<(Box<dyn EncoderChild>, oneshot::Receiver<SessionOutcome>)> {
        let args = plan.args();
        info!("Spawning {} {:?}", self.binary, args);

        let mut command = Command::new(&self.binary);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        // Own process group, so the stop interrupt reaches ffmpeg and any
        // children it forks, without touching our own process.
        command.process_group(0);

        let mut child = command.spawn().map_err(RecorderError::EncoderSpawn)?;
        let pid = child
            .id()
            .map(|p| p as i32)
            .ok_or_else(|| RecorderError::EncoderFailed("encoder exited before launch completed".into()))?;

        let wants_audio = plan.wants_audio();
        let (tx, rx) = oneshot::channel();

        // The blocking wait lives on its own task; the controller only ever
        // sees the classified outcome on the channel.
        tokio::spawn(async move {
            let mut stderr_buf = Vec::new();
            if let Some(mut stderr) = child.stderr.take() {
                let _ = stderr.read_to_end(&mut stderr_buf).await;
            }

            let outcome = match child.wait().await {
                Ok(status) => classify_exit(status, &stderr_buf, wants_audio),
                Err(e) => SessionOutcome::Failed {
                    status: None,
                    detail: format!("wait on encoder failed: {}", e),
                },
            };

            debug!("Encoder exited: {:?}", outcome);
            let _ = tx.send(outcome);
        });

        Ok((Box::new(FfmpegChild { pid }), rx))
    }
}

struct FfmpegChild {
    pid: i32,
}

impl FfmpegChild {
    fn signal_group(&self, signal: Signal) -> Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        match killpg(Pid::from_raw(self.pid), signal) {
            Ok(()) => Ok(()),
            // Already exited between our check and the signal.
            Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(std::io::Error::from_raw_os_error(e as i32).into()),
        }
    }
}

impl EncoderChild for FfmpegChild {
    fn interrupt(&mut self) -> Result<()> {
        info!("Sending SIGINT to encoder process group {}", self.pid);
        self.signal_group(Signal::SIGINT)
    }

    fn force_kill(&mut self) -> Result<()> {
        warn!("Encoder did not exit in time, sending SIGKILL to group {}", self.pid);
        self.signal_group(Signal::SIGKILL)
    }
}

/// Map the encoder's exit status to a session outcome.
///
/// ffmpeg exits 255 when interrupted while writing, and the process may also
/// die directly of SIGINT; both count as a clean stop. A non-clean exit with
/// the device-open marker on stderr is the recoverable audio failure.
fn classify_exit(status: ExitStatus, stderr: &[u8], wants_audio: bool) -> SessionOutcome {
    if is_clean_exit(status) {
        return SessionOutcome::Completed;
    }

    let stderr = String::from_utf8_lossy(stderr);
    if wants_audio && stderr.contains(AUDIO_OPEN_ERROR_MARKER) {
        return SessionOutcome::AudioInputFailed;
    }

    SessionOutcome::Failed {
        status: status.code(),
        detail: stderr_tail(&stderr),
    }
}

fn is_clean_exit(status: ExitStatus) -> bool {
    match status.code() {
        Some(0) | Some(255) => true,
        Some(_) => false,
        None => {
            use std::os::unix::process::ExitStatusExt;
            status.signal() == Some(Signal::SIGINT as i32)
        }
    }
}

/// Last few lines of stderr, enough to say why ffmpeg died.
fn stderr_tail(stderr: &str) -> String {
    const MAX_LINES: usize = 5;
    let lines: Vec<&str> = stderr.lines().rev().take(MAX_LINES).collect();
    lines.into_iter().rev().collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exit_status(code: i32) -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        ExitStatus::from_raw(code << 8)
    }

    fn signal_status(signal: i32) -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        ExitStatus::from_raw(signal)
    }

    #[test]
    fn zero_and_interrupt_exits_are_clean() {
        assert!(is_clean_exit(exit_status(0)));
        assert!(is_clean_exit(exit_status(255)));
        assert!(is_clean_exit(signal_status(2))); // SIGINT
        assert!(!is_clean_exit(exit_status(1)));
        assert!(!is_clean_exit(signal_status(9))); // SIGKILL
    }

    #[test]
    fn audio_open_failure_is_recoverable_only_with_audio() {
        let stderr = b"[pulse] Error opening input: device busy\n";

        assert_eq!(
            classify_exit(exit_status(1), stderr, true),
            SessionOutcome::AudioInputFailed
        );
        // Same stderr, audio not requested: terminal failure.
        assert!(matches!(
            classify_exit(exit_status(1), stderr, false),
            SessionOutcome::Failed { status: Some(1), .. }
        ));
    }

    #[test]
    fn other_failures_keep_a_stderr_tail() {
        let stderr = b"a\nb\nc\nd\ne\nf\nUnknown encoder 'libx264'\n";
        match classify_exit(exit_status(1), stderr, true) {
            SessionOutcome::Failed { status, detail } => {
                assert_eq!(status, Some(1));
                assert!(detail.contains("Unknown encoder"));
                assert!(!detail.contains("a\n"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
