use anyhow::{bail, Context, Result};
use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

/// Per-query timeout for the sound-server probes.
const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// An ffmpeg audio input: capture driver plus device identifier.
///
/// Resolved fresh at every session start, since the default output device
/// may change between recordings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSource {
    pub driver: String,
    pub device: String,
}

impl std::fmt::Display for AudioSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.driver, self.device)
    }
}

/// Seam for shelling out to the host audio tooling, so the fallback chain
/// is testable without a sound server.
#[cfg_attr(test, automock)]
pub trait CommandRunner: Send + Sync {
    /// Run a command, returning stdout on a zero exit within the timeout.
    fn run<'a>(&self, program: &str, args: &[&'a str], timeout: Duration) -> Result<String>;
}

/// Runs real commands with a bounded wait.
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[&str], timeout: Duration) -> Result<String> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to run {}", program))?;

        let start = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if start.elapsed() >= timeout {
                let _ = child.kill();
                let _ = child.wait();
                bail!("{} timed out after {:?}", program, timeout);
            }
            std::thread::sleep(Duration::from_millis(50));
        };

        if !status.success() {
            bail!("{} exited with {}", program, status);
        }

        let mut stdout = String::new();
        if let Some(mut pipe) = child.stdout.take() {
            pipe.read_to_string(&mut stdout)?;
        }
        Ok(stdout)
    }
}

/// Resolves the audio capture source for a recording session.
///
/// Priority: PulseAudio monitor of the default sink (captures whatever plays
/// through the speakers) → PulseAudio "default" → ALSA "default". Every step
/// fails through silently; the ALSA fallback is unconditional, so resolution
/// itself never fails. Whether the device can actually be opened is only
/// known once the encoder tries; that failure is handled by the retry policy.
pub struct AudioSourceResolver {
    runner: Box<dyn CommandRunner>,
}

impl Default for AudioSourceResolver {
    fn default() -> Self {
        Self::new(Box::new(SystemCommandRunner))
    }
}

impl AudioSourceResolver {
    pub fn new(runner: Box<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    pub fn resolve(&self) -> AudioSource {
        match self.runner.run("pactl", &["get-default-sink"], QUERY_TIMEOUT) {
            Ok(out) => {
                let sink = out.trim();
                if !sink.is_empty() {
                    let source = AudioSource {
                        driver: "pulse".to_string(),
                        device: format!("{}.monitor", sink),
                    };
                    info!("Audio source: {}", source);
                    return source;
                }
                debug!("pactl reported an empty default sink");
            }
            Err(e) => debug!("pactl get-default-sink failed: {}", e),
        }

        // Sound server reachable but no queryable default sink.
        if self.runner.run("pactl", &["info"], QUERY_TIMEOUT).is_ok() {
            info!("Audio source: pulse:default");
            return AudioSource {
                driver: "pulse".to_string(),
                device: "default".to_string(),
            };
        }

        // No PulseAudio at all, fall back to raw ALSA.
        info!("Audio source: alsa:default");
        AudioSource {
            driver: "alsa".to_string(),
            device: "default".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn monitor_of_default_sink_wins() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|program, args, _| program == "pactl" && args == ["get-default-sink"])
            .times(1)
            .returning(|_, _, _| Ok("alsa_out\n".to_string()));

        let resolver = AudioSourceResolver::new(Box::new(runner));
        assert_eq!(
            resolver.resolve(),
            AudioSource {
                driver: "pulse".to_string(),
                device: "alsa_out.monitor".to_string(),
            }
        );
    }

    #[test]
    fn falls_back_to_pulse_default_when_sink_query_fails() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|program, args, _| program == "pactl" && args == ["get-default-sink"])
            .times(1)
            .returning(|_, _, _| anyhow::bail!("no default sink"));
        runner
            .expect_run()
            .withf(|program, args, _| program == "pactl" && args == ["info"])
            .times(1)
            .returning(|_, _, _| Ok("Server Name: pulseaudio".to_string()));

        let resolver = AudioSourceResolver::new(Box::new(runner));
        assert_eq!(
            resolver.resolve(),
            AudioSource {
                driver: "pulse".to_string(),
                device: "default".to_string(),
            }
        );
    }

    #[test]
    fn falls_back_to_alsa_when_pulse_is_absent() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .times(2)
            .returning(|_, _, _| anyhow::bail!("pactl not available"));

        let resolver = AudioSourceResolver::new(Box::new(runner));
        assert_eq!(
            resolver.resolve(),
            AudioSource {
                driver: "alsa".to_string(),
                device: "default".to_string(),
            }
        );
    }

    #[test]
    fn empty_sink_name_is_treated_as_no_default() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|program, args, _| program == "pactl" && args == ["get-default-sink"])
            .times(1)
            .returning(|_, _, _| Ok("\n".to_string()));
        runner
            .expect_run()
            .withf(|program, args, _| program == "pactl" && args == ["info"])
            .times(1)
            .returning(|_, _, _| Ok("Server Name: pipewire".to_string()));

        let resolver = AudioSourceResolver::new(Box::new(runner));
        let source = resolver.resolve();
        assert_eq!(source.driver, "pulse");
        assert_eq!(source.device, "default");
    }
}
