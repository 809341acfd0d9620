//! A single spawned service and its lifecycle state.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tracing::{info, warn};

use super::error::{LaunchError, TerminationError};
use super::spec::{Readiness, ServiceSpec};
use super::{EXIT_POLL_INTERVAL, PIPELINE_TARGET, SERVICE_TARGET};

/// Lifecycle state of a managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Spawned; readiness not yet confirmed.
    Starting,
    /// Readiness confirmed.
    Ready,
    /// Readiness failed, timed out, or was interrupted.
    Failed,
    /// Terminated by the orchestrator.
    Stopped,
}

impl ProcessStatus {
    /// Returns true when moving from `self` to `next` is permitted.
    ///
    /// `Starting` never moves straight to `Stopped`; a process that is
    /// stopped while still starting is recorded as `Failed` first.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Starting, Self::Ready | Self::Failed)
                | (Self::Ready, Self::Failed | Self::Stopped)
                | (Self::Failed, Self::Stopped)
        )
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Ready => write!(f, "ready"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// How a process ended when the orchestrator terminated it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// The process had exited before termination was requested.
    AlreadyExited {
        /// Exit code, if any.
        exit_code: Option<i32>,
    },
    /// The process exited within the grace period after SIGTERM.
    Graceful {
        /// Exit code, if any.
        exit_code: Option<i32>,
    },
    /// The process group had to be killed with SIGKILL.
    Forced,
}

/// A spawned service owned by an orchestration session.
#[derive(Debug)]
pub struct ManagedProcess {
    name: String,
    command: String,
    readiness: Readiness,
    child: Child,
    pid: u32,
    status: ProcessStatus,
    launched_at: Instant,
    announcements: Option<Receiver<String>>,
}

impl ManagedProcess {
    /// Spawns `spec` in its own process group with `exports` in its
    /// environment.
    pub(crate) fn spawn(
        spec: &ServiceSpec,
        exports: &BTreeMap<String, String>,
    ) -> Result<Self, LaunchError> {
        if !spec.workdir().is_dir() {
            return Err(LaunchError::MissingWorkdir {
                service: spec.name().to_owned(),
                path: spec.workdir().display().to_string(),
            });
        }
        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(spec.command())
            .current_dir(spec.workdir())
            .envs(exports)
            .envs(spec.env().iter().map(|(key, value)| (key, value)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        let mut child = command.spawn().map_err(|source| LaunchError::Spawn {
            service: spec.name().to_owned(),
            command: spec.command().to_owned(),
            source,
        })?;
        let pid = child.id();

        let (sender, announcements) = match spec.readiness() {
            Readiness::AnnouncedUrl { .. } => {
                let (sender, receiver) = mpsc::channel();
                (Some(sender), Some(receiver))
            }
            Readiness::Http { .. } => (None, None),
        };
        if let Some(stdout) = child.stdout.take() {
            forward_output(spec.name(), "stdout", stdout, sender.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(spec.name(), "stderr", stderr, sender);
        }

        info!(
            target: PIPELINE_TARGET,
            service = spec.name(),
            pid,
            command = spec.command(),
            "service spawned"
        );
        Ok(Self {
            name: spec.name().to_owned(),
            command: spec.command().to_owned(),
            readiness: spec.readiness().clone(),
            child,
            pid,
            status: ProcessStatus::Starting,
            launched_at: Instant::now(),
            announcements,
        })
    }

    /// Service label.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shell command the service was launched with.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Readiness criterion.
    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    /// OS process identifier, which is also the process group identifier.
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Current lifecycle state.
    pub const fn status(&self) -> ProcessStatus {
        self.status
    }

    /// Time since the process was spawned.
    pub fn uptime(&self) -> Duration {
        self.launched_at.elapsed()
    }

    /// Takes the stream of output lines used to detect announced URLs.
    pub(crate) fn take_announcements(&mut self) -> Option<Receiver<String>> {
        self.announcements.take()
    }

    /// Returns the exit status when the process has already exited.
    pub(crate) fn try_exit_status(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    pub(crate) fn mark_ready(&mut self) {
        self.set_status(ProcessStatus::Ready);
    }

    pub(crate) fn mark_failed(&mut self) {
        self.set_status(ProcessStatus::Failed);
    }

    fn mark_stopped(&mut self) {
        if self.status == ProcessStatus::Starting {
            self.set_status(ProcessStatus::Failed);
        }
        self.set_status(ProcessStatus::Stopped);
    }

    fn set_status(&mut self, next: ProcessStatus) {
        if self.status == next {
            return;
        }
        if self.status.can_transition_to(next) {
            self.status = next;
        } else {
            warn!(
                target: PIPELINE_TARGET,
                service = %self.name,
                from = %self.status,
                to = %next,
                "ignoring invalid status transition"
            );
        }
    }

    /// Sends SIGTERM to the process group, waits up to `grace` for the leader,
    /// then SIGKILLs whatever is left of the group.
    ///
    /// The group is signalled even when the leader has already exited, so
    /// background children of a wrapper command do not outlive it. The
    /// outcome describes the leader.
    pub(crate) fn terminate(
        &mut self,
        grace: Duration,
    ) -> Result<TerminationOutcome, TerminationError> {
        let group = self.group()?;
        let exited_early = self.reap()?;
        self.signal_group(group, Signal::SIGTERM)?;

        let outcome = match exited_early {
            Some(status) => TerminationOutcome::AlreadyExited {
                exit_code: status.code(),
            },
            None => match self.wait_for_exit(grace)? {
                Some(status) => TerminationOutcome::Graceful {
                    exit_code: status.code(),
                },
                None => TerminationOutcome::Forced,
            },
        };

        self.signal_group(group, Signal::SIGKILL)?;
        if outcome == TerminationOutcome::Forced {
            self.wait()?;
        }
        self.mark_stopped();
        Ok(outcome)
    }

    /// Delivers `signal` to the whole group; an empty group is not an error.
    fn signal_group(&self, group: Pid, signal: Signal) -> Result<(), TerminationError> {
        match killpg(group, signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(source) => Err(self.signal_error(source)),
        }
    }

    fn wait_for_exit(&mut self, grace: Duration) -> Result<Option<ExitStatus>, TerminationError> {
        let deadline = Instant::now() + grace;
        loop {
            if let Some(status) = self.reap()? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
    }

    fn group(&self) -> Result<Pid, TerminationError> {
        i32::try_from(self.pid)
            .map(Pid::from_raw)
            .map_err(|_| self.signal_error(Errno::EINVAL))
    }

    fn reap(&mut self) -> Result<Option<ExitStatus>, TerminationError> {
        self.child
            .try_wait()
            .map_err(|source| TerminationError::Wait {
                service: self.name.clone(),
                pid: self.pid,
                source,
            })
    }

    fn wait(&mut self) -> Result<ExitStatus, TerminationError> {
        self.child.wait().map_err(|source| TerminationError::Wait {
            service: self.name.clone(),
            pid: self.pid,
            source,
        })
    }

    fn signal_error(&self, source: Errno) -> TerminationError {
        TerminationError::Signal {
            service: self.name.clone(),
            pid: self.pid,
            source,
        }
    }
}

/// Relays a child's output stream into `tracing`, optionally copying each
/// line to `sender` for URL detection.
fn forward_output<R>(service: &str, stream: &'static str, reader: R, sender: Option<Sender<String>>)
where
    R: Read + Send + 'static,
{
    let service_name = service.to_owned();
    let spawned = thread::Builder::new()
        .name(format!("{service}-{stream}"))
        .spawn(move || relay_lines(&service_name, stream, reader, sender));
    if let Err(error) = spawned {
        warn!(
            target: PIPELINE_TARGET,
            service,
            stream,
            error = %error,
            "failed to start output relay; service output will be discarded"
        );
    }
}

fn relay_lines<R: Read>(
    service: &str,
    stream: &'static str,
    reader: R,
    mut sender: Option<Sender<String>>,
) {
    let mut reader = BufReader::new(reader);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = String::from_utf8_lossy(&buffer);
        let line = line.trim_end();
        info!(target: SERVICE_TARGET, service, stream, "{line}");
        let delivered = sender
            .as_ref()
            .is_some_and(|channel| channel.send(line.to_owned()).is_ok());
        if !delivered {
            // The readiness probe has finished with the stream.
            sender = None;
        }
    }
}
