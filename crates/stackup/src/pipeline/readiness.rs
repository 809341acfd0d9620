//! Readiness probes and the bounded polling loop.
//!
//! Probes answer a single question, "is the service ready now?", and never
//! block longer than the budget they are handed. [`await_ready`] repeats the
//! question at a fixed interval until the service answers yes, exits, the
//! wall-clock budget runs out, or a shutdown request arrives.

use std::sync::mpsc::{Receiver, TryRecvError};
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::PIPELINE_TARGET;
use super::cancel::CancellationToken;
use super::error::ReadinessError;
use super::process::ManagedProcess;
use super::spec::Readiness;

/// Result of a single readiness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The service is ready. URL-announcing services report the URL.
    Ready {
        /// Value announced by the service, if any.
        announced: Option<String>,
    },
    /// The service is not ready yet.
    NotReady {
        /// Why the check did not pass.
        reason: String,
    },
}

/// A single readiness check against one service.
pub trait ReadinessProbe: Send {
    /// Describes what is being probed, for diagnostics.
    fn endpoint(&self) -> String;

    /// Performs one check, taking no longer than `budget`.
    fn check(&mut self, budget: Duration) -> ProbeOutcome;
}

/// Builds the probe for a freshly launched process.
pub trait ProbeFactory {
    /// Returns the probe matching the process' readiness criterion.
    fn probe_for(&self, process: &mut ManagedProcess) -> Box<dyn ReadinessProbe>;
}

/// Outcome of a successful readiness wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyReport {
    /// Service label.
    pub service: String,
    /// Process identifier.
    pub pid: u32,
    /// Time spent waiting.
    pub elapsed: Duration,
    /// Value announced by the service, if any.
    pub announced: Option<String>,
}

/// Polls `probe` until `process` is ready or `timeout` elapses.
///
/// On success the process moves to `Ready`; on any error it moves to
/// `Failed`. The wait ends early when the process exits or `cancel` fires.
///
/// # Errors
///
/// Returns [`ReadinessError::Timeout`] when the budget runs out,
/// [`ReadinessError::Exited`] when the process exits first,
/// [`ReadinessError::Cancelled`] on a shutdown request, and
/// [`ReadinessError::Monitor`] if the child cannot be polled.
pub fn await_ready(
    process: &mut ManagedProcess,
    probe: &mut dyn ReadinessProbe,
    timeout: Duration,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<ReadyReport, ReadinessError> {
    let result = poll_until_ready(process, probe, timeout, poll_interval, cancel);
    match &result {
        Ok(_) => process.mark_ready(),
        Err(_) => process.mark_failed(),
    }
    result
}

fn poll_until_ready(
    process: &mut ManagedProcess,
    probe: &mut dyn ReadinessProbe,
    timeout: Duration,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<ReadyReport, ReadinessError> {
    let service = process.name().to_owned();
    let started = Instant::now();
    let deadline = started + timeout;
    let mut last_result = String::from("not probed");
    loop {
        if cancel.is_cancelled() {
            return Err(ReadinessError::Cancelled { service });
        }
        let exited = process
            .try_exit_status()
            .map_err(|source| ReadinessError::Monitor {
                service: service.clone(),
                source,
            })?;
        if let Some(status) = exited {
            return Err(ReadinessError::Exited {
                service,
                exit_status: status.code(),
            });
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(timeout_error(service, probe, timeout, started, last_result));
        }
        match probe.check(remaining) {
            ProbeOutcome::Ready { announced } => {
                return Ok(ReadyReport {
                    service,
                    pid: process.pid(),
                    elapsed: started.elapsed(),
                    announced,
                });
            }
            ProbeOutcome::NotReady { reason } => {
                debug!(
                    target: PIPELINE_TARGET,
                    service = %service,
                    endpoint = %probe.endpoint(),
                    reason = %reason,
                    "service not ready yet"
                );
                last_result = reason;
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(timeout_error(service, probe, timeout, started, last_result));
        }
        if cancel.wait_timeout(poll_interval.min(remaining)) {
            return Err(ReadinessError::Cancelled { service });
        }
    }
}

fn timeout_error(
    service: String,
    probe: &dyn ReadinessProbe,
    timeout: Duration,
    started: Instant,
    last_result: String,
) -> ReadinessError {
    ReadinessError::Timeout {
        service,
        endpoint: probe.endpoint(),
        timeout_ms: timeout.as_millis() as u64,
        elapsed_ms: started.elapsed().as_millis() as u64,
        last_result,
    }
}

/// Probe issuing `GET` requests against a health endpoint.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    url: Url,
    request_timeout: Duration,
}

impl HttpProbe {
    /// Builds a probe for `url` reusing `client`.
    pub fn new(client: Client, url: Url, request_timeout: Duration) -> Self {
        Self {
            client,
            url,
            request_timeout,
        }
    }
}

impl ReadinessProbe for HttpProbe {
    fn endpoint(&self) -> String {
        self.url.to_string()
    }

    fn check(&mut self, budget: Duration) -> ProbeOutcome {
        let timeout = budget.min(self.request_timeout);
        let response = match self.client.get(self.url.clone()).timeout(timeout).send() {
            Ok(response) => response,
            Err(error) => {
                return ProbeOutcome::NotReady {
                    reason: error.to_string(),
                };
            }
        };
        let status = response.status();
        if !status.is_success() {
            return ProbeOutcome::NotReady {
                reason: format!("HTTP {status}"),
            };
        }
        let reported = response
            .json::<Value>()
            .ok()
            .and_then(|body| body.get("status").and_then(Value::as_str).map(str::to_owned));
        debug!(
            target: PIPELINE_TARGET,
            endpoint = %self.url,
            reported = ?reported,
            "health endpoint answered"
        );
        ProbeOutcome::Ready { announced: None }
    }
}

/// Probe scanning a service's output for an announced public URL.
#[derive(Debug)]
pub struct AnnouncedUrlProbe {
    lines: Option<Receiver<String>>,
    suffix: String,
}

impl AnnouncedUrlProbe {
    /// Builds a probe reading `lines` for an `https://` URL ending in `suffix`.
    pub fn new(lines: Option<Receiver<String>>, suffix: impl Into<String>) -> Self {
        Self {
            lines,
            suffix: suffix.into(),
        }
    }
}

impl ReadinessProbe for AnnouncedUrlProbe {
    fn endpoint(&self) -> String {
        format!("announced https URL ending in '{}'", self.suffix)
    }

    fn check(&mut self, _budget: Duration) -> ProbeOutcome {
        let Some(lines) = self.lines.as_ref() else {
            return ProbeOutcome::NotReady {
                reason: String::from("service output is not being captured"),
            };
        };
        loop {
            match lines.try_recv() {
                Ok(line) => {
                    if let Some(url) = find_announced_url(&line, &self.suffix) {
                        return ProbeOutcome::Ready {
                            announced: Some(url),
                        };
                    }
                }
                Err(TryRecvError::Empty) => {
                    return ProbeOutcome::NotReady {
                        reason: String::from("no URL announced yet"),
                    };
                }
                Err(TryRecvError::Disconnected) => {
                    return ProbeOutcome::NotReady {
                        reason: String::from("service output closed"),
                    };
                }
            }
        }
    }
}

/// Extracts an `https://` URL whose host ends in `suffix` from `line`.
///
/// URLs with a path are ignored so API calls echoed in logs are not mistaken
/// for the announced address.
pub(crate) fn find_announced_url(line: &str, suffix: &str) -> Option<String> {
    let host_suffix = suffix.trim_start_matches('.');
    line.split(|c: char| {
        c.is_whitespace() || matches!(c, '|' | '"' | '\'' | '<' | '>' | '(' | ')' | ',')
    })
    .filter(|token| token.starts_with("https://"))
    .find_map(|token| {
        let url = Url::parse(token).ok()?;
        let host = url.host_str()?;
        let matches_suffix = host == host_suffix || host.ends_with(&format!(".{host_suffix}"));
        let bare = url.path() == "/" && url.query().is_none();
        (matches_suffix && bare).then(|| token.trim_end_matches('/').to_owned())
    })
}

/// Production probe factory.
#[derive(Debug, Clone)]
pub struct SystemProbeFactory {
    client: Client,
    request_timeout: Duration,
}

impl SystemProbeFactory {
    /// Builds the factory and its shared HTTP client.
    ///
    /// # Errors
    ///
    /// Returns the client construction error from `reqwest`.
    pub fn new(request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().no_proxy().build()?;
        Ok(Self {
            client,
            request_timeout,
        })
    }
}

impl ProbeFactory for SystemProbeFactory {
    fn probe_for(&self, process: &mut ManagedProcess) -> Box<dyn ReadinessProbe> {
        match process.readiness().clone() {
            Readiness::Http { url } => Box::new(HttpProbe::new(
                self.client.clone(),
                url,
                self.request_timeout,
            )),
            Readiness::AnnouncedUrl { suffix, .. } => {
                Box::new(AnnouncedUrlProbe::new(process.take_announcements(), suffix))
            }
        }
    }
}
