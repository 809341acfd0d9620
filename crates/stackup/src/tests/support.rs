//! Shared fixtures: scripted probes, service specs, a recording reporter, and
//! a loopback HTTP responder.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use url::Url;

use crate::pipeline::{
    ManagedProcess, PipelineError, PipelineReporter, ProbeFactory, ProbeOutcome, Readiness,
    ReadinessProbe, ServiceSpec, TerminationError, TerminationOutcome,
};

pub(crate) fn http_spec(name: &str, command: &str) -> ServiceSpec {
    let url = Url::parse("http://127.0.0.1:9/health").expect("valid url");
    ServiceSpec::new(name, command, Readiness::Http { url })
}

pub(crate) fn announced_spec(name: &str, command: &str, export_as: &str) -> ServiceSpec {
    ServiceSpec::new(
        name,
        command,
        Readiness::AnnouncedUrl {
            suffix: String::from(".trycloudflare.com"),
            export_as: Some(export_as.to_owned()),
        },
    )
}

/// Probe factory whose answers are decided per service name.
#[derive(Debug, Default)]
pub(crate) struct ScriptedProbes {
    never_ready: BTreeSet<String>,
    announced: BTreeMap<String, String>,
}

impl ScriptedProbes {
    pub(crate) fn all_ready() -> Self {
        Self::default()
    }

    pub(crate) fn never_ready(mut self, service: &str) -> Self {
        self.never_ready.insert(service.to_owned());
        self
    }

    pub(crate) fn announcing(mut self, service: &str, url: &str) -> Self {
        self.announced.insert(service.to_owned(), url.to_owned());
        self
    }
}

impl ProbeFactory for ScriptedProbes {
    fn probe_for(&self, process: &mut ManagedProcess) -> Box<dyn ReadinessProbe> {
        Box::new(ScriptedProbe {
            endpoint: process.readiness().to_string(),
            ready: !self.never_ready.contains(process.name()),
            announced: self.announced.get(process.name()).cloned(),
        })
    }
}

struct ScriptedProbe {
    endpoint: String,
    ready: bool,
    announced: Option<String>,
}

impl ReadinessProbe for ScriptedProbe {
    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    fn check(&mut self, _budget: Duration) -> ProbeOutcome {
        if self.ready {
            ProbeOutcome::Ready {
                announced: self.announced.clone(),
            }
        } else {
            ProbeOutcome::NotReady {
                reason: String::from("connection refused"),
            }
        }
    }
}

/// Reporter that records event names for assertions.
#[derive(Debug, Default)]
pub(crate) struct RecordingReporter {
    events: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub(crate) fn events(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn record(&self, event: String) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(event);
    }
}

impl PipelineReporter for RecordingReporter {
    fn service_launching(&self, service: &str, _command: &str) {
        self.record(format!("launching {service}"));
    }

    fn service_ready(&self, service: &str, _pid: u32, _elapsed: Duration) {
        self.record(format!("ready {service}"));
    }

    fn service_failed(&self, service: &str, _error: &PipelineError) {
        self.record(format!("failed {service}"));
    }

    fn service_stopping(&self, service: &str, _pid: u32) {
        self.record(format!("stopping {service}"));
    }

    fn service_stopped(&self, service: &str, _outcome: TerminationOutcome) {
        self.record(format!("stopped {service}"));
    }

    fn termination_failed(&self, error: &TerminationError) {
        self.record(format!("termination failed: {error}"));
    }
}

/// A request received by [`StubServer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RecordedRequest {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) body: String,
}

#[derive(Debug, Clone)]
struct StubRoute {
    method: &'static str,
    path: String,
    status: u16,
    body: String,
}

/// Minimal HTTP/1.1 responder on a loopback port.
///
/// Each connection serves one request and is closed. Unknown routes answer
/// 404. The accept thread lives until the test binary exits.
#[derive(Debug, Default)]
pub(crate) struct StubServer {
    routes: Vec<StubRoute>,
}

/// Handle to a running [`StubServer`].
#[derive(Debug, Clone)]
pub(crate) struct RunningStub {
    port: u16,
    base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl RunningStub {
    pub(crate) const fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl StubServer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn route(
        mut self,
        method: &'static str,
        path: &str,
        status: u16,
        body: impl Into<String>,
    ) -> Self {
        self.routes.push(StubRoute {
            method,
            path: path.to_owned(),
            status,
            body: body.into(),
        });
        self
    }

    pub(crate) fn start(self) -> RunningStub {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
        let port = listener.local_addr().expect("listener address").port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);
        let routes = self.routes;
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                serve(stream, &routes, &recorded);
            }
        });
        RunningStub {
            port,
            base_url: format!("http://127.0.0.1:{port}"),
            requests,
        }
    }
}

fn serve(mut stream: TcpStream, routes: &[StubRoute], recorded: &Mutex<Vec<RecordedRequest>>) {
    let Some(request) = read_request(&stream) else {
        return;
    };
    let route = routes
        .iter()
        .find(|route| route.method == request.method && route.path == request.path);
    let (status, body) = route.map_or((404, String::from("{\"error\":\"not found\"}")), |route| {
        (route.status, route.body.clone())
    });
    recorded
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .push(request);
    let response = format!(
        "HTTP/1.1 {status} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

fn read_request(stream: &TcpStream) -> Option<RecordedRequest> {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).ok()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_owned();
    let path = parts.next()?.to_owned();

    let mut content_length = 0usize;
    loop {
        let mut header = String::new();
        if reader.read_line(&mut header).ok()? == 0 {
            break;
        }
        let header = header.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':')
            && name.eq_ignore_ascii_case("content-length")
        {
            content_length = value.trim().parse().unwrap_or(0);
        }
    }
    let mut body = vec![0; content_length];
    reader.read_exact(&mut body).ok()?;
    Some(RecordedRequest {
        method,
        path,
        body: String::from_utf8_lossy(&body).into_owned(),
    })
}
