//! Smoke test for a running deployment.
//!
//! The check walks the same path a client of the public API would: both
//! health endpoints, then an assistant, a thread, and one run per sample
//! query. The first failing step ends the check and is named in the error.

use std::time::Duration;

use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info};

const VERIFY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::verify");

/// Queries sent to the deployed assistant.
pub const SAMPLE_QUERIES: [&str; 3] = [
    "What is 15 plus 27?",
    "What is 100 minus 37?",
    "What is 8 times 9?",
];

/// Name given to the assistant created by the check.
pub const ASSISTANT_NAME: &str = "stackup verify";

/// Errors raised by the deployment check.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    /// The request did not complete.
    #[error("{step}: request to {url} failed: {source}")]
    Request {
        /// Step that failed.
        step: String,
        /// Requested URL.
        url: String,
        /// Transport error.
        #[source]
        source: reqwest::Error,
    },
    /// The server answered with a non-success status.
    #[error("{step}: {url} returned HTTP {status}")]
    Status {
        /// Step that failed.
        step: String,
        /// Requested URL.
        url: String,
        /// Status code received.
        status: u16,
    },
    /// The response body did not have the expected shape.
    #[error("{step}: unexpected response from {url}: {source}")]
    Decode {
        /// Step that failed.
        step: String,
        /// Requested URL.
        url: String,
        /// Decoding error.
        #[source]
        source: reqwest::Error,
    },
    /// A run finished without success.
    #[error("{step}: run finished with status '{status}': {detail}")]
    RunFailed {
        /// Step that failed.
        step: String,
        /// Status reported by the API.
        status: String,
        /// Error detail reported by the API.
        detail: String,
    },
}

/// Result of one sample query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Query sent.
    pub query: String,
    /// Last message recorded on the thread after the run.
    pub answer: Option<String>,
}

/// Summary of a successful check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    /// Assistant created for the check.
    pub assistant_id: String,
    /// Thread the queries ran on.
    pub thread_id: String,
    /// Outcome per query, in order.
    pub runs: Vec<RunOutcome>,
}

#[derive(Debug, Deserialize)]
struct AssistantCreated {
    assistant_id: String,
}

#[derive(Debug, Deserialize)]
struct ThreadCreated {
    thread_id: String,
}

#[derive(Debug, Deserialize)]
struct RunFinished {
    status: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ThreadState {
    values: ThreadValues,
}

#[derive(Debug, Deserialize)]
struct ThreadValues {
    #[serde(default)]
    messages: Vec<ThreadMessage>,
}

#[derive(Debug, Deserialize)]
struct ThreadMessage {
    #[serde(default)]
    content: Value,
}

/// Client for the deployment check.
#[derive(Debug, Clone)]
pub struct DeploymentVerifier {
    client: Client,
    tool_server: String,
    api_shim: String,
    health_timeout: Duration,
}

impl DeploymentVerifier {
    /// Builds a verifier for the given base URLs.
    ///
    /// `run_timeout` bounds every request; health checks use the shorter
    /// `health_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::Client`] when the HTTP client cannot be built.
    pub fn new(
        tool_server: &str,
        api_shim: &str,
        health_timeout: Duration,
        run_timeout: Duration,
    ) -> Result<Self, VerifyError> {
        let client = Client::builder()
            .timeout(run_timeout)
            .build()
            .map_err(VerifyError::Client)?;
        Ok(Self {
            client,
            tool_server: tool_server.trim_end_matches('/').to_owned(),
            api_shim: api_shim.trim_end_matches('/').to_owned(),
            health_timeout,
        })
    }

    /// Runs every step against the deployment.
    ///
    /// # Errors
    ///
    /// Returns the [`VerifyError`] of the first failing step.
    pub fn verify(&self, queries: &[&str]) -> Result<VerifyReport, VerifyError> {
        self.check_health("tool server health", &self.tool_server)?;
        self.check_health("compatibility API health", &self.api_shim)?;

        let assistant: AssistantCreated = self.post(
            "create assistant",
            &format!("{}/assistants", self.api_shim),
            &json!({ "name": ASSISTANT_NAME }),
        )?;
        info!(
            target: VERIFY_TARGET,
            assistant_id = %assistant.assistant_id,
            "assistant created"
        );
        let thread: ThreadCreated = self.post(
            "create thread",
            &format!("{}/threads", self.api_shim),
            &json!({}),
        )?;
        info!(target: VERIFY_TARGET, thread_id = %thread.thread_id, "thread created");

        let runs = queries
            .iter()
            .enumerate()
            .map(|(index, query)| {
                self.run_query(index + 1, query, &assistant.assistant_id, &thread.thread_id)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(VerifyReport {
            assistant_id: assistant.assistant_id,
            thread_id: thread.thread_id,
            runs,
        })
    }

    fn check_health(&self, step: &str, base: &str) -> Result<(), VerifyError> {
        let url = format!("{base}/health");
        let response = self
            .client
            .get(&url)
            .timeout(self.health_timeout)
            .send()
            .map_err(|source| VerifyError::Request {
                step: step.to_owned(),
                url: url.clone(),
                source,
            })?;
        let response = ensure_success(step, &url, response)?;
        let body = response.json::<Value>().ok();
        debug!(target: VERIFY_TARGET, url = %url, body = ?body, "health check passed");
        Ok(())
    }

    fn run_query(
        &self,
        number: usize,
        query: &str,
        assistant_id: &str,
        thread_id: &str,
    ) -> Result<RunOutcome, VerifyError> {
        let step = format!("run {number} ({query})");
        let run: RunFinished = self.post(
            &step,
            &format!("{}/threads/{thread_id}/runs", self.api_shim),
            &json!({
                "assistant_id": assistant_id,
                "input": { "messages": [{ "role": "user", "content": query }] },
            }),
        )?;
        if run.status != "success" {
            return Err(VerifyError::RunFailed {
                step,
                status: run.status,
                detail: run.error.unwrap_or_else(|| String::from("no detail given")),
            });
        }

        let state: ThreadState = self.get(
            &format!("{step} state"),
            &format!("{}/threads/{thread_id}/state", self.api_shim),
        )?;
        let answer = state
            .values
            .messages
            .last()
            .map(|message| match &message.content {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            });
        info!(
            target: VERIFY_TARGET,
            query,
            answer = answer.as_deref().unwrap_or(""),
            "run succeeded"
        );
        Ok(RunOutcome {
            query: query.to_owned(),
            answer,
        })
    }

    fn post<T: DeserializeOwned>(
        &self,
        step: &str,
        url: &str,
        body: &Value,
    ) -> Result<T, VerifyError> {
        let response = self.client.post(url).json(body).send();
        decode(step, url, response)
    }

    fn get<T: DeserializeOwned>(&self, step: &str, url: &str) -> Result<T, VerifyError> {
        let response = self.client.get(url).send();
        decode(step, url, response)
    }
}

fn decode<T: DeserializeOwned>(
    step: &str,
    url: &str,
    response: reqwest::Result<Response>,
) -> Result<T, VerifyError> {
    let response = response.map_err(|source| VerifyError::Request {
        step: step.to_owned(),
        url: url.to_owned(),
        source,
    })?;
    ensure_success(step, url, response)?
        .json::<T>()
        .map_err(|source| VerifyError::Decode {
            step: step.to_owned(),
            url: url.to_owned(),
            source,
        })
}

fn ensure_success(step: &str, url: &str, response: Response) -> Result<Response, VerifyError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(VerifyError::Status {
            step: step.to_owned(),
            url: url.to_owned(),
            status: status.as_u16(),
        })
    }
}
