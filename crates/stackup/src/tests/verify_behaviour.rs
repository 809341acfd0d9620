//! Behaviour of the deployment check against a loopback API.

use std::time::Duration;

use rstest::{fixture, rstest};
use serde_json::Value;

use super::support::{RunningStub, StubServer};
use crate::verify::{ASSISTANT_NAME, DeploymentVerifier, SAMPLE_QUERIES, VerifyError};

fn healthy_api() -> StubServer {
    StubServer::new()
        .route("GET", "/health", 200, r#"{"status":"healthy"}"#)
        .route("POST", "/assistants", 200, r#"{"assistant_id":"asst_1"}"#)
        .route("POST", "/threads", 200, r#"{"thread_id":"thread_1"}"#)
}

#[fixture]
fn passing_deployment() -> RunningStub {
    healthy_api()
        .route(
            "POST",
            "/threads/thread_1/runs",
            200,
            r#"{"run_id":"run_1","status":"success"}"#,
        )
        .route(
            "GET",
            "/threads/thread_1/state",
            200,
            r#"{"values":{"messages":[{"role":"user","content":"q"},{"role":"assistant","content":"42"}]}}"#,
        )
        .start()
}

fn verifier(stub: &RunningStub) -> DeploymentVerifier {
    DeploymentVerifier::new(
        stub.base_url(),
        stub.base_url(),
        Duration::from_secs(2),
        Duration::from_secs(5),
    )
    .expect("build verifier")
}

#[rstest]
fn passing_deployment_reports_every_run(passing_deployment: RunningStub) {
    let report = verifier(&passing_deployment)
        .verify(&SAMPLE_QUERIES)
        .expect("deployment passes");

    assert_eq!(report.assistant_id, "asst_1");
    assert_eq!(report.thread_id, "thread_1");
    assert_eq!(report.runs.len(), SAMPLE_QUERIES.len());
    assert!(
        report
            .runs
            .iter()
            .all(|run| run.answer.as_deref() == Some("42"))
    );
}

#[rstest]
fn runs_carry_the_assistant_and_query(passing_deployment: RunningStub) {
    verifier(&passing_deployment)
        .verify(&["What is 2 plus 2?"])
        .expect("deployment passes");

    let requests = passing_deployment.requests();
    let paths: Vec<(&str, &str)> = requests
        .iter()
        .map(|request| (request.method.as_str(), request.path.as_str()))
        .collect();
    assert_eq!(
        paths,
        [
            ("GET", "/health"),
            ("GET", "/health"),
            ("POST", "/assistants"),
            ("POST", "/threads"),
            ("POST", "/threads/thread_1/runs"),
            ("GET", "/threads/thread_1/state"),
        ]
    );

    let assistant: Value = serde_json::from_str(&requests[2].body).expect("assistant body");
    assert_eq!(assistant["name"], ASSISTANT_NAME);
    let run: Value = serde_json::from_str(&requests[4].body).expect("run body");
    assert_eq!(run["assistant_id"], "asst_1");
    assert_eq!(run["input"]["messages"][0]["role"], "user");
    assert_eq!(run["input"]["messages"][0]["content"], "What is 2 plus 2?");
}

#[test]
fn unhealthy_service_stops_the_check_before_any_request() {
    let stub = StubServer::new()
        .route("GET", "/health", 503, r#"{"status":"starting"}"#)
        .start();

    let error = verifier(&stub)
        .verify(&SAMPLE_QUERIES)
        .expect_err("health fails");

    match error {
        VerifyError::Status { step, status, .. } => {
            assert_eq!(step, "tool server health");
            assert_eq!(status, 503);
        }
        other => panic!("expected status error, got {other:?}"),
    }
    assert_eq!(stub.requests().len(), 1);
}

#[test]
fn failed_run_names_the_query() {
    let stub = healthy_api()
        .route(
            "POST",
            "/threads/thread_1/runs",
            200,
            r#"{"run_id":"run_1","status":"error","error":"model unavailable"}"#,
        )
        .start();

    let error = verifier(&stub)
        .verify(&SAMPLE_QUERIES)
        .expect_err("run fails");

    let message = error.to_string();
    assert!(message.contains("run 1 (What is 15 plus 27?)"), "{message}");
    assert!(message.contains("model unavailable"), "{message}");
}

#[test]
fn malformed_response_is_reported_as_decode_error() {
    let stub = StubServer::new()
        .route("GET", "/health", 200, r#"{"status":"healthy"}"#)
        .route("POST", "/assistants", 200, "{}")
        .start();

    let error = verifier(&stub)
        .verify(&SAMPLE_QUERIES)
        .expect_err("assistant id missing");

    assert!(matches!(
        error,
        VerifyError::Decode { ref step, .. } if step == "create assistant"
    ));
}
