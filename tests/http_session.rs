//! End-to-end tests driving the reqwest transport against a local mock server.

use std::time::{Duration, Instant};

use gtmetrix::{
    BlockingTransport, Credentials, DecodePolicy, SessionError, TestReference, TestSession,
    TestState, WaitOptions,
};
use mockito::{Matcher, Server};
use serde_json::json;

const AUTH_HEADER: &str = "Basic Y2lAZXhhbXBsZS5jb206dGVzdC1rZXk=";

fn session_for(server: &Server) -> TestSession {
    let transport = BlockingTransport::new("gtmetrix-tests", Duration::from_secs(5))
        .expect("failed to build transport");
    TestSession::new(
        transport,
        Credentials::new("ci@example.com", "test-key"),
        format!("{}/api/0.1/", server.url()),
    )
}

fn quick_wait() -> WaitOptions {
    WaitOptions {
        poll_interval: Duration::from_millis(10),
        overall_timeout: Duration::from_secs(5),
    }
}

#[test]
fn submit_sends_basic_auth_and_form_body() {
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/api/0.1/test")
        .match_header("authorization", AUTH_HEADER)
        .match_header("content-type", "application/x-www-form-urlencoded")
        .match_body(Matcher::UrlEncoded("url".into(), "https://example.com/?a=1&b=2".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "test_id": "Zt3kQ",
                "poll_state_url": format!("{}/api/0.1/test/Zt3kQ", server.url()),
                "credits_left": 17,
                "error": ""
            })
            .to_string(),
        )
        .create();

    let session = session_for(&server);
    let reference = session.submit("https://example.com/?a=1&b=2").unwrap();

    mock.assert();
    assert_eq!(reference.test_id, "Zt3kQ");
    assert_eq!(reference.credits_left, 17);
    assert!(reference.error.is_none());
}

#[test]
fn submit_and_wait_returns_completed_results() {
    let mut server = Server::new();
    let submit = server
        .mock("POST", "/api/0.1/test")
        .with_status(200)
        .with_body(json!({"test_id": "Zt3kQ", "credits_left": 16}).to_string())
        .create();
    let poll = server
        .mock("GET", "/api/0.1/test/Zt3kQ")
        .match_header("authorization", AUTH_HEADER)
        .with_status(200)
        .with_body(
            json!({
                "state": "completed",
                "error": "",
                "results": {
                    "report_url": "https://gtmetrix.com/reports/example.com/Zt3kQ",
                    "pagespeed_score": 88,
                    "yslow_score": 74,
                    "html_bytes": 20480,
                    "page_elements": 63,
                    "fully_loaded_time": 3120,
                    "rum_speed_index": 1450
                },
                "resources": {
                    "screenshot": "https://gtmetrix.com/api/0.1/test/Zt3kQ/screenshot",
                    "har": "https://gtmetrix.com/api/0.1/test/Zt3kQ/har",
                    "video": ""
                }
            })
            .to_string(),
        )
        .expect(1)
        .create();

    let session = session_for(&server);
    let snapshot = session
        .submit_and_wait("https://example.com", quick_wait())
        .unwrap();

    submit.assert();
    poll.assert();
    assert_eq!(snapshot.test_state(), TestState::Completed);
    let (metrics, resources) = snapshot.completed_results().unwrap();
    assert_eq!(metrics.pagespeed_score, 88);
    assert_eq!(metrics.page_elements, 63);
    assert_eq!(metrics.rum_speed_index, 1450);
    assert_eq!(resources.links().len(), 2);
}

#[test]
fn rejected_submission_never_polls() {
    let mut server = Server::new();
    let submit = server
        .mock("POST", "/api/0.1/test")
        .with_status(403)
        .with_body(json!({"error": "Invalid e-mail and/or API key", "credits_left": 0}).to_string())
        .create();
    let poll = server
        .mock("GET", Matcher::Regex(r"^/api/0\.1/test/.*$".into()))
        .expect(0)
        .create();

    let session = session_for(&server);
    let err = session
        .submit_and_wait("https://example.com", quick_wait())
        .unwrap_err();

    submit.assert();
    poll.assert();
    match err {
        SessionError::Remote { message, reference } => {
            assert_eq!(message, "Invalid e-mail and/or API key");
            assert_eq!(reference.credits_left, 0);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn processing_forever_times_out() {
    let mut server = Server::new();
    let poll = server
        .mock("GET", "/api/0.1/test/slow")
        .with_status(200)
        .with_body(json!({"state": "processing"}).to_string())
        .expect_at_least(2)
        .create();

    let session = session_for(&server);
    let options = WaitOptions {
        poll_interval: Duration::from_millis(25),
        overall_timeout: Duration::from_millis(150),
    };
    let started = Instant::now();
    let err = session
        .wait_for_completion(&TestReference::from_test_id("slow"), options)
        .unwrap_err();

    poll.assert();
    assert!(err.is_timeout(), "unexpected error: {err:?}");
    assert!(started.elapsed() >= options.overall_timeout);
}

#[test]
fn unreachable_service_is_a_transport_error() {
    let transport = BlockingTransport::new("gtmetrix-tests", Duration::from_secs(2)).unwrap();
    let session = TestSession::new(
        transport,
        Credentials::new("ci@example.com", "test-key"),
        "http://127.0.0.1:1/api/0.1/",
    );
    let err = session.submit("https://example.com").unwrap_err();
    assert!(matches!(err, SessionError::Transport(_)), "unexpected error: {err:?}");
}

#[test]
fn html_error_page_respects_decode_policy() {
    let mut server = Server::new();
    let _poll = server
        .mock("GET", "/api/0.1/test/Zt3kQ")
        .with_status(502)
        .with_header("content-type", "text/html")
        .with_body("<html><body>Bad Gateway</body></html>")
        .create();

    let reference = TestReference::from_test_id("Zt3kQ");

    let permissive = session_for(&server);
    let snapshot = permissive.poll(&reference).unwrap();
    assert!(snapshot.state.is_empty());

    let strict = session_for(&server).with_decode_policy(DecodePolicy::Strict);
    let err = strict.poll(&reference).unwrap_err();
    assert!(matches!(err, SessionError::Decode { .. }), "unexpected error: {err:?}");
}
