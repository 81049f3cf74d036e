//! Retry schedule, status classification, and request headers.

use std::time::Duration;

use serde_json::json;

use modelsig_core::{CancellationToken, HttpResponse, Method, ModelSigError, TransportError};

use crate::support::{executor, json_response, RecordingSleeper, ScriptedTransport};

#[test]
fn persistent_503_exhausts_three_attempts() {
    let transport = ScriptedTransport::responding(vec![
        HttpResponse::new(503, "unavailable"),
        HttpResponse::new(503, "unavailable"),
        HttpResponse::new(503, "unavailable"),
    ]);
    let sleeper = RecordingSleeper::new();

    let err = executor(&transport, &sleeper)
        .execute(Method::Get, "/api/v1/jwt/verify/x", None)
        .unwrap_err();

    assert!(matches!(err, ModelSigError::Network { .. }), "got {:?}", err);
    assert_eq!(transport.call_count(), 3);

    let total = sleeper.total();
    assert!(total >= Duration::from_millis(3_500), "total sleep {:?}", total);
    assert!(total <= Duration::from_millis(10_500), "total sleep {:?}", total);
}

#[test]
fn each_sleep_is_jittered_base_delay() {
    let transport = ScriptedTransport::new(vec![
        Err(TransportError::new("reset")),
        Err(TransportError::new("reset")),
        Err(TransportError::new("reset")),
    ]);
    let sleeper = RecordingSleeper::new();

    let err = executor(&transport, &sleeper)
        .execute(Method::Get, "/api/v1/anything", None)
        .unwrap_err();
    assert!(err.is_retryable());

    let bases = [1.0_f64, 2.0, 4.0];
    let sleeps = sleeper.sleeps();
    assert_eq!(sleeps.len(), 3);
    for (sleep, base) in sleeps.iter().zip(bases) {
        let secs = sleep.as_secs_f64();
        assert!(secs >= base * 0.5 && secs < base * 1.5, "{} outside jitter of {}", secs, base);
    }
}

#[test]
fn recovers_after_transient_failure() {
    let transport = ScriptedTransport::responding(vec![
        HttpResponse::new(502, "bad gateway"),
        json_response(200, json!({"ok": true})),
    ]);
    let sleeper = RecordingSleeper::new();

    let value = executor(&transport, &sleeper)
        .execute(Method::Get, "/api/v1/x", None)
        .unwrap();
    assert_eq!(value["ok"], true);
    assert_eq!(sleeper.sleeps().len(), 1);
}

#[test]
fn authentication_is_not_retried() {
    for status in [401, 403] {
        let transport =
            ScriptedTransport::responding(vec![json_response(status, json!({"detail": "nope"}))]);
        let sleeper = RecordingSleeper::new();

        let err = executor(&transport, &sleeper)
            .execute(Method::Post, "/api/v1/create-verification", Some(&json!({})))
            .unwrap_err();
        assert!(matches!(err, ModelSigError::Authentication { .. }));
        assert_eq!(transport.call_count(), 1);
        assert!(sleeper.sleeps().is_empty());
    }
}

#[test]
fn unprocessable_entity_joins_errors() {
    let transport = ScriptedTransport::responding(vec![json_response(
        422,
        json!({"errors": ["model_id is required", "bad fingerprint"]}),
    )]);
    let err = executor(&transport, &RecordingSleeper::new())
        .execute(Method::Post, "/api/v1/create-verification", Some(&json!({})))
        .unwrap_err();

    match err {
        ModelSigError::Validation { message } => {
            assert!(message.contains("model_id is required; bad fingerprint"), "{}", message);
        },
        other => panic!("Expected Validation, got {:?}", other),
    }
}

#[test]
fn rate_limit_honours_retry_after() {
    let transport = ScriptedTransport::responding(vec![
        HttpResponse::new(429, "slow down").with_header("Retry-After", "7"),
        json_response(200, json!({"ok": true})),
    ]);
    let sleeper = RecordingSleeper::new();

    executor(&transport, &sleeper)
        .execute(Method::Get, "/api/v1/x", None)
        .unwrap();
    assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(7)]);
}

#[test]
fn rate_limit_wait_is_capped() {
    let transport = ScriptedTransport::responding(vec![
        HttpResponse::new(429, "").with_header("Retry-After", "86400"),
        json_response(200, json!({"ok": true})),
    ]);
    let sleeper = RecordingSleeper::new();

    executor(&transport, &sleeper)
        .execute(Method::Get, "/api/v1/x", None)
        .unwrap();
    assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(60)]);
}

#[test]
fn rate_limit_on_last_attempt_returns_immediately() {
    let transport = ScriptedTransport::responding(vec![
        HttpResponse::new(429, "").with_header("retry-after", "2"),
        HttpResponse::new(429, "").with_header("retry-after", "2"),
        HttpResponse::new(429, "").with_header("retry-after", "9"),
    ]);
    let sleeper = RecordingSleeper::new();

    let err = executor(&transport, &sleeper)
        .execute(Method::Get, "/api/v1/x", None)
        .unwrap_err();

    assert_eq!(err.retry_after(), Some(9));
    assert_eq!(transport.call_count(), 3);
    assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(2), Duration::from_secs(2)]);
}

#[test]
fn cancellation_stops_before_next_attempt() {
    let transport = ScriptedTransport::responding(vec![HttpResponse::new(503, "")]);
    let sleeper = RecordingSleeper::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = executor(&transport, &sleeper)
        .execute_cancellable(Method::Get, "/api/v1/x", None, Some(&cancel))
        .unwrap_err();
    assert!(matches!(err, ModelSigError::Cancelled));
    assert_eq!(transport.call_count(), 0);
}

#[test]
fn headers_carry_key_and_fresh_request_ids() {
    let transport = ScriptedTransport::responding(vec![
        HttpResponse::new(500, "boom"),
        json_response(200, json!({})),
    ]);
    executor(&transport, &RecordingSleeper::new())
        .execute(Method::Post, "/api/v1/x", Some(&json!({"a": 1})))
        .unwrap();

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    for request in &requests {
        assert_eq!(request.header("X-API-Key"), Some("test-key"));
        assert_eq!(request.header("Content-Type"), Some("application/json"));
        assert!(request.header("User-Agent").unwrap().starts_with("modelsig-rust/"));
        assert_eq!(request.url, "https://api.test/api/v1/x");
    }
    let first = requests[0].header("X-Request-ID").unwrap();
    let second = requests[1].header("X-Request-ID").unwrap();
    assert_ne!(first, second);
}
