//! Policy enforcement against scripted verification responses.

use std::time::Duration;

use serde_json::json;

use modelsig_core::policy::{REASON_INVALID_FORMAT, REASON_MISSING_DIGEST};
use modelsig_core::profiles::{lenient_policy, secure_policy};
use modelsig_core::{ModelSigError, PolicyConfig, PolicyOverrides};

use crate::support::{client, json_response, make_token, now, verified_body, ScriptedTransport};

fn open(config: PolicyConfig) -> PolicyConfig {
    PolicyConfig {
        fail_closed: false,
        max_token_age: None,
        ..config
    }
}

#[test]
fn malformed_tokens_never_reach_the_network() {
    let transport = ScriptedTransport::responding(vec![]);
    let client = client(&transport);
    let policy = client.policy(open(PolicyConfig::default()));

    for token in ["a.b", "a.b.c.d", "", "a.b.c d", "a..c"] {
        let result = policy.enforce(token).unwrap();
        assert!(!result.allowed());
        assert_eq!(result.reasons(), [REASON_INVALID_FORMAT.to_string()]);
    }
    assert_eq!(transport.call_count(), 0);
}

#[test]
fn malformed_token_fails_closed() {
    let transport = ScriptedTransport::responding(vec![]);
    let client = client(&transport);

    let err = client.policy(PolicyConfig::default()).enforce("a.b").unwrap_err();
    assert_eq!(err.reasons(), Some(&[REASON_INVALID_FORMAT.to_string()][..]));
    assert_eq!(transport.call_count(), 0);
}

#[test]
fn missing_digest_fails_closed() {
    let token = make_token(&json!({"iat": now()}));
    let transport =
        ScriptedTransport::responding(vec![verified_body(json!({"model_id": "m1", "iat": now()}))]);
    let client = client(&transport);
    let config = PolicyConfig {
        require_model_digest: true,
        fail_closed: true,
        ..PolicyConfig::default()
    };

    match client.policy(config).enforce(&token).unwrap_err() {
        ModelSigError::PolicyViolation { reasons, result } => {
            assert_eq!(reasons, vec![REASON_MISSING_DIGEST.to_string()]);
            assert!(!result.allowed());
            assert!(result.verification().is_valid());
        },
        other => panic!("Expected PolicyViolation, got {:?}", other),
    }
}

#[test]
fn missing_digest_fails_open() {
    let token = make_token(&json!({"iat": now()}));
    let transport =
        ScriptedTransport::responding(vec![verified_body(json!({"model_id": "m1"}))]);
    let client = client(&transport);
    let config = open(PolicyConfig {
        require_model_digest: true,
        ..PolicyConfig::default()
    });

    let result = client.policy(config).enforce(&token).unwrap();
    assert!(!result.allowed());
    assert_eq!(result.reasons(), [REASON_MISSING_DIGEST.to_string()]);
}

#[test]
fn satisfied_rules_allow() {
    let token = make_token(&json!({"iat": now()}));
    let transport = ScriptedTransport::responding(vec![verified_body(json!({
        "model_id": "m1",
        "deployment_id": "dep-1",
        "model_digest": "sha256:abc",
    }))]);
    let client = client(&transport);

    let policy = secure_policy(&client, PolicyOverrides::default());
    let result = policy.enforce(&token).unwrap();
    assert!(result.allowed());
    assert!(result.reasons().is_empty());
    assert_eq!(result.verification().provider().unwrap().id, "p1");
}

#[test]
fn provider_allow_list() {
    let token = make_token(&json!({"iat": now()}));
    let body = json_response(
        200,
        json!({
            "valid": true,
            "claims": {"model_id": "m1"},
            "provider": {"id": "p2", "name": "Other"},
        }),
    );
    let transport = ScriptedTransport::responding(vec![body.clone(), body]);
    let client = client(&transport);

    let restricted = open(PolicyConfig::default()).with_allowed_providers(["p1"]);
    let result = client.policy(restricted).enforce(&token).unwrap();
    assert_eq!(result.reasons(), ["provider 'p2' is not in allowed list".to_string()]);

    let result = client.policy(open(PolicyConfig::default())).enforce(&token).unwrap();
    assert!(result.allowed());
}

#[test]
fn token_age_limit() {
    let transport = ScriptedTransport::responding(vec![
        verified_body(json!({"model_id": "m1"})),
        verified_body(json!({"model_id": "m1"})),
    ]);
    let client = client(&transport);
    let config = PolicyConfig {
        max_token_age: Some(Duration::from_secs(300)),
        fail_closed: false,
        ..PolicyConfig::default()
    };
    let policy = client.policy(config);

    let old = make_token(&json!({"iat": now() - 400}));
    let result = policy.enforce(&old).unwrap();
    assert_eq!(result.reasons().len(), 1);
    assert!(result.reasons()[0].starts_with("token is too old:"));

    let fresh = make_token(&json!({"iat": now() - 100}));
    assert!(policy.enforce(&fresh).unwrap().allowed());
}

#[test]
fn server_rejection_is_single_reason() {
    let token = make_token(&json!({"iat": now()}));
    let transport = ScriptedTransport::responding(vec![json_response(
        200,
        json!({"valid": false, "error": "Signature mismatch"}),
    )]);
    let client = client(&transport);

    let policy = lenient_policy(
        &client,
        PolicyOverrides {
            require_model_digest: Some(true),
            ..PolicyOverrides::default()
        },
    );
    let result = policy.enforce(&token).unwrap();
    assert_eq!(
        result.reasons(),
        ["token verification failed: Signature mismatch".to_string()]
    );
}

#[test]
fn bundle_requirement() {
    let token = make_token(&json!({"iat": now()}));
    let transport = ScriptedTransport::responding(vec![
        json_response(
            200,
            json!({
                "valid": true,
                "claims": {"model_id": "m1"},
                "bundle_check": {"status": "failed", "last_checked": "2026-01-01T00:00:00Z"},
            }),
        ),
        json_response(
            200,
            json!({
                "valid": true,
                "claims": {"model_id": "m1"},
                "bundle_check": {"status": "verified"},
            }),
        ),
    ]);
    let client = client(&transport);
    let policy = client.policy(open(PolicyConfig {
        require_bundle_verification: true,
        ..PolicyConfig::default()
    }));

    assert_eq!(
        policy.enforce(&token).unwrap().reasons(),
        ["bundle verification failed: status is 'failed'".to_string()]
    );
    assert!(policy.enforce(&token).unwrap().allowed());
}

#[test]
fn bind_response_round_trip() {
    let token = make_token(&json!({"iat": now()}));
    let transport = ScriptedTransport::responding(vec![json_response(
        200,
        json!({"bound": true, "response_hash": modelsig_core::hash_response("hi")}),
    )]);
    let client = client(&transport);

    let ack = client
        .policy(PolicyConfig::default())
        .bind_response(&token, "hi")
        .unwrap();
    assert_eq!(ack["response_hash"], modelsig_core::hash_response("hi"));
    assert!(transport.requests()[0].url.ends_with("/bind-response"));
}
