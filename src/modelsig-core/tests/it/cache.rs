//! Token cache behavior through the client.

use std::sync::Arc;
use std::thread;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;

use modelsig_core::{CacheKey, HttpResponse};

use crate::support::{client, json_response, ScriptedTransport};

fn issued(token: &str, created_at: Option<String>, expires_in: u64) -> HttpResponse {
    let mut body = json!({
        "verification_url": format!("https://modelsignature.test/v/{}", token),
        "token": token,
        "expires_in": expires_in,
    });
    if let Some(created) = created_at {
        body["created_at"] = json!(created);
    }
    json_response(200, body)
}

#[test]
fn repeated_create_reuses_token() {
    let transport = ScriptedTransport::responding(vec![issued(
        "tok-1",
        Some(Utc::now().to_rfc3339()),
        600,
    )]);
    let client = client(&transport);

    let first = client.create_verification("model-a", "user-1", None).unwrap();
    let second = client.create_verification("model-a", "user-1", None).unwrap();

    assert_eq!(first.token, "tok-1");
    assert_eq!(second.token, first.token);
    assert_eq!(transport.call_count(), 1);
}

#[test]
fn expired_token_is_reissued() {
    let stale = (Utc::now() - ChronoDuration::seconds(1_000)).to_rfc3339();
    let transport = ScriptedTransport::responding(vec![
        issued("old", Some(stale), 600),
        issued("new", Some(Utc::now().to_rfc3339()), 600),
    ]);
    let client = client(&transport);

    assert_eq!(client.create_verification("m", "fp", None).unwrap().token, "old");
    assert!(client.cache().is_empty());
    assert_eq!(client.cache().purge_expired(), 0);

    assert_eq!(client.create_verification("m", "fp", None).unwrap().token, "new");
    assert_eq!(client.cache().len(), 1);
    assert_eq!(transport.call_count(), 2);
}

#[test]
fn naive_created_at_is_read_as_utc() {
    let naive = Utc::now().naive_utc().format("%Y-%m-%dT%H:%M:%S%.6f").to_string();
    let transport = ScriptedTransport::responding(vec![issued("tok", Some(naive), 600)]);
    let client = client(&transport);

    client.create_verification("m", "fp", None).unwrap();
    client.create_verification("m", "fp", None).unwrap();
    assert_eq!(transport.call_count(), 1);
}

#[test]
fn missing_created_at_is_never_reused() {
    let transport = ScriptedTransport::responding(vec![
        issued("a", None, 600),
        issued("b", None, 600),
    ]);
    let client = client(&transport);

    assert_eq!(client.create_verification("m", "fp", None).unwrap().token, "a");
    assert_eq!(client.create_verification("m", "fp", None).unwrap().token, "b");
}

#[test]
fn keys_distinguish_model_and_fingerprint() {
    let created = Utc::now().to_rfc3339();
    let transport = ScriptedTransport::responding(vec![
        issued("a", Some(created.clone()), 600),
        issued("b", Some(created.clone()), 600),
        issued("c", Some(created), 600),
    ]);
    let client = client(&transport);

    client.create_verification("m1", "fp", None).unwrap();
    client.create_verification("m2", "fp", None).unwrap();
    client.create_verification("m1", "other", None).unwrap();
    assert_eq!(transport.call_count(), 3);
    assert_eq!(client.cache().len(), 3);

    client.cache().invalidate(&CacheKey::new("m1", "fp"));
    assert_eq!(client.cache().len(), 2);
}

#[test]
fn failed_create_is_not_cached() {
    let transport = ScriptedTransport::responding(vec![
        json_response(401, json!({"detail": "Invalid API key"})),
        issued("ok", Some(Utc::now().to_rfc3339()), 600),
    ]);
    let client = client(&transport);

    assert!(client.create_verification("m", "fp", None).is_err());
    assert!(client.cache().is_empty());
    assert_eq!(client.create_verification("m", "fp", None).unwrap().token, "ok");
}

#[test]
fn concurrent_callers_share_one_create() {
    let transport = ScriptedTransport::responding(vec![issued(
        "shared",
        Some(Utc::now().to_rfc3339()),
        600,
    )]);
    let client = Arc::new(client(&transport));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let client = Arc::clone(&client);
            thread::spawn(move || client.create_verification("m", "fp", None).unwrap().token)
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), "shared");
    }
    assert_eq!(transport.call_count(), 1);
}
