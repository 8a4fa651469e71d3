mod auth_support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use connector_auth::auth::{
    Credential, MemorySecretStore, Session, SessionStore, TokenRefreshGate,
};
use connector_auth::config::RefreshPolicy;
use connector_auth::error::AuthError;
use pretty_assertions::assert_eq;

use auth_support::{demo_provider, subject, CountingExchange, ScriptedPrompter};

struct Harness {
    gate: Arc<TokenRefreshGate>,
    exchange: Arc<CountingExchange>,
    sessions: Arc<SessionStore>,
    prompter: Arc<ScriptedPrompter>,
}

fn stale_credential() -> Credential {
    Credential::new("demo", "T1", subject()).with_refresh_token("R1")
}

fn harness_with(exchange: CountingExchange, seed: Option<Credential>, policy: RefreshPolicy) -> Harness {
    let exchange = Arc::new(exchange);
    let sessions =
        Arc::new(SessionStore::load("demo", Arc::new(MemorySecretStore::new())).unwrap());
    if let Some(credential) = seed {
        sessions.upsert(Session::from_credential(credential)).unwrap();
    }
    let prompter = Arc::new(ScriptedPrompter::new());
    let gate = TokenRefreshGate::new(
        &demo_provider("https://auth.example"),
        exchange.clone(),
        sessions.clone(),
        prompter.clone(),
    )
    .with_policy(policy);
    Harness {
        gate: Arc::new(gate),
        exchange,
        sessions,
        prompter,
    }
}

fn harness(exchange: CountingExchange) -> Harness {
    harness_with(exchange, Some(stale_credential()), RefreshPolicy::default())
}

/// Provider call that rejects `T1` and echoes any other token.
async fn rejects_t1(token: String) -> Result<String, AuthError> {
    if token == "T1" {
        Err(AuthError::Unauthorized { status: 401 })
    } else {
        Ok(token)
    }
}

#[tokio::test]
async fn concurrent_rejections_share_one_refresh() {
    let h = harness(CountingExchange::new().with_refresh_delay(Duration::from_millis(100)));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let gate = h.gate.clone();
            tokio::spawn(async move { gate.wrap(rejects_t1).await })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap(), Ok("T2".to_string()));
    }

    assert_eq!(h.exchange.refresh_count(), 1);
    assert!(!h.gate.is_refreshing());
    assert_eq!(h.gate.waiters(), 0);
    let sessions = h.sessions.list(None);
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].access_token(), "T2");
    assert_eq!(sessions[0].credential.refresh_token.as_deref(), Some("R1"));
}

#[tokio::test]
async fn caller_after_refresh_reuses_the_new_token() {
    let h = harness(CountingExchange::new());

    assert_eq!(h.gate.wrap(rejects_t1).await, Ok("T2".to_string()));
    let reused = h.gate.refreshed(&stale_credential()).await.unwrap();

    assert_eq!(reused.access_token, "T2");
    assert_eq!(h.exchange.refresh_count(), 1);
}

#[tokio::test]
async fn accepted_token_is_not_refreshed() {
    let h = harness(CountingExchange::new());

    let result = h
        .gate
        .wrap(|token| async move { Ok::<_, AuthError>(token.len()) })
        .await;

    assert_eq!(result, Ok(2));
    assert_eq!(h.exchange.refresh_count(), 0);
}

#[tokio::test]
async fn non_auth_errors_pass_through_without_refresh() {
    let h = harness(CountingExchange::new());

    let result: Result<(), AuthError> = h
        .gate
        .wrap(|_token| async { Err(AuthError::ExchangeFailed("503 Service Unavailable".into())) })
        .await;

    assert_eq!(
        result,
        Err(AuthError::ExchangeFailed("503 Service Unavailable".into()))
    );
    assert_eq!(h.exchange.refresh_count(), 0);
}

#[tokio::test]
async fn second_rejection_ends_the_session_and_prompts_once() {
    let h = harness(CountingExchange::new());
    let mut events = h.sessions.subscribe();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let result: Result<(), AuthError> = h
        .gate
        .wrap(|token| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(token);
                Err(AuthError::Unauthorized { status: 401 })
            }
        })
        .await;

    assert_eq!(result, Err(AuthError::AuthExpired));
    assert_eq!(*seen.lock().unwrap(), vec!["T1".to_string(), "T2".to_string()]);
    assert_eq!(h.exchange.refresh_count(), 1);
    assert!(h.sessions.list(None).is_empty());
    assert_eq!(
        h.prompter.informed(),
        vec!["Your Demo session expired. Please sign in again.".to_string()]
    );

    // Changed (refresh stored), then Removed.
    let changed = events.recv().await.unwrap();
    assert_eq!(changed.session().access_token(), "T2");
    let removed = events.recv().await.unwrap();
    assert!(matches!(removed, connector_auth::auth::SessionChange::Removed(_)));
}

#[tokio::test]
async fn failed_refresh_fans_out_to_every_waiter() {
    let exchange = CountingExchange::new().with_refresh_delay(Duration::from_millis(100));
    exchange.fail_refresh_with(AuthError::RefreshFailed("invalid_grant".into()));
    let h = harness(exchange);

    let tasks: Vec<_> = (0..5)
        .map(|_| {
            let gate = h.gate.clone();
            tokio::spawn(async move { gate.wrap(rejects_t1).await })
        })
        .collect();
    for task in tasks {
        assert_eq!(
            task.await.unwrap(),
            Err(AuthError::RefreshFailed("invalid_grant".into()))
        );
    }

    assert_eq!(h.exchange.refresh_count(), 1);
    assert!(h.sessions.list(None).is_empty());
    assert_eq!(h.prompter.informed().len(), 1);

    let after = h.gate.wrap(rejects_t1).await;
    assert_eq!(after, Err(AuthError::NotSignedIn("Demo".into())));
}

#[tokio::test]
async fn waiters_beyond_the_bound_are_turned_away() {
    let policy = RefreshPolicy {
        max_waiters: 2,
        ..RefreshPolicy::default()
    };
    let h = harness_with(
        CountingExchange::new().with_refresh_delay(Duration::from_millis(200)),
        Some(stale_credential()),
        policy,
    );

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let gate = h.gate.clone();
            tokio::spawn(async move { gate.refreshed(&stale_credential()).await })
        })
        .collect();
    let mut refreshed = 0;
    let mut turned_away = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(credential) => {
                assert_eq!(credential.access_token, "T2");
                refreshed += 1;
            }
            Err(AuthError::RefreshQueueFull(provider)) => {
                assert_eq!(provider, "Demo");
                turned_away += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!((refreshed, turned_away), (3, 1));
    assert_eq!(h.exchange.refresh_count(), 1);
}

#[tokio::test]
async fn token_near_expiry_is_refreshed_before_the_call() {
    let seed = stale_credential().with_expires_at(Utc::now() + chrono::Duration::seconds(30));
    let h = harness_with(
        CountingExchange::new().with_expires_in(chrono::Duration::hours(1)),
        Some(seed),
        RefreshPolicy::default(),
    );
    let calls = Arc::new(AtomicUsize::new(0));

    let result = h
        .gate
        .wrap(|token| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                rejects_t1(token).await
            }
        })
        .await;

    assert_eq!(result, Ok("T2".to_string()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.exchange.refresh_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_back_off_before_retrying() {
    let exchange = CountingExchange::new();
    exchange.fail_refresh_with(AuthError::ExchangeFailed("connection reset".into()));
    let h = harness(exchange);

    let first = h.gate.refreshed(&stale_credential()).await;
    assert_eq!(first, Err(AuthError::ExchangeFailed("connection reset".into())));
    assert_eq!(h.sessions.list(None).len(), 1);

    let during = h.gate.refreshed(&stale_credential()).await;
    assert!(matches!(during, Err(AuthError::RefreshFailed(msg)) if msg.contains("backing off")));
    assert_eq!(h.exchange.refresh_count(), 1);
    assert!(h.prompter.informed().is_empty());

    tokio::time::advance(Duration::from_secs(2)).await;
    let after = h.gate.refreshed(&stale_credential()).await;
    assert_eq!(after, Err(AuthError::ExchangeFailed("connection reset".into())));
    assert_eq!(h.exchange.refresh_count(), 2);
}

#[tokio::test]
async fn wrap_without_a_session_is_not_signed_in() {
    let h = harness_with(CountingExchange::new(), None, RefreshPolicy::default());

    let result = h.gate.wrap(rejects_t1).await;

    assert_eq!(result, Err(AuthError::NotSignedIn("Demo".into())));
}

#[tokio::test]
async fn wrap_session_targets_one_account() {
    let h = harness(CountingExchange::new());
    let other = Credential::new(
        "demo",
        "T9",
        connector_auth::auth::Subject {
            id: "user-2".into(),
            label: "Grace".into(),
        },
    );
    let other = h.sessions.upsert(Session::from_credential(other)).unwrap();

    let token = h
        .gate
        .wrap_session(&other.id, |token| async move { Ok::<_, AuthError>(token) })
        .await;

    assert_eq!(token, Ok("T9".to_string()));
    assert_eq!(
        h.gate
            .wrap_session("missing", |token| async move { Ok::<_, AuthError>(token) })
            .await,
        Err(AuthError::NotSignedIn("Demo".into()))
    );
}

#[tokio::test]
async fn concurrent_refreshes_never_swap_accounts() {
    let h = harness(CountingExchange::new().with_refresh_delay(Duration::from_millis(100)));
    let alice = h.sessions.list(None).remove(0);
    let bob = Credential::new(
        "demo",
        "B1",
        connector_auth::auth::Subject {
            id: "user-2".into(),
            label: "Grace".into(),
        },
    )
    .with_refresh_token("RB");
    let bob = h.sessions.upsert(Session::from_credential(bob)).unwrap();

    let spawn_call = |session_id: String| {
        let gate = h.gate.clone();
        tokio::spawn(async move {
            gate.wrap_session(&session_id, |token| async move {
                if token == "T1" || token == "B1" {
                    Err(AuthError::Unauthorized { status: 401 })
                } else {
                    Ok(token)
                }
            })
            .await
        })
    };
    let alice_call = spawn_call(alice.id.clone());
    let bob_call = spawn_call(bob.id.clone());
    let alice_token = alice_call.await.unwrap().unwrap();
    let bob_token = bob_call.await.unwrap().unwrap();

    assert_ne!(alice_token, bob_token);
    assert_eq!(h.sessions.find(&alice.id).unwrap().access_token(), alice_token);
    assert_eq!(h.sessions.find(&bob.id).unwrap().access_token(), bob_token);
    assert_eq!(
        h.sessions.find(&bob.id).unwrap().credential.subject.id,
        "user-2"
    );
    assert_eq!(h.exchange.refresh_count(), 2);
    assert!(!h.gate.is_refreshing());
}
