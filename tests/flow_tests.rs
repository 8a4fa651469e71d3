mod auth_support;

use std::sync::Arc;
use std::time::Duration;

use connector_auth::auth::{CallbackOutcome, CallbackParams, FlowCoordinator, Scopes};
use connector_auth::config::ProviderConfig;
use connector_auth::error::AuthError;
use pretty_assertions::assert_eq;

use auth_support::{demo_provider, CountingExchange, RecordingBrowser};

struct Harness {
    coordinator: Arc<FlowCoordinator>,
    browser: Arc<RecordingBrowser>,
    exchange: Arc<CountingExchange>,
}

fn harness_with(provider: ProviderConfig, browser: RecordingBrowser) -> Harness {
    let browser = Arc::new(browser);
    let exchange = Arc::new(CountingExchange::new());
    let coordinator = FlowCoordinator::new(
        provider,
        "connector-auth",
        exchange.clone(),
        browser.clone(),
    );
    Harness {
        coordinator: Arc::new(coordinator),
        browser,
        exchange,
    }
}

fn harness() -> Harness {
    harness_with(demo_provider("https://auth.example"), RecordingBrowser::new())
}

fn redirect(code: Option<&str>, state: Option<&str>) -> CallbackParams {
    CallbackParams {
        code: code.map(str::to_string),
        state: state.map(str::to_string),
        ..CallbackParams::default()
    }
}

fn spawn_flow(
    coordinator: &Arc<FlowCoordinator>,
) -> tokio::task::JoinHandle<Result<connector_auth::auth::Credential, AuthError>> {
    let coordinator = coordinator.clone();
    tokio::spawn(async move { coordinator.start_flow(&Scopes::new()).await })
}

#[test]
fn redirect_uri_uses_scheme_connector_and_path() {
    let h = harness();
    assert_eq!(
        h.coordinator.redirect_uri(),
        "connector-auth://connectors/demo/callback"
    );
}

#[tokio::test]
async fn forged_state_rejects_flow_without_exchanging() {
    let h = harness();
    let flow = spawn_flow(&h.coordinator);
    h.browser.wait_for(1).await;

    let outcome = h
        .coordinator
        .handle_callback(redirect(Some("abc"), Some("forged-state")))
        .await;

    assert_eq!(outcome, CallbackOutcome::Rejected(AuthError::InvalidState));
    assert_eq!(flow.await.unwrap(), Err(AuthError::InvalidState));
    assert_eq!(h.exchange.code_exchange_count(), 0);
    assert!(!h.coordinator.is_pending());
}

#[tokio::test]
async fn missing_state_rejects_flow() {
    let h = harness();
    let flow = spawn_flow(&h.coordinator);
    h.browser.wait_for(1).await;

    let outcome = h.coordinator.handle_callback(redirect(Some("abc"), None)).await;

    assert_eq!(outcome, CallbackOutcome::Rejected(AuthError::InvalidState));
    assert_eq!(flow.await.unwrap(), Err(AuthError::InvalidState));
    assert_eq!(h.exchange.code_exchange_count(), 0);
}

#[tokio::test]
async fn newer_flow_supersedes_older_one() {
    let h = harness();
    let first = spawn_flow(&h.coordinator);
    h.browser.wait_for(1).await;
    let first_state = h.browser.last_state().unwrap();

    let second = spawn_flow(&h.coordinator);
    h.browser.wait_for(2).await;
    let second_state = h.browser.last_state().unwrap();
    assert_ne!(first_state, second_state);

    assert_eq!(first.await.unwrap(), Err(AuthError::Superseded));
    assert_eq!(
        h.coordinator
            .handle_callback(redirect(Some("abc"), Some(&first_state)))
            .await,
        CallbackOutcome::Late
    );
    assert_eq!(
        h.coordinator
            .handle_callback(redirect(Some("abc"), Some(&second_state)))
            .await,
        CallbackOutcome::Completed
    );

    let credential = second.await.unwrap().unwrap();
    assert_eq!(credential.access_token, "T1");
    assert_eq!(h.exchange.code_exchange_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn unanswered_flow_times_out_and_late_callback_is_dropped() {
    let browser = Arc::new(RecordingBrowser::new());
    let exchange = Arc::new(CountingExchange::new());
    let coordinator = FlowCoordinator::new(
        demo_provider("https://auth.example"),
        "connector-auth",
        exchange.clone(),
        browser.clone(),
    )
    .with_flow_timeout(Duration::from_secs(120));

    let result = coordinator.start_flow(&Scopes::new()).await;
    assert_eq!(result, Err(AuthError::AuthTimeout));
    assert!(!coordinator.is_pending());

    let state = browser.last_state().unwrap();
    let outcome = coordinator
        .handle_callback(redirect(Some("abc"), Some(&state)))
        .await;
    assert_eq!(outcome, CallbackOutcome::Late);
    assert_eq!(exchange.code_exchange_count(), 0);
}

#[tokio::test]
async fn provider_error_with_matching_state_is_denied() {
    let h = harness();
    let flow = spawn_flow(&h.coordinator);
    h.browser.wait_for(1).await;
    let state = h.browser.last_state().unwrap();

    let outcome = h
        .coordinator
        .handle_callback(CallbackParams {
            state: Some(state),
            error: Some("access_denied".to_string()),
            error_description: Some("The user declined".to_string()),
            ..CallbackParams::default()
        })
        .await;

    let expected = AuthError::denied("The user declined");
    assert_eq!(outcome, CallbackOutcome::Rejected(expected.clone()));
    assert_eq!(flow.await.unwrap(), Err(expected));
}

#[tokio::test]
async fn bare_provider_error_without_state_is_denied() {
    let h = harness();
    let flow = spawn_flow(&h.coordinator);
    h.browser.wait_for(1).await;

    let outcome = h
        .coordinator
        .handle_callback(CallbackParams {
            error: Some("access_denied".to_string()),
            ..CallbackParams::default()
        })
        .await;

    let expected = AuthError::denied("access_denied");
    assert_eq!(outcome, CallbackOutcome::Rejected(expected.clone()));
    assert_eq!(flow.await.unwrap(), Err(expected));
}

#[tokio::test]
async fn callback_without_code_fails_exchange() {
    let h = harness();
    let flow = spawn_flow(&h.coordinator);
    h.browser.wait_for(1).await;
    let state = h.browser.last_state().unwrap();

    let outcome = h.coordinator.handle_callback(redirect(None, Some(&state))).await;

    assert!(matches!(
        outcome,
        CallbackOutcome::Rejected(AuthError::ExchangeFailed(_))
    ));
    assert!(matches!(flow.await.unwrap(), Err(AuthError::ExchangeFailed(_))));
    assert_eq!(h.exchange.code_exchange_count(), 0);
}

#[tokio::test]
async fn failed_exchange_rejects_flow() {
    let h = harness();
    let flow = spawn_flow(&h.coordinator);
    h.browser.wait_for(1).await;
    let state = h.browser.last_state().unwrap();

    let outcome = h
        .coordinator
        .handle_callback(redirect(Some("bad"), Some(&state)))
        .await;

    let expected = AuthError::ExchangeFailed("invalid_grant".to_string());
    assert_eq!(outcome, CallbackOutcome::Rejected(expected.clone()));
    assert_eq!(flow.await.unwrap(), Err(expected));
}

#[tokio::test]
async fn browser_failure_aborts_and_clears_pending_slot() {
    let h = harness_with(demo_provider("https://auth.example"), RecordingBrowser::failing());

    let result = h.coordinator.start_flow(&Scopes::new()).await;

    assert!(matches!(result, Err(AuthError::Browser(_))));
    assert!(!h.coordinator.is_pending());
}

#[tokio::test]
async fn pkce_providers_send_an_s256_challenge() {
    let mut provider = demo_provider("https://auth.example");
    provider.use_pkce = true;
    let h = harness_with(provider, RecordingBrowser::new());
    let flow = spawn_flow(&h.coordinator);
    h.browser.wait_for(1).await;

    let url = h.browser.last_url().unwrap();
    let challenge = url
        .query_pairs()
        .find(|(k, _)| k == "code_challenge")
        .map(|(_, v)| v.into_owned());
    let method = url
        .query_pairs()
        .find(|(k, _)| k == "code_challenge_method")
        .map(|(_, v)| v.into_owned());
    assert_eq!(challenge.map(|c| c.len()), Some(43));
    assert_eq!(method.as_deref(), Some("S256"));

    assert!(h.coordinator.cancel());
    assert_eq!(flow.await.unwrap(), Err(AuthError::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn deadline_during_code_exchange_waits_for_the_exchange() {
    let browser = Arc::new(RecordingBrowser::new());
    let exchange = Arc::new(CountingExchange::new().with_code_delay(Duration::from_secs(10)));
    let coordinator = Arc::new(
        FlowCoordinator::new(
            demo_provider("https://auth.example"),
            "connector-auth",
            exchange.clone(),
            browser.clone(),
        )
        .with_flow_timeout(Duration::from_secs(5)),
    );
    let flow = spawn_flow(&coordinator);
    browser.wait_for(1).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    let state = browser.last_state().unwrap();

    let outcome = coordinator
        .handle_callback(redirect(Some("abc"), Some(&state)))
        .await;

    assert_eq!(outcome, CallbackOutcome::Completed);
    assert_eq!(flow.await.unwrap().unwrap().access_token, "T1");
    assert_eq!(exchange.code_exchange_count(), 1);
    assert!(!coordinator.is_pending());
}

#[tokio::test(start_paused = true)]
async fn timed_out_callback_after_many_flows_does_not_reject_the_current_one() {
    let browser = Arc::new(RecordingBrowser::new());
    let exchange = Arc::new(CountingExchange::new());
    let coordinator = Arc::new(
        FlowCoordinator::new(
            demo_provider("https://auth.example"),
            "connector-auth",
            exchange.clone(),
            browser.clone(),
        )
        .with_flow_timeout(Duration::from_secs(60)),
    );
    assert_eq!(
        coordinator.start_flow(&Scopes::new()).await,
        Err(AuthError::AuthTimeout)
    );
    let timed_out = browser.last_state().unwrap();

    let mut flows = Vec::new();
    for opened in 2..=21 {
        flows.push(spawn_flow(&coordinator));
        browser.wait_for(opened).await;
    }
    let outcome = coordinator
        .handle_callback(redirect(Some("abc"), Some(&timed_out)))
        .await;

    assert_eq!(outcome, CallbackOutcome::Late);
    assert!(coordinator.is_pending());
    assert_eq!(exchange.code_exchange_count(), 0);
    let current = flows.pop().unwrap();
    for superseded in flows {
        assert_eq!(superseded.await.unwrap(), Err(AuthError::Superseded));
    }
    coordinator.cancel();
    assert_eq!(current.await.unwrap(), Err(AuthError::Cancelled));
}
