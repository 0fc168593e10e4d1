//! Integration tests for KMS provider health and the liveness endpoints

mod common;

use axum::http::StatusCode;
use axum_test::TestServer;
use common::{config_yaml, plugin, reconfigure, registry_for, P};
use kms_envelope::api::{build_router, LivenessState};
use kms_envelope::config::HealthConfig;
use kms_envelope::kms::MockConnector;
use kms_envelope::observability::KmsHealthAggregator;
use kms_envelope::reload::ReloadStatus;
use kms_envelope::ProviderRegistry;
use std::sync::Arc;
use std::time::Duration;

const KEY_DISABLED: &str =
    "rpc error: code = FailedPrecondition desc = failed precondition - key disabled";

fn two_providers() -> String {
    config_yaml(&[(&["secrets"], &[P::Kms("p1")]), (&["configmaps"], &[P::Kms("p2")])])
}

/// Probes are never cached unless a test asks for it.
fn uncached() -> HealthConfig {
    HealthConfig { probe_timeout_ms: 500, positive_ttl_ms: 0, negative_ttl_ms: 0 }
}

struct Fixture {
    registry: Arc<ProviderRegistry>,
    connector: Arc<MockConnector>,
    health: Arc<KmsHealthAggregator>,
    server: TestServer,
}

fn fixture(yaml: &str, health_config: HealthConfig, reload: Option<Arc<ReloadStatus>>) -> Fixture {
    let (registry, connector) = registry_for(yaml);
    let health = Arc::new(KmsHealthAggregator::new(registry.clone(), &health_config));
    let router = build_router(LivenessState { health: health.clone(), reload });
    let server = TestServer::new(router).expect("test server");
    Fixture { registry, connector, health, server }
}

#[tokio::test]
async fn test_all_healthy() {
    let f = fixture(&two_providers(), uncached(), None);

    for path in ["/healthz", "/healthz/kms-providers", "/healthz/kms-provider-0", "/healthz/kms-provider-1"]
    {
        let response = f.server.get(path).await;
        assert_eq!(response.status_code(), StatusCode::OK, "{path}");
        assert_eq!(response.text(), "ok");
    }
    assert_eq!(f.health.provider_count(), 2);
}

#[tokio::test]
async fn test_failed_provider_reports_encrypt_section() {
    let f = fixture(&two_providers(), uncached(), None);
    plugin(&f.connector, "p1").enter_failed_state();

    let response = f.server.get("/healthz/kms-providers").await;
    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        response.text(),
        format!(
            "internal server error: kms-provider-0: failed to perform encrypt section of the healthz check for KMS Provider p1, error: {}",
            KEY_DISABLED
        )
    );

    let response = f.server.get("/healthz/kms-provider-0").await;
    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.text().starts_with("internal server error: failed to perform encrypt section"));

    // The other provider is judged on its own
    let response = f.server.get("/healthz/kms-provider-1").await;
    assert_eq!(response.status_code(), StatusCode::OK);

    plugin(&f.connector, "p1").exit_failed_state();
    assert_eq!(f.server.get("/healthz").await.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_component_is_not_found() {
    let f = fixture(&two_providers(), uncached(), None);
    for path in ["/healthz/kms-provider-2", "/healthz/kms-provider-01", "/healthz/etcd"] {
        assert_eq!(f.server.get(path).await.status_code(), StatusCode::NOT_FOUND, "{path}");
    }
}

#[tokio::test]
async fn test_slow_provider_times_out() {
    let config = HealthConfig { probe_timeout_ms: 50, ..uncached() };
    let f = fixture(&two_providers(), config, None);
    plugin(&f.connector, "p2").set_delay(Some(Duration::from_millis(500)));

    let check = f.health.check_one("p2").await.unwrap();
    assert_eq!(check.component, "kms-provider-1");
    assert_eq!(
        check.text(),
        "failed to perform healthz check for KMS Provider p2, error: timed out after 50ms"
    );
    assert!(f.health.check_one("p1").await.unwrap().status.is_healthy());
}

#[tokio::test]
async fn test_check_all_probes_providers_concurrently() {
    let f = fixture(&two_providers(), uncached(), None);
    // 300ms per round trip: encrypt and decrypt each wait 150ms
    plugin(&f.connector, "p1").set_delay(Some(Duration::from_millis(150)));
    plugin(&f.connector, "p2").set_delay(Some(Duration::from_millis(150)));

    let started = std::time::Instant::now();
    let report = f.health.check_all().await;
    let elapsed = started.elapsed();

    assert!(report.is_healthy(), "{}", report.text());
    assert_eq!(report.checks.len(), 2);
    assert!(elapsed < Duration::from_millis(550), "took {elapsed:?}");
}

#[tokio::test]
async fn test_results_are_cached_per_ttl() {
    let config = HealthConfig { probe_timeout_ms: 500, positive_ttl_ms: 60_000, negative_ttl_ms: 0 };
    let f = fixture(&two_providers(), config, None);
    let kms = plugin(&f.connector, "p1");

    assert!(f.health.check_one("p1").await.unwrap().status.is_healthy());
    assert_eq!(kms.encrypt_calls(), 1);

    // Served from cache even though the plugin has since failed
    kms.enter_failed_state();
    assert!(f.health.check_one("p1").await.unwrap().status.is_healthy());
    assert_eq!(kms.encrypt_calls(), 1);
}

#[tokio::test]
async fn test_negative_results_expire_quickly() {
    let config = HealthConfig { probe_timeout_ms: 500, positive_ttl_ms: 60_000, negative_ttl_ms: 20 };
    let f = fixture(&two_providers(), config, None);
    let kms = plugin(&f.connector, "p1");

    kms.enter_failed_state();
    assert!(!f.health.check_one("p1").await.unwrap().status.is_healthy());
    kms.exit_failed_state();

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(f.health.check_one("p1").await.unwrap().status.is_healthy());
    assert_eq!(kms.encrypt_calls(), 2);
}

#[tokio::test]
async fn test_reload_swaps_probed_providers() {
    let f = fixture(&two_providers(), uncached(), None);
    reconfigure(&f.registry, &config_yaml(&[(&["secrets"], &[P::Kms("p3")])]));

    assert_eq!(f.health.provider_count(), 1);
    let check = f.health.check_index(0).await.unwrap();
    assert_eq!(check.metadata.get("provider").map(String::as_str), Some("p3"));
    assert_eq!(f.server.get("/healthz/kms-provider-1").await.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reload_drops_cached_results_of_removed_providers() {
    let config = HealthConfig { probe_timeout_ms: 500, positive_ttl_ms: 60_000, negative_ttl_ms: 0 };
    let f = fixture(&two_providers(), config, None);
    assert!(f.health.check_all().await.is_healthy());
    assert_eq!(f.health.cached_providers(), vec!["p1", "p2"]);

    reconfigure(&f.registry, &config_yaml(&[(&["secrets"], &[P::Kms("p1")])]));
    assert!(f.health.check_all().await.is_healthy());
    assert_eq!(f.health.cached_providers(), vec!["p1"]);
}

#[tokio::test]
async fn test_identity_only_config_is_healthy() {
    let f = fixture(&config_yaml(&[(&["secrets"], &[P::Identity])]), uncached(), None);
    assert_eq!(f.health.provider_count(), 0);
    assert_eq!(f.server.get("/healthz").await.text(), "ok");
}

#[tokio::test]
async fn test_rejected_reload_fails_liveness() {
    use common::ConfigDir;
    use kms_envelope::config::ReloadConfig;
    use kms_envelope::reload::{load_initial, ConfigWatcher, PollOutcome};

    let dir = ConfigDir::new(&two_providers());
    let (registry, _) = registry_for(&two_providers());
    load_initial(&dir.path, &registry).unwrap();
    let reload_config = ReloadConfig { enabled: true, poll_interval_ms: 10, debounce_ms: 0 };
    let mut watcher = ConfigWatcher::new(&dir.path, registry.clone(), &reload_config);

    let health = Arc::new(KmsHealthAggregator::new(registry, &uncached()));
    let router = build_router(LivenessState { health, reload: Some(watcher.status()) });
    let server = TestServer::new(router).unwrap();

    dir.write(&dir.path, "kind: EncryptionConfiguration\napiVersion: v0\nresources: []\n");
    assert!(matches!(watcher.poll_once().await, PollOutcome::Rejected(_)));

    let response = server.get("/healthz/kms-config-reload").await;
    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.text().starts_with("internal server error: invalid encryption configuration"));

    let response = server.get("/healthz").await;
    assert!(response.text().starts_with("internal server error: kms-config-reload: "));
    assert_eq!(server.get("/healthz/kms-providers").await.status_code(), StatusCode::OK);
}
