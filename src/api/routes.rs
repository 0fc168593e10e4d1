use std::sync::Arc;

use axum::{middleware, routing::get, Router};

use crate::observability::{trace_http_requests, KmsHealthAggregator};
use crate::reload::ReloadStatus;

use super::handlers::{
    config_reload_handler, healthz_handler, kms_provider_handler, kms_providers_handler,
};

#[derive(Clone)]
pub struct LivenessState {
    pub health: Arc<KmsHealthAggregator>,
    /// Absent when hot reload is disabled
    pub reload: Option<Arc<ReloadStatus>>,
}

pub fn build_router(state: LivenessState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/healthz/kms-providers", get(kms_providers_handler))
        .route("/healthz/kms-config-reload", get(config_reload_handler))
        .route("/healthz/{component}", get(kms_provider_handler))
        .layer(middleware::from_fn(trace_http_requests))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{encryption, HealthConfig};
    use crate::kms::MockConnector;
    use crate::registry::ProviderRegistry;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    const CONFIG: &str = r#"
kind: EncryptionConfiguration
apiVersion: apiserver.config.k8s.io/v1
resources:
  - resources: [secrets]
    providers:
    - kms: {name: kms-provider, endpoint: "unix:///@kms-provider.sock"}
"#;

    fn router() -> (Router, Arc<MockConnector>) {
        let connector = Arc::new(MockConnector::new());
        let config = encryption::parse(CONFIG.as_bytes()).unwrap();
        let registry = Arc::new(ProviderRegistry::with_config(connector.clone(), &config).unwrap());
        let health_config = HealthConfig { positive_ttl_ms: 0, negative_ttl_ms: 0, ..Default::default() };
        let health = Arc::new(KmsHealthAggregator::new(registry, &health_config));
        (build_router(LivenessState { health, reload: None }), connector)
    }

    async fn get_status(app: Router, uri: &str) -> StatusCode {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        app.oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_healthy_routes() {
        let (app, _) = router();
        for uri in ["/healthz", "/healthz/kms-providers", "/healthz/kms-provider-0", "/healthz/kms-config-reload"] {
            assert_eq!(get_status(app.clone(), uri).await, StatusCode::OK, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_unknown_component_is_not_found() {
        let (app, _) = router();
        assert_eq!(get_status(app.clone(), "/healthz/kms-provider-7").await, StatusCode::NOT_FOUND);
        assert_eq!(get_status(app.clone(), "/healthz/kms-provider-01").await, StatusCode::NOT_FOUND);
        assert_eq!(get_status(app, "/healthz/etcd").await, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_failed_plugin_is_server_error() {
        let (app, connector) = router();
        connector.plugin("unix:///@kms-provider.sock").enter_failed_state();
        assert_eq!(get_status(app.clone(), "/healthz").await, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(get_status(app, "/healthz/kms-config-reload").await, StatusCode::OK);
    }
}
