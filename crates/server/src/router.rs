//! HTTP router construction.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/properties", get(api::properties))
        .route("/v1/properties/{*path}", get(api::nested_properties))
        .route("/v1/conqueso", get(api::conqueso))
        .route("/v1/health", get(api::health))
        .route("/v1/status", get(api::status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use propd_core::{
        async_trait, EventBus, Options, Source, SourceContext, SourceCore, SourceError,
    };
    use propd_engine::{ManagerOptions, SourceManager};
    use serde_json::{json, Map, Value};
    use tower::ServiceExt;

    struct FixedSource {
        core: SourceCore,
        output: Option<Map<String, Value>>,
    }

    #[async_trait]
    impl Source for FixedSource {
        fn core(&self) -> &SourceCore {
            &self.core
        }

        async fn poll_once(&self) -> Result<(), SourceError> {
            match &self.output {
                Some(output) => {
                    self.core.accept_content(output.clone());
                    Ok(())
                }
                None => Err(SourceError::Other("backend down".into())),
            }
        }
    }

    async fn manager_with(sources: Vec<(&str, &str, Option<Value>)>) -> Arc<SourceManager> {
        let bus = Arc::new(EventBus::new());
        let ctx = SourceContext::new(Arc::clone(&bus), Default::default());
        let manager = Arc::new(SourceManager::new(bus, ManagerOptions::default()));
        for (name, namespace, output) in sources {
            let source = Arc::new(FixedSource {
                core: SourceCore::new(name, "fixed", Options::new(), &ctx),
                output: output.and_then(|v| v.as_object().cloned()),
            });
            manager.register(source.clone(), namespace, false);
            source.get().await;
        }
        manager
    }

    async fn app() -> Router {
        let manager = manager_with(vec![
            ("ec2-metadata", "instance", Some(json!({"instance-id": "i-1"}))),
            (
                "consul",
                "",
                Some(json!({"consul": {"web": {"cluster": "web", "addresses": ["10.0.0.1"]}}})),
            ),
            ("app", "app", Some(json!({"db": {"pool": 4, "ssl": true}}))),
        ])
        .await;
        build_router(Arc::new(AppState::new(manager)))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Option<String>, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, content_type, body)
    }

    fn json_body(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    async fn full_tree() {
        let (status, _, body) = get(app().await, "/v1/properties").await;
        assert_eq!(status, StatusCode::OK);
        let tree = json_body(&body);
        assert_eq!(tree["instance"]["instance-id"], json!("i-1"));
        assert_eq!(tree["app"]["db"]["pool"], json!(4));
    }

    #[tokio::test]
    async fn nested_path() {
        let (status, _, body) = get(app().await, "/v1/properties/app/db").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body), json!({"pool": 4, "ssl": true}));

        let (status, _, body) = get(app().await, "/v1/properties/app/db/pool").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(&body), json!(4));
    }

    #[tokio::test]
    async fn missing_path_is_not_found() {
        let (status, _, body) = get(app().await, "/v1/properties/app/cache").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json_body(&body)["error"].as_str().unwrap().contains("app/cache"));
    }

    #[tokio::test]
    async fn conqueso_is_plain_text() {
        let (status, content_type, body) = get(app().await, "/v1/conqueso").await;
        assert_eq!(status, StatusCode::OK);
        assert!(content_type.unwrap().starts_with("text/plain"));

        let text = String::from_utf8(body).unwrap();
        let mut lines: Vec<&str> = text.lines().collect();
        lines.sort();
        assert_eq!(
            lines,
            vec!["app.db.pool=4", "app.db.ssl=true", "conqueso.web.ips=10.0.0.1"]
        );
    }

    #[tokio::test]
    async fn healthy_report() {
        let (status, _, body) = get(app().await, "/v1/health").await;
        assert_eq!(status, StatusCode::OK);
        let report = json_body(&body);
        assert_eq!(report["ok"], json!(true));
        assert_eq!(report["code"], json!(200));
        assert_eq!(report["sources"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn failing_source_degrades_health() {
        let manager = manager_with(vec![
            ("ok", "ok", Some(json!({"a": 1}))),
            ("broken", "broken", None),
        ])
        .await;
        let app = build_router(Arc::new(AppState::new(manager)));

        let (status, _, body) = get(app.clone(), "/v1/health").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let report = json_body(&body);
        assert_eq!(report["ok"], json!(false));
        assert_eq!(report["status"], json!("ERROR"));

        let (status, _, body) = get(app, "/v1/status").await;
        assert_eq!(status, StatusCode::OK);
        let report = json_body(&body);
        assert_eq!(report["ok"], json!(false));
        assert!(report["uptime"].is_u64());
        assert_eq!(report["version"], json!(env!("CARGO_PKG_VERSION")));
    }
}
