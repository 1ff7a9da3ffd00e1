use crate::error::AppError;
use crate::services::compare::compare;
use crate::services::upload::UploadSession;
use crate::state::AppState;
use axum::extract::{Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use protofleet_core::protocol::{
    CompareReport, CompareRequest, FetchRequest, FileBody, UploadReport, VerifyRequest,
    VerifyResponse, FORCE_FETCH_HEADER,
};
use protofleet_core::Manifest;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn router(_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/fetch", get(fetch))
        .route("/verify", post(verify))
        .route("/compare", post(compare_sums))
        .route("/upload", post(upload))
        .route("/reindex", post(reindex))
}

/// 200 with the artifact, or 204 when the caller's digest is current.
async fn fetch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<FetchRequest>,
) -> Result<Response, AppError> {
    let force = headers
        .get(FORCE_FETCH_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));

    let current = state.ledger.digest_of(&query.path).await?;
    let known = query.digest.as_deref().filter(|d| !d.is_empty());
    if !force && known == Some(current.as_str()) {
        tracing::debug!(path = %query.path, "Fetch up to date");
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let entry = state.ledger.get(&query.path).await?;
    Ok(Json(FileBody {
        content: entry.content,
        digest: entry.digest,
    })
    .into_response())
}

async fn verify(
    State(state): State<Arc<AppState>>,
    Json(body): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, AppError> {
    let current = state.ledger.digest_of(&body.path).await?;
    Ok(Json(VerifyResponse {
        matches: current == body.digest,
    }))
}

async fn compare_sums(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CompareRequest>,
) -> Json<CompareReport> {
    let manifest = Manifest::parse(&body.manifest);
    Json(compare(&state.ledger, &manifest).await)
}

async fn upload(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<UploadReport>, AppError> {
    let mut session = UploadSession::new(state.ledger.clone(), state.registry.clone());

    let mut stream = request.into_body().into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| AppError::Internal(anyhow::anyhow!("Read error: {}", e)))?;
        session.feed(&chunk).await;
    }

    let report = session.finish().await;
    tracing::info!(
        "Upload complete: {} ok, {} updated, {} error(s)",
        report.success,
        report.update,
        report.errors.len()
    );
    Ok(Json(report))
}

async fn reindex(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let entries = state.ledger.reindex().await?;
    tracing::info!("Reindexed ledger: {} entries", entries);
    Ok(Json(json!({ "entries": entries })))
}

#[cfg(test)]
mod tests {
    use crate::config::AppConfig;
    use crate::routes::create_router;
    use crate::state::AppState;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use protofleet_core::protocol::FORCE_FETCH_HEADER;
    use protofleet_core::Ledger;
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn app(files: &[(&str, &str)]) -> (TempDir, Arc<AppState>, Router) {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(Ledger::new(dir.path()));
        for (path, content) in files {
            ledger.store(path, content.to_string()).await.unwrap();
        }
        let config = AppConfig {
            host: "127.0.0.1".into(),
            port: 0,
            schema_root: dir.path().to_path_buf(),
            schema_extension: "proto".into(),
            idle_window: Duration::from_millis(100),
            log_level: "debug".into(),
        };
        let state = Arc::new(AppState::new(ledger, config));
        let router = create_router(state.clone());
        (dir, state, router)
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_statuses() {
        let (_dir, state, router) = app(&[("a.proto", "A")]).await;
        let digest = state.ledger.digest_of("a.proto").await.unwrap();

        let (status, body) = send(
            &router,
            Request::get("/api/fetch?path=a.proto").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["content"], "QQ==");
        assert_eq!(body["digest"], digest);

        let current = format!("/api/fetch?path=a.proto&digest={digest}");
        let (status, _) = send(&router, Request::get(&current).body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let forced = Request::get(&current)
            .header(FORCE_FETCH_HEADER, "true")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&router, forced).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &router,
            Request::get("/api/fetch?path=nope.proto").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "file \"nope.proto\" not found");
    }

    #[tokio::test]
    async fn test_verify() {
        let (_dir, state, router) = app(&[("a.proto", "A")]).await;
        let digest = state.ledger.digest_of("a.proto").await.unwrap();

        let (status, body) = send(
            &router,
            post_json("/api/verify", serde_json::json!({"path": "a.proto", "digest": digest})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["match"], true);

        let (_, body) = send(
            &router,
            post_json("/api/verify", serde_json::json!({"path": "a.proto", "digest": "old"})),
        )
        .await;
        assert_eq!(body["match"], false);

        let (status, _) = send(
            &router,
            post_json("/api/verify", serde_json::json!({"path": "b.proto", "digest": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_compare() {
        let (_dir, state, router) = app(&[("a.proto", "A"), ("b.proto", "B")]).await;
        let digest = state.ledger.digest_of("a.proto").await.unwrap();

        let manifest = format!("a.proto:{digest}\nb.proto:old\nc.proto:new");
        let (status, body) = send(
            &router,
            post_json("/api/compare", serde_json::json!({ "manifest": manifest })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["matched"], 1);
        assert_eq!(body["unmatched"], serde_json::json!(["b.proto"]));
        assert_eq!(body["additional"], serde_json::json!(["c.proto"]));
    }

    #[tokio::test]
    async fn test_upload_stream() {
        let (_dir, state, router) = app(&[]).await;
        let body = concat!(
            "{\"entries\":{\"a.proto\":{\"content\":\"QQ==\"}}}\n",
            "{broken\n",
            "{\"entries\":{\"b.proto\":{\"content\":\"Qg==\"}}}\n",
        );

        let request = Request::post("/api/upload")
            .header("content-type", "application/x-ndjson")
            .body(Body::from(body))
            .unwrap();
        let (status, report) = send(&router, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["success"], 2);
        assert_eq!(report["update"], 2);
        assert!(report["errors"]["line 2"].is_string());
        assert_eq!(state.ledger.get("b.proto").await.unwrap().content, "B");
    }

    #[tokio::test]
    async fn test_reindex_and_health() {
        let (dir, _state, router) = app(&[("a.proto", "A")]).await;
        std::fs::write(dir.path().join("dropped.proto"), "D").unwrap();

        let (status, body) = send(
            &router,
            Request::post("/api/reindex").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entries"], 2);

        let (status, body) = send(
            &router,
            Request::get("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["entries"], 2);
        assert_eq!(body["subscribers"], 0);
    }
}
