//! Integration tests for the HTTP API.

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use common::{harness, harness_with, Behavior};
use serde_json::Value;
use tower::ServiceExt;
use url_archiver::db::{get_archive, set_archive_running, update_archive, ArchiveUpdate};

async fn send(app: Router, method: &str, uri: &str, body: Option<&str>) -> Response {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    app.oneshot(request.body(body).unwrap()).await.unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

async fn submit(app: Router, url: &str) -> Value {
    let response = send(
        app,
        "POST",
        "/api/archive",
        Some(&serde_json::json!({ "url": url }).to_string()),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    body_json(response).await
}

#[tokio::test]
async fn test_submit_infers_kind_and_queues() {
    let h = harness().await;

    let page = submit(h.app(), "https://example.com/post").await;
    assert_eq!(page["status"], "QUEUED");
    assert_eq!(page["kind"], "page");
    assert_eq!(page["url"], "https://example.com/post");
    assert!(!page["id"].as_str().unwrap().is_empty());

    let video = submit(h.app(), "https://youtu.be/abc123").await;
    assert_eq!(video["kind"], "video");

    assert_eq!(h.queue.pending_count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_submit_explicit_kind() {
    let h = harness().await;

    let response = send(
        h.app(),
        "POST",
        "/api/archive",
        Some(r#"{"url":"https://example.com/clip.mp4","kind":"page"}"#),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(response).await["kind"], "page");
}

#[tokio::test]
async fn test_submit_rejects_invalid_input_without_creating_records() {
    let h = harness().await;

    for body in [
        r#"{"url":"ftp://example.com/file"}"#,
        r#"{"url":"not a url"}"#,
        r#"{"url":"https://"}"#,
        r#"{"url":"https://example.com/","kind":"podcast"}"#,
        r#"{"nope":true}"#,
        "{broken json",
    ] {
        let response = send(h.app(), "POST", "/api/archive", Some(body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {body}");
        let error = body_json(response).await;
        assert!(error["error"].is_string());
    }

    let list = body_json(send(h.app(), "GET", "/api/archives", None).await).await;
    assert_eq!(list.as_array().unwrap().len(), 0);
    assert_eq!(h.queue.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_submit_rate_limited() {
    let h = harness_with(|c| c.max_jobs_per_minute = 1).await;

    submit(h.app(), "https://example.com/1").await;
    let response = send(
        h.app(),
        "POST",
        "/api/archive",
        Some(r#"{"url":"https://example.com/2"}"#),
    )
    .await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_submit_that_cannot_queue_leaves_no_record() {
    let h = harness().await;
    sqlx::query("DROP TABLE capture_jobs")
        .execute(h.db.pool())
        .await
        .unwrap();

    let response = send(
        h.app(),
        "POST",
        "/api/archive",
        Some(r#"{"url":"https://example.com/orphan"}"#),
    )
    .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let list = body_json(send(h.app(), "GET", "/api/archives", None).await).await;
    assert_eq!(list.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_get_archive_detail() {
    let h = harness().await;
    let submitted = submit(h.app(), "https://example.com/a").await;
    let id = submitted["id"].as_str().unwrap();

    let queued = body_json(send(h.app(), "GET", &format!("/api/archive/{id}"), None).await).await;
    assert_eq!(queued["status"], "QUEUED");
    assert!(queued["meta"].is_null());
    assert!(queued["primary_path"].is_null());

    h.drain().await;

    let done = body_json(send(h.app(), "GET", &format!("/api/archive/{id}"), None).await).await;
    assert_eq!(done["status"], "DONE");
    assert_eq!(done["title"], "Example Article");
    assert_eq!(done["meta"]["title"], "Example Article");
    assert_eq!(done["created_at"], queued["created_at"]);
}

#[tokio::test]
async fn test_get_unknown_archive_is_404() {
    let h = harness().await;

    let response = send(h.app(), "GET", "/api/archive/missing", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(body_json(response).await["error"].is_string());
}

#[tokio::test]
async fn test_unparseable_metadata_is_null() {
    let h = harness().await;
    let submitted = submit(h.app(), "https://example.com/a").await;
    let id = submitted["id"].as_str().unwrap();

    update_archive(
        h.db.pool(),
        id,
        &ArchiveUpdate {
            meta_json: Some(Some("{not json".to_string())),
            ..ArchiveUpdate::default()
        },
    )
    .await
    .unwrap();

    let detail = body_json(send(h.app(), "GET", &format!("/api/archive/{id}"), None).await).await;
    assert!(detail["meta"].is_null());
    assert_eq!(detail["meta_json"], "{not json");
}

#[tokio::test]
async fn test_list_and_search() {
    let h = harness().await;

    h.page.set(Behavior::succeed("Volcanoes", "magma and ash"));
    let first = submit(h.app(), "https://example.com/volcano").await;
    h.drain().await;

    h.page.set(Behavior::succeed("Glaciers", "ice sheets"));
    let second = submit(h.app(), "https://example.com/glacier").await;
    h.drain().await;

    let all = body_json(send(h.app(), "GET", "/api/archives", None).await).await;
    let all = all.as_array().unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0]["id"], second["id"], "newest first");
    assert_eq!(all[1]["id"], first["id"]);

    let hits = body_json(send(h.app(), "GET", "/api/archives?q=magma", None).await).await;
    let hits = hits.as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["id"], first["id"]);

    let page = body_json(send(h.app(), "GET", "/api/archives?limit=1&offset=1", None).await).await;
    assert_eq!(page.as_array().unwrap().len(), 1);
    assert_eq!(page[0]["id"], first["id"]);

    let done = body_json(send(h.app(), "GET", "/api/archives?status=DONE", None).await).await;
    assert_eq!(done.as_array().unwrap().len(), 2);

    let response = send(h.app(), "GET", "/api/archives?status=BOGUS", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_list_malformed_paging_is_json_400() {
    let h = harness().await;

    for uri in ["/api/archives?limit=abc", "/api/archives?offset=ten"] {
        let response = send(h.app(), "GET", uri, None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "uri: {uri}");
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        let error = body_json(response).await;
        assert!(error["error"].as_str().unwrap().contains("invalid query"));
    }
}

#[tokio::test]
async fn test_reprocess() {
    let h = harness().await;
    let submitted = submit(h.app(), "https://example.com/a").await;
    let id = submitted["id"].as_str().unwrap();
    h.drain().await;

    let response = send(h.app(), "POST", &format!("/api/archive/{id}/process"), None).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["id"], id);
    assert_eq!(h.queue.pending_count().await.unwrap(), 1);

    let response = send(h.app(), "POST", "/api/archive/missing/process", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reprocess_running_archive_conflicts() {
    let h = harness().await;
    let submitted = submit(h.app(), "https://example.com/a").await;
    let id = submitted["id"].as_str().unwrap();
    set_archive_running(h.db.pool(), id).await.unwrap();

    let response = send(h.app(), "POST", &format!("/api/archive/{id}/process"), None).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let record = get_archive(h.db.pool(), id).await.unwrap().unwrap();
    assert_eq!(record.status, "RUNNING");
}

#[tokio::test]
async fn test_download_streams_primary_artifact() {
    let h = harness().await;
    let submitted = submit(h.app(), "https://example.com/a").await;
    let id = submitted["id"].as_str().unwrap();

    let not_ready = send(h.app(), "GET", &format!("/api/archive/{id}/download"), None).await;
    assert_eq!(not_ready.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(not_ready).await["error"], "file not ready");

    h.drain().await;

    let response = send(h.app(), "GET", &format!("/api/archive/{id}/download"), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/pdf"
    );
    let disposition = response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment;"));
    assert!(disposition.contains(".pdf"));
    assert_eq!(
        body_bytes(response).await,
        b"artifact for https://example.com/a"
    );
}

#[tokio::test]
async fn test_download_missing_file_is_404() {
    let h = harness().await;
    let submitted = submit(h.app(), "https://example.com/a").await;
    let id = submitted["id"].as_str().unwrap();
    h.drain().await;

    let record = get_archive(h.db.pool(), id).await.unwrap().unwrap();
    std::fs::remove_file(record.primary_path.unwrap()).unwrap();

    let response = send(h.app(), "GET", &format!("/api/archive/{id}/download"), None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // The record itself is left alone.
    let record = get_archive(h.db.pool(), id).await.unwrap().unwrap();
    assert_eq!(record.status, "DONE");
}

#[tokio::test]
async fn test_delete_archive() {
    let h = harness().await;
    let submitted = submit(h.app(), "https://example.com/a").await;
    let id = submitted["id"].as_str().unwrap();
    h.drain().await;
    let out_dir = get_archive(h.db.pool(), id).await.unwrap().unwrap().out_dir;
    assert!(std::path::Path::new(&out_dir).is_dir());

    let response = send(h.app(), "DELETE", &format!("/api/archive/{id}"), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["ok"], true);

    assert!(get_archive(h.db.pool(), id).await.unwrap().is_none());
    assert!(!std::path::Path::new(&out_dir).exists());

    let again = send(h.app(), "DELETE", &format!("/api/archive/{id}"), None).await;
    assert_eq!(again.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_disabled_is_forbidden() {
    let h = harness_with(|c| c.allow_delete = false).await;
    let submitted = submit(h.app(), "https://example.com/a").await;
    let id = submitted["id"].as_str().unwrap();

    let response = send(h.app(), "DELETE", &format!("/api/archive/{id}"), None).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(get_archive(h.db.pool(), id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_healthz_reports_queue_and_counts() {
    let h = harness().await;
    submit(h.app(), "https://example.com/a").await;

    let response = send(h.app(), "GET", "/healthz", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let health = body_json(response).await;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["queue"]["pending"], 1);
    assert_eq!(health["archives"]["QUEUED"], 1);
}

#[tokio::test]
async fn test_unknown_route_is_json_404() {
    let h = harness().await;

    let response = send(h.app(), "GET", "/api/nothing-here", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(body_json(response).await["error"].is_string());
}
