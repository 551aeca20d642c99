//! Health and admin surface against a running service.

use serde_json::Value;

mod common;

#[tokio::test]
async fn test_liveness_always_ok() {
    let app = common::spawn_app(common::test_config()).await;
    let client = common::http_client();

    let res = client.get(app.url("/health/live")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_readiness_fails_once_shutdown_begins() {
    let app = common::spawn_app(common::test_config()).await;
    let client = common::http_client();

    let res = client.get(app.url("/health/ready")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["checks"]["cache"]["status"], "up");
    assert!(body["checks"].get("database").is_none());

    assert!(app.state.begin());

    let res = client.get(app.url("/health/ready")).send().await.unwrap();
    assert_eq!(res.status(), 503);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "shutting_down");

    // Liveness is unaffected.
    let res = client.get(app.url("/health/live")).send().await.unwrap();
    assert_eq!(res.status(), 200);
}

#[tokio::test]
async fn test_full_health_report() {
    let app = common::spawn_app(common::test_config()).await;
    let client = common::http_client();

    let res = client.get(app.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["shutting_down"], false);
    assert_eq!(body["queue"]["name"], "default");
    assert_eq!(body["websocket_clients"], 0);
}

#[tokio::test]
async fn test_request_id_is_assigned_and_echoed() {
    let app = common::spawn_app(common::test_config()).await;
    let client = common::http_client();

    let res = client.get(app.url("/health/live")).send().await.unwrap();
    assert!(res.headers().contains_key("x-request-id"));

    let res = client
        .get(app.url("/health/live"))
        .header("x-request-id", "req-42")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-request-id"], "req-42");
}

#[tokio::test]
async fn test_admin_requires_bearer_key() {
    let app = common::spawn_app(common::test_config()).await;
    let client = common::http_client();

    let res = client.get(app.url("/admin/status")).send().await.unwrap();
    assert_eq!(res.status(), 401);

    let res = client
        .get(app.url("/admin/status"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);

    let res = client
        .get(app.url("/admin/status"))
        .bearer_auth(common::ADMIN_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "operational");
    assert_eq!(body["instance_id"], "test-instance");
}

#[tokio::test]
async fn test_admin_lists_maintenance_jobs() {
    let app = common::spawn_app(common::test_config()).await;
    let client = common::http_client();

    let res = client
        .get(app.url("/admin/jobs"))
        .bearer_auth(common::ADMIN_KEY)
        .send()
        .await
        .unwrap();
    let jobs: Vec<Value> = res.json().await.unwrap();
    let names: Vec<&str> = jobs.iter().map(|j| j["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["log-system-stats", "system-health-check"]);
    assert!(jobs.iter().all(|j| j["kind"] == "cron"));
}

#[tokio::test]
async fn test_admin_disabled_routes_are_absent() {
    let mut config = common::test_config();
    config.admin.enabled = false;
    let app = common::spawn_app(config).await;
    let client = common::http_client();

    let res = client
        .get(app.url("/admin/status"))
        .bearer_auth(common::ADMIN_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
}
