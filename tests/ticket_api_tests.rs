use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use opsdesk::tickets::{SqliteTicketRepository, TicketService, TicketsState, build_router};

async fn app() -> (TempDir, Router) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("tickets.db").display());
    let repository = SqliteTicketRepository::connect(&url, 2).await.unwrap();
    let service = TicketService::new(Arc::new(repository));
    let router = build_router(
        TicketsState::new(service, false),
        &["http://localhost:5173".to_string()],
    );
    (dir, router)
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create_label(app: &Router, name: &str) -> i64 {
    let (status, label) = call(app, Method::POST, "/api/v1/labels", Some(json!({ "name": name }))).await;
    assert_eq!(status, StatusCode::CREATED);
    label["id"].as_i64().unwrap()
}

async fn create_ticket(app: &Router, title: &str, label_ids: &[i64]) -> Value {
    let (status, ticket) = call(
        app,
        Method::POST,
        "/api/v1/tickets",
        Some(json!({ "title": title, "label_ids": label_ids })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    ticket
}

#[tokio::test]
async fn health_and_welcome_respond() {
    let (_dir, app) = app().await;

    let (status, body) = call(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

    let (status, body) = call(&app, Method::GET, "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["health"], "/health");
}

#[tokio::test]
async fn ticket_lifecycle_round_trip() {
    let (_dir, app) = app().await;
    let bug = create_label(&app, "bug").await;

    let ticket = create_ticket(&app, "Fix login", &[bug, bug]).await;
    let id = ticket["id"].as_i64().unwrap();
    assert_eq!(ticket["status"], "open");
    assert_eq!(ticket["labels"].as_array().unwrap().len(), 1);
    assert_eq!(ticket["labels"][0]["color"], "#6B7280");

    let (status, updated) = call(
        &app,
        Method::PUT,
        &format!("/api/v1/tickets/{id}"),
        Some(json!({ "description": "steps to reproduce" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["title"], "Fix login");
    assert_eq!(updated["description"], "steps to reproduce");

    let (_, cleared) = call(
        &app,
        Method::PUT,
        &format!("/api/v1/tickets/{id}"),
        Some(json!({ "description": null })),
    )
    .await;
    assert_eq!(cleared["description"], Value::Null);

    let (status, done) = call(&app, Method::POST, &format!("/api/v1/tickets/{id}/complete"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["status"], "completed");

    let (_, reopened) = call(&app, Method::POST, &format!("/api/v1/tickets/{id}/uncomplete"), None).await;
    assert_eq!(reopened["status"], "open");

    let (_, cancelled) = call(&app, Method::POST, &format!("/api/v1/tickets/{id}/cancel"), None).await;
    assert_eq!(cancelled["status"], "cancelled");

    let (status, body) = call(&app, Method::DELETE, &format!("/api/v1/tickets/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (status, body) = call(&app, Method::GET, &format!("/api/v1/tickets/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
    assert_eq!(body["error"]["message"], format!("Ticket with id {id} not found"));
}

#[tokio::test]
async fn listing_filters_searches_and_paginates() {
    let (_dir, app) = app().await;
    let urgent = create_label(&app, "urgent").await;

    create_ticket(&app, "Alpha task", &[urgent]).await;
    create_ticket(&app, "Beta task", &[]).await;
    let gamma = create_ticket(&app, "Gamma chore", &[urgent]).await;
    call(
        &app,
        Method::POST,
        &format!("/api/v1/tickets/{}/complete", gamma["id"]),
        None,
    )
    .await;

    let (status, page) = call(&app, Method::GET, "/api/v1/tickets?page_size=2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["data"].as_array().unwrap().len(), 2);
    assert_eq!(page["pagination"]["total"], 3);
    assert_eq!(page["pagination"]["total_pages"], 2);

    let (_, page) = call(
        &app,
        Method::GET,
        &format!("/api/v1/tickets?label_ids={urgent}&status=open"),
        None,
    )
    .await;
    let titles: Vec<&str> = page["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["Alpha task"]);

    let (_, page) = call(
        &app,
        Method::GET,
        "/api/v1/tickets?search=TASK&sort_by=title&sort_order=asc",
        None,
    )
    .await;
    assert_eq!(page["data"][0]["title"], "Alpha task");
    assert_eq!(page["data"][1]["title"], "Beta task");

    let (status, body) = call(&app, Method::GET, "/api/v1/tickets?status=done", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_STATUS");
}

#[tokio::test]
async fn labels_attach_detach_and_stay_unique() {
    let (_dir, app) = app().await;
    let ui = create_label(&app, "ui").await;
    let ticket = create_ticket(&app, "Polish header", &[]).await;
    let id = ticket["id"].as_i64().unwrap();

    let (status, attached) = call(
        &app,
        Method::POST,
        &format!("/api/v1/tickets/{id}/labels/{ui}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(attached["labels"][0]["name"], "ui");

    let (_, detached) = call(
        &app,
        Method::DELETE,
        &format!("/api/v1/tickets/{id}/labels/{ui}"),
        None,
    )
    .await;
    assert!(detached["labels"].as_array().unwrap().is_empty());

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/api/v1/tickets/{id}/labels/999"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["message"], "Label with id 999 not found");

    let (status, body) = call(&app, Method::POST, "/api/v1/labels", Some(json!({ "name": "ui" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");

    let (status, _) = call(&app, Method::DELETE, &format!("/api/v1/labels/{ui}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, labels) = call(&app, Method::GET, "/api/v1/labels", None).await;
    assert!(labels["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn invalid_input_uses_the_error_envelope() {
    let (_dir, app) = app().await;

    let (status, body) = call(&app, Method::POST, "/api/v1/tickets", Some(json!({ "title": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/v1/labels",
        Some(json!({ "name": "x", "color": "red" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, body) = call(&app, Method::GET, "/api/v1/tickets/abc", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/v1/tickets",
        Some(json!({ "title": "t", "label_ids": [42] })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["message"], "Label with id 42 not found");
}

#[tokio::test]
async fn huge_page_numbers_return_an_empty_page() {
    let (_dir, app) = app().await;
    create_ticket(&app, "Only ticket", &[]).await;

    let (status, page) = call(
        &app,
        Method::GET,
        "/api/v1/tickets?page=9223372036854775807&page_size=100",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(page["data"].as_array().unwrap().is_empty());
    assert_eq!(page["pagination"]["page"], i64::MAX);
    assert_eq!(page["pagination"]["total"], 1);
}

#[tokio::test]
async fn search_ignores_case_beyond_ascii() {
    let (_dir, app) = app().await;
    create_ticket(&app, "Émile bug", &[]).await;
    create_ticket(&app, "Plain task", &[]).await;

    for term in ["%C3%89mile", "%C3%A9MILE"] {
        let (status, page) = call(&app, Method::GET, &format!("/api/v1/tickets?search={term}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["pagination"]["total"], 1, "{term}");
        assert_eq!(page["data"][0]["title"], "Émile bug");
    }
}
