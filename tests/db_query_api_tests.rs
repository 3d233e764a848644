use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use serde_json::{Value, json};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tempfile::TempDir;
use tower::ServiceExt;

use opsdesk::dbquery::model::GeneratedSql;
use opsdesk::dbquery::nl::NlError;
use opsdesk::dbquery::{
    AdapterRegistry, Catalog, ConnectionManager, DbQueryService, NlRequest, SqlGenerator,
    build_router,
};

/// Answers every question with a fixed statement.
struct CannedGenerator {
    sql: &'static str,
}

#[async_trait]
impl SqlGenerator for CannedGenerator {
    async fn generate(&self, request: &NlRequest) -> Result<GeneratedSql, NlError> {
        assert!(request.schema_context.contains("Table: main.items"));
        assert_eq!(request.db_type, "sqlite");
        Ok(GeneratedSql {
            sql: self.sql.to_string(),
            explanation: format!("answers: {}", request.question),
        })
    }
}

struct Harness {
    _dir: TempDir,
    app: Router,
    source_url: String,
}

async fn seed_source(url: &str) {
    let pool = SqlitePoolOptions::new()
        .connect_with(SqliteConnectOptions::from_str(url).unwrap().create_if_missing(true))
        .await
        .unwrap();
    sqlx::raw_sql(
        "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL, price REAL);
         CREATE VIEW expensive AS SELECT id, name FROM items WHERE price > 10;
         INSERT INTO items (name, price) VALUES ('pen', 1.5), ('lamp', 25.0), ('desk', 140.0);",
    )
    .execute(&pool)
    .await
    .unwrap();
    pool.close().await;
}

async fn harness(generated: &'static str, max_rows: usize) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let source_url = format!("sqlite://{}", dir.path().join("shop.db").display());
    seed_source(&source_url).await;

    let catalog = Catalog::open(&dir.path().join("catalog").join("catalog.db"))
        .await
        .unwrap();
    let connections = Arc::new(ConnectionManager::new(Arc::new(AdapterRegistry::with_builtin())));
    let service = DbQueryService::new(
        catalog,
        connections,
        Arc::new(CannedGenerator { sql: generated }),
        max_rows,
    );

    Harness {
        _dir: dir,
        app: build_router(service, &[]),
        source_url,
    }
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

async fn add_shop(h: &Harness) -> Value {
    let (status, body) = call(
        &h.app,
        Method::PUT,
        "/api/v1/dbs/shop",
        Some(json!({ "url": h.source_url })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body
}

#[tokio::test]
async fn health_reports_healthy() {
    let h = harness("SELECT 1", 100).await;
    let (status, body) = call(&h.app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "healthy" }));
}

#[tokio::test]
async fn connection_lifecycle() {
    let h = harness("SELECT 1", 100).await;

    let summary = add_shop(&h).await;
    assert_eq!(summary["name"], "shop");
    assert_eq!(summary["tableCount"], 1);
    assert_eq!(summary["viewCount"], 1);

    let (status, body) = call(
        &h.app,
        Method::PUT,
        "/api/v1/dbs/shop",
        Some(json!({ "url": h.source_url })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONNECTION_ALREADY_EXISTS");

    let (status, detail) = call(&h.app, Method::GET, "/api/v1/dbs/shop", None).await;
    assert_eq!(status, StatusCode::OK);
    let tables = detail["tables"].as_array().unwrap();
    assert_eq!(tables.len(), 2);
    assert_eq!(tables[0]["tableName"], "items");
    assert_eq!(tables[0]["tableType"], "table");
    assert_eq!(tables[0]["schemaName"], "main");
    assert_eq!(tables[0]["columns"][0]["columnName"], "id");
    assert_eq!(tables[0]["columns"][0]["isPrimaryKey"], true);
    assert_eq!(tables[1]["tableType"], "view");

    let (status, list) = call(&h.app, Method::GET, "/api/v1/dbs", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["data"].as_array().unwrap().len(), 1);

    let (status, refreshed) = call(&h.app, Method::POST, "/api/v1/dbs/shop/refresh", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(refreshed["tables"].as_array().unwrap().len(), 2);

    let (status, _) = call(&h.app, Method::DELETE, "/api/v1/dbs/shop", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = call(&h.app, Method::GET, "/api/v1/dbs/shop", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "CONNECTION_NOT_FOUND");
}

#[tokio::test]
async fn rejected_connections_are_not_stored() {
    let h = harness("SELECT 1", 100).await;

    let (status, body) = call(
        &h.app,
        Method::PUT,
        "/api/v1/dbs/legacy",
        Some(json!({ "url": "oracle://scott:tiger@db/orcl" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_CONNECTION_URL");
    let prefixes = body["error"]["details"]["supportedPrefixes"].as_array().unwrap();
    assert!(prefixes.contains(&json!("sqlite://")));

    let missing = h.source_url.replace("shop.db", "absent.db");
    let (status, body) = call(
        &h.app,
        Method::PUT,
        "/api/v1/dbs/ghost",
        Some(json!({ "url": missing })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "CONNECTION_FAILED");

    for blank in ["", " "] {
        let (status, body) =
            call(&h.app, Method::PUT, "/api/v1/dbs/blank", Some(json!({ "url": blank }))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(body["error"]["message"], "Connection URL is required");
    }

    let (_, list) = call(&h.app, Method::GET, "/api/v1/dbs", None).await;
    assert!(list["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn queries_are_limited_and_guarded() {
    let h = harness("SELECT 1", 2).await;
    add_shop(&h).await;

    let (status, outcome) = call(
        &h.app,
        Method::POST,
        "/api/v1/dbs/shop/query",
        Some(json!({ "sql": "SELECT id, name, price FROM items ORDER BY id" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["rowCount"], 2);
    assert_eq!(outcome["truncated"], true);
    assert_eq!(outcome["columns"][1]["name"], "name");
    assert_eq!(outcome["rows"][0]["name"], "pen");
    assert_eq!(outcome["rows"][1]["price"], 25.0);

    let (status, body) = call(
        &h.app,
        Method::POST,
        "/api/v1/dbs/shop/query",
        Some(json!({ "sql": "DELETE FROM items" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "NON_SELECT_STATEMENT");

    let (status, body) = call(
        &h.app,
        Method::POST,
        "/api/v1/dbs/shop/query",
        Some(json!({ "sql": "SELEC name FROM" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "SQL_VALIDATION_ERROR");

    let (status, body) = call(
        &h.app,
        Method::POST,
        "/api/v1/dbs/shop/query",
        Some(json!({ "sql": "SELECT * FROM missing_table" })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "QUERY_EXECUTION_ERROR");
    assert_eq!(body["error"]["details"]["sql"], "SELECT * FROM missing_table LIMIT 2");

    let (status, body) = call(
        &h.app,
        Method::POST,
        "/api/v1/dbs/nowhere/query",
        Some(json!({ "sql": "SELECT 1" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "CONNECTION_NOT_FOUND");
}

#[tokio::test]
async fn natural_questions_return_checked_sql() {
    let h = harness("SELECT name FROM items WHERE price > 10", 100).await;
    add_shop(&h).await;

    let (status, body) = call(
        &h.app,
        Method::POST,
        "/api/v1/dbs/shop/query/natural",
        Some(json!({ "question": "which items are expensive?" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sql"], "SELECT name FROM items WHERE price > 10");
    assert_eq!(body["explanation"], "answers: which items are expensive?");

    let (status, body) = call(
        &h.app,
        Method::POST,
        "/api/v1/dbs/shop/query/natural",
        Some(json!({ "question": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn generated_writes_are_refused() {
    let h = harness("DROP TABLE items", 100).await;
    add_shop(&h).await;

    let (status, body) = call(
        &h.app,
        Method::POST,
        "/api/v1/dbs/shop/query/natural",
        Some(json!({ "question": "clean up" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "NL_QUERY_GENERATION_ERROR");
}

#[tokio::test]
async fn exactly_max_rows_is_reported_as_truncated() {
    let h = harness("SELECT 1", 3).await;
    add_shop(&h).await;

    let (status, outcome) = call(
        &h.app,
        Method::POST,
        "/api/v1/dbs/shop/query",
        Some(json!({ "sql": "SELECT id FROM items" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["rowCount"], 3);
    assert_eq!(outcome["truncated"], true);
}

#[tokio::test]
async fn failed_refresh_keeps_cached_metadata() {
    let h = harness("SELECT 1", 100).await;
    add_shop(&h).await;

    let path = h.source_url.trim_start_matches("sqlite://").to_string();
    std::fs::remove_file(&path).unwrap();

    let (status, body) = call(&h.app, Method::POST, "/api/v1/dbs/shop/refresh", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "METADATA_EXTRACTION_ERROR");
    assert_eq!(body["error"]["details"]["name"], "shop");

    let (status, detail) = call(&h.app, Method::GET, "/api/v1/dbs/shop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["tableCount"], 1);
    assert_eq!(detail["viewCount"], 1);
    assert_eq!(detail["tables"].as_array().unwrap().len(), 2);
}
