use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use super::model::{
    AddConnectionRequest, ConnectionDetail, ConnectionList, ConnectionSummary, GeneratedSql,
    HealthStatus, NaturalQueryRequest, QueryOutcome, QueryRequest,
};
use super::service::DbQueryService;
use crate::web::{self, cors_layer, json_body};

pub fn build_router(service: DbQueryService, cors_origins: &[String]) -> Router {
    let api = Router::new()
        .route("/dbs", get(list_databases))
        .route(
            "/dbs/:name",
            get(get_database).put(add_database).delete(delete_database),
        )
        .route("/dbs/:name/refresh", post(refresh_database))
        .route("/dbs/:name/query", post(execute_query))
        .route("/dbs/:name/query/natural", post(natural_query));

    Router::new()
        .route("/health", get(healthcheck))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
        .with_state(service)
}

async fn healthcheck() -> Json<HealthStatus> {
    Json(HealthStatus { status: "healthy" })
}

async fn list_databases(State(service): State<DbQueryService>) -> web::Result<Json<ConnectionList>> {
    Ok(Json(service.list_connections().await?))
}

async fn add_database(
    State(service): State<DbQueryService>,
    Path(name): Path<String>,
    payload: Result<Json<AddConnectionRequest>, JsonRejection>,
) -> web::Result<(StatusCode, Json<ConnectionSummary>)> {
    let request = json_body(payload)?;
    let summary = service.add_connection(&name, &request.url).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn get_database(
    State(service): State<DbQueryService>,
    Path(name): Path<String>,
) -> web::Result<Json<ConnectionDetail>> {
    Ok(Json(service.get_connection(&name).await?))
}

async fn refresh_database(
    State(service): State<DbQueryService>,
    Path(name): Path<String>,
) -> web::Result<Json<ConnectionDetail>> {
    Ok(Json(service.refresh_connection(&name).await?))
}

async fn delete_database(
    State(service): State<DbQueryService>,
    Path(name): Path<String>,
) -> web::Result<StatusCode> {
    service.delete_connection(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn execute_query(
    State(service): State<DbQueryService>,
    Path(name): Path<String>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> web::Result<Json<QueryOutcome>> {
    let request = json_body(payload)?;
    Ok(Json(service.execute_query(&name, &request.sql).await?))
}

async fn natural_query(
    State(service): State<DbQueryService>,
    Path(name): Path<String>,
    payload: Result<Json<NaturalQueryRequest>, JsonRejection>,
) -> web::Result<Json<GeneratedSql>> {
    let request = json_body(payload)?;
    Ok(Json(service.natural_query(&name, &request.question).await?))
}
