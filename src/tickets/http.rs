use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use super::dto::{
    CreateLabelRequest, CreateTicketRequest, HealthResponse, LabelList, ListTicketsParams,
    UpdateLabelRequest, UpdateTicketRequest, WelcomeResponse, parse_id,
};
use super::error::TicketError;
use super::model::{Label, Ticket, TicketPage};
use super::service::TicketService;
use crate::web::{self, WebError, cors_layer, json_body};

#[derive(Clone)]
pub struct TicketsState {
    pub service: TicketService,
    pub expose_internal_errors: bool,
}

impl TicketsState {
    pub fn new(service: TicketService, expose_internal_errors: bool) -> Self {
        Self {
            service,
            expose_internal_errors,
        }
    }

    fn reject(&self, error: TicketError) -> WebError {
        error.into_web_error(self.expose_internal_errors)
    }

    fn id(&self, field: &str, raw: &str) -> web::Result<i64> {
        parse_id(field, raw).map_err(|error| self.reject(error))
    }
}

pub fn build_router(state: TicketsState, cors_origins: &[String]) -> Router {
    let api = Router::new()
        .route("/tickets", get(list_tickets).post(create_ticket))
        .route(
            "/tickets/:id",
            get(get_ticket).put(update_ticket).delete(delete_ticket),
        )
        .route("/tickets/:id/complete", post(complete_ticket))
        .route("/tickets/:id/uncomplete", post(uncomplete_ticket))
        .route("/tickets/:id/cancel", post(cancel_ticket))
        .route(
            "/tickets/:id/labels/:label_id",
            post(add_label).delete(remove_label),
        )
        .route("/labels", get(list_labels).post(create_label))
        .route(
            "/labels/:id",
            get(get_label).put(update_label).delete(delete_label),
        );

    Router::new()
        .route("/", get(welcome))
        .route("/health", get(healthcheck))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

async fn healthcheck() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn welcome() -> Json<WelcomeResponse> {
    Json(WelcomeResponse {
        message: "Welcome to Ticket Manager API",
        health: "/health",
    })
}

async fn list_tickets(
    State(state): State<TicketsState>,
    Query(params): Query<ListTicketsParams>,
) -> web::Result<Json<TicketPage>> {
    let query = params.into_query().map_err(|error| state.reject(error))?;
    let page = state
        .service
        .list_tickets(query)
        .await
        .map_err(|error| state.reject(error))?;
    Ok(Json(page))
}

async fn get_ticket(
    State(state): State<TicketsState>,
    Path(id): Path<String>,
) -> web::Result<Json<Ticket>> {
    let id = state.id("ticket_id", &id)?;
    let ticket = state
        .service
        .get_ticket(id)
        .await
        .map_err(|error| state.reject(error))?;
    Ok(Json(ticket))
}

async fn create_ticket(
    State(state): State<TicketsState>,
    payload: Result<Json<CreateTicketRequest>, JsonRejection>,
) -> web::Result<(StatusCode, Json<Ticket>)> {
    let ticket = json_body(payload)?
        .into_domain()
        .map_err(|error| state.reject(error))?;
    let created = state
        .service
        .create_ticket(ticket)
        .await
        .map_err(|error| state.reject(error))?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_ticket(
    State(state): State<TicketsState>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateTicketRequest>, JsonRejection>,
) -> web::Result<Json<Ticket>> {
    let id = state.id("ticket_id", &id)?;
    let patch = json_body(payload)?
        .into_domain()
        .map_err(|error| state.reject(error))?;
    let ticket = state
        .service
        .update_ticket(id, patch)
        .await
        .map_err(|error| state.reject(error))?;
    Ok(Json(ticket))
}

async fn delete_ticket(
    State(state): State<TicketsState>,
    Path(id): Path<String>,
) -> web::Result<StatusCode> {
    let id = state.id("ticket_id", &id)?;
    state
        .service
        .delete_ticket(id)
        .await
        .map_err(|error| state.reject(error))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn complete_ticket(
    State(state): State<TicketsState>,
    Path(id): Path<String>,
) -> web::Result<Json<Ticket>> {
    let id = state.id("ticket_id", &id)?;
    let ticket = state
        .service
        .complete_ticket(id)
        .await
        .map_err(|error| state.reject(error))?;
    Ok(Json(ticket))
}

async fn uncomplete_ticket(
    State(state): State<TicketsState>,
    Path(id): Path<String>,
) -> web::Result<Json<Ticket>> {
    let id = state.id("ticket_id", &id)?;
    let ticket = state
        .service
        .uncomplete_ticket(id)
        .await
        .map_err(|error| state.reject(error))?;
    Ok(Json(ticket))
}

async fn cancel_ticket(
    State(state): State<TicketsState>,
    Path(id): Path<String>,
) -> web::Result<Json<Ticket>> {
    let id = state.id("ticket_id", &id)?;
    let ticket = state
        .service
        .cancel_ticket(id)
        .await
        .map_err(|error| state.reject(error))?;
    Ok(Json(ticket))
}

async fn add_label(
    State(state): State<TicketsState>,
    Path((id, label_id)): Path<(String, String)>,
) -> web::Result<Json<Ticket>> {
    let id = state.id("ticket_id", &id)?;
    let label_id = state.id("label_id", &label_id)?;
    let ticket = state
        .service
        .add_label(id, label_id)
        .await
        .map_err(|error| state.reject(error))?;
    Ok(Json(ticket))
}

async fn remove_label(
    State(state): State<TicketsState>,
    Path((id, label_id)): Path<(String, String)>,
) -> web::Result<Json<Ticket>> {
    let id = state.id("ticket_id", &id)?;
    let label_id = state.id("label_id", &label_id)?;
    let ticket = state
        .service
        .remove_label(id, label_id)
        .await
        .map_err(|error| state.reject(error))?;
    Ok(Json(ticket))
}

async fn list_labels(State(state): State<TicketsState>) -> web::Result<Json<LabelList>> {
    let labels = state
        .service
        .list_labels()
        .await
        .map_err(|error| state.reject(error))?;
    Ok(Json(LabelList { data: labels }))
}

async fn get_label(
    State(state): State<TicketsState>,
    Path(id): Path<String>,
) -> web::Result<Json<Label>> {
    let id = state.id("label_id", &id)?;
    let label = state
        .service
        .get_label(id)
        .await
        .map_err(|error| state.reject(error))?;
    Ok(Json(label))
}

async fn create_label(
    State(state): State<TicketsState>,
    payload: Result<Json<CreateLabelRequest>, JsonRejection>,
) -> web::Result<(StatusCode, Json<Label>)> {
    let label = json_body(payload)?
        .into_domain()
        .map_err(|error| state.reject(error))?;
    let created = state
        .service
        .create_label(label)
        .await
        .map_err(|error| state.reject(error))?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_label(
    State(state): State<TicketsState>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateLabelRequest>, JsonRejection>,
) -> web::Result<Json<Label>> {
    let id = state.id("label_id", &id)?;
    let patch = json_body(payload)?
        .into_domain()
        .map_err(|error| state.reject(error))?;
    let label = state
        .service
        .update_label(id, patch)
        .await
        .map_err(|error| state.reject(error))?;
    Ok(Json(label))
}

async fn delete_label(
    State(state): State<TicketsState>,
    Path(id): Path<String>,
) -> web::Result<StatusCode> {
    let id = state.id("label_id", &id)?;
    state
        .service
        .delete_label(id)
        .await
        .map_err(|error| state.reject(error))?;
    Ok(StatusCode::NO_CONTENT)
}
