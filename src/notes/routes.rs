//! Note CRUD handlers.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use super::store::{Note, NoteStore, StoreError};

pub type SharedStore = Arc<dyn NoteStore>;

const TEXT_MIN_CHARS: usize = 5;
const TEXT_MAX_CHARS: usize = 5000;
const ID_MAX_LEN: usize = 15;
const PAGE_LIMIT_MAX: usize = 500;
const DEFAULT_PAGE_LIMIT: usize = 10;

/// Routes for the notes API.
pub fn router(store: SharedStore) -> Router {
    Router::new()
        .route("/", post(create_note).get(list_notes))
        .route("/:id", get(read_note).put(update_note).delete(delete_note))
        .with_state(store)
}

#[derive(Debug, Deserialize)]
struct CreateNote {
    text: String,
    /// Milliseconds since the Unix epoch
    date: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct UpdateNote {
    text: Option<String>,
    date: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
    page: Option<usize>,
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "success": false, "message": message.into() })),
    )
        .into_response()
}

fn store_failure(err: StoreError) -> Response {
    error!(error = %err, "Note store request failed");
    failure(StatusCode::INTERNAL_SERVER_ERROR, "Error connecting to the database.")
}

fn invalid_json() -> Response {
    failure(StatusCode::BAD_REQUEST, "Invalid JSON in the request body")
}

fn parse_id(raw: &str) -> Result<u64, Response> {
    if raw.len() > ID_MAX_LEN {
        return Err(failure(StatusCode::BAD_REQUEST, "note id is too long"));
    }
    match raw.parse::<u64>() {
        Ok(0) => Err(failure(StatusCode::BAD_REQUEST, "note id must be greater than 0")),
        Ok(id) => Ok(id),
        Err(_) => Err(failure(StatusCode::BAD_REQUEST, "note id must be a number")),
    }
}

fn check_text(text: &str) -> Result<(), Response> {
    let chars = text.chars().count();
    if (TEXT_MIN_CHARS..=TEXT_MAX_CHARS).contains(&chars) {
        Ok(())
    } else {
        Err(failure(
            StatusCode::BAD_REQUEST,
            format!(
                "text must be between {} and {} characters",
                TEXT_MIN_CHARS, TEXT_MAX_CHARS
            ),
        ))
    }
}

fn parse_date(millis: i64) -> Result<DateTime<Utc>, Response> {
    match DateTime::from_timestamp_millis(millis) {
        Some(date) if date >= Utc::now() => Ok(date),
        Some(_) => Err(failure(StatusCode::BAD_REQUEST, "date must not be in the past")),
        None => Err(failure(StatusCode::BAD_REQUEST, "date is out of range")),
    }
}

async fn create_note(
    State(store): State<SharedStore>,
    payload: Result<Json<CreateNote>, JsonRejection>,
) -> Response {
    let Ok(Json(payload)) = payload else {
        return invalid_json();
    };
    if let Err(response) = check_text(&payload.text) {
        return response;
    }
    let date = match payload.date.map(parse_date).transpose() {
        Ok(date) => date.unwrap_or_else(Utc::now),
        Err(response) => return response,
    };

    match store.find_by_text(&payload.text).await {
        Ok(Some(_)) => return Json(json!({ "message": "already exists" })).into_response(),
        Ok(None) => {}
        Err(err) => return store_failure(err),
    }

    match store.create(payload.text, date).await {
        Ok(note) => Json(json!({ "message": "Note Created", "note": note })).into_response(),
        Err(err) => store_failure(err),
    }
}

async fn read_note(State(store): State<SharedStore>, Path(raw_id): Path<String>) -> Response {
    let id = match parse_id(&raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match store.get(id).await {
        Ok(Some(note)) => Json(json!({
            "success": true,
            "message": "A note found",
            "note": note,
        }))
        .into_response(),
        Ok(None) => failure(StatusCode::NOT_FOUND, "note not found"),
        Err(err) => store_failure(err),
    }
}

async fn update_note(
    State(store): State<SharedStore>,
    Path(raw_id): Path<String>,
    payload: Result<Json<UpdateNote>, JsonRejection>,
) -> Response {
    let Ok(Json(payload)) = payload else {
        return invalid_json();
    };
    let id = match parse_id(&raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    if let Some(text) = &payload.text {
        if let Err(response) = check_text(text) {
            return response;
        }
    }
    let date = match payload.date.map(parse_date).transpose() {
        Ok(date) => date,
        Err(response) => return response,
    };

    let existing = match store.get(id).await {
        Ok(Some(note)) => note,
        Ok(None) => return failure(StatusCode::NOT_FOUND, "note not found"),
        Err(err) => return store_failure(err),
    };

    let updated = Note {
        id,
        text: payload.text.unwrap_or(existing.text),
        date: date.unwrap_or(existing.date),
    };
    match store.update(updated).await {
        Ok(true) => Json(json!({ "success": true, "message": "successfully updated" })).into_response(),
        Ok(false) => failure(StatusCode::NOT_FOUND, "note not found"),
        Err(err) => store_failure(err),
    }
}

async fn delete_note(State(store): State<SharedStore>, Path(raw_id): Path<String>) -> Response {
    let id = match parse_id(&raw_id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match store.delete(id).await {
        Ok(true) => Json(json!({ "success": true, "message": "Note Deleted" })).into_response(),
        Ok(false) => failure(StatusCode::NOT_FOUND, "note not found"),
        Err(err) => store_failure(err),
    }
}

async fn list_notes(
    State(store): State<SharedStore>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Response {
    let Ok(Query(params)) = params else {
        return failure(StatusCode::BAD_REQUEST, "limit and page must be positive integers");
    };
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    let page = params.page.unwrap_or(1);

    if !(1..=PAGE_LIMIT_MAX).contains(&limit) {
        return failure(
            StatusCode::BAD_REQUEST,
            format!("limit must be between 1 and {}", PAGE_LIMIT_MAX),
        );
    }
    if page == 0 {
        return failure(StatusCode::BAD_REQUEST, "page must be greater than 0");
    }

    match store.page(limit, page).await {
        Ok(notes) => Json(json!({
            "success": true,
            "message": "Successfully retrieved",
            "notes": notes,
        }))
        .into_response(),
        Err(err) => store_failure(err),
    }
}
