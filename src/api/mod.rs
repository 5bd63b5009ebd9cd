// src/api/mod.rs

//! HTTP surface for schedule management.
//!
//! ```text
//! POST   /v1/schedule        create  → 201 {"id": ...}
//! GET    /v1/schedule        list    → 200 {"schedules": [...]}
//! GET    /v1/schedule/{id}   get     → 200 schedule + trigger status
//! PUT    /v1/schedule/{id}   update  → 204
//! DELETE /v1/schedule/{id}   delete  → 204
//! ```

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Schedule, ScheduleDetails, ScheduleInput};
use crate::services::ScheduleService;

#[derive(Debug, Serialize)]
struct CreatedResponse {
    id: Uuid,
}

#[derive(Debug, Serialize)]
struct ListResponse {
    schedules: Vec<Schedule>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Build the `/v1/schedule` router.
pub fn router(service: Arc<ScheduleService>) -> Router {
    Router::new()
        .route("/v1/schedule", get(list_schedules).post(create_schedule))
        .route(
            "/v1/schedule/:id",
            get(get_schedule).put(update_schedule).delete(delete_schedule),
        )
        .with_state(service)
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RunInProgress(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("request failed: {}", self);
        }
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn body(payload: std::result::Result<Json<ScheduleInput>, JsonRejection>) -> Result<ScheduleInput> {
    payload
        .map(|Json(input)| input)
        .map_err(|rejection| AppError::validation(rejection.body_text()))
}

async fn create_schedule(
    State(service): State<Arc<ScheduleService>>,
    payload: std::result::Result<Json<ScheduleInput>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedResponse>)> {
    let id = service.create(body(payload)?).await?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

async fn list_schedules(State(service): State<Arc<ScheduleService>>) -> Result<Json<ListResponse>> {
    let schedules = service.list().await?;
    Ok(Json(ListResponse { schedules }))
}

async fn get_schedule(
    State(service): State<Arc<ScheduleService>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ScheduleDetails>> {
    Ok(Json(service.get(id).await?))
}

async fn update_schedule(
    State(service): State<Arc<ScheduleService>>,
    Path(id): Path<Uuid>,
    payload: std::result::Result<Json<ScheduleInput>, JsonRejection>,
) -> Result<StatusCode> {
    service.update(id, body(payload)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_schedule(
    State(service): State<Arc<ScheduleService>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::services::{FakeTrigger, sample_input};
    use crate::storage::SqliteStore;

    async fn app() -> Router {
        let store = Arc::new(SqliteStore::in_memory().await.unwrap());
        let trigger = Arc::new(FakeTrigger::default());
        router(Arc::new(ScheduleService::new(store, trigger)))
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
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

    #[tokio::test]
    async fn test_schedule_lifecycle_over_http() {
        let app = app().await;
        let payload = serde_json::to_value(sample_input()).unwrap();

        let (status, created) = send(&app, Method::POST, "/v1/schedule", Some(payload)).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_str().unwrap().to_string();
        let uri = format!("/v1/schedule/{id}");

        let (status, details) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(details["keyword"], "rust");
        assert_eq!(details["schedule"], "0 * * * *");
        assert_eq!(details["last_run_status"], "COMPLETED");

        let mut changed = sample_input();
        changed.keyword = "tokio".into();
        let (status, _) = send(
            &app,
            Method::PUT,
            &uri,
            Some(serde_json::to_value(changed).unwrap()),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, list) = send(&app, Method::GET, "/v1/schedule", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["schedules"][0]["keyword"], "tokio");

        let (status, _) = send(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_invalid_input_is_bad_request() {
        let app = app().await;
        let (status, _) = send(
            &app,
            Method::POST,
            "/v1/schedule",
            Some(json!({"keyword": "", "schedule": "0 * * * *", "sources": [], "recipients": []})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, Method::POST, "/v1/schedule", Some(json!({"keyword": 3}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, list) = send(&app, Method::GET, "/v1/schedule", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["schedules"], json!([]));
    }

    #[tokio::test]
    async fn test_update_with_foreign_source_id_is_bad_request() {
        let app = app().await;
        let payload = serde_json::to_value(sample_input()).unwrap();
        let (_, first) = send(&app, Method::POST, "/v1/schedule", Some(payload.clone())).await;
        let (_, second) = send(&app, Method::POST, "/v1/schedule", Some(payload)).await;

        let (_, other) = send(
            &app,
            Method::GET,
            &format!("/v1/schedule/{}", second["id"].as_str().unwrap()),
            None,
        )
        .await;
        let mut stolen = serde_json::to_value(sample_input()).unwrap();
        stolen["sources"][0]["id"] = other["sources"][0]["id"].clone();

        let (status, body) = send(
            &app,
            Method::PUT,
            &format!("/v1/schedule/{}", first["id"].as_str().unwrap()),
            Some(stolen),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("does not belong"));
    }

    #[tokio::test]
    async fn test_unknown_schedule_is_not_found() {
        let app = app().await;
        let uri = format!("/v1/schedule/{}", Uuid::now_v7());
        let (status, _) = send(&app, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::RunInProgress(Uuid::nil()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::dual_write("drift").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
