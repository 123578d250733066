//! REST API over the instance store.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/healthz` | Liveness |
//! | GET | `/metrics` | Prometheus exposition |
//! | GET | `/api/v1/instances` | List instances (`?kind=` filter) |
//! | GET | `/api/v1/instances/{ns}` | List one namespace (`?kind=` filter) |
//! | GET | `/api/v1/instances/{ns}/{name}` | Get one instance |
//! | PUT | `/api/v1/instances/{ns}/{name}` | Create or update desired spec |
//! | DELETE | `/api/v1/instances/{ns}/{name}` | Delete an instance |
//!
//! Writes only touch the store; the per-kind watchers pick them up.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

use fleet_metrics::MetricsRegistry;
use fleet_state::{StateError, StateStore, WorkloadKind, WorkloadSpec, instance_key};

#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub metrics: Arc<MetricsRegistry>,
}

pub fn build_router(store: StateStore, metrics: Arc<MetricsRegistry>) -> Router {
    let state = ApiState { store, metrics };

    let api_routes = Router::new()
        .route("/instances", get(list_instances))
        .route("/instances/{namespace}", get(list_namespace))
        .route(
            "/instances/{namespace}/{name}",
            get(get_instance).put(put_instance).delete(delete_instance),
        );

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(healthz))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
}

#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> axum::response::Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn state_error(e: StateError) -> axum::response::Response {
    match e {
        StateError::KindMismatch { .. } => error_response(&e.to_string(), StatusCode::CONFLICT),
        StateError::NotFound(_) => error_response(&e.to_string(), StatusCode::NOT_FOUND),
        _ => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render_prometheus(),
    )
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub kind: Option<WorkloadKind>,
}

/// GET /api/v1/instances
async fn list_instances(State(state): State<ApiState>, Query(query): Query<ListQuery>) -> impl IntoResponse {
    let listed = match query.kind {
        Some(kind) => state.store.list_by_kind(kind),
        None => state.store.list_instances(),
    };
    match listed {
        Ok(instances) => ApiResponse::ok(instances).into_response(),
        Err(e) => state_error(e),
    }
}

/// GET /api/v1/instances/{ns}
async fn list_namespace(
    State(state): State<ApiState>,
    Path(namespace): Path<String>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    match state.store.list_namespace(&namespace) {
        Ok(mut instances) => {
            if let Some(kind) = query.kind {
                instances.retain(|i| i.kind == kind);
            }
            ApiResponse::ok(instances).into_response()
        }
        Err(e) => state_error(e),
    }
}

/// GET /api/v1/instances/{ns}/{name}
async fn get_instance(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.store.get_instance(&instance_key(&namespace, &name)) {
        Ok(Some(instance)) => ApiResponse::ok(instance).into_response(),
        Ok(None) => error_response("instance not found", StatusCode::NOT_FOUND),
        Err(e) => state_error(e),
    }
}

/// Body of a PUT: the kind is fixed at creation.
#[derive(Debug, Serialize, Deserialize)]
pub struct InstanceRequest {
    pub kind: WorkloadKind,
    pub spec: WorkloadSpec,
}

/// PUT /api/v1/instances/{ns}/{name}
async fn put_instance(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
    Json(req): Json<InstanceRequest>,
) -> impl IntoResponse {
    let existed = match state.store.get_instance(&instance_key(&namespace, &name)) {
        Ok(found) => found.is_some(),
        Err(e) => return state_error(e),
    };
    match state.store.upsert_instance(&namespace, &name, req.kind, req.spec) {
        Ok(instance) => {
            info!(%namespace, %name, kind = %instance.kind, generation = instance.generation, "instance stored");
            let status = if existed { StatusCode::OK } else { StatusCode::CREATED };
            (status, ApiResponse::ok(instance)).into_response()
        }
        Err(e) => state_error(e),
    }
}

/// DELETE /api/v1/instances/{ns}/{name}
async fn delete_instance(
    State(state): State<ApiState>,
    Path((namespace, name)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.store.delete_instance(&instance_key(&namespace, &name)) {
        Ok(true) => {
            info!(%namespace, %name, "instance deleted");
            ApiResponse::ok("deleted").into_response()
        }
        Ok(false) => error_response("instance not found", StatusCode::NOT_FOUND),
        Err(e) => state_error(e),
    }
}
