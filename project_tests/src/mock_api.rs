use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::Value;
use tokio::task::JoinHandle;

#[derive(Default)]
struct Inner {
    /// Newest first, like the real backend.
    vehicles: Vec<Value>,
    list_status: Option<u16>,
    patch_status: Option<u16>,
    list_limits: Vec<Option<usize>>,
    patches: Vec<(String, Value)>,
}

#[derive(Clone, Default)]
struct MockState {
    inner: Arc<Mutex<Inner>>,
}

impl MockState {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Deserialize)]
struct ListQuery {
    limit: Option<usize>,
}

/// In-process REST backend on an ephemeral port. Stops when dropped.
pub struct MockApi {
    pub url: String,
    state: MockState,
    task: JoinHandle<()>,
}

impl MockApi {
    pub async fn start(vehicles: Vec<Value>) -> anyhow::Result<Self> {
        let state = MockState::default();
        state.lock().vehicles = vehicles;

        let app = Router::new()
            .route("/api/vehicles", get(list_vehicles))
            .route("/api/vehicles/{id}/plate", patch(correct_plate))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr: SocketAddr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("mock API stopped: {e}");
            }
        });

        Ok(Self {
            url: format!("http://{addr}"),
            state,
            task,
        })
    }

    /// Every later `GET /api/vehicles` answers with `status`.
    pub fn fail_list_with(&self, status: u16) {
        self.state.lock().list_status = Some(status);
    }

    /// Every later plate correction answers with `status`.
    pub fn fail_patch_with(&self, status: u16) {
        self.state.lock().patch_status = Some(status);
    }

    /// The `limit` query of each list request, in order.
    pub fn list_limits(&self) -> Vec<Option<usize>> {
        self.state.lock().list_limits.clone()
    }

    /// `(id, body)` of each correction request, in order.
    pub fn patches(&self) -> Vec<(String, Value)> {
        self.state.lock().patches.clone()
    }
}

impl Drop for MockApi {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn list_vehicles(State(state): State<MockState>, Query(query): Query<ListQuery>) -> Response {
    let mut inner = state.lock();
    inner.list_limits.push(query.limit);
    if let Some(status) = inner.list_status {
        return status_only(status, "database unavailable");
    }
    let limit = query.limit.unwrap_or(100);
    let items: Vec<Value> = inner.vehicles.iter().take(limit).cloned().collect();
    Json(items).into_response()
}

async fn correct_plate(
    State(state): State<MockState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let mut inner = state.lock();
    inner.patches.push((id.clone(), body.clone()));
    if let Some(status) = inner.patch_status {
        return status_only(status, "plate rejected");
    }
    let Some(plate) = body.get("vehicle_number").cloned() else {
        return status_only(422, "vehicle_number is required");
    };
    match inner.vehicles.iter_mut().find(|v| v["vehicle_id"] == id.as_str()) {
        Some(vehicle) => {
            vehicle["vehicle_number"] = plate;
            Json(vehicle.clone()).into_response()
        }
        None => status_only(404, "Vehicle not found"),
    }
}

fn status_only(status: u16, body: &'static str) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, body).into_response()
}
