// libs/queue-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension, Path, Query, State,
    },
    response::Response,
    Json,
};
use chrono::NaiveDate;
use futures::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::{current_actor, require_staff};

use crate::models::MarkStatusRequest;
use crate::services::broadcaster::{QueueReceiver, WELCOME_MESSAGE};
use crate::state::QueueCellState;

#[derive(Debug, Deserialize)]
pub struct DateQuery {
    pub date: Option<NaiveDate>,
}

// ==============================================================================
// PATIENT-FACING
// ==============================================================================

#[axum::debug_handler]
pub async fn check_in(
    State(state): State<Arc<QueueCellState>>,
    Path(appointment_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = current_actor(&user)?;
    let entry = state.engine.check_in(appointment_id, &actor).await?;

    Ok(Json(json!({
        "success": true,
        "entry": entry,
        "message": format!("Checked in as number {}", entry.queue_number)
    })))
}

#[axum::debug_handler]
pub async fn get_patient_status(
    State(state): State<Arc<QueueCellState>>,
    Path(patient_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = current_actor(&user)?;
    let status = state.engine.patient_status(patient_id, &actor).await?;
    Ok(Json(json!(status)))
}

#[axum::debug_handler]
pub async fn get_patient_notifications(
    State(state): State<Arc<QueueCellState>>,
    Path(patient_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = current_actor(&user)?;
    let notifications = state.engine.notifications(patient_id, &actor).await?;

    Ok(Json(json!({
        "notifications": notifications,
        "total": notifications.len()
    })))
}

// ==============================================================================
// SESSION CONTROL
// ==============================================================================

#[axum::debug_handler]
pub async fn start_queue(
    State(state): State<Arc<QueueCellState>>,
    Path(clinic_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_staff(&current_actor(&user)?)?;
    let status = state.engine.start(clinic_id).await?;

    Ok(Json(json!({
        "success": true,
        "status": status,
        "message": "Queue started"
    })))
}

#[axum::debug_handler]
pub async fn pause_queue(
    State(state): State<Arc<QueueCellState>>,
    Path(clinic_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_staff(&current_actor(&user)?)?;
    let status = state.engine.pause(clinic_id).await?;

    Ok(Json(json!({
        "success": true,
        "status": status,
        "message": "Queue paused"
    })))
}

#[axum::debug_handler]
pub async fn stop_queue(
    State(state): State<Arc<QueueCellState>>,
    Path(clinic_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_staff(&current_actor(&user)?)?;
    let status = state.engine.stop(clinic_id).await?;

    Ok(Json(json!({
        "success": true,
        "status": status,
        "message": "Queue stopped"
    })))
}

// ==============================================================================
// QUEUE PROGRESS
// ==============================================================================

#[axum::debug_handler]
pub async fn call_next(
    State(state): State<Arc<QueueCellState>>,
    Path(clinic_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_staff(&current_actor(&user)?)?;
    let called = state.engine.call_next(clinic_id).await?;

    let message = match &called {
        Some(entry) => format!("Now serving number {}", entry.queue_number),
        None => "No patients waiting".to_string(),
    };

    Ok(Json(json!({
        "success": true,
        "entry": called,
        "message": message
    })))
}

#[axum::debug_handler]
pub async fn mark_entry_status(
    State(state): State<Arc<QueueCellState>>,
    Path((clinic_id, queue_number)): Path<(Uuid, u32)>,
    Extension(user): Extension<User>,
    Json(request): Json<MarkStatusRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&current_actor(&user)?)?;
    let entry = state
        .engine
        .mark_status(clinic_id, queue_number, request.status)
        .await?;

    Ok(Json(json!({
        "success": true,
        "entry": entry
    })))
}

#[axum::debug_handler]
pub async fn fast_track_entry(
    State(state): State<Arc<QueueCellState>>,
    Path((clinic_id, queue_number)): Path<(Uuid, u32)>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_staff(&current_actor(&user)?)?;
    let entry = state.engine.fast_track(clinic_id, queue_number).await?;

    Ok(Json(json!({
        "success": true,
        "entry": entry,
        "message": format!("Number {} fast-tracked", queue_number)
    })))
}

// ==============================================================================
// READS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_clinic_status(
    State(state): State<Arc<QueueCellState>>,
    Path(clinic_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let status = state.engine.clinic_status(clinic_id).await?;
    Ok(Json(json!(status)))
}

#[axum::debug_handler]
pub async fn list_entries(
    State(state): State<Arc<QueueCellState>>,
    Path(clinic_id): Path<Uuid>,
    Query(query): Query<DateQuery>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_staff(&current_actor(&user)?)?;
    let entries = state.engine.entries(clinic_id, query.date).await?;

    Ok(Json(json!({
        "entries": entries,
        "total": entries.len()
    })))
}

#[axum::debug_handler]
pub async fn get_daily_report(
    State(state): State<Arc<QueueCellState>>,
    Path(clinic_id): Path<Uuid>,
    Query(query): Query<DateQuery>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_staff(&current_actor(&user)?)?;
    let report = state.engine.daily_report(clinic_id, query.date).await?;
    Ok(Json(json!(report)))
}

// ==============================================================================
// REAL-TIME DISPLAY
// ==============================================================================

#[axum::debug_handler]
pub async fn queue_socket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<QueueCellState>>,
    Path(clinic_id): Path<Uuid>,
) -> Result<Response, AppError> {
    // Unknown clinics are rejected before the upgrade.
    state.engine.snapshot(clinic_id).await?;
    let updates = state.engine.broadcaster().subscribe(clinic_id).await;

    Ok(ws.on_upgrade(move |socket| stream_queue(socket, state, clinic_id, updates)))
}

async fn stream_queue(socket: WebSocket, state: Arc<QueueCellState>, clinic_id: Uuid, mut updates: QueueReceiver) {
    let (mut sender, mut receiver) = socket.split();
    info!("Queue display connected for clinic {}", clinic_id);

    if sender
        .send(Message::Text(WELCOME_MESSAGE.to_string().into()))
        .await
        .is_err()
    {
        return;
    }
    if !send_current_snapshot(&mut sender, &state, clinic_id).await {
        return;
    }

    loop {
        tokio::select! {
            update = updates.recv() => match update {
                Ok(payload) => {
                    if sender.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Queue display for clinic {} skipped {} updates", clinic_id, skipped);
                    updates = updates.resubscribe();
                    if !send_current_snapshot(&mut sender, &state, clinic_id).await {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    info!("Queue display disconnected from clinic {}", clinic_id);
    state.engine.broadcaster().unsubscribe(clinic_id, updates).await;
}

async fn send_current_snapshot<S>(sender: &mut S, state: &QueueCellState, clinic_id: Uuid) -> bool
where
    S: Sink<Message> + Unpin,
{
    let payload = match state.engine.snapshot(clinic_id).await {
        Ok(snapshot) => match serde_json::to_string(&snapshot) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize queue snapshot for clinic {}: {}", clinic_id, e);
                return true;
            }
        },
        Err(e) => {
            warn!("Failed to load queue snapshot for clinic {}: {}", clinic_id, e);
            return false;
        }
    };

    sender.send(Message::Text(payload.into())).await.is_ok()
}
