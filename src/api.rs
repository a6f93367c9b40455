use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::spawn;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    app_state::{AppState, Status},
    ingest::{self, IngestOptions},
    models::{ChatAnswer, JobRecord, MessageContent},
};

// --- Payloads de la API ---

#[derive(Deserialize)]
pub struct ChatPayload {
    message: MessageContent,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/ingest", post(ingest_handler))
        .route("/api/jobs", get(list_jobs_handler))
        .route("/api/jobs/:id", get(job_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/status", get(status_handler))
        .route("/api/health", get(health_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Handlers ---

/// Lanza la ingesta del feed completo en segundo plano y devuelve 202 con el
/// id del job; el progreso se consulta en /api/jobs/:id.
#[axum::debug_handler]
async fn ingest_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    // Comprobar y marcar en la misma sección crítica: dos peticiones
    // simultáneas no pueden lanzar dos ingestas.
    if !state
        .status
        .lock()
        .unwrap()
        .begin("Iniciando ingesta del feed de materiales...")
    {
        return Err((
            StatusCode::CONFLICT,
            Json(json!({"error": "Ya hay una ingesta en curso."})),
        ));
    }

    let job_id = state.jobs.create();
    let opts = IngestOptions::from_config(&state.config);

    spawn(async move {
        state.jobs.mark_running(job_id);

        let result = ingest::ingest_from_feed(
            state.data.as_ref(),
            &state.embedder,
            state.index.as_ref(),
            &opts,
            &state.jobs,
            job_id,
        )
        .await;

        let mut status = state.status.lock().unwrap();
        status.is_busy = false;
        status.progress = 0.0;
        match result {
            Ok(summary) => {
                status.message = format!("¡Ingesta completada! {summary}");
                state.jobs.mark_completed(job_id, summary.to_string());
            }
            Err(err) => {
                status.message = format!("Error en la ingesta: {err:#}");
                error!("Error de ingesta: {err:#}");
                state.jobs.mark_failed(job_id, format!("{err:#}"));
            }
        }
    });

    Ok((StatusCode::ACCEPTED, Json(json!({ "jobId": job_id }))))
}

#[axum::debug_handler]
async fn job_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobRecord>, (StatusCode, Json<serde_json::Value>)> {
    match state.jobs.get(id) {
        Some(job) => Ok(Json(job)),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("No existe el job {id}.")})),
        )),
    }
}

#[axum::debug_handler]
async fn list_jobs_handler(State(state): State<AppState>) -> Json<Vec<JobRecord>> {
    Json(state.jobs.list())
}

/// El chat nunca devuelve error HTTP por fallos internos: el motor de
/// consultas convierte cualquier fallo en una respuesta de disculpa.
#[axum::debug_handler]
async fn chat_handler(
    State(state): State<AppState>,
    Json(payload): Json<ChatPayload>,
) -> Json<ChatAnswer> {
    let question = payload.message.as_text();
    if question.trim().is_empty() {
        return Json(ChatAnswer::apology("La pregunta llegó vacía."));
    }
    Json(state.engine.answer(&question).await)
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(state.status.lock().unwrap().clone())
}

#[axum::debug_handler]
async fn health_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    match state.qdrant.healthcheck().await {
        Ok(()) => Ok(Json(json!({
            "status": "ok",
            "collection": state.config.collection_name,
        }))),
        Err(e) => {
            error!("Error en el health check de Qdrant: {e:#}");
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": format!("{e:#}")})),
            ))
        }
    }
}

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state.shutdown_sender.lock().unwrap().take() {
        let _ = sender.send(());
    }
    StatusCode::OK
}
