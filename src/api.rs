use std::path::{Path, PathBuf};

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::spawn;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    app_state::{AppState, Status},
    crawl, ingest,
    error::RagError,
    models::{Answer, FileTreeNode, Turn},
};

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct SelectDirPayload {
    path: String,
}

#[derive(Deserialize)]
pub struct AskPayload {
    question: String,
    #[serde(default)]
    history: Vec<Turn>,
}

#[derive(Deserialize)]
pub struct CrawlPayload {
    /// URL de inicio; si falta se usa la configurada.
    url: Option<String>,
}

#[derive(Serialize)]
pub struct IndexInfo {
    chunks_indexed: usize,
    embedding_dimensions: usize,
    top_k: usize,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

/// La capa de presentación recibe siempre una respuesta (quizá con aviso) o
/// un error tipado con el detalle suficiente para distinguir "sin fundamento"
/// de "servicio caído".
fn map_rag_error(err: &RagError) -> ApiError {
    let status = match err {
        RagError::Input(_) | RagError::InputTooLarge { .. } => StatusCode::BAD_REQUEST,
        RagError::IndexUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        RagError::EmbeddingProvider { .. } | RagError::GenerationProvider { .. } => {
            StatusCode::BAD_GATEWAY
        }
        RagError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.to_string() })))
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/list-directory", post(list_directory_handler))
        .route("/api/select-directory", post(select_directory_handler))
        .route("/api/ingest", post(ingest_handler))
        .route("/api/crawl", post(crawl_handler))
        .route("/api/ask", post(ask_handler))
        .route("/api/status", get(status_handler))
        .route("/api/index-info", get(index_info_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn list_directory_handler(
    Json(payload): Json<SelectDirPayload>,
) -> Result<Json<FileTreeNode>, ApiError> {
    let path = if payload.path.is_empty() {
        dirs::home_dir().ok_or_else(|| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "No se pudo determinar el directorio home del usuario."})),
            )
        })?
    } else {
        PathBuf::from(&payload.path)
    };

    if !path.is_dir() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "La ruta proporcionada no es un directorio válido."})),
        ));
    }

    match build_file_tree(&path) {
        Ok(tree) => Ok(Json(tree)),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": format!("Error al leer el directorio: {}", e)})),
        )),
    }
}

#[axum::debug_handler]
async fn select_directory_handler(
    State(state): State<AppState>,
    Json(payload): Json<SelectDirPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let path = PathBuf::from(&payload.path);
    if !path.is_dir() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "La ruta proporcionada no es un directorio válido."})),
        ));
    }

    *state.current_dir.lock().unwrap() = Some(path);
    Ok((StatusCode::OK, Json(json!({ "message": "Directorio fijado para la ingesta." }))))
}

#[axum::debug_handler]
async fn ingest_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let root_dir = match state.current_dir.lock().unwrap().clone() {
        Some(dir) => dir,
        None => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Primero debe seleccionar un directorio."})),
            ));
        }
    };

    if !mark_busy(&state, "Iniciando indexación...") {
        return Err(busy_error());
    }

    spawn(async move {
        let result = ingest::ingest_directory(
            &state.pipeline,
            &root_dir,
            state.status.clone(),
            state.config.ingest_concurrency,
        )
        .await;

        let mut status = state.status.lock().unwrap();
        status.is_busy = false;
        status.progress = 0.0;
        match result {
            Ok(summary) => {
                status.message = format!("¡Indexación completada! {}", summary);
            }
            Err(err) => {
                status.message = format!("Error en la indexación: {}", err);
                error!("Error de ingesta: {}", err);
            }
        }
    });

    Ok(StatusCode::ACCEPTED)
}

#[axum::debug_handler]
async fn crawl_handler(
    State(state): State<AppState>,
    Json(payload): Json<CrawlPayload>,
) -> Result<impl IntoResponse, ApiError> {
    if !mark_busy(&state, "Iniciando rastreo web...") {
        return Err(busy_error());
    }

    let mut crawl_cfg = state.config.crawl.clone();
    if let Some(url) = payload.url {
        crawl_cfg.start_url = url;
    }

    spawn(async move {
        let result = crawl::crawl_site(&crawl_cfg, state.status.clone()).await;
        let message = match result {
            Ok((docs, crawl_summary)) => {
                let summary =
                    ingest::ingest_documents(&state.pipeline, docs, state.status.clone()).await;
                format!(
                    "¡Rastreo completado! {} páginas descargadas. {}",
                    crawl_summary.pages_fetched, summary
                )
            }
            Err(err) => {
                error!("Error en el rastreo: {}", err);
                format!("Error en el rastreo: {}", err)
            }
        };

        let mut status = state.status.lock().unwrap();
        status.is_busy = false;
        status.progress = 0.0;
        status.message = message;
    });

    Ok(StatusCode::ACCEPTED)
}

#[axum::debug_handler]
async fn ask_handler(
    State(state): State<AppState>,
    Json(payload): Json<AskPayload>,
) -> Result<Json<Answer>, ApiError> {
    let request_id = Uuid::new_v4();
    info!("[{request_id}] Consulta RAG recibida");

    let retrieval = state
        .retriever
        .retrieve(&payload.question, state.config.retrieval.top_k, &payload.history, None)
        .await
        .map_err(|e| {
            error!("[{request_id}] Fallo en la recuperación: {e}");
            map_rag_error(&e)
        })?;

    let answer = state
        .synthesizer
        .answer(&payload.question, &retrieval)
        .await
        .map_err(|e| {
            error!("[{request_id}] Fallo en la síntesis: {e}");
            map_rag_error(&e)
        })?;

    info!(
        "[{request_id}] Respuesta generada con {} citas{}",
        answer.grounding.len(),
        if answer.caveat.is_some() { " (con aviso)" } else { "" }
    );
    Ok(Json(answer))
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(state.status.lock().unwrap().clone())
}

#[axum::debug_handler]
async fn index_info_handler(
    State(state): State<AppState>,
) -> Result<Json<IndexInfo>, ApiError> {
    let chunks_indexed = state.index.count().await.map_err(|e| {
        error!("Error en el health check del índice: {}", e);
        map_rag_error(&e)
    })?;

    Ok(Json(IndexInfo {
        chunks_indexed,
        embedding_dimensions: state.config.embedding_dimensions,
        top_k: state.config.retrieval.top_k,
    }))
}

#[axum::debug_handler]
async fn shutdown_handler(State(state): State<AppState>) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state.shutdown_sender.lock().unwrap().take() {
        let _ = sender.send(());
    }
    StatusCode::OK
}

// --- Utilidades ---

/// Marca el estado como ocupado; devuelve `false` si ya había una tarea en
/// curso (sólo se admite una ingesta o rastreo a la vez).
fn mark_busy(state: &AppState, message: &str) -> bool {
    let mut status = state.status.lock().unwrap();
    if status.is_busy {
        return false;
    }
    status.is_busy = true;
    status.message = message.to_string();
    status.progress = 0.0;
    true
}

fn busy_error() -> ApiError {
    (
        StatusCode::CONFLICT,
        Json(json!({"error": "Ya hay una ingesta o rastreo en curso."})),
    )
}

fn build_file_tree(path: &Path) -> std::io::Result<FileTreeNode> {
    let metadata = std::fs::metadata(path)?;
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string());

    let is_dir = metadata.is_dir();
    let mut children = Vec::new();

    if is_dir {
        let mut entries: Vec<_> = std::fs::read_dir(path)?
            .filter_map(Result::ok)
            .collect();

        entries.sort_by(|a, b| {
            let a_is_dir = a.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
            let b_is_dir = b.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
            b_is_dir.cmp(&a_is_dir).then_with(|| a.file_name().cmp(&b.file_name()))
        });

        for entry in entries {
            if let Ok(entry_meta) = entry.metadata() {
                children.push(FileTreeNode {
                    path: entry.path(),
                    name: entry.file_name().to_string_lossy().to_string(),
                    is_dir: entry_meta.is_dir(),
                    children: Vec::new(),
                });
            }
        }
    }

    Ok(FileTreeNode {
        path: path.to_path_buf(),
        name,
        is_dir,
        children,
    })
}
