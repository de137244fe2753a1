use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

use crate::{
    config::AppConfig, ingest::IngestPipeline, retriever::Retriever, synthesizer::Synthesizer,
    vector_index::VectorIndex,
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub retriever: Arc<Retriever>,
    pub synthesizer: Arc<Synthesizer>,
    pub pipeline: Arc<IngestPipeline>,
    pub index: Arc<dyn VectorIndex>,
    pub status: Arc<Mutex<Status>>,
    pub current_dir: Arc<Mutex<Option<PathBuf>>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Status {
    pub is_busy: bool,
    pub message: String,
    pub progress: f32, // Valor entre 0.0 y 1.0
}
