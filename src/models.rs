//! Modelos de dominio: documentos, chunks, entradas del índice vectorial y
//! estructuras de resultado de la consulta RAG.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Origen de un documento. Decide la extracción y el peso de confianza en el
/// re-ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Pdf,
    Docx,
    Spreadsheet,
    Web,
    Text,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Spreadsheet => "spreadsheet",
            Self::Web => "web",
            Self::Text => "text",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "spreadsheet" => Some(Self::Spreadsheet),
            "web" => Some(Self::Web),
            "text" => Some(Self::Text),
            _ => None,
        }
    }
}

/// Documento ya extraído a texto plano, listo para trocear.
/// Inmutable tras la ingesta; re-ingerir con el mismo `doc_id` reemplaza sus
/// chunks en el índice.
#[derive(Debug, Clone)]
pub struct Document {
    pub doc_id: String,
    pub source_type: SourceType,
    pub title: String,
    /// Ruta en disco o URL de origen.
    pub source: String,
    pub text: String,
    pub mime_type: Option<String>,
    pub ingested_at: String,
}

/// Tramo contiguo del texto de un documento. Los offsets son posiciones de
/// carácter (no bytes) dentro del texto origen.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

/// Entrada persistida en el índice vectorial: embedding más metadatos
/// desnormalizados para recuperar sin segunda consulta.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk_id: String,
    pub doc_id: String,
    pub title: String,
    pub source: String,
    pub source_type: SourceType,
    pub text: String,
    /// Hash sha256 del texto del chunk; evita re-embeber contenido idéntico.
    pub content_sha: String,
    pub vector: Vec<f64>,
}

/// Entrada puntuada devuelta por el índice.
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub score: f64,
    pub entry: IndexEntry,
}

/// Resultado de recuperación: como mucho `k` entradas en orden descendente
/// de similitud, desempatadas por `chunk_id` para que sea reproducible.
#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    pub chunks: Vec<ScoredEntry>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Turno previo de la conversación, aportado por el frontend en cada
/// petición; el núcleo no guarda sesión.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: String,
    pub content: String,
}

/// Cita de un chunk usado como contexto de la respuesta.
#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub chunk_id: String,
    pub title: String,
    pub source: String,
    pub score: f64,
}

/// Respuesta generada más los chunks que la fundamentan.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub grounding: Vec<Citation>,
    /// Aviso de respuesta degradada (sin fundamento suficiente o contexto
    /// recortado); `None` en respuestas normales.
    pub caveat: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileTreeNode {
    pub path: PathBuf,
    pub name: String,
    pub is_dir: bool,
    pub children: Vec<FileTreeNode>,
}
