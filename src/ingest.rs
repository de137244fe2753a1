//! Ingesta de documentos: extracción de texto, limpieza, troceado, embeddings
//! y upsert en el índice vectorial.
//!
//! La ingesta es por lotes y tolerante a fallos por documento: un fichero
//! corrupto se registra y se omite, nunca aborta el lote completo. Los
//! documentos se procesan con concurrencia acotada; dentro de un documento
//! el orden de los chunks se conserva.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex};

use anyhow::{anyhow, Result};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use mime_guess::MimeGuess;
use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::app_state::Status;
use crate::chunker;
use crate::config::ChunkingConfig;
use crate::embedder::{normalize, Embedder};
use crate::error::RagError;
use crate::models::{Document, IndexEntry, SourceType};
use crate::vector_index::VectorIndex;

/// Resumen de los resultados de una operación de ingesta.
#[derive(Debug, Default)]
pub struct IngestionSummary {
    pub files_scanned: u32,
    pub files_ingested: u32,
    pub files_skipped: u32,
    pub chunks_created: usize,
    pub chunks_reused: usize,
    pub chunks_embedded: usize,
}

impl std::fmt::Display for IngestionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Resumen: {} ficheros escaneados, {} ingeridos, {} omitidos. {} chunks ({} embebidos, {} reutilizados por hash).",
            self.files_scanned,
            self.files_ingested,
            self.files_skipped,
            self.chunks_created,
            self.chunks_embedded,
            self.chunks_reused
        )
    }
}

#[derive(Debug, Default)]
pub struct DocStats {
    pub chunks_total: usize,
    pub chunks_reused: usize,
    pub chunks_embedded: usize,
}

/// Pipeline de construcción del índice: Chunker → Embedder → VectorIndex.
pub struct IngestPipeline {
    chunking: ChunkingConfig,
    embedder: Embedder,
    index: Arc<dyn VectorIndex>,
    batch_size: usize,
}

impl IngestPipeline {
    pub fn new(
        chunking: ChunkingConfig,
        embedder: Embedder,
        index: Arc<dyn VectorIndex>,
        batch_size: usize,
    ) -> Self {
        Self { chunking, embedder, index, batch_size: batch_size.max(1) }
    }

    /// Trocea, embebe y persiste un documento. Los chunks cuyo hash de
    /// contenido ya figura en el índice no se re-embeben.
    pub async fn ingest_document(&self, doc: &Document) -> std::result::Result<DocStats, RagError> {
        let chunks = chunker::chunk_document(doc, &self.chunking);
        if chunks.is_empty() {
            warn!("Documento vacío o sin texto útil: {}", doc.source);
            return Ok(DocStats::default());
        }

        let existing = self.index.content_hashes(&doc.doc_id).await?;

        let mut stats = DocStats { chunks_total: chunks.len(), ..Default::default() };
        let mut pending: Vec<(crate::models::Chunk, String)> = Vec::new();

        for chunk in chunks {
            // Los chunks sin contenido embebible se omiten con registro.
            if normalize(&chunk.text).is_empty() {
                warn!(
                    "Chunk {} omitido: sólo espacio en blanco (offsets {}..{})",
                    chunk.chunk_id, chunk.start_offset, chunk.end_offset
                );
                stats.chunks_total -= 1;
                continue;
            }
            let sha = content_sha(&chunk.text);
            if existing.get(&chunk.chunk_id) == Some(&sha) {
                stats.chunks_reused += 1;
                continue;
            }
            pending.push((chunk, sha));
        }

        // --- Embeddings por lotes, preservando el orden del documento ---
        for batch in pending.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|(c, _)| c.text.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;

            let entries: Vec<IndexEntry> = batch
                .iter()
                .zip(vectors)
                .map(|((chunk, sha), vector)| IndexEntry {
                    chunk_id: chunk.chunk_id.clone(),
                    doc_id: doc.doc_id.clone(),
                    title: doc.title.clone(),
                    source: doc.source.clone(),
                    source_type: doc.source_type,
                    text: chunk.text.clone(),
                    content_sha: sha.clone(),
                    vector,
                })
                .collect();

            stats.chunks_embedded += entries.len();
            self.index.upsert(entries).await?;
        }

        Ok(stats)
    }
}

/// Hash sha256 (hex) del texto de un chunk.
pub fn content_sha(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Ids de documento aptos como clave del índice: letras, dígitos, `_-=`.
pub fn sanitize_doc_id(raw: &str) -> String {
    if raw.is_empty() {
        return "missing_id".to_string();
    }
    let safe: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '=') { c } else { '_' })
        .collect();
    safe.chars().take(512).collect()
}

static RE_PAGE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)page\s+\d+(\s+of\s+\d+)?").expect("regex"));
static RE_SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t]+").expect("regex"));
static RE_NEWLINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("regex"));

/// Limpieza del texto extraído antes de trocear: espacios duros, numeración
/// de páginas y saltos repetidos.
pub fn clean_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let text = text.replace('\u{a0}', " ");
    let text = RE_PAGE_NUMBER.replace_all(&text, "");
    let text = RE_SPACES.replace_all(&text, " ");
    let text = RE_NEWLINES.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Ficheros ocultos o AppleDouble (`._*`) que no deben ingerirse.
fn is_hidden_or_appledouble(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

/// Extrae un `Document` de un fichero en disco, o `None` si el fichero no es
/// procesable (formato no soportado, PDF corrupto, contenido no-UTF8).
fn extract_document(path: &Path) -> Option<Document> {
    let extension = path.extension().and_then(std::ffi::OsStr::to_str).unwrap_or("").to_lowercase();

    let (raw_text, source_type) = match extension.as_str() {
        "pdf" => match pdf_extract::extract_text(path) {
            Ok(content) => (content, SourceType::Pdf),
            Err(e) => {
                warn!("No se pudo extraer texto del PDF {}: {}. Saltando fichero.", path.display(), e);
                return None;
            }
        },
        "txt" | "md" | "log" | "html" | "css" | "js" | "csv" => {
            match std::fs::read_to_string(path) {
                Ok(content) => (content, SourceType::Text),
                Err(_) => {
                    warn!("Saltando fichero no-texto o no-UTF8: {}", path.display());
                    return None;
                }
            }
        }
        // La extracción de docx/xlsx corre a cargo del colaborador de
        // ingesta; aquí sólo se registra la omisión.
        "docx" | "doc" => {
            info!("Saltando {}: la extracción de DOCX llega ya convertida a texto.", path.display());
            return None;
        }
        "xlsx" | "xls" => {
            info!("Saltando {}: la extracción de hojas de cálculo llega ya convertida a texto.", path.display());
            return None;
        }
        _ => {
            info!("Saltando fichero con extensión no soportada ('.{}'): {}", extension, path.display());
            return None;
        }
    };

    let text = clean_text(&raw_text);
    let path_str = path.to_string_lossy().to_string();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path_str.clone());
    let mime: MimeGuess = MimeGuess::from_path(path);

    Some(Document {
        doc_id: sanitize_doc_id(&path_str),
        source_type,
        title: stem.replace('_', " "),
        source: path_str,
        text,
        mime_type: mime.first().map(|m| m.to_string()),
        ingested_at: Utc::now().to_rfc3339(),
    })
}

/// Recorre recursivamente un directorio, extrae y procesa cada fichero con
/// concurrencia acotada, y actualiza el estado compartido con el progreso.
pub async fn ingest_directory(
    pipeline: &IngestPipeline,
    root: &Path,
    status_arc: Arc<Mutex<Status>>,
    concurrency: usize,
) -> Result<IngestionSummary> {
    if !root.is_dir() {
        return Err(anyhow!("La ruta no es un directorio: {}", root.display()));
    }

    let file_entries: Vec<_> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| !is_hidden_or_appledouble(e.path()))
        .collect();

    let total_files = file_entries.len();
    let completed = AtomicUsize::new(0);

    let mut summary = IngestionSummary::default();
    summary.files_scanned = total_files as u32;

    let results: Vec<Option<DocStats>> = stream::iter(file_entries)
        .map(|entry| {
            let status_arc = status_arc.clone();
            let completed = &completed;
            async move {
                let path = entry.path().to_path_buf();
                let filename = path.file_name().unwrap_or_default().to_string_lossy().to_string();

                let result = match extract_document(&path) {
                    Some(doc) => match pipeline.ingest_document(&doc).await {
                        Ok(stats) => {
                            info!(
                                "Ingerido {} con {} chunks ({} embebidos, {} reutilizados).",
                                path.display(),
                                stats.chunks_total,
                                stats.chunks_embedded,
                                stats.chunks_reused
                            );
                            Some(stats)
                        }
                        Err(err) => {
                            error!("Error ingiriendo {}: {err}", path.display());
                            None
                        }
                    },
                    None => None,
                };

                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                {
                    let mut status = status_arc.lock().unwrap();
                    status.message = format!("[{done}/{total_files}] Procesado: {filename}");
                    status.progress = done as f32 / total_files.max(1) as f32;
                }
                result
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    for stats in results {
        match stats {
            Some(stats) => {
                summary.files_ingested += 1;
                summary.chunks_created += stats.chunks_total;
                summary.chunks_reused += stats.chunks_reused;
                summary.chunks_embedded += stats.chunks_embedded;
            }
            None => summary.files_skipped += 1,
        }
    }

    Ok(summary)
}

/// Procesa documentos ya extraídos (por ejemplo, páginas rastreadas de la
/// web) con la misma política de aislamiento por documento.
pub async fn ingest_documents(
    pipeline: &IngestPipeline,
    docs: Vec<Document>,
    status_arc: Arc<Mutex<Status>>,
) -> IngestionSummary {
    let total = docs.len();
    let mut summary = IngestionSummary::default();
    summary.files_scanned = total as u32;

    for (i, doc) in docs.iter().enumerate() {
        {
            let mut status = status_arc.lock().unwrap();
            status.message = format!("[{}/{}] Indexando: {}", i + 1, total, doc.title);
            status.progress = (i + 1) as f32 / total.max(1) as f32;
        }
        match pipeline.ingest_document(doc).await {
            Ok(stats) => {
                summary.files_ingested += 1;
                summary.chunks_created += stats.chunks_total;
                summary.chunks_reused += stats.chunks_reused;
                summary.chunks_embedded += stats.chunks_embedded;
            }
            Err(err) => {
                summary.files_skipped += 1;
                error!("Error indexando {}: {err}", doc.source);
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn la_limpieza_colapsa_espacios_y_numeracion_de_paginas() {
        let sucio = "Intro\u{a0}general  con\tespacios\nPage 3 of 10\n\n\n\n\nSiguiente sección";
        let limpio = clean_text(sucio);
        assert!(!limpio.contains("Page 3"));
        assert!(!limpio.contains("  "));
        assert!(!limpio.contains("\n\n\n"));
        assert!(limpio.contains("Intro general con espacios"));
    }

    #[test]
    fn sanitize_reemplaza_caracteres_no_validos() {
        assert_eq!(sanitize_doc_id("/data/ndis plan (v2).pdf"), "_data_ndis_plan__v2__pdf");
        assert_eq!(sanitize_doc_id(""), "missing_id");
    }

    #[test]
    fn el_hash_de_contenido_es_estable() {
        assert_eq!(content_sha("hola"), content_sha("hola"));
        assert_ne!(content_sha("hola"), content_sha("hola "));
    }

    #[test]
    fn los_ficheros_ocultos_se_filtran() {
        assert!(is_hidden_or_appledouble(Path::new("/tmp/._resource")));
        assert!(is_hidden_or_appledouble(Path::new("/tmp/.DS_Store")));
        assert!(!is_hidden_or_appledouble(Path::new("/tmp/informe.pdf")));
    }
}
