//! Recuperación top-k: embedding de la consulta, búsqueda en el índice
//! vectorial y re-ranking local.
//!
//! Flujo:
//!   1. Normalizar la consulta y expandirla con los últimos turnos del
//!      usuario (la conversación llega por parámetro; aquí no hay sesión).
//!   2. Embeber la consulta expandida.
//!   3. Pedir `k * oversample_factor` candidatos al índice.
//!   4. Re-ranquear por similitud ponderada por confianza de la fuente y
//!      recortar a `k`.

use std::sync::Arc;

use tracing::debug;

use crate::config::RetrievalConfig;
use crate::embedder::{normalize, Embedder};
use crate::error::{RagError, Result};
use crate::models::{RetrievalResult, SourceType, Turn};
use crate::vector_index::{SourceFilter, VectorIndex};

pub struct Retriever {
    embedder: Embedder,
    index: Arc<dyn VectorIndex>,
    cfg: RetrievalConfig,
}

impl Retriever {
    pub fn new(embedder: Embedder, index: Arc<dyn VectorIndex>, cfg: RetrievalConfig) -> Self {
        Self { embedder, index, cfg }
    }

    /// Recupera como mucho `k` chunks para la consulta. Si el índice tiene
    /// menos candidatos, devuelve los que haya; nunca rellena con resultados
    /// sintéticos. Los errores de proveedor/índice se propagan sin enmascarar.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        history: &[Turn],
        filter: Option<&SourceFilter>,
    ) -> Result<RetrievalResult> {
        let normalized = normalize(query);
        if normalized.is_empty() {
            return Err(RagError::Input("la consulta está vacía".into()));
        }

        let expanded = self.expand_with_history(&normalized, history);
        if expanded != normalized {
            debug!("Consulta expandida con historial: {expanded}");
        }

        let vectors = self.embedder.embed(&[expanded]).await?;
        let query_vec = &vectors[0];

        let fetch = k.saturating_mul(self.cfg.oversample_factor);
        let mut candidates = self.index.query(query_vec, fetch, filter).await?;

        // Orden por similitud ponderada; el score reportado sigue siendo la
        // similitud cruda que devolvió el índice.
        candidates.sort_by(|a, b| {
            let wa = a.score * self.source_weight(a.entry.source_type);
            let wb = b.score * self.source_weight(b.entry.source_type);
            wb.partial_cmp(&wa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entry.chunk_id.cmp(&b.entry.chunk_id))
        });
        candidates.truncate(k);

        debug!("Recuperados {} chunks (k={k})", candidates.len());
        Ok(RetrievalResult { chunks: candidates })
    }

    /// Antepone los últimos turnos de usuario a la consulta para que las
    /// preguntas de seguimiento ("¿y eso cuánto cuesta?") lleven el tema.
    fn expand_with_history(&self, query: &str, history: &[Turn]) -> String {
        if self.cfg.history_window == 0 || history.is_empty() {
            return query.to_string();
        }
        let previous: Vec<&str> = history
            .iter()
            .filter(|t| t.role == "user")
            .rev()
            .take(self.cfg.history_window)
            .map(|t| t.content.as_str())
            .collect();
        if previous.is_empty() {
            return query.to_string();
        }
        let mut parts: Vec<String> = previous.into_iter().rev().map(normalize).collect();
        parts.push(query.to_string());
        parts.join("\n")
    }

    fn source_weight(&self, source_type: SourceType) -> f64 {
        match source_type {
            SourceType::Web => self.cfg.web_source_weight,
            _ => 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::EmbeddingBackend;
    use crate::models::IndexEntry;
    use crate::retry::RetryPolicy;
    use crate::vector_index::InMemoryVectorIndex;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Backend que proyecta palabras clave a ejes fijos del vector.
    struct AxisBackend;

    #[async_trait]
    impl EmbeddingBackend for AxisBackend {
        async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    vec![
                        if t.contains("funding") { 1.0 } else { 0.0 },
                        if t.contains("plan") { 1.0 } else { 0.0 },
                        if t.contains("provider") { 1.0 } else { 0.0 },
                    ]
                })
                .collect())
        }

        fn dimensions(&self) -> usize {
            3
        }
    }

    /// Backend que siempre falla de forma transitoria.
    struct DownBackend;

    #[async_trait]
    impl EmbeddingBackend for DownBackend {
        async fn embed_texts(&self, _texts: Vec<String>) -> Result<Vec<Vec<f64>>> {
            Err(RagError::EmbeddingProvider { message: "503".into(), transient: true })
        }

        fn dimensions(&self) -> usize {
            3
        }
    }

    fn embedder(backend: impl EmbeddingBackend + 'static) -> Embedder {
        Embedder::new(
            Arc::new(backend),
            10_000,
            true,
            Duration::from_secs(5),
            RetryPolicy::new(2, Duration::from_millis(1), 0.0).unwrap(),
        )
    }

    fn entry(chunk_id: &str, source_type: SourceType, vector: Vec<f64>) -> IndexEntry {
        IndexEntry {
            chunk_id: chunk_id.into(),
            doc_id: "doc".into(),
            title: "Doc".into(),
            source: "doc.txt".into(),
            source_type,
            text: format!("texto {chunk_id}"),
            content_sha: format!("sha-{chunk_id}"),
            vector,
        }
    }

    fn retriever_with(index: Arc<InMemoryVectorIndex>, cfg: RetrievalConfig) -> Retriever {
        Retriever::new(embedder(AxisBackend), index, cfg)
    }

    #[tokio::test]
    async fn devuelve_todos_los_candidatos_si_hay_menos_que_k() {
        let index = Arc::new(InMemoryVectorIndex::new());
        index
            .upsert(vec![entry("a", SourceType::Pdf, vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();

        let r = retriever_with(index, RetrievalConfig::default());
        let result = r.retrieve("funding question", 5, &[], None).await.unwrap();
        assert_eq!(result.chunks.len(), 1);
    }

    #[tokio::test]
    async fn consulta_vacia_es_error_de_entrada_sin_tocar_el_indice() {
        let index = Arc::new(InMemoryVectorIndex::new());
        let r = retriever_with(index, RetrievalConfig::default());
        let err = r.retrieve("   ", 5, &[], None).await.unwrap_err();
        assert!(matches!(err, RagError::Input(_)));
    }

    #[tokio::test]
    async fn propaga_el_fallo_del_proveedor_de_embeddings() {
        let index = Arc::new(InMemoryVectorIndex::new());
        let r = Retriever::new(embedder(DownBackend), index, RetrievalConfig::default());
        let err = r.retrieve("funding", 5, &[], None).await.unwrap_err();
        assert!(matches!(err, RagError::EmbeddingProvider { .. }));
    }

    #[tokio::test]
    async fn el_peso_de_fuente_web_reordena_empates() {
        let index = Arc::new(InMemoryVectorIndex::new());
        // Misma similitud: la fuente documental debe ganar a la web.
        index
            .upsert(vec![
                entry("a_web", SourceType::Web, vec![1.0, 0.0, 0.0]),
                entry("b_pdf", SourceType::Pdf, vec![1.0, 0.0, 0.0]),
            ])
            .await
            .unwrap();

        let r = retriever_with(index, RetrievalConfig::default());
        let result = r.retrieve("funding", 2, &[], None).await.unwrap();
        assert_eq!(result.chunks[0].entry.chunk_id, "b_pdf");
        assert_eq!(result.chunks[1].entry.chunk_id, "a_web");
    }

    #[tokio::test]
    async fn el_historial_aporta_contexto_a_la_consulta() {
        let index = Arc::new(InMemoryVectorIndex::new());
        index
            .upsert(vec![
                entry("planes", SourceType::Pdf, vec![0.0, 1.0, 0.0]),
                entry("providers", SourceType::Pdf, vec![0.0, 0.0, 1.0]),
            ])
            .await
            .unwrap();

        let history = vec![
            Turn { role: "user".into(), content: "tell me about my plan".into() },
            Turn { role: "assistant".into(), content: "a plan is...".into() },
        ];

        let r = retriever_with(index, RetrievalConfig::default());
        // La consulta sola no menciona "plan"; el historial sí.
        let result = r.retrieve("how long does it last", 1, &history, None).await.unwrap();
        assert_eq!(result.chunks[0].entry.chunk_id, "planes");
    }
}
