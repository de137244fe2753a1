//! Contrato del índice vectorial y la implementación en memoria.
//!
//! La implementación de producción sobre Neo4j vive en `vector_store.rs`;
//! la de memoria sirve para desarrollo local y tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::models::{IndexEntry, ScoredEntry, SourceType};

/// Filtro de metadatos aplicado ANTES del ranking: restringir por tipo de
/// fuente no debe vaciar el pool de candidatos si existen suficientes.
#[derive(Debug, Clone)]
pub struct SourceFilter {
    pub source_types: Vec<SourceType>,
}

impl SourceFilter {
    pub fn matches(&self, source_type: SourceType) -> bool {
        self.source_types.contains(&source_type)
    }
}

/// Almacén de (vector, metadatos) con búsqueda top-k por similitud coseno.
///
/// `upsert` es idempotente por `chunk_id`: re-insertar el mismo id reemplaza
/// la entrada anterior. La visibilidad lectura-tras-escritura se asume para
/// un único escritor; un despliegue distribuido puede ser eventualmente
/// consistente y debe documentarlo como salvedad, no asumir lo contrario.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()>;

    /// Devuelve como mucho `k` entradas por similitud descendente; los
    /// empates se rompen por `chunk_id` para que el resultado sea
    /// reproducible. Un índice vacío devuelve una secuencia vacía.
    async fn query(
        &self,
        vector: &[f64],
        k: usize,
        filter: Option<&SourceFilter>,
    ) -> Result<Vec<ScoredEntry>>;

    /// Hash de contenido por `chunk_id` de un documento, para decidir qué
    /// chunks re-embeber en una re-ingesta.
    async fn content_hashes(&self, doc_id: &str) -> Result<HashMap<String, String>>;

    /// Número de entradas indexadas.
    async fn count(&self) -> Result<usize>;
}

/// Similitud coseno en [-1, 1]; 0.0 si algún vector tiene magnitud cero.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Índice en memoria: mapa chunk_id → entrada bajo un `RwLock`.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    entries: RwLock<HashMap<String, IndexEntry>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        let mut map = self.entries.write().await;
        for entry in entries {
            map.insert(entry.chunk_id.clone(), entry);
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f64],
        k: usize,
        filter: Option<&SourceFilter>,
    ) -> Result<Vec<ScoredEntry>> {
        let map = self.entries.read().await;
        let mut scored: Vec<ScoredEntry> = map
            .values()
            .filter(|e| filter.map_or(true, |f| f.matches(e.source_type)))
            .map(|e| ScoredEntry { score: cosine_similarity(&e.vector, vector), entry: e.clone() })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entry.chunk_id.cmp(&b.entry.chunk_id))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn content_hashes(&self, doc_id: &str) -> Result<HashMap<String, String>> {
        let map = self.entries.read().await;
        Ok(map
            .values()
            .filter(|e| e.doc_id == doc_id)
            .map(|e| (e.chunk_id.clone(), e.content_sha.clone()))
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }
}
