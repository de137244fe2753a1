//! Implementación del índice vectorial sobre Neo4j (`:Chunk(embedding)`).
//!
//! Cada entrada del índice es un nodo `:Chunk` con metadatos desnormalizados;
//! la búsqueda usa `db.index.vector.queryNodes` sobre un índice coseno.
//! Nota: la puntuación que devuelve Neo4j es su equivalente normalizado de
//! la similitud coseno; el umbral de guardarraíl se aplica sobre esa escala.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use neo4rs::{query, Graph};
use tracing::info;

use crate::error::{RagError, Result};
use crate::models::{IndexEntry, ScoredEntry, SourceType};
use crate::vector_index::{SourceFilter, VectorIndex};

const INDEX_NAME: &str = "chunkEmbeddingIndex";

/// Índice vectorial respaldado por Neo4j.
#[derive(Clone)]
pub struct Neo4jVectorIndex {
    graph: Arc<Graph>,
}

impl Neo4jVectorIndex {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self { graph }
    }
}

fn index_err(err: neo4rs::Error) -> RagError {
    RagError::IndexUnavailable(err.to_string())
}

fn missing(field: &str) -> RagError {
    RagError::IndexUnavailable(format!("falta el campo '{field}' en el resultado de Neo4j"))
}

/// Garantiza que el índice vectorial sobre `:Chunk(embedding)` exista con la
/// dimensión configurada.
pub async fn ensure_chunk_vector_index(graph: &Graph, dimensions: usize) -> Result<()> {
    // ¿Ya existe el índice? Sintaxis moderna SHOW VECTOR INDEXES.
    let mut cursor = graph
        .execute(
            query("SHOW VECTOR INDEXES YIELD name WHERE name = $name RETURN name")
                .param("name", INDEX_NAME),
        )
        .await
        .map_err(index_err)?;

    if cursor.next().await.map_err(index_err)?.is_some() {
        info!("Índice vectorial '{INDEX_NAME}' ya existe.");
        return Ok(());
    }

    let cypher = format!(
        "\
CREATE VECTOR INDEX {INDEX_NAME}
FOR (c:Chunk)
ON (c.embedding)
OPTIONS {{
  indexConfig: {{
    `vector.dimensions`: {dimensions},
    `vector.similarity_function`: 'cosine'
  }}
}}"
    );

    graph.run(query(&cypher)).await.map_err(index_err)?;
    info!("Índice vectorial '{INDEX_NAME}' creado ({dimensions} dimensiones).");

    Ok(())
}

#[async_trait]
impl VectorIndex for Neo4jVectorIndex {
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let tx = self.graph.start_txn().await.map_err(index_err)?;
        for entry in &entries {
            tx.run(
                query(
                    "MERGE (c:Chunk {id: $id})
                     SET c.doc_id = $doc_id, c.title = $title, c.source = $source,
                         c.source_type = $source_type, c.text = $text,
                         c.content_sha = $content_sha, c.embedding = $embedding",
                )
                .param("id", entry.chunk_id.clone())
                .param("doc_id", entry.doc_id.clone())
                .param("title", entry.title.clone())
                .param("source", entry.source.clone())
                .param("source_type", entry.source_type.as_str())
                .param("text", entry.text.clone())
                .param("content_sha", entry.content_sha.clone())
                .param("embedding", entry.vector.clone()),
            )
            .await
            .map_err(index_err)?;
        }
        tx.commit().await.map_err(index_err)?;
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f64],
        k: usize,
        filter: Option<&SourceFilter>,
    ) -> Result<Vec<ScoredEntry>> {
        // queryNodes no filtra por metadatos antes del ranking; con filtro se
        // sobremuestrea para no dejar el pool por debajo de k.
        let fetch = if filter.is_some() { k * 4 } else { k };

        let mut cursor = self
            .graph
            .execute(
                query(
                    "CALL db.index.vector.queryNodes($index_name, $k, $embedding)
                     YIELD node, score
                     RETURN node.id AS id, node.doc_id AS doc_id, node.title AS title,
                            node.source AS source, node.source_type AS source_type,
                            node.text AS text, node.content_sha AS content_sha,
                            node.embedding AS embedding, score
                     ORDER BY score DESC, id ASC",
                )
                .param("index_name", INDEX_NAME)
                .param("k", fetch as i64)
                .param("embedding", vector.to_vec()),
            )
            .await
            .map_err(index_err)?;

        let mut hits = Vec::new();
        while let Some(row) = cursor.next().await.map_err(index_err)? {
            let source_type_raw: String = row.get("source_type").ok_or_else(|| missing("source_type"))?;
            let source_type = SourceType::parse(&source_type_raw)
                .ok_or_else(|| RagError::IndexUnavailable(format!(
                    "source_type desconocido en el índice: '{source_type_raw}'"
                )))?;

            if let Some(f) = filter {
                if !f.matches(source_type) {
                    continue;
                }
            }

            let entry = IndexEntry {
                chunk_id: row.get("id").ok_or_else(|| missing("id"))?,
                doc_id: row.get("doc_id").ok_or_else(|| missing("doc_id"))?,
                title: row.get("title").ok_or_else(|| missing("title"))?,
                source: row.get("source").ok_or_else(|| missing("source"))?,
                source_type,
                text: row.get("text").ok_or_else(|| missing("text"))?,
                content_sha: row.get("content_sha").ok_or_else(|| missing("content_sha"))?,
                vector: row.get("embedding").ok_or_else(|| missing("embedding"))?,
            };
            let score: f64 = row.get("score").ok_or_else(|| missing("score"))?;
            hits.push(ScoredEntry { score, entry });

            if hits.len() == k {
                break;
            }
        }

        Ok(hits)
    }

    async fn content_hashes(&self, doc_id: &str) -> Result<HashMap<String, String>> {
        let mut cursor = self
            .graph
            .execute(
                query("MATCH (c:Chunk {doc_id: $doc_id}) RETURN c.id AS id, c.content_sha AS sha")
                    .param("doc_id", doc_id),
            )
            .await
            .map_err(index_err)?;

        let mut hashes = HashMap::new();
        while let Some(row) = cursor.next().await.map_err(index_err)? {
            if let (Some(id), Some(sha)) = (row.get::<String>("id"), row.get::<String>("sha")) {
                hashes.insert(id, sha);
            }
        }
        Ok(hashes)
    }

    async fn count(&self) -> Result<usize> {
        let mut cursor = self
            .graph
            .execute(query("MATCH (c:Chunk) RETURN count(c) AS n"))
            .await
            .map_err(index_err)?;

        let row = cursor.next().await.map_err(index_err)?.ok_or_else(|| missing("n"))?;
        let n: i64 = row.get("n").ok_or_else(|| missing("n"))?;
        Ok(n as usize)
    }
}
