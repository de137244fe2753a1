//! Generación de embeddings: normalización, truncado y reintentos alrededor
//! de un backend inyectable.
//!
//! El backend real vive en `llm.rs` (Rig/OpenAI); los tests inyectan dobles.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::error::{RagError, Result};
use crate::retry::RetryPolicy;

/// Contrato mínimo con el proveedor de embeddings: lote de textos dentro,
/// vectores de dimensión fija fuera, en el mismo orden.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>>;
    fn dimensions(&self) -> usize;
}

/// Envoltorio del backend que aplica el contrato de entrada: textos no
/// vacíos tras normalizar, truncado determinista al límite del proveedor y
/// reintentos acotados sobre fallos transitorios.
#[derive(Clone)]
pub struct Embedder {
    backend: Arc<dyn EmbeddingBackend>,
    max_input_chars: usize,
    truncate: bool,
    timeout: Duration,
    retry: RetryPolicy,
}

/// Colapsa todo el espacio en blanco a espacios simples.
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl Embedder {
    pub fn new(
        backend: Arc<dyn EmbeddingBackend>,
        max_input_chars: usize,
        truncate: bool,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self { backend, max_input_chars, truncate, timeout, retry }
    }

    pub fn dimensions(&self) -> usize {
        self.backend.dimensions()
    }

    /// Embebe un lote preservando el orden: `salida[i]` corresponde a
    /// `textos[i]`.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut prepared = Vec::with_capacity(texts.len());
        for (i, raw) in texts.iter().enumerate() {
            let mut text = normalize(raw);
            if text.is_empty() {
                return Err(RagError::Input(format!(
                    "el texto {i} del lote queda vacío tras normalizar"
                )));
            }
            let len = text.chars().count();
            if len > self.max_input_chars {
                if !self.truncate {
                    return Err(RagError::InputTooLarge { len, max: self.max_input_chars });
                }
                // Truncado determinista: se conserva el prefijo.
                text = text.chars().take(self.max_input_chars).collect();
                warn!(
                    "Texto {i} truncado de {len} a {} caracteres para embeber",
                    self.max_input_chars
                );
            }
            prepared.push(text);
        }

        let vectors = self
            .retry
            .run("embed", || {
                let batch = prepared.clone();
                async move {
                    match tokio::time::timeout(self.timeout, self.backend.embed_texts(batch)).await
                    {
                        Ok(result) => result,
                        Err(_) => Err(RagError::EmbeddingProvider {
                            message: format!(
                                "timeout tras {:?} esperando al proveedor",
                                self.timeout
                            ),
                            transient: true,
                        }),
                    }
                }
            })
            .await?;

        if vectors.len() != texts.len() {
            return Err(RagError::EmbeddingProvider {
                message: format!(
                    "el proveedor devolvió {} vectores para {} textos",
                    vectors.len(),
                    texts.len()
                ),
                transient: false,
            });
        }

        Ok(vectors)
    }
}
