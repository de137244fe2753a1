//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//! De momento se implementa OpenAI; Gemini/Ollama quedan preparados para el
//! futuro. Implementa los contratos `EmbeddingBackend` (embedder.rs) y
//! `GenerationBackend` (synthesizer.rs) para que el resto del pipeline no
//! conozca a Rig.

use async_trait::async_trait;
use rig::completion::Prompt;

use crate::config::{AppConfig, LlmProvider};
use crate::embedder::EmbeddingBackend;
use crate::error::{RagError, Result};
use crate::synthesizer::GenerationBackend;

/// Gestor de LLMs y embeddings.
#[derive(Debug, Clone)]
pub struct LlmManager {
    provider: LlmProvider,
    embedding_model: String,
    chat_model: String,
    temperature: f64,
    dimensions: usize,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Ok(Self {
            provider: cfg.llm_provider.clone(),
            embedding_model: cfg.llm_embedding_model.clone(),
            chat_model: cfg.llm_chat_model.clone(),
            temperature: cfg.generation_temperature,
            dimensions: cfg.embedding_dimensions,
        })
    }

    // ---------------------------------------------------------------------
    // EMBEDDINGS
    // ---------------------------------------------------------------------

    async fn embed_with_openai(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>> {
        use rig::client::EmbeddingsClient as _;
        use rig::embeddings::EmbeddingModel as _;
        use rig::providers::openai::{self, TEXT_EMBEDDING_3_SMALL};

        let client = openai::Client::from_env();

        let model_name = if self.embedding_model.is_empty() {
            TEXT_EMBEDDING_3_SMALL
        } else {
            self.embedding_model.as_str()
        };
        let embedding_model = client.embedding_model(model_name);

        let expected = texts.len();
        let embeddings = embedding_model
            .embed_texts(texts)
            .await
            .map_err(|e| RagError::EmbeddingProvider {
                message: e.to_string(),
                transient: true,
            })?;

        if embeddings.len() != expected {
            return Err(RagError::EmbeddingProvider {
                message: format!(
                    "número de embeddings ({}) distinto al número de textos ({expected})",
                    embeddings.len()
                ),
                transient: false,
            });
        }

        Ok(embeddings.into_iter().map(|e| e.vec).collect())
    }

    // ---------------------------------------------------------------------
    // CHAT / COMPLETION
    // ---------------------------------------------------------------------

    async fn generate_with_openai(
        &self,
        system_prompt: &str,
        prompt: &str,
        max_tokens: u64,
    ) -> Result<String> {
        use rig::client::CompletionClient as _;
        use rig::providers::openai;

        let client = openai::Client::from_env();

        let model_name = if self.chat_model.is_empty() {
            "gpt-4o-mini"
        } else {
            self.chat_model.as_str()
        };

        let agent = client
            .agent(model_name)
            .preamble(system_prompt)
            .temperature(self.temperature)
            .max_tokens(max_tokens)
            .build();

        let answer = agent.prompt(prompt).await.map_err(|e| RagError::GenerationProvider {
            message: e.to_string(),
            transient: true,
        })?;
        Ok(answer)
    }
}

#[async_trait]
impl EmbeddingBackend for LlmManager {
    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>> {
        match self.provider {
            LlmProvider::OpenAI => self.embed_with_openai(texts).await,
            ref other => Err(RagError::EmbeddingProvider {
                message: format!("proveedor LLM {other:?} aún no implementado para embeddings"),
                transient: false,
            }),
        }
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[async_trait]
impl GenerationBackend for LlmManager {
    async fn generate(&self, system_prompt: &str, prompt: &str, max_tokens: u64) -> Result<String> {
        match self.provider {
            LlmProvider::OpenAI => self.generate_with_openai(system_prompt, prompt, max_tokens).await,
            ref other => Err(RagError::GenerationProvider {
                message: format!("proveedor LLM {other:?} aún no implementado para chat"),
                transient: false,
            }),
        }
    }
}
