//! Carga y gestión de configuración de la aplicación (Neo4j + LLM + pipeline
//! RAG). Todos los parámetros salen de variables de entorno con defaults
//! documentados; las sub-configuraciones se validan al construirse.

use anyhow::{anyhow, Result};
use std::env;
use std::time::Duration;

use crate::error::RagError;
use crate::retry::RetryPolicy;

#[derive(Clone, Debug)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Política de troceado. Tamaño y solape se miden en caracteres del texto
/// crudo (no en tokens); ver DESIGN.md.
#[derive(Clone, Debug)]
pub struct ChunkingConfig {
    /// Tamaño máximo de un chunk en caracteres.
    pub max_chunk_size: usize,
    /// Caracteres compartidos entre chunks consecutivos.
    pub overlap: usize,
    /// Ventana (hacia atrás desde el corte duro) donde se prefiere cortar en
    /// límite de párrafo o frase. 0 desactiva la preferencia.
    pub boundary_window: usize,
}

impl ChunkingConfig {
    pub fn new(
        max_chunk_size: usize,
        overlap: usize,
        boundary_window: usize,
    ) -> std::result::Result<Self, RagError> {
        if max_chunk_size == 0 {
            return Err(RagError::Config("max_chunk_size debe ser > 0".into()));
        }
        if overlap >= max_chunk_size {
            return Err(RagError::Config(format!(
                "overlap ({overlap}) debe ser menor que max_chunk_size ({max_chunk_size})"
            )));
        }
        if boundary_window >= max_chunk_size {
            return Err(RagError::Config(format!(
                "boundary_window ({boundary_window}) debe ser menor que max_chunk_size ({max_chunk_size})"
            )));
        }
        Ok(Self { max_chunk_size, overlap, boundary_window })
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { max_chunk_size: 1000, overlap: 100, boundary_window: 120 }
    }
}

/// Parámetros de la recuperación top-k.
#[derive(Clone, Debug)]
pub struct RetrievalConfig {
    /// Número de chunks devueltos al sintetizador.
    pub top_k: usize,
    /// Se piden `top_k * oversample_factor` candidatos al índice y se
    /// re-ranquea localmente antes de recortar a `top_k`.
    pub oversample_factor: usize,
    /// Cuántos turnos de usuario recientes se usan para expandir la consulta.
    pub history_window: usize,
    /// Peso de confianza para fuentes web; las fuentes documentales pesan 1.0.
    pub web_source_weight: f64,
}

impl RetrievalConfig {
    pub fn new(
        top_k: usize,
        oversample_factor: usize,
        history_window: usize,
        web_source_weight: f64,
    ) -> std::result::Result<Self, RagError> {
        if top_k == 0 {
            return Err(RagError::Config("top_k debe ser > 0".into()));
        }
        if oversample_factor == 0 {
            return Err(RagError::Config("oversample_factor debe ser > 0".into()));
        }
        if !(0.0..=1.0).contains(&web_source_weight) {
            return Err(RagError::Config(format!(
                "web_source_weight ({web_source_weight}) debe estar en [0, 1]"
            )));
        }
        Ok(Self { top_k, oversample_factor, history_window, web_source_weight })
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 5, oversample_factor: 3, history_window: 3, web_source_weight: 0.85 }
    }
}

/// Guardarraíles del sintetizador.
#[derive(Clone, Debug)]
pub struct GuardrailConfig {
    /// Nombre del dominio, usado en el prompt y en los mensajes de rechazo.
    pub domain_name: String,
    /// Términos que anclan una consulta al dominio; sólo se consultan cuando
    /// `refuse_out_of_domain` está activo.
    pub domain_terms: Vec<String>,
    /// Rechazar consultas fuera de dominio sin llamar al modelo generativo.
    pub refuse_out_of_domain: bool,
    /// Si es `true`, no se genera respuesta cuando ningún chunk supera el
    /// umbral; se devuelve un rechazo explícito.
    pub require_grounding: bool,
    /// Umbral de similitud por chunk, en la escala que reporte el índice.
    pub score_threshold: f64,
    /// Presupuesto del contexto del prompt, en caracteres.
    pub context_budget_chars: usize,
    /// Límite de tokens de la respuesta generada.
    pub max_answer_tokens: u64,
}

impl GuardrailConfig {
    pub fn validate(self) -> std::result::Result<Self, RagError> {
        if self.context_budget_chars == 0 {
            return Err(RagError::Config("context_budget_chars debe ser > 0".into()));
        }
        if self.max_answer_tokens == 0 {
            return Err(RagError::Config("max_answer_tokens debe ser > 0".into()));
        }
        Ok(self)
    }
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            domain_name: "NDIS".to_string(),
            domain_terms: vec![
                "ndis".into(),
                "disability".into(),
                "insurance".into(),
                "plan".into(),
                "funding".into(),
                "support".into(),
                "participant".into(),
                "provider".into(),
            ],
            refuse_out_of_domain: false,
            require_grounding: true,
            score_threshold: 0.5,
            context_budget_chars: 6000,
            max_answer_tokens: 400,
        }
    }
}

/// Límites del rastreador web (ver `crawl.rs`).
#[derive(Clone, Debug)]
pub struct CrawlConfig {
    pub start_url: String,
    /// Presupuesto en páginas (no en chunks).
    pub max_pages: usize,
    /// Pausa de cortesía entre peticiones.
    pub delay: Duration,
    /// Páginas mayores se descartan sin descargar el cuerpo completo.
    pub max_bytes: u64,
    /// El texto limpio de una página se recorta a este tamaño.
    pub max_text_chars: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            start_url: "https://www.ndis.gov.au".to_string(),
            max_pages: 5,
            delay: Duration::from_millis(300),
            max_bytes: 2_000_000,
            max_text_chars: 20_000,
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub server_addr: String,

    pub llm_provider: LlmProvider,
    pub llm_embedding_model: String,
    pub llm_chat_model: String,
    pub generation_temperature: f64,

    /// Dimensión de los vectores del índice (fijada por el modelo de
    /// embeddings configurado).
    pub embedding_dimensions: usize,
    /// Tamaño de lote al embeber en la ingesta.
    pub embed_batch_size: usize,
    /// Límite de entrada del proveedor de embeddings, en caracteres.
    pub max_embed_chars: usize,
    /// Con `false`, un texto que supere el límite es error en vez de recorte.
    pub truncate_embed_input: bool,

    /// Documentos procesados en paralelo durante la ingesta.
    pub ingest_concurrency: usize,
    /// Tope de tiempo para cada llamada de red a un proveedor.
    pub request_timeout: Duration,

    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub guardrails: GuardrailConfig,
    pub retry: RetryPolicy,
    pub crawl: CrawlConfig,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| anyhow!("Valor inválido para {key}: '{raw}'")),
        Err(_) => Ok(default),
    }
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let neo4j_uri =
            env::var("NEO4J_URI").map_err(|_| anyhow!("Falta NEO4J_URI en el entorno"))?;
        let neo4j_user =
            env::var("NEO4J_USER").map_err(|_| anyhow!("Falta NEO4J_USER en el entorno"))?;
        let neo4j_password =
            env::var("NEO4J_PASSWORD").map_err(|_| anyhow!("Falta NEO4J_PASSWORD en el entorno"))?;

        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3322".to_string());

        let llm_provider_str =
            env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;

        let llm_embedding_model = env::var("LLM_EMBEDDING_MODEL")
            .unwrap_or_else(|_| "text-embedding-3-small".to_string());
        let llm_chat_model =
            env::var("LLM_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let chunking = ChunkingConfig::new(
            env_parse("CHUNK_MAX_SIZE", 1000)?,
            env_parse("CHUNK_OVERLAP", 100)?,
            env_parse("CHUNK_BOUNDARY_WINDOW", 120)?,
        )?;

        let retrieval = RetrievalConfig::new(
            env_parse("RAG_TOP_K", 5)?,
            env_parse("RAG_OVERSAMPLE", 3)?,
            env_parse("RAG_HISTORY_WINDOW", 3)?,
            env_parse("WEB_SOURCE_WEIGHT", 0.85)?,
        )?;

        let defaults = GuardrailConfig::default();
        let domain_name = env::var("ORG_NAME").unwrap_or(defaults.domain_name);
        let domain_terms = match env::var("DOMAIN_TERMS") {
            Ok(raw) => raw
                .split(',')
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            Err(_) => defaults.domain_terms,
        };
        let guardrails = GuardrailConfig {
            domain_name,
            domain_terms,
            refuse_out_of_domain: env_parse("REFUSE_OUT_OF_DOMAIN", false)?,
            require_grounding: env_parse("REQUIRE_GROUNDING", true)?,
            score_threshold: env_parse("SCORE_THRESHOLD", 0.5)?,
            context_budget_chars: env_parse("CONTEXT_BUDGET_CHARS", 6000)?,
            max_answer_tokens: env_parse("MAX_ANSWER_TOKENS", 400)?,
        }
        .validate()?;

        let retry = RetryPolicy::new(
            env_parse("RETRY_MAX_ATTEMPTS", 3)?,
            Duration::from_millis(env_parse("RETRY_BASE_DELAY_MS", 300)?),
            env_parse("RETRY_JITTER", 0.2)?,
        )?;

        let crawl_defaults = CrawlConfig::default();
        let crawl = CrawlConfig {
            start_url: env::var("SCRAPE_URL").unwrap_or(crawl_defaults.start_url),
            max_pages: env_parse("CRAWLER_MAX_PAGES", crawl_defaults.max_pages)?,
            delay: Duration::from_millis(env_parse("CRAWLER_DELAY_MS", 300)?),
            max_bytes: env_parse("CRAWLER_MAX_BYTES", crawl_defaults.max_bytes)?,
            max_text_chars: env_parse("CRAWLER_MAX_TEXT_CHARS", crawl_defaults.max_text_chars)?,
        };

        Ok(Self {
            neo4j_uri,
            neo4j_user,
            neo4j_password,
            server_addr,
            llm_provider,
            llm_embedding_model,
            llm_chat_model,
            generation_temperature: env_parse("GEN_TEMPERATURE", 0.2)?,
            embedding_dimensions: env_parse("EMBEDDING_DIMENSIONS", 1536)?,
            embed_batch_size: env_parse("EMBED_BATCH", 16)?,
            max_embed_chars: env_parse("MAX_EMBED_CHARS", 32_000)?,
            truncate_embed_input: env_parse("TRUNCATE_EMBED_INPUT", true)?,
            ingest_concurrency: env_parse("INGEST_CONCURRENCY", 4)?,
            request_timeout: Duration::from_secs(env_parse("REQUEST_TIMEOUT_SECS", 30)?),
            chunking,
            retrieval,
            guardrails,
            retry,
            crawl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunking_config_rechaza_overlap_mayor_o_igual_que_el_tamano() {
        assert!(ChunkingConfig::new(100, 100, 0).is_err());
        assert!(ChunkingConfig::new(100, 150, 0).is_err());
        assert!(ChunkingConfig::new(100, 99, 0).is_ok());
    }

    #[test]
    fn retrieval_config_valida_rangos() {
        assert!(RetrievalConfig::new(0, 3, 3, 0.9).is_err());
        assert!(RetrievalConfig::new(5, 0, 3, 0.9).is_err());
        assert!(RetrievalConfig::new(5, 3, 3, 1.5).is_err());
        assert!(RetrievalConfig::new(5, 3, 0, 1.0).is_ok());
    }
}
