//! Errores tipados del núcleo RAG.
//!
//! La capa de aplicación (main/api) sigue usando `anyhow`; estos tipos
//! existen para que el pipeline pueda distinguir fallos transitorios de
//! proveedor (reintetables) de errores de entrada o permanentes.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    /// Documento o consulta malformados o vacíos; se rechaza antes de
    /// cualquier llamada de red.
    #[error("entrada inválida: {0}")]
    Input(String),

    /// Fallo del proveedor de embeddings (transporte, auth, cuota).
    #[error("proveedor de embeddings: {message}")]
    EmbeddingProvider { message: String, transient: bool },

    /// Fallo del proveedor de generación.
    #[error("proveedor de generación: {message}")]
    GenerationProvider { message: String, transient: bool },

    /// El índice vectorial no responde; se propaga, nunca se degrada en
    /// silencio.
    #[error("índice vectorial no disponible: {0}")]
    IndexUnavailable(String),

    /// Texto que supera el límite del proveedor con el truncado desactivado.
    #[error("el texto supera el límite de entrada ({len} > {max} caracteres)")]
    InputTooLarge { len: usize, max: usize },

    /// Configuración rechazada en construcción.
    #[error("configuración inválida: {0}")]
    Config(String),
}

impl RagError {
    /// Sólo los fallos transitorios de proveedor/índice se reintentan.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::EmbeddingProvider { transient, .. }
            | Self::GenerationProvider { transient, .. } => *transient,
            Self::IndexUnavailable(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
