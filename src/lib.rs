//! Núcleo RAG del asistente: ingesta y troceado de documentos, embeddings,
//! índice vectorial, recuperación top-k y síntesis de respuestas con
//! guardarraíles de dominio. El binario (`main.rs`) monta este núcleo detrás
//! de una API web.

pub mod api;
pub mod app_state;
pub mod chunker;
pub mod config;
pub mod crawl;
pub mod embedder;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod neo4j_client;
pub mod retriever;
pub mod retry;
pub mod synthesizer;
pub mod vector_index;
pub mod vector_store;
