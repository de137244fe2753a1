use std::sync::{Arc, Mutex};

use axum::Router;
use tokio::sync::oneshot;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ndis_rag_assistant::{
    api,
    app_state::{AppState, Status},
    config,
    embedder::Embedder,
    ingest::IngestPipeline,
    llm,
    neo4j_client,
    retriever::Retriever,
    synthesizer::Synthesizer,
    vector_index::VectorIndex,
    vector_store::{self, Neo4jVectorIndex},
};

#[tokio::main]
async fn main() {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().expect("Error al cargar la configuración");

    // 3. Conectar a Neo4j y asegurar esquema e índice vectorial
    let graph = neo4j_client::connect_from_config(&cfg)
        .await
        .expect("Error conectando a Neo4j");
    neo4j_client::ensure_schema(&graph)
        .await
        .expect("Error asegurando el esquema de Neo4j");
    vector_store::ensure_chunk_vector_index(&graph, cfg.embedding_dimensions)
        .await
        .expect("Error asegurando el índice vectorial");

    // 4. Montar el pipeline RAG: backends LLM + índice + componentes núcleo
    let llm_manager =
        Arc::new(llm::LlmManager::from_config(&cfg).expect("Error inicializando LLM Manager"));
    let index: Arc<dyn VectorIndex> = Arc::new(Neo4jVectorIndex::new(Arc::new(graph)));

    let embedder = Embedder::new(
        llm_manager.clone(),
        cfg.max_embed_chars,
        cfg.truncate_embed_input,
        cfg.request_timeout,
        cfg.retry.clone(),
    );
    let retriever = Arc::new(Retriever::new(
        embedder.clone(),
        index.clone(),
        cfg.retrieval.clone(),
    ));
    let synthesizer = Arc::new(Synthesizer::new(
        llm_manager,
        cfg.guardrails.clone(),
        cfg.request_timeout,
        cfg.retry.clone(),
    ));
    let pipeline = Arc::new(IngestPipeline::new(
        cfg.chunking.clone(),
        embedder,
        index.clone(),
        cfg.embed_batch_size,
    ));

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        retriever,
        synthesizer,
        pipeline,
        index,
        status: Arc::new(Mutex::new(Status {
            is_busy: false,
            message: "Servidor listo.".to_string(),
            progress: 0.0,
        })),
        current_dir: Arc::new(Mutex::new(None)),
        shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    // 6. Configurar el router de la API y el servicio de ficheros estáticos
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .fallback_service(ServeDir::new("frontend"))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 7. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .unwrap();
    let server_url = format!("http://{}", server_addr);
    info!("🚀 Servidor escuchando en {}", &server_url);

    // Abrir el frontend en el navegador por defecto
    if webbrowser::open(&server_url).is_err() {
        info!("No se pudo abrir el navegador. Por favor, accede a {} manualmente.", server_url);
    }

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .unwrap();

    info!("✅ Servidor cerrado correctamente.");
}
