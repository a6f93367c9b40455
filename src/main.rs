// Módulos de la aplicación
mod api;
mod app_state;
mod config;
mod embedding;
mod ingest;
mod intent;
mod llm;
mod models;
mod rag;
mod retriever;
mod serializer;
mod vector_store;
mod warehouse;

use std::sync::{Arc, Mutex};

use axum::Router;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::app_state::{AppState, Jobs, Status};
use crate::embedding::{EmbeddingClient, HttpEmbeddingBackend};
use crate::intent::IntentClassifier;
use crate::llm::{HttpGenerativeBackend, LlmClient, ModelChain};
use crate::rag::QueryEngine;
use crate::retriever::ContextRetriever;
use crate::vector_store::{QdrantIndex, VectorIndex};
use crate::warehouse::HttpWarehouseData;

#[tokio::main]
async fn main() {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().expect("Error al cargar la configuración");

    // 3. Conectar a Qdrant y garantizar la colección de materiales
    let qdrant =
        Arc::new(QdrantIndex::from_config(&cfg).expect("Error creando el cliente de Qdrant"));
    qdrant
        .ensure_collection()
        .await
        .expect("Error garantizando la colección de Qdrant");
    let index: Arc<dyn VectorIndex> = qdrant.clone();

    // 4. Construir los clientes de servicios externos
    let data = Arc::new(
        HttpWarehouseData::from_config(&cfg).expect("Error creando el cliente del almacén"),
    );
    let embed_backend =
        HttpEmbeddingBackend::from_config(&cfg).expect("Error creando el cliente de embeddings");
    let embedder = EmbeddingClient::new(
        Arc::new(embed_backend),
        cfg.vector_dim,
        cfg.embed_max_retries,
        cfg.embed_backoff_base,
    );
    let llm_backend =
        HttpGenerativeBackend::from_config(&cfg).expect("Error creando el cliente generativo");
    let llm = Arc::new(LlmClient::new(
        Arc::new(llm_backend),
        ModelChain::new(cfg.model_chain.clone()),
    ));

    // 5. Montar el motor de consultas
    let retriever = ContextRetriever::new(
        data.clone(),
        embedder.clone(),
        index.clone(),
        cfg.search_limit,
        cfg.score_threshold,
    );
    let engine = Arc::new(QueryEngine::new(
        IntentClassifier::new(llm.clone()),
        retriever,
        llm,
    ));

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 6. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        qdrant,
        index,
        data,
        embedder,
        engine,
        jobs: Jobs::default(),
        status: Arc::new(Mutex::new(Status {
            is_busy: false,
            message: "Servidor listo.".to_string(),
            progress: 0.0,
        })),
        shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    // 7. Configurar el router de la API
    let app = Router::new()
        .nest("/", api::create_router(app_state.clone()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 8. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .expect("No se pudo abrir el puerto del servidor");
    info!("🚀 Servidor escuchando en http://{}", server_addr);

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .expect("El servidor terminó con error");

    info!("✅ Servidor cerrado correctamente.");
}
