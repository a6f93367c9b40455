//! Carga y gestión de configuración de la aplicación (Qdrant + servicios de IA).

use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,

    /// Base del backend de almacén (feed de materiales + consultas estructuradas).
    pub warehouse_api_url: String,

    pub qdrant_url: String,
    pub collection_name: String,
    pub vector_dim: usize,

    pub embedding_url: String,
    pub embedding_model: String,
    pub embed_max_retries: u32,
    pub embed_backoff_base: Duration,

    pub generative_url: String,
    pub generative_api_key: Option<String>,
    /// Cadena de fallback, en orden de preferencia. Valor inmutable construido
    /// una sola vez; nadie más mantiene listas de modelos.
    pub model_chain: Vec<String>,

    pub batch_size: usize,
    pub concurrency: usize,
    pub delay_between_batches: Duration,

    pub search_limit: u64,
    pub score_threshold: f32,

    /// Tope por llamada HTTP saliente (embeddings, modelos, backend de almacén).
    pub http_timeout: Duration,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let warehouse_api_url = env::var("WAREHOUSE_API_URL")
            .map_err(|_| anyhow!("Falta WAREHOUSE_API_URL en el entorno"))?;
        let qdrant_url =
            env::var("QDRANT_URL").map_err(|_| anyhow!("Falta QDRANT_URL en el entorno"))?;
        let embedding_url =
            env::var("EMBEDDING_URL").map_err(|_| anyhow!("Falta EMBEDDING_URL en el entorno"))?;
        let generative_url = env::var("GENERATIVE_URL")
            .map_err(|_| anyhow!("Falta GENERATIVE_URL en el entorno"))?;

        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:8000".to_string());

        let collection_name =
            env::var("COLLECTION_NAME").unwrap_or_else(|_| "material_vectors".to_string());
        let vector_dim = parse_env("VECTOR_DIM", 384usize)?;

        let embedding_model = env::var("EMBEDDING_MODEL")
            .unwrap_or_else(|_| "intfloat/multilingual-e5-small".to_string());
        let embed_max_retries = parse_env("EMBED_MAX_RETRIES", 3u32)?;
        let embed_backoff_base =
            Duration::from_millis(parse_env("EMBED_BACKOFF_BASE_MS", 1000u64)?);

        let generative_api_key = env::var("GENERATIVE_API_KEY").ok().filter(|k| !k.is_empty());
        let model_chain_raw =
            env::var("MODEL_CHAIN").unwrap_or_else(|_| "gpt-4o-mini,gpt-4o".to_string());
        let model_chain: Vec<String> = model_chain_raw
            .split(',')
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        if model_chain.is_empty() {
            return Err(anyhow!("MODEL_CHAIN no contiene ningún modelo"));
        }

        let batch_size = parse_env("BATCH_SIZE", 10usize)?;
        let concurrency = parse_env("MAX_WORKERS", 5usize)?;
        let delay_between_batches =
            Duration::from_millis(parse_env("DELAY_BETWEEN_BATCHES_MS", 100u64)?);

        let search_limit = parse_env("SEARCH_LIMIT", 5u64)?;
        let score_threshold = parse_env("SCORE_THRESHOLD", 0.5f32)?;

        let http_timeout = Duration::from_secs(parse_env("HTTP_TIMEOUT_SECS", 30u64)?);

        if batch_size == 0 || concurrency == 0 {
            return Err(anyhow!("BATCH_SIZE y MAX_WORKERS deben ser mayores que cero"));
        }

        Ok(Self {
            server_addr,
            warehouse_api_url,
            qdrant_url,
            collection_name,
            vector_dim,
            embedding_url,
            embedding_model,
            embed_max_retries,
            embed_backoff_base,
            generative_url,
            generative_api_key,
            model_chain,
            batch_size,
            concurrency,
            delay_between_batches,
            search_limit,
            score_threshold,
            http_timeout,
        })
    }
}

/// Lee una variable numérica del entorno con valor por defecto.
fn parse_env<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<T>()
            .map_err(|_| anyhow!("Valor inválido en {name}: '{v}'")),
        _ => Ok(default),
    }
}
