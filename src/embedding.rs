//! Cliente del servicio de embeddings con reintentos ante sobrecarga.
//!
//! La regla central: una señal de "servicio saturado" se reintenta con
//! backoff exponencial acotado; cualquier otro error se propaga de inmediato
//! sin reintentar.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use crate::config::AppConfig;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Señal transitoria de sobrecarga del servicio; la única clase que se reintenta.
    #[error("servicio de embeddings saturado: {0}")]
    Busy(String),

    /// Reintentos agotados tras señales de sobrecarga consecutivas.
    #[error("embeddings agotados tras {attempts} intentos: {last}")]
    Exhausted { attempts: u32, last: String },

    /// El vector devuelto no coincide con la dimensión configurada del índice.
    /// Error de configuración terminal, no un error por ítem.
    #[error("dimensión de vector inesperada: {got} (configurada {want})")]
    DimensionMismatch { got: usize, want: usize },

    /// Cualquier otro fallo del servicio (petición malformada, auth, etc.).
    #[error("fallo del servicio de embeddings: {0}")]
    Service(String),

    #[error("error de transporte con el servicio de embeddings: {0}")]
    Http(#[from] reqwest::Error),
}

/// Transporte hacia el servicio de embeddings. La separación permite probar
/// la política de reintentos sin servicio real.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed_once(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Backend HTTP estilo Ollama: `POST {url}/api/embeddings {model, prompt}`.
pub struct HttpEmbeddingBackend {
    http: reqwest::Client,
    url: String,
    model: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl HttpEmbeddingBackend {
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.http_timeout)
            .build()?;
        Ok(Self {
            http,
            url: cfg.embedding_url.trim_end_matches('/').to_string(),
            model: cfg.embedding_model.clone(),
        })
    }
}

#[async_trait]
impl EmbeddingBackend for HttpEmbeddingBackend {
    async fn embed_once(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let response = self
            .http
            .post(format!("{}/api/embeddings", self.url))
            .json(&json!({ "model": self.model, "prompt": text }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = format!("HTTP {status}: {}", snippet(&body));
            if is_busy_signal(status.as_u16(), &body) {
                return Err(EmbeddingError::Busy(detail));
            }
            return Err(EmbeddingError::Service(detail));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Service(format!("respuesta no decodificable: {e}")))?;
        Ok(parsed.embedding)
    }
}

/// Distingue la señal de sobrecarga de cualquier otro fallo.
fn is_busy_signal(status: u16, body: &str) -> bool {
    if status == 429 || status == 503 {
        return true;
    }
    let body = body.to_lowercase();
    ["busy", "overload", "saturado", "server is loading"]
        .iter()
        .any(|p| body.contains(p))
}

/// Recorta el cuerpo de error a ~200 bytes sin partir caracteres UTF-8.
pub(crate) fn snippet(body: &str) -> &str {
    let mut end = body.len().min(200);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

/// Cliente de embeddings: transporte + política de reintentos + invariante
/// de dimensionalidad.
#[derive(Clone)]
pub struct EmbeddingClient {
    backend: Arc<dyn EmbeddingBackend>,
    dim: usize,
    max_retries: u32,
    backoff_base: Duration,
}

impl EmbeddingClient {
    pub fn new(
        backend: Arc<dyn EmbeddingBackend>,
        dim: usize,
        max_retries: u32,
        backoff_base: Duration,
    ) -> Self {
        Self {
            backend,
            dim,
            max_retries,
            backoff_base,
        }
    }

    /// Calcula el embedding de un texto. Reintenta solo ante sobrecarga,
    /// esperando `base * 2^intento` entre intentos.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut last_busy = String::new();

        for attempt in 0..self.max_retries {
            match self.backend.embed_once(text).await {
                Ok(vector) => {
                    if vector.len() != self.dim {
                        return Err(EmbeddingError::DimensionMismatch {
                            got: vector.len(),
                            want: self.dim,
                        });
                    }
                    return Ok(vector);
                }
                Err(EmbeddingError::Busy(detail)) => {
                    last_busy = detail;
                    if attempt + 1 < self.max_retries {
                        let wait = self.backoff_base * 2u32.pow(attempt);
                        warn!(
                            "Servicio de embeddings saturado (intento {}/{}), reintentando en {:?}",
                            attempt + 1,
                            self.max_retries,
                            wait
                        );
                        tokio::time::sleep(wait).await;
                    }
                }
                Err(other) => return Err(other),
            }
        }

        Err(EmbeddingError::Exhausted {
            attempts: self.max_retries,
            last: last_busy,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend que falla con "saturado" las primeras `busy_first` llamadas.
    struct FakeBackend {
        busy_first: usize,
        then: ThenBehaviour,
        calls: AtomicUsize,
    }

    enum ThenBehaviour {
        Vector(Vec<f32>),
        ServiceError,
    }

    #[async_trait]
    impl EmbeddingBackend for FakeBackend {
        async fn embed_once(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.busy_first {
                return Err(EmbeddingError::Busy("ocupado".into()));
            }
            match &self.then {
                ThenBehaviour::Vector(v) => Ok(v.clone()),
                ThenBehaviour::ServiceError => {
                    Err(EmbeddingError::Service("petición malformada".into()))
                }
            }
        }
    }

    fn client(backend: Arc<FakeBackend>, dim: usize) -> EmbeddingClient {
        EmbeddingClient::new(backend, dim, 3, Duration::from_millis(10))
    }

    #[tokio::test(start_paused = true)]
    async fn reintenta_ante_sobrecarga_y_devuelve_el_vector() {
        let backend = Arc::new(FakeBackend {
            busy_first: 2,
            then: ThenBehaviour::Vector(vec![0.0; 4]),
            calls: AtomicUsize::new(0),
        });
        let started = tokio::time::Instant::now();
        let vector = client(backend.clone(), 4).embed("texto").await.unwrap();

        assert_eq!(vector.len(), 4);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        // Esperas observadas: base*2^0 + base*2^1 = 10ms + 20ms
        assert_eq!(started.elapsed(), Duration::from_millis(30));
    }

    #[tokio::test(start_paused = true)]
    async fn agotar_los_reintentos_devuelve_exhausted() {
        let backend = Arc::new(FakeBackend {
            busy_first: usize::MAX,
            then: ThenBehaviour::Vector(vec![]),
            calls: AtomicUsize::new(0),
        });
        let err = client(backend.clone(), 4).embed("texto").await.unwrap_err();

        assert!(matches!(err, EmbeddingError::Exhausted { attempts: 3, .. }));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn un_error_no_transitorio_no_se_reintenta() {
        let backend = Arc::new(FakeBackend {
            busy_first: 0,
            then: ThenBehaviour::ServiceError,
            calls: AtomicUsize::new(0),
        });
        let err = client(backend.clone(), 4).embed("texto").await.unwrap_err();

        assert!(matches!(err, EmbeddingError::Service(_)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn una_dimension_distinta_es_error_terminal() {
        let backend = Arc::new(FakeBackend {
            busy_first: 0,
            then: ThenBehaviour::Vector(vec![0.0; 3]),
            calls: AtomicUsize::new(0),
        });
        let err = client(backend, 4).embed("texto").await.unwrap_err();

        assert!(matches!(
            err,
            EmbeddingError::DimensionMismatch { got: 3, want: 4 }
        ));
    }

    #[test]
    fn el_recorte_del_cuerpo_respeta_los_limites_utf8() {
        // El byte 200 cae dentro de la 'ó' multibyte.
        let body = format!("{}ó y más detalle", "x".repeat(199));
        let cut = snippet(&body);
        assert_eq!(cut, "x".repeat(199));

        let corto = "servicio saturado";
        assert_eq!(snippet(corto), corto);
    }

    #[test]
    fn la_senal_de_sobrecarga_se_distingue_por_estado_o_mensaje() {
        assert!(is_busy_signal(503, ""));
        assert!(is_busy_signal(429, ""));
        assert!(is_busy_signal(500, "model server is Busy, try later"));
        assert!(!is_busy_signal(400, "invalid request"));
        assert!(!is_busy_signal(401, "unauthorized"));
    }
}
