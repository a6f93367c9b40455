//! Cliente de modelos generativos con cadena de fallback.
//!
//! Se prueba cada candidato de la cadena en orden: una respuesta no vacía se
//! devuelve de inmediato; un error de cuota/límite pasa al siguiente; cualquier
//! otro error corta en seco (es un problema de la petición, no del modelo).

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::embedding::snippet;

#[derive(Debug, Error)]
pub enum GenerativeError {
    /// Cuota o límite de tasa del candidato actual; se prueba el siguiente.
    #[error("cuota agotada en el modelo '{model}': {detail}")]
    Quota { model: String, detail: String },

    /// Todos los candidatos de la cadena fallaron o devolvieron vacío.
    #[error("todos los modelos de la cadena de fallback quedaron agotados")]
    Exhausted,

    /// Fallo no relacionado con cuota (petición inválida, auth, etc.).
    #[error("fallo del modelo generativo: {0}")]
    Service(String),

    #[error("error de transporte con el modelo generativo: {0}")]
    Http(#[from] reqwest::Error),
}

/// Cadena de fallback: lista ordenada e inmutable de candidatos, construida
/// una vez desde la configuración.
#[derive(Debug, Clone)]
pub struct ModelChain {
    models: Vec<String>,
}

impl ModelChain {
    pub fn new(models: Vec<String>) -> Self {
        Self { models }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.models.iter().map(String::as_str)
    }
}

/// Transporte hacia un servicio de modelos generativos.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    async fn complete(&self, model: &str, prompt: &str) -> Result<String, GenerativeError>;
}

/// Backend HTTP compatible con la API de chat-completions de OpenAI.
pub struct HttpGenerativeBackend {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: String,
}

impl HttpGenerativeBackend {
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.http_timeout)
            .build()?;
        Ok(Self {
            http,
            url: cfg.generative_url.trim_end_matches('/').to_string(),
            api_key: cfg.generative_api_key.clone(),
        })
    }
}

#[async_trait]
impl GenerativeBackend for HttpGenerativeBackend {
    async fn complete(&self, model: &str, prompt: &str) -> Result<String, GenerativeError> {
        let mut request = self
            .http
            .post(format!("{}/v1/chat/completions", self.url))
            .json(&json!({
                "model": model,
                "messages": [{ "role": "user", "content": prompt }],
            }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = format!("HTTP {status}: {}", snippet(&body));
            if is_quota_signal(status.as_u16(), &body) {
                return Err(GenerativeError::Quota {
                    model: model.to_string(),
                    detail,
                });
            }
            return Err(GenerativeError::Service(detail));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| GenerativeError::Service(format!("respuesta no decodificable: {e}")))?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default())
    }
}

/// Detecta errores de clase cuota/límite por código o patrón de mensaje.
fn is_quota_signal(status: u16, body: &str) -> bool {
    if status == 429 {
        return true;
    }
    let body = body.to_lowercase();
    ["quota", "limit", "rate", "exceeded"]
        .iter()
        .any(|p| body.contains(p))
}

/// Cliente generativo: transporte + cadena de fallback.
#[derive(Clone)]
pub struct LlmClient {
    backend: Arc<dyn GenerativeBackend>,
    chain: ModelChain,
}

impl LlmClient {
    pub fn new(backend: Arc<dyn GenerativeBackend>, chain: ModelChain) -> Self {
        Self { backend, chain }
    }

    /// Envía el prompt a los candidatos en orden hasta obtener una respuesta
    /// no vacía.
    pub async fn ask(&self, prompt: &str) -> Result<String, GenerativeError> {
        for model in self.chain.iter() {
            match self.backend.complete(model, prompt).await {
                Ok(answer) if !answer.trim().is_empty() => {
                    info!("Respuesta obtenida del modelo '{model}'.");
                    return Ok(answer);
                }
                Ok(_) => {
                    warn!("El modelo '{model}' devolvió una respuesta vacía; probando el siguiente.");
                }
                Err(GenerativeError::Quota { model, detail }) => {
                    warn!("Cuota agotada en '{model}' ({detail}); probando el siguiente.");
                }
                Err(other) => return Err(other),
            }
        }
        Err(GenerativeError::Exhausted)
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Respuesta guionizada por modelo, más registro de llamadas.
    pub struct ScriptedBackend {
        pub script: Vec<(&'static str, Result<&'static str, &'static str>)>,
        pub calls: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        pub fn new(script: Vec<(&'static str, Result<&'static str, &'static str>)>) -> Self {
            Self {
                script,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl GenerativeBackend for ScriptedBackend {
        async fn complete(&self, model: &str, _prompt: &str) -> Result<String, GenerativeError> {
            self.calls.lock().unwrap().push(model.to_string());
            for (m, outcome) in &self.script {
                if *m == model {
                    return match outcome {
                        Ok(answer) => Ok((*answer).to_string()),
                        Err("quota") => Err(GenerativeError::Quota {
                            model: model.to_string(),
                            detail: "simulada".into(),
                        }),
                        Err(detail) => Err(GenerativeError::Service((*detail).to_string())),
                    };
                }
            }
            Ok(String::new())
        }
    }
}
