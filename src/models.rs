//! Modelos de dominio (materiales de inventario, puntos vectoriales,
//! intenciones de consulta y respuestas de chat).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Instantánea inmutable de un material de inventario tal y como lo entrega
/// el backend de almacén. Solo lectura: el sistema origen es el dueño.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Material {
    pub id: i64,
    #[serde(default)]
    pub material_no: String,
    #[serde(default)]
    pub description: String,
    pub category: Option<String>,
    #[serde(rename = "type")]
    pub material_type: Option<String>,
    pub address_rack_name: Option<String>,
    pub storage_name: Option<String>,
    pub plant: Option<String>,
    pub warehouse: Option<String>,
    pub supplier: Option<String>,
    pub packaging: Option<String>,
    pub packaging_unit: Option<String>,
    pub uom: Option<String>,
    pub price: Option<f64>,
    pub min_order: Option<f64>,
    pub mrp_type: Option<String>,
    pub min_stock: Option<f64>,
    pub max_stock: Option<f64>,
    pub stock: Option<f64>,
    pub stock_status: Option<String>,
    pub stock_updated_at: Option<String>,
    pub stock_updated_by: Option<String>,
}

/// Punto listo para el índice vectorial: el `id` coincide con el id del
/// material, de modo que re-ingestar sobreescribe en lugar de duplicar.
#[derive(Debug, Clone)]
pub struct MaterialPoint {
    pub id: u64,
    pub text: String,
    pub vector: Vec<f32>,
    pub payload: serde_json::Map<String, serde_json::Value>,
}

/// Resultado de una búsqueda por similitud: puntuación + payload, nunca el
/// vector crudo.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub score: f32,
    pub payload: serde_json::Value,
}

/// Intención clasificada de una pregunta. Los valores desconocidos caen en
/// `General`, que es la ruta segura del orquestador.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Intent {
    StockCheck,
    CriticalStock,
    Overstock,
    MaterialLocation,
    CompareStock,
    WarehouseActivity,
    Report,
    InactiveMaterials,
    Forecast,
    #[default]
    General,
}

impl<'de> Deserialize<'de> for Intent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Intent::from_tag(&raw))
    }
}

impl Intent {
    /// Mapea la etiqueta textual a la intención; lo no reconocido es `General`.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "stock-check" => Intent::StockCheck,
            "critical-stock" => Intent::CriticalStock,
            "overstock" => Intent::Overstock,
            "material-location" => Intent::MaterialLocation,
            "compare-stock" => Intent::CompareStock,
            "warehouse-activity" => Intent::WarehouseActivity,
            "report" => Intent::Report,
            "inactive-materials" => Intent::InactiveMaterials,
            "forecast" => Intent::Forecast,
            _ => Intent::General,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::StockCheck => "stock-check",
            Intent::CriticalStock => "critical-stock",
            Intent::Overstock => "overstock",
            Intent::MaterialLocation => "material-location",
            Intent::CompareStock => "compare-stock",
            Intent::WarehouseActivity => "warehouse-activity",
            Intent::Report => "report",
            Intent::InactiveMaterials => "inactive-materials",
            Intent::Forecast => "forecast",
            Intent::General => "general",
        }
    }
}

/// Ventana temporal de los informes de actividad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    Daily,
    Weekly,
    Monthly,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::Daily => "daily",
            ReportType::Weekly => "weekly",
            ReportType::Monthly => "monthly",
        }
    }
}

/// Clasificación completa de una pregunta. Se crea por consulta y nunca se
/// persiste. El esquema es estricto: una forma no reconocida se descarta
/// entera y se sustituye por el valor por defecto (`general`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct IntentClassification {
    pub intent: Intent,
    pub material_target: Option<String>,
    pub report_type: Option<ReportType>,
    #[serde(rename = "type")]
    pub type_target: Option<String>,
    pub organization_target: Option<String>,
}

/// Contenido del mensaje entrante del chat. Los clientes históricos envían
/// texto plano, un objeto `{text}` o una lista de partes; aquí las tres
/// formas quedan modeladas explícitamente.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Object { text: String },
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentPart {
    #[serde(default)]
    pub text: Option<String>,
}

impl MessageContent {
    /// Normaliza cualquier variante a texto plano.
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Object { text } => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// Metadatos que acompañan a una respuesta de chat.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_results: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_found: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_time_seconds: Option<f64>,
}

/// Unidad de respuesta del motor de consultas. El endpoint de chat siempre
/// devuelve una de estas, también en caso de error.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatAnswer {
    pub role: String,
    pub content: String,
    pub done: bool,
    pub metadata: ChatMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChatAnswer {
    pub fn assistant(content: impl Into<String>, metadata: ChatMetadata) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
            done: true,
            metadata,
            error: None,
        }
    }

    /// Respuesta de disculpa con el detalle crudo en el campo diagnóstico.
    pub fn apology(detail: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: "Lo siento, ha ocurrido un problema al procesar tu consulta. \
                      Inténtalo de nuevo en unos momentos."
                .to_string(),
            done: true,
            metadata: ChatMetadata::default(),
            error: Some(detail.into()),
        }
    }
}

/// Estado de un job de ingesta en segundo plano.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
}

/// Registro mínimo de un job de ingesta: estado, progreso y contadores.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: Uuid,
    pub state: JobState,
    /// Valor entre 0.0 y 1.0
    pub progress: f32,
    pub message: String,
    pub processed: usize,
    pub failed: usize,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn queued(id: Uuid) -> Self {
        Self {
            id,
            state: JobState::Queued,
            progress: 0.0,
            message: "Job encolado.".to_string(),
            processed: 0,
            failed: 0,
            total: 0,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }
}
