//! Clasificación de intención de las preguntas del chat.
//!
//! Pide al modelo generativo un objeto JSON con la intención y sus slots,
//! y lo valida de forma estricta. Cualquier fallo (sin JSON, JSON roto,
//! esquema inesperado, modelo caído) degrada al valor por defecto `general`
//! en lugar de propagar un error: el orquestador siempre puede continuar.

use std::sync::Arc;

use tracing::warn;

use crate::llm::LlmClient;
use crate::models::IntentClassification;

const CLASSIFICATION_PROMPT: &str = r#"
Eres un clasificador de preguntas para un asistente de inventario de almacén.
Clasifica la pregunta del usuario en UNA de estas intenciones:

- "stock-check": pregunta por el stock de un material concreto.
- "critical-stock": pide materiales con stock crítico o bajo mínimo.
- "overstock": pide materiales con exceso de stock.
- "material-location": pregunta dónde está almacenado un material.
- "compare-stock": pide comparar stock entre almacenes o ubicaciones.
- "warehouse-activity": pregunta por movimientos o actividad del almacén.
- "report": pide un informe de actividad (diario, semanal o mensual).
- "inactive-materials": pide materiales sin movimiento desde hace tiempo.
- "forecast": pregunta cuánto durará el stock o pide una previsión.
- "general": saludos, preguntas fuera de dominio o cualquier otra cosa.

La salida DEBE ser un único objeto JSON válido con exactamente estas claves:
{"intent": "...", "materialTarget": null, "reportType": null, "type": null, "organizationTarget": null}

- "materialTarget": palabra clave del material si la pregunta nombra uno.
- "reportType": "daily" | "weekly" | "monthly" si se pide un informe con ventana.
- "type": tipo de material si la pregunta lo restringe (ej. "SPAREPART").
- "organizationTarget": planta, almacén o warehouse si la pregunta nombra uno.

No incluyas explicaciones, solo el JSON.
"#;

/// Clasificador de intenciones sobre el cliente generativo.
#[derive(Clone)]
pub struct IntentClassifier {
    llm: Arc<LlmClient>,
}

impl IntentClassifier {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }

    /// Clasifica una pregunta. Nunca falla: devuelve `general` como último
    /// recurso.
    pub async fn classify(&self, question: &str) -> IntentClassification {
        let prompt = format!("{CLASSIFICATION_PROMPT}\nPregunta del usuario:\n{question}");

        let raw = match self.llm.ask(&prompt).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!("El clasificador no obtuvo respuesta del modelo: {err}");
                return IntentClassification::default();
            }
        };

        parse_classification(&raw)
    }
}

/// Extrae y valida el primer objeto JSON de la respuesta cruda del modelo.
pub fn parse_classification(raw: &str) -> IntentClassification {
    let Some(candidate) = extract_json_object(raw) else {
        warn!("Respuesta del clasificador sin objeto JSON: '{}'", raw.trim());
        return IntentClassification::default();
    };

    match serde_json::from_str::<IntentClassification>(candidate) {
        Ok(classification) => classification,
        Err(err) => {
            warn!("Clasificación no parseable ({err}); se usa 'general'. JSON: '{candidate}'");
            IntentClassification::default()
        }
    }
}

/// Localiza la primera subcadena delimitada por llaves balanceadas, ignorando
/// llaves dentro de literales de cadena.
fn extract_json_object(raw: &str) -> Option<&str> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```");

    let start = cleaned.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in cleaned[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&cleaned[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}
