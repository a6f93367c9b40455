//! Orquestador de consultas: clasificar, recuperar, preguntar.
//!
//! El contrato hacia fuera es simple: `answer` siempre devuelve una
//! `ChatAnswer`, nunca un error. Los fallos de cualquier etapa convergen en
//! una respuesta de disculpa con el detalle crudo en el campo diagnóstico.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info};

use crate::intent::IntentClassifier;
use crate::llm::LlmClient;
use crate::models::{ChatAnswer, ChatMetadata, Intent};
use crate::retriever::ContextRetriever;

const GENERAL_ANSWER: &str = "¡Hola! Soy el asistente de inventario del almacén. \
Puedo ayudarte con consultas como:\n\
- \"¿Cuánto stock hay del material X?\"\n\
- \"¿Qué materiales están en stock crítico?\"\n\
- \"¿Dónde está almacenado el material X?\"\n\
- \"Compárame el stock entre almacenes\"\n\
- \"Dame el informe de actividad semanal\"\n\
- \"¿Qué materiales llevan tiempo sin movimiento?\"\n\
- \"¿Para cuántos días queda stock?\"";

/// Motor de consultas completo: clasificador + recuperador + generador.
#[derive(Clone)]
pub struct QueryEngine {
    classifier: IntentClassifier,
    retriever: ContextRetriever,
    llm: Arc<LlmClient>,
}

impl QueryEngine {
    pub fn new(
        classifier: IntentClassifier,
        retriever: ContextRetriever,
        llm: Arc<LlmClient>,
    ) -> Self {
        Self {
            classifier,
            retriever,
            llm,
        }
    }

    /// Responde a una pregunta del usuario. No devuelve errores: cualquier
    /// fallo interno se convierte en una respuesta de disculpa.
    pub async fn answer(&self, question: &str) -> ChatAnswer {
        let started = Instant::now();
        let classification = self.classifier.classify(question).await;
        info!(
            "Pregunta clasificada como '{}'.",
            classification.intent.as_str()
        );

        // Las preguntas generales no tocan ni el almacén ni el índice: la
        // respuesta enlatada con sugerencias sale directamente.
        if classification.intent == Intent::General {
            return ChatAnswer::assistant(
                GENERAL_ANSWER,
                ChatMetadata {
                    intent: Some(Intent::General),
                    query_time_seconds: Some(started.elapsed().as_secs_f64()),
                    ..ChatMetadata::default()
                },
            );
        }

        let context = match self.retriever.retrieve(question, &classification).await {
            Ok(context) => context,
            Err(err) => {
                error!("Fallo recuperando contexto: {err:#}");
                return ChatAnswer::apology(format!("{err:#}"));
            }
        };

        let prompt = build_prompt(question, &context.text);
        match self.llm.ask(&prompt).await {
            Ok(content) => ChatAnswer::assistant(
                content,
                ChatMetadata {
                    intent: Some(classification.intent),
                    search_results: Some(context.results),
                    total_found: Some(context.total),
                    query_time_seconds: Some(started.elapsed().as_secs_f64()),
                },
            ),
            Err(err) => {
                error!("Fallo del modelo generativo: {err}");
                ChatAnswer::apology(err.to_string())
            }
        }
    }
}

/// Prompt final hacia el modelo generativo, con el contexto recuperado.
fn build_prompt(question: &str, context: &str) -> String {
    let context = if context.is_empty() {
        "No hay datos internos de inventario para esta consulta."
    } else {
        context
    };
    format!(
        "Eres un asistente de inventario de almacén. Responde en el idioma del \
         usuario, de forma breve y basándote SOLO en los datos siguientes. Si \
         los datos no bastan, dilo claramente.\n\n\
         Datos de inventario:\n{context}\n\n\
         Pregunta del usuario:\n{question}"
    )
}
