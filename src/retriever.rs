//! Recuperación de contexto para el motor de consultas.
//!
//! Tabla de despacho por intención: cada intención específica se enruta a una
//! consulta estructurada del backend de almacén; si a una intención específica
//! le falta su slot (no aplica ninguna ruta estructurada), se cae a búsqueda
//! por similitud sobre el índice vectorial. Cero filas no es un error: se
//! devuelve un texto explícito de "sin datos".

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tracing::debug;

use crate::embedding::EmbeddingClient;
use crate::models::{Intent, IntentClassification, Material, ReportType};
use crate::vector_store::VectorIndex;
use crate::warehouse::{
    ActivityRow, ForecastRow, InactiveRow, LocationRow, LocationStockRow, StockStatusFilter,
    WarehouseData,
};

/// Días sin movimiento a partir de los cuales un material se considera inactivo.
const INACTIVE_DAYS: u32 = 30;

const NO_DATA: &str = "No se encontraron datos en el inventario para esta consulta.";

/// Contexto recuperado: bloque de texto para el prompt + filas crudas para
/// los metadatos de la respuesta.
#[derive(Debug, Clone, Default)]
pub struct RetrievedContext {
    pub text: String,
    pub results: Vec<Value>,
    pub total: usize,
}

impl RetrievedContext {
    fn empty() -> Self {
        Self::default()
    }

    fn no_data() -> Self {
        Self {
            text: NO_DATA.to_string(),
            results: Vec::new(),
            total: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

/// Enrutador de contexto sobre el backend de almacén y el índice vectorial.
#[derive(Clone)]
pub struct ContextRetriever {
    data: Arc<dyn WarehouseData>,
    embedder: EmbeddingClient,
    index: Arc<dyn VectorIndex>,
    search_limit: u64,
    score_threshold: f32,
}

impl ContextRetriever {
    pub fn new(
        data: Arc<dyn WarehouseData>,
        embedder: EmbeddingClient,
        index: Arc<dyn VectorIndex>,
        search_limit: u64,
        score_threshold: f32,
    ) -> Self {
        Self {
            data,
            embedder,
            index,
            search_limit,
            score_threshold,
        }
    }

    /// Recupera y formatea el contexto para una pregunta ya clasificada.
    pub async fn retrieve(
        &self,
        question: &str,
        intent: &IntentClassification,
    ) -> Result<RetrievedContext> {
        debug!("Recuperando contexto para intención '{}'.", intent.intent.as_str());

        match intent.intent {
            Intent::General => Ok(RetrievedContext::empty()),

            Intent::StockCheck => match &intent.material_target {
                Some(keyword) => {
                    let rows = self.data.materials_by_keyword(keyword).await?;
                    Ok(context_from(rows, material_line))
                }
                None => self.semantic_search(question).await,
            },

            Intent::CriticalStock => {
                let rows = self
                    .data
                    .materials_by_stock_status(StockStatusFilter::Critical)
                    .await?;
                Ok(context_from(rows, material_line))
            }

            Intent::Overstock => {
                let rows = self
                    .data
                    .materials_by_stock_status(StockStatusFilter::Over)
                    .await?;
                Ok(context_from(rows, material_line))
            }

            Intent::MaterialLocation => match &intent.material_target {
                Some(keyword) => {
                    let rows = self.data.material_locations(keyword).await?;
                    Ok(context_from(rows, location_line))
                }
                None => self.semantic_search(question).await,
            },

            Intent::CompareStock => {
                let mut rows = self.data.stock_by_location().await?;
                if let Some(org) = &intent.organization_target {
                    let org = org.to_lowercase();
                    rows.retain(|r| {
                        r.storage_name.to_lowercase().contains(&org)
                            || r.plant
                                .as_deref()
                                .is_some_and(|p| p.to_lowercase().contains(&org))
                    });
                }
                Ok(context_from(rows, location_stock_line))
            }

            Intent::WarehouseActivity => {
                let rows = self.data.transactions(None).await?;
                Ok(context_from(rows, activity_line))
            }

            Intent::Report => {
                let window = intent.report_type.unwrap_or(ReportType::Daily);
                let rows = self.data.transactions(Some(window)).await?;
                Ok(report_context(window, rows))
            }

            Intent::InactiveMaterials => {
                let rows = self.data.inactive_materials(INACTIVE_DAYS).await?;
                Ok(context_from(rows, inactive_line))
            }

            Intent::Forecast => {
                let rows = self.data.stock_forecast().await?;
                Ok(context_from(rows, forecast_line))
            }
        }
    }

    /// Búsqueda por similitud con el embedding de la propia pregunta.
    async fn semantic_search(&self, question: &str) -> Result<RetrievedContext> {
        let vector = self.embedder.embed(question).await?;
        let hits = self
            .index
            .search(vector, self.search_limit, self.score_threshold)
            .await?;

        if hits.is_empty() {
            return Ok(RetrievedContext::no_data());
        }

        let lines: Vec<String> = hits
            .iter()
            .map(|hit| match hit.payload.get("text").and_then(Value::as_str) {
                Some(text) => format!("- {text}"),
                None => format!(
                    "- {} {}",
                    hit.payload
                        .get("materialCode")
                        .and_then(Value::as_str)
                        .unwrap_or("?"),
                    hit.payload.get("name").and_then(Value::as_str).unwrap_or("")
                ),
            })
            .collect();

        let total = hits.len();
        Ok(RetrievedContext {
            text: lines.join("\n"),
            results: hits.into_iter().map(|h| h.payload).collect(),
            total,
        })
    }
}

/// Convierte un conjunto de filas en contexto: una línea por fila, filas
/// crudas serializadas para los metadatos.
fn context_from<T: serde::Serialize>(rows: Vec<T>, line: impl Fn(&T) -> String) -> RetrievedContext {
    if rows.is_empty() {
        return RetrievedContext::no_data();
    }
    let text = rows.iter().map(&line).collect::<Vec<_>>().join("\n");
    let results: Vec<Value> = rows
        .iter()
        .map(|r| serde_json::to_value(r).unwrap_or(Value::Null))
        .collect();
    let total = rows.len();
    RetrievedContext { text, results, total }
}

/// Informe: mismas filas que la actividad, agrupadas por fecha.
fn report_context(window: ReportType, rows: Vec<ActivityRow>) -> RetrievedContext {
    if rows.is_empty() {
        return RetrievedContext::no_data();
    }

    let mut by_date: BTreeMap<&str, Vec<&ActivityRow>> = BTreeMap::new();
    for row in &rows {
        by_date.entry(row.date.as_str()).or_default().push(row);
    }

    let mut text = format!("Informe de actividad ({}):", window.as_str());
    for (date, group) in &by_date {
        text.push_str(&format!("\nFecha {date}:"));
        for row in group {
            text.push('\n');
            text.push_str(&activity_line(row));
        }
    }

    let results: Vec<Value> = rows
        .iter()
        .map(|r| serde_json::to_value(r).unwrap_or(Value::Null))
        .collect();
    let total = rows.len();
    RetrievedContext { text, results, total }
}

fn opt(v: &Option<String>) -> &str {
    v.as_deref().unwrap_or("desconocido")
}

fn opt_num(v: Option<f64>) -> String {
    v.map(|n| n.to_string()).unwrap_or_else(|| "desconocido".into())
}

fn material_line(m: &Material) -> String {
    format!(
        "- {} {}: stock {} {} (estado {}), mínimo {}, máximo {}, rack {}, almacén {}",
        m.material_no,
        m.description,
        opt_num(m.stock),
        opt(&m.uom),
        opt(&m.stock_status),
        opt_num(m.min_stock),
        opt_num(m.max_stock),
        opt(&m.address_rack_name),
        opt(&m.storage_name),
    )
}

fn location_line(r: &LocationRow) -> String {
    format!(
        "- {} {}: rack {}, almacén {}, planta {}, warehouse {}",
        r.material_no,
        r.description,
        opt(&r.address_rack_name),
        opt(&r.storage_name),
        opt(&r.plant),
        opt(&r.warehouse),
    )
}

fn location_stock_line(r: &LocationStockRow) -> String {
    format!(
        "- Almacén {} (planta {}): stock total {}, {} materiales",
        r.storage_name,
        opt(&r.plant),
        opt_num(r.total_stock),
        r.material_count.unwrap_or(0),
    )
}

fn activity_line(r: &ActivityRow) -> String {
    format!(
        "- [{}] {} {}: movimiento {} de {} unidades por {}",
        r.date,
        r.material_no,
        r.description,
        opt(&r.movement_type),
        opt_num(r.quantity),
        opt(&r.created_by),
    )
}

fn inactive_line(r: &InactiveRow) -> String {
    format!(
        "- {} {}: {} días sin movimiento, stock {}",
        r.material_no,
        r.description,
        r.days_since_last_movement.unwrap_or(-1),
        opt_num(r.stock),
    )
}

fn forecast_line(r: &ForecastRow) -> String {
    format!(
        "- {} {}: stock {}, consumo medio diario {}, cobertura estimada {} días",
        r.material_no,
        r.description,
        opt_num(r.stock),
        opt_num(r.avg_daily_consumption),
        opt_num(r.remaining_days),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingBackend, EmbeddingError};
    use crate::models::MaterialPoint;
    use crate::vector_store::testing::MemoryIndex;
    use crate::warehouse::testing::FakeWarehouse;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct ConstantBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingBackend for ConstantBackend {
        async fn embed_once(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1.0, 0.0])
        }
    }

    fn material(id: i64, no: &str, descripcion: &str, status: &str) -> Material {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "materialNo": no,
            "description": descripcion,
            "stock": 5.0,
            "uom": "PCS",
            "stockStatus": status
        }))
        .unwrap()
    }

    fn retriever(
        warehouse: Arc<FakeWarehouse>,
        index: Arc<MemoryIndex>,
    ) -> (ContextRetriever, Arc<ConstantBackend>) {
        let backend = Arc::new(ConstantBackend {
            calls: AtomicUsize::new(0),
        });
        let embedder = EmbeddingClient::new(backend.clone(), 2, 3, Duration::from_millis(1));
        (
            ContextRetriever::new(warehouse, embedder, index, 5, 0.1),
            backend,
        )
    }

    fn classification(intent: Intent, target: Option<&str>) -> IntentClassification {
        IntentClassification {
            intent,
            material_target: target.map(str::to_string),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn stock_check_con_objetivo_usa_la_consulta_por_palabra_clave() {
        let warehouse = Arc::new(FakeWarehouse {
            materials: vec![material(1, "MAT-1", "Tornillo M8", "normal")],
            ..Default::default()
        });
        let (retriever, backend) = retriever(warehouse.clone(), Arc::new(MemoryIndex::default()));

        let ctx = retriever
            .retrieve("stock de tornillos", &classification(Intent::StockCheck, Some("tornillo")))
            .await
            .unwrap();

        assert_eq!(ctx.total, 1);
        assert!(ctx.text.contains("MAT-1 Tornillo M8"));
        assert_eq!(*warehouse.calls.lock().unwrap(), vec!["materials_by_keyword"]);
        // Sin búsqueda vectorial en la ruta estructurada
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sin_slot_se_cae_a_busqueda_vectorial() {
        let index = Arc::new(MemoryIndex::default());
        let mut payload = serde_json::Map::new();
        payload.insert("text".into(), serde_json::json!("Material MAT-9, grasa"));
        index
            .upsert(vec![MaterialPoint {
                id: 9,
                text: "grasa".into(),
                vector: vec![1.0, 0.0],
                payload,
            }])
            .await
            .unwrap();

        let warehouse = Arc::new(FakeWarehouse::default());
        let (retriever, backend) = retriever(warehouse.clone(), index);

        let ctx = retriever
            .retrieve("¿tenemos grasa?", &classification(Intent::StockCheck, None))
            .await
            .unwrap();

        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert!(ctx.text.contains("Material MAT-9"));
        assert!(warehouse.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cero_filas_no_es_error_sino_texto_de_sin_datos() {
        let warehouse = Arc::new(FakeWarehouse::default());
        let (retriever, _) = retriever(warehouse, Arc::new(MemoryIndex::default()));

        let ctx = retriever
            .retrieve("stock crítico", &classification(Intent::CriticalStock, None))
            .await
            .unwrap();

        assert_eq!(ctx.total, 0);
        assert!(ctx.text.contains("No se encontraron datos"));
    }

    #[tokio::test]
    async fn el_informe_agrupa_por_fecha() {
        let warehouse = Arc::new(FakeWarehouse {
            activity: vec![
                serde_json::from_value(serde_json::json!({
                    "date": "2025-03-02", "materialNo": "MAT-2", "description": "Guantes",
                    "movementType": "out", "quantity": 4.0
                }))
                .unwrap(),
                serde_json::from_value(serde_json::json!({
                    "date": "2025-03-01", "materialNo": "MAT-1", "description": "Tornillo",
                    "movementType": "in", "quantity": 10.0
                }))
                .unwrap(),
            ],
            ..Default::default()
        });
        let (retriever, _) = retriever(warehouse, Arc::new(MemoryIndex::default()));

        let mut intent = classification(Intent::Report, None);
        intent.report_type = Some(ReportType::Weekly);
        let ctx = retriever.retrieve("informe semanal", &intent).await.unwrap();

        assert!(ctx.text.starts_with("Informe de actividad (weekly):"));
        let pos_1 = ctx.text.find("Fecha 2025-03-01:").unwrap();
        let pos_2 = ctx.text.find("Fecha 2025-03-02:").unwrap();
        assert!(pos_1 < pos_2);
        assert_eq!(ctx.total, 2);
    }

    #[tokio::test]
    async fn la_intencion_general_devuelve_contexto_vacio_sin_consultas() {
        let warehouse = Arc::new(FakeWarehouse::default());
        let (retriever, backend) = retriever(warehouse.clone(), Arc::new(MemoryIndex::default()));

        let ctx = retriever
            .retrieve("hola", &classification(Intent::General, None))
            .await
            .unwrap();

        assert!(ctx.is_empty());
        assert!(ctx.text.is_empty());
        assert!(warehouse.calls.lock().unwrap().is_empty());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }
}
