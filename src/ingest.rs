//! Ingesta por lotes del feed de materiales hacia el índice vectorial.
//!
//! Los lotes son estrictamente secuenciales; dentro de cada lote un pool de
//! workers comparte un cursor atómico sobre los ítems. El fallo de un ítem
//! (embedding imposible) se registra y se salta; el fallo del upsert del lote
//! aborta la ingesta entera. Entre lote y lote hay una pausa corta para no
//! saturar a los servicios vecinos.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::join_all;
use tracing::{info, warn};
use uuid::Uuid;

use crate::app_state::Jobs;
use crate::config::AppConfig;
use crate::embedding::{EmbeddingClient, EmbeddingError};
use crate::models::{Material, MaterialPoint};
use crate::serializer::{material_point, material_text};
use crate::vector_store::VectorIndex;
use crate::warehouse::WarehouseData;

/// Parámetros de planificación de la ingesta.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub batch_size: usize,
    pub concurrency: usize,
    pub delay_between_batches: Duration,
}

impl IngestOptions {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            batch_size: cfg.batch_size,
            concurrency: cfg.concurrency,
            delay_between_batches: cfg.delay_between_batches,
        }
    }
}

/// Resumen de los resultados de una operación de ingesta.
#[derive(Debug, Default)]
pub struct IngestionSummary {
    pub total: usize,
    pub ingested: usize,
    pub failed: usize,
    pub batches: usize,
}

/// Implementa cómo se mostrará el resumen como texto.
impl std::fmt::Display for IngestionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Resumen: {} materiales en el feed, {} ingeridos y {} fallidos en {} lotes.",
            self.total, self.ingested, self.failed, self.batches
        )
    }
}

/// Descarga el feed completo, garantiza la colección y ejecuta la ingesta.
pub async fn ingest_from_feed(
    data: &dyn WarehouseData,
    embedder: &EmbeddingClient,
    index: &dyn VectorIndex,
    opts: &IngestOptions,
    jobs: &Jobs,
    job_id: Uuid,
) -> Result<IngestionSummary> {
    index
        .ensure_collection()
        .await
        .context("No se pudo garantizar la colección del índice vectorial")?;

    let materials = data
        .fetch_all_materials()
        .await
        .context("No se pudo descargar el feed de materiales")?;

    info!("Feed descargado: {} materiales.", materials.len());
    run_ingestion(embedder, index, materials, opts, jobs, job_id).await
}

/// Procesa los materiales en lotes secuenciales con workers concurrentes.
pub async fn run_ingestion(
    embedder: &EmbeddingClient,
    index: &dyn VectorIndex,
    materials: Vec<Material>,
    opts: &IngestOptions,
    jobs: &Jobs,
    job_id: Uuid,
) -> Result<IngestionSummary> {
    let total = materials.len();
    let mut summary = IngestionSummary {
        total,
        ..IngestionSummary::default()
    };
    jobs.update(job_id, |job| {
        job.total = total;
        job.message = format!("Procesando {total} materiales.");
    });

    if total == 0 {
        return Ok(summary);
    }

    let batches: Vec<&[Material]> = materials.chunks(opts.batch_size).collect();
    let batch_count = batches.len();

    for (batch_index, batch) in batches.into_iter().enumerate() {
        let (points, failed) = embed_batch(embedder, batch, opts.concurrency).await?;

        // Un único upsert por lote: su fallo es fatal para toda la ingesta.
        if !points.is_empty() {
            let written = index.upsert(points).await.with_context(|| {
                format!("Falló el upsert del lote {}/{batch_count}", batch_index + 1)
            })?;
            summary.ingested += written;
        }
        summary.failed += failed;
        summary.batches += 1;

        let done = (batch_index + 1) * opts.batch_size;
        let done = done.min(total);
        jobs.update(job_id, |job| {
            job.processed = summary.ingested;
            job.failed = summary.failed;
            job.progress = done as f32 / total as f32;
            job.message = format!("Lote {}/{batch_count} completado.", batch_index + 1);
        });
        info!(
            "Lote {}/{} completado: {} puntos, {} fallos.",
            batch_index + 1,
            batch_count,
            summary.ingested,
            summary.failed
        );

        if batch_index + 1 < batch_count {
            tokio::time::sleep(opts.delay_between_batches).await;
        }
    }

    info!("{summary}");
    Ok(summary)
}

/// Embebe los ítems de un lote con un pool de workers sobre cursor compartido.
/// Devuelve los puntos listos y el número de ítems saltados.
async fn embed_batch(
    embedder: &EmbeddingClient,
    batch: &[Material],
    concurrency: usize,
) -> Result<(Vec<MaterialPoint>, usize)> {
    let cursor = AtomicUsize::new(0);
    let workers = concurrency.min(batch.len()).max(1);

    let handles = (0..workers).map(|_| {
        let cursor = &cursor;
        async move {
            let mut points = Vec::new();
            let mut failed = 0usize;
            loop {
                let i = cursor.fetch_add(1, Ordering::SeqCst);
                let Some(material) = batch.get(i) else { break };

                let text = material_text(material);
                match embedder.embed(&text).await {
                    Ok(vector) => match material_point(material, text, vector) {
                        Ok(point) => points.push(point),
                        Err(err) => {
                            warn!(
                                "Ítem saltado (material {}): {err}",
                                material.material_no
                            );
                            failed += 1;
                        }
                    },
                    // Una dimensión incorrecta es un error de configuración,
                    // no un ítem malo: aborta la ingesta.
                    Err(err @ EmbeddingError::DimensionMismatch { .. }) => {
                        return Err(anyhow::Error::from(err));
                    }
                    Err(err) => {
                        warn!(
                            "Ítem saltado (material {}): {err}",
                            material.material_no
                        );
                        failed += 1;
                    }
                }
            }
            Ok((points, failed))
        }
    });

    let mut points = Vec::with_capacity(batch.len());
    let mut failed = 0usize;
    for outcome in join_all(handles).await {
        let (worker_points, worker_failed) = outcome?;
        points.extend(worker_points);
        failed += worker_failed;
    }
    Ok((points, failed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingBackend;
    use crate::vector_store::testing::MemoryIndex;
    use async_trait::async_trait;
    use std::sync::Arc;

    /// Backend que falla con los textos marcados y mide la concurrencia real.
    struct GaugeBackend {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl GaugeBackend {
        fn new() -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbeddingBackend for GaugeBackend {
        async fn embed_once(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if text.contains("VENENO") {
                return Err(EmbeddingError::Service("ítem envenenado".into()));
            }
            Ok(vec![1.0, 0.0])
        }
    }

    fn materials(n: usize, poisoned: &[usize]) -> Vec<Material> {
        (0..n)
            .map(|i| {
                let description = if poisoned.contains(&i) {
                    format!("VENENO {i}")
                } else {
                    format!("Material {i}")
                };
                serde_json::from_value(serde_json::json!({
                    "id": i as i64 + 1,
                    "materialNo": format!("MAT-{i}"),
                    "description": description
                }))
                .unwrap()
            })
            .collect()
    }

    fn options() -> IngestOptions {
        IngestOptions {
            batch_size: 10,
            concurrency: 5,
            delay_between_batches: Duration::from_millis(100),
        }
    }

    fn embedder(backend: Arc<GaugeBackend>) -> EmbeddingClient {
        EmbeddingClient::new(backend, 2, 3, Duration::from_millis(1))
    }

    #[tokio::test(start_paused = true)]
    async fn ingesta_completa_con_items_fallidos_aislados() {
        let backend = Arc::new(GaugeBackend::new());
        let index = MemoryIndex::default();
        let jobs = Jobs::default();
        let job_id = jobs.create();

        let summary = run_ingestion(
            &embedder(backend.clone()),
            &index,
            materials(25, &[3, 17]),
            &options(),
            &jobs,
            job_id,
        )
        .await
        .unwrap();

        assert_eq!(summary.total, 25);
        assert_eq!(summary.ingested, 23);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.batches, 3);
        assert_eq!(index.len(), 23);

        let job = jobs.get(job_id).unwrap();
        assert_eq!(job.processed, 23);
        assert_eq!(job.failed, 2);
        assert_eq!(job.total, 25);
        assert!((job.progress - 1.0).abs() < f32::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn el_pool_respeta_el_tope_de_workers() {
        let backend = Arc::new(GaugeBackend::new());
        let jobs = Jobs::default();
        let job_id = jobs.create();

        run_ingestion(
            &embedder(backend.clone()),
            &MemoryIndex::default(),
            materials(25, &[]),
            &options(),
            &jobs,
            job_id,
        )
        .await
        .unwrap();

        let max = backend.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 5, "concurrencia observada {max}");
        assert!(max >= 2, "los workers no llegaron a solaparse");
    }

    #[tokio::test(start_paused = true)]
    async fn la_pausa_entre_lotes_es_observable() {
        let backend = Arc::new(GaugeBackend::new());
        let jobs = Jobs::default();
        let job_id = jobs.create();
        let started = tokio::time::Instant::now();

        run_ingestion(
            &embedder(backend),
            &MemoryIndex::default(),
            materials(25, &[]),
            &options(),
            &jobs,
            job_id,
        )
        .await
        .unwrap();

        // 3 lotes → 2 pausas de 100ms, más 5ms de embedding por ronda.
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn un_upsert_fallido_aborta_la_ingesta() {
        let backend = Arc::new(GaugeBackend::new());
        let index = MemoryIndex::failing();
        let jobs = Jobs::default();
        let job_id = jobs.create();

        let err = run_ingestion(
            &embedder(backend),
            &index,
            materials(5, &[]),
            &options(),
            &jobs,
            job_id,
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("lote 1/1"));
    }

    #[tokio::test(start_paused = true)]
    async fn un_id_negativo_se_salta_sin_abortar_la_ingesta() {
        let backend = Arc::new(GaugeBackend::new());
        let index = MemoryIndex::default();
        let jobs = Jobs::default();
        let job_id = jobs.create();

        let mut feed = materials(3, &[]);
        feed[1].id = -2;

        let summary = run_ingestion(
            &embedder(backend),
            &index,
            feed,
            &options(),
            &jobs,
            job_id,
        )
        .await
        .unwrap();

        assert_eq!(summary.ingested, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(index.len(), 2);
    }

    #[tokio::test]
    async fn un_feed_vacio_termina_sin_tocar_el_indice() {
        let backend = Arc::new(GaugeBackend::new());
        let index = MemoryIndex::default();
        let jobs = Jobs::default();
        let job_id = jobs.create();

        let summary = run_ingestion(
            &embedder(backend),
            &index,
            Vec::new(),
            &options(),
            &jobs,
            job_id,
        )
        .await
        .unwrap();

        assert_eq!(summary.total, 0);
        assert_eq!(summary.batches, 0);
        assert_eq!(index.len(), 0);
    }
}
